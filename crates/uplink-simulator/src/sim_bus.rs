//! Simulated BMP280 on an `embedded-hal` I2C bus.
//!
//! Serves the datasheet calibration block and raw counts that drift slowly
//! around the datasheet's worked example, so the compensated readings look
//! like a room slowly warming up and cooling down.

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use log::trace;

use uplink_core::sensors::BMP280_ADDR;

const REGISTER_FILE_LEN: usize = 256;

/// Calibration words starting at register 0x88 (datasheet example device)
const CALIBRATION: [u16; 12] = [
    27504,
    26435,
    (-1000_i16) as u16,
    36477,
    (-10685_i16) as u16,
    3024,
    2855,
    140,
    (-7_i16) as u16,
    15500,
    (-14600_i16) as u16,
    6000,
];

const BASE_RAW_TEMPERATURE: f64 = 519_888.0;
const BASE_RAW_PRESSURE: f64 = 415_148.0;

pub struct SimBmp280 {
    registers: [u8; REGISTER_FILE_LEN],
    samples: u32,
}

impl SimBmp280 {
    pub fn new() -> Self {
        let mut registers = [0u8; REGISTER_FILE_LEN];
        for (i, word) in CALIBRATION.iter().enumerate() {
            let [lo, hi] = word.to_le_bytes();
            registers[0x88 + i * 2] = lo;
            registers[0x89 + i * 2] = hi;
        }

        let mut sim = Self {
            registers,
            samples: 0,
        };
        sim.latch_measurement();
        sim
    }

    /// Load the next raw measurement into 0xF7..=0xFC.
    fn latch_measurement(&mut self) {
        let t = self.samples as f64;
        self.samples = self.samples.wrapping_add(1);

        let raw_temperature = BASE_RAW_TEMPERATURE + 4_000.0 * (t / 40.0).sin();
        let raw_pressure = BASE_RAW_PRESSURE + 1_500.0 * (t / 90.0).cos();

        let pack = |raw: f64| {
            let raw = raw as u32 & 0xF_FFFF;
            [(raw >> 12) as u8, (raw >> 4) as u8, ((raw & 0x0F) << 4) as u8]
        };

        self.registers[0xF7..0xFA].copy_from_slice(&pack(raw_pressure));
        self.registers[0xFA..0xFD].copy_from_slice(&pack(raw_temperature));
    }
}

impl ErrorType for SimBmp280 {
    type Error = ErrorKind;
}

impl I2c for SimBmp280 {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != BMP280_ADDR {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        let mut pointer = 0usize;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&reg, values)) = bytes.split_first() else {
                        continue;
                    };
                    pointer = reg as usize;
                    for (offset, value) in values.iter().enumerate() {
                        let target = (pointer + offset) % REGISTER_FILE_LEN;
                        trace!("BMP280 sim: write {:#04x} = {:#04x}", target, value);
                        self.registers[target] = *value;
                    }
                }
                Operation::Read(buf) => {
                    if pointer == 0xF7 {
                        self.latch_measurement();
                    }
                    for (offset, byte) in buf.iter_mut().enumerate() {
                        *byte = self.registers[(pointer + offset) % REGISTER_FILE_LEN];
                    }
                }
            }
        }
        Ok(())
    }
}
