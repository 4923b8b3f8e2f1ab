//! BMP280 fixed-point compensation.
//!
//! Converts raw 20-bit ADC counts into centi-degrees Celsius and Pascals
//! using the manufacturer's 32-bit integer formulas. The arithmetic mirrors
//! the reference implementation exactly: arithmetic right shifts, truncating
//! division and unsigned 32-bit intermediates for the pressure path.
//!
//! Every operation wraps on overflow. With real calibration data nothing
//! overflows; with garbage (or all-zero) calibration the result is
//! meaningless but still defined, and never panics.

use serde::{Deserialize, Serialize};

/// Size of the calibration block starting at `dig_T1` (register 0x88)
pub const CALIBRATION_LEN: usize = 24;

/// Size of the measurement block starting at `press_msb` (register 0xF7)
pub const RAW_SAMPLE_LEN: usize = 6;

/// Per-device calibration coefficients.
///
/// Read once from the sensor at start-up and never modified afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationParameters {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
}

impl CalibrationParameters {
    /// Decode the 24-byte little-endian calibration block.
    pub fn from_bytes(buf: &[u8; CALIBRATION_LEN]) -> Self {
        let u = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([buf[i], buf[i + 1]]);

        Self {
            dig_t1: u(0),
            dig_t2: s(2),
            dig_t3: s(4),
            dig_p1: u(6),
            dig_p2: s(8),
            dig_p3: s(10),
            dig_p4: s(12),
            dig_p5: s(14),
            dig_p6: s(16),
            dig_p7: s(18),
            dig_p8: s(20),
            dig_p9: s(22),
        }
    }
}

/// Uncompensated 20-bit sensor output for one measurement cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    pub raw_temperature: i32,
    pub raw_pressure: i32,
}

impl RawSample {
    /// Unpack the burst read of registers 0xF7..=0xFC.
    ///
    /// Pressure comes first (MSB, LSB, XLSB), then temperature. Only the top
    /// nibble of each XLSB register carries data.
    pub fn from_bytes(buf: &[u8; RAW_SAMPLE_LEN]) -> Self {
        let pack = |msb: u8, lsb: u8, xlsb: u8| {
            ((msb as i32) << 12) | ((lsb as i32) << 4) | ((xlsb as i32) >> 4)
        };

        Self {
            raw_pressure: pack(buf[0], buf[1], buf[2]),
            raw_temperature: pack(buf[3], buf[4], buf[5]),
        }
    }
}

/// Physical readings derived from a [`RawSample`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensatedReading {
    /// Temperature in 0.01 °C
    pub temperature_centidegrees: i32,
    /// Pressure in Pa
    pub pressure_pascals: i32,
}

impl CompensatedReading {
    /// Temperature in °C for display and upload
    pub fn temperature_celsius(&self) -> f32 {
        self.temperature_centidegrees as f32 / 100.0
    }

    /// Pressure in kPa for display and upload
    pub fn pressure_kilopascals(&self) -> f32 {
        self.pressure_pascals as f32 / 1000.0
    }
}

/// Fine-temperature intermediate shared by both compensation formulas.
pub fn fine_temperature(raw_temperature: i32, params: &CalibrationParameters) -> i32 {
    let t1 = params.dig_t1 as i32;
    let t2 = params.dig_t2 as i32;
    let t3 = params.dig_t3 as i32;

    let var1 = ((raw_temperature >> 3).wrapping_sub(t1 << 1)).wrapping_mul(t2) >> 11;
    let delta = (raw_temperature >> 4).wrapping_sub(t1);
    let var2 = ((delta.wrapping_mul(delta) >> 12).wrapping_mul(t3)) >> 14;

    var1.wrapping_add(var2)
}

/// Temperature in 0.01 °C from a fine-temperature value.
pub fn temperature_from_fine(t_fine: i32) -> i32 {
    t_fine.wrapping_mul(5).wrapping_add(128) >> 8
}

/// Pressure in Pa from a raw pressure count and a fine-temperature value.
///
/// Returns 0 when the calibration makes the divisor vanish.
pub fn pressure_from_fine(raw_pressure: i32, t_fine: i32, params: &CalibrationParameters) -> u32 {
    let p1 = params.dig_p1 as i32;
    let p2 = params.dig_p2 as i32;
    let p3 = params.dig_p3 as i32;
    let p4 = params.dig_p4 as i32;
    let p5 = params.dig_p5 as i32;
    let p6 = params.dig_p6 as i32;
    let p7 = params.dig_p7 as i32;
    let p8 = params.dig_p8 as i32;
    let p9 = params.dig_p9 as i32;

    let mut var1 = (t_fine >> 1).wrapping_sub(64000);
    let quarter = var1 >> 2;
    let quarter_sq = quarter.wrapping_mul(quarter);

    let mut var2 = (quarter_sq >> 11).wrapping_mul(p6);
    var2 = var2.wrapping_add(var1.wrapping_mul(p5) << 1);
    var2 = (var2 >> 2).wrapping_add(p4 << 16);

    var1 = ((p3.wrapping_mul(quarter_sq >> 13) >> 3).wrapping_add(p2.wrapping_mul(var1) >> 1))
        >> 18;
    var1 = (32768_i32.wrapping_add(var1)).wrapping_mul(p1) >> 15;

    if var1 == 0 {
        return 0;
    }

    let divisor = var1 as u32;
    let mut pressure = (1_048_576_i32.wrapping_sub(raw_pressure) as u32)
        .wrapping_sub((var2 >> 12) as u32)
        .wrapping_mul(3125);

    pressure = if pressure < 0x8000_0000 {
        (pressure << 1) / divisor
    } else {
        (pressure / divisor).wrapping_mul(2)
    };

    let eighth = pressure >> 3;
    let var1 = p9.wrapping_mul((eighth.wrapping_mul(eighth) >> 13) as i32) >> 12;
    let var2 = ((pressure >> 2) as i32).wrapping_mul(p8) >> 13;

    (pressure as i32).wrapping_add(var1.wrapping_add(var2).wrapping_add(p7) >> 4) as u32
}

/// Compensate one raw sample.
///
/// Pure and deterministic: identical inputs always give identical outputs.
pub fn compensate(raw: &RawSample, params: &CalibrationParameters) -> CompensatedReading {
    let t_fine = fine_temperature(raw.raw_temperature, params);

    CompensatedReading {
        temperature_centidegrees: temperature_from_fine(t_fine),
        pressure_pascals: pressure_from_fine(raw.raw_pressure, t_fine, params) as i32,
    }
}
