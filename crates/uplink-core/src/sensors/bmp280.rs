use crate::compensation::{
    CALIBRATION_LEN, CalibrationParameters, CompensatedReading, RAW_SAMPLE_LEN, RawSample,
    compensate,
};
use crate::sensors::{Sensor, SensorError};

use embedded_hal::i2c::I2c;
use log::{debug, error, info};

/// Default I2C address (SDO pulled low)
pub const BMP280_ADDR: u8 = 0x76;

const REG_CONFIG: u8 = 0xF5;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_PRESSURE_MSB: u8 = 0xF7;
const REG_DIG_T1_LSB: u8 = 0x88;

/// 500 ms standby, IIR filter coefficient 16
const CONFIG_VALUE: u8 = ((0x04 << 5) | (0x05 << 2)) & 0xFC;
/// Temperature x1, pressure x4 oversampling, normal mode
const CTRL_MEAS_VALUE: u8 = (0x01 << 5) | (0x03 << 2) | 0x03;

/// BMP280 barometric sensor on a blocking I2C bus.
///
/// Calibration is read once, either explicitly through [`Bmp280Sensor::init`]
/// or lazily on the first [`Sensor::read`].
pub struct Bmp280Sensor<I> {
    i2c: I,
    address: u8,
    calibration: Option<CalibrationParameters>,
}

impl<I: I2c> Bmp280Sensor<I> {
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, BMP280_ADDR)
    }

    pub fn with_address(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            calibration: None,
        }
    }

    /// Configure continuous measurement and read the calibration block.
    /// This should be called once during initialization.
    pub fn init(&mut self) -> Result<(), SensorError> {
        self.write_register(REG_CONFIG, CONFIG_VALUE)?;
        self.write_register(REG_CTRL_MEAS, CTRL_MEAS_VALUE)?;

        let mut buf = [0u8; CALIBRATION_LEN];
        self.i2c
            .write_read(self.address, &[REG_DIG_T1_LSB], &mut buf)
            .map_err(|e| {
                error!("BMP280 calibration read failed: {:?}", e);
                SensorError::InitializationFailed {
                    sensor: "BMP280",
                    details: "Failed to read calibration parameters",
                }
            })?;

        let params = CalibrationParameters::from_bytes(&buf);
        debug!("BMP280 calibration: {:?}", params);
        self.calibration = Some(params);

        info!("BMP280: configured and calibrated");
        Ok(())
    }

    /// Calibration coefficients, if they have been read.
    pub fn calibration(&self) -> Option<&CalibrationParameters> {
        self.calibration.as_ref()
    }

    /// Burst-read the raw pressure and temperature counts.
    pub fn read_raw(&mut self) -> Result<RawSample, SensorError> {
        let mut buf = [0u8; RAW_SAMPLE_LEN];
        self.i2c
            .write_read(self.address, &[REG_PRESSURE_MSB], &mut buf)
            .map_err(|e| {
                error!("BMP280 raw read failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "BMP280",
                    operation: "read raw measurement",
                    details: "I2C communication error",
                }
            })?;

        Ok(RawSample::from_bytes(&buf))
    }

    /// Release the underlying bus.
    pub fn release(self) -> I {
        self.i2c
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c.write(self.address, &[register, value]).map_err(|e| {
            error!("BMP280 write to register {:#04x} failed: {:?}", register, e);
            SensorError::InitializationFailed {
                sensor: "BMP280",
                details: "Failed to write configuration register",
            }
        })
    }
}

impl<I: I2c> Sensor for Bmp280Sensor<I> {
    type Readings = CompensatedReading;

    fn read(&mut self) -> Result<CompensatedReading, SensorError> {
        // Initialize sensor on first read
        if self.calibration.is_none() {
            self.init()?;
        }

        let raw = self.read_raw()?;
        let params = self.calibration.unwrap_or_default();

        Ok(compensate(&raw, &params))
    }
}
