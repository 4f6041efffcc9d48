use bme280::i2c::BME280;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::{Reading, SensorDriver};
use crate::settings::SensorKind;
use crate::{Error, Result};

const PASCAL_PER_HECTOPASCAL: f32 = 100.0;

/// Bosch BME280 temperature/pressure/humidity sensor on a blocking I²C bus.
pub struct Bme280Sensor<I2C, D> {
    device: BME280<I2C>,
    delay: D,
    initialized: bool,
}

impl<I2C: I2c, D: DelayNs> Bme280Sensor<I2C, D> {
    /// Sensor at the primary address (0x76).
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            device: BME280::new_primary(i2c),
            delay,
            initialized: false,
        }
    }

    /// Sensor at the secondary address (0x77).
    pub fn new_secondary(i2c: I2C, delay: D) -> Self {
        Self {
            device: BME280::new_secondary(i2c),
            delay,
            initialized: false,
        }
    }
}

impl<I2C: I2c, D: DelayNs> SensorDriver for Bme280Sensor<I2C, D> {
    fn kind(&self) -> SensorKind {
        SensorKind::Bme280
    }

    async fn probe(&mut self) -> Result<()> {
        self.device.init(&mut self.delay).map_err(|_| {
            warn!("BME280 did not answer on the I2C bus");
            Error::HardwareAbsent
        })?;
        self.initialized = true;
        Ok(())
    }

    async fn measure(&mut self) -> Result<Reading> {
        if !self.initialized {
            self.device
                .init(&mut self.delay)
                .map_err(|_| Error::HardwareTransient)?;
            self.initialized = true;
        }
        let measurements = self.device.measure(&mut self.delay).map_err(|_| {
            // A failed conversion may mean the chip was reset; calibrate again next time.
            self.initialized = false;
            Error::HardwareTransient
        })?;
        Ok(Reading {
            temperature: Some(measurements.temperature),
            pressure: Some(measurements.pressure / PASCAL_PER_HECTOPASCAL),
            humidity: Some(measurements.humidity),
        })
    }
}
