//! Ambient sensor drivers and the reading source used by request handlers.
//!
//! A sensor that is not found at start-up is reported as [`Error::HardwareAbsent`]; the
//! caller falls back to [`SensorKind::None`] and persists that. Read glitches after start-up
//! never surface as errors: [`SensorSource::next`] logs them and returns a reading with every
//! field absent.

mod bme280;
mod dht22;

use embedded_hal_async::delay::DelayNs;

use crate::retry::RetryPolicy;
use crate::settings::{SensorKind, Settings, SettingsStore, Storage};
use crate::{Error, Result};

pub use self::bme280::Bme280Sensor;
#[cfg(any(feature = "pico1", feature = "pico2"))]
pub use dht22::Dht22Sensor;
pub use dht22::{decode_dht22_frame, frame_from_pulses};

/// One sampled observation. Fields the sensor cannot measure are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Reading {
    /// Degrees Celsius.
    pub temperature: Option<f32>,
    /// Hectopascal.
    pub pressure: Option<f32>,
    /// Percent relative humidity.
    pub humidity: Option<f32>,
}

impl Reading {
    pub const ABSENT: Self = Self {
        temperature: None,
        pressure: None,
        humidity: None,
    };

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        self.temperature.is_none() && self.pressure.is_none() && self.humidity.is_none()
    }
}

/// A physical (or stand-in) sensor.
pub trait SensorDriver {
    fn kind(&self) -> SensorKind;

    /// Check the sensor answers and prepare it.
    ///
    /// # Errors
    ///
    /// [`Error::HardwareAbsent`] when nothing responds.
    async fn probe(&mut self) -> Result<()>;

    /// Take one measurement.
    ///
    /// # Errors
    ///
    /// [`Error::HardwareTransient`] for a failed or corrupted conversion.
    async fn measure(&mut self) -> Result<Reading>;
}

/// Used when no sensor is configured; every reading is absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSensor;

impl SensorDriver for NoSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::None
    }

    async fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    async fn measure(&mut self) -> Result<Reading> {
        Ok(Reading::ABSENT)
    }
}

/// A configured driver, or nothing when its probe found no hardware.
pub enum Probed<S> {
    Present(S),
    Missing,
}

impl<S: SensorDriver> SensorDriver for Probed<S> {
    fn kind(&self) -> SensorKind {
        match self {
            Self::Present(driver) => driver.kind(),
            Self::Missing => SensorKind::None,
        }
    }

    async fn probe(&mut self) -> Result<()> {
        match self {
            Self::Present(driver) => driver.probe().await,
            Self::Missing => Ok(()),
        }
    }

    async fn measure(&mut self) -> Result<Reading> {
        match self {
            Self::Present(driver) => driver.measure().await,
            Self::Missing => Ok(Reading::ABSENT),
        }
    }
}

/// Produces one [`Reading`] per call, retrying transient failures.
pub struct SensorSource<S, D> {
    driver: S,
    delay: D,
    retry: RetryPolicy,
}

impl<S: SensorDriver, D: DelayNs> SensorSource<S, D> {
    /// Probe `driver` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns the probe error, [`Error::HardwareAbsent`] when no device answers.
    pub async fn initialize(mut driver: S, delay: D) -> Result<Self> {
        driver.probe().await?;
        info!("Sensor {} ready", driver.kind().as_str());
        Ok(Self::ready(driver, delay))
    }

    const fn ready(driver: S, delay: D) -> Self {
        Self {
            driver,
            delay,
            retry: RetryPolicy::SENSOR,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn kind(&self) -> SensorKind {
        self.driver.kind()
    }

    /// Next reading. Never fails: after the retries it logs and returns [`Reading::ABSENT`].
    pub async fn next(&mut self) -> Reading {
        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            match self.driver.measure().await {
                Ok(reading) => return reading,
                Err(err) => {
                    warn!("Sensor read {}/{} failed: {}", attempt, attempts, err);
                    if attempt < attempts {
                        self.retry.pause(&mut self.delay).await;
                    }
                }
            }
        }
        error!("Sensor unavailable; reporting absent reading");
        Reading::ABSENT
    }
}

/// Probe the configured driver. If the hardware is absent, switch `settings` to
/// [`SensorKind::None`], persist that, and carry on without a sensor.
pub async fn start_sensor<S, D, St, SD>(
    driver: S,
    delay: D,
    settings: &mut Settings,
    store: &mut SettingsStore<St, SD>,
) -> SensorSource<Probed<S>, D>
where
    S: SensorDriver,
    D: DelayNs,
    St: Storage,
    SD: DelayNs,
{
    let mut probed = Probed::Present(driver);
    match probed.probe().await {
        Ok(()) => info!("Sensor {} ready", probed.kind().as_str()),
        Err(Error::HardwareAbsent) => {
            warn!(
                "Sensor {} not found; falling back to none",
                settings.sensor_kind.as_str()
            );
            probed = Probed::Missing;
            if settings.sensor_kind != SensorKind::None {
                settings.sensor_kind = SensorKind::None;
                if !store.save(settings).await {
                    error!("Could not persist sensor fallback");
                }
            }
        }
        Err(err) => warn!("Sensor probe failed ({}); will retry on each read", err),
    }
    SensorSource::ready(probed, delay)
}
