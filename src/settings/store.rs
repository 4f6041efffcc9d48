use embedded_hal_async::delay::DelayNs;

use super::{Settings, parse_bootstrap};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Largest encoded settings record.
pub const RECORD_LEN: usize = 512;

/// A single durable record slot.
pub trait Storage {
    /// Copy the stored record into `buffer`, returning its length, or `None` if the slot is
    /// empty.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] for I/O failures (retried), [`Error::StorageCorrupted`] for a record
    /// that fails its integrity check (not retried).
    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>>;

    /// Replace the stored record.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] for I/O failures.
    fn write(&mut self, record: &[u8]) -> Result<()>;

    /// Empty the slot.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] for I/O failures.
    fn erase(&mut self) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>> {
        (**self).read(buffer)
    }

    fn write(&mut self, record: &[u8]) -> Result<()> {
        (**self).write(record)
    }

    fn erase(&mut self) -> Result<()> {
        (**self).erase()
    }
}

/// Loads and saves [`Settings`] with bounded retries; failures are reported, never raised.
pub struct SettingsStore<S, D> {
    storage: S,
    delay: D,
    retry: RetryPolicy,
}

impl<S: Storage, D: DelayNs> SettingsStore<S, D> {
    #[must_use]
    pub const fn new(storage: S, delay: D) -> Self {
        Self::with_retry(storage, delay, RetryPolicy::STORAGE)
    }

    #[must_use]
    pub const fn with_retry(storage: S, delay: D, retry: RetryPolicy) -> Self {
        Self {
            storage,
            delay,
            retry,
        }
    }

    /// The stored settings, or `None` if there are none, they are unreadable after all
    /// retries, or they do not decode.
    pub async fn load(&mut self) -> Option<Settings> {
        let mut buffer = [0u8; RECORD_LEN];
        let Self {
            storage,
            delay,
            retry,
        } = self;
        let stored = retry
            .run(delay, |_| match storage.read(&mut buffer) {
                Err(Error::StorageCorrupted) => {
                    error!("Settings record failed its integrity check");
                    Ok(None)
                }
                other => other,
            })
            .await;

        let len = match stored {
            Ok(Some(len)) => len,
            Ok(None) => {
                info!("No settings stored");
                return None;
            }
            Err(err) => {
                error!("Could not read settings: {}", err);
                return None;
            }
        };

        match Settings::from_json(buffer.get(..len).unwrap_or_default()) {
            Ok(settings) => {
                info!("Loaded settings for {}", settings.pico_id.as_str());
                Some(settings)
            }
            Err(err) => {
                error!("Stored settings do not decode: {}", err);
                None
            }
        }
    }

    /// Persist `settings`. Returns `false` if encoding fails or every attempt fails.
    pub async fn save(&mut self, settings: &Settings) -> bool {
        let mut buffer = [0u8; RECORD_LEN];
        let len = match settings.to_json(&mut buffer) {
            Ok(len) => len,
            Err(err) => {
                error!("Could not encode settings: {}", err);
                return false;
            }
        };
        let record = buffer.get(..len).unwrap_or_default();

        let Self {
            storage,
            delay,
            retry,
        } = self;
        match retry.run(delay, |_| storage.write(record)).await {
            Ok(()) => {
                info!("Saved settings ({} bytes)", len);
                true
            }
            Err(err) => {
                error!("Could not save settings: {}", err);
                false
            }
        }
    }

    /// Remove the stored settings. Returns `false` if every attempt fails.
    pub async fn delete(&mut self) -> bool {
        let Self {
            storage,
            delay,
            retry,
        } = self;
        match retry.run(delay, |_| storage.erase()).await {
            Ok(()) => {
                info!("Deleted settings");
                true
            }
            Err(err) => {
                error!("Could not delete settings: {}", err);
                false
            }
        }
    }

    /// Stored settings, or first-boot settings from `bootstrap` (which are then persisted).
    ///
    /// # Errors
    ///
    /// Returns the bootstrap parse error when nothing is stored and the credentials are
    /// unusable.
    pub async fn load_or_bootstrap(&mut self, bootstrap: &str) -> Result<Settings> {
        if let Some(settings) = self.load().await {
            return Ok(settings);
        }

        info!("Creating settings from bootstrap credentials");
        let settings = Settings::bootstrap(parse_bootstrap(bootstrap)?);
        if !self.save(&settings).await {
            warn!("Continuing with unsaved bootstrap settings");
        }
        Ok(settings)
    }

    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
