//! The persisted configuration record and its storage.
//!
//! Settings are stored as one JSON object. On first boot, when nothing is stored yet, they are
//! created from two-line bootstrap credentials (SSID, then password).

mod bootstrap;
mod store;

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::text::truncated;
use crate::{Error, Result};

pub use bootstrap::parse_bootstrap;
pub use store::{RECORD_LEN, SettingsStore, Storage};

pub const PICO_ID_LEN: usize = 32;
pub const SSID_LEN: usize = 32;
pub const PASSWORD_LEN: usize = 64;
pub const COUNTRY_LEN: usize = 2;
/// Highest user GPIO on the Pico.
pub const MAX_PIN: u8 = 29;
/// Identifier given to a freshly bootstrapped node.
pub const SETUP_PICO_ID: &str = "setup";
pub const DEFAULT_COUNTRY: &str = "DE";

/// Which ambient sensor is wired to the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    Bme280,
    Dht22,
    #[default]
    None,
}

impl SensorKind {
    pub const ALL: [Self; 3] = [Self::Bme280, Self::Dht22, Self::None];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bme280 => "bme280",
            Self::Dht22 => "dht22",
            Self::None => "none",
        }
    }

    /// Case-insensitive parse of [`SensorKind::as_str`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

/// WiFi network name and password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String<SSID_LEN>,
    pub password: String<PASSWORD_LEN>,
}

/// The node's configuration record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub pico_id: String<PICO_ID_LEN>,
    pub sensor_kind: SensorKind,
    /// Data pin of a single-wire sensor.
    pub gpio: u8,
    pub sda_pin: u8,
    pub scl_pin: u8,
    pub ssid: String<SSID_LEN>,
    pub wifi_password: String<PASSWORD_LEN>,
    /// Two-letter WiFi regulatory domain.
    #[serde(default = "default_country")]
    pub wifi_country: String<COUNTRY_LEN>,
}

fn default_country() -> String<COUNTRY_LEN> {
    truncated(DEFAULT_COUNTRY)
}

impl Settings {
    /// First-boot settings built from bootstrap credentials.
    #[must_use]
    pub fn bootstrap(credentials: Credentials) -> Self {
        Self {
            pico_id: truncated(SETUP_PICO_ID),
            sensor_kind: SensorKind::None,
            gpio: 0,
            sda_pin: 0,
            scl_pin: 1,
            ssid: credentials.ssid,
            wifi_password: credentials.password,
            wifi_country: default_country(),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials {
            ssid: self.ssid.clone(),
            password: self.wifi_password.clone(),
        }
    }

    /// Apply one submitted form field. Unknown field names are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetting`] naming the field when the value is empty where a value
    /// is required, too long, not a valid pin, or not a known sensor kind.
    pub fn apply_field(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match name {
            "pico_id" => self.pico_id = required(value, "pico_id")?,
            "sensor_kind" => {
                self.sensor_kind =
                    SensorKind::parse(value).ok_or(Error::InvalidSetting("sensor_kind"))?;
            }
            "gpio" => self.gpio = parse_pin(value, "gpio")?,
            "sda_pin" => self.sda_pin = parse_pin(value, "sda_pin")?,
            "scl_pin" => self.scl_pin = parse_pin(value, "scl_pin")?,
            "ssid" => self.ssid = required(value, "ssid")?,
            "wifi_password" => {
                self.wifi_password =
                    String::try_from(value).map_err(|()| Error::InvalidSetting("wifi_password"))?;
            }
            "wifi_country" => {
                if value.len() != COUNTRY_LEN || !value.chars().all(|ch| ch.is_ascii_alphabetic()) {
                    return Err(Error::InvalidSetting("wifi_country"));
                }
                self.wifi_country = truncated(value);
                self.wifi_country.make_ascii_uppercase();
            }
            _ => debug!("Ignoring unknown settings field {}", name),
        }
        Ok(())
    }

    /// Encode as JSON into `buffer`, returning the encoded length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormatError`] when `buffer` is too small.
    pub fn to_json(&self, buffer: &mut [u8]) -> Result<usize> {
        serde_json_core::to_slice(self, buffer).map_err(|_| Error::FormatError)
    }

    /// Decode from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageCorrupted`] when the bytes are not a settings record.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut scratch = [0u8; PASSWORD_LEN];
        serde_json_core::from_slice_escaped(bytes, &mut scratch)
            .map(|(settings, _)| settings)
            .map_err(|_| Error::StorageCorrupted)
    }
}

fn required<const N: usize>(value: &str, field: &'static str) -> Result<String<N>> {
    if value.is_empty() {
        return Err(Error::InvalidSetting(field));
    }
    String::try_from(value).map_err(|()| Error::InvalidSetting(field))
}

fn parse_pin(value: &str, field: &'static str) -> Result<u8> {
    value
        .parse::<u8>()
        .ok()
        .filter(|pin| *pin <= MAX_PIN)
        .ok_or(Error::InvalidSetting(field))
}
