use heapless::String;

use super::Credentials;
use crate::{Error, Result};

/// Parse bootstrap credentials: the SSID on the first line, the password on the second.
///
/// A missing second line means an open network.
///
/// # Errors
///
/// Returns [`Error::MissingBootstrapCredentials`] when the SSID line is missing or blank, and
/// [`Error::InvalidSetting`] when a line is too long.
pub fn parse_bootstrap(text: &str) -> Result<Credentials> {
    let mut lines = text.lines();
    let ssid = lines.next().map(str::trim_end).unwrap_or_default();
    if ssid.is_empty() {
        return Err(Error::MissingBootstrapCredentials);
    }
    let password = lines.next().map(str::trim_end).unwrap_or_default();

    Ok(Credentials {
        ssid: String::try_from(ssid).map_err(|()| Error::InvalidSetting("ssid"))?,
        password: String::try_from(password).map_err(|()| Error::InvalidSetting("wifi_password"))?,
    })
}
