use derive_more::derive::{Display, Error};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the node firmware.
#[expect(missing_docs, reason = "The variants are self-explanatory.")]
#[derive(Debug, Display, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // `#[error(not(source))]` tells `derive_more` that `embassy_executor::SpawnError` does not
    // implement `core::error::Error`.
    #[cfg(any(feature = "pico1", feature = "pico2"))]
    #[display("{_0:?}")]
    TaskSpawn(#[error(not(source))] embassy_executor::SpawnError),

    #[display("Transport error on client connection")]
    Transport,

    #[display("Listening socket failed")]
    FatalTransport,

    #[display("Malformed request: {_0}")]
    MalformedRequest(#[error(not(source))] &'static str),

    #[display("Sensor not detected")]
    HardwareAbsent,

    #[display("Sensor read failed")]
    HardwareTransient,

    #[display("Settings storage I/O failed")]
    Storage,

    #[display("Stored settings record is corrupted")]
    StorageCorrupted,

    #[display("Could not join any configured WiFi network")]
    WifiJoinFailure,

    #[display("No not-found route registered")]
    MissingNotFoundRoute,

    #[display("Not-found route registered twice")]
    DuplicateNotFoundRoute,

    #[display("Route registered twice")]
    DuplicateRoute,

    #[display("Fixed capacity exceeded")]
    CapacityExceeded,

    #[display("Format error")]
    FormatError,

    #[display("Invalid setting: {_0}")]
    InvalidSetting(#[error(not(source))] &'static str),

    #[display("Bootstrap credentials are missing")]
    MissingBootstrapCredentials,

    #[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
    #[display("Flash operation failed: {_0:?}")]
    Flash(#[error(not(source))] embassy_rp::flash::Error),
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Self::FormatError
    }
}

#[cfg(any(feature = "pico1", feature = "pico2"))]
impl From<embassy_executor::SpawnError> for Error {
    fn from(err: embassy_executor::SpawnError) -> Self {
        Self::TaskSpawn(err)
    }
}
