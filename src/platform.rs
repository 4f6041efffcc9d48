//! Board services the node needs beyond the radio and sensor: sleeping, resetting and the
//! chip's unique id.

use embassy_time::Duration;
use heapless::String;

/// How long the board waits before a reset after an unrecoverable failure.
pub const FAILURE_SLEEP: Duration = Duration::from_secs(600);

/// Length of the base64 form of an 8-byte id (padding included).
pub const UUID_LEN: usize = 12;

pub trait Platform {
    async fn sleep(&mut self, duration: Duration);

    /// Restart the board. Test doubles record the call and return.
    fn reset(&mut self);

    fn unique_id(&mut self) -> [u8; 8];
}

impl<P: Platform + ?Sized> Platform for &mut P {
    async fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration).await;
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn unique_id(&mut self) -> [u8; 8] {
        (**self).unique_id()
    }
}

/// Wait out [`FAILURE_SLEEP`], then reset.
pub async fn recover(platform: &mut impl Platform) {
    error!(
        "Unrecoverable failure; resetting in {} s",
        FAILURE_SLEEP.as_secs()
    );
    platform.sleep(FAILURE_SLEEP).await;
    platform.reset();
}

/// Standard base64 of the unique id, used as `pico_uuid`.
#[must_use]
pub fn device_uuid_string(id: &[u8; 8]) -> String<UUID_LEN> {
    use base64::Engine as _;

    let mut encoded = [0u8; UUID_LEN];
    let mut uuid = String::new();
    if let Ok(len) = base64::engine::general_purpose::STANDARD.encode_slice(id, &mut encoded) {
        for &byte in encoded.iter().take(len) {
            // base64 output is ASCII and `UUID_LEN` is exact.
            let _ = uuid.push(char::from(byte));
        }
    }
    uuid
}

#[cfg(all(feature = "arm", any(feature = "pico1", feature = "pico2")))]
pub use rp::RpPlatform;

#[cfg(all(feature = "arm", any(feature = "pico1", feature = "pico2")))]
mod rp {
    use embassy_time::{Duration, Timer};

    use super::Platform;

    /// The real board. The unique id is read once at start-up, from flash or OTP.
    pub struct RpPlatform {
        unique_id: [u8; 8],
    }

    impl RpPlatform {
        #[must_use]
        pub const fn new(unique_id: [u8; 8]) -> Self {
            Self { unique_id }
        }
    }

    impl Platform for RpPlatform {
        async fn sleep(&mut self, duration: Duration) {
            Timer::after(duration).await;
        }

        fn reset(&mut self) {
            cortex_m::peripheral::SCB::sys_reset();
        }

        fn unique_id(&mut self) -> [u8; 8] {
            self.unique_id
        }
    }
}
