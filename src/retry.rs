//! Bounded retry with a fixed backoff between attempts.

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;

use crate::Result;

/// How many times to try a fallible operation and how long to pause between tries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u8,
    backoff: Duration,
}

impl RetryPolicy {
    /// Settings storage: three attempts, two seconds apart.
    pub const STORAGE: Self = Self::new(3, Duration::from_secs(2));

    /// Sensor conversions: one quick retry before reporting absent fields.
    pub const SENSOR: Self = Self::new(2, Duration::from_millis(100));

    /// Create a policy. An attempt count of zero is treated as one.
    #[must_use]
    pub const fn new(attempts: u8, backoff: Duration) -> Self {
        let attempts = if attempts == 0 { 1 } else { attempts };
        Self { attempts, backoff }
    }

    #[must_use]
    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    #[must_use]
    pub const fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Wait out the backoff interval.
    pub async fn pause(&self, delay: &mut impl DelayNs) {
        let millis = u32::try_from(self.backoff.as_millis()).unwrap_or(u32::MAX);
        delay.delay_ms(millis).await;
    }

    /// Run `op` until it succeeds or the attempts are used up, returning the last error.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt when every attempt fails.
    pub async fn run<T>(
        &self,
        delay: &mut impl DelayNs,
        mut op: impl FnMut(u8) -> Result<T>,
    ) -> Result<T> {
        let mut attempt: u8 = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.attempts => return Err(err),
                Err(err) => {
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {} ms",
                        attempt,
                        self.attempts,
                        err,
                        self.backoff.as_millis()
                    );
                    self.pause(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
