//! Radio bring-up: activate, try each credential candidate with bounded polling, and report
//! the outcome on the [`EventBus`].
//!
//! ```text
//! Inactive -> RadioActive -> Connecting(ssid) -> Connected { ssid, ip }
//!                                      \-------> Failed
//! ```
//!
//! The candidate queue holds the configured credentials repeated
//! [`ConnectorConfig::repeat`] times. A join that reports failure, or that neither fails nor
//! gets an address within [`ConnectorConfig::max_wait`], moves on to the next candidate after
//! [`ConnectorConfig::backoff`]. `Failed` is terminal; the caller recovers with
//! [`crate::platform::recover`].

#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
mod cyw43_radio;

use core::net::Ipv4Addr;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use heapless::{Deque, String};

use crate::dispatch::{CallbackHandler, EventBus, events};
use crate::runtime_context::{Params, RuntimeContext, Value, keys};
use crate::settings::{COUNTRY_LEN, Credentials, SSID_LEN};
use crate::text::truncated;
use crate::{Error, Result};

#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
pub use cyw43_radio::{Cyw43Radio, RadioPins};

/// Upper bound on queued join attempts (credentials times repeat count).
pub const MAX_CANDIDATES: usize = 16;

/// Link status as reported by the radio while a join is in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    GotIp(Ipv4Addr),
    Failed,
}

/// The WiFi chip, seen through the operations the connector and the node need.
pub trait Radio {
    /// Power up the radio in station mode for the given regulatory domain.
    ///
    /// # Errors
    ///
    /// [`Error::WifiJoinFailure`] if the chip does not come up.
    async fn activate(&mut self, country: &str) -> Result<()>;

    /// The currently assigned address, `None` while unassigned.
    async fn local_ip(&mut self) -> Option<Ipv4Addr>;

    /// Start joining `ssid`.
    ///
    /// # Errors
    ///
    /// [`Error::WifiJoinFailure`] if the join is rejected outright.
    async fn connect(&mut self, ssid: &str, password: &str) -> Result<()>;

    async fn status(&mut self) -> LinkStatus;

    async fn disconnect(&mut self);

    /// Drive the on-board LED.
    async fn set_led(&mut self, on: bool);
}

/// The radio shared between the connector and the request handlers.
pub type SharedRadio<R> = Mutex<CriticalSectionRawMutex, R>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Inactive,
    RadioActive,
    Connecting(String<SSID_LEN>),
    Connected {
        ssid: String<SSID_LEN>,
        ip: Ipv4Addr,
    },
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::RadioActive => "radio active",
            Self::Connecting(_) => "connecting",
            Self::Connected { .. } => "connected",
            Self::Failed => "failed",
        }
    }
}

/// Timing and retry tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Times the credential list is queued.
    pub repeat: u8,
    /// Interval between status polls during a join.
    pub poll_interval: Duration,
    /// Longest a single join may stay undecided, counted in poll intervals.
    pub max_wait: Duration,
    /// Pause before the next candidate after a failed join.
    pub backoff: Duration,
    /// Polls for an assigned address after activation.
    pub ip_poll_attempts: u8,
    pub ip_poll_interval: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            repeat: 4,
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(20),
            backoff: Duration::from_secs(1),
            ip_poll_attempts: 20,
            ip_poll_interval: Duration::from_millis(10),
        }
    }
}

/// Drives one bring-up from `Inactive` to `Connected` or `Failed`.
pub struct WifiConnector<C, D> {
    config: ConnectorConfig,
    country: String<COUNTRY_LEN>,
    candidates: Deque<Credentials, MAX_CANDIDATES>,
    state: ConnectionState,
    delay: D,
    on_fatal: C,
}

impl<C: Copy, D: DelayNs> WifiConnector<C, D> {
    /// Queue `credentials` repeated `config.repeat` times.
    ///
    /// `on_fatal` is subscribed to `fatal_error` once connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the repeated list does not fit the queue and
    /// [`Error::WifiJoinFailure`] when there is nothing to try.
    pub fn new(
        credentials: &[Credentials],
        country: &str,
        config: ConnectorConfig,
        delay: D,
        on_fatal: C,
    ) -> Result<Self> {
        let mut candidates = Deque::new();
        for _ in 0..config.repeat {
            for credential in credentials.iter().filter(|c| !c.ssid.is_empty()) {
                candidates
                    .push_back(credential.clone())
                    .map_err(|_| Error::CapacityExceeded)?;
            }
        }
        if candidates.is_empty() {
            return Err(Error::WifiJoinFailure);
        }
        Ok(Self {
            config,
            country: truncated(country),
            candidates,
            state: ConnectionState::Inactive,
            delay,
            on_fatal,
        })
    }

    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Join attempts still queued.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }

    /// Run the state machine to a terminal state.
    ///
    /// The radio lock is released before each event fires so callbacks may use the radio.
    pub async fn connect<R, A>(
        &mut self,
        radio: &SharedRadio<R>,
        bus: &mut EventBus<C>,
        context: &mut RuntimeContext,
        callbacks: &mut A,
    ) -> ConnectionState
    where
        R: Radio,
        A: CallbackHandler<C>,
    {
        if self.activate(radio, context).await.is_err() {
            self.fail(bus, context, callbacks).await;
            return self.state.clone();
        }
        bus.fire(events::WLAN_ACTIVE, context, callbacks).await;
        bus.fire(events::WLAN_STARTING_TO_CONNECT, context, callbacks)
            .await;

        while let Some(candidate) = self.candidates.pop_front() {
            self.transition(ConnectionState::Connecting(candidate.ssid.clone()));
            match self.join(radio, &candidate).await {
                Some(ip) => {
                    self.connected(candidate, ip, bus, context);
                    bus.fire(events::WLAN_CONNECTED, context, callbacks).await;
                    return self.state.clone();
                }
                None if !self.candidates.is_empty() => {
                    info!(
                        "{} join attempts left; next in {} ms",
                        self.candidates.len(),
                        self.config.backoff.as_millis()
                    );
                    self.pause(self.config.backoff).await;
                }
                None => {}
            }
        }

        self.fail(bus, context, callbacks).await;
        self.state.clone()
    }

    async fn activate<R: Radio>(
        &mut self,
        radio: &SharedRadio<R>,
        context: &mut RuntimeContext,
    ) -> Result<()> {
        let mut radio = radio.lock().await;
        if let Err(err) = radio.activate(&self.country).await {
            error!("Radio activation failed: {}", err);
            return Err(err);
        }
        self.transition(ConnectionState::RadioActive);

        for _ in 0..self.config.ip_poll_attempts {
            if let Some(ip) = radio.local_ip().await.filter(|ip| !ip.is_unspecified()) {
                set_ip(context, ip)?;
                break;
            }
            self.pause(self.config.ip_poll_interval).await;
        }
        Ok(())
    }

    /// One join attempt. `Some(ip)` on success.
    async fn join<R: Radio>(&mut self, radio: &SharedRadio<R>, candidate: &Credentials) -> Option<Ipv4Addr> {
        info!("Connecting to {}", candidate.ssid.as_str());
        if let Err(err) = radio
            .lock()
            .await
            .connect(&candidate.ssid, &candidate.password)
            .await
        {
            warn!("Join request for {} rejected: {}", candidate.ssid.as_str(), err);
            return None;
        }

        let mut waited = Duration::from_ticks(0);
        loop {
            match radio.lock().await.status().await {
                LinkStatus::GotIp(ip) => return Some(ip),
                LinkStatus::Failed => {
                    warn!("Join of {} failed", candidate.ssid.as_str());
                    return None;
                }
                LinkStatus::Connecting => {}
            }
            if waited >= self.config.max_wait {
                warn!(
                    "Join of {} timed out after {} s",
                    candidate.ssid.as_str(),
                    self.config.max_wait.as_secs()
                );
                radio.lock().await.disconnect().await;
                return None;
            }
            self.pause(self.config.poll_interval).await;
            waited = waited
                .checked_add(self.config.poll_interval.max(Duration::from_ticks(1)))
                .unwrap_or(self.config.max_wait);
        }
    }

    fn connected(
        &mut self,
        candidate: Credentials,
        ip: Ipv4Addr,
        bus: &mut EventBus<C>,
        context: &mut RuntimeContext,
    ) {
        if let Err(err) = context
            .set(keys::CURRENT_SSID, Value::text(&candidate.ssid))
            .and_then(|()| set_ip(context, ip))
        {
            warn!("Could not record connection details: {}", err);
        }
        info!(
            "Connected to {} with address {}",
            candidate.ssid.as_str(),
            context.get(keys::WLAN_IP).as_str().unwrap_or("?")
        );
        if let Err(err) = bus.subscribe(events::FATAL_ERROR, self.on_fatal, Params::new(), &[]) {
            warn!("Could not register radio shutdown on fatal error: {}", err);
        }
        self.candidates.clear();
        self.transition(ConnectionState::Connected {
            ssid: candidate.ssid,
            ip,
        });
    }

    async fn fail<A: CallbackHandler<C>>(
        &mut self,
        bus: &EventBus<C>,
        context: &RuntimeContext,
        callbacks: &mut A,
    ) {
        self.candidates.clear();
        self.transition(ConnectionState::Failed);
        error!("{}", Error::WifiJoinFailure);
        bus.fire(events::CANT_CONNECT, context, callbacks).await;
    }

    fn transition(&mut self, next: ConnectionState) {
        info!("WiFi: {} -> {}", self.state.label(), next.label());
        self.state = next;
    }

    async fn pause(&mut self, duration: Duration) {
        let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        self.delay.delay_ms(millis).await;
    }
}

fn set_ip(context: &mut RuntimeContext, ip: Ipv4Addr) -> Result<()> {
    let mut text = String::<15>::new();
    core::fmt::write(&mut text, format_args!("{ip}"))?;
    context.set(keys::WLAN_IP, Value::text(&text))
}
