//! Host doubles for the hardware seams: connections, listeners, storage, radio, platform,
//! sensor and delay.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use ambient_node::dispatch::CallbackHandler;
use ambient_node::http::{Connection, Listener};
use ambient_node::platform::Platform;
use ambient_node::runtime_context::Params;
use ambient_node::sensor::{Reading, SensorDriver};
use ambient_node::settings::{SensorKind, Storage};
use ambient_node::wifi_connector::{LinkStatus, Radio};
use ambient_node::{Error, Result};
use embassy_time::Duration;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

pub use embassy_futures::block_on;

/// A client connection fed from a byte script.
#[derive(Debug, Default)]
pub struct MockConnection {
    input: Vec<u8>,
    position: usize,
    /// Largest number of bytes a single `read` returns.
    pub read_chunk: usize,
    /// Largest number of bytes a single `write` accepts.
    pub write_chunk: usize,
    pub output: Vec<u8>,
    pub writes: usize,
    pub closed: bool,
    /// Fail every write.
    pub broken: bool,
}

impl MockConnection {
    pub fn new(request: &str) -> Self {
        Self::from_bytes(request.as_bytes())
    }

    pub fn from_bytes(request: &[u8]) -> Self {
        Self {
            input: request.to_vec(),
            read_chunk: usize::MAX,
            write_chunk: usize::MAX,
            ..Self::default()
        }
    }

    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk;
        self
    }

    pub fn with_write_chunk(mut self, write_chunk: usize) -> Self {
        self.write_chunk = write_chunk;
        self
    }

    pub fn response(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn status_line(&self) -> String {
        self.response().lines().next().unwrap_or_default().to_string()
    }

    pub fn body(&self) -> String {
        let response = self.response();
        response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default()
    }
}

impl ErrorType for MockConnection {
    type Error = ErrorKind;
}

impl Read for MockConnection {
    async fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        let remaining = &self.input[self.position..];
        let len = remaining.len().min(buf.len()).min(self.read_chunk);
        buf[..len].copy_from_slice(&remaining[..len]);
        self.position += len;
        Ok(len)
    }
}

impl Write for MockConnection {
    async fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        if self.broken {
            return Err(ErrorKind::ConnectionReset);
        }
        let len = buf.len().min(self.write_chunk);
        self.output.extend_from_slice(&buf[..len]);
        self.writes += 1;
        Ok(len)
    }
}

impl Connection for &mut MockConnection {
    async fn shutdown(&mut self) {
        self.closed = true;
    }
}

/// Hands out scripted connections, then fails with the scripted error or
/// [`Error::FatalTransport`].
#[derive(Debug, Default)]
pub struct ScriptedListener {
    script: VecDeque<Option<MockConnection>>,
    pub served: Vec<MockConnection>,
}

impl ScriptedListener {
    pub fn new(connections: impl IntoIterator<Item = MockConnection>) -> Self {
        Self {
            script: connections.into_iter().map(Some).collect(),
            served: Vec::new(),
        }
    }

    /// Queue a transient accept failure.
    pub fn then_transient_failure(mut self) -> Self {
        self.script.push_back(None);
        self
    }

    pub fn then(mut self, connection: MockConnection) -> Self {
        self.script.push_back(Some(connection));
        self
    }
}

impl Listener for ScriptedListener {
    type Connection<'c> = &'c mut MockConnection;

    async fn accept(&mut self) -> Result<Self::Connection<'_>> {
        match self.script.pop_front() {
            Some(Some(connection)) => {
                self.served.push(connection);
                self.served.last_mut().ok_or(Error::Transport)
            }
            Some(None) => Err(Error::Transport),
            None => Err(Error::FatalTransport),
        }
    }
}

/// In-memory record slot with injectable faults.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    pub record: Option<Vec<u8>>,
    /// The next this many reads fail with [`Error::Storage`].
    pub failing_reads: u8,
    /// The next this many writes fail with [`Error::Storage`].
    pub failing_writes: u8,
    pub corrupted: bool,
    pub reads: usize,
    pub writes: usize,
    pub erases: usize,
}

impl MemoryStorage {
    pub fn with_record(record: &str) -> Self {
        Self {
            record: Some(record.as_bytes().to_vec()),
            ..Self::default()
        }
    }

    pub fn record_text(&self) -> Option<String> {
        self.record
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>> {
        self.reads += 1;
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(Error::Storage);
        }
        if self.corrupted {
            return Err(Error::StorageCorrupted);
        }
        match &self.record {
            Some(record) => {
                buffer
                    .get_mut(..record.len())
                    .ok_or(Error::CapacityExceeded)?
                    .copy_from_slice(record);
                Ok(Some(record.len()))
            }
            None => Ok(None),
        }
    }

    fn write(&mut self, record: &[u8]) -> Result<()> {
        self.writes += 1;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(Error::Storage);
        }
        self.record = Some(record.to_vec());
        self.corrupted = false;
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        self.erases += 1;
        self.record = None;
        Ok(())
    }
}

/// Delay that returns at once.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl embedded_hal_async::delay::DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// A radio whose joins fail unless the SSID is `accepting`.
#[derive(Debug, Default)]
pub struct SimulatedRadio {
    pub accepting: Option<&'static str>,
    /// Status polls answered with `Connecting` before the outcome is reported.
    pub connecting_polls: usize,
    pub activations: Vec<String>,
    pub connects: Vec<String>,
    pub disconnects: usize,
    pub led: Vec<bool>,
    /// `Connecting` answers given since the last join request.
    pub polls: usize,
    current: Option<String>,
    joined: bool,
}

impl SimulatedRadio {
    pub const ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    pub fn accepting(ssid: &'static str) -> Self {
        Self {
            accepting: Some(ssid),
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self::default()
    }
}

impl Radio for SimulatedRadio {
    async fn activate(&mut self, country: &str) -> Result<()> {
        self.activations.push(country.to_string());
        Ok(())
    }

    async fn local_ip(&mut self) -> Option<Ipv4Addr> {
        if self.joined {
            Some(Self::ADDRESS)
        } else {
            Some(Ipv4Addr::UNSPECIFIED)
        }
    }

    async fn connect(&mut self, ssid: &str, _password: &str) -> Result<()> {
        self.connects.push(ssid.to_string());
        self.current = Some(ssid.to_string());
        self.polls = 0;
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        if self.polls < self.connecting_polls {
            self.polls += 1;
            return LinkStatus::Connecting;
        }
        if self.current.is_some() && self.current.as_deref() == self.accepting {
            self.joined = true;
            LinkStatus::GotIp(Self::ADDRESS)
        } else {
            LinkStatus::Failed
        }
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
        self.joined = false;
        self.current = None;
    }

    async fn set_led(&mut self, on: bool) {
        self.led.push(on);
    }
}

/// Records sleeps and resets instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub sleeps: Vec<Duration>,
    pub resets: usize,
}

impl Platform for RecordingPlatform {
    async fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn unique_id(&mut self) -> [u8; 8] {
        [0xE6, 0x61, 0x38, 0x52, 0x83, 0x2F, 0x4B, 0x2A]
    }
}

/// A sensor answering from a script of outcomes, then with `steady`.
#[derive(Debug)]
pub struct MockSensor {
    pub kind: SensorKind,
    pub present: bool,
    pub script: VecDeque<Option<Reading>>,
    pub steady: Reading,
    pub measurements: usize,
}

impl MockSensor {
    pub fn new(kind: SensorKind, steady: Reading) -> Self {
        Self {
            kind,
            present: true,
            script: VecDeque::new(),
            steady,
            measurements: 0,
        }
    }

    pub fn absent(kind: SensorKind) -> Self {
        Self {
            present: false,
            ..Self::new(kind, Reading::ABSENT)
        }
    }

    /// Queue one failed conversion.
    pub fn then_glitch(mut self) -> Self {
        self.script.push_back(None);
        self
    }
}

impl SensorDriver for MockSensor {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    async fn probe(&mut self) -> Result<()> {
        if self.present {
            Ok(())
        } else {
            Err(Error::HardwareAbsent)
        }
    }

    async fn measure(&mut self) -> Result<Reading> {
        self.measurements += 1;
        match self.script.pop_front() {
            Some(Some(reading)) => Ok(reading),
            Some(None) => Err(Error::HardwareTransient),
            None => Ok(self.steady),
        }
    }
}

/// Callback tags used by the dispatch tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    First,
    Second,
    Failing,
    Shutdown,
}

/// Records every callback invocation.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub calls: Vec<(Tag, String, Params)>,
}

impl RecordingCallbacks {
    pub fn count(&self, event: &str) -> usize {
        self.calls.iter().filter(|(_, name, _)| name == event).count()
    }
}

impl CallbackHandler<Tag> for RecordingCallbacks {
    async fn call(&mut self, callback: Tag, event: &str, params: &Params) -> Result<()> {
        self.calls.push((callback, event.to_string(), params.clone()));
        if callback == Tag::Failing {
            return Err(Error::HardwareTransient);
        }
        Ok(())
    }
}
