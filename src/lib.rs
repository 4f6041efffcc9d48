//! Firmware library for a WiFi ambient-sensor node on the Raspberry Pi Pico W.
//!
//! The node samples a BME280 or DHT22 and serves the readings plus a settings form over a
//! small HTTP/1.0 engine. Everything above the hardware seams ([`wifi_connector::Radio`],
//! [`http::Listener`], [`settings::Storage`], [`sensor::SensorDriver`],
//! [`platform::Platform`]) is plain `no_std` code that also runs on the host under the `host`
//! feature.
#![no_std]
#![allow(async_fn_in_trait, reason = "single-threaded executor; futures need not be Send")]

#[macro_use]
mod log;

pub mod dispatch;
mod error;
#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
pub mod flash_array;
pub mod http;
mod never;
pub mod node;
pub mod platform;
pub mod retry;
pub mod runtime_context;
pub mod sensor;
pub mod settings;
pub mod template;
pub mod text;
pub mod wifi_connector;

pub use error::{Error, Result};
pub use never::Never;
