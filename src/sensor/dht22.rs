//! DHT22 / AM2302 single-wire temperature and humidity sensor.
//!
//! The host pulls the line low to start a conversion. The sensor answers with an 80 µs
//! low/high preamble followed by 40 bits, each a 50 µs low followed by a high pulse of
//! ~27 µs (zero) or ~70 µs (one). The frame is humidity (16 bits, tenths of a percent),
//! temperature (15 bits plus sign, tenths of a degree) and an 8-bit checksum.

use super::Reading;
use crate::{Error, Result};

/// High pulses longer than this are ones.
const ONE_THRESHOLD_MICROS: u32 = 50;
const HUMIDITY_MAX: f32 = 100.0;

/// Turn the 40 measured high-pulse widths into the five frame bytes.
#[must_use]
pub fn frame_from_pulses(high_micros: &[u32; 40]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (byte, pulses) in frame.iter_mut().zip(high_micros.chunks_exact(8)) {
        *byte = pulses.iter().fold(0u8, |acc, &width| {
            (acc << 1) | u8::from(width > ONE_THRESHOLD_MICROS)
        });
    }
    frame
}

/// Validate the checksum and decode a frame. Pressure is always absent.
///
/// # Errors
///
/// Returns [`Error::HardwareTransient`] for a bad checksum or an impossible humidity.
pub fn decode_dht22_frame(frame: [u8; 5]) -> Result<Reading> {
    let [humidity_high, humidity_low, temperature_high, temperature_low, checksum] = frame;
    let sum = humidity_high
        .wrapping_add(humidity_low)
        .wrapping_add(temperature_high)
        .wrapping_add(temperature_low);
    if sum != checksum {
        warn!("DHT22 checksum mismatch ({} != {})", sum, checksum);
        return Err(Error::HardwareTransient);
    }

    let humidity = f32::from(u16::from_be_bytes([humidity_high, humidity_low])) / 10.0;
    if humidity > HUMIDITY_MAX {
        return Err(Error::HardwareTransient);
    }
    let magnitude = f32::from(u16::from_be_bytes([temperature_high & 0x7F, temperature_low])) / 10.0;
    let temperature = if temperature_high & 0x80 == 0 {
        magnitude
    } else {
        -magnitude
    };

    Ok(Reading {
        temperature: Some(temperature),
        pressure: None,
        humidity: Some(humidity),
    })
}

#[cfg(any(feature = "pico1", feature = "pico2"))]
pub use device::Dht22Sensor;

#[cfg(any(feature = "pico1", feature = "pico2"))]
mod device {
    use embassy_rp::Peri;
    use embassy_rp::gpio::{AnyPin, Flex, Pull};
    use embassy_time::{Duration, Instant, Timer, with_timeout};

    use super::{Reading, decode_dht22_frame, frame_from_pulses};
    use crate::sensor::SensorDriver;
    use crate::settings::SensorKind;
    use crate::{Error, Result};

    /// The sensor refuses conversions more often than this.
    const MIN_INTERVAL: Duration = Duration::from_secs(2);
    const START_SIGNAL: Duration = Duration::from_millis(2);
    const RESPONSE_TIMEOUT: Duration = Duration::from_micros(200);
    const BIT_TIMEOUT: Duration = Duration::from_micros(120);

    /// DHT22 on a GPIO with the internal pull-up enabled.
    pub struct Dht22Sensor<'d> {
        pin: Flex<'d>,
        last_conversion: Option<Instant>,
    }

    impl<'d> Dht22Sensor<'d> {
        pub fn new(pin: Peri<'d, AnyPin>) -> Self {
            let mut pin = Flex::new(pin);
            pin.set_pull(Pull::Up);
            pin.set_as_input();
            Self {
                pin,
                last_conversion: None,
            }
        }

        async fn read_frame(&mut self) -> Result<[u8; 5]> {
            if let Some(last) = self.last_conversion {
                let elapsed = last.elapsed();
                if elapsed < MIN_INTERVAL {
                    Timer::after(MIN_INTERVAL - elapsed).await;
                }
            }
            self.last_conversion = Some(Instant::now());

            self.pin.set_low();
            self.pin.set_as_output();
            Timer::after(START_SIGNAL).await;
            self.pin.set_as_input();

            // No preamble means no sensor on this pin.
            self.level(false, RESPONSE_TIMEOUT, Error::HardwareAbsent).await?;
            self.level(true, RESPONSE_TIMEOUT, Error::HardwareAbsent).await?;
            self.level(false, RESPONSE_TIMEOUT, Error::HardwareAbsent).await?;

            let mut pulses = [0u32; 40];
            for pulse in &mut pulses {
                self.level(true, BIT_TIMEOUT, Error::HardwareTransient).await?;
                let rise = Instant::now();
                self.level(false, BIT_TIMEOUT, Error::HardwareTransient).await?;
                *pulse = u32::try_from(rise.elapsed().as_micros()).unwrap_or(u32::MAX);
            }
            Ok(frame_from_pulses(&pulses))
        }

        async fn level(&mut self, high: bool, timeout: Duration, on_timeout: Error) -> Result<()> {
            let wait = async {
                if high {
                    self.pin.wait_for_high().await;
                } else {
                    self.pin.wait_for_low().await;
                }
            };
            with_timeout(timeout, wait).await.map_err(|_| on_timeout)
        }
    }

    impl SensorDriver for Dht22Sensor<'_> {
        fn kind(&self) -> SensorKind {
            SensorKind::Dht22
        }

        async fn probe(&mut self) -> Result<()> {
            match self.read_frame().await {
                Err(Error::HardwareAbsent) => Err(Error::HardwareAbsent),
                // The sensor answered; a garbled first frame is normal after power-up.
                _ => Ok(()),
            }
        }

        async fn measure(&mut self) -> Result<Reading> {
            match self.read_frame().await {
                Ok(frame) => decode_dht22_frame(frame),
                Err(_) => Err(Error::HardwareTransient),
            }
        }
    }
}
