#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

use cyw43::JoinOptions;
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use embassy_executor::Spawner;
use embassy_net::{Config, Stack, StackResources};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::{Peri, bind_interrupts};
use static_cell::StaticCell;

use super::{LinkStatus, Radio};
use crate::{Error, Result};

/// Sockets the node opens at once: the listener plus DHCP and DNS.
const SOCKETS: usize = 4;
const LED_GPIO: u8 = 0;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

/// Pins and peripherals wired to the CYW43439 on the Pico W.
pub struct RadioPins {
    pub pwr: Peri<'static, PIN_23>,
    pub cs: Peri<'static, PIN_25>,
    pub pio: Peri<'static, PIO0>,
    pub clk: Peri<'static, PIN_24>,
    pub dio: Peri<'static, PIN_29>,
    pub dma: Peri<'static, DMA_CH0>,
}

/// The Pico W radio and the DHCP network stack on top of it.
pub struct Cyw43Radio {
    control: cyw43::Control<'static>,
    stack: Stack<'static>,
    /// Outcome of the last join request; `None` when idle.
    joined: Option<bool>,
}

impl Cyw43Radio {
    /// Load firmware, spawn the driver and network tasks, and leave the radio idle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskSpawn`] if either background task cannot be spawned.
    pub async fn new(pins: RadioPins, seed: u64, spawner: Spawner) -> Result<Self> {
        let fw = cyw43_firmware::CYW43_43439A0;
        let clm = cyw43_firmware::CYW43_43439A0_CLM;

        let pwr = Output::new(pins.pwr, Level::Low);
        let cs = Output::new(pins.cs, Level::High);
        let mut pio = Pio::new(pins.pio, Irqs);
        let spi = PioSpi::new(
            &mut pio.common,
            pio.sm0,
            DEFAULT_CLOCK_DIVIDER,
            pio.irq0,
            cs,
            pins.clk,
            pins.dio,
            pins.dma,
        );

        static STATE: StaticCell<cyw43::State> = StaticCell::new();
        let state = STATE.init(cyw43::State::new());
        let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
        spawner.spawn(wifi_task(runner)?);

        control.init(clm).await;

        static RESOURCES: StaticCell<StackResources<SOCKETS>> = StaticCell::new();
        let (stack, runner) = embassy_net::new(
            net_device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            seed,
        );
        spawner.spawn(net_task(runner)?);

        Ok(Self {
            control,
            stack,
            joined: None,
        })
    }

    /// The network stack, for opening the HTTP listener.
    #[must_use]
    pub const fn stack(&self) -> Stack<'static> {
        self.stack
    }

    fn address(&self) -> Option<Ipv4Addr> {
        self.stack
            .config_v4()
            .map(|config| config.address.address())
    }
}

impl Radio for Cyw43Radio {
    async fn activate(&mut self, country: &str) -> Result<()> {
        // TODO: apply `country` once cyw43 exposes a country setter; the CLM blob defaults to
        // worldwide channels.
        info!("Radio active (country {})", country);
        self.control
            .set_power_management(cyw43::PowerManagementMode::PowerSave)
            .await;
        Ok(())
    }

    async fn local_ip(&mut self) -> Option<Ipv4Addr> {
        self.address()
    }

    async fn connect(&mut self, ssid: &str, password: &str) -> Result<()> {
        let options = if password.is_empty() {
            JoinOptions::new_open()
        } else {
            JoinOptions::new(password.as_bytes())
        };
        match self.control.join(ssid, options).await {
            Ok(()) => {
                self.joined = Some(true);
                Ok(())
            }
            Err(err) => {
                info!("Join failed: {}", err.status);
                self.joined = Some(false);
                Err(Error::WifiJoinFailure)
            }
        }
    }

    async fn status(&mut self) -> LinkStatus {
        match self.joined {
            Some(false) => LinkStatus::Failed,
            Some(true) => self
                .address()
                .filter(|_| self.stack.is_link_up())
                .map_or(LinkStatus::Connecting, LinkStatus::GotIp),
            None => LinkStatus::Connecting,
        }
    }

    async fn disconnect(&mut self) {
        info!("Leaving network");
        self.control.leave().await;
        self.joined = None;
    }

    async fn set_led(&mut self, on: bool) {
        self.control.gpio_set(LED_GPIO, on).await;
    }
}

#[embassy_executor::task]
async fn wifi_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}
