//! Ambient sensor node firmware for the Raspberry Pi Pico W.
//!
//! Loads (or bootstraps) the settings record, starts the configured sensor, joins WiFi and
//! serves the readings over HTTP on port 80. Joining failure and a dead listening socket are
//! both answered with a long sleep followed by a reset.
#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "Single-threaded")]

use ambient_node::dispatch::{EventBus, Router};
use ambient_node::flash_array::{FlashArray, FlashArrayStatic, FlashBlock};
use ambient_node::http::{HTTP_PORT, Server, TcpListener};
use ambient_node::node::{Action, Node, register_callbacks, register_routes};
use ambient_node::platform::{RpPlatform, recover};
use ambient_node::runtime_context::{RuntimeContext, Value, keys};
use ambient_node::sensor::{Bme280Sensor, Dht22Sensor, NoSensor, Reading, SensorDriver, start_sensor};
use ambient_node::settings::{SensorKind, Settings, SettingsStore};
use ambient_node::wifi_connector::{
    ConnectorConfig, Cyw43Radio, RadioPins, SharedRadio, WifiConnector,
};
use ambient_node::{Error, Never, Result};
use defmt::{error, info, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::gpio::AnyPin;
use embassy_rp::i2c::{self, Blocking, I2c};
use embassy_rp::peripherals::{self, I2C0};
use embassy_sync::mutex::Mutex;
use embassy_time::Delay;
use panic_probe as _;
use static_cell::StaticCell;

/// First-boot WiFi credentials: SSID on the first line, password on the second.
const BOOTSTRAP: &str = include_str!(concat!(env!("OUT_DIR"), "/wifi.txt"));

/// GPIOs wired to the radio; never handed to a sensor.
const RADIO_GPIOS: [u8; 4] = [23, 24, 25, 29];

type Bme280 = Bme280Sensor<I2c<'static, I2C0, Blocking>, Delay>;

/// Whichever sensor the settings select.
enum BoardSensor {
    Bme280(Bme280),
    Dht22(Dht22Sensor<'static>),
    /// Configured on pins it cannot use; probes as absent so the fallback is persisted.
    Unwired(SensorKind),
    None(NoSensor),
}

impl SensorDriver for BoardSensor {
    fn kind(&self) -> SensorKind {
        match self {
            Self::Bme280(sensor) => sensor.kind(),
            Self::Dht22(sensor) => sensor.kind(),
            Self::Unwired(kind) => *kind,
            Self::None(sensor) => sensor.kind(),
        }
    }

    async fn probe(&mut self) -> Result<()> {
        match self {
            Self::Bme280(sensor) => sensor.probe().await,
            Self::Dht22(sensor) => sensor.probe().await,
            Self::Unwired(_) => Err(Error::HardwareAbsent),
            Self::None(sensor) => sensor.probe().await,
        }
    }

    async fn measure(&mut self) -> Result<Reading> {
        match self {
            Self::Bme280(sensor) => sensor.measure().await,
            Self::Dht22(sensor) => sensor.measure().await,
            Self::Unwired(_) => Ok(Reading::ABSENT),
            Self::None(sensor) => sensor.measure().await,
        }
    }
}

/// Build an I²C0 BME280 on the configured pins. Only the I²C0 SDA/SCL pairs are accepted.
macro_rules! bme280_on_i2c0 {
    ($settings:expr, $( ($sda_n:literal, $scl_n:literal, $sda:ident, $scl:ident) ),* $(,)?) => {
        match ($settings.sda_pin, $settings.scl_pin) {
            $(
                ($sda_n, $scl_n) => {
                    // SAFETY: these pins are not taken from `Peripherals` anywhere else and the
                    // radio pins are never in this table.
                    let (bus, scl, sda) = unsafe {
                        (
                            peripherals::I2C0::steal(),
                            peripherals::$scl::steal(),
                            peripherals::$sda::steal(),
                        )
                    };
                    Some(I2c::new_blocking(bus, scl, sda, i2c::Config::default()))
                }
            )*
            _ => None,
        }
    };
}

#[expect(unsafe_code, reason = "Pins chosen at run time from the settings record")]
fn board_sensor(settings: &Settings) -> BoardSensor {
    match settings.sensor_kind {
        SensorKind::Bme280 => {
            let i2c = bme280_on_i2c0!(
                settings,
                (0, 1, PIN_0, PIN_1),
                (4, 5, PIN_4, PIN_5),
                (8, 9, PIN_8, PIN_9),
                (12, 13, PIN_12, PIN_13),
                (16, 17, PIN_16, PIN_17),
                (20, 21, PIN_20, PIN_21),
            );
            match i2c {
                Some(i2c) => BoardSensor::Bme280(Bme280Sensor::new(i2c, Delay)),
                None => {
                    warn!(
                        "SDA {} / SCL {} is not an I2C0 pin pair",
                        settings.sda_pin, settings.scl_pin
                    );
                    BoardSensor::Unwired(SensorKind::Bme280)
                }
            }
        }
        SensorKind::Dht22 if !RADIO_GPIOS.contains(&settings.gpio) => {
            // SAFETY: the pin number was validated against the radio pins and is not taken from
            // `Peripherals` anywhere else.
            let pin = unsafe { AnyPin::steal(settings.gpio) };
            BoardSensor::Dht22(Dht22Sensor::new(pin))
        }
        SensorKind::Dht22 => {
            warn!("GPIO {} is reserved for the radio", settings.gpio);
            BoardSensor::Unwired(SensorKind::Dht22)
        }
        SensorKind::None => BoardSensor::None(NoSensor),
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) -> ! {
    let Err(err) = inner_main(spawner).await;
    panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Never> {
    let p = embassy_rp::init(Default::default());
    info!("Ambient node starting");

    static FLASH_STATIC: FlashArrayStatic = FlashArray::<1>::new_static();
    let [settings_block] = FlashArray::new(&FLASH_STATIC, p.FLASH)?;
    let unique_id = settings_block.unique_id().unwrap_or_else(|err| {
        warn!("Unique id unavailable: {}", err);
        [0; 8]
    });
    let mut platform = RpPlatform::new(unique_id);

    let mut store: SettingsStore<FlashBlock, Delay> = SettingsStore::new(settings_block, Delay);
    let mut settings = match store.load_or_bootstrap(BOOTSTRAP).await {
        Ok(settings) => settings,
        Err(err) => {
            error!("No usable settings: {}", err);
            recover(&mut platform).await;
            return Err(err);
        }
    };
    info!("Settings loaded for {}", settings.pico_id.as_str());

    let sensor = start_sensor(board_sensor(&settings), Delay, &mut settings, &mut store).await;

    let pins = RadioPins {
        pwr: p.PIN_23,
        cs: p.PIN_25,
        pio: p.PIO0,
        clk: p.PIN_24,
        dio: p.PIN_29,
        dma: p.DMA_CH0,
    };
    let seed = u64::from_le_bytes(unique_id) ^ 0x7c8f_3a2e_9d14_6b5a;
    let radio = Cyw43Radio::new(pins, seed, spawner).await?;
    let stack = radio.stack();
    static RADIO: StaticCell<SharedRadio<Cyw43Radio>> = StaticCell::new();
    let radio: &'static SharedRadio<Cyw43Radio> = RADIO.init(Mutex::new(radio));

    let credentials = [settings.credentials()];
    let country = settings.wifi_country.clone();
    let mut node = Node::new(store, settings, sensor, radio, platform);

    let mut context = RuntimeContext::new();
    context.set(keys::PICO_UUID, Value::text(node.uuid()))?;
    let mut router = Router::new();
    register_routes(&mut router, node.uuid())?;
    router.start()?;
    let mut bus = EventBus::new();
    register_callbacks(&mut bus)?;

    let connected = match WifiConnector::new(
        &credentials,
        &country,
        ConnectorConfig::default(),
        Delay,
        Action::DisconnectRadio,
    ) {
        Ok(mut connector) => connector
            .connect(radio, &mut bus, &mut context, &mut node)
            .await
            .is_connected(),
        Err(err) => {
            error!("No WiFi credentials to try: {}", err);
            false
        }
    };
    if !connected {
        recover(node.platform_mut()).await;
        return Err(Error::WifiJoinFailure);
    }

    let mut listener = TcpListener::new(stack, HTTP_PORT);
    let mut server = Server::new(&router, &bus, &mut context);
    let Err(err) = server.run(&mut listener, &mut node).await;
    recover(node.platform_mut()).await;
    Err(err)
}
