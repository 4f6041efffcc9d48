//! The sensor node application: its pages, its event reactions and their registration.
//!
//! [`Node`] owns the settings, the sensor and the platform services and borrows the shared
//! radio. It is the [`RouteHandler`] for [`Page`] tags and the [`CallbackHandler`] for
//! [`Action`] tags; the [`Router`] and [`EventBus`] only hold those tags.

use core::fmt::Write as _;

use embassy_time::{Duration, Timer};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Read;
use heapless::String;
use serde::Serialize;

use crate::dispatch::{CallbackHandler, EventBus, Router, events};
use crate::http::{
    BODY_LEN, Body, HandlerRequest, Method, Response, RouteHandler, Status, content_type,
};
use crate::platform::{Platform, UUID_LEN, device_uuid_string};
use crate::runtime_context::{Params, Value, keys};
use crate::sensor::{SensorDriver, SensorSource};
use crate::settings::{SensorKind, Settings, SettingsStore, Storage};
use crate::template::{self, Replacements, Template};
use crate::text::escape_html;
use crate::wifi_connector::{Radio, SharedRadio};
use crate::{Error, Result};

const LED_FLASH: Duration = Duration::from_millis(150);
const ABSENT_READING: &str = "-";
const ESCAPED_ID_LEN: usize = 192;

/// Route handler tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Page {
    /// `GET /data`: the current reading as JSON.
    Data,
    /// `GET /find`: identification page.
    Find,
    /// `GET /`: overview of readings and device details.
    Overview,
    /// `GET|POST /settings`: the settings form, saving on POST.
    Settings,
    /// `GET /hard-reset`
    HardReset,
    NotFound,
}

/// Callback tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Log,
    DisconnectRadio,
    Reset,
    Led(LedSignal),
}

/// Patterns shown on the on-board LED.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedSignal {
    On,
    Off,
    /// Blink `n` times, then return to the previous state.
    Flash(u8),
    /// Blink `n` times, then stay off.
    FlashThenOff(u8),
}

/// Register every page. `uuid` is the device's base64 unique id.
///
/// # Errors
///
/// Returns [`Error::CapacityExceeded`] if the router is full.
pub fn register_routes(router: &mut Router<Page>, uuid: &str) -> Result<()> {
    let uuid_params = || Params::new().with(keys::PICO_UUID, Value::text(uuid));
    router.route("/data", Page::Data, uuid_params()?, &[])?;
    router.route("/find", Page::Find, uuid_params()?, &[])?;
    router.route(
        "/",
        Page::Overview,
        uuid_params()?,
        &[keys::CURRENT_SSID, keys::WLAN_IP],
    )?;
    router.route(
        "/settings",
        Page::Settings,
        Params::new(),
        &[keys::CURRENT_SSID, keys::FORM_FIELDS],
    )?;
    router.route("/hard-reset", Page::HardReset, Params::new(), &[])?;
    router.not_found(Page::NotFound, Params::new(), &[keys::ROUTE])
}

/// Register the LED, logging and reset reactions.
///
/// The radio shutdown on `fatal_error` is subscribed by the connector once it is connected.
///
/// # Errors
///
/// Returns [`Error::CapacityExceeded`] if the bus is full.
pub fn register_callbacks(bus: &mut EventBus<Action>) -> Result<()> {
    let subscriptions = [
        (events::WLAN_ACTIVE, Action::Log),
        (
            events::WLAN_STARTING_TO_CONNECT,
            Action::Led(LedSignal::Flash(1)),
        ),
        (events::WLAN_CONNECTED, Action::Led(LedSignal::On)),
        (
            events::CANT_CONNECT,
            Action::Led(LedSignal::FlashThenOff(2)),
        ),
        (events::SETTINGS_SAVED, Action::Led(LedSignal::Flash(1))),
        (events::SETTINGS_SAVED, Action::Log),
        (events::HARD_RESET, Action::Reset),
    ];
    for (event, action) in subscriptions {
        bus.subscribe(event, action, Params::new(), &[])?;
    }
    bus.subscribe(
        events::WLAN_CONNECTED,
        Action::Log,
        Params::new(),
        &[keys::CURRENT_SSID, keys::WLAN_IP],
    )?;
    Ok(())
}

#[derive(Serialize)]
struct DataReport<'a> {
    temp: Option<f32>,
    pressure: Option<f32>,
    humidity: Option<f32>,
    pico_id: &'a str,
    sensor: &'a str,
    pico_uuid: &'a str,
}

/// The running node.
pub struct Node<'r, St, D, S, SD, R, P> {
    store: SettingsStore<St, D>,
    settings: Settings,
    sensor: SensorSource<S, SD>,
    radio: &'r SharedRadio<R>,
    platform: P,
    uuid: String<UUID_LEN>,
    led_on: bool,
}

impl<'r, St, D, S, SD, R, P> Node<'r, St, D, S, SD, R, P>
where
    St: Storage,
    D: DelayNs,
    S: SensorDriver,
    SD: DelayNs,
    R: Radio,
    P: Platform,
{
    pub fn new(
        store: SettingsStore<St, D>,
        settings: Settings,
        sensor: SensorSource<S, SD>,
        radio: &'r SharedRadio<R>,
        mut platform: P,
    ) -> Self {
        let uuid = device_uuid_string(&platform.unique_id());
        Self {
            store,
            settings,
            sensor,
            radio,
            platform,
            uuid,
            led_on: false,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub const fn store_mut(&mut self) -> &mut SettingsStore<St, D> {
        &mut self.store
    }

    pub const fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    async fn data(&mut self, params: &Params) -> Result<Response> {
        let reading = self.sensor.next().await;
        let report = DataReport {
            temp: reading.temperature,
            pressure: reading.pressure,
            humidity: reading.humidity,
            pico_id: &self.settings.pico_id,
            sensor: self.settings.sensor_kind.as_str(),
            pico_uuid: params.text(keys::PICO_UUID).unwrap_or(&self.uuid),
        };
        let mut buffer = [0u8; BODY_LEN];
        let len = serde_json_core::to_slice(&report, &mut buffer).map_err(|_| Error::FormatError)?;
        let json = buffer
            .get(..len)
            .and_then(|bytes| core::str::from_utf8(bytes).ok())
            .ok_or(Error::FormatError)?;
        Ok(Response::json(
            String::try_from(json).map_err(|()| Error::FormatError)?,
        ))
    }

    fn find(&self, params: &Params) -> Result<Response> {
        let mut body = String::new();
        write!(
            body,
            "<html><body><h1>{}</h1><p>It's me!</p><p>Unique ID: {}</p></body></html>",
            escape_html::<ESCAPED_ID_LEN>(&self.settings.pico_id),
            params.text(keys::PICO_UUID).unwrap_or(&self.uuid)
        )?;
        Ok(Response::html(Status::Ok, body))
    }

    async fn overview(&mut self, params: &Params) -> Result<Response> {
        let reading = self.sensor.next().await;
        let mut replacements = self.header_replacements(params)?;
        insert_reading(&mut replacements, "temp", reading.temperature)?;
        insert_reading(&mut replacements, "pressure", reading.pressure)?;
        insert_reading(&mut replacements, "humidity", reading.humidity)?;
        replacements.insert("sensor", self.sensor.kind().as_str())?;
        replacements.insert_display("wlan_ip", params.get(keys::WLAN_IP))?;
        replacements.insert(
            "pico_uuid",
            params.text(keys::PICO_UUID).unwrap_or(&self.uuid),
        )?;
        let page = Template::new(
            &[template::HEADER, template::CURRENT_DATA, template::FOOTER],
            replacements,
        )?;
        Ok(Response::template(Status::Ok, page))
    }

    async fn settings_page<Rd: Read>(
        &mut self,
        request: &mut HandlerRequest<'_, Rd>,
    ) -> Result<Response> {
        let mut alert = None;
        if request.method == Method::Post {
            if let Some(mut form) = request.take_form() {
                let mut updated = self.settings.clone();
                let mut rejected = None;
                while let Some((name, value)) = form.next().await? {
                    if let Err(err) = updated.apply_field(&name, &value) {
                        warn!("Rejected settings field {}: {}", name.as_str(), err);
                        rejected.get_or_insert(err);
                    }
                }
                alert = Some(if let Some(err) = rejected {
                    let field = match err {
                        Error::InvalidSetting(field) => field,
                        _ => "form",
                    };
                    ("danger", field, false)
                } else if self.store.save(&updated).await {
                    self.settings = updated;
                    request.emit(events::SETTINGS_SAVED);
                    ("success", "", true)
                } else {
                    ("danger", "", false)
                });
            } else {
                debug!("POST /settings without a multipart body");
            }
        }

        let mut replacements = self.header_replacements(&request.params)?;
        self.settings_replacements(&mut replacements)?;
        let mut parts = heapless::Vec::<&'static str, { template::MAX_PARTS }>::new();
        let _ = parts.push(template::HEADER);
        if let Some((color, field, saved)) = alert {
            let mut text = String::<{ template::REPLACEMENT_LEN }>::new();
            if saved {
                text.push_str("Settings saved successfully")
                    .map_err(|()| Error::FormatError)?;
            } else if field.is_empty() {
                text.push_str("Settings could not be saved")
                    .map_err(|()| Error::FormatError)?;
            } else {
                write!(text, "Invalid value for {field}; settings not saved")?;
            }
            replacements.insert("alert_color", color)?;
            replacements.insert("alert_text", &text)?;
            let _ = parts.push(template::ALERT);
        }
        let _ = parts.push(template::SETTINGS);
        let _ = parts.push(template::FOOTER);
        Ok(Response::template(
            Status::Ok,
            Template::new(&parts, replacements)?,
        ))
    }

    fn not_found(&self) -> Result<Response> {
        let mut body = String::new();
        write!(
            body,
            "<html><body><h1>{}</h1><p>404: Resource not found.</p></body></html>",
            escape_html::<ESCAPED_ID_LEN>(&self.settings.pico_id)
        )?;
        Ok(Response::html(Status::NotFound, body))
    }

    fn header_replacements(&self, params: &Params) -> Result<Replacements> {
        let mut replacements = Replacements::new();
        replacements.insert("pico_id", &self.settings.pico_id)?;
        replacements.insert(
            "current_ssid",
            params.text(keys::CURRENT_SSID).unwrap_or(ABSENT_READING),
        )?;
        Ok(replacements)
    }

    fn settings_replacements(&self, replacements: &mut Replacements) -> Result<()> {
        let settings = &self.settings;
        replacements.insert("ssid", &settings.ssid)?;
        replacements.insert("wifi_password", &settings.wifi_password)?;
        replacements.insert("wifi_country", &settings.wifi_country)?;
        replacements.insert_display("gpio", settings.gpio)?;
        replacements.insert_display("sda_pin", settings.sda_pin)?;
        replacements.insert_display("scl_pin", settings.scl_pin)?;
        for kind in SensorKind::ALL {
            let token = match kind {
                SensorKind::Bme280 => "bme280_checked",
                SensorKind::Dht22 => "dht22_checked",
                SensorKind::None => "none_checked",
            };
            let checked = if settings.sensor_kind == kind { "checked" } else { "" };
            replacements.insert(token, checked)?;
        }
        Ok(())
    }

    async fn led(&mut self, signal: LedSignal) {
        let shared = self.radio;
        let mut radio = shared.lock().await;
        match signal {
            LedSignal::On | LedSignal::Off => {
                self.led_on = signal == LedSignal::On;
                radio.set_led(self.led_on).await;
            }
            LedSignal::Flash(count) | LedSignal::FlashThenOff(count) => {
                for _ in 0..count {
                    radio.set_led(!self.led_on).await;
                    Timer::after(LED_FLASH).await;
                    radio.set_led(self.led_on).await;
                    Timer::after(LED_FLASH).await;
                }
                if matches!(signal, LedSignal::FlashThenOff(_)) {
                    self.led_on = false;
                    radio.set_led(false).await;
                }
            }
        }
    }
}

fn insert_reading(replacements: &mut Replacements, token: &'static str, value: Option<f32>) -> Result<()> {
    match value {
        Some(value) => replacements.insert_display(token, format_args!("{value:.1}")),
        None => replacements.insert(token, ABSENT_READING),
    }
}

impl<St, D, S, SD, R, P> RouteHandler<Page> for Node<'_, St, D, S, SD, R, P>
where
    St: Storage,
    D: DelayNs,
    S: SensorDriver,
    SD: DelayNs,
    R: Radio,
    P: Platform,
{
    async fn handle<Rd: Read>(
        &mut self,
        page: Page,
        mut request: HandlerRequest<'_, Rd>,
    ) -> Result<Response> {
        match page {
            Page::Data => self.data(&request.params).await,
            Page::Find => self.find(&request.params),
            Page::Overview => self.overview(&request.params).await,
            Page::Settings => self.settings_page(&mut request).await,
            Page::HardReset => {
                request.emit(events::HARD_RESET);
                Ok(Response::new(
                    Status::Ok,
                    content_type::HTML,
                    Body::Static("<html><body><p>Restarting.</p></body></html>"),
                ))
            }
            Page::NotFound => {
                debug!(
                    "No route for {}",
                    request.params.text(keys::ROUTE).unwrap_or("?")
                );
                self.not_found()
            }
        }
    }
}

impl<St, D, S, SD, R, P> CallbackHandler<Action> for Node<'_, St, D, S, SD, R, P>
where
    St: Storage,
    D: DelayNs,
    S: SensorDriver,
    SD: DelayNs,
    R: Radio,
    P: Platform,
{
    async fn call(&mut self, action: Action, event: &str, params: &Params) -> Result<()> {
        match action {
            Action::Log => match params.text(keys::CURRENT_SSID) {
                Some(ssid) => info!(
                    "{}: {} at {}",
                    event,
                    ssid,
                    params.text(keys::WLAN_IP).unwrap_or("?")
                ),
                None => info!("{}", event),
            },
            Action::DisconnectRadio => {
                warn!("Disconnecting radio after {}", event);
                self.radio.lock().await.disconnect().await;
            }
            Action::Reset => {
                info!("Resetting after {}", event);
                self.platform.reset();
            }
            Action::Led(signal) => self.led(signal).await,
        }
        Ok(())
    }
}
