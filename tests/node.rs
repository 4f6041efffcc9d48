//! End-to-end tests of the node's pages and event reactions over mock hardware.

mod common;

use ambient_node::dispatch::{CallbackHandler, EventBus, Router, events};
use ambient_node::http::Server;
use ambient_node::node::{Action, LedSignal, Node, Page, register_callbacks, register_routes};
use ambient_node::runtime_context::{Params, RuntimeContext, Value, keys};
use ambient_node::sensor::{Reading, SensorSource};
use ambient_node::settings::{SensorKind, Settings, SettingsStore, parse_bootstrap};
use ambient_node::wifi_connector::SharedRadio;
use common::{
    MemoryStorage, MockConnection, MockSensor, NoDelay, RecordingPlatform, SimulatedRadio,
    block_on,
};

const UUID: &str = "5mE4UoMvSyo=";

const WARM: Reading = Reading {
    temperature: Some(21.5),
    pressure: Some(1013.2),
    humidity: Some(40.0),
};

type TestNode<'r> =
    Node<'r, MemoryStorage, NoDelay, MockSensor, NoDelay, SimulatedRadio, RecordingPlatform>;

fn settings() -> Settings {
    let mut settings = Settings::bootstrap(parse_bootstrap("home\nsecret").expect("credentials"));
    settings.apply_field("pico_id", "kitchen").expect("valid id");
    settings.apply_field("sensor_kind", "bme280").expect("valid kind");
    settings
}

fn node(radio: &SharedRadio<SimulatedRadio>, storage: MemoryStorage) -> TestNode<'_> {
    let sensor = block_on(SensorSource::initialize(
        MockSensor::new(SensorKind::Bme280, WARM),
        NoDelay,
    ))
    .expect("sensor present");
    Node::new(
        SettingsStore::new(storage, NoDelay),
        settings(),
        sensor,
        radio,
        RecordingPlatform::default(),
    )
}

fn exchange(node: &mut TestNode<'_>, request: &str) -> MockConnection {
    let mut router = Router::new();
    register_routes(&mut router, UUID).expect("routes fit");
    router.start().expect("fallback registered");
    let mut bus = EventBus::new();
    register_callbacks(&mut bus).expect("callbacks fit");
    let mut context = RuntimeContext::new();
    context
        .set(keys::CURRENT_SSID, Value::text("home"))
        .expect("room");
    context
        .set(keys::WLAN_IP, Value::text("192.168.1.50"))
        .expect("room");

    let mut conn = MockConnection::new(request).with_read_chunk(64);
    let mut server = Server::new(&router, &bus, &mut context);
    block_on(server.serve_connection(&mut conn, node)).expect("served");
    conn
}

fn settings_post(fields: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--FORM\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str("--FORM--\r\n");
    format!(
        "POST /settings HTTP/1.1\r\nHost: node\r\n\
         Content-Type: multipart/form-data; boundary=FORM\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn led_log(radio: &SharedRadio<SimulatedRadio>) -> Vec<bool> {
    block_on(radio.lock()).led.clone()
}

#[test]
fn node_uuid_is_base64_of_the_unique_id() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    assert_eq!(node(&radio, MemoryStorage::default()).uuid(), UUID);
}

#[test]
fn data_reports_the_reading_as_json() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let conn = exchange(&mut node, "GET /data HTTP/1.1\r\n\r\n");

    assert_eq!(conn.status_line(), "HTTP/1.0 200 OK");
    assert!(conn.response().contains("Content-Type: application/json"));
    let body = conn.body();
    assert!(body.starts_with("{\"temp\":21.5,\"pressure\":"), "{body}");
    for expected in [
        "\"humidity\":40",
        "\"pico_id\":\"kitchen\"",
        "\"sensor\":\"bme280\"",
        "\"pico_uuid\":\"5mE4UoMvSyo=\"",
    ] {
        assert!(body.contains(expected), "{expected} missing from {body}");
    }
}

#[test]
fn find_identifies_the_node() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let body = exchange(&mut node, "GET /find HTTP/1.1\r\n\r\n").body();

    assert!(body.contains("<h1>kitchen</h1>"));
    assert!(body.contains("It's me!"));
    assert!(body.contains(UUID));
}

#[test]
fn overview_shows_readings_and_network() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let body = exchange(&mut node, "GET / HTTP/1.1\r\n\r\n").body();

    for expected in ["21.5 &deg;C", "1013.2 hPa", "40.0 %", "192.168.1.50", "bme280", UUID] {
        assert!(body.contains(expected), "{expected} missing");
    }
    assert!(body.contains("home"));
    assert!(!body.contains("{{"));
}

#[test]
fn unknown_path_gets_the_not_found_page() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let conn = exchange(&mut node, "GET /missing HTTP/1.1\r\n\r\n");

    assert_eq!(conn.status_line(), "HTTP/1.0 404 Not Found");
    assert_eq!(
        conn.body(),
        "<html><body><h1>kitchen</h1><p>404: Resource not found.</p></body></html>"
    );
}

#[test]
fn settings_form_shows_current_values() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let body = exchange(&mut node, "GET /settings HTTP/1.1\r\n\r\n").body();

    assert!(body.contains("value=\"kitchen\""));
    assert!(body.contains("value=\"bme280\" checked"));
    assert!(body.contains("value=\"dht22\" >"));
    assert!(!body.contains("alert-"));
}

#[test]
fn posted_settings_are_saved_and_announced() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let request = settings_post(&[
        ("pico_id", "attic"),
        ("sensor_kind", "dht22"),
        ("gpio", "15"),
        ("wifi_country", "fr"),
    ]);
    let body = exchange(&mut node, &request).body();

    assert!(body.contains("alert-success"));
    assert!(body.contains("Settings saved successfully"));
    assert!(body.contains("value=\"attic\""));
    assert_eq!(node.settings().pico_id.as_str(), "attic");

    let stored = block_on(node.store_mut().load()).expect("saved");
    assert_eq!(stored.pico_id.as_str(), "attic");
    assert_eq!(stored.sensor_kind, SensorKind::Dht22);
    assert_eq!(stored.gpio, 15);
    assert_eq!(stored.wifi_country.as_str(), "FR");
    assert_eq!(stored.ssid.as_str(), "home");

    // One flash for settings_saved.
    assert_eq!(led_log(&radio), [true, false]);
}

#[test]
fn invalid_field_rejects_the_whole_form() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let request = settings_post(&[("pico_id", "attic"), ("gpio", "99")]);
    let body = exchange(&mut node, &request).body();

    assert!(body.contains("alert-danger"));
    assert!(body.contains("Invalid value for gpio; settings not saved"));
    assert_eq!(node.settings(), &settings());
    assert_eq!(node.store_mut().storage_mut().writes, 0);
    assert!(led_log(&radio).is_empty());
}

#[test]
fn storage_failure_is_reported_on_the_page() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let storage = MemoryStorage {
        failing_writes: 3,
        ..MemoryStorage::default()
    };
    let mut node = node(&radio, storage);
    let body = exchange(&mut node, &settings_post(&[("pico_id", "attic")])).body();

    assert!(body.contains("Settings could not be saved"));
    assert_eq!(node.settings().pico_id.as_str(), "kitchen");
}

#[test]
fn long_quoted_password_survives_a_resave() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let digits = "0123456789".repeat(5);
    let password = format!("a\"b\"c\"d\"e\"f\"g\"h\"{}", &digits[..48]);
    assert_eq!(password.len(), 64);
    let body = exchange(&mut node, &settings_post(&[("wifi_password", &password)])).body();
    assert!(body.contains("alert-success"));
    assert_eq!(node.settings().wifi_password.as_str(), password);

    let body = exchange(&mut node, "GET /settings HTTP/1.1\r\n\r\n").body();
    let escaped = password.replace('"', "&quot;");
    assert!(body.contains(&format!("value=\"{escaped}\"")));
}

#[test]
fn hard_reset_restarts_the_board() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let body = exchange(&mut node, "GET /hard-reset HTTP/1.1\r\n\r\n").body();

    assert!(body.contains("Restarting."));
    assert_eq!(node.platform_mut().resets, 1);
}

#[test]
fn led_reactions_follow_the_connection() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    let params = Params::new();

    block_on(node.call(Action::Led(LedSignal::On), events::WLAN_CONNECTED, &params))
        .expect("led on");
    assert_eq!(led_log(&radio), [true]);

    block_on(node.call(
        Action::Led(LedSignal::FlashThenOff(2)),
        events::CANT_CONNECT,
        &params,
    ))
    .expect("flash");
    assert_eq!(led_log(&radio), [true, false, true, false, true, false]);
}

#[test]
fn fatal_error_disconnects_the_radio() {
    let radio = SharedRadio::new(SimulatedRadio::default());
    let mut node = node(&radio, MemoryStorage::default());
    block_on(node.call(Action::DisconnectRadio, events::FATAL_ERROR, &Params::new()))
        .expect("disconnect");
    assert_eq!(block_on(radio.lock()).disconnects, 1);
}

#[test]
fn every_page_is_routed() {
    let mut router = Router::new();
    register_routes(&mut router, UUID).expect("routes fit");
    let context = RuntimeContext::new();
    for (path, page) in [
        ("/data", Page::Data),
        ("/find", Page::Find),
        ("/", Page::Overview),
        ("/settings", Page::Settings),
        ("/hard-reset", Page::HardReset),
        ("/elsewhere", Page::NotFound),
    ] {
        let invocations = router.dispatch(path, &context).expect("dispatch");
        assert_eq!(invocations[0].handler, page, "{path}");
    }
}
