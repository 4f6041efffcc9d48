//! Host-level tests for the accept loop and the per-connection pipeline.

mod common;

use ambient_node::dispatch::{CallbackHandler, EventBus, Router, events};
use ambient_node::http::{
    HandlerRequest, Method, Response, RouteHandler, Server, Status, query_value,
};
use ambient_node::runtime_context::{Params, RuntimeContext, Value, keys};
use ambient_node::{Error, Result};
use common::{MockConnection, ScriptedListener, block_on};
use embedded_io_async::Read;
use heapless::String;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Page {
    Hello,
    Echo,
    Form,
    Broken,
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Hook {
    Record,
}

#[derive(Default)]
struct App {
    handled: Vec<(Page, Method)>,
    fields: Vec<(std::string::String, std::string::String)>,
    events: Vec<std::string::String>,
}

fn html(text: &str) -> Result<Response> {
    Ok(Response::html(
        Status::Ok,
        String::try_from(text).map_err(|()| Error::CapacityExceeded)?,
    ))
}

impl RouteHandler<Page> for App {
    async fn handle<R: Read>(
        &mut self,
        page: Page,
        mut request: HandlerRequest<'_, R>,
    ) -> Result<Response> {
        self.handled.push((page, request.method));
        match page {
            Page::Hello => {
                request.emit(events::SETTINGS_SAVED);
                html("hello")
            }
            Page::Echo => {
                let name = request
                    .query_params()
                    .and_then(|params| query_value(params, "name"))
                    .unwrap_or("nobody");
                html(&format!("echo {name}"))
            }
            Page::Form => {
                if let Some(mut form) = request.take_form() {
                    while let Some((name, value)) = form.next().await? {
                        self.fields.push((name.as_str().into(), value.as_str().into()));
                    }
                }
                html("saved")
            }
            Page::Broken => Err(Error::HardwareTransient),
            Page::Missing => {
                let route = request.params.text(keys::ROUTE).unwrap_or_default();
                Ok(Response::html(
                    Status::NotFound,
                    String::try_from(format!("missing {route}").as_str())
                        .map_err(|()| Error::CapacityExceeded)?,
                ))
            }
        }
    }
}

impl CallbackHandler<Hook> for App {
    async fn call(&mut self, _hook: Hook, event: &str, _params: &Params) -> Result<()> {
        self.events.push(event.into());
        Ok(())
    }
}

fn router() -> Router<Page> {
    let mut router = Router::new();
    router
        .route("/", Page::Hello, Params::new(), &[])
        .expect("room");
    router
        .route("/echo", Page::Echo, Params::new(), &[keys::QUERY_PARAMS])
        .expect("room");
    router
        .route("/form", Page::Form, Params::new(), &[keys::FORM_FIELDS])
        .expect("room");
    router
        .route("/broken", Page::Broken, Params::new(), &[])
        .expect("room");
    router
        .not_found(Page::Missing, Params::new(), &[keys::ROUTE])
        .expect("first fallback");
    router.start().expect("fallback registered");
    router
}

fn bus() -> EventBus<Hook> {
    let mut bus = EventBus::new();
    for event in [events::SETTINGS_SAVED, events::FATAL_ERROR] {
        bus.subscribe(event, Hook::Record, Params::new(), &[])
            .expect("room");
    }
    bus
}

fn serve(mut conn: MockConnection, app: &mut App) -> MockConnection {
    let router = router();
    let bus = bus();
    let mut context = RuntimeContext::new();
    let mut server = Server::new(&router, &bus, &mut context);
    block_on(server.serve_connection(&mut conn, app)).expect("connection served");
    conn
}

#[test]
fn registered_route_gets_its_handler_and_events_fire() {
    let mut app = App::default();
    let conn = serve(MockConnection::new("GET / HTTP/1.1\r\nHost: x\r\n\r\n"), &mut app);

    assert_eq!(conn.status_line(), "HTTP/1.0 200 OK");
    assert!(conn.response().contains("Content-Type: text/html\r\n"));
    assert_eq!(conn.body(), "hello");
    assert_eq!(app.handled, [(Page::Hello, Method::Get)]);
    assert_eq!(app.events, [events::SETTINGS_SAVED]);
}

#[test]
fn unknown_route_is_answered_by_the_fallback() {
    let mut app = App::default();
    let conn = serve(MockConnection::new("GET /nowhere HTTP/1.1\r\n\r\n"), &mut app);

    assert_eq!(conn.status_line(), "HTTP/1.0 404 Not Found");
    assert_eq!(conn.body(), "missing /nowhere");
}

#[test]
fn malformed_request_line_is_answered_by_the_fallback() {
    let mut app = App::default();
    let conn = serve(MockConnection::new("garbage\r\n\r\n"), &mut app);

    assert_eq!(conn.status_line(), "HTTP/1.0 404 Not Found");
    assert_eq!(app.handled, [(Page::Missing, Method::Other)]);
}

#[test]
fn undecodable_request_line_is_answered_by_the_fallback() {
    let mut app = App::default();
    let conn = serve(
        MockConnection::from_bytes(b"GET /caf\xe9 HTTP/1.1\r\n\r\n"),
        &mut app,
    );

    assert_eq!(conn.status_line(), "HTTP/1.0 404 Not Found");
    assert_eq!(app.handled, [(Page::Missing, Method::Other)]);
}

#[test]
fn undecodable_header_line_is_skipped() {
    let mut app = App::default();
    let conn = serve(
        MockConnection::from_bytes(b"GET / HTTP/1.1\r\nUser-Agent: \xff\xfe\r\nHost: x\r\n\r\n"),
        &mut app,
    );

    assert_eq!(conn.status_line(), "HTTP/1.0 200 OK");
    assert_eq!(conn.body(), "hello");
    assert_eq!(app.handled, [(Page::Hello, Method::Get)]);
}

#[test]
fn head_request_gets_the_header_without_a_body() {
    let mut app = App::default();
    let conn = serve(MockConnection::new("HEAD / HTTP/1.1\r\n\r\n"), &mut app);

    assert_eq!(conn.status_line(), "HTTP/1.0 200 OK");
    assert!(conn.response().ends_with("\r\n\r\n"));
    assert_eq!(conn.body(), "");
    assert_eq!(app.handled, [(Page::Hello, Method::Head)]);
}

#[test]
fn empty_connection_gets_no_response() {
    let mut app = App::default();
    let conn = serve(MockConnection::new(""), &mut app);

    assert!(conn.output.is_empty());
    assert!(app.handled.is_empty());
}

#[test]
fn query_pairs_reach_handlers_that_ask_for_them() {
    let mut app = App::default();
    let conn = serve(
        MockConnection::new("GET /echo?name=pico&x=1 HTTP/1.1\r\n\r\n").with_read_chunk(3),
        &mut app,
    );
    assert_eq!(conn.body(), "echo pico");
}

#[test]
fn multipart_fields_reach_the_form_handler() {
    let body = "--B\r\nContent-Disposition: form-data; name=\"ssid\"\r\n\r\nhome\r\n\
                --B\r\nContent-Disposition: form-data; name=\"pico_id\"\r\n\r\nkitchen\r\n--B--\r\n";
    let request = format!(
        "POST /form HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=B\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let mut app = App::default();
    let conn = serve(MockConnection::new(&request).with_read_chunk(7), &mut app);

    assert_eq!(conn.body(), "saved");
    assert_eq!(
        app.fields,
        [
            ("ssid".into(), "home".into()),
            ("pico_id".into(), "kitchen".into())
        ]
    );
}

#[test]
fn form_without_multipart_body_yields_no_fields() {
    let mut app = App::default();
    let conn = serve(MockConnection::new("GET /form HTTP/1.1\r\n\r\n"), &mut app);

    assert_eq!(conn.body(), "saved");
    assert!(app.fields.is_empty());
}

#[test]
fn failing_handler_is_answered_with_500() {
    let mut app = App::default();
    let conn = serve(MockConnection::new("GET /broken HTTP/1.1\r\n\r\n"), &mut app);
    assert_eq!(conn.status_line(), "HTTP/1.0 500 Internal Server Error");
}

#[test]
fn partial_writes_still_deliver_the_whole_response() {
    let mut app = App::default();
    let conn = serve(
        MockConnection::new("GET / HTTP/1.1\r\n\r\n").with_write_chunk(5),
        &mut app,
    );
    assert_eq!(conn.body(), "hello");
    assert!(conn.writes > 1);
}

#[test]
fn write_failure_is_reported_as_transport_error() {
    let router = router();
    let bus = bus();
    let mut context = RuntimeContext::new();
    let mut server = Server::new(&router, &bus, &mut context);
    let mut conn = MockConnection::new("GET / HTTP/1.1\r\n\r\n");
    conn.broken = true;

    let result = block_on(server.serve_connection(&mut conn, &mut App::default()));
    assert!(matches!(result, Err(Error::Transport)));
}

#[test]
fn accept_loop_serves_and_closes_until_the_listener_fails() {
    let router = router();
    let bus = bus();
    let mut context = RuntimeContext::new();
    context
        .set(keys::CURRENT_SSID, Value::text("home"))
        .expect("room");
    let mut listener = ScriptedListener::new([MockConnection::new("GET / HTTP/1.1\r\n\r\n")])
        .then_transient_failure()
        .then(MockConnection::new("GET /nowhere HTTP/1.1\r\n\r\n"));
    let mut app = App::default();

    let mut server = Server::new(&router, &bus, &mut context);
    let Err(err) = block_on(server.run(&mut listener, &mut app));
    assert!(matches!(err, Error::FatalTransport));

    assert_eq!(listener.served.len(), 2);
    assert!(listener.served.iter().all(|conn| conn.closed));
    assert_eq!(listener.served[0].body(), "hello");
    assert_eq!(listener.served[1].status_line(), "HTTP/1.0 404 Not Found");
    assert_eq!(app.events, [events::SETTINGS_SAVED, events::FATAL_ERROR]);
}
