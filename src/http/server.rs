use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use heapless::Vec;

use super::multipart::FormFields;
use super::reader::RequestReader;
use super::request::{Headers, Method, QueryParams, RequestLine, parse_request_line};
use super::response::{Body, Response, respond};
use crate::dispatch::{CallbackHandler, EventBus, Invocations, Router, events};
use crate::runtime_context::{Params, RuntimeContext};
use crate::{Error, Never, Result};

pub const HTTP_PORT: u16 = 80;
/// A silent peer is dropped after this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_EMITTED_EVENTS: usize = 4;

/// An accepted client connection.
pub trait Connection: Read + Write {
    /// Flush and close. Errors are ignored: the connection is finished either way.
    async fn shutdown(&mut self);
}

/// Source of client connections, one at a time.
pub trait Listener {
    type Connection<'c>: Connection
    where
        Self: 'c;

    /// Wait for the next client.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] is logged and the accept loop continues;
    /// [`Error::FatalTransport`] ends the accept loop.
    async fn accept(&mut self) -> Result<Self::Connection<'_>>;
}

/// Everything a route handler receives for one request.
pub struct HandlerRequest<'a, R> {
    pub method: Method,
    pub params: Params,
    query_params: Option<&'a QueryParams>,
    form: Option<FormFields<'a, R>>,
    emitted: &'a mut Vec<&'static str, MAX_EMITTED_EVENTS>,
}

impl<'a, R: Read> HandlerRequest<'a, R> {
    /// Parsed query pairs, for handlers that deferred `query_params`.
    #[must_use]
    pub const fn query_params(&self) -> Option<&'a QueryParams> {
        self.query_params
    }

    /// The lazy multipart field stream, for handlers that deferred `form_fields`.
    ///
    /// Only the first handler of a request that asks for it gets the stream.
    pub const fn take_form(&mut self) -> Option<FormFields<'a, R>> {
        self.form.take()
    }

    /// Fire `event` once the handler has returned and before the response is written.
    pub fn emit(&mut self, event: &'static str) {
        if self.emitted.push(event).is_err() {
            warn!("Too many events emitted by one handler; dropping {}", event);
        }
    }
}

/// Turns a route handler tag into a response.
pub trait RouteHandler<H> {
    /// Produce the response for `handler`.
    ///
    /// # Errors
    ///
    /// Any error is logged and answered with a 500 page.
    async fn handle<R: Read>(&mut self, handler: H, request: HandlerRequest<'_, R>)
    -> Result<Response>;
}

/// The accept loop and per-connection pipeline.
pub struct Server<'a, H, C> {
    router: &'a Router<H>,
    bus: &'a EventBus<C>,
    context: &'a mut RuntimeContext,
    reader: RequestReader,
}

impl<'a, H: Copy, C: Copy> Server<'a, H, C> {
    #[must_use]
    pub const fn new(
        router: &'a Router<H>,
        bus: &'a EventBus<C>,
        context: &'a mut RuntimeContext,
    ) -> Self {
        Self {
            router,
            bus,
            context,
            reader: RequestReader::new(READ_TIMEOUT),
        }
    }

    /// Accept and serve connections until the listener fails for good.
    ///
    /// Per-connection errors are logged and never end the loop. A fatal listener error fires
    /// `fatal_error` and is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalTransport`] when the listening socket fails.
    pub async fn run<L, A>(&mut self, listener: &mut L, app: &mut A) -> Result<Never>
    where
        L: Listener,
        A: RouteHandler<H> + CallbackHandler<C>,
    {
        info!("HTTP server accepting connections");
        loop {
            let mut connection = match listener.accept().await {
                Ok(connection) => connection,
                Err(Error::FatalTransport) => {
                    error!("Listening socket failed");
                    self.bus.fire(events::FATAL_ERROR, self.context, app).await;
                    return Err(Error::FatalTransport);
                }
                Err(err) => {
                    warn!("Accept failed: {}", err);
                    Timer::after(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            if let Err(err) = self.serve_connection(&mut connection, app).await {
                warn!("Connection dropped: {}", err);
            }
            connection.shutdown().await;
        }
    }

    /// Read one request from `conn`, run its handlers and write the response.
    ///
    /// The caller closes the connection afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on read or write failures. A request line that cannot be
    /// decoded is answered by the not-found handler. A `HEAD` request gets the header only.
    pub async fn serve_connection<Conn, A>(&mut self, conn: &mut Conn, app: &mut A) -> Result<()>
    where
        Conn: Read + Write,
        A: RouteHandler<H> + CallbackHandler<C>,
    {
        self.reader.reset();
        let request_line = match self.reader.read_line(conn).await {
            Ok(Some(line)) => parse_request_line(line),
            Ok(None) => {
                info!("Client closed the connection without a request");
                return Ok(());
            }
            Err(err @ Error::MalformedRequest(_)) => Err(err),
            Err(err) => return Err(err),
        };

        let mut headers = Headers::default();
        let (method, invocations) = match request_line {
            Ok(request) => {
                self.read_headers(conn, &mut headers).await?;
                self.route_request(request, &headers)?
            }
            Err(err) => {
                warn!("{}", err);
                (Method::Other, self.router.fallback(self.context)?)
            }
        };

        let mut form_claimed = false;
        let mut emitted = Vec::<&'static str, MAX_EMITTED_EVENTS>::new();
        for (index, invocation) in invocations.into_iter().enumerate() {
            let form = if invocation.wants_form && !form_claimed {
                form_claimed = true;
                Some(FormFields::new(
                    &mut self.reader,
                    &mut *conn,
                    headers.content_type(),
                ))
            } else {
                None
            };
            let request = HandlerRequest {
                method,
                params: invocation.params,
                query_params: if invocation.wants_query {
                    self.context.query_params()
                } else {
                    None
                },
                form,
                emitted: &mut emitted,
            };

            let mut response = match app.handle(invocation.handler, request).await {
                Ok(response) => response,
                Err(err) => {
                    error!("Handler failed: {}", err);
                    Response::server_error()
                }
            };

            for event in &emitted {
                self.bus.fire(event, self.context, app).await;
            }
            emitted.clear();

            let header = if index == 0 {
                Some(response.header()?)
            } else {
                None
            };
            let mut no_body = Body::Empty;
            let body = if method == Method::Head {
                &mut no_body
            } else {
                response.body_mut()
            };
            respond(conn, header.as_deref(), body).await?;
        }

        conn.flush().await.map_err(|_| Error::Transport)
    }

    /// Absorb header lines up to the blank line. Undecodable lines are skipped.
    async fn read_headers<Conn: Read>(&mut self, conn: &mut Conn, headers: &mut Headers) -> Result<()> {
        loop {
            match self.reader.read_line(conn).await {
                Ok(None | Some("")) => return Ok(()),
                Ok(Some(line)) => headers.absorb(line),
                Err(Error::MalformedRequest(reason)) => warn!("Skipping header line: {}", reason),
                Err(err) => return Err(err),
            }
        }
    }

    fn route_request(
        &mut self,
        request: RequestLine,
        headers: &Headers,
    ) -> Result<(Method, Invocations<H>)> {
        let RequestLine {
            method,
            route,
            query_params,
            ..
        } = request;
        info!("{} {}", method.as_str(), route.as_str());

        let has_form = method == Method::Post && headers.is_multipart();
        if method == Method::Post {
            if let Some(content_length) = headers.content_length() {
                self.reader.limit_body(content_length);
            }
        }

        self.context.begin_request(&route, query_params, has_form)?;
        Ok((method, self.router.dispatch(&route, self.context)?))
    }
}
