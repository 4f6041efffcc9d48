//! A small HTTP/1.x request engine for one connection at a time.
//!
//! Requests are read incrementally in fixed-size chunks. The request line, headers and a
//! `multipart/form-data` body are parsed line by line without buffering the body. Query strings
//! are not percent-decoded and URL-encoded bodies are ignored.

mod multipart;
mod reader;
mod request;
mod response;
mod server;
#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
mod tcp;

pub use multipart::{Boundary, FIELD_NAME_LEN, FIELD_VALUE_LEN, FieldName, FieldValue, FormFields};
pub use reader::{CHUNK_SIZE, RequestReader};
pub use request::{
    Headers, MAX_QUERY_PARAMS, Method, QueryKey, QueryParams, QueryValue, RequestLine, Route,
    normalize_route, parse_query, parse_request_line, query_value,
};
pub use response::{BODY_LEN, Body, Response, Status, content_type, respond, write_fully};
pub use server::{
    Connection, HTTP_PORT, HandlerRequest, Listener, READ_TIMEOUT, RouteHandler, Server,
};
#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
pub use tcp::TcpListener;
