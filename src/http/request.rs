use heapless::{String, Vec};

use crate::text::truncated;
use crate::{Error, Result};

pub const ROUTE_LEN: usize = 64;
pub const MAX_QUERY_PARAMS: usize = 8;
const PROTOCOL_LEN: usize = 16;
const CONTENT_TYPE_LEN: usize = 128;

pub type Route = String<ROUTE_LEN>;
pub type QueryKey = String<24>;
pub type QueryValue = String<64>;
/// Query pairs in the order they appeared; values are not percent-decoded.
pub type QueryParams = Vec<(QueryKey, QueryValue), MAX_QUERY_PARAMS>;

/// Request method. Anything unrecognized is kept as [`Method::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Other,
}

impl Method {
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Other => "OTHER",
        }
    }
}

/// The parsed first line of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub route: Route,
    pub query_params: Option<QueryParams>,
    pub protocol: String<PROTOCOL_LEN>,
}

/// Parse `METHOD PATH PROTOCOL`.
///
/// # Errors
///
/// Returns [`Error::MalformedRequest`] unless the line splits on single spaces into exactly
/// three non-empty tokens.
pub fn parse_request_line(line: &str) -> Result<RequestLine> {
    let mut tokens = line.split(' ');
    let (Some(method), Some(path), Some(protocol), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(Error::MalformedRequest("request line needs three tokens"));
    };
    if method.is_empty() || path.is_empty() || protocol.is_empty() {
        return Err(Error::MalformedRequest("empty token in request line"));
    }

    let (raw_route, query) = match path.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (path, None),
    };

    Ok(RequestLine {
        method: Method::parse(method),
        route: normalize_route(raw_route),
        query_params: query.map(parse_query),
        protocol: truncated(protocol),
    })
}

/// Leading `/` added, trailing `/` removed, except for the root itself.
#[must_use]
pub fn normalize_route(raw: &str) -> Route {
    let trimmed = raw.trim_end_matches('/');
    let mut route = Route::new();
    if !trimmed.starts_with('/') {
        let _ = route.push('/');
    }
    for ch in trimmed.chars() {
        if route.push(ch).is_err() {
            break;
        }
    }
    if route.is_empty() {
        let _ = route.push('/');
    }
    route
}

/// Split `a=1&b=2` into pairs. A pair without `=` gets an empty value.
#[must_use]
pub fn parse_query(query: &str) -> QueryParams {
    let mut params = QueryParams::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if params.push((truncated(key), truncated(value))).is_err() {
            warn!(
                "Query string has more than {} parameters; ignoring the rest",
                MAX_QUERY_PARAMS
            );
            break;
        }
    }
    params
}

/// First value for `key`, if any.
#[must_use]
pub fn query_value<'q>(params: &'q QueryParams, key: &str) -> Option<&'q str> {
    params
        .iter()
        .find(|(name, _)| name.as_str() == key)
        .map(|(_, value)| value.as_str())
}

/// The request headers the engine cares about; everything else is skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    content_type: Option<String<CONTENT_TYPE_LEN>>,
    content_length: Option<usize>,
}

impl Headers {
    /// Record a `Name: value` header line if it is one we use.
    pub fn absorb(&mut self, line: &str) {
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("content-type") {
            if value.len() > CONTENT_TYPE_LEN {
                warn!("Content-Type header truncated");
            }
            self.content_type = Some(truncated(value));
        } else if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().ok();
        }
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[must_use]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Whether the body is `multipart/form-data`.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.content_type()
            .is_some_and(|value| value.starts_with(super::multipart::MULTIPART_FORM_DATA))
    }
}
