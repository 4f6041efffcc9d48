use core::fmt::Write as _;

use embedded_io_async::Write;
use heapless::String;

use crate::template::Template;
use crate::{Error, Result};

pub const BODY_LEN: usize = 512;
const HEADER_LEN: usize = 128;

/// MIME types used by the node.
pub mod content_type {
    pub const HTML: &str = "text/html";
    pub const JSON: &str = "application/json";
}

/// Status codes the node answers with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    NotFound,
    InternalServerError,
}

impl Status {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
        }
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

/// Response payload.
pub enum Body {
    Empty,
    Static(&'static str),
    Text(String<BODY_LEN>),
    Template(Template),
}

/// Status, content type and a body that is written after the header.
pub struct Response {
    status: Status,
    content_type: &'static str,
    body: Body,
}

impl Response {
    #[must_use]
    pub const fn new(status: Status, content_type: &'static str, body: Body) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    #[must_use]
    pub const fn html(status: Status, body: String<BODY_LEN>) -> Self {
        Self::new(status, content_type::HTML, Body::Text(body))
    }

    #[must_use]
    pub const fn json(body: String<BODY_LEN>) -> Self {
        Self::new(Status::Ok, content_type::JSON, Body::Text(body))
    }

    #[must_use]
    pub const fn template(status: Status, template: Template) -> Self {
        Self::new(status, content_type::HTML, Body::Template(template))
    }

    #[must_use]
    pub const fn server_error() -> Self {
        Self::new(
            Status::InternalServerError,
            content_type::HTML,
            Body::Static("<html><body><h1>500</h1><p>Internal error.</p></body></html>"),
        )
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        self.content_type
    }

    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    pub const fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Status line and headers, ending with the blank line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormatError`] if the header does not fit.
    pub fn header(&self) -> Result<String<HEADER_LEN>> {
        let mut header = String::new();
        write!(
            header,
            "HTTP/1.0 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
            self.status.code(),
            self.status.reason(),
            self.content_type
        )?;
        Ok(header)
    }
}

/// Write all of `bytes`, looping on partial writes.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the write fails or the peer stops accepting bytes.
pub async fn write_fully<W: Write>(conn: &mut W, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        let written = conn.write(bytes).await.map_err(|_| Error::Transport)?;
        if written == 0 {
            return Err(Error::Transport);
        }
        bytes = bytes.get(written..).unwrap_or_default();
    }
    Ok(())
}

/// Write the optional header block, then every chunk of `body`.
///
/// # Errors
///
/// Returns [`Error::Transport`] if any write fails.
pub async fn respond<W: Write>(conn: &mut W, header: Option<&str>, body: &mut Body) -> Result<()> {
    if let Some(header) = header {
        write_fully(conn, header.as_bytes()).await?;
    }
    match body {
        Body::Empty => {}
        Body::Static(text) => write_fully(conn, text.as_bytes()).await?,
        Body::Text(text) => write_fully(conn, text.as_bytes()).await?,
        Body::Template(template) => {
            while let Some(chunk) = template.next_chunk() {
                write_fully(conn, chunk.as_bytes()).await?;
            }
        }
    }
    Ok(())
}
