use embedded_io_async::Read;
use heapless::String;

use super::reader::RequestReader;
use crate::Result;
use crate::text::truncated;

pub(super) const MULTIPART_FORM_DATA: &str = "multipart/form-data";
const CONTENT_DISPOSITION: &str = "content-disposition";
const NAME_MARKER: &str = "name=\"";
// RFC 2046 caps the boundary at 70 characters, plus the leading and trailing dashes.
const SEPARATOR_LEN: usize = 72;
const TERMINATOR_LEN: usize = 74;

pub const FIELD_NAME_LEN: usize = 32;
pub const FIELD_VALUE_LEN: usize = 256;
pub type FieldName = String<FIELD_NAME_LEN>;
pub type FieldValue = String<FIELD_VALUE_LEN>;

/// The `--boundary` separator and `--boundary--` terminator lines of a multipart body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Boundary {
    separator: String<SEPARATOR_LEN>,
    terminator: String<TERMINATOR_LEN>,
}

impl Boundary {
    /// Extract the boundary from a `Content-Type` value.
    ///
    /// Returns `None` unless the value begins with `multipart/form-data` and carries a
    /// non-empty `boundary` parameter.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        if !content_type.starts_with(MULTIPART_FORM_DATA) {
            return None;
        }
        let token = content_type
            .split(';')
            .skip(1)
            .find_map(|param| param.trim().strip_prefix("boundary="))?
            .trim_matches('"');
        if token.is_empty() {
            return None;
        }

        let mut separator = String::new();
        separator.push_str("--").ok()?;
        if separator.push_str(token).is_err() {
            warn!("Multipart boundary longer than {} bytes", SEPARATOR_LEN);
            return None;
        }
        let mut terminator = String::new();
        terminator.push_str(&separator).ok()?;
        terminator.push_str("--").ok()?;
        Some(Self {
            separator,
            terminator,
        })
    }

    #[must_use]
    pub fn separator(&self) -> &str {
        &self.separator
    }

    #[must_use]
    pub fn terminator(&self) -> &str {
        &self.terminator
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Preamble,
    PartHeaders,
    Done,
}

/// Lazy stream of `(name, value)` pairs read from a `multipart/form-data` body.
///
/// Each field is yielded as soon as its closing separator has been read. The stream borrows
/// the connection and cannot be rewound. Dropping it part way through is fine: the engine
/// closes the connection after responding, discarding the unread rest of the body.
pub struct FormFields<'a, R> {
    reader: &'a mut RequestReader,
    conn: &'a mut R,
    boundary: Option<Boundary>,
    state: State,
}

impl<'a, R: Read> FormFields<'a, R> {
    /// Start a field stream. A missing or non-multipart `content_type` yields no fields.
    pub fn new(reader: &'a mut RequestReader, conn: &'a mut R, content_type: Option<&str>) -> Self {
        let boundary = content_type.and_then(Boundary::from_content_type);
        let state = if boundary.is_some() {
            State::Preamble
        } else {
            State::Done
        };
        Self {
            reader,
            conn,
            boundary,
            state,
        }
    }

    #[must_use]
    pub const fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }

    /// Next field, or `None` once the terminator or end of stream is reached.
    ///
    /// Values spanning several lines are joined with `\n`; trailing whitespace is trimmed.
    /// Values longer than [`FIELD_VALUE_LEN`] are truncated. Parts without a `name` are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Propagates transport and UTF-8 errors from the reader.
    pub async fn next(&mut self) -> Result<Option<(FieldName, FieldValue)>> {
        let Some(boundary) = &self.boundary else {
            return Ok(None);
        };

        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Preamble => match self.reader.read_line(&mut *self.conn).await? {
                    None => self.state = State::Done,
                    Some(line) if line == boundary.separator() => self.state = State::PartHeaders,
                    Some(line) if line == boundary.terminator() => self.state = State::Done,
                    Some(_) => {}
                },
                State::PartHeaders => {
                    let mut name: Option<FieldName> = None;
                    loop {
                        match self.reader.read_line(&mut *self.conn).await? {
                            None => {
                                self.state = State::Done;
                                return Ok(None);
                            }
                            Some("") => break,
                            Some(line) => {
                                if name.is_none() {
                                    name = field_name(line).map(truncated);
                                }
                            }
                        }
                    }

                    let mut value = FieldValue::new();
                    let mut first_line = true;
                    let mut overflowed = false;
                    loop {
                        match self.reader.read_line(&mut *self.conn).await? {
                            None => {
                                self.state = State::Done;
                                break;
                            }
                            Some(line) if line == boundary.separator() => break,
                            Some(line) if line == boundary.terminator() => {
                                self.state = State::Done;
                                break;
                            }
                            Some(line) => {
                                if !first_line {
                                    overflowed |= value.push('\n').is_err();
                                }
                                first_line = false;
                                for ch in line.chars() {
                                    if value.push(ch).is_err() {
                                        overflowed = true;
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    let Some(name) = name else {
                        debug!("Skipping multipart part without a name");
                        continue;
                    };
                    if overflowed {
                        warn!("Form field {} truncated", name.as_str());
                    }
                    let trimmed_len = value.trim_end().len();
                    value.truncate(trimmed_len);
                    return Ok(Some((name, value)));
                }
            }
        }
    }
}

/// The `name="…"` parameter of a `Content-Disposition` line, ignoring `filename="…"`.
fn field_name(line: &str) -> Option<&str> {
    let header = line.get(..CONTENT_DISPOSITION.len())?;
    if !header.eq_ignore_ascii_case(CONTENT_DISPOSITION) {
        return None;
    }
    line.match_indices(NAME_MARKER).find_map(|(index, _)| {
        let standalone = index == 0
            || matches!(
                line.as_bytes().get(index.saturating_sub(1)),
                Some(b' ' | b';')
            );
        if !standalone {
            return None;
        }
        let rest = line.get(index.saturating_add(NAME_MARKER.len())..)?;
        rest.split('"').next()
    })
}
