//! `{{token}}` substitution over templates compiled into the firmware.
//!
//! Rendering is pull-based: [`Template::next_chunk`] hands out slices of the template text or
//! of a replacement value, so the page is never assembled in memory. Tokens without a
//! replacement are emitted unchanged. Values are stored as given and HTML-escaped while
//! rendering, so escaping never costs table space.

use core::fmt::{Display, Write as _};

use heapless::{FnvIndexMap, String, Vec};

use crate::text::html_entity;
use crate::{Error, Result};

pub const HEADER: &str = include_str!("../templates/header.html");
pub const FOOTER: &str = include_str!("../templates/footer.html");
pub const ALERT: &str = include_str!("../templates/alert.html");
pub const CURRENT_DATA: &str = include_str!("../templates/current_data.html");
pub const SETTINGS: &str = include_str!("../templates/settings.html");

pub const MAX_PARTS: usize = 6;
pub const MAX_REPLACEMENTS: usize = 32;
pub const REPLACEMENT_LEN: usize = 96;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Clone, Debug)]
struct Slot {
    text: String<REPLACEMENT_LEN>,
    escape: bool,
}

/// Token → text table. Text is HTML-escaped on output unless inserted raw.
#[derive(Clone, Debug, Default)]
pub struct Replacements {
    values: FnvIndexMap<&'static str, Slot, MAX_REPLACEMENTS>,
}

impl Replacements {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, to be HTML-escaped when rendered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when `value` is longer than [`REPLACEMENT_LEN`] or
    /// the table is full.
    pub fn insert(&mut self, token: &'static str, value: &str) -> Result<()> {
        let text = String::try_from(value).map_err(|()| Error::CapacityExceeded)?;
        self.store(token, Slot { text, escape: true })
    }

    /// Insert the `Display` form of `value` (numbers and other markup-free values).
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormatError`] when the text does not fit, or
    /// [`Error::CapacityExceeded`] when the table is full.
    pub fn insert_display(&mut self, token: &'static str, value: impl Display) -> Result<()> {
        let mut text = String::new();
        write!(text, "{value}")?;
        self.insert_raw(token, text)
    }

    /// Insert `value` as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the table is full.
    pub fn insert_raw(&mut self, token: &'static str, value: String<REPLACEMENT_LEN>) -> Result<()> {
        self.store(token, Slot { text: value, escape: false })
    }

    /// The stored text for `token`, before escaping.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&str> {
        self.values.get(token).map(|value| value.text.as_str())
    }

    fn store(&mut self, token: &'static str, value: Slot) -> Result<()> {
        self.values
            .insert(token, value)
            .map(|_| ())
            .map_err(|_| Error::CapacityExceeded)
    }
}

/// A sequence of templates rendered back to back with one replacement table.
#[derive(Clone, Debug)]
pub struct Template {
    parts: Vec<&'static str, MAX_PARTS>,
    replacements: Replacements,
    part: usize,
    position: usize,
    /// Token whose value is being written, and the byte offset reached in it.
    value: Option<(&'static str, usize)>,
}

impl Template {
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] for more than [`MAX_PARTS`] parts.
    pub fn new(parts: &[&'static str], replacements: Replacements) -> Result<Self> {
        Ok(Self {
            parts: Vec::from_slice(parts).map_err(|()| Error::CapacityExceeded)?,
            replacements,
            part: 0,
            position: 0,
            value: None,
        })
    }

    /// Next piece of output, or `None` when every part has been rendered.
    pub fn next_chunk(&mut self) -> Option<&str> {
        loop {
            if let Some((token, offset)) = self.value {
                let Some(value) = self.replacements.values.get(token) else {
                    self.value = None;
                    continue;
                };
                let rest = value.text.get(offset..).unwrap_or_default();
                let Some(first) = rest.chars().next() else {
                    self.value = None;
                    continue;
                };
                if !value.escape {
                    self.value = Some((token, value.text.len()));
                    return Some(rest);
                }
                if let Some(entity) = html_entity(first) {
                    self.value = Some((token, offset.saturating_add(first.len_utf8())));
                    return Some(entity);
                }
                let plain_len = rest
                    .find(|ch: char| html_entity(ch).is_some())
                    .unwrap_or(rest.len());
                self.value = Some((token, offset.saturating_add(plain_len)));
                return rest.get(..plain_len);
            }

            let part: &'static str = self.parts.get(self.part).copied()?;
            let rest = part.get(self.position..).unwrap_or_default();
            if rest.is_empty() {
                self.part = self.part.saturating_add(1);
                self.position = 0;
                continue;
            }

            if let Some(after_open) = rest.strip_prefix(OPEN) {
                let token = after_open
                    .find(CLOSE)
                    .and_then(|close| after_open.get(..close))
                    .filter(|token| is_token(token));
                if let Some(token) = token {
                    let consumed = OPEN.len() + token.len() + CLOSE.len();
                    self.position = self.position.saturating_add(consumed);
                    if self.replacements.values.contains_key(token) {
                        self.value = Some((token, 0));
                        continue;
                    }
                    return rest.get(..consumed);
                }
                self.position = self.position.saturating_add(OPEN.len());
                return Some(OPEN);
            }

            let literal_len = rest.find(OPEN).unwrap_or(rest.len());
            self.position = self.position.saturating_add(literal_len);
            return rest.get(..literal_len);
        }
    }
}

fn is_token(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
