//! Process-wide facts that only become known after handlers are registered.
//!
//! The context is a "weak" registry: looking up a key that was never set yields
//! [`Value::Null`], never an error. Handlers never see the context itself; they receive a
//! [`Params`] snapshot taken at dispatch time.

use core::fmt;

use heapless::{FnvIndexMap, String};

use crate::http::QueryParams;
use crate::text::truncated;
use crate::{Error, Result};

/// Well-known context keys.
pub mod keys {
    /// Route of the request being served.
    pub const ROUTE: &str = "route";
    /// Whether the current request carried a query string. Handlers that defer this key also
    /// receive the parsed pairs.
    pub const QUERY_PARAMS: &str = "query_params";
    /// Whether the current request carries a multipart body. Handlers that defer this key also
    /// receive the lazy field stream.
    pub const FORM_FIELDS: &str = "form_fields";
    /// SSID of the network the radio joined.
    pub const CURRENT_SSID: &str = "current_ssid";
    /// Address assigned to the radio.
    pub const WLAN_IP: &str = "wlan_ip";
    /// Base64 form of the board's unique id.
    pub const PICO_UUID: &str = "pico_uuid";
}

pub const TEXT_LEN: usize = 64;
const CONTEXT_CAPACITY: usize = 16;
pub const PARAMS_CAPACITY: usize = 8;

static NULL: Value = Value::Null;

/// A value stored in the context or passed to a handler.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Float(f32),
    Text(String<TEXT_LEN>),
}

impl Value {
    /// Text value, truncated to the fixed capacity.
    #[must_use]
    pub fn text(value: &str) -> Self {
        Self::Text(truncated(value))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Int(number) => write!(f, "{number}"),
            Self::Float(number) => write!(f, "{number:.2}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Parameters handed to a route handler or callback: its static parameters merged over the
/// context values for its deferred keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    entries: FnvIndexMap<&'static str, Value, PARAMS_CAPACITY>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::insert`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the parameter table is full.
    pub fn with(mut self, key: &'static str, value: Value) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Insert or overwrite a parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the parameter table is full.
    pub fn insert(&mut self, key: &'static str, value: Value) -> Result<()> {
        self.entries
            .insert(key, value)
            .map(|_| ())
            .map_err(|_| Error::CapacityExceeded)
    }

    /// Value for `key`, or [`Value::Null`] when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &Value {
        self.entries.get(key).unwrap_or(&NULL)
    }

    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).as_str()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }
}

/// Key/value store owned by the top-level runtime and passed by reference into dispatch.
#[derive(Debug, Default)]
pub struct RuntimeContext {
    values: FnvIndexMap<&'static str, Value, CONTEXT_CAPACITY>,
    query_params: Option<QueryParams>,
}

impl RuntimeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or overwrite a fact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the context is full.
    pub fn set(&mut self, key: &'static str, value: Value) -> Result<()> {
        self.values
            .insert(key, value)
            .map(|_| ())
            .map_err(|_| Error::CapacityExceeded)
    }

    /// Value for `key`, or [`Value::Null`] if it was never set.
    #[must_use]
    pub fn get(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&NULL)
    }

    /// Overwrite the per-request keys. Called once per connection before dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the context is full.
    pub fn begin_request(
        &mut self,
        route: &str,
        query_params: Option<QueryParams>,
        has_form_fields: bool,
    ) -> Result<()> {
        self.set(keys::ROUTE, Value::text(route))?;
        self.set(keys::QUERY_PARAMS, Value::Bool(query_params.is_some()))?;
        self.set(keys::FORM_FIELDS, Value::Bool(has_form_fields))?;
        self.query_params = query_params;
        Ok(())
    }

    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.get(keys::ROUTE).as_str()
    }

    #[must_use]
    pub const fn query_params(&self) -> Option<&QueryParams> {
        self.query_params.as_ref()
    }

    #[must_use]
    pub fn current_ssid(&self) -> Option<&str> {
        self.get(keys::CURRENT_SSID).as_str()
    }

    /// Resolve `deferred_keys` against the context, then lay `static_params` over them.
    ///
    /// Every deferred key is present in the result, as [`Value::Null`] if it was never set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the merged parameters do not fit.
    pub fn snapshot(&self, deferred_keys: &[&'static str], static_params: &Params) -> Result<Params> {
        let mut params = Params::new();
        for &key in deferred_keys {
            params.insert(key, self.get(key).clone())?;
        }
        for (key, value) in static_params.iter() {
            params.insert(key, value.clone())?;
        }
        Ok(params)
    }
}
