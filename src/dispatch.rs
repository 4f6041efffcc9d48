//! Ordered registries mapping string keys to handlers with static and deferred parameters.
//!
//! One [`Registry`] type backs both the HTTP [`Router`] (kind [`Kind::Route`]) and the
//! [`EventBus`] (kind [`Kind::Callback`]). Handlers are plain `Copy` tags chosen by the
//! application; the application implements the capability traits that turn a tag into work.

mod event_bus;
mod router;

use heapless::{String, Vec};

use crate::runtime_context::{Params, RuntimeContext};
use crate::{Error, Result};

pub use event_bus::{CallbackHandler, EventBus, MAX_CALLBACKS, events};
pub use router::{Invocation, Invocations, MAX_INVOCATIONS, MAX_ROUTES, Router};

/// Reserved route key for the mandatory fallback entry.
pub const NOT_FOUND: &str = "__not_found__";

pub const KEY_LEN: usize = 32;
pub const MAX_DEFERRED_KEYS: usize = 4;

/// What a registry is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// HTTP route paths; at most one real match plus the fallback.
    Route,
    /// Event names; any number of entries may share a key.
    Callback,
}

/// A registered `(key, handler, static params, deferred keys)` tuple.
#[derive(Clone, Debug)]
pub struct Entry<H> {
    key: String<KEY_LEN>,
    handler: H,
    static_params: Params,
    deferred_keys: Vec<&'static str, MAX_DEFERRED_KEYS>,
}

impl<H: Copy> Entry<H> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn handler(&self) -> H {
        self.handler
    }

    #[must_use]
    pub const fn static_params(&self) -> &Params {
        &self.static_params
    }

    #[must_use]
    pub fn deferred_keys(&self) -> &[&'static str] {
        &self.deferred_keys
    }

    /// Whether this entry asked for `key` from the runtime context.
    #[must_use]
    pub fn defers(&self, key: &str) -> bool {
        self.deferred_keys.iter().any(|deferred| *deferred == key)
    }

    /// Snapshot of the parameters this entry is invoked with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the merged parameters do not fit.
    pub fn params(&self, context: &RuntimeContext) -> Result<Params> {
        context.snapshot(&self.deferred_keys, &self.static_params)
    }
}

/// Fixed-capacity, insertion-ordered registry.
pub struct Registry<H, const N: usize> {
    kind: Kind,
    entries: Vec<Entry<H>, N>,
    fallback: Option<Entry<H>>,
}

impl<H: Copy, const N: usize> Registry<H, N> {
    #[must_use]
    pub const fn new(kind: Kind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            fallback: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Append an entry. A route registered under [`NOT_FOUND`] becomes the fallback instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the registry, key or deferred-key list is full,
    /// [`Error::DuplicateNotFoundRoute`] on a second fallback registration, and
    /// [`Error::DuplicateRoute`] when a route key is already taken.
    pub fn register(
        &mut self,
        key: &str,
        handler: H,
        static_params: Params,
        deferred_keys: &[&'static str],
    ) -> Result<()> {
        let entry = Entry {
            key: String::try_from(key).map_err(|()| Error::CapacityExceeded)?,
            handler,
            static_params,
            deferred_keys: Vec::from_slice(deferred_keys).map_err(|()| Error::CapacityExceeded)?,
        };

        if self.kind == Kind::Route && key == NOT_FOUND {
            if self.fallback.is_some() {
                return Err(Error::DuplicateNotFoundRoute);
            }
            self.fallback = Some(entry);
            return Ok(());
        }
        if self.kind == Kind::Route && self.lookup(key).next().is_some() {
            return Err(Error::DuplicateRoute);
        }

        self.entries
            .push(entry)
            .map_err(|_| Error::CapacityExceeded)
    }

    /// All entries whose key equals `key`, in registration order.
    pub fn lookup<'s>(&'s self, key: &'s str) -> impl Iterator<Item = &'s Entry<H>> {
        self.entries.iter().filter(move |entry| entry.key == key)
    }

    #[must_use]
    pub const fn fallback(&self) -> Option<&Entry<H>> {
        self.fallback.as_ref()
    }

    /// Check the registry is complete before serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingNotFoundRoute`] for a route registry without a fallback.
    pub const fn start(&self) -> Result<()> {
        if matches!(self.kind, Kind::Route) && self.fallback.is_none() {
            return Err(Error::MissingNotFoundRoute);
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
