use heapless::Vec;

use super::{Entry, Kind, NOT_FOUND, Registry};
use crate::http::normalize_route;
use crate::runtime_context::{Params, RuntimeContext, keys};
use crate::{Error, Result};

pub const MAX_ROUTES: usize = 12;
pub const MAX_INVOCATIONS: usize = 2;

/// A handler resolved for one request, with its parameter snapshot.
#[derive(Clone, Debug)]
pub struct Invocation<H> {
    pub handler: H,
    pub params: Params,
    /// The handler deferred `query_params` and gets the parsed pairs.
    pub wants_query: bool,
    /// The handler deferred `form_fields` and gets the lazy field stream.
    pub wants_form: bool,
    /// This is the not-found entry.
    pub fallback: bool,
}

pub type Invocations<H> = Vec<Invocation<H>, MAX_INVOCATIONS>;

/// Exact-match route table with a mandatory not-found entry.
pub struct Router<H> {
    registry: Registry<H, MAX_ROUTES>,
}

impl<H: Copy> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Copy> Router<H> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry: Registry::new(Kind::Route),
        }
    }

    /// Register `handler` for `path`. The path is normalized the same way request routes are.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the table is full and [`Error::DuplicateRoute`]
    /// when `path` already has a handler.
    pub fn route(
        &mut self,
        path: &str,
        handler: H,
        static_params: Params,
        deferred_keys: &[&'static str],
    ) -> Result<()> {
        self.registry
            .register(&normalize_route(path), handler, static_params, deferred_keys)
    }

    /// Register the fallback invoked when no path matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateNotFoundRoute`] if one is already registered.
    pub fn not_found(
        &mut self,
        handler: H,
        static_params: Params,
        deferred_keys: &[&'static str],
    ) -> Result<()> {
        self.registry
            .register(NOT_FOUND, handler, static_params, deferred_keys)
    }

    /// Refuse to serve without a fallback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingNotFoundRoute`] when no fallback was registered.
    pub const fn start(&self) -> Result<()> {
        self.registry.start()
    }

    /// Handlers for `route`, or the fallback alone when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingNotFoundRoute`] when the fallback is needed but absent, or
    /// [`Error::CapacityExceeded`] when a parameter snapshot does not fit.
    pub fn dispatch(&self, route: &str, context: &RuntimeContext) -> Result<Invocations<H>> {
        let mut invocations = Invocations::new();
        for entry in self.registry.lookup(route) {
            if invocations.push(invocation(entry, context, false)?).is_err() {
                warn!("Route {} has more handlers than can run; extra ignored", route);
                break;
            }
        }
        if invocations.is_empty() {
            return self.fallback(context);
        }
        Ok(invocations)
    }

    /// Just the fallback, used when the request line could not be parsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingNotFoundRoute`] when no fallback was registered.
    pub fn fallback(&self, context: &RuntimeContext) -> Result<Invocations<H>> {
        let entry = self
            .registry
            .fallback()
            .ok_or(Error::MissingNotFoundRoute)?;
        let mut invocations = Invocations::new();
        invocations
            .push(invocation(entry, context, true)?)
            .map_err(|_| Error::CapacityExceeded)?;
        Ok(invocations)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

fn invocation<H: Copy>(
    entry: &Entry<H>,
    context: &RuntimeContext,
    fallback: bool,
) -> Result<Invocation<H>> {
    Ok(Invocation {
        handler: entry.handler(),
        params: entry.params(context)?,
        wants_query: entry.defers(keys::QUERY_PARAMS),
        wants_form: entry.defers(keys::FORM_FIELDS),
        fallback,
    })
}
