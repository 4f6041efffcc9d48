use super::{Kind, Registry};
use crate::Result;
use crate::runtime_context::{Params, RuntimeContext};

pub const MAX_CALLBACKS: usize = 16;

/// Event names fired by the node.
pub mod events {
    pub const WLAN_ACTIVE: &str = "wlan_active";
    pub const WLAN_STARTING_TO_CONNECT: &str = "wlan_starting_to_connect";
    pub const WLAN_CONNECTED: &str = "wlan_connected";
    pub const CANT_CONNECT: &str = "cant_connect";
    pub const FATAL_ERROR: &str = "fatal_error";
    pub const SETTINGS_SAVED: &str = "settings_saved";
    pub const HARD_RESET: &str = "hard_reset";
}

/// Turns a callback tag into side effects.
pub trait CallbackHandler<C> {
    /// Run `callback` for `event`.
    ///
    /// # Errors
    ///
    /// Any error aborts the remaining callbacks of this firing and is logged by the bus.
    async fn call(&mut self, callback: C, event: &str, params: &Params) -> Result<()>;
}

/// Fan-out from event names to callbacks, in registration order.
pub struct EventBus<C> {
    registry: Registry<C, MAX_CALLBACKS>,
}

impl<C: Copy> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Copy> EventBus<C> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry: Registry::new(Kind::Callback),
        }
    }

    /// Add `callback` to the callbacks run when `event` fires.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CapacityExceeded`] when the bus is full.
    pub fn subscribe(
        &mut self,
        event: &str,
        callback: C,
        static_params: Params,
        deferred_keys: &[&'static str],
    ) -> Result<()> {
        self.registry
            .register(event, callback, static_params, deferred_keys)
    }

    /// Number of callbacks registered for `event`.
    #[must_use]
    pub fn subscribers(&self, event: &str) -> usize {
        self.registry.lookup(event).count()
    }

    /// Run every callback for `event` with its parameter snapshot.
    ///
    /// A failing callback is logged and ends this firing; nothing is returned to the caller.
    pub async fn fire(
        &self,
        event: &str,
        context: &RuntimeContext,
        handler: &mut impl CallbackHandler<C>,
    ) {
        debug!("Event {}", event);
        for entry in self.registry.lookup(event) {
            let result = match entry.params(context) {
                Ok(params) => handler.call(entry.handler(), event, &params).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                error!("Callback for {} failed: {}", event, err);
                return;
            }
        }
    }
}
