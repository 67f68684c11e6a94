use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

use crate::config::SubscriptionHandler;

/// Routes unsolicited events of one service to handlers by resource scheme.
///
/// Handlers are registered at configuration time and never change afterwards.
/// They run synchronously on the session's reader, so a slow handler delays
/// every message behind it.
#[derive(Clone, Default)]
pub struct SubscriptionRouter {
    handlers: HashMap<String, SubscriptionHandler>,
}

impl SubscriptionRouter {
    pub fn new(handlers: HashMap<String, SubscriptionHandler>) -> Self {
        Self { handlers }
    }

    /// Invoke the handler registered for `scheme` with the full event.
    ///
    /// Returns false, without error, when no handler is registered.
    pub fn route(&self, scheme: &str, event: &Value) -> bool {
        match self.handlers.get(scheme) {
            Some(handler) => {
                trace!(scheme, "Delivering event");
                handler(event);
                true
            }
            None => {
                debug!(scheme, "No subscription for event, dropping");
                false
            }
        }
    }

    /// Check if a handler is registered for the given scheme.
    pub fn has_handler(&self, scheme: &str) -> bool {
        self.handlers.contains_key(scheme)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.handlers.keys().collect();
        schemes.sort();
        f.debug_struct("SubscriptionRouter")
            .field("schemes", &schemes)
            .finish()
    }
}
