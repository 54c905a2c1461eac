// ── Message router ──
//
// Fans decoded messages out to the handlers subscribed for their type.
// Handlers run synchronously, in subscription order, on the session task.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, trace};
use upb_proto::{Message, MessageType};

use crate::error::CoreError;

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), CoreError> + Send + Sync>;

/// Cheaply cloneable; clones share one subscription table.
#[derive(Clone, Default)]
pub struct MessageRouter {
    handlers: Arc<DashMap<MessageType, Vec<Handler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind`. Returns `false` if this exact handler
    /// was already subscribed to it.
    pub fn subscribe(&self, kind: MessageType, handler: Handler) -> bool {
        let mut entry = self.handlers.entry(kind).or_default();
        if entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        entry.push(handler);
        true
    }

    /// Number of handlers subscribed to `kind`.
    pub fn handler_count(&self, kind: MessageType) -> usize {
        self.handlers.get(&kind).map_or(0, |h| h.len())
    }

    /// Run every handler for the message's type. A failing handler is
    /// logged and the rest still run. Returns how many handlers ran.
    pub fn dispatch(&self, msg: &Message) -> usize {
        let Some(kind) = msg.message_type() else {
            trace!(msg_id = msg.msg_id, "no handlers for message type");
            return 0;
        };
        // Clone out so handlers may subscribe without deadlocking the shard.
        let handlers: Vec<Handler> = self
            .handlers
            .get(&kind)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        for handler in &handlers {
            if let Err(e) = handler(msg) {
                error!(error = %e, message_type = %kind, "message handler failed");
            }
        }
        handlers.len()
    }
}
