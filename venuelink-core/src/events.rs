//! Consumer event dispatch

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{BalanceDelta, DepthSnapshot, OrderEvent, Pair};

/// Event categories a consumer can attach a handler to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Depth,
    Balance,
    Order,
}

/// Payload delivered to a registered handler.
#[derive(Clone, Debug)]
pub enum ConnectorEvent {
    Depth { pair: Pair, depth: DepthSnapshot },
    Balance { deltas: Vec<BalanceDelta> },
    Order { event: OrderEvent },
}

type Handler = Arc<dyn Fn(ConnectorEvent) + Send + Sync>;

/// Single-subscriber registry: exactly one handler per category, and
/// re-registration overwrites the previous handler. No queueing, no
/// replay, no back-pressure; handlers run synchronously on the task
/// delivering the frame, so a slow handler delays subsequent frames on
/// that connection. Known limitation of the design, not a bug.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Handler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, handler: impl Fn(ConnectorEvent) + Send + Sync + 'static) {
        self.handlers.write().insert(kind, Arc::new(handler));
    }

    /// No-op when nothing is registered for `kind`.
    pub fn emit(&self, kind: EventKind, event: ConnectorEvent) {
        // Clone the handler out so a handler that re-registers does not
        // deadlock against the registry lock.
        let handler = self.handlers.read().get(&kind).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}
