//! Event re-entry channel.
//!
//! Background work (a power cycle, an owner notification) finishes on some
//! tokio task long after the handler that started it returned. Completions
//! are turned back into machine events through this channel; the driver
//! runs the receiving dispatch task.

use serde_json::Value;
use tokio::sync::mpsc;

/// An event waiting to be delivered to the machine.
#[derive(Debug)]
pub struct QueuedEvent {
    /// Target entity name.
    pub name: String,
    /// Event name.
    pub event: String,
    /// Event arguments.
    pub args: Value,
}

/// Sending half of the event channel. Cheap to clone; handlers capture one
/// into the callbacks they hand to background operations.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<QueuedEvent>,
}

impl EventSender {
    /// Queue an event for dispatch. Never blocks; if the dispatcher has
    /// stopped the event is dropped with a warning, matching the
    /// fire-and-forget contract of the operations that produce these.
    pub fn send(&self, name: &str, event: &str, args: Value) {
        let queued = QueuedEvent {
            name: name.to_owned(),
            event: event.to_owned(),
            args,
        };
        if self.tx.send(queued).is_err() {
            tracing::warn!(
                entity = name,
                event,
                "event dropped; dispatcher is not running"
            );
        }
    }
}

/// Create an event channel. The receiver goes to the driver
/// (`StateDriver::with_event_receiver`); the sender goes into the machine's
/// domain context.
#[must_use]
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<QueuedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
