//! Generic persistent state machine engine and polling driver.
//!
//! Each device and each allocation request is an *entity* governed by a
//! state machine whose state, timeout deadline, and retry counters live in
//! the persistence layer. This crate provides the machinery shared by the
//! concrete machines:
//!
//! - [`StateGraph`] / [`StateDef`] / [`HandlerSet`]: explicit, build-time
//!   registration of state variants, their event handlers, entry/exit
//!   hooks, and at most one timeout handler each
//! - [`StateMachine`]: loads an entity's persisted state, dispatches events
//!   and timeouts to the matching variant under a per-entity lock, and
//!   persists transitions made through [`Ctx::goto_state`]
//! - [`StateDriver`]: the polling loop that turns wall-clock time into
//!   timeout deliveries, with a watchdog that kills the process if a tick
//!   wedges
//! - [`EventSender`]: the channel background completions use to re-enter
//!   the machine
//!
//! # Architecture
//!
//! ```text
//!   external caller ──► handle_event(name, event, args) ─┐
//!                                                        ▼
//!   StateDriver tick ──► handle_timeout(name) ──► StateMachine
//!                                                        │ lock(name)
//!                                                        ▼
//!                                       variant handler ──► goto_state
//!                                                        │
//!                                                        ▼
//!                                                  StateStore
//! ```
//!
//! Handlers are synchronous; slow hardware work is started fire-and-forget
//! through `boardpool_core::AsyncOp`, and its completions come back in
//! through the event channel.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod driver;
pub mod error;
pub mod events;
pub mod graph;
pub mod machine;

pub use driver::{DriverConfig, DriverStatus, PollHook, StateDriver};
pub use error::{MachineError, Result};
pub use events::{EventSender, QueuedEvent};
pub use graph::{HandlerSet, StateDef, StateGraph};
pub use machine::{Ctx, StateMachine};
