//! Core types and utilities for boardpool.
//!
//! This crate provides the foundational pieces shared by the rest of the
//! workspace:
//!
//! - **Error types**: the common failure taxonomy (timeouts, bad coordinates)
//! - **Named locks**: per-name mutual exclusion used for entities and relay hosts
//! - **Relay coordinates**: the `host:bankN:relayM` addressing for power relays
//! - **Async operations**: bounded-time wrappers around slow hardware calls
//! - **Configuration**: the read-only runtime settings consumed by the core
//!
//! # Example
//!
//! ```
//! use boardpool_core::RelayCoordinate;
//!
//! let coord: RelayCoordinate = "relay-047.example.com:bank2:relay5".parse().unwrap();
//! assert_eq!(coord.bank, 2);
//! assert_eq!(coord.relay, 5);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod asyncop;
pub mod config;
pub mod coordinate;
pub mod error;
pub mod locks;

pub use asyncop::AsyncOp;
pub use config::PoolConfig;
pub use coordinate::RelayCoordinate;
pub use error::{CoreError, Result};
pub use locks::LocksByName;
