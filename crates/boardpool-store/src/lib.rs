//! Persistence contract for boardpool.
//!
//! The state machine engine and the concrete lifecycle machines consume
//! storage only through the traits in this crate:
//!
//! - [`StateStore`]: the per-machine-type contract: persisted state,
//!   timeout, counters, the timed-out query, and the per-entity log sink
//! - [`DeviceStore`]: device inventory queries (relay coordinates, FQDNs,
//!   availability)
//! - [`RequestStore`]: allocation bookkeeping (specs, reservations, expiry)
//!
//! A production backend (SQL, KV, ...) lives outside this workspace and
//! implements these traits; [`MemStore`] is the in-memory reference
//! implementation used by the test suites and by embedders that do not need
//! durability. Reservation uniqueness (at most one device per request and
//! one request per device) is the store's job, not the machines'.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::{MemDeviceStore, MemRequestStore, MemStore};
pub use types::{LogEntry, PersistedState, RequestSpec, RequestedDevice};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use boardpool_core::RelayCoordinate;

/// The persistence contract consumed by the state machine engine, scoped to
/// one machine type (devices or requests).
pub trait StateStore: Send + Sync {
    /// Fetch the persisted state tuple for an entity.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the entity does not exist.
    fn get_state(&self, name: &str) -> Result<PersistedState>;

    /// Persist a new state and timeout deadline for an entity.
    ///
    /// Every transition rewrites both fields; a state without a declared
    /// timeout clears the deadline.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the entity does not exist.
    fn set_state(&self, name: &str, state: &str, timeout: Option<DateTime<Utc>>) -> Result<()>;

    /// Replace the persisted counters map for an entity.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the entity does not exist.
    fn set_counters(&self, name: &str, counters: &HashMap<String, u32>) -> Result<()>;

    /// Names of entities owned by `server_id` whose timeout deadline has
    /// elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    fn list_timed_out(&self, server_id: &str) -> Result<Vec<String>>;

    /// Append a line to the entity's log stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    fn log_append(&self, name: &str, message: &str, source: &str) -> Result<()>;
}

/// Device inventory queries used by the device lifecycle machine and by
/// device allocation.
pub trait DeviceStore: StateStore {
    /// The relay coordinate controlling the device's power, if configured.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the device does not exist.
    fn relay_coordinate(&self, device: &str) -> Result<Option<RelayCoordinate>>;

    /// The device's fully qualified domain name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the device does not exist.
    fn fqdn(&self, device: &str) -> Result<String>;

    /// Names of unreserved, ready devices matching the environment and the
    /// requested-device constraint.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    fn list_available(&self, environment: &str, requested: &RequestedDevice)
        -> Result<Vec<String>>;
}

/// Allocation-request bookkeeping used by the request lifecycle machine.
pub trait RequestStore: StateStore {
    /// What the request asked for.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the request does not exist.
    fn request_spec(&self, request: &str) -> Result<RequestSpec>;

    /// Atomically reserve `device` for `request`. Returns false if either
    /// side already holds a reservation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the request or device is unknown.
    fn reserve_device(&self, request: &str, device: &str) -> Result<bool>;

    /// The device currently reserved for the request, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the request does not exist.
    fn assigned_device(&self, request: &str) -> Result<Option<String>>;

    /// Release the request's reservation, if it holds one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the request does not exist.
    fn clear_reservation(&self, request: &str) -> Result<()>;

    /// Names of open requests owned by `server_id` whose lifetime has
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    fn list_expired(&self, server_id: &str) -> Result<Vec<String>>;
}
