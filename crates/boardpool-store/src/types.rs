//! Persisted record types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The machine-relevant fields persisted for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// Current state name.
    pub state: String,
    /// Absolute deadline for the state's timeout, if the state declares one.
    pub timeout: Option<DateTime<Utc>>,
    /// Retry/failure tallies, keyed by state name.
    pub counters: HashMap<String, u32>,
}

impl PersistedState {
    /// A fresh record in the given state with no timeout or counters.
    #[must_use]
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            timeout: None,
            counters: HashMap::new(),
        }
    }
}

/// Which device an allocation request asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestedDevice {
    /// Any free device in the requested environment.
    Any,
    /// One specific device, by name.
    Specific(String),
}

impl RequestedDevice {
    /// Returns true for the `Any` form.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<String> for RequestedDevice {
    fn from(value: String) -> Self {
        if value == "any" {
            Self::Any
        } else {
            Self::Specific(value)
        }
    }
}

impl From<RequestedDevice> for String {
    fn from(value: RequestedDevice) -> Self {
        match value {
            RequestedDevice::Any => "any".to_string(),
            RequestedDevice::Specific(name) => name,
        }
    }
}

/// What an allocation request asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    /// The requested device, or `any`.
    pub requested: RequestedDevice,
    /// Environment the device must belong to.
    pub environment: String,
}

/// One line of an entity's append-only log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Entity the line belongs to.
    pub name: String,
    /// The message.
    pub message: String,
    /// Which subsystem wrote it (e.g. `statemachine`).
    pub source: String,
    /// When it was written.
    pub at: DateTime<Utc>,
}
