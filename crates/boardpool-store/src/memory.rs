//! In-memory reference implementation of the storage contract.
//!
//! [`MemStore`] keeps every record behind one mutex and hands out device and
//! request views sharing that interior, so reservation bookkeeping stays
//! consistent across both halves. It backs the workspace test suites and is
//! good enough for embedders that do not need durability.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use boardpool_core::RelayCoordinate;

use crate::error::{Result, StoreError};
use crate::types::{LogEntry, PersistedState, RequestSpec, RequestedDevice};
use crate::{DeviceStore, RequestStore, StateStore};

#[derive(Debug)]
struct DeviceRow {
    state: PersistedState,
    environment: String,
    server_id: String,
    relay: Option<RelayCoordinate>,
    fqdn: String,
    reserved_by: Option<String>,
}

#[derive(Debug)]
struct RequestRow {
    state: PersistedState,
    spec: RequestSpec,
    server_id: String,
    expires_at: Option<DateTime<Utc>>,
    assigned: Option<String>,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, DeviceRow>,
    requests: HashMap<String, RequestRow>,
    logs: Vec<LogEntry>,
}

impl Inner {
    fn device(&self, name: &str) -> Result<&DeviceRow> {
        self.devices
            .get(name)
            .ok_or_else(|| StoreError::not_found("device", name))
    }

    fn device_mut(&mut self, name: &str) -> Result<&mut DeviceRow> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found("device", name))
    }

    fn request(&self, name: &str) -> Result<&RequestRow> {
        self.requests
            .get(name)
            .ok_or_else(|| StoreError::not_found("request", name))
    }

    fn request_mut(&mut self, name: &str) -> Result<&mut RequestRow> {
        self.requests
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found("request", name))
    }

    fn log(&mut self, name: &str, message: &str, source: &str) {
        self.logs.push(LogEntry {
            name: name.to_owned(),
            message: message.to_owned(),
            source: source.to_owned(),
            at: Utc::now(),
        });
    }
}

/// The in-memory store. Clone-cheap; all clones share the same records.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The device-side view, implementing [`DeviceStore`].
    #[must_use]
    pub fn devices(&self) -> MemDeviceStore {
        MemDeviceStore {
            inner: Arc::clone(&self.inner),
        }
    }

    /// The request-side view, implementing [`RequestStore`].
    #[must_use]
    pub fn requests(&self) -> MemRequestStore {
        MemRequestStore {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Register a device in state `new`. The FQDN defaults to the name.
    pub fn add_device(
        &self,
        name: &str,
        environment: &str,
        server_id: &str,
        relay: Option<RelayCoordinate>,
    ) {
        self.inner.lock().devices.insert(
            name.to_owned(),
            DeviceRow {
                state: PersistedState::new("new"),
                environment: environment.to_owned(),
                server_id: server_id.to_owned(),
                relay,
                fqdn: name.to_owned(),
                reserved_by: None,
            },
        );
    }

    /// Register an allocation request in state `new`.
    pub fn add_request(
        &self,
        name: &str,
        spec: RequestSpec,
        server_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.inner.lock().requests.insert(
            name.to_owned(),
            RequestRow {
                state: PersistedState::new("new"),
                spec,
                server_id: server_id.to_owned(),
                expires_at,
                assigned: None,
            },
        );
    }

    /// Snapshot of every log line written so far.
    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.lock().logs.clone()
    }

    /// Snapshot of the log lines for one entity.
    #[must_use]
    pub fn logs_for(&self, name: &str) -> Vec<LogEntry> {
        self.inner
            .lock()
            .logs
            .iter()
            .filter(|entry| entry.name == name)
            .cloned()
            .collect()
    }
}

/// Device-side view of a [`MemStore`].
#[derive(Clone)]
pub struct MemDeviceStore {
    inner: Arc<Mutex<Inner>>,
}

/// Request-side view of a [`MemStore`].
#[derive(Clone)]
pub struct MemRequestStore {
    inner: Arc<Mutex<Inner>>,
}

impl StateStore for MemDeviceStore {
    fn get_state(&self, name: &str) -> Result<PersistedState> {
        Ok(self.inner.lock().device(name)?.state.clone())
    }

    fn set_state(&self, name: &str, state: &str, timeout: Option<DateTime<Utc>>) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.device_mut(name)?;
        row.state.state = state.to_owned();
        row.state.timeout = timeout;
        Ok(())
    }

    fn set_counters(&self, name: &str, counters: &HashMap<String, u32>) -> Result<()> {
        self.inner.lock().device_mut(name)?.state.counters = counters.clone();
        Ok(())
    }

    fn list_timed_out(&self, server_id: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .devices
            .iter()
            .filter(|(_, row)| {
                row.server_id == server_id && row.state.timeout.is_some_and(|at| at <= now)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn log_append(&self, name: &str, message: &str, source: &str) -> Result<()> {
        self.inner.lock().log(name, message, source);
        Ok(())
    }
}

impl DeviceStore for MemDeviceStore {
    fn relay_coordinate(&self, device: &str) -> Result<Option<RelayCoordinate>> {
        Ok(self.inner.lock().device(device)?.relay.clone())
    }

    fn fqdn(&self, device: &str) -> Result<String> {
        Ok(self.inner.lock().device(device)?.fqdn.clone())
    }

    fn list_available(
        &self,
        environment: &str,
        requested: &RequestedDevice,
    ) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .devices
            .iter()
            .filter(|(name, row)| {
                row.reserved_by.is_none()
                    && row.state.state == "ready"
                    && row.environment == environment
                    && match requested {
                        RequestedDevice::Any => true,
                        RequestedDevice::Specific(wanted) => *name == wanted,
                    }
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

impl StateStore for MemRequestStore {
    fn get_state(&self, name: &str) -> Result<PersistedState> {
        Ok(self.inner.lock().request(name)?.state.clone())
    }

    fn set_state(&self, name: &str, state: &str, timeout: Option<DateTime<Utc>>) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.request_mut(name)?;
        row.state.state = state.to_owned();
        row.state.timeout = timeout;
        Ok(())
    }

    fn set_counters(&self, name: &str, counters: &HashMap<String, u32>) -> Result<()> {
        self.inner.lock().request_mut(name)?.state.counters = counters.clone();
        Ok(())
    }

    fn list_timed_out(&self, server_id: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .requests
            .iter()
            .filter(|(_, row)| {
                row.server_id == server_id && row.state.timeout.is_some_and(|at| at <= now)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn log_append(&self, name: &str, message: &str, source: &str) -> Result<()> {
        self.inner.lock().log(name, message, source);
        Ok(())
    }
}

impl RequestStore for MemRequestStore {
    fn request_spec(&self, request: &str) -> Result<RequestSpec> {
        Ok(self.inner.lock().request(request)?.spec.clone())
    }

    fn reserve_device(&self, request: &str, device: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.request(request)?.assigned.is_some() {
            return Ok(false);
        }
        if inner.device(device)?.reserved_by.is_some() {
            return Ok(false);
        }
        inner.request_mut(request)?.assigned = Some(device.to_owned());
        inner.device_mut(device)?.reserved_by = Some(request.to_owned());
        Ok(true)
    }

    fn assigned_device(&self, request: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().request(request)?.assigned.clone())
    }

    fn clear_reservation(&self, request: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let assigned = inner.request_mut(request)?.assigned.take();
        if let Some(device) = assigned {
            if let Some(row) = inner.devices.get_mut(&device) {
                if row.reserved_by.as_deref() == Some(request) {
                    row.reserved_by = None;
                }
            }
        }
        Ok(())
    }

    fn list_expired(&self, server_id: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .requests
            .iter()
            .filter(|(_, row)| {
                row.server_id == server_id
                    && row.state.state != "closed"
                    && row.state.state != "expired"
                    && row.expires_at.is_some_and(|at| at <= now)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
