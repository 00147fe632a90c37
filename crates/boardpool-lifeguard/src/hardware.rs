//! Hardware operations facade.
//!
//! A common access point for the slow, unreliable things we do to devices.
//! Each operation resolves the device's relay coordinate or boot
//! configuration through the store and is available in two forms, both
//! bounded by the operation's time budget:
//!
//! - `operation(device)`: run now, await the answer, time out hard
//! - `start_operation(device, callback)`: fire and forget; the callback
//!   sees the result only if it arrives before the deadline
//!
//! Failures (missing relay coordinate, protocol errors, timeouts) fold into
//! a `false` result; state handlers count those against retry budgets
//! rather than inspecting causes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use boardpool_core::{AsyncOp, CoreError};
use boardpool_relay::RelayClient;
use boardpool_store::DeviceStore;

/// Time budget for a power cycle, including both confirmations.
pub const POWER_CYCLE_BUDGET: Duration = Duration::from_secs(30);

/// Time budget for boot-configuration changes.
pub const PXE_BUDGET: Duration = Duration::from_secs(5);

/// Boot-configuration control failure.
#[derive(Debug, Error)]
#[error("boot configuration control failed: {0}")]
pub struct PxeError(pub String);

/// Narrow interface to whatever manages network-boot configuration.
///
/// The real implementation (TFTP symlinks, an HTTP config service, ...)
/// lives outside this workspace.
#[async_trait]
pub trait PxeControl: Send + Sync {
    /// Remove the device's boot configuration so it boots from internal
    /// storage.
    ///
    /// # Errors
    ///
    /// Returns a `PxeError` describing the failure.
    async fn clear_pxe(&self, device: &str) -> Result<(), PxeError>;
}

/// A [`PxeControl`] that does nothing, for pools without netboot.
pub struct NoopPxe;

#[async_trait]
impl PxeControl for NoopPxe {
    async fn clear_pxe(&self, _device: &str) -> Result<(), PxeError> {
        Ok(())
    }
}

/// The hardware operations facade.
pub struct HardwareApi {
    devices: Arc<dyn DeviceStore>,
    relay: Arc<RelayClient>,
    pxe: Arc<dyn PxeControl>,
    relay_timeout: Duration,
}

impl HardwareApi {
    /// Create a facade with the default time budgets.
    pub fn new(devices: Arc<dyn DeviceStore>, relay: Arc<RelayClient>, pxe: Arc<dyn PxeControl>) -> Self {
        Self {
            devices,
            relay,
            pxe,
            relay_timeout: POWER_CYCLE_BUDGET,
        }
    }

    /// Override the relay operation budget (from configuration).
    #[must_use]
    pub fn with_relay_timeout(mut self, relay_timeout: Duration) -> Self {
        self.relay_timeout = relay_timeout;
        self
    }

    fn powercycle_future(&self, device: String) -> impl Future<Output = bool> + Send + 'static {
        let devices = Arc::clone(&self.devices);
        let relay = Arc::clone(&self.relay);
        let timeout = self.relay_timeout;
        async move {
            let Some(coordinate) = lookup_coordinate(&devices, &device) else {
                return false;
            };
            match relay
                .powercycle(&coordinate.host, coordinate.bank, coordinate.relay, timeout)
                .await
            {
                Ok(confirmed) => confirmed,
                Err(error) => {
                    tracing::warn!(device = %device, %error, "power cycle failed");
                    false
                }
            }
        }
    }

    fn power_off_future(&self, device: String) -> impl Future<Output = bool> + Send + 'static {
        let devices = Arc::clone(&self.devices);
        let relay = Arc::clone(&self.relay);
        let timeout = self.relay_timeout;
        async move {
            let Some(coordinate) = lookup_coordinate(&devices, &device) else {
                return false;
            };
            match relay
                .set_status(
                    &coordinate.host,
                    coordinate.bank,
                    coordinate.relay,
                    false,
                    timeout,
                )
                .await
            {
                Ok(confirmed) => confirmed,
                Err(error) => {
                    tracing::warn!(device = %device, %error, "power off failed");
                    false
                }
            }
        }
    }

    fn clear_pxe_future(&self, device: String) -> impl Future<Output = bool> + Send + 'static {
        let pxe = Arc::clone(&self.pxe);
        async move {
            match pxe.clear_pxe(&device).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(device = %device, %error, "could not clear boot configuration");
                    false
                }
            }
        }
    }

    /// Power-cycle a device now; true means both halves confirmed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OperationTimeout` if the budget elapses first.
    pub async fn powercycle(&self, device: &str) -> Result<bool, CoreError> {
        AsyncOp::new(self.relay_timeout)
            .run(self.powercycle_future(device.to_owned()))
            .await
    }

    /// Start a power cycle in the background; the callback sees the success
    /// flag if it arrives within the budget.
    pub fn start_powercycle(&self, device: &str, callback: impl FnOnce(bool) + Send + 'static) {
        AsyncOp::new(self.relay_timeout).start(self.powercycle_future(device.to_owned()), callback);
    }

    /// Cut a device's power now.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OperationTimeout` if the budget elapses first.
    pub async fn power_off(&self, device: &str) -> Result<bool, CoreError> {
        AsyncOp::new(self.relay_timeout)
            .run(self.power_off_future(device.to_owned()))
            .await
    }

    /// Cut a device's power in the background.
    pub fn start_power_off(&self, device: &str, callback: impl FnOnce(bool) + Send + 'static) {
        AsyncOp::new(self.relay_timeout).start(self.power_off_future(device.to_owned()), callback);
    }

    /// Clear a device's boot configuration now.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OperationTimeout` if the budget elapses first.
    pub async fn clear_pxe(&self, device: &str) -> Result<bool, CoreError> {
        AsyncOp::new(PXE_BUDGET)
            .run(self.clear_pxe_future(device.to_owned()))
            .await
    }

    /// Clear a device's boot configuration in the background.
    pub fn start_clear_pxe(&self, device: &str, callback: impl FnOnce(bool) + Send + 'static) {
        AsyncOp::new(PXE_BUDGET).start(self.clear_pxe_future(device.to_owned()), callback);
    }
}

fn lookup_coordinate(
    devices: &Arc<dyn DeviceStore>,
    device: &str,
) -> Option<boardpool_core::RelayCoordinate> {
    match devices.relay_coordinate(device) {
        Ok(Some(coordinate)) => Some(coordinate),
        Ok(None) => {
            tracing::warn!(device, "no relay configured; cannot control power");
            None
        }
        Err(error) => {
            tracing::error!(device, %error, "could not look up relay coordinate");
            None
        }
    }
}
