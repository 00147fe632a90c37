//! Contacting a device's owning driver.

use async_trait::async_trait;
use thiserror::Error;

/// Failure to reach the device's owner.
#[derive(Debug, Error)]
#[error("could not contact device owner: {0}")]
pub struct OwnerContactError(pub String);

/// How the request machine asks a device's owning driver to begin recovery.
///
/// In a deployment this is a call across to the imaging server that owns
/// the device; the transport is the interface layer's business. Contact
/// failures are retried by the `contacting_device_owner` state up to its
/// escalation threshold.
#[async_trait]
pub trait DeviceOwnerClient: Send + Sync {
    /// Ask the owner to power-cycle the device in preparation for handover.
    ///
    /// # Errors
    ///
    /// Returns an `OwnerContactError` if the owner could not be reached.
    async fn request_power_cycle(&self, device: &str) -> Result<(), OwnerContactError>;
}
