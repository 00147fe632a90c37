//! The device driver: machine, hardware, event channel, and polling loop
//! wired together.

use std::sync::Arc;

use serde_json::Value;

use boardpool_machine::{
    events, DriverConfig, DriverStatus, EventSender, Result, StateDriver,
};
use boardpool_store::DeviceStore;

use crate::device_machine::{device_machine, DeviceDomain, DeviceMachine, DeviceMachineConfig};
use crate::hardware::HardwareApi;

/// Owns one server's device machines and their polling loop.
pub struct LifeguardDriver {
    machine: Arc<DeviceMachine>,
    driver: StateDriver<DeviceDomain>,
    sender: EventSender,
}

impl LifeguardDriver {
    /// Wire up the device machine and its driver.
    pub fn new<D>(
        store: Arc<D>,
        hardware: Arc<HardwareApi>,
        driver_config: DriverConfig,
        machine_config: &DeviceMachineConfig,
    ) -> Self
    where
        D: DeviceStore + 'static,
    {
        let (sender, receiver) = events::channel();
        let machine = Arc::new(device_machine(
            store,
            hardware,
            sender.clone(),
            machine_config,
        ));
        let driver = StateDriver::new(Arc::clone(&machine), driver_config)
            .with_event_receiver(receiver);
        Self {
            machine,
            driver,
            sender,
        }
    }

    /// Start polling.
    pub fn start(&self) {
        self.driver.start();
    }

    /// Stop polling, letting the in-flight tick finish.
    pub async fn stop(&self) {
        self.driver.stop().await;
    }

    /// Driver lifecycle state.
    #[must_use]
    pub fn status(&self) -> DriverStatus {
        self.driver.status()
    }

    /// The device machine itself.
    #[must_use]
    pub fn machine(&self) -> &Arc<DeviceMachine> {
        &self.machine
    }

    /// A handle for queueing events from outside (self-reports, admin
    /// actions).
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Deliver an event to a device.
    ///
    /// # Errors
    ///
    /// See `StateMachine::handle_event`.
    pub fn handle_event(&self, device: &str, event: &str, args: &Value) -> Result<()> {
        self.driver.handle_event(device, event, args)
    }

    /// Deliver a timeout to a device (administrative use).
    ///
    /// # Errors
    ///
    /// See `StateMachine::handle_timeout`.
    pub fn handle_timeout(&self, device: &str) -> Result<()> {
        self.driver.handle_timeout(device)
    }

    /// Transition a device only if it is in the expected state.
    ///
    /// # Errors
    ///
    /// See `StateMachine::conditional_state_change`.
    pub fn conditional_state_change(
        &self,
        device: &str,
        old_state: &str,
        new_state: &str,
    ) -> Result<bool> {
        self.driver.conditional_state_change(device, old_state, new_state)
    }
}
