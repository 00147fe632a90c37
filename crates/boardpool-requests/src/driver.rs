//! The request driver: machine, expiry scan, event channel, and polling
//! loop wired together.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use boardpool_machine::{
    events as machine_events, DriverConfig, DriverStatus, EventSender, PollHook, Result,
    StateDriver,
};
use boardpool_store::{DeviceStore, RequestStore};

use crate::owner::DeviceOwnerClient;
use crate::request_machine::{
    events, request_machine, RequestDomain, RequestMachine, RequestMachineConfig,
};

/// Owns one server's request machines and their polling loop.
pub struct RequestDriver {
    machine: Arc<RequestMachine>,
    driver: StateDriver<RequestDomain>,
    sender: EventSender,
}

impl RequestDriver {
    /// Wire up the request machine and its driver. Each polling pass also
    /// expires requests whose lifetime has run out.
    pub fn new<R, D>(
        requests: Arc<R>,
        devices: Arc<D>,
        owner: Arc<dyn DeviceOwnerClient>,
        driver_config: DriverConfig,
        machine_config: &RequestMachineConfig,
    ) -> Self
    where
        R: RequestStore + 'static,
        D: DeviceStore + 'static,
    {
        let (sender, receiver) = machine_events::channel();
        let machine = Arc::new(request_machine(
            Arc::clone(&requests),
            devices,
            owner,
            sender.clone(),
            machine_config,
        ));
        let expiry = Arc::new(ExpiryScan {
            machine: Arc::clone(&machine),
            requests,
            server_id: driver_config.server_id.clone(),
        });
        let driver = StateDriver::new(Arc::clone(&machine), driver_config)
            .with_event_receiver(receiver)
            .with_poll_hook(expiry);
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

    /// The request machine itself.
    #[must_use]
    pub fn machine(&self) -> &Arc<RequestMachine> {
        &self.machine
    }

    /// A handle for queueing events from outside.
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Deliver an event to a request.
    ///
    /// # Errors
    ///
    /// See `StateMachine::handle_event`.
    pub fn handle_event(&self, request: &str, event: &str, args: &Value) -> Result<()> {
        self.driver.handle_event(request, event, args)
    }

    /// Deliver a timeout to a request (administrative use).
    ///
    /// # Errors
    ///
    /// See `StateMachine::handle_timeout`.
    pub fn handle_timeout(&self, request: &str) -> Result<()> {
        self.driver.handle_timeout(request)
    }

    /// Transition a request only if it is in the expected state.
    ///
    /// # Errors
    ///
    /// See `StateMachine::conditional_state_change`.
    pub fn conditional_state_change(
        &self,
        request: &str,
        old_state: &str,
        new_state: &str,
    ) -> Result<bool> {
        self.driver.conditional_state_change(request, old_state, new_state)
    }
}

/// Per-tick scan delivering `expire` to requests past their lifetime.
struct ExpiryScan<R> {
    machine: Arc<RequestMachine>,
    requests: Arc<R>,
    server_id: String,
}

#[async_trait]
impl<R: RequestStore + 'static> PollHook for ExpiryScan<R> {
    async fn poll_others(&self) -> Result<()> {
        for request in self.requests.list_expired(&self.server_id)? {
            tracing::info!(request = %request, "request lifetime expired");
            if let Err(error) = self.machine.handle_event(&request, events::EXPIRE, &Value::Null)
            {
                tracing::error!(
                    request = %request,
                    %error,
                    "error while expiring request (ignored)"
                );
            }
        }
        Ok(())
    }
}
