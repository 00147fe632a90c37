//! The allocation-request state machine.
//!
//! ```text
//! new ──find_device──► finding_device ──reserved──► contacting_device_owner
//!                        │        ▲                     │
//!                        │        └── preparation stuck │ contacted
//!                        ▼                              ▼
//!             failed_device_not_found               pending ──device ready──► ready
//!             failed_device_busy
//!
//!   (every non-terminal state, and ready: close ──► closed, expire ──► expired)
//! ```
//!
//! Finding distinguishes "any device" requests (many cheap retries) from
//! "this specific device" requests (give up quickly with a busy verdict).
//! Terminal states release the device reservation on entry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use boardpool_core::AsyncOp;
use boardpool_machine::{Ctx, EventSender, HandlerSet, Result, StateDef, StateGraph, StateMachine};
use boardpool_store::{DeviceStore, RequestStore, RequestedDevice};

use crate::owner::DeviceOwnerClient;

/// State names used by the request machine.
pub mod states {
    /// Created; no action taken yet.
    pub const NEW: &str = "new";
    /// State tag not recognized; can still be closed.
    pub const UNKNOWN: &str = "unknown";
    /// Looking for a free device and trying to reserve it.
    pub const FINDING_DEVICE: &str = "finding_device";
    /// Asking the assigned device's owning driver to begin recovery.
    pub const CONTACTING_DEVICE_OWNER: &str = "contacting_device_owner";
    /// Waiting for the assigned device to become serviceable.
    pub const PENDING: &str = "pending";
    /// Device prepared and handed over.
    pub const READY: &str = "ready";
    /// Returned by the requester.
    pub const CLOSED: &str = "closed";
    /// Lifetime ran out.
    pub const EXPIRED: &str = "expired";
    /// No working unreserved device could be found.
    pub const FAILED_DEVICE_NOT_FOUND: &str = "failed_device_not_found";
    /// The specifically requested device is already reserved.
    pub const FAILED_DEVICE_BUSY: &str = "failed_device_busy";
}

/// Event names accepted by the request machine.
pub mod events {
    /// Start looking for a device.
    pub const FIND_DEVICE: &str = "find_device";
    /// Return the device and close the request.
    pub const CLOSE: &str = "close";
    /// The request's lifetime ran out.
    pub const EXPIRE: &str = "expire";
    /// The device owner acknowledged the recovery request.
    pub const DEVICE_OWNER_CONTACTED: &str = "device_owner_contacted";
    /// Self-report that the assigned device is serviceable.
    pub const DEVICE_READY: &str = "device_ready";
}

/// Device machine state meaning the device is serviceable.
const DEVICE_READY_STATE: &str = "ready";

/// Timeouts and escalation thresholds for the request machine.
#[derive(Debug, Clone)]
pub struct RequestMachineConfig {
    /// Delay between device-finding attempts.
    pub finding_timeout: Duration,
    /// Finding attempts for an any-device request before giving up.
    pub max_any_attempts: u32,
    /// Finding attempts for a specific-device request before declaring it
    /// busy.
    pub max_specific_attempts: u32,
    /// How long to wait for the device owner to acknowledge.
    pub contact_timeout: Duration,
    /// Contact attempts before giving up on the device.
    pub contact_failure_limit: u32,
    /// How often to poll the assigned device while pending.
    pub pending_poll_interval: Duration,
    /// Pending polls (any-device requests only) before assuming the
    /// preparation is stuck and finding another device.
    pub pending_failure_limit: u32,
}

impl Default for RequestMachineConfig {
    fn default() -> Self {
        Self {
            finding_timeout: Duration::from_secs(10),
            max_any_attempts: 60,
            max_specific_attempts: 2,
            contact_timeout: Duration::from_secs(30),
            contact_failure_limit: 5,
            pending_poll_interval: Duration::from_secs(60),
            pending_failure_limit: 20,
        }
    }
}

/// Shared context available to every request state handler.
pub struct RequestDomain {
    pub(crate) requests: Arc<dyn RequestStore>,
    pub(crate) devices: Arc<dyn DeviceStore>,
    pub(crate) owner: Arc<dyn DeviceOwnerClient>,
    pub(crate) sender: EventSender,
    pub(crate) contact_timeout: Duration,
}

/// The request machine type.
pub type RequestMachine = StateMachine<RequestDomain>;

/// Build the request machine over the given stores and owner client.
/// Background completions re-enter through `sender`.
pub fn request_machine<R, D>(
    requests: Arc<R>,
    devices: Arc<D>,
    owner: Arc<dyn DeviceOwnerClient>,
    sender: EventSender,
    config: &RequestMachineConfig,
) -> RequestMachine
where
    R: RequestStore + 'static,
    D: DeviceStore + 'static,
{
    let storage: Arc<dyn boardpool_store::StateStore> = requests.clone();
    StateMachine::new(
        "request",
        graph(config),
        storage,
        RequestDomain {
            requests,
            devices,
            owner,
            sender,
            contact_timeout: config.contact_timeout,
        },
    )
}

fn graph(config: &RequestMachineConfig) -> StateGraph<RequestDomain> {
    let closable = HandlerSet::new("closable")
        .on_event(events::CLOSE, |ctx, _| {
            ctx.log("request closed");
            ctx.goto_state(states::CLOSED)
        })
        .on_event(events::EXPIRE, |ctx, _| {
            ctx.log("request expired");
            ctx.goto_state(states::EXPIRED)
        });

    let max_any = config.max_any_attempts;
    let max_specific = config.max_specific_attempts;
    let contact_failure_limit = config.contact_failure_limit;
    let pending_failure_limit = config.pending_failure_limit;

    StateGraph::builder()
        .state(
            StateDef::new(states::NEW)
                .include(&closable)
                .on_event(events::FIND_DEVICE, |ctx, _| {
                    ctx.goto_state(states::FINDING_DEVICE)
                }),
        )
        .state(StateDef::new(states::UNKNOWN).include(&closable))
        .state(
            StateDef::new(states::FINDING_DEVICE)
                .include(&closable)
                .timeout(config.finding_timeout)
                .on_entry(move |ctx| find_device(ctx, max_any, max_specific))
                .on_timeout(|ctx| ctx.goto_state(states::FINDING_DEVICE)),
        )
        .state(
            StateDef::new(states::CONTACTING_DEVICE_OWNER)
                .include(&closable)
                .timeout(config.contact_timeout)
                .on_entry(enter_contacting)
                .on_timeout(move |ctx| {
                    if ctx.increment_counter(states::CONTACTING_DEVICE_OWNER)?
                        >= contact_failure_limit
                    {
                        ctx.clear_counter(Some(states::CONTACTING_DEVICE_OWNER))?;
                        ctx.log("device owner unreachable; giving up");
                        ctx.goto_state(states::FAILED_DEVICE_NOT_FOUND)
                    } else {
                        ctx.goto_state(states::CONTACTING_DEVICE_OWNER)
                    }
                })
                .on_event(events::DEVICE_OWNER_CONTACTED, |ctx, _| {
                    ctx.goto_state(states::PENDING)
                }),
        )
        .state(
            StateDef::new(states::PENDING)
                .include(&closable)
                .timeout(config.pending_poll_interval)
                .on_timeout(move |ctx| pending_timeout(ctx, pending_failure_limit))
                .on_event(events::DEVICE_READY, |ctx, _| {
                    if device_is_ready(ctx)? {
                        ctx.log("assigned device is ready");
                        ctx.goto_state(states::READY)
                    } else {
                        Ok(())
                    }
                }),
        )
        .state(StateDef::new(states::READY).include(&closable))
        .state(StateDef::new(states::CLOSED).on_entry(release_reservation))
        .state(
            StateDef::new(states::EXPIRED)
                .include(&closable)
                .on_entry(release_reservation),
        )
        .state(
            StateDef::new(states::FAILED_DEVICE_NOT_FOUND).on_entry(release_reservation),
        )
        .state(StateDef::new(states::FAILED_DEVICE_BUSY).on_entry(release_reservation))
        .build()
}

/// One attempt to assign a device: clear any stale reservation, list the
/// free candidates, reserve one. Failure to find anything either waits for
/// the state timeout (retry) or escalates once the attempt budget is spent.
fn find_device(ctx: &mut Ctx<'_, RequestDomain>, max_any: u32, max_specific: u32) -> Result<()> {
    let count = ctx.increment_counter(states::FINDING_DEVICE)?;
    let name = ctx.name().to_owned();
    let (requests, devices) = {
        let domain = ctx.domain();
        (Arc::clone(&domain.requests), Arc::clone(&domain.devices))
    };

    requests.clear_reservation(&name)?;
    let spec = requests.request_spec(&name)?;
    let candidates = devices.list_available(&spec.environment, &spec.requested)?;

    if candidates.is_empty() {
        match &spec.requested {
            RequestedDevice::Any => {
                if count >= max_any {
                    ctx.log("no free device after repeated attempts; giving up");
                    return ctx.goto_state(states::FAILED_DEVICE_NOT_FOUND);
                }
            }
            RequestedDevice::Specific(wanted) => {
                if count >= max_specific {
                    ctx.log(&format!("requested device {wanted} is busy"));
                    return ctx.goto_state(states::FAILED_DEVICE_BUSY);
                }
            }
        }
        // Wait for the state timeout and try again.
        return Ok(());
    }

    // Rotate across retries instead of herding every request onto the same
    // candidate.
    let index = (count as usize - 1) % candidates.len();
    let device = candidates[index].clone();
    ctx.log(&format!("assigning device {device}"));
    if requests.reserve_device(&name, &device)? {
        return ctx.goto_state(states::CONTACTING_DEVICE_OWNER);
    }
    // Another request raced us to it; retry on the next timeout.
    ctx.log(&format!("device {device} was taken from under us"));
    Ok(())
}

/// Check the assignment still holds and the device is serviceable, then
/// fire off the owner notification; the acknowledgement comes back as a
/// `device_owner_contacted` event.
fn enter_contacting(ctx: &mut Ctx<'_, RequestDomain>) -> Result<()> {
    let name = ctx.name().to_owned();
    let (requests, devices, owner, sender, contact_timeout) = {
        let domain = ctx.domain();
        (
            Arc::clone(&domain.requests),
            Arc::clone(&domain.devices),
            Arc::clone(&domain.owner),
            domain.sender.clone(),
            domain.contact_timeout,
        )
    };

    let Some(device) = requests.assigned_device(&name)? else {
        ctx.log("reservation disappeared; finding another device");
        return ctx.goto_state(states::FINDING_DEVICE);
    };
    let device_state = devices.get_state(&device)?.state;
    if device_state != DEVICE_READY_STATE {
        ctx.log(&format!(
            "assigned device {device} is in unexpected state {device_state}"
        ));
        return ctx.goto_state(states::FINDING_DEVICE);
    }

    // There is a small window between this check and the owner acting on
    // the notification; the pending timeout catches that rare race.
    ctx.log(&format!("asking device owner to recover {device}"));
    AsyncOp::new(contact_timeout).start(
        async move {
            match owner.request_power_cycle(&device).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(device = %device, %error, "device owner contact failed");
                    false
                }
            }
        },
        move |contacted| {
            if contacted {
                sender.send(&name, events::DEVICE_OWNER_CONTACTED, Value::Null);
            }
        },
    );
    Ok(())
}

/// Poll the assigned device. Specific-device requests wait as long as it
/// takes; any-device requests give up on a stuck preparation and go find
/// another device.
fn pending_timeout(ctx: &mut Ctx<'_, RequestDomain>, failure_limit: u32) -> Result<()> {
    if device_is_ready(ctx)? {
        ctx.log("assigned device is ready");
        return ctx.goto_state(states::READY);
    }

    let requests = Arc::clone(&ctx.domain().requests);
    let spec = requests.request_spec(ctx.name())?;
    if !spec.requested.is_any() {
        return ctx.goto_state(states::PENDING);
    }

    if ctx.increment_counter(states::PENDING)? < failure_limit {
        ctx.goto_state(states::PENDING)
    } else {
        ctx.log("device preparation seems stuck; finding another device");
        ctx.goto_state(states::FINDING_DEVICE)
    }
}

fn device_is_ready(ctx: &Ctx<'_, RequestDomain>) -> Result<bool> {
    let (requests, devices) = {
        let domain = ctx.domain();
        (Arc::clone(&domain.requests), Arc::clone(&domain.devices))
    };
    let Some(device) = requests.assigned_device(ctx.name())? else {
        return Ok(false);
    };
    Ok(devices.get_state(&device)?.state == DEVICE_READY_STATE)
}

fn release_reservation(ctx: &mut Ctx<'_, RequestDomain>) -> Result<()> {
    let requests = Arc::clone(&ctx.domain().requests);
    requests.clear_reservation(ctx.name())?;
    Ok(())
}
