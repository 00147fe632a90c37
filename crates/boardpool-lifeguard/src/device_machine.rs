//! The device lifecycle state machine.
//!
//! ```text
//!        reboot (any state)
//!   ┌──────────────────────────────┐
//!   ▼                              │
//! rebooting ──power-cycle-ok──► reboot_complete ──image-running──► ready ─┐
//!   │  ▲                          │                                  ▲    │ self-check
//!   │  └── timeout (< limit) ◄────┘ timeout (< limit)                └────┘ timeout
//!   │
//!   │ timeout (> limit)            timeout (> limit)
//!   ▼                              ▼
//! failed_reboot_rebooting      failed_reboot_complete
//! ```
//!
//! Retries never loop forever: each retrying state counts its timeouts in a
//! persisted counter and escalates to its `failed_*` state past the
//! configured limit. The failed states are inert; only an explicit
//! `reboot` event leaves them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use boardpool_machine::{Ctx, EventSender, HandlerSet, Result, StateDef, StateGraph, StateMachine};
use boardpool_store::DeviceStore;

use crate::hardware::HardwareApi;

/// State names used by the device machine.
pub mod states {
    /// Newly enrolled, awaiting instructions.
    pub const NEW: &str = "new";
    /// State tag not recognized; awaiting instructions.
    pub const UNKNOWN: &str = "unknown";
    /// Production-ready; periodically self-checks.
    pub const READY: &str = "ready";
    /// Power cycle in progress.
    pub const REBOOTING: &str = "rebooting";
    /// Power cycle finished; waiting for the image to report in.
    pub const REBOOT_COMPLETE: &str = "reboot_complete";
    /// Power cycling failed repeatedly.
    pub const FAILED_REBOOT_REBOOTING: &str = "failed_reboot_rebooting";
    /// Power cycles completed but the image never came up.
    pub const FAILED_REBOOT_COMPLETE: &str = "failed_reboot_complete";
}

/// Event names accepted by the device machine.
pub mod events {
    /// Request a power cycle, from any state.
    pub const REBOOT: &str = "reboot";
    /// A background power cycle confirmed both halves.
    pub const POWER_CYCLE_OK: &str = "power-cycle-ok";
    /// The device's image reported in.
    pub const IMAGE_RUNNING: &str = "image-running";
    /// Periodic self-check passed.
    pub const SELF_CHECK_OK: &str = "self-check-ok";
    /// Periodic self-check failed.
    pub const SELF_CHECK_FAILED: &str = "self-check-failed";
}

/// Timeouts and escalation thresholds for the device machine.
///
/// The defaults come from long operational experience with flaky boards:
/// power-cycle failures are usually relay or network trouble that resolves
/// within hours (so many cheap retries), while an image that will not come
/// up after a handful of long waits is not going to.
#[derive(Debug, Clone)]
pub struct DeviceMachineConfig {
    /// Self-check interval in `ready`.
    pub ready_check_interval: Duration,
    /// How long to wait for one power cycle before retrying.
    pub reboot_timeout: Duration,
    /// Power-cycle retries before escalating to `failed_reboot_rebooting`.
    pub reboot_failure_limit: u32,
    /// How long to wait for the image to report in before power cycling
    /// again.
    pub complete_timeout: Duration,
    /// Image-wait retries before escalating to `failed_reboot_complete`.
    pub complete_failure_limit: u32,
}

impl Default for DeviceMachineConfig {
    fn default() -> Self {
        Self {
            ready_check_interval: Duration::from_secs(300),
            reboot_timeout: Duration::from_secs(60),
            reboot_failure_limit: 200,
            complete_timeout: Duration::from_secs(600),
            complete_failure_limit: 10,
        }
    }
}

/// Shared context available to every device state handler.
pub struct DeviceDomain {
    pub(crate) hardware: Arc<HardwareApi>,
    pub(crate) sender: EventSender,
}

/// The device machine type.
pub type DeviceMachine = StateMachine<DeviceDomain>;

/// Build the device machine over the given store and hardware facade.
/// Completions of background hardware work re-enter through `sender`.
pub fn device_machine<D>(
    store: Arc<D>,
    hardware: Arc<HardwareApi>,
    sender: EventSender,
    config: &DeviceMachineConfig,
) -> DeviceMachine
where
    D: DeviceStore + 'static,
{
    StateMachine::new(
        "device",
        graph(config),
        store,
        DeviceDomain { hardware, sender },
    )
}

fn graph(config: &DeviceMachineConfig) -> StateGraph<DeviceDomain> {
    let allow_reboot = HandlerSet::new("allow-reboot").on_event(events::REBOOT, |ctx, _| {
        ctx.log("reboot requested");
        ctx.goto_state(states::REBOOTING)
    });

    let reboot_failure_limit = config.reboot_failure_limit;
    let complete_failure_limit = config.complete_failure_limit;

    StateGraph::builder()
        .state(StateDef::new(states::NEW).include(&allow_reboot))
        .state(StateDef::new(states::UNKNOWN).include(&allow_reboot))
        .state(
            StateDef::new(states::READY)
                .include(&allow_reboot)
                .timeout(config.ready_check_interval)
                .on_entry(|ctx| ctx.clear_counter(None))
                // Nothing to report and nothing due: re-arm the self-check.
                .on_timeout(|ctx| ctx.goto_state(states::READY))
                .on_event(events::SELF_CHECK_OK, |_ctx, _| Ok(()))
                .on_event(events::SELF_CHECK_FAILED, |ctx, _| {
                    ctx.log("self-check failed");
                    ctx.goto_state(states::REBOOTING)
                }),
        )
        .state(
            StateDef::new(states::REBOOTING)
                .include(&allow_reboot)
                .timeout(config.reboot_timeout)
                .on_entry(enter_rebooting)
                .on_timeout(move |ctx| {
                    if ctx.increment_counter(states::REBOOTING)? > reboot_failure_limit {
                        ctx.log("too many failed power cycles; giving up");
                        ctx.goto_state(states::FAILED_REBOOT_REBOOTING)
                    } else {
                        ctx.goto_state(states::REBOOTING)
                    }
                })
                .on_event(events::POWER_CYCLE_OK, |ctx, _| {
                    ctx.clear_counter(Some(states::REBOOTING))?;
                    ctx.goto_state(states::REBOOT_COMPLETE)
                }),
        )
        .state(
            StateDef::new(states::REBOOT_COMPLETE)
                .include(&allow_reboot)
                .timeout(config.complete_timeout)
                .on_timeout(move |ctx| {
                    if ctx.increment_counter(states::REBOOT_COMPLETE)? > complete_failure_limit {
                        ctx.log("image never came up after repeated power cycles; giving up");
                        ctx.goto_state(states::FAILED_REBOOT_COMPLETE)
                    } else {
                        ctx.goto_state(states::REBOOTING)
                    }
                })
                .on_event(events::IMAGE_RUNNING, |ctx, _| {
                    ctx.clear_counter(Some(states::REBOOT_COMPLETE))?;
                    ctx.goto_state(states::READY)
                }),
        )
        .state(
            StateDef::new(states::FAILED_REBOOT_REBOOTING)
                .include(&allow_reboot)
                .on_entry(enter_failed),
        )
        .state(
            StateDef::new(states::FAILED_REBOOT_COMPLETE)
                .include(&allow_reboot)
                .on_entry(enter_failed),
        )
        .build()
}

/// Clear the boot configuration, then start the power cycle; a confirmed
/// cycle comes back as a `power-cycle-ok` event. Failures deliver nothing,
/// and the state's timeout drives the retry.
fn enter_rebooting(ctx: &mut Ctx<'_, DeviceDomain>) -> Result<()> {
    let device = ctx.name().to_owned();
    let (hardware, sender) = {
        let domain = ctx.domain();
        (Arc::clone(&domain.hardware), domain.sender.clone())
    };
    ctx.log("clearing boot configuration and starting power cycle");

    let cycle_hardware = Arc::clone(&hardware);
    let pxe_device = device.clone();
    hardware.start_clear_pxe(&pxe_device, move |cleared| {
        if !cleared {
            tracing::warn!(
                device = %device,
                "could not clear boot configuration; power-cycling anyway"
            );
        }
        let done_device = device.clone();
        cycle_hardware.start_powercycle(&device, move |confirmed| {
            if confirmed {
                sender.send(&done_device, events::POWER_CYCLE_OK, Value::Null);
            }
        });
    });
    Ok(())
}

fn enter_failed(ctx: &mut Ctx<'_, DeviceDomain>) -> Result<()> {
    ctx.log(&format!("device has failed ({})", ctx.state()));
    Ok(())
}
