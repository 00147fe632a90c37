//! Device lifecycle management.
//!
//! One machine per physical device: offline, ready, power-cycling, or
//! failed. Recovery is driven through the relay board (clear the device's
//! boot configuration, cut and restore its power, wait for the image to
//! report in), with every hardware step bounded in time and every retry
//! counted against an escalation threshold. Devices that keep failing land
//! in a dedicated `failed_*` state and stay there until someone explicitly
//! asks for another reboot.
//!
//! # Components
//!
//! - [`HardwareApi`]: the facade over the relay client and boot-config
//!   control, offering each operation synchronously-with-deadline or
//!   fire-and-forget
//! - [`device_machine`]: the registered device state graph
//! - [`LifeguardDriver`]: wiring of machine, hardware, event channel, and
//!   the polling driver

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod device_machine;
pub mod driver;
pub mod hardware;

pub use device_machine::{device_machine, DeviceDomain, DeviceMachine, DeviceMachineConfig};
pub use driver::LifeguardDriver;
pub use hardware::{HardwareApi, NoopPxe, PxeControl, PxeError};
