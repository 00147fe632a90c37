//! Allocation-request lifecycle management.
//!
//! A request asks for a device, either a specific one or any free device in
//! an environment, and this crate walks it through finding and reserving one,
//! asking the device's owning driver to recover it, waiting for it to come
//! up, and handing it over. Requests that cannot be satisfied escalate to
//! dedicated `failed_*` states; every open request can be closed or expired
//! at any point, releasing its reservation.
//!
//! # Components
//!
//! - [`request_machine`]: the registered request state graph
//! - [`DeviceOwnerClient`]: how this pool notifies a device's owning driver
//!   (the transport lives outside this workspace)
//! - [`RequestDriver`]: machine, expiry scan, event channel, and polling
//!   driver wired together

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod driver;
pub mod owner;
pub mod request_machine;

pub use driver::RequestDriver;
pub use owner::{DeviceOwnerClient, OwnerContactError};
pub use request_machine::{request_machine, RequestDomain, RequestMachine, RequestMachineConfig};
