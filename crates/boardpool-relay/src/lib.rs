//! Relay board wire protocol client.
//!
//! Device power runs through networkable relay boards: up to 4 banks of 8
//! relays each, addressed over a tiny TCP protocol of 3-byte command frames
//! and 1-byte replies. Devices are wired to the Normally Closed side of
//! their relay, so an energized relay means the device has no power.
//!
//! [`RelayClient`] goes to some lengths to guarantee that every operation
//! finishes within its caller's timeout regardless of network conditions,
//! and serializes conversations per board host: the boards' TCP stacks are
//! single-threaded and need a settle pause between connections.
//!
//! [`testing::FakeRelayBoard`] (behind the `test-utils` feature) speaks the
//! same protocol from the server side for the test suites.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod wire;

pub use client::RelayClient;
pub use error::{RelayError, Result};
