//! Hardware-independent core library for the telemetry uplink device
//!
//! This crate contains all platform-agnostic logic for reading a BMP280
//! barometric sensor and delivering its readings to a remote collector:
//! fixed-point compensation, request formatting, the event-driven uplink
//! state machine and the lifecycle of the shared TLS context.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod compensation;
pub mod config;
pub mod sampling;
pub mod scheduler;
pub mod sensors;
pub mod telemetry;
pub mod uplink;

#[cfg(test)]
pub(crate) mod test_support;
