//! Host-side client for the field-test link, typically used by test
//! harnesses driving a device over a serial port.
//!
//! The client can:
//! - answer the device's `!TEST_HOST` probe with a host token, so the device
//!   switches to the matching channel
//! - send command frames and wait for the response, skipping over log and
//!   event frames the device sends in between
//!
//! See [`AsyncHostClient`] for usage.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncFrameIo, AsyncHostClient, Frame, ReaderWriterFrameIo};

/// Default number of empty reads tolerated before giving up on the device
pub const DEFAULT_MAX_IDLE_POLLS: usize = 100;

/// Configuration for a host client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostClientConfig {
    /// Consecutive reads that return nothing before an operation times out.
    /// The client yields via its delay between each.
    pub max_idle_polls: usize,
}

impl HostClientConfig {
    pub const fn new() -> Self {
        Self {
            max_idle_polls: DEFAULT_MAX_IDLE_POLLS,
        }
    }
}

impl Default for HostClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
