//! Host link for battery-powered radio evaluation boards.
//!
//! This crate implements the device side of the serial link between an
//! evaluation board and whatever is attached to its UART: a field-test
//! harness, a demo script, or nothing at all.  It also contains a small
//! host-side client for the binary field-test protocol.
//!
//! `no_std`.  Requires `alloc` for the async host client, which is behind the
//! default `async` feature.
//!
//! ## Architecture
//!
//! Two pieces do the real work on the device:
//!
//! - The **frame protocol engine** ([`protocol::Engine`]) turns the raw,
//!   DMA-driven byte stream into command frames and emits response frames.
//!   Reception uses two asynchronous receives per frame (a fixed 4-byte header,
//!   then the payload), a payload timeout, and error recovery that always
//!   answers a broken frame with exactly one error frame before listening
//!   again.
//! - The **communication router** ([`router::Router`]) owns the single active
//!   channel implementation, periodically probes the line for a magic token to
//!   work out which host (if any) is attached, and hot-swaps channel
//!   implementations without ever leaving the link without an active channel.
//!
//! The channel implementations ([`channel`]) all expose the same capability
//! surface: print-only (no host), the line-oriented demo text protocol, and the
//! binary field-test protocol, which wraps the engine.
//!
//! ## Wire format
//!
//! Binary frames, in both directions, are little-endian:
//!
//! ```text
//! +--------+--------+----------+----------+-------------------+
//! | code_lo| code_hi| len_lo   | len_hi   | payload[0..len]   |
//! +--------+--------+----------+----------+-------------------+
//! ```
//!
//! Inbound payloads are limited by the 64-byte reception buffer (60 bytes
//! after the header); outbound payloads by the 512-byte transmit buffer
//! (508 bytes after the header).
//!
//! ## Modules
//!
//! - [`io`] - Transport, clock and completion-signal seams on the device, and
//!   async reader/writer traits for the host
//! - [`protocol`] - Wire constants, frame header codec and the frame protocol
//!   engine
//! - [`results`] - Owned, size-limited result records stored through a channel
//! - [`channel`] - Channel implementations and the capability they share
//! - [`router`] - The communication router
//! - [`client`] - Async host-side client, for test harnesses
//!
//! ## Getting Started
//!
//! **Device setup**:
//! 1. Implement [`io::Transport`] for your UART/DMA driver, and [`io::Clock`]
//!    for your millisecond ticker.
//! 2. Declare a `static` [`io::TransferSignals`] and call its
//!    `notify_*_complete()` methods from your receive/transmit-complete
//!    interrupts.
//! 3. Implement [`protocol::CommandFactory`] to turn frames into your command
//!    type.
//! 4. Create a [`router::Router`] and call [`router::Router::service()`] from
//!    your main loop.  Use the router's forwarding methods to log, store
//!    results and fetch commands - callers never need to know which host is
//!    attached.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host client (requires `alloc`).
//!
//! Compile with `--no-default-features` for the device.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod channel;
pub mod client;
pub mod io;
pub mod protocol;
pub mod results;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

/// Link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Timeout waiting for data
    Timeout,
    /// Received more data than the buffer can hold
    Overflow,
    /// Payload too large for the frame buffer
    PayloadTooLarge,
    /// Received data could not be parsed
    Malformed,
    /// No command registered for this code
    UnknownCommand,
    /// No host is attached to answer the request
    NoHost,
    /// Engine has not been started
    NotRunning,
    /// Operation not supported by the active channel
    InvalidOperation,
    /// Transport busy
    Busy,
    /// A channel implementation could not be constructed
    BuildFailed,
    /// I/O error
    Io,
    /// Peer answered with an error frame carrying this identifier
    Remote(u8),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Timeout => write!(f, "timeout"),
            Error::Overflow => write!(f, "buffer overflow"),
            Error::PayloadTooLarge => write!(f, "payload too large"),
            Error::Malformed => write!(f, "malformed data"),
            Error::UnknownCommand => write!(f, "unknown command"),
            Error::NoHost => write!(f, "no host attached"),
            Error::NotRunning => write!(f, "engine not running"),
            Error::InvalidOperation => write!(f, "invalid operation"),
            Error::Busy => write!(f, "transport busy"),
            Error::BuildFailed => write!(f, "channel construction failed"),
            Error::Io => write!(f, "I/O error"),
            Error::Remote(id) => write!(f, "remote error 0x{id:02X}"),
        }
    }
}

/// Type to represent the result of a link operation
pub type Result<T> = core::result::Result<T, Error>;
