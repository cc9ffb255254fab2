//! I/O traits for the serial link.
//!
//! Device side:
//! - [`Transport`] - the UART/DMA peripheral, as a byte channel with
//!   asynchronous completion notification
//! - [`Clock`] - a monotonic millisecond ticker
//! - [`TransferSignals`] - the flags a transport's interrupt handlers raise
//!   when a receive or transmit completes
//!
//! Host side:
//! - [`Reader`] and [`Writer`] - async byte stream access, typically a serial
//!   port, used by [`crate::client`]
//!
//! # Completion routing
//!
//! The engine never runs inside an interrupt.  Instead the transport's
//! receive-complete and transmit-complete interrupts raise flags in a
//! [`TransferSignals`], which the engine consumes from its cooperative
//! `service()` tick.  The signals object is registered with the transport when
//! the engine starts.  Declare it as a `static` so the interrupt handler can
//! reach it without any allocation:
//!
//! ```rust,ignore
//! static SIGNALS: TransferSignals = TransferSignals::new();
//!
//! #[interrupt]
//! fn USART2() {
//!     // ... acknowledge the peripheral ...
//!     SIGNALS.notify_rx_complete();
//! }
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::Result;

/// Byte transport trait, implemented by the UART/DMA driver.
///
/// Two reception modes are used:
/// - Armed receives, for the binary protocol: [`Transport::start_receive()`]
///   requests exactly `len` bytes.  When they have all arrived the transport
///   calls [`TransferSignals::notify_rx_complete()`] on the registered signals,
///   and the bytes are then collected with [`Transport::read_received()`].
/// - Byte-at-a-time polling, for the text protocols: [`Transport::read_byte()`].
///
/// Only one armed receive and one transmit are ever in flight at a time.
pub trait Transport {
    /// Enable the receiver.
    fn start(&mut self);

    /// Disable the receiver.
    fn stop(&mut self);

    /// Abort any receive or transmit in progress and return the peripheral to
    /// its idle state.  Bytes already received but not collected are dropped.
    fn reset(&mut self);

    /// Whether the previous transmit has finished.
    fn is_tx_complete(&self) -> bool;

    /// Start transmitting `data`.
    ///
    /// Returns `false` if the transmit could not be started, in which case the
    /// caller retries.  The transport must have copied or finished reading
    /// `data` before it returns.  Completion is signalled via
    /// [`TransferSignals::notify_tx_complete()`].
    fn send(&mut self, data: &[u8]) -> bool;

    /// Arm a receive of exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::PayloadTooLarge`] if the transport cannot receive
    ///   `len` bytes in one operation
    /// - [`crate::Error::Busy`] if a receive is already armed
    fn start_receive(&mut self, len: usize) -> Result<()>;

    /// Copy the bytes of the last completed armed receive into `buf`.
    ///
    /// Returns the number of bytes copied.
    fn read_received(&mut self, buf: &mut [u8]) -> usize;

    /// Read one byte if one is available, without blocking.
    fn read_byte(&mut self) -> Option<u8>;

    /// Register (or with `None`, unregister) the signals raised when an armed
    /// receive completes.
    fn register_rx_complete(&mut self, signals: Option<&'static TransferSignals>);

    /// Register (or with `None`, unregister) the signals raised when a
    /// transmit completes.
    fn register_tx_complete(&mut self, signals: Option<&'static TransferSignals>);
}

/// Monotonic clock trait.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed point.  Must never go backwards.
    fn now_ms(&self) -> u64;
}

/// Completion flags raised from interrupt context and consumed by the engine.
///
/// Can be constructed in `const` context, so it can live in a `static`.
pub struct TransferSignals {
    rx_complete: AtomicBool,
    tx_completions: AtomicU32,
}

impl TransferSignals {
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            rx_complete: AtomicBool::new(false),
            tx_completions: AtomicU32::new(0),
        }
    }

    /// Called by the transport when an armed receive has completed.
    pub fn notify_rx_complete(&self) {
        self.rx_complete.store(true, Ordering::Release);
    }

    /// Called by the transport when a transmit has completed.
    pub fn notify_tx_complete(&self) {
        self.tx_completions.fetch_add(1, Ordering::AcqRel);
    }

    /// Total number of transmit completions signalled so far.
    pub fn tx_completions(&self) -> u32 {
        self.tx_completions.load(Ordering::Acquire)
    }

    /// Consume a pending receive completion.
    pub(crate) fn take_rx_complete(&self) -> bool {
        self.rx_complete.swap(false, Ordering::AcqRel)
    }

    /// Drop any pending receive completion.
    pub(crate) fn clear_rx_complete(&self) {
        self.rx_complete.store(false, Ordering::Release);
    }
}

/// Send `data` on `transport`, waiting for any previous transmit to finish
/// first and retrying until the transport accepts it.
pub fn send_blocking<T: Transport>(transport: &mut T, data: &[u8]) {
    while !transport.is_tx_complete() {
        core::hint::spin_loop();
    }
    while !transport.send(data) {
        core::hint::spin_loop();
    }
}

/// [`core::fmt::Write`] adapter that sends formatted text straight out of a
/// [`Transport`].
pub struct TransportWriter<'a, T: Transport> {
    transport: &'a mut T,
}

impl<'a, T: Transport> TransportWriter<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }
}

impl<T: Transport> core::fmt::Write for TransportWriter<'_, T> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        if !s.is_empty() {
            send_blocking(self.transport, s.as_bytes());
        }
        Ok(())
    }
}

/// Write formatted text to `transport`.  Best effort.
pub fn write_text<T: Transport>(transport: &mut T, args: core::fmt::Arguments<'_>) {
    let _ = core::fmt::Write::write_fmt(&mut TransportWriter::new(transport), args);
}

/// Async reader trait, typically a host serial port.
pub trait Reader {
    /// The error type returned by read operations.
    ///
    /// This allows implementations to use their own error types
    /// (e.g., `std::io::Error` for a serial port).
    type Error: core::fmt::Debug;

    /// Read whatever bytes are available into `buf`.
    ///
    /// Returns the number of bytes read, which may be 0 if nothing has
    /// arrived yet.  Implementations should not wait indefinitely for data -
    /// the client handles retries and its own timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying port fails (disconnected device,
    /// driver error, etc.).
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = core::result::Result<usize, Self::Error>> + Send;
}

/// Async writer trait, typically a host serial port.
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write all of `data`.
    fn write(
        &mut self,
        data: &[u8],
    ) -> impl core::future::Future<Output = core::result::Result<(), Self::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, leak_signals};

    #[test]
    fn signals_count_completions() {
        let signals = TransferSignals::new();
        assert!(!signals.take_rx_complete());
        signals.notify_rx_complete();
        assert!(signals.take_rx_complete());
        assert!(!signals.take_rx_complete());

        signals.notify_tx_complete();
        signals.notify_tx_complete();
        assert_eq!(signals.tx_completions(), 2);
    }

    #[test]
    fn writer_sends_formatted_text() {
        let mut transport = MockTransport::new();
        transport.register_tx_complete(Some(leak_signals()));
        write_text(&mut transport, format_args!("# {} result(s)\n", 3));
        assert_eq!(transport.sent_bytes(), b"# 3 result(s)\n");
    }
}
