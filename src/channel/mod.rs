//! Channel implementations: the behaviours the device uses to talk to
//! whatever is attached to its serial link.
//!
//! There are three, one per kind of host:
//! - [`PrintOnly`] - nothing is attached.  Everything is written out as human
//!   readable text, and nothing is ever read back.
//! - [`Demo`] - a demo script is attached, speaking the line-oriented text
//!   protocol.
//! - [`FieldTest`] - a field-test harness is attached, speaking the binary
//!   frame protocol via the [`crate::protocol::Engine`].
//!
//! All three implement [`Channel`], so callers never branch on which one is
//! active.  [`ChannelImpl`] holds exactly one of them, and is what the
//! [`crate::router::Router`] owns and swaps.
//!
//! Channels don't own the transport, clock or engine.  The router lends them
//! on every call through a [`Link`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod demo;
pub mod line;
pub mod print_only;

pub use demo::Demo;
pub use field_test::FieldTest;
pub use print_only::PrintOnly;

use crate::io::{Clock, Transport};
use crate::protocol::{CommandFactory, Engine};
use crate::results::{
    DateLocation, GnssResults, LocationResult, Mac, VersionInfo, WifiScanResult, WifiScanResults,
    WifiTimings,
};
use crate::{Error, Result};

/// What the router believes is attached to the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// Nothing answered the last probe
    None,
    /// A demo script
    Demo,
    /// A field-test harness
    FieldTest,
    /// A connection test.  Answered by the field-test channel.
    ConnectionTest,
    /// Something answered the probe, but not with a known token
    Unknown,
}

impl HostKind {
    /// The channel implementation that serves this kind of host.
    pub fn channel_kind(&self) -> ChannelKind {
        match self {
            HostKind::None | HostKind::Unknown => ChannelKind::PrintOnly,
            HostKind::Demo => ChannelKind::Demo,
            HostKind::FieldTest | HostKind::ConnectionTest => ChannelKind::FieldTest,
        }
    }
}

/// Which channel implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    PrintOnly,
    Demo,
    FieldTest,
}

/// Resources a channel borrows for the duration of one call.
pub struct Link<'a, T: Transport, C: Clock, F: CommandFactory> {
    pub transport: &'a mut T,
    pub clock: &'a C,
    pub engine: &'a mut Engine<F>,
}

/// The capability every channel implementation provides.
///
/// Operations a channel has no use for default to doing nothing (or, where
/// they return a value, to reporting that there's nothing to return).
pub trait Channel {
    /// Which implementation this is.
    fn kind(&self) -> ChannelKind;

    /// Called once the channel has become the active one.
    fn init<T: Transport, C: Clock, F: CommandFactory>(&mut self, _link: &mut Link<'_, T, C, F>) {}

    /// Called just before the channel stops being the active one.
    fn deinit<T: Transport, C: Clock, F: CommandFactory>(&mut self, _link: &mut Link<'_, T, C, F>) {
    }

    /// Periodic, non-blocking, tick.
    fn service<T: Transport, C: Clock, F: CommandFactory>(&mut self, _link: &mut Link<'_, T, C, F>) {
    }

    /// Write a human readable log line to the peer.
    fn log<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        args: core::fmt::Arguments<'_>,
    );

    /// Store the results of a Wi-Fi scan.
    fn store_wifi<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &WifiScanResults,
    );

    /// Store a GNSS scan result, captured `delay_since_capture_s` seconds ago.
    fn store_gnss<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &GnssResults,
        delay_since_capture_s: u32,
    );

    /// Store the version and identity record.
    fn store_version<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        version: &VersionInfo,
    );

    /// Discard everything stored.
    fn erase_stored<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) {
    }

    /// Push everything stored to the peer.
    fn send_stored<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) {
    }

    /// Ask the peer for the current date and an approximate location.
    ///
    /// # Errors
    ///
    /// Any error means the peer couldn't supply them.
    fn fetch_date_location<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) -> Result<DateLocation> {
        Err(Error::InvalidOperation)
    }

    /// Ask the peer for the location it solved from the stored results.
    ///
    /// # Errors
    ///
    /// Any error means the peer couldn't supply one.
    fn fetch_results<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) -> Result<LocationResult> {
        Err(Error::InvalidOperation)
    }

    /// Whether the peer has sent a command that is waiting to be taken.
    ///
    /// Only needs the engine, so it can be asked without borrowing the
    /// transport.
    fn has_command<F: CommandFactory>(&self, _engine: &Engine<F>) -> bool {
        false
    }

    /// Take the waiting command, if any.
    fn take_command<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) -> Option<F::Command> {
        None
    }

    /// Send a binary response frame.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the channel has no binary protocol
    fn send_response<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
        _code: u16,
        _payload: &[u8],
    ) -> Result<()> {
        Err(Error::InvalidOperation)
    }

    /// Tell the peer something happened asynchronously.
    fn event_notify<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) {
    }
}

/// Exactly one channel implementation.
#[derive(Debug)]
pub enum ChannelImpl {
    PrintOnly(PrintOnly),
    Demo(Demo),
    FieldTest(FieldTest),
}

macro_rules! dispatch {
    ($self:ident, $channel:ident => $call:expr) => {
        match $self {
            ChannelImpl::PrintOnly($channel) => $call,
            ChannelImpl::Demo($channel) => $call,
            ChannelImpl::FieldTest($channel) => $call,
        }
    };
}

impl Channel for ChannelImpl {
    fn kind(&self) -> ChannelKind {
        dispatch!(self, c => c.kind())
    }

    fn init<T: Transport, C: Clock, F: CommandFactory>(&mut self, link: &mut Link<'_, T, C, F>) {
        dispatch!(self, c => c.init(link))
    }

    fn deinit<T: Transport, C: Clock, F: CommandFactory>(&mut self, link: &mut Link<'_, T, C, F>) {
        dispatch!(self, c => c.deinit(link))
    }

    fn service<T: Transport, C: Clock, F: CommandFactory>(&mut self, link: &mut Link<'_, T, C, F>) {
        dispatch!(self, c => c.service(link))
    }

    fn log<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        args: core::fmt::Arguments<'_>,
    ) {
        dispatch!(self, c => c.log(link, args))
    }

    fn store_wifi<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &WifiScanResults,
    ) {
        dispatch!(self, c => c.store_wifi(link, results))
    }

    fn store_gnss<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &GnssResults,
        delay_since_capture_s: u32,
    ) {
        dispatch!(self, c => c.store_gnss(link, results, delay_since_capture_s))
    }

    fn store_version<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        version: &VersionInfo,
    ) {
        dispatch!(self, c => c.store_version(link, version))
    }

    fn erase_stored<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) {
        dispatch!(self, c => c.erase_stored(link))
    }

    fn send_stored<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) {
        dispatch!(self, c => c.send_stored(link))
    }

    fn fetch_date_location<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) -> Result<DateLocation> {
        dispatch!(self, c => c.fetch_date_location(link))
    }

    fn fetch_results<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) -> Result<LocationResult> {
        dispatch!(self, c => c.fetch_results(link))
    }

    fn has_command<F: CommandFactory>(&self, engine: &Engine<F>) -> bool {
        dispatch!(self, c => c.has_command(engine))
    }

    fn take_command<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) -> Option<F::Command> {
        dispatch!(self, c => c.take_command(link))
    }

    fn send_response<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        code: u16,
        payload: &[u8],
    ) -> Result<()> {
        dispatch!(self, c => c.send_response(link, code, payload))
    }

    fn event_notify<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) {
        dispatch!(self, c => c.event_notify(link))
    }
}

/// Constructs channel implementations for the router.
///
/// Construction may fail, in which case the router leaves the active channel
/// exactly as it was.
pub trait ChannelBuilder {
    /// Build a fresh, not yet initialised, channel of `kind`.
    ///
    /// # Errors
    ///
    /// - [`Error::BuildFailed`] if the channel could not be constructed
    fn build(&mut self, kind: ChannelKind) -> Result<ChannelImpl>;
}

/// Builds the standard channel implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardChannels {
    demo_reply_timeout_ms: u64,
}

impl StandardChannels {
    /// Arguments:
    /// - `demo_reply_timeout_ms` - How long a [`Demo`] channel waits between
    ///   bytes of a reply before giving up
    pub const fn new(demo_reply_timeout_ms: u64) -> Self {
        Self {
            demo_reply_timeout_ms,
        }
    }
}

impl Default for StandardChannels {
    fn default() -> Self {
        Self::new(demo::DEFAULT_REPLY_TIMEOUT_MS)
    }
}

impl ChannelBuilder for StandardChannels {
    fn build(&mut self, kind: ChannelKind) -> Result<ChannelImpl> {
        Ok(match kind {
            ChannelKind::PrintOnly => ChannelImpl::PrintOnly(PrintOnly::new()),
            ChannelKind::Demo => ChannelImpl::Demo(Demo::new(self.demo_reply_timeout_ms)),
            ChannelKind::FieldTest => ChannelImpl::FieldTest(FieldTest::new()),
        })
    }
}

// Helper functions

// One Wi-Fi result as a comma-separated line, without any prefix.
pub(crate) fn write_wifi_line<W: core::fmt::Write>(
    w: &mut W,
    result: &WifiScanResult,
    timings: &WifiTimings,
) -> core::fmt::Result {
    writeln!(
        w,
        "{}, CHANNEL_{}, {}, {}, {}, {}, {}, {}",
        Mac(&result.mac_address),
        result.channel,
        result.signal_type.as_str(),
        result.rssi,
        timings.demodulation_us,
        timings.rx_capture_us,
        timings.rx_correlation_us,
        timings.rx_detection_us,
    )
}
