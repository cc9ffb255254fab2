//! The communication router.
//!
//! The router owns the transport, the frame protocol engine and exactly one
//! active [`ChannelImpl`].  Device logic talks to the router, which forwards
//! every operation to whichever channel is active.
//!
//! # Host detection
//!
//! While it doesn't know of a host it can talk to (host kind `None`, `Unknown`
//! or `ConnectionTest`) the router probes the link, at most once per probe
//! period, by sending `!TEST_HOST\n` and waiting briefly for a 10-byte,
//! NUL-terminated, token:
//!
//! | Reply        | Host kind          | Channel       |
//! |--------------|--------------------|---------------|
//! | `demooglog`  | `Demo`             | [`Demo`]      |
//! | `fieldglog`  | `FieldTest`        | [`FieldTest`] |
//! | `testdglog`  | `ConnectionTest`   | [`FieldTest`] |
//! | anything     | `Unknown`          | [`PrintOnly`] |
//! | nothing      | `None`             | [`PrintOnly`] |
//!
//! A connection test is acknowledged with `It works !\n`, logged through the
//! channel active at the time.
//!
//! If a fetch fails while a demo host is attached, the router assumes the
//! host has gone and drops straight back to `None`.
//!
//! [`Demo`]: crate::channel::Demo
//! [`FieldTest`]: crate::channel::FieldTest
//! [`PrintOnly`]: crate::channel::PrintOnly

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use heapless::Vec;

use crate::channel::demo::DEFAULT_REPLY_TIMEOUT_MS;
use crate::channel::line::receive_line;
use crate::channel::{
    Channel, ChannelBuilder, ChannelImpl, ChannelKind, HostKind, Link, PrintOnly, StandardChannels,
};
use crate::io::{Clock, TransferSignals, Transport, send_blocking};
use crate::protocol::{CommandFactory, Counters, Engine, EngineConfig};
use crate::results::{DateLocation, GnssResults, LocationResult, VersionInfo, WifiScanResults};
use crate::Result;

/// Sent to ask whatever is attached to identify itself
pub const PROBE: &[u8] = b"!TEST_HOST\n";

/// Length of a host token, NUL included
pub const TOKEN_LEN: usize = 10;

pub const TOKEN_DEMO: &[u8; TOKEN_LEN] = b"demooglog\0";
pub const TOKEN_FIELD_TEST: &[u8; TOKEN_LEN] = b"fieldglog\0";
pub const TOKEN_CONNECTION_TEST: &[u8; TOKEN_LEN] = b"testdglog\0";

/// Acknowledgement of a connection test
pub const CONNECTION_TEST_ACK: &str = "It works !\n";

/// Default minimum time between two probes
pub const DEFAULT_PROBE_PERIOD_MS: u64 = 1000;

/// Default time allowed for a probe reply, between bytes
pub const DEFAULT_PROBE_REPLY_TIMEOUT_MS: u64 = 100;

/// Router configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Minimum time between two probes
    pub probe_period_ms: u64,
    /// Longest silence tolerated in a probe reply
    pub probe_reply_timeout_ms: u64,
    /// Longest silence tolerated in a demo host's reply
    pub demo_reply_timeout_ms: u64,
    /// Configuration of the frame protocol engine
    pub engine: EngineConfig,
}

impl RouterConfig {
    pub const fn new() -> Self {
        Self {
            probe_period_ms: DEFAULT_PROBE_PERIOD_MS,
            probe_reply_timeout_ms: DEFAULT_PROBE_REPLY_TIMEOUT_MS,
            demo_reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            engine: EngineConfig::new(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which host kind a probe reply identifies.
///
/// Tokens are checked in priority order: demo, field test, connection test.
pub fn classify_reply(reply: &[u8]) -> HostKind {
    if reply == TOKEN_DEMO {
        HostKind::Demo
    } else if reply == TOKEN_FIELD_TEST {
        HostKind::FieldTest
    } else if reply == TOKEN_CONNECTION_TEST {
        HostKind::ConnectionTest
    } else {
        HostKind::Unknown
    }
}

/// The communication router.
pub struct Router<T, C, F, B = StandardChannels>
where
    T: Transport,
    C: Clock,
    F: CommandFactory,
    B: ChannelBuilder,
{
    transport: T,
    clock: C,
    engine: Engine<F>,
    builder: B,
    config: RouterConfig,
    active: ChannelImpl,
    host: HostKind,
    host_changed: bool,
    last_probe_ms: Option<u64>,
}

impl<T, C, F> Router<T, C, F, StandardChannels>
where
    T: Transport,
    C: Clock,
    F: CommandFactory,
{
    /// Create a router with the standard channel implementations.  Starts
    /// with no host, and the print-only channel active.
    ///
    /// Arguments:
    /// - `transport` - The serial link
    /// - `clock` - Millisecond clock
    /// - `factory` - Builds commands from frames received from a field-test
    ///   host
    /// - `signals` - Completion flags raised by the transport's interrupts
    /// - `config` - Router configuration
    pub fn new(
        transport: T,
        clock: C,
        factory: F,
        signals: &'static TransferSignals,
        config: RouterConfig,
    ) -> Self {
        let builder = StandardChannels::new(config.demo_reply_timeout_ms);
        Self::with_builder(transport, clock, factory, signals, config, builder)
    }
}

impl<T, C, F, B> Router<T, C, F, B>
where
    T: Transport,
    C: Clock,
    F: CommandFactory,
    B: ChannelBuilder,
{
    /// As [`Router::new()`], with a custom channel builder.
    pub fn with_builder(
        transport: T,
        clock: C,
        factory: F,
        signals: &'static TransferSignals,
        config: RouterConfig,
        builder: B,
    ) -> Self {
        let mut router = Self {
            transport,
            clock,
            engine: Engine::new(factory, signals, config.engine),
            builder,
            config,
            active: ChannelImpl::PrintOnly(PrintOnly::new()),
            host: HostKind::None,
            host_changed: false,
            last_probe_ms: None,
        };
        let (active, mut link) = router.split();
        active.init(&mut link);
        router
    }

    /// Probe for a host if one is due, then service the active channel.
    ///
    /// Call from the main loop.  Blocks only while waiting for a probe reply.
    pub fn service(&mut self) {
        self.detect_if_due();
        let (active, mut link) = self.split();
        active.service(&mut link);
    }

    /// What the router believes is attached.
    pub fn current_host_kind(&self) -> HostKind {
        self.host
    }

    /// The host kind, if it has changed since this was last called.
    pub fn host_kind_changed(&mut self) -> Option<HostKind> {
        if core::mem::take(&mut self.host_changed) {
            Some(self.host)
        } else {
            None
        }
    }

    /// Switch to the channel for `kind`.  Does nothing if `kind` is already
    /// the current host kind.
    ///
    /// The new channel is built before the active one is touched.  If building
    /// fails, the active channel and host kind are left exactly as they were.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::BuildFailed`], or whatever the builder reports, if
    ///   the new channel could not be built
    pub fn set_host_kind(&mut self, kind: HostKind) -> Result<()> {
        if kind == self.host {
            return Ok(());
        }

        let incoming = self
            .builder
            .build(kind.channel_kind())
            .inspect_err(|e| warn!("Failed to build channel for {kind:?} host: {e}"))?;

        let mut link = Link {
            transport: &mut self.transport,
            clock: &self.clock,
            engine: &mut self.engine,
        };
        self.active.deinit(&mut link);
        let outgoing = core::mem::replace(&mut self.active, incoming);
        self.active.init(&mut link);
        drop(outgoing);

        info!("Host changed from {:?} to {kind:?}", self.host);
        self.host = kind;
        self.host_changed = true;
        Ok(())
    }

    /// Which channel implementation is active.
    pub fn active_channel(&self) -> ChannelKind {
        self.active.kind()
    }

    /// Write a log line to the peer.
    pub fn log(&mut self, args: core::fmt::Arguments<'_>) {
        let (active, mut link) = self.split();
        active.log(&mut link, args);
    }

    pub fn store_wifi(&mut self, results: &WifiScanResults) {
        let (active, mut link) = self.split();
        active.store_wifi(&mut link, results);
    }

    pub fn store_gnss(&mut self, results: &GnssResults, delay_since_capture_s: u32) {
        let (active, mut link) = self.split();
        active.store_gnss(&mut link, results, delay_since_capture_s);
    }

    pub fn store_version(&mut self, version: &VersionInfo) {
        let (active, mut link) = self.split();
        active.store_version(&mut link, version);
    }

    pub fn erase_stored(&mut self) {
        let (active, mut link) = self.split();
        active.erase_stored(&mut link);
    }

    pub fn send_stored(&mut self) {
        let (active, mut link) = self.split();
        active.send_stored(&mut link);
    }

    /// Ask the host for the date and an approximate location.
    ///
    /// A failure while a demo host is attached drops the router back to no
    /// host.
    ///
    /// # Errors
    ///
    /// Whatever the active channel reports.
    pub fn fetch_date_location(&mut self) -> Result<DateLocation> {
        let (active, mut link) = self.split();
        let result = active.fetch_date_location(&mut link);
        self.degrade_on_failure(&result);
        result
    }

    /// Ask the host for the location it solved from the stored results.
    ///
    /// A failure while a demo host is attached drops the router back to no
    /// host.
    ///
    /// # Errors
    ///
    /// Whatever the active channel reports.
    pub fn fetch_results(&mut self) -> Result<LocationResult> {
        let (active, mut link) = self.split();
        let result = active.fetch_results(&mut link);
        self.degrade_on_failure(&result);
        result
    }

    pub fn has_command(&self) -> bool {
        self.active.has_command(&self.engine)
    }

    pub fn take_command(&mut self) -> Option<F::Command> {
        let (active, mut link) = self.split();
        active.take_command(&mut link)
    }

    /// Send a binary response frame.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidOperation`] if the active channel has no
    ///   binary protocol
    /// - [`crate::Error::PayloadTooLarge`] if `payload` is too large for a
    ///   frame
    pub fn send_response(&mut self, code: u16, payload: &[u8]) -> Result<()> {
        let (active, mut link) = self.split();
        active.send_response(&mut link, code, payload)
    }

    pub fn event_notify(&mut self) {
        let (active, mut link) = self.split();
        active.event_notify(&mut link);
    }

    /// Engine diagnostic counters.
    pub fn counters(&self) -> Counters {
        self.engine.counters()
    }

    pub fn engine(&self) -> &Engine<F> {
        &self.engine
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

// Internal functions
impl<T, C, F, B> Router<T, C, F, B>
where
    T: Transport,
    C: Clock,
    F: CommandFactory,
    B: ChannelBuilder,
{
    fn split(&mut self) -> (&mut ChannelImpl, Link<'_, T, C, F>) {
        (
            &mut self.active,
            Link {
                transport: &mut self.transport,
                clock: &self.clock,
                engine: &mut self.engine,
            },
        )
    }

    fn detect_if_due(&mut self) {
        if !matches!(
            self.host,
            HostKind::None | HostKind::Unknown | HostKind::ConnectionTest
        ) {
            return;
        }

        let now = self.clock.now_ms();
        if let Some(last) = self.last_probe_ms {
            if now.saturating_sub(last) < self.config.probe_period_ms {
                return;
            }
        }
        self.last_probe_ms = Some(now);

        let detected = self.probe();
        if detected == HostKind::ConnectionTest {
            self.log(format_args!("{CONNECTION_TEST_ACK}"));
        }
        if detected != self.host {
            // Failure already logged, and the active channel is unchanged
            let _ = self.set_host_kind(detected);
        }
    }

    fn probe(&mut self) -> HostKind {
        send_blocking(&mut self.transport, PROBE);
        self.transport.start();

        let mut reply: Vec<u8, TOKEN_LEN> = Vec::new();
        match receive_line(
            &mut self.transport,
            &self.clock,
            &mut reply,
            self.config.probe_reply_timeout_ms,
        ) {
            Ok(()) => {
                let kind = classify_reply(&reply);
                debug!("Probe answered: {kind:?}");
                kind
            }
            Err(e) => {
                trace!("No probe reply: {e}");
                HostKind::None
            }
        }
    }

    fn degrade_on_failure<R>(&mut self, result: &Result<R>) {
        if result.is_err() && self.host == HostKind::Demo {
            warn!("Demo host stopped answering");
            let _ = self.set_host_kind(HostKind::None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::protocol::{RESP_CODE_EVENT, RESP_CODE_LOG};
    use crate::testing::{MockClock, MockTransport, TestCommand, TestFactory, leak_signals};
    use std::vec;

    type TestRouter<B = StandardChannels> = Router<MockTransport, MockClock, TestFactory, B>;

    fn config() -> RouterConfig {
        RouterConfig {
            demo_reply_timeout_ms: 50,
            ..RouterConfig::default()
        }
    }

    fn router() -> (TestRouter, MockClock) {
        let clock = MockClock::auto(1);
        let router = Router::new(
            MockTransport::new(),
            clock.clone(),
            TestFactory::new(),
            leak_signals(),
            config(),
        );
        (router, clock)
    }

    /// Fails to build one kind of channel.
    struct FlakyBuilder {
        fails: ChannelKind,
    }

    impl ChannelBuilder for FlakyBuilder {
        fn build(&mut self, kind: ChannelKind) -> Result<ChannelImpl> {
            if kind == self.fails {
                return Err(Error::BuildFailed);
            }
            StandardChannels::default().build(kind)
        }
    }

    fn flaky_router(fails: ChannelKind) -> TestRouter<FlakyBuilder> {
        Router::with_builder(
            MockTransport::new(),
            MockClock::auto(1),
            TestFactory::new(),
            leak_signals(),
            config(),
            FlakyBuilder { fails },
        )
    }

    #[test]
    fn starts_print_only_with_no_host() {
        let (mut router, _) = router();
        assert_eq!(router.current_host_kind(), HostKind::None);
        assert_eq!(router.active_channel(), ChannelKind::PrintOnly);
        assert_eq!(router.host_kind_changed(), None);
    }

    #[test]
    fn demo_host_is_detected() {
        let (mut router, _) = router();
        router.transport_mut().push_incoming(TOKEN_DEMO);
        router.service();

        assert_eq!(router.transport().sent_bytes(), PROBE);
        assert_eq!(router.current_host_kind(), HostKind::Demo);
        assert_eq!(router.active_channel(), ChannelKind::Demo);
        assert_eq!(router.host_kind_changed(), Some(HostKind::Demo));
        assert_eq!(router.host_kind_changed(), None);
    }

    #[test]
    fn demo_host_is_not_reprobed() {
        let (mut router, clock) = router();
        router.transport_mut().push_incoming(TOKEN_DEMO);
        router.service();
        router.host_kind_changed();

        for _ in 0..3 {
            router.transport_mut().push_incoming(TOKEN_DEMO);
            clock.advance(DEFAULT_PROBE_PERIOD_MS);
            router.service();
        }
        assert_eq!(router.transport().sent_bytes(), PROBE);
        assert_eq!(router.set_host_kind(HostKind::Demo), Ok(()));
        assert_eq!(router.current_host_kind(), HostKind::Demo);
        assert_eq!(router.host_kind_changed(), None);
    }

    #[test]
    fn probes_are_throttled() {
        let (mut router, clock) = router();
        router.service();
        router.service();
        assert_eq!(router.transport().sent_bytes(), PROBE);

        clock.advance(DEFAULT_PROBE_PERIOD_MS);
        router.service();
        assert_eq!(router.transport().sent_bytes(), [PROBE, PROBE].concat());
        assert_eq!(router.current_host_kind(), HostKind::None);
        assert_eq!(router.host_kind_changed(), None);
    }

    #[test]
    fn unrecognised_reply_is_unknown_host() {
        let (mut router, clock) = router();
        router.transport_mut().push_incoming(b"whoami123\0");
        router.service();
        assert_eq!(router.current_host_kind(), HostKind::Unknown);
        assert_eq!(router.active_channel(), ChannelKind::PrintOnly);
        assert_eq!(router.host_kind_changed(), Some(HostKind::Unknown));

        // Still probing, and silence now means no host
        clock.advance(DEFAULT_PROBE_PERIOD_MS);
        router.service();
        assert_eq!(router.current_host_kind(), HostKind::None);
    }

    #[test]
    fn short_token_is_not_a_match() {
        assert_eq!(classify_reply(b"demooglog"), HostKind::Unknown);
        assert_eq!(classify_reply(b"demo\0"), HostKind::Unknown);
        assert_eq!(classify_reply(TOKEN_FIELD_TEST), HostKind::FieldTest);
    }

    #[test]
    fn connection_test_is_acknowledged() {
        let (mut router, _) = router();
        router.transport_mut().push_incoming(TOKEN_CONNECTION_TEST);
        router.service();

        assert_eq!(
            router.transport().sent_text(),
            "!TEST_HOST\nIt works !\n"
        );
        assert_eq!(router.current_host_kind(), HostKind::ConnectionTest);
        assert_eq!(router.active_channel(), ChannelKind::FieldTest);
        assert!(router.engine().is_running());
    }

    #[test]
    fn failed_build_leaves_channel_untouched() {
        let mut router = flaky_router(ChannelKind::Demo);
        router.transport_mut().push_incoming(TOKEN_DEMO);
        router.service();
        assert_eq!(router.current_host_kind(), HostKind::None);
        assert_eq!(router.active_channel(), ChannelKind::PrintOnly);
        assert_eq!(router.host_kind_changed(), None);

        // An active field-test channel isn't torn down either
        router.set_host_kind(HostKind::FieldTest).unwrap();
        router.host_kind_changed();
        assert_eq!(
            router.set_host_kind(HostKind::Demo),
            Err(Error::BuildFailed)
        );
        assert_eq!(router.current_host_kind(), HostKind::FieldTest);
        assert_eq!(router.active_channel(), ChannelKind::FieldTest);
        assert!(router.engine().is_running());
        assert_eq!(router.host_kind_changed(), None);
    }

    #[test]
    fn swap_tears_down_the_outgoing_channel() {
        let mut router = flaky_router(ChannelKind::Demo);
        router.set_host_kind(HostKind::FieldTest).unwrap();
        assert!(router.engine().is_running());

        router.set_host_kind(HostKind::None).unwrap();
        assert!(!router.engine().is_running());
        assert_eq!(router.active_channel(), ChannelKind::PrintOnly);
    }

    #[test]
    fn dead_demo_link_drops_to_no_host() {
        let (mut router, _) = router();
        router.set_host_kind(HostKind::Demo).unwrap();
        router.host_kind_changed();

        assert_eq!(router.fetch_date_location(), Err(Error::Timeout));
        assert_eq!(router.current_host_kind(), HostKind::None);
        assert_eq!(router.active_channel(), ChannelKind::PrintOnly);
        assert_eq!(router.host_kind_changed(), Some(HostKind::None));
    }

    #[test]
    fn garbled_demo_reply_drops_to_no_host() {
        let (mut router, _) = router();
        router.set_host_kind(HostKind::Demo).unwrap();
        router.transport_mut().push_incoming(b"1;2;x\0");
        assert_eq!(
            router.fetch_results().map(|_| ()),
            Err(Error::Malformed)
        );
        assert_eq!(router.current_host_kind(), HostKind::None);
    }

    #[test]
    fn failed_fetch_without_demo_host_keeps_host() {
        let (mut router, _) = router();
        router.set_host_kind(HostKind::Unknown).unwrap();
        assert_eq!(router.fetch_date_location(), Err(Error::NoHost));
        assert_eq!(router.current_host_kind(), HostKind::Unknown);
    }

    #[test]
    fn field_test_operations_are_forwarded() {
        let (mut router, _) = router();
        router.set_host_kind(HostKind::FieldTest).unwrap();
        router.service();
        router.transport_mut().push_incoming(&[0x06, 0x00, 0x00, 0x00]);
        router.service();

        assert!(router.has_command());
        assert_eq!(
            router.take_command(),
            Some(TestCommand {
                code: 6,
                payload: vec![]
            })
        );
        assert!(!router.has_command());

        router.log(format_args!("hello"));
        router.event_notify();
        router.send_response(0x0006, &[0xAA]).unwrap();
        assert_eq!(
            router.transport().sent_frames(),
            vec![
                (RESP_CODE_LOG, b"hello".to_vec()),
                (RESP_CODE_EVENT, vec![]),
                (0x0006, vec![0xAA]),
            ]
        );
        assert_eq!(router.counters().frames_received, 1);
        assert_eq!(router.counters().frames_sent, 3);
    }

    #[test]
    fn print_only_refuses_responses() {
        let (mut router, _) = router();
        assert_eq!(
            router.send_response(0x0006, &[]),
            Err(Error::InvalidOperation)
        );
        assert!(!router.has_command());
        assert_eq!(router.take_command(), None);
        router.log(format_args!("plain {}\n", 1));
        assert_eq!(router.transport().sent_text(), "plain 1\n");
    }
}
