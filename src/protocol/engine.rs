//! Frame protocol engine - receives command frames and sends response frames
//! over an asynchronous [`Transport`].
//!
//! Reception is a state machine advanced by [`Engine::service()`]:
//!
//! ```text
//!   Init ──arm header──▶ AwaitingHeader ──len == 0──────────────▶ Building
//!    ▲                        │                                    ▲    │
//!    │                        ├──len > capacity──▶ Error           │    │
//!    │                        └──arm payload──▶ AwaitingPayload ───┘    │
//!    │                                              │ timeout           │
//!    │                                              ▼                   │
//!    └──────────────error frame, reset────────── Error ◀──build fails───┤
//!                                                                       │
//!              AwaitingHeader ◀──re-arm once taken── Ready ◀──built─────┘
//! ```
//!
//! At most one command is held at a time.  Header reception is only re-armed
//! once the previous command has been taken, so a second frame can never
//! start to be assembled over an unconsumed one.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{Clock, TransferSignals, Transport};
use crate::protocol::{
    CommandFactory, Counters, ERROR_ID_FRAME, EngineConfig, FrameHeader, HEADER_SIZE,
    MAX_INBOUND_PAYLOAD, MAX_OUTBOUND_PAYLOAD, RESP_CODE_ERROR_EVENT, RESP_CODE_EVENT,
    RX_BUFFER_SIZE, TX_BUFFER_SIZE, encode_frame,
};
use crate::{Error, Result};

// Bounds the work done by one service() call if the line is flooded with
// back-to-back broken frames.
const MAX_TRANSITIONS_PER_TICK: usize = 8;

/// Reception state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Header reception not yet armed
    Init,
    /// Waiting for the 4-byte header
    AwaitingHeader,
    /// Waiting for the payload announced by the header
    AwaitingPayload,
    /// Frame complete, to be handed to the command factory
    Building,
    /// A command is waiting to be taken
    Ready,
    /// Frame rejected, recovery pending
    Error,
}

/// The frame protocol engine.  One per device.
pub struct Engine<F: CommandFactory> {
    factory: F,
    signals: &'static TransferSignals,
    config: EngineConfig,
    running: bool,
    state: EngineState,
    pending: Option<F::Command>,
    rx_buf: [u8; RX_BUFFER_SIZE],
    rx_len: usize,
    tx_buf: [u8; TX_BUFFER_SIZE],
    payload_started_ms: u64,
    errors: u16,
    frames_received: u16,
    frames_sent: u16,
    // Transmit completion count just before our last frame went out
    tx_mark: u32,
    tx_in_flight: bool,
}

impl<F: CommandFactory> Engine<F> {
    /// Create a new, stopped, engine.
    ///
    /// Arguments:
    /// - `factory` - Builds commands from received frames
    /// - `signals` - Completion flags raised by the transport's interrupts
    /// - `config` - Engine configuration
    pub fn new(factory: F, signals: &'static TransferSignals, config: EngineConfig) -> Self {
        Self {
            factory,
            signals,
            config,
            running: false,
            state: EngineState::Init,
            pending: None,
            rx_buf: [0; RX_BUFFER_SIZE],
            rx_len: 0,
            tx_buf: [0; TX_BUFFER_SIZE],
            payload_started_ms: 0,
            errors: 0,
            frames_received: 0,
            frames_sent: 0,
            tx_mark: 0,
            tx_in_flight: false,
        }
    }

    /// Register the completion signals with the transport, enable reception
    /// and allow the engine to run.  Header reception is armed on the next
    /// [`Self::service()`].
    pub fn start<T: Transport>(&mut self, transport: &mut T) {
        self.signals.clear_rx_complete();
        transport.register_rx_complete(Some(self.signals));
        transport.register_tx_complete(Some(self.signals));
        transport.start();
        self.running = true;
        debug!("Frame engine started");
    }

    /// Stop the engine.  Any receive in flight is aborted and an untaken
    /// command is discarded.
    pub fn stop<T: Transport>(&mut self, transport: &mut T) {
        transport.register_rx_complete(None);
        transport.register_tx_complete(None);
        transport.reset();
        self.signals.clear_rx_complete();
        if self.pending.take().is_some() {
            debug!("Discarding untaken command on stop");
        }
        self.state = EngineState::Init;
        self.running = false;
        debug!("Frame engine stopped");
    }

    /// Return to [`EngineState::Init`] and clear the held command and all
    /// counters.  Any receive in flight is aborted, so a running engine arms a
    /// fresh header reception on the next [`Self::service()`].  Does not
    /// change whether the engine is running.
    pub fn reset<T: Transport>(&mut self, transport: &mut T) {
        transport.reset();
        self.signals.clear_rx_complete();
        self.state = EngineState::Init;
        self.pending = None;
        self.rx_len = 0;
        self.payload_started_ms = 0;
        self.errors = 0;
        self.frames_received = 0;
        self.frames_sent = 0;
        self.tx_in_flight = false;
    }

    /// Advance the reception state machine.  Call from the main loop.
    ///
    /// Non-blocking.  Does nothing while the engine is stopped.
    pub fn service<T: Transport, C: Clock>(&mut self, transport: &mut T, clock: &C) {
        if !self.running {
            return;
        }
        for _ in 0..MAX_TRANSITIONS_PER_TICK {
            let before = self.state;
            self.step(transport, clock);
            if self.state == before {
                break;
            }
        }
    }

    /// Whether a command is waiting to be taken.
    pub fn has_command(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the waiting command, if any.  Each received command is returned
    /// exactly once.
    pub fn take_command(&mut self) -> Option<F::Command> {
        self.pending.take()
    }

    /// Send a response or event frame.
    ///
    /// Waits for any previous transmit to complete before the transmit buffer
    /// is rewritten.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the engine hasn't been started
    /// - [`Error::PayloadTooLarge`] if `payload` exceeds
    ///   [`MAX_OUTBOUND_PAYLOAD`]
    pub fn send_response<T: Transport>(
        &mut self,
        transport: &mut T,
        code: u16,
        payload: &[u8],
    ) -> Result<()> {
        if !self.running {
            return Err(Error::NotRunning);
        }
        if payload.len() > MAX_OUTBOUND_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }

        // The transmit buffer may still be being read by the previous transfer
        while !transport.is_tx_complete() {
            core::hint::spin_loop();
        }

        let len = encode_frame(code, payload, &mut self.tx_buf)?;
        self.frames_sent = self.frames_sent_now();
        self.tx_mark = self.signals.tx_completions();
        while !transport.send(&self.tx_buf[..len]) {
            core::hint::spin_loop();
        }
        self.tx_in_flight = true;
        trace!("Sent frame {code:#06X} ({} byte payload)", payload.len());
        Ok(())
    }

    /// Send the error frame carrying `error_id`.
    pub fn send_error<T: Transport>(&mut self, transport: &mut T, error_id: u8) -> Result<()> {
        self.send_response(transport, RESP_CODE_ERROR_EVENT, &[error_id])
    }

    /// Send an empty event frame.
    pub fn event_notify<T: Transport>(&mut self, transport: &mut T) -> Result<()> {
        self.send_response(transport, RESP_CODE_EVENT, &[])
    }

    /// Diagnostic counters.
    ///
    /// Only the engine's own frames are counted as sent, once their transmit
    /// has completed.  Other text written to the transport, such as a host
    /// probe, is not.
    pub fn counters(&self) -> Counters {
        Counters {
            errors: self.errors,
            frames_received: self.frames_received,
            frames_sent: self.frames_sent_now(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }
}

// Internal functions
impl<F: CommandFactory> Engine<F> {
    // Transmits never overlap, so any completion since the mark belongs to
    // our last frame.
    fn frames_sent_now(&self) -> u16 {
        if self.tx_in_flight && self.signals.tx_completions() != self.tx_mark {
            self.frames_sent.wrapping_add(1)
        } else {
            self.frames_sent
        }
    }

    fn step<T: Transport, C: Clock>(&mut self, transport: &mut T, clock: &C) {
        match self.state {
            EngineState::Init => {
                if self.arm_header(transport) {
                    self.state = EngineState::AwaitingHeader;
                }
            }

            EngineState::AwaitingHeader => {
                if self.signals.take_rx_complete() {
                    self.on_header(transport, clock);
                }
            }

            EngineState::AwaitingPayload => {
                if self.signals.take_rx_complete() {
                    let expected = self.rx_len - HEADER_SIZE;
                    let got = transport.read_received(&mut self.rx_buf[HEADER_SIZE..self.rx_len]);
                    if got == expected {
                        self.state = EngineState::Building;
                    } else {
                        warn!("Short payload: expected {expected} bytes, got {got}");
                        self.state = EngineState::Error;
                    }
                } else if clock.now_ms().saturating_sub(self.payload_started_ms)
                    >= self.config.payload_timeout_ms
                {
                    warn!(
                        "Payload not received within {} ms",
                        self.config.payload_timeout_ms
                    );
                    self.state = EngineState::Error;
                }
            }

            EngineState::Building => {
                let header = FrameHeader::from_bytes(&[
                    self.rx_buf[0],
                    self.rx_buf[1],
                    self.rx_buf[2],
                    self.rx_buf[3],
                ]);
                let payload = &self.rx_buf[HEADER_SIZE..self.rx_len];
                match self.factory.build(header.code, payload) {
                    Ok(command) => {
                        debug!("Built command {:#06X}", header.code);
                        self.pending = Some(command);
                        self.frames_received = self.frames_received.wrapping_add(1);
                        self.state = EngineState::Ready;
                    }
                    Err(e) => {
                        warn!("Rejected frame {:#06X}: {e}", header.code);
                        self.state = EngineState::Error;
                    }
                }
            }

            EngineState::Ready => {
                if self.pending.is_none() && self.arm_header(transport) {
                    self.state = EngineState::AwaitingHeader;
                }
            }

            EngineState::Error => {
                self.errors = self.errors.wrapping_add(1);
                transport.reset();
                self.signals.clear_rx_complete();
                if let Err(e) = self.send_error(transport, ERROR_ID_FRAME) {
                    error!("Failed to send error frame: {e}");
                }
                self.state = EngineState::Init;
            }
        }
    }

    fn on_header<T: Transport, C: Clock>(&mut self, transport: &mut T, clock: &C) {
        let got = transport.read_received(&mut self.rx_buf[..HEADER_SIZE]);
        if got != HEADER_SIZE {
            warn!("Short header: got {got} bytes");
            self.state = EngineState::Error;
            return;
        }

        let header = FrameHeader::from_bytes(&[
            self.rx_buf[0],
            self.rx_buf[1],
            self.rx_buf[2],
            self.rx_buf[3],
        ]);
        let length = header.length as usize;
        trace!("Header code {:#06X} length {length}", header.code);

        if length == 0 {
            self.rx_len = HEADER_SIZE;
            self.state = EngineState::Building;
        } else if length > MAX_INBOUND_PAYLOAD {
            // Never arm a receive that would overrun the buffer
            warn!("Declared payload {length} exceeds {MAX_INBOUND_PAYLOAD} bytes");
            self.state = EngineState::Error;
        } else {
            match transport.start_receive(length) {
                Ok(()) => {
                    self.rx_len = HEADER_SIZE + length;
                    self.payload_started_ms = clock.now_ms();
                    self.state = EngineState::AwaitingPayload;
                }
                Err(e) => {
                    warn!("Failed to arm payload reception: {e}");
                    self.state = EngineState::Error;
                }
            }
        }
    }

    fn arm_header<T: Transport>(&mut self, transport: &mut T) -> bool {
        self.rx_len = 0;
        match transport.start_receive(HEADER_SIZE) {
            Ok(()) => {
                trace!("Header reception armed");
                true
            }
            Err(e) => {
                warn!("Failed to arm header reception: {e}");
                false
            }
        }
    }
}
