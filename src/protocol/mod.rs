//! Binary field-test protocol: wire constants, frame header codec and the
//! frame protocol engine.
//!
//! Every frame, in both directions, is a 4-byte little-endian header followed
//! by the payload:
//!
//! ```text
//! [code: u16][length: u16][payload: length bytes]
//! ```
//!
//! See [`Engine`] for how the device receives and sends frames.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod engine;

pub use engine::{Engine, EngineState};

use crate::{Error, Result};

/// Size of the frame header (code + length)
pub const HEADER_SIZE: usize = 4;

/// Device reception buffer size, header included
pub const RX_BUFFER_SIZE: usize = 64;

/// Device transmit buffer size, header included
pub const TX_BUFFER_SIZE: usize = 512;

/// Largest payload the device will accept in a command frame
pub const MAX_INBOUND_PAYLOAD: usize = RX_BUFFER_SIZE - HEADER_SIZE;

/// Largest payload the device will send in a response frame
pub const MAX_OUTBOUND_PAYLOAD: usize = TX_BUFFER_SIZE - HEADER_SIZE;

/// Default time allowed for a payload to arrive once its header has
pub const DEFAULT_PAYLOAD_TIMEOUT_MS: u64 = 1000;

// Command codes (host -> device)
pub const COM_CODE_STATUS: u16 = 0;
pub const COM_CODE_START: u16 = 1;
pub const COM_CODE_CONFIGURE: u16 = 2;
pub const COM_CODE_FETCH_RESULT: u16 = 3;
pub const COM_CODE_RESET: u16 = 4;
pub const COM_CODE_SET_DATE_LOC: u16 = 5;
pub const COM_CODE_GET_VERSION: u16 = 6;
pub const COM_CODE_GET_ALMANAC_DATES: u16 = 7;
pub const COM_CODE_UPDATE_ALMANAC: u16 = 8;
pub const COM_CODE_CHECK_ALMANAC_UPDATE: u16 = 9;

// Response and event codes (device -> host)
pub const RESP_CODE_EVENT: u16 = 0x80;
pub const RESP_CODE_WIFI_RESULT: u16 = 0x81;
pub const RESP_CODE_GNSS_AUTONOMOUS_RESULT: u16 = 0x82;
pub const RESP_CODE_GNSS_ASSISTED_RESULT: u16 = 0x83;
pub const RESP_CODE_LOG: u16 = 0x84;
pub const RESP_CODE_ERROR_EVENT: u16 = 0x90;

/// Error identifier carried by the engine's error frame.  Overflow, payload
/// timeout and malformed frames all share it.
pub const ERROR_ID_FRAME: u8 = 0x00;

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Command or response code
    pub code: u16,
    /// Payload length in bytes
    pub length: u16,
}

impl FrameHeader {
    pub const fn new(code: u16, length: u16) -> Self {
        Self { code, length }
    }

    /// Decode a header from its 4 wire bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            code: u16::from_le_bytes([bytes[0], bytes[1]]),
            length: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Encode the header to its 4 wire bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let code = self.code.to_le_bytes();
        let length = self.length.to_le_bytes();
        [code[0], code[1], length[0], length[1]]
    }
}

/// Encode a complete frame into `buf`.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// - [`Error::PayloadTooLarge`] if `payload` doesn't fit in a u16 length, or
///   the frame doesn't fit in `buf`.
pub fn encode_frame(code: u16, payload: &[u8], buf: &mut [u8]) -> Result<usize> {
    let length = u16::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge)?;
    let total = HEADER_SIZE + payload.len();
    if total > buf.len() {
        return Err(Error::PayloadTooLarge);
    }
    buf[..HEADER_SIZE].copy_from_slice(&FrameHeader::new(code, length).to_bytes());
    buf[HEADER_SIZE..total].copy_from_slice(payload);
    Ok(total)
}

/// Builds typed commands from received frames.
///
/// Implemented by the application.  The engine calls [`CommandFactory::build()`]
/// once per fully received frame, and hands the result to whoever calls
/// [`Engine::take_command()`].
pub trait CommandFactory {
    /// The command type produced.
    type Command;

    /// Build a command from a frame's code and payload.
    ///
    /// # Errors
    ///
    /// Return an error if the code is unknown or the payload is not valid for
    /// it.  The engine treats any error as a malformed frame.
    fn build(&mut self, code: u16, payload: &[u8]) -> Result<Self::Command>;
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time allowed for a payload to complete once its header has arrived
    pub payload_timeout_ms: u64,
}

impl EngineConfig {
    pub const fn new() -> Self {
        Self {
            payload_timeout_ms: DEFAULT_PAYLOAD_TIMEOUT_MS,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic counters.  Monotonic, wrapping at u16.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Frames that hit the error path
    pub errors: u16,
    /// Frames successfully built into commands
    pub frames_received: u16,
    /// Frames whose transmission completed
    pub frames_sent: u16,
}

impl Counters {
    /// Payload of the STATUS command response:
    /// `[errors][frames received][frames sent]`, each u16 little-endian.
    pub fn to_le_bytes(&self) -> [u8; 6] {
        let errors = self.errors.to_le_bytes();
        let received = self.frames_received.to_le_bytes();
        let sent = self.frames_sent.to_le_bytes();
        [
            errors[0],
            errors[1],
            received[0],
            received[1],
            sent[0],
            sent[1],
        ]
    }
}
