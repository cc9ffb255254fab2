//! NUL-terminated line reception, used by the demo channel and by host
//! detection.
//!
//! Bytes are busy-polled from the transport one at a time until a NUL
//! arrives, the buffer fills, or the line goes quiet for too long.  The
//! timeout restarts with every byte received.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use heapless::Vec;

use crate::io::{Clock, Transport};
use crate::{Error, Result};

/// Receive one NUL-terminated line into `buf`.
///
/// On success `buf` holds the line including its terminating NUL.  On error it
/// holds whatever was received before giving up.  The transport's receiver
/// must already be enabled.
///
/// Arguments:
/// - `transport` - Where the bytes come from
/// - `clock` - Used to time the silence between bytes
/// - `buf` - Receives the line.  Cleared first.
/// - `timeout_ms` - Longest silence tolerated, before the first byte or
///   between two bytes
///
/// # Errors
///
/// - [`Error::Overflow`] if `buf` filled before a NUL arrived
/// - [`Error::Timeout`] if the line went quiet for more than `timeout_ms`
pub fn receive_line<T: Transport, C: Clock, const N: usize>(
    transport: &mut T,
    clock: &C,
    buf: &mut Vec<u8, N>,
    timeout_ms: u64,
) -> Result<()> {
    buf.clear();
    let mut last_byte_ms = clock.now_ms();
    loop {
        if let Some(byte) = transport.read_byte() {
            if buf.push(byte).is_err() {
                return Err(overflow(buf));
            }
            if byte == 0 {
                trace!("Received line of {} bytes", buf.len());
                return Ok(());
            }
            if buf.is_full() {
                return Err(overflow(buf));
            }
            last_byte_ms = clock.now_ms();
        } else if clock.now_ms().saturating_sub(last_byte_ms) > timeout_ms {
            trace!("Line timed out after {} bytes", buf.len());
            return Err(Error::Timeout);
        } else {
            core::hint::spin_loop();
        }
    }
}

/// The text of a received line, without its NUL and any line ending.
///
/// # Errors
///
/// - [`Error::Malformed`] if the line isn't valid UTF-8
pub fn line_text(line: &[u8]) -> Result<&str> {
    let end = line.iter().position(|&b| b == 0).unwrap_or(line.len());
    let text = core::str::from_utf8(&line[..end]).map_err(|_| Error::Malformed)?;
    Ok(text.trim_end_matches(['\r', '\n']))
}

fn overflow<const N: usize>(buf: &Vec<u8, N>) -> Error {
    debug!("Line overflowed {} byte buffer", buf.capacity());
    Error::Overflow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockClock, MockTransport};

    #[test]
    fn line_ends_at_nul() {
        let mut transport = MockTransport::new();
        let clock = MockClock::auto(1);
        transport.push_incoming(b"1234,5\0rest");

        let mut buf: Vec<u8, 16> = Vec::new();
        receive_line(&mut transport, &clock, &mut buf, 100).unwrap();
        assert_eq!(&buf[..], b"1234,5\0");
        assert_eq!(line_text(&buf), Ok("1234,5"));
        assert_eq!(transport.incoming_len(), 4);
    }

    #[test]
    fn exactly_full_line_is_accepted() {
        let mut transport = MockTransport::new();
        let clock = MockClock::auto(1);
        transport.push_incoming(b"demooglog\0");

        let mut buf: Vec<u8, 10> = Vec::new();
        assert_eq!(receive_line(&mut transport, &clock, &mut buf, 100), Ok(()));
    }

    #[test]
    fn unterminated_line_overflows() {
        let mut transport = MockTransport::new();
        let clock = MockClock::auto(1);
        transport.push_incoming(b"0123456789abcdef");

        let mut buf: Vec<u8, 10> = Vec::new();
        assert_eq!(
            receive_line(&mut transport, &clock, &mut buf, 100),
            Err(Error::Overflow)
        );
        assert_eq!(&buf[..], b"0123456789");
    }

    #[test]
    fn silence_times_out() {
        let mut transport = MockTransport::new();
        let clock = MockClock::auto(1);
        transport.push_incoming(b"12");

        let mut buf: Vec<u8, 10> = Vec::new();
        assert_eq!(
            receive_line(&mut transport, &clock, &mut buf, 50),
            Err(Error::Timeout)
        );
        assert_eq!(&buf[..], b"12");
        assert!(clock.now() > 50);
    }

    #[test]
    fn line_text_strips_line_endings() {
        assert_eq!(line_text(b"abc\r\n\0"), Ok("abc"));
        assert_eq!(line_text(b"abc"), Ok("abc"));
        assert_eq!(line_text(&[0xFF, 0x00]), Err(Error::Malformed));
    }
}
