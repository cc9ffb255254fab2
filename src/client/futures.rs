//! Asynchronous host client.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::HostClientConfig;
use crate::io::{Reader, Writer};
use crate::protocol::{
    FrameHeader, HEADER_SIZE, MAX_INBOUND_PAYLOAD, RESP_CODE_ERROR_EVENT, RESP_CODE_EVENT,
    RESP_CODE_LOG,
};
use crate::router::{PROBE, TOKEN_LEN};
use crate::{Error, Result};

// Bytes requested from the reader per poll
const READ_CHUNK: usize = 64;

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// async client to be able to yield, waiting for the device to send
/// something.
///
/// This trait keeps the client free of any specific async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use tokio::time::{Duration, sleep};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         sleep(Duration::from_millis(10)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// Byte stream access used by the client.
#[async_trait(?Send)]
pub trait AsyncFrameIo {
    /// Read whatever is available into `buf`, returning how much was read.
    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data`.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// [`AsyncFrameIo`] implementation using [`crate::io::Reader`] and
/// [`crate::io::Writer`].
pub struct ReaderWriterFrameIo<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: Reader, W: Writer> ReaderWriterFrameIo<'a, R, W> {
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncFrameIo for ReaderWriterFrameIo<'_, R, W> {
    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await.map_err(|e| {
            warn!("Read failed: {e:?}");
            Error::Io
        })
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write(data).await.map_err(|e| {
            warn!("Write failed: {e:?}");
            Error::Io
        })
    }
}

/// A frame received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub payload: Vec<u8>,
}

/// Async client for the host end of the link.
///
/// See [`AsyncDelay`] for required delay trait.
///
/// Example usage:
///
/// ```rust,ignore
/// use glog_link::client::{AsyncHostClient, HostClientConfig};
/// use glog_link::protocol::COM_CODE_GET_VERSION;
/// use glog_link::router::TOKEN_FIELD_TEST;
///
/// let mut reader = ...; // implement Reader trait
/// let mut writer = ...; // implement Writer trait
/// let mut client =
///     AsyncHostClient::<_, _, Delay>::new(&mut reader, &mut writer, HostClientConfig::default());
/// client.answer_probe(TOKEN_FIELD_TEST).await?;
/// let version = client.request(COM_CODE_GET_VERSION, &[]).await?;
/// ```
pub struct AsyncHostClient<'a, R: Reader, W: Writer, D: AsyncDelay> {
    io: ReaderWriterFrameIo<'a, R, W>,
    config: HostClientConfig,
    rx: Vec<u8>,
    logs: Vec<String>,
    events: usize,
    _delay: core::marker::PhantomData<D>,
}

impl<'a, R: Reader, W: Writer, D: AsyncDelay> AsyncHostClient<'a, R, W, D> {
    /// Create a new AsyncHostClient
    ///
    /// Arguments:
    /// - `reader`: Reader object to read from the device
    /// - `writer`: Writer object to write to the device
    /// - `config`: Client configuration
    pub fn new(reader: &'a mut R, writer: &'a mut W, config: HostClientConfig) -> Self {
        Self {
            io: ReaderWriterFrameIo::new(reader, writer),
            config,
            rx: Vec::new(),
            logs: Vec::new(),
            events: 0,
            _delay: core::marker::PhantomData,
        }
    }

    /// Wait for the device's probe, and answer it with `token`.
    ///
    /// Anything received before the probe is discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no probe arrived within the poll budget
    /// - [`Error::Io`] if the reader or writer failed
    pub async fn answer_probe(&mut self, token: &[u8; TOKEN_LEN]) -> Result<()> {
        let mut idle = 0;
        let end = loop {
            if let Some(pos) = find(&self.rx, PROBE) {
                break pos + PROBE.len();
            }
            // Keep only what could be the start of a probe split across reads
            let keep = PROBE.len() - 1;
            if self.rx.len() > keep {
                self.rx.drain(..self.rx.len() - keep);
            }
            self.read_more(&mut idle).await?;
        };
        self.rx.drain(..end);
        debug!("Probe received, answering");
        self.io.write_all(token).await
    }

    /// Send a command frame and wait for its response.
    ///
    /// Log frames received in the meantime are kept, see
    /// [`Self::take_logs()`], and event frames are counted.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] if the device can't receive `payload`
    /// - [`Error::Remote`] if the device answered with an error frame
    /// - [`Error::Timeout`] if no response arrived within the poll budget
    /// - [`Error::Io`] if the reader or writer failed
    pub async fn request(&mut self, code: u16, payload: &[u8]) -> Result<Frame> {
        if payload.len() > MAX_INBOUND_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }
        let header = FrameHeader::new(code, payload.len() as u16);
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(payload);
        self.io.write_all(&frame).await?;
        debug!("Sent command {code:#06X} ({} byte payload)", payload.len());

        let response = self.next_frame().await?;
        match response.code {
            RESP_CODE_ERROR_EVENT => {
                let id = response.payload.first().copied().unwrap_or_default();
                warn!("Device answered {code:#06X} with error 0x{id:02X}");
                Err(Error::Remote(id))
            }
            _ => Ok(response),
        }
    }

    /// Wait for the next frame that isn't a log or event frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no frame arrived within the poll budget
    /// - [`Error::Io`] if the reader failed
    pub async fn next_frame(&mut self) -> Result<Frame> {
        let mut idle = 0;
        loop {
            while let Some(frame) = self.take_buffered_frame() {
                match frame.code {
                    RESP_CODE_LOG => {
                        let line = String::from_utf8_lossy(&frame.payload).into_owned();
                        debug!("Device log: {line}");
                        self.logs.push(line);
                    }
                    RESP_CODE_EVENT => {
                        trace!("Device event");
                        self.events += 1;
                    }
                    _ => return Ok(frame),
                }
            }
            self.read_more(&mut idle).await?;
        }
    }

    /// Log lines received so far, oldest first.
    pub fn take_logs(&mut self) -> Vec<String> {
        core::mem::take(&mut self.logs)
    }

    /// Number of event frames received so far.
    pub fn events(&self) -> usize {
        self.events
    }
}

// Internal functions
impl<R: Reader, W: Writer, D: AsyncDelay> AsyncHostClient<'_, R, W, D> {
    // Read once, yielding first if the last read returned nothing.  Counts
    // consecutive empty reads against the poll budget.
    async fn read_more(&mut self, idle: &mut usize) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        let len = self.io.read_some(&mut buf).await?;
        if len > 0 {
            self.rx.extend_from_slice(&buf[..len]);
            *idle = 0;
            return Ok(());
        }

        *idle += 1;
        if *idle >= self.config.max_idle_polls {
            debug!("Gave up after {idle} empty reads");
            return Err(Error::Timeout);
        }
        D::delay().await;
        Ok(())
    }

    fn take_buffered_frame(&mut self) -> Option<Frame> {
        if self.rx.len() < HEADER_SIZE {
            return None;
        }
        let header = FrameHeader::from_bytes(&[self.rx[0], self.rx[1], self.rx[2], self.rx[3]]);
        let end = HEADER_SIZE + header.length as usize;
        if self.rx.len() < end {
            return None;
        }
        let payload = self.rx[HEADER_SIZE..end].to_vec();
        self.rx.drain(..end);
        Some(Frame {
            code: header.code,
            payload,
        })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
