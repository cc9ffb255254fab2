//! Test doubles shared by the unit tests.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::cell::Cell;
use std::boxed::Box;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::io::{Clock, TransferSignals, Transport};
use crate::protocol::{CommandFactory, HEADER_SIZE};
use crate::{Error, Result};

/// Signals with a `'static` lifetime, as a firmware would declare them.
pub(crate) fn leak_signals() -> &'static TransferSignals {
    Box::leak(Box::new(TransferSignals::new()))
}

/// Scripted transport.  Incoming bytes are queued with [`Self::push_incoming`]
/// and complete an armed receive as soon as enough of them have arrived.
pub(crate) struct MockTransport {
    incoming: VecDeque<u8>,
    sent: Vec<u8>,
    armed: Option<usize>,
    received: Vec<u8>,
    rx_signals: Option<&'static TransferSignals>,
    tx_signals: Option<&'static TransferSignals>,
    tx_busy_polls: Cell<usize>,
    pub(crate) receiving: bool,
    pub(crate) resets: usize,
    pub(crate) receive_requests: Vec<usize>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            incoming: VecDeque::new(),
            sent: Vec::new(),
            armed: None,
            received: Vec::new(),
            rx_signals: None,
            tx_signals: None,
            tx_busy_polls: Cell::new(0),
            receiving: false,
            resets: 0,
            receive_requests: Vec::new(),
        }
    }

    pub(crate) fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().copied());
        self.complete_armed();
    }

    pub(crate) fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    /// Report the transmitter busy for the next `polls` calls to
    /// `is_tx_complete`.
    pub(crate) fn set_tx_busy_polls(&self, polls: usize) {
        self.tx_busy_polls.set(polls);
    }

    pub(crate) fn tx_busy_polls(&self) -> usize {
        self.tx_busy_polls.get()
    }

    pub(crate) fn sent_bytes(&self) -> &[u8] {
        &self.sent
    }

    pub(crate) fn sent_text(&self) -> std::string::String {
        std::string::String::from_utf8_lossy(&self.sent).into_owned()
    }

    pub(crate) fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Split everything sent so far into `(code, payload)` frames.
    pub(crate) fn sent_frames(&self) -> Vec<(u16, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut rest = &self.sent[..];
        while rest.len() >= HEADER_SIZE {
            let code = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            let end = (HEADER_SIZE + len).min(rest.len());
            frames.push((code, rest[HEADER_SIZE..end].to_vec()));
            rest = &rest[end..];
        }
        frames
    }

    fn complete_armed(&mut self) {
        if let Some(len) = self.armed {
            if self.incoming.len() >= len {
                self.received = self.incoming.drain(..len).collect();
                self.armed = None;
                if let Some(signals) = self.rx_signals {
                    signals.notify_rx_complete();
                }
            }
        }
    }
}

impl Transport for MockTransport {
    fn start(&mut self) {
        self.receiving = true;
    }

    fn stop(&mut self) {
        self.receiving = false;
    }

    fn reset(&mut self) {
        self.armed = None;
        self.received.clear();
        self.resets += 1;
    }

    fn is_tx_complete(&self) -> bool {
        let polls = self.tx_busy_polls.get();
        if polls > 0 {
            self.tx_busy_polls.set(polls - 1);
            false
        } else {
            true
        }
    }

    fn send(&mut self, data: &[u8]) -> bool {
        self.sent.extend_from_slice(data);
        if let Some(signals) = self.tx_signals {
            signals.notify_tx_complete();
        }
        true
    }

    fn start_receive(&mut self, len: usize) -> Result<()> {
        if self.armed.is_some() {
            return Err(Error::Busy);
        }
        self.receive_requests.push(len);
        self.armed = Some(len);
        self.complete_armed();
        Ok(())
    }

    fn read_received(&mut self, buf: &mut [u8]) -> usize {
        let len = self.received.len().min(buf.len());
        buf[..len].copy_from_slice(&self.received[..len]);
        self.received.clear();
        len
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.incoming.pop_front()
    }

    fn register_rx_complete(&mut self, signals: Option<&'static TransferSignals>) {
        self.rx_signals = signals;
    }

    fn register_tx_complete(&mut self, signals: Option<&'static TransferSignals>) {
        self.tx_signals = signals;
    }
}

/// Clock shared between a test and the object under test.  Each read advances
/// time by `step` milliseconds, so busy-polling loops make progress.
#[derive(Clone)]
pub(crate) struct MockClock {
    now: Rc<Cell<u64>>,
    step: u64,
}

impl MockClock {
    /// Clock that only moves when the test advances it.
    pub(crate) fn manual() -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            step: 0,
        }
    }

    /// Clock that moves `step` ms every time it is read.
    pub(crate) fn auto(step: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            step,
        }
    }

    pub(crate) fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub(crate) fn now(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestCommand {
    pub(crate) code: u16,
    pub(crate) payload: Vec<u8>,
}

/// Accepts command codes up to and including `max_code`.
pub(crate) struct TestFactory {
    pub(crate) max_code: u16,
    pub(crate) built: usize,
}

impl TestFactory {
    pub(crate) fn new() -> Self {
        Self {
            max_code: 9,
            built: 0,
        }
    }
}

impl CommandFactory for TestFactory {
    type Command = TestCommand;

    fn build(&mut self, code: u16, payload: &[u8]) -> Result<TestCommand> {
        if code > self.max_code {
            return Err(Error::UnknownCommand);
        }
        self.built += 1;
        Ok(TestCommand {
            code,
            payload: payload.to_vec(),
        })
    }
}
