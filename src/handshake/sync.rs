//! Interrupt-driven handshake - requester and peer sides.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::checksum::frame_checksum;
use crate::config::WordOrder;
use crate::handshake::{HandshakeCloser, HandshakeStats, SharedWindow, wait_level};
use crate::line::{EdgeInput, OutputLine, Wire};
use crate::pool::{FrameSlot, SlotError, SlotResult};
use crate::signal::Signal;
use crate::{Error, Result};

/// State shared between the requester and its `ack` interrupt handler.
#[derive(Debug)]
struct AckMonitor {
    edge: Arc<Signal>,
    outstanding: AtomicBool,
    violation: AtomicBool,
    requests: AtomicUsize,
    acks: AtomicUsize,
    violations: AtomicUsize,
}

impl AckMonitor {
    fn new() -> Self {
        Self {
            edge: Arc::new(Signal::new("handshake-ack")),
            outstanding: AtomicBool::new(false),
            violation: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            acks: AtomicUsize::new(0),
            violations: AtomicUsize::new(0),
        }
    }

    // Interrupt context: atomics and a notify only.
    fn on_ack_rising(&self) {
        if !self.outstanding.load(Ordering::Acquire) {
            self.flag_violation();
            return;
        }
        self.acks.fetch_add(1, Ordering::Relaxed);
        if self.edge.notify() {
            self.flag_violation();
        }
    }

    fn flag_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        self.violation.store(true, Ordering::Release);
    }

    fn take_violation(&self) -> bool {
        self.violation.swap(false, Ordering::AcqRel)
    }

    fn stats(&self) -> HandshakeStats {
        HandshakeStats {
            requests: self.requests.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
        }
    }
}

/// Requester side of the handshake.
///
/// Drives the `request` line and waits on the `ack` rising edge.  One cycle is
/// performed per [`Self::request_and_await()`] call:
/// 1. Check no stray `ack` edge has been seen since the last cycle, and wait for
///    `ack` to be low
/// 2. Move the frame into the [`SharedWindow`] and raise `request`
/// 3. Wait for exactly one `ack` rising edge
/// 4. Lower `request` and move the frame, now carrying the peer's checksum, back out
///
/// If a cycle fails the frame is handed back in the [`SlotError`] whenever it can
/// be recovered.
pub struct HandshakeLink<O: OutputLine = Arc<Wire>, I: EdgeInput = Arc<Wire>> {
    request: O,
    ack: I,
    window: Arc<SharedWindow>,
    monitor: Arc<AckMonitor>,
}

impl<O: OutputLine, I: EdgeInput> HandshakeLink<O, I> {
    /// Create the requester, attaching its handler to the `ack` line's rising
    /// edge.  `request` is driven low.
    pub fn new(request: O, ack: I, window: Arc<SharedWindow>) -> Result<Self> {
        let monitor = Arc::new(AckMonitor::new());
        {
            let monitor = monitor.clone();
            ack.on_rising(Box::new(move || monitor.on_ack_rising()))?;
        }
        request.set_low();

        debug!("Created handshake requester");

        Ok(Self {
            request,
            ack,
            window,
            monitor,
        })
    }

    /// Hand the frame to the peer and wait for it to finish the checksum.
    ///
    /// `timeout` separately bounds the wait for `ack` to be low and the wait for
    /// the `ack` edge.  On success the returned slot carries the peer's checksum.
    pub fn request_and_await(
        &mut self,
        slot: FrameSlot,
        timeout: Option<Duration>,
    ) -> SlotResult<FrameSlot> {
        // Anything seen since the previous cycle was not ours
        if self.monitor.take_violation() || self.monitor.edge.take() {
            error!("Unsolicited ack edge before request");
            return Err(SlotError::new(Error::ProtocolViolation, slot));
        }
        if let Err(e) = self.wait_ack_low(timeout) {
            return Err(SlotError::new(e, slot));
        }

        self.window.deposit(slot)?;
        self.monitor.outstanding.store(true, Ordering::Release);
        self.monitor.requests.fetch_add(1, Ordering::Relaxed);
        trace!("Raising request");
        self.request.set_high();

        let waited = self.monitor.edge.wait(timeout);

        self.monitor.outstanding.store(false, Ordering::Release);
        self.request.set_low();

        if let Err(e) = waited {
            // Whatever the peer was doing, the frame is ours again
            if e == Error::Timeout {
                warn!("Timed out waiting for ack");
            }
            return Err(self.window.reclaim(e));
        }
        trace!("Ack received");

        if self.monitor.take_violation() {
            error!("Duplicate ack edge within one request");
            return Err(self.window.reclaim(Error::ProtocolViolation));
        }

        let Some(slot) = self.window.take()? else {
            error!("Ack raised but shared window is empty");
            return Err(SlotError::from(Error::ProtocolViolation));
        };
        if slot.checksum().is_none() {
            error!("Ack raised before checksum was written");
            return Err(SlotError::new(Error::ProtocolViolation, slot));
        }
        Ok(slot)
    }

    pub fn stats(&self) -> HandshakeStats {
        self.monitor.stats()
    }

    pub fn closer(&self) -> HandshakeCloser {
        HandshakeCloser::new(self.monitor.edge.clone())
    }

    // The peer may still be holding ack from the previous cycle
    fn wait_ack_low(&self, timeout: Option<Duration>) -> Result<()> {
        let edge = &self.monitor.edge;
        wait_level(&self.ack, false, timeout, || edge.is_closed()).inspect_err(|e| {
            if *e == Error::Timeout {
                warn!("Ack still high at start of request");
            }
        })
    }
}

/// Peer side of the handshake - the offload device.
///
/// Each cycle it waits for a `request` rising edge, checksums the frame in the
/// [`SharedWindow`] and raises `ack`.  It holds `ack` high until the requester
/// lowers `request`, so a requester which only polls levels still sees it, then
/// lowers `ack` ready for the next cycle.
pub struct HandshakePeer<O: OutputLine = Arc<Wire>, I: EdgeInput = Arc<Wire>> {
    ack: O,
    request: I,
    edge: Arc<Signal>,
    window: Arc<SharedWindow>,
    word_order: WordOrder,
    cycles: usize,
}

impl<O: OutputLine, I: EdgeInput> HandshakePeer<O, I> {
    /// Create the peer, attaching its handler to the `request` line's rising
    /// edge.  `ack` is driven low.
    pub fn new(
        ack: O,
        request: I,
        window: Arc<SharedWindow>,
        word_order: WordOrder,
    ) -> Result<Self> {
        let edge = Arc::new(Signal::new("handshake-request"));
        {
            let edge = edge.clone();
            request.on_rising(Box::new(move || {
                edge.notify();
            }))?;
        }
        ack.set_low();

        debug!("Created handshake peer ({word_order:?})");

        Ok(Self {
            ack,
            request,
            edge,
            window,
            word_order,
            cycles: 0,
        })
    }

    /// Serve a single request.
    ///
    /// `timeout` separately bounds the wait for the `request` edge and the wait
    /// for `request` to drop again.
    pub fn serve_one(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.edge.wait(timeout)?;
        if !self.request.is_high() {
            error!("Request edge seen but request line is low");
            return Err(Error::ProtocolViolation);
        }

        let word_order = self.word_order;
        let checksum = self.window.with_frame(|slot| {
            let checksum = frame_checksum(slot, word_order);
            slot.set_checksum(checksum)?;
            Ok(checksum)
        })?;
        self.cycles += 1;
        trace!("Peer cycle {} checksum {checksum:#06X}", self.cycles);

        self.ack.set_high();
        let edge = &self.edge;
        let released = wait_level(&self.request, false, timeout, || edge.is_closed());
        self.ack.set_low();
        released
    }

    /// Serve requests until closed.  Returns the number of cycles served.
    pub fn serve(&mut self) -> Result<usize> {
        loop {
            match self.serve_one(None) {
                Ok(()) => {}
                Err(Error::Aborted) => {
                    debug!("Peer closed after {} cycles", self.cycles);
                    self.ack.set_low();
                    return Ok(self.cycles);
                }
                Err(e) => {
                    error!("Peer failed: {e}");
                    self.ack.set_low();
                    return Err(e);
                }
            }
        }
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn closer(&self) -> HandshakeCloser {
        HandshakeCloser::new(self.edge.clone())
    }
}
