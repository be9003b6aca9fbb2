//! Two-wire request/ack handshake used to offload checksum computation to a peer.
//!
//! See [`crate`] for the wire-level description.  This module provides:
//! - [`HandshakeLink`] - the requester side, driving `request` and taking the `ack`
//!   rising-edge interrupt
//! - [`HandshakePeer`] - the peer side, driving `ack` and taking the `request`
//!   rising-edge interrupt
//! - [`SharedWindow`] - the out-of-band route the frame takes to the peer and back
//! - [`futures::AsyncRequester`] (`async` feature) - a polling requester for hosts which
//!   reach the lines through asynchronous I/O
//!
//! # Frame transfer
//!
//! The handshake lines only say "start" and "finished".  The frame travels through a
//! [`SharedWindow`], standing in for memory both devices can read and write:
//! 1. The requester moves the frame into the window, then raises `request`.
//! 2. The peer computes the checksum over the frame in the window and stores it there,
//!    then raises `ack`.
//! 3. Once the `ack` edge has been observed the requester moves the frame back out.
//!
//! The requester never touches the window while a request is outstanding, and the peer
//! never touches it outside a request.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncLines, AsyncRequester};
pub use sync::{HandshakeLink, HandshakePeer};

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::WordOrder;
use crate::line::{EdgeInput, Wire};
use crate::pool::{FrameSlot, SlotError, SlotResult};
use crate::signal::Signal;
use crate::{Error, Result};

/// How often a side re-reads a line level it is waiting on.  Levels have no
/// interrupt, only rising edges do.
pub const LINE_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Handshake counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeStats {
    /// Times `request` was raised
    pub requests: usize,
    /// `ack` edges observed for an outstanding request
    pub acks: usize,
    /// Protocol violations detected
    pub violations: usize,
}

/// Memory shared between requester and peer, holding the frame in transit.
#[derive(Debug, Default)]
pub struct SharedWindow {
    slot: Mutex<Option<FrameSlot>>,
}

impl SharedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a frame in the window.  Fails, handing the frame back, if one is
    /// already there.
    pub fn deposit(&self, slot: FrameSlot) -> SlotResult<()> {
        let mut window = match self.lock() {
            Ok(window) => window,
            Err(e) => return Err(SlotError::new(e, slot)),
        };
        if window.is_some() {
            warn!("Shared window already holds a frame");
            return Err(SlotError::new(Error::InvalidOperation, slot));
        }
        *window = Some(slot);
        Ok(())
    }

    /// Remove the frame from the window, if there is one.
    pub fn take(&self) -> Result<Option<FrameSlot>> {
        Ok(self.lock()?.take())
    }

    /// Build the error for a failed cycle, taking back whatever frame is still
    /// in the window.  A failure to take it replaces `error`.
    pub fn reclaim(&self, error: Error) -> SlotError {
        match self.take() {
            Ok(slot) => SlotError { error, slot },
            Err(e) => {
                error!("Failed to reclaim frame after {error}: {e}");
                SlotError::from(e)
            }
        }
    }

    /// Operate on the frame in the window.  Fails with
    /// [`Error::ProtocolViolation`] if the window is empty.
    pub fn with_frame<R>(&self, f: impl FnOnce(&mut FrameSlot) -> Result<R>) -> Result<R> {
        let mut window = self.lock()?;
        match window.as_mut() {
            Some(slot) => f(slot),
            None => {
                warn!("Request raised with an empty shared window");
                Err(Error::ProtocolViolation)
            }
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().map(|window| window.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<FrameSlot>>> {
        self.slot.lock().map_err(|_| Error::StagePanicked)
    }
}

/// Wakes a handshake side blocked waiting for an edge, failing its wait with
/// [`Error::Aborted`].
#[derive(Debug, Clone)]
pub struct HandshakeCloser {
    signal: Arc<Signal>,
}

impl HandshakeCloser {
    pub(crate) fn new(signal: Arc<Signal>) -> Self {
        Self { signal }
    }

    pub fn close(&self) {
        self.signal.close();
    }
}

/// Wait for `line` to reach `high`, re-reading it every [`LINE_POLL_INTERVAL`].
///
/// Fails with [`Error::Timeout`] once `timeout` has passed, or with
/// [`Error::Aborted`] if `closed` reports the wait was abandoned.
pub(crate) fn wait_level<I: EdgeInput>(
    line: &I,
    high: bool,
    timeout: Option<Duration>,
    closed: impl Fn() -> bool,
) -> Result<()> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if line.is_high() == high {
            return Ok(());
        }
        if closed() {
            return Err(Error::Aborted);
        }
        let pause = match deadline {
            None => LINE_POLL_INTERVAL,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout);
                }
                LINE_POLL_INTERVAL.min(deadline - now)
            }
        };
        thread::sleep(pause);
    }
}

/// Create a requester and peer joined by two in-process [`Wire`]s and a
/// [`SharedWindow`].
pub fn pair(word_order: WordOrder) -> Result<(HandshakeLink, HandshakePeer)> {
    let request = Arc::new(Wire::new("request"));
    let ack = Arc::new(Wire::new("ack"));
    let window = Arc::new(SharedWindow::new());

    let link = HandshakeLink::new(request.clone(), ack.clone(), window.clone())?;
    let peer = HandshakePeer::new(ack, request, window, word_order)?;
    Ok((link, peer))
}
