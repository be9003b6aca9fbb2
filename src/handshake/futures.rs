//! Asynchronous, polling requester - typically used by a host which reaches the two
//! lines over a bridge (USB GPIO adapter, debug probe) rather than owning them directly.
//!
//! Without an interrupt, the `ack` rising edge is detected by polling the line level:
//! the cycle only starts once `ack` has been seen low, and completes on the first poll
//! which sees it high.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::handshake::{HandshakeStats, SharedWindow};
use crate::pool::{FrameSlot, SlotError, SlotResult};
use crate::{Error, Result};

/// Access to the two handshake lines from the requester's side.
#[async_trait(?Send)]
pub trait AsyncLines {
    /// Drive the `request` line
    async fn set_request(&mut self, high: bool) -> Result<()>;

    /// Read the `ack` line level
    async fn ack_is_high(&mut self) -> Result<bool>;
}

/// Yield delay between polls of the `ack` line.
///
/// The application provides this, keeping this crate free of any particular
/// async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_micros(50)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// Polling requester.
///
/// See [`AsyncDelay`] for the required delay trait.
pub struct AsyncRequester<L: AsyncLines, D: AsyncDelay> {
    lines: L,
    max_polls: usize,
    stats: HandshakeStats,
    _delay: core::marker::PhantomData<D>,
}

impl<L: AsyncLines, D: AsyncDelay> AsyncRequester<L, D> {
    /// Create a new requester.
    ///
    /// Arguments:
    /// - `lines`: access to the `request` and `ack` lines
    /// - `max_polls`: how many delays to wait for each `ack` level change
    ///   before giving up
    pub fn new(lines: L, max_polls: usize) -> Self {
        Self {
            lines,
            max_polls,
            stats: HandshakeStats::default(),
            _delay: core::marker::PhantomData,
        }
    }

    /// Perform one request/ack cycle.
    ///
    /// Returns:
    /// - `Ok(())`: the peer raised `ack` for this request
    /// - `Err(Error::Timeout)`: `ack` never returned low before the request, or the
    ///   peer did not raise it in time
    pub async fn cycle(&mut self) -> Result<()> {
        if !self.poll_ack(false).await? {
            warn!("Ack still high at start of request");
            return Err(Error::Timeout);
        }

        self.lines.set_request(true).await?;
        self.stats.requests += 1;
        debug!("Request raised, polling for ack");

        let acked = self.poll_ack(true).await;
        self.lines.set_request(false).await?;

        match acked? {
            true => {
                self.stats.acks += 1;
                debug!("Ack received");
                Ok(())
            }
            false => {
                warn!("Timed out polling for ack");
                Err(Error::Timeout)
            }
        }
    }

    /// Hand a frame to the peer through `window`, perform one cycle, and take
    /// the frame back with the peer's checksum.  On failure the frame is handed
    /// back in the [`SlotError`] whenever it can be recovered.
    pub async fn request_and_await(
        &mut self,
        window: &SharedWindow,
        slot: FrameSlot,
    ) -> SlotResult<FrameSlot> {
        window.deposit(slot)?;
        if let Err(e) = self.cycle().await {
            return Err(window.reclaim(e));
        }

        let Some(slot) = window.take()? else {
            error!("Ack raised but shared window is empty");
            self.stats.violations += 1;
            return Err(SlotError::from(Error::ProtocolViolation));
        };
        if slot.checksum().is_none() {
            error!("Ack raised before checksum was written");
            self.stats.violations += 1;
            return Err(SlotError::new(Error::ProtocolViolation, slot));
        }
        Ok(slot)
    }

    pub fn stats(&self) -> HandshakeStats {
        self.stats
    }

    // Returns whether `ack` reached the wanted level within the poll budget.
    async fn poll_ack(&mut self, high: bool) -> Result<bool> {
        for _ in 0..=self.max_polls {
            if self.lines.ack_is_high().await? == high {
                return Ok(true);
            }
            D::delay().await;
        }
        Ok(false)
    }
}
