//! Checksum strategies used by the checksum stage.
//!
//! - [`LocalChecksum`] computes the checksum on the calling thread.
//! - [`OffloadChecksum`] hands the frame to a peer over a [`HandshakeLink`] and never
//!   computes it locally.
//!
//! The pipeline picks one from [`crate::config::ChecksumMode`], or accepts any other
//! implementation of [`ChecksumStrategy`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::checksum::frame_checksum;
use crate::config::WordOrder;
use crate::handshake::{HandshakeCloser, HandshakeLink, HandshakeStats};
use crate::line::{EdgeInput, OutputLine, Wire};
use crate::pool::{FrameSlot, SlotError, SlotResult};

/// Fills in a frame's checksum.
pub trait ChecksumStrategy: Send {
    /// Short name for log messages
    fn name(&self) -> &'static str;

    /// Return the slot with its checksum written.  `timeout` bounds any wait
    /// the strategy has to make.  On failure the slot is handed back in the
    /// [`SlotError`] if it was not lost.
    fn apply(&mut self, slot: FrameSlot, timeout: Option<Duration>) -> SlotResult<FrameSlot>;

    /// Handshake counters, for strategies which use one
    fn handshake_stats(&self) -> Option<HandshakeStats> {
        None
    }

    /// Handle to abort a wait inside [`Self::apply()`], for strategies which
    /// wait on a peer
    fn closer(&self) -> Option<HandshakeCloser> {
        None
    }
}

/// Compute the checksum in place
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChecksum {
    word_order: WordOrder,
}

impl LocalChecksum {
    pub fn new(word_order: WordOrder) -> Self {
        Self { word_order }
    }
}

impl ChecksumStrategy for LocalChecksum {
    fn name(&self) -> &'static str {
        "local"
    }

    fn apply(
        &mut self,
        mut slot: FrameSlot,
        _timeout: Option<Duration>,
    ) -> SlotResult<FrameSlot> {
        let checksum = frame_checksum(&slot, self.word_order);
        match slot.set_checksum(checksum) {
            Ok(()) => Ok(slot),
            Err(e) => Err(SlotError::new(e, slot)),
        }
    }
}

/// Delegate the checksum to the peer at the end of a handshake link
pub struct OffloadChecksum<O: OutputLine = Arc<Wire>, I: EdgeInput = Arc<Wire>> {
    link: HandshakeLink<O, I>,
}

impl<O: OutputLine, I: EdgeInput> OffloadChecksum<O, I> {
    pub fn new(link: HandshakeLink<O, I>) -> Self {
        Self { link }
    }
}

impl<O, I> ChecksumStrategy for OffloadChecksum<O, I>
where
    O: OutputLine + Send,
    I: EdgeInput + Send,
{
    fn name(&self) -> &'static str {
        "offload"
    }

    fn apply(&mut self, slot: FrameSlot, timeout: Option<Duration>) -> SlotResult<FrameSlot> {
        self.link.request_and_await(slot, timeout)
    }

    fn handshake_stats(&self) -> Option<HandshakeStats> {
        Some(self.link.stats())
    }

    fn closer(&self) -> Option<HandshakeCloser> {
        Some(self.link.closer())
    }
}
