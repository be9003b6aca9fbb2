//! Checksum stage - moves each frame from the ready channel to the done channel, having
//! had its checksum written by the configured [`ChecksumStrategy`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::channel::{Receiver, Sender};
use crate::config::Config;
use crate::handshake::HandshakeStats;
use crate::pipeline::PipelineContext;
use crate::pool::{FrameSlot, SlotError};
use crate::strategy::ChecksumStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChecksumState {
    WaitingForItem,
    Computing(u32),
    Forwarding(u32),
    Done,
}

/// What the checksum stage did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumSummary {
    pub computed: usize,
    pub handshake: Option<HandshakeStats>,
}

pub struct ChecksumStage {
    ctx: Arc<PipelineContext>,
    ready: Receiver<FrameSlot>,
    done: Sender<FrameSlot>,
    strategy: Box<dyn ChecksumStrategy>,
    frame_count: usize,
    timeout: Option<Duration>,
    state: ChecksumState,
}

impl ChecksumStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        ready: Receiver<FrameSlot>,
        done: Sender<FrameSlot>,
        strategy: Box<dyn ChecksumStrategy>,
        config: &Config,
    ) -> Self {
        Self {
            ctx,
            ready,
            done,
            strategy,
            frame_count: config.frame_count,
            timeout: config.wait_timeout,
            state: ChecksumState::WaitingForItem,
        }
    }

    /// Process exactly `frame_count` frames, then stop.
    pub fn run(mut self) -> Result<ChecksumSummary> {
        for _ in 0..self.frame_count {
            self.enter(ChecksumState::WaitingForItem);
            let slot = self.ready.pop(self.timeout)?;
            let sequence = slot.sequence();

            self.enter(ChecksumState::Computing(sequence));
            let slot = match self.strategy.apply(slot, self.timeout) {
                Ok(slot) => slot,
                Err(e) => return Err(self.recover(e)),
            };
            self.ctx.mark_checksummed();
            trace!(
                "Frame {sequence} checksum {:#06X} ({})",
                slot.checksum().unwrap_or_default(),
                self.strategy.name()
            );

            self.enter(ChecksumState::Forwarding(sequence));
            self.done.push(slot, self.timeout)?;
        }
        self.enter(ChecksumState::Done);
        debug!("Checksummed {} frames", self.frame_count);

        Ok(ChecksumSummary {
            computed: self.frame_count,
            handshake: self.strategy.handshake_stats(),
        })
    }

    // Return a frame the strategy handed back to the pool, then report the
    // strategy's error
    fn recover(&self, failed: SlotError) -> crate::Error {
        if let Some(slot) = failed.slot {
            let sequence = slot.sequence();
            match self.ctx.pool().release(slot) {
                Ok(()) => debug!("Released frame {sequence} after {}", failed.error),
                Err(e) => error!("Failed to release frame {sequence}: {e}"),
            }
        } else {
            warn!("Frame lost by {} strategy: {}", self.strategy.name(), failed.error);
        }
        failed.error
    }

    fn enter(&mut self, state: ChecksumState) {
        trace!("Checksum {:?} -> {state:?}", self.state);
        self.state = state;
    }
}
