//! Cleanup stage.
//!
//! Takes checksummed frames from the done channel, records them and returns their slots
//! to the pool.  After the last frame it reports the elapsed time, exactly once, and
//! signals the producer that the run is complete.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::Receiver;
use crate::config::Config;
use crate::pipeline::{PipelineContext, Reporter};
use crate::pool::FrameSlot;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupState {
    WaitingForItem,
    Releasing(u32),
    Finalizing,
    Done,
}

/// A frame as seen by the cleanup stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub sequence: u32,
    pub size: usize,
    pub checksum: u16,
}

pub struct CleanupStage {
    ctx: Arc<PipelineContext>,
    done: Receiver<FrameSlot>,
    reporter: Box<dyn Reporter>,
    frame_count: usize,
    timeout: Option<Duration>,
    state: CleanupState,
}

impl CleanupStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        done: Receiver<FrameSlot>,
        reporter: Box<dyn Reporter>,
        config: &Config,
    ) -> Self {
        Self {
            ctx,
            done,
            reporter,
            frame_count: config.frame_count,
            timeout: config.wait_timeout,
            state: CleanupState::WaitingForItem,
        }
    }

    /// Release exactly `frame_count` frames.  Returns their records in release
    /// order.
    pub fn run(mut self) -> Result<Vec<FrameRecord>> {
        let mut records = Vec::with_capacity(self.frame_count);

        while records.len() < self.frame_count {
            self.enter(CleanupState::WaitingForItem);
            let slot = self.done.pop(self.timeout)?;

            self.enter(CleanupState::Releasing(slot.sequence()));
            let checksum = slot.checksum();
            let record = FrameRecord {
                sequence: slot.sequence(),
                size: slot.size(),
                checksum: checksum.unwrap_or_default(),
            };
            self.ctx.pool().release(slot)?;
            if checksum.is_none() {
                error!("Frame {} reached cleanup without a checksum", record.sequence);
                return Err(Error::ChecksumUnset);
            }

            self.ctx.mark_released();
            trace!("Released frame {}", record.sequence);
            records.push(record);
        }

        self.enter(CleanupState::Finalizing);
        let elapsed = self.ctx.mark_finished();
        self.reporter.report_elapsed(elapsed);
        self.ctx.finished.notify();

        self.enter(CleanupState::Done);
        debug!("Cleanup complete after {} frames", records.len());

        Ok(records)
    }

    fn enter(&mut self, state: CleanupState) {
        trace!("Cleanup {:?} -> {state:?}", self.state);
        self.state = state;
    }
}
