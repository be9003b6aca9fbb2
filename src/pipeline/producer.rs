//! Producer stage.
//!
//! Generates every source frame up front, then for each one acquires a pool slot, copies
//! the source into it and pushes it to the ready channel.  Once all frames are enqueued
//! it waits for the cleanup stage to report completion, and finally drops the sources.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::channel::Sender;
use crate::config::Config;
use crate::frame::{ScratchAllocator, generate_frames};
use crate::pipeline::PipelineContext;
use crate::pool::FrameSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerState {
    Generating,
    Allocating(u32),
    Copying(u32),
    Enqueuing(u32),
    AwaitingCompletion,
    Done,
}

pub struct ProducerStage {
    ctx: Arc<PipelineContext>,
    ready: Sender<FrameSlot>,
    alloc: Box<dyn ScratchAllocator + Send>,
    frame_count: usize,
    payload_size: usize,
    timeout: Option<Duration>,
    state: ProducerState,
}

impl ProducerStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        ready: Sender<FrameSlot>,
        alloc: Box<dyn ScratchAllocator + Send>,
        config: &Config,
    ) -> Self {
        Self {
            ctx,
            ready,
            alloc,
            frame_count: config.frame_count,
            payload_size: config.payload_size,
            timeout: config.wait_timeout,
            state: ProducerState::Generating,
        }
    }

    /// Run to completion.  Returns the number of frames enqueued.
    pub fn run(mut self) -> Result<usize> {
        self.enter(ProducerState::Generating);
        let sources = generate_frames(self.alloc.as_mut(), self.frame_count, self.payload_size)?;

        for source in &sources {
            let sequence = source.sequence();

            self.enter(ProducerState::Allocating(sequence));
            let mut slot = self.ctx.pool().acquire(self.timeout)?;

            self.enter(ProducerState::Copying(sequence));
            slot.copy_from(source)?;

            self.enter(ProducerState::Enqueuing(sequence));
            self.ctx.mark_started();
            self.ready.push(slot, self.timeout)?;
            self.ctx.mark_enqueued();
        }
        debug!("All {} frames enqueued", sources.len());

        self.enter(ProducerState::AwaitingCompletion);
        self.ctx.finished.wait(self.timeout)?;

        self.enter(ProducerState::Done);
        let count = sources.len();
        drop(sources);
        debug!("Released {count} source frames");
        Ok(count)
    }

    fn enter(&mut self, state: ProducerState) {
        trace!("Producer {:?} -> {state:?}", self.state);
        self.state = state;
    }
}
