//! The three pipeline stages and the orchestration which runs them.
//!
//! [`Pipeline::run()`] builds the pool and both channels, spawns one thread per stage
//! (plus the peer in [`ChecksumMode::HardwareOffload`] mode), and waits for them all.
//!
//! Stages never reach for global state.  Everything a stage must notify or wait on is
//! passed in at construction: its channel endpoints and a shared [`PipelineContext`]
//! holding the pool, the completion signal and the progress counters.
//!
//! A fatal error in any stage aborts the run: the error is recorded, and every signal in
//! the pipeline is closed so that the other stages wake with [`Error::Aborted`] and exit.
//! The first non-`Aborted` error is reported as the cause, along with the progress made.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod checksum;
pub mod cleanup;
pub mod producer;

pub use checksum::{ChecksumStage, ChecksumSummary};
pub use cleanup::{CleanupStage, FrameRecord};
pub use producer::ProducerStage;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::{self, ChannelMonitor, ChannelStats};
use crate::config::{ChecksumMode, Config};
use crate::frame::{BudgetAllocator, HeapAllocator, ScratchAllocator};
use crate::handshake::{self, HandshakeCloser, HandshakeStats};
use crate::pool::{FramePool, FrameSlot, PoolStats};
use crate::signal::Signal;
use crate::strategy::{ChecksumStrategy, LocalChecksum, OffloadChecksum};
use crate::{Error, Result};

/// Receives the single elapsed-time measurement of a completed run.
pub trait Reporter: Send {
    fn report_elapsed(&mut self, elapsed: Duration);
}

/// Logs the elapsed time at `info` level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report_elapsed(&mut self, elapsed: Duration) {
        info!("total time: {} usec", elapsed.as_micros());
    }
}

/// How far a run got
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Frames pushed into the ready channel
    pub enqueued: usize,
    /// Frames whose checksum was written
    pub checksummed: usize,
    /// Frames released back to the pool
    pub released: usize,
    /// Time from first enqueue to last release.  For a run that stopped early this
    /// is the time since the first enqueue; `None` if nothing was enqueued.
    pub elapsed: Option<Duration>,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Time from first enqueue to last release
    pub elapsed: Duration,
    /// One record per frame, in release order
    pub frames: Vec<FrameRecord>,
    pub checksums_computed: usize,
    pub pool: PoolStats,
    pub ready: ChannelStats,
    pub done: ChannelStats,
    /// Present in offload mode
    pub handshake: Option<HandshakeStats>,
    /// Requests served by the in-process peer, in offload mode
    pub peer_cycles: Option<usize>,
}

/// A run that stopped on a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFailure {
    /// The first fatal error raised
    pub error: Error,
    /// Counters at the time the run stopped
    pub progress: Progress,
}

impl core::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} after {} enqueued, {} checksummed, {} released",
            self.error, self.progress.enqueued, self.progress.checksummed, self.progress.released
        )
    }
}

impl std::error::Error for RunFailure {}

impl From<Error> for RunFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            progress: Progress::default(),
        }
    }
}

/// State shared by all stages of one run
#[derive(Debug)]
pub struct PipelineContext {
    pool: Arc<FramePool>,
    finished: Signal,
    started: OnceLock<Instant>,
    elapsed: OnceLock<Duration>,
    enqueued: AtomicUsize,
    checksummed: AtomicUsize,
    released: AtomicUsize,
    first_error: Mutex<Option<Error>>,
    ready: ChannelMonitor<FrameSlot>,
    done: ChannelMonitor<FrameSlot>,
    handshake: Vec<HandshakeCloser>,
}

impl PipelineContext {
    fn new(
        pool: Arc<FramePool>,
        ready: ChannelMonitor<FrameSlot>,
        done: ChannelMonitor<FrameSlot>,
        handshake: Vec<HandshakeCloser>,
    ) -> Self {
        Self {
            pool,
            finished: Signal::new("pipeline-finished"),
            started: OnceLock::new(),
            elapsed: OnceLock::new(),
            enqueued: AtomicUsize::new(0),
            checksummed: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            ready,
            done,
            handshake,
        }
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Record an error and shut every stage down.  Only the first error other
    /// than [`Error::Aborted`] is kept.
    pub fn abort(&self, error: Error) {
        if error != Error::Aborted {
            let mut first = self.lock_first_error();
            if first.is_none() {
                warn!("Aborting pipeline: {error}");
                *first = Some(error);
            }
        }

        self.pool.close();
        self.ready.close();
        self.done.close();
        self.finished.close();
        for closer in &self.handshake {
            closer.close();
        }
    }

    pub fn first_error(&self) -> Option<Error> {
        *self.lock_first_error()
    }

    // Poisoning is ignored, the guarded value is always a whole `Option<Error>`
    fn lock_first_error(&self) -> MutexGuard<'_, Option<Error>> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            checksummed: self.checksummed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            elapsed: self
                .elapsed
                .get()
                .copied()
                .or_else(|| self.started.get().map(Instant::elapsed)),
        }
    }

    // Called by the producer just before its first push
    fn mark_started(&self) {
        self.started.get_or_init(Instant::now);
    }

    fn mark_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_checksummed(&self) {
        self.checksummed.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    // Returns the elapsed time, recording it only once
    fn mark_finished(&self) -> Duration {
        let elapsed = self
            .started
            .get()
            .map(Instant::elapsed)
            .unwrap_or(Duration::ZERO);
        *self.elapsed.get_or_init(|| elapsed)
    }
}

/// Aborts the pipeline if the owning stage thread unwinds.
struct PanicGuard(Arc<PipelineContext>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Stage {:?} panicked", thread::current().name());
            self.0.abort(Error::StagePanicked);
        }
    }
}

fn spawn_stage<T, F>(
    name: &str,
    ctx: &Arc<PipelineContext>,
    stage: F,
) -> Result<JoinHandle<Option<T>>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let ctx = ctx.clone();
    let stage_name = name.to_string();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _guard = PanicGuard(ctx.clone());
            match stage() {
                Ok(value) => Some(value),
                Err(e) => {
                    if e != Error::Aborted {
                        error!("Stage {stage_name} failed: {e}");
                    }
                    ctx.abort(e);
                    None
                }
            }
        })
        .map_err(|e| {
            error!("Failed to spawn stage {name}: {e}");
            Error::AllocationFailure
        })
}

fn join_stage<T>(handle: JoinHandle<Option<T>>, ctx: &PipelineContext) -> Option<T> {
    match handle.join() {
        Ok(value) => value,
        Err(_) => {
            ctx.abort(Error::StagePanicked);
            None
        }
    }
}

/// A configured pipeline run
pub struct Pipeline {
    config: Config,
    strategy: Option<Box<dyn ChecksumStrategy>>,
    reporter: Box<dyn Reporter>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            strategy: None,
            reporter: Box::new(LogReporter),
        }
    }

    /// Use `strategy` instead of the one selected by [`Config::mode`].
    pub fn with_strategy(mut self, strategy: Box<dyn ChecksumStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Send the elapsed time to `reporter` instead of the log.
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run all frames through the pipeline.
    pub fn run(self) -> core::result::Result<RunReport, RunFailure> {
        let Pipeline {
            config,
            strategy,
            reporter,
        } = self;
        config.validate()?;

        info!(
            "Running {} frames of {} bytes, pool {}, channels {}/{}, {:?}",
            config.frame_count,
            config.payload_size,
            config.pool_capacity,
            config.ready_capacity,
            config.done_capacity,
            config.mode
        );

        let pool = Arc::new(FramePool::new(config.pool_capacity, config.payload_size));
        let (ready_tx, ready_rx) = channel::bounded("ready", config.ready_capacity);
        let (done_tx, done_rx) = channel::bounded("done", config.done_capacity);

        let mut peer = None;
        let strategy: Box<dyn ChecksumStrategy> = match strategy {
            Some(strategy) => strategy,
            None => match config.mode {
                ChecksumMode::LocalCompute => Box::new(LocalChecksum::new(config.word_order)),
                ChecksumMode::HardwareOffload => {
                    let (link, handshake_peer) = handshake::pair(config.word_order)?;
                    peer = Some(handshake_peer);
                    Box::new(OffloadChecksum::new(link))
                }
            },
        };
        debug!("Using {} checksum strategy", strategy.name());

        let peer_closer = peer.as_ref().map(|peer| peer.closer());
        let mut closers: Vec<HandshakeCloser> = strategy.closer().into_iter().collect();
        closers.extend(peer_closer.clone());

        let ctx = Arc::new(PipelineContext::new(
            pool.clone(),
            ready_tx.monitor(),
            done_tx.monitor(),
            closers,
        ));

        let alloc: Box<dyn ScratchAllocator + Send> = match config.scratch_budget {
            Some(budget) => Box::new(BudgetAllocator::new(budget)),
            None => Box::new(HeapAllocator),
        };

        let producer = ProducerStage::new(ctx.clone(), ready_tx, alloc, &config);
        let checksum = ChecksumStage::new(ctx.clone(), ready_rx, done_tx, strategy, &config);
        let cleanup = CleanupStage::new(ctx.clone(), done_rx, reporter, &config);

        let fail = |error: Error| {
            ctx.abort(error);
            RunFailure {
                error,
                progress: ctx.progress(),
            }
        };

        let peer_handle = match peer {
            Some(mut peer) => Some(spawn_stage("peer", &ctx, move || peer.serve()).map_err(fail)?),
            None => None,
        };
        let cleanup_handle = spawn_stage("cleanup", &ctx, move || cleanup.run());
        let checksum_handle = spawn_stage("checksum", &ctx, move || checksum.run());
        let producer_handle = spawn_stage("producer", &ctx, move || producer.run());

        // A failed spawn has already aborted the others; still join whatever started
        let spawn_error = [
            cleanup_handle.as_ref().err(),
            checksum_handle.as_ref().err(),
            producer_handle.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .next()
        .copied();
        if let Some(e) = spawn_error {
            ctx.abort(e);
        }

        let produced = producer_handle.ok().and_then(|h| join_stage(h, &ctx));
        let summary = checksum_handle.ok().and_then(|h| join_stage(h, &ctx));
        let records = cleanup_handle.ok().and_then(|h| join_stage(h, &ctx));

        if let Some(closer) = &peer_closer {
            closer.close();
        }
        let peer_cycles = peer_handle.and_then(|h| join_stage(h, &ctx));

        if let Some(error) = ctx.first_error() {
            let progress = ctx.progress();
            error!(
                "Run failed: {error} ({} enqueued, {} checksummed, {} released)",
                progress.enqueued, progress.checksummed, progress.released
            );
            return Err(RunFailure { error, progress });
        }

        match (produced, summary, records) {
            (Some(_), Some(summary), Some(frames)) => {
                let progress = ctx.progress();
                Ok(RunReport {
                    elapsed: progress.elapsed.unwrap_or(Duration::ZERO),
                    frames,
                    checksums_computed: summary.computed,
                    pool: pool.stats(),
                    ready: ctx.ready.stats(),
                    done: ctx.done.stats(),
                    handshake: summary.handshake,
                    peer_cycles,
                })
            }
            _ => Err(RunFailure {
                error: Error::Aborted,
                progress: ctx.progress(),
            }),
        }
    }
}

/// Convenience for [`Pipeline::new(config).run()`](Pipeline::run).
pub fn run(config: Config) -> core::result::Result<RunReport, RunFailure> {
    Pipeline::new(config).run()
}
