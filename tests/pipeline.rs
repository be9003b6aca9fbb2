use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use frame_pipeline::checksum::checksum;
use frame_pipeline::frame::Frame;
use frame_pipeline::frame::HeapAllocator;
use frame_pipeline::pipeline::Reporter;
use frame_pipeline::pool::{FrameSlot, SlotError, SlotResult};
use frame_pipeline::strategy::{ChecksumStrategy, LocalChecksum};
use frame_pipeline::{ChecksumMode, Config, Error, Pipeline, WordOrder};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reference_checksum(size: usize, order: WordOrder) -> u16 {
    let frame = Frame::generate(&mut HeapAllocator, size, 0).unwrap();
    checksum(frame.payload(), size, order)
}

/// Collects every elapsed time reported
#[derive(Clone, Default)]
struct Collect(Arc<Mutex<Vec<Duration>>>);

impl Reporter for Collect {
    fn report_elapsed(&mut self, elapsed: Duration) {
        self.0.lock().unwrap().push(elapsed);
    }
}

/// Local checksum which takes its time about it
struct Slow(LocalChecksum, Duration);

impl ChecksumStrategy for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn apply(&mut self, slot: FrameSlot, timeout: Option<Duration>) -> SlotResult<FrameSlot> {
        thread::sleep(self.1);
        self.0.apply(slot, timeout)
    }
}

/// Fails on the nth frame
struct FailAt(usize, Error);

impl ChecksumStrategy for FailAt {
    fn name(&self) -> &'static str {
        "fail-at"
    }

    fn apply(&mut self, slot: FrameSlot, timeout: Option<Duration>) -> SlotResult<FrameSlot> {
        if self.0 == 0 {
            return Err(SlotError::new(self.1, slot));
        }
        self.0 -= 1;
        LocalChecksum::default().apply(slot, timeout)
    }
}

/// Forwards frames without touching the checksum
struct Skip;

impl ChecksumStrategy for Skip {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn apply(&mut self, slot: FrameSlot, _timeout: Option<Duration>) -> SlotResult<FrameSlot> {
        Ok(slot)
    }
}

/// Fails without handing the frame back
struct Loses;

impl ChecksumStrategy for Loses {
    fn name(&self) -> &'static str {
        "loses"
    }

    fn apply(&mut self, _slot: FrameSlot, _timeout: Option<Duration>) -> SlotResult<FrameSlot> {
        Err(SlotError::from(Error::ProtocolViolation))
    }
}

struct Panics;

impl ChecksumStrategy for Panics {
    fn name(&self) -> &'static str {
        "panics"
    }

    fn apply(&mut self, _slot: FrameSlot, _timeout: Option<Duration>) -> SlotResult<FrameSlot> {
        panic!("checksum unit on fire");
    }
}

#[test]
fn default_run_checksums_every_frame() {
    init_logging();
    let collect = Collect::default();
    let report = Pipeline::new(Config::default())
        .with_reporter(Box::new(collect.clone()))
        .run()
        .unwrap();

    let expected = reference_checksum(512, WordOrder::BigEndian);
    assert_eq!(expected, 0xFEFF);
    assert_eq!(report.frames.len(), 10);
    for (i, frame) in report.frames.iter().enumerate() {
        assert_eq!(frame.sequence, i as u32, "frames released in order");
        assert_eq!(frame.size, 512);
        assert_eq!(frame.checksum, expected);
    }
    assert_eq!(report.checksums_computed, 10);
    assert!(report.handshake.is_none());
    assert!(report.peer_cycles.is_none());

    let reported = collect.0.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0], report.elapsed);
}

#[test]
fn slots_and_items_are_conserved() {
    init_logging();
    let report = Pipeline::new(Config::default().with_frame_count(40))
        .run()
        .unwrap();

    assert_eq!(report.pool.acquires, 40);
    assert_eq!(report.pool.releases, 40);
    assert_eq!(report.ready.pushes, 40);
    assert_eq!(report.ready.pops, 40);
    assert_eq!(report.done.pushes, 40);
    assert_eq!(report.done.pops, 40);
}

#[test]
fn odd_payload_size() {
    init_logging();
    let report = Pipeline::new(Config::default().with_payload_size(513))
        .run()
        .unwrap();

    assert_eq!(reference_checksum(513, WordOrder::BigEndian), 0xFEFD);
    assert!(report.frames.iter().all(|f| f.size == 513 && f.checksum == 0xFEFD));
}

#[test]
fn little_endian_words() {
    init_logging();
    let report = Pipeline::new(Config::default().with_word_order(WordOrder::LittleEndian))
        .run()
        .unwrap();
    assert!(report.frames.iter().all(|f| f.checksum == 0xFFFE));
}

#[test]
fn offload_matches_local() {
    init_logging();
    let config = Config::default()
        .with_mode(ChecksumMode::HardwareOffload)
        .with_wait_timeout(Duration::from_secs(10));
    let report = Pipeline::new(config).run().unwrap();

    let expected = reference_checksum(512, WordOrder::BigEndian);
    assert_eq!(report.frames.len(), 10);
    assert!(report.frames.iter().all(|f| f.checksum == expected));

    let handshake = report.handshake.unwrap();
    assert_eq!(handshake.requests, 10);
    assert_eq!(handshake.acks, 10);
    assert_eq!(handshake.violations, 0);
    assert_eq!(report.peer_cycles, Some(10));
}

#[test]
fn slow_checksum_applies_backpressure() {
    init_logging();
    let config = Config::default()
        .with_pool_capacity(2)
        .with_wait_timeout(Duration::from_secs(10));
    let report = Pipeline::new(config)
        .with_strategy(Box::new(Slow(
            LocalChecksum::new(WordOrder::BigEndian),
            Duration::from_millis(5),
        )))
        .run()
        .unwrap();

    assert_eq!(report.frames.len(), 10);
    assert!(report.pool.acquire_retries > 0);
    assert_eq!(report.pool.acquires, report.pool.releases);
    // The pool, not the channel, is the limit here
    assert_eq!(report.ready.full_waits, 0);
}

#[test]
fn single_slot_pool_still_completes() {
    init_logging();
    let config = Config::default()
        .with_pool_capacity(1)
        .with_channel_capacity(1)
        .with_frame_count(25);
    let report = Pipeline::new(config).run().unwrap();
    assert_eq!(report.frames.len(), 25);
}

#[test]
fn generation_failure_aborts_cleanly() {
    init_logging();
    let collect = Collect::default();
    let config = Config::default().with_scratch_budget(512 * 3);
    let failure = Pipeline::new(config)
        .with_reporter(Box::new(collect.clone()))
        .run()
        .unwrap_err();

    assert_eq!(failure.error, Error::AllocationFailure);
    assert_eq!(failure.progress.enqueued, 0);
    assert_eq!(failure.progress.released, 0);
    assert!(failure.progress.elapsed.is_none());
    assert!(collect.0.lock().unwrap().is_empty());
}

#[test]
fn exact_budget_is_enough() {
    init_logging();
    let config = Config::default().with_scratch_budget(512 * 10);
    assert!(Pipeline::new(config).run().is_ok());
}

#[test]
fn strategy_error_stops_the_run() {
    init_logging();
    let failure = Pipeline::new(Config::default())
        .with_strategy(Box::new(FailAt(3, Error::ProtocolViolation)))
        .run()
        .unwrap_err();

    assert_eq!(failure.error, Error::ProtocolViolation);
    assert_eq!(failure.progress.checksummed, 3);
    assert!(failure.progress.released <= 3);
    assert!(failure.progress.enqueued >= 3);
    // Frames were enqueued, so time had started running
    assert!(failure.progress.elapsed.is_some());
}

#[test]
fn strategy_error_on_first_frame_still_has_elapsed() {
    init_logging();
    let collect = Collect::default();
    let failure = Pipeline::new(Config::default())
        .with_strategy(Box::new(FailAt(0, Error::Timeout)))
        .with_reporter(Box::new(collect.clone()))
        .run()
        .unwrap_err();

    assert_eq!(failure.error, Error::Timeout);
    assert_eq!(failure.progress.checksummed, 0);
    assert_eq!(failure.progress.released, 0);
    assert!(failure.progress.enqueued >= 1);
    assert!(failure.progress.elapsed.is_some());
    // Only a completed run reports
    assert!(collect.0.lock().unwrap().is_empty());
}

#[test]
fn lost_frame_still_fails_cleanly() {
    init_logging();
    let failure = Pipeline::new(Config::default())
        .with_strategy(Box::new(Loses))
        .run()
        .unwrap_err();
    assert_eq!(failure.error, Error::ProtocolViolation);
    assert_eq!(failure.progress.checksummed, 0);
}

#[test]
fn missing_checksum_is_rejected_by_cleanup() {
    init_logging();
    let failure = Pipeline::new(Config::default())
        .with_strategy(Box::new(Skip))
        .run()
        .unwrap_err();
    assert_eq!(failure.error, Error::ChecksumUnset);
    assert_eq!(failure.progress.released, 0);
}

#[test]
fn panicking_stage_is_reported() {
    init_logging();
    let failure = Pipeline::new(Config::default())
        .with_strategy(Box::new(Panics))
        .run()
        .unwrap_err();
    assert_eq!(failure.error, Error::StagePanicked);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let failure = Pipeline::new(Config::default().with_frame_count(0))
        .run()
        .unwrap_err();
    assert_eq!(failure.error, Error::InvalidConfig);
    assert_eq!(failure.progress, Default::default());
}
