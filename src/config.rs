//! Run configuration.
//!
//! All sizes and counts are fixed for the lifetime of a run.  [`Config::default()`]
//! matches the reference controller build: 10 frames of 512 bytes through a pool of 5
//! slots and two channels of depth 5.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

pub const DEFAULT_PAYLOAD_SIZE: usize = 512;
pub const DEFAULT_FRAME_COUNT: usize = 10;
pub const DEFAULT_POOL_CAPACITY: usize = 5;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 5;

/// Where the checksum stage gets its checksums from
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Computed by the checksum stage itself
    #[default]
    LocalCompute,
    /// Computed by the peer at the far end of the handshake link
    HardwareOffload,
}

/// Byte order used to assemble 16-bit words from the payload.
///
/// Requester and peer must agree, so both take it from the same [`Config`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    /// First byte of each pair is the high byte
    #[default]
    BigEndian,
    /// First byte of each pair is the low byte
    LittleEndian,
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Frame buffer capacity in bytes
    pub payload_size: usize,
    /// Total frames pushed through the pipeline per run
    pub frame_count: usize,
    /// Number of frame slots in the pool
    pub pool_capacity: usize,
    /// Depth of the producer -> checksum channel
    pub ready_capacity: usize,
    /// Depth of the checksum -> cleanup channel
    pub done_capacity: usize,
    /// Checksum strategy selector
    pub mode: ChecksumMode,
    /// Word assembly convention for the checksum
    pub word_order: WordOrder,
    /// Upper bound on any single blocking wait.  `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Bytes available for generation-time scratch frames.  `None` is unbounded.
    pub scratch_budget: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload_size: DEFAULT_PAYLOAD_SIZE,
            frame_count: DEFAULT_FRAME_COUNT,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            ready_capacity: DEFAULT_CHANNEL_CAPACITY,
            done_capacity: DEFAULT_CHANNEL_CAPACITY,
            mode: ChecksumMode::default(),
            word_order: WordOrder::default(),
            wait_timeout: None,
            scratch_budget: None,
        }
    }
}

impl Config {
    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    /// Sets both channel depths.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.ready_capacity = capacity;
        self.done_capacity = capacity;
        self
    }

    pub fn with_mode(mut self, mode: ChecksumMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn with_scratch_budget(mut self, bytes: usize) -> Self {
        self.scratch_budget = Some(bytes);
        self
    }

    /// Check the configuration is usable.
    ///
    /// The frame's size field is 16 bits wide, so payloads are limited to
    /// `u16::MAX` bytes.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 || self.payload_size > u16::MAX as usize {
            warn!("Invalid payload size {}", self.payload_size);
            return Err(Error::InvalidConfig);
        }
        if self.frame_count == 0 {
            warn!("Frame count must be non-zero");
            return Err(Error::InvalidConfig);
        }
        if self.pool_capacity == 0 || self.ready_capacity == 0 || self.done_capacity == 0 {
            warn!(
                "Capacities must be non-zero: pool {} ready {} done {}",
                self.pool_capacity, self.ready_capacity, self.done_capacity
            );
            return Err(Error::InvalidConfig);
        }
        if self.wait_timeout == Some(Duration::ZERO) {
            warn!("Zero wait timeout would fail every blocking wait");
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}
