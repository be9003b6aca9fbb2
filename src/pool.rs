//! Fixed-capacity frame pool.
//!
//! All frame buffers are allocated when the pool is created.  [`FramePool::try_acquire()`]
//! moves a free frame out of the pool into a [`FrameSlot`], and [`FramePool::release()`]
//! moves it back.  While a slot is out the pool has no access to its frame at all, so a
//! slot cannot be used after it has been released.
//!
//! When the pool is empty the acquirer waits for the `released` notification, posted on
//! every release, and retries.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::frame::Frame;
use crate::signal::Signal;
use crate::{Error, Result};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Ownership handle for a frame allocated from a [`FramePool`]
#[derive(Debug)]
pub struct FrameSlot {
    pool_id: u32,
    index: usize,
    frame: Frame,
}

impl FrameSlot {
    /// Index of this slot within its pool
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for FrameSlot {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl DerefMut for FrameSlot {
    fn deref_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }
}

/// An error from an operation which had taken ownership of a slot.
///
/// The slot is handed back whenever it could be recovered, so the caller can
/// release it to its pool rather than lose it.
#[derive(Debug)]
pub struct SlotError {
    pub error: Error,
    pub slot: Option<FrameSlot>,
}

impl SlotError {
    pub fn new(error: Error, slot: FrameSlot) -> Self {
        Self {
            error,
            slot: Some(slot),
        }
    }
}

impl From<Error> for SlotError {
    fn from(error: Error) -> Self {
        Self { error, slot: None }
    }
}

impl core::fmt::Display for SlotError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "{} (slot {} recovered)", self.error, slot.index),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for SlotError {}

/// Result of an operation which may hand a slot back on failure
pub type SlotResult<T> = core::result::Result<T, SlotError>;

/// Pool counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquires: usize,
    pub releases: usize,
    /// Number of times an acquirer found the pool empty and had to wait
    pub acquire_retries: usize,
}

/// Fixed-capacity pool of frame buffers
#[derive(Debug)]
pub struct FramePool {
    id: u32,
    payload_size: usize,
    slots: Mutex<Vec<Option<Frame>>>,
    released: Signal,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    acquire_retries: AtomicUsize,
}

impl FramePool {
    /// Create a pool of `capacity` frames, each with a `payload_size` byte buffer.
    pub fn new(capacity: usize, payload_size: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let slots = (0..capacity)
            .map(|_| Some(Frame::with_capacity(payload_size)))
            .collect();

        debug!("Created pool {id} with {capacity} slots of {payload_size} bytes");

        Self {
            id,
            payload_size,
            slots: Mutex::new(slots),
            released: Signal::new("pool-released"),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            acquire_retries: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Take a free slot if there is one.
    pub fn try_acquire(&self) -> Result<Option<FrameSlot>> {
        let mut slots = self.lock()?;
        let found = slots
            .iter_mut()
            .enumerate()
            .find_map(|(index, slot)| slot.take().map(|frame| (index, frame)));

        Ok(found.map(|(index, frame)| {
            self.acquires.fetch_add(1, Ordering::Relaxed);
            trace!("Pool {} slot {index} acquired", self.id);
            FrameSlot {
                pool_id: self.id,
                index,
                frame,
            }
        }))
    }

    /// Take a free slot, waiting for a release if the pool is empty.
    ///
    /// `timeout` bounds each wait for a release notification.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<FrameSlot> {
        loop {
            if let Some(slot) = self.try_acquire()? {
                return Ok(slot);
            }
            self.acquire_retries.fetch_add(1, Ordering::Relaxed);
            trace!("Pool {} empty, waiting for release", self.id);
            self.released.wait(timeout).inspect_err(|e| {
                if *e == Error::Timeout {
                    warn!("Pool {} acquire timed out", self.id);
                }
            })?;
        }
    }

    /// Return a slot to the pool and notify the acquirer.
    ///
    /// Fails with [`Error::InvalidSlot`] if the slot did not come from this pool.
    pub fn release(&self, slot: FrameSlot) -> Result<()> {
        if slot.pool_id != self.id {
            error!(
                "Slot from pool {} released to pool {}",
                slot.pool_id, self.id
            );
            return Err(Error::InvalidSlot);
        }

        {
            let mut slots = self.lock()?;
            match slots.get_mut(slot.index) {
                Some(entry @ None) => *entry = Some(slot.frame),
                _ => {
                    error!(
                        "Pool {} slot {} is not allocated",
                        self.id, slot.index
                    );
                    return Err(Error::InvalidSlot);
                }
            }
        }

        self.releases.fetch_add(1, Ordering::Relaxed);
        trace!("Pool {} slot {} released", self.id, slot.index);
        self.released.notify();
        Ok(())
    }

    /// Number of slots currently allocated
    pub fn in_flight(&self) -> usize {
        self.lock()
            .map(|slots| slots.iter().filter(|slot| slot.is_none()).count())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquires: self.acquires.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            acquire_retries: self.acquire_retries.load(Ordering::Relaxed),
        }
    }

    /// Wake any waiting acquirer with [`Error::Aborted`].
    pub fn close(&self) {
        self.released.close();
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Option<Frame>>>> {
        self.slots.lock().map_err(|_| Error::StagePanicked)
    }
}
