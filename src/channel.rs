//! Fixed-capacity FIFO channel between exactly one producer and one consumer.
//!
//! The channel carries ownership handles, not copies: whatever is pushed is moved into
//! the channel and moved out again by the consumer.  [`bounded()`] returns one
//! [`Sender`] and one [`Receiver`], neither of which is `Clone`, so each channel has a
//! single producer and a single consumer by construction.
//!
//! The non-blocking operations, [`Sender::try_push()`] and [`Receiver::try_pop()`], post
//! `item_available` to the consumer on every successful push and `space_available` to the
//! producer on every successful pop.  The blocking operations are built from these: try,
//! wait for the opposite side's notification, retry.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::signal::Signal;
use crate::{Error, Result};

/// Outcome of a non-blocking push
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// The item is in the channel
    Queued,
    /// The channel is at capacity.  The item is handed back.
    Full(T),
}

/// Channel counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub pushes: usize,
    pub pops: usize,
    /// Times the producer found the channel full and waited
    pub full_waits: usize,
    /// Times the consumer found the channel empty and waited
    pub empty_waits: usize,
}

#[derive(Debug)]
struct Shared<T> {
    name: &'static str,
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    item_available: Signal,
    space_available: Signal,
    pushes: AtomicUsize,
    pops: AtomicUsize,
    full_waits: AtomicUsize,
    empty_waits: AtomicUsize,
}

impl<T> Shared<T> {
    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<T>>> {
        self.queue.lock().map_err(|_| Error::StagePanicked)
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            pushes: self.pushes.load(Ordering::Relaxed),
            pops: self.pops.load(Ordering::Relaxed),
            full_waits: self.full_waits.load(Ordering::Relaxed),
            empty_waits: self.empty_waits.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        self.item_available.close();
        self.space_available.close();
    }
}

/// Create a channel holding at most `capacity` items.
///
/// `name` is only used in log messages.
pub fn bounded<T>(name: &'static str, capacity: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        name,
        capacity,
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        item_available: Signal::new("channel-item-available"),
        space_available: Signal::new("channel-space-available"),
        pushes: AtomicUsize::new(0),
        pops: AtomicUsize::new(0),
        full_waits: AtomicUsize::new(0),
        empty_waits: AtomicUsize::new(0),
    });

    debug!("Created channel {name} with capacity {capacity}");

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

/// Producer end of a channel
#[derive(Debug)]
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Push without blocking.  On [`PushOutcome::Full`] the caller should wait
    /// for space and retry, as [`Self::push()`] does.
    pub fn try_push(&mut self, item: T) -> Result<PushOutcome<T>> {
        {
            let mut queue = self.shared.lock()?;
            if queue.len() >= self.shared.capacity {
                return Ok(PushOutcome::Full(item));
            }
            queue.push_back(item);
        }
        self.shared.pushes.fetch_add(1, Ordering::Relaxed);
        self.shared.item_available.notify();
        Ok(PushOutcome::Queued)
    }

    /// Push, waiting for space if the channel is full.
    ///
    /// `timeout` bounds each wait for a `space_available` notification.
    pub fn push(&mut self, item: T, timeout: Option<Duration>) -> Result<()> {
        let mut item = item;
        loop {
            match self.try_push(item)? {
                PushOutcome::Queued => return Ok(()),
                PushOutcome::Full(back) => {
                    item = back;
                    self.shared.full_waits.fetch_add(1, Ordering::Relaxed);
                    trace!("Channel {} full, waiting for space", self.shared.name);
                    self.shared.space_available.wait(timeout).inspect_err(|e| {
                        if *e == Error::Timeout {
                            warn!("Channel {} push timed out", self.shared.name);
                        }
                    })?;
                }
            }
        }
    }

    pub fn monitor(&self) -> ChannelMonitor<T> {
        ChannelMonitor {
            shared: self.shared.clone(),
        }
    }
}

/// Consumer end of a channel
#[derive(Debug)]
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Pop without blocking.  `None` means the channel is empty; the caller
    /// should wait for an item and retry, as [`Self::pop()`] does.
    pub fn try_pop(&mut self) -> Result<Option<T>> {
        let item = self.shared.lock()?.pop_front();
        if item.is_some() {
            self.shared.pops.fetch_add(1, Ordering::Relaxed);
            self.shared.space_available.notify();
        }
        Ok(item)
    }

    /// Pop, waiting for an item if the channel is empty.
    ///
    /// `timeout` bounds each wait for an `item_available` notification.
    pub fn pop(&mut self, timeout: Option<Duration>) -> Result<T> {
        loop {
            if let Some(item) = self.try_pop()? {
                return Ok(item);
            }
            self.shared.empty_waits.fetch_add(1, Ordering::Relaxed);
            trace!("Channel {} empty, waiting for item", self.shared.name);
            self.shared.item_available.wait(timeout).inspect_err(|e| {
                if *e == Error::Timeout {
                    warn!("Channel {} pop timed out", self.shared.name);
                }
            })?;
        }
    }

    pub fn monitor(&self) -> ChannelMonitor<T> {
        ChannelMonitor {
            shared: self.shared.clone(),
        }
    }
}

/// Observer of a channel, able to read its counters and shut it down
#[derive(Debug)]
pub struct ChannelMonitor<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ChannelMonitor<T> {
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats()
    }

    /// Wake both ends.  Waits on an empty or full channel then fail with
    /// [`Error::Aborted`].
    pub fn close(&self) {
        self.shared.close();
    }
}

impl<T> Clone for ChannelMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn full_hands_item_back() {
        let (mut tx, mut rx) = bounded("test", 2);
        assert_eq!(tx.try_push(1).unwrap(), PushOutcome::Queued);
        assert_eq!(tx.try_push(2).unwrap(), PushOutcome::Queued);
        assert_eq!(tx.try_push(3).unwrap(), PushOutcome::Full(3));
        assert_eq!(rx.try_pop().unwrap(), Some(1));
        assert_eq!(tx.try_push(3).unwrap(), PushOutcome::Queued);
        assert_eq!(rx.try_pop().unwrap(), Some(2));
        assert_eq!(rx.try_pop().unwrap(), Some(3));
        assert_eq!(rx.try_pop().unwrap(), None);
    }

    #[test]
    fn fifo_across_threads() {
        let (mut tx, mut rx) = bounded("test", 3);
        let producer = thread::spawn(move || {
            for i in 0..200u32 {
                tx.push(i, Some(Duration::from_secs(5))).unwrap();
            }
            tx
        });

        let received: Vec<u32> = (0..200)
            .map(|_| rx.pop(Some(Duration::from_secs(5))).unwrap())
            .collect();
        let tx = producer.join().unwrap();

        assert_eq!(received, (0..200).collect::<Vec<_>>());
        let stats = tx.monitor().stats();
        assert_eq!(stats.pushes, 200);
        assert_eq!(stats.pops, 200);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let (_tx, mut rx) = bounded::<u8>("test", 1);
        assert_eq!(rx.pop(Some(Duration::from_millis(10))), Err(Error::Timeout));
        assert!(rx.monitor().stats().empty_waits > 0);
    }

    #[test]
    fn close_aborts_blocked_push() {
        let (mut tx, rx) = bounded("test", 1);
        tx.push(1u8, None).unwrap();
        let monitor = rx.monitor();
        let blocked = thread::spawn(move || tx.push(2u8, None));
        thread::sleep(Duration::from_millis(20));
        monitor.close();
        assert_eq!(blocked.join().unwrap(), Err(Error::Aborted));
        assert_eq!(monitor.len(), 1);
    }
}
