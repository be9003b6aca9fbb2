//! Single-waiter notification.
//!
//! A [`Signal`] is the equivalent of an RTOS thread signal: one specific thread waits on
//! it, and anyone, including an interrupt handler, may notify it.  Notifications do not
//! count - a notification raised while one is already pending is merged into it, and
//! [`Signal::notify()`] reports that this happened so callers which must not miss an
//! edge can detect it.
//!
//! [`Signal::notify()`] only sets an atomic flag and unparks the waiter, so it neither
//! blocks nor allocates.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Notification with a single waiting thread
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    pending: AtomicBool,
    closed: AtomicBool,
    waiter: OnceLock<Thread>,
}

impl Signal {
    /// Create a new signal.  `name` is only used in log messages.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            waiter: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Post a notification and wake the waiter, if one has bound itself.
    ///
    /// Returns `true` if a notification was already pending, in which case the
    /// two have merged.
    pub fn notify(&self) -> bool {
        let was_pending = self.pending.swap(true, Ordering::AcqRel);
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
        was_pending
    }

    /// Consume a pending notification without blocking.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait for, and consume, one notification.
    ///
    /// The first thread to wait becomes the only thread allowed to wait on this
    /// signal.  A pending notification is consumed even after [`Self::close()`];
    /// once none is pending a closed signal returns [`Error::Aborted`].
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        self.bind()?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if self.take() {
                return Ok(());
            }
            if self.is_closed() {
                return Err(Error::Aborted);
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace!("Signal {} timed out", self.name);
                        return Err(Error::Timeout);
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
    }

    /// Permanently wake the waiter.  Subsequent waits fail with
    /// [`Error::Aborted`] once any pending notification has been consumed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn bind(&self) -> Result<()> {
        let current = thread::current();
        let waiter = self.waiter.get_or_init(|| current.clone());
        if waiter.id() == current.id() {
            Ok(())
        } else {
            warn!(
                "Signal {} is bound to another thread ({:?})",
                self.name,
                waiter.name()
            );
            Err(Error::InvalidOperation)
        }
    }
}
