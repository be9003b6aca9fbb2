//! Digital signal lines.
//!
//! The handshake uses two lines, each driven by one side and watched for rising edges by
//! the other.  These traits abstract the two roles a line plays from one side's point of
//! view:
//! - [`OutputLine`] - a line this side drives
//! - [`EdgeInput`] - a line this side reads, with a rising-edge interrupt
//!
//! # Possible implementations
//!
//! - On a controller: a GPIO output pin, and a GPIO input pin with its edge interrupt
//! - In-process, for tests and simulation: [`Wire`], which implements both
//!
//! # Interrupt handlers
//!
//! The handler attached with [`EdgeInput::on_rising()`] runs in interrupt context.  It
//! must not block, allocate, perform I/O or touch queues; its only job is to post a
//! notification, such as [`crate::signal::Signal::notify()`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Rising-edge interrupt handler
pub type EdgeHandler = Box<dyn Fn() + Send + Sync>;

/// A line driven by this side.
pub trait OutputLine {
    /// Drive the line high.
    fn set_high(&self);

    /// Drive the line low.
    fn set_low(&self);

    /// Current driven level
    fn is_set_high(&self) -> bool;
}

/// A line read by this side, with a rising-edge interrupt.
pub trait EdgeInput {
    /// Current level of the line
    fn is_high(&self) -> bool;

    /// Attach the rising-edge handler.  Only one handler may be attached;
    /// attaching a second fails with [`Error::InvalidOperation`].
    fn on_rising(&self, handler: EdgeHandler) -> Result<()>;
}

/// In-process signal line.
///
/// One side drives it through [`OutputLine`], the other watches it through
/// [`EdgeInput`].  A low-to-high transition invokes the attached handler
/// synchronously on the driving thread, standing in for the interrupt.
/// Driving an already-high line high is not an edge.
pub struct Wire {
    name: &'static str,
    level: AtomicBool,
    handler: OnceLock<EdgeHandler>,
}

impl Wire {
    /// Create a new line, idle low.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            level: AtomicBool::new(false),
            handler: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl core::fmt::Debug for Wire {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Wire")
            .field("name", &self.name)
            .field("level", &self.level.load(Ordering::Relaxed))
            .field("handler", &self.handler.get().is_some())
            .finish()
    }
}

impl OutputLine for Wire {
    fn set_high(&self) {
        let was_high = self.level.swap(true, Ordering::AcqRel);
        if !was_high {
            if let Some(handler) = self.handler.get() {
                handler();
            }
        }
    }

    fn set_low(&self) {
        self.level.store(false, Ordering::Release);
    }

    fn is_set_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

impl EdgeInput for Wire {
    fn is_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    fn on_rising(&self, handler: EdgeHandler) -> Result<()> {
        self.handler.set(handler).map_err(|_| {
            warn!("Line {} already has a rising-edge handler", self.name);
            Error::InvalidOperation
        })
    }
}

impl<L: OutputLine + ?Sized> OutputLine for Arc<L> {
    fn set_high(&self) {
        (**self).set_high()
    }

    fn set_low(&self) {
        (**self).set_low()
    }

    fn is_set_high(&self) -> bool {
        (**self).is_set_high()
    }
}

impl<L: EdgeInput + ?Sized> EdgeInput for Arc<L> {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }

    fn on_rising(&self, handler: EdgeHandler) -> Result<()> {
        (**self).on_rising(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handler_fires_on_rising_edge_only() {
        let wire = Wire::new("test");
        let edges = Arc::new(AtomicUsize::new(0));
        {
            let edges = edges.clone();
            wire.on_rising(Box::new(move || {
                edges.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        }

        wire.set_high();
        wire.set_high();
        assert_eq!(edges.load(Ordering::Relaxed), 1);
        assert!(wire.is_high());

        wire.set_low();
        assert!(!wire.is_high());
        assert_eq!(edges.load(Ordering::Relaxed), 1);

        wire.set_high();
        assert_eq!(edges.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn single_handler() {
        let wire = Wire::new("test");
        wire.on_rising(Box::new(|| {})).unwrap();
        assert_eq!(
            wire.on_rising(Box::new(|| {})),
            Err(Error::InvalidOperation)
        );
    }

    #[test]
    fn idle_low() {
        let wire = Arc::new(Wire::new("test"));
        assert!(!EdgeInput::is_high(&wire));
        assert!(!wire.is_set_high());
    }
}
