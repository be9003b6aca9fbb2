//! Bounded, multi-stage frame pipeline with optional checksum offload to a peer device over
//! a two-wire request/ack handshake.
//!
//! This crate moves a fixed number of fixed-size frames through three cooperating threads -
//! generation, checksum and cleanup - using a fixed-capacity frame pool and two
//! fixed-capacity channels as the only inter-stage plumbing.  Backpressure is expressed
//! purely by blocking and retrying on notifications: nothing is buffered beyond the pool.
//!
//! The checksum stage either computes a 16-bit one's-complement checksum itself, or hands
//! the frame to an external peer and waits for it to finish, using two signal lines and
//! rising-edge interrupts.
//!
//! ## Architecture
//!
//! ```text
//!   producer --ready--> checksum --done--> cleanup
//!      ^                   |                  |
//!      |             (handshake)              |
//!      +----- pool release / completion ------+
//! ```
//!
//! - **Producer**: generates all source frames up front, then for each one acquires a pool
//!   slot, copies the payload in and pushes the slot into the ready channel.  Once all
//!   frames are enqueued it waits for the cleanup stage to signal completion.
//! - **Checksum**: pops each slot from the ready channel, applies the active
//!   [`strategy::ChecksumStrategy`] and pushes the slot into the done channel.
//! - **Cleanup**: pops each slot from the done channel and releases it back to the pool.
//!   After the final frame it reports the elapsed time, from the first enqueue to the last
//!   release, exactly once.
//!
//! A frame is owned by exactly one stage at any instant.  Ownership moves with the
//! [`pool::FrameSlot`] value at each pool acquire/release and channel push/pop, so the
//! frame contents are never locked.
//!
//! Each blocking point follows the same "try, wait for a notification, retry" pattern
//! built on [`signal::Signal`], a single-waiter notification which is safe to raise from
//! an interrupt handler.
//!
//! ## Handshake protocol
//!
//! Two lines, both idle low, each watched for rising edges by the opposite side:
//! - `request` (requester -> peer): raised for the duration of a request.
//! - `ack` (peer -> requester): raised once the peer has finished the checksum, and
//!   lowered again before the next cycle.
//!
//! At most one request is outstanding.  The frame itself travels out of band through a
//! [`handshake::SharedWindow`]: the requester deposits it before raising `request`, and
//! takes it back, checksum filled in, once `ack` fires.
//!
//! ## Modules
//!
//! - [`config`] - Run configuration (sizes, counts, mode, word order, timeouts)
//! - [`frame`] - Frame buffers and generation-time scratch allocation
//! - [`checksum`] - The 16-bit one's-complement checksum
//! - [`signal`] - Single-waiter notification primitive
//! - [`pool`] - Fixed-capacity frame pool
//! - [`channel`] - Fixed-capacity single-producer/single-consumer channel
//! - [`line`] - Signal line traits and an in-process [`line::Wire`]
//! - [`handshake`] - Requester and peer sides of the request/ack protocol
//! - [`strategy`] - Local and offloaded checksum strategies
//! - [`pipeline`] - The three stages and the orchestration which runs them
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable [`handshake::futures`], an async requester for hosts which reach the
//!   signal lines through asynchronous I/O rather than interrupts.
//! - `cli` - Build the `frame-pipeline` binary.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod channel;
pub mod checksum;
pub mod config;
pub mod frame;
pub mod handshake;
pub mod line;
pub mod pipeline;
pub mod pool;
pub mod signal;
pub mod strategy;

pub use config::{ChecksumMode, Config, WordOrder};
pub use pipeline::{Pipeline, RunFailure, RunReport};

/// Pipeline errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Generation-time scratch buffer could not be obtained
    AllocationFailure,
    /// The handshake peer or wiring misbehaved
    ProtocolViolation,
    /// Timeout waiting for a notification
    Timeout,
    /// Wait abandoned because the pipeline is shutting down
    Aborted,
    /// Slot is not currently allocated from this pool
    InvalidSlot,
    /// Configuration rejected
    InvalidConfig,
    /// Invalid operation
    InvalidOperation,
    /// Payload too large for frame buffer
    PayloadTooLarge,
    /// Checksum already written for this frame
    ChecksumAlreadySet,
    /// Frame reached cleanup without a checksum
    ChecksumUnset,
    /// A stage thread panicked, or shared state was poisoned
    StagePanicked,
    /// Signal line I/O error
    Io,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::AllocationFailure => "frame allocation failed",
            Error::ProtocolViolation => "handshake protocol violation",
            Error::Timeout => "timed out waiting for notification",
            Error::Aborted => "pipeline aborted",
            Error::InvalidSlot => "slot not allocated from this pool",
            Error::InvalidConfig => "invalid configuration",
            Error::InvalidOperation => "invalid operation",
            Error::PayloadTooLarge => "payload too large for frame buffer",
            Error::ChecksumAlreadySet => "checksum already set",
            Error::ChecksumUnset => "checksum not set",
            Error::StagePanicked => "stage panicked",
            Error::Io => "signal line I/O error",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

/// Type to represent the result of a pipeline operation
pub type Result<T> = core::result::Result<T, Error>;
