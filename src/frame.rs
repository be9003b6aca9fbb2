//! Frame buffers.
//!
//! A [`Frame`] is a fixed-capacity payload buffer plus the number of valid bytes and a
//! checksum which starts out unset and may be written exactly once per trip through the
//! pipeline.
//!
//! Generation-time scratch frames are obtained through a [`ScratchAllocator`], so that a
//! failed allocation surfaces as [`Error::AllocationFailure`] rather than aborting the
//! process or leaving a hole in the frame set.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// A payload buffer travelling through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Box<[u8]>,
    size: usize,
    checksum: Option<u16>,
    sequence: u32,
}

impl Frame {
    /// Create an empty frame with a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_buffer(vec![0u8; capacity].into_boxed_slice())
    }

    fn from_buffer(payload: Box<[u8]>) -> Self {
        Self {
            payload,
            size: 0,
            checksum: None,
            sequence: 0,
        }
    }

    /// Generate a source frame filling the whole buffer with the repeating
    /// `0, 1, .., 9` test pattern.
    pub fn generate<A: ScratchAllocator + ?Sized>(
        alloc: &mut A,
        capacity: usize,
        sequence: u32,
    ) -> Result<Self> {
        let mut payload = alloc.allocate(capacity)?;
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = (i % 10) as u8;
        }
        let mut frame = Self::from_buffer(payload);
        frame.size = capacity;
        frame.sequence = sequence;
        Ok(frame)
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.payload.len()
    }

    /// Number of valid payload bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// The valid portion of the payload
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.size]
    }

    /// Replace the payload.  Clears any checksum.
    pub fn set_payload(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.capacity() {
            return Err(Error::PayloadTooLarge);
        }
        self.payload[..data.len()].copy_from_slice(data);
        self.size = data.len();
        self.checksum = None;
        Ok(())
    }

    /// Copy payload, size and sequence number from `src`.  The checksum is left
    /// unset.
    pub fn copy_from(&mut self, src: &Frame) -> Result<()> {
        self.set_payload(src.payload())?;
        self.sequence = src.sequence;
        Ok(())
    }

    pub fn checksum(&self) -> Option<u16> {
        self.checksum
    }

    /// Record the checksum.  Fails if one has already been written since the
    /// payload was last set.
    pub fn set_checksum(&mut self, checksum: u16) -> Result<()> {
        if self.checksum.is_some() {
            return Err(Error::ChecksumAlreadySet);
        }
        self.checksum = Some(checksum);
        Ok(())
    }

    /// Producer-assigned position of this frame in the run
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Source of generation-time scratch buffers.
pub trait ScratchAllocator {
    /// Obtain a zeroed buffer of exactly `len` bytes.
    fn allocate(&mut self, len: usize) -> Result<Box<[u8]>>;
}

/// Allocates from the global heap, reporting exhaustion instead of aborting.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ScratchAllocator for HeapAllocator {
    fn allocate(&mut self, len: usize) -> Result<Box<[u8]>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailure)?;
        buf.resize(len, 0);
        Ok(buf.into_boxed_slice())
    }
}

/// Heap allocator limited to a fixed number of bytes, as on a controller with a
/// small heap.
#[derive(Debug, Clone, Copy)]
pub struct BudgetAllocator {
    remaining: usize,
}

impl BudgetAllocator {
    pub fn new(budget: usize) -> Self {
        Self { remaining: budget }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl ScratchAllocator for BudgetAllocator {
    fn allocate(&mut self, len: usize) -> Result<Box<[u8]>> {
        if len > self.remaining {
            return Err(Error::AllocationFailure);
        }
        let buf = HeapAllocator.allocate(len)?;
        self.remaining -= len;
        Ok(buf)
    }
}

/// Generate `count` source frames of `capacity` bytes, numbered from zero.
///
/// All or nothing: if any allocation fails the frames generated so far are
/// dropped and the error returned.
pub fn generate_frames<A: ScratchAllocator + ?Sized>(
    alloc: &mut A,
    count: usize,
    capacity: usize,
) -> Result<Vec<Frame>> {
    let frames = (0..count)
        .map(|i| Frame::generate(alloc, capacity, i as u32))
        .collect::<Result<Vec<_>>>();
    match frames {
        Ok(frames) => {
            debug!("Generated {count} frames of {capacity} bytes");
            Ok(frames)
        }
        Err(e) => {
            error!("Frame generation failed: {e}");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pattern() {
        let frame = Frame::generate(&mut HeapAllocator, 23, 7).unwrap();
        assert_eq!(frame.size(), 23);
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.checksum(), None);
        for (i, b) in frame.payload().iter().enumerate() {
            assert_eq!(*b as usize, i % 10);
        }
    }

    #[test]
    fn checksum_written_once() {
        let mut frame = Frame::with_capacity(4);
        frame.set_payload(&[1, 2, 3]).unwrap();
        frame.set_checksum(0x1234).unwrap();
        assert_eq!(frame.set_checksum(0x4321), Err(Error::ChecksumAlreadySet));
        assert_eq!(frame.checksum(), Some(0x1234));

        // Reloading the payload re-arms it
        frame.set_payload(&[9]).unwrap();
        assert_eq!(frame.checksum(), None);
        frame.set_checksum(0x4321).unwrap();
    }

    #[test]
    fn copy_from_carries_payload_not_checksum() {
        let mut src = Frame::generate(&mut HeapAllocator, 16, 3).unwrap();
        src.set_checksum(0xBEEF).unwrap();

        let mut dst = Frame::with_capacity(16);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.payload(), src.payload());
        assert_eq!(dst.sequence(), 3);
        assert_eq!(dst.checksum(), None);

        let mut small = Frame::with_capacity(8);
        assert_eq!(small.copy_from(&src), Err(Error::PayloadTooLarge));
    }

    #[test]
    fn budget_exhaustion_is_all_or_nothing() {
        let mut alloc = BudgetAllocator::new(512 * 3);
        let result = generate_frames(&mut alloc, 4, 512);
        assert_eq!(result, Err(Error::AllocationFailure));

        let mut alloc = BudgetAllocator::new(512 * 4);
        let frames = generate_frames(&mut alloc, 4, 512).unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(alloc.remaining(), 0);
        let seqs: Vec<u32> = frames.iter().map(Frame::sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }
}
