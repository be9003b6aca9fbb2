//! 16-bit one's-complement checksum, as used by the Internet protocols.
//!
//! The payload is summed as 16-bit words assembled in the configured
//! [`WordOrder`].  If the length is odd, the final lone byte is added as the low
//! byte of a zero-padded word.  Carries out of bit 15 are folded back in twice,
//! which absorbs any carry produced by the first fold, and the result is the
//! one's complement of the folded sum.
//!
//! This is an error-detection code only.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::config::WordOrder;
use crate::frame::Frame;

/// Checksum the first `size` bytes of `payload`.
///
/// `size` is clamped to the payload length.
pub fn checksum(payload: &[u8], size: usize, order: WordOrder) -> u16 {
    let data = &payload[..size.min(payload.len())];

    let mut words = data.chunks_exact(2);
    let mut sum: u32 = words
        .by_ref()
        .map(|pair| {
            let word = match order {
                WordOrder::BigEndian => u16::from_be_bytes([pair[0], pair[1]]),
                WordOrder::LittleEndian => u16::from_le_bytes([pair[0], pair[1]]),
            };
            word as u32
        })
        .fold(0u32, u32::wrapping_add);

    if let [last] = words.remainder() {
        sum = sum.wrapping_add(*last as u32);
    }

    sum = (sum & 0xFFFF) + (sum >> 16);
    sum += sum >> 16;
    !(sum as u16)
}

/// Checksum the valid portion of a frame.
pub fn frame_checksum(frame: &Frame, order: WordOrder) -> u16 {
    checksum(frame.payload(), frame.size(), order)
}
