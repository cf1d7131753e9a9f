//! Per-byte line-word encoding and decoding
//!
//! One SPI bit becomes two line-word samples: the first carries `cfirst`
//! on the sclk bit, the second toggles sclk, so the mid-cell transition is
//! the sampling edge. A data byte therefore occupies a window of 16
//! samples. Decoding samples only the second half of each cell, which is
//! the CPHA-correct edge; the first half is deliberately ignored.

use super::mode::Encoding;

/// Line-word samples per encoded data byte (two per bit).
pub const SAMPLES_PER_BYTE: usize = 16;

/// Encodes `b` into its 16-sample window.
///
/// Every bit outside the sclk and mosi masks is held at `base`.
#[inline]
pub(crate) fn encode_byte(b: u8, enc: Encoding, sclk: u8, mosi: u8, base: u8) -> [u8; SAMPLES_PER_BYTE] {
    let mut window = [0u8; SAMPLES_PER_BYTE];
    let mut mask: u8 = if enc.lsbf { 0x01 } else { 0x80 };
    for cell in window.chunks_exact_mut(2) {
        let mut out = base | enc.cfirst;
        if b & mask != 0 {
            out |= mosi;
        }
        cell[0] = out;
        cell[1] = out ^ sclk;
        mask = if enc.lsbf { mask << 1 } else { mask >> 1 };
    }
    window
}

/// Recovers a data byte from a 16-sample window by sampling the miso bit
/// of the second half of each cell.
#[inline]
pub(crate) fn decode_byte(window: &[u8; SAMPLES_PER_BYTE], miso: u8, lsbf: bool) -> u8 {
    let mut b = 0u8;
    for cell in window.chunks_exact(2) {
        let bit = cell[1] & miso != 0;
        if lsbf {
            b >>= 1;
            if bit {
                b |= 0x80;
            }
        } else {
            b = (b << 1) | u8::from(bit);
        }
    }
    b
}
