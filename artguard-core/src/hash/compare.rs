//! Bit-distance and similarity between fixed-width hash values.
//!
//! Pure functions, no I/O.

use std::collections::BTreeMap;

use super::{significant_bits, HashFamily, HashValue};
use crate::error::HashError;

/// Count the differing bits between two big-endian byte strings of a
/// given width.
///
/// Operands shorter than the width are treated as left-padded with zeros.
/// Fails if either operand has a set bit outside `bit_width`.
pub fn hamming_distance_bytes(a: &[u8], b: &[u8], bit_width: u32) -> Result<u32, HashError> {
    for operand in [a, b] {
        let bits = significant_bits(operand);
        if bits > bit_width {
            return Err(HashError::WidthExceeded {
                bits,
                width: bit_width,
            });
        }
    }

    let len = a.len().max(b.len());
    let byte_at = |bytes: &[u8], i: usize| -> u8 {
        // i counts from the least significant byte
        bytes.len().checked_sub(i + 1).map_or(0, |idx| bytes[idx])
    };

    Ok((0..len)
        .map(|i| (byte_at(a, i) ^ byte_at(b, i)).count_ones())
        .sum())
}

/// Hamming distance between two hash values at the given width.
pub fn hamming_distance(a: &HashValue, b: &HashValue, bit_width: u32) -> Result<u32, HashError> {
    hamming_distance_bytes(a.as_bytes(), b.as_bytes(), bit_width)
}

/// `1 - distance / bit_width`, clamped to `[0, 1]`.
pub fn similarity(distance: u32, bit_width: u32) -> f64 {
    if bit_width == 0 {
        return 0.0;
    }
    (1.0 - f64::from(distance) / f64::from(bit_width)).clamp(0.0, 1.0)
}

/// Weighted mean of per-family similarities.
///
/// Only families present in both maps with a positive weight contribute.
/// Returns `0.0` when nothing overlaps: that means "no basis for
/// comparison", which callers must not confuse with "confirmed dissimilar".
pub fn weighted_score(
    similarities: &BTreeMap<HashFamily, f64>,
    weights: &BTreeMap<HashFamily, f64>,
) -> f64 {
    let (weighted, total) = similarities
        .iter()
        .filter_map(|(family, sim)| {
            weights
                .get(family)
                .filter(|w| **w > 0.0)
                .map(|w| (sim * w, *w))
        })
        .fold((0.0, 0.0), |(acc_s, acc_w), (s, w)| (acc_s + s, acc_w + w));

    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}
