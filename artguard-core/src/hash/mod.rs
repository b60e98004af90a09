//! Hash families and fixed-width hash values.
//!
//! Every artwork carries a set of perceptual fingerprints, one per hash
//! family. A [`HashValue`] keeps the canonical big-endian bytes for its
//! width; the hex and integer renderings are always derived from those
//! bytes, so the two can never disagree.

pub mod compare;
#[cfg(feature = "perceptual-hash")]
pub mod compute;

pub use compare::{hamming_distance, hamming_distance_bytes, similarity, weighted_score};
#[cfg(feature = "perceptual-hash")]
pub use compute::HashComputer;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HashError;

/// One perceptual fingerprint algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFamily {
    /// DCT-based perceptual hash
    Perceptual,
    /// Mean (average) hash
    Average,
    /// Gradient (difference) hash
    Difference,
    /// Haar wavelet hash
    Wavelet,
    /// Color moment hash
    Color,
    /// Blockhash on an 8x8 grid
    Block8,
    /// Blockhash on a 16x16 grid
    Block16,
}

impl HashFamily {
    pub const ALL: [HashFamily; 7] = [
        HashFamily::Perceptual,
        HashFamily::Average,
        HashFamily::Difference,
        HashFamily::Wavelet,
        HashFamily::Color,
        HashFamily::Block8,
        HashFamily::Block16,
    ];

    /// Width of this family's fingerprint in bits.
    pub const fn bit_width(self) -> u32 {
        match self {
            HashFamily::Block16 => 256,
            _ => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashFamily::Perceptual => "perceptual",
            HashFamily::Average => "average",
            HashFamily::Difference => "difference",
            HashFamily::Wavelet => "wavelet",
            HashFamily::Color => "color",
            HashFamily::Block8 => "block8",
            HashFamily::Block16 => "block16",
        }
    }
}

impl fmt::Display for HashFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashFamily {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashFamily::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HashError::UnknownFamily(s.to_string()))
    }
}

/// A fixed-width unsigned integer stored as big-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashValue {
    bytes: Vec<u8>,
    bit_width: u32,
}

impl HashValue {
    /// Build a value from big-endian bytes, left-padding to the width.
    ///
    /// Leading zero bytes beyond the width are accepted; any set bit outside
    /// the width is an error.
    pub fn from_bytes(bytes: &[u8], bit_width: u32) -> Result<Self, HashError> {
        let byte_width = byte_width(bit_width)?;
        let bits = significant_bits(bytes);
        if bits > bit_width {
            return Err(HashError::WidthExceeded {
                bits,
                width: bit_width,
            });
        }

        let significant = &bytes[bytes.len() - bytes.len().min(byte_width)..];
        let mut canonical = vec![0u8; byte_width - significant.len()];
        canonical.extend_from_slice(significant);

        Ok(Self {
            bytes: canonical,
            bit_width,
        })
    }

    /// Parse a hex rendering. Odd-length strings are treated as having a
    /// leading zero nibble; an empty string is malformed.
    pub fn from_hex(hex_str: &str, bit_width: u32) -> Result<Self, HashError> {
        let trimmed = hex_str.trim().trim_start_matches("0x");
        if trimmed.is_empty() {
            return Err(HashError::InvalidHex("empty hash string".to_string()));
        }
        let padded = if trimmed.len() % 2 == 1 {
            format!("0{trimmed}")
        } else {
            trimmed.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|e| HashError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes, bit_width)
    }

    pub fn from_u64(value: u64, bit_width: u32) -> Result<Self, HashError> {
        Self::from_bytes(&value.to_be_bytes(), bit_width)
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Zero-padded hex rendering, `bit_width / 4` characters long.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Integer rendering, only for widths up to 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        if self.bit_width > 64 {
            return None;
        }
        Some(
            self.bytes
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        )
    }

    /// Number of bits needed to represent this value.
    pub fn significant_bits(&self) -> u32 {
        significant_bits(&self.bytes)
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn byte_width(bit_width: u32) -> Result<usize, HashError> {
    if bit_width == 0 || bit_width % 8 != 0 {
        return Err(HashError::InvalidWidth(bit_width));
    }
    Ok((bit_width / 8) as usize)
}

pub(crate) fn significant_bits(bytes: &[u8]) -> u32 {
    match bytes.iter().position(|b| *b != 0) {
        Some(idx) => {
            let remaining = (bytes.len() - idx - 1) as u32;
            remaining * 8 + (8 - bytes[idx].leading_zeros())
        }
        None => 0,
    }
}

/// The full set of fingerprints for one image, keyed by family.
///
/// Serializes as a `{ "family": "hex" }` map. Each value is validated
/// against its family's width on the way in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<HashFamily, String>",
    into = "BTreeMap<HashFamily, String>"
)]
pub struct ImageHashes {
    values: BTreeMap<HashFamily, HashValue>,
}

impl ImageHashes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a family, validating the value against the family width.
    pub fn with(mut self, family: HashFamily, value: HashValue) -> Result<Self, HashError> {
        let value = if value.bit_width() == family.bit_width() {
            value
        } else {
            HashValue::from_bytes(value.as_bytes(), family.bit_width())?
        };
        self.values.insert(family, value);
        Ok(self)
    }

    /// Add a family from its hex rendering.
    pub fn with_hex(self, family: HashFamily, hex_str: &str) -> Result<Self, HashError> {
        let value = HashValue::from_hex(hex_str, family.bit_width())?;
        self.with(family, value)
    }

    pub fn get(&self, family: HashFamily) -> Option<&HashValue> {
        self.values.get(&family)
    }

    pub fn iter(&self) -> impl Iterator<Item = (HashFamily, &HashValue)> {
        self.values.iter().map(|(f, v)| (*f, v))
    }

    pub fn families(&self) -> impl Iterator<Item = HashFamily> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Hex rendering of every family.
    pub fn to_hex_map(&self) -> BTreeMap<HashFamily, String> {
        self.values
            .iter()
            .map(|(f, v)| (*f, v.to_hex()))
            .collect()
    }
}

impl TryFrom<BTreeMap<HashFamily, String>> for ImageHashes {
    type Error = HashError;

    fn try_from(map: BTreeMap<HashFamily, String>) -> Result<Self, Self::Error> {
        map.into_iter()
            .try_fold(ImageHashes::new(), |acc, (family, hex_str)| {
                acc.with_hex(family, &hex_str)
            })
    }
}

impl From<ImageHashes> for BTreeMap<HashFamily, String> {
    fn from(hashes: ImageHashes) -> Self {
        hashes.to_hex_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_round_trip_names() {
        for family in HashFamily::ALL {
            assert_eq!(family.as_str().parse::<HashFamily>().unwrap(), family);
        }
        assert!("sha256".parse::<HashFamily>().is_err());
        assert_eq!("BLOCK8".parse::<HashFamily>().unwrap(), HashFamily::Block8);
    }

    #[test]
    fn test_hex_and_int_are_consistent() {
        let value = HashValue::from_u64(0xdead_beef, 64).unwrap();
        assert_eq!(value.to_hex(), "00000000deadbeef");
        assert_eq!(value.as_u64(), Some(0xdead_beef));

        let parsed = HashValue::from_hex("deadbeef", 64).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_empty_hex_is_malformed() {
        for input in ["", "   ", "0x"] {
            let err = HashValue::from_hex(input, 64).unwrap_err();
            assert!(matches!(err, HashError::InvalidHex(_)), "{input:?}: {err:?}");
        }
        assert!(matches!(
            HashValue::from_hex("zz", 64).unwrap_err(),
            HashError::InvalidHex(_)
        ));
        assert!(ImageHashes::new().with_hex(HashFamily::Average, "").is_err());
    }

    #[test]
    fn test_value_too_wide_is_rejected() {
        let err = HashValue::from_hex("1ffffffffffffffff", 64).unwrap_err();
        assert_eq!(
            err,
            HashError::WidthExceeded {
                bits: 65,
                width: 64
            }
        );
        // Leading zero bytes beyond the width are fine
        assert!(HashValue::from_hex("00ffffffffffffffff", 64).is_ok());
    }

    #[test]
    fn test_invalid_width() {
        assert_eq!(
            HashValue::from_u64(1, 12).unwrap_err(),
            HashError::InvalidWidth(12)
        );
        assert_eq!(
            HashValue::from_u64(1, 0).unwrap_err(),
            HashError::InvalidWidth(0)
        );
    }

    #[test]
    fn test_wide_family_has_no_integer_rendering() {
        let value = HashValue::from_hex("ff", HashFamily::Block16.bit_width()).unwrap();
        assert_eq!(value.to_hex().len(), 64);
        assert_eq!(value.as_u64(), None);
    }

    #[test]
    fn test_image_hashes_serde() {
        let hashes = ImageHashes::new()
            .with_hex(HashFamily::Average, "ffff0000ffff0000")
            .unwrap()
            .with_hex(HashFamily::Difference, "0f0f0f0f0f0f0f0f")
            .unwrap();

        let json = serde_json::to_value(&hashes).unwrap();
        assert_eq!(json["average"], "ffff0000ffff0000");

        let back: ImageHashes = serde_json::from_value(json).unwrap();
        assert_eq!(back, hashes);
    }

    #[test]
    fn test_image_hashes_rejects_bad_family_value() {
        let json = serde_json::json!({ "perceptual": "not-hex" });
        assert!(serde_json::from_value::<ImageHashes>(json).is_err());

        let json = serde_json::json!({ "unknown": "00" });
        assert!(serde_json::from_value::<ImageHashes>(json).is_err());
    }

    #[test]
    fn test_significant_bits() {
        assert_eq!(significant_bits(&[0, 0, 0]), 0);
        assert_eq!(significant_bits(&[0, 1]), 1);
        assert_eq!(significant_bits(&[0x80, 0]), 16);
    }
}
