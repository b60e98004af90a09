//! Local fingerprint computation for uploaded images.
//!
//! Used when a submission arrives without precomputed hashes. Covers the
//! families `image_hasher` can produce: average, difference, perceptual
//! (mean over a DCT), block8 and block16. Wavelet and color hashes are only
//! ever accepted precomputed.
//!
//! ```no_run
//! use artguard_core::hash::HashComputer;
//!
//! let image_data = std::fs::read("image.jpg").unwrap();
//! let hashes = HashComputer::default().hash_bytes(&image_data).unwrap();
//! println!("{} families computed", hashes.len());
//! ```

use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};

use super::{HashFamily, HashValue, ImageHashes};
use crate::error::HashError;

/// Computes the locally supported hash families for an image.
pub struct HashComputer {
    hashers: Vec<(HashFamily, Hasher)>,
}

impl Default for HashComputer {
    fn default() -> Self {
        Self::new(&Self::SUPPORTED)
    }
}

impl HashComputer {
    /// Families this computer knows how to produce.
    pub const SUPPORTED: [HashFamily; 5] = [
        HashFamily::Perceptual,
        HashFamily::Average,
        HashFamily::Difference,
        HashFamily::Block8,
        HashFamily::Block16,
    ];

    /// Build a computer for a subset of families. Unsupported families are
    /// skipped.
    pub fn new(families: &[HashFamily]) -> Self {
        let hashers = families
            .iter()
            .filter_map(|family| hasher_for(*family).map(|h| (*family, h)))
            .collect();
        Self { hashers }
    }

    /// Compute hashes from raw image bytes (JPEG, PNG, GIF or WebP).
    pub fn hash_bytes(&self, image_data: &[u8]) -> Result<ImageHashes, HashError> {
        let image = image::load_from_memory(image_data)
            .map_err(|e| HashError::Compute(format!("Failed to decode image: {}", e)))?;
        self.hash_image(&image)
    }

    pub fn hash_image(&self, image: &DynamicImage) -> Result<ImageHashes, HashError> {
        self.hashers
            .iter()
            .try_fold(ImageHashes::new(), |acc, (family, hasher)| {
                let hash = hasher.hash_image(image);
                let value = HashValue::from_bytes(hash.as_bytes(), family.bit_width())?;
                acc.with(*family, value)
            })
    }

    /// Check if the provided bytes look like a supported image format.
    pub fn is_supported_format(data: &[u8]) -> bool {
        image::guess_format(data).is_ok()
    }
}

fn hasher_for(family: HashFamily) -> Option<Hasher> {
    let config = match family {
        HashFamily::Average => HasherConfig::new().hash_size(8, 8).hash_alg(HashAlg::Mean),
        HashFamily::Difference => HasherConfig::new()
            .hash_size(8, 8)
            .hash_alg(HashAlg::Gradient),
        HashFamily::Perceptual => HasherConfig::new()
            .hash_size(8, 8)
            .hash_alg(HashAlg::Mean)
            .preproc_dct(),
        HashFamily::Block8 => HasherConfig::new()
            .hash_size(8, 8)
            .hash_alg(HashAlg::Blockhash),
        HashFamily::Block16 => HasherConfig::new()
            .hash_size(16, 16)
            .hash_alg(HashAlg::Blockhash),
        HashFamily::Wavelet | HashFamily::Color => return None,
    };
    Some(config.to_hasher())
}
