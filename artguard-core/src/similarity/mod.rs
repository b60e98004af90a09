//! Similarity queries, scoring and ranking.
//!
//! Scoring is pure and synchronous; [`engine`] wires it to an artwork store.

pub mod engine;

pub use engine::{BatchOutcome, BatchSlot, SearchError, SimilarityEngine};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artwork::ArtworkRecord;
use crate::hash::{hamming_distance, similarity, weighted_score, HashFamily, ImageHashes};

/// Default minimum weighted score for a match.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Default number of results.
pub const DEFAULT_LIMIT: usize = 10;

/// Hard cap on the number of results.
pub const MAX_LIMIT: usize = 100;

/// Per-family importance weights.
///
/// Deserializing overlays the supplied entries on top of the defaults, so a
/// client only needs to name the families it wants to change. A weight of
/// zero removes a family from scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<HashFamily, f64>",
    into = "BTreeMap<HashFamily, f64>"
)]
pub struct FamilyWeights(BTreeMap<HashFamily, f64>);

impl Default for FamilyWeights {
    fn default() -> Self {
        Self(BTreeMap::from([
            (HashFamily::Perceptual, 1.0),
            (HashFamily::Average, 0.8),
            (HashFamily::Difference, 1.0),
            (HashFamily::Wavelet, 0.8),
            (HashFamily::Color, 0.4),
            (HashFamily::Block8, 0.6),
            (HashFamily::Block16, 0.6),
        ]))
    }
}

impl From<BTreeMap<HashFamily, f64>> for FamilyWeights {
    fn from(overrides: BTreeMap<HashFamily, f64>) -> Self {
        let mut weights = Self::default();
        weights.0.extend(overrides);
        weights
    }
}

impl From<FamilyWeights> for BTreeMap<HashFamily, f64> {
    fn from(weights: FamilyWeights) -> Self {
        weights.0
    }
}

impl FamilyWeights {
    pub fn get(&self, family: HashFamily) -> f64 {
        self.0.get(&family).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, family: HashFamily, weight: f64) {
        self.0.insert(family, weight);
    }

    pub fn as_map(&self) -> &BTreeMap<HashFamily, f64> {
        &self.0
    }
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// A request to find artworks similar to a set of fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityQuery {
    /// Query fingerprints; need not cover every family
    pub hashes: ImageHashes,
    /// Minimum weighted score in `[0, 1]`
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Maximum number of results, capped at [`MAX_LIMIT`]
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub weights: FamilyWeights,
}

impl SimilarityQuery {
    pub fn new(hashes: ImageHashes) -> Self {
        Self {
            hashes,
            threshold: DEFAULT_THRESHOLD,
            limit: DEFAULT_LIMIT,
            weights: FamilyWeights::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_weights(mut self, weights: FamilyWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Check the query and cap the limit. Returns the reason on failure.
    pub fn validate(mut self) -> Result<Self, String> {
        if self.hashes.is_empty() {
            return Err("query has no hash families".into());
        }
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            ));
        }
        if self.limit == 0 {
            return Err("limit must be at least 1".into());
        }
        if let Some((family, weight)) = self
            .weights
            .as_map()
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(format!("weight for {} must be >= 0, got {}", family, weight));
        }
        self.limit = self.limit.min(MAX_LIMIT);
        Ok(self)
    }

    /// The positively weighted query family with the highest weight.
    pub fn primary_family(&self) -> Option<HashFamily> {
        self.hashes
            .families()
            .filter(|f| self.weights.get(*f) > 0.0)
            .fold(None, |best: Option<HashFamily>, f| match best {
                Some(b) if self.weights.get(b) >= self.weights.get(f) => Some(b),
                _ => Some(f),
            })
    }
}

/// Compact reference to a matched artwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkRef {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&ArtworkRecord> for ArtworkRef {
    fn from(record: &ArtworkRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            artist: record.artist.clone(),
            job_id: record.job_id.clone(),
            uploaded_at: record.uploaded_at,
        }
    }
}

/// One ranked match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResult {
    pub artwork: ArtworkRef,
    pub distances: BTreeMap<HashFamily, u32>,
    pub similarities: BTreeMap<HashFamily, f64>,
    /// Weighted similarity over the families both sides share
    pub score: f64,
    pub total_distance: u32,
    /// 1-based position in the ranked output
    pub rank: usize,
}

impl SimilarityResult {
    /// True when every compared family matched bit for bit.
    pub fn is_exact(&self) -> bool {
        !self.distances.is_empty() && self.total_distance == 0
    }
}

/// Score one candidate against a query.
///
/// Returns `None` when the two share no positively weighted family: such a
/// candidate has no basis for comparison and is never reported.
pub fn score_candidate(
    hashes: &ImageHashes,
    weights: &FamilyWeights,
    candidate: &ArtworkRecord,
) -> Option<SimilarityResult> {
    let mut distances = BTreeMap::new();
    let mut similarities = BTreeMap::new();

    for (family, query_value) in hashes.iter() {
        let Some(stored) = candidate.hashes.get(family) else {
            continue;
        };
        match hamming_distance(query_value, stored, family.bit_width()) {
            Ok(distance) => {
                distances.insert(family, distance);
                similarities.insert(family, similarity(distance, family.bit_width()));
            }
            Err(e) => {
                tracing::warn!(
                    artwork_id = %candidate.id,
                    family = %family,
                    error = %e,
                    "Skipping incomparable hash family"
                );
            }
        }
    }

    if !distances.keys().any(|f| weights.get(*f) > 0.0) {
        return None;
    }

    Some(SimilarityResult {
        artwork: ArtworkRef::from(candidate),
        score: weighted_score(&similarities, weights.as_map()),
        total_distance: distances.values().sum(),
        distances,
        similarities,
        rank: 0,
    })
}

/// Sort by descending score, then ascending total distance, then most
/// recent upload; truncate to `limit` and assign ranks.
pub fn rank(mut results: Vec<SimilarityResult>, limit: usize) -> Vec<SimilarityResult> {
    results.sort_by(compare_results);
    results.truncate(limit);
    for (idx, result) in results.iter_mut().enumerate() {
        result.rank = idx + 1;
    }
    results
}

fn compare_results(a: &SimilarityResult, b: &SimilarityResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.total_distance.cmp(&b.total_distance))
        .then_with(|| b.artwork.uploaded_at.cmp(&a.artwork.uploaded_at))
}
