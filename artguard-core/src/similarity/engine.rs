//! Similarity search over the artwork store.
//!
//! The store cannot compute Hamming distance itself, so search is a
//! progressive filter:
//!
//! 1. **Candidate fetch** - a bounded coarse fetch. Scores only cover the
//!    families a candidate shares with the query, so an equality lookup is
//!    sound only when the query carries a single weighted family: at a
//!    threshold of 1.0 such a query is answered by matching that family.
//!    Otherwise the most recent `candidate_limit` records are scanned. The
//!    scan bound caps latency at the cost of recall: true matches older
//!    than the window are missed.
//! 2. **Exact scoring** - per-family distance and similarity.
//! 3. **Threshold filter** - drop anything scoring below the threshold.
//! 4. **Rank and truncate.**

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{rank, score_candidate, SimilarityQuery, SimilarityResult};
use crate::artwork::{ArtworkStore, CandidateFilter};
use crate::error::{with_store_timeout, StoreError};

/// Default bound on the number of candidates fetched per query.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 1000;

/// Default timeout applied to every artwork store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Artwork store unavailable: {0}")]
    DependencyUnavailable(String),
}

impl SearchError {
    /// Stable machine-readable tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
        }
    }
}

impl From<StoreError> for SearchError {
    fn from(e: StoreError) -> Self {
        Self::DependencyUnavailable(e.to_string())
    }
}

/// Result slot for one query in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSlot {
    pub query_id: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchOutcome {
    Ok { results: Vec<SimilarityResult> },
    Error { error: String, message: String },
}

impl From<Result<Vec<SimilarityResult>, SearchError>> for BatchOutcome {
    fn from(result: Result<Vec<SimilarityResult>, SearchError>) -> Self {
        match result {
            Ok(results) => Self::Ok { results },
            Err(e) => Self::Error {
                error: e.tag().to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Finds stored artworks similar to a query.
#[derive(Clone)]
pub struct SimilarityEngine {
    store: Arc<dyn ArtworkStore>,
    candidate_limit: usize,
    store_timeout: Duration,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn ArtworkStore>) -> Self {
        Self {
            store,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Tune the candidate window. Larger windows improve recall and cost
    /// latency.
    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn candidate_limit(&self) -> usize {
        self.candidate_limit
    }

    /// Run one query. The store is not retried on failure.
    #[instrument(level = "debug", skip_all, fields(
        families = query.hashes.len(),
        threshold = query.threshold,
        limit = query.limit
    ))]
    pub async fn find_similar(
        &self,
        query: SimilarityQuery,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let query = query.validate().map_err(SearchError::InvalidQuery)?;
        let filter = self.candidate_filter(&query);

        let candidates = with_store_timeout(
            self.store_timeout,
            self.store.fetch_candidates(&filter),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Artwork store candidate fetch failed");
            SearchError::from(e)
        })?;

        let fetched = candidates.len();
        let matches: Vec<SimilarityResult> = candidates
            .iter()
            .filter_map(|c| score_candidate(&query.hashes, &query.weights, c))
            .filter(|r| r.score >= query.threshold)
            .collect();

        debug!(
            fetched,
            matched = matches.len(),
            exact_probe = matches!(filter, CandidateFilter::Exact { .. }),
            "Similarity search complete"
        );

        Ok(rank(matches, query.limit))
    }

    /// Run several queries independently. One query failing never aborts
    /// its siblings; output order follows input order.
    pub async fn find_similar_batch(
        &self,
        queries: Vec<(String, SimilarityQuery)>,
    ) -> Vec<BatchSlot> {
        let runs = queries.into_iter().map(|(query_id, query)| async move {
            let outcome = self.find_similar(query).await.into();
            BatchSlot { query_id, outcome }
        });
        futures::future::join_all(runs).await
    }

    fn candidate_filter(&self, query: &SimilarityQuery) -> CandidateFilter {
        // A candidate missing the looked-up family can still score 1.0 on the
        // other weighted families it shares with the query.
        let weighted = query
            .hashes
            .families()
            .filter(|f| query.weights.get(*f) > 0.0)
            .count();

        if query.threshold >= 1.0 && weighted == 1 {
            if let Some((family, value)) = query
                .primary_family()
                .and_then(|f| query.hashes.get(f).map(|v| (f, v.clone())))
            {
                return CandidateFilter::Exact {
                    family,
                    value,
                    limit: self.candidate_limit,
                };
            }
        }
        CandidateFilter::Scan {
            limit: self.candidate_limit,
        }
    }
}
