//! Artwork records and the read-only artwork store seam.
//!
//! The artwork store is owned by the processing backend. The gateway only
//! ever reads from it to find duplicate candidates, so the trait exposes
//! nothing but candidate fetches and a connectivity probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::hash::{HashFamily, HashValue, ImageHashes};

/// A previously processed artwork and its fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkRecord {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    /// Job that produced this artwork, when known
    pub job_id: Option<String>,
    pub hashes: ImageHashes,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub uploaded_at: DateTime<Utc>,
}

/// Coarse filter applied by the store before exact scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateFilter {
    /// Equality probe on one family's stored value.
    Exact {
        family: HashFamily,
        value: HashValue,
        limit: usize,
    },
    /// Most recently uploaded records with at least one family populated.
    Scan { limit: usize },
}

impl CandidateFilter {
    pub fn limit(&self) -> usize {
        match self {
            Self::Exact { limit, .. } | Self::Scan { limit } => *limit,
        }
    }
}

/// Read access to stored artworks.
#[async_trait]
pub trait ArtworkStore: Send + Sync {
    /// Fetch at most `filter.limit()` candidate records.
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<ArtworkRecord>, StoreError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process artwork store for tests and local development.
#[derive(Default)]
pub struct MemoryArtworkStore {
    records: RwLock<Vec<ArtworkRecord>>,
    unavailable: AtomicBool,
}

impl MemoryArtworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ArtworkRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("artwork store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ArtworkStore for MemoryArtworkStore {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<ArtworkRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());

        let mut matching: Vec<ArtworkRecord> = records
            .iter()
            .filter(|r| !r.hashes.is_empty())
            .filter(|r| match filter {
                CandidateFilter::Exact { family, value, .. } => {
                    r.hashes.get(*family) == Some(value)
                }
                CandidateFilter::Scan { .. } => true,
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        matching.truncate(filter.limit());
        Ok(matching)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(title: &str, average_hex: &str, age_secs: i64) -> ArtworkRecord {
        ArtworkRecord {
            id: Uuid::new_v4(),
            title: title.to_string(),
            artist: "A".to_string(),
            job_id: None,
            hashes: ImageHashes::new()
                .with_hex(HashFamily::Average, average_hex)
                .unwrap(),
            metadata: serde_json::Value::Null,
            uploaded_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_scan_returns_newest_first_and_bounded() {
        let store = MemoryArtworkStore::new();
        store.insert(record("old", "01", 300));
        store.insert(record("new", "02", 10));
        store.insert(record("mid", "03", 100));

        let found = store
            .fetch_candidates(&CandidateFilter::Scan { limit: 2 })
            .await
            .unwrap();
        let titles: Vec<_> = found.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn test_scan_skips_records_without_hashes() {
        let store = MemoryArtworkStore::new();
        let mut empty = record("empty", "01", 0);
        empty.hashes = ImageHashes::new();
        store.insert(empty);
        store.insert(record("hashed", "01", 0));

        let found = store
            .fetch_candidates(&CandidateFilter::Scan { limit: 10 })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "hashed");
    }

    #[tokio::test]
    async fn test_exact_probe() {
        let store = MemoryArtworkStore::new();
        store.insert(record("a", "ff", 0));
        store.insert(record("b", "0f", 0));

        let filter = CandidateFilter::Exact {
            family: HashFamily::Average,
            value: HashValue::from_hex("0f", 64).unwrap(),
            limit: 10,
        };
        let found = store.fetch_candidates(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "b");
    }

    #[tokio::test]
    async fn test_outage() {
        let store = MemoryArtworkStore::new();
        store.set_available(false);
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
