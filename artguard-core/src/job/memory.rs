//! In-memory job store.
//!
//! Suitable for a single gateway instance or tests. Atomicity comes from
//! DashMap's per-shard locks: insert and compare-and-set both hold the entry
//! lock for the whole check-and-write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CasOutcome, Job, JobStatus, JobStore, JobUpdate};
use crate::error::StoreError;

struct JobEntry {
    job: Job,
    expires_at: Instant,
}

impl JobEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, JobEntry>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Remove expired jobs (called periodically)
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.jobs.retain(|_, entry| entry.is_live(now));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("job store offline".into()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJobStore")
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let fresh = JobEntry {
            job: job.clone(),
            expires_at: now + ttl,
        };

        match self.jobs.entry(job.job_id.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().is_live(now) {
                    return Ok(false);
                }
                e.insert(fresh);
            }
            Entry::Vacant(e) => {
                e.insert(fresh);
            }
        }
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        job_id: &str,
        expected: &[JobStatus],
        update: &JobUpdate,
    ) -> Result<CasOutcome, StoreError> {
        self.check_available()?;
        let now = Instant::now();

        let Some(mut entry) = self.jobs.get_mut(job_id) else {
            return Ok(CasOutcome::Missing);
        };
        if !entry.is_live(now) {
            drop(entry);
            self.jobs.remove_if(job_id, |_, e| !e.is_live(now));
            return Ok(CasOutcome::Missing);
        }

        let current = entry.job.status;
        if !expected.contains(&current) {
            return Ok(CasOutcome::Mismatch(current));
        }

        // Writes never extend the TTL
        entry.job.apply(update);
        Ok(CasOutcome::Applied(entry.job.clone()))
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .jobs
            .get(job_id)
            .filter(|e| e.is_live(now))
            .map(|e| e.job.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ImageHashes;
    use crate::job::JobMetadata;
    use chrono::Utc;

    fn job(id: &str) -> Job {
        Job::new(
            id.into(),
            JobStatus::Queued,
            JobMetadata {
                artist: "a".into(),
                title: "t".into(),
                content_type: None,
                hashes: ImageHashes::new(),
                extra: serde_json::Value::Null,
            },
            Duration::from_secs(60),
        )
    }

    fn update(status: JobStatus) -> JobUpdate {
        JobUpdate {
            status,
            result: None,
            error: None,
            processor_job_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = MemoryJobStore::new();
        assert!(store.insert(&job("j1"), Duration::from_secs(60)).await.unwrap());
        assert!(!store.insert(&job("j1"), Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cas_applies_only_on_expected_status() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1"), Duration::from_secs(60)).await.unwrap();

        let outcome = store
            .compare_and_set("j1", &[JobStatus::Processing], &update(JobStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Mismatch(JobStatus::Queued));

        let outcome = store
            .compare_and_set("j1", &[JobStatus::Queued], &update(JobStatus::Processing))
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Applied(j) if j.status == JobStatus::Processing));
    }

    #[tokio::test]
    async fn test_cas_keeps_processor_id_when_absent() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1"), Duration::from_secs(60)).await.unwrap();

        let mut with_id = update(JobStatus::Queued);
        with_id.processor_job_id = Some("p-1".into());
        store
            .compare_and_set("j1", &[JobStatus::Queued], &with_id)
            .await
            .unwrap();
        store
            .compare_and_set("j1", &[JobStatus::Queued], &update(JobStatus::Processing))
            .await
            .unwrap();

        let stored = store.get("j1").await.unwrap().unwrap();
        assert_eq!(stored.processor_job_id.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_cas_missing_job() {
        let store = MemoryJobStore::new();
        let outcome = store
            .compare_and_set("nope", &[JobStatus::Queued], &update(JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_jobs_disappear() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1"), Duration::from_secs(10)).await.unwrap();
        assert!(store.get("j1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("j1").await.unwrap().is_none());
        let outcome = store
            .compare_and_set("j1", &[JobStatus::Queued], &update(JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Missing);

        // The id can be reused once the old entry is gone
        assert!(store.insert(&job("j1"), Duration::from_secs(10)).await.unwrap());
        store.cleanup_expired();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cas_has_single_winner() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        store.insert(&job("j1"), Duration::from_secs(60)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set("j1", &[JobStatus::Queued], &update(JobStatus::Completed))
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for h in handles {
            if matches!(h.await.unwrap(), CasOutcome::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_outage() {
        let store = MemoryJobStore::new();
        store.set_available(false);
        assert!(store.ping().await.is_err());
        assert!(store.get("j1").await.is_err());
    }
}
