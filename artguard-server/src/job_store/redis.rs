//! Redis implementation of the job store.
//!
//! Each job is one hash under `artguard:job:{id}`:
//!
//! | field              | content                                           |
//! |--------------------|---------------------------------------------------|
//! | `status`           | current status                                    |
//! | `record`           | immutable JSON: id, metadata, created/expires at  |
//! | `result`           | result JSON, empty when unset                     |
//! | `error`            | failure message, empty when unset                 |
//! | `processor_job_id` | processor's id, absent until acknowledged         |
//! | `updated_at`       | RFC 3339 timestamp                                |
//!
//! Insert and compare-and-set run as Lua scripts, so the status check and
//! the write are one atomic step on the Redis server no matter how many
//! gateway instances share it. Expiry is Redis' own key TTL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use artguard_core::{CasOutcome, Job, JobMetadata, JobStatus, JobStore, JobUpdate, StoreError};

const KEY_PREFIX: &str = "artguard:job:";

/// KEYS[1] job key; ARGV: status, record, updated_at, ttl ms.
const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], 'record', ARGV[2], 'result', '', 'error', '', 'updated_at', ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
"#;

/// KEYS[1] job key; ARGV: new status, result, error, updated_at,
/// processor_job_id (empty keeps the old one), then the expected statuses.
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return {'missing'}
end
for i = 6, #ARGV do
  if ARGV[i] == current then
    redis.call('HSET', KEYS[1], 'status', ARGV[1], 'result', ARGV[2], 'error', ARGV[3], 'updated_at', ARGV[4])
    if ARGV[5] ~= '' then
      redis.call('HSET', KEYS[1], 'processor_job_id', ARGV[5])
    end
    local reply = redis.call('HGETALL', KEYS[1])
    table.insert(reply, 1, 'applied')
    return reply
  end
end
return {'mismatch', current}
"#;

/// The part of a job that never changes after creation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRecord {
    job_id: String,
    metadata: JobMetadata,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Redis-backed job store.
#[derive(Clone)]
pub struct RedisJobStore {
    connection: ConnectionManager,
    insert_script: Script,
    cas_script: Script,
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Mask the password in a connection URL so the host stays visible in logs.
fn redact_password(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "<unprintable url>".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "<unprintable url>".to_string(),
    }
}

fn job_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}{job_id}")
}

impl RedisJobStore {
    /// Connect to Redis. The connection manager reconnects on its own after
    /// the first successful connection.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let connection = ConnectionManager::new(client).await.map_err(unavailable)?;

        info!(url = %redact_password(redis_url), "Job store connected");

        Ok(Self {
            connection,
            insert_script: Script::new(INSERT_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &Job, ttl: Duration) -> Result<bool, StoreError> {
        let record = serde_json::to_string(&JobRecord {
            job_id: job.job_id.clone(),
            metadata: job.metadata.clone(),
            created_at: job.created_at,
            expires_at: job.expires_at,
        })
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut conn = self.connection.clone();
        let inserted: i64 = self
            .insert_script
            .key(job_key(&job.job_id))
            .arg(job.status.as_str())
            .arg(record)
            .arg(job.updated_at.to_rfc3339())
            .arg(ttl.as_millis().max(1) as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(inserted == 1)
    }

    async fn compare_and_set(
        &self,
        job_id: &str,
        expected: &[JobStatus],
        update: &JobUpdate,
    ) -> Result<CasOutcome, StoreError> {
        let result = match &update.result {
            Some(value) => {
                serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))?
            }
            None => String::new(),
        };

        let mut invocation = self.cas_script.key(job_key(job_id));
        invocation
            .arg(update.status.as_str())
            .arg(result)
            .arg(update.error.clone().unwrap_or_default())
            .arg(update.updated_at.to_rfc3339())
            .arg(update.processor_job_id.clone().unwrap_or_default());
        for status in expected {
            invocation.arg(status.as_str());
        }

        let mut conn = self.connection.clone();
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(unavailable)?;

        let outcome = decode_cas_reply(reply)?;
        let kind = match &outcome {
            CasOutcome::Applied(_) => "applied",
            CasOutcome::Mismatch(_) => "mismatch",
            CasOutcome::Missing => "missing",
        };
        debug!(job_id, outcome = kind, "Compare-and-set");
        Ok(outcome)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(job_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(&fields).map(Some)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }
}

fn decode_cas_reply(reply: Vec<String>) -> Result<CasOutcome, StoreError> {
    let mut items = reply.into_iter();
    match items.next().as_deref() {
        Some("applied") => {
            let rest: Vec<String> = items.collect();
            let fields: HashMap<String, String> = rest
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            job_from_fields(&fields).map(CasOutcome::Applied)
        }
        Some("mismatch") => {
            let current = items
                .next()
                .ok_or_else(|| StoreError::Corrupt("mismatch reply without status".into()))?;
            parse_status(&current).map(CasOutcome::Mismatch)
        }
        Some("missing") => Ok(CasOutcome::Missing),
        other => Err(StoreError::Corrupt(format!(
            "unexpected compare-and-set reply: {other:?}"
        ))),
    }
}

fn parse_status(raw: &str) -> Result<JobStatus, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

fn non_empty(fields: &HashMap<String, String>, name: &str) -> Option<String> {
    fields.get(name).filter(|v| !v.is_empty()).cloned()
}

fn job_from_fields(fields: &HashMap<String, String>) -> Result<Job, StoreError> {
    let corrupt = |what: &str| StoreError::Corrupt(format!("job hash missing {what}"));

    let raw_record = fields.get("record").ok_or_else(|| corrupt("record"))?;
    let record: JobRecord = serde_json::from_str(raw_record)
        .map_err(|e| StoreError::Corrupt(format!("job record: {e}")))?;
    let status = parse_status(fields.get("status").ok_or_else(|| corrupt("status"))?)?;
    let updated_at = fields
        .get("updated_at")
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(record.created_at);
    let result = non_empty(fields, "result")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("job result: {e}")))?;

    Ok(Job {
        job_id: record.job_id,
        status,
        metadata: record.metadata,
        processor_job_id: non_empty(fields, "processor_job_id"),
        result,
        error: non_empty(fields, "error"),
        created_at: record.created_at,
        updated_at,
        expires_at: record.expires_at,
    })
}
