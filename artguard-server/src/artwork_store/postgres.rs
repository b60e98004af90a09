//! PostgreSQL implementation of the artwork store.
//!
//! Expected table, owned by the processing backend:
//!
//! ```sql
//! CREATE TABLE artworks (
//!     id          UUID PRIMARY KEY,
//!     title       TEXT NOT NULL,
//!     artist      TEXT NOT NULL,
//!     job_id      TEXT,
//!     hashes      JSONB NOT NULL DEFAULT '{}',   -- { "family": "hex" }
//!     metadata    JSONB NOT NULL DEFAULT '{}',
//!     uploaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! CREATE INDEX artworks_average_hash ON artworks ((hashes ->> 'average'));
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use artguard_core::{
    ArtworkRecord, ArtworkStore, CandidateFilter, HashFamily, ImageHashes, StoreError,
};

/// PostgreSQL-backed, read-only artwork store.
#[derive(Clone)]
pub struct PostgresArtworkStore {
    pool: PgPool,
}

/// Row type for database queries.
#[derive(FromRow)]
struct ArtworkRow {
    id: Uuid,
    title: String,
    artist: String,
    job_id: Option<String>,
    hashes: Json<BTreeMap<String, String>>,
    metadata: Option<Json<serde_json::Value>>,
    uploaded_at: DateTime<Utc>,
}

impl From<ArtworkRow> for ArtworkRecord {
    fn from(row: ArtworkRow) -> Self {
        Self {
            hashes: parse_hashes(row.id, row.hashes.0),
            id: row.id,
            title: row.title,
            artist: row.artist,
            job_id: row.job_id,
            metadata: row.metadata.map(|m| m.0).unwrap_or_default(),
            uploaded_at: row.uploaded_at,
        }
    }
}

/// Keep every family that parses; one bad column never hides the record.
fn parse_hashes(id: Uuid, raw: BTreeMap<String, String>) -> ImageHashes {
    raw.into_iter()
        .fold(ImageHashes::new(), |acc, (name, hex_str)| {
            let Ok(family) = name.parse::<HashFamily>() else {
                tracing::debug!(artwork_id = %id, family = %name, "Skipping unknown hash family");
                return acc;
            };
            match acc.clone().with_hex(family, &hex_str) {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(artwork_id = %id, %family, error = %e, "Skipping malformed stored hash");
                    acc
                }
            }
        })
}

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(e.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

impl PostgresArtworkStore {
    /// Create a store with a lazily connecting pool.
    ///
    /// The gateway starts even if Postgres is down; the health endpoint
    /// reports it until the first connection succeeds.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(max_connections, "Artwork store pool configured");
        Ok(Self { pool })
    }

    /// Create an artwork store from an existing pool (for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtworkStore for PostgresArtworkStore {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<ArtworkRecord>, StoreError> {
        let limit = i64::try_from(filter.limit()).unwrap_or(i64::MAX);

        let rows: Vec<ArtworkRow> = match filter {
            CandidateFilter::Exact { family, value, .. } => {
                sqlx::query_as(
                    r#"
                    SELECT id, title, artist, job_id, hashes, metadata, uploaded_at
                    FROM artworks
                    WHERE lower(hashes ->> $1) = $2
                    ORDER BY uploaded_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(family.as_str())
                .bind(value.to_hex())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            CandidateFilter::Scan { .. } => {
                sqlx::query_as(
                    r#"
                    SELECT id, title, artist, job_id, hashes, metadata, uploaded_at
                    FROM artworks
                    WHERE hashes <> '{}'::jsonb
                    ORDER BY uploaded_at DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(store_error)?;

        tracing::debug!(candidates = rows.len(), "Fetched artwork candidates");
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hashes_skips_bad_entries() {
        let mut raw = BTreeMap::new();
        raw.insert("average".to_string(), "ffffffff00000000".to_string());
        raw.insert("difference".to_string(), "not-hex".to_string());
        raw.insert("sha256".to_string(), "00".to_string());
        raw.insert("block16".to_string(), "ff".repeat(32));

        let hashes = parse_hashes(Uuid::nil(), raw);
        assert_eq!(hashes.len(), 2);
        assert!(hashes.get(HashFamily::Average).is_some());
        assert!(hashes.get(HashFamily::Block16).is_some());
        assert!(hashes.get(HashFamily::Difference).is_none());
    }

    #[test]
    fn test_row_conversion_defaults_metadata() {
        let row = ArtworkRow {
            id: Uuid::new_v4(),
            title: "Dusk".into(),
            artist: "Ada".into(),
            job_id: None,
            hashes: Json(BTreeMap::new()),
            metadata: None,
            uploaded_at: Utc::now(),
        };
        let record = ArtworkRecord::from(row);
        assert!(record.hashes.is_empty());
        assert_eq!(record.metadata, serde_json::Value::Null);
    }
}
