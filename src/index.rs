//! Retrieval index: the segment store and nearest-neighbor search.
//!
//! Everything in here is derived state. The segments table can be dropped
//! wholesale and rebuilt from canonical pages; nothing outside the
//! retrieval layer references a segment row.
//!
//! Nearest-neighbor lookup sits behind the [`VectorIndex`] trait so the
//! shipped brute-force scan can be swapped for an approximate backend
//! without touching the search engine.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::embedding;
use crate::error::ArchiveError;
use crate::segment::SegmentDraft;

/// A segment-level match from the vector index.
///
/// Carries the owning page and the matched text, deliberately not the
/// segment's own identifier: callers collapse matches to pages.
#[derive(Debug, Clone)]
pub struct SegmentMatch {
    pub page_id: String,
    pub text: String,
    pub score: f64,
}

/// Nearest-neighbor search over stored segment embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The `limit` segments closest to `query` under cosine similarity,
    /// best first.
    async fn nearest_neighbors(
        &self,
        pool: &SqlitePool,
        query: &[f32],
        limit: i64,
    ) -> Result<Vec<SegmentMatch>>;
}

/// Exact brute-force cosine scan.
///
/// Loads every stored embedding and ranks in memory. Fine at archive
/// scale; an ANN backend implements the same trait when corpora outgrow it.
pub struct ExactScanIndex;

#[async_trait]
impl VectorIndex for ExactScanIndex {
    async fn nearest_neighbors(
        &self,
        pool: &SqlitePool,
        query: &[f32],
        limit: i64,
    ) -> Result<Vec<SegmentMatch>> {
        let rows = sqlx::query("SELECT page_id, segment_text, embedding FROM segments")
            .fetch_all(pool)
            .await?;

        let mut matches: Vec<SegmentMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let score = embedding::cosine_similarity(query, &vec) as f64;
                SegmentMatch {
                    page_id: row.get("page_id"),
                    text: row.get("segment_text"),
                    score,
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit.max(0) as usize);

        Ok(matches)
    }
}

/// Insert a segment unless the page already holds one with the same hash.
///
/// Returns `true` if a row was inserted. An existing row is left untouched
/// (its creation timestamp survives re-ingestion), so a lost insert race
/// collapses into a successful no-op.
pub async fn upsert_segment(
    tx: &mut Transaction<'_, Sqlite>,
    page_id: &str,
    draft: &SegmentDraft,
    segmenter_version: &str,
    embedding_blob: &[u8],
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO segments (id, page_id, segment_index, segment_text, segment_hash, segmenter_version, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(page_id, segment_hash) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(page_id)
    .bind(draft.index)
    .bind(&draft.text)
    .bind(&draft.hash)
    .bind(segmenter_version)
    .bind(embedding_blob)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }

    // Unique-constraint race: confirm the row we lost to is actually
    // there, then treat the insert as a successful no-op.
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM segments WHERE page_id = ? AND segment_hash = ?")
            .bind(page_id)
            .bind(&draft.hash)
            .fetch_optional(&mut **tx)
            .await?;

    if existing.is_none() {
        return Err(ArchiveError::SegmentConflict {
            page_id: page_id.to_string(),
        }
        .into());
    }

    Ok(false)
}

/// Remove a page's segments whose hash is no longer produced by the
/// current segmentation of its text.
pub async fn delete_stale_segments(
    tx: &mut Transaction<'_, Sqlite>,
    page_id: &str,
    valid_hashes: &[&str],
) -> Result<u64> {
    if valid_hashes.is_empty() {
        let result = sqlx::query("DELETE FROM segments WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut **tx)
            .await?;
        return Ok(result.rows_affected());
    }

    let placeholders = vec!["?"; valid_hashes.len()].join(", ");
    let sql = format!(
        "DELETE FROM segments WHERE page_id = ? AND segment_hash NOT IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&sql).bind(page_id);
    for hash in valid_hashes {
        query = query.bind(*hash);
    }

    let result = query.execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

/// Hashes of the segments a page currently holds.
pub async fn existing_hashes(pool: &SqlitePool, page_id: &str) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT segment_hash FROM segments WHERE page_id = ?")
        .bind(page_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("segment_hash")).collect())
}

/// Drop every segment row. The index is rebuilt from canonical pages.
pub async fn drop_all_segments(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM segments").execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn count_segments(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segments")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
