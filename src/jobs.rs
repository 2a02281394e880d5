//! Ingest job repository.
//!
//! Jobs are keyed by a caller-supplied idempotency key: submitting the same
//! key twice yields the same job row, and a terminal job is returned as-is
//! without re-running any work. Progress counters are bumped with
//! transactional increments so concurrent page completions never lose
//! updates.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::ArchiveError;
use crate::models::{IngestJob, JobErrorEntry, JobProgress, JobStage, JobStatus};

/// Errors kept per job; older entries are dropped first.
const MAX_ERRORS: usize = 10;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create the job for an idempotency key, or return the existing one.
///
/// Re-submission with the same key and the same issue returns the stored
/// job. The same key against a *different* issue is a client error and
/// never enters the pipeline.
pub async fn submit_job(pool: &SqlitePool, key: &str, issue_id: &str) -> Result<IngestJob> {
    let id = Uuid::new_v4().to_string();
    let ts = now();

    sqlx::query(
        r#"
        INSERT INTO ingest_jobs (id, idempotency_key, issue_id, status, created_at, updated_at)
        VALUES (?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(idempotency_key) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(key)
    .bind(issue_id)
    .bind(ts)
    .bind(ts)
    .execute(pool)
    .await?;

    let job = get_job(pool, key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job for key '{}' vanished after insert", key))?;

    match job.issue_id.as_deref() {
        Some(existing) if existing != issue_id => Err(ArchiveError::IdempotencyKeyReuse {
            key: key.to_string(),
            existing: existing.to_string(),
        }
        .into()),
        _ => Ok(job),
    }
}

pub async fn get_job(pool: &SqlitePool, key: &str) -> Result<Option<IngestJob>> {
    let row = sqlx::query("SELECT * FROM ingest_jobs WHERE idempotency_key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    row.map(|r| job_from_row(&r)).transpose()
}

/// Enter `processing` and reset the progress snapshot for this pass.
///
/// Returns `false` if the job is already terminal, in which case the
/// caller must not run any work.
pub async fn begin_pass(pool: &SqlitePool, job_id: &str, pages_total: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'processing',
            pages_total = ?,
            pages_processed = 0,
            pages_succeeded = 0,
            pages_failed = 0,
            current_stage = ?,
            updated_at = ?
        WHERE id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(pages_total)
    .bind(JobStage::ProcessingPages.as_str())
    .bind(now())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count one page as processed and succeeded. Atomic increment.
pub async fn mark_page_succeeded(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET pages_processed = pages_processed + 1,
            pages_succeeded = pages_succeeded + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count one page as processed and failed, appending an error descriptor.
pub async fn mark_page_failed(
    pool: &SqlitePool,
    job_id: &str,
    page_ref: &str,
    message: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let errors_json: String = sqlx::query_scalar("SELECT errors FROM ingest_jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

    let mut errors: Vec<JobErrorEntry> =
        serde_json::from_str(&errors_json).unwrap_or_default();
    push_error(
        &mut errors,
        JobErrorEntry {
            page_ref: page_ref.to_string(),
            message: message.to_string(),
            timestamp: now(),
        },
    );

    sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET pages_processed = pages_processed + 1,
            pages_failed = pages_failed + 1,
            errors = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(serde_json::to_string(&errors)?)
    .bind(now())
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Append an error descriptor without touching the page counters.
pub async fn append_error(
    pool: &SqlitePool,
    job_id: &str,
    page_ref: &str,
    message: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let errors_json: String = sqlx::query_scalar("SELECT errors FROM ingest_jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

    let mut errors: Vec<JobErrorEntry> =
        serde_json::from_str(&errors_json).unwrap_or_default();
    push_error(
        &mut errors,
        JobErrorEntry {
            page_ref: page_ref.to_string(),
            message: message.to_string(),
            timestamp: now(),
        },
    );

    sqlx::query("UPDATE ingest_jobs SET errors = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(&errors)?)
        .bind(now())
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Close out a pass: `completed` if every page was either indexed or
/// terminally failed, otherwise stay `processing` until OCR catches up.
pub async fn finish_pass(pool: &SqlitePool, job_id: &str, pages_awaiting_ocr: i64) -> Result<()> {
    if pages_awaiting_ocr > 0 {
        sqlx::query(
            "UPDATE ingest_jobs SET current_stage = ?, updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(JobStage::AwaitingOcr.as_str())
        .bind(now())
        .bind(job_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            "UPDATE ingest_jobs SET status = 'completed', current_stage = ?, updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(JobStage::Done.as_str())
        .bind(now())
        .bind(job_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Job-level fatal: set `failed` and record the reason.
pub async fn fail_job(pool: &SqlitePool, job_id: &str, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE ingest_jobs SET status = 'failed', error_message = ?, updated_at = ? WHERE id = ?",
    )
    .bind(message)
    .bind(now())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ask a job to stop starting new pages. Returns `false` if no job has
/// this key or the job is already terminal.
pub async fn request_cancel(pool: &SqlitePool, key: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET cancel_requested = 1, updated_at = ?
        WHERE idempotency_key = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(now())
    .bind(key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn cancel_requested(pool: &SqlitePool, job_id: &str) -> Result<bool> {
    let flag: i64 = sqlx::query_scalar("SELECT cancel_requested FROM ingest_jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    Ok(flag != 0)
}

fn push_error(errors: &mut Vec<JobErrorEntry>, entry: JobErrorEntry) {
    errors.push(entry);
    if errors.len() > MAX_ERRORS {
        let excess = errors.len() - MAX_ERRORS;
        errors.drain(..excess);
    }
}

fn job_from_row(row: &SqliteRow) -> Result<IngestJob> {
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown job status '{}'", status_str))?;

    let errors_json: String = row.get("errors");
    let errors: Vec<JobErrorEntry> = serde_json::from_str(&errors_json).unwrap_or_default();
    let cancel_flag: i64 = row.get("cancel_requested");

    Ok(IngestJob {
        id: row.get("id"),
        idempotency_key: row.get("idempotency_key"),
        issue_id: row.get("issue_id"),
        status,
        progress: JobProgress {
            pages_total: row.get("pages_total"),
            pages_processed: row.get("pages_processed"),
            pages_succeeded: row.get("pages_succeeded"),
            pages_failed: row.get("pages_failed"),
            current_stage: row.get("current_stage"),
            errors,
        },
        error_message: row.get("error_message"),
        cancel_requested: cancel_flag != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> JobErrorEntry {
        JobErrorEntry {
            page_ref: format!("page-{}", n),
            message: format!("error {}", n),
            timestamp: n as i64,
        }
    }

    #[test]
    fn test_push_error_keeps_last_ten() {
        let mut errors = Vec::new();
        for n in 0..15 {
            push_error(&mut errors, entry(n));
        }
        assert_eq!(errors.len(), MAX_ERRORS);
        assert_eq!(errors[0].page_ref, "page-5");
        assert_eq!(errors[9].page_ref, "page-14");
    }

    #[test]
    fn test_error_entries_roundtrip_json() {
        let errors = vec![entry(1), entry(2)];
        let json = serde_json::to_string(&errors).unwrap();
        let back: Vec<JobErrorEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].message, "error 2");
    }
}
