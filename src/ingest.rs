//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one issue: read pages from the canonical
//! store → segment → embed → reconcile the segment index, all tracked by
//! an idempotent [`IngestJob`](crate::models::IngestJob). Pages are
//! processed with bounded concurrency; each page's reconciliation runs in
//! a single transaction, so a page is either fully re-indexed or untouched.
//!
//! Re-running a job is convergent: segments are keyed by (page, content
//! hash), so a repeated pass re-embeds nothing and rewrites nothing that
//! has not changed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::archive;
use crate::config::{Config, EmbeddingConfig, SegmentingConfig};
use crate::embedding;
use crate::error::ArchiveError;
use crate::index;
use crate::jobs;
use crate::models::{IngestJob, PageStatus};
use crate::segment::{self, SegmentDraft};

/// Submit an ingestion request and run one pass of work for it.
///
/// The idempotency key makes this safe to call repeatedly: a terminal job
/// is returned without re-executing anything, and a re-run of a live job
/// degrades to no-op checks against the already-written segments.
pub async fn run_ingest(
    config: &Config,
    pool: &SqlitePool,
    key: &str,
    issue_id: &str,
) -> Result<IngestJob> {
    let job = jobs::submit_job(pool, key, issue_id).await?;

    if job.status.is_terminal() {
        tracing::debug!(job = %job.id, status = job.status.as_str(), "returning stored result");
        return Ok(job);
    }

    run_job(config, pool, &job).await?;

    jobs::get_job(pool, key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job for key '{}' disappeared", key))
}

async fn run_job(config: &Config, pool: &SqlitePool, job: &IngestJob) -> Result<()> {
    let issue_id = match job.issue_id.as_deref() {
        Some(id) => id.to_string(),
        None => {
            jobs::fail_job(pool, &job.id, "job has no issue reference").await?;
            return Ok(());
        }
    };

    // Job-level fatal: the referenced issue is gone.
    let issue = match archive::get_issue(pool, &issue_id).await? {
        Some(issue) => issue,
        None => {
            let err = ArchiveError::IssueNotFound(issue_id);
            jobs::fail_job(pool, &job.id, &err.to_string()).await?;
            return Ok(());
        }
    };

    // Job-level fatal: the gateway cannot even be constructed from config.
    match embedding::create_provider(&config.embedding) {
        Ok(provider) => {
            tracing::debug!(
                model = provider.model_name(),
                dims = provider.dims(),
                "embedding gateway ready"
            );
        }
        Err(e) => {
            jobs::fail_job(
                pool,
                &job.id,
                &format!("embedding gateway misconfigured: {}", e),
            )
            .await?;
            return Ok(());
        }
    }

    let pages = archive::list_pages(pool, &issue.id).await?;

    if !jobs::begin_pass(pool, &job.id, pages.len() as i64).await? {
        // Lost a race against a terminal transition; nothing to do.
        return Ok(());
    }

    tracing::info!(job = %job.id, issue = %issue.id, pages = pages.len(), "ingest pass started");

    let semaphore = Arc::new(Semaphore::new(config.ingest.page_concurrency));
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut join_set = JoinSet::new();
    let mut pages_awaiting_ocr: i64 = 0;

    for page in pages {
        // Cancellation stops new pages from starting; in-flight pages finish.
        if cancelled.load(Ordering::SeqCst) || jobs::cancel_requested(pool, &job.id).await? {
            cancelled.store(true, Ordering::SeqCst);
            break;
        }

        if page.ingestion_status == PageStatus::Indexed {
            jobs::mark_page_succeeded(pool, &job.id).await?;
            continue;
        }

        if page.ingestion_status == PageStatus::OcrFailed {
            let msg = format!("page {}: OCR failed upstream", page.page_number);
            jobs::mark_page_failed(pool, &job.id, &page.id, &msg).await?;
            continue;
        }

        if page.ocr_text.is_none() {
            // Not a failure: the page stays for a later pass once OCR lands.
            pages_awaiting_ocr += 1;
            continue;
        }

        let pool = pool.clone();
        let job_id = job.id.clone();
        let seg_cfg = config.segmenting.clone();
        let emb_cfg = config.embedding.clone();
        let sem = semaphore.clone();
        let flag = cancelled.clone();

        join_set.spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if flag.load(Ordering::SeqCst) {
                return;
            }

            let text = page.ocr_text.as_deref().unwrap_or_default();
            match index_page(&pool, &seg_cfg, &emb_cfg, &page.id, text).await {
                Ok(written) => {
                    tracing::debug!(page = %page.id, segments = written, "page indexed");
                    if let Err(e) = jobs::mark_page_succeeded(&pool, &job_id).await {
                        tracing::error!(job = %job_id, "failed to record page success: {e:#}");
                    }
                }
                Err(e) => {
                    tracing::warn!(page = %page.id, "page indexing failed: {e:#}");
                    let msg = format!("page {}: {:#}", page.page_number, e);
                    if let Err(e2) = jobs::mark_page_failed(&pool, &job_id, &page.id, &msg).await {
                        tracing::error!(job = %job_id, "failed to record page failure: {e2:#}");
                    }
                }
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            tracing::error!(job = %job.id, "page task panicked: {e}");
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        jobs::append_error(pool, &job.id, "job", "cancellation requested").await?;
        jobs::fail_job(pool, &job.id, &ArchiveError::Cancelled.to_string()).await?;
        tracing::info!(job = %job.id, "ingest pass cancelled");
        return Ok(());
    }

    jobs::finish_pass(pool, &job.id, pages_awaiting_ocr).await?;
    tracing::info!(job = %job.id, awaiting_ocr = pages_awaiting_ocr, "ingest pass finished");
    Ok(())
}

/// Segment one page's text, embed what is new, and reconcile the stored
/// segment set in a single transaction. Returns the number of segments
/// inserted.
///
/// Per-page work is single-writer: one invocation owns the whole
/// delete-stale/insert-new pass for its page. Concurrent invocations for
/// the *same* page converge because inserts are keyed by content hash.
pub(crate) async fn index_page(
    pool: &SqlitePool,
    seg_cfg: &SegmentingConfig,
    emb_cfg: &EmbeddingConfig,
    page_id: &str,
    text: &str,
) -> Result<usize> {
    let drafts = segment_unique(text, seg_cfg);

    let existing = index::existing_hashes(pool, page_id).await?;
    let new_drafts: Vec<&SegmentDraft> = drafts
        .iter()
        .filter(|d| !existing.contains(&d.hash))
        .collect();

    // Embed only what the store does not already hold; an unchanged page
    // costs zero gateway calls.
    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(new_drafts.len());
    for batch in new_drafts.chunks(emb_cfg.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        let vectors = embedding::embed_texts(emb_cfg, &texts).await?;
        embeddings.extend(vectors);
    }

    let mut tx = pool.begin().await?;

    let valid_hashes: Vec<&str> = drafts.iter().map(|d| d.hash.as_str()).collect();
    index::delete_stale_segments(&mut tx, page_id, &valid_hashes).await?;

    let version = seg_cfg.version();
    for (draft, vector) in new_drafts.iter().zip(embeddings.iter()) {
        let blob = embedding::vec_to_blob(vector);
        index::upsert_segment(&mut tx, page_id, draft, &version, &blob).await?;
    }

    archive::set_page_status_tx(&mut tx, page_id, PageStatus::Indexed).await?;

    tx.commit().await?;
    Ok(new_drafts.len())
}

/// Segment a page and drop windows whose hash repeats (pathologically
/// repetitive OCR text); the (page, hash) key admits one row per hash.
fn segment_unique(text: &str, seg_cfg: &SegmentingConfig) -> Vec<SegmentDraft> {
    let mut seen = HashSet::new();
    segment::segment_text(text, seg_cfg.window_chars, seg_cfg.overlap_chars)
        .into_iter()
        .filter(|d| seen.insert(d.hash.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentingConfig;

    #[test]
    fn test_segment_unique_drops_repeated_hashes() {
        let cfg = SegmentingConfig {
            window_chars: 10,
            overlap_chars: 5,
        };
        // Highly repetitive text: many windows normalize to the same bytes.
        let text = "ab".repeat(30);
        let drafts = segment_unique(&text, &cfg);
        let hashes: HashSet<&str> = drafts.iter().map(|d| d.hash.as_str()).collect();
        assert_eq!(hashes.len(), drafts.len());
    }

    #[test]
    fn test_segment_unique_preserves_order_and_content() {
        let cfg = SegmentingConfig {
            window_chars: 800,
            overlap_chars: 100,
        };
        let text = "A".repeat(900);
        let drafts = segment_unique(&text, &cfg);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].index, 0);
        assert_eq!(drafts[1].index, 1);
    }
}
