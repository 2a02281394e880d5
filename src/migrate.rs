use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Browse (canonical) tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS newspapers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            city TEXT,
            country TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(name)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issues (
            id TEXT PRIMARY KEY,
            newspaper_id TEXT NOT NULL,
            issue_date TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(newspaper_id, issue_date),
            FOREIGN KEY (newspaper_id) REFERENCES newspapers(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id TEXT PRIMARY KEY,
            issue_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            image_path TEXT,
            ocr_text TEXT,
            ocr_confidence REAL,
            ingestion_status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(issue_id, page_number),
            FOREIGN KEY (issue_id) REFERENCES issues(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Retrieval (derived) tables. Segments carry no cascade from pages:
    // the orchestrator reconciles them explicitly so the browse/retrieval
    // boundary stays portable across storage backends.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            id TEXT PRIMARY KEY,
            page_id TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            segment_text TEXT NOT NULL,
            segment_hash TEXT NOT NULL,
            segmenter_version TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(page_id, segment_hash)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Jobs keep a nullable issue reference so the record outlives the issue.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_jobs (
            id TEXT PRIMARY KEY,
            idempotency_key TEXT NOT NULL,
            issue_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            pages_total INTEGER NOT NULL DEFAULT 0,
            pages_processed INTEGER NOT NULL DEFAULT 0,
            pages_succeeded INTEGER NOT NULL DEFAULT 0,
            pages_failed INTEGER NOT NULL DEFAULT 0,
            current_stage TEXT NOT NULL DEFAULT 'initializing',
            errors TEXT NOT NULL DEFAULT '[]',
            error_message TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(idempotency_key)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_newspaper ON issues(newspaper_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_issue ON pages(issue_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(ingestion_status)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_page ON segments(page_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON ingest_jobs(status)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
