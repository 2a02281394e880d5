//! Canonical-store access: newspapers, issues, and pages.
//!
//! This is the browse side of the data boundary. The retrieval layer reads
//! pages from here and writes page status transitions back, but nothing in
//! this module depends on segments or jobs — dropping the whole retrieval
//! index leaves these tables untouched.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Issue, Newspaper, Page, PageStatus};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create a newspaper, or return the existing one with the same name.
pub async fn create_newspaper(
    pool: &SqlitePool,
    name: &str,
    city: Option<&str>,
    country: Option<&str>,
) -> Result<Newspaper> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO newspapers (id, name, city, country, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(city)
    .bind(country)
    .bind(now())
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM newspapers WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(newspaper_from_row(&row))
}

pub async fn get_newspaper(pool: &SqlitePool, id: &str) -> Result<Option<Newspaper>> {
    let row = sqlx::query("SELECT * FROM newspapers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| newspaper_from_row(&r)))
}

/// Create an issue, or return the existing one for (newspaper, date).
pub async fn create_issue(
    pool: &SqlitePool,
    newspaper_id: &str,
    issue_date: NaiveDate,
) -> Result<Issue> {
    let id = Uuid::new_v4().to_string();
    let date_str = issue_date.format("%Y-%m-%d").to_string();

    sqlx::query(
        r#"
        INSERT INTO issues (id, newspaper_id, issue_date, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(newspaper_id, issue_date) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(newspaper_id)
    .bind(&date_str)
    .bind(now())
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM issues WHERE newspaper_id = ? AND issue_date = ?")
        .bind(newspaper_id)
        .bind(&date_str)
        .fetch_one(pool)
        .await?;
    issue_from_row(&row)
}

pub async fn get_issue(pool: &SqlitePool, id: &str) -> Result<Option<Issue>> {
    let row = sqlx::query("SELECT * FROM issues WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| issue_from_row(&r)).transpose()
}

/// Create a page, or return the existing one for (issue, page_number).
///
/// The (issue_id, page_number) unique constraint makes repeated imports of
/// the same page idempotent.
pub async fn create_page(
    pool: &SqlitePool,
    issue_id: &str,
    page_number: i64,
    image_path: Option<&str>,
) -> Result<Page> {
    let id = Uuid::new_v4().to_string();
    let ts = now();

    sqlx::query(
        r#"
        INSERT INTO pages (id, issue_id, page_number, image_path, ingestion_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(issue_id, page_number) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(issue_id)
    .bind(page_number)
    .bind(image_path)
    .bind(ts)
    .bind(ts)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM pages WHERE issue_id = ? AND page_number = ?")
        .bind(issue_id)
        .bind(page_number)
        .fetch_one(pool)
        .await?;
    page_from_row(&row)
}

pub async fn get_page_by_number(
    pool: &SqlitePool,
    issue_id: &str,
    page_number: i64,
) -> Result<Option<Page>> {
    let row = sqlx::query("SELECT * FROM pages WHERE issue_id = ? AND page_number = ?")
        .bind(issue_id)
        .bind(page_number)
        .fetch_optional(pool)
        .await?;
    row.map(|r| page_from_row(&r)).transpose()
}

/// Store OCR output on a page and mark it `ocr_completed`.
pub async fn update_ocr(
    pool: &SqlitePool,
    page_id: &str,
    ocr_text: &str,
    ocr_confidence: Option<f64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pages
        SET ocr_text = ?, ocr_confidence = ?, ingestion_status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(ocr_text)
    .bind(ocr_confidence)
    .bind(PageStatus::OcrCompleted.as_str())
    .bind(now())
    .bind(page_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition a page's ingestion status. Used by the upstream OCR flow to
/// record `ocr_pending` and `ocr_failed` outcomes.
pub async fn set_page_status(pool: &SqlitePool, page_id: &str, status: PageStatus) -> Result<()> {
    sqlx::query("UPDATE pages SET ingestion_status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now())
        .bind(page_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Send every indexed page back to `ocr_completed` so an index rebuild
/// re-derives its segments from the stored OCR text.
pub async fn reset_indexed_pages(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE pages SET ingestion_status = ?, updated_at = ? WHERE ingestion_status = ?",
    )
    .bind(PageStatus::OcrCompleted.as_str())
    .bind(now())
    .bind(PageStatus::Indexed.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Transition a page's ingestion status inside an open transaction, so a
/// page flips to `indexed` atomically with its segment reconciliation.
pub(crate) async fn set_page_status_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    page_id: &str,
    status: PageStatus,
) -> Result<()> {
    sqlx::query("UPDATE pages SET ingestion_status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now())
        .bind(page_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// All pages of an issue, ordered by page number.
pub async fn list_pages(pool: &SqlitePool, issue_id: &str) -> Result<Vec<Page>> {
    let rows = sqlx::query("SELECT * FROM pages WHERE issue_id = ? ORDER BY page_number ASC")
        .bind(issue_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(page_from_row).collect()
}

/// Pages in a given status across all issues.
pub async fn list_pages_by_status(pool: &SqlitePool, status: PageStatus) -> Result<Vec<Page>> {
    let rows = sqlx::query(
        "SELECT * FROM pages WHERE ingestion_status = ? ORDER BY issue_id, page_number",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(page_from_row).collect()
}

fn newspaper_from_row(row: &SqliteRow) -> Newspaper {
    Newspaper {
        id: row.get("id"),
        name: row.get("name"),
        city: row.get("city"),
        country: row.get("country"),
        created_at: row.get("created_at"),
    }
}

fn issue_from_row(row: &SqliteRow) -> Result<Issue> {
    let date_str: String = row.get("issue_date");
    let issue_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid issue_date '{}': {}", date_str, e))?;
    Ok(Issue {
        id: row.get("id"),
        newspaper_id: row.get("newspaper_id"),
        issue_date,
        created_at: row.get("created_at"),
    })
}

pub(crate) fn page_from_row(row: &SqliteRow) -> Result<Page> {
    let status_str: String = row.get("ingestion_status");
    let ingestion_status = PageStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown page status '{}'", status_str))?;
    Ok(Page {
        id: row.get("id"),
        issue_id: row.get("issue_id"),
        page_number: row.get("page_number"),
        image_path: row.get("image_path"),
        ocr_text: row.get("ocr_text"),
        ocr_confidence: row.get("ocr_confidence"),
        ingestion_status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
