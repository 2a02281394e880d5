//! Core data models used throughout the archive.
//!
//! The browse side (newspapers, issues, pages) is canonical state; the
//! retrieval side (segments, ingest jobs) is derived and rebuildable.
//! Segments are internal to the index and never appear in API-facing types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ingestion lifecycle of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Pending,
    OcrPending,
    OcrCompleted,
    OcrFailed,
    Indexed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::OcrPending => "ocr_pending",
            PageStatus::OcrCompleted => "ocr_completed",
            PageStatus::OcrFailed => "ocr_failed",
            PageStatus::Indexed => "indexed",
        }
    }

    pub fn parse(s: &str) -> Option<PageStatus> {
        match s {
            "pending" => Some(PageStatus::Pending),
            "ocr_pending" => Some(PageStatus::OcrPending),
            "ocr_completed" => Some(PageStatus::OcrCompleted),
            "ocr_failed" => Some(PageStatus::OcrFailed),
            "indexed" => Some(PageStatus::Indexed),
            _ => None,
        }
    }
}

/// Lifecycle of an ingest job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Stage a processing job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Initializing,
    ProcessingPages,
    AwaitingOcr,
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Initializing => "initializing",
            JobStage::ProcessingPages => "processing_pages",
            JobStage::AwaitingOcr => "awaiting_ocr",
            JobStage::Done => "done",
        }
    }
}

/// A newspaper publication.
#[derive(Debug, Clone)]
pub struct Newspaper {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub created_at: i64,
}

/// A dated issue of a newspaper. Unique on (newspaper, issue_date).
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: String,
    pub newspaper_id: String,
    pub issue_date: NaiveDate,
    pub created_at: i64,
}

/// A single scanned page with its OCR output.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: String,
    pub issue_id: String,
    pub page_number: i64,
    pub image_path: Option<String>,
    pub ocr_text: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub ingestion_status: PageStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One error recorded against a job, ordered by occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub page_ref: String,
    pub message: String,
    pub timestamp: i64,
}

/// Fixed, strongly-typed progress record for an ingest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub pages_total: i64,
    pub pages_processed: i64,
    pub pages_succeeded: i64,
    pub pages_failed: i64,
    pub current_stage: String,
    pub errors: Vec<JobErrorEntry>,
}

/// A job tracking ingestion of one issue, keyed by idempotency key.
///
/// The issue reference is nullable so the job record survives issue
/// deletion; jobs are never deleted by normal operation.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub id: String,
    pub idempotency_key: String,
    pub issue_id: Option<String>,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A page-centric search result.
///
/// Exposes page identity, display metadata, a snippet, and a score —
/// never segment identifiers.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub page_id: String,
    pub newspaper: String,
    pub issue_date: NaiveDate,
    pub page_number: i64,
    pub snippet: String,
    pub score: f64,
}
