//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Client usage errors ([`ArchiveError::IdempotencyKeyReuse`],
//! [`ArchiveError::InvalidQuery`]) are rejected synchronously and never enter
//! the job pipeline. Gateway outages surface as
//! [`ArchiveError::RetrievalUnavailable`] so a search failure is never
//! mistaken for an empty result set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The embedding gateway could not be reached, or exhausted its retries.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// An idempotency key was re-submitted against a different issue.
    #[error("idempotency key '{key}' is already bound to issue {existing}")]
    IdempotencyKeyReuse { key: String, existing: String },

    /// The issue referenced by a job no longer exists. Job-level fatal.
    #[error("issue {0} not found")]
    IssueNotFound(String),

    /// A concurrent writer changed a segment row incompatibly. Should not
    /// occur under single-writer-per-page discipline.
    #[error("conflicting segment write on page {page_id}")]
    SegmentConflict { page_id: String },

    /// The job was cancelled before all pages were processed.
    #[error("job cancelled before completion")]
    Cancelled,

    /// Malformed search input, rejected before any gateway call.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
