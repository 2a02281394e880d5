//! # Press Archive
//!
//! A searchable semantic archive for scanned, OCR'd newspaper pages.
//!
//! Press Archive turns a page's OCR text into deterministic, content-hashed
//! text segments with vector embeddings, tracks ingestion with idempotent
//! jobs, and serves page-centric semantic search over the resulting index.
//! Canonical browse data (newspapers, issues, pages) is kept strictly
//! separate from the derived retrieval index, which can be dropped and
//! rebuilt at any time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────┐
//! │ Browse store │──▶│  Ingest jobs   │──▶│  SQLite    │
//! │ papers/pages │   │ Segment+Embed │   │ segments  │
//! └──────────────┘   └───────────────┘   └─────┬─────┘
//!                                              │
//!                                        ┌─────▼─────┐
//!                                        │  Search   │
//!                                        │ (press)   │
//!                                        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! press init                                  # create database
//! press paper add --name "The Daily Sun"
//! press issue add --paper <id> --date 1903-05-14
//! press page add --issue <id> --number 1
//! press page ocr --issue <id> --number 1 --text-file page1.txt
//! press ingest --issue <id> --key upload-42   # idempotent
//! press search "harbour bridge opening"
//! press rebuild                               # regenerate the index
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`archive`] | Canonical newspapers/issues/pages |
//! | [`segment`] | Deterministic page segmentation |
//! | [`embedding`] | Embedding gateway abstraction |
//! | [`index`] | Segment store and vector search |
//! | [`jobs`] | Idempotent ingest job tracking |
//! | [`ingest`] | Ingestion orchestration |
//! | [`search`] | Page-centric semantic search |
//! | [`rebuild`] | Index drop-and-regenerate |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod rebuild;
pub mod search;
pub mod segment;
