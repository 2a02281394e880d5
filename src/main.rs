//! # Press Archive CLI (`press`)
//!
//! The `press` binary is the interface to the archive. It provides commands
//! for database initialization, seeding canonical records, recording OCR
//! output, running idempotent ingestion jobs, semantic search, and index
//! rebuilds.
//!
//! ## Usage
//!
//! ```bash
//! press --config ./config/press.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `press init` | Create the SQLite database and run schema migrations |
//! | `press paper add` | Create a newspaper (get-or-create by name) |
//! | `press issue add` | Create a dated issue of a newspaper |
//! | `press page add` | Register a page of an issue |
//! | `press page ocr` | Record OCR text for a page |
//! | `press ingest` | Run an idempotent ingestion job for an issue |
//! | `press job <key>` | Show a job's status and progress |
//! | `press cancel <key>` | Request cancellation of a job |
//! | `press search "<query>"` | Page-centric semantic search |
//! | `press rebuild` | Drop and regenerate the segment index |

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use press_archive::models::IngestJob;
use press_archive::{archive, config, db, index, ingest, jobs, migrate, rebuild, search};

/// Press Archive CLI — a searchable semantic archive for scanned, OCR'd
/// newspaper pages.
#[derive(Parser)]
#[command(
    name = "press",
    about = "Press Archive — a searchable semantic archive for scanned, OCR'd newspaper pages",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/press.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage newspapers.
    Paper {
        #[command(subcommand)]
        action: PaperAction,
    },

    /// Manage issues.
    Issue {
        #[command(subcommand)]
        action: IssueAction,
    },

    /// Manage pages and their OCR output.
    Page {
        #[command(subcommand)]
        action: PageAction,
    },

    /// Run an ingestion job for an issue.
    ///
    /// Resubmitting the same idempotency key returns the existing job
    /// without duplicating work; a key already bound to a different issue
    /// is rejected.
    Ingest {
        /// Issue id to ingest.
        #[arg(long)]
        issue: String,

        /// Caller-supplied idempotency key.
        #[arg(long)]
        key: String,
    },

    /// Show the status and progress of an ingestion job.
    Job {
        /// Idempotency key of the job.
        key: String,
    },

    /// Request cancellation of a running job.
    ///
    /// In-flight pages finish; no new pages are started.
    Cancel {
        /// Idempotency key of the job.
        key: String,
    },

    /// Semantic search over indexed pages.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of page hits to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Drop the segment index and rebuild it from stored OCR text.
    Rebuild,
}

#[derive(Subcommand)]
enum PaperAction {
    /// Create a newspaper, or return the existing one with this name.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
    },
}

#[derive(Subcommand)]
enum IssueAction {
    /// Create an issue, or return the existing one for this date.
    Add {
        /// Newspaper id.
        #[arg(long)]
        paper: String,
        /// Issue date (YYYY-MM-DD).
        #[arg(long)]
        date: String,
    },
}

#[derive(Subcommand)]
enum PageAction {
    /// Register a page, or return the existing one with this number.
    Add {
        /// Issue id.
        #[arg(long)]
        issue: String,
        /// Page number within the issue.
        #[arg(long)]
        number: i64,
        /// Path of the scanned page image in object storage.
        #[arg(long)]
        image: Option<String>,
    },

    /// Set a page's ingestion status directly.
    ///
    /// Used by the OCR flow to record `ocr_pending` and `ocr_failed`
    /// outcomes; successful OCR goes through `page ocr` instead.
    Status {
        /// Issue id.
        #[arg(long)]
        issue: String,
        /// Page number within the issue.
        #[arg(long)]
        number: i64,
        /// One of: pending, ocr_pending, ocr_completed, ocr_failed, indexed.
        #[arg(long)]
        status: String,
    },

    /// Record OCR output for a page and mark it ready for indexing.
    Ocr {
        /// Issue id.
        #[arg(long)]
        issue: String,
        /// Page number within the issue.
        #[arg(long)]
        number: i64,
        /// File containing the OCR text.
        #[arg(long)]
        text_file: PathBuf,
        /// OCR confidence score in [0, 1].
        #[arg(long)]
        confidence: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Paper { action } => match action {
            PaperAction::Add {
                name,
                city,
                country,
            } => {
                let pool = db::connect(&cfg).await?;
                let paper =
                    archive::create_newspaper(&pool, &name, city.as_deref(), country.as_deref())
                        .await?;
                println!("paper: {}", paper.name);
                println!("id: {}", paper.id);
                pool.close().await;
            }
        },
        Commands::Issue { action } => match action {
            IssueAction::Add { paper, date } => {
                let issue_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")?;
                let pool = db::connect(&cfg).await?;
                if archive::get_newspaper(&pool, &paper).await?.is_none() {
                    anyhow::bail!("No newspaper with id '{}'", paper);
                }
                let issue = archive::create_issue(&pool, &paper, issue_date).await?;
                println!("issue: {}", issue.issue_date.format("%Y-%m-%d"));
                println!("id: {}", issue.id);
                pool.close().await;
            }
        },
        Commands::Page { action } => match action {
            PageAction::Add {
                issue,
                number,
                image,
            } => {
                let pool = db::connect(&cfg).await?;
                if archive::get_issue(&pool, &issue).await?.is_none() {
                    anyhow::bail!("No issue with id '{}'", issue);
                }
                let page = archive::create_page(&pool, &issue, number, image.as_deref()).await?;
                println!("page: {}", page.page_number);
                println!("id: {}", page.id);
                pool.close().await;
            }
            PageAction::Status {
                issue,
                number,
                status,
            } => {
                let parsed = press_archive::models::PageStatus::parse(&status)
                    .ok_or_else(|| anyhow::anyhow!("Unknown page status '{}'", status))?;
                let pool = db::connect(&cfg).await?;
                let page = archive::get_page_by_number(&pool, &issue, number)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!("No page {} in issue '{}'", number, issue)
                    })?;
                archive::set_page_status(&pool, &page.id, parsed).await?;
                println!("page {} status: {}", number, parsed.as_str());
                pool.close().await;
            }
            PageAction::Ocr {
                issue,
                number,
                text_file,
                confidence,
            } => {
                let text = std::fs::read_to_string(&text_file)?;
                let pool = db::connect(&cfg).await?;
                let page = archive::get_page_by_number(&pool, &issue, number)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!("No page {} in issue '{}'", number, issue)
                    })?;
                archive::update_ocr(&pool, &page.id, &text, confidence).await?;
                println!("ocr recorded for page {} ({} chars)", number, text.chars().count());
                pool.close().await;
            }
        },
        Commands::Ingest { issue, key } => {
            let pool = db::connect(&cfg).await?;
            let job = ingest::run_ingest(&cfg, &pool, &key, &issue).await?;
            print_job(&job);
            let segments = index::count_segments(&pool).await?;
            println!("  segments total: {}", segments);
            pool.close().await;
        }
        Commands::Job { key } => {
            let pool = db::connect(&cfg).await?;
            match jobs::get_job(&pool, &key).await? {
                Some(job) => print_job(&job),
                None => anyhow::bail!("No job with idempotency key '{}'", key),
            }
            pool.close().await;
        }
        Commands::Cancel { key } => {
            let pool = db::connect(&cfg).await?;
            if jobs::request_cancel(&pool, &key).await? {
                println!("cancellation requested for job '{}'", key);
            } else {
                anyhow::bail!("No cancellable job with idempotency key '{}'", key);
            }
            pool.close().await;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Rebuild => {
            rebuild::run_rebuild(&cfg).await?;
        }
    }

    Ok(())
}

fn print_job(job: &IngestJob) {
    println!("job {}", job.idempotency_key);
    println!("  status: {}", job.status.as_str());
    println!("  stage: {}", job.progress.current_stage);
    println!(
        "  pages: {} total, {} processed, {} succeeded, {} failed",
        job.progress.pages_total,
        job.progress.pages_processed,
        job.progress.pages_succeeded,
        job.progress.pages_failed
    );
    if let Some(ref message) = job.error_message {
        println!("  error: {}", message);
    }
    for entry in &job.progress.errors {
        println!("    - [{}] {}", entry.page_ref, entry.message);
    }
}
