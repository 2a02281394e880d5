//! Drop and regenerate the retrieval index.
//!
//! Segments are wholly derived from canonical pages, so the whole table
//! can be cleared and rebuilt from the stored OCR text. Used when the
//! segmentation policy or embedding model changes.

use anyhow::Result;

use crate::archive;
use crate::config::Config;
use crate::db;
use crate::index;
use crate::ingest;
use crate::models::PageStatus;

pub async fn run_rebuild(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let dropped = index::drop_all_segments(&pool).await?;
    println!("rebuild — cleared existing segments");

    // Indexed pages fall back to ocr_completed so the per-page step
    // re-indexes them from their stored OCR text.
    archive::reset_indexed_pages(&pool).await?;

    let pages = archive::list_pages_by_status(&pool, PageStatus::OcrCompleted).await?;

    let mut reindexed = 0u64;
    let mut failed = 0u64;
    let mut segments_written = 0u64;

    for page in &pages {
        let Some(text) = page.ocr_text.as_deref() else {
            continue;
        };
        match ingest::index_page(&pool, &config.segmenting, &config.embedding, &page.id, text).await
        {
            Ok(written) => {
                reindexed += 1;
                segments_written += written as u64;
            }
            Err(e) => {
                eprintln!("Warning: failed to reindex page {}: {:#}", page.id, e);
                failed += 1;
            }
        }
    }

    println!("rebuild");
    println!("  segments dropped: {}", dropped);
    println!("  pages reindexed: {}", reindexed);
    println!("  segments written: {}", segments_written);
    if failed > 0 {
        println!("  pages failed: {}", failed);
    }

    pool.close().await;
    Ok(())
}
