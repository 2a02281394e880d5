use anyhow::Result;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbedError};
use crate::error::ArchiveError;
use crate::index::{ExactScanIndex, SegmentMatch, VectorIndex};
use crate::models::SearchHit;

/// Search the archive, returning one hit per matching page.
///
/// The query is embedded through the gateway; a gateway outage fails
/// closed with [`ArchiveError::RetrievalUnavailable`] rather than
/// returning an empty result set that reads as "no matches". Segment
/// matches are over-fetched beyond `top_k`, collapsed to their owning
/// pages with max-score aggregation, joined with display metadata from the
/// canonical side, and truncated to `top_k`.
pub async fn search_pages(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    top_k: i64,
) -> Result<Vec<SearchHit>> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ArchiveError::InvalidQuery("query text is empty".to_string()).into());
    }
    if top_k < 1 {
        return Err(ArchiveError::InvalidQuery("result limit must be >= 1".to_string()).into());
    }

    let query_vec = match embedding::embed_query(&config.embedding, trimmed).await {
        Ok(vec) => vec,
        Err(EmbedError::Fatal(msg)) => {
            return Err(ArchiveError::InvalidQuery(msg).into());
        }
        Err(e) => {
            return Err(ArchiveError::RetrievalUnavailable(e.to_string()).into());
        }
    };

    // Over-fetch so that several segments of the same page still leave
    // enough distinct pages after collapsing.
    let candidate_k = top_k.saturating_mul(config.retrieval.overfetch_factor.max(1));

    let index = ExactScanIndex;
    let matches = index.nearest_neighbors(pool, &query_vec, candidate_k).await?;

    let collapsed = collapse_matches(matches, top_k as usize, config.retrieval.snippet_chars);

    let mut hits = Vec::with_capacity(collapsed.len());
    for page_best in collapsed {
        let row = sqlx::query(
            r#"
            SELECT p.page_number, i.issue_date, n.name
            FROM pages p
            JOIN issues i ON i.id = p.issue_id
            JOIN newspapers n ON n.id = i.newspaper_id
            WHERE p.id = ?
            "#,
        )
        .bind(&page_best.page_id)
        .fetch_optional(pool)
        .await?;

        // A page removed from the canonical store after indexing simply
        // drops out of the results; its segments vanish on the next pass.
        if let Some(row) = row {
            let date_str: String = row.get("issue_date");
            let issue_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("invalid issue_date '{}': {}", date_str, e))?;

            hits.push(SearchHit {
                page_id: page_best.page_id,
                newspaper: row.get("name"),
                issue_date,
                page_number: row.get("page_number"),
                snippet: page_best.snippet,
                score: page_best.score,
            });
        }
    }

    Ok(hits)
}

/// CLI entry: run a search and print the hits.
pub async fn run_search(config: &Config, query: &str, limit: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let top_k = limit.unwrap_or(config.retrieval.final_limit);

    let hits = search_pages(&pool, config, query, top_k).await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} — {}, page {}",
            i + 1,
            hit.score,
            hit.newspaper,
            hit.issue_date.format("%Y-%m-%d"),
            hit.page_number
        );
        println!("    excerpt: \"{}\"", hit.snippet);
        println!("    page id: {}", hit.page_id);
        println!();
    }

    pool.close().await;
    Ok(())
}

/// Best match for one page after collapsing its segment hits.
#[derive(Debug, Clone)]
pub(crate) struct PageBest {
    pub page_id: String,
    pub score: f64,
    pub snippet: String,
}

/// Group segment matches by owning page, keeping each page's maximum
/// score and the snippet of its best-scoring segment. Ordered by
/// descending score with page id as the deterministic tie-break.
pub(crate) fn collapse_matches(
    matches: Vec<SegmentMatch>,
    top_k: usize,
    snippet_chars: usize,
) -> Vec<PageBest> {
    let mut by_page: HashMap<String, PageBest> = HashMap::new();

    for m in matches {
        match by_page.get_mut(&m.page_id) {
            Some(best) => {
                if m.score > best.score {
                    best.score = m.score;
                    best.snippet = make_snippet(&m.text, snippet_chars);
                }
            }
            None => {
                by_page.insert(
                    m.page_id.clone(),
                    PageBest {
                        snippet: make_snippet(&m.text, snippet_chars),
                        page_id: m.page_id,
                        score: m.score,
                    },
                );
            }
        }
    }

    let mut collapsed: Vec<PageBest> = by_page.into_values().collect();
    collapsed.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.page_id.cmp(&b.page_id))
    });
    collapsed.truncate(top_k);
    collapsed
}

/// Whitespace-flattened prefix of the segment text, cut on a char boundary.
pub(crate) fn make_snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(page_id: &str, score: f64, text: &str) -> SegmentMatch {
        SegmentMatch {
            page_id: page_id.to_string(),
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn test_collapse_keeps_max_score_per_page() {
        let matches = vec![
            seg("p1", 0.4, "low match"),
            seg("p1", 0.9, "high match"),
            seg("p2", 0.7, "other page"),
        ];
        let collapsed = collapse_matches(matches, 10, 240);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].page_id, "p1");
        assert!((collapsed[0].score - 0.9).abs() < 1e-9);
        assert_eq!(collapsed[0].snippet, "high match");
        assert_eq!(collapsed[1].page_id, "p2");
    }

    #[test]
    fn test_collapse_one_hit_per_page() {
        let matches = vec![
            seg("p1", 0.8, "a"),
            seg("p1", 0.7, "b"),
            seg("p1", 0.6, "c"),
        ];
        let collapsed = collapse_matches(matches, 10, 240);
        assert_eq!(collapsed.len(), 1);
    }

    #[test]
    fn test_collapse_truncates_to_top_k() {
        let matches = vec![
            seg("p1", 0.9, "a"),
            seg("p2", 0.8, "b"),
            seg("p3", 0.7, "c"),
        ];
        let collapsed = collapse_matches(matches, 2, 240);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].page_id, "p1");
        assert_eq!(collapsed[1].page_id, "p2");
    }

    #[test]
    fn test_collapse_tie_break_is_deterministic() {
        let matches = vec![seg("pb", 0.5, "b"), seg("pa", 0.5, "a")];
        let collapsed = collapse_matches(matches, 10, 240);
        assert_eq!(collapsed[0].page_id, "pa");
        assert_eq!(collapsed[1].page_id, "pb");
    }

    #[test]
    fn test_snippet_flattens_whitespace_and_truncates() {
        let snippet = make_snippet("council\n\nmeeting   adjourned", 15);
        assert_eq!(snippet, "council meeting");
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let snippet = make_snippet(&"é".repeat(10), 4);
        assert_eq!(snippet.chars().count(), 4);
    }
}
