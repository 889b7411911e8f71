//! Keyword, semantic, and hybrid search over indexed documents.
//!
//! Keyword search runs through the FTS5 index; semantic search embeds
//! the query and ranks stored vectors by cosine similarity; hybrid
//! blends both channels with the configured alpha after min-max
//! normalizing each side. Chunk scores are grouped per document so
//! results come back one document at a time.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::SearchResult;

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    datasource: Option<String>,
    since: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    match mode {
        "keyword" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            mode
        ),
    }

    if (mode == "semantic" || mode == "hybrid") && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set embedding.provider in config.",
            mode
        );
    }

    let pool = db::connect(config).await?;
    let final_limit = limit.unwrap_or(config.retrieval.final_limit);

    let keyword_candidates = if mode == "keyword" || mode == "hybrid" {
        fetch_keyword_candidates(&pool, query, config.retrieval.candidate_k_keyword).await?
    } else {
        Vec::new()
    };

    let vector_candidates = if mode == "semantic" || mode == "hybrid" {
        fetch_vector_candidates(&pool, config, query, config.retrieval.candidate_k_vector).await?
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let effective_alpha = match mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => config.retrieval.hybrid_alpha,
    };

    let doc_scores = score_and_group(
        &keyword_candidates,
        &vector_candidates,
        effective_alpha,
        config.retrieval.max_chunks_per_doc,
    );

    let since_ts = match &since {
        Some(s) => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
            Some(
                date.and_hms_opt(0, 0, 0)
                    .unwrap_or_default()
                    .and_utc()
                    .timestamp(),
            )
        }
        None => None,
    };

    let mut results: Vec<SearchResult> = Vec::new();

    for doc_score in &doc_scores {
        let doc_row = sqlx::query(
            "SELECT id, title, source, source_id, updated_at, source_url FROM documents WHERE id = ?",
        )
        .bind(&doc_score.document_id)
        .fetch_optional(&pool)
        .await?;

        if let Some(row) = doc_row {
            let source: String = row.get("source");
            let updated_at: i64 = row.get("updated_at");

            if let Some(ref wanted) = datasource {
                if &source != wanted {
                    continue;
                }
            }
            if let Some(ts) = since_ts {
                if updated_at < ts {
                    continue;
                }
            }

            results.push(SearchResult {
                id: row.get("id"),
                title: row.get("title"),
                source,
                source_id: row.get("source_id"),
                updated_at,
                score: doc_score.score,
                snippet: doc_score.snippet.clone(),
                source_url: row.get("source_url"),
            });
        }
    }

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    // Deterministic order: score desc, updated_at desc, id asc
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
    });

    results.truncate(final_limit.max(0) as usize);

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        let date = chrono::DateTime::from_timestamp(result.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.source,
            title_display
        );
        println!("    updated: {}", date);
        println!("    datasource: {} ({})", result.source, result.source_id);
        if let Some(ref url) = result.source_url {
            println!("    url: {}", url);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    pool.close().await;
    Ok(())
}

// ============ Candidate types ============

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    snippet: String,
}

struct DocScore {
    document_id: String,
    score: f64,
    snippet: String,
}

// ============ Keyword search ============

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT chunk_id, document_id, rank,
               snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
        FROM chunks_fts
        WHERE chunks_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    let candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: -rank, // FTS5 rank is ascending-better, negate
                snippet: row.get("snippet"),
            }
        })
        .collect();

    Ok(candidates)
}

// ============ Vector search ============

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    // Vectors are scanned in Rust; corpus sizes here stay small enough
    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding,
               COALESCE(substr(c.text, 1, 240), '') AS snippet
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(&query_vec, &vec) as f64;
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: similarity,
                snippet: row.get("snippet"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k.max(0) as usize);

    Ok(candidates)
}

// ============ Scoring ============

/// Min-max normalize raw scores to [0, 1] per channel.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Blend both channels and group chunk scores per document.
///
/// Each chunk's hybrid score is `(1 - alpha) * keyword + alpha * vector`
/// over normalized channel scores. A document's score is the mean of its
/// top `max_chunks_per_doc` chunk scores, and its snippet comes from the
/// best chunk.
fn score_and_group(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
    max_chunks_per_doc: usize,
) -> Vec<DocScore> {
    let norm_keyword = normalize_scores(keyword);
    let norm_vector = normalize_scores(vector);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    let mut all_chunks: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword.iter().chain(vector.iter()) {
        all_chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    struct ScoredChunk<'a> {
        candidate: &'a ChunkCandidate,
        hybrid: f64,
    }

    let mut scored: Vec<ScoredChunk> = all_chunks
        .values()
        .map(|&candidate| {
            let k = kw_map
                .get(candidate.chunk_id.as_str())
                .copied()
                .unwrap_or(0.0);
            let v = vec_map
                .get(candidate.chunk_id.as_str())
                .copied()
                .unwrap_or(0.0);
            ScoredChunk {
                candidate,
                hybrid: (1.0 - alpha) * k + alpha * v,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.hybrid
            .partial_cmp(&a.hybrid)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate.chunk_id.cmp(&b.candidate.chunk_id))
    });

    // Processed best-first, so the first chunk seen per document also
    // provides the snippet
    struct DocAccum {
        contributions: Vec<f64>,
        snippet: String,
    }

    let cap = max_chunks_per_doc.max(1);
    let mut doc_map: HashMap<&str, DocAccum> = HashMap::new();
    let mut doc_order: Vec<&str> = Vec::new();

    for sc in &scored {
        let doc_id = sc.candidate.document_id.as_str();
        let entry = doc_map.entry(doc_id).or_insert_with(|| {
            doc_order.push(doc_id);
            DocAccum {
                contributions: Vec::new(),
                snippet: sc.candidate.snippet.clone(),
            }
        });
        if entry.contributions.len() < cap {
            entry.contributions.push(sc.hybrid);
        }
    }

    let mut doc_scores: Vec<DocScore> = doc_order
        .into_iter()
        .map(|doc_id| {
            let accum = &doc_map[doc_id];
            let score =
                accum.contributions.iter().sum::<f64>() / accum.contributions.len() as f64;
            DocScore {
                document_id: doc_id.to_string(),
                score,
                snippet: accum.snippet.clone(),
            }
        })
        .collect();

    doc_scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });

    doc_scores
}

// ─── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(chunk_id: &str, doc_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: doc_id.to_string(),
            raw_score: score,
            snippet: format!("snippet-{}", chunk_id),
        }
    }

    #[test]
    fn normalize_empty_and_single() {
        assert!(normalize_scores(&[]).is_empty());

        let single = vec![candidate("c1", "d1", 5.0)];
        let result = normalize_scores(&single);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_spreads_to_unit_range() {
        let candidates = vec![
            candidate("c1", "d1", 10.0),
            candidate("c2", "d2", 5.0),
            candidate("c3", "d3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!(result[2].1.abs() < 1e-9);
    }

    #[test]
    fn normalize_equal_scores_all_one() {
        let candidates = vec![candidate("c1", "d1", 3.0), candidate("c2", "d2", 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn normalized_scores_stay_in_unit_interval() {
        let candidates = vec![
            candidate("c1", "d1", -5.0),
            candidate("c2", "d2", 100.0),
            candidate("c3", "d3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
    }

    #[test]
    fn alpha_zero_follows_keyword_ordering() {
        let kw = vec![
            candidate("c1", "d1", 10.0),
            candidate("c2", "d2", 5.0),
            candidate("c3", "d3", 1.0),
        ];
        let vectors = vec![candidate("c1", "d1", 0.1), candidate("c2", "d2", 0.9)];

        let docs = score_and_group(&kw, &vectors, 0.0, 1);
        let order: Vec<&str> = docs.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(order, vec!["d1", "d2", "d3"]);
    }

    #[test]
    fn alpha_one_follows_vector_ordering() {
        let kw = vec![candidate("c1", "d1", 10.0), candidate("c2", "d2", 5.0)];
        let vectors = vec![
            candidate("c1", "d1", 0.1),
            candidate("c2", "d2", 0.9),
            candidate("c3", "d3", 0.5),
        ];

        let docs = score_and_group(&kw, &vectors, 1.0, 1);
        let order: Vec<&str> = docs.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(order, vec!["d2", "d3", "d1"]);
    }

    #[test]
    fn document_score_averages_top_chunks() {
        // Three chunks in one document with distinct keyword scores
        let kw = vec![
            candidate("c1", "d1", 10.0),
            candidate("c2", "d1", 5.0),
            candidate("c3", "d1", 0.0),
        ];

        // cap 1: only the best chunk counts
        let top1 = score_and_group(&kw, &[], 0.0, 1);
        assert!((top1[0].score - 1.0).abs() < 1e-9);

        // cap 2: mean of the two best normalized scores (1.0 and 0.5)
        let top2 = score_and_group(&kw, &[], 0.0, 2);
        assert!((top2[0].score - 0.75).abs() < 1e-9);
        assert_eq!(top2[0].snippet, "snippet-c1");
    }

    #[test]
    fn snippet_comes_from_best_chunk() {
        let kw = vec![candidate("low", "d1", 1.0), candidate("high", "d1", 9.0)];
        let docs = score_and_group(&kw, &[], 0.0, 3);
        assert_eq!(docs[0].snippet, "snippet-high");
    }
}
