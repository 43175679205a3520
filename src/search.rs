//! Result scoring for keyword, semantic and hybrid search.
//!
//! Candidates arrive from two channels: BM25 over the FTS5 index and cosine
//! similarity from the vector index. Semantic mode returns raw cosine scores
//! so an exact match scores close to 1.0. Keyword and hybrid modes min-max
//! normalise each channel to `[0, 1]` and blend them:
//!
//! ```text
//! hybrid = (1 - alpha) * keyword + alpha * vector
//! ```
//!
//! A chunk missing from one channel contributes 0 for that channel.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pipeline::Pipeline;
use crate::vector::{ChunkPayload, SearchFilters, VectorHit};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    #[default]
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Some(Self::Keyword),
            "semantic" => Some(Self::Semantic),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn needs_embeddings(&self) -> bool {
        !matches!(self, Self::Keyword)
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f64,
    pub payload: ChunkPayload,
}

impl From<VectorHit> for SearchHit {
    fn from(hit: VectorHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            score: hit.score,
            payload: hit.payload,
        }
    }
}

/// A scored chunk from a single channel, before normalisation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub raw_score: f64,
    pub payload: ChunkPayload,
}

/// Min-max normalise scores to `[0, 1]`. A single candidate, or a set of
/// equal scores, normalises to 1.0.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
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

/// Blend normalised keyword and vector candidates with weight `alpha` on
/// the vector side. Sorted by score desc, chunk id asc; truncated to `limit`.
pub fn merge_hybrid(
    keyword: &[Candidate],
    vector: &[Candidate],
    alpha: f64,
    limit: usize,
) -> Vec<SearchHit> {
    let kw_map: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut seen: HashMap<&str, &Candidate> = HashMap::new();
    for c in keyword.iter().chain(vector.iter()) {
        seen.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut hits: Vec<SearchHit> = seen
        .into_iter()
        .map(|(chunk_id, cand)| {
            let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
            let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
            SearchHit {
                chunk_id: chunk_id.to_string(),
                score: (1.0 - alpha) * k + alpha * v,
                payload: cand.payload.clone(),
            }
        })
        .collect();

    sort_hits(&mut hits);
    hits.truncate(limit);
    hits
}

/// Score desc, chunk id asc.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// CLI entry point: run a search and print ranked chunks to stdout.
pub async fn run_search(
    pipeline: &Pipeline,
    query: &str,
    mode: SearchMode,
    limit: usize,
    filters: &SearchFilters,
    json: bool,
) -> Result<()> {
    let hits = pipeline.search(query, mode, limit, filters).await?;

    if json {
        let out = serde_json::json!({
            "query": query,
            "results": hits,
            "count": hits.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let p = &hit.payload;
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            p.chunk_type,
            p.section_title
        );
        println!("    priority: {}", p.priority);
        if !p.tags.is_empty() {
            println!("    tags: {}", p.tags.join(", "));
        }
        println!("    excerpt: \"{}\"", excerpt(&p.text, 160));
        println!("    prd: {}", p.prd_id);
        println!("    id: {}", hit.chunk_id);
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        flat.to_string()
    } else {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkType, Priority};

    fn make_candidate(chunk_id: &str, score: f64) -> Candidate {
        Candidate {
            chunk_id: chunk_id.to_string(),
            raw_score: score,
            payload: ChunkPayload {
                chunk_id: chunk_id.to_string(),
                prd_id: "p1".into(),
                chunk_type: ChunkType::Requirement,
                text: String::new(),
                context: String::new(),
                priority: Priority::Medium,
                tags: vec![],
                section_title: String::new(),
                optimized: false,
            },
        }
    }

    fn order(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![make_candidate("c1", 5.0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!(result[2].1.abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![make_candidate("c1", 3.0), make_candidate("c2", 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scores_always_in_unit() {
        let candidates = vec![
            make_candidate("c1", -5.0),
            make_candidate("c2", 100.0),
            make_candidate("c3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "Score out of range: {}", score);
        }
    }

    #[test]
    fn test_hybrid_alpha_zero_equals_keyword() {
        let kw = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 1.0),
        ];
        let vec_cands = vec![make_candidate("c1", 0.1), make_candidate("c2", 0.9)];

        let hits = merge_hybrid(&kw, &vec_cands, 0.0, 10);
        assert_eq!(order(&hits), vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn test_hybrid_alpha_one_equals_vector() {
        let kw = vec![make_candidate("c1", 10.0), make_candidate("c2", 5.0)];
        let vec_cands = vec![
            make_candidate("c1", 0.1),
            make_candidate("c2", 0.9),
            make_candidate("c3", 0.5),
        ];

        let hits = merge_hybrid(&kw, &vec_cands, 1.0, 10);
        assert_eq!(order(&hits), vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn test_hybrid_blend_and_limit() {
        // c1: k=1.0 v=0.0, c2: k=0.0 v=1.0, c3: vector only v=0.5
        let kw = vec![make_candidate("c1", 4.0), make_candidate("c2", 2.0)];
        let vec_cands = vec![
            make_candidate("c1", 0.2),
            make_candidate("c2", 0.8),
            make_candidate("c3", 0.5),
        ];

        let hits = merge_hybrid(&kw, &vec_cands, 0.6, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c2");
        assert!((hits[0].score - 0.6).abs() < 1e-9);
        assert_eq!(hits[1].chunk_id, "c1");
        assert!((hits[1].score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_on_chunk_id() {
        let kw = vec![make_candidate("b", 1.0), make_candidate("a", 1.0)];
        let hits = merge_hybrid(&kw, &[], 0.0, 10);
        assert_eq!(order(&hits), vec!["a", "b"]);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(SearchMode::parse("HYBRID"), Some(SearchMode::Hybrid));
        assert_eq!(SearchMode::parse("fuzzy"), None);
        assert_eq!(SearchMode::default(), SearchMode::Semantic);
        assert!(!SearchMode::Keyword.needs_embeddings());
    }
}
