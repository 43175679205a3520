//! Section chunker and heuristic relationship detection.
//!
//! Every PRD section becomes one [`Chunk`]. Sections longer than
//! `max_tokens` are split on paragraph boundaries (`\n\n`), and single
//! oversized paragraphs are hard-split on newline or space boundaries.
//! Parts of a split section share the section's title, priority, tags and
//! chunk type, and are numbered by `part_index`.
//!
//! [`detect_relationships`] links chunks with keyword heuristics:
//! `DEPENDS_ON`, `REFERENCES`, `IMPLEMENTS`, plus `PARENT_OF` from the first
//! part of a split section to its remaining parts.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::models::{context_prefix, Chunk, ChunkType, Prd, PrdSection, Relationship, RelationshipType};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

const DEPENDENCY_KEYWORDS: [&str; 6] = [
    "depends on",
    "requires",
    "needs",
    "prerequisite",
    "relies on",
    "based on",
];

const STOP_WORDS: [&str; 14] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

const MODAL_WORDS: [&str; 3] = ["shall", "must", "will"];

/// Minimum shared non-stop words for a `REFERENCES` edge.
const REFERENCE_OVERLAP: usize = 3;
/// Minimum shared non-stop, non-modal words for an `IMPLEMENTS` edge.
const IMPLEMENTS_OVERLAP: usize = 2;

/// Split every section of `prd` into chunks.
pub fn chunk_prd(prd: &Prd, max_tokens: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in &prd.sections {
        chunks.extend(chunk_section(prd, section, max_tokens));
    }
    chunks
}

/// Chunks for a single section. Blank sections produce nothing.
pub fn chunk_section(prd: &Prd, section: &PrdSection, max_tokens: usize) -> Vec<Chunk> {
    let content = section.content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let chunk_type = detect_chunk_type(&section.title, &section.content);
    let prefix = context_prefix(&prd.name, &section.title);

    split_text(content, max_tokens)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: Uuid::new_v4().to_string(),
            prd_id: prd.id.clone(),
            chunk_type,
            text,
            context_prefix: prefix.clone(),
            priority: section.priority,
            tags: section.tags.clone(),
            section_title: section.title.clone(),
            part_index: i as i64,
            optimized: false,
            optimization_notes: None,
        })
        .collect()
}

/// Split text on paragraph boundaries so each piece fits in `max_tokens`.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);

    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Largest char boundary `<= index`, never zero for non-empty input.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    if i == 0 {
        // First char is wider than the budget; take it whole.
        s.char_indices().nth(1).map(|(pos, _)| pos).unwrap_or(s.len())
    } else {
        i
    }
}

/// Classify a section by keywords in its title and content. First match wins.
pub fn detect_chunk_type(title: &str, content: &str) -> ChunkType {
    let title = title.to_lowercase();
    let content = content.to_lowercase();
    let title_has = |words: &[&str]| words.iter().any(|w| title.contains(w));

    if title.contains("requirement") || content.contains("shall") || content.contains("must") {
        ChunkType::Requirement
    } else if title_has(&["feature", "capability"]) {
        ChunkType::Feature
    } else if title_has(&["constraint", "limitation"]) {
        ChunkType::Constraint
    } else if title_has(&["stakeholder", "user", "persona"]) {
        ChunkType::Stakeholder
    } else if title_has(&["metric", "kpi", "measure"]) {
        ChunkType::Metric
    } else if title.contains("dependency") || content.contains("depends") {
        ChunkType::Dependency
    } else if title_has(&["risk", "threat"]) {
        ChunkType::Risk
    } else {
        ChunkType::Feature
    }
}

/// Find heuristic relationships between chunks, in pair order then rule order.
pub fn detect_relationships(chunks: &[Chunk]) -> Vec<Relationship> {
    let words: Vec<HashSet<String>> = chunks.iter().map(|c| word_set(&c.text)).collect();
    let mut rels = Vec::new();

    for (i, source) in chunks.iter().enumerate() {
        for (j, target) in chunks.iter().enumerate().skip(i + 1) {
            if has_dependency(&source.text, &target.section_title) {
                rels.push(Relationship::heuristic(&source.id, &target.id, RelationshipType::DependsOn));
            }

            if overlap(&words[i], &words[j], &STOP_WORDS) >= REFERENCE_OVERLAP {
                rels.push(Relationship::heuristic(&source.id, &target.id, RelationshipType::References));
            }

            if source.chunk_type == ChunkType::Feature
                && target.chunk_type == ChunkType::Requirement
                && implementation_overlap(&words[i], &words[j]) >= IMPLEMENTS_OVERLAP
            {
                rels.push(Relationship::heuristic(&source.id, &target.id, RelationshipType::Implements));
            }

            if source.part_index == 0
                && target.part_index > 0
                && source.prd_id == target.prd_id
                && source.section_title == target.section_title
                && is_same_split(chunks, i, j)
            {
                rels.push(Relationship::heuristic(&source.id, &target.id, RelationshipType::ParentOf));
            }
        }
    }

    rels
}

/// True when `j` is a later part of the split section that starts at `i`.
fn is_same_split(chunks: &[Chunk], i: usize, j: usize) -> bool {
    chunks[i + 1..=j]
        .iter()
        .all(|c| c.part_index > 0 && c.section_title == chunks[i].section_title)
}

fn has_dependency(text: &str, target_title: &str) -> bool {
    let text = text.to_lowercase();
    if !DEPENDENCY_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return false;
    }
    target_title
        .to_lowercase()
        .split_whitespace()
        .filter(|term| term.chars().count() > 3)
        .any(|term| text.contains(term))
}

fn implementation_overlap(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.iter()
        .filter(|w| b.contains(*w))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()) && !MODAL_WORDS.contains(&w.as_str()))
        .count()
}

fn overlap(a: &HashSet<String>, b: &HashSet<String>, stop: &[&str]) -> usize {
    a.iter()
        .filter(|w| b.contains(*w) && !stop.contains(&w.as_str()))
        .count()
}

fn word_set(text: &str) -> HashSet<String> {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let re = WORD_RE.get_or_init(|| Regex::new(r"\w+").expect("valid word regex"));
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// SHA-256 of a chunk's embedding text, used to detect stale vectors.
pub fn chunk_hash(chunk: &Chunk) -> String {
    hash_text(&chunk.embedding_text())
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
