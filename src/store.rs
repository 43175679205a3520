//! SQLite document store: PRDs, sections, chunks and the FTS5 index.
//!
//! This is the source of truth for PRD listings and chunk text. The vector
//! index and graph hold derived copies that can be rebuilt from here.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::chunk::chunk_hash;
use crate::error::PipelineError;
use crate::models::{Chunk, ChunkType, Prd, PrdSection, PrdSummary, Priority};

const CHUNK_COLUMNS: &str = "c.id, c.prd_id, c.chunk_type, c.text, c.context_prefix, c.priority, \
     c.tags_json, c.section_title, c.part_index, c.optimized, c.optimization_notes";

/// Insert a PRD, its sections and its chunks in one transaction.
pub async fn insert_prd(pool: &SqlitePool, prd: &Prd, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO prds (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&prd.id)
    .bind(&prd.name)
    .bind(&prd.description)
    .bind(prd.created_at.to_rfc3339())
    .bind(prd.updated_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for (position, section) in prd.sections.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO prd_sections (prd_id, position, title, content, priority, tags_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&prd.id)
        .bind(position as i64)
        .bind(&section.title)
        .bind(&section.content)
        .bind(section.priority.as_str())
        .bind(serde_json::to_string(&section.tags)?)
        .execute(&mut *tx)
        .await?;
    }

    for (position, chunk) in chunks.iter().enumerate() {
        insert_chunk(&mut tx, chunk, position as i64).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Append chunks to an existing PRD after its current last chunk.
pub async fn append_chunks(pool: &SqlitePool, prd_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;
    let next: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM chunks WHERE prd_id = ?")
            .bind(prd_id)
            .fetch_one(&mut *tx)
            .await?;
    for (offset, chunk) in chunks.iter().enumerate() {
        insert_chunk(&mut tx, chunk, next + offset as i64).await?;
    }
    touch_prd(&mut tx, prd_id).await?;
    tx.commit().await?;
    Ok(())
}

async fn insert_chunk(conn: &mut SqliteConnection, chunk: &Chunk, position: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, prd_id, position, chunk_type, text, context_prefix, priority,
                            tags_json, section_title, part_index, optimized, optimization_notes, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.prd_id)
    .bind(position)
    .bind(chunk.chunk_type.as_str())
    .bind(&chunk.text)
    .bind(&chunk.context_prefix)
    .bind(chunk.priority.as_str())
    .bind(serde_json::to_string(&chunk.tags)?)
    .bind(&chunk.section_title)
    .bind(chunk.part_index)
    .bind(chunk.optimized)
    .bind(&chunk.optimization_notes)
    .bind(chunk_hash(chunk))
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO chunks_fts (chunk_id, prd_id, text) VALUES (?, ?, ?)")
        .bind(&chunk.id)
        .bind(&chunk.prd_id)
        .bind(&chunk.text)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Rewrite a chunk's mutable fields and refresh its FTS row and hash.
pub async fn update_chunk(pool: &SqlitePool, chunk: &Chunk) -> Result<()> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE chunks SET chunk_type = ?, text = ?, priority = ?, tags_json = ?,
                          optimized = ?, optimization_notes = ?, hash = ?
        WHERE id = ?
        "#,
    )
    .bind(chunk.chunk_type.as_str())
    .bind(&chunk.text)
    .bind(chunk.priority.as_str())
    .bind(serde_json::to_string(&chunk.tags)?)
    .bind(chunk.optimized)
    .bind(&chunk.optimization_notes)
    .bind(chunk_hash(chunk))
    .bind(&chunk.id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(PipelineError::chunk_not_found(&chunk.id).into());
    }

    sqlx::query("UPDATE chunks_fts SET text = ? WHERE chunk_id = ?")
        .bind(&chunk.text)
        .bind(&chunk.id)
        .execute(&mut *tx)
        .await?;

    touch_prd(&mut tx, &chunk.prd_id).await?;
    tx.commit().await?;
    Ok(())
}

async fn touch_prd(conn: &mut SqliteConnection, prd_id: &str) -> Result<()> {
    sqlx::query("UPDATE prds SET updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(prd_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Remove individual chunks with their FTS rows and embedding records.
pub async fn delete_chunks(pool: &SqlitePool, chunk_ids: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for id in chunk_ids {
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Delete a PRD. Sections, chunks and stored vectors go with it through
/// foreign keys; FTS rows are removed explicitly. Returns `false` if absent.
pub async fn delete_prd(pool: &SqlitePool, prd_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks_fts WHERE prd_id = ?")
        .bind(prd_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM prds WHERE id = ?")
        .bind(prd_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_prd(pool: &SqlitePool, prd_id: &str) -> Result<Option<Prd>> {
    let Some(row) = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM prds WHERE id = ?",
    )
    .bind(prd_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let section_rows = sqlx::query(
        "SELECT title, content, priority, tags_json FROM prd_sections WHERE prd_id = ? ORDER BY position",
    )
    .bind(prd_id)
    .fetch_all(pool)
    .await?;

    let sections = section_rows
        .iter()
        .map(|r| {
            let tags_json: String = r.get("tags_json");
            PrdSection {
                title: r.get("title"),
                content: r.get("content"),
                priority: Priority::parse_lenient(r.get::<String, _>("priority").as_str()),
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            }
        })
        .collect();

    Ok(Some(Prd {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        sections,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    }))
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("invalid timestamp in database: {}", value))?
        .with_timezone(&Utc))
}

/// All PRDs, newest first, with requirement-side chunk counts and test counts.
pub async fn list_prds(pool: &SqlitePool) -> Result<Vec<PrdSummary>> {
    let rows = sqlx::query(
        "SELECT id, name, description, created_at FROM prds ORDER BY created_at DESC, id",
    )
    .fetch_all(pool)
    .await?;

    let count_rows = sqlx::query(
        "SELECT prd_id, chunk_type, COUNT(*) AS n FROM chunks GROUP BY prd_id, chunk_type",
    )
    .fetch_all(pool)
    .await?;

    let mut counts: HashMap<String, (i64, i64)> = HashMap::new();
    for row in &count_rows {
        let prd_id: String = row.get("prd_id");
        let n: i64 = row.get("n");
        let entry = counts.entry(prd_id).or_default();
        match ChunkType::parse(row.get::<String, _>("chunk_type").as_str()) {
            Some(t) if t.is_test() => entry.1 += n,
            Some(t) if t.is_artifact() => {}
            _ => entry.0 += n,
        }
    }

    Ok(rows
        .iter()
        .map(|row| {
            let id: String = row.get("id");
            let (chunk_count, test_count) = counts.get(&id).copied().unwrap_or((0, 0));
            PrdSummary {
                id,
                name: row.get("name"),
                description: row.get("description"),
                chunk_count,
                test_count,
                created_at: row.get("created_at"),
            }
        })
        .collect())
}

pub async fn prd_exists(pool: &SqlitePool, prd_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM prds WHERE id = ?")
        .bind(prd_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Chunks of a PRD in document order.
pub async fn prd_chunks(pool: &SqlitePool, prd_id: &str) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM chunks c WHERE c.prd_id = ? ORDER BY c.position",
        CHUNK_COLUMNS
    ))
    .bind(prd_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(chunk_from_row).collect()
}

pub async fn get_chunk(pool: &SqlitePool, chunk_id: &str) -> Result<Option<Chunk>> {
    let row = sqlx::query(&format!("SELECT {} FROM chunks c WHERE c.id = ?", CHUNK_COLUMNS))
        .bind(chunk_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(chunk_from_row).transpose()
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let type_str: String = row.get("chunk_type");
    let chunk_type = ChunkType::parse(&type_str)
        .with_context(|| format!("unknown chunk type in database: {}", type_str))?;
    let tags_json: String = row.get("tags_json");
    Ok(Chunk {
        id: row.get("id"),
        prd_id: row.get("prd_id"),
        chunk_type,
        text: row.get("text"),
        context_prefix: row.get("context_prefix"),
        priority: Priority::parse_lenient(row.get::<String, _>("priority").as_str()),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        section_title: row.get("section_title"),
        part_index: row.get("part_index"),
        optimized: row.get("optimized"),
        optimization_notes: row.get("optimization_notes"),
    })
}

/// Turn free text into an FTS5 query: every word quoted, OR-ed together.
/// Returns `None` when the text has no words.
pub fn fts_query(text: &str) -> Option<String> {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let re = WORD_RE.get_or_init(|| Regex::new(r"\w+").expect("valid word regex"));
    let terms: Vec<String> = re
        .find_iter(text)
        .map(|m| format!("\"{}\"", m.as_str()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// BM25 keyword candidates, best first. Scores are `-rank` so higher is better.
pub async fn keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    prd_id: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<(Chunk, f64)>> {
    let Some(fts) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let sql = format!(
        r#"
        SELECT {}, chunks_fts.rank AS rank
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        WHERE chunks_fts MATCH ?1 AND (?2 IS NULL OR c.prd_id = ?2)
        ORDER BY rank
        LIMIT ?3
        "#,
        CHUNK_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(fts)
        .bind(prd_id)
        .bind(candidate_k)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            Ok((chunk_from_row(row)?, -rank))
        })
        .collect()
}

/// Chunks with no embedding for `model`, or whose text changed since.
pub async fn pending_chunks(
    pool: &SqlitePool,
    model: &str,
    prd_id: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Chunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);
    let sql = format!(
        r#"
        SELECT {}
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?1
        WHERE (e.chunk_id IS NULL OR e.hash != c.hash)
          AND (?2 IS NULL OR c.prd_id = ?2)
        ORDER BY c.prd_id, c.position
        LIMIT ?3
        "#,
        CHUNK_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(model)
        .bind(prd_id)
        .bind(limit_val)
        .fetch_all(pool)
        .await?;

    rows.iter().map(chunk_from_row).collect()
}

/// Record that `chunk_id` now has an up-to-date vector.
pub async fn record_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    model: &str,
    dims: usize,
    hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            created_at = excluded.created_at,
            hash = excluded.hash
        "#,
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(Utc::now().timestamp())
    .bind(hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// Forget embedding bookkeeping, for one PRD or all of them.
pub async fn clear_embeddings(pool: &SqlitePool, prd_id: Option<&str>) -> Result<()> {
    sqlx::query(
        "DELETE FROM embeddings WHERE ?1 IS NULL OR chunk_id IN (SELECT id FROM chunks WHERE prd_id = ?1)",
    )
    .bind(prd_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Counts for `stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreCounts {
    pub prds: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub pending_chunks: i64,
}

pub async fn counts(pool: &SqlitePool) -> Result<StoreCounts> {
    let prds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prds")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let embedded_chunks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks c JOIN embeddings e ON e.chunk_id = c.id AND e.hash = c.hash",
    )
    .fetch_one(pool)
    .await?;
    Ok(StoreCounts {
        prds,
        chunks,
        embedded_chunks,
        pending_chunks: chunks - embedded_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_prd;
    use crate::config::Config;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_db_path(dir.path().join("store.sqlite"));
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    fn sample_prd() -> Prd {
        Prd::new(
            "Checkout",
            Some("Payments flow".into()),
            vec![
                PrdSection {
                    title: "Payment Requirements".into(),
                    content: "The system shall accept card payments.".into(),
                    priority: Priority::Critical,
                    tags: vec!["payments".into()],
                },
                PrdSection {
                    title: "Receipts Feature".into(),
                    content: "Email a receipt after purchase.".into(),
                    priority: Priority::Low,
                    tags: vec![],
                },
            ],
        )
    }

    #[test]
    fn test_fts_query_quotes_words() {
        assert_eq!(fts_query("card AND \"pay\"-ment").as_deref(), Some("\"card\" OR \"AND\" OR \"pay\" OR \"ment\""));
        assert_eq!(fts_query("  ?! "), None);
    }

    #[tokio::test]
    async fn test_roundtrip_prd_and_chunks() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let chunks = chunk_prd(&prd, 700);
        insert_prd(&pool, &prd, &chunks).await.unwrap();

        let loaded = get_prd(&pool, &prd.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Checkout");
        assert_eq!(loaded.sections, prd.sections);

        let stored = prd_chunks(&pool, &prd.id).await.unwrap();
        assert_eq!(stored, chunks);

        let one = get_chunk(&pool, &chunks[1].id).await.unwrap().unwrap();
        assert_eq!(one.section_title, "Receipts Feature");
        assert!(get_chunk(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_counts_exclude_artifacts() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let mut chunks = chunk_prd(&prd, 700);
        let mut test_chunk = chunks[0].clone();
        test_chunk.id = uuid::Uuid::new_v4().to_string();
        test_chunk.chunk_type = ChunkType::TestCase;
        let mut doc_chunk = chunks[0].clone();
        doc_chunk.id = uuid::Uuid::new_v4().to_string();
        doc_chunk.chunk_type = ChunkType::UserManual;
        chunks.push(test_chunk);
        chunks.push(doc_chunk);
        insert_prd(&pool, &prd, &chunks).await.unwrap();

        let list = list_prds(&pool).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].chunk_count, 2);
        assert_eq!(list[0].test_count, 1);
    }

    #[tokio::test]
    async fn test_keyword_candidates_and_filters() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let chunks = chunk_prd(&prd, 700);
        insert_prd(&pool, &prd, &chunks).await.unwrap();

        let hits = keyword_candidates(&pool, "card payments", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, chunks[0].id);

        let none = keyword_candidates(&pool, "card", Some("other-prd"), 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_marks_embedding_stale() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let chunks = chunk_prd(&prd, 700);
        insert_prd(&pool, &prd, &chunks).await.unwrap();

        assert_eq!(pending_chunks(&pool, "hash", None, None).await.unwrap().len(), 2);
        for c in &chunks {
            record_embedding(&pool, &c.id, "hash", 8, &chunk_hash(c)).await.unwrap();
        }
        assert!(pending_chunks(&pool, "hash", None, None).await.unwrap().is_empty());

        let mut edited = chunks[0].clone();
        edited.text = "The system shall accept card and wallet payments.".into();
        edited.optimized = true;
        update_chunk(&pool, &edited).await.unwrap();

        let pending = pending_chunks(&pool, "hash", Some(&prd.id), None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, edited.id);
        assert!(pending[0].optimized);

        let hits = keyword_candidates(&pool, "wallet", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let c = counts(&pool).await.unwrap();
        assert_eq!((c.prds, c.chunks, c.embedded_chunks, c.pending_chunks), (1, 2, 1, 1));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let chunks = chunk_prd(&prd, 700);
        insert_prd(&pool, &prd, &chunks).await.unwrap();
        record_embedding(&pool, &chunks[0].id, "hash", 8, "x").await.unwrap();

        assert!(delete_prd(&pool, &prd.id).await.unwrap());
        assert!(!delete_prd(&pool, &prd.id).await.unwrap());
        assert!(get_prd(&pool, &prd.id).await.unwrap().is_none());
        assert!(prd_chunks(&pool, &prd.id).await.unwrap().is_empty());
        assert!(keyword_candidates(&pool, "card", None, 10).await.unwrap().is_empty());
        let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(embeddings, 0);
    }

    #[tokio::test]
    async fn test_append_chunks_goes_last() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let chunks = chunk_prd(&prd, 700);
        insert_prd(&pool, &prd, &chunks).await.unwrap();

        let mut extra = chunks[0].clone();
        extra.id = uuid::Uuid::new_v4().to_string();
        extra.section_title = "LLM-Generated".into();
        append_chunks(&pool, &prd.id, &[extra.clone()]).await.unwrap();

        let stored = prd_chunks(&pool, &prd.id).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2].id, extra.id);
    }

    #[tokio::test]
    async fn test_update_missing_chunk_is_not_found() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let mut ghost = chunk_prd(&prd, 700).remove(0);
        ghost.id = "gone".into();

        let err = update_chunk(&pool, &ghost).await.unwrap_err();
        assert!(matches!(
            crate::error::classify(&err),
            Some(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_chunks_leaves_siblings() {
        let (_dir, pool) = setup().await;
        let prd = sample_prd();
        let chunks = chunk_prd(&prd, 700);
        insert_prd(&pool, &prd, &chunks).await.unwrap();
        record_embedding(&pool, &chunks[0].id, "hash", 8, "x").await.unwrap();

        delete_chunks(&pool, &[chunks[0].id.clone()]).await.unwrap();

        let stored = prd_chunks(&pool, &prd.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, chunks[1].id);
        assert!(keyword_candidates(&pool, "card", None, 10).await.unwrap().is_empty());
        assert_eq!(counts(&pool).await.unwrap().embedded_chunks, 0);
    }
}
