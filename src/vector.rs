//! Vector index over chunk embeddings.
//!
//! [`VectorIndex`] is implemented by:
//! - **[`SqliteVectorIndex`]**: vectors as little-endian f32 BLOBs in
//!   `chunk_vectors`, brute-force cosine search. The default.
//! - **[`QdrantIndex`]**: a Qdrant collection driven over its REST API.
//!
//! Both store the same [`ChunkPayload`] next to each vector and support the
//! same [`SearchFilters`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

use crate::config::VectorConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ChunkType, Priority};

/// Metadata stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: String,
    pub prd_id: String,
    pub chunk_type: ChunkType,
    pub text: String,
    pub context: String,
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    pub section_title: String,
    #[serde(default)]
    pub optimized: bool,
}

impl From<&Chunk> for ChunkPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            prd_id: chunk.prd_id.clone(),
            chunk_type: chunk.chunk_type,
            text: chunk.text.clone(),
            context: chunk.context_prefix.clone(),
            priority: chunk.priority,
            tags: chunk.tags.clone(),
            section_title: chunk.section_title.clone(),
            optimized: chunk.optimized,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Search restrictions. List filters match when any listed value matches;
/// a single value is accepted wherever a list is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub prd_id: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub chunk_type: Option<Vec<ChunkType>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub priority: Option<Vec<Priority>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(
        Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }),
    )
}

impl SearchFilters {
    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        if let Some(prd_id) = &self.prd_id {
            if &payload.prd_id != prd_id {
                return false;
            }
        }
        if let Some(types) = self.chunk_type.as_ref().filter(|v| !v.is_empty()) {
            if !types.contains(&payload.chunk_type) {
                return false;
            }
        }
        if let Some(priorities) = self.priority.as_ref().filter(|v| !v.is_empty()) {
            if !priorities.contains(&payload.priority) {
                return false;
            }
        }
        if let Some(tags) = self.tags.as_ref().filter(|v| !v.is_empty()) {
            if !tags.iter().any(|t| payload.tags.contains(t)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f64,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vectors_count: u64,
    pub points_count: u64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name, as configured.
    fn backend(&self) -> &str;

    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self) -> Result<()>;

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    /// Nearest neighbours by cosine similarity, best first, ties by chunk id.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &SearchFilters,
        score_threshold: Option<f64>,
    ) -> Result<Vec<VectorHit>>;

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()>;

    async fn delete_prd(&self, prd_id: &str) -> Result<()>;

    async fn info(&self) -> Result<CollectionInfo>;
}

/// Build the configured vector backend.
pub async fn create_vector_index(
    config: &VectorConfig,
    pool: &SqlitePool,
    dims: usize,
) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match config.backend.as_str() {
        "sqlite" => Arc::new(SqliteVectorIndex::new(pool.clone(), &config.collection)),
        "qdrant" => Arc::new(QdrantIndex::new(config, dims)?),
        other => anyhow::bail!("Unknown vector backend: {}", other),
    };
    Ok(index)
}

fn sort_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

// ============ SQLite ============

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    name: String,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, name: &str) -> Self {
        Self {
            pool,
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn ensure_collection(&self) -> Result<()> {
        // Table is created by migrations.
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            let payload_json = serde_json::to_string(&point.payload)?;
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, prd_id, embedding, payload_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    prd_id = excluded.prd_id,
                    embedding = excluded.embedding,
                    payload_json = excluded.payload_json
                "#,
            )
            .bind(&point.chunk_id)
            .bind(&point.payload.prd_id)
            .bind(vec_to_blob(&point.vector))
            .bind(payload_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &SearchFilters,
        score_threshold: Option<f64>,
    ) -> Result<Vec<VectorHit>> {
        let rows = match &filters.prd_id {
            Some(prd_id) => {
                sqlx::query(
                    "SELECT chunk_id, embedding, payload_json FROM chunk_vectors WHERE prd_id = ?",
                )
                .bind(prd_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT chunk_id, embedding, payload_json FROM chunk_vectors")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut hits = Vec::new();
        for row in rows {
            let payload_json: String = row.get("payload_json");
            let payload: ChunkPayload = match serde_json::from_str(&payload_json) {
                Ok(p) => p,
                Err(e) => {
                    let chunk_id: String = row.get("chunk_id");
                    tracing::warn!(%chunk_id, error = %e, "skipping vector with unreadable payload");
                    continue;
                }
            };
            if !filters.matches(&payload) {
                continue;
            }

            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
            if score_threshold.is_some_and(|t| score < t) {
                continue;
            }

            hits.push(VectorHit {
                chunk_id: row.get("chunk_id"),
                score,
                payload,
            });
        }

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        for id in chunk_ids {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn delete_prd(&self, prd_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE prd_id = ?")
            .bind(prd_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn info(&self) -> Result<CollectionInfo> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(CollectionInfo {
            name: self.name.clone(),
            vectors_count: count as u64,
            points_count: count as u64,
        })
    }
}

// ============ Qdrant ============

/// Qdrant collection accessed through the REST API.
pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dims: usize,
}

impl QdrantIndex {
    pub fn new(config: &VectorConfig, dims: usize) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key,
            dims,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<serde_json::Value> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Qdrant {} failed: cannot reach {}", what, self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Qdrant {} failed ({}): {}", what, status, body);
        }
        Ok(response.json().await?)
    }
}

/// Translate filters into a Qdrant `filter` object, or `None` when unfiltered.
pub fn qdrant_filter(filters: &SearchFilters) -> Option<serde_json::Value> {
    let mut must = Vec::new();

    if let Some(prd_id) = &filters.prd_id {
        must.push(serde_json::json!({"key": "prd_id", "match": {"value": prd_id}}));
    }
    if let Some(types) = filters.chunk_type.as_ref().filter(|v| !v.is_empty()) {
        let values: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
        must.push(serde_json::json!({"key": "chunk_type", "match": {"any": values}}));
    }
    if let Some(priorities) = filters.priority.as_ref().filter(|v| !v.is_empty()) {
        let values: Vec<&str> = priorities.iter().map(|p| p.as_str()).collect();
        must.push(serde_json::json!({"key": "priority", "match": {"any": values}}));
    }
    if let Some(tags) = filters.tags.as_ref().filter(|v| !v.is_empty()) {
        must.push(serde_json::json!({"key": "tags", "match": {"any": tags}}));
    }

    if must.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "must": must }))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn ensure_collection(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .with_context(|| format!("Cannot reach Qdrant at {}", self.base_url))?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Qdrant collection lookup failed ({}): {}", status, body);
        }

        let body = serde_json::json!({
            "vectors": { "size": self.dims, "distance": "Cosine" }
        });
        self.send(
            self.request(reqwest::Method::PUT, "").json(&body),
            "create collection",
        )
        .await?;
        tracing::info!(collection = %self.collection, dims = self.dims, "created Qdrant collection");
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let points: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.chunk_id,
                    "vector": p.vector,
                    "payload": p.payload,
                })
            })
            .collect();
        let body = serde_json::json!({ "points": points });
        self.send(
            self.request(reqwest::Method::PUT, "/points?wait=true").json(&body),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &SearchFilters,
        score_threshold: Option<f64>,
    ) -> Result<Vec<VectorHit>> {
        let mut body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = qdrant_filter(filters) {
            body["filter"] = filter;
        }
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = serde_json::json!(threshold);
        }

        let json = self
            .send(
                self.request(reqwest::Method::POST, "/points/search").json(&body),
                "search",
            )
            .await?;

        let results = json
            .get("result")
            .and_then(|r| r.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing result array"))?;

        let mut hits = Vec::with_capacity(results.len());
        for item in results {
            let Some(payload) = item
                .get("payload")
                .and_then(|p| serde_json::from_value::<ChunkPayload>(p.clone()).ok())
            else {
                tracing::warn!("skipping Qdrant hit without a readable payload");
                continue;
            };
            hits.push(VectorHit {
                chunk_id: payload.chunk_id.clone(),
                score: item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                payload,
            });
        }

        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({ "points": chunk_ids });
        self.send(
            self.request(reqwest::Method::POST, "/points/delete?wait=true").json(&body),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn delete_prd(&self, prd_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "filter": { "must": [{"key": "prd_id", "match": {"value": prd_id}}] }
        });
        self.send(
            self.request(reqwest::Method::POST, "/points/delete?wait=true").json(&body),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn info(&self) -> Result<CollectionInfo> {
        let json = self
            .send(self.request(reqwest::Method::GET, ""), "collection info")
            .await?;
        let result = json.get("result").cloned().unwrap_or_default();
        let points_count = result.get("points_count").and_then(|v| v.as_u64()).unwrap_or(0);
        let vectors_count = result
            .get("vectors_count")
            .or_else(|| result.get("indexed_vectors_count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(points_count);
        Ok(CollectionInfo {
            name: self.collection.clone(),
            vectors_count,
            points_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(prd: &str, chunk_type: ChunkType, priority: Priority, tags: &[&str]) -> ChunkPayload {
        ChunkPayload {
            chunk_id: "c1".into(),
            prd_id: prd.into(),
            chunk_type,
            text: "text".into(),
            context: "PRD: X, Section: Y".into(),
            priority,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            section_title: "Y".into(),
            optimized: false,
        }
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = SearchFilters::default();
        assert!(filters.matches(&payload("p1", ChunkType::Risk, Priority::Low, &[])));
        assert!(qdrant_filter(&filters).is_none());
    }

    #[test]
    fn test_filters_are_any_of() {
        let filters = SearchFilters {
            prd_id: Some("p1".into()),
            chunk_type: Some(vec![ChunkType::Requirement, ChunkType::Feature]),
            priority: Some(vec![Priority::High, Priority::Critical]),
            tags: Some(vec!["auth".into(), "billing".into()]),
        };
        assert!(filters.matches(&payload("p1", ChunkType::Feature, Priority::High, &["auth"])));
        assert!(!filters.matches(&payload("p2", ChunkType::Feature, Priority::High, &["auth"])));
        assert!(!filters.matches(&payload("p1", ChunkType::Risk, Priority::High, &["auth"])));
        assert!(!filters.matches(&payload("p1", ChunkType::Feature, Priority::Low, &["auth"])));
        assert!(!filters.matches(&payload("p1", ChunkType::Feature, Priority::High, &["ui"])));
    }

    #[test]
    fn test_filters_accept_single_values_or_lists() {
        let single: SearchFilters = serde_json::from_str(
            r#"{"chunk_type": "requirement", "priority": "high", "tags": "auth"}"#,
        )
        .unwrap();
        assert_eq!(single.chunk_type, Some(vec![ChunkType::Requirement]));
        assert_eq!(single.priority, Some(vec![Priority::High]));
        assert_eq!(single.tags, Some(vec!["auth".to_string()]));

        let many: SearchFilters =
            serde_json::from_str(r#"{"chunk_type": ["feature", "risk"], "priority": null}"#).unwrap();
        assert_eq!(many.chunk_type, Some(vec![ChunkType::Feature, ChunkType::Risk]));
        assert_eq!(many.priority, None);
        assert_eq!(many.tags, None);

        assert!(serde_json::from_str::<SearchFilters>(r#"{"chunk_type": "widget"}"#).is_err());
    }

    #[test]
    fn test_qdrant_filter_shape() {
        let filters = SearchFilters {
            prd_id: Some("p1".into()),
            chunk_type: Some(vec![ChunkType::Requirement]),
            priority: None,
            tags: Some(vec![]),
        };
        let filter = qdrant_filter(&filters).unwrap();
        let must = filter["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["match"]["value"], "p1");
        assert_eq!(must[1]["match"]["any"][0], "requirement");
    }

    #[test]
    fn test_payload_wire_format() {
        let json = serde_json::to_value(payload("p1", ChunkType::TestCase, Priority::Critical, &["a"]))
            .unwrap();
        assert_eq!(json["chunk_type"], "test_case");
        assert_eq!(json["priority"], "critical");
        assert_eq!(json["context"], "PRD: X, Section: Y");
    }

    #[test]
    fn test_hits_sorted_by_score_then_id() {
        let p = payload("p1", ChunkType::Feature, Priority::Medium, &[]);
        let mut hits = vec![
            VectorHit { chunk_id: "b".into(), score: 0.5, payload: p.clone() },
            VectorHit { chunk_id: "a".into(), score: 0.5, payload: p.clone() },
            VectorHit { chunk_id: "c".into(), score: 0.9, payload: p },
        ];
        sort_hits(&mut hits);
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
