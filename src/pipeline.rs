//! PRD ingestion and retrieval orchestration.
//!
//! [`Pipeline`] owns the SQLite pool and the three pluggable backends
//! (embedding provider, vector index, graph store) and runs every
//! operation that touches more than one of them:
//!
//! ```text
//! Prd ──chunk──▶ SQLite (+FTS5) ──embed──▶ VectorIndex
//!                     │
//!                     └──nodes + edges──▶ GraphStore
//! ```
//!
//! Embedding is non-fatal during ingestion: chunks that cannot be embedded
//! are stored and keyword-searchable, and stay pending until
//! [`Pipeline::embed_pending`] picks them up. Graph writes are not: if
//! linking fails, whatever the ingestion stored is removed again.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

use crate::chunk::{chunk_hash, chunk_prd, detect_relationships};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::PipelineError;
use crate::graph::{
    create_graph_store, ChunkNode, ChunkRelationships, Coverage, Direction, GraphStats,
    GraphStore, RelatedChunk,
};
use crate::migrate;
use crate::models::{
    Chunk, ChunkType, Prd, PrdDetails, PrdSummary, Priority, Relationship, RelationshipType,
    ORIGIN_MANUAL,
};
use crate::search::{merge_hybrid, Candidate, SearchHit, SearchMode};
use crate::store::{self, StoreCounts};
use crate::vector::{
    create_vector_index, ChunkPayload, CollectionInfo, SearchFilters, VectorIndex, VectorPoint,
};

/// Condensed chunk returned after ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkBrief {
    pub id: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub text: String,
    pub priority: Priority,
    pub tags: Vec<String>,
}

impl From<&Chunk> for ChunkBrief {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id.clone(),
            chunk_type: chunk.chunk_type,
            text: chunk.text.clone(),
            priority: chunk.priority,
            tags: chunk.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub prd_id: String,
    pub prd_name: String,
    pub chunks_created: usize,
    pub relationships_created: usize,
    pub embeddings_pending: usize,
    pub chunks: Vec<ChunkBrief>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkContext {
    pub chunk_id: String,
    pub relationships: ChunkRelationships,
    pub dependencies: Vec<ChunkNode>,
    pub dependents: Vec<ChunkNode>,
    /// Neighbours over any edge type, tests and documentation included.
    pub related: Vec<RelatedChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Editable fields of a stored chunk. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkPatch {
    pub text: Option<String>,
    #[serde(alias = "type")]
    pub chunk_type: Option<ChunkType>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub optimization_notes: Option<String>,
}

/// Dependencies of a chunk split by distance, plus cycles through it.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyReport {
    pub chunk_id: String,
    pub direct: Vec<ChunkNode>,
    pub transitive: Vec<ChunkNode>,
    /// Chunks that are both upstream and downstream of this one.
    pub circular: Vec<ChunkNode>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedReport {
    pub total: usize,
    pub embedded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub documents: StoreCounts,
    pub graph: GraphStats,
    pub vector: CollectionInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub services: HealthServices,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthServices {
    pub vector_db: String,
    pub graph_db: String,
    pub database: String,
    pub embeddings: String,
}

/// Cap on neighbours returned by [`GraphStore::related`] lookups.
const RELATED_LIMIT: usize = 100;

pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    provider: Box<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
}

impl Pipeline {
    /// Connect, migrate and prepare the configured backends.
    ///
    /// Backend setup failures (an unreachable Qdrant or Neo4j) are logged
    /// rather than returned so the document store stays usable.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let provider = embedding::create_provider(&config.embedding)?;
        let vectors = create_vector_index(&config.vector, &pool, provider.dims()).await?;
        let graph = create_graph_store(&config.graph, &pool)?;

        if config.embedding.is_enabled() {
            if let Err(e) = vectors.ensure_collection().await {
                tracing::warn!(backend = vectors.backend(), error = %e, "vector collection setup failed");
            }
        }
        if let Err(e) = graph.ensure_schema().await {
            tracing::warn!(backend = graph.backend(), error = %e, "graph schema setup failed");
        }

        tracing::debug!(
            db = %config.db.path.display(),
            embedding = %config.embedding.provider,
            vector = vectors.backend(),
            graph = graph.backend(),
            "pipeline ready"
        );

        Ok(Self {
            config,
            pool,
            provider,
            vectors,
            graph,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &dyn GraphStore {
        self.graph.as_ref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Ingestion ============

    /// Chunk, store, embed, index and link a new PRD.
    pub async fn process_prd(&self, prd: Prd) -> Result<ProcessResult> {
        if prd.name.trim().is_empty() {
            return Err(PipelineError::Validation("PRD name must not be empty".into()).into());
        }

        let chunks = chunk_prd(&prd, self.config.chunking.max_tokens);
        tracing::info!(prd = %prd.name, chunks = chunks.len(), "processing PRD");

        store::insert_prd(&self.pool, &prd, &chunks)
            .await
            .with_context(|| format!("storing PRD {}", prd.name))?;

        let (_, pending) = self.embed_and_index(&chunks).await;

        let relationships_created = match self.link_prd(&prd, &chunks).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(prd = %prd.id, error = %e, "graph write failed, rolling back");
                self.rollback_prd(&prd.id).await;
                return Err(e.context(format!("linking PRD {}", prd.name)));
            }
        };

        Ok(ProcessResult {
            prd_id: prd.id.clone(),
            prd_name: prd.name.clone(),
            chunks_created: chunks.len(),
            relationships_created,
            embeddings_pending: pending,
            chunks: chunks.iter().map(ChunkBrief::from).collect(),
        })
    }

    /// Write the PRD node, its chunk nodes and the detected edges.
    async fn link_prd(&self, prd: &Prd, chunks: &[Chunk]) -> Result<usize> {
        self.graph.upsert_prd_node(prd).await?;
        for chunk in chunks {
            self.graph.upsert_chunk_node(chunk).await?;
            self.graph.link_chunk_to_prd(&chunk.id, &prd.id).await?;
        }

        let mut created = 0;
        if self.graph.is_enabled() {
            let relationships = detect_relationships(chunks);
            tracing::info!(count = relationships.len(), "detected relationships");
            for rel in &relationships {
                if self.graph.create_relationship(rel).await? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    /// Undo a half-finished ingestion. Cleanup errors are only logged so
    /// the caller sees the failure that triggered the rollback.
    async fn rollback_prd(&self, prd_id: &str) {
        if let Err(e) = self.vectors.delete_prd(prd_id).await {
            tracing::warn!(prd = prd_id, error = %e, "rollback: vector cleanup failed");
        }
        if let Err(e) = self.graph.delete_prd(prd_id).await {
            tracing::warn!(prd = prd_id, error = %e, "rollback: graph cleanup failed");
        }
        if let Err(e) = store::delete_prd(&self.pool, prd_id).await {
            tracing::error!(prd = prd_id, error = %e, "rollback: document cleanup failed");
        }
    }

    /// Embed chunks in batches and upsert them into the vector index.
    /// Returns `(embedded, pending)`; failures are logged, never returned.
    async fn embed_and_index(&self, chunks: &[Chunk]) -> (usize, usize) {
        if !self.config.embedding.is_enabled() {
            return (0, chunks.len());
        }

        let model = self.provider.model_name().to_string();
        let dims = self.provider.dims();
        let mut embedded = 0;
        let mut pending = 0;

        for batch in chunks.chunks(self.config.embedding.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(Chunk::embedding_text).collect();
            let vectors =
                match embedding::embed_texts(self.provider.as_ref(), &self.config.embedding, &texts)
                    .await
                {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, batch = batch.len(), "embedding batch failed");
                        pending += batch.len();
                        continue;
                    }
                };

            let points: Vec<VectorPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| VectorPoint {
                    chunk_id: chunk.id.clone(),
                    vector,
                    payload: ChunkPayload::from(chunk),
                })
                .collect();

            if let Err(e) = self.vectors.upsert(&points).await {
                tracing::warn!(error = %e, batch = batch.len(), "vector upsert failed");
                pending += batch.len();
                continue;
            }

            for chunk in batch {
                match store::record_embedding(&self.pool, &chunk.id, &model, dims, &chunk_hash(chunk))
                    .await
                {
                    Ok(()) => embedded += 1,
                    Err(e) => {
                        tracing::warn!(chunk = %chunk.id, error = %e, "failed to record embedding");
                        pending += 1;
                    }
                }
            }
        }

        (embedded, pending)
    }

    /// Rewrite a stored chunk and refresh its graph node and vector.
    /// Returns whether the new text was embedded. When it was not, the
    /// old vector is dropped so semantic search cannot return stale text.
    pub async fn update_chunk(&self, chunk: &Chunk) -> Result<bool> {
        store::update_chunk(&self.pool, chunk).await?;
        self.graph.upsert_chunk_node(chunk).await?;
        let (embedded, _) = self.embed_and_index(std::slice::from_ref(chunk)).await;
        if embedded == 0 {
            if let Err(e) = self.vectors.delete_chunks(std::slice::from_ref(&chunk.id)).await {
                tracing::warn!(chunk = %chunk.id, error = %e, "failed to drop stale vector");
            }
        }
        Ok(embedded == 1)
    }

    /// Apply a [`ChunkPatch`] and re-index the result.
    pub async fn patch_chunk(&self, chunk_id: &str, patch: ChunkPatch) -> Result<Chunk> {
        let mut chunk = self.require_chunk(chunk_id).await?;
        if let Some(text) = patch.text {
            if text.trim().is_empty() {
                return Err(PipelineError::Validation("chunk text must not be empty".into()).into());
            }
            chunk.text = text;
        }
        if let Some(chunk_type) = patch.chunk_type {
            chunk.chunk_type = chunk_type;
        }
        if let Some(priority) = patch.priority {
            chunk.priority = priority;
        }
        if let Some(tags) = patch.tags {
            chunk.tags = tags;
        }
        if patch.optimization_notes.is_some() {
            chunk.optimization_notes = patch.optimization_notes;
        }

        let embedded = self.update_chunk(&chunk).await?;
        tracing::info!(chunk = chunk_id, embedded, "chunk updated");
        Ok(chunk)
    }

    /// Append chunks to an existing PRD, indexing and linking them.
    /// A graph failure removes the appended chunks again.
    pub async fn add_chunks(&self, prd_id: &str, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        store::append_chunks(&self.pool, prd_id, chunks).await?;
        self.embed_and_index(chunks).await;

        if let Err(e) = self.link_chunks(prd_id, chunks).await {
            let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
            tracing::warn!(prd = prd_id, chunks = ids.len(), error = %e, "graph write failed, rolling back");
            if let Err(e) = self.vectors.delete_chunks(&ids).await {
                tracing::warn!(prd = prd_id, error = %e, "rollback: vector cleanup failed");
            }
            if let Err(e) = store::delete_chunks(&self.pool, &ids).await {
                tracing::error!(prd = prd_id, error = %e, "rollback: document cleanup failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn link_chunks(&self, prd_id: &str, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.graph.upsert_chunk_node(chunk).await?;
            self.graph.link_chunk_to_prd(&chunk.id, prd_id).await?;
        }
        Ok(())
    }

    // ============ Embedding maintenance ============

    fn require_embeddings(&self) -> Result<()> {
        if !self.config.embedding.is_enabled() {
            return Err(PipelineError::Validation(
                "Embedding provider is disabled. Set [embedding] provider in config.".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Embed chunks whose vector is missing or stale.
    pub async fn embed_pending(&self, prd_id: Option<&str>, limit: Option<usize>) -> Result<EmbedReport> {
        self.require_embeddings()?;
        let chunks =
            store::pending_chunks(&self.pool, self.provider.model_name(), prd_id, limit).await?;
        let (embedded, failed) = self.embed_and_index(&chunks).await;
        Ok(EmbedReport {
            total: chunks.len(),
            embedded,
            failed,
        })
    }

    /// Number of chunks `embed_pending` would pick up.
    pub async fn pending_embeddings(&self, prd_id: Option<&str>) -> Result<usize> {
        let pending =
            store::pending_chunks(&self.pool, self.provider.model_name(), prd_id, None).await?;
        Ok(pending.len())
    }

    /// Drop embedding state and re-embed every chunk of one PRD.
    pub async fn reindex(&self, prd_id: &str) -> Result<EmbedReport> {
        self.require_embeddings()?;
        if !store::prd_exists(&self.pool, prd_id).await? {
            return Err(PipelineError::prd_not_found(prd_id).into());
        }
        store::clear_embeddings(&self.pool, Some(prd_id)).await?;
        self.embed_pending(Some(prd_id), None).await
    }

    /// Drop all embedding state and re-embed everything.
    pub async fn embed_rebuild(&self) -> Result<EmbedReport> {
        self.require_embeddings()?;
        store::clear_embeddings(&self.pool, None).await?;
        self.embed_pending(None, None).await
    }

    // ============ Search ============

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(PipelineError::Validation("query must not be empty".into()).into());
        }
        if mode.needs_embeddings() && !self.config.embedding.is_enabled() {
            return Err(PipelineError::Validation(format!(
                "Mode '{}' requires embeddings. Set [embedding] provider in config.",
                mode.as_str()
            ))
            .into());
        }

        let candidate_k = self.config.retrieval.candidate_k.max(limit as i64);

        match mode {
            SearchMode::Semantic => {
                let vector = self.embed_query(query).await?;
                let hits = self.vectors.search(&vector, limit, filters, Some(0.0)).await?;
                Ok(hits.into_iter().map(SearchHit::from).collect())
            }
            SearchMode::Keyword => {
                let keyword = self.keyword_candidates(query, filters, candidate_k).await?;
                Ok(merge_hybrid(&keyword, &[], 0.0, limit))
            }
            SearchMode::Hybrid => {
                let keyword = self.keyword_candidates(query, filters, candidate_k).await?;
                let vector = self.embed_query(query).await?;
                let semantic: Vec<Candidate> = self
                    .vectors
                    .search(&vector, candidate_k as usize, filters, None)
                    .await?
                    .into_iter()
                    .map(|hit| Candidate {
                        chunk_id: hit.chunk_id,
                        raw_score: hit.score,
                        payload: hit.payload,
                    })
                    .collect();
                Ok(merge_hybrid(
                    &keyword,
                    &semantic,
                    self.config.retrieval.hybrid_alpha,
                    limit,
                ))
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        embedding::embed_query(self.provider.as_ref(), &self.config.embedding, query)
            .await
            .context("embedding search query")
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        filters: &SearchFilters,
        candidate_k: i64,
    ) -> Result<Vec<Candidate>> {
        let rows =
            store::keyword_candidates(&self.pool, query, filters.prd_id.as_deref(), candidate_k)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(chunk, score)| Candidate {
                chunk_id: chunk.id.clone(),
                raw_score: score,
                payload: ChunkPayload::from(&chunk),
            })
            .filter(|c| filters.matches(&c.payload))
            .collect())
    }

    // ============ Graph views ============

    async fn require_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        store::get_chunk(&self.pool, chunk_id)
            .await?
            .ok_or_else(|| PipelineError::chunk_not_found(chunk_id).into())
    }

    /// One-hop relationships plus transitive dependencies both ways.
    pub async fn chunk_context(&self, chunk_id: &str, max_depth: usize) -> Result<ChunkContext> {
        self.require_chunk(chunk_id).await?;

        if !self.graph.is_enabled() {
            return Ok(ChunkContext {
                chunk_id: chunk_id.to_string(),
                relationships: ChunkRelationships::default(),
                dependencies: Vec::new(),
                dependents: Vec::new(),
                related: Vec::new(),
                note: Some("Graph features disabled".into()),
            });
        }

        let depth = self.clamp_depth(max_depth);
        Ok(ChunkContext {
            chunk_id: chunk_id.to_string(),
            relationships: self.graph.relationships(chunk_id).await?,
            dependencies: self
                .graph
                .dependencies(chunk_id, depth, Direction::Outgoing)
                .await?,
            dependents: self
                .graph
                .dependencies(chunk_id, depth, Direction::Incoming)
                .await?,
            related: self.graph.related(chunk_id, RELATED_LIMIT).await?,
            note: None,
        })
    }

    /// Stored chunks linked to `chunk_id` by a `rel_type` edge, in either
    /// direction.
    pub async fn linked_chunks(&self, chunk_id: &str, rel_type: RelationshipType) -> Result<Vec<Chunk>> {
        self.require_chunk(chunk_id).await?;
        let mut linked = Vec::new();
        for related in self.graph.related(chunk_id, RELATED_LIMIT).await? {
            if related.relationship_type != rel_type.as_str() {
                continue;
            }
            if let Some(chunk) = store::get_chunk(&self.pool, &related.node.chunk_id).await? {
                linked.push(chunk);
            }
        }
        Ok(linked)
    }

    fn clamp_depth(&self, depth: usize) -> usize {
        depth.clamp(1, self.config.graph.max_depth.max(1))
    }

    pub async fn dependency_report(&self, chunk_id: &str, depth: usize) -> Result<DependencyReport> {
        self.require_chunk(chunk_id).await?;
        let depth = self.clamp_depth(depth);

        let upstream = self
            .graph
            .dependencies(chunk_id, depth, Direction::Outgoing)
            .await?;
        let downstream: HashSet<String> = self
            .graph
            .dependencies(chunk_id, depth, Direction::Incoming)
            .await?
            .into_iter()
            .map(|n| n.chunk_id)
            .collect();

        let circular = upstream
            .iter()
            .filter(|n| downstream.contains(&n.chunk_id))
            .cloned()
            .collect();
        let (direct, transitive) = upstream
            .into_iter()
            .partition(|n| n.depth.unwrap_or(1) <= 1);

        Ok(DependencyReport {
            chunk_id: chunk_id.to_string(),
            direct,
            transitive,
            circular,
        })
    }

    /// Chunks that depend directly on this one.
    pub async fn dependents(&self, chunk_id: &str) -> Result<Vec<ChunkNode>> {
        self.require_chunk(chunk_id).await?;
        self.graph.dependencies(chunk_id, 1, Direction::Incoming).await
    }

    pub async fn create_manual_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        strength: Option<f64>,
    ) -> Result<Relationship> {
        if !self.graph.is_enabled() {
            return Err(PipelineError::Validation("Graph features disabled".into()).into());
        }
        self.require_chunk(source_id).await?;
        self.require_chunk(target_id).await?;

        let rel = Relationship {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            rel_type,
            strength: strength.unwrap_or(1.0),
            origin: ORIGIN_MANUAL.to_string(),
        };
        if !self.graph.create_relationship(&rel).await? {
            return Err(PipelineError::NotFound(format!(
                "Graph node for {} or {}",
                source_id, target_id
            ))
            .into());
        }
        tracing::info!(source = source_id, target = target_id, rel = %rel_type, "relationship created");
        Ok(rel)
    }

    pub async fn coverage(&self, prd_id: &str, kind: RelationshipType) -> Result<Coverage> {
        if !store::prd_exists(&self.pool, prd_id).await? {
            return Err(PipelineError::prd_not_found(prd_id).into());
        }
        self.graph.coverage(prd_id, kind).await
    }

    // ============ Documents ============

    pub async fn list_prds(&self) -> Result<Vec<PrdSummary>> {
        store::list_prds(&self.pool).await
    }

    pub async fn load_prd(&self, prd_id: &str) -> Result<Prd> {
        store::get_prd(&self.pool, prd_id)
            .await?
            .ok_or_else(|| PipelineError::prd_not_found(prd_id).into())
    }

    /// PRD with its sections, requirement-side chunks and test artifacts.
    pub async fn get_prd(&self, prd_id: &str) -> Result<PrdDetails> {
        let prd = self.load_prd(prd_id).await?;
        let all = store::prd_chunks(&self.pool, prd_id).await?;

        let tests: Vec<Chunk> = all.iter().filter(|c| c.chunk_type.is_test()).cloned().collect();
        let chunks: Vec<Chunk> = all.into_iter().filter(|c| !c.chunk_type.is_artifact()).collect();

        Ok(PrdDetails {
            id: prd.id,
            name: prd.name,
            description: prd.description,
            created_at: prd.created_at.to_rfc3339(),
            updated_at: prd.updated_at.to_rfc3339(),
            sections: prd.sections,
            chunk_count: chunks.len(),
            test_count: tests.len(),
            chunks,
            tests,
        })
    }

    pub async fn prd_chunks(&self, prd_id: &str) -> Result<Vec<Chunk>> {
        if !store::prd_exists(&self.pool, prd_id).await? {
            return Err(PipelineError::prd_not_found(prd_id).into());
        }
        store::prd_chunks(&self.pool, prd_id).await
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        self.require_chunk(chunk_id).await
    }

    /// Remove a PRD from the vector index, the graph and the document store.
    pub async fn delete_prd(&self, prd_id: &str) -> Result<()> {
        if !store::prd_exists(&self.pool, prd_id).await? {
            return Err(PipelineError::prd_not_found(prd_id).into());
        }
        self.vectors.delete_prd(prd_id).await?;
        self.graph.delete_prd(prd_id).await?;
        store::delete_prd(&self.pool, prd_id).await?;
        tracing::info!(prd = prd_id, "deleted PRD");
        Ok(())
    }

    // ============ Status ============

    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            documents: store::counts(&self.pool).await?,
            graph: self.graph.stats().await?,
            vector: self.vectors.info().await?,
        })
    }

    pub fn health(&self) -> Health {
        let embeddings = if self.config.embedding.is_enabled() {
            format!("{}:{}", self.config.embedding.provider, self.provider.model_name())
        } else {
            "disabled".to_string()
        };
        Health {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            services: HealthServices {
                vector_db: self.vectors.backend().to_string(),
                graph_db: self.graph.backend().to_string(),
                database: "sqlite".to_string(),
                embeddings,
            },
        }
    }
}
