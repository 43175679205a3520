//! Knowledge graph of PRDs, chunks and typed chunk-to-chunk edges.
//!
//! Chunks point at their PRD with `BELONGS_TO`; chunk edges carry a
//! [`RelationshipType`], a strength and an origin. Creating an edge that
//! already exists updates it in place, so there is at most one edge per
//! (source, target, type).
//!
//! Backends:
//! - **[`SqliteGraph`]**: `graph_nodes`/`graph_edges` tables, traversal by
//!   recursive CTE. The default.
//! - **[`Neo4jGraph`]**: Neo4j over the HTTP transactional Cypher endpoint.
//! - **[`DisabledGraph`]**: reads return nothing, writes are dropped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GraphConfig;
use crate::models::{Chunk, ChunkType, Prd, Relationship, RelationshipType};

const BELONGS_TO: &str = "BELONGS_TO";

/// Traversal direction for dependency queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// What the chunk depends on.
    #[default]
    Outgoing,
    /// What depends on the chunk.
    Incoming,
}

/// A chunk as seen from the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkNode {
    pub chunk_id: String,
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub text: String,
    pub priority: String,
    /// Hops from the start chunk, for traversals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedChunk {
    #[serde(flatten)]
    pub node: ChunkNode,
    pub relationship_type: String,
}

/// One-hop neighbourhood of a chunk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkRelationships {
    pub dependencies: Vec<ChunkNode>,
    pub references: Vec<ChunkNode>,
    pub dependents: Vec<ChunkNode>,
    pub children: Vec<ChunkNode>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub total_chunks: i64,
    pub dependency_count: i64,
    pub reference_count: i64,
    /// All chunk-to-chunk edges, any type.
    pub relationship_count: i64,
}

/// Share of requirement/feature/constraint chunks covered by artifact edges.
#[derive(Debug, Clone, Serialize)]
pub struct Coverage {
    pub prd_id: String,
    pub total_requirements: i64,
    pub covered_requirements: i64,
    pub uncovered_requirements: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tests: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_docs: Option<i64>,
    pub coverage_percent: f64,
}

impl Coverage {
    fn new(prd_id: &str, kind: RelationshipType, total: i64, covered: i64, artifacts: i64) -> Self {
        let percent = if total > 0 {
            ((covered as f64 / total as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        let (total_tests, total_docs) = match kind {
            RelationshipType::Documents => (None, Some(artifacts)),
            _ => (Some(artifacts), None),
        };
        Self {
            prd_id: prd_id.to_string(),
            total_requirements: total,
            covered_requirements: covered,
            uncovered_requirements: total - covered,
            total_tests,
            total_docs,
            coverage_percent: percent,
        }
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Create indexes/constraints the backend needs. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    async fn upsert_prd_node(&self, prd: &Prd) -> Result<()>;

    async fn upsert_chunk_node(&self, chunk: &Chunk) -> Result<()>;

    async fn link_chunk_to_prd(&self, chunk_id: &str, prd_id: &str) -> Result<()>;

    /// Create or update an edge. Returns `false` when either endpoint is missing.
    async fn create_relationship(&self, rel: &Relationship) -> Result<bool>;

    /// Transitive `DEPENDS_ON` chunks up to `depth` hops, nearest first.
    async fn dependencies(
        &self,
        chunk_id: &str,
        depth: usize,
        direction: Direction,
    ) -> Result<Vec<ChunkNode>>;

    async fn relationships(&self, chunk_id: &str) -> Result<ChunkRelationships>;

    /// Neighbours over any chunk edge, either direction.
    async fn related(&self, chunk_id: &str, limit: usize) -> Result<Vec<RelatedChunk>>;

    async fn stats(&self) -> Result<GraphStats>;

    async fn coverage(&self, prd_id: &str, kind: RelationshipType) -> Result<Coverage>;

    async fn delete_prd(&self, prd_id: &str) -> Result<()>;
}

/// Build the configured graph backend.
pub fn create_graph_store(config: &GraphConfig, pool: &SqlitePool) -> Result<Arc<dyn GraphStore>> {
    let store: Arc<dyn GraphStore> = match config.backend.as_str() {
        "sqlite" => Arc::new(SqliteGraph::new(pool.clone())),
        "neo4j" => Arc::new(Neo4jGraph::new(config)?),
        "disabled" => Arc::new(DisabledGraph),
        other => anyhow::bail!("Unknown graph backend: {}", other),
    };
    Ok(store)
}

fn coverable_types_sql() -> String {
    ChunkType::ALL
        .iter()
        .filter(|t| t.is_coverable())
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============ SQLite ============

pub struct SqliteGraph {
    pool: SqlitePool,
}

impl SqliteGraph {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn count_edges(&self, rel_type: RelationshipType) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM graph_edges WHERE rel_type = ?")
            .bind(rel_type.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn neighbours(&self, sql: &str, chunk_id: &str) -> Result<Vec<ChunkNode>> {
        let rows = sqlx::query(sql).bind(chunk_id).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| node_from_row(row, false)).collect())
    }
}

fn node_from_row(row: &sqlx::sqlite::SqliteRow, with_depth: bool) -> ChunkNode {
    ChunkNode {
        chunk_id: row.get("id"),
        chunk_type: row.get::<Option<String>, _>("chunk_type").unwrap_or_default(),
        text: row.get::<Option<String>, _>("text").unwrap_or_default(),
        priority: row.get::<Option<String>, _>("priority").unwrap_or_default(),
        depth: if with_depth { Some(row.get("depth")) } else { None },
    }
}

#[async_trait]
impl GraphStore for SqliteGraph {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_prd_node(&self, prd: &Prd) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, kind, prd_id, label, text)
            VALUES (?, 'prd', ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET label = excluded.label, text = excluded.text
            "#,
        )
        .bind(&prd.id)
        .bind(&prd.id)
        .bind(&prd.name)
        .bind(prd.description.as_deref().unwrap_or(""))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_chunk_node(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, kind, prd_id, label, chunk_type, priority, text)
            VALUES (?, 'chunk', ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                prd_id = excluded.prd_id,
                label = excluded.label,
                chunk_type = excluded.chunk_type,
                priority = excluded.priority,
                text = excluded.text
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.prd_id)
        .bind(&chunk.section_title)
        .bind(chunk.chunk_type.as_str())
        .bind(chunk.priority.as_str())
        .bind(&chunk.text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn link_chunk_to_prd(&self, chunk_id: &str, prd_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_edges (source_id, target_id, rel_type, strength, origin, created_at)
            VALUES (?, ?, ?, 1.0, 'structure', ?)
            ON CONFLICT(source_id, target_id, rel_type) DO NOTHING
            "#,
        )
        .bind(chunk_id)
        .bind(prd_id)
        .bind(BELONGS_TO)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_relationship(&self, rel: &Relationship) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO graph_edges (source_id, target_id, rel_type, strength, origin, created_at)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM graph_nodes WHERE id = ? AND kind = 'chunk')
              AND EXISTS (SELECT 1 FROM graph_nodes WHERE id = ? AND kind = 'chunk')
            ON CONFLICT(source_id, target_id, rel_type) DO UPDATE SET
                strength = excluded.strength,
                origin = excluded.origin
            "#,
        )
        .bind(&rel.source_id)
        .bind(&rel.target_id)
        .bind(rel.rel_type.as_str())
        .bind(rel.strength)
        .bind(&rel.origin)
        .bind(chrono::Utc::now().timestamp())
        .bind(&rel.source_id)
        .bind(&rel.target_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn dependencies(
        &self,
        chunk_id: &str,
        depth: usize,
        direction: Direction,
    ) -> Result<Vec<ChunkNode>> {
        let (from_col, to_col) = match direction {
            Direction::Outgoing => ("source_id", "target_id"),
            Direction::Incoming => ("target_id", "source_id"),
        };
        let sql = format!(
            r#"
            WITH RECURSIVE walk(id, depth) AS (
                SELECT {to}, 1 FROM graph_edges
                WHERE {from} = ?1 AND rel_type = 'DEPENDS_ON'
                UNION
                SELECT e.{to}, w.depth + 1
                FROM graph_edges e JOIN walk w ON e.{from} = w.id
                WHERE e.rel_type = 'DEPENDS_ON' AND w.depth < ?2
            )
            SELECT n.id, n.chunk_type, n.text, n.priority, MIN(w.depth) AS depth
            FROM walk w JOIN graph_nodes n ON n.id = w.id
            WHERE n.id != ?1 AND n.kind = 'chunk'
            GROUP BY n.id, n.chunk_type, n.text, n.priority
            ORDER BY depth, n.id
            "#,
            from = from_col,
            to = to_col
        );

        let rows = sqlx::query(&sql)
            .bind(chunk_id)
            .bind(depth.max(1) as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| node_from_row(row, true)).collect())
    }

    async fn relationships(&self, chunk_id: &str) -> Result<ChunkRelationships> {
        let outgoing = |rel: &str| {
            format!(
                "SELECT n.id, n.chunk_type, n.text, n.priority FROM graph_edges e \
                 JOIN graph_nodes n ON n.id = e.target_id \
                 WHERE e.source_id = ? AND e.rel_type = '{}' ORDER BY n.id",
                rel
            )
        };
        let dependents_sql = "SELECT n.id, n.chunk_type, n.text, n.priority FROM graph_edges e \
             JOIN graph_nodes n ON n.id = e.source_id \
             WHERE e.target_id = ? AND e.rel_type = 'DEPENDS_ON' ORDER BY n.id";

        Ok(ChunkRelationships {
            dependencies: self.neighbours(&outgoing("DEPENDS_ON"), chunk_id).await?,
            references: self.neighbours(&outgoing("REFERENCES"), chunk_id).await?,
            dependents: self.neighbours(dependents_sql, chunk_id).await?,
            children: self.neighbours(&outgoing("PARENT_OF"), chunk_id).await?,
        })
    }

    async fn related(&self, chunk_id: &str, limit: usize) -> Result<Vec<RelatedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT n.id, n.chunk_type, n.text, n.priority, x.rel_type, x.strength
            FROM (
                SELECT target_id AS other, rel_type, strength FROM graph_edges
                WHERE source_id = ?1 AND rel_type != 'BELONGS_TO'
                UNION
                SELECT source_id AS other, rel_type, strength FROM graph_edges
                WHERE target_id = ?1 AND rel_type != 'BELONGS_TO'
            ) x
            JOIN graph_nodes n ON n.id = x.other AND n.kind = 'chunk'
            ORDER BY x.strength DESC, n.id, x.rel_type
            LIMIT ?2
            "#,
        )
        .bind(chunk_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RelatedChunk {
                node: node_from_row(row, false),
                relationship_type: row.get("rel_type"),
            })
            .collect())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let total_chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM graph_nodes WHERE kind = 'chunk'")
                .fetch_one(&self.pool)
                .await?;
        let dependency_count = self.count_edges(RelationshipType::DependsOn).await?;
        let reference_count = self.count_edges(RelationshipType::References).await?;
        let relationship_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM graph_edges WHERE rel_type != 'BELONGS_TO'")
                .fetch_one(&self.pool)
                .await?;

        Ok(GraphStats {
            total_chunks,
            dependency_count,
            reference_count,
            relationship_count,
        })
    }

    async fn coverage(&self, prd_id: &str, kind: RelationshipType) -> Result<Coverage> {
        let types = coverable_types_sql();

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM graph_nodes WHERE kind = 'chunk' AND prd_id = ? AND chunk_type IN ({})",
            types
        ))
        .bind(prd_id)
        .fetch_one(&self.pool)
        .await?;

        let covered: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(DISTINCT e.target_id) FROM graph_edges e \
             JOIN graph_nodes n ON n.id = e.target_id \
             WHERE e.rel_type = ? AND n.prd_id = ? AND n.chunk_type IN ({})",
            types
        ))
        .bind(kind.as_str())
        .bind(prd_id)
        .fetch_one(&self.pool)
        .await?;

        let artifacts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM graph_edges e \
             JOIN graph_nodes n ON n.id = e.target_id \
             WHERE e.rel_type = ? AND n.prd_id = ? AND n.kind = 'chunk'",
        )
        .bind(kind.as_str())
        .bind(prd_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Coverage::new(prd_id, kind, total, covered, artifacts))
    }

    async fn delete_prd(&self, prd_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM graph_edges
            WHERE source_id IN (SELECT id FROM graph_nodes WHERE prd_id = ?1)
               OR target_id IN (SELECT id FROM graph_nodes WHERE prd_id = ?1)
            "#,
        )
        .bind(prd_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM graph_nodes WHERE prd_id = ?")
            .bind(prd_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ============ Neo4j ============

/// Neo4j reached through `POST /db/{database}/tx/commit`.
pub struct Neo4jGraph {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jGraph {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let password = std::env::var(&config.password_env)
            .with_context(|| format!("{} environment variable not set", config.password_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                config.url.trim_end_matches('/'),
                config.database
            ),
            user: config.user.clone(),
            password,
        })
    }

    /// Run one Cypher statement and return its rows.
    async fn run(
        &self,
        statement: &str,
        parameters: serde_json::Value,
    ) -> Result<Vec<Vec<serde_json::Value>>> {
        let body = serde_json::json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Cannot reach Neo4j at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Neo4j request failed ({}): {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_neo4j_rows(&json)
    }

    async fn nodes(&self, statement: &str, chunk_id: &str) -> Result<Vec<ChunkNode>> {
        let rows = self.run(statement, serde_json::json!({ "id": chunk_id })).await?;
        Ok(rows.iter().filter_map(|r| node_from_cells(r)).collect())
    }

    async fn count(&self, statement: &str, parameters: serde_json::Value) -> Result<i64> {
        let rows = self.run(statement, parameters).await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }
}

/// Extract `results[0].data[].row` from a transactional endpoint response.
pub fn parse_neo4j_rows(json: &serde_json::Value) -> Result<Vec<Vec<serde_json::Value>>> {
    if let Some(err) = json
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
    {
        let code = err.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let message = err.get("message").and_then(|m| m.as_str()).unwrap_or("");
        anyhow::bail!("Neo4j error {}: {}", code, message);
    }

    let data = json
        .get("results")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("data"))
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();

    Ok(data
        .into_iter()
        .filter_map(|d| d.get("row").and_then(|r| r.as_array()).cloned())
        .collect())
}

/// Cells `[id, type, text, priority, depth?]` into a node.
fn node_from_cells(cells: &[serde_json::Value]) -> Option<ChunkNode> {
    let text_at = |i: usize| {
        cells
            .get(i)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let chunk_id = cells.first()?.as_str()?.to_string();
    Some(ChunkNode {
        chunk_id,
        chunk_type: text_at(1),
        text: text_at(2),
        priority: text_at(3),
        depth: cells.get(4).and_then(|v| v.as_i64()),
    })
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    fn backend(&self) -> &str {
        "neo4j"
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in [
            "CREATE CONSTRAINT prd_id IF NOT EXISTS FOR (p:PRD) REQUIRE p.id IS UNIQUE",
            "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
            "CREATE INDEX chunk_prd IF NOT EXISTS FOR (c:Chunk) ON (c.prd_id)",
        ] {
            self.run(statement, serde_json::json!({})).await?;
        }
        Ok(())
    }

    async fn upsert_prd_node(&self, prd: &Prd) -> Result<()> {
        self.run(
            "MERGE (p:PRD {id: $id}) SET p.name = $name, p.description = $description",
            serde_json::json!({
                "id": prd.id,
                "name": prd.name,
                "description": prd.description.as_deref().unwrap_or(""),
            }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_chunk_node(&self, chunk: &Chunk) -> Result<()> {
        self.run(
            "MERGE (c:Chunk {id: $id}) \
             SET c.prd_id = $prd_id, c.type = $type, c.text = $text, \
                 c.priority = $priority, c.section_title = $section_title",
            serde_json::json!({
                "id": chunk.id,
                "prd_id": chunk.prd_id,
                "type": chunk.chunk_type.as_str(),
                "text": chunk.text,
                "priority": chunk.priority.as_str(),
                "section_title": chunk.section_title,
            }),
        )
        .await?;
        Ok(())
    }

    async fn link_chunk_to_prd(&self, chunk_id: &str, prd_id: &str) -> Result<()> {
        self.run(
            "MATCH (c:Chunk {id: $chunk_id}) MATCH (p:PRD {id: $prd_id}) MERGE (c)-[:BELONGS_TO]->(p)",
            serde_json::json!({ "chunk_id": chunk_id, "prd_id": prd_id }),
        )
        .await?;
        Ok(())
    }

    async fn create_relationship(&self, rel: &Relationship) -> Result<bool> {
        // Relationship types cannot be parameters; as_str() is a fixed identifier.
        let statement = format!(
            "MATCH (a:Chunk {{id: $source}}) MATCH (b:Chunk {{id: $target}}) \
             MERGE (a)-[r:{}]->(b) SET r.strength = $strength, r.origin = $origin \
             RETURN count(r)",
            rel.rel_type.as_str()
        );
        let created = self
            .count(
                &statement,
                serde_json::json!({
                    "source": rel.source_id,
                    "target": rel.target_id,
                    "strength": rel.strength,
                    "origin": rel.origin,
                }),
            )
            .await?;
        Ok(created > 0)
    }

    async fn dependencies(
        &self,
        chunk_id: &str,
        depth: usize,
        direction: Direction,
    ) -> Result<Vec<ChunkNode>> {
        let pattern = match direction {
            Direction::Outgoing => "(c:Chunk {id: $id})-[:DEPENDS_ON*1..%d]->(dep:Chunk)",
            Direction::Incoming => "(dep:Chunk)-[:DEPENDS_ON*1..%d]->(c:Chunk {id: $id})",
        }
        .replace("%d", &depth.max(1).to_string());
        let statement = format!(
            "MATCH p = {} WHERE dep.id <> $id \
             RETURN dep.id, dep.type, dep.text, dep.priority, min(length(p)) AS depth \
             ORDER BY depth, dep.id",
            pattern
        );
        self.nodes(&statement, chunk_id).await
    }

    async fn relationships(&self, chunk_id: &str) -> Result<ChunkRelationships> {
        let outgoing = |rel: &str| {
            format!(
                "MATCH (c:Chunk {{id: $id}})-[:{}]->(n:Chunk) \
                 RETURN n.id, n.type, n.text, n.priority ORDER BY n.id",
                rel
            )
        };
        Ok(ChunkRelationships {
            dependencies: self.nodes(&outgoing("DEPENDS_ON"), chunk_id).await?,
            references: self.nodes(&outgoing("REFERENCES"), chunk_id).await?,
            dependents: self
                .nodes(
                    "MATCH (n:Chunk)-[:DEPENDS_ON]->(c:Chunk {id: $id}) \
                     RETURN n.id, n.type, n.text, n.priority ORDER BY n.id",
                    chunk_id,
                )
                .await?,
            children: self.nodes(&outgoing("PARENT_OF"), chunk_id).await?,
        })
    }

    async fn related(&self, chunk_id: &str, limit: usize) -> Result<Vec<RelatedChunk>> {
        let rows = self
            .run(
                "MATCH (c:Chunk {id: $id})-[r]-(n:Chunk) \
                 RETURN DISTINCT n.id, n.type, n.text, n.priority, type(r) AS rel, r.strength AS strength \
                 ORDER BY strength DESC, n.id LIMIT $limit",
                serde_json::json!({ "id": chunk_id, "limit": limit }),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|cells| {
                let relationship_type = cells.get(4)?.as_str()?.to_string();
                let node = node_from_cells(&cells[..4])?;
                Some(RelatedChunk {
                    node,
                    relationship_type,
                })
            })
            .collect())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let none = || serde_json::json!({});
        Ok(GraphStats {
            total_chunks: self.count("MATCH (c:Chunk) RETURN count(c)", none()).await?,
            dependency_count: self
                .count("MATCH (:Chunk)-[r:DEPENDS_ON]->(:Chunk) RETURN count(r)", none())
                .await?,
            reference_count: self
                .count("MATCH (:Chunk)-[r:REFERENCES]->(:Chunk) RETURN count(r)", none())
                .await?,
            relationship_count: self
                .count("MATCH (:Chunk)-[r]->(:Chunk) RETURN count(r)", none())
                .await?,
        })
    }

    async fn coverage(&self, prd_id: &str, kind: RelationshipType) -> Result<Coverage> {
        let types = coverable_types_sql();
        let params = || serde_json::json!({ "prd_id": prd_id });

        let total = self
            .count(
                &format!(
                    "MATCH (req:Chunk)-[:BELONGS_TO]->(:PRD {{id: $prd_id}}) \
                     WHERE req.type IN [{}] RETURN count(req)",
                    types
                ),
                params(),
            )
            .await?;
        let covered = self
            .count(
                &format!(
                    "MATCH (:Chunk)-[:{}]->(req:Chunk)-[:BELONGS_TO]->(:PRD {{id: $prd_id}}) \
                     WHERE req.type IN [{}] RETURN count(DISTINCT req)",
                    kind.as_str(),
                    types
                ),
                params(),
            )
            .await?;
        let artifacts = self
            .count(
                &format!(
                    "MATCH (a:Chunk)-[:{}]->(:Chunk)-[:BELONGS_TO]->(:PRD {{id: $prd_id}}) \
                     RETURN count(a)",
                    kind.as_str()
                ),
                params(),
            )
            .await?;

        Ok(Coverage::new(prd_id, kind, total, covered, artifacts))
    }

    async fn delete_prd(&self, prd_id: &str) -> Result<()> {
        self.run(
            "MATCH (c:Chunk)-[:BELONGS_TO]->(:PRD {id: $prd_id}) DETACH DELETE c",
            serde_json::json!({ "prd_id": prd_id }),
        )
        .await?;
        self.run(
            "MATCH (p:PRD {id: $prd_id}) DETACH DELETE p",
            serde_json::json!({ "prd_id": prd_id }),
        )
        .await?;
        Ok(())
    }
}

// ============ Disabled ============

pub struct DisabledGraph;

#[async_trait]
impl GraphStore for DisabledGraph {
    fn backend(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_prd_node(&self, _prd: &Prd) -> Result<()> {
        Ok(())
    }

    async fn upsert_chunk_node(&self, _chunk: &Chunk) -> Result<()> {
        Ok(())
    }

    async fn link_chunk_to_prd(&self, _chunk_id: &str, _prd_id: &str) -> Result<()> {
        Ok(())
    }

    async fn create_relationship(&self, _rel: &Relationship) -> Result<bool> {
        Ok(false)
    }

    async fn dependencies(
        &self,
        _chunk_id: &str,
        _depth: usize,
        _direction: Direction,
    ) -> Result<Vec<ChunkNode>> {
        Ok(Vec::new())
    }

    async fn relationships(&self, _chunk_id: &str) -> Result<ChunkRelationships> {
        Ok(ChunkRelationships::default())
    }

    async fn related(&self, _chunk_id: &str, _limit: usize) -> Result<Vec<RelatedChunk>> {
        Ok(Vec::new())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats::default())
    }

    async fn coverage(&self, prd_id: &str, kind: RelationshipType) -> Result<Coverage> {
        Ok(Coverage::new(prd_id, kind, 0, 0, 0))
    }

    async fn delete_prd(&self, _prd_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{context_prefix, Priority, ORIGIN_MANUAL};

    async fn setup() -> (tempfile::TempDir, SqliteGraph) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_db_path(dir.path().join("graph.sqlite"));
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (dir, SqliteGraph::new(pool))
    }

    fn chunk(id: &str, prd_id: &str, chunk_type: ChunkType) -> Chunk {
        Chunk {
            id: id.to_string(),
            prd_id: prd_id.to_string(),
            chunk_type,
            text: format!("text of {}", id),
            context_prefix: context_prefix("P", id),
            priority: Priority::Medium,
            tags: vec![],
            section_title: id.to_string(),
            part_index: 0,
            optimized: false,
            optimization_notes: None,
        }
    }

    fn edge(src: &str, tgt: &str, rel_type: RelationshipType) -> Relationship {
        Relationship::heuristic(src, tgt, rel_type)
    }

    async fn seed(graph: &SqliteGraph, prd_id: &str, chunks: &[Chunk]) {
        let prd = Prd {
            id: prd_id.to_string(),
            ..Prd::new("P", None, vec![])
        };
        graph.upsert_prd_node(&prd).await.unwrap();
        for c in chunks {
            graph.upsert_chunk_node(c).await.unwrap();
            graph.link_chunk_to_prd(&c.id, prd_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_transitive_dependencies_nearest_first() {
        let (_dir, graph) = setup().await;
        let chunks: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| chunk(id, "p1", ChunkType::Feature))
            .collect();
        seed(&graph, "p1", &chunks).await;
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")] {
            assert!(graph.create_relationship(&edge(s, t, RelationshipType::DependsOn)).await.unwrap());
        }

        let deps = graph.dependencies("a", 2, Direction::Outgoing).await.unwrap();
        let ids: Vec<_> = deps.iter().map(|n| (n.chunk_id.as_str(), n.depth)).collect();
        assert_eq!(ids, vec![("b", Some(1)), ("c", Some(2))]);

        // The cycle back to "a" is excluded.
        let all = graph.dependencies("a", 10, Direction::Outgoing).await.unwrap();
        assert_eq!(all.len(), 3);

        let dependents = graph.dependencies("a", 1, Direction::Incoming).await.unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].chunk_id, "d");
    }

    #[tokio::test]
    async fn test_merge_semantics_and_missing_endpoints() {
        let (_dir, graph) = setup().await;
        seed(&graph, "p1", &[chunk("a", "p1", ChunkType::Feature), chunk("b", "p1", ChunkType::Requirement)]).await;

        assert!(graph.create_relationship(&edge("a", "b", RelationshipType::Implements)).await.unwrap());
        let manual = Relationship {
            strength: 0.3,
            origin: ORIGIN_MANUAL.to_string(),
            ..edge("a", "b", RelationshipType::Implements)
        };
        assert!(graph.create_relationship(&manual).await.unwrap());
        assert_eq!(graph.stats().await.unwrap().relationship_count, 1);

        assert!(!graph.create_relationship(&edge("a", "zzz", RelationshipType::References)).await.unwrap());

        let related = graph.related("b", 10).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].node.chunk_id, "a");
        assert_eq!(related[0].relationship_type, "IMPLEMENTS");
    }

    #[tokio::test]
    async fn test_relationships_one_hop() {
        let (_dir, graph) = setup().await;
        let chunks: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| chunk(id, "p1", ChunkType::Feature))
            .collect();
        seed(&graph, "p1", &chunks).await;
        graph.create_relationship(&edge("a", "b", RelationshipType::DependsOn)).await.unwrap();
        graph.create_relationship(&edge("a", "c", RelationshipType::References)).await.unwrap();
        graph.create_relationship(&edge("d", "a", RelationshipType::DependsOn)).await.unwrap();
        graph.create_relationship(&edge("a", "d", RelationshipType::ParentOf)).await.unwrap();

        let rels = graph.relationships("a").await.unwrap();
        assert_eq!(rels.dependencies[0].chunk_id, "b");
        assert_eq!(rels.references[0].chunk_id, "c");
        assert_eq!(rels.dependents[0].chunk_id, "d");
        assert_eq!(rels.children[0].chunk_id, "d");

        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.dependency_count, 2);
        assert_eq!(stats.reference_count, 1);
        assert_eq!(stats.relationship_count, 4);
    }

    #[tokio::test]
    async fn test_coverage_and_delete() {
        let (_dir, graph) = setup().await;
        seed(
            &graph,
            "p1",
            &[
                chunk("r1", "p1", ChunkType::Requirement),
                chunk("r2", "p1", ChunkType::Feature),
                chunk("r3", "p1", ChunkType::Risk),
                chunk("t1", "p1", ChunkType::TestCase),
                chunk("t2", "p1", ChunkType::UnitTestSpec),
            ],
        )
        .await;
        graph.create_relationship(&edge("t1", "r1", RelationshipType::Tests)).await.unwrap();
        graph.create_relationship(&edge("t2", "r1", RelationshipType::Tests)).await.unwrap();

        let cov = graph.coverage("p1", RelationshipType::Tests).await.unwrap();
        assert_eq!(cov.total_requirements, 2);
        assert_eq!(cov.covered_requirements, 1);
        assert_eq!(cov.uncovered_requirements, 1);
        assert_eq!(cov.total_tests, Some(2));
        assert_eq!(cov.total_docs, None);
        assert!((cov.coverage_percent - 50.0).abs() < 1e-9);

        let docs = graph.coverage("p1", RelationshipType::Documents).await.unwrap();
        assert_eq!(docs.covered_requirements, 0);
        assert_eq!(docs.total_docs, Some(0));

        graph.delete_prd("p1").await.unwrap();
        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.relationship_count, 0);
    }

    #[tokio::test]
    async fn test_disabled_graph_is_inert() {
        let graph = DisabledGraph;
        assert!(!graph.is_enabled());
        assert!(!graph.create_relationship(&edge("a", "b", RelationshipType::Tests)).await.unwrap());
        assert!(graph.dependencies("a", 3, Direction::Outgoing).await.unwrap().is_empty());
        assert_eq!(graph.stats().await.unwrap().total_chunks, 0);
    }

    #[test]
    fn test_parse_neo4j_rows() {
        let json = serde_json::json!({
            "results": [{"columns": ["id"], "data": [{"row": ["c1", "feature", "t", "high", 2]}]}],
            "errors": []
        });
        let rows = parse_neo4j_rows(&json).unwrap();
        let node = node_from_cells(&rows[0]).unwrap();
        assert_eq!(node.chunk_id, "c1");
        assert_eq!(node.depth, Some(2));

        let err = serde_json::json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        });
        assert!(parse_neo4j_rows(&err).unwrap_err().to_string().contains("SyntaxError"));
    }
}
