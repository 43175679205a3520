use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index cvPRD needs. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prds (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prd_sections (
            prd_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium',
            tags_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (prd_id, position),
            FOREIGN KEY (prd_id) REFERENCES prds(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            prd_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            chunk_type TEXT NOT NULL,
            text TEXT NOT NULL,
            context_prefix TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium',
            tags_json TEXT NOT NULL DEFAULT '[]',
            section_title TEXT NOT NULL,
            part_index INTEGER NOT NULL DEFAULT 0,
            optimized INTEGER NOT NULL DEFAULT 0,
            optimization_notes TEXT,
            hash TEXT NOT NULL,
            FOREIGN KEY (prd_id) REFERENCES prds(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Bookkeeping for which chunks have an up-to-date vector, whatever the backend.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            hash TEXT NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Storage for the sqlite vector backend.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            prd_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            payload_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Storage for the sqlite graph backend. Nodes are not foreign-keyed to
    // chunks so the graph can be rebuilt independently.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_nodes (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            prd_id TEXT NOT NULL,
            label TEXT NOT NULL DEFAULT '',
            chunk_type TEXT,
            priority TEXT,
            text TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_edges (
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            rel_type TEXT NOT NULL,
            strength REAL NOT NULL DEFAULT 1.0,
            origin TEXT NOT NULL DEFAULT 'heuristic',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (source_id, target_id, rel_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                prd_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_chunks_prd_id ON chunks(prd_id, position)",
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_prd_id ON chunk_vectors(prd_id)",
        "CREATE INDEX IF NOT EXISTS idx_graph_nodes_prd_id ON graph_nodes(prd_id)",
        "CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id, rel_type)",
        "CREATE INDEX IF NOT EXISTS idx_prds_created_at ON prds(created_at DESC)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
