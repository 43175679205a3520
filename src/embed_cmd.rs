//! `cvprd embed` commands: backfill and rebuild chunk vectors.

use anyhow::Result;

use crate::pipeline::{EmbedReport, Pipeline};

/// Embed chunks that are missing a vector or whose text changed.
pub async fn run_embed_pending(
    pipeline: &Pipeline,
    prd_id: Option<&str>,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        let pending = pipeline.pending_embeddings(prd_id).await?;
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending);
        return Ok(());
    }

    let report = pipeline.embed_pending(prd_id, limit).await?;
    if report.total == 0 {
        println!("embed pending");
        println!("  all chunks up to date");
        return Ok(());
    }

    print_report("embed pending", &report);
    Ok(())
}

/// Forget all embedding state and re-embed every chunk, or one PRD's chunks.
pub async fn run_embed_rebuild(pipeline: &Pipeline, prd_id: Option<&str>) -> Result<()> {
    let report = match prd_id {
        Some(id) => pipeline.reindex(id).await?,
        None => pipeline.embed_rebuild().await?,
    };
    print_report("embed rebuild", &report);
    Ok(())
}

fn print_report(title: &str, report: &EmbedReport) {
    println!("{}", title);
    println!("  total chunks: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
}
