//! `cvprd stats`: what is stored, embedded and linked.

use anyhow::Result;

use crate::pipeline::Pipeline;

pub async fn run_stats(pipeline: &Pipeline, json: bool) -> Result<()> {
    let stats = pipeline.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let config = pipeline.config();
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let docs = &stats.documents;

    println!("cvPRD Database Stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  PRDs:        {}", docs.prds);
    println!("  Chunks:      {}", docs.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        docs.embedded_chunks,
        docs.chunks,
        if docs.chunks > 0 {
            (docs.embedded_chunks * 100) / docs.chunks
        } else {
            0
        }
    );
    println!();
    println!(
        "  Vectors:     {} points in '{}' ({})",
        stats.vector.points_count, stats.vector.name, config.vector.backend
    );
    println!("  Graph:       {} backend", config.graph.backend);
    println!("    chunks:        {}", stats.graph.total_chunks);
    println!("    dependencies:  {}", stats.graph.dependency_count);
    println!("    references:    {}", stats.graph.reference_count);
    println!("    relationships: {}", stats.graph.relationship_count);
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
