//! Document and graph views for the CLI: `list`, `get`, `delete`, `context`.

use anyhow::Result;

use crate::graph::ChunkNode;
use crate::pipeline::Pipeline;

pub async fn run_list(pipeline: &Pipeline, json: bool) -> Result<()> {
    let prds = pipeline.list_prds().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prds)?);
        return Ok(());
    }
    if prds.is_empty() {
        println!("No PRDs.");
        return Ok(());
    }

    for prd in &prds {
        println!("{}  {}", prd.id, prd.name);
        println!(
            "    chunks: {}  tests: {}  created: {}",
            prd.chunk_count, prd.test_count, prd.created_at
        );
        if let Some(description) = prd.description.as_deref().filter(|d| !d.is_empty()) {
            println!("    {}", description);
        }
    }
    Ok(())
}

pub async fn run_get(pipeline: &Pipeline, id: &str, json: bool) -> Result<()> {
    let prd = pipeline.get_prd(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prd)?);
        return Ok(());
    }

    println!("--- PRD ---");
    println!("id:           {}", prd.id);
    println!("name:         {}", prd.name);
    if let Some(ref description) = prd.description {
        println!("description:  {}", description);
    }
    println!("created_at:   {}", prd.created_at);
    println!("updated_at:   {}", prd.updated_at);
    println!("sections:     {}", prd.sections.len());
    println!();

    println!("--- Chunks ({}) ---", prd.chunk_count);
    for chunk in &prd.chunks {
        println!(
            "[{} | {} | {}] {}",
            chunk.chunk_type, chunk.priority, chunk.section_title, chunk.id
        );
        println!("{}", chunk.text);
        if !chunk.tags.is_empty() {
            println!("tags: {}", chunk.tags.join(", "));
        }
        println!();
    }

    if !prd.tests.is_empty() {
        println!("--- Tests ({}) ---", prd.test_count);
        for test in &prd.tests {
            println!("[{}] {}", test.chunk_type, test.id);
            println!("{}", test.text);
            println!();
        }
    }

    Ok(())
}

pub async fn run_delete(pipeline: &Pipeline, id: &str) -> Result<()> {
    pipeline.delete_prd(id).await?;
    println!("deleted {}", id);
    Ok(())
}

/// Print a chunk, its one-hop neighbourhood and its dependency report.
pub async fn run_context(
    pipeline: &Pipeline,
    chunk_id: &str,
    depth: usize,
    json: bool,
) -> Result<()> {
    let chunk = pipeline.get_chunk(chunk_id).await?;
    let context = pipeline.chunk_context(chunk_id, depth).await?;
    let report = pipeline.dependency_report(chunk_id, depth).await?;

    if json {
        let out = serde_json::json!({
            "chunk": chunk,
            "context": context,
            "dependencies": report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("--- Chunk ---");
    println!("id:       {}", chunk.id);
    println!("type:     {}", chunk.chunk_type);
    println!("priority: {}", chunk.priority);
    println!("section:  {}", chunk.section_title);
    println!("{}", chunk.text);
    println!();

    if let Some(ref note) = context.note {
        println!("({})", note);
        return Ok(());
    }

    let rel = &context.relationships;
    print_nodes("Depends on", &rel.dependencies);
    print_nodes("References", &rel.references);
    print_nodes("Dependents", &rel.dependents);
    print_nodes("Children", &rel.children);
    print_nodes("Transitive dependencies", &report.transitive);
    print_nodes("Circular", &report.circular);

    Ok(())
}

fn print_nodes(title: &str, nodes: &[ChunkNode]) {
    if nodes.is_empty() {
        return;
    }
    println!("--- {} ({}) ---", title, nodes.len());
    for node in nodes {
        let depth = node
            .depth
            .map(|d| format!(" depth {}", d))
            .unwrap_or_default();
        println!("  [{}{}] {}", node.chunk_type, depth, node.chunk_id);
        println!("    {}", truncate(&node.text, 100));
    }
    println!();
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn test_truncate_flattens_and_cuts() {
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
