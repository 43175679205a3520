//! Export a PRD as a Markdown document.
//!
//! Chunks are grouped under their section title in first-seen order, each
//! with a type heading, a priority badge, tags and any optimisation note.
//! The output renders in any Markdown viewer.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::{ChunkType, PrdDetails, Priority};
use crate::pipeline::Pipeline;

const FOOTER: &str = "*Generated by cvPRD - AI-Powered Product Requirements Documentation*";

fn priority_badge(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "🔴 Critical",
        Priority::High => "🟠 High",
        Priority::Medium => "🟡 Medium",
        Priority::Low => "🟢 Low",
    }
}

fn type_icon(chunk_type: ChunkType) -> &'static str {
    match chunk_type {
        ChunkType::Requirement => "📋",
        ChunkType::Feature => "✨",
        ChunkType::Constraint => "🔒",
        ChunkType::Stakeholder => "👥",
        ChunkType::Metric => "📊",
        ChunkType::Dependency => "🔗",
        ChunkType::Risk => "⚠️",
        ChunkType::Objective => "🎯",
        ChunkType::Overview => "📄",
        _ => "•",
    }
}

/// Render a PRD's requirement-side chunks as Markdown.
pub fn render_markdown(prd: &PrdDetails) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# {}", prd.name));
    lines.push(String::new());

    if let Some(description) = prd.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("> {}", description));
        lines.push(String::new());
    }

    lines.push("## Document Info".to_string());
    lines.push(String::new());
    lines.push(format!("- **PRD ID:** `{}`", prd.id));
    lines.push(format!("- **Created:** {}", prd.created_at));
    lines.push(format!("- **Total Items:** {}", prd.chunks.len()));
    lines.push(String::new());

    // Section order is first appearance, not alphabetical.
    let mut sections: Vec<(&str, Vec<_>)> = Vec::new();
    for chunk in &prd.chunks {
        let key = if chunk.section_title.is_empty() {
            chunk.chunk_type.as_str()
        } else {
            chunk.section_title.as_str()
        };
        match sections.iter_mut().find(|(title, _)| *title == key) {
            Some((_, group)) => group.push(chunk),
            None => sections.push((key, vec![chunk])),
        }
    }

    for (section, chunks) in sections {
        lines.push(format!("## {}", section));
        lines.push(String::new());

        for chunk in chunks {
            lines.push(format!("### {} {}", type_icon(chunk.chunk_type), chunk.chunk_type));
            lines.push(String::new());
            lines.push(format!("**Priority:** {}", priority_badge(chunk.priority)));
            if !chunk.tags.is_empty() {
                lines.push(format!("**Tags:** {}", chunk.tags.join(", ")));
            }
            lines.push(String::new());
            lines.push(chunk.text.clone());
            lines.push(String::new());

            if chunk.optimized {
                lines.push("> ✓ *Optimized for AI Paired Programming*".to_string());
                if let Some(notes) = chunk.optimization_notes.as_deref().filter(|n| !n.is_empty()) {
                    lines.push(format!("> {}", notes));
                }
                lines.push(String::new());
            }

            lines.push("---".to_string());
            lines.push(String::new());
        }
    }

    lines.push("---".to_string());
    lines.push(String::new());
    lines.push(FOOTER.to_string());
    lines.push(String::new());

    lines.join("\n")
}

/// Write to `output`, creating parent directories, or to stdout when `None`.
pub fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(path, content)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = content.len(), "exported");
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// CLI entry point: export a PRD to a file or stdout.
pub async fn run_export(pipeline: &Pipeline, prd_id: &str, output: Option<&Path>) -> Result<()> {
    let prd = pipeline.get_prd(prd_id).await?;
    write_output(&render_markdown(&prd), output)
}
