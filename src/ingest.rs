//! `cvprd create` and `cvprd import`: bring PRDs into the pipeline.
//!
//! `create` reads a JSON PRD (from a file or `-` for stdin). `import` parses
//! Markdown or Word files; a directory is walked recursively and every
//! supported file becomes its own PRD, in path order.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::chunk_prd;
use crate::models::{NewPrd, Prd};
use crate::parser::parse_document;
use crate::pipeline::{Pipeline, ProcessResult};

const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "docx"];

pub async fn run_create(pipeline: &Pipeline, file: &Path, json: bool) -> Result<()> {
    let text = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading PRD from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };

    let input: NewPrd = serde_json::from_str(&text).context("parsing PRD JSON")?;
    let result = pipeline.process_prd(input.into_prd()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result("create", &result, pipeline);
        println!("ok");
    }
    Ok(())
}

pub async fn run_import(
    pipeline: &Pipeline,
    path: &Path,
    name: Option<String>,
    description: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let files = collect_files(path)?;
    if files.is_empty() {
        bail!("No .md, .markdown or .docx files under {}", path.display());
    }
    // A single name only makes sense for a single file.
    let name = if files.len() == 1 { name } else { None };

    let mut prds: Vec<Prd> = Vec::with_capacity(files.len());
    for file in &files {
        prds.push(parse_document(file, name.clone(), description.clone())?);
    }

    if dry_run {
        let max_tokens = pipeline.config().chunking.max_tokens;
        println!("import {} (dry-run)", path.display());
        println!("  files found: {}", prds.len());
        let sections: usize = prds.iter().map(|p| p.sections.len()).sum();
        let chunks: usize = prds.iter().map(|p| chunk_prd(p, max_tokens).len()).sum();
        println!("  sections: {}", sections);
        println!("  estimated chunks: {}", chunks);
        return Ok(());
    }

    for prd in prds {
        let result = pipeline.process_prd(prd).await?;
        print_result("import", &result, pipeline);
    }
    println!("ok");
    Ok(())
}

fn print_result(verb: &str, result: &ProcessResult, pipeline: &Pipeline) {
    println!("{} {}", verb, result.prd_name);
    println!("  prd id: {}", result.prd_id);
    println!("  chunks written: {}", result.chunks_created);
    println!("  relationships: {}", result.relationships_created);
    if pipeline.config().embedding.is_enabled() {
        println!(
            "  embeddings written: {}",
            result.chunks_created.saturating_sub(result.embeddings_pending)
        );
        println!("  embeddings pending: {}", result.embeddings_pending);
    }
}

/// Supported files at `path`, sorted. A file path is returned as-is so the
/// parser can report an unsupported extension.
pub fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let supported = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()));
        if supported {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
