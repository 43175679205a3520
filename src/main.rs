//! # cvPRD CLI (`cvprd`)
//!
//! Ingest product requirements documents, search them, walk their
//! dependency graph and serve the REST API.
//!
//! ## Usage
//!
//! ```bash
//! cvprd --config ./config/cvprd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvprd init` | Create the SQLite database and run schema migrations |
//! | `cvprd create <file.json>` | Create a PRD from JSON (`-` reads stdin) |
//! | `cvprd import <path>` | Import Markdown / Word files or a directory of them |
//! | `cvprd list` | List stored PRDs |
//! | `cvprd get <id>` | Show a PRD with its chunks |
//! | `cvprd delete <id>` | Delete a PRD from every store |
//! | `cvprd search "<query>"` | Keyword, semantic or hybrid search |
//! | `cvprd context <chunk-id>` | A chunk's relationships and dependencies |
//! | `cvprd optimize <id>` | LLM review and rewrite of a PRD's chunks |
//! | `cvprd generate tests <chunk-id>` | LLM test specifications for a requirement |
//! | `cvprd generate test-suite <id>` | LLM tests for every requirement of a PRD |
//! | `cvprd generate user-manual <id>` | LLM docs; also `api-docs`, `technical-spec`, `release-notes` |
//! | `cvprd export <id>` | Export a PRD as Markdown |
//! | `cvprd embed pending` | Backfill missing or stale embeddings |
//! | `cvprd embed rebuild` | Re-embed every chunk |
//! | `cvprd stats` | Document, vector and graph counts |
//! | `cvprd serve` | Start the HTTP API |
//!
//! Without `--config`, `./config/cvprd.toml` is used when present and
//! built-in defaults otherwise.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use cvprd::config::{self, Config};
use cvprd::generate::{self, DocKind, TestOptions, TestTarget, TestType};
use cvprd::models::ChunkType;
use cvprd::pipeline::Pipeline;
use cvprd::search::SearchMode;
use cvprd::vector::SearchFilters;
use cvprd::{db, embed_cmd, export, get, ingest, migrate, optimize, search, server, stats};

const DEFAULT_CONFIG: &str = "./config/cvprd.toml";

/// cvPRD: product requirements documents as a searchable, linked knowledge base.
#[derive(Parser)]
#[command(name = "cvprd", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./config/cvprd.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Create a PRD from a JSON file: `{name, description?, sections: [{title, content, priority?, tags?}]}`.
    Create {
        /// JSON file, or `-` for stdin.
        file: PathBuf,
    },

    /// Import a .md, .markdown or .docx file, or every such file under a directory.
    Import {
        path: PathBuf,

        /// PRD name (single file only). Defaults to the file stem.
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Parse and chunk without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored PRDs.
    List,

    /// Show a PRD with its chunks and tests.
    Get { id: String },

    /// Delete a PRD from the document store, vector index and graph.
    Delete { id: String },

    /// Search chunks.
    Search {
        query: String,

        /// keyword, semantic or hybrid.
        #[arg(long, default_value = "keyword")]
        mode: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to one PRD.
        #[arg(long)]
        prd: Option<String>,

        /// Restrict to chunk types (repeatable).
        #[arg(long = "type")]
        chunk_types: Vec<String>,
    },

    /// Show a chunk's relationships, dependencies and dependents.
    Context {
        chunk_id: String,

        #[arg(long, default_value_t = 2)]
        depth: usize,
    },

    /// Ask the configured LLM to review and improve a PRD.
    Optimize {
        id: String,

        #[arg(long, default_value = optimize::DEFAULT_GOAL)]
        goal: String,
    },

    /// Generate tests or documentation with the configured LLM.
    Generate {
        #[command(subcommand)]
        action: GenerateAction,
    },

    /// Export a PRD as Markdown.
    Export {
        id: String,

        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Manage chunk embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Document, vector and graph counts.
    Stats,

    /// Serve the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks with no embedding or a stale one.
    Pending {
        #[arg(long)]
        prd: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Drop embedding state and re-embed every chunk (or one PRD's).
    Rebuild {
        #[arg(long)]
        prd: Option<String>,

        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum GenerateAction {
    /// Test specifications for one requirement chunk.
    Tests {
        chunk_id: String,

        /// unit, integration, acceptance or all.
        #[arg(long, default_value = "all")]
        test_type: String,

        /// Framework for code stubs, e.g. pytest or jest.
        #[arg(long)]
        framework: Option<String>,

        #[arg(long)]
        no_code_stub: bool,
    },

    /// Test specifications for every requirement, feature and constraint of a PRD.
    TestSuite {
        prd_id: String,

        #[arg(long)]
        framework: Option<String>,
    },

    /// User manual sections.
    UserManual {
        prd_id: String,

        #[arg(long, default_value = "end users")]
        audience: String,
    },

    /// API documentation.
    ApiDocs { prd_id: String },

    /// Technical specification.
    TechnicalSpec { prd_id: String },

    /// Release notes for a version.
    ReleaseNotes {
        prd_id: String,

        #[arg(long)]
        version: String,

        /// A change to highlight (repeatable).
        #[arg(long = "change")]
        changes: Vec<String>,
    },
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => {
            tracing::debug!("no config file, using defaults");
            Ok(Config::minimal())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cvprd=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = resolve_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
            return Ok(());
        }
        Commands::Serve => {
            return server::run_server(cfg).await;
        }
        Commands::Embed {
            action:
                EmbedAction::Pending {
                    batch_size: Some(n),
                    ..
                }
                | EmbedAction::Rebuild {
                    batch_size: Some(n),
                    ..
                },
        } => {
            cfg.embedding.batch_size = n;
        }
        _ => {}
    }

    let pipeline = Pipeline::open(cfg).await?;
    let result = dispatch(&pipeline, cli.command, json).await;
    pipeline.close().await;
    result
}

async fn dispatch(pipeline: &Pipeline, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Create { file } => ingest::run_create(pipeline, &file, json).await,
        Commands::Import {
            path,
            name,
            description,
            dry_run,
        } => ingest::run_import(pipeline, &path, name, description, dry_run).await,
        Commands::List => get::run_list(pipeline, json).await,
        Commands::Get { id } => get::run_get(pipeline, &id, json).await,
        Commands::Delete { id } => get::run_delete(pipeline, &id).await,
        Commands::Search {
            query,
            mode,
            limit,
            prd,
            chunk_types,
        } => {
            let mode = SearchMode::parse(&mode).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                    mode
                )
            })?;
            let chunk_type = if chunk_types.is_empty() {
                None
            } else {
                let mut parsed = Vec::with_capacity(chunk_types.len());
                for t in &chunk_types {
                    parsed.push(
                        ChunkType::parse(t)
                            .ok_or_else(|| anyhow::anyhow!("Unknown chunk type: {}", t))?,
                    );
                }
                Some(parsed)
            };
            let filters = SearchFilters {
                prd_id: prd,
                chunk_type,
                ..Default::default()
            };
            let limit =
                limit.unwrap_or(pipeline.config().retrieval.default_limit.max(1) as usize);
            search::run_search(pipeline, &query, mode, limit, &filters, json).await
        }
        Commands::Context { chunk_id, depth } => {
            get::run_context(pipeline, &chunk_id, depth, json).await
        }
        Commands::Optimize { id, goal } => optimize::run_optimize(pipeline, &id, &goal, json).await,
        Commands::Generate { action } => match action {
            GenerateAction::Tests {
                chunk_id,
                test_type,
                framework,
                no_code_stub,
            } => {
                let options = TestOptions {
                    test_type: TestType::parse_lenient(&test_type),
                    framework,
                    include_code_stub: !no_code_stub,
                };
                generate::run_generate_tests(pipeline, TestTarget::Chunk(&chunk_id), options, json).await
            }
            GenerateAction::TestSuite { prd_id, framework } => {
                let options = TestOptions {
                    framework,
                    include_code_stub: true,
                    ..Default::default()
                };
                generate::run_generate_tests(pipeline, TestTarget::Prd(&prd_id), options, json).await
            }
            GenerateAction::UserManual { prd_id, audience } => {
                generate::run_generate_docs(pipeline, &prd_id, DocKind::UserManual, &audience, json).await
            }
            GenerateAction::ApiDocs { prd_id } => {
                generate::run_generate_docs(pipeline, &prd_id, DocKind::ApiDocs, "", json).await
            }
            GenerateAction::TechnicalSpec { prd_id } => {
                generate::run_generate_docs(pipeline, &prd_id, DocKind::TechnicalSpec, "", json).await
            }
            GenerateAction::ReleaseNotes {
                prd_id,
                version,
                changes,
            } => generate::run_release_notes(pipeline, &prd_id, &version, &changes, json).await,
        },
        Commands::Export { id, output } => {
            export::run_export(pipeline, &id, output.as_deref()).await
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                prd,
                limit,
                dry_run,
                ..
            } => embed_cmd::run_embed_pending(pipeline, prd.as_deref(), limit, dry_run).await,
            EmbedAction::Rebuild { prd, .. } => {
                embed_cmd::run_embed_rebuild(pipeline, prd.as_deref()).await
            }
        },
        Commands::Stats => stats::run_stats(pipeline, json).await,
        Commands::Init | Commands::Serve => Ok(()),
    }
}
