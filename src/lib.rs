//! # cvPRD
//!
//! Product requirements documents as a searchable, linked knowledge base.
//!
//! A PRD is split into typed chunks (requirements, features, constraints,
//! risks, ...), each chunk is embedded and indexed for semantic search, and
//! the relationships between chunks (dependencies, references, parent and
//! child parts) are recorded in a graph so an AI assistant can pull in the
//! context a requirement needs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │  Markdown   │──▶│  Pipeline   │──▶│ SQLite + FTS5  │
//! │ DOCX / JSON │   │ Chunk+Embed │   └────────────────┘
//! └─────────────┘   └──────┬──────┘
//!                          ├──────────▶ VectorIndex (sqlite | qdrant)
//!                          └──────────▶ GraphStore  (sqlite | neo4j)
//!                                   │
//!                      ┌────────────┴───────┐
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │ (cvprd)  │        │  (axum)  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cvprd init                         # create database
//! cvprd import ./docs/checkout.md    # parse, chunk, embed, link
//! cvprd search "payment retries" --mode hybrid
//! cvprd context <chunk-id>           # what this requirement depends on
//! cvprd serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | PRDs, chunks, relationships |
//! | [`parser`] | Markdown and Word document parsing |
//! | [`chunk`] | Chunking, type detection, relationship heuristics |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Vector index backends |
//! | [`graph`] | Knowledge graph backends |
//! | [`store`] | SQLite document store and FTS5 |
//! | [`search`] | Keyword, semantic, and hybrid scoring |
//! | [`pipeline`] | Orchestration across the stores |
//! | [`llm`] / [`optimize`] | LLM-driven PRD optimisation |
//! | [`generate`] | LLM-generated tests and documentation |
//! | [`export`] | Markdown export |
//! | [`server`] | REST API |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod export;
pub mod generate;
pub mod get;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod optimize;
pub mod parser;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod vector;
