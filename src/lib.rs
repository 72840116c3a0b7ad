//! # Resource RAG
//!
//! Retrieval-augmented generation over a small document corpus.
//!
//! PDF and CSV files dropped into a resource folder are extracted to plain
//! text, split into overlapping word-bounded chunks, embedded, and stored in
//! SQLite. At query time the question is embedded with the same model and
//! the nearest chunks by Euclidean distance are returned, optionally
//! restricted to a set of named resources, ready to be pasted into an LLM
//! prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │  resources/  │──▶│ Extract → Chunk →  │──▶│    SQLite     │
//! │  *.pdf *.csv │   │      Embed         │   │ resources +   │
//! └──────────────┘   └────────────────────┘   │ chunk vectors │
//!                                             └──────┬───────┘
//!                                ┌───────────────────┤
//!                                ▼                   ▼
//!                           ┌──────────┐       ┌──────────┐
//!                           │   CLI    │       │   HTTP   │
//!                           │  (rag)   │       │  (axum)  │
//!                           └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                          # create database
//! rag ingest                        # ingest ./data/resources
//! rag search "refund policy" --top-k 3
//! rag serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF/CSV text extraction |
//! | [`chunk`] | Word-overlap text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Resource store trait, SQLite and in-memory backends |
//! | [`ingest`] | Folder ingestion pipeline |
//! | [`search`] | Nearest-neighbour retrieval |
//! | [`resources`] | List/show/delete commands |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod resources;
pub mod search;
pub mod server;
pub mod store;
