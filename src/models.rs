//! Core data models for the resource corpus.
//!
//! A [`Resource`] is one ingested source file; it exclusively owns an
//! ordered list of [`ResourceChunk`]s whose `chunk_index` values run densely
//! from 0. Timestamps are Unix seconds.

use serde::Serialize;

/// A source document stored in the corpus, keyed by its unique `name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub content: String,
    /// SHA-256 hex of the raw source bytes at ingestion time.
    pub source_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied by the caller when creating a resource.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub name: String,
    pub content: String,
    pub source_hash: String,
}

/// A stored chunk of a resource with its embedding.
#[derive(Debug, Clone)]
pub struct ResourceChunk {
    pub id: String,
    pub resource_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A chunk ready to be persisted: text plus its embedding, in chunking order.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// One row of `rag resources list`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub name: String,
    pub chunk_count: i64,
    pub created_at: i64,
}

/// A retrieval hit, nearest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMatch {
    pub resource_name: String,
    pub text: String,
    pub chunk_index: i64,
    /// Euclidean distance between the query and chunk embeddings.
    pub distance: f32,
}
