//! Storage abstraction for the resource corpus.
//!
//! The [`ResourceStore`] trait defines every storage operation the
//! ingestion and retrieval services need, so the SQLite backend
//! ([`sqlite::SqliteStore`]) and the in-memory backend
//! ([`memory::InMemoryStore`]) are interchangeable. Services receive a
//! `&dyn ResourceStore` chosen by the caller at construction time.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::l2_distance;
use crate::models::{ChunkMatch, NewChunk, NewResource, Resource, ResourceChunk, ResourceSummary};

/// Abstract storage backend for resources and their embedded chunks.
///
/// Chunks are append-only: they are written once, in bulk, for a resource
/// that has none, and only disappear when their resource is deleted.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`exists_by_name`](ResourceStore::exists_by_name) | Existence check by natural key |
/// | [`find_by_name`](ResourceStore::find_by_name) | Fetch a resource row |
/// | [`create_resource`](ResourceStore::create_resource) | Insert a resource (fails on duplicate name) |
/// | [`bulk_create_chunks`](ResourceStore::bulk_create_chunks) | Insert all chunks of a resource atomically |
/// | [`create_resource_with_chunks`](ResourceStore::create_resource_with_chunks) | Resource and chunks in one transaction |
/// | [`nearest_chunks`](ResourceStore::nearest_chunks) | L2 nearest-neighbour search |
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Look up a resource by its unique name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Resource>>;

    /// Whether a resource with this name exists.
    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.find_by_name(name).await?.is_some())
    }

    /// Insert a resource. Fails if the name is already taken.
    async fn create_resource(&self, resource: &NewResource) -> Result<Resource>;

    /// Insert every chunk of a resource. All rows are written or none are.
    ///
    /// Fails if the resource does not exist or already has chunks.
    async fn bulk_create_chunks(&self, resource_id: &str, chunks: &[NewChunk]) -> Result<()>;

    /// Insert a resource and all of its chunks as a single atomic unit.
    ///
    /// Readers never observe the resource without its chunks.
    async fn create_resource_with_chunks(
        &self,
        resource: &NewResource,
        chunks: &[NewChunk],
    ) -> Result<Resource>;

    /// All resources with their chunk counts, ordered by name.
    async fn list_resources(&self) -> Result<Vec<ResourceSummary>>;

    /// A resource and its chunks ordered by `chunk_index`.
    async fn get_resource(&self, name: &str) -> Result<Option<(Resource, Vec<ResourceChunk>)>>;

    /// Delete a resource and, by cascade, its chunks. Returns whether it existed.
    async fn delete_resource(&self, name: &str) -> Result<bool>;

    /// Dimensionality of the stored vectors, or `None` for an empty corpus.
    async fn embedding_dims(&self) -> Result<Option<usize>>;

    /// The `top_k` chunks nearest to `query` by Euclidean distance.
    ///
    /// When `resource_names` is given, only chunks of those resources are
    /// ranked. Ties are broken by resource name, then chunk index.
    async fn nearest_chunks(
        &self,
        query: &[f32],
        top_k: usize,
        resource_names: Option<&[String]>,
    ) -> Result<Vec<ChunkMatch>>;
}

/// Check that chunks are densely indexed from 0 and share one non-zero dimensionality.
pub(crate) fn validate_chunks(chunks: &[NewChunk]) -> Result<()> {
    let dims = chunks.first().map(|c| c.embedding.len()).unwrap_or(0);
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index != i as i64 {
            bail!(
                "chunk indices must run 0..{} in order; found {} at position {}",
                chunks.len(),
                chunk.chunk_index,
                i
            );
        }
        if chunk.embedding.is_empty() || chunk.embedding.len() != dims {
            bail!(
                "chunk {} has a {}-dim embedding, expected {}",
                i,
                chunk.embedding.len(),
                dims
            );
        }
    }
    Ok(())
}

/// A chunk considered for ranking.
pub(crate) struct Candidate {
    pub resource_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Rank candidates by ascending L2 distance to `query` and keep `top_k`.
pub(crate) fn rank_candidates(
    query: &[f32],
    candidates: impl IntoIterator<Item = Candidate>,
    top_k: usize,
) -> Vec<ChunkMatch> {
    let mut matches: Vec<ChunkMatch> = candidates
        .into_iter()
        .map(|c| ChunkMatch {
            distance: l2_distance(query, &c.embedding),
            resource_name: c.resource_name,
            text: c.text,
            chunk_index: c.chunk_index,
        })
        .collect();

    matches.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.resource_name.cmp(&b.resource_name))
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    matches.truncate(top_k);
    matches
}
