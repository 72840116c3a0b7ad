//! In-memory [`ResourceStore`] implementation for tests and tooling.
//!
//! All state sits behind one `tokio::sync::RwLock`, so a resource and its
//! chunks become visible to readers in the same write. Vector search is
//! brute-force L2 over every stored chunk.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ChunkMatch, NewChunk, NewResource, Resource, ResourceChunk, ResourceSummary};

use super::{rank_candidates, validate_chunks, Candidate, ResourceStore};

#[derive(Default)]
struct State {
    /// Keyed by resource name.
    resources: BTreeMap<String, Resource>,
    /// Keyed by resource id, ordered by chunk_index.
    chunks: BTreeMap<String, Vec<ResourceChunk>>,
}

impl State {
    fn insert_resource(&mut self, resource: &NewResource) -> Result<Resource> {
        if self.resources.contains_key(&resource.name) {
            bail!("resource '{}' already exists", resource.name);
        }
        let now = chrono::Utc::now().timestamp();
        let created = Resource {
            id: Uuid::new_v4().to_string(),
            name: resource.name.clone(),
            content: resource.content.clone(),
            source_hash: resource.source_hash.clone(),
            created_at: now,
            updated_at: now,
        };
        self.resources.insert(created.name.clone(), created.clone());
        Ok(created)
    }

    fn check_can_add_chunks(&self, resource_id: &str, chunks: &[NewChunk]) -> Result<()> {
        validate_chunks(chunks)?;
        if !self.resources.values().any(|r| r.id == resource_id) {
            bail!("resource not found: {}", resource_id);
        }
        if self.chunks.get(resource_id).is_some_and(|c| !c.is_empty()) {
            bail!("resource {} already has chunks", resource_id);
        }
        if let (Some(first), Some(stored)) = (chunks.first(), self.stored_dims()) {
            if first.embedding.len() != stored {
                bail!(
                    "chunk embeddings are {}-dim but the store holds {}-dim vectors",
                    first.embedding.len(),
                    stored
                );
            }
        }
        Ok(())
    }

    fn insert_chunks(&mut self, resource_id: &str, chunks: &[NewChunk]) {
        let now = chrono::Utc::now().timestamp();
        let rows = chunks
            .iter()
            .map(|c| ResourceChunk {
                id: Uuid::new_v4().to_string(),
                resource_id: resource_id.to_string(),
                chunk_index: c.chunk_index,
                text: c.text.clone(),
                embedding: c.embedding.clone(),
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.chunks.insert(resource_id.to_string(), rows);
    }

    fn stored_dims(&self) -> Option<usize> {
        self.chunks
            .values()
            .flat_map(|c| c.first())
            .map(|c| c.embedding.len())
            .next()
    }
}

/// In-memory store for tests and embedding-free tooling.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Resource>> {
        Ok(self.state.read().await.resources.get(name).cloned())
    }

    async fn create_resource(&self, resource: &NewResource) -> Result<Resource> {
        self.state.write().await.insert_resource(resource)
    }

    async fn bulk_create_chunks(&self, resource_id: &str, chunks: &[NewChunk]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_can_add_chunks(resource_id, chunks)?;
        state.insert_chunks(resource_id, chunks);
        Ok(())
    }

    async fn create_resource_with_chunks(
        &self,
        resource: &NewResource,
        chunks: &[NewChunk],
    ) -> Result<Resource> {
        let mut state = self.state.write().await;
        if state.resources.contains_key(&resource.name) {
            bail!("resource '{}' already exists", resource.name);
        }
        validate_chunks(chunks)?;
        if let (Some(first), Some(stored)) = (chunks.first(), state.stored_dims()) {
            if first.embedding.len() != stored {
                bail!(
                    "chunk embeddings are {}-dim but the store holds {}-dim vectors",
                    first.embedding.len(),
                    stored
                );
            }
        }
        let created = state.insert_resource(resource)?;
        state.insert_chunks(&created.id, chunks);
        Ok(created)
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSummary>> {
        let state = self.state.read().await;
        Ok(state
            .resources
            .values()
            .map(|r| ResourceSummary {
                name: r.name.clone(),
                chunk_count: state.chunks.get(&r.id).map_or(0, |c| c.len() as i64),
                created_at: r.created_at,
            })
            .collect())
    }

    async fn get_resource(&self, name: &str) -> Result<Option<(Resource, Vec<ResourceChunk>)>> {
        let state = self.state.read().await;
        Ok(state.resources.get(name).map(|r| {
            let chunks = state.chunks.get(&r.id).cloned().unwrap_or_default();
            (r.clone(), chunks)
        }))
    }

    async fn delete_resource(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.resources.remove(name) {
            Some(resource) => {
                state.chunks.remove(&resource.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn embedding_dims(&self) -> Result<Option<usize>> {
        Ok(self.state.read().await.stored_dims())
    }

    async fn nearest_chunks(
        &self,
        query: &[f32],
        top_k: usize,
        resource_names: Option<&[String]>,
    ) -> Result<Vec<ChunkMatch>> {
        let state = self.state.read().await;
        let candidates = state
            .resources
            .values()
            .filter(|r| resource_names.map_or(true, |names| names.contains(&r.name)))
            .flat_map(|r| {
                state
                    .chunks
                    .get(&r.id)
                    .into_iter()
                    .flatten()
                    .map(move |c| Candidate {
                        resource_name: r.name.clone(),
                        chunk_index: c.chunk_index,
                        text: c.text.clone(),
                        embedding: c.embedding.clone(),
                    })
            });
        Ok(rank_candidates(query, candidates, top_k))
    }
}
