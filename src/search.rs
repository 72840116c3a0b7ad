//! Query-time semantic search over stored chunk embeddings.
//!
//! The query is embedded with the active provider and compared by L2
//! distance against every candidate chunk (optionally restricted to a set
//! of resource names). Before embedding, the stored vector dimensionality
//! is checked against the provider's so a model change fails loudly
//! instead of producing a meaningless ranking.

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, embed_one, EmbeddingProvider};
use crate::models::ChunkMatch;
use crate::store::sqlite::SqliteStore;
use crate::store::ResourceStore;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(
        "stored embeddings are {stored}-dim but model '{model}' produces {expected}-dim vectors; \
         re-ingest the corpus or fix [embedding] in the config"
    )]
    DimensionMismatch {
        stored: usize,
        expected: usize,
        model: String,
    },
}

/// Return the `top_k` chunks nearest to `query`, nearest first.
///
/// An empty query, `top_k == 0`, an empty corpus, or a filter that matches
/// nothing all yield an empty result rather than an error.
pub async fn search(
    store: &dyn ResourceStore,
    provider: &dyn EmbeddingProvider,
    query: &str,
    top_k: usize,
    resource_names: Option<&[String]>,
) -> Result<Vec<ChunkMatch>> {
    let query = query.trim();
    if query.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let stored = match store.embedding_dims().await? {
        Some(d) => d,
        None => return Ok(Vec::new()),
    };
    if stored != provider.dims() {
        return Err(RetrievalError::DimensionMismatch {
            stored,
            expected: provider.dims(),
            model: provider.model_name().to_string(),
        }
        .into());
    }

    let query_vec = embed_one(provider, query).await?;
    let matches = store
        .nearest_chunks(&query_vec, top_k, resource_names)
        .await?;
    debug!(top_k, returned = matches.len(), "search complete");
    Ok(matches)
}

/// Join match texts with newlines in rank order, for an LLM prompt.
pub fn build_context(matches: &[ChunkMatch]) -> String {
    matches
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// CLI entry point for `rag search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    resources: &[String],
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let provider = create_provider(&config.embedding)?;

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let filter = if resources.is_empty() {
        None
    } else {
        Some(resources)
    };

    let results = search(&store, provider.as_ref(), query, top_k, filter).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, m) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} #{}",
            i + 1,
            m.distance,
            m.resource_name,
            m.chunk_index
        );
        println!("    excerpt: \"{}\"", excerpt(&m.text, 240));
        println!();
    }

    pool.close().await;
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
