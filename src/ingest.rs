//! Ingestion pipeline orchestration.
//!
//! Coordinates the per-file flow: folder listing → extraction → chunking →
//! embedding → storage. Every file is handled in isolation: a failure is
//! logged, counted in the [`IngestReport`], and the run moves on to the
//! next file.
//!
//! A resource and all of its chunks are committed in one transaction, so
//! the name-existence check used to skip already-ingested files can never
//! be fooled by a half-written resource. Re-running ingestion after a
//! failure retries exactly the files that did not make it in.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::split_text;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, embed_many, EmbeddingProvider};
use crate::extract::{extract_text, strip_nul, SourceKind};
use crate::migrate;
use crate::models::{NewChunk, NewResource, Resource};
use crate::store::sqlite::SqliteStore;
use crate::store::ResourceStore;

/// Knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub batch_size: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Count what would be ingested without embedding or writing anything.
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            batch_size: config.embedding.batch_size,
            include_globs: config.ingest.include_globs.clone(),
            exclude_globs: config.ingest.exclude_globs.clone(),
            dry_run: false,
        }
    }
}

/// Outcome counts for one run. In a dry run `ingested` and `chunks_written`
/// are estimates and nothing was persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub scanned: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
    pub dry_run: bool,
}

enum FileOutcome {
    Skipped,
    Ingested { chunks: usize },
}

/// Ingest every matching file in `folder` that is not already stored.
///
/// Only a missing or unreadable folder is an error; per-file failures are
/// reported through [`IngestReport::failed`].
pub async fn ingest_all(
    store: &dyn ResourceStore,
    provider: &dyn EmbeddingProvider,
    folder: &Path,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let files = list_source_files(folder, &opts.include_globs, &opts.exclude_globs)?;
    let mut report = IngestReport {
        scanned: files.len(),
        dry_run: opts.dry_run,
        ..Default::default()
    };

    for path in &files {
        let name = file_name(path);
        match ingest_file(store, provider, path, &name, opts).await {
            Ok(FileOutcome::Skipped) => report.skipped += 1,
            Ok(FileOutcome::Ingested { chunks }) => {
                report.ingested += 1;
                report.chunks_written += chunks;
            }
            Err(e) => {
                warn!(resource = %name, error = %format!("{:#}", e), "ingestion failed, skipping file");
                report.failed += 1;
            }
        }
    }

    info!(
        scanned = report.scanned,
        ingested = report.ingested,
        skipped = report.skipped,
        failed = report.failed,
        chunks = report.chunks_written,
        dry_run = report.dry_run,
        "ingestion finished"
    );
    Ok(report)
}

async fn ingest_file(
    store: &dyn ResourceStore,
    provider: &dyn EmbeddingProvider,
    path: &Path,
    name: &str,
    opts: &IngestOptions,
) -> Result<FileOutcome> {
    if let Some(existing) = store.find_by_name(name).await? {
        if changed_since_ingest(path, &existing) {
            warn!(
                resource = %name,
                "file changed since it was ingested; delete the resource to re-ingest it"
            );
        }
        return Ok(FileOutcome::Skipped);
    }

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let source_hash = sha256_hex(&bytes);

    let kind = SourceKind::from_path(path)
        .with_context(|| format!("Unsupported file type: {}", path.display()))?;
    let (content, had_nul) = strip_nul(extract_text(&bytes, kind)?);
    if had_nul {
        warn!(resource = %name, "removed NUL characters from extracted text");
    }

    let texts = split_text(&content, opts.chunk_size, opts.overlap);
    if texts.is_empty() {
        warn!(resource = %name, "no extractable text; storing resource without chunks");
    }

    if opts.dry_run {
        return Ok(FileOutcome::Ingested {
            chunks: texts.len(),
        });
    }

    let vectors = embed_many(provider, &texts, opts.batch_size).await?;
    let chunks: Vec<NewChunk> = texts
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (text, embedding))| NewChunk {
            chunk_index: i as i64,
            text,
            embedding,
        })
        .collect();

    let resource = NewResource {
        name: name.to_string(),
        content,
        source_hash,
    };
    store.create_resource_with_chunks(&resource, &chunks).await?;

    info!(resource = %name, kind = kind.as_str(), chunks = chunks.len(), "ingested");
    Ok(FileOutcome::Ingested {
        chunks: chunks.len(),
    })
}

/// Whether the file on disk no longer matches the stored resource.
///
/// Only files modified after the resource was stored are read and hashed.
/// A file that cannot be inspected counts as unchanged.
fn changed_since_ingest(path: &Path, existing: &Resource) -> bool {
    if existing.source_hash.is_empty() {
        return false;
    }
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok());
    match modified {
        Some(secs) if secs.as_secs() as i64 >= existing.created_at => {}
        _ => return false,
    }
    match std::fs::read(path) {
        Ok(bytes) => sha256_hex(&bytes) != existing.source_hash,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not re-read ingested file");
            false
        }
    }
}

/// Files directly inside `folder` whose names match the include globs and
/// none of the exclude globs, sorted by file name. Globs ignore case.
pub fn list_source_files(
    folder: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("Resource folder does not exist: {}", folder.display());
    }

    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(exclude_globs)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name();
        if exclude_set.is_match(name) || !include_set.is_match(name) {
            continue;
        }
        files.push(entry.into_path());
    }

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid glob: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// CLI entry point for `rag ingest`.
pub async fn run_ingest(config: &Config, folder: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let folder = folder.unwrap_or_else(|| config.ingest.folder.clone());
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let store = SqliteStore::new(pool.clone());
    let provider = create_provider(&config.embedding)?;
    let opts = IngestOptions {
        dry_run,
        ..IngestOptions::from_config(config)
    };

    let report = ingest_all(&store, provider.as_ref(), &folder, &opts).await?;

    if report.dry_run {
        println!("ingest {} (dry-run)", folder.display());
        println!("  files found: {}", report.scanned);
        println!("  already ingested: {}", report.skipped);
        println!("  would ingest: {}", report.ingested);
        println!("  unreadable: {}", report.failed);
        println!("  estimated chunks: {}", report.chunks_written);
    } else {
        println!("ingest {}", folder.display());
        println!("  scanned: {}", report.scanned);
        println!("  ingested: {}", report.ingested);
        println!("  skipped: {}", report.skipped);
        println!("  failed: {}", report.failed);
        println!("  chunks written: {}", report.chunks_written);
        println!("ok");
    }

    pool.close().await;
    Ok(())
}
