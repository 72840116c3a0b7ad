//! Administrative resource commands: list, show, delete.
//!
//! Deletion is the only way a resource leaves the corpus; its chunks go
//! with it through the foreign-key cascade. Deleting a resource is also how
//! a changed source file gets re-ingested on the next run.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::sqlite::SqliteStore;
use crate::store::ResourceStore;

/// CLI entry point for `rag resources list`.
pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let resources = store.list_resources().await?;

    if resources.is_empty() {
        println!("No resources.");
    } else {
        println!("{:<40} {:>8}  CREATED", "NAME", "CHUNKS");
        for r in &resources {
            println!(
                "{:<40} {:>8}  {}",
                r.name,
                r.chunk_count,
                format_ts_iso(r.created_at)
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `rag resources show <name>`.
pub async fn run_show(config: &Config, name: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let found = store.get_resource(name).await?;
    pool.close().await;

    let (resource, chunks) = match found {
        Some(r) => r,
        None => anyhow::bail!("Resource not found: {}", name),
    };

    println!("--- Resource ---");
    println!("id:          {}", resource.id);
    println!("name:        {}", resource.name);
    println!("source_hash: {}", resource.source_hash);
    println!("created_at:  {}", format_ts_iso(resource.created_at));
    println!("updated_at:  {}", format_ts_iso(resource.updated_at));
    println!("chars:       {}", resource.content.chars().count());
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!("[chunk {}] ({} dims)", chunk.chunk_index, chunk.embedding.len());
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

/// CLI entry point for `rag resources delete <name>`.
pub async fn run_delete(config: &Config, name: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let deleted = store.delete_resource(name).await?;
    pool.close().await;

    if !deleted {
        anyhow::bail!("Resource not found: {}", name);
    }
    println!("deleted {}", name);
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
