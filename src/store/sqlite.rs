//! SQLite-backed [`ResourceStore`] implementation.
//!
//! Embeddings are stored as little-endian `f32` BLOBs next to the chunk
//! text. Nearest-neighbour search loads the candidate vectors (filtered by
//! resource name in SQL) and ranks them in Rust.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{ChunkMatch, NewChunk, NewResource, Resource, ResourceChunk, ResourceSummary};

use super::{rank_candidates, validate_chunks, Candidate, ResourceStore};

/// SQLite implementation of the [`ResourceStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn resource_from_row(row: &sqlx::sqlite::SqliteRow) -> Resource {
    Resource {
        id: row.get("id"),
        name: row.get("name"),
        content: row.get("content"),
        source_hash: row.get("source_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn insert_resource(conn: &mut SqliteConnection, resource: &NewResource) -> Result<Resource> {
    let now = chrono::Utc::now().timestamp();
    let id = Uuid::new_v4().to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO resources (id, name, content, source_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&resource.name)
    .bind(&resource.content)
    .bind(&resource.source_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => {}
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            bail!("resource '{}' already exists", resource.name);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Resource {
        id,
        name: resource.name.clone(),
        content: resource.content.clone(),
        source_hash: resource.source_hash.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Reject a batch whose vectors disagree with what is already stored.
async fn check_stored_dims(conn: &mut SqliteConnection, chunks: &[NewChunk]) -> Result<()> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };
    let stored: Option<i64> = sqlx::query_scalar("SELECT dims FROM resource_chunks LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(stored) = stored {
        if stored as usize != first.embedding.len() {
            bail!(
                "chunk embeddings are {}-dim but the store holds {}-dim vectors",
                first.embedding.len(),
                stored
            );
        }
    }
    Ok(())
}

async fn insert_chunks(
    conn: &mut SqliteConnection,
    resource_id: &str,
    chunks: &[NewChunk],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO resource_chunks
                (id, resource_id, chunk_index, text, embedding, dims, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(resource_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(chunk.embedding.len() as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for SqliteStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Resource>> {
        let row = sqlx::query(
            "SELECT id, name, content, source_hash, created_at, updated_at FROM resources WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(resource_from_row))
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM resources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn create_resource(&self, resource: &NewResource) -> Result<Resource> {
        let mut conn = self.pool.acquire().await?;
        insert_resource(&mut conn, resource).await
    }

    async fn bulk_create_chunks(&self, resource_id: &str, chunks: &[NewChunk]) -> Result<()> {
        validate_chunks(chunks)?;
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before any read.
        let touched = sqlx::query("UPDATE resources SET updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            bail!("resource not found: {}", resource_id);
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM resource_chunks WHERE resource_id = ?")
                .bind(resource_id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            bail!("resource {} already has chunks", resource_id);
        }

        check_stored_dims(&mut tx, chunks).await?;
        insert_chunks(&mut tx, resource_id, chunks).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_resource_with_chunks(
        &self,
        resource: &NewResource,
        chunks: &[NewChunk],
    ) -> Result<Resource> {
        validate_chunks(chunks)?;
        let mut tx = self.pool.begin().await?;
        // Insert first so the transaction holds the write lock before any read.
        let created = insert_resource(&mut tx, resource).await?;
        check_stored_dims(&mut tx, chunks).await?;
        insert_chunks(&mut tx, &created.id, chunks).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.name, r.created_at, COUNT(c.id) AS chunk_count
            FROM resources r
            LEFT JOIN resource_chunks c ON c.resource_id = r.id
            GROUP BY r.id
            ORDER BY r.name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ResourceSummary {
                name: row.get("name"),
                chunk_count: row.get("chunk_count"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn get_resource(&self, name: &str) -> Result<Option<(Resource, Vec<ResourceChunk>)>> {
        let resource = match self.find_by_name(name).await? {
            Some(r) => r,
            None => return Ok(None),
        };

        let rows = sqlx::query(
            r#"
            SELECT id, resource_id, chunk_index, text, embedding, created_at, updated_at
            FROM resource_chunks
            WHERE resource_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(&resource.id)
        .fetch_all(&self.pool)
        .await?;

        let chunks = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ResourceChunk {
                    id: row.get("id"),
                    resource_id: row.get("resource_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    embedding: blob_to_vec(&blob),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                }
            })
            .collect();

        Ok(Some((resource, chunks)))
    }

    async fn delete_resource(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM resources WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn embedding_dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM resource_chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn nearest_chunks(
        &self,
        query: &[f32],
        top_k: usize,
        resource_names: Option<&[String]>,
    ) -> Result<Vec<ChunkMatch>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT r.name AS resource_name, c.chunk_index, c.text, c.embedding
            FROM resource_chunks c
            JOIN resources r ON r.id = c.resource_id
            "#,
        );

        if let Some(names) = resource_names {
            if names.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" WHERE r.name IN (");
            let mut separated = qb.separated(", ");
            for name in names {
                separated.push_bind(name.clone());
            }
            separated.push_unseparated(")");
        }

        let rows = qb.build().fetch_all(&self.pool).await?;

        let candidates = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Candidate {
                resource_name: row.get("resource_name"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                embedding: blob_to_vec(&blob),
            }
        });

        Ok(rank_candidates(query, candidates, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("rag.db")).await.unwrap();
        migrate::migrate(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn new_resource(name: &str) -> NewResource {
        NewResource {
            name: name.to_string(),
            content: format!("content of {}", name),
            source_hash: "abc123".to_string(),
        }
    }

    fn chunks(vectors: &[&[f32]]) -> Vec<NewChunk> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| NewChunk {
                chunk_index: i as i64,
                text: format!("chunk {}", i),
                embedding: v.to_vec(),
            })
            .collect()
    }

    #[tokio::test]
    async fn resource_round_trips_through_sqlite() {
        let (_dir, store) = test_store().await;
        let created = store
            .create_resource_with_chunks(
                &new_resource("handbook.pdf"),
                &chunks(&[&[0.5, -1.0], &[2.0, 0.25]]),
            )
            .await
            .unwrap();

        assert!(store.exists_by_name("handbook.pdf").await.unwrap());
        assert_eq!(
            store.find_by_name("handbook.pdf").await.unwrap(),
            Some(created.clone())
        );

        let (resource, stored) = store.get_resource("handbook.pdf").await.unwrap().unwrap();
        assert_eq!(resource.source_hash, "abc123");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].chunk_index, 1);
        assert_eq!(stored[1].embedding, vec![2.0, 0.25]);
        assert!(stored.iter().all(|c| c.resource_id == created.id));
        assert_eq!(store.embedding_dims().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let (_dir, store) = test_store().await;
        store.create_resource(&new_resource("faq.csv")).await.unwrap();
        let err = store
            .create_resource(&new_resource("faq.csv"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_resource() {
        let (_dir, store) = test_store().await;
        store
            .create_resource_with_chunks(&new_resource("a.pdf"), &chunks(&[&[1.0, 0.0]]))
            .await
            .unwrap();

        // Wrong dimensionality: nothing for b.pdf may be committed.
        assert!(store
            .create_resource_with_chunks(&new_resource("b.pdf"), &chunks(&[&[1.0, 0.0, 0.0]]))
            .await
            .is_err());
        assert!(!store.exists_by_name("b.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn bulk_create_requires_empty_resource() {
        let (_dir, store) = test_store().await;
        let r = store.create_resource(&new_resource("a.pdf")).await.unwrap();
        let c = chunks(&[&[1.0], &[2.0], &[3.0]]);
        store.bulk_create_chunks(&r.id, &c).await.unwrap();
        assert!(store.bulk_create_chunks(&r.id, &c).await.is_err());
        assert!(store.bulk_create_chunks("no-such-id", &c).await.is_err());

        let listed = store.list_resources().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].chunk_count, 3);
    }

    #[tokio::test]
    async fn nearest_chunks_ranks_and_filters() {
        let (_dir, store) = test_store().await;
        store
            .create_resource_with_chunks(&new_resource("far.csv"), &chunks(&[&[9.0], &[8.0]]))
            .await
            .unwrap();
        store
            .create_resource_with_chunks(&new_resource("near.csv"), &chunks(&[&[1.0], &[0.0]]))
            .await
            .unwrap();

        let top = store.nearest_chunks(&[0.0], 3, None).await.unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].resource_name, "near.csv");
        assert_eq!(top[0].chunk_index, 1);
        assert_eq!(top[0].distance, 0.0);
        assert_eq!(top[2].resource_name, "far.csv");
        assert_eq!(top[2].chunk_index, 1);

        let filtered = store
            .nearest_chunks(&[0.0], 5, Some(&["far.csv".to_string()][..]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|m| m.resource_name == "far.csv"));

        let empty_filter: &[String] = &[];
        assert!(store
            .nearest_chunks(&[0.0], 5, Some(empty_filter))
            .await
            .unwrap()
            .is_empty());
    }

    async fn write_many(store: &SqliteStore, prefix: &str) -> Vec<Result<Resource>> {
        let mut results = Vec::new();
        for i in 0..10 {
            let name = format!("{}-{}.csv", prefix, i);
            results.push(
                store
                    .create_resource_with_chunks(&new_resource(&name), &chunks(&[&[i as f32, 1.0]]))
                    .await,
            );
        }
        results
    }

    #[tokio::test]
    async fn concurrent_writers_on_separate_pools_all_commit() {
        let (dir, cli) = test_store().await;
        let pool = db::connect_path(&dir.path().join("rag.db")).await.unwrap();
        let server = SqliteStore::new(pool);

        let (a, b) = tokio::join!(write_many(&cli, "cli"), write_many(&server, "srv"));
        for result in a.into_iter().chain(b) {
            result.unwrap();
        }
        assert_eq!(cli.list_resources().await.unwrap().len(), 20);

        let extra = server.create_resource(&new_resource("late.csv")).await.unwrap();
        cli.bulk_create_chunks(&extra.id, &chunks(&[&[0.0, 0.0]]))
            .await
            .unwrap();
        let (_, stored) = server.get_resource("late.csv").await.unwrap().unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let (_dir, store) = test_store().await;
        store
            .create_resource_with_chunks(&new_resource("a.pdf"), &chunks(&[&[1.0], &[2.0]]))
            .await
            .unwrap();

        assert!(store.delete_resource("a.pdf").await.unwrap());
        assert!(!store.delete_resource("a.pdf").await.unwrap());

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resource_chunks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(orphans, 0);
        assert_eq!(store.embedding_dims().await.unwrap(), None);
    }
}
