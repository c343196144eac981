// src/store/postgres.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};

use super::{DocumentStore, StoreError, push_key, split_path, tree};
use crate::utils::clock::{Clock, SystemClock};

/// Document store backed by the `documents` table.
///
/// Every two-segment prefix (`examProgress/{uid}`, `users/{uid}`, ...) is one
/// row holding a JSONB tree; deeper paths address inside that tree.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connects with retries and applies pending migrations.
    pub async fn connect(database_url: &str, max_retries: u32) -> Result<Self, StoreError> {
        let mut retry_count = 0;
        let pool = loop {
            match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(3))
                .connect(database_url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) => {
                    retry_count += 1;
                    if retry_count > max_retries {
                        return Err(StoreError::Backend(format!(
                            "Failed to connect to database after {} retries: {}",
                            max_retries, e
                        )));
                    }
                    tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        };
        tracing::info!("Database connected...");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to run database migrations: {}", e)))?;
        tracing::info!("Migrations applied successfully.");

        Ok(Self::new(pool))
    }

    async fn read_collection(&self, root: &str) -> Result<Option<Value>, StoreError> {
        let rows = sqlx::query("SELECT path, body FROM documents WHERE path LIKE $1 ORDER BY path")
            .bind(format!("{}/%", root))
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut collection = Map::new();
        for row in rows {
            let path: String = row.try_get("path")?;
            let body: Value = row.try_get("body")?;
            if let Some(id) = path.strip_prefix(root).and_then(|p| p.strip_prefix('/')) {
                collection.insert(id.to_string(), body);
            }
        }
        Ok(Some(Value::Object(collection)))
    }

    async fn replace_collection(&self, root: &str, value: Value) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE path LIKE $1")
            .bind(format!("{}/%", root))
            .execute(&mut *tx)
            .await?;

        if let Value::Object(children) = value {
            for (id, body) in children {
                if body.is_null() {
                    continue;
                }
                sqlx::query("INSERT INTO documents (path, body) VALUES ($1, $2)")
                    .bind(format!("{}/{}", root, id))
                    .bind(body)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segments = split_path(path)?;
        if segments.len() == 1 {
            return self.read_collection(segments[0]).await;
        }

        let doc_path = format!("{}/{}", segments[0], segments[1]);
        let row = sqlx::query("SELECT body FROM documents WHERE path = $1")
            .bind(&doc_path)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: Value = row.try_get("body")?;
        Ok(tree::get(&body, &segments[2..]).cloned())
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments = split_path(path)?;
        if segments.len() == 1 {
            return self.replace_collection(segments[0], value).await;
        }

        let doc_path = format!("{}/{}", segments[0], segments[1]);
        let mut tx = self.pool.begin().await?;

        // `FOR UPDATE` locks nothing while the row is missing; concurrent
        // first writes to one document queue on this lock instead.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&doc_path)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query("SELECT body FROM documents WHERE path = $1 FOR UPDATE")
            .bind(&doc_path)
            .fetch_optional(&mut *tx)
            .await?;

        let mut body = match existing {
            Some(row) => row.try_get::<Value, _>("body")?,
            None => Value::Object(Map::new()),
        };
        tree::set(&mut body, &segments[2..], value);

        if body.is_null() || body.as_object().is_some_and(|m| m.is_empty()) {
            sqlx::query("DELETE FROM documents WHERE path = $1")
                .bind(&doc_path)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO documents (path, body, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (path) DO UPDATE SET
                    body = EXCLUDED.body,
                    updated_at = NOW()
                "#,
            )
            .bind(&doc_path)
            .bind(&body)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn push_create(&self, path: &str) -> Result<String, StoreError> {
        split_path(path)?;
        Ok(format!("{}/{}", path, push_key(self.clock.now())))
    }
}
