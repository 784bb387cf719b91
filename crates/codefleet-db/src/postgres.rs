//! PostgreSQL document store.

use async_trait::async_trait;
use codefleet_core::Result;
use codefleet_core::store::{DocumentFilter, DocumentStore};
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

/// Document store backed by the `documents` table.
///
/// Filters are evaluated with JSONB containment (`body @> filter`).
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let body = sqlx::query_scalar::<_, Value>(
            "SELECT body FROM documents WHERE collection = $1 AND key = $2",
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(body)
    }

    async fn put(&self, collection: &str, key: &str, doc: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, key)
            DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, collection: &str, filter: &DocumentFilter) -> Result<Vec<Value>> {
        let docs = sqlx::query_scalar::<_, Value>(
            "SELECT body FROM documents WHERE collection = $1 AND body @> $2 ORDER BY key",
        )
        .bind(collection)
        .bind(filter.to_object())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(docs)
    }

    async fn delete_matching(&self, collection: &str, filter: &DocumentFilter) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND body @> $2")
            .bind(collection)
            .bind(filter.to_object())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected())
    }
}
