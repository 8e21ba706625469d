use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{CatalogStore, DocumentStore, StoreError};
use crate::types::{Document, DocumentStatusUpdate, Product, ProductQuantityUpdate};

const PRODUCT_COLUMNS: &str = "id, name, description, created_at, updated_at, quantity";
const DOCUMENT_COLUMNS: &str = "id, title, status";

async fn bounded<T, F>(timeout: Duration, query: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

pub struct PgCatalogStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Product>, StoreError> {
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        bounded(
            self.timeout,
            sqlx::query_as::<_, Product>(&query)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn update_quantity(&self, update: ProductQuantityUpdate) -> Result<Product, StoreError> {
        // Single statement, so the write and the read-back can't interleave with another writer
        let query = format!(
            "UPDATE products SET quantity = $2, updated_at = now() WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let updated = bounded(
            self.timeout,
            sqlx::query_as::<_, Product>(&query)
                .bind(&update.id)
                .bind(update.quantity)
                .fetch_optional(&self.pool),
        )
        .await?;

        updated.ok_or(StoreError::Missing(update.id))
    }
}

pub struct PgDocumentStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1");
        bounded(
            self.timeout,
            sqlx::query_as::<_, Document>(&query)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn update_status(&self, update: DocumentStatusUpdate) -> Result<Document, StoreError> {
        let query =
            format!("UPDATE documents SET status = $2 WHERE id = $1 RETURNING {DOCUMENT_COLUMNS}");
        let updated = bounded(
            self.timeout,
            sqlx::query_as::<_, Document>(&query)
                .bind(&update.id)
                .bind(&update.status)
                .fetch_optional(&self.pool),
        )
        .await?;

        updated.ok_or(StoreError::Missing(update.id))
    }
}
