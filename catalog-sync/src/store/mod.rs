use std::time::Duration;

use async_trait::async_trait;

use crate::types::{Document, DocumentStatusUpdate, Product, ProductQuantityUpdate};

pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("record {0} disappeared before the update was applied")]
    Missing(String),
}

/// Read and scoped-write access to products. Implementations own all
/// persistence details; callers only ever see whole records.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Product>, StoreError>;

    /// Sets `quantity` and refreshes `updated_at`, leaving every other column
    /// alone, and returns the record as stored after the write.
    async fn update_quantity(&self, update: ProductQuantityUpdate) -> Result<Product, StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Sets `status` only and returns the record as stored after the write.
    async fn update_status(&self, update: DocumentStatusUpdate) -> Result<Document, StoreError>;
}
