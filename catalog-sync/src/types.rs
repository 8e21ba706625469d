use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    // NULL means the stock level was never reported, which is not the same as zero
    pub quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub status: String,
}

/// The only product fields an inbound stock event may change. `updated_at`
/// is stamped by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantityUpdate {
    pub id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStatusUpdate {
    pub id: String,
    pub status: String,
}
