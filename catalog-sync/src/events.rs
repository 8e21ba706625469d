//! Change events captured from the upstream stocks database.
//!
//! Each topic carries a Debezium-style envelope: an `op` tag and an `after`
//! row image. With the JSON converter the envelope may arrive bare or wrapped
//! in `{"schema": ..., "payload": ...}`; with the Avro converter it is an
//! `Envelope` record. All of these decode to the same `ChangeEvent`.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::schema_registry::{FrameError, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("received empty payload")]
    Empty,
    #[error("invalid change event: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid avro frame: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to resolve writer schema: {0}")]
    Registry(Arc<RegistryError>),
    #[error("invalid avro change event: {0}")]
    Avro(#[from] apache_avro::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    /// Row emitted by the initial snapshot (`r`)
    Snapshot,
    Create,
    Update,
    Delete,
    Unknown,
}

impl ChangeOperation {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "r" => ChangeOperation::Snapshot,
            "c" => ChangeOperation::Create,
            "u" => ChangeOperation::Update,
            "d" => ChangeOperation::Delete,
            _ => ChangeOperation::Unknown,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            ChangeOperation::Snapshot => "r",
            ChangeOperation::Create => "c",
            ChangeOperation::Update => "u",
            ChangeOperation::Delete => "d",
            ChangeOperation::Unknown => "?",
        }
    }

    /// Snapshot, create and update carry a row image we can reconcile against.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            ChangeOperation::Snapshot | ChangeOperation::Create | ChangeOperation::Update
        )
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for ChangeOperation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(ChangeOperation::from_tag(&tag))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeEvent<T> {
    #[serde(rename = "op")]
    pub operation: ChangeOperation,
    pub after: Option<T>,
}

impl<T> ChangeEvent<T>
where
    T: DeserializeOwned,
{
    pub fn decode(payload: Option<&[u8]>) -> Result<Self, DecodeError> {
        let payload = payload.ok_or(DecodeError::Empty)?;
        let mut value: Value = serde_json::from_slice(payload)?;

        let wrapped = value
            .get_mut("payload")
            .filter(|inner| inner.get("op").is_some())
            .map(Value::take);
        if let Some(inner) = wrapped {
            value = inner;
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Maps an Avro `Envelope` record onto the event. Fields other than `op`
    /// and `after` are ignored.
    pub fn from_avro(value: &apache_avro::types::Value) -> Result<Self, DecodeError> {
        Ok(apache_avro::from_value(value)?)
    }
}

/// Row image from `stock_records`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductStockChange {
    #[serde(alias = "productId")]
    pub product_id: String,
    #[serde(rename = "quantity_actual", alias = "actualQuantity")]
    pub actual_quantity: f64,
}

/// Row image from `document_statuses`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentStatusChange {
    #[serde(alias = "documentId")]
    pub document_id: String,
    pub status: String,
}
