//! Client for a Confluent-compatible schema registry, plus the framing the
//! Confluent serializers put around every Avro value:
//! `[0x00][schema id: u32 big-endian][avro datum]`.

use std::sync::Arc;
use std::time::Duration;

use apache_avro::Schema;
use moka::future::Cache;
use serde::Deserialize;
use tracing::debug;

const MAGIC_BYTE: u8 = 0x00;
const FRAME_HEADER_LEN: usize = 5;

// Writer schemas are immutable per id, entries never need to expire
const SCHEMA_CACHE_CAPACITY: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("schema registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("schema {id} is not a valid avro schema: {source}")]
    InvalidSchema {
        id: u32,
        #[source]
        source: apache_avro::Error,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes is too short for a schema id header")]
    TooShort(usize),
    #[error("invalid magic byte: expected 0x00, got {0:#04x}")]
    MagicByte(u8),
}

/// Splits a Confluent-framed value into its schema id and Avro datum.
pub fn split_frame(payload: &[u8]) -> Result<(u32, &[u8]), FrameError> {
    if payload.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TooShort(payload.len()));
    }
    if payload[0] != MAGIC_BYTE {
        return Err(FrameError::MagicByte(payload[0]));
    }

    let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((id, &payload[FRAME_HEADER_LEN..]))
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

pub struct SchemaRegistry {
    client: reqwest::Client,
    base_url: String,
    schemas: Cache<u32, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            schemas: Cache::builder().max_capacity(SCHEMA_CACHE_CAPACITY).build(),
        })
    }

    /// Fails unless the registry answers its subject listing.
    pub async fn check_available(&self) -> Result<(), RegistryError> {
        self.client
            .get(format!("{}/subjects", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Writer schema for `id`. Concurrent lookups of the same id share one
    /// request; failures are not cached.
    pub async fn schema(&self, id: u32) -> Result<Arc<Schema>, Arc<RegistryError>> {
        self.schemas.try_get_with(id, self.fetch(id)).await
    }

    async fn fetch(&self, id: u32) -> Result<Arc<Schema>, RegistryError> {
        let response: SchemaResponse = self
            .client
            .get(format!("{}/schemas/ids/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let schema = Schema::parse_str(&response.schema)
            .map_err(|source| RegistryError::InvalidSchema { id, source })?;
        debug!(schema_id = id, "fetched writer schema");
        Ok(Arc::new(schema))
    }
}
