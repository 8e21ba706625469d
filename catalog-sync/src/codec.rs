//! Turns raw Kafka values into typed change events, according to the
//! converter the upstream connector is configured with.

use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::events::{ChangeEvent, DecodeError};
use crate::schema_registry::{split_frame, RegistryError, SchemaRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Json,
    /// Confluent-framed Avro with writer schemas from the schema registry.
    Avro,
}

impl FromStr for ValueFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "json" => Ok(ValueFormat::Json),
            "avro" => Ok(ValueFormat::Avro),
            _ => Err(format!("Unknown value format: {s}, must be JSON or AVRO")),
        }
    }
}

#[derive(Clone)]
pub enum ValueDecoder {
    Json,
    Avro(Arc<SchemaRegistry>),
}

impl ValueDecoder {
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        match config.value_format {
            ValueFormat::Json => Ok(ValueDecoder::Json),
            ValueFormat::Avro => {
                let registry =
                    SchemaRegistry::new(&config.schema_registry_url, config.schema_registry_timeout())?;
                Ok(ValueDecoder::Avro(Arc::new(registry)))
            }
        }
    }

    /// Checks that everything decoding depends on is reachable.
    pub async fn check_ready(&self) -> Result<(), RegistryError> {
        match self {
            ValueDecoder::Json => Ok(()),
            ValueDecoder::Avro(registry) => registry.check_available().await,
        }
    }

    pub async fn decode<T>(&self, payload: Option<&[u8]>) -> Result<ChangeEvent<T>, DecodeError>
    where
        T: DeserializeOwned,
    {
        let registry = match self {
            ValueDecoder::Json => return ChangeEvent::decode(payload),
            ValueDecoder::Avro(registry) => registry,
        };

        let payload = payload.ok_or(DecodeError::Empty)?;
        let (schema_id, mut datum) = split_frame(payload)?;
        let schema = registry
            .schema(schema_id)
            .await
            .map_err(DecodeError::Registry)?;
        let value = apache_avro::from_avro_datum(&schema, &mut datum, None)?;
        ChangeEvent::from_avro(&value)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use apache_avro::types::Value;
    use apache_avro::Schema;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::events::{ChangeOperation, ProductStockChange};

    const STOCK_ENVELOPE: &str = r#"{
        "type": "record",
        "name": "Envelope",
        "namespace": "MsrdStocks.public.stock_records",
        "fields": [
            { "name": "before", "type": ["null", {
                "type": "record",
                "name": "Value",
                "fields": [
                    { "name": "product_id", "type": "string" },
                    { "name": "quantity_actual", "type": "double" }
                ]
            }], "default": null },
            { "name": "after", "type": ["null", "Value"], "default": null },
            { "name": "op", "type": "string" },
            { "name": "ts_ms", "type": ["null", "long"], "default": null }
        ]
    }"#;

    fn framed(schema_id: u32, after: Option<(&str, f64)>, op: &str) -> Vec<u8> {
        let schema = Schema::parse_str(STOCK_ENVELOPE).unwrap();
        let after = match after {
            Some((id, quantity)) => Value::Union(
                1,
                Box::new(Value::Record(vec![
                    ("product_id".to_string(), Value::String(id.to_string())),
                    ("quantity_actual".to_string(), Value::Double(quantity)),
                ])),
            ),
            None => Value::Union(0, Box::new(Value::Null)),
        };
        let envelope = Value::Record(vec![
            ("before".to_string(), Value::Union(0, Box::new(Value::Null))),
            ("after".to_string(), after),
            ("op".to_string(), Value::String(op.to_string())),
            (
                "ts_ms".to_string(),
                Value::Union(1, Box::new(Value::Long(1_700_000_000_000))),
            ),
        ]);

        let mut payload = vec![0x00];
        payload.extend_from_slice(&schema_id.to_be_bytes());
        payload.extend(apache_avro::to_avro_datum(&schema, envelope).unwrap());
        payload
    }

    async fn registry_serving(server: &MockServer, schema_id: u32) -> ValueDecoder {
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/schemas/ids/{schema_id}"));
                then.status(200).json_body(json!({ "schema": STOCK_ENVELOPE }));
            })
            .await;
        let registry = SchemaRegistry::new(&server.base_url(), Duration::from_secs(5)).unwrap();
        ValueDecoder::Avro(Arc::new(registry))
    }

    #[test]
    fn parses_value_formats() {
        assert_eq!("avro".parse::<ValueFormat>(), Ok(ValueFormat::Avro));
        assert_eq!("JSON".parse::<ValueFormat>(), Ok(ValueFormat::Json));
        assert!("protobuf".parse::<ValueFormat>().is_err());
    }

    #[tokio::test]
    async fn json_decoder_reads_json_envelopes() {
        let payload = serde_json::to_vec(&json!({
            "after": { "product_id": "P1", "quantity_actual": 4.0 },
            "op": "c"
        }))
        .unwrap();

        let event: ChangeEvent<ProductStockChange> = ValueDecoder::Json
            .decode(Some(payload.as_slice()))
            .await
            .unwrap();

        assert_eq!(event.operation, ChangeOperation::Create);
        assert_eq!(event.after.unwrap().actual_quantity, 4.0);
    }

    #[tokio::test]
    async fn decodes_framed_avro_envelope() {
        let server = MockServer::start_async().await;
        let decoder = registry_serving(&server, 21).await;

        let payload = framed(21, Some(("P1", 12.5)), "u");
        let event: ChangeEvent<ProductStockChange> =
            decoder.decode(Some(payload.as_slice())).await.unwrap();

        assert_eq!(event.operation, ChangeOperation::Update);
        assert_eq!(
            event.after,
            Some(ProductStockChange {
                product_id: "P1".to_string(),
                actual_quantity: 12.5,
            })
        );

        let payload = framed(21, None, "d");
        let event: ChangeEvent<ProductStockChange> =
            decoder.decode(Some(payload.as_slice())).await.unwrap();
        assert_eq!(event.operation, ChangeOperation::Delete);
        assert!(event.after.is_none());
    }

    #[tokio::test]
    async fn avro_decoder_rejects_unframed_values() {
        let server = MockServer::start_async().await;
        let decoder = registry_serving(&server, 21).await;

        let mut payload = framed(21, Some(("P1", 1.0)), "c");
        payload[0] = 0x01;
        let result = decoder.decode::<ProductStockChange>(Some(payload.as_slice())).await;
        assert!(matches!(result, Err(DecodeError::Frame(_))));

        let json = br#"{"after":null,"op":"c"}"#;
        let result = decoder.decode::<ProductStockChange>(Some(json.as_slice())).await;
        assert!(matches!(result, Err(DecodeError::Frame(_))));

        let result = decoder.decode::<ProductStockChange>(None).await;
        assert!(matches!(result, Err(DecodeError::Empty)));
    }

    #[tokio::test]
    async fn unknown_writer_schema_fails_decoding() {
        let server = MockServer::start_async().await;
        let decoder = registry_serving(&server, 21).await;

        // httpmock answers unmatched paths with 404
        let payload = framed(22, Some(("P1", 1.0)), "c");
        let result = decoder.decode::<ProductStockChange>(Some(payload.as_slice())).await;
        assert!(matches!(result, Err(DecodeError::Registry(_))));
    }
}
