//! In-memory stores and a scripted message source for exercising
//! reconcilers and the consumer loop without Postgres or Kafka.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::consumer::{MessageSource, RawMessage, SourceError};
use crate::store::{CatalogStore, DocumentStore, StoreError};
use crate::types::{Document, DocumentStatusUpdate, Product, ProductQuantityUpdate};

pub fn product(id: &str, quantity: Option<f64>) -> Product {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Product {
        id: id.to_string(),
        name: format!("product {id}"),
        description: format!("description of {id}"),
        created_at: created,
        updated_at: created,
        quantity,
    }
}

pub fn document(id: &str, status: &str) -> Document {
    Document {
        id: id.to_string(),
        title: format!("document {id}"),
        status: status.to_string(),
    }
}

fn injected_failure() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
struct Faults {
    reads: AtomicBool,
    writes: AtomicBool,
    write_ids: Mutex<HashSet<String>>,
}

impl Faults {
    fn read(&self) -> Result<(), StoreError> {
        if self.reads.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn write(&self, id: &str) -> Result<(), StoreError> {
        if self.writes.load(Ordering::SeqCst) || self.write_ids.lock().unwrap().contains(id) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCatalogStore {
    products: Mutex<HashMap<String, Product>>,
    writes: AtomicUsize,
    faults: Faults,
}

impl MemoryCatalogStore {
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::default();
        for product in products {
            store.insert(product);
        }
        store
    }

    pub fn insert(&self, product: Product) {
        self.products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
    }

    pub fn get(&self, id: &str) -> Option<Product> {
        self.products.lock().unwrap().get(id).cloned()
    }

    /// Number of successful scoped writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_for(&self, id: &str) {
        self.faults.write_ids.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Product>, StoreError> {
        self.faults.read()?;
        Ok(self.get(id))
    }

    async fn update_quantity(&self, update: ProductQuantityUpdate) -> Result<Product, StoreError> {
        self.faults.write(&update.id)?;
        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(&update.id)
            .ok_or_else(|| StoreError::Missing(update.id.clone()))?;
        product.quantity = Some(update.quantity);
        product.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(product.clone())
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
    writes: AtomicUsize,
    faults: Faults,
}

impl MemoryDocumentStore {
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::default();
        for document in documents {
            store
                .documents
                .lock()
                .unwrap()
                .insert(document.id.clone(), document);
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.lock().unwrap().get(id).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.faults.read()?;
        Ok(self.get(id))
    }

    async fn update_status(&self, update: DocumentStatusUpdate) -> Result<Document, StoreError> {
        self.faults.write(&update.id)?;
        let mut documents = self.documents.lock().unwrap();
        let document = documents
            .get_mut(&update.id)
            .ok_or_else(|| StoreError::Missing(update.id.clone()))?;
        document.status = update.status;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(document.clone())
    }
}

enum Scripted {
    Payload(Option<Vec<u8>>),
    TransportError,
    Silence(Duration),
}

/// Offsets committed through a `ScriptedSource`, readable after the source
/// has been moved into a loop.
#[derive(Clone, Default)]
pub struct CommitLog(Arc<Mutex<Vec<i64>>>);

impl CommitLog {
    pub fn offsets(&self) -> Vec<i64> {
        self.0.lock().unwrap().clone()
    }
}

/// Replays a fixed list of messages on partition 0, offsets counting from 0.
/// Once the script runs out it cancels `on_exhausted` and never yields again.
pub struct ScriptedSource {
    topic: String,
    script: VecDeque<Scripted>,
    next_offset: i64,
    commits: CommitLog,
    on_exhausted: CancellationToken,
}

impl ScriptedSource {
    pub fn new(topic: &str, on_exhausted: CancellationToken) -> Self {
        Self {
            topic: topic.to_string(),
            script: VecDeque::new(),
            next_offset: 0,
            commits: CommitLog::default(),
            on_exhausted,
        }
    }

    pub fn push_json(self, value: serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(&value).unwrap();
        self.push_raw(bytes)
    }

    pub fn push_raw(mut self, bytes: Vec<u8>) -> Self {
        self.script.push_back(Scripted::Payload(Some(bytes)));
        self
    }

    pub fn push_tombstone(mut self) -> Self {
        self.script.push_back(Scripted::Payload(None));
        self
    }

    pub fn push_transport_error(mut self) -> Self {
        self.script.push_back(Scripted::TransportError);
        self
    }

    /// The broker stays quiet for `duration` before the next scripted step.
    pub fn push_silence(mut self, duration: Duration) -> Self {
        self.script.push_back(Scripted::Silence(duration));
        self
    }

    pub fn commit_log(&self) -> CommitLog {
        self.commits.clone()
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    type Ack = i64;

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn recv(&mut self) -> Result<RawMessage<i64>, SourceError> {
        loop {
            match self.script.pop_front() {
                // Popped before sleeping, so a poll timeout consumes the silence
                Some(Scripted::Silence(duration)) => tokio::time::sleep(duration).await,
                Some(Scripted::Payload(payload)) => {
                    let offset = self.next_offset;
                    self.next_offset += 1;
                    return Ok(RawMessage {
                        partition: 0,
                        offset,
                        payload,
                        ack: offset,
                    });
                }
                Some(Scripted::TransportError) => {
                    return Err(SourceError::Recv(Box::new(std::io::Error::other(
                        "broker transport failure",
                    ))))
                }
                None => {
                    self.on_exhausted.cancel();
                    return std::future::pending().await;
                }
            }
        }
    }

    fn commit(&mut self, ack: i64) -> Result<(), SourceError> {
        self.commits.0.lock().unwrap().push(ack);
        Ok(())
    }
}
