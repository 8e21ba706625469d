use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{Outcome, Reconciler};
use crate::events::{ChangeEvent, DocumentStatusChange};
use crate::store::DocumentStore;
use crate::types::DocumentStatusUpdate;

/// Applies document-status changes. Unlike the product path, an unchanged
/// status is rewritten unless `noop_check` is enabled.
pub struct DocumentStatusReconciler {
    store: Arc<dyn DocumentStore>,
    noop_check: bool,
}

impl DocumentStatusReconciler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            noop_check: false,
        }
    }

    pub fn with_noop_check(mut self, noop_check: bool) -> Self {
        self.noop_check = noop_check;
        self
    }
}

#[async_trait]
impl Reconciler for DocumentStatusReconciler {
    type Payload = DocumentStatusChange;

    fn entity(&self) -> &'static str {
        "document"
    }

    async fn reconcile(&self, event: ChangeEvent<DocumentStatusChange>) -> Outcome {
        if !event.operation.is_actionable() {
            debug!(op = %event.operation, "ignoring document status event");
            return Outcome::SkippedOperation(event.operation);
        }

        let Some(change) = event.after else {
            error!(op = %event.operation, "document status event has no after image");
            return Outcome::Malformed;
        };

        let document = match self.store.find_by_id(&change.document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!(
                    document_id = %change.document_id,
                    "received non existing document id from document statuses"
                );
                return Outcome::SkippedNotFound;
            }
            Err(e) => {
                error!(document_id = %change.document_id, "failed to load document: {}", e);
                return Outcome::Failed(e);
            }
        };

        if self.noop_check && document.status == change.status {
            warn!(document_id = %document.id, "nothing to update from document statuses");
            return Outcome::SkippedNoop;
        }

        let update = DocumentStatusUpdate {
            id: document.id,
            status: change.status,
        };
        match self.store.update_status(update).await {
            Ok(updated) => {
                info!(
                    document_id = %updated.id,
                    status = %updated.status,
                    "updated the document status"
                );
                Outcome::Applied
            }
            Err(e) => {
                error!(document_id = %change.document_id, "failed to update document status: {}", e);
                Outcome::Failed(e)
            }
        }
    }
}
