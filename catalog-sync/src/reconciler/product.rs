use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{Outcome, Reconciler};
use crate::events::{ChangeEvent, ProductStockChange};
use crate::store::CatalogStore;
use crate::types::ProductQuantityUpdate;

/// Applies stock-record changes to product quantities.
pub struct ProductQuantityReconciler {
    store: Arc<dyn CatalogStore>,
}

impl ProductQuantityReconciler {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reconciler for ProductQuantityReconciler {
    type Payload = ProductStockChange;

    fn entity(&self) -> &'static str {
        "product"
    }

    async fn reconcile(&self, event: ChangeEvent<ProductStockChange>) -> Outcome {
        if !event.operation.is_actionable() {
            debug!(op = %event.operation, "ignoring stock record event");
            return Outcome::SkippedOperation(event.operation);
        }

        let Some(change) = event.after else {
            error!(op = %event.operation, "stock record event has no after image");
            return Outcome::Malformed;
        };

        let product = match self.store.find_by_id(&change.product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                warn!(
                    product_id = %change.product_id,
                    "received non existing product id from stock records"
                );
                return Outcome::SkippedNotFound;
            }
            Err(e) => {
                error!(product_id = %change.product_id, "failed to load product: {}", e);
                return Outcome::Failed(e);
            }
        };

        // Redelivery and snapshot replays land here
        if product.quantity == Some(change.actual_quantity) {
            warn!(product_id = %product.id, "nothing to update from stock records");
            return Outcome::SkippedNoop;
        }

        let update = ProductQuantityUpdate {
            id: product.id,
            quantity: change.actual_quantity,
        };
        match self.store.update_quantity(update).await {
            Ok(updated) => {
                info!(
                    product_id = %updated.id,
                    quantity = ?updated.quantity,
                    "updated the stock quantity"
                );
                Outcome::Applied
            }
            Err(e) => {
                error!(product_id = %change.product_id, "failed to update product quantity: {}", e);
                Outcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeOperation;
    use crate::test_utils::{product, MemoryCatalogStore};

    fn event(op: ChangeOperation, id: &str, quantity: f64) -> ChangeEvent<ProductStockChange> {
        ChangeEvent {
            operation: op,
            after: Some(ProductStockChange {
                product_id: id.to_string(),
                actual_quantity: quantity,
            }),
        }
    }

    fn setup(quantity: Option<f64>) -> (Arc<MemoryCatalogStore>, ProductQuantityReconciler) {
        let store = Arc::new(MemoryCatalogStore::with_products([product("P1", quantity)]));
        let reconciler = ProductQuantityReconciler::new(store.clone());
        (store, reconciler)
    }

    #[tokio::test]
    async fn applies_changed_quantity() {
        let (store, reconciler) = setup(Some(10.0));

        let outcome = reconciler
            .reconcile(event(ChangeOperation::Update, "P1", 12.0))
            .await;

        assert!(matches!(outcome, Outcome::Applied));
        assert_eq!(store.get("P1").unwrap().quantity, Some(12.0));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_and_create_are_applied() {
        let (store, reconciler) = setup(None);

        assert!(
            reconciler
                .handle(event(ChangeOperation::Snapshot, "P1", 4.0))
                .await
        );
        assert!(
            reconciler
                .handle(event(ChangeOperation::Create, "P1", 5.0))
                .await
        );
        assert_eq!(store.get("P1").unwrap().quantity, Some(5.0));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn zero_is_written_over_unset() {
        let (store, reconciler) = setup(None);

        let outcome = reconciler
            .reconcile(event(ChangeOperation::Update, "P1", 0.0))
            .await;

        assert!(matches!(outcome, Outcome::Applied));
        assert_eq!(store.get("P1").unwrap().quantity, Some(0.0));
    }

    #[tokio::test]
    async fn replay_of_same_quantity_is_noop() {
        let (store, reconciler) = setup(Some(10.0));

        let first = reconciler
            .reconcile(event(ChangeOperation::Create, "P1", 12.0))
            .await;
        let after_first = store.get("P1").unwrap();

        let second = reconciler
            .reconcile(event(ChangeOperation::Create, "P1", 12.0))
            .await;
        let after_second = store.get("P1").unwrap();

        assert!(matches!(first, Outcome::Applied));
        assert!(matches!(second, Outcome::SkippedNoop));
        assert!(!second.handled());
        assert_eq!(store.write_count(), 1);
        assert_eq!(after_first.updated_at, after_second.updated_at);
    }

    #[tokio::test]
    async fn update_leaves_other_fields_alone() {
        let (store, reconciler) = setup(Some(10.0));
        let before = store.get("P1").unwrap();

        reconciler
            .reconcile(event(ChangeOperation::Update, "P1", 11.0))
            .await;
        let after = store.get("P1").unwrap();

        assert_eq!(after.name, before.name);
        assert_eq!(after.description, before.description);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn unknown_product_is_not_handled() {
        let (store, reconciler) = setup(Some(10.0));

        let outcome = reconciler
            .reconcile(event(ChangeOperation::Update, "P404", 1.0))
            .await;

        assert!(matches!(outcome, Outcome::SkippedNotFound));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn delete_and_unknown_ops_are_skipped() {
        let (store, reconciler) = setup(Some(10.0));

        for op in [ChangeOperation::Delete, ChangeOperation::Unknown] {
            let outcome = reconciler.reconcile(event(op, "P1", 1.0)).await;
            assert!(matches!(outcome, Outcome::SkippedOperation(skipped) if skipped == op));
        }
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.get("P1").unwrap().quantity, Some(10.0));
    }

    #[tokio::test]
    async fn missing_after_is_malformed() {
        let (store, reconciler) = setup(Some(10.0));

        let outcome = reconciler
            .reconcile(ChangeEvent {
                operation: ChangeOperation::Create,
                after: None,
            })
            .await;

        assert!(matches!(outcome, Outcome::Malformed));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn store_failures_are_reported() {
        let (store, reconciler) = setup(Some(10.0));

        store.fail_reads(true);
        let outcome = reconciler
            .reconcile(event(ChangeOperation::Update, "P1", 12.0))
            .await;
        assert!(matches!(outcome, Outcome::Failed(_)));

        store.fail_reads(false);
        store.fail_writes(true);
        let outcome = reconciler
            .reconcile(event(ChangeOperation::Update, "P1", 12.0))
            .await;
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(store.get("P1").unwrap().quantity, Some(10.0));
    }
}
