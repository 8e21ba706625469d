//! Reconcilers turn one decoded change event into at most one scoped store
//! write, and report what they did as an `Outcome`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::events::{ChangeEvent, ChangeOperation};
use crate::store::StoreError;

pub mod document;
pub mod product;

pub use document::DocumentStatusReconciler;
pub use product::ProductQuantityReconciler;

#[derive(Debug)]
pub enum Outcome {
    /// The scoped update was written and read back.
    Applied,
    /// Delete or unknown operation, deliberately not interpreted.
    SkippedOperation(ChangeOperation),
    /// The stored value already matches the event.
    SkippedNoop,
    /// The event references an id the store doesn't have.
    SkippedNotFound,
    /// Actionable operation without an `after` row image.
    Malformed,
    Failed(StoreError),
}

impl Outcome {
    /// Only an applied update counts as handled.
    pub fn handled(&self) -> bool {
        matches!(self, Outcome::Applied)
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Outcome::SkippedOperation(_) | Outcome::SkippedNoop | Outcome::SkippedNotFound
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Malformed | Outcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::SkippedOperation(_) => "skipped_operation",
            Outcome::SkippedNoop => "skipped_noop",
            Outcome::SkippedNotFound => "skipped_not_found",
            Outcome::Malformed => "malformed",
            Outcome::Failed(_) => "failed",
        }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    type Payload: DeserializeOwned + Send + 'static;

    /// Entity kind, used as a metrics label.
    fn entity(&self) -> &'static str;

    async fn reconcile(&self, event: ChangeEvent<Self::Payload>) -> Outcome;

    async fn handle(&self, event: ChangeEvent<Self::Payload>) -> bool {
        self.reconcile(event).await.handled()
    }
}
