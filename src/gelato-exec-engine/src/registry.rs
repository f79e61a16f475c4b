use alloy_primitives::U256;
use async_trait::async_trait;
use gelato_task_types::{TaskReceipt, TaskSubmission};
use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;

/// Authoritative status of a receipt id as the registry sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "receipt", rename_all = "camelCase")]
pub enum ReceiptStatus {
    /// Current view with at least one task left.
    Active(TaskReceipt),
    Completed,
    Expired,
    Cancelled,
    Unknown,
}

/// Submission side of the registry.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Stores a new task cycle and returns its receipt under the next id.
    async fn submit_task_cycle(
        &self,
        submission: TaskSubmission,
    ) -> Result<TaskReceipt, RegistryError>;

    /// Removes an active receipt. `receipt` must be the current view.
    async fn cancel_task(&self, receipt: &TaskReceipt) -> Result<(), RegistryError>;

    async fn receipt_status(&self, id: U256) -> Result<ReceiptStatus, RegistryError>;
}

#[async_trait]
impl<T: TaskRegistry + ?Sized> TaskRegistry for std::sync::Arc<T> {
    async fn submit_task_cycle(
        &self,
        submission: TaskSubmission,
    ) -> Result<TaskReceipt, RegistryError> {
        (**self).submit_task_cycle(submission).await
    }

    async fn cancel_task(&self, receipt: &TaskReceipt) -> Result<(), RegistryError> {
        (**self).cancel_task(receipt).await
    }

    async fn receipt_status(&self, id: U256) -> Result<ReceiptStatus, RegistryError> {
        (**self).receipt_status(id).await
    }
}
