use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use gelato_task_types::TaskReceipt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    cycle::{CycleError, CycleState, TrackedReceipt},
    errors::{ExecutionError, RegistryError},
    registry::TaskRegistry,
};

/// Transaction parameters of one `exec` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOptions {
    pub executor: Address,
    pub gas_limit: U256,
    pub gas_price: U256,
}

/// Settlement of a successful step, as reported by `LogExecSuccess` or the local ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecSuccess {
    pub receipt_id: U256,
    pub executor_payout: U256,
    pub executor_success_fee: U256,
    pub sys_admin_success_fee: U256,
    pub gas_used: U256,
    pub block_timestamp: u64,
}

/// The atomic `exec` transaction. Either the head task runs and fees settle, or nothing changes.
#[async_trait]
pub trait ExecBackend: Send + Sync {
    async fn exec(
        &self,
        receipt: &TaskReceipt,
        opts: &TxOptions,
    ) -> Result<ExecSuccess, ExecutionError>;
}

#[async_trait]
impl<T: ExecBackend + ?Sized> ExecBackend for Arc<T> {
    async fn exec(
        &self,
        receipt: &TaskReceipt,
        opts: &TxOptions,
    ) -> Result<ExecSuccess, ExecutionError> {
        (**self).exec(receipt, opts).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: ExecSuccess,
    pub state: CycleState,
    pub remaining_tasks: usize,
}

/// Runs `exec` against a backend and keeps a [`TrackedReceipt`] in step with it.
pub struct ExecutionDriver<B> {
    backend: B,
}

impl<B: ExecBackend> ExecutionDriver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Executes the head task of `tracked`. On error the view is left untouched.
    pub async fn exec(
        &self,
        tracked: &mut TrackedReceipt,
        opts: &TxOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        let success = match self.backend.exec(tracked.receipt(), opts).await {
            Ok(success) => success,
            Err(err) => {
                warn!(receipt_id = %tracked.id(), %err, "exec failed");
                return Err(err);
            }
        };
        let state = match tracked.record_exec() {
            Ok(state) => state,
            Err(err) => {
                warn!(receipt_id = %tracked.id(), %err, "local view out of step with registry");
                tracked.state()
            }
        };
        info!(
            receipt_id = %success.receipt_id,
            executor_payout = %success.executor_payout,
            gas_used = %success.gas_used,
            ?state,
            "exec succeeded"
        );
        Ok(ExecutionResult {
            success,
            state,
            remaining_tasks: tracked.receipt().tasks.len(),
        })
    }

    /// Reconciles `tracked` with the registry's authoritative status.
    pub async fn refresh<T: TaskRegistry + ?Sized>(
        &self,
        registry: &T,
        tracked: &mut TrackedReceipt,
    ) -> Result<CycleState, RegistryError> {
        let status = registry.receipt_status(tracked.id()).await?;
        tracked.refresh(status).map_err(|err| match err {
            CycleError::UnknownReceipt(id) => RegistryError::UnknownReceipt(id),
            CycleError::Terminal(_) => RegistryError::NotActive(tracked.id()),
        })
    }
}
