//! Lifecycle of a submitted task cycle as seen by one client.

use alloy_primitives::U256;
use gelato_task_types::TaskReceipt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ReceiptStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    Submitted,
    PartiallyExecuted,
    Completed,
    Expired,
    Cancelled,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Expired | CycleState::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleEvent {
    /// One task step succeeded; `remaining` tasks are left afterwards.
    ExecSucceeded { remaining: usize },
    Expire,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("task cycle is {0:?} and accepts no further events")]
    Terminal(CycleState),
    #[error("registry does not know task receipt {0}")]
    UnknownReceipt(U256),
}

pub fn transition(state: CycleState, event: CycleEvent) -> Result<CycleState, CycleError> {
    if state.is_terminal() {
        return Err(CycleError::Terminal(state));
    }
    let next = match event {
        CycleEvent::ExecSucceeded { remaining: 0 } => CycleState::Completed,
        CycleEvent::ExecSucceeded { .. } => CycleState::PartiallyExecuted,
        CycleEvent::Expire => CycleState::Expired,
        CycleEvent::Cancel => CycleState::Cancelled,
    };
    Ok(next)
}

/// Cached client view of a receipt plus its lifecycle state.
///
/// The registry stays authoritative: after another executor advances the cycle this view is
/// stale until [`TrackedReceipt::refresh`] is called with the registry's status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedReceipt {
    receipt: TaskReceipt,
    state: CycleState,
    submitted_tasks: usize,
}

impl TrackedReceipt {
    pub fn new(receipt: TaskReceipt) -> Self {
        let submitted_tasks = receipt.tasks.len();
        let state = if submitted_tasks == 0 {
            CycleState::Completed
        } else {
            CycleState::Submitted
        };
        Self {
            receipt,
            state,
            submitted_tasks,
        }
    }

    pub fn receipt(&self) -> &TaskReceipt {
        &self.receipt
    }

    pub fn id(&self) -> U256 {
        self.receipt.id
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Pops the head task after a successful exec.
    pub fn record_exec(&mut self) -> Result<CycleState, CycleError> {
        let next = self.receipt.advanced();
        let remaining = next.tasks.len();
        self.state = transition(self.state, CycleEvent::ExecSucceeded { remaining })?;
        self.receipt = next;
        Ok(self.state)
    }

    /// Applies expiry lazily against an observed block timestamp.
    pub fn observe_time(&mut self, timestamp: u64) -> CycleState {
        if !self.state.is_terminal() && self.receipt.is_expired_at(timestamp) {
            self.state = CycleState::Expired;
        }
        self.state
    }

    pub fn cancel(&mut self) -> Result<CycleState, CycleError> {
        self.state = transition(self.state, CycleEvent::Cancel)?;
        Ok(self.state)
    }

    /// Replaces the cached view with the registry's. A terminal view is never reopened, even if
    /// a lagging registry still answers `Active`.
    pub fn refresh(&mut self, status: ReceiptStatus) -> Result<CycleState, CycleError> {
        if self.state.is_terminal() {
            return Err(CycleError::Terminal(self.state));
        }
        self.state = match status {
            ReceiptStatus::Active(receipt) => {
                let state = if receipt.tasks.len() < self.submitted_tasks {
                    CycleState::PartiallyExecuted
                } else {
                    CycleState::Submitted
                };
                self.receipt = receipt;
                state
            }
            ReceiptStatus::Completed => {
                self.receipt.tasks.clear();
                CycleState::Completed
            }
            ReceiptStatus::Expired => CycleState::Expired,
            ReceiptStatus::Cancelled => CycleState::Cancelled,
            ReceiptStatus::Unknown => return Err(CycleError::UnknownReceipt(self.receipt.id)),
        };
        Ok(self.state)
    }
}
