//! Polling executor: evaluate `canExec` for tracked receipts and execute what is eligible.

use std::time::Duration;

use alloy_primitives::{Address, U256};
use gelato_task_types::{ChainReader, GasPriceOracle, ReadError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    cycle::{CycleState, TrackedReceipt},
    driver::{ExecBackend, ExecutionDriver, ExecutionResult, TxOptions},
    eligibility::EligibilityEngine,
    errors::{EligibilityError, EngineError, ExecutionError, Verdict},
    registry::{ReceiptStatus, TaskRegistry},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Executed(ExecutionResult),
    NotEligible(EligibilityError),
    /// Eligibility could not be determined this round; try again later.
    Indeterminate(ReadError),
    Failed(ExecutionError),
    /// The receipt reached a terminal state and is no longer tracked.
    Retired(CycleState),
}

pub struct Executor<R, O, B, G> {
    engine: EligibilityEngine,
    reader: R,
    oracle: O,
    driver: ExecutionDriver<B>,
    registry: G,
    executor: Address,
    receipts: Vec<TrackedReceipt>,
}

impl<R, O, B, G> Executor<R, O, B, G>
where
    R: ChainReader,
    O: GasPriceOracle,
    B: ExecBackend,
    G: TaskRegistry,
{
    pub fn new(
        engine: EligibilityEngine,
        reader: R,
        oracle: O,
        backend: B,
        registry: G,
        executor: Address,
    ) -> Self {
        Self {
            engine,
            reader,
            oracle,
            driver: ExecutionDriver::new(backend),
            registry,
            executor,
            receipts: Vec::new(),
        }
    }

    pub fn track(&mut self, receipt: TrackedReceipt) {
        self.receipts.push(receipt);
    }

    pub fn tracked(&self) -> &[TrackedReceipt] {
        &self.receipts
    }

    /// One pass over every tracked receipt. Terminal receipts are dropped afterwards.
    ///
    /// A view another executor has advanced is resynced from the registry once per round and
    /// evaluated again.
    pub async fn poll_once(&mut self) -> Vec<(U256, PollOutcome)> {
        let gas_price = match self.oracle.current_gas_price().await {
            Ok(price) => price,
            Err(err) => {
                warn!(%err, "gas price unavailable, skipping round");
                return self
                    .receipts
                    .iter()
                    .map(|r| (r.id(), PollOutcome::Indeterminate(err.clone())))
                    .collect();
            }
        };

        let mut receipts = std::mem::take(&mut self.receipts);
        let mut outcomes = Vec::with_capacity(receipts.len());
        for tracked in receipts.iter_mut() {
            let id = tracked.id();
            let mut outcome = self.step(tracked, gas_price).await;
            if is_stale_view(&outcome) {
                match self.driver.refresh(&self.registry, tracked).await {
                    Ok(state) if state.is_terminal() => {
                        info!(receipt_id = %id, ?state, "retiring task receipt");
                        outcome = PollOutcome::Retired(state);
                    }
                    Ok(state) => {
                        info!(
                            receipt_id = %id,
                            ?state,
                            tasks = tracked.receipt().tasks.len(),
                            "resynced task receipt"
                        );
                        outcome = self.step(tracked, gas_price).await;
                    }
                    Err(err) => warn!(receipt_id = %id, %err, "could not resync task receipt"),
                }
            }
            outcomes.push((id, outcome));
        }
        receipts.retain(|r| !r.is_terminal());
        self.receipts = receipts;
        outcomes
    }

    async fn step(&self, tracked: &mut TrackedReceipt, gas_price: U256) -> PollOutcome {
        let id = tracked.id();
        if tracked.is_terminal() {
            return PollOutcome::Retired(tracked.state());
        }
        let config = self.engine.config();
        let mut gas_limit = tracked
            .receipt()
            .head()
            .map(|task| task.self_provider_gas_limit)
            .unwrap_or_default();
        if gas_limit.is_zero() {
            gas_limit = U256::from(config.gelato_max_gas);
        }

        let verdict = self
            .engine
            .can_exec(&self.reader, tracked.receipt(), gas_limit, gas_price)
            .await;
        match verdict {
            Ok(Verdict::Ok) => {
                let opts = TxOptions {
                    executor: self.executor,
                    gas_limit: gas_limit.saturating_add(U256::from(config.exec_gas_buffer)),
                    gas_price,
                };
                match self.driver.exec(tracked, &opts).await {
                    Ok(result) => PollOutcome::Executed(result),
                    Err(err) => PollOutcome::Failed(err),
                }
            }
            Ok(Verdict::NotOk(err)) => match terminal_status(&err) {
                Some(status) => {
                    let state = tracked.refresh(status).unwrap_or(CycleState::Cancelled);
                    info!(receipt_id = %id, ?state, "retiring task receipt");
                    PollOutcome::Retired(state)
                }
                None => PollOutcome::NotEligible(err),
            },
            Err(EngineError::Indeterminate { check, source }) => {
                warn!(receipt_id = %id, %check, %source, "eligibility indeterminate");
                PollOutcome::Indeterminate(source)
            }
            Err(EngineError::Malformed(err)) => PollOutcome::Failed(ExecutionError::Malformed(err)),
        }
    }

    /// Polls every `interval`, handing each outcome to `on_outcome`, until `shutdown` flips to
    /// `true`, its sender is dropped, or no receipt is left to track.
    pub async fn run<F>(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_outcome: F,
    ) where
        F: FnMut(U256, &PollOutcome),
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcomes = self.poll_once().await;
                    for (id, outcome) in &outcomes {
                        on_outcome(*id, outcome);
                    }
                    debug!(
                        polled = outcomes.len(),
                        tracked = self.receipts.len(),
                        "executor round"
                    );
                    if self.receipts.is_empty() {
                        info!("no task receipts left to watch");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("executor shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// The cached view no longer matches the registry's stored hash.
fn is_stale_view(outcome: &PollOutcome) -> bool {
    matches!(
        outcome,
        PollOutcome::NotEligible(EligibilityError::InvalidTaskReceiptHash)
            | PollOutcome::Failed(ExecutionError::PreconditionChanged(
                EligibilityError::InvalidTaskReceiptHash
            ))
    )
}

/// Verdicts after which a receipt can never become executable again.
fn terminal_status(err: &EligibilityError) -> Option<ReceiptStatus> {
    match err {
        EligibilityError::NoTasksLeft => Some(ReceiptStatus::Completed),
        EligibilityError::TaskReceiptExpired => Some(ReceiptStatus::Expired),
        EligibilityError::InvalidTaskReceiptId => Some(ReceiptStatus::Cancelled),
        _ => None,
    }
}
