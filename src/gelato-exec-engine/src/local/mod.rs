//! In-process `GelatoCore`: the registry ledger, its oracle and simulated task contracts.
//!
//! Used for dry runs and tests. Every `exec` runs under one lock on a cloned ledger that is
//! swapped in only when the whole step succeeded, so a failed step leaves no trace.

mod contracts;
mod state;

use std::sync::Arc;

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use gelato_task_types::{
    abi::{is_ok_string, IGelatoAction, IGelatoCore},
    ChainReader, GasPriceOracle, Operation, ReadError, TaskReceipt, TaskSpec, TaskSubmission,
    NO_CEIL,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use contracts::{
    unknown_selector, ActionChiMint, ChiToken, ConditionTimestamp, IActionChiMint, IChiToken,
    IConditionTimestamp, ProviderModuleUserProxy, SimContract, CHI_MINT_GAS_PER_TOKEN,
};
pub use state::{encode_return, ExecContext, LedgerState, StateView, OUT_OF_GAS};

use crate::{
    config::EngineConfig,
    driver::{ExecBackend, ExecSuccess, TxOptions},
    eligibility::EligibilityEngine,
    errors::{EligibilityError, EngineError, ExecutionError, RegistryError, Verdict},
    liquidity::{exec_tx_cost, FeeSplit},
    registry::{ReceiptStatus, TaskRegistry},
};

/// Registry address used when the configuration leaves `gelato_core` unset.
pub const DEFAULT_GELATO_CORE: Address = address!("0000000000000000000000000000000000001001");
pub const GAS_PRICE_ORACLE: Address = address!("0000000000000000000000000000000000001002");

pub struct LocalGelato {
    engine: EligibilityEngine,
    oracle: Address,
    state: Mutex<LedgerState>,
}

impl LocalGelato {
    pub fn new(mut config: EngineConfig) -> Self {
        if config.gelato_core.is_zero() {
            config.gelato_core = DEFAULT_GELATO_CORE;
        }
        Self {
            engine: EligibilityEngine::new(config),
            oracle: GAS_PRICE_ORACLE,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub fn core(&self) -> Address {
        self.engine.config().gelato_core
    }

    pub fn oracle(&self) -> Address {
        self.oracle
    }

    fn view<'a>(&self, state: &'a LedgerState) -> StateView<'a> {
        StateView::new(state, self.core(), self.oracle)
    }

    pub async fn deploy(&self, at: Address, contract: impl SimContract + 'static) {
        let mut state = self.state.lock().await;
        state.contracts.insert(at, Arc::new(contract));
    }

    pub async fn set_gas_price(&self, gas_price: U256) {
        self.state.lock().await.gas_price = gas_price;
    }

    pub async fn set_timestamp(&self, timestamp: u64) {
        self.state.lock().await.timestamp = timestamp;
    }

    pub async fn set_balance(&self, account: Address, amount: U256) {
        self.state.lock().await.balances.insert(account, amount);
    }

    pub async fn balance_of(&self, account: Address) -> U256 {
        self.state.lock().await.balance_of(account)
    }

    pub async fn provider_funds(&self, provider: Address) -> U256 {
        let state = self.state.lock().await;
        funds_of(&state, provider)
    }

    pub async fn sys_admin_funds(&self) -> U256 {
        self.state.lock().await.sys_admin_funds
    }

    /// Deposits `amount` into the provider's gas tank; returns the new balance.
    pub async fn provide_funds(&self, provider: Address, amount: U256) -> U256 {
        let mut state = self.state.lock().await;
        let funds = state.provider_funds.entry(provider).or_default();
        *funds = funds.saturating_add(amount);
        let balance = *funds;
        info!(%provider, %amount, %balance, "LogFundsProvided");
        balance
    }

    pub async fn unprovide_funds(
        &self,
        provider: Address,
        amount: U256,
    ) -> Result<U256, RegistryError> {
        let mut state = self.state.lock().await;
        let available = funds_of(&state, provider);
        let remaining = available.checked_sub(amount).ok_or(RegistryError::InsufficientFunds {
            provider,
            available,
            requested: amount,
        })?;
        state.provider_funds.insert(provider, remaining);
        state.credit(provider, amount);
        info!(%provider, %amount, balance = %remaining, "LogFundsUnprovided");
        Ok(remaining)
    }

    /// Assigns an executor, whitelists task specs and provider modules in one step.
    ///
    /// A zero `executor` leaves the current assignment in place; a spec without a ceiling is
    /// stored with [`NO_CEIL`].
    pub async fn multi_provide(
        &self,
        provider: Address,
        executor: Address,
        task_specs: &[TaskSpec],
        modules: &[Address],
    ) {
        let mut state = self.state.lock().await;
        if !executor.is_zero() {
            state.executor_by_provider.insert(provider, executor);
        }
        for spec in task_specs {
            let ceil = if spec.gas_price_ceil.is_zero() {
                NO_CEIL
            } else {
                spec.gas_price_ceil
            };
            state.task_spec_gas_price_ceil.insert((provider, spec.hash()), ceil);
        }
        for module in modules {
            state.provided_modules.insert((provider, *module));
        }
        info!(
            %provider,
            %executor,
            specs = task_specs.len(),
            modules = modules.len(),
            "LogMultiProvide"
        );
    }

    pub async fn stake_executor(&self, executor: Address, amount: U256) {
        let mut state = self.state.lock().await;
        let stake = state.executor_stake.entry(executor).or_default();
        *stake = stake.saturating_add(amount);
    }

    pub async fn set_min_executor_stake(&self, amount: U256) {
        self.state.lock().await.min_executor_stake = amount;
    }

    async fn can_exec_view(&self, state: &LedgerState, data: &[u8]) -> Result<Bytes, ReadError> {
        let call = IGelatoCore::canExecCall::abi_decode(data, true)
            .map_err(|_| ReadError::Reverted(unknown_selector(data)))?;
        let receipt = TaskReceipt::try_from(call.taskReceipt)
            .map_err(|err| ReadError::Reverted(err.to_string()))?;
        let verdict = self
            .engine
            .can_exec(&self.view(state), &receipt, call.gasLimit, call.execTxGasPrice)
            .await;
        match verdict {
            Ok(verdict) => Ok(encode_return(verdict.to_string())),
            Err(EngineError::Malformed(err)) => Err(ReadError::Reverted(err.to_string())),
            Err(EngineError::Indeterminate { source, .. }) => Err(source),
        }
    }
}

#[async_trait]
impl ChainReader for LocalGelato {
    async fn block_timestamp(&self) -> Result<u64, ReadError> {
        Ok(self.state.lock().await.timestamp)
    }

    async fn read(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError> {
        let state = self.state.lock().await;
        if target == self.core() && data.starts_with(&IGelatoCore::canExecCall::SELECTOR) {
            return self.can_exec_view(&state, &data).await;
        }
        self.view(&state).dispatch(target, &data)
    }
}

#[async_trait]
impl GasPriceOracle for LocalGelato {
    async fn current_gas_price(&self) -> Result<U256, ReadError> {
        Ok(self.state.lock().await.gas_price)
    }
}

#[async_trait]
impl ExecBackend for LocalGelato {
    async fn exec(
        &self,
        receipt: &TaskReceipt,
        opts: &TxOptions,
    ) -> Result<ExecSuccess, ExecutionError> {
        let mut state = self.state.lock().await;
        let config = self.engine.config();
        let core = self.core();
        let gelato_gas_price = state.gas_price;

        if opts.gas_price < gelato_gas_price {
            return Err(ExecutionError::Underpriced {
                offered: opts.gas_price,
                required: gelato_gas_price,
            });
        }
        let provider = receipt.provider.addr;
        let assigned = state
            .executor_by_provider
            .get(&provider)
            .copied()
            .unwrap_or_default();
        if assigned != opts.executor {
            return Err(ExecutionError::InvalidExecutor(opts.executor));
        }
        let mut task_gas = U256::ZERO;
        if let Some(task) = receipt.head() {
            task_gas = task.self_provider_gas_limit;
            if task_gas.is_zero() {
                task_gas = U256::from(config.gelato_max_gas);
            }
            if opts.gas_limit < task_gas {
                return Err(ExecutionError::InsufficientGas {
                    provided: opts.gas_limit,
                    required: task_gas,
                });
            }
        }

        let verdict = self
            .engine
            .can_exec(&self.view(&state), receipt, task_gas, gelato_gas_price)
            .await?;
        if let Verdict::NotOk(err) = verdict {
            debug!(receipt_id = %receipt.id, reason = %err, "LogCanExecFailed");
            return Err(ExecutionError::PreconditionChanged(err));
        }
        let Some(task) = receipt.head() else {
            return Err(ExecutionError::PreconditionChanged(EligibilityError::NoTasksLeft));
        };

        let mut next = state.clone();
        let gas_budget = opts.gas_limit.saturating_to::<u64>();
        let mut gas_used = 0u64;
        for (index, action) in task.actions.iter().enumerate() {
            if action.terms_ok_check {
                let call = IGelatoAction::termsOkCall {
                    taskReceiptId: receipt.id,
                    userProxy: receipt.user_proxy,
                    actionData: action.data.clone(),
                    dataFlow: action.data_flow as u8,
                    value: action.value,
                    gelatoGasPrice: gelato_gas_price,
                };
                let answer = self
                    .view(&next)
                    .dispatch(action.target, &call.abi_encode())
                    .and_then(|out| {
                        IGelatoAction::termsOkCall::abi_decode_returns(&out, true)
                            .map(|ret| ret._0)
                            .map_err(|_| ReadError::MalformedReturn)
                    });
                match answer {
                    Ok(answer) if is_ok_string(&answer) => {}
                    Ok(reason) => return Err(ExecutionError::TermsNotOk { index, reason }),
                    Err(err) => {
                        return Err(ExecutionError::TermsNotOk {
                            index,
                            reason: err.to_string(),
                        })
                    }
                }
            }

            let reverted = |reason: String| ExecutionError::ActionReverted {
                index: Some(index),
                reason,
            };
            let contract = next
                .contract(action.target)
                .ok_or_else(|| reverted(format!("no contract at {}", action.target)))?;
            let (caller, this) = match action.operation {
                Operation::Call => {
                    if !action.value.is_zero() {
                        next.transfer(receipt.user_proxy, action.target, action.value)
                            .map_err(reverted)?;
                    }
                    (receipt.user_proxy, action.target)
                }
                Operation::Delegatecall => (core, receipt.user_proxy),
            };
            let mut ctx =
                ExecContext::new(&mut next, caller, this, action.value, gas_budget - gas_used);
            let result = contract.execute(&mut ctx, &action.data);
            let (used, needed) = (ctx.gas_used(), ctx.gas_needed());
            if let Err(reason) = result {
                if let Some(needed) = needed {
                    return Err(ExecutionError::InsufficientGas {
                        provided: opts.gas_limit,
                        required: U256::from(gas_used.saturating_add(needed)),
                    });
                }
                return Err(reverted(reason));
            }
            gas_used += used;
        }

        let cost = exec_tx_cost(config, U256::from(gas_used), gelato_gas_price);
        let split = FeeSplit::for_cost(config, cost);
        let funds = funds_of(&next, provider);
        let remaining = funds.checked_sub(split.total()).ok_or_else(|| {
            let fee = split.total();
            ExecutionError::PayoutFailed(format!("provider funds {funds} below fee {fee}"))
        })?;
        next.provider_funds.insert(provider, remaining);
        next.sys_admin_funds = next.sys_admin_funds.saturating_add(split.sys_admin_success_fee);
        ExecContext::new(&mut next, core, core, U256::ZERO, gas_budget)
            .pay(opts.executor, split.executor_payout)
            .map_err(ExecutionError::PayoutFailed)?;

        let advanced = receipt.advanced();
        next.receipt_hashes.insert(receipt.id, advanced.hash());
        next.receipts.insert(receipt.id, advanced);
        let block_timestamp = next.timestamp;
        *state = next;

        info!(
            executor = %opts.executor,
            receipt_id = %receipt.id,
            executor_success_fee = %split.executor_success_fee,
            sys_admin_success_fee = %split.sys_admin_success_fee,
            gas_used,
            "LogExecSuccess"
        );
        Ok(ExecSuccess {
            receipt_id: receipt.id,
            executor_payout: split.executor_payout,
            executor_success_fee: split.executor_success_fee,
            sys_admin_success_fee: split.sys_admin_success_fee,
            gas_used: U256::from(gas_used),
            block_timestamp,
        })
    }
}

#[async_trait]
impl TaskRegistry for LocalGelato {
    async fn submit_task_cycle(
        &self,
        submission: TaskSubmission,
    ) -> Result<TaskReceipt, RegistryError> {
        submission.validate()?;
        let self_provided = submission.user_proxy == submission.provider.addr;
        let mut tasks = submission.expand();
        for task in tasks.iter_mut() {
            task.self_provider_gas_price_ceil = task
                .self_provider_gas_price_ceil
                .filter(|ceil| !ceil.is_zero() && *ceil != NO_CEIL);
            if self_provided && task.self_provider_gas_limit.is_zero() {
                task.self_provider_gas_limit = U256::from(self.config().gelato_max_gas);
            }
        }

        let mut state = self.state.lock().await;
        let id = state.last_receipt_id + U256::from(1);
        state.last_receipt_id = id;
        let receipt = TaskReceipt {
            id,
            user_proxy: submission.user_proxy,
            provider: submission.provider,
            tasks,
            expiry_date: submission.expiry_date,
        };
        let hash = receipt.hash();
        state.receipt_hashes.insert(id, hash);
        state.receipts.insert(id, receipt.clone());
        info!(
            task_receipt_id = %id,
            task_receipt_hash = %hash,
            tasks = receipt.tasks.len(),
            "LogTaskSubmitted"
        );
        Ok(receipt)
    }

    async fn cancel_task(&self, receipt: &TaskReceipt) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        if state.cancelled.contains(&receipt.id) {
            return Err(RegistryError::NotActive(receipt.id));
        }
        let stored = state
            .receipt_hashes
            .get(&receipt.id)
            .copied()
            .ok_or(RegistryError::UnknownReceipt(receipt.id))?;
        if stored != receipt.hash() {
            return Err(RegistryError::StaleReceipt(receipt.id));
        }
        if receipt.tasks.is_empty() || receipt.is_expired_at(state.timestamp) {
            return Err(RegistryError::NotActive(receipt.id));
        }
        state.receipt_hashes.remove(&receipt.id);
        state.receipts.remove(&receipt.id);
        state.cancelled.insert(receipt.id);
        info!(task_receipt_id = %receipt.id, "LogTaskCancelled");
        Ok(())
    }

    async fn receipt_status(&self, id: U256) -> Result<ReceiptStatus, RegistryError> {
        let state = self.state.lock().await;
        if state.cancelled.contains(&id) {
            return Ok(ReceiptStatus::Cancelled);
        }
        let status = match state.receipts.get(&id) {
            None => ReceiptStatus::Unknown,
            Some(receipt) if receipt.tasks.is_empty() => ReceiptStatus::Completed,
            Some(receipt) if receipt.is_expired_at(state.timestamp) => ReceiptStatus::Expired,
            Some(receipt) => ReceiptStatus::Active(receipt.clone()),
        };
        Ok(status)
    }
}

fn funds_of(state: &LedgerState, provider: Address) -> U256 {
    state.provider_funds.get(&provider).copied().unwrap_or_default()
}
