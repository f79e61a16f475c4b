use std::fmt;

use alloy_primitives::{Address, U256};
use gelato_task_types::{abi::is_ok_string, ChainReader, ReadError, Task, TaskReceipt, TaskSpec};
use tracing::debug;

use crate::{
    config::EngineConfig,
    errors::{EligibilityError, EngineError, Verdict},
    liquidity::is_provider_liquid,
    reader::GelatoCoreReader,
};

/// One gate of `canExec`. Gates run in [`CHECK_ORDER`]; the first failure is the verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Check {
    ReceiptValidity,
    ProviderModule,
    /// Only evaluated when `require_executor_stake` is set.
    ExecutorStake,
    ProviderLiquidity,
    GasPriceCeil,
    Conditions,
    ActionTerms,
}

pub const CHECK_ORDER: [Check; 7] = [
    Check::ReceiptValidity,
    Check::ProviderModule,
    Check::ExecutorStake,
    Check::ProviderLiquidity,
    Check::GasPriceCeil,
    Check::Conditions,
    Check::ActionTerms,
];

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::ReceiptValidity => "receipt validity",
            Check::ProviderModule => "provider module",
            Check::ExecutorStake => "executor stake",
            Check::ProviderLiquidity => "provider liquidity",
            Check::GasPriceCeil => "gas price ceiling",
            Check::Conditions => "conditions",
            Check::ActionTerms => "action terms",
        };
        f.write_str(name)
    }
}

/// Result of a single gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Fail(EligibilityError),
}

/// Read-only `canExec` over any [`ChainReader`].
#[derive(Clone, Debug)]
pub struct EligibilityEngine {
    config: EngineConfig,
}

impl EligibilityEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decides whether the head task of `receipt` may run with `gas_limit` at `gas_price`.
    ///
    /// Reads only; never mutates registry state. A read that times out or fails in transport
    /// yields [`EngineError::Indeterminate`] rather than a negative verdict.
    pub async fn can_exec<R: ChainReader + ?Sized>(
        &self,
        reader: &R,
        receipt: &TaskReceipt,
        gas_limit: U256,
        gas_price: U256,
    ) -> Result<Verdict, EngineError> {
        receipt.validate()?;
        let core =
            GelatoCoreReader::new(reader, self.config.gelato_core, self.config.read_timeout());

        for check in CHECK_ORDER {
            let step = self
                .run_check(check, &core, receipt, gas_limit, gas_price)
                .await
                .map_err(|source| EngineError::Indeterminate { check, source })?;
            if let Step::Fail(err) = step {
                debug!(receipt_id = %receipt.id, %check, reason = %err, "canExec not ok");
                return Ok(Verdict::NotOk(err));
            }
        }
        Ok(Verdict::Ok)
    }

    async fn run_check<R: ChainReader + ?Sized>(
        &self,
        check: Check,
        core: &GelatoCoreReader<'_, R>,
        receipt: &TaskReceipt,
        gas_limit: U256,
        gas_price: U256,
    ) -> Result<Step, ReadError> {
        if check == Check::ReceiptValidity {
            return receipt_validity(core, receipt).await;
        }
        // Every later gate looks at the head task, which receipt validity guarantees.
        let Some(task) = receipt.head() else {
            return Ok(Step::Fail(EligibilityError::NoTasksLeft));
        };
        match check {
            Check::ReceiptValidity => Ok(Step::Continue),
            Check::ProviderModule => provider_module(core, receipt, task).await,
            Check::ExecutorStake if self.config.require_executor_stake => {
                executor_stake(core, receipt.provider.addr).await
            }
            Check::ExecutorStake => Ok(Step::Continue),
            Check::ProviderLiquidity => {
                let funds = core.provider_funds(receipt.provider.addr).await?;
                if is_provider_liquid(&self.config, funds, gas_limit, gas_price) {
                    Ok(Step::Continue)
                } else {
                    Ok(Step::Fail(EligibilityError::ProviderIlliquid))
                }
            }
            Check::GasPriceCeil => gas_price_ceil(core, receipt, task, gas_price).await,
            Check::Conditions => conditions(core, receipt.id, task, gas_price).await,
            Check::ActionTerms => action_terms(core, receipt, task, gas_price).await,
        }
    }
}

async fn receipt_validity<R: ChainReader + ?Sized>(
    core: &GelatoCoreReader<'_, R>,
    receipt: &TaskReceipt,
) -> Result<Step, ReadError> {
    let stored = core.task_receipt_hash(receipt.id).await?;
    if stored.is_zero() {
        return Ok(Step::Fail(EligibilityError::InvalidTaskReceiptId));
    }
    if stored != receipt.hash() {
        return Ok(Step::Fail(EligibilityError::InvalidTaskReceiptHash));
    }
    let now = core.block_timestamp().await?;
    if receipt.is_expired_at(now) {
        return Ok(Step::Fail(EligibilityError::TaskReceiptExpired));
    }
    if receipt.tasks.is_empty() {
        return Ok(Step::Fail(EligibilityError::NoTasksLeft));
    }
    Ok(Step::Continue)
}

async fn provider_module<R: ChainReader + ?Sized>(
    core: &GelatoCoreReader<'_, R>,
    receipt: &TaskReceipt,
    task: &Task,
) -> Result<Step, ReadError> {
    let provider = receipt.provider;
    if !core
        .is_module_provided(provider.addr, provider.module)
        .await?
    {
        return Ok(Step::Fail(EligibilityError::ModuleNotProvided));
    }
    match core.module_is_provided(receipt, task).await {
        Ok(answer) if is_ok_string(&answer) => Ok(Step::Continue),
        Ok(_) => Ok(Step::Fail(EligibilityError::ModuleNotProvided)),
        Err(err) if err.is_deterministic() => Ok(Step::Fail(EligibilityError::ModuleNotProvided)),
        Err(err) => Err(err),
    }
}

async fn executor_stake<R: ChainReader + ?Sized>(
    core: &GelatoCoreReader<'_, R>,
    provider: Address,
) -> Result<Step, ReadError> {
    let executor = core.executor_by_provider(provider).await?;
    if executor.is_zero() {
        return Ok(Step::Fail(EligibilityError::ExecutorNotMinStaked));
    }
    let stake = core.executor_stake(executor).await?;
    if stake < core.min_executor_stake().await? {
        return Ok(Step::Fail(EligibilityError::ExecutorNotMinStaked));
    }
    Ok(Step::Continue)
}

async fn gas_price_ceil<R: ChainReader + ?Sized>(
    core: &GelatoCoreReader<'_, R>,
    receipt: &TaskReceipt,
    task: &Task,
    gas_price: U256,
) -> Result<Step, ReadError> {
    if receipt.is_self_provided() {
        if task.exceeds_gas_price_ceil(gas_price) {
            return Ok(Step::Fail(EligibilityError::SelfProviderGasPriceCeil));
        }
        return Ok(Step::Continue);
    }
    let spec = TaskSpec::from_task(task, U256::ZERO);
    let ceil = core
        .task_spec_gas_price_ceil(receipt.provider.addr, spec.hash())
        .await?;
    if ceil.is_zero() {
        return Ok(Step::Fail(EligibilityError::TaskSpecNotProvided));
    }
    if gas_price > ceil {
        return Ok(Step::Fail(EligibilityError::TaskSpecGasPriceCeil));
    }
    Ok(Step::Continue)
}

async fn conditions<R: ChainReader + ?Sized>(
    core: &GelatoCoreReader<'_, R>,
    receipt_id: U256,
    task: &Task,
    gas_price: U256,
) -> Result<Step, ReadError> {
    for (index, condition) in task.conditions.iter().enumerate() {
        match core.condition_ok(receipt_id, condition, gas_price).await {
            Ok(answer) if is_ok_string(&answer) => {}
            Ok(reason) => {
                return Ok(Step::Fail(EligibilityError::ConditionNotOk {
                    index: Some(index),
                    reason,
                }))
            }
            Err(err) if err.is_deterministic() => {
                let reason = err.revert_reason().unwrap_or_default();
                return Ok(Step::Fail(EligibilityError::ConditionReverted {
                    index: Some(index),
                    reason,
                }));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Step::Continue)
}

async fn action_terms<R: ChainReader + ?Sized>(
    core: &GelatoCoreReader<'_, R>,
    receipt: &TaskReceipt,
    task: &Task,
    gas_price: U256,
) -> Result<Step, ReadError> {
    for (index, action) in task.actions.iter().enumerate() {
        if !action.terms_ok_check {
            continue;
        }
        match core
            .action_terms_ok(receipt.id, receipt.user_proxy, action, gas_price)
            .await
        {
            Ok(answer) if is_ok_string(&answer) => {}
            Ok(reason) => {
                return Ok(Step::Fail(EligibilityError::ActionTermsNotOk {
                    index: Some(index),
                    reason,
                }))
            }
            Err(err) if err.is_deterministic() => {
                let reason = err.revert_reason().unwrap_or_default();
                return Ok(Step::Fail(EligibilityError::ActionTermsReverted {
                    index: Some(index),
                    reason,
                }));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Step::Continue)
}
