use std::{sync::Arc, time::Duration};

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use gelato_exec_engine::{
    liquidity::min_exec_provider_funds,
    local::{
        ActionChiMint, ChiToken, ConditionTimestamp, ExecContext, IChiToken,
        ProviderModuleUserProxy, SimContract, StateView,
    },
    Check, CoreGasPriceOracle, CycleState, EligibilityEngine, EligibilityError, EngineConfig,
    EngineError, ExecBackend, ExecutionDriver, ExecutionError, Executor, LocalGelato, PollOutcome,
    ReceiptStatus, RegistryError, TaskRegistry, TrackedReceipt, TxOptions, Verdict,
};
use gelato_task_types::{
    abi::IGelatoCore, Action, ChainReader, Condition, GasPriceOracle, GelatoProvider, ReadError,
    Task, TaskReceipt, TaskSpec, TaskSubmission,
};

const USER: Address = address!("00000000000000000000000000000000000000a1");
const PROXY: Address = address!("00000000000000000000000000000000000000b1");
const PROVIDER: Address = address!("00000000000000000000000000000000000000b2");
const MODULE: Address = address!("00000000000000000000000000000000000000c1");
const CHI: Address = address!("00000000000000000000000000000000000000d1");
const ACTION: Address = address!("00000000000000000000000000000000000000d2");
const CONDITION: Address = address!("00000000000000000000000000000000000000d3");
const EXECUTOR: Address = address!("00000000000000000000000000000000000000e1");

const GAS_LIMIT: u64 = 6_000_000;
const NOW: u64 = 1_000;

fn gwei(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000u64)
}

fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000_000_000_000u64)
}

async fn setup(config: EngineConfig) -> Arc<LocalGelato> {
    let gelato = Arc::new(LocalGelato::new(config));
    gelato.set_gas_price(gwei(80)).await;
    gelato.set_timestamp(NOW).await;
    gelato.deploy(CHI, ChiToken).await;
    gelato.deploy(ACTION, ActionChiMint::new(CHI)).await;
    gelato.deploy(CONDITION, ConditionTimestamp).await;
    gelato.deploy(MODULE, ProviderModuleUserProxy::new()).await;
    gelato.stake_executor(EXECUTOR, ether(1)).await;
    // Self-provider: the user proxy assigns the executor, whitelists the module and funds itself.
    gelato.multi_provide(PROXY, EXECUTOR, &[], &[MODULE]).await;
    gelato.provide_funds(PROXY, ether(1)).await;
    gelato
}

fn mint_action(amount: u64) -> Action {
    Action::delegatecall(ACTION, ActionChiMint::action_data(USER, U256::from(amount)))
}

fn chi_task(amount: u64) -> Task {
    Task::new(vec![mint_action(amount).with_terms_ok_check()])
        .with_gas_limit(GAS_LIMIT)
        .with_gas_price_ceil(gwei(40))
}

async fn submit(gelato: &LocalGelato, task: Task, cycles: u32, expiry_date: u64) -> TaskReceipt {
    gelato
        .submit_task_cycle(TaskSubmission {
            user_proxy: PROXY,
            provider: GelatoProvider::new(PROXY, MODULE),
            tasks: vec![task],
            expiry_date,
            cycles,
        })
        .await
        .unwrap()
}

fn engine(gelato: &LocalGelato) -> EligibilityEngine {
    EligibilityEngine::new(gelato.config().clone())
}

fn opts(gas_price: U256) -> TxOptions {
    TxOptions {
        executor: EXECUTOR,
        gas_limit: U256::from(GAS_LIMIT + 30_000),
        gas_price,
    }
}

async fn chi_balance(gelato: &LocalGelato, owner: Address) -> U256 {
    let out = gelato
        .read(CHI, IChiToken::balanceOfCall { owner }.abi_encode().into())
        .await
        .unwrap();
    IChiToken::balanceOfCall::abi_decode_returns(&out, true).unwrap()._0
}

async fn can_exec(gelato: &LocalGelato, receipt: &TaskReceipt, gas_price: U256) -> Verdict {
    engine(gelato)
        .can_exec(gelato, receipt, U256::from(GAS_LIMIT), gas_price)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_mints_chi_when_gas_price_halves() {
    let gelato = setup(EngineConfig::default()).await;
    let receipt = submit(&gelato, chi_task(140), 2, 0).await;

    assert_eq!(
        can_exec(&gelato, &receipt, gwei(80)).await,
        Verdict::NotOk(EligibilityError::SelfProviderGasPriceCeil)
    );

    gelato.set_gas_price(gwei(40)).await;
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);

    // The registry answers the same through its own `canExec` view.
    let call = IGelatoCore::canExecCall {
        taskReceipt: (&receipt).into(),
        gasLimit: U256::from(GAS_LIMIT),
        execTxGasPrice: gwei(40),
    };
    let out = gelato
        .read(gelato.core(), call.abi_encode().into())
        .await
        .unwrap();
    assert_eq!(IGelatoCore::canExecCall::abi_decode_returns(&out, true).unwrap()._0, "OK");

    let funds_before = gelato.provider_funds(PROXY).await;
    let driver = ExecutionDriver::new(gelato.clone());
    let mut tracked = TrackedReceipt::new(receipt);
    let result = driver.exec(&mut tracked, &opts(gwei(40))).await.unwrap();

    assert_eq!(chi_balance(&gelato, USER).await, U256::from(140));
    assert_eq!(result.remaining_tasks, 1);
    assert_eq!(result.state, CycleState::PartiallyExecuted);

    let gas_used = U256::from(25_000u64 + 140 * 36_000);
    assert_eq!(result.success.gas_used, gas_used);
    let cost = (U256::from(55_000u64) + gas_used) * gwei(40);
    let fee = cost / U256::from(20u64);
    assert_eq!(result.success.executor_payout, cost + fee);
    assert_eq!(gelato.balance_of(EXECUTOR).await, cost + fee);
    assert_eq!(gelato.sys_admin_funds().await, fee);
    assert_eq!(gelato.provider_funds(PROXY).await, funds_before - cost - fee - fee);
}

#[tokio::test]
async fn test_cycle_exhausts_after_n_execs() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(1), 3, 0).await;
    let driver = ExecutionDriver::new(gelato.clone());
    let mut tracked = TrackedReceipt::new(receipt);

    for expected in [
        CycleState::PartiallyExecuted,
        CycleState::PartiallyExecuted,
        CycleState::Completed,
    ] {
        let result = driver.exec(&mut tracked, &opts(gwei(40))).await.unwrap();
        assert_eq!(result.state, expected);
    }
    assert_eq!(chi_balance(&gelato, USER).await, U256::from(3));

    assert_eq!(
        driver.exec(&mut tracked, &opts(gwei(40))).await,
        Err(ExecutionError::PreconditionChanged(EligibilityError::NoTasksLeft))
    );
    assert_eq!(
        can_exec(&gelato, tracked.receipt(), gwei(40)).await,
        Verdict::NotOk(EligibilityError::NoTasksLeft)
    );
    assert_eq!(gelato.receipt_status(tracked.id()).await, Ok(ReceiptStatus::Completed));
}

#[tokio::test]
async fn test_unfunded_provider_is_illiquid() {
    let gelato = setup(EngineConfig::default()).await;
    let receipt = submit(&gelato, chi_task(140), 1, 0).await;
    gelato.unprovide_funds(PROXY, ether(1)).await.unwrap();

    for price in [U256::from(1), gwei(1), gwei(40), gwei(80)] {
        assert_eq!(
            can_exec(&gelato, &receipt, price).await,
            Verdict::NotOk(EligibilityError::ProviderIlliquid)
        );
    }
    assert_eq!(
        gelato.unprovide_funds(PROXY, U256::from(1)).await,
        Err(RegistryError::InsufficientFunds {
            provider: PROXY,
            available: U256::ZERO,
            requested: U256::from(1),
        })
    );
}

#[tokio::test]
async fn test_liquidity_threshold_is_inclusive() {
    let config = EngineConfig::default();
    let gelato = setup(config.clone()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(140), 1, 0).await;
    let required = min_exec_provider_funds(&config, U256::from(GAS_LIMIT), gwei(40));

    gelato.unprovide_funds(PROXY, ether(1)).await.unwrap();
    gelato.provide_funds(PROXY, required).await;
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);

    gelato.unprovide_funds(PROXY, U256::from(1)).await.unwrap();
    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::ProviderIlliquid)
    );
}

#[tokio::test]
async fn test_receipt_expires_at_expiry_date() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(1), 1, 2_000).await;

    gelato.set_timestamp(1_999).await;
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);

    gelato.set_timestamp(2_000).await;
    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::TaskReceiptExpired)
    );
    assert_eq!(
        gelato.exec(&receipt, &opts(gwei(40))).await,
        Err(ExecutionError::PreconditionChanged(EligibilityError::TaskReceiptExpired))
    );
    let mut tracked = TrackedReceipt::new(receipt);
    assert_eq!(tracked.observe_time(2_000), CycleState::Expired);
    assert_eq!(gelato.receipt_status(tracked.id()).await, Ok(ReceiptStatus::Expired));
}

#[tokio::test]
async fn test_terms_failure_changes_nothing() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(141), 1, 0).await;

    let expected = EligibilityError::ActionTermsNotOk {
        index: Some(0),
        reason: "ActionChiMint: chiAmount exceeds 140".into(),
    };
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::NotOk(expected.clone()));

    let funds = gelato.provider_funds(PROXY).await;
    assert_eq!(
        gelato.exec(&receipt, &opts(gwei(40))).await,
        Err(ExecutionError::PreconditionChanged(expected))
    );
    assert_eq!(gelato.provider_funds(PROXY).await, funds);
    assert_eq!(chi_balance(&gelato, USER).await, U256::ZERO);
}

#[tokio::test]
async fn test_reverting_action_rolls_back_earlier_actions() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    // No terms check on the second action, so only execution can catch the oversized mint.
    let task = Task::new(vec![mint_action(10), mint_action(141)]).with_gas_limit(GAS_LIMIT);
    let receipt = submit(&gelato, task, 1, 0).await;
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);

    let funds = gelato.provider_funds(PROXY).await;
    assert_eq!(
        gelato.exec(&receipt, &opts(gwei(40))).await,
        Err(ExecutionError::ActionReverted {
            index: Some(1),
            reason: "ActionChiMint: chiAmount exceeds 140".into()
        })
    );
    assert_eq!(chi_balance(&gelato, USER).await, U256::ZERO);
    assert_eq!(gelato.provider_funds(PROXY).await, funds);
    assert_eq!(gelato.balance_of(EXECUTOR).await, U256::ZERO);
    // The receipt is untouched and still executable.
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);
}

#[tokio::test]
async fn test_out_of_gas_is_insufficient_gas() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let task = Task::new(vec![mint_action(140)]).with_gas_limit(1_000_000);
    let receipt = submit(&gelato, task, 1, 0).await;

    let tight = TxOptions {
        gas_limit: U256::from(1_000_000u64),
        ..opts(gwei(40))
    };
    assert_eq!(
        gelato.exec(&receipt, &tight).await,
        Err(ExecutionError::InsufficientGas {
            provided: U256::from(1_000_000u64),
            required: U256::from(25_000u64 + 140 * 36_000)
        })
    );
    assert_eq!(chi_balance(&gelato, USER).await, U256::ZERO);
}

struct RejectingPayee;

impl SimContract for RejectingPayee {
    fn view(&self, _: &StateView<'_>, _: Address, _: &[u8]) -> Result<Bytes, ReadError> {
        Err(ReadError::Reverted("no views".into()))
    }

    fn receive(&self, _ctx: &mut ExecContext<'_>) -> Result<(), String> {
        Err("RejectingPayee: no thanks".into())
    }
}

#[tokio::test]
async fn test_payout_failure_rolls_back() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    gelato.deploy(EXECUTOR, RejectingPayee).await;
    let receipt = submit(&gelato, chi_task(140), 1, 0).await;
    let funds = gelato.provider_funds(PROXY).await;

    assert_eq!(
        gelato.exec(&receipt, &opts(gwei(40))).await,
        Err(ExecutionError::PayoutFailed("RejectingPayee: no thanks".into()))
    );
    assert_eq!(chi_balance(&gelato, USER).await, U256::ZERO);
    assert_eq!(gelato.provider_funds(PROXY).await, funds);
    assert_eq!(gelato.receipt_status(receipt.id).await, Ok(ReceiptStatus::Active(receipt)));
}

#[tokio::test]
async fn test_concurrent_execs_exactly_one_wins() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(140), 2, 0).await;

    let first = tokio::spawn({
        let gelato = gelato.clone();
        let receipt = receipt.clone();
        async move { gelato.exec(&receipt, &opts(gwei(40))).await }
    });
    let second = tokio::spawn({
        let gelato = gelato.clone();
        let receipt = receipt.clone();
        async move { gelato.exec(&receipt, &opts(gwei(40))).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find(|r| r.is_err()).unwrap();
    assert_eq!(
        loser,
        Err(ExecutionError::PreconditionChanged(
            EligibilityError::InvalidTaskReceiptHash
        ))
    );
    assert_eq!(chi_balance(&gelato, USER).await, U256::from(140));
}

#[tokio::test]
async fn test_can_exec_is_idempotent() {
    let gelato = setup(EngineConfig::default()).await;
    let receipt = submit(&gelato, chi_task(140), 1, 0).await;
    let funds = gelato.provider_funds(PROXY).await;

    let first = can_exec(&gelato, &receipt, gwei(80)).await;
    let second = can_exec(&gelato, &receipt, gwei(80)).await;
    assert_eq!(first, second);
    assert_eq!(gelato.provider_funds(PROXY).await, funds);
    assert_eq!(gelato.receipt_status(receipt.id).await, Ok(ReceiptStatus::Active(receipt)));
}

#[tokio::test]
async fn test_exec_guards() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(1), 1, 0).await;

    assert_eq!(
        gelato.exec(&receipt, &opts(gwei(39))).await,
        Err(ExecutionError::Underpriced {
            offered: gwei(39),
            required: gwei(40),
        })
    );
    let stranger = TxOptions {
        executor: USER,
        ..opts(gwei(40))
    };
    assert_eq!(
        gelato.exec(&receipt, &stranger).await,
        Err(ExecutionError::InvalidExecutor(USER))
    );
    let short = TxOptions {
        gas_limit: U256::from(GAS_LIMIT - 1),
        ..opts(gwei(40))
    };
    assert_eq!(
        gelato.exec(&receipt, &short).await,
        Err(ExecutionError::InsufficientGas {
            provided: U256::from(GAS_LIMIT - 1),
            required: U256::from(GAS_LIMIT)
        })
    );
}

#[tokio::test]
async fn test_cancelled_receipt_is_unknown() {
    let gelato = setup(EngineConfig::default()).await;
    let receipt = submit(&gelato, chi_task(1), 1, 0).await;

    gelato.cancel_task(&receipt).await.unwrap();
    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::InvalidTaskReceiptId)
    );
    assert_eq!(gelato.receipt_status(receipt.id).await, Ok(ReceiptStatus::Cancelled));
    assert_eq!(gelato.cancel_task(&receipt).await, Err(RegistryError::NotActive(receipt.id)));

    let mut tracked = TrackedReceipt::new(receipt);
    let driver = ExecutionDriver::new(gelato.clone());
    assert_eq!(driver.refresh(gelato.as_ref(), &mut tracked).await, Ok(CycleState::Cancelled));
}

#[tokio::test]
async fn test_submission_normalises_self_provider_defaults() {
    let gelato = setup(EngineConfig::default()).await;
    let task = Task::new(vec![mint_action(1)]).with_gas_price_ceil(U256::ZERO);
    let receipt = submit(&gelato, task, 2, 0).await;

    assert_eq!(receipt.id, U256::from(1));
    assert_eq!(receipt.tasks.len(), 2);
    assert_eq!(receipt.tasks[0].self_provider_gas_limit, U256::from(7_000_000u64));
    assert_eq!(receipt.tasks[0].self_provider_gas_price_ceil, None);

    let next = submit(&gelato, chi_task(1), 1, 0).await;
    assert_eq!(next.id, U256::from(2));
}

#[tokio::test]
async fn test_external_provider_needs_task_spec() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let task = Task::new(vec![mint_action(1).with_terms_ok_check()]);
    gelato.multi_provide(PROVIDER, EXECUTOR, &[], &[MODULE]).await;
    gelato.provide_funds(PROVIDER, ether(1)).await;
    let receipt = gelato
        .submit_task_cycle(TaskSubmission {
            user_proxy: PROXY,
            provider: GelatoProvider::new(PROVIDER, MODULE),
            tasks: vec![task.clone()],
            expiry_date: 0,
            cycles: 1,
        })
        .await
        .unwrap();
    let gas_limit = U256::from(7_000_000u64);
    let engine = engine(&gelato);

    let verdict = engine
        .can_exec(gelato.as_ref(), &receipt, gas_limit, gwei(40))
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::NotOk(EligibilityError::TaskSpecNotProvided));

    let spec = TaskSpec::from_task(&task, gwei(50));
    gelato.multi_provide(PROVIDER, Address::ZERO, &[spec], &[]).await;
    let verdict = engine
        .can_exec(gelato.as_ref(), &receipt, gas_limit, gwei(40))
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::Ok);
    let verdict = engine
        .can_exec(gelato.as_ref(), &receipt, gas_limit, gwei(60))
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::NotOk(EligibilityError::TaskSpecGasPriceCeil));
}

#[tokio::test]
async fn test_module_must_be_provided() {
    let gelato = setup(EngineConfig::default()).await;
    let other_module = address!("00000000000000000000000000000000000000c2");
    gelato.deploy(other_module, ProviderModuleUserProxy::with_proxies([USER])).await;
    let task = chi_task(1);
    let submission = |module| TaskSubmission {
        user_proxy: PROXY,
        provider: GelatoProvider::new(PROXY, module),
        tasks: vec![task.clone()],
        expiry_date: 0,
        cycles: 1,
    };

    let receipt = gelato
        .submit_task_cycle(submission(other_module))
        .await
        .unwrap();
    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::ModuleNotProvided)
    );

    // Whitelisted by the provider, but the module rejects this user proxy.
    gelato.multi_provide(PROXY, Address::ZERO, &[], &[other_module]).await;
    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::ModuleNotProvided)
    );
}

#[tokio::test]
async fn test_executor_stake_layer() {
    let config = EngineConfig {
        require_executor_stake: true,
        ..Default::default()
    };
    let gelato = setup(config).await;
    gelato.set_min_executor_stake(ether(2)).await;
    let receipt = submit(&gelato, chi_task(1), 1, 0).await;

    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::ExecutorNotMinStaked)
    );
    gelato.stake_executor(EXECUTOR, ether(1)).await;
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);
}

#[tokio::test]
async fn test_conditions_gate_execution() {
    let gelato = setup(EngineConfig::default()).await;
    let missing = address!("00000000000000000000000000000000000000d9");
    let task = chi_task(1).with_conditions(vec![Condition::new(
        CONDITION,
        ConditionTimestamp::condition_data(1_500),
    )]);
    let receipt = submit(&gelato, task, 1, 0).await;

    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::ConditionNotOk {
            index: Some(0),
            reason: "NotOkTimestampDidNotPass".into()
        })
    );
    gelato.set_timestamp(1_500).await;
    assert_eq!(can_exec(&gelato, &receipt, gwei(40)).await, Verdict::Ok);

    let broken = chi_task(1).with_conditions(vec![Condition::new(missing, vec![])]);
    let receipt = submit(&gelato, broken, 1, 0).await;
    assert_eq!(
        can_exec(&gelato, &receipt, gwei(40)).await,
        Verdict::NotOk(EligibilityError::ConditionReverted {
            index: Some(0),
            reason: format!("no contract at {missing}")
        })
    );
}

struct SlowReader {
    inner: Arc<LocalGelato>,
    delay: Duration,
}

#[async_trait]
impl ChainReader for SlowReader {
    async fn block_timestamp(&self) -> Result<u64, ReadError> {
        self.inner.block_timestamp().await
    }

    async fn read(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read(target, data).await
    }
}

#[tokio::test]
async fn test_read_timeout_is_indeterminate() {
    let config = EngineConfig {
        read_timeout_ms: 20,
        ..Default::default()
    };
    let gelato = setup(config.clone()).await;
    let receipt = submit(&gelato, chi_task(1), 1, 0).await;
    let slow = SlowReader {
        inner: gelato.clone(),
        delay: Duration::from_millis(500),
    };

    let err = EligibilityEngine::new(gelato.config().clone())
        .can_exec(&slow, &receipt, U256::from(GAS_LIMIT), gwei(40))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Indeterminate {
            check: Check::ReceiptValidity,
            source: ReadError::Timeout,
        }
    );
}

#[tokio::test]
async fn test_oracle_resolves_through_registry() {
    let gelato = setup(EngineConfig::default()).await;
    let oracle = CoreGasPriceOracle::new(gelato.clone(), gelato.core(), Duration::from_secs(1));
    assert_eq!(oracle.current_gas_price().await, Ok(gwei(80)));
    gelato.set_gas_price(gwei(40)).await;
    assert_eq!(oracle.current_gas_price().await, Ok(gwei(40)));
}

type LocalExecutor =
    Executor<Arc<LocalGelato>, Arc<LocalGelato>, Arc<LocalGelato>, Arc<LocalGelato>>;

fn executor(gelato: &Arc<LocalGelato>) -> LocalExecutor {
    Executor::new(
        engine(gelato),
        gelato.clone(),
        gelato.clone(),
        gelato.clone(),
        gelato.clone(),
        EXECUTOR,
    )
}

#[tokio::test]
async fn test_executor_polls_until_done() {
    let gelato = setup(EngineConfig::default()).await;
    let receipt = submit(&gelato, chi_task(140), 1, 0).await;
    let id = receipt.id;
    let mut executor = executor(&gelato);
    executor.track(TrackedReceipt::new(receipt));

    let outcomes = executor.poll_once().await;
    assert_eq!(
        outcomes,
        vec![(id, PollOutcome::NotEligible(EligibilityError::SelfProviderGasPriceCeil))]
    );

    gelato.set_gas_price(gwei(40)).await;
    let outcomes = executor.poll_once().await;
    assert!(matches!(
        &outcomes[0],
        (_, PollOutcome::Executed(result)) if result.state == CycleState::Completed
    ));
    assert!(executor.tracked().is_empty());
    assert_eq!(chi_balance(&gelato, USER).await, U256::from(140));
}

#[tokio::test]
async fn test_executor_resyncs_after_competing_exec() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(1), 3, 0).await;
    let id = receipt.id;
    let mut executor = executor(&gelato);
    executor.track(TrackedReceipt::new(receipt.clone()));

    // Another executor runs the first step; this executor's view is now one step behind.
    let competitor = ExecutionDriver::new(gelato.clone());
    let mut theirs = TrackedReceipt::new(receipt);
    competitor.exec(&mut theirs, &opts(gwei(40))).await.unwrap();
    assert!(matches!(gelato.receipt_status(id).await, Ok(ReceiptStatus::Active(_))));

    let outcomes = executor.poll_once().await;
    assert!(matches!(
        &outcomes[0],
        (_, PollOutcome::Executed(result))
            if result.state == CycleState::PartiallyExecuted && result.remaining_tasks == 1
    ));
    assert_eq!(executor.tracked()[0].receipt().tasks.len(), 1);

    let outcomes = executor.poll_once().await;
    assert!(matches!(
        &outcomes[0],
        (_, PollOutcome::Executed(result)) if result.state == CycleState::Completed
    ));
    assert!(executor.tracked().is_empty());
    assert_eq!(chi_balance(&gelato, USER).await, U256::from(3));
    assert_eq!(gelato.receipt_status(id).await, Ok(ReceiptStatus::Completed));
}

#[tokio::test]
async fn test_executor_retires_receipt_cancelled_elsewhere() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(1), 3, 0).await;
    let mut executor = executor(&gelato);
    executor.track(TrackedReceipt::new(receipt.clone()));

    let competitor = ExecutionDriver::new(gelato.clone());
    let mut theirs = TrackedReceipt::new(receipt);
    competitor.exec(&mut theirs, &opts(gwei(40))).await.unwrap();
    gelato.cancel_task(theirs.receipt()).await.unwrap();

    let outcomes = executor.poll_once().await;
    assert_eq!(outcomes[0].1, PollOutcome::Retired(CycleState::Cancelled));
    assert!(executor.tracked().is_empty());
    assert_eq!(chi_balance(&gelato, USER).await, U256::from(1));
}

#[tokio::test]
async fn test_executor_run_reports_outcomes_until_done() {
    let gelato = setup(EngineConfig::default()).await;
    gelato.set_gas_price(gwei(40)).await;
    let receipt = submit(&gelato, chi_task(1), 2, 0).await;
    let mut executor = executor(&gelato);
    executor.track(TrackedReceipt::new(receipt));

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let mut seen = Vec::new();
    tokio::time::timeout(
        Duration::from_secs(1),
        executor.run(Duration::from_millis(5), rx, |_, outcome| seen.push(outcome.clone())),
    )
    .await
    .unwrap();

    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|outcome| matches!(outcome, PollOutcome::Executed(_))));
    assert_eq!(chi_balance(&gelato, USER).await, U256::from(2));
}

#[tokio::test]
async fn test_executor_run_stops_on_shutdown() {
    let gelato = setup(EngineConfig::default()).await;
    // Never eligible at the current 80 gwei, so only shutdown ends the loop.
    let receipt = submit(&gelato, chi_task(140), 1, 0).await;
    let mut executor = executor(&gelato);
    executor.track(TrackedReceipt::new(receipt));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        executor.run(Duration::from_millis(5), rx, |_, _| {}).await;
        executor
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();
    let executor = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(executor.tracked().len(), 1);
}
