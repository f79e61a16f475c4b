//! JSON-RPC implementations of the engine's chain capabilities, over `ethers`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{Revert, SolCall, SolError, SolEvent};
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, MiddlewareError, Provider, ProviderError, RpcError},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, BlockNumber, Bytes as EBytes, Log,
        TransactionReceipt, TransactionRequest, H160, U256 as EU256,
    },
};
use gelato_exec_engine::{
    EligibilityError, ExecBackend, ExecSuccess, ExecutionError, GelatoCoreReader, ReceiptStatus,
    RegistryError, TaskRegistry, TxOptions,
};
use gelato_task_types::{
    abi::{self, IGelatoCore},
    ChainReader, ReadError, TaskReceipt, TaskSubmission,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub fn to_h160(addr: Address) -> H160 {
    H160::from(addr.into_array())
}

pub fn from_h160(addr: H160) -> Address {
    Address::from(addr.0)
}

pub fn to_eu256(value: U256) -> EU256 {
    EU256::from_big_endian(&value.to_be_bytes::<32>())
}

pub fn from_eu256(value: EU256) -> U256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    U256::from_be_bytes(buf)
}

/// `eth_call` reader. `from` is set on every call so that sender-dependent views such as the
/// registry's `canExec` answer for the configured executor.
pub struct RpcChainReader {
    provider: Arc<Provider<Http>>,
    from: Option<Address>,
}

impl RpcChainReader {
    pub fn new(provider: Arc<Provider<Http>>, from: Option<Address>) -> Self {
        Self { provider, from }
    }

    /// Asks the registry itself for its `canExec` answer.
    pub async fn registry_can_exec(
        &self,
        core: Address,
        receipt: &TaskReceipt,
        gas_limit: U256,
        gas_price: U256,
    ) -> Result<String, ReadError> {
        let call = IGelatoCore::canExecCall {
            taskReceipt: abi::TaskReceipt::from(receipt),
            gasLimit: gas_limit,
            execTxGasPrice: gas_price,
        };
        let out = self.read(core, call.abi_encode().into()).await?;
        IGelatoCore::canExecCall::abi_decode_returns(&out, true)
            .map(|r| r._0)
            .map_err(|_| ReadError::MalformedReturn)
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_timestamp(&self) -> Result<u64, ReadError> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| ReadError::Transport(e.to_string()))?
            .ok_or_else(|| ReadError::Transport("latest block unavailable".into()))?;
        Ok(block.timestamp.low_u64())
    }

    async fn read(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError> {
        let mut tx = TransactionRequest::new()
            .to(to_h160(target))
            .data(EBytes::from(data.to_vec()));
        if let Some(from) = self.from {
            tx = tx.from(to_h160(from));
        }
        let typed: TypedTransaction = tx.into();
        match self.provider.call(&typed, None).await {
            Ok(out) if out.is_empty() => {
                // Empty output from an account without code means no contract.
                let code = self
                    .provider
                    .get_code(to_h160(target), None)
                    .await
                    .map_err(|e| ReadError::Transport(e.to_string()))?;
                if code.is_empty() {
                    Err(ReadError::NoCode(target))
                } else {
                    Ok(Bytes::new())
                }
            }
            Ok(out) => Ok(Bytes::from(out.to_vec())),
            Err(err) => Err(classify_call_error(&err)),
        }
    }
}

/// Splits node errors into reverts (deterministic) and everything else (transport).
fn classify_call_error(err: &ProviderError) -> ReadError {
    let Some(resp) = RpcError::as_error_response(err) else {
        return ReadError::Transport(err.to_string());
    };
    if let Some(data) = resp.as_revert_data() {
        let reason = revert_reason(&data).unwrap_or_else(|| resp.message.clone());
        return ReadError::Reverted(reason);
    }
    if resp.code == 3 || resp.message.contains("revert") {
        return ReadError::Reverted(resp.message.clone());
    }
    ReadError::Transport(resp.message.clone())
}

/// Decodes `Error(string)` revert data.
pub fn revert_reason(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data, true).ok().map(|r| r.reason)
}

/// Sends `exec` transactions from a local wallet and reads the outcome from the registry's logs.
pub struct RpcExecBackend {
    client: Arc<SignerClient>,
    core: Address,
}

impl RpcExecBackend {
    pub fn new(client: Arc<SignerClient>, core: Address) -> Self {
        Self { client, core }
    }

    pub fn executor(&self) -> Address {
        from_h160(self.client.signer().address())
    }

    async fn settle(
        &self,
        receipt_id: U256,
        tx: &TransactionReceipt,
    ) -> Result<ExecSuccess, ExecutionError> {
        let outcome = decode_exec_logs(self.core, &tx.logs);
        debug!(%receipt_id, tx_hash = ?tx.transaction_hash, ?outcome, "exec logs");
        match outcome {
            Some(ExecLog::Success {
                receipt_id: id,
                executor_success_fee,
                sys_admin_success_fee,
            }) if id == receipt_id => {
                let gas_used = tx.gas_used.map(from_eu256).unwrap_or_default();
                let gas_price = tx.effective_gas_price.map(from_eu256).unwrap_or_default();
                let block_timestamp = match tx.block_number {
                    Some(number) => self
                        .client
                        .get_block(BlockNumber::Number(number))
                        .await
                        .map_err(|e| ExecutionError::Transport(e.to_string()))?
                        .map(|b| b.timestamp.low_u64())
                        .unwrap_or_default(),
                    None => 0,
                };
                let refund = gas_used.saturating_mul(gas_price);
                Ok(ExecSuccess {
                    receipt_id,
                    executor_payout: refund.saturating_add(executor_success_fee),
                    executor_success_fee,
                    sys_admin_success_fee,
                    gas_used,
                    block_timestamp,
                })
            }
            Some(ExecLog::CanExecFailed { reason, .. }) => {
                Err(ExecutionError::PreconditionChanged(EligibilityError::from_code(&reason)))
            }
            Some(ExecLog::Reverted { reason, .. }) => {
                Err(ExecutionError::ActionReverted {
                    index: None,
                    reason,
                })
            }
            _ if tx.status.map(|s| s.is_zero()).unwrap_or(false) => {
                Err(ExecutionError::ActionReverted {
                    index: None,
                    reason: "exec transaction reverted".into(),
                })
            }
            _ => Err(ExecutionError::Transport("no exec outcome in transaction logs".into())),
        }
    }
}

#[async_trait]
impl ExecBackend for RpcExecBackend {
    async fn exec(
        &self,
        receipt: &TaskReceipt,
        opts: &TxOptions,
    ) -> Result<ExecSuccess, ExecutionError> {
        if opts.executor != self.executor() {
            return Err(ExecutionError::InvalidExecutor(opts.executor));
        }
        let call = IGelatoCore::execCall {
            taskReceipt: abi::TaskReceipt::from(receipt),
        };
        let tx = TransactionRequest::new()
            .from(to_h160(opts.executor))
            .to(to_h160(self.core))
            .data(EBytes::from(call.abi_encode()))
            .gas(to_eu256(opts.gas_limit))
            .gas_price(to_eu256(opts.gas_price));

        let pending = self.client.send_transaction(tx, None).await.map_err(|e| {
            let revert = MiddlewareError::as_error_response(&e).and_then(|r| r.as_revert_data());
            match revert {
                Some(data) => ExecutionError::ActionReverted {
                    index: None,
                    reason: revert_reason(&data).unwrap_or_else(|| e.to_string()),
                },
                None => ExecutionError::Transport(e.to_string()),
            }
        })?;
        let tx_hash = pending.tx_hash();
        info!(receipt_id = %receipt.id, ?tx_hash, "exec sent");
        let mined = pending
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?
            .ok_or_else(|| {
                ExecutionError::Transport(format!("exec transaction {tx_hash:?} dropped"))
            })?;
        self.settle(receipt.id, &mined).await
    }
}

/// Registry view over JSON-RPC. The registry only stores a hash per receipt id, so the current
/// view is recovered by matching that hash against the views derivable from the receipt as first
/// seen.
pub struct RpcTaskRegistry {
    client: Arc<SignerClient>,
    reader: Arc<RpcChainReader>,
    core: Address,
    read_timeout: Duration,
    known: Mutex<HashMap<U256, TaskReceipt>>,
}

impl RpcTaskRegistry {
    pub fn new(
        client: Arc<SignerClient>,
        reader: Arc<RpcChainReader>,
        core: Address,
        read_timeout: Duration,
    ) -> Self {
        Self {
            client,
            reader,
            core,
            read_timeout,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a receipt view so its later views can be recognised.
    pub async fn remember(&self, receipt: TaskReceipt) {
        self.known.lock().await.entry(receipt.id).or_insert(receipt);
    }

    async fn send(&self, data: Vec<u8>) -> Result<TransactionReceipt, RegistryError> {
        let tx = TransactionRequest::new()
            .from(self.client.signer().address())
            .to(to_h160(self.core))
            .data(EBytes::from(data));
        let pending = self.client.send_transaction(tx, None).await.map_err(|e| {
            let reason = MiddlewareError::as_error_response(&e)
                .and_then(|r| r.as_revert_data())
                .and_then(|data| revert_reason(&data));
            RegistryError::Unavailable(reason.unwrap_or_else(|| e.to_string()))
        })?;
        let tx_hash = pending.tx_hash();
        let mined = pending
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?
            .ok_or_else(|| {
                RegistryError::Unavailable(format!("transaction {tx_hash:?} dropped"))
            })?;
        if mined.status.map(|s| s.is_zero()).unwrap_or(false) {
            let reason = format!("transaction {tx_hash:?} reverted");
            return Err(RegistryError::Unavailable(reason));
        }
        Ok(mined)
    }
}

#[async_trait]
impl TaskRegistry for RpcTaskRegistry {
    async fn submit_task_cycle(
        &self,
        submission: TaskSubmission,
    ) -> Result<TaskReceipt, RegistryError> {
        submission.validate()?;
        let call = IGelatoCore::submitTaskCycleCall {
            provider: abi::Provider::from(&submission.provider),
            tasks: submission.tasks.iter().map(abi::Task::from).collect(),
            expiryDate: U256::from(submission.expiry_date),
            cycles: U256::from(submission.cycles),
        };
        let mined = self.send(call.abi_encode()).await?;
        let receipt = decode_submitted(self.core, &mined.logs)?.ok_or_else(|| {
            RegistryError::Unavailable("no LogTaskSubmitted in transaction logs".into())
        })?;
        info!(
            task_receipt_id = %receipt.id,
            tasks = receipt.tasks.len(),
            "task cycle submitted"
        );
        self.remember(receipt.clone()).await;
        Ok(receipt)
    }

    async fn cancel_task(&self, receipt: &TaskReceipt) -> Result<(), RegistryError> {
        let call = IGelatoCore::cancelTaskCall {
            taskReceipt: abi::TaskReceipt::from(receipt),
        };
        self.send(call.abi_encode()).await?;
        info!(task_receipt_id = %receipt.id, "task cancelled");
        Ok(())
    }

    async fn receipt_status(&self, id: U256) -> Result<ReceiptStatus, RegistryError> {
        let core = GelatoCoreReader::new(self.reader.as_ref(), self.core, self.read_timeout);
        let unavailable = |e: ReadError| RegistryError::Unavailable(e.to_string());
        let stored = core.task_receipt_hash(id).await.map_err(unavailable)?;
        let known = self.known.lock().await.get(&id).cloned();
        let Some(first_seen) = known else {
            return if stored.is_zero() {
                Ok(ReceiptStatus::Unknown)
            } else {
                Err(RegistryError::StaleReceipt(id))
            };
        };
        if stored.is_zero() {
            return Ok(ReceiptStatus::Cancelled);
        }
        let current =
            match_stored_view(&first_seen, stored).ok_or(RegistryError::StaleReceipt(id))?;
        if current.tasks.is_empty() {
            return Ok(ReceiptStatus::Completed);
        }
        let now = core.block_timestamp().await.map_err(unavailable)?;
        if current.is_expired_at(now) {
            return Ok(ReceiptStatus::Expired);
        }
        Ok(ReceiptStatus::Active(current))
    }
}

/// The view derived from `first_seen` whose hash the registry stores, if any.
pub fn match_stored_view(first_seen: &TaskReceipt, stored: B256) -> Option<TaskReceipt> {
    let mut view = first_seen.clone();
    loop {
        if view.hash() == stored {
            return Some(view);
        }
        if view.tasks.is_empty() {
            return None;
        }
        view = view.advanced();
    }
}

fn decode_submitted(core: Address, logs: &[Log]) -> Result<Option<TaskReceipt>, RegistryError> {
    for log in logs.iter().filter(|log| from_h160(log.address) == core) {
        let topics: Vec<B256> = log.topics.iter().map(|t| B256::from(t.0)).collect();
        if topics.first() != Some(&IGelatoCore::LogTaskSubmitted::SIGNATURE_HASH) {
            continue;
        }
        let ev = IGelatoCore::LogTaskSubmitted::decode_raw_log(
            topics.iter().copied(),
            &log.data,
            true,
        )
        .map_err(|e| RegistryError::Unavailable(format!("malformed LogTaskSubmitted: {e}")))?;
        return Ok(Some(TaskReceipt::try_from(ev.taskReceipt)?));
    }
    Ok(None)
}

/// Registry events that report how an `exec` transaction ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecLog {
    Success {
        receipt_id: U256,
        executor_success_fee: U256,
        sys_admin_success_fee: U256,
    },
    CanExecFailed { receipt_id: U256, reason: String },
    Reverted { receipt_id: U256, reason: String },
}

/// Finds the first exec outcome event emitted by `core`.
pub fn decode_exec_logs(core: Address, logs: &[Log]) -> Option<ExecLog> {
    logs.iter()
        .filter(|log| from_h160(log.address) == core)
        .find_map(|log| {
            let topics: Vec<B256> = log.topics.iter().map(|t| B256::from(t.0)).collect();
            decode_exec_log(&topics, &log.data)
        })
}

pub fn decode_exec_log(topics: &[B256], data: &[u8]) -> Option<ExecLog> {
    let signature = topics.first()?;
    if *signature == IGelatoCore::LogExecSuccess::SIGNATURE_HASH {
        let ev =
            IGelatoCore::LogExecSuccess::decode_raw_log(topics.iter().copied(), data, true).ok()?;
        Some(ExecLog::Success {
            receipt_id: ev.taskReceiptId,
            executor_success_fee: ev.executorSuccessFee,
            sys_admin_success_fee: ev.sysAdminSuccessFee,
        })
    } else if *signature == IGelatoCore::LogCanExecFailed::SIGNATURE_HASH {
        let ev = IGelatoCore::LogCanExecFailed::decode_raw_log(topics.iter().copied(), data, true)
            .ok()?;
        Some(ExecLog::CanExecFailed {
            receipt_id: ev.taskReceiptId,
            reason: ev.reason,
        })
    } else if *signature == IGelatoCore::LogExecReverted::SIGNATURE_HASH {
        let ev = IGelatoCore::LogExecReverted::decode_raw_log(topics.iter().copied(), data, true)
            .ok()?;
        Some(ExecLog::Reverted {
            receipt_id: ev.taskReceiptId,
            reason: ev.reason,
        })
    } else {
        None
    }
}
