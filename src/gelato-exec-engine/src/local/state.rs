use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
    sync::Arc,
};

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use alloy_sol_types::{SolCall, SolInterface, SolValue};
use async_trait::async_trait;
use gelato_task_types::{
    abi::{IGelatoCore::IGelatoCoreCalls, IGelatoGasPriceOracle},
    ChainReader, ReadError, TaskReceipt,
};

use super::contracts::{unknown_selector, SimContract};

pub const OUT_OF_GAS: &str = "out of gas";

/// Whole ledger of the in-process registry. Cloned per `exec` and swapped in on success.
#[derive(Clone, Default)]
pub struct LedgerState {
    pub timestamp: u64,
    /// Current answer of the gas-price oracle.
    pub gas_price: U256,
    pub last_receipt_id: U256,
    /// Latest view of every receipt ever submitted and not cancelled.
    pub receipts: HashMap<U256, TaskReceipt>,
    pub receipt_hashes: HashMap<U256, B256>,
    pub cancelled: HashSet<U256>,
    pub provider_funds: HashMap<Address, U256>,
    pub executor_by_provider: HashMap<Address, Address>,
    pub executor_stake: HashMap<Address, U256>,
    pub min_executor_stake: U256,
    pub provided_modules: HashSet<(Address, Address)>,
    pub task_spec_gas_price_ceil: HashMap<(Address, B256), U256>,
    pub sys_admin_funds: U256,
    /// Native balances.
    pub balances: HashMap<Address, U256>,
    /// Contract storage keyed by (storage context, slot).
    pub storage: HashMap<(Address, B256), U256>,
    pub contracts: HashMap<Address, Arc<dyn SimContract>>,
}

impl LedgerState {
    pub fn balance_of(&self, account: Address) -> U256 {
        lookup(&self.balances, &account)
    }

    pub fn credit(&mut self, account: Address, amount: U256) {
        let balance = self.balances.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), String> {
        let available = self.balance_of(from);
        let remaining = available
            .checked_sub(amount)
            .ok_or_else(|| format!("{from} holds {available}, cannot send {amount}"))?;
        self.balances.insert(from, remaining);
        self.credit(to, amount);
        Ok(())
    }

    pub fn sload(&self, context: Address, slot: B256) -> U256 {
        lookup(&self.storage, &(context, slot))
    }

    pub fn contract(&self, address: Address) -> Option<Arc<dyn SimContract>> {
        self.contracts.get(&address).cloned()
    }
}

/// Read-only window on a [`LedgerState`]; answers registry, oracle and contract views.
pub struct StateView<'a> {
    state: &'a LedgerState,
    core: Address,
    oracle: Address,
}

impl<'a> StateView<'a> {
    pub fn new(state: &'a LedgerState, core: Address, oracle: Address) -> Self {
        Self {
            state,
            core,
            oracle,
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }

    pub fn sload(&self, context: Address, slot: B256) -> U256 {
        self.state.sload(context, slot)
    }

    pub fn dispatch(&self, target: Address, data: &[u8]) -> Result<Bytes, ReadError> {
        if target == self.core {
            return self.core_view(data);
        }
        if target == self.oracle {
            if data.starts_with(&IGelatoGasPriceOracle::latestAnswerCall::SELECTOR) {
                return Ok(encode_return(I256::from_raw(self.state.gas_price)));
            }
            return Err(ReadError::Reverted(unknown_selector(data)));
        }
        match self.state.contracts.get(&target) {
            Some(contract) => contract.view(self, target, data),
            None => Err(ReadError::NoCode(target)),
        }
    }

    fn core_view(&self, data: &[u8]) -> Result<Bytes, ReadError> {
        use IGelatoCoreCalls as Call;

        let state = self.state;
        let call = IGelatoCoreCalls::abi_decode(data, true)
            .map_err(|_| ReadError::Reverted(unknown_selector(data)))?;
        let out = match call {
            Call::providerFunds(c) => encode_return(lookup(&state.provider_funds, &c.provider)),
            Call::isModuleProvided(c) => {
                encode_return(state.provided_modules.contains(&(c.provider, c.module)))
            }
            Call::executorByProvider(c) => {
                encode_return(lookup(&state.executor_by_provider, &c.provider))
            }
            Call::executorStake(c) => encode_return(lookup(&state.executor_stake, &c.executor)),
            Call::minExecutorStake(_) => encode_return(state.min_executor_stake),
            Call::taskReceiptHash(c) => {
                encode_return(lookup(&state.receipt_hashes, &c.taskReceiptId))
            }
            Call::taskSpecGasPriceCeil(c) => encode_return(lookup(
                &state.task_spec_gas_price_ceil,
                &(c.provider, c.taskSpecHash),
            )),
            Call::gelatoGasPriceOracle(_) => encode_return(self.oracle),
            Call::oracleRequestData(_) => encode_return(Bytes::copy_from_slice(
                &IGelatoGasPriceOracle::latestAnswerCall::SELECTOR,
            )),
            Call::canExec(_) | Call::exec(_) | Call::submitTaskCycle(_) | Call::cancelTask(_) => {
                return Err(ReadError::Reverted("GelatoCore: not a static view".into()))
            }
        };
        Ok(out)
    }
}

#[async_trait]
impl ChainReader for StateView<'_> {
    async fn block_timestamp(&self) -> Result<u64, ReadError> {
        Ok(self.state.timestamp)
    }

    async fn read(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError> {
        self.dispatch(target, &data)
    }
}

/// Mutable call frame handed to [`SimContract::execute`].
pub struct ExecContext<'a> {
    state: &'a mut LedgerState,
    caller: Address,
    this: Address,
    value: U256,
    gas_limit: u64,
    gas_used: u64,
    gas_needed: Option<u64>,
}

impl<'a> ExecContext<'a> {
    /// `this` is the storage context: the target for calls, the user proxy for delegatecalls.
    pub fn new(
        state: &'a mut LedgerState,
        caller: Address,
        this: Address,
        value: U256,
        gas_limit: u64,
    ) -> Self {
        Self {
            state,
            caller,
            this,
            value,
            gas_limit,
            gas_used: 0,
            gas_needed: None,
        }
    }

    pub fn caller(&self) -> Address {
        self.caller
    }

    pub fn this(&self) -> Address {
        self.this
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }

    pub fn sload(&self, slot: B256) -> U256 {
        self.state.sload(self.this, slot)
    }

    pub fn sstore(&mut self, slot: B256, value: U256) {
        self.state.storage.insert((self.this, slot), value);
    }

    pub fn use_gas(&mut self, gas: u64) -> Result<(), String> {
        let total = self.gas_used.saturating_add(gas);
        if total > self.gas_limit {
            self.gas_needed = Some(total);
            return Err(OUT_OF_GAS.to_string());
        }
        self.gas_used = total;
        Ok(())
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Total gas the frame would have needed when it ran out.
    pub fn gas_needed(&self) -> Option<u64> {
        self.gas_needed
    }

    /// Nested call from `this` to `target`, sharing this frame's gas.
    pub fn call(&mut self, target: Address, data: &[u8], value: U256) -> Result<Bytes, String> {
        let contract = self
            .state
            .contract(target)
            .ok_or_else(|| format!("no contract at {target}"))?;
        if !value.is_zero() {
            self.state.transfer(self.this, target, value)?;
        }
        let before = self.gas_used;
        let mut child = ExecContext::new(
            &mut *self.state,
            self.this,
            target,
            value,
            self.gas_limit - self.gas_used,
        );
        let out = contract.execute(&mut child, data);
        let (used, needed) = (child.gas_used, child.gas_needed);
        self.gas_used = before + used;
        if let Some(needed) = needed {
            self.gas_needed = Some(before.saturating_add(needed));
        }
        out
    }

    /// Pays `value` to `to` and runs its receive hook, if it has code.
    pub fn pay(&mut self, to: Address, value: U256) -> Result<(), String> {
        self.state.credit(to, value);
        match self.state.contract(to) {
            Some(contract) => {
                let mut child =
                    ExecContext::new(&mut *self.state, self.this, to, value, self.gas_limit);
                contract.receive(&mut child)
            }
            None => Ok(()),
        }
    }
}

fn lookup<K: Eq + Hash, V: Copy + Default>(map: &HashMap<K, V>, key: &K) -> V {
    map.get(key).copied().unwrap_or_default()
}

/// ABI-encodes a single return value the way a Solidity function returns it.
pub fn encode_return<T: SolValue>(value: T) -> Bytes {
    (value,).abi_encode_params().into()
}
