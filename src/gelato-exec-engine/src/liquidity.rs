//! Provider liquidity and fee arithmetic shared by `canExec` and `exec`.

use alloy_primitives::U256;

use crate::config::EngineConfig;

/// Worst-case gas cost of one `exec` frame: `(overhead + gas) * gas_price`, saturating.
pub fn exec_tx_cost(config: &EngineConfig, gas: U256, gas_price: U256) -> U256 {
    U256::from(config.exec_tx_overhead)
        .saturating_add(gas)
        .saturating_mul(gas_price)
}

/// Funds a provider must hold before a task step may run with `gas_limit` at `gas_price`.
pub fn min_exec_provider_funds(config: &EngineConfig, gas_limit: U256, gas_price: U256) -> U256 {
    let cost = exec_tx_cost(config, gas_limit, gas_price);
    cost.saturating_add(share_of(cost, config.total_success_share()))
}

pub fn is_provider_liquid(
    config: &EngineConfig,
    provider_funds: U256,
    gas_limit: U256,
    gas_price: U256,
) -> bool {
    min_exec_provider_funds(config, gas_limit, gas_price) <= provider_funds
}

/// Settlement of one successful step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSplit {
    /// Gas refund plus executor success fee.
    pub executor_payout: U256,
    pub executor_success_fee: U256,
    pub sys_admin_success_fee: U256,
}

impl FeeSplit {
    pub fn for_cost(config: &EngineConfig, cost: U256) -> Self {
        let executor_success_fee = share_of(cost, config.executor_success_share as u16);
        Self {
            executor_payout: cost.saturating_add(executor_success_fee),
            executor_success_fee,
            sys_admin_success_fee: share_of(cost, config.sys_admin_success_share as u16),
        }
    }

    /// What the provider is debited.
    pub fn total(&self) -> U256 {
        self.executor_payout.saturating_add(self.sys_admin_success_fee)
    }
}

fn share_of(amount: U256, percent: u16) -> U256 {
    amount.saturating_mul(U256::from(percent)) / U256::from(100u64)
}
