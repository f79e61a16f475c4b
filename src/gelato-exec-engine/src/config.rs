//! Engine configuration mirrored from the registry's constructor parameters.

use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gas the registry charges on top of the task's own gas for the `exec` frame.
pub const EXEC_TX_OVERHEAD: u64 = 55_000;
pub const GELATO_MAX_GAS: u64 = 7_000_000;
/// Extra gas an executor adds to the task's gas limit when sending `exec`.
pub const EXEC_GAS_BUFFER: u64 = 30_000;
/// Success shares in percent of the execution cost.
pub const EXECUTOR_SUCCESS_SHARE: u8 = 5;
pub const SYS_ADMIN_SUCCESS_SHARE: u8 = 5;
pub const READ_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("success shares sum to {0}%, above 100%")]
    SharesTooHigh(u16),
    #[error("read timeout must be non-zero")]
    ZeroReadTimeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address of the registry (GelatoCore) contract.
    pub gelato_core: Address,
    pub executor_success_share: u8,
    pub sys_admin_success_share: u8,
    pub exec_tx_overhead: u64,
    /// Gas limit assigned to self-provided tasks submitted with a zero limit.
    pub gelato_max_gas: u64,
    pub exec_gas_buffer: u64,
    /// Layer the executor minimum-stake check on top of provider liquidity.
    pub require_executor_stake: bool,
    pub read_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gelato_core: Address::ZERO,
            executor_success_share: EXECUTOR_SUCCESS_SHARE,
            sys_admin_success_share: SYS_ADMIN_SUCCESS_SHARE,
            exec_tx_overhead: EXEC_TX_OVERHEAD,
            gelato_max_gas: GELATO_MAX_GAS,
            exec_gas_buffer: EXEC_GAS_BUFFER,
            require_executor_stake: false,
            read_timeout_ms: READ_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn new(gelato_core: Address) -> Self {
        Self {
            gelato_core,
            ..Default::default()
        }
    }

    pub fn total_success_share(&self) -> u16 {
        self.executor_success_share as u16 + self.sys_admin_success_share as u16
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let total = self.total_success_share();
        if total > 100 {
            return Err(ConfigError::SharesTooHigh(total));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::ZeroReadTimeout);
        }
        Ok(())
    }
}
