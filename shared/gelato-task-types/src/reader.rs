use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use thiserror::Error;

/// Errors during chain reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The read did not finish within the caller's bound.
    #[error("read timed out")]
    Timeout,
    /// The node could not be reached or answered with a transport-level error.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call executed and reverted.
    #[error("call reverted: {0}")]
    Reverted(String),
    /// There is no contract at the target address.
    #[error("no contract at {0}")]
    NoCode(Address),
    /// Return data was malformed or could not be decoded.
    #[error("malformed return data")]
    MalformedReturn,
}

impl ReadError {
    /// Whether the chain gave a definite answer (as opposed to "cannot tell right now").
    pub fn is_deterministic(&self) -> bool {
        matches!(self, ReadError::Reverted(_) | ReadError::NoCode(_))
    }

    /// Revert reason, with missing code reported like any other revert.
    pub fn revert_reason(&self) -> Option<String> {
        match self {
            ReadError::Reverted(reason) => Some(reason.clone()),
            ReadError::NoCode(addr) => Some(format!("no contract at {addr}")),
            _ => None,
        }
    }
}

/// Read-only view of chain state, implemented over JSON-RPC or an in-process ledger.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_timestamp(&self) -> Result<u64, ReadError>;

    /// `eth_call`-style read: raw call data in, raw return data out.
    async fn read(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError>;
}

/// Source of the automation gas price executors bid with.
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    async fn current_gas_price(&self) -> Result<U256, ReadError>;
}

#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    async fn block_timestamp(&self) -> Result<u64, ReadError> {
        (**self).block_timestamp().await
    }

    async fn read(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError> {
        (**self).read(target, data).await
    }
}

#[async_trait]
impl<T: GasPriceOracle + ?Sized> GasPriceOracle for Arc<T> {
    async fn current_gas_price(&self) -> Result<U256, ReadError> {
        (**self).current_gas_price().await
    }
}

/// Fixed-answer reader for off-chain tests: every read returns the same bytes.
pub struct StaticReader {
    pub timestamp: u64,
    pub answer: Result<Bytes, ReadError>,
}

#[async_trait]
impl ChainReader for StaticReader {
    async fn block_timestamp(&self) -> Result<u64, ReadError> {
        Ok(self.timestamp)
    }

    async fn read(&self, _target: Address, _data: Bytes) -> Result<Bytes, ReadError> {
        self.answer.clone()
    }
}
