//! Typed, time-bounded reads of registry and task-contract state.

use std::{future::Future, time::Duration};

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use gelato_task_types::{
    abi::{
        self, IGelatoAction, IGelatoCondition, IGelatoCore, IGelatoGasPriceOracle,
        IGelatoProviderModule,
    },
    Action, ChainReader, Condition, GasPriceOracle, ReadError, Task, TaskReceipt,
};

/// Registry reader bound to one `GelatoCore` deployment.
///
/// Every read is bounded by `timeout`; an expired bound surfaces as [`ReadError::Timeout`] and
/// leaves nothing behind, since reads have no side effects.
pub struct GelatoCoreReader<'a, R: ?Sized> {
    reader: &'a R,
    core: Address,
    timeout: Duration,
}

impl<'a, R: ChainReader + ?Sized> GelatoCoreReader<'a, R> {
    pub fn new(reader: &'a R, core: Address, timeout: Duration) -> Self {
        Self {
            reader,
            core,
            timeout,
        }
    }

    pub async fn block_timestamp(&self) -> Result<u64, ReadError> {
        bounded(self.timeout, self.reader.block_timestamp()).await
    }

    pub async fn raw(&self, target: Address, data: Bytes) -> Result<Bytes, ReadError> {
        bounded(self.timeout, self.reader.read(target, data)).await
    }

    async fn call<C: SolCall>(&self, target: Address, call: C) -> Result<C::Return, ReadError> {
        let out = self.raw(target, call.abi_encode().into()).await?;
        C::abi_decode_returns(&out, true).map_err(|_| ReadError::MalformedReturn)
    }

    pub async fn provider_funds(&self, provider: Address) -> Result<U256, ReadError> {
        let ret = self
            .call(self.core, IGelatoCore::providerFundsCall { provider })
            .await?;
        Ok(ret._0)
    }

    pub async fn is_module_provided(
        &self,
        provider: Address,
        module: Address,
    ) -> Result<bool, ReadError> {
        let call = IGelatoCore::isModuleProvidedCall { provider, module };
        Ok(self.call(self.core, call).await?._0)
    }

    pub async fn executor_by_provider(&self, provider: Address) -> Result<Address, ReadError> {
        let ret = self
            .call(self.core, IGelatoCore::executorByProviderCall { provider })
            .await?;
        Ok(ret._0)
    }

    pub async fn executor_stake(&self, executor: Address) -> Result<U256, ReadError> {
        let ret = self
            .call(self.core, IGelatoCore::executorStakeCall { executor })
            .await?;
        Ok(ret._0)
    }

    pub async fn min_executor_stake(&self) -> Result<U256, ReadError> {
        let ret = self
            .call(self.core, IGelatoCore::minExecutorStakeCall {})
            .await?;
        Ok(ret._0)
    }

    /// Stored identity hash of a receipt; zero when the id is unknown or cancelled.
    pub async fn task_receipt_hash(&self, task_receipt_id: U256) -> Result<B256, ReadError> {
        let call = IGelatoCore::taskReceiptHashCall {
            taskReceiptId: task_receipt_id,
        };
        Ok(self.call(self.core, call).await?._0)
    }

    pub async fn task_spec_gas_price_ceil(
        &self,
        provider: Address,
        task_spec_hash: B256,
    ) -> Result<U256, ReadError> {
        let call = IGelatoCore::taskSpecGasPriceCeilCall {
            provider,
            taskSpecHash: task_spec_hash,
        };
        Ok(self.call(self.core, call).await?._0)
    }

    pub async fn gelato_gas_price_oracle(&self) -> Result<Address, ReadError> {
        let ret = self
            .call(self.core, IGelatoCore::gelatoGasPriceOracleCall {})
            .await?;
        Ok(ret._0)
    }

    pub async fn oracle_request_data(&self) -> Result<Bytes, ReadError> {
        let ret = self
            .call(self.core, IGelatoCore::oracleRequestDataCall {})
            .await?;
        Ok(ret._0)
    }

    /// Answer of the provider module's `isProvided` for the receipt's user proxy.
    pub async fn module_is_provided(
        &self,
        receipt: &TaskReceipt,
        task: &Task,
    ) -> Result<String, ReadError> {
        let call = IGelatoProviderModule::isProvidedCall {
            userProxy: receipt.user_proxy,
            provider: receipt.provider.addr,
            task: abi::Task::from(task),
        };
        Ok(self.call(receipt.provider.module, call).await?._0)
    }

    pub async fn condition_ok(
        &self,
        task_receipt_id: U256,
        condition: &Condition,
        gas_price: U256,
    ) -> Result<String, ReadError> {
        let call = IGelatoCondition::okCall {
            taskReceiptId: task_receipt_id,
            conditionData: condition.data.clone(),
            gelatoGasPrice: gas_price,
        };
        Ok(self.call(condition.target, call).await?._0)
    }

    pub async fn action_terms_ok(
        &self,
        task_receipt_id: U256,
        user_proxy: Address,
        action: &Action,
        gas_price: U256,
    ) -> Result<String, ReadError> {
        let call = IGelatoAction::termsOkCall {
            taskReceiptId: task_receipt_id,
            userProxy: user_proxy,
            actionData: action.data.clone(),
            dataFlow: action.data_flow as u8,
            value: action.value,
            gelatoGasPrice: gas_price,
        };
        Ok(self.call(action.target, call).await?._0)
    }
}

async fn bounded<T>(
    limit: Duration,
    read: impl Future<Output = Result<T, ReadError>>,
) -> Result<T, ReadError> {
    tokio::time::timeout(limit, read).await.map_err(|_| ReadError::Timeout)?
}

/// Gas-price oracle resolved through the registry (`gelatoGasPriceOracle` + `oracleRequestData`).
pub struct CoreGasPriceOracle<R> {
    reader: R,
    core: Address,
    timeout: Duration,
}

impl<R: ChainReader> CoreGasPriceOracle<R> {
    pub fn new(reader: R, core: Address, timeout: Duration) -> Self {
        Self {
            reader,
            core,
            timeout,
        }
    }
}

#[async_trait]
impl<R: ChainReader> GasPriceOracle for CoreGasPriceOracle<R> {
    async fn current_gas_price(&self) -> Result<U256, ReadError> {
        let core = GelatoCoreReader::new(&self.reader, self.core, self.timeout);
        let oracle = core.gelato_gas_price_oracle().await?;
        let mut request = core.oracle_request_data().await?;
        if request.is_empty() {
            request = IGelatoGasPriceOracle::latestAnswerCall {}.abi_encode().into();
        }
        let out = core.raw(oracle, request).await?;
        decode_gas_price(&out)
    }
}

/// Oracle answers are `int256`; a negative price is malformed.
pub fn decode_gas_price(out: &[u8]) -> Result<U256, ReadError> {
    if out.len() < 32 {
        return Err(ReadError::MalformedReturn);
    }
    let answer = I256::from_raw(U256::from_be_slice(&out[0..32]));
    if answer.is_negative() {
        return Err(ReadError::MalformedReturn);
    }
    Ok(answer.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gelato_task_types::reader::StaticReader;

    fn word(value: U256) -> Bytes {
        value.to_be_bytes::<32>().to_vec().into()
    }

    #[test]
    fn test_decode_gas_price() {
        let price = U256::from(40_000_000_000u64);
        assert_eq!(decode_gas_price(&word(price)), Ok(price));
        assert_eq!(decode_gas_price(&[0u8; 8]), Err(ReadError::MalformedReturn));
        assert_eq!(
            decode_gas_price(&word(U256::MAX)),
            Err(ReadError::MalformedReturn)
        );
    }

    fn reader(answer: Result<Bytes, ReadError>) -> StaticReader {
        StaticReader {
            timestamp: 1,
            answer,
        }
    }

    #[tokio::test]
    async fn test_typed_read_decodes_word() {
        let reader = reader(Ok(word(U256::from(5u64))));
        let core = GelatoCoreReader::new(&reader, Address::ZERO, Duration::from_secs(1));
        assert_eq!(core.provider_funds(Address::ZERO).await, Ok(U256::from(5u64)));
        assert_eq!(core.min_executor_stake().await, Ok(U256::from(5u64)));
    }

    #[tokio::test]
    async fn test_short_return_is_malformed() {
        let reader = reader(Ok(Bytes::from(vec![1u8, 2, 3])));
        let core = GelatoCoreReader::new(&reader, Address::ZERO, Duration::from_secs(1));
        assert_eq!(
            core.provider_funds(Address::ZERO).await,
            Err(ReadError::MalformedReturn)
        );
    }

    #[tokio::test]
    async fn test_revert_passes_through() {
        let reader = reader(Err(ReadError::Reverted("nope".into())));
        let core = GelatoCoreReader::new(&reader, Address::ZERO, Duration::from_secs(1));
        assert_eq!(
            core.executor_by_provider(Address::ZERO).await,
            Err(ReadError::Reverted("nope".into()))
        );
    }
}
