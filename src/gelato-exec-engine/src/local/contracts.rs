//! Simulated task contracts: the action, condition and provider module the executor drives.

use std::collections::HashSet;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolValue};
use gelato_task_types::{
    abi::{IGelatoAction, IGelatoCondition, IGelatoProviderModule, OK},
    ReadError,
};

use super::state::{encode_return, ExecContext, StateView};

sol! {
    interface IChiToken {
        function mint(uint256 value) external;
        function transfer(address to, uint256 value) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }

    interface IActionChiMint {
        function action(address recipient, uint256 chiAmount) external;
        function getActionData(address recipient, uint256 chiAmount) external pure returns (bytes);
    }

    interface IConditionTimestamp {
        function getConditionData(uint256 timestamp) external pure returns (bytes);
    }
}

/// Contract code living in the in-process ledger.
pub trait SimContract: Send + Sync {
    /// Static call; `this` is the contract's own address.
    fn view(&self, view: &StateView<'_>, this: Address, data: &[u8]) -> Result<Bytes, ReadError>;

    /// State-changing call in the frame's storage context. `Err` carries the revert reason.
    fn execute(&self, _ctx: &mut ExecContext<'_>, data: &[u8]) -> Result<Bytes, String> {
        Err(unknown_selector(data))
    }

    /// Plain value transfer.
    fn receive(&self, _ctx: &mut ExecContext<'_>) -> Result<(), String> {
        Ok(())
    }
}

pub fn unknown_selector(data: &[u8]) -> String {
    let sel = data.get(..4).unwrap_or(data);
    format!("unknown selector 0x{}", hex::encode(sel))
}

fn has_selector(data: &[u8], selector: [u8; 4]) -> bool {
    data.starts_with(&selector)
}

fn decode<C: SolCall>(data: &[u8]) -> Result<C, ReadError> {
    C::abi_decode(data, true).map_err(|_| ReadError::Reverted(unknown_selector(data)))
}

fn decode_exec<C: SolCall>(data: &[u8]) -> Result<C, String> {
    C::abi_decode(data, true).map_err(|e| e.to_string())
}

/// Gas token with `mint`; one token costs 36 000 gas to mint.
pub struct ChiToken;

pub const CHI_MINT_GAS_PER_TOKEN: u64 = 36_000;

impl ChiToken {
    fn balance_slot(owner: Address) -> B256 {
        keccak256(owner.as_slice())
    }
}

impl SimContract for ChiToken {
    fn view(&self, view: &StateView<'_>, this: Address, data: &[u8]) -> Result<Bytes, ReadError> {
        if !has_selector(data, IChiToken::balanceOfCall::SELECTOR) {
            return Err(ReadError::Reverted(unknown_selector(data)));
        }
        let call: IChiToken::balanceOfCall = decode(data)?;
        Ok(encode_return(view.sload(this, Self::balance_slot(call.owner))))
    }

    fn execute(&self, ctx: &mut ExecContext<'_>, data: &[u8]) -> Result<Bytes, String> {
        if has_selector(data, IChiToken::mintCall::SELECTOR) {
            let call: IChiToken::mintCall = decode_exec(data)?;
            let tokens = call.value.saturating_to::<u64>();
            ctx.use_gas(tokens.saturating_mul(CHI_MINT_GAS_PER_TOKEN))?;
            let slot = Self::balance_slot(ctx.caller());
            let balance = ctx.sload(slot).saturating_add(call.value);
            ctx.sstore(slot, balance);
            return Ok(Bytes::new());
        }
        if has_selector(data, IChiToken::transferCall::SELECTOR) {
            let call: IChiToken::transferCall = decode_exec(data)?;
            let from = Self::balance_slot(ctx.caller());
            let remaining = ctx
                .sload(from)
                .checked_sub(call.value)
                .ok_or_else(|| "ChiToken: transfer amount exceeds balance".to_string())?;
            ctx.sstore(from, remaining);
            let to = Self::balance_slot(call.to);
            let balance = ctx.sload(to).saturating_add(call.value);
            ctx.sstore(to, balance);
            return Ok(encode_return(true));
        }
        Err(unknown_selector(data))
    }
}

/// Mints up to [`ActionChiMint::MAX_CHI`] CHI to a recipient. Meant for delegatecall.
pub struct ActionChiMint {
    chi: Address,
}

impl ActionChiMint {
    pub const MAX_CHI: u64 = 140;
    pub const BASE_GAS: u64 = 25_000;

    pub fn new(chi: Address) -> Self {
        Self { chi }
    }

    pub fn action_data(recipient: Address, chi_amount: U256) -> Bytes {
        IActionChiMint::actionCall {
            recipient,
            chiAmount: chi_amount,
        }
        .abi_encode()
        .into()
    }

    fn terms(action_data: &[u8]) -> String {
        match IActionChiMint::actionCall::abi_decode(action_data, true) {
            Ok(call) if call.chiAmount > U256::from(Self::MAX_CHI) => {
                format!("ActionChiMint: chiAmount exceeds {}", Self::MAX_CHI)
            }
            Ok(_) => OK.to_string(),
            Err(_) => "ActionChiMint: invalid action data".to_string(),
        }
    }
}

impl SimContract for ActionChiMint {
    fn view(
        &self,
        _view: &StateView<'_>,
        _this: Address,
        data: &[u8],
    ) -> Result<Bytes, ReadError> {
        if has_selector(data, IGelatoAction::termsOkCall::SELECTOR) {
            let call: IGelatoAction::termsOkCall = decode(data)?;
            return Ok(encode_return(Self::terms(&call.actionData)));
        }
        if has_selector(data, IActionChiMint::getActionDataCall::SELECTOR) {
            let call: IActionChiMint::getActionDataCall = decode(data)?;
            return Ok(encode_return(Self::action_data(call.recipient, call.chiAmount)));
        }
        Err(ReadError::Reverted(unknown_selector(data)))
    }

    fn execute(&self, ctx: &mut ExecContext<'_>, data: &[u8]) -> Result<Bytes, String> {
        let terms = Self::terms(data);
        if terms != OK {
            return Err(terms);
        }
        let call: IActionChiMint::actionCall = decode_exec(data)?;
        ctx.use_gas(Self::BASE_GAS)?;
        let mint = IChiToken::mintCall {
            value: call.chiAmount,
        };
        ctx.call(self.chi, &mint.abi_encode(), U256::ZERO)?;
        let transfer = IChiToken::transferCall {
            to: call.recipient,
            value: call.chiAmount,
        };
        ctx.call(self.chi, &transfer.abi_encode(), U256::ZERO)?;
        Ok(Bytes::new())
    }
}

/// Passes once the block timestamp reaches the one encoded in the condition data.
pub struct ConditionTimestamp;

impl ConditionTimestamp {
    pub fn condition_data(timestamp: u64) -> Bytes {
        U256::from(timestamp).abi_encode().into()
    }
}

impl SimContract for ConditionTimestamp {
    fn view(&self, view: &StateView<'_>, _this: Address, data: &[u8]) -> Result<Bytes, ReadError> {
        if has_selector(data, IGelatoCondition::okCall::SELECTOR) {
            let call: IGelatoCondition::okCall = decode(data)?;
            let due = U256::abi_decode(&call.conditionData, true).map_err(|_| {
                ReadError::Reverted("ConditionTimestamp: invalid condition data".into())
            })?;
            let answer = if U256::from(view.timestamp()) >= due {
                OK
            } else {
                "NotOkTimestampDidNotPass"
            };
            return Ok(encode_return(answer.to_string()));
        }
        if has_selector(data, IConditionTimestamp::getConditionDataCall::SELECTOR) {
            let call: IConditionTimestamp::getConditionDataCall = decode(data)?;
            return Ok(encode_return(Bytes::from(call.timestamp.abi_encode())));
        }
        Err(ReadError::Reverted(unknown_selector(data)))
    }
}

/// Provider module vouching for user proxies; an empty whitelist accepts every proxy.
#[derive(Default)]
pub struct ProviderModuleUserProxy {
    proxies: HashSet<Address>,
}

impl ProviderModuleUserProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxies(proxies: impl IntoIterator<Item = Address>) -> Self {
        Self {
            proxies: proxies.into_iter().collect(),
        }
    }
}

impl SimContract for ProviderModuleUserProxy {
    fn view(
        &self,
        _view: &StateView<'_>,
        _this: Address,
        data: &[u8],
    ) -> Result<Bytes, ReadError> {
        if !has_selector(data, IGelatoProviderModule::isProvidedCall::SELECTOR) {
            return Err(ReadError::Reverted(unknown_selector(data)));
        }
        let call: IGelatoProviderModule::isProvidedCall = decode(data)?;
        let answer = if self.proxies.is_empty() || self.proxies.contains(&call.userProxy) {
            OK
        } else {
            "ProviderModuleUserProxy.isProvided:InvalidUserProxy"
        };
        Ok(encode_return(answer.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_chi_mint_terms_cap() {
        let recipient = address!("00000000000000000000000000000000000000aa");
        let at_cap = ActionChiMint::action_data(recipient, U256::from(140));
        assert_eq!(ActionChiMint::terms(&at_cap), OK);
        let over_cap = ActionChiMint::action_data(recipient, U256::from(141));
        assert_eq!(
            ActionChiMint::terms(&over_cap),
            "ActionChiMint: chiAmount exceeds 140"
        );
        assert_eq!(
            ActionChiMint::terms(&[1, 2, 3, 4]),
            "ActionChiMint: invalid action data"
        );
    }

    #[test]
    fn test_unknown_selector_message() {
        assert_eq!(
            unknown_selector(&[0xde, 0xad, 0xbe, 0xef, 0x00]),
            "unknown selector 0xdeadbeef"
        );
        assert_eq!(unknown_selector(&[0x01]), "unknown selector 0x01");
    }
}
