use std::{fmt, str::FromStr};

use alloy_primitives::{Address, U256};
use thiserror::Error;

pub use gelato_task_types::{ModelError, ReadError};

use crate::eligibility::Check;

/// Reasons a task receipt is not executable right now.
///
/// These are expected outcomes of `canExec`; executors poll again later. `Display` renders the
/// registry's string code so local verdicts and on-chain answers compare directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EligibilityError {
    #[error("InvalidTaskReceiptId")]
    InvalidTaskReceiptId,
    /// The registry knows the id but the supplied view is out of date.
    #[error("InvalidTaskReceiptHash")]
    InvalidTaskReceiptHash,
    #[error("TaskReceiptExpired")]
    TaskReceiptExpired,
    #[error("NoTasksLeft")]
    NoTasksLeft,
    #[error("ModuleNotProvided")]
    ModuleNotProvided,
    #[error("ExecutorNotMinStaked")]
    ExecutorNotMinStaked,
    #[error("ProviderIlliquid")]
    ProviderIlliquid,
    #[error("SelfProviderGasPriceCeil")]
    SelfProviderGasPriceCeil,
    #[error("TaskSpecNotProvided")]
    TaskSpecNotProvided,
    #[error("TaskSpecGasPriceCeil")]
    TaskSpecGasPriceCeil,
    /// `index` is the condition's position in the head task, when known.
    #[error("ConditionNotOk:{reason}")]
    ConditionNotOk {
        index: Option<usize>,
        reason: String,
    },
    #[error("ConditionReverted:{reason}")]
    ConditionReverted {
        index: Option<usize>,
        reason: String,
    },
    #[error("ActionTermsNotOk:{reason}")]
    ActionTermsNotOk {
        index: Option<usize>,
        reason: String,
    },
    #[error("ActionTermsReverted:{reason}")]
    ActionTermsReverted {
        index: Option<usize>,
        reason: String,
    },
    /// A code this client does not know, as reported by the registry.
    #[error("{0}")]
    Unrecognized(String),
}

impl EligibilityError {
    /// Parses a registry answer that is not `OK`. Registry strings carry no condition index.
    pub fn from_code(code: &str) -> Self {
        use EligibilityError::*;
        let (head, reason) = match code.split_once(':') {
            Some((head, reason)) => (head, reason.to_string()),
            None => (code, String::new()),
        };
        match head {
            "InvalidTaskReceiptId" => InvalidTaskReceiptId,
            "InvalidTaskReceiptHash" => InvalidTaskReceiptHash,
            "TaskReceiptExpired" => TaskReceiptExpired,
            "NoTasksLeft" => NoTasksLeft,
            "ModuleNotProvided" | "InvalidProviderModule" => ModuleNotProvided,
            "ExecutorNotMinStaked" => ExecutorNotMinStaked,
            "ProviderIlliquid" | "ProviderIlliquidity" => ProviderIlliquid,
            "SelfProviderGasPriceCeil" => SelfProviderGasPriceCeil,
            "TaskSpecNotProvided" => TaskSpecNotProvided,
            "TaskSpecGasPriceCeil" => TaskSpecGasPriceCeil,
            "ConditionNotOk" => ConditionNotOk {
                index: None,
                reason,
            },
            "ConditionReverted" => ConditionReverted {
                index: None,
                reason,
            },
            "ActionTermsNotOk" => ActionTermsNotOk {
                index: None,
                reason,
            },
            "ActionTermsReverted" => ActionTermsReverted {
                index: None,
                reason,
            },
            _ => Unrecognized(code.to_string()),
        }
    }
}

/// Outcome of `canExec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    NotOk(EligibilityError),
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }

    pub fn error(&self) -> Option<&EligibilityError> {
        match self {
            Verdict::Ok => None,
            Verdict::NotOk(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<(), EligibilityError> {
        match self {
            Verdict::Ok => Ok(()),
            Verdict::NotOk(err) => Err(err),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => f.write_str(gelato_task_types::abi::OK),
            Verdict::NotOk(err) => err.fmt(f),
        }
    }
}

impl FromStr for Verdict {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == gelato_task_types::abi::OK {
            Ok(Verdict::Ok)
        } else {
            Ok(Verdict::NotOk(EligibilityError::from_code(s)))
        }
    }
}

/// `canExec` could not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("malformed task receipt: {0}")]
    Malformed(#[from] ModelError),
    /// A read timed out or failed in transport; eligibility is unknown, not negative.
    #[error("cannot determine {check} right now: {source}")]
    Indeterminate {
        check: Check,
        #[source]
        source: ReadError,
    },
}

/// Failure of one `exec` step. The ledger is left exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Re-validation at execution time failed.
    #[error("precondition changed: {0}")]
    PreconditionChanged(EligibilityError),
    #[error("action {index:?} reverted: {reason}")]
    ActionReverted {
        index: Option<usize>,
        reason: String,
    },
    #[error("action {index} terms not ok: {reason}")]
    TermsNotOk { index: usize, reason: String },
    #[error("fee payout failed: {0}")]
    PayoutFailed(String),
    #[error("{0} is not the provider's executor")]
    InvalidExecutor(Address),
    #[error("gas limit {provided} below required {required}")]
    InsufficientGas { provided: U256, required: U256 },
    #[error("tx gas price {offered} below gelato gas price {required}")]
    Underpriced { offered: U256, required: U256 },
    #[error("malformed task receipt: {0}")]
    Malformed(ModelError),
    #[error("cannot determine eligibility: {0}")]
    Indeterminate(ReadError),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<EngineError> for ExecutionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Malformed(err) => ExecutionError::Malformed(err),
            EngineError::Indeterminate { source, .. } => ExecutionError::Indeterminate(source),
        }
    }
}

/// Errors at the submission/registry boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("malformed submission: {0}")]
    Malformed(#[from] ModelError),
    #[error("unknown task receipt {0}")]
    UnknownReceipt(U256),
    #[error("task receipt {0} is no longer active")]
    NotActive(U256),
    #[error("task receipt view for {0} is stale")]
    StaleReceipt(U256),
    #[error("provider {provider} holds {available}, cannot withdraw {requested}")]
    InsufficientFunds {
        provider: Address,
        available: U256,
        requested: U256,
    },
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_codes_render_like_registry() {
        assert_eq!(Verdict::Ok.to_string(), "OK");
        assert_eq!(
            Verdict::NotOk(EligibilityError::SelfProviderGasPriceCeil).to_string(),
            "SelfProviderGasPriceCeil"
        );
        let cond = EligibilityError::ConditionNotOk {
            index: Some(1),
            reason: "NotOkTimestampDidNotPass".into(),
        };
        assert_eq!(cond.to_string(), "ConditionNotOk:NotOkTimestampDidNotPass");
    }

    #[test]
    fn test_parse_registry_answers() {
        assert_eq!("OK".parse::<Verdict>().unwrap(), Verdict::Ok);
        assert_eq!(
            "ProviderIlliquidity".parse::<Verdict>().unwrap(),
            Verdict::NotOk(EligibilityError::ProviderIlliquid)
        );
        assert_eq!(
            EligibilityError::from_code("ActionTermsNotOk:ActionChiMint: chiAmount exceeds 140"),
            EligibilityError::ActionTermsNotOk {
                index: None,
                reason: "ActionChiMint: chiAmount exceeds 140".into()
            }
        );
        assert_eq!(
            EligibilityError::from_code("GelatoCore.canExec:Weird"),
            EligibilityError::Unrecognized("GelatoCore.canExec:Weird".into())
        );
    }
}
