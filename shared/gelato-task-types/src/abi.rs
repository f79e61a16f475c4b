//! Solidity ABI mirror of the Gelato registry, its conditions, actions and provider modules.
//!
//! The client model in [`crate::task`] converts to and from these tuples so that hashes and
//! call data agree with the registry contract byte for byte.

use alloy_primitives::{keccak256, B256, U256};
use alloy_sol_types::{sol, SolValue};

use crate::{errors::ModelError, task};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct Provider {
        address addr;
        address module;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Condition {
        address inst;
        bytes data;
    }

    /// `operation` and `dataFlow` are Solidity enums, which encode as `uint8`.
    #[derive(Debug, PartialEq, Eq)]
    struct Action {
        address addr;
        bytes data;
        uint8 operation;
        uint8 dataFlow;
        uint256 value;
        bool termsOkCheck;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Task {
        Condition[] conditions;
        Action[] actions;
        uint256 selfProviderGasLimit;
        uint256 selfProviderGasPriceCeil;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TaskReceipt {
        uint256 id;
        address userProxy;
        Provider provider;
        Task[] tasks;
        uint256 expiryDate;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct ActionSpec {
        address addr;
        bytes4 selector;
        uint8 operation;
        uint8 dataFlow;
        bool termsOkCheck;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TaskSpec {
        address[] conditions;
        ActionSpec[] actions;
        uint256 gasPriceCeil;
    }

    interface IGelatoCore {
        function canExec(TaskReceipt taskReceipt, uint256 gasLimit, uint256 execTxGasPrice) external view returns (string);
        function exec(TaskReceipt taskReceipt) external;
        function submitTaskCycle(Provider provider, Task[] tasks, uint256 expiryDate, uint256 cycles) external;
        function cancelTask(TaskReceipt taskReceipt) external;

        function providerFunds(address provider) external view returns (uint256);
        function isModuleProvided(address provider, address module) external view returns (bool);
        function executorByProvider(address provider) external view returns (address);
        function executorStake(address executor) external view returns (uint256);
        function minExecutorStake() external view returns (uint256);
        function taskReceiptHash(uint256 taskReceiptId) external view returns (bytes32);
        function taskSpecGasPriceCeil(address provider, bytes32 taskSpecHash) external view returns (uint256);
        function gelatoGasPriceOracle() external view returns (address);
        function oracleRequestData() external view returns (bytes);

        event LogTaskSubmitted(uint256 indexed taskReceiptId, bytes32 indexed taskReceiptHash, TaskReceipt taskReceipt);
        event LogExecSuccess(address indexed executor, uint256 indexed taskReceiptId, uint256 executorSuccessFee, uint256 sysAdminSuccessFee);
        event LogCanExecFailed(address indexed executor, uint256 indexed taskReceiptId, string reason);
        event LogExecReverted(address indexed executor, uint256 indexed taskReceiptId, uint256 executorRefund, string reason);
        event LogTaskCancelled(uint256 indexed taskReceiptId, address indexed cancellor);
    }

    interface IGelatoCondition {
        function ok(uint256 taskReceiptId, bytes conditionData, uint256 gelatoGasPrice) external view returns (string);
    }

    interface IGelatoAction {
        function termsOk(uint256 taskReceiptId, address userProxy, bytes actionData, uint8 dataFlow, uint256 value, uint256 gelatoGasPrice) external view returns (string);
    }

    interface IGelatoProviderModule {
        function isProvided(address userProxy, address provider, Task task) external view returns (string);
    }

    interface IGelatoGasPriceOracle {
        function latestAnswer() external view returns (int256);
    }
}

/// Prefix every passing `ok` / `termsOk` / `isProvided` answer starts with.
pub const OK: &str = "OK";

pub fn is_ok_string(answer: &str) -> bool {
    answer.starts_with(OK)
}

impl From<&task::GelatoProvider> for Provider {
    fn from(p: &task::GelatoProvider) -> Self {
        Provider {
            addr: p.addr,
            module: p.module,
        }
    }
}

impl From<&task::Condition> for Condition {
    fn from(c: &task::Condition) -> Self {
        Condition {
            inst: c.target,
            data: c.data.clone(),
        }
    }
}

impl From<&task::Action> for Action {
    fn from(a: &task::Action) -> Self {
        Action {
            addr: a.target,
            data: a.data.clone(),
            operation: a.operation as u8,
            dataFlow: a.data_flow as u8,
            value: a.value,
            termsOkCheck: a.terms_ok_check,
        }
    }
}

impl From<&task::Task> for Task {
    fn from(t: &task::Task) -> Self {
        Task {
            conditions: t.conditions.iter().map(Condition::from).collect(),
            actions: t.actions.iter().map(Action::from).collect(),
            selfProviderGasLimit: t.self_provider_gas_limit,
            selfProviderGasPriceCeil: t.self_provider_gas_price_ceil.unwrap_or(task::NO_CEIL),
        }
    }
}

impl From<&task::TaskReceipt> for TaskReceipt {
    fn from(r: &task::TaskReceipt) -> Self {
        TaskReceipt {
            id: r.id,
            userProxy: r.user_proxy,
            provider: Provider::from(&r.provider),
            tasks: r.tasks.iter().map(Task::from).collect(),
            expiryDate: U256::from(r.expiry_date),
        }
    }
}

impl From<&task::TaskSpec> for TaskSpec {
    fn from(s: &task::TaskSpec) -> Self {
        TaskSpec {
            conditions: s.conditions.clone(),
            actions: s
                .actions
                .iter()
                .map(|a| ActionSpec {
                    addr: a.target,
                    selector: a.selector.into(),
                    operation: a.operation as u8,
                    dataFlow: a.data_flow as u8,
                    termsOkCheck: a.terms_ok_check,
                })
                .collect(),
            gasPriceCeil: s.gas_price_ceil,
        }
    }
}

impl TryFrom<Action> for task::Action {
    type Error = ModelError;

    fn try_from(a: Action) -> Result<Self, Self::Error> {
        Ok(task::Action {
            target: a.addr,
            data: a.data,
            operation: task::Operation::try_from(a.operation)?,
            data_flow: task::DataFlow::try_from(a.dataFlow)?,
            value: a.value,
            terms_ok_check: a.termsOkCheck,
        })
    }
}

impl TryFrom<Task> for task::Task {
    type Error = ModelError;

    fn try_from(t: Task) -> Result<Self, Self::Error> {
        let ceil = t.selfProviderGasPriceCeil;
        Ok(task::Task {
            conditions: t
                .conditions
                .into_iter()
                .map(|c| task::Condition {
                    target: c.inst,
                    data: c.data,
                })
                .collect(),
            actions: t
                .actions
                .into_iter()
                .map(task::Action::try_from)
                .collect::<Result<_, _>>()?,
            self_provider_gas_limit: t.selfProviderGasLimit,
            self_provider_gas_price_ceil: (!ceil.is_zero() && ceil != task::NO_CEIL)
                .then_some(ceil),
        })
    }
}

impl TryFrom<TaskReceipt> for task::TaskReceipt {
    type Error = ModelError;

    fn try_from(r: TaskReceipt) -> Result<Self, Self::Error> {
        Ok(task::TaskReceipt {
            id: r.id,
            user_proxy: r.userProxy,
            provider: task::GelatoProvider::new(r.provider.addr, r.provider.module),
            tasks: r
                .tasks
                .into_iter()
                .map(task::Task::try_from)
                .collect::<Result<_, _>>()?,
            expiry_date: r.expiryDate.saturating_to::<u64>(),
        })
    }
}

impl task::TaskReceipt {
    /// Identity hash the registry stores per receipt id: `keccak256(abi.encode(receipt))`.
    pub fn hash(&self) -> B256 {
        keccak256(TaskReceipt::from(self).abi_encode())
    }
}

impl task::TaskSpec {
    /// Key of the spec in the registry; the ceiling is the stored value, not part of the key.
    pub fn hash(&self) -> B256 {
        let mut spec = TaskSpec::from(self);
        spec.gasPriceCeil = U256::ZERO;
        keccak256(spec.abi_encode())
    }
}
