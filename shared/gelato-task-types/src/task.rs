use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Gas-price ceiling the registry stores for tasks that declared none.
pub const NO_CEIL: U256 = U256::MAX;

/// How the user proxy dispatches an action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Operation {
    /// Plain call; runs in the target's storage context.
    #[default]
    Call = 0,
    /// Runs the target's code in the user proxy's storage context.
    Delegatecall = 1,
}

/// Data piping between consecutive actions of one task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataFlow {
    #[default]
    None = 0,
    In = 1,
    Out = 2,
    InAndOut = 3,
}

impl TryFrom<u8> for Operation {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Call),
            1 => Ok(Operation::Delegatecall),
            _ => Err(ModelError::UnknownOperation(value)),
        }
    }
}

impl TryFrom<u8> for DataFlow {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use DataFlow::*;
        let flow = match value {
            0 => None,
            1 => In,
            2 => Out,
            3 => InAndOut,
            _ => return Err(ModelError::UnknownDataFlow(value)),
        };
        Ok(flow)
    }
}

/// A single contract call performed through the user proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub target: Address,
    pub data: Bytes,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub data_flow: DataFlow,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub terms_ok_check: bool,
}

impl Action {
    pub fn call(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
            operation: Operation::Call,
            data_flow: DataFlow::None,
            value: U256::ZERO,
            terms_ok_check: false,
        }
    }

    pub fn delegatecall(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            operation: Operation::Delegatecall,
            ..Self::call(target, data)
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_terms_ok_check(mut self) -> Self {
        self.terms_ok_check = true;
        self
    }

    /// First four bytes of the call data.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let head = self.data.get(..4)?;
        let mut sel = [0u8; 4];
        sel.copy_from_slice(head);
        Some(sel)
    }

    fn validate(&self, task: usize, action: usize) -> Result<(), ModelError> {
        if self.target.is_zero() {
            return Err(ModelError::ZeroActionTarget { task, action });
        }
        if self.data.len() < 4 {
            return Err(ModelError::MissingSelector { task, action });
        }
        if self.operation == Operation::Delegatecall && !self.value.is_zero() {
            return Err(ModelError::DelegatecallWithValue { task, action });
        }
        Ok(())
    }
}

/// Read-only predicate gating a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub target: Address,
    pub data: Bytes,
}

impl Condition {
    pub fn new(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
        }
    }
}

/// Funding account plus the provider module vouching for the user proxy type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GelatoProvider {
    pub addr: Address,
    pub module: Address,
}

impl GelatoProvider {
    pub fn new(addr: Address, module: Address) -> Self {
        Self { addr, module }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.addr.is_zero() {
            return Err(ModelError::ZeroProviderAddress);
        }
        if self.module.is_zero() {
            return Err(ModelError::ZeroProviderModule);
        }
        Ok(())
    }
}

/// A concrete automatable unit: ordered actions behind optional conditions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub self_provider_gas_limit: U256,
    #[serde(default)]
    pub self_provider_gas_price_ceil: Option<U256>,
}

impl Task {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            conditions: Vec::new(),
            actions,
            self_provider_gas_limit: U256::ZERO,
            self_provider_gas_price_ceil: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.self_provider_gas_limit = U256::from(gas_limit);
        self
    }

    pub fn with_gas_price_ceil(mut self, ceil: U256) -> Self {
        self.self_provider_gas_price_ceil = Some(ceil);
        self
    }

    /// Whether `gas_price` is above this task's self-provider ceiling.
    pub fn exceeds_gas_price_ceil(&self, gas_price: U256) -> bool {
        self.self_provider_gas_price_ceil
            .is_some_and(|ceil| gas_price > ceil)
    }

    pub fn validate(&self, index: usize) -> Result<(), ModelError> {
        if self.actions.is_empty() {
            return Err(ModelError::EmptyActions { task: index });
        }
        for (i, action) in self.actions.iter().enumerate() {
            action.validate(index, i)?;
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            if condition.target.is_zero() {
                return Err(ModelError::ZeroConditionTarget {
                    task: index,
                    condition: i,
                });
            }
        }
        Ok(())
    }
}

/// Action shape an external provider whitelists (call data arguments are free).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub target: Address,
    pub selector: [u8; 4],
    pub operation: Operation,
    pub data_flow: DataFlow,
    pub terms_ok_check: bool,
}

/// Template of tasks a provider is willing to sponsor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub conditions: Vec<Address>,
    pub actions: Vec<ActionSpec>,
    pub gas_price_ceil: U256,
}

impl TaskSpec {
    /// Derives the spec a concrete task is admitted under.
    pub fn from_task(task: &Task, gas_price_ceil: U256) -> Self {
        Self {
            conditions: task.conditions.iter().map(|c| c.target).collect(),
            actions: task
                .actions
                .iter()
                .map(|a| ActionSpec {
                    target: a.target,
                    selector: a.selector().unwrap_or_default(),
                    operation: a.operation,
                    data_flow: a.data_flow,
                    terms_ok_check: a.terms_ok_check,
                })
                .collect(),
            gas_price_ceil,
        }
    }
}

/// Execution-time identity of a submitted task cycle.
///
/// This is a cached view of registry state: it goes stale as soon as any
/// executor advances the cycle, so callers refresh it instead of trusting it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReceipt {
    pub id: U256,
    pub user_proxy: Address,
    pub provider: GelatoProvider,
    /// Remaining tasks of the cycle; the head is the next step to execute.
    pub tasks: Vec<Task>,
    /// Unix timestamp after which the cycle is dead; `0` never expires.
    #[serde(default)]
    pub expiry_date: u64,
}

impl TaskReceipt {
    pub fn head(&self) -> Option<&Task> {
        self.tasks.first()
    }

    /// Self-provided receipts pay for their own execution.
    pub fn is_self_provided(&self) -> bool {
        self.user_proxy == self.provider.addr
    }

    /// Expiry is inclusive of the expiry timestamp itself.
    pub fn is_expired_at(&self, timestamp: u64) -> bool {
        self.expiry_date != 0 && self.expiry_date <= timestamp
    }

    /// The view after the head task has been executed.
    pub fn advanced(&self) -> Self {
        let mut next = self.clone();
        if !next.tasks.is_empty() {
            next.tasks.remove(0);
        }
        next
    }

    /// Structural validation; an empty task list is a legal (exhausted) view.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.user_proxy.is_zero() {
            return Err(ModelError::ZeroUserProxy);
        }
        self.provider.validate()?;
        for (i, task) in self.tasks.iter().enumerate() {
            task.validate(i)?;
        }
        Ok(())
    }
}

/// Arguments of a task-cycle submission to the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub user_proxy: Address,
    pub provider: GelatoProvider,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub expiry_date: u64,
    /// How many times the task list is run.
    pub cycles: u32,
}

impl TaskSubmission {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.user_proxy.is_zero() {
            return Err(ModelError::ZeroUserProxy);
        }
        self.provider.validate()?;
        if self.tasks.is_empty() {
            return Err(ModelError::NoTasks);
        }
        if self.cycles == 0 {
            return Err(ModelError::ZeroCycles);
        }
        for (i, task) in self.tasks.iter().enumerate() {
            task.validate(i)?;
        }
        Ok(())
    }

    /// The full cycle: the task list repeated `cycles` times.
    pub fn expand(&self) -> Vec<Task> {
        let cycles = self.cycles as usize;
        let mut out = Vec::with_capacity(self.tasks.len() * cycles);
        for _ in 0..cycles {
            out.extend(self.tasks.iter().cloned());
        }
        out
    }
}
