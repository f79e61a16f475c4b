//! Shared types for Gelato task automation: the task model, its ABI mirror and the
//! read capabilities the eligibility engine consumes.

pub mod abi;
pub mod errors;
pub mod reader;
pub mod task;

pub use errors::ModelError;
pub use reader::{ChainReader, GasPriceOracle, ReadError};
pub use task::{
    Action, ActionSpec, Condition, DataFlow, GelatoProvider, Operation, Task, TaskReceipt,
    TaskSpec, TaskSubmission, NO_CEIL,
};
