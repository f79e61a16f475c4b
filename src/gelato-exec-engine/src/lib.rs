//! Executor-side core of Gelato task automation: `canExec` eligibility, the `exec` driver, the
//! task cycle state machine and an in-process registry for dry runs.

pub mod config;
pub mod cycle;
pub mod driver;
pub mod eligibility;
pub mod errors;
pub mod executor;
pub mod liquidity;
pub mod local;
pub mod reader;
pub mod registry;

pub use config::{ConfigError, EngineConfig};
pub use cycle::{CycleError, CycleEvent, CycleState, TrackedReceipt};
pub use driver::{ExecBackend, ExecSuccess, ExecutionDriver, ExecutionResult, TxOptions};
pub use eligibility::{Check, EligibilityEngine, Step, CHECK_ORDER};
pub use errors::{EligibilityError, EngineError, ExecutionError, RegistryError, Verdict};
pub use executor::{Executor, PollOutcome};
pub use local::LocalGelato;
pub use reader::{CoreGasPriceOracle, GelatoCoreReader};
pub use registry::{ReceiptStatus, TaskRegistry};
