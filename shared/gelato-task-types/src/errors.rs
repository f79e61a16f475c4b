use thiserror::Error;

/// Local contract violations, raised before any chain interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("task {task} has no actions")]
    EmptyActions { task: usize },
    #[error("task {task} action {action} targets the zero address")]
    ZeroActionTarget { task: usize, action: usize },
    #[error("task {task} action {action} has no function selector")]
    MissingSelector { task: usize, action: usize },
    #[error("task {task} action {action} sends value with delegatecall")]
    DelegatecallWithValue { task: usize, action: usize },
    #[error("task {task} condition {condition} targets the zero address")]
    ZeroConditionTarget { task: usize, condition: usize },
    #[error("provider address is zero")]
    ZeroProviderAddress,
    #[error("provider module is zero")]
    ZeroProviderModule,
    #[error("user proxy is zero")]
    ZeroUserProxy,
    #[error("submission has no tasks")]
    NoTasks,
    #[error("submission has zero cycles")]
    ZeroCycles,
    #[error("unknown operation {0}")]
    UnknownOperation(u8),
    #[error("unknown data flow {0}")]
    UnknownDataFlow(u8),
}
