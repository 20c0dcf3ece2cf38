use crate::{CaseId, CaseStatus, WorkItemId, WorkItemStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid specification: {0}")]
    InvalidSpecification(#[from] NetError),

    #[error("No split predicate matched for task '{task_id}'")]
    NoSplitPredicateMatched { task_id: String },

    #[error("Multi-instance bound violation on task '{task_id}': {count} outside [{min}, {max}]")]
    MultiInstanceBoundViolation {
        task_id: String,
        count: u64,
        min: u32,
        max: u32,
    },

    #[error("Task '{task_id}' creates its instances statically")]
    StaticInstanceCreation { task_id: String },

    #[error("Snapshot incompatible: {0}")]
    SnapshotIncompatible(String),

    #[error("Case {case_id} is mid-transition in another caller")]
    ConcurrentModificationConflict { case_id: CaseId },

    #[error("Work item {work_item_id} is already {status:?}")]
    WorkItemConflict {
        work_item_id: WorkItemId,
        status: WorkItemStatus,
    },

    #[error("Invalid transition for work item {work_item_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        work_item_id: WorkItemId,
        from: WorkItemStatus,
        to: WorkItemStatus,
    },

    #[error("Case not found: {0}")]
    CaseNotFound(CaseId),

    #[error("Work item not found: {0}")]
    WorkItemNotFound(WorkItemId),

    #[error("Net not found: {id} ({version})")]
    NetNotFound { id: String, version: String },

    #[error("Case {case_id} is {status:?}")]
    CaseNotRunning { case_id: CaseId, status: CaseStatus },

    #[error("Case {0} is suspended")]
    CaseSuspended(CaseId),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Well-formedness violations found while loading a net.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Duplicate element: {0}")]
    DuplicateElement(String),

    #[error("'{0}' must be a condition")]
    NotACondition(String),

    #[error("Invalid flow {from} -> {to}: {reason}")]
    InvalidFlow {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Task '{0}' has no input flow")]
    MissingInput(String),

    #[error("Task '{0}' has no output flow")]
    MissingOutput(String),

    #[error("Cancellation set of '{task_id}' references unknown element '{element}'")]
    InvalidCancellationSet { task_id: String, element: String },

    #[error("Invalid multi-instance attributes on '{task_id}': {reason}")]
    InvalidMultiInstance { task_id: String, reason: String },

    #[error("Element '{0}' is not reachable from the input condition")]
    Unreachable(String),

    #[error("Output condition is not reachable from the input condition")]
    OutputUnreachable,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Expected a boolean result from '{0}'")]
    NotBoolean(String),
}
