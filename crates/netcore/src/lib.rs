//! Core abstractions for the net engine
//!
//! This crate provides the immutable net model, the per-case marking,
//! work items, lifecycle events and the error taxonomy that every other
//! component depends on. It has no execution logic.

mod data;
mod error;
pub mod events;
mod marking;
mod net;
mod predicate;
mod work_item;

pub use data::{truthy, CaseData};
pub use error::{EngineError, ExpressionError, NetError};
pub use events::*;
pub use marking::{Marking, Token};
pub use net::{
    Condition, ElementId, Flow, Gate, InstanceCreation, MultiInstance, NetElement, NetModel, Task,
};
pub use predicate::{FnEvaluator, PredicateEvaluator};
pub use work_item::{
    CaseId, CaseStatus, CompletionOutcome, WorkItem, WorkItemId, WorkItemStatus,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
