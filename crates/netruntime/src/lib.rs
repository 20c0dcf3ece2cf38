//! Net execution runtime
//!
//! This crate runs cases of a validated net: the case runner fires tasks
//! against the marking, the OR-join evaluator decides non-local joins, and
//! the two engine variants manage persistence and concurrency around it.

mod config;
mod engine;
mod graph;
mod multi_instance;
mod or_join;
mod registry;
mod runner;
mod snapshot;
mod store;
mod validate;

pub use config::{EngineConfig, RunnerSettings};
pub use engine::{StatefulEngine, StatelessEngine, StatelessResult};
pub use graph::NetGraph;
pub use multi_instance::{GroupTally, InstanceGroup};
pub use or_join::{OrJoinEvaluator, OrJoinVerdict};
pub use registry::NetRegistry;
pub use runner::{CaseRunner, CaseState, StepOutcome};
pub use snapshot::{export, import, CaseSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{CaseStore, InMemoryCaseStore};
pub use validate::{validate, validate_expressions};
