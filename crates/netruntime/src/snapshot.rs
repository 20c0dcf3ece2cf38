//! Case export/import.
//!
//! A snapshot carries the complete case state (marking, work items,
//! instance groups, case data, counters) plus the identity of the net it
//! was produced under. Import refuses snapshots that do not match the net
//! it is given; the snapshot itself is never modified.

use crate::config::RunnerSettings;
use crate::graph::NetGraph;
use crate::runner::{CaseRunner, CaseState};
use chrono::{DateTime, Utc};
use netcore::{CaseId, CaseStatus, EngineError, NetModel, PredicateEvaluator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseSnapshot {
    pub format_version: u32,
    pub net_id: String,
    pub net_version: String,
    pub exported_at: DateTime<Utc>,
    pub state: CaseState,
}

impl CaseSnapshot {
    pub fn case_id(&self) -> CaseId {
        self.state.case_id
    }

    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    pub fn is_terminal(&self) -> bool {
        self.state.status != CaseStatus::Running
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw)
            .map_err(|e| EngineError::SnapshotIncompatible(format!("unreadable snapshot: {}", e)))
    }
}

/// Capture the committed state of a runner.
pub fn export(runner: &CaseRunner) -> CaseSnapshot {
    CaseSnapshot {
        format_version: SNAPSHOT_FORMAT_VERSION,
        net_id: runner.net().id.clone(),
        net_version: runner.net().version.clone(),
        exported_at: Utc::now(),
        state: runner.state().clone(),
    }
}

/// Rebuild a runner from a snapshot taken under `net`.
pub fn import(
    snapshot: &CaseSnapshot,
    net: Arc<NetModel>,
    evaluator: Arc<dyn PredicateEvaluator>,
    settings: RunnerSettings,
) -> Result<CaseRunner, EngineError> {
    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(EngineError::SnapshotIncompatible(format!(
            "format version {} is not supported (expected {})",
            snapshot.format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }
    if snapshot.net_id != net.id || snapshot.net_version != net.version {
        return Err(EngineError::SnapshotIncompatible(format!(
            "snapshot belongs to net {} ({}), not {} ({})",
            snapshot.net_id, snapshot.net_version, net.id, net.version
        )));
    }

    let graph = crate::validate::validate(&net)
        .map_err(|e| EngineError::SnapshotIncompatible(format!("net is not well-formed: {}", e)))?;
    check_references(&snapshot.state, &net)?;

    tracing::debug!(
        "Importing case {} at revision {}",
        snapshot.case_id(),
        snapshot.revision()
    );

    Ok(CaseRunner::restore(
        net,
        Arc::new(graph),
        evaluator,
        settings,
        snapshot.state.clone(),
    ))
}

/// Every element the state mentions must exist in the net with the right kind.
fn check_references(state: &CaseState, net: &NetModel) -> Result<(), EngineError> {
    let missing = |what: &str, id: &str| {
        EngineError::SnapshotIncompatible(format!("{} '{}' does not exist in net {}", what, id, net.id))
    };

    for condition in state.marking.marked_conditions() {
        if !net.is_condition(condition) {
            return Err(missing("condition", condition));
        }
    }
    for task in state.marking.busy_tasks() {
        if net.task(task).is_none() {
            return Err(missing("task", task));
        }
    }
    for item in state.work_items.values() {
        if net.task(&item.task_id).is_none() {
            return Err(missing("task", &item.task_id));
        }
        if item.case_id != state.case_id {
            return Err(EngineError::SnapshotIncompatible(format!(
                "work item {} belongs to case {}",
                item.id, item.case_id
            )));
        }
    }
    for task in state.groups.keys() {
        if net.task(task).is_none() {
            return Err(missing("task", task));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcore::{CaseData, FnEvaluator, Task};
    use serde_json::Value;

    fn net() -> NetModel {
        let mut net = NetModel::new("review", "start", "end");
        net.add_task(Task::new("check"));
        net.connect("start", "check");
        net.connect("check", "end");
        net
    }

    fn evaluator() -> Arc<dyn PredicateEvaluator> {
        Arc::new(FnEvaluator::new(|_: &str, _: &Value| Ok(Value::Bool(true))))
    }

    #[test]
    fn json_round_trip_preserves_state() {
        let (runner, _) = CaseRunner::launch(
            Arc::new(net()),
            evaluator(),
            RunnerSettings::default(),
            CaseData::new(),
        )
        .unwrap();
        let snapshot = export(&runner);
        let raw = snapshot.to_json().unwrap();
        let parsed = CaseSnapshot::from_json(&raw).unwrap();
        assert_eq!(parsed, snapshot);
        assert!(!parsed.is_terminal());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let (runner, _) = CaseRunner::launch(
            Arc::new(net()),
            evaluator(),
            RunnerSettings::default(),
            CaseData::new(),
        )
        .unwrap();
        let mut snapshot = export(&runner);
        snapshot.format_version = 99;
        let err = import(
            &snapshot,
            Arc::new(net()),
            evaluator(),
            RunnerSettings::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::SnapshotIncompatible(_)));
        assert_eq!(snapshot.format_version, 99);
    }
}
