use crate::ElementId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type CaseId = Uuid;

/// Stable work item identifier, derived from the case, the task and a
/// per-case sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(case_id: CaseId, task_id: &str, sequence: u64) -> Self {
        Self(format!("{}:{}:{}", case_id, task_id, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case that issued this identifier.
    pub fn case_id(&self) -> Option<CaseId> {
        let (prefix, _) = self.0.split_once(':')?;
        Uuid::parse_str(prefix).ok()
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Enabled,
    Executing,
    Suspended,
    Complete,
    Failed,
    /// Failure escalated to an administrator; terminal.
    Escalated,
    Cancelled,
}

impl WorkItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkItemStatus::Complete | WorkItemStatus::Escalated | WorkItemStatus::Cancelled
        )
    }

    /// Transitions of the work item state machine. Cancellation is reachable
    /// from every non-terminal state.
    pub fn can_become(self, next: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        match (self, next) {
            (Enabled, Executing)
            | (Executing, Complete)
            | (Executing, Suspended)
            | (Suspended, Executing)
            | (Executing, Failed)
            | (Failed, Enabled)
            | (Failed, Escalated) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// How a work item reached COMPLETE.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    Reported,
    TimedOut,
}

/// One in-flight instance of a task firing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub case_id: CaseId,
    pub task_id: ElementId,
    /// Position within a multi-instance group.
    pub instance: Option<u32>,
    pub status: WorkItemStatus,
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub outcome: Option<CompletionOutcome>,
    #[serde(default)]
    pub failure: Option<String>,
    pub attempts: u32,
    pub enabled_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(
        id: WorkItemId,
        case_id: CaseId,
        task_id: impl Into<ElementId>,
        instance: Option<u32>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id,
            case_id,
            task_id: task_id.into(),
            instance,
            status: WorkItemStatus::Enabled,
            input,
            output: None,
            outcome: None,
            failure: None,
            attempts: 0,
            enabled_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Running,
    Completed,
    Cancelled,
}
