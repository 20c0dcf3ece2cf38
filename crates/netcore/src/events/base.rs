use crate::{CaseId, CompletionOutcome, ElementId, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One state transition of a case or work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub case_id: CaseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<WorkItemId>,
    /// Per-case order in which transitions were applied.
    pub sequence: u64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    CaseStarted { net_id: String, net_version: String },
    CaseCompleted,
    CaseCancelled,
    CaseSuspended,
    CaseResumed,
    /// Nothing can fire and the output condition was not reached.
    CaseStalled { marked: Vec<ElementId> },
    CaseFaulted { reason: String },
    WorkItemEnabled { task_id: ElementId, instance: Option<u32> },
    WorkItemExecuting { task_id: ElementId },
    WorkItemSuspended { task_id: ElementId },
    WorkItemResumed { task_id: ElementId },
    WorkItemCompleted { task_id: ElementId, outcome: CompletionOutcome },
    WorkItemFailed { task_id: ElementId, reason: String },
    WorkItemEscalated { task_id: ElementId },
    WorkItemCancelled { task_id: ElementId },
    TaskExited { task_id: ElementId, produced: Vec<ElementId>, cancelled: Vec<ElementId> },
}

impl LifecycleEvent {
    pub fn is_terminal_for_case(&self) -> bool {
        matches!(self.kind, EventKind::CaseCompleted | EventKind::CaseCancelled)
    }
}

/// Fan-out of lifecycle events to in-process subscribers.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let sequence = event.sequence;
        let case_id = event.case_id;
        if self.sender.send(event).is_err() {
            tracing::trace!(
                "No subscriber for event {} of case {}",
                sequence,
                case_id
            );
        }
    }

    /// Publish in order; events are dropped when nobody listens.
    pub fn publish(&self, events: &[LifecycleEvent]) {
        for event in events {
            self.emit(event.clone());
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
