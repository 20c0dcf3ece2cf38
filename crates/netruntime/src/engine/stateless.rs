use crate::config::EngineConfig;
use crate::runner::{CaseRunner, StepOutcome};
use crate::snapshot::{self, CaseSnapshot};
use netcore::{
    CaseData, EngineError, EventBus, LifecycleEvent, NetModel, PredicateEvaluator, WorkItemId,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of a stateless operation: what happened plus the successor state.
#[derive(Debug, Clone)]
pub struct StatelessResult {
    pub outcome: StepOutcome,
    pub snapshot: CaseSnapshot,
}

/// Engine that keeps no case state between calls.
///
/// Every operation takes the case as a snapshot and returns the successor
/// snapshot; the caller owns storage and concurrency. The input snapshot is
/// never modified, so a failed operation leaves the caller holding a valid
/// pre-operation state.
pub struct StatelessEngine {
    config: EngineConfig,
    evaluator: Arc<dyn PredicateEvaluator>,
    event_bus: Arc<EventBus>,
}

impl StatelessEngine {
    pub fn new(config: EngineConfig, evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            config,
            evaluator,
            event_bus,
        }
    }

    pub fn launch_case(
        &self,
        net: Arc<NetModel>,
        data: CaseData,
    ) -> Result<StatelessResult, EngineError> {
        let (runner, outcome) = CaseRunner::launch(
            net,
            self.evaluator.clone(),
            self.config.runner_settings(),
            data,
        )?;
        self.event_bus.publish(&outcome.events);
        Ok(StatelessResult {
            snapshot: snapshot::export(&runner),
            outcome,
        })
    }

    pub fn start_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.start_work_item(id))
    }

    pub fn complete_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
        output: Value,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.complete_work_item(id, output))
    }

    pub fn fail_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
        reason: &str,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.fail_work_item(id, reason))
    }

    pub fn retry_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.retry_work_item(id))
    }

    pub fn escalate_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.escalate_work_item(id))
    }

    pub fn suspend_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.suspend_work_item(id))
    }

    pub fn resume_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.resume_work_item(id))
    }

    pub fn timeout_work_item(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        id: &WorkItemId,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.timeout_work_item(id))
    }

    pub fn add_instance(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        member: &WorkItemId,
        input: Value,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.add_instance(member, input))
    }

    pub fn cancel_region(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        task_id: &str,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, |runner| runner.cancel_region(task_id))
    }

    pub fn suspend_case(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, CaseRunner::suspend_case)
    }

    pub fn resume_case(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, CaseRunner::resume_case)
    }

    pub fn cancel_case(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
    ) -> Result<StatelessResult, EngineError> {
        self.apply(net, case, CaseRunner::cancel_case)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn apply<F>(
        &self,
        net: Arc<NetModel>,
        case: &CaseSnapshot,
        op: F,
    ) -> Result<StatelessResult, EngineError>
    where
        F: FnOnce(&mut CaseRunner) -> Result<StepOutcome, EngineError>,
    {
        let mut runner = snapshot::import(
            case,
            net,
            self.evaluator.clone(),
            self.config.runner_settings(),
        )?;
        match op(&mut runner) {
            Ok(outcome) => {
                self.event_bus.publish(&outcome.events);
                Ok(StatelessResult {
                    snapshot: snapshot::export(&runner),
                    outcome,
                })
            }
            Err(e) => {
                self.event_bus.publish(&runner.take_events());
                Err(e)
            }
        }
    }
}
