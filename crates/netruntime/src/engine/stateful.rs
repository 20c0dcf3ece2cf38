use crate::config::EngineConfig;
use crate::registry::NetRegistry;
use crate::runner::{CaseRunner, StepOutcome};
use crate::snapshot::{self, CaseSnapshot};
use crate::store::CaseStore;
use netcore::{
    CaseData, CaseId, CaseStatus, EngineError, EventBus, LifecycleEvent, NetModel,
    PredicateEvaluator, WorkItem, WorkItemId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

/// Long-lived engine owning every running case it launched.
///
/// Each case sits behind its own mutex so independent cases progress in
/// parallel while operations on one case are serialized. A committed
/// change is written to the [`CaseStore`] before the caller sees the
/// result, and its events are published afterwards. Cases leave memory
/// once they complete or are cancelled; their final snapshot stays in the
/// store until [`StatefulEngine::purge_case`] drops it.
pub struct StatefulEngine {
    config: EngineConfig,
    evaluator: Arc<dyn PredicateEvaluator>,
    registry: RwLock<NetRegistry>,
    store: Arc<dyn CaseStore>,
    cases: RwLock<HashMap<CaseId, Arc<Mutex<CaseRunner>>>>,
    event_bus: Arc<EventBus>,
}

impl StatefulEngine {
    /// Create the engine and restore every non-terminal case held by `store`.
    /// Nets referenced by stored cases must already be in `registry`; a
    /// running case whose net is missing fails the start.
    pub async fn start(
        config: EngineConfig,
        evaluator: Arc<dyn PredicateEvaluator>,
        registry: NetRegistry,
        store: Arc<dyn CaseStore>,
    ) -> Result<Self, EngineError> {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let mut cases = HashMap::new();

        for stored in store.load_all().await? {
            if stored.is_terminal() {
                continue;
            }
            let entry = registry
                .entry(&stored.net_id, &stored.net_version)
                .map_err(|e| {
                    tracing::error!("Cannot restore case {}: {}", stored.case_id(), e);
                    e
                })?;
            let runner = snapshot::import(
                &stored,
                entry.net,
                evaluator.clone(),
                config.runner_settings(),
            )?;
            tracing::info!(
                "Restored case {} at revision {}",
                stored.case_id(),
                stored.revision()
            );
            cases.insert(stored.case_id(), Arc::new(Mutex::new(runner)));
        }

        Ok(Self {
            config,
            evaluator,
            registry: RwLock::new(registry),
            store,
            cases: RwLock::new(cases),
            event_bus,
        })
    }

    /// Validate and register a net so cases can be launched from it.
    pub async fn register_net(&self, net: NetModel) -> Result<Arc<NetModel>, EngineError> {
        self.registry
            .write()
            .await
            .register(net, Some(self.evaluator.as_ref()))
    }

    pub async fn list_nets(&self) -> Vec<(String, String)> {
        self.registry.read().await.list_nets()
    }

    /// Launch a case of a registered net.
    pub async fn launch_case(
        &self,
        net_id: &str,
        version: &str,
        data: CaseData,
    ) -> Result<StepOutcome, EngineError> {
        let entry = self.registry.read().await.entry(net_id, version)?;
        let (runner, outcome) = CaseRunner::launch_prepared(
            Uuid::new_v4(),
            entry.net,
            entry.graph,
            self.evaluator.clone(),
            self.config.runner_settings(),
            data,
        )?;

        let snapshot = snapshot::export(&runner);
        self.persist(&snapshot).await?;
        if outcome.status == CaseStatus::Running {
            self.cases
                .write()
                .await
                .insert(outcome.case_id, Arc::new(Mutex::new(runner)));
        }

        self.event_bus.publish(&outcome.events);
        Ok(outcome)
    }

    pub async fn start_work_item(&self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.start_work_item(id)).await
    }

    pub async fn complete_work_item(
        &self,
        id: &WorkItemId,
        output: Value,
    ) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.complete_work_item(id, output))
            .await
    }

    pub async fn fail_work_item(
        &self,
        id: &WorkItemId,
        reason: &str,
    ) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.fail_work_item(id, reason))
            .await
    }

    pub async fn retry_work_item(&self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.retry_work_item(id)).await
    }

    pub async fn escalate_work_item(&self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.escalate_work_item(id))
            .await
    }

    pub async fn suspend_work_item(&self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.suspend_work_item(id)).await
    }

    pub async fn resume_work_item(&self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.resume_work_item(id)).await
    }

    /// Timer expiry for a work item.
    pub async fn timeout_work_item(&self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(id)?;
        self.apply(case_id, |runner| runner.timeout_work_item(id)).await
    }

    pub async fn add_instance(
        &self,
        member: &WorkItemId,
        input: Value,
    ) -> Result<StepOutcome, EngineError> {
        let case_id = case_of(member)?;
        self.apply(case_id, |runner| runner.add_instance(member, input))
            .await
    }

    pub async fn cancel_region(
        &self,
        case_id: CaseId,
        task_id: &str,
    ) -> Result<StepOutcome, EngineError> {
        self.apply(case_id, |runner| runner.cancel_region(task_id))
            .await
    }

    pub async fn suspend_case(&self, case_id: CaseId) -> Result<StepOutcome, EngineError> {
        self.apply(case_id, CaseRunner::suspend_case).await
    }

    pub async fn resume_case(&self, case_id: CaseId) -> Result<StepOutcome, EngineError> {
        self.apply(case_id, CaseRunner::resume_case).await
    }

    pub async fn cancel_case(&self, case_id: CaseId) -> Result<StepOutcome, EngineError> {
        self.apply(case_id, CaseRunner::cancel_case).await
    }

    /// Drop the stored record of a completed or cancelled case.
    pub async fn purge_case(&self, case_id: CaseId) -> Result<(), EngineError> {
        if self.cases.read().await.contains_key(&case_id) {
            return Err(EngineError::CaseNotRunning {
                case_id,
                status: CaseStatus::Running,
            });
        }
        if self.store.load(case_id).await?.is_none() {
            return Err(EngineError::CaseNotFound(case_id));
        }
        self.store.remove(case_id).await?;
        tracing::info!("Purged case {}", case_id);
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Current snapshot of a case. Finished cases are read from the store.
    pub async fn snapshot(&self, case_id: CaseId) -> Result<CaseSnapshot, EngineError> {
        match self.runner(case_id).await {
            Ok(runner) => {
                let guard = self.lock(case_id, &runner).await?;
                Ok(snapshot::export(&guard))
            }
            Err(EngineError::CaseNotFound(_)) => self
                .store
                .load(case_id)
                .await?
                .ok_or(EngineError::CaseNotFound(case_id)),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self, case_id: CaseId) -> Result<CaseStatus, EngineError> {
        Ok(self.snapshot(case_id).await?.state.status)
    }

    pub async fn active_work_items(&self, case_id: CaseId) -> Result<Vec<WorkItem>, EngineError> {
        let snapshot = self.snapshot(case_id).await?;
        Ok(snapshot
            .state
            .work_items
            .into_values()
            .filter(WorkItem::is_active)
            .collect())
    }

    /// Cases currently held in memory, which is every running case.
    pub async fn case_ids(&self) -> Vec<CaseId> {
        self.cases.read().await.keys().copied().collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Run one operation inside the case's critical section, persist the
    /// result if the case changed, then publish its events. A failed save
    /// puts the runner back at its last persisted state and nothing is
    /// published. Finished cases are evicted once persisted.
    async fn apply<F>(&self, case_id: CaseId, op: F) -> Result<StepOutcome, EngineError>
    where
        F: FnOnce(&mut CaseRunner) -> Result<StepOutcome, EngineError>,
    {
        let runner = match self.runner(case_id).await {
            Err(EngineError::CaseNotFound(_)) => return Err(self.finished_case(case_id).await),
            other => other?,
        };
        let mut guard = self.lock(case_id, &runner).await?;

        let committed = guard.state().clone();
        let result = op(&mut *guard);
        let events = match &result {
            Ok(outcome) => outcome.events.clone(),
            Err(_) => guard.take_events(),
        };

        if guard.revision() != committed.revision {
            let snapshot = snapshot::export(&guard);
            if let Err(e) = self.persist(&snapshot).await {
                tracing::warn!(
                    "Rolling case {} back to revision {}",
                    case_id,
                    committed.revision
                );
                guard.reset_state(committed);
                return Err(e);
            }
        }
        let finished = guard.status() != CaseStatus::Running;
        drop(guard);

        if finished && self.cases.write().await.remove(&case_id).is_some() {
            tracing::debug!("Evicted finished case {}", case_id);
        }
        self.event_bus.publish(&events);
        result
    }

    async fn runner(&self, case_id: CaseId) -> Result<Arc<Mutex<CaseRunner>>, EngineError> {
        self.cases
            .read()
            .await
            .get(&case_id)
            .cloned()
            .ok_or(EngineError::CaseNotFound(case_id))
    }

    /// Error for an operation on a case that is no longer in memory.
    async fn finished_case(&self, case_id: CaseId) -> EngineError {
        match self.store.load(case_id).await {
            Ok(Some(stored)) => EngineError::CaseNotRunning {
                case_id,
                status: stored.state.status,
            },
            Ok(None) => EngineError::CaseNotFound(case_id),
            Err(e) => e,
        }
    }

    async fn lock<'a>(
        &self,
        case_id: CaseId,
        runner: &'a Mutex<CaseRunner>,
    ) -> Result<tokio::sync::MutexGuard<'a, CaseRunner>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout(), runner.lock())
            .await
            .map_err(|_| {
                tracing::warn!("Timed out waiting for case {}", case_id);
                EngineError::ConcurrentModificationConflict { case_id }
            })
    }

    async fn persist(&self, snapshot: &CaseSnapshot) -> Result<(), EngineError> {
        self.store.save(snapshot).await.map_err(|e| {
            tracing::error!("Failed to persist case {}: {}", snapshot.case_id(), e);
            e
        })
    }
}

fn case_of(id: &WorkItemId) -> Result<CaseId, EngineError> {
    id.case_id()
        .ok_or_else(|| EngineError::WorkItemNotFound(id.clone()))
}
