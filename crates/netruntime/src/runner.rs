use crate::config::RunnerSettings;
use crate::graph::NetGraph;
use crate::multi_instance::{self, InstanceGroup};
use crate::or_join::{OrJoinEvaluator, OrJoinVerdict};
use chrono::{DateTime, Utc};
use netcore::{
    CaseData, CaseId, CaseStatus, CompletionOutcome, ElementId, EngineError, EventKind, Gate,
    LifecycleEvent, Marking, NetElement, NetModel, PredicateEvaluator, Task, Token, WorkItem,
    WorkItemId, WorkItemStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Complete mutable state of one case. Everything a snapshot must carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseState {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub suspended: bool,
    pub data: CaseData,
    pub marking: Marking,
    pub work_items: BTreeMap<WorkItemId, WorkItem>,
    /// Work item group of every offered or busy task. An offered task has
    /// a group but is not busy and has not consumed its input tokens.
    pub groups: BTreeMap<ElementId, InstanceGroup>,
    /// Set when the last operation failed on a net/data mismatch.
    pub fault: Option<String>,
    /// Firing counter, stamped on produced tokens.
    pub epoch: u64,
    pub item_sequence: u64,
    pub event_sequence: u64,
    /// Bumped on every committed change.
    pub revision: u64,
    pub started_at: DateTime<Utc>,
}

/// Result of a successful case operation.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub case_id: CaseId,
    pub status: CaseStatus,
    /// Non-terminal work items after the operation.
    pub work_items: Vec<WorkItem>,
    /// Transitions applied by the operation, in order.
    pub events: Vec<LifecycleEvent>,
    /// Nothing can fire and the case did not reach its output condition.
    pub stalled: bool,
    pub revision: u64,
}

impl StepOutcome {
    /// Work items waiting to be started.
    pub fn enabled(&self) -> impl Iterator<Item = &WorkItem> {
        self.work_items
            .iter()
            .filter(|item| item.status == WorkItemStatus::Enabled)
    }

    pub fn enabled_for(&self, task_id: &str) -> Vec<&WorkItem> {
        self.enabled().filter(|item| item.task_id == task_id).collect()
    }
}

/// Drives one case from launch to termination.
///
/// The runner itself is single-threaded: callers serialize access to it
/// (the engines hold one mutex per case). Every mutating operation is
/// transactional, so a failed firing leaves the previous committed state
/// untouched.
pub struct CaseRunner {
    net: Arc<NetModel>,
    graph: Arc<NetGraph>,
    evaluator: Arc<dyn PredicateEvaluator>,
    settings: RunnerSettings,
    state: CaseState,
    pending: Vec<LifecycleEvent>,
    /// Set when the last step hit `max_firings_per_step`.
    overrun: bool,
}

impl CaseRunner {
    /// Seed the marking, offer everything the start token enables and return
    /// the new runner with its initial work items.
    pub fn launch(
        net: Arc<NetModel>,
        evaluator: Arc<dyn PredicateEvaluator>,
        settings: RunnerSettings,
        data: CaseData,
    ) -> Result<(Self, StepOutcome), EngineError> {
        Self::launch_with_id(Uuid::new_v4(), net, evaluator, settings, data)
    }

    pub fn launch_with_id(
        case_id: CaseId,
        net: Arc<NetModel>,
        evaluator: Arc<dyn PredicateEvaluator>,
        settings: RunnerSettings,
        data: CaseData,
    ) -> Result<(Self, StepOutcome), EngineError> {
        let graph = Arc::new(crate::validate::validate(&net)?);
        Self::launch_prepared(case_id, net, graph, evaluator, settings, data)
    }

    /// Launch on a net that was already validated into `graph`.
    pub(crate) fn launch_prepared(
        case_id: CaseId,
        net: Arc<NetModel>,
        graph: Arc<NetGraph>,
        evaluator: Arc<dyn PredicateEvaluator>,
        settings: RunnerSettings,
        data: CaseData,
    ) -> Result<(Self, StepOutcome), EngineError> {
        let state = CaseState {
            case_id,
            status: CaseStatus::Running,
            suspended: false,
            data,
            marking: Marking::new(),
            work_items: BTreeMap::new(),
            groups: BTreeMap::new(),
            fault: None,
            epoch: 0,
            item_sequence: 0,
            event_sequence: 0,
            revision: 0,
            started_at: Utc::now(),
        };
        let mut runner = Self {
            net,
            graph,
            evaluator,
            settings,
            state,
            pending: Vec::new(),
            overrun: false,
        };

        tracing::info!("Launching case {} of net {}", case_id, runner.net.id);

        let outcome = runner.transact(|r| {
            let kind = EventKind::CaseStarted {
                net_id: r.net.id.clone(),
                net_version: r.net.version.clone(),
            };
            r.emit(None, kind);
            let input = r.net.input_condition.clone();
            r.state.marking.add(input, Token::new(0));
            r.continue_if_possible()
        })?;

        Ok((runner, outcome))
    }

    /// Rebuild a runner around previously exported state.
    pub(crate) fn restore(
        net: Arc<NetModel>,
        graph: Arc<NetGraph>,
        evaluator: Arc<dyn PredicateEvaluator>,
        settings: RunnerSettings,
        state: CaseState,
    ) -> Self {
        Self {
            net,
            graph,
            evaluator,
            settings,
            state,
            pending: Vec::new(),
            overrun: false,
        }
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn case_id(&self) -> CaseId {
        self.state.case_id
    }

    pub fn net(&self) -> &Arc<NetModel> {
        &self.net
    }

    pub fn status(&self) -> CaseStatus {
        self.state.status
    }

    pub fn is_suspended(&self) -> bool {
        self.state.suspended
    }

    pub fn marking(&self) -> &Marking {
        &self.state.marking
    }

    pub fn data(&self) -> &CaseData {
        &self.state.data
    }

    pub fn fault(&self) -> Option<&str> {
        self.state.fault.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    pub fn state(&self) -> &CaseState {
        &self.state
    }

    pub fn work_item(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.state.work_items.get(id)
    }

    /// Every work item ever issued by this case, including terminal ones.
    pub fn work_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.state.work_items.values()
    }

    pub fn active_work_items(&self) -> Vec<WorkItem> {
        self.state
            .work_items
            .values()
            .filter(|item| item.is_active())
            .cloned()
            .collect()
    }

    pub fn enabled_work_items(&self) -> Vec<WorkItem> {
        self.state
            .work_items
            .values()
            .filter(|item| item.status == WorkItemStatus::Enabled)
            .cloned()
            .collect()
    }

    /// Events left behind by a failed operation.
    pub fn take_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Put back a previously committed state, dropping anything since.
    pub(crate) fn reset_state(&mut self, state: CaseState) {
        self.state = state;
        self.pending.clear();
        self.overrun = false;
    }

    // ── Work item lifecycle ─────────────────────────────────────────

    /// Start a work item. Starting the first item of an offered task fires
    /// it, which withdraws competing offers that lose their tokens.
    pub fn start_work_item(&mut self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            r.transition(id, WorkItemStatus::Executing)?;
            let task_id = r.item(id)?.task_id.clone();
            if r.fire_offered(&task_id)? {
                r.continue_if_possible()?;
            }
            Ok(())
        })
    }

    /// Complete an executing work item and fire whatever that enables.
    pub fn complete_work_item(
        &mut self,
        id: &WorkItemId,
        output: Value,
    ) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            r.finish(id, Some(output), CompletionOutcome::Reported)?;
            r.continue_if_possible()
        })
    }

    /// Timer expiry. Goes through the same path as a reported completion
    /// with a distinguished outcome and no output data.
    pub fn timeout_work_item(&mut self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            match r.item(id)?.status {
                WorkItemStatus::Enabled | WorkItemStatus::Suspended => {
                    r.transition(id, WorkItemStatus::Executing)?;
                }
                _ => {}
            }
            let task_id = r.item(id)?.task_id.clone();
            r.fire_offered(&task_id)?;
            r.finish(id, None, CompletionOutcome::TimedOut)?;
            r.continue_if_possible()
        })
    }

    pub fn fail_work_item(
        &mut self,
        id: &WorkItemId,
        reason: impl Into<String>,
    ) -> Result<StepOutcome, EngineError> {
        let reason = reason.into();
        self.transact(|r| {
            r.ensure_accepting()?;
            if let Some(item) = r.state.work_items.get_mut(id) {
                item.failure = Some(reason.clone());
            }
            r.transition(id, WorkItemStatus::Failed)
        })
    }

    pub fn retry_work_item(&mut self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            r.transition(id, WorkItemStatus::Enabled)?;
            if let Some(item) = r.state.work_items.get_mut(id) {
                item.attempts += 1;
                item.failure = None;
            }
            Ok(())
        })
    }

    pub fn escalate_work_item(&mut self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            r.transition(id, WorkItemStatus::Escalated)?;
            let task_id = r.item(id)?.task_id.clone();
            r.settle_group(&task_id)?;
            r.continue_if_possible()
        })
    }

    pub fn suspend_work_item(&mut self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            r.transition(id, WorkItemStatus::Suspended)
        })
    }

    pub fn resume_work_item(&mut self, id: &WorkItemId) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            if r.item(id)?.status != WorkItemStatus::Suspended {
                let from = r.item(id)?.status;
                return Err(EngineError::InvalidTransition {
                    work_item_id: id.clone(),
                    from,
                    to: WorkItemStatus::Executing,
                });
            }
            r.transition(id, WorkItemStatus::Executing)
        })
    }

    /// Add a member to the running group of a dynamic multi-instance task.
    pub fn add_instance(
        &mut self,
        member: &WorkItemId,
        input: Value,
    ) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            let item = r.item(member)?;
            if item.status.is_terminal() {
                return Err(EngineError::WorkItemConflict {
                    work_item_id: member.clone(),
                    status: item.status,
                });
            }
            let task_id = item.task_id.clone();
            let task = r.task(&task_id)?;
            let Some(attributes) = task.multi_instance.clone() else {
                return Err(EngineError::StaticInstanceCreation { task_id });
            };
            if attributes.creation != netcore::InstanceCreation::Dynamic {
                return Err(EngineError::StaticInstanceCreation { task_id });
            }
            let count = r
                .state
                .groups
                .get(&task_id)
                .map(InstanceGroup::current_instance_count)
                .unwrap_or(0) as u64;
            if count + 1 > u64::from(attributes.max) {
                return Err(EngineError::MultiInstanceBoundViolation {
                    task_id,
                    count: count + 1,
                    min: attributes.min,
                    max: attributes.max,
                });
            }
            r.issue_work_item(&task_id, true, input);
            Ok(())
        })
    }

    // ── Case lifecycle ──────────────────────────────────────────────

    pub fn suspend_case(&mut self) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_running()?;
            if r.state.suspended {
                return Err(EngineError::CaseSuspended(r.state.case_id));
            }
            r.state.suspended = true;
            r.emit(None, EventKind::CaseSuspended);
            tracing::info!("Case {} suspended", r.state.case_id);
            Ok(())
        })
    }

    pub fn resume_case(&mut self) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_running()?;
            if !r.state.suspended {
                return Ok(());
            }
            r.state.suspended = false;
            r.emit(None, EventKind::CaseResumed);
            tracing::info!("Case {} resumed", r.state.case_id);
            r.continue_if_possible()
        })
    }

    pub fn cancel_case(&mut self) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_running()?;
            r.cancel_active_items(|_| true);
            r.state.groups.clear();
            r.state.marking.reset();
            r.state.status = CaseStatus::Cancelled;
            r.state.suspended = false;
            r.emit(None, EventKind::CaseCancelled);
            tracing::info!("Case {} cancelled", r.state.case_id);
            Ok(())
        })
    }

    /// Apply the cancellation set of `task_id` now, then continue.
    pub fn cancel_region(&mut self, task_id: &str) -> Result<StepOutcome, EngineError> {
        self.transact(|r| {
            r.ensure_accepting()?;
            let task = r.task(task_id)?;
            let cancelled = r.apply_cancellation(&task);
            tracing::info!(
                "Cancellation region of {} cleared {:?} in case {}",
                task_id,
                cancelled,
                r.state.case_id
            );
            r.continue_if_possible()
        })
    }

    // ── Firing ──────────────────────────────────────────────────────

    /// Offer every enabled task, one at a time, until nothing new is
    /// enabled. Automatic tasks fire and exit on the spot. Enablement of
    /// every task (OR-joins included) is re-evaluated after each step since
    /// any token movement may change it; offers whose join no longer holds
    /// are withdrawn.
    fn continue_if_possible(&mut self) -> Result<(), EngineError> {
        let mut firings = 0usize;
        loop {
            if self.state.status != CaseStatus::Running || self.state.suspended {
                return Ok(());
            }
            if self.state.marking.is_marked(&self.net.output_condition) {
                self.complete_case();
                return Ok(());
            }
            self.withdraw_lapsed_offers();
            let Some(task) = self.next_enabled_task() else {
                return Ok(());
            };
            firings += 1;
            if firings > self.settings.max_firings_per_step {
                tracing::warn!(
                    "Case {} exceeded {} firings in one step",
                    self.state.case_id,
                    self.settings.max_firings_per_step
                );
                self.overrun = true;
                return Ok(());
            }
            if task.automatic {
                self.fire(&task);
                self.exit_task(&task, Value::Null)?;
            } else {
                self.offer(&task)?;
            }
        }
    }

    fn is_offered(&self, task_id: &str) -> bool {
        self.state.groups.contains_key(task_id) && !self.state.marking.is_busy(task_id)
    }

    /// First task, in identifier order, that is neither busy nor offered and
    /// whose join holds.
    fn next_enabled_task(&self) -> Option<Task> {
        let or_join = OrJoinEvaluator::new(self.settings.or_join_budget);
        self.net
            .tasks()
            .filter(|task| !self.state.marking.is_busy(&task.id))
            .filter(|task| !self.state.groups.contains_key(&task.id))
            .find(|task| self.join_holds(task, &or_join))
            .cloned()
    }

    fn join_holds(&self, task: &Task, or_join: &OrJoinEvaluator) -> bool {
        let marking = &self.state.marking;
        let preset = self.net.preset(&task.id);
        match task.join {
            Gate::And => preset.iter().all(|c| marking.is_marked(c)),
            Gate::Xor => preset.iter().any(|c| marking.is_marked(c)),
            Gate::Or => {
                let verdict = or_join.evaluate(&self.net, &self.graph, marking, &task.id);
                match &verdict {
                    OrJoinVerdict::Waiting { live } => tracing::debug!(
                        "OR-join {} waits on {:?} in case {}",
                        task.id,
                        live,
                        self.state.case_id
                    ),
                    OrJoinVerdict::BudgetExhausted => tracing::warn!(
                        "OR-join {} evaluation exhausted its budget in case {}",
                        task.id,
                        self.state.case_id
                    ),
                    _ => {}
                }
                verdict.is_enabled()
            }
        }
    }

    /// Issue the work items of a manual task without touching its tokens.
    fn offer(&mut self, task: &Task) -> Result<(), EngineError> {
        self.state
            .groups
            .insert(task.id.clone(), InstanceGroup::new(&task.id));
        if task.is_multi_instance() {
            self.expand_multi_instance(task)?;
        } else {
            let input = self.state.data.to_json();
            self.issue_work_item(&task.id, false, input);
        }
        tracing::debug!("Offered task {} in case {}", task.id, self.state.case_id);
        Ok(())
    }

    /// Fire `task_id` if it is still only offered. Returns whether it fired.
    fn fire_offered(&mut self, task_id: &str) -> Result<bool, EngineError> {
        if !self.is_offered(task_id) {
            return Ok(false);
        }
        let task = self.task(task_id)?;
        self.fire(&task);
        Ok(true)
    }

    /// Consume the join's tokens and mark the task busy.
    fn fire(&mut self, task: &Task) {
        let preset = self.net.preset(&task.id);
        let marking = &mut self.state.marking;
        match task.join {
            Gate::And => {
                for condition in &preset {
                    marking.take(condition);
                }
            }
            Gate::Xor => {
                if let Some(condition) = preset.iter().find(|c| marking.is_marked(c)) {
                    marking.take(condition);
                }
            }
            Gate::Or => {
                for condition in &preset {
                    if marking.is_marked(condition) {
                        marking.take(condition);
                    }
                }
            }
        }
        marking.set_busy(task.id.clone());
        self.state.epoch += 1;

        tracing::debug!("Fired task {} in case {}", task.id, self.state.case_id);
    }

    /// Withdraw offered tasks whose join no longer holds, typically because
    /// a competing task fired and took the shared token.
    fn withdraw_lapsed_offers(&mut self) {
        let or_join = OrJoinEvaluator::new(self.settings.or_join_budget);
        let lapsed: Vec<ElementId> = self
            .state
            .groups
            .keys()
            .filter(|task_id| self.is_offered(task_id))
            .filter_map(|task_id| self.net.task(task_id))
            .filter(|task| !self.join_holds(task, &or_join))
            .map(|task| task.id.clone())
            .collect();
        for task_id in lapsed {
            self.withdraw_offer(&task_id);
            tracing::debug!(
                "Withdrew offer of {} in case {}",
                task_id,
                self.state.case_id
            );
        }
    }

    fn withdraw_offer(&mut self, task_id: &str) {
        self.cancel_active_items(|item| item.task_id == task_id);
        self.state.groups.remove(task_id);
    }

    /// Create the members of a multi-instance firing from the case data.
    pub(crate) fn expand_multi_instance(&mut self, task: &Task) -> Result<u32, EngineError> {
        let Some(attributes) = &task.multi_instance else {
            return Ok(0);
        };
        let inputs = multi_instance::instance_inputs(
            &task.id,
            attributes,
            &self.state.data,
            self.evaluator.as_ref(),
        )?;
        let count = inputs.len() as u32;
        for input in inputs {
            self.issue_work_item(&task.id, true, input);
        }
        tracing::debug!(
            "Task {} expanded into {} instances in case {}",
            task.id,
            count,
            self.state.case_id
        );
        Ok(count)
    }

    fn issue_work_item(&mut self, task_id: &str, multi: bool, input: Value) -> WorkItemId {
        self.state.item_sequence += 1;
        let id = WorkItemId::new(self.state.case_id, task_id, self.state.item_sequence);
        let group = self
            .state
            .groups
            .entry(task_id.to_string())
            .or_insert_with(|| InstanceGroup::new(task_id));
        let instance = group.push(id.clone());
        let instance = multi.then_some(instance);

        let item = WorkItem::new(id.clone(), self.state.case_id, task_id, instance, input);
        self.state.work_items.insert(id.clone(), item);
        self.emit(
            Some(id.clone()),
            EventKind::WorkItemEnabled {
                task_id: task_id.to_string(),
                instance,
            },
        );
        id
    }

    /// Exit the task if its group is done. Remaining members are cancelled.
    fn settle_group(&mut self, task_id: &str) -> Result<(), EngineError> {
        let task = self.task(task_id)?;
        let Some(group) = self.state.groups.get(task_id).cloned() else {
            return Ok(());
        };

        let ready = match &task.multi_instance {
            Some(attributes) => multi_instance::group_exit_ready(
                attributes,
                &group,
                &self.state.work_items,
                &self.state.data,
                self.evaluator.as_ref(),
            )?,
            None => group.tally(&self.state.work_items).completed > 0,
        };
        if !ready {
            return Ok(());
        }

        let members = group.members.clone();
        self.cancel_active_items(|item| members.contains(&item.id));

        let output = match &task.multi_instance {
            Some(_) => Value::Array(group.completed_outputs(&self.state.work_items)),
            None => group
                .completed_outputs(&self.state.work_items)
                .into_iter()
                .next()
                .unwrap_or(Value::Null),
        };
        self.exit_task(&task, output)
    }

    /// Merge output data, apply the cancellation set and mark the outputs
    /// chosen by the split, as one step.
    fn exit_task(&mut self, task: &Task, output: Value) -> Result<(), EngineError> {
        match &task.multi_instance {
            Some(attributes) => {
                let key = attributes
                    .aggregate_into
                    .clone()
                    .unwrap_or_else(|| task.id.clone());
                self.state.data.insert(key, output);
            }
            None => self.state.data.merge(&output, &task.id),
        }

        let targets = self.select_outputs(task)?;
        let cancelled = self.apply_cancellation(task);

        self.state.groups.remove(&task.id);
        self.state.marking.clear_busy(&task.id);
        let epoch = self.state.epoch;
        for target in &targets {
            let token = if task.is_multi_instance() {
                Token::tagged(epoch, task.id.clone())
            } else {
                Token::new(epoch)
            };
            self.state.marking.add(target.clone(), token);
        }

        tracing::info!(
            "Task {} exited in case {} -> {:?}",
            task.id,
            self.state.case_id,
            targets
        );
        self.emit(
            None,
            EventKind::TaskExited {
                task_id: task.id.clone(),
                produced: targets,
                cancelled,
            },
        );
        Ok(())
    }

    /// Output conditions chosen by the task's split.
    fn select_outputs(&self, task: &Task) -> Result<Vec<ElementId>, EngineError> {
        let flows: Vec<_> = self.net.outgoing(&task.id).collect();
        if task.split == Gate::And {
            return Ok(flows.iter().map(|f| f.target.clone()).collect());
        }

        let data = self.state.data.to_json();
        let mut chosen = Vec::new();
        for flow in &flows {
            if flow.default && flow.predicate.is_none() {
                continue;
            }
            let holds = match &flow.predicate {
                Some(predicate) => self.evaluator.evaluate_bool(predicate, &data)?,
                None => true,
            };
            if holds {
                chosen.push(flow.target.clone());
                if task.split == Gate::Xor {
                    break;
                }
            }
        }

        if chosen.is_empty() {
            match flows.iter().find(|f| f.default) {
                Some(fallback) => chosen.push(fallback.target.clone()),
                None => {
                    return Err(EngineError::NoSplitPredicateMatched {
                        task_id: task.id.clone(),
                    })
                }
            }
        }
        Ok(chosen)
    }

    /// Remove every token and running work item named by the task's
    /// cancellation set. Returns the elements that actually lost state.
    fn apply_cancellation(&mut self, task: &Task) -> Vec<ElementId> {
        let mut cancelled = Vec::new();
        for element in &task.cancellation_set {
            if *element == task.id {
                continue;
            }
            match self.net.element(element) {
                Some(NetElement::Condition(_)) => {
                    if !self.state.marking.clear(element).is_empty() {
                        cancelled.push(element.clone());
                    }
                }
                Some(NetElement::Task(_)) => {
                    let offered = self.is_offered(element);
                    if self.state.marking.clear_busy(element) || offered {
                        self.withdraw_offer(element);
                        cancelled.push(element.clone());
                    }
                }
                None => tracing::warn!(
                    "Cancellation set of {} names unknown element {}",
                    task.id,
                    element
                ),
            }
        }
        cancelled
    }

    fn complete_case(&mut self) {
        let leftover = self.state.marking.total_tokens().saturating_sub(1)
            + self.state.marking.busy_tasks().count();
        if leftover > 0 {
            tracing::warn!(
                "Case {} reached its output condition with {} live elements remaining",
                self.state.case_id,
                leftover
            );
        }
        self.cancel_active_items(|_| true);
        self.state.groups.clear();
        self.state.marking.reset();
        self.state.status = CaseStatus::Completed;
        self.emit(None, EventKind::CaseCompleted);
        tracing::info!("Case {} completed", self.state.case_id);
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn finish(
        &mut self,
        id: &WorkItemId,
        output: Option<Value>,
        outcome: CompletionOutcome,
    ) -> Result<(), EngineError> {
        // recorded up front so the completion event carries the outcome;
        // a rejected transition rolls the whole step back
        let item = self
            .state
            .work_items
            .get_mut(id)
            .ok_or_else(|| EngineError::WorkItemNotFound(id.clone()))?;
        if !item.status.is_terminal() {
            item.output = output;
            item.outcome = Some(outcome);
        }
        let task_id = item.task_id.clone();
        self.transition(id, WorkItemStatus::Complete)?;
        self.settle_group(&task_id)
    }

    /// Apply one state-machine transition and record it.
    fn transition(&mut self, id: &WorkItemId, to: WorkItemStatus) -> Result<(), EngineError> {
        let item = self
            .state
            .work_items
            .get_mut(id)
            .ok_or_else(|| EngineError::WorkItemNotFound(id.clone()))?;
        let from = item.status;
        if from.is_terminal() {
            return Err(EngineError::WorkItemConflict {
                work_item_id: id.clone(),
                status: from,
            });
        }
        if !from.can_become(to) {
            return Err(EngineError::InvalidTransition {
                work_item_id: id.clone(),
                from,
                to,
            });
        }
        item.status = to;
        item.updated_at = Some(Utc::now());
        let task_id = item.task_id.clone();

        let kind = match (from, to) {
            (_, WorkItemStatus::Enabled) => EventKind::WorkItemEnabled {
                task_id,
                instance: item.instance,
            },
            (WorkItemStatus::Suspended, WorkItemStatus::Executing) => {
                EventKind::WorkItemResumed { task_id }
            }
            (_, WorkItemStatus::Executing) => EventKind::WorkItemExecuting { task_id },
            (_, WorkItemStatus::Suspended) => EventKind::WorkItemSuspended { task_id },
            (_, WorkItemStatus::Complete) => EventKind::WorkItemCompleted {
                task_id,
                outcome: item.outcome.unwrap_or(CompletionOutcome::Reported),
            },
            (_, WorkItemStatus::Failed) => EventKind::WorkItemFailed {
                task_id,
                reason: item.failure.clone().unwrap_or_default(),
            },
            (_, WorkItemStatus::Escalated) => EventKind::WorkItemEscalated { task_id },
            (_, WorkItemStatus::Cancelled) => EventKind::WorkItemCancelled { task_id },
        };
        self.emit(Some(id.clone()), kind);
        Ok(())
    }

    fn cancel_active_items<F>(&mut self, filter: F)
    where
        F: Fn(&WorkItem) -> bool,
    {
        let targets: Vec<WorkItemId> = self
            .state
            .work_items
            .values()
            .filter(|item| item.is_active() && filter(item))
            .map(|item| item.id.clone())
            .collect();
        for id in targets {
            // cancellation is valid from every non-terminal state
            let _ = self.transition(&id, WorkItemStatus::Cancelled);
        }
    }

    fn item(&self, id: &WorkItemId) -> Result<&WorkItem, EngineError> {
        self.state
            .work_items
            .get(id)
            .ok_or_else(|| EngineError::WorkItemNotFound(id.clone()))
    }

    fn task(&self, id: &str) -> Result<Task, EngineError> {
        self.net.task(id).cloned().ok_or_else(|| {
            EngineError::InvalidSpecification(netcore::NetError::ElementNotFound(id.to_string()))
        })
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.state.status != CaseStatus::Running {
            return Err(EngineError::CaseNotRunning {
                case_id: self.state.case_id,
                status: self.state.status,
            });
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<(), EngineError> {
        self.ensure_running()?;
        if self.state.suspended {
            return Err(EngineError::CaseSuspended(self.state.case_id));
        }
        Ok(())
    }

    fn emit(&mut self, work_item_id: Option<WorkItemId>, kind: EventKind) {
        self.state.event_sequence += 1;
        self.pending.push(LifecycleEvent {
            case_id: self.state.case_id,
            work_item_id,
            sequence: self.state.event_sequence,
            kind,
            timestamp: Utc::now(),
        });
    }

    fn is_stalled(&self) -> bool {
        if self.overrun {
            return true;
        }
        self.state.status == CaseStatus::Running
            && !self.state.suspended
            && !self.state.work_items.values().any(WorkItem::is_active)
            && !self.state.marking.is_marked(&self.net.output_condition)
    }

    /// Run `op` against the state; commit on success, roll back on error.
    fn transact<F>(&mut self, op: F) -> Result<StepOutcome, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<(), EngineError>,
    {
        let saved = self.state.clone();
        self.pending.clear();
        self.overrun = false;

        match op(self) {
            Ok(()) => {
                self.state.fault = None;
                if self.is_stalled() {
                    let marked: Vec<ElementId> = self
                        .state
                        .marking
                        .marked_conditions()
                        .chain(self.state.marking.busy_tasks())
                        .cloned()
                        .collect();
                    tracing::warn!("Case {} stalled with marking {:?}", self.state.case_id, marked);
                    self.emit(None, EventKind::CaseStalled { marked });
                }
                self.state.revision += 1;
                Ok(StepOutcome {
                    case_id: self.state.case_id,
                    status: self.state.status,
                    work_items: self.active_work_items(),
                    events: std::mem::take(&mut self.pending),
                    stalled: self.is_stalled(),
                    revision: self.state.revision,
                })
            }
            Err(err) => {
                self.state = saved;
                self.pending.clear();
                if faults_case(&err) {
                    tracing::error!("Case {} faulted: {}", self.state.case_id, err);
                    self.state.fault = Some(err.to_string());
                    self.state.revision += 1;
                    self.emit(
                        None,
                        EventKind::CaseFaulted {
                            reason: err.to_string(),
                        },
                    );
                }
                Err(err)
            }
        }
    }
}

/// Net/data mismatches mark the case faulted; caller mistakes
/// (unknown ids, invalid transitions) leave it untouched.
fn faults_case(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::NoSplitPredicateMatched { .. }
            | EngineError::MultiInstanceBoundViolation { .. }
            | EngineError::Expression(_)
    )
}
