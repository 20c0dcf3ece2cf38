#![allow(dead_code)]

use netcore::{
    CaseData, Condition, Gate, MultiInstance, NetModel, PredicateEvaluator, Task, WorkItem,
    WorkItemId,
};
use netruntime::{CaseRunner, RunnerSettings, StepOutcome};
use serde_json::{json, Value};
use std::sync::Arc;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

pub fn evaluator() -> Arc<dyn PredicateEvaluator> {
    netexpr::default_evaluator()
}

pub fn launch(net: NetModel, data: Value) -> (CaseRunner, StepOutcome) {
    init_tracing();
    CaseRunner::launch(
        Arc::new(net),
        evaluator(),
        RunnerSettings::default(),
        CaseData::from(data),
    )
    .expect("launch")
}

fn add_conditions(net: &mut NetModel, ids: &[&str]) {
    for id in ids {
        net.add_condition(Condition::new(*id));
    }
}

/// start -> fork (AND split) -> c1, c2 ; c1 -> left -> l_done ; c2 -> right -> r_done ;
/// l_done, r_done -> join -> end
pub fn parallel_net(join: Gate) -> NetModel {
    let mut net = NetModel::new("parallel", "start", "end");
    net.add_task(Task::new("fork").with_split(Gate::And));
    net.add_task(Task::new("left"));
    net.add_task(Task::new("right"));
    net.add_task(Task::new("join").with_join(join));
    add_conditions(&mut net, &["c1", "c2", "l_done", "r_done"]);
    net.connect("start", "fork");
    net.connect("fork", "c1");
    net.connect("fork", "c2");
    net.connect("c1", "left");
    net.connect("c2", "right");
    net.connect("left", "l_done");
    net.connect("right", "r_done");
    net.connect("l_done", "join");
    net.connect("r_done", "join");
    net.connect("join", "end");
    net
}

/// start -> receive (XOR split: amount > 1000 -> needs_review, default -> fast_track)
/// needs_review -> review -> reviewed ; fast_track -> approve -> approved ;
/// reviewed, approved -> archive (OR join) -> end
pub fn review_net() -> NetModel {
    let mut net = NetModel::new("order-review", "start", "end");
    net.add_task(Task::new("receive").with_split(Gate::Xor));
    net.add_task(Task::new("review"));
    net.add_task(Task::new("approve"));
    net.add_task(Task::new("archive").with_join(Gate::Or));
    add_conditions(&mut net, &["needs_review", "fast_track", "reviewed", "approved"]);
    net.connect("start", "receive");
    net.connect_when("receive", "needs_review", "amount > 1000");
    net.connect_default("receive", "fast_track");
    net.connect("needs_review", "review");
    net.connect("fast_track", "approve");
    net.connect("review", "reviewed");
    net.connect("approve", "approved");
    net.connect("reviewed", "archive");
    net.connect("approved", "archive");
    net.connect("archive", "end");
    net
}

/// start -> prepare -> ready -> vote (multi-instance) -> counted -> publish -> end
pub fn voting_net(attributes: MultiInstance) -> NetModel {
    let mut net = NetModel::new("voting", "start", "end");
    net.add_task(Task::new("prepare"));
    net.add_task(Task::new("vote").with_multi_instance(attributes));
    net.add_task(Task::new("publish"));
    add_conditions(&mut net, &["ready", "counted"]);
    net.connect("start", "prepare");
    net.connect("prepare", "ready");
    net.connect("ready", "vote");
    net.connect("vote", "counted");
    net.connect("counted", "publish");
    net.connect("publish", "end");
    net
}

pub fn enabled_item(runner: &CaseRunner, task_id: &str) -> WorkItem {
    runner
        .enabled_work_items()
        .into_iter()
        .find(|item| item.task_id == task_id)
        .unwrap_or_else(|| panic!("no enabled work item for {}", task_id))
}

pub fn enabled_ids(runner: &CaseRunner, task_id: &str) -> Vec<WorkItemId> {
    runner
        .enabled_work_items()
        .into_iter()
        .filter(|item| item.task_id == task_id)
        .map(|item| item.id)
        .collect()
}

/// Start and complete the first enabled work item of `task_id`.
pub fn finish(runner: &mut CaseRunner, task_id: &str, output: Value) -> StepOutcome {
    let item = enabled_item(runner, task_id);
    runner.start_work_item(&item.id).expect("start");
    runner.complete_work_item(&item.id, output).expect("complete")
}

pub fn finish_empty(runner: &mut CaseRunner, task_id: &str) -> StepOutcome {
    finish(runner, task_id, json!({}))
}
