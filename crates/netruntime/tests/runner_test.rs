// crates/netruntime/tests/runner_test.rs

mod common;

use common::*;
use netcore::{
    CaseStatus, CompletionOutcome, Condition, EngineError, EventKind, Gate, NetModel, Task,
    WorkItemStatus,
};
use serde_json::json;

#[test]
fn test_and_join_waits_for_every_branch() {
    let (mut runner, outcome) = launch(parallel_net(Gate::And), json!({}));
    assert_eq!(outcome.enabled_for("fork").len(), 1);

    let outcome = finish_empty(&mut runner, "fork");
    assert_eq!(outcome.enabled_for("left").len(), 1);
    assert_eq!(outcome.enabled_for("right").len(), 1);

    let outcome = finish_empty(&mut runner, "left");
    assert!(outcome.enabled_for("join").is_empty());
    assert!(runner.marking().is_marked("l_done"));

    let outcome = finish_empty(&mut runner, "right");
    assert_eq!(outcome.enabled_for("join").len(), 1);
    // offered, so the tokens stay until the join is started
    assert!(runner.marking().is_marked("l_done"));
    assert!(!runner.marking().is_busy("join"));

    let join = enabled_item(&runner, "join");
    runner.start_work_item(&join.id).unwrap();
    assert!(!runner.marking().is_marked("l_done"));
    assert!(!runner.marking().is_marked("r_done"));
    assert!(runner.marking().is_busy("join"));

    let outcome = runner.complete_work_item(&join.id, json!({})).unwrap();
    assert_eq!(outcome.status, CaseStatus::Completed);
    assert!(outcome.work_items.is_empty());
    assert!(runner.marking().is_empty());
    assert!(matches!(
        outcome.events.last().map(|e| &e.kind),
        Some(EventKind::CaseCompleted)
    ));
}

#[test]
fn test_sequential_net_conserves_its_single_token() {
    let mut net = NetModel::new("seq", "start", "end");
    for task in ["a", "b", "c"] {
        net.add_task(Task::new(task));
    }
    net.add_condition(Condition::new("ab"));
    net.add_condition(Condition::new("bc"));
    net.connect("start", "a");
    net.connect("a", "ab");
    net.connect("ab", "b");
    net.connect("b", "bc");
    net.connect("bc", "c");
    net.connect("c", "end");

    let (mut runner, _) = launch(net, json!({}));
    for task in ["a", "b"] {
        let marking = runner.marking();
        assert_eq!(marking.total_tokens() + marking.busy_tasks().count(), 1);
        finish_empty(&mut runner, task);
    }
    let marking = runner.marking();
    assert_eq!(marking.total_tokens() + marking.busy_tasks().count(), 1);
    assert_eq!(finish_empty(&mut runner, "c").status, CaseStatus::Completed);
}

#[test]
fn test_unmatched_xor_split_faults_and_rolls_back() {
    let mut net = NetModel::new("route", "start", "end");
    net.add_task(Task::new("route").with_split(Gate::Xor));
    net.add_task(Task::new("small"));
    net.add_task(Task::new("large"));
    net.add_condition(Condition::new("s"));
    net.add_condition(Condition::new("l"));
    net.connect("start", "route");
    net.connect_when("route", "s", "amount < 0");
    net.connect_when("route", "l", "amount > 1000");
    net.connect("s", "small");
    net.connect("l", "large");
    net.connect("small", "end");
    net.connect("large", "end");

    let (mut runner, _) = launch(net, json!({}));
    let item = enabled_item(&runner, "route");
    runner.start_work_item(&item.id).unwrap();
    let revision = runner.revision();

    let err = runner
        .complete_work_item(&item.id, json!({"amount": 50}))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSplitPredicateMatched { ref task_id } if task_id == "route"));

    // nothing from the failed step survives
    assert_eq!(
        runner.work_item(&item.id).map(|i| i.status),
        Some(WorkItemStatus::Executing)
    );
    assert!(runner.marking().is_busy("route"));
    assert!(runner.data().get("amount").is_none());
    assert!(runner.fault().is_some());
    assert_eq!(runner.status(), CaseStatus::Running);
    assert!(runner.revision() > revision);
    let events = runner.take_events();
    assert!(matches!(
        events.as_slice(),
        [event] if matches!(event.kind, EventKind::CaseFaulted { .. })
    ));

    let outcome = runner
        .complete_work_item(&item.id, json!({"amount": 5000}))
        .unwrap();
    assert_eq!(outcome.enabled_for("large").len(), 1);
    assert!(runner.fault().is_none());
}

#[test]
fn test_default_flow_taken_when_no_predicate_matches() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let outcome = finish(&mut runner, "receive", json!({"amount": 10}));
    // approve is manual in this net
    assert_eq!(outcome.enabled_for("approve").len(), 1);
    assert!(outcome.enabled_for("review").is_empty());
}

#[test]
fn test_or_split_marks_every_matching_branch() {
    let mut net = parallel_net(Gate::Or);
    net.flows.retain(|f| f.source != "fork");
    net.elements.insert(
        "fork".into(),
        netcore::NetElement::Task(Task::new("fork").with_split(Gate::Or)),
    );
    net.connect_when("fork", "c1", "left");
    net.connect_when("fork", "c2", "right");

    let (mut runner, _) = launch(net.clone(), json!({"left": true, "right": true}));
    let outcome = finish_empty(&mut runner, "fork");
    assert_eq!(outcome.enabled_for("left").len(), 1);
    assert_eq!(outcome.enabled_for("right").len(), 1);

    let (mut runner, _) = launch(net, json!({"left": false, "right": true}));
    let outcome = finish_empty(&mut runner, "fork");
    assert!(outcome.enabled_for("left").is_empty());
    assert_eq!(outcome.enabled_for("right").len(), 1);
}

/// start -> fork (AND) -> c1, c2 ; c1 -> work -> c3 ; c2 -> abort -> c4 ;
/// abort cancels {work, c3} ; c3, c4 -> finish (XOR join) -> end
fn cancellation_net() -> NetModel {
    let mut net = NetModel::new("cancel", "start", "end");
    net.add_task(Task::new("fork").with_split(Gate::And));
    net.add_task(Task::new("work"));
    net.add_task(Task::new("abort").cancels("work").cancels("c3"));
    net.add_task(Task::new("finish"));
    for c in ["c1", "c2", "c3", "c4"] {
        net.add_condition(Condition::new(c));
    }
    net.connect("start", "fork");
    net.connect("fork", "c1");
    net.connect("fork", "c2");
    net.connect("c1", "work");
    net.connect("c2", "abort");
    net.connect("work", "c3");
    net.connect("abort", "c4");
    net.connect("c3", "finish");
    net.connect("c4", "finish");
    net.connect("finish", "end");
    net
}

#[test]
fn test_cancellation_region_clears_state_in_one_step() {
    let (mut runner, _) = launch(cancellation_net(), json!({}));
    finish_empty(&mut runner, "fork");
    let work = enabled_item(&runner, "work");
    runner.start_work_item(&work.id).unwrap();

    let outcome = finish_empty(&mut runner, "abort");

    assert_eq!(
        runner.work_item(&work.id).map(|i| i.status),
        Some(WorkItemStatus::Cancelled)
    );
    assert!(!runner.marking().is_busy("work"));
    assert!(!runner.marking().is_marked("c3"));
    assert_eq!(outcome.enabled_for("finish").len(), 1);

    let cancelled_at = outcome
        .events
        .iter()
        .position(|e| matches!(e.kind, EventKind::WorkItemCancelled { .. }))
        .unwrap();
    let exited_at = outcome
        .events
        .iter()
        .position(|e| matches!(&e.kind, EventKind::TaskExited { task_id, .. } if task_id == "abort"))
        .unwrap();
    assert!(cancelled_at < exited_at);
    match &outcome.events[exited_at].kind {
        EventKind::TaskExited { cancelled, produced, .. } => {
            assert_eq!(cancelled, &vec!["work".to_string()]);
            assert_eq!(produced, &vec!["c4".to_string()]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(finish_empty(&mut runner, "finish").status, CaseStatus::Completed);
}

#[test]
fn test_cancel_region_on_demand() {
    let (mut runner, _) = launch(cancellation_net(), json!({}));
    finish_empty(&mut runner, "fork");
    let work = enabled_item(&runner, "work");

    runner.cancel_region("abort").unwrap();
    assert_eq!(
        runner.work_item(&work.id).map(|i| i.status),
        Some(WorkItemStatus::Cancelled)
    );
    // abort itself is untouched
    assert_eq!(enabled_ids(&runner, "abort").len(), 1);
}

#[test]
fn test_suspended_case_rejects_work_item_operations() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let item = enabled_item(&runner, "receive");

    runner.suspend_case().unwrap();
    assert!(runner.is_suspended());
    assert!(matches!(
        runner.start_work_item(&item.id),
        Err(EngineError::CaseSuspended(_))
    ));

    let outcome = runner.resume_case().unwrap();
    assert!(!outcome.stalled);
    runner.start_work_item(&item.id).unwrap();
}

#[test]
fn test_replayed_completion_is_a_conflict() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let item = enabled_item(&runner, "receive");
    runner.start_work_item(&item.id).unwrap();
    runner
        .complete_work_item(&item.id, json!({"amount": 2000}))
        .unwrap();

    let marking = runner.marking().clone();
    let revision = runner.revision();
    let err = runner
        .complete_work_item(&item.id, json!({"amount": 2000}))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::WorkItemConflict { status: WorkItemStatus::Complete, .. }
    ));
    assert_eq!(runner.marking(), &marking);
    assert_eq!(runner.revision(), revision);
    assert!(runner.fault().is_none());
}

#[test]
fn test_completing_an_enabled_item_is_an_invalid_transition() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let item = enabled_item(&runner, "receive");
    let err = runner.complete_work_item(&item.id, json!({})).unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: WorkItemStatus::Enabled,
            to: WorkItemStatus::Complete,
            ..
        }
    ));
}

#[test]
fn test_timer_expiry_completes_with_timed_out_outcome() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let item = enabled_item(&runner, "receive");

    let outcome = runner.timeout_work_item(&item.id).unwrap();
    let completed = runner.work_item(&item.id).unwrap();
    assert_eq!(completed.status, WorkItemStatus::Complete);
    assert_eq!(completed.outcome, Some(CompletionOutcome::TimedOut));
    assert!(completed.output.is_none());
    assert!(outcome.events.iter().any(|e| matches!(
        e.kind,
        EventKind::WorkItemCompleted { outcome: CompletionOutcome::TimedOut, .. }
    )));
    // no amount in the data, so the default branch is taken
    assert_eq!(outcome.enabled_for("approve").len(), 1);
}

#[test]
fn test_fail_retry_and_escalate() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let item = enabled_item(&runner, "receive");

    runner.start_work_item(&item.id).unwrap();
    runner.fail_work_item(&item.id, "backend down").unwrap();
    let failed = runner.work_item(&item.id).unwrap();
    assert_eq!(failed.status, WorkItemStatus::Failed);
    assert_eq!(failed.failure.as_deref(), Some("backend down"));

    runner.retry_work_item(&item.id).unwrap();
    assert_eq!(runner.work_item(&item.id).unwrap().attempts, 1);
    assert_eq!(
        runner.work_item(&item.id).unwrap().status,
        WorkItemStatus::Enabled
    );

    runner.start_work_item(&item.id).unwrap();
    runner.fail_work_item(&item.id, "still down").unwrap();
    let outcome = runner.escalate_work_item(&item.id).unwrap();
    assert_eq!(
        runner.work_item(&item.id).unwrap().status,
        WorkItemStatus::Escalated
    );

    // nothing left to do and the output was never reached
    assert!(outcome.stalled);
    assert_eq!(outcome.status, CaseStatus::Running);
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CaseStalled { .. })));
    assert!(runner.marking().is_busy("receive"));
}

#[test]
fn test_work_item_suspend_and_resume() {
    let (mut runner, _) = launch(review_net(), json!({}));
    let item = enabled_item(&runner, "receive");
    runner.start_work_item(&item.id).unwrap();
    runner.suspend_work_item(&item.id).unwrap();
    assert!(matches!(
        runner.complete_work_item(&item.id, json!({})),
        Err(EngineError::InvalidTransition { .. })
    ));
    runner.resume_work_item(&item.id).unwrap();
    assert_eq!(
        runner.work_item(&item.id).unwrap().status,
        WorkItemStatus::Executing
    );
}

#[test]
fn test_automatic_tasks_route_without_work_items() {
    let mut net = NetModel::new("auto", "start", "end");
    net.add_task(Task::new("route").automatic());
    net.add_task(Task::new("handle"));
    net.add_condition(Condition::new("routed"));
    net.connect("start", "route");
    net.connect("route", "routed");
    net.connect("routed", "handle");
    net.connect("handle", "end");

    let (runner, outcome) = launch(net, json!({}));
    assert_eq!(outcome.work_items.len(), 1);
    assert_eq!(outcome.work_items[0].task_id, "handle");
    assert!(runner.work_items().all(|item| item.task_id != "route"));
}

#[test]
fn test_cancel_case() {
    let (mut runner, _) = launch(parallel_net(Gate::And), json!({}));
    finish_empty(&mut runner, "fork");

    let outcome = runner.cancel_case().unwrap();
    assert_eq!(outcome.status, CaseStatus::Cancelled);
    assert!(outcome.work_items.is_empty());
    assert!(runner.marking().is_empty());
    assert!(matches!(
        runner.cancel_case(),
        Err(EngineError::CaseNotRunning { status: CaseStatus::Cancelled, .. })
    ));
}

#[test]
fn test_output_data_merges_into_case_data() {
    let (mut runner, _) = launch(review_net(), json!({"customer": "acme"}));
    finish(&mut runner, "receive", json!({"amount": 2500}));
    finish(&mut runner, "review", json!("looks fine"));

    assert_eq!(runner.data().get("customer"), Some(&json!("acme")));
    assert_eq!(runner.data().get("amount"), Some(&json!(2500)));
    assert_eq!(runner.data().get("review"), Some(&json!("looks fine")));
}

#[test]
fn test_malformed_net_is_rejected_before_launch() {
    let mut net = review_net();
    net.add_condition(Condition::new("orphan"));
    let err = netruntime::CaseRunner::launch(
        std::sync::Arc::new(net),
        evaluator(),
        netruntime::RunnerSettings::default(),
        netcore::CaseData::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, EngineError::InvalidSpecification(_)));
}

#[test]
fn test_event_sequences_are_strictly_increasing() {
    let (mut runner, launched) = launch(parallel_net(Gate::And), json!({}));
    let mut events = launched.events;
    events.extend(finish_empty(&mut runner, "fork").events);
    events.extend(finish_empty(&mut runner, "left").events);
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(events.iter().all(|e| e.case_id == runner.case_id()));
}

#[test]
fn test_task_to_task_flow_is_reported_with_its_endpoints() {
    let mut net = review_net();
    net.connect("review", "approve");
    let err = netruntime::validate(&net).unwrap_err();
    match &err {
        netcore::NetError::InvalidFlow { from, to, reason } => {
            assert_eq!(from, "review");
            assert_eq!(to, "approve");
            assert!(reason.contains("alternate"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        "Invalid flow review -> approve: flows must alternate conditions and tasks"
    );
}

/// start -> pick -> c ; c -> a -> end ; c -> b -> end
fn choice_net() -> NetModel {
    let mut net = NetModel::new("choice", "start", "end");
    for task in ["pick", "a", "b"] {
        net.add_task(Task::new(task));
    }
    net.add_condition(Condition::new("c"));
    net.connect("start", "pick");
    net.connect("pick", "c");
    net.connect("c", "a");
    net.connect("c", "b");
    net.connect("a", "end");
    net.connect("b", "end");
    net
}

#[test]
fn test_shared_input_is_a_deferred_choice() {
    let (mut runner, _) = launch(choice_net(), json!({}));
    let outcome = finish_empty(&mut runner, "pick");
    assert_eq!(outcome.enabled_for("a").len(), 1);
    assert_eq!(outcome.enabled_for("b").len(), 1);
    assert_eq!(runner.marking().count("c"), 1);

    let a = enabled_item(&runner, "a");
    let b = enabled_item(&runner, "b");
    let outcome = runner.start_work_item(&b.id).unwrap();

    assert_eq!(
        runner.work_item(&a.id).map(|i| i.status),
        Some(WorkItemStatus::Cancelled)
    );
    assert!(outcome.events.iter().any(|e| matches!(
        &e.kind,
        EventKind::WorkItemCancelled { task_id } if task_id == "a"
    )));
    assert!(!runner.marking().is_marked("c"));
    assert!(runner.marking().is_busy("b"));
    assert!(!runner.marking().is_busy("a"));
    assert!(matches!(
        runner.start_work_item(&a.id),
        Err(EngineError::WorkItemConflict { .. })
    ));

    let outcome = runner.complete_work_item(&b.id, json!({})).unwrap();
    assert_eq!(outcome.status, CaseStatus::Completed);
}

#[test]
fn test_timer_expiry_can_win_a_deferred_choice() {
    let (mut runner, _) = launch(choice_net(), json!({}));
    finish_empty(&mut runner, "pick");
    let a = enabled_item(&runner, "a");
    let b = enabled_item(&runner, "b");

    let outcome = runner.timeout_work_item(&a.id).unwrap();
    assert_eq!(outcome.status, CaseStatus::Completed);
    assert_eq!(
        runner.work_item(&b.id).map(|i| i.status),
        Some(WorkItemStatus::Cancelled)
    );
}
