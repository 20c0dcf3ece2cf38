// crates/netruntime/tests/or_join_test.rs

mod common;

use common::*;
use netcore::{CaseStatus, Gate, Marking, Token};
use netruntime::{validate, OrJoinEvaluator, OrJoinVerdict};
use serde_json::json;

#[test]
fn test_xor_split_reconverging_at_or_join_does_not_wait() {
    let (mut runner, _) = launch(review_net(), json!({}));
    finish(&mut runner, "receive", json!({"amount": 1500}));

    // the fast track branch was never taken, so completing review enables
    // the archive immediately
    let outcome = finish_empty(&mut runner, "review");
    assert_eq!(outcome.enabled_for("archive").len(), 1);
    assert!(!outcome.stalled);

    let outcome = finish_empty(&mut runner, "archive");
    assert_eq!(outcome.status, CaseStatus::Completed);
}

#[test]
fn test_or_join_waits_for_live_parallel_branch() {
    let (mut runner, _) = launch(parallel_net(Gate::Or), json!({}));
    finish_empty(&mut runner, "fork");

    let outcome = finish_empty(&mut runner, "left");
    assert!(outcome.enabled_for("join").is_empty());
    assert!(runner.marking().is_marked("l_done"));

    let outcome = finish_empty(&mut runner, "right");
    assert_eq!(outcome.enabled_for("join").len(), 1);

    // both tokens consumed by the single firing
    let join = enabled_item(&runner, "join");
    runner.start_work_item(&join.id).unwrap();
    assert!(!runner.marking().is_marked("l_done"));
    assert!(!runner.marking().is_marked("r_done"));

    let outcome = runner.complete_work_item(&join.id, json!({})).unwrap();
    assert_eq!(outcome.status, CaseStatus::Completed);
}

#[test]
fn test_or_join_keeps_waiting_while_branch_executes() {
    let (mut runner, _) = launch(parallel_net(Gate::Or), json!({}));
    finish_empty(&mut runner, "fork");
    finish_empty(&mut runner, "left");
    assert!(enabled_ids(&runner, "join").is_empty());

    let right = enabled_item(&runner, "right");
    runner.start_work_item(&right.id).unwrap();
    assert!(enabled_ids(&runner, "join").is_empty());
}

#[test]
fn test_evaluator_is_reentrant_across_markings() {
    let net = review_net();
    let graph = validate(&net).unwrap();
    let evaluator = OrJoinEvaluator::default();

    let mut waiting = Marking::new();
    waiting.add("reviewed", Token::new(3));
    waiting.add("fast_track", Token::new(2));

    let mut ready = Marking::new();
    ready.add("reviewed", Token::new(3));

    assert!(matches!(
        evaluator.evaluate(&net, &graph, &waiting, "archive"),
        OrJoinVerdict::Waiting { .. }
    ));
    assert_eq!(
        evaluator.evaluate(&net, &graph, &ready, "archive"),
        OrJoinVerdict::Enabled
    );
    // same inputs, same answer
    assert!(!evaluator.is_enabled(&net, &graph, &waiting, "archive"));
}

#[test]
fn test_busy_join_cannot_fire_again() {
    let net = review_net();
    let graph = validate(&net).unwrap();
    let mut marking = Marking::new();
    marking.add("reviewed", Token::new(1));
    marking.set_busy("archive");
    assert_eq!(
        OrJoinEvaluator::default().evaluate(&net, &graph, &marking, "archive"),
        OrJoinVerdict::Busy
    );
}
