//! Work item groups: one per task firing. Single-instance tasks hold a
//! group of one; multi-instance tasks hold between `min` and `max` members.

use netcore::{
    CaseData, ElementId, EngineError, MultiInstance, PredicateEvaluator, WorkItem, WorkItemId,
    WorkItemStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceGroup {
    pub task_id: ElementId,
    /// Members in instance order.
    pub members: Vec<WorkItemId>,
    /// Next instance index handed out by dynamic creation.
    pub next_instance: u32,
}

impl InstanceGroup {
    pub fn new(task_id: impl Into<ElementId>) -> Self {
        Self {
            task_id: task_id.into(),
            members: Vec::new(),
            next_instance: 0,
        }
    }

    pub fn push(&mut self, id: WorkItemId) -> u32 {
        let instance = self.next_instance;
        self.members.push(id);
        self.next_instance += 1;
        instance
    }

    pub fn current_instance_count(&self) -> usize {
        self.members.len()
    }

    pub fn tally(&self, items: &BTreeMap<WorkItemId, WorkItem>) -> GroupTally {
        let mut tally = GroupTally::default();
        for item in self.members.iter().filter_map(|id| items.get(id)) {
            match item.status {
                WorkItemStatus::Complete => tally.completed += 1,
                status if status.is_terminal() => tally.finished += 1,
                _ => tally.active += 1,
            }
        }
        tally
    }

    /// Outputs of completed members, in instance order.
    pub fn completed_outputs(&self, items: &BTreeMap<WorkItemId, WorkItem>) -> Vec<Value> {
        self.members
            .iter()
            .filter_map(|id| items.get(id))
            .filter(|item| item.status == WorkItemStatus::Complete)
            .map(|item| item.output.clone().unwrap_or(Value::Null))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupTally {
    pub completed: u32,
    /// Terminal without completing (cancelled, escalated).
    pub finished: u32,
    pub active: u32,
}

/// Compute the input data of every instance of a multi-instance firing.
///
/// The instance query yields either a count (every instance receives the
/// case data) or an array (one instance per element). Without a query the
/// task starts `min` instances. Counts outside `[min, max]` are rejected.
pub fn instance_inputs(
    task_id: &str,
    attributes: &MultiInstance,
    data: &CaseData,
    evaluator: &dyn PredicateEvaluator,
) -> Result<Vec<Value>, EngineError> {
    let case_json = data.to_json();

    let inputs = match &attributes.instance_query {
        None => vec![case_json; attributes.min as usize],
        Some(query) => match evaluator.evaluate(query, &case_json)? {
            Value::Array(elements) => elements,
            Value::Number(n) => {
                let count = match n.as_u64() {
                    Some(count) => count,
                    None => match n.as_f64() {
                        Some(f) if f < 0.0 => 0,
                        Some(f) if f.fract() == 0.0 => f as u64,
                        _ => {
                            return Err(netcore::ExpressionError::Type(format!(
                                "instance query '{}' produced {}, expected a whole number",
                                query, n
                            ))
                            .into())
                        }
                    },
                };
                check_bounds(task_id, attributes, count)?;
                vec![case_json; count as usize]
            }
            other => {
                return Err(netcore::ExpressionError::Type(format!(
                    "instance query '{}' produced {}, expected a number or an array",
                    query, other
                ))
                .into())
            }
        },
    };

    check_bounds(task_id, attributes, inputs.len() as u64)?;
    Ok(inputs)
}

fn check_bounds(task_id: &str, attributes: &MultiInstance, count: u64) -> Result<(), EngineError> {
    if count < u64::from(attributes.min) || count > u64::from(attributes.max) {
        return Err(EngineError::MultiInstanceBoundViolation {
            task_id: task_id.to_string(),
            count,
            min: attributes.min,
            max: attributes.max,
        });
    }
    Ok(())
}

/// Document the completion predicate is evaluated against: the case data
/// plus `instances` (completed outputs), `completed` and `total`.
pub fn aggregate_view(
    group: &InstanceGroup,
    items: &BTreeMap<WorkItemId, WorkItem>,
    data: &CaseData,
) -> Value {
    let mut view = data.as_map().clone();
    let outputs = group.completed_outputs(items);
    view.insert("completed".to_string(), json!(outputs.len()));
    view.insert("total".to_string(), json!(group.current_instance_count()));
    view.insert("instances".to_string(), Value::Array(outputs));
    Value::Object(view)
}

/// A group never exits before `min` members completed. Past that it exits
/// once no member is active, or once the completion predicate holds
/// (without a predicate: the threshold is reached).
pub fn group_exit_ready(
    attributes: &MultiInstance,
    group: &InstanceGroup,
    items: &BTreeMap<WorkItemId, WorkItem>,
    data: &CaseData,
    evaluator: &dyn PredicateEvaluator,
) -> Result<bool, EngineError> {
    let tally = group.tally(items);
    if tally.completed < attributes.min {
        return Ok(false);
    }
    if tally.active == 0 {
        return Ok(true);
    }
    match &attributes.completion {
        Some(predicate) => {
            let view = aggregate_view(group, items, data);
            Ok(evaluator.evaluate_bool(predicate, &view)?)
        }
        None => Ok(tally.completed >= attributes.threshold),
    }
}
