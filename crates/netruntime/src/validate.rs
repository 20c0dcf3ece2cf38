//! Well-formedness checks applied before any case of a net may run.

use crate::graph::NetGraph;
use netcore::{NetElement, NetError, NetModel, PredicateEvaluator};

/// Reject nets that would break token semantics at runtime.
pub fn validate(net: &NetModel) -> Result<NetGraph, NetError> {
    for (key, element) in &net.elements {
        if key != element.id() {
            return Err(NetError::DuplicateElement(key.clone()));
        }
    }

    for id in [&net.input_condition, &net.output_condition] {
        match net.element(id) {
            Some(NetElement::Condition(_)) => {}
            Some(NetElement::Task(_)) => return Err(NetError::NotACondition(id.clone())),
            None => return Err(NetError::ElementNotFound(id.clone())),
        }
    }

    for flow in &net.flows {
        let source = net
            .element(&flow.source)
            .ok_or_else(|| NetError::ElementNotFound(flow.source.clone()))?;
        let target = net
            .element(&flow.target)
            .ok_or_else(|| NetError::ElementNotFound(flow.target.clone()))?;

        let invalid = |reason: &str| NetError::InvalidFlow {
            from: flow.source.clone(),
            to: flow.target.clone(),
            reason: reason.to_string(),
        };

        match (source, target) {
            (NetElement::Condition(_), NetElement::Task(_))
            | (NetElement::Task(_), NetElement::Condition(_)) => {}
            _ => return Err(invalid("flows must alternate conditions and tasks")),
        }
        if flow.target == net.input_condition {
            return Err(invalid("input condition cannot have incoming flows"));
        }
        if flow.source == net.output_condition {
            return Err(invalid("output condition cannot have outgoing flows"));
        }
        if flow.predicate.is_some() && matches!(source, NetElement::Condition(_)) {
            return Err(invalid("only task outputs may carry predicates"));
        }
    }

    for task in net.tasks() {
        if net.incoming(&task.id).next().is_none() {
            return Err(NetError::MissingInput(task.id.clone()));
        }
        if net.outgoing(&task.id).next().is_none() {
            return Err(NetError::MissingOutput(task.id.clone()));
        }
        for element in &task.cancellation_set {
            if net.element(element).is_none() {
                return Err(NetError::InvalidCancellationSet {
                    task_id: task.id.clone(),
                    element: element.clone(),
                });
            }
        }
        if let Some(mi) = &task.multi_instance {
            let reason = if mi.min == 0 {
                Some("min must be at least 1")
            } else if mi.min > mi.max {
                Some("min exceeds max")
            } else if mi.threshold > mi.max {
                Some("threshold exceeds max")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(NetError::InvalidMultiInstance {
                    task_id: task.id.clone(),
                    reason: reason.to_string(),
                });
            }
        }
    }

    let graph = NetGraph::build(net)?;
    let reached = graph.reachable_from(&net.input_condition);
    if !reached.contains(&net.output_condition) {
        return Err(NetError::OutputUnreachable);
    }
    if let Some(orphan) = net.elements.keys().find(|id| !reached.contains(*id)) {
        return Err(NetError::Unreachable(orphan.clone()));
    }

    Ok(graph)
}

/// Run every expression of the net through the evaluator's syntax check.
pub fn validate_expressions(
    net: &NetModel,
    evaluator: &dyn PredicateEvaluator,
) -> Result<(), netcore::ExpressionError> {
    for flow in &net.flows {
        if let Some(predicate) = &flow.predicate {
            evaluator.validate(predicate)?;
        }
    }
    for task in net.tasks() {
        if let Some(mi) = &task.multi_instance {
            for expression in mi.instance_query.iter().chain(mi.completion.iter()) {
                evaluator.validate(expression)?;
            }
        }
    }
    Ok(())
}
