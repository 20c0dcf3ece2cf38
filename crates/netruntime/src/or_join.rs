//! OR-join enablement.
//!
//! An OR-join task may fire once at least one of its input conditions holds
//! a token and no live part of the net can still deliver a token to one of
//! its empty input conditions. Liveness is decided over the whole marking:
//!
//! 1. A backward pass from every empty input condition collects the region
//!    of the net that can still feed the join (never walking through the
//!    join itself).
//! 2. If no token and no busy task sits in that region the join is enabled.
//! 3. Otherwise a forward pass from every live element computes which
//!    conditions can still become marked, honouring AND-join requirements
//!    of intermediate tasks. The join waits if any empty input condition is
//!    reachable.
//!
//! Split predicates are ignored (every branch is assumed possible) and
//! cancellation sets are not applied, so the answer errs towards waiting.
//! A visit budget bounds both passes.

use crate::graph::NetGraph;
use netcore::{ElementId, Gate, Marking, NetModel};
use std::collections::{BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrJoinVerdict {
    Enabled,
    /// No input condition holds a token.
    NoToken,
    /// The task is executing and cannot fire again until it exits.
    Busy,
    /// Live elements that may still reach an empty input condition.
    Waiting { live: Vec<ElementId> },
    /// The search ran past its budget; treated as not enabled.
    BudgetExhausted,
}

impl OrJoinVerdict {
    pub fn is_enabled(&self) -> bool {
        matches!(self, OrJoinVerdict::Enabled)
    }
}

/// Stateless and reentrant; one instance may serve every case of a net.
#[derive(Debug, Clone, Copy)]
pub struct OrJoinEvaluator {
    budget: usize,
}

impl Default for OrJoinEvaluator {
    fn default() -> Self {
        Self { budget: 100_000 }
    }
}

impl OrJoinEvaluator {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn is_enabled(
        &self,
        net: &NetModel,
        graph: &NetGraph,
        marking: &Marking,
        task_id: &str,
    ) -> bool {
        self.evaluate(net, graph, marking, task_id).is_enabled()
    }

    pub fn evaluate(
        &self,
        net: &NetModel,
        graph: &NetGraph,
        marking: &Marking,
        task_id: &str,
    ) -> OrJoinVerdict {
        if marking.is_busy(task_id) {
            return OrJoinVerdict::Busy;
        }

        let preset: BTreeSet<ElementId> = net.preset(task_id).into_iter().collect();
        if !preset.iter().any(|c| marking.is_marked(c)) {
            return OrJoinVerdict::NoToken;
        }
        let empty: Vec<&ElementId> = preset.iter().filter(|c| !marking.is_marked(c)).collect();
        if empty.is_empty() {
            return OrJoinVerdict::Enabled;
        }

        let mut visits = 0usize;

        let region = match self.backward_region(graph, task_id, &empty, &mut visits) {
            Some(region) => region,
            None => return OrJoinVerdict::BudgetExhausted,
        };

        // tokens already waiting in the join's own input conditions are
        // destined for the join and do not count as live
        let live: Vec<ElementId> = marking
            .marked_conditions()
            .filter(|c| !preset.contains(*c))
            .chain(marking.busy_tasks())
            .filter(|id| region.contains(*id))
            .cloned()
            .collect();
        if live.is_empty() {
            return OrJoinVerdict::Enabled;
        }

        let reachable =
            match self.forward_reachable(net, graph, marking, task_id, &preset, &mut visits) {
                Some(reachable) => reachable,
                None => return OrJoinVerdict::BudgetExhausted,
            };

        if empty.iter().any(|c| reachable.contains(*c)) {
            OrJoinVerdict::Waiting { live }
        } else {
            OrJoinVerdict::Enabled
        }
    }

    /// Elements from which an empty input condition can be reached.
    fn backward_region(
        &self,
        graph: &NetGraph,
        join: &str,
        empty: &[&ElementId],
        visits: &mut usize,
    ) -> Option<HashSet<ElementId>> {
        let mut region: HashSet<ElementId> = HashSet::new();
        let mut queue: VecDeque<&ElementId> = VecDeque::new();

        for &condition in empty {
            if region.insert(condition.clone()) {
                queue.push_back(condition);
            }
        }

        while let Some(current) = queue.pop_front() {
            *visits += 1;
            if *visits > self.budget {
                return None;
            }
            for predecessor in graph.predecessors(current) {
                if predecessor == join {
                    continue;
                }
                if region.insert(predecessor.clone()) {
                    queue.push_back(predecessor);
                }
            }
        }

        Some(region)
    }

    /// Conditions that can still become marked from the current marking
    /// without firing the join.
    fn forward_reachable(
        &self,
        net: &NetModel,
        graph: &NetGraph,
        marking: &Marking,
        join: &str,
        preset: &BTreeSet<ElementId>,
        visits: &mut usize,
    ) -> Option<HashSet<ElementId>> {
        let mut conditions: HashSet<ElementId> = HashSet::new();
        let mut tasks: HashSet<ElementId> = HashSet::new();
        let mut queue: VecDeque<ElementId> = VecDeque::new();

        for condition in marking.marked_conditions() {
            if preset.contains(condition) {
                continue;
            }
            conditions.insert(condition.clone());
            queue.push_back(condition.clone());
        }
        for task in marking.busy_tasks() {
            if task != join && tasks.insert(task.clone()) {
                queue.push_back(task.clone());
            }
        }

        while let Some(current) = queue.pop_front() {
            *visits += 1;
            if *visits > self.budget {
                return None;
            }

            if let Some(task) = net.task(&current) {
                // a task that can fire can mark any of its outputs
                for output in graph.successors(&task.id) {
                    if conditions.insert(output.clone()) {
                        queue.push_back(output.clone());
                    }
                }
                continue;
            }

            for candidate in graph.successors(&current) {
                if candidate == join || tasks.contains(candidate) {
                    continue;
                }
                let Some(task) = net.task(candidate) else {
                    continue;
                };
                let can_fire = match task.join {
                    Gate::And => graph
                        .predecessors(candidate)
                        .iter()
                        .all(|c| conditions.contains(*c)),
                    Gate::Xor | Gate::Or => true,
                };
                if can_fire {
                    tasks.insert(candidate.clone());
                    queue.push_back(candidate.clone());
                }
            }
        }

        Some(conditions)
    }
}
