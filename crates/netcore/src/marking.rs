use crate::ElementId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unit of control flow sitting in a condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// Firing sequence that produced the token; consumption is oldest first.
    pub epoch: u64,
    /// Identity used to partition multi-instance data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Token {
    pub fn new(epoch: u64) -> Self {
        Self { epoch, tag: None }
    }

    pub fn tagged(epoch: u64, tag: impl Into<String>) -> Self {
        Self {
            epoch,
            tag: Some(tag.into()),
        }
    }
}

/// Token distribution of one case: tokens per condition plus the tasks that
/// have fired and not yet exited.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marking {
    conditions: BTreeMap<ElementId, Vec<Token>>,
    busy: BTreeSet<ElementId>,
}

impl Marking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, condition: impl Into<ElementId>, token: Token) {
        let tokens = self.conditions.entry(condition.into()).or_default();
        // keep oldest-first order
        let position = tokens.partition_point(|t| t.epoch <= token.epoch);
        tokens.insert(position, token);
    }

    /// Remove the oldest token of a condition.
    pub fn take(&mut self, condition: &str) -> Option<Token> {
        let tokens = self.conditions.get_mut(condition)?;
        let token = if tokens.is_empty() {
            None
        } else {
            Some(tokens.remove(0))
        };
        if tokens.is_empty() {
            self.conditions.remove(condition);
        }
        token
    }

    pub fn clear(&mut self, condition: &str) -> Vec<Token> {
        self.conditions.remove(condition).unwrap_or_default()
    }

    pub fn count(&self, condition: &str) -> usize {
        self.conditions.get(condition).map(Vec::len).unwrap_or(0)
    }

    pub fn is_marked(&self, condition: &str) -> bool {
        self.count(condition) > 0
    }

    pub fn tokens(&self, condition: &str) -> &[Token] {
        self.conditions
            .get(condition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Marked conditions in identifier order.
    pub fn marked_conditions(&self) -> impl Iterator<Item = &ElementId> {
        self.conditions.keys()
    }

    pub fn total_tokens(&self) -> usize {
        self.conditions.values().map(Vec::len).sum()
    }

    pub fn set_busy(&mut self, task: impl Into<ElementId>) {
        self.busy.insert(task.into());
    }

    pub fn clear_busy(&mut self, task: &str) -> bool {
        self.busy.remove(task)
    }

    pub fn is_busy(&self, task: &str) -> bool {
        self.busy.contains(task)
    }

    pub fn busy_tasks(&self) -> impl Iterator<Item = &ElementId> {
        self.busy.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.busy.is_empty()
    }

    /// Drop every token and busy task.
    pub fn reset(&mut self) {
        self.conditions.clear();
        self.busy.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_oldest_first() {
        let mut marking = Marking::new();
        marking.add("c", Token::new(5));
        marking.add("c", Token::new(2));
        marking.add("c", Token::tagged(9, "x"));

        assert_eq!(marking.count("c"), 3);
        assert_eq!(marking.take("c").map(|t| t.epoch), Some(2));
        assert_eq!(marking.take("c").map(|t| t.epoch), Some(5));
        assert_eq!(marking.take("c").and_then(|t| t.tag), Some("x".to_string()));
        assert!(!marking.is_marked("c"));
        assert!(marking.take("c").is_none());
        assert_eq!(marking.marked_conditions().count(), 0);
    }

    #[test]
    fn busy_tasks_are_tracked_separately() {
        let mut marking = Marking::new();
        marking.set_busy("t");
        assert!(marking.is_busy("t"));
        assert_eq!(marking.total_tokens(), 0);
        assert!(!marking.is_empty());
        assert!(marking.clear_busy("t"));
        assert!(marking.is_empty());
    }
}
