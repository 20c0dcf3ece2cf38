use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type ElementId = String;

/// Complete, immutable net definition shared by every case of a specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetModel {
    pub id: String,
    pub version: String,
    pub name: Option<String>,
    pub input_condition: ElementId,
    pub output_condition: ElementId,
    pub elements: BTreeMap<ElementId, NetElement>,
    pub flows: Vec<Flow>,
}

impl NetModel {
    /// Create a net holding only its input and output conditions.
    pub fn new(
        id: impl Into<String>,
        input_condition: impl Into<ElementId>,
        output_condition: impl Into<ElementId>,
    ) -> Self {
        let input_condition = input_condition.into();
        let output_condition = output_condition.into();
        let mut elements = BTreeMap::new();
        elements.insert(
            input_condition.clone(),
            NetElement::Condition(Condition::new(input_condition.clone())),
        );
        elements.insert(
            output_condition.clone(),
            NetElement::Condition(Condition::new(output_condition.clone())),
        );
        Self {
            id: id.into(),
            version: "0.1".to_string(),
            name: None,
            input_condition,
            output_condition,
            elements,
            flows: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_condition(&mut self, condition: Condition) -> ElementId {
        let id = condition.id.clone();
        self.elements.insert(id.clone(), NetElement::Condition(condition));
        id
    }

    pub fn add_task(&mut self, task: Task) -> ElementId {
        let id = task.id.clone();
        self.elements.insert(id.clone(), NetElement::Task(task));
        id
    }

    /// Unconditional flow.
    pub fn connect(&mut self, source: impl Into<ElementId>, target: impl Into<ElementId>) {
        self.flows.push(Flow::new(source, target));
    }

    /// Flow guarded by a predicate over case data.
    pub fn connect_when(
        &mut self,
        source: impl Into<ElementId>,
        target: impl Into<ElementId>,
        predicate: impl Into<String>,
    ) {
        self.flows.push(Flow::new(source, target).with_predicate(predicate));
    }

    /// Fallback flow of an XOR/OR split.
    pub fn connect_default(&mut self, source: impl Into<ElementId>, target: impl Into<ElementId>) {
        let mut flow = Flow::new(source, target);
        flow.default = true;
        self.flows.push(flow);
    }

    /// Task-to-task flow routed through a fresh implicit condition, whose
    /// id is returned.
    pub fn connect_tasks(&mut self, source: &str, target: &str) -> ElementId {
        let id = format!("{}__{}", source, target);
        self.add_condition(Condition::implicit(id.clone()));
        self.connect(source, id.clone());
        self.connect(id.clone(), target);
        id
    }

    pub fn element(&self, id: &str) -> Option<&NetElement> {
        self.elements.get(id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        match self.elements.get(id) {
            Some(NetElement::Task(task)) => Some(task),
            _ => None,
        }
    }

    pub fn is_condition(&self, id: &str) -> bool {
        matches!(self.elements.get(id), Some(NetElement::Condition(_)))
    }

    /// Tasks in identifier order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.elements.values().filter_map(|element| match element {
            NetElement::Task(task) => Some(task),
            NetElement::Condition(_) => None,
        })
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.elements.values().filter_map(|element| match element {
            NetElement::Condition(condition) => Some(condition),
            NetElement::Task(_) => None,
        })
    }

    /// Flows leaving `source`, in declaration order.
    pub fn outgoing<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Flow> + 'a {
        self.flows.iter().filter(move |flow| flow.source == source)
    }

    /// Flows entering `target`, in declaration order.
    pub fn incoming<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Flow> + 'a {
        self.flows.iter().filter(move |flow| flow.target == target)
    }

    /// Conditions feeding a task, in flow order.
    pub fn preset(&self, task_id: &str) -> Vec<ElementId> {
        self.incoming(task_id).map(|flow| flow.source.clone()).collect()
    }

    /// Conditions fed by a task, in flow order.
    pub fn postset(&self, task_id: &str) -> Vec<ElementId> {
        self.outgoing(task_id).map(|flow| flow.target.clone()).collect()
    }
}

/// Closed set of net elements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetElement {
    Condition(Condition),
    Task(Task),
}

impl NetElement {
    pub fn id(&self) -> &str {
        match self {
            NetElement::Condition(condition) => &condition.id,
            NetElement::Task(task) => &task.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub id: ElementId,
    pub name: Option<String>,
    #[serde(default)]
    pub implicit: bool,
}

impl Condition {
    pub fn new(id: impl Into<ElementId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            implicit: false,
        }
    }

    /// Condition standing in for a direct task-to-task flow.
    pub fn implicit(id: impl Into<ElementId>) -> Self {
        Self {
            implicit: true,
            ..Self::new(id)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Join or split behaviour of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    And,
    Xor,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: ElementId,
    pub name: Option<String>,
    pub join: Gate,
    pub split: Gate,
    #[serde(default)]
    pub cancellation_set: BTreeSet<ElementId>,
    #[serde(default)]
    pub multi_instance: Option<MultiInstance>,
    /// Routing task: fires and exits without issuing a work item.
    #[serde(default)]
    pub automatic: bool,
}

impl Task {
    /// XOR-join, AND-split single-instance task.
    pub fn new(id: impl Into<ElementId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            join: Gate::Xor,
            split: Gate::And,
            cancellation_set: BTreeSet::new(),
            multi_instance: None,
            automatic: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_join(mut self, join: Gate) -> Self {
        self.join = join;
        self
    }

    pub fn with_split(mut self, split: Gate) -> Self {
        self.split = split;
        self
    }

    pub fn cancels(mut self, element: impl Into<ElementId>) -> Self {
        self.cancellation_set.insert(element.into());
        self
    }

    pub fn with_multi_instance(mut self, attributes: MultiInstance) -> Self {
        self.multi_instance = Some(attributes);
        self
    }

    pub fn automatic(mut self) -> Self {
        self.automatic = true;
        self
    }

    pub fn is_multi_instance(&self) -> bool {
        self.multi_instance.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceCreation {
    #[default]
    Static,
    /// Members may be added while the group is running.
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiInstance {
    pub min: u32,
    pub max: u32,
    pub threshold: u32,
    /// Number of instances, or an array with one element per instance.
    #[serde(default)]
    pub instance_query: Option<String>,
    /// Evaluated against aggregated instance output.
    #[serde(default)]
    pub completion: Option<String>,
    #[serde(default)]
    pub creation: InstanceCreation,
    /// Case data key receiving the array of instance outputs.
    #[serde(default)]
    pub aggregate_into: Option<String>,
}

impl MultiInstance {
    pub fn new(min: u32, max: u32, threshold: u32) -> Self {
        Self {
            min,
            max,
            threshold,
            instance_query: None,
            completion: None,
            creation: InstanceCreation::Static,
            aggregate_into: None,
        }
    }

    pub fn with_instance_query(mut self, query: impl Into<String>) -> Self {
        self.instance_query = Some(query.into());
        self
    }

    pub fn with_completion(mut self, predicate: impl Into<String>) -> Self {
        self.completion = Some(predicate.into());
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.creation = InstanceCreation::Dynamic;
        self
    }

    pub fn aggregate_into(mut self, key: impl Into<String>) -> Self {
        self.aggregate_into = Some(key.into());
        self
    }
}

/// Directed arc between a condition and a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub source: ElementId,
    pub target: ElementId,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub default: bool,
}

impl Flow {
    pub fn new(source: impl Into<ElementId>, target: impl Into<ElementId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            predicate: None,
            default: false,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }
}
