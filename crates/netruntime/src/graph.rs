use netcore::{ElementId, NetError, NetModel};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Directed graph over the elements of one net. Built once per net and
/// shared read-only by every case.
#[derive(Debug, Clone)]
pub struct NetGraph {
    graph: DiGraph<ElementId, ()>,
    index: HashMap<ElementId, NodeIndex>,
}

impl NetGraph {
    pub fn build(net: &NetModel) -> Result<Self, NetError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for id in net.elements.keys() {
            let idx = graph.add_node(id.clone());
            index.insert(id.clone(), idx);
        }

        for flow in &net.flows {
            let from = index
                .get(&flow.source)
                .ok_or_else(|| NetError::ElementNotFound(flow.source.clone()))?;
            let to = index
                .get(&flow.target)
                .ok_or_else(|| NetError::ElementNotFound(flow.target.clone()))?;
            graph.add_edge(*from, *to, ());
        }

        Ok(Self { graph, index })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn successors(&self, id: &str) -> Vec<&ElementId> {
        self.neighbors(id, Direction::Outgoing)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&ElementId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&ElementId> {
        match self.index.get(id) {
            Some(idx) => self
                .graph
                .neighbors_directed(*idx, direction)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every element reachable from `start` along flows, `start` included.
    pub fn reachable_from(&self, start: &str) -> HashSet<ElementId> {
        let mut reached = HashSet::new();
        if let Some(idx) = self.index.get(start) {
            let mut bfs = Bfs::new(&self.graph, *idx);
            while let Some(node) = bfs.next(&self.graph) {
                if let Some(id) = self.graph.node_weight(node) {
                    reached.insert(id.clone());
                }
            }
        }
        reached
    }

    pub fn element_count(&self) -> usize {
        self.graph.node_count()
    }
}
