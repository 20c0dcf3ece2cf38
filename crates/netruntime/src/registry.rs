use crate::graph::NetGraph;
use netcore::{EngineError, NetModel, PredicateEvaluator};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of loaded net specifications, keyed by id and version.
///
/// Nets are validated once on registration and shared immutably by every
/// case launched from them.
pub struct NetRegistry {
    nets: HashMap<(String, String), RegisteredNet>,
}

#[derive(Clone)]
pub(crate) struct RegisteredNet {
    pub net: Arc<NetModel>,
    pub graph: Arc<NetGraph>,
}

impl NetRegistry {
    pub fn new() -> Self {
        Self {
            nets: HashMap::new(),
        }
    }

    /// Validate and register a net. Its predicates are checked against
    /// `evaluator` when one is given.
    pub fn register(
        &mut self,
        net: NetModel,
        evaluator: Option<&dyn PredicateEvaluator>,
    ) -> Result<Arc<NetModel>, EngineError> {
        let graph = crate::validate::validate(&net)?;
        if let Some(evaluator) = evaluator {
            crate::validate::validate_expressions(&net, evaluator)?;
        }

        tracing::info!("Registering net: {} ({})", net.id, net.version);
        let net = Arc::new(net);
        self.nets.insert(
            (net.id.clone(), net.version.clone()),
            RegisteredNet {
                net: net.clone(),
                graph: Arc::new(graph),
            },
        );
        Ok(net)
    }

    pub fn get(&self, id: &str, version: &str) -> Result<Arc<NetModel>, EngineError> {
        self.entry(id, version).map(|entry| entry.net)
    }

    pub(crate) fn entry(&self, id: &str, version: &str) -> Result<RegisteredNet, EngineError> {
        self.nets
            .get(&(id.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::NetNotFound {
                id: id.to_string(),
                version: version.to_string(),
            })
    }

    /// All registered (id, version) pairs.
    pub fn list_nets(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.nets.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for NetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
