use crate::snapshot::CaseSnapshot;
use async_trait::async_trait;
use netcore::{CaseId, EngineError};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable home of case snapshots for the stateful engine.
///
/// `save` must not return before the snapshot is durable: the engine
/// acknowledges an operation only after it does.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn save(&self, snapshot: &CaseSnapshot) -> Result<(), EngineError>;

    async fn load(&self, case_id: CaseId) -> Result<Option<CaseSnapshot>, EngineError>;

    async fn remove(&self, case_id: CaseId) -> Result<(), EngineError>;

    async fn load_all(&self) -> Result<Vec<CaseSnapshot>, EngineError>;
}

/// Process-local store. Keeps the newest revision of every case.
#[derive(Default)]
pub struct InMemoryCaseStore {
    snapshots: RwLock<HashMap<CaseId, CaseSnapshot>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, case_id: CaseId) -> Option<CaseSnapshot> {
        self.snapshots.read().await.get(&case_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn save(&self, snapshot: &CaseSnapshot) -> Result<(), EngineError> {
        let mut snapshots = self.snapshots.write().await;
        if let Some(existing) = snapshots.get(&snapshot.case_id()) {
            if existing.revision() >= snapshot.revision() {
                tracing::debug!(
                    "Ignoring stale snapshot of case {} (revision {} <= {})",
                    snapshot.case_id(),
                    snapshot.revision(),
                    existing.revision()
                );
                return Ok(());
            }
        }
        snapshots.insert(snapshot.case_id(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, case_id: CaseId) -> Result<Option<CaseSnapshot>, EngineError> {
        Ok(self.get(case_id).await)
    }

    async fn remove(&self, case_id: CaseId) -> Result<(), EngineError> {
        self.snapshots.write().await.remove(&case_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<CaseSnapshot>, EngineError> {
        Ok(self.snapshots.read().await.values().cloned().collect())
    }
}
