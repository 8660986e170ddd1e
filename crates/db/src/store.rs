use std::sync::Arc;

use crate::repositories::{
    AgentRepository, InMemoryStore, LedgerRepository, SqlAgentRepository, SqlLedgerRepository,
    SqlStepRepository, SqlTaskRepository, SqlTurnRepository, StepRepository, TaskRepository,
    TurnRepository,
};
use crate::DbPool;

/// Repository bundle handed to the marketplace services.
#[derive(Clone)]
pub struct MarketplaceStore {
    pub agents: Arc<dyn AgentRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub turns: Arc<dyn TurnRepository>,
}

impl MarketplaceStore {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            agents: Arc::new(SqlAgentRepository::new(pool.clone())),
            tasks: Arc::new(SqlTaskRepository::new(pool.clone())),
            steps: Arc::new(SqlStepRepository::new(pool.clone())),
            ledger: Arc::new(SqlLedgerRepository::new(pool.clone())),
            turns: Arc::new(SqlTurnRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            agents: store.clone(),
            tasks: store.clone(),
            steps: store.clone(),
            ledger: store.clone(),
            turns: store,
        }
    }
}
