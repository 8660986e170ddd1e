//! Agent registry service
//!
//! Holds the live agent catalog. Every agent sits behind its own exclusive
//! lock so load counters and dynamic prices change atomically per agent while
//! different agents proceed independently. Durable state goes through the
//! [`AgentRepository`] the registry was built with.
//!
//! Load is a baseline plus the number of invocations in flight. The count is
//! kept exactly; only the load used for pricing is capped at `MAX_LOAD`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use bazaar_core::domain::agent::{Agent, AgentId, MAX_LOAD};
use bazaar_db::repositories::{AgentRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

struct SlotState {
    agent: Agent,
    baseline: u8,
    in_flight: u32,
}

impl SlotState {
    fn new(agent: Agent) -> Self {
        Self { baseline: agent.load, in_flight: 0, agent }
    }

    fn reprice(&mut self) {
        self.agent.set_load(u32::from(self.baseline).saturating_add(self.in_flight));
    }
}

type AgentSlot = Arc<Mutex<SlotState>>;

pub struct AgentRegistry {
    store: Arc<dyn AgentRepository>,
    agents: RwLock<HashMap<AgentId, AgentSlot>>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn AgentRepository>) -> Self {
        Self { store, agents: RwLock::new(HashMap::new()) }
    }

    /// Replaces the live catalog with the persisted one.
    pub async fn load_from_store(&self) -> Result<usize, RegistryError> {
        let persisted = self.store.list().await?;
        let count = persisted.len();
        let mut agents = self.agents.write().await;
        agents.clear();
        for agent in persisted {
            agents.insert(agent.id.clone(), Arc::new(Mutex::new(SlotState::new(agent))));
        }
        info!(event_name = "registry.loaded", agent_count = count, "agent catalog loaded");
        Ok(count)
    }

    pub async fn register(&self, agent: Agent) -> Result<(), RegistryError> {
        self.store.save(agent.clone()).await?;
        let mut agents = self.agents.write().await;
        info!(event_name = "registry.agent_registered", agent_id = %agent.id, "agent registered");
        agents.insert(agent.id.clone(), Arc::new(Mutex::new(SlotState::new(agent))));
        Ok(())
    }

    /// Snapshot of every agent, ordered by id.
    pub async fn list(&self) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut snapshot: Vec<Agent> = agents.values().map(|slot| lock_slot(slot).agent.clone()).collect();
        snapshot.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        snapshot
    }

    pub async fn get(&self, id: &AgentId) -> Result<Agent, RegistryError> {
        let slot = self.slot(id).await?;
        let agent = lock_slot(&slot).agent.clone();
        Ok(agent)
    }

    /// Available agents offering any of `required_skills`, cheapest first and
    /// best rated among equal prices.
    pub async fn select_candidates(
        &self,
        required_skills: &[String],
        max_price: Option<Decimal>,
    ) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut candidates: Vec<Agent> = agents
            .values()
            .map(|slot| lock_slot(slot).agent.clone())
            .filter(|agent| agent.available && agent.has_any_skill(required_skills))
            .filter(|agent| max_price.map_or(true, |ceiling| agent.dynamic_price <= ceiling))
            .collect();
        candidates.sort_by(compare_candidates);
        debug!(
            event_name = "registry.candidates_selected",
            skills = ?required_skills,
            candidate_count = candidates.len(),
            "candidates selected"
        );
        candidates
    }

    /// Moves the baseline load by `delta`, clamped to `0..=MAX_LOAD`, and
    /// returns the repriced agent.
    pub async fn record_load_delta(&self, id: &AgentId, delta: i32) -> Result<Agent, RegistryError> {
        let slot = self.slot(id).await?;
        let mut state = lock_slot(&slot);
        let next = (i32::from(state.baseline) + delta).clamp(0, i32::from(MAX_LOAD));
        state.baseline = u8::try_from(next).unwrap_or(MAX_LOAD);
        state.reprice();
        Ok(state.agent.clone())
    }

    /// Marks one unit of work in flight on `id` until the guard drops.
    pub async fn acquire(&self, id: &AgentId) -> Result<LoadGuard, RegistryError> {
        let slot = self.slot(id).await?;
        {
            let mut state = lock_slot(&slot);
            state.in_flight = state.in_flight.saturating_add(1);
            state.reprice();
        }
        Ok(LoadGuard { agent_id: id.clone(), slot })
    }

    /// Invocations currently running on `id`, uncapped.
    pub async fn in_flight(&self, id: &AgentId) -> Result<u32, RegistryError> {
        let slot = self.slot(id).await?;
        let in_flight = lock_slot(&slot).in_flight;
        Ok(in_flight)
    }

    pub async fn set_availability(&self, id: &AgentId, available: bool) -> Result<(), RegistryError> {
        let slot = self.slot(id).await?;
        let snapshot = {
            let mut state = lock_slot(&slot);
            if state.agent.available == available {
                return Ok(());
            }
            state.agent.available = available;
            state.agent.clone()
        };
        info!(
            event_name = "registry.availability_changed",
            agent_id = %id,
            available,
            "agent availability changed"
        );
        self.store.save(snapshot).await?;
        Ok(())
    }

    pub async fn record_completion(&self, id: &AgentId, duration_ms: u64) -> Result<(), RegistryError> {
        let slot = self.slot(id).await?;
        let snapshot = {
            let mut state = lock_slot(&slot);
            state.agent.record_completion(duration_ms);
            state.agent.clone()
        };
        self.store.save(snapshot).await?;
        Ok(())
    }

    async fn slot(&self, id: &AgentId) -> Result<AgentSlot, RegistryError> {
        let agents = self.agents.read().await;
        agents.get(id).cloned().ok_or_else(|| RegistryError::AgentNotFound(id.clone()))
    }
}

/// In-flight marker returned by [`AgentRegistry::acquire`]. Dropping it,
/// including through cancellation, releases the load unit.
pub struct LoadGuard {
    agent_id: AgentId,
    slot: AgentSlot,
}

impl LoadGuard {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let mut state = lock_slot(&self.slot);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.reprice();
    }
}

fn lock_slot(slot: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn compare_candidates(left: &Agent, right: &Agent) -> Ordering {
    left.dynamic_price
        .cmp(&right.dynamic_price)
        .then_with(|| right.stats.rating.cmp(&left.stats.rating))
        .then_with(|| left.id.0.cmp(&right.id.0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use bazaar_core::domain::agent::{Agent, AgentId, MAX_LOAD};
    use bazaar_db::repositories::{AgentRepository, InMemoryStore};
    use bazaar_db::AgentCatalogSeed;

    use super::{AgentRegistry, RegistryError};

    async fn seeded_registry() -> (AgentRegistry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        AgentCatalogSeed::load(store.as_ref()).await.expect("seed");
        let registry = AgentRegistry::new(store.clone());
        registry.load_from_store().await.expect("load");
        (registry, store)
    }

    fn skills(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[tokio::test]
    async fn candidates_are_cheapest_first_and_skip_unavailable() {
        let (registry, _) = seeded_registry().await;

        let candidates = registry.select_candidates(&skills(&["TEST"]), None).await;
        let ids: Vec<&str> = candidates.iter().map(|agent| agent.id.0.as_str()).collect();

        assert_eq!(ids, vec!["mock_negotiator", "mock_highprice"]);
    }

    #[tokio::test]
    async fn equal_prices_prefer_higher_rating() {
        let (registry, _) = seeded_registry().await;
        registry
            .register(
                Agent::new(
                    "summarizer_b",
                    "Budget Summarizer",
                    skills(&["summarize"]),
                    Decimal::new(5, 2),
                    "http://localhost:9001",
                )
                .with_rating(Decimal::new(40, 1)),
            )
            .await
            .expect("register");

        let candidates = registry.select_candidates(&skills(&["summarize"]), None).await;
        assert_eq!(candidates[0].id, AgentId::new("summarizer"));
        assert_eq!(candidates[1].id, AgentId::new("summarizer_b"));
    }

    #[tokio::test]
    async fn load_surcharge_reorders_candidates_immediately() {
        let (registry, _) = seeded_registry().await;
        registry
            .register(Agent::new(
                "summarizer_b",
                "Second Summarizer",
                skills(&["summarize"]),
                Decimal::new(6, 2),
                "http://localhost:9001",
            ))
            .await
            .expect("register");

        let repriced =
            registry.record_load_delta(&AgentId::new("summarizer"), 8).await.expect("delta");
        assert_eq!(repriced.dynamic_price, Decimal::new(65, 3));

        let candidates = registry.select_candidates(&skills(&["summarize"]), None).await;
        assert_eq!(candidates[0].id, AgentId::new("summarizer_b"));

        let capped = registry
            .select_candidates(&skills(&["summarize"]), Some(Decimal::new(6, 2)))
            .await;
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn load_guard_releases_on_drop() {
        let (registry, _) = seeded_registry().await;
        let id = AgentId::new("search");

        let guard = registry.acquire(&id).await.expect("acquire");
        assert_eq!(registry.get(&id).await.expect("get").load, 1);
        drop(guard);
        assert_eq!(registry.get(&id).await.expect("get").load, 0);

        let clamped = registry.record_load_delta(&id, 50).await.expect("delta");
        assert_eq!(clamped.load, MAX_LOAD);
    }

    #[tokio::test]
    async fn in_flight_count_survives_the_pricing_cap() {
        let (registry, _) = seeded_registry().await;
        let id = AgentId::new("search");
        let top_band = registry.record_load_delta(&id, i32::from(MAX_LOAD)).await.expect("peak");
        registry.record_load_delta(&id, -i32::from(MAX_LOAD)).await.expect("reset");

        let mut guards = Vec::new();
        for _ in 0..12 {
            guards.push(registry.acquire(&id).await.expect("acquire"));
        }
        assert_eq!(registry.in_flight(&id).await.expect("in flight"), 12);
        assert_eq!(registry.get(&id).await.expect("get").load, MAX_LOAD);

        guards.truncate(10);
        let busy = registry.get(&id).await.expect("get");
        assert_eq!(busy.load, MAX_LOAD);
        assert_eq!(busy.dynamic_price, top_band.dynamic_price);

        guards.clear();
        assert_eq!(registry.in_flight(&id).await.expect("in flight"), 0);
        assert_eq!(registry.get(&id).await.expect("get").load, 0);
    }

    #[tokio::test]
    async fn unknown_agents_are_reported() {
        let (registry, _) = seeded_registry().await;
        let missing = AgentId::new("ghost");

        assert!(matches!(registry.get(&missing).await, Err(RegistryError::AgentNotFound(_))));
        assert!(matches!(
            registry.record_load_delta(&missing, 1).await,
            Err(RegistryError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn availability_and_stats_are_persisted() {
        let (registry, store) = seeded_registry().await;
        let id = AgentId::new("translator");

        registry.set_availability(&id, false).await.expect("availability");
        registry.record_completion(&id, 1800).await.expect("completion");

        let persisted = AgentRepository::find_by_id(store.as_ref(), &id)
            .await
            .expect("find")
            .expect("exists");
        assert!(!persisted.available);
        assert_eq!(persisted.stats.jobs_completed, 204);
        assert!(registry.select_candidates(&skills(&["translate"]), None).await.is_empty());
    }
}
