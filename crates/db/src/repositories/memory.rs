use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use bazaar_core::domain::agent::{Agent, AgentId};
use bazaar_core::domain::step::{Step, StepId};
use bazaar_core::domain::task::{Task, TaskId};
use bazaar_core::domain::turn::ConversationTurn;
use bazaar_core::ledger::{LedgerEntry, Rail};

use super::{
    AgentRepository, LedgerRepository, RepositoryError, SettlementCommit, StepRepository,
    TaskRepository, TurnRepository,
};

#[derive(Default)]
struct MemoryState {
    agents: Vec<Agent>,
    tasks: Vec<Task>,
    steps: Vec<Step>,
    ledger: HashMap<String, Vec<LedgerEntry>>,
    turns: Vec<ConversationTurn>,
}

/// Process-local store with the same conflict rules as the SQL repositories.
/// All collections share one lock so settlement commits stay atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryStore {
    async fn list(&self) -> Result<Vec<Agent>, RepositoryError> {
        let state = self.state.read().await;
        let mut agents = state.agents.clone();
        agents.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(agents)
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.agents.iter().find(|agent| &agent.id == id).cloned())
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.agents.iter_mut().find(|existing| existing.id == agent.id) {
            Some(existing) => *existing = agent,
            None => state.agents.push(agent),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryStore {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.tasks.iter().find(|task| &task.id == id).cloned())
    }

    async fn save(&self, task: Task) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => {
                let accumulated_cost = existing.accumulated_cost;
                let max_budget = existing.max_budget;
                *existing = Task { accumulated_cost, max_budget, ..task };
            }
            None => state.tasks.push(task),
        }
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Task>, RepositoryError> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.iter().rev().cloned().collect();
        tasks.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        tasks.truncate(limit as usize);
        Ok(tasks)
    }
}

#[async_trait::async_trait]
impl StepRepository for InMemoryStore {
    async fn find_by_id(&self, id: &StepId) -> Result<Option<Step>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.steps.iter().find(|step| &step.id == id).cloned())
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<Step>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.steps.iter().filter(|step| &step.task_id == task_id).cloned().collect())
    }

    async fn save(&self, step: Step) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.steps.iter_mut().find(|existing| existing.id == step.id) {
            Some(existing) if existing.is_terminal() => {}
            Some(existing) => *existing = step,
            None => state.steps.push(step),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerRepository for InMemoryStore {
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.ledger.get(&task_id.0).cloned().unwrap_or_default())
    }

    async fn list_for_step(&self, step_id: &StepId) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .values()
            .flatten()
            .filter(|entry| entry.step_id.as_ref() == Some(step_id))
            .cloned()
            .collect())
    }

    async fn last_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.ledger.get(&task_id.0).and_then(|entries| entries.last().cloned()))
    }

    async fn list_by_rail(
        &self,
        rail: Rail,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries: Vec<LedgerEntry> =
            state.ledger.values().flatten().filter(|entry| entry.rail == rail).cloned().collect();
        entries.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.sequence.cmp(&left.sequence))
        });
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn commit_settlement(&self, commit: SettlementCommit) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        let step_index = state
            .steps
            .iter()
            .position(|step| step.id == commit.step.id && step.task_id == commit.task_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("step {}", commit.step.id)))?;
        if state.steps[step_index].is_terminal() {
            return Err(RepositoryError::Conflict(format!(
                "step {} is already settled",
                commit.step.id
            )));
        }
        let task_index = state
            .tasks
            .iter()
            .position(|task| task.id == commit.task_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", commit.task_id)))?;
        check_sequences(&state, &commit.task_id, &commit.entries)?;

        state.steps[step_index] = commit.step;
        state.tasks[task_index].accumulated_cost = commit.accumulated_cost;
        state.ledger.entry(commit.task_id.0.clone()).or_default().extend(commit.entries);
        Ok(())
    }

    async fn commit_refund(
        &self,
        entry: LedgerEntry,
        accumulated_cost: Decimal,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        let task_index = state
            .tasks
            .iter()
            .position(|task| task.id == entry.task_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", entry.task_id)))?;
        check_sequences(&state, &entry.task_id, std::slice::from_ref(&entry))?;

        state.tasks[task_index].accumulated_cost = accumulated_cost;
        state.ledger.entry(entry.task_id.0.clone()).or_default().push(entry);
        Ok(())
    }

    async fn commit_balance_load(
        &self,
        entry: LedgerEntry,
        max_budget: Decimal,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        let task_index = state
            .tasks
            .iter()
            .position(|task| task.id == entry.task_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", entry.task_id)))?;
        check_sequences(&state, &entry.task_id, std::slice::from_ref(&entry))?;

        state.tasks[task_index].max_budget = max_budget;
        state.ledger.entry(entry.task_id.0.clone()).or_default().push(entry);
        Ok(())
    }
}

fn check_sequences(
    state: &MemoryState,
    task_id: &TaskId,
    entries: &[LedgerEntry],
) -> Result<(), RepositoryError> {
    let existing = state.ledger.get(&task_id.0).map(Vec::as_slice).unwrap_or_default();
    for entry in entries {
        if existing.iter().any(|stored| stored.sequence == entry.sequence) {
            return Err(RepositoryError::SequenceConflict {
                task_id: task_id.clone(),
                sequence: entry.sequence,
            });
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl TurnRepository for InMemoryStore {
    async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.turns.push(turn);
        Ok(())
    }

    async fn list_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.turns.iter().filter(|turn| &turn.task_id == task_id).cloned().collect())
    }
}
