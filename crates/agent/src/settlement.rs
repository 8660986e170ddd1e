//! Settlement engine
//!
//! Serializes settlements per task, plans them with the core
//! [`SettlementPlanner`], seals the resulting entries onto the task's hash
//! chain and commits step, entries and task cost in one repository call.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use bazaar_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use bazaar_core::domain::invocation::InvocationResult;
use bazaar_core::domain::step::{Step, StepId};
use bazaar_core::domain::task::{Task, TaskId};
use bazaar_core::ledger::{CostBreakdown, LedgerEntry, LedgerSealer, Rail};
use bazaar_core::settlement::{
    SettleOutcome, SettlementError, SettlementPlan, SettlementPlanner, SettlementPolicy,
};
use bazaar_db::repositories::{RepositoryError, SettlementCommit};
use bazaar_db::MarketplaceStore;

use crate::locks::TaskLocks;

/// What a settlement committed.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementReceipt {
    pub outcome: SettleOutcome,
    pub step: Step,
    pub task: Task,
    pub entries: Vec<LedgerEntry>,
    pub projected_cost: Decimal,
}

pub struct SettlementEngine {
    store: MarketplaceStore,
    planner: SettlementPlanner,
    sealer: LedgerSealer,
    audit: Arc<dyn AuditSink>,
    task_locks: TaskLocks,
}

impl SettlementEngine {
    pub fn new(
        store: MarketplaceStore,
        policy: SettlementPolicy,
        sealer: LedgerSealer,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            planner: SettlementPlanner::new(policy),
            sealer,
            audit,
            task_locks: TaskLocks::new(),
        }
    }

    pub fn sealer(&self) -> &LedgerSealer {
        &self.sealer
    }

    pub fn planner(&self) -> &SettlementPlanner {
        &self.planner
    }

    pub fn active_task_locks(&self) -> usize {
        self.task_locks.active()
    }

    /// Settles `step` against the gateway's result. The task and step are
    /// re-read under the task's settlement lock, so stale copies from the
    /// caller cannot double charge.
    pub async fn settle(
        &self,
        task: &Task,
        step: &Step,
        result: &InvocationResult,
    ) -> Result<SettlementReceipt, SettlementError> {
        let _guard = self.task_locks.lock(&task.id).await;

        let (current_task, current_step) = self.load_pair(&task.id, &step.id).await?;
        let plan = self.planner.plan(&current_task, &current_step, result)?;
        self.commit(plan).await
    }

    /// Fails `step` before invocation because `quoted_price` cannot fit the
    /// remaining budget.
    pub async fn reject_over_budget(
        &self,
        task: &Task,
        step: &Step,
        quoted_price: Decimal,
    ) -> Result<SettlementReceipt, SettlementError> {
        let _guard = self.task_locks.lock(&task.id).await;

        let (current_task, current_step) = self.load_pair(&task.id, &step.id).await?;
        let plan = self.planner.plan_budget_rejection(&current_task, &current_step, quoted_price)?;
        self.commit(plan).await
    }

    /// Appends a refund against a completed step and lowers the task's cost.
    pub async fn refund(
        &self,
        task_id: &TaskId,
        step_id: &StepId,
        rail: Rail,
        amount: Decimal,
        memo: &str,
    ) -> Result<LedgerEntry, SettlementError> {
        let _guard = self.task_locks.lock(task_id).await;

        let (task, step) = self.load_pair(task_id, step_id).await?;
        let step_entries =
            self.store.ledger.list_for_step(step_id).await.map_err(persistence)?;
        let charged = CostBreakdown::step_rail_total(&step_entries, step_id, rail);
        let plan = self.planner.plan_refund(&task, &step, rail, amount, memo, charged)?;

        let previous = self.store.ledger.last_for_task(task_id).await.map_err(persistence)?;
        let mut sealed = self.sealer.seal(task_id, previous.as_ref(), vec![plan.entry]);
        let entry = sealed.pop().ok_or_else(|| {
            SettlementError::Persistence("sealing produced no refund entry".to_owned())
        })?;

        self.store
            .ledger
            .commit_refund(entry.clone(), plan.task.accumulated_cost)
            .await
            .map_err(|error| map_commit_error(error, step_id))?;

        info!(
            event_name = "settlement.refund_committed",
            task_id = %task_id,
            step_id = %step_id,
            rail = rail.as_str(),
            amount = %amount,
            "refund committed"
        );
        self.audit.emit(
            AuditEvent::new(
                "settlement.refund",
                AuditCategory::Settlement,
                "settlement_engine",
                AuditOutcome::Success,
            )
            .for_task(task_id)
            .for_step(step_id)
            .with_entries(std::slice::from_ref(&entry))
            .with_detail("memo", memo),
        );

        Ok(entry)
    }

    /// Raises the task's budget by `amount` with a balance load entry on the
    /// internal rail. The entry funds the task and never counts as cost.
    pub async fn load_balance(
        &self,
        task_id: &TaskId,
        amount: Decimal,
        memo: &str,
    ) -> Result<(Task, LedgerEntry), SettlementError> {
        let _guard = self.task_locks.lock(task_id).await;

        let task = self
            .store
            .tasks
            .find_by_id(task_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| SettlementError::NotFound(format!("task {task_id}")))?;
        let plan = self.planner.plan_balance_load(&task, amount, memo)?;

        let previous = self.store.ledger.last_for_task(task_id).await.map_err(persistence)?;
        let mut sealed = self.sealer.seal(task_id, previous.as_ref(), vec![plan.entry]);
        let entry = sealed.pop().ok_or_else(|| {
            SettlementError::Persistence("sealing produced no balance load entry".to_owned())
        })?;

        self.store
            .ledger
            .commit_balance_load(entry.clone(), plan.task.max_budget)
            .await
            .map_err(|error| match error {
                RepositoryError::SequenceConflict { task_id, .. } => {
                    SettlementError::SequenceConflict(task_id)
                }
                RepositoryError::NotFound(message) => SettlementError::NotFound(message),
                other => persistence(other),
            })?;

        info!(
            event_name = "settlement.balance_loaded",
            task_id = %task_id,
            amount = %amount,
            max_budget = %plan.task.max_budget,
            "balance loaded"
        );
        self.audit.emit(
            AuditEvent::new(
                "ledger.balance_loaded",
                AuditCategory::Ledger,
                "settlement_engine",
                AuditOutcome::Success,
            )
            .for_task(task_id)
            .with_entries(std::slice::from_ref(&entry))
            .with_detail("max_budget", plan.task.max_budget.to_string()),
        );

        Ok((plan.task, entry))
    }

    async fn load_pair(
        &self,
        task_id: &TaskId,
        step_id: &StepId,
    ) -> Result<(Task, Step), SettlementError> {
        let task = self
            .store
            .tasks
            .find_by_id(task_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| SettlementError::NotFound(format!("task {task_id}")))?;
        let step = self
            .store
            .steps
            .find_by_id(step_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| SettlementError::NotFound(format!("step {step_id}")))?;
        Ok((task, step))
    }

    async fn commit(&self, plan: SettlementPlan) -> Result<SettlementReceipt, SettlementError> {
        let task_id = plan.task.id.clone();
        let step_id = plan.step.id.clone();

        let entries = if plan.entries.is_empty() {
            Vec::new()
        } else {
            let previous = self.store.ledger.last_for_task(&task_id).await.map_err(persistence)?;
            self.sealer.seal(&task_id, previous.as_ref(), plan.entries)
        };

        self.store
            .ledger
            .commit_settlement(SettlementCommit {
                step: plan.step.clone(),
                task_id: task_id.clone(),
                accumulated_cost: plan.task.accumulated_cost,
                entries: entries.clone(),
            })
            .await
            .map_err(|error| map_commit_error(error, &step_id))?;

        let audit_outcome = match plan.outcome {
            SettleOutcome::Charged => AuditOutcome::Success,
            SettleOutcome::Rejected => AuditOutcome::Rejected,
            SettleOutcome::NoCharge => AuditOutcome::Failed,
        };
        if plan.outcome == SettleOutcome::Charged {
            info!(
                event_name = "settlement.charged",
                task_id = %task_id,
                step_id = %step_id,
                agent_id = %plan.step.agent_id,
                projected_cost = %plan.projected_cost,
                accumulated_cost = %plan.task.accumulated_cost,
                entry_count = entries.len(),
                "step charged"
            );
        } else {
            warn!(
                event_name = "settlement.not_charged",
                task_id = %task_id,
                step_id = %step_id,
                agent_id = %plan.step.agent_id,
                outcome = plan.outcome.as_str(),
                "step settled without charge"
            );
        }
        self.audit.emit(
            AuditEvent::new(
                "settlement.step_settled",
                AuditCategory::Settlement,
                "settlement_engine",
                audit_outcome,
            )
            .for_task(&task_id)
            .for_step(&step_id)
            .with_entries(&entries)
            .with_detail("outcome", plan.outcome.as_str())
            .with_detail("decision_context", plan.decision_context.to_string()),
        );

        Ok(SettlementReceipt {
            outcome: plan.outcome,
            step: plan.step,
            task: plan.task,
            entries,
            projected_cost: plan.projected_cost,
        })
    }
}

fn persistence(error: RepositoryError) -> SettlementError {
    SettlementError::Persistence(error.to_string())
}

fn map_commit_error(error: RepositoryError, step_id: &StepId) -> SettlementError {
    match error {
        RepositoryError::Conflict(_) => SettlementError::DuplicateStep(step_id.clone()),
        RepositoryError::SequenceConflict { task_id, .. } => {
            SettlementError::SequenceConflict(task_id)
        }
        RepositoryError::NotFound(message) => SettlementError::NotFound(message),
        other => persistence(other),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use bazaar_core::audit::InMemoryAuditSink;
    use bazaar_core::domain::agent::AgentId;
    use bazaar_core::domain::invocation::{
        InvocationFailureKind, InvocationResult, InvocationSuccess,
    };
    use bazaar_core::domain::step::{Step, StepFailureKind, StepId, StepStatus};
    use bazaar_core::domain::task::{Task, TaskId};
    use bazaar_core::ledger::{CostBreakdown, EntryType, LedgerEntry, LedgerSealer, Rail};
    use bazaar_core::settlement::{SettleOutcome, SettlementError, SettlementPolicy};
    use bazaar_db::repositories::{
        InMemoryStore, LedgerRepository, RepositoryError, SettlementCommit,
    };
    use bazaar_db::MarketplaceStore;

use crate::locks::TaskLocks;

    use super::SettlementEngine;

    struct Harness {
        engine: SettlementEngine,
        store: MarketplaceStore,
        audit: InMemoryAuditSink,
    }

    fn harness(policy: SettlementPolicy) -> Harness {
        let store = MarketplaceStore::in_memory();
        let audit = InMemoryAuditSink::default();
        let engine = SettlementEngine::new(
            store.clone(),
            policy,
            LedgerSealer::new("test-key"),
            Arc::new(audit.clone()),
        );
        Harness { engine, store, audit }
    }

    async fn open_task(store: &MarketplaceStore, budget: Decimal) -> Task {
        let mut task = Task::new("do things", budget);
        task.start().expect("start");
        store.tasks.save(task.clone()).await.expect("save task");
        task
    }

    async fn running_step(store: &MarketplaceStore, task: &Task, agent: &str) -> Step {
        let mut step = Step::new(task.id.clone(), AgentId::new(agent), "summarize", "sub", json!({}));
        step.start().expect("start");
        store.steps.save(step.clone()).await.expect("save step");
        step
    }

    fn success(internal: Decimal, external: Option<Decimal>) -> InvocationResult {
        InvocationResult::Success(InvocationSuccess {
            output: "done".to_string(),
            declared_internal_cost: internal,
            requires_external_tool: external.is_some(),
            declared_external_cost: external.unwrap_or(Decimal::ZERO),
            duration_ms: 25,
        })
    }

    async fn ledger_total(store: &MarketplaceStore, task: &Task) -> CostBreakdown {
        let entries = store.ledger.list_for_task(&task.id).await.expect("entries");
        CostBreakdown::from_entries(&entries)
    }

    async fn stored_cost(store: &MarketplaceStore, task: &Task) -> Decimal {
        store.tasks.find_by_id(&task.id).await.expect("find").expect("exists").accumulated_cost
    }

    #[tokio::test]
    async fn two_steps_within_budget_are_both_charged() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::ONE).await;

        let first = running_step(&h.store, &task, "summarizer").await;
        let receipt = h
            .engine
            .settle(&task, &first, &success(Decimal::new(30, 2), None))
            .await
            .expect("settle first");
        assert_eq!(receipt.outcome, SettleOutcome::Charged);

        let second = running_step(&h.store, &task, "translator").await;
        let receipt = h
            .engine
            .settle(&task, &second, &success(Decimal::new(40, 2), None))
            .await
            .expect("settle second");
        assert_eq!(receipt.outcome, SettleOutcome::Charged);

        assert_eq!(ledger_total(&h.store, &task).await.total, Decimal::new(70, 2));
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::new(70, 2));
        assert_eq!(h.audit.events_of_type("settlement.step_settled").len(), 2);
    }

    #[tokio::test]
    async fn over_budget_step_is_rejected_with_no_entries() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::new(50, 2)).await;
        let step = running_step(&h.store, &task, "mock_negotiator").await;

        let receipt = h
            .engine
            .settle(&task, &step, &success(Decimal::new(60, 2), None))
            .await
            .expect("settle");

        assert_eq!(receipt.outcome, SettleOutcome::Rejected);
        assert_eq!(receipt.step.failure_kind, Some(StepFailureKind::BudgetExceeded));
        assert!(h.store.ledger.list_for_task(&task.id).await.expect("entries").is_empty());
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::ZERO);
        let stored = h.store.steps.find_by_id(&step.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn failed_invocation_records_kind_without_charge() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::ONE).await;
        let step = running_step(&h.store, &task, "search").await;

        let receipt = h
            .engine
            .settle(
                &task,
                &step,
                &InvocationResult::failure(InvocationFailureKind::Timeout, "slow", 30_000),
            )
            .await
            .expect("settle");

        assert_eq!(receipt.outcome, SettleOutcome::NoCharge);
        assert_eq!(receipt.step.failure_kind, Some(StepFailureKind::Timeout));
        assert!(receipt.entries.is_empty());
    }

    #[tokio::test]
    async fn external_tool_charges_one_entry_per_rail() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::ONE).await;
        let step = running_step(&h.store, &task, "search").await;

        let receipt = h
            .engine
            .settle(&task, &step, &success(Decimal::new(5, 2), Some(Decimal::new(5, 2))))
            .await
            .expect("settle");

        let rails: Vec<(Rail, EntryType)> =
            receipt.entries.iter().map(|entry| (entry.rail, entry.entry_type)).collect();
        assert_eq!(
            rails,
            vec![(Rail::Internal, EntryType::AgentPayment), (Rail::External, EntryType::CardSpend)]
        );
        let totals = ledger_total(&h.store, &task).await;
        assert_eq!(totals.internal_total, Decimal::new(5, 2));
        assert_eq!(totals.external_total, Decimal::new(5, 2));
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::new(10, 2));
    }

    #[tokio::test]
    async fn settling_twice_is_a_duplicate_and_charges_once() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::ONE).await;
        let step = running_step(&h.store, &task, "summarizer").await;
        let result = success(Decimal::new(20, 2), None);

        h.engine.settle(&task, &step, &result).await.expect("first settle");
        let error = h.engine.settle(&task, &step, &result).await.expect_err("duplicate");

        assert_eq!(error, SettlementError::DuplicateStep(step.id.clone()));
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::new(20, 2));
        assert_eq!(h.store.ledger.list_for_task(&task.id).await.expect("entries").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_settlements_never_exceed_budget() {
        let h = Arc::new(harness(SettlementPolicy::default()));
        let task = open_task(&h.store, Decimal::ONE).await;
        let mut steps = Vec::new();
        for _ in 0..5 {
            steps.push(running_step(&h.store, &task, "summarizer").await);
        }

        let handles: Vec<_> = steps
            .into_iter()
            .map(|step| {
                let h = h.clone();
                let task = task.clone();
                tokio::spawn(async move {
                    h.engine.settle(&task, &step, &success(Decimal::new(30, 2), None)).await
                })
            })
            .collect();

        let mut charged = 0;
        for handle in handles {
            let receipt = handle.await.expect("join").expect("settle");
            if receipt.outcome == SettleOutcome::Charged {
                charged += 1;
            }
        }

        assert_eq!(charged, 3);
        let cost = stored_cost(&h.store, &task).await;
        assert_eq!(cost, Decimal::new(90, 2));
        assert_eq!(ledger_total(&h.store, &task).await.total, cost);
        let entries = h.store.ledger.list_for_task(&task.id).await.expect("entries");
        assert!(h.engine.sealer().verify_chain(&task.id, &entries).valid);
    }

    #[tokio::test]
    async fn platform_fee_adds_internal_entry_and_counts_toward_budget() {
        let h = harness(SettlementPolicy {
            platform_fee_pct: Decimal::new(10, 0),
            ..SettlementPolicy::default()
        });
        let task = open_task(&h.store, Decimal::ONE).await;
        let step = running_step(&h.store, &task, "summarizer").await;

        let receipt = h
            .engine
            .settle(&task, &step, &success(Decimal::new(50, 2), None))
            .await
            .expect("settle");

        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(receipt.entries[1].entry_type, EntryType::PlatformFee);
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::new(55, 2));
    }

    #[tokio::test]
    async fn refunds_lower_cost_and_cannot_exceed_charge() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::ONE).await;
        let step = running_step(&h.store, &task, "search").await;
        h.engine
            .settle(&task, &step, &success(Decimal::new(8, 2), Some(Decimal::new(2, 2))))
            .await
            .expect("settle");

        let refund = h
            .engine
            .refund(&task.id, &step.id, Rail::Internal, Decimal::new(3, 2), "partial outage")
            .await
            .expect("refund");
        assert_eq!(refund.entry_type, EntryType::Refund);
        assert_eq!(refund.sequence, 3);
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::new(7, 2));
        assert_eq!(ledger_total(&h.store, &task).await.total, Decimal::new(7, 2));

        let error = h
            .engine
            .refund(&task.id, &step.id, Rail::External, Decimal::new(5, 2), "too much")
            .await
            .expect_err("over refund");
        assert!(matches!(error, SettlementError::InvalidRefund(_)));
        assert_eq!(h.audit.events_of_type("settlement.refund").len(), 1);
    }

    #[tokio::test]
    async fn pre_invocation_rejection_fails_the_step() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::new(50, 2)).await;
        let step = Step::new(task.id.clone(), AgentId::new("mock_highprice"), "premium", "", json!({}));
        h.store.steps.save(step.clone()).await.expect("save step");

        let receipt =
            h.engine.reject_over_budget(&task, &step, Decimal::new(85, 2)).await.expect("reject");

        assert_eq!(receipt.outcome, SettleOutcome::Rejected);
        assert_eq!(receipt.step.status, StepStatus::Failed);
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::ZERO);
    }

    struct StaleTipLedger(Arc<InMemoryStore>);

    #[async_trait]
    impl LedgerRepository for StaleTipLedger {
        async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<LedgerEntry>, RepositoryError> {
            LedgerRepository::list_for_task(self.0.as_ref(), task_id).await
        }

        async fn list_for_step(&self, step_id: &StepId) -> Result<Vec<LedgerEntry>, RepositoryError> {
            LedgerRepository::list_for_step(self.0.as_ref(), step_id).await
        }

        async fn last_for_task(
            &self,
            _task_id: &TaskId,
        ) -> Result<Option<LedgerEntry>, RepositoryError> {
            Ok(None)
        }

        async fn list_by_rail(
            &self,
            rail: Rail,
            limit: u32,
        ) -> Result<Vec<LedgerEntry>, RepositoryError> {
            LedgerRepository::list_by_rail(self.0.as_ref(), rail, limit).await
        }

        async fn commit_settlement(&self, commit: SettlementCommit) -> Result<(), RepositoryError> {
            LedgerRepository::commit_settlement(self.0.as_ref(), commit).await
        }

        async fn commit_refund(
            &self,
            entry: LedgerEntry,
            accumulated_cost: Decimal,
        ) -> Result<(), RepositoryError> {
            LedgerRepository::commit_refund(self.0.as_ref(), entry, accumulated_cost).await
        }

        async fn commit_balance_load(
            &self,
            entry: LedgerEntry,
            max_budget: Decimal,
        ) -> Result<(), RepositoryError> {
            LedgerRepository::commit_balance_load(self.0.as_ref(), entry, max_budget).await
        }
    }

    #[tokio::test]
    async fn sequence_race_is_not_reported_as_duplicate_step() {
        let inner = Arc::new(InMemoryStore::new());
        let store = MarketplaceStore {
            agents: inner.clone(),
            tasks: inner.clone(),
            steps: inner.clone(),
            ledger: Arc::new(StaleTipLedger(inner.clone())),
            turns: inner,
        };
        let engine = SettlementEngine::new(
            store.clone(),
            SettlementPolicy::default(),
            LedgerSealer::new("test-key"),
            Arc::new(InMemoryAuditSink::default()),
        );
        let task = open_task(&store, Decimal::ONE).await;
        let first = running_step(&store, &task, "summarizer").await;
        let second = running_step(&store, &task, "translator").await;

        engine.settle(&task, &first, &success(Decimal::new(10, 2), None)).await.expect("first");
        let error = engine
            .settle(&task, &second, &success(Decimal::new(10, 2), None))
            .await
            .expect_err("stale sequence");

        assert_eq!(error, SettlementError::SequenceConflict(task.id.clone()));
        let stored = store.steps.find_by_id(&second.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, StepStatus::InProgress);
        assert_eq!(stored_cost(&store, &task).await, Decimal::new(10, 2));
    }

    #[tokio::test]
    async fn settlement_audit_names_the_step_and_rail_amounts() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::ONE).await;
        let step = running_step(&h.store, &task, "search").await;

        h.engine
            .settle(&task, &step, &success(Decimal::new(8, 2), Some(Decimal::new(2, 2))))
            .await
            .expect("settle");

        let events = h.audit.events_for_step(&step.id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id.as_ref(), Some(&task.id));
        assert_eq!(events[0].rail_total(Rail::Internal), Decimal::new(8, 2));
        assert_eq!(events[0].rail_total(Rail::External), Decimal::new(2, 2));
        assert_eq!(h.engine.active_task_locks(), 0);
    }

    #[tokio::test]
    async fn balance_load_raises_budget_without_adding_cost() {
        let h = harness(SettlementPolicy::default());
        let task = open_task(&h.store, Decimal::new(50, 2)).await;
        let step = running_step(&h.store, &task, "mock_negotiator").await;

        let (funded, entry) =
            h.engine.load_balance(&task.id, Decimal::new(50, 2), "top up").await.expect("load");
        assert_eq!(funded.max_budget, Decimal::ONE);
        assert_eq!(entry.entry_type, EntryType::BalanceLoad);
        assert_eq!(entry.rail, Rail::Internal);
        assert_eq!(entry.sequence, 1);

        let receipt = h
            .engine
            .settle(&task, &step, &success(Decimal::new(60, 2), None))
            .await
            .expect("settle");
        assert_eq!(receipt.outcome, SettleOutcome::Charged);
        assert_eq!(stored_cost(&h.store, &task).await, Decimal::new(60, 2));
        assert_eq!(ledger_total(&h.store, &task).await.total, Decimal::new(60, 2));
        let entries = h.store.ledger.list_for_task(&task.id).await.expect("entries");
        assert!(h.engine.sealer().verify_chain(&task.id, &entries).valid);
        assert_eq!(h.audit.events_of_type("ledger.balance_loaded").len(), 1);

        let error = h
            .engine
            .load_balance(&task.id, Decimal::new(-1, 0), "negative")
            .await
            .expect_err("negative load");
        assert!(matches!(error, SettlementError::InvalidBalanceLoad(_)));
        let error = h
            .engine
            .load_balance(&TaskId("missing".to_owned()), Decimal::ONE, "nobody")
            .await
            .expect_err("unknown task");
        assert!(matches!(error, SettlementError::NotFound(_)));
    }
}
