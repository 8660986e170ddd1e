//! Deterministic settlement planner
//!
//! Decides, for one finished invocation, what the step becomes, which ledger
//! entries are owed and how the task's accumulated cost moves. The planner is
//! pure: callers persist the resulting plan atomically.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::invocation::{InvocationResult, InvocationSuccess};
use crate::domain::step::{Step, StepFailureKind, StepId, StepStatus};
use crate::domain::task::{Task, TaskId};
use crate::errors::DomainError;
use crate::ledger::{EntryType, LedgerEntryDraft, Rail};
use crate::pricing::platform_fee;

/// Counterparty recorded on platform fee entries.
pub const PLATFORM_COUNTERPARTY: &str = "platform";
/// Counterparty recorded on balance load entries.
pub const CUSTOMER_WALLET_COUNTERPARTY: &str = "customer_wallet";

/// Settlement configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Fee on each internal charge, as a percentage. Zero disables fee entries.
    pub platform_fee_pct: Decimal,
    /// Counterparty recorded on external card spend entries
    pub external_counterparty: String,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self { platform_fee_pct: Decimal::ZERO, external_counterparty: "card_rail".to_owned() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    #[error("step {0} is already settled")]
    DuplicateStep(StepId),
    #[error("step {step} does not belong to task {task}")]
    StepTaskMismatch { step: StepId, task: TaskId },
    #[error("task {0} is closed")]
    TaskClosed(TaskId),
    #[error("ledger sequence for task {0} moved underneath this settlement")]
    SequenceConflict(TaskId),
    #[error("invalid refund: {0}")]
    InvalidRefund(String),
    #[error("invalid balance load: {0}")]
    InvalidBalanceLoad(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("settlement persistence failure: {0}")]
    Persistence(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleOutcome {
    Charged,
    Rejected,
    NoCharge,
}

impl SettleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charged => "charged",
            Self::Rejected => "rejected",
            Self::NoCharge => "no_charge",
        }
    }
}

/// Everything one settlement changes, to be committed in one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementPlan {
    pub outcome: SettleOutcome,
    pub step: Step,
    pub task: Task,
    pub entries: Vec<LedgerEntryDraft>,
    pub projected_cost: Decimal,
    pub decision_context: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefundPlan {
    pub task: Task,
    pub entry: LedgerEntryDraft,
}

/// Funds added to a task's budget on the internal rail.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceLoadPlan {
    pub task: Task,
    pub entry: LedgerEntryDraft,
}

#[derive(Clone, Debug, Default)]
pub struct SettlementPlanner {
    policy: SettlementPolicy,
}

impl SettlementPlanner {
    pub fn new(policy: SettlementPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    /// Total a successful invocation would add to the task's cost.
    pub fn projected_cost(&self, success: &InvocationSuccess) -> Decimal {
        success.declared_internal_cost
            + success.billable_external_cost()
            + platform_fee(success.declared_internal_cost, self.policy.platform_fee_pct)
    }

    /// Plan the settlement of `step` given the gateway's result.
    ///
    /// Failures charge nothing. Successes are charged only when the projected
    /// cost fits within the remaining budget.
    pub fn plan(
        &self,
        task: &Task,
        step: &Step,
        result: &InvocationResult,
    ) -> Result<SettlementPlan, SettlementError> {
        self.ensure_settleable(task, step)?;

        let mut task = task.clone();
        let mut step = step.clone();

        match result {
            InvocationResult::Failure(failure) => {
                let kind = StepFailureKind::from(failure.kind);
                step.fail(kind, failure.message.clone(), Some(failure.duration_ms))?;
                Ok(SettlementPlan {
                    outcome: SettleOutcome::NoCharge,
                    decision_context: serde_json::json!({
                        "failure_kind": kind.as_str(),
                        "message": failure.message,
                    }),
                    step,
                    task,
                    entries: Vec::new(),
                    projected_cost: Decimal::ZERO,
                })
            }
            InvocationResult::Success(success) => {
                let projected = self.projected_cost(success);
                if !task.can_afford(projected) {
                    let message = budget_message(&task, projected);
                    step.fail(
                        StepFailureKind::BudgetExceeded,
                        message.clone(),
                        Some(success.duration_ms),
                    )?;
                    return Ok(SettlementPlan {
                        outcome: SettleOutcome::Rejected,
                        decision_context: serde_json::json!({
                            "projected_cost": projected.to_string(),
                            "accumulated_cost": task.accumulated_cost.to_string(),
                            "max_budget": task.max_budget.to_string(),
                            "message": message,
                        }),
                        step,
                        task,
                        entries: Vec::new(),
                        projected_cost: projected,
                    });
                }

                let external = success.billable_external_cost();
                let entries = self.entries_for(&step, success);
                step.complete(
                    success.output.clone(),
                    success.declared_internal_cost,
                    external,
                    success.requires_external_tool,
                    success.duration_ms,
                )?;
                task.accumulated_cost += projected;

                Ok(SettlementPlan {
                    outcome: SettleOutcome::Charged,
                    decision_context: serde_json::json!({
                        "projected_cost": projected.to_string(),
                        "accumulated_cost": task.accumulated_cost.to_string(),
                        "entry_count": entries.len(),
                    }),
                    step,
                    task,
                    entries,
                    projected_cost: projected,
                })
            }
        }
    }

    /// Reject a step before invocation because its quoted price cannot fit the budget.
    pub fn plan_budget_rejection(
        &self,
        task: &Task,
        step: &Step,
        quoted_price: Decimal,
    ) -> Result<SettlementPlan, SettlementError> {
        self.ensure_settleable(task, step)?;

        let mut step = step.clone();
        let message = budget_message(task, quoted_price);
        step.fail(StepFailureKind::BudgetExceeded, message.clone(), None)?;

        Ok(SettlementPlan {
            outcome: SettleOutcome::Rejected,
            decision_context: serde_json::json!({
                "quoted_price": quoted_price.to_string(),
                "accumulated_cost": task.accumulated_cost.to_string(),
                "max_budget": task.max_budget.to_string(),
                "message": message,
                "stage": "pre_invocation",
            }),
            step,
            task: task.clone(),
            entries: Vec::new(),
            projected_cost: quoted_price,
        })
    }

    /// Plan a refund against a completed step.
    ///
    /// `charged_on_rail` is the net amount already charged on `rail` for this
    /// step, refunds included.
    pub fn plan_refund(
        &self,
        task: &Task,
        step: &Step,
        rail: Rail,
        amount: Decimal,
        memo: impl Into<String>,
        charged_on_rail: Decimal,
    ) -> Result<RefundPlan, SettlementError> {
        if step.task_id != task.id {
            return Err(SettlementError::StepTaskMismatch {
                step: step.id.clone(),
                task: task.id.clone(),
            });
        }
        if step.status != StepStatus::Completed {
            return Err(SettlementError::InvalidRefund(format!(
                "step {} is {} and has no charges",
                step.id,
                step.status.as_str()
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidRefund("amount must be positive".to_owned()));
        }
        if amount > charged_on_rail {
            return Err(SettlementError::InvalidRefund(format!(
                "amount {amount} exceeds {charged_on_rail} charged on the {} rail",
                rail.as_str()
            )));
        }

        let mut task = task.clone();
        task.accumulated_cost -= amount;

        Ok(RefundPlan {
            task,
            entry: LedgerEntryDraft {
                step_id: Some(step.id.clone()),
                rail,
                entry_type: EntryType::Refund,
                amount,
                counterparty: step.agent_id.0.clone(),
                memo: memo.into(),
            },
        })
    }

    /// Plan a balance load that raises the task's budget by `amount`.
    pub fn plan_balance_load(
        &self,
        task: &Task,
        amount: Decimal,
        memo: impl Into<String>,
    ) -> Result<BalanceLoadPlan, SettlementError> {
        if task.status.is_terminal() {
            return Err(SettlementError::TaskClosed(task.id.clone()));
        }
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidBalanceLoad("amount must be positive".to_owned()));
        }

        let mut task = task.clone();
        task.max_budget += amount;

        Ok(BalanceLoadPlan {
            task,
            entry: LedgerEntryDraft {
                step_id: None,
                rail: Rail::Internal,
                entry_type: EntryType::BalanceLoad,
                amount,
                counterparty: CUSTOMER_WALLET_COUNTERPARTY.to_owned(),
                memo: memo.into(),
            },
        })
    }

    fn ensure_settleable(&self, task: &Task, step: &Step) -> Result<(), SettlementError> {
        if step.task_id != task.id {
            return Err(SettlementError::StepTaskMismatch {
                step: step.id.clone(),
                task: task.id.clone(),
            });
        }
        if step.is_terminal() {
            return Err(SettlementError::DuplicateStep(step.id.clone()));
        }
        if task.status.is_terminal() {
            return Err(SettlementError::TaskClosed(task.id.clone()));
        }
        Ok(())
    }

    fn entries_for(&self, step: &Step, success: &InvocationSuccess) -> Vec<LedgerEntryDraft> {
        let memo = if step.subtask.is_empty() { step.skill.clone() } else { step.subtask.clone() };
        let mut entries = vec![LedgerEntryDraft {
            step_id: Some(step.id.clone()),
            rail: Rail::Internal,
            entry_type: EntryType::AgentPayment,
            amount: success.declared_internal_cost,
            counterparty: step.agent_id.0.clone(),
            memo: memo.clone(),
        }];

        let fee = platform_fee(success.declared_internal_cost, self.policy.platform_fee_pct);
        if fee > Decimal::ZERO {
            entries.push(LedgerEntryDraft {
                step_id: Some(step.id.clone()),
                rail: Rail::Internal,
                entry_type: EntryType::PlatformFee,
                amount: fee,
                counterparty: PLATFORM_COUNTERPARTY.to_owned(),
                memo: format!("platform fee {}%", self.policy.platform_fee_pct.normalize()),
            });
        }

        if success.requires_external_tool {
            entries.push(LedgerEntryDraft {
                step_id: Some(step.id.clone()),
                rail: Rail::External,
                entry_type: EntryType::CardSpend,
                amount: success.declared_external_cost,
                counterparty: self.policy.external_counterparty.clone(),
                memo,
            });
        }

        entries
    }
}

fn budget_message(task: &Task, projected: Decimal) -> String {
    format!(
        "charge of {} would bring task cost to {} over budget {}",
        projected.normalize(),
        (task.accumulated_cost + projected).normalize(),
        task.max_budget.normalize()
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{SettleOutcome, SettlementError, SettlementPlanner, SettlementPolicy};
    use crate::domain::agent::AgentId;
    use crate::domain::invocation::{InvocationFailureKind, InvocationResult, InvocationSuccess};
    use crate::domain::step::{Step, StepFailureKind, StepStatus};
    use crate::domain::task::Task;
    use crate::ledger::{EntryType, Rail};

    fn step_for(task: &Task) -> Step {
        let mut step = Step::new(
            task.id.clone(),
            AgentId::new("summarizer"),
            "summarize",
            "summarize the report",
            json!({"task": "summarize the report"}),
        );
        step.start().expect("start");
        step
    }

    fn success(internal: Decimal, external: Option<Decimal>) -> InvocationResult {
        InvocationResult::Success(InvocationSuccess {
            output: "ok".to_owned(),
            declared_internal_cost: internal,
            requires_external_tool: external.is_some(),
            declared_external_cost: external.unwrap_or(Decimal::ZERO),
            duration_ms: 12,
        })
    }

    #[test]
    fn charged_plan_adds_cost_and_one_internal_entry() {
        let planner = SettlementPlanner::default();
        let task = Task::new("summarize", Decimal::ONE);
        let step = step_for(&task);

        let plan = planner.plan(&task, &step, &success(Decimal::new(30, 2), None)).expect("plan");

        assert_eq!(plan.outcome, SettleOutcome::Charged);
        assert_eq!(plan.step.status, StepStatus::Completed);
        assert_eq!(plan.task.accumulated_cost, Decimal::new(30, 2));
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].rail, Rail::Internal);
        assert_eq!(plan.entries[0].entry_type, EntryType::AgentPayment);
    }

    #[test]
    fn external_tool_adds_card_spend_entry_on_external_rail() {
        let planner = SettlementPlanner::default();
        let task = Task::new("search", Decimal::ONE);
        let step = step_for(&task);

        let plan = planner
            .plan(&task, &step, &success(Decimal::new(5, 2), Some(Decimal::new(5, 2))))
            .expect("plan");

        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[1].rail, Rail::External);
        assert_eq!(plan.entries[1].entry_type, EntryType::CardSpend);
        assert_eq!(plan.task.accumulated_cost, Decimal::new(10, 2));
        assert_eq!(plan.step.external_cost, Decimal::new(5, 2));
    }

    #[test]
    fn external_cost_is_ignored_without_external_tool_flag() {
        let planner = SettlementPlanner::default();
        let task = Task::new("search", Decimal::ONE);
        let step = step_for(&task);
        let result = InvocationResult::Success(InvocationSuccess {
            output: "ok".to_owned(),
            declared_internal_cost: Decimal::new(5, 2),
            requires_external_tool: false,
            declared_external_cost: Decimal::new(50, 2),
            duration_ms: 1,
        });

        let plan = planner.plan(&task, &step, &result).expect("plan");
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.task.accumulated_cost, Decimal::new(5, 2));
    }

    #[test]
    fn over_budget_success_is_rejected_without_entries() {
        let planner = SettlementPlanner::default();
        let task = Task::new("summarize", Decimal::new(50, 2));
        let step = step_for(&task);

        let plan = planner.plan(&task, &step, &success(Decimal::new(60, 2), None)).expect("plan");

        assert_eq!(plan.outcome, SettleOutcome::Rejected);
        assert_eq!(plan.step.status, StepStatus::Failed);
        assert_eq!(plan.step.failure_kind, Some(StepFailureKind::BudgetExceeded));
        assert!(plan.entries.is_empty());
        assert_eq!(plan.task.accumulated_cost, Decimal::ZERO);
    }

    #[test]
    fn exact_budget_fit_is_charged() {
        let planner = SettlementPlanner::default();
        let mut task = Task::new("summarize", Decimal::ONE);
        task.accumulated_cost = Decimal::new(70, 2);
        let step = step_for(&task);

        let plan = planner.plan(&task, &step, &success(Decimal::new(30, 2), None)).expect("plan");
        assert_eq!(plan.outcome, SettleOutcome::Charged);
        assert_eq!(plan.task.accumulated_cost, Decimal::ONE);
    }

    #[test]
    fn failed_invocation_is_no_charge() {
        let planner = SettlementPlanner::default();
        let task = Task::new("summarize", Decimal::ONE);
        let step = step_for(&task);
        let result = InvocationResult::failure(InvocationFailureKind::Timeout, "timed out", 30_000);

        let plan = planner.plan(&task, &step, &result).expect("plan");

        assert_eq!(plan.outcome, SettleOutcome::NoCharge);
        assert_eq!(plan.step.failure_kind, Some(StepFailureKind::Timeout));
        assert!(plan.entries.is_empty());
    }

    #[test]
    fn terminal_step_is_a_duplicate() {
        let planner = SettlementPlanner::default();
        let task = Task::new("summarize", Decimal::ONE);
        let step = step_for(&task);
        let plan = planner.plan(&task, &step, &success(Decimal::new(30, 2), None)).expect("plan");

        let error = planner
            .plan(&plan.task, &plan.step, &success(Decimal::new(30, 2), None))
            .expect_err("second settle");
        assert_eq!(error, SettlementError::DuplicateStep(step.id));
    }

    #[test]
    fn platform_fee_entry_only_when_configured() {
        let planner = SettlementPlanner::new(SettlementPolicy {
            platform_fee_pct: Decimal::new(10, 0),
            ..SettlementPolicy::default()
        });
        let task = Task::new("summarize", Decimal::ONE);
        let step = step_for(&task);

        let plan = planner.plan(&task, &step, &success(Decimal::new(30, 2), None)).expect("plan");

        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[1].entry_type, EntryType::PlatformFee);
        assert_eq!(plan.entries[1].amount, Decimal::new(3, 2));
        assert_eq!(plan.task.accumulated_cost, Decimal::new(33, 2));
    }

    #[test]
    fn refund_cannot_exceed_charged_amount() {
        let planner = SettlementPlanner::default();
        let task = Task::new("summarize", Decimal::ONE);
        let step = step_for(&task);
        let plan = planner.plan(&task, &step, &success(Decimal::new(30, 2), None)).expect("plan");

        let refund = planner
            .plan_refund(&plan.task, &plan.step, Rail::Internal, Decimal::new(10, 2), "partial", Decimal::new(30, 2))
            .expect("refund");
        assert_eq!(refund.task.accumulated_cost, Decimal::new(20, 2));
        assert_eq!(refund.entry.entry_type, EntryType::Refund);

        let error = planner
            .plan_refund(&plan.task, &plan.step, Rail::External, Decimal::new(1, 2), "none", Decimal::ZERO)
            .expect_err("nothing charged externally");
        assert!(matches!(error, SettlementError::InvalidRefund(_)));
    }

    #[test]
    fn balance_load_raises_budget_on_open_tasks_only() {
        let planner = SettlementPlanner::default();
        let mut task = Task::new("summarize", Decimal::ONE);

        let plan = planner.plan_balance_load(&task, Decimal::new(50, 2), "top up").expect("load");
        assert_eq!(plan.task.max_budget, Decimal::new(150, 2));
        assert_eq!(plan.task.accumulated_cost, Decimal::ZERO);
        assert_eq!(plan.entry.rail, Rail::Internal);
        assert_eq!(plan.entry.entry_type, EntryType::BalanceLoad);
        assert_eq!(plan.entry.step_id, None);

        let error = planner.plan_balance_load(&task, Decimal::ZERO, "nothing").expect_err("zero");
        assert!(matches!(error, SettlementError::InvalidBalanceLoad(_)));

        task.complete().expect("complete");
        let error = planner.plan_balance_load(&task, Decimal::ONE, "late").expect_err("closed");
        assert_eq!(error, SettlementError::TaskClosed(task.id.clone()));
    }
}
