use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::invocation::InvocationFailureKind;
use crate::domain::task::TaskId;
use crate::errors::{DomainError, FailureReason};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a step ended in `failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureKind {
    Timeout,
    Unreachable,
    RejectedByAgent,
    ProtocolError,
    BudgetExceeded,
}

impl StepFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::RejectedByAgent => "rejected_by_agent",
            Self::ProtocolError => "protocol_error",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "timeout" => Some(Self::Timeout),
            "unreachable" => Some(Self::Unreachable),
            "rejected_by_agent" => Some(Self::RejectedByAgent),
            "protocol_error" => Some(Self::ProtocolError),
            "budget_exceeded" => Some(Self::BudgetExceeded),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Timeout => FailureReason::AgentTimeout,
            Self::Unreachable => FailureReason::AgentUnreachable,
            Self::RejectedByAgent => FailureReason::AgentRejected,
            Self::ProtocolError => FailureReason::ProtocolError,
            Self::BudgetExceeded => FailureReason::BudgetExceeded,
        }
    }
}

impl From<InvocationFailureKind> for StepFailureKind {
    fn from(value: InvocationFailureKind) -> Self {
        match value {
            InvocationFailureKind::Timeout => Self::Timeout,
            InvocationFailureKind::Unreachable => Self::Unreachable,
            InvocationFailureKind::RejectedByAgent => Self::RejectedByAgent,
            InvocationFailureKind::ProtocolError => Self::ProtocolError,
        }
    }
}

/// One agent invocation within a task. Mutated into a terminal state once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub skill: String,
    pub subtask: String,
    pub payload: Value,
    pub status: StepStatus,
    pub internal_cost: Decimal,
    pub external_cost: Decimal,
    pub requires_external_tool: bool,
    pub result: Option<String>,
    pub failure_kind: Option<StepFailureKind>,
    pub failure_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(
        task_id: TaskId,
        agent_id: AgentId,
        skill: impl Into<String>,
        subtask: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: StepId::generate(),
            task_id,
            agent_id,
            skill: skill.into(),
            subtask: subtask.into(),
            payload,
            status: StepStatus::Pending,
            internal_cost: Decimal::ZERO,
            external_cost: Decimal::ZERO,
            requires_external_tool: false,
            result: None,
            failure_kind: None,
            failure_message: None,
            duration_ms: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn total_cost(&self) -> Decimal {
        self.internal_cost + self.external_cost
    }

    pub fn start(&mut self) -> Result<(), DomainError> {
        if self.status != StepStatus::Pending {
            return Err(DomainError::InvalidStepTransition {
                from: self.status,
                to: StepStatus::InProgress,
            });
        }
        self.status = StepStatus::InProgress;
        Ok(())
    }

    pub fn complete(
        &mut self,
        result: impl Into<String>,
        internal_cost: Decimal,
        external_cost: Decimal,
        requires_external_tool: bool,
        duration_ms: u64,
    ) -> Result<(), DomainError> {
        self.ensure_open(StepStatus::Completed)?;
        self.status = StepStatus::Completed;
        self.result = Some(result.into());
        self.internal_cost = internal_cost;
        self.external_cost = external_cost;
        self.requires_external_tool = requires_external_tool;
        self.duration_ms = Some(duration_ms);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(
        &mut self,
        kind: StepFailureKind,
        message: impl Into<String>,
        duration_ms: Option<u64>,
    ) -> Result<(), DomainError> {
        self.ensure_open(StepStatus::Failed)?;
        self.status = StepStatus::Failed;
        self.failure_kind = Some(kind);
        self.failure_message = Some(message.into());
        self.duration_ms = duration_ms;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_open(&self, to: StepStatus) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::InvalidStepTransition { from: self.status, to });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{Step, StepFailureKind, StepStatus};
    use crate::domain::agent::AgentId;
    use crate::domain::task::TaskId;
    use crate::errors::DomainError;

    fn pending_step() -> Step {
        Step::new(
            TaskId("task-1".to_owned()),
            AgentId::new("summarizer"),
            "summarize",
            "summarize the article",
            json!({"task": "summarize the article"}),
        )
    }

    #[test]
    fn step_status_round_trips_from_storage_encoding() {
        for status in
            [StepStatus::Pending, StepStatus::InProgress, StepStatus::Completed, StepStatus::Failed]
        {
            assert_eq!(StepStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StepFailureKind::parse("TIMEOUT"), Some(StepFailureKind::Timeout));
    }

    #[test]
    fn completed_step_records_costs_and_is_terminal() {
        let mut step = pending_step();
        step.start().expect("pending -> in_progress");
        step.complete("done", Decimal::new(5, 2), Decimal::new(5, 2), true, 42)
            .expect("in_progress -> completed");

        assert!(step.is_terminal());
        assert_eq!(step.total_cost(), Decimal::new(10, 2));
        assert_eq!(step.duration_ms, Some(42));
    }

    #[test]
    fn terminal_step_cannot_be_mutated_again() {
        let mut step = pending_step();
        step.fail(StepFailureKind::Timeout, "timed out", Some(30_000)).expect("fail once");

        let error = step
            .complete("late", Decimal::ONE, Decimal::ZERO, false, 1)
            .expect_err("terminal step is immutable");
        assert_eq!(
            error,
            DomainError::InvalidStepTransition {
                from: StepStatus::Failed,
                to: StepStatus::Completed
            }
        );
        assert_eq!(step.failure_kind, Some(StepFailureKind::Timeout));
        assert_eq!(step.total_cost(), Decimal::ZERO);
    }
}
