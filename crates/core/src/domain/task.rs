use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, FailureReason};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::InProgress)
                | (Self::Created, Self::Completed)
                | (Self::Created, Self::Failed)
                | (Self::InProgress, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

/// A unit of work spanning one or more turns, bounded by `max_budget`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub utterance: String,
    pub required_skills: Vec<String>,
    pub status: TaskStatus,
    pub max_budget: Decimal,
    pub accumulated_cost: Decimal,
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(utterance: impl Into<String>, max_budget: Decimal) -> Self {
        Self {
            id: TaskId::generate(),
            utterance: utterance.into(),
            required_skills: Vec::new(),
            status: TaskStatus::Created,
            max_budget,
            accumulated_cost: Decimal::ZERO,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn remaining_budget(&self) -> Decimal {
        (self.max_budget - self.accumulated_cost).max(Decimal::ZERO)
    }

    /// Whether charging `amount` on top of the current cost stays within budget.
    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.accumulated_cost + amount <= self.max_budget
    }

    pub fn add_required_skill(&mut self, skill: &str) {
        let skill = skill.trim().to_ascii_lowercase();
        if !skill.is_empty() && !self.required_skills.contains(&skill) {
            self.required_skills.push(skill);
        }
    }

    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTaskTransition { from: self.status, to: next });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DomainError> {
        if self.status == TaskStatus::InProgress {
            return Ok(());
        }
        self.transition_to(TaskStatus::InProgress)
    }

    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.transition_to(TaskStatus::Completed)
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<(), DomainError> {
        self.transition_to(TaskStatus::Failed)?;
        self.failure_reason = Some(reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Task, TaskStatus};
    use crate::errors::{DomainError, FailureReason};

    #[test]
    fn task_status_round_trips_from_storage_encoding() {
        for status in [
            TaskStatus::Created,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn lifecycle_follows_transition_table() {
        let mut task = Task::new("summarize this", Decimal::ONE);
        task.start().expect("created -> in_progress");
        task.start().expect("in_progress is re-entrant");
        task.complete().expect("in_progress -> completed");

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn terminal_tasks_reject_further_transitions() {
        let mut task = Task::new("translate", Decimal::ONE);
        task.fail(FailureReason::BudgetExceeded).expect("created -> failed");

        let error = task.start().expect_err("failed is terminal");
        assert_eq!(
            error,
            DomainError::InvalidTaskTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::InProgress
            }
        );
        assert_eq!(task.failure_reason, Some(FailureReason::BudgetExceeded));
    }

    #[test]
    fn budget_helpers_compare_inclusively() {
        let mut task = Task::new("search", Decimal::new(50, 2));
        task.accumulated_cost = Decimal::new(30, 2);

        assert!(task.can_afford(Decimal::new(20, 2)));
        assert!(!task.can_afford(Decimal::new(21, 2)));
        assert_eq!(task.remaining_budget(), Decimal::new(20, 2));
    }

    #[test]
    fn required_skills_are_normalized_and_deduplicated() {
        let mut task = Task::new("multi", Decimal::ONE);
        task.add_required_skill("Summarize");
        task.add_required_skill(" summarize ");
        task.add_required_skill("");

        assert_eq!(task.required_skills, vec!["summarize".to_owned()]);
    }
}
