use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use bazaar_core::domain::agent::{Agent, AgentId};
use bazaar_core::domain::step::{Step, StepId};
use bazaar_core::domain::task::{Task, TaskId};
use bazaar_core::domain::turn::ConversationTurn;
use bazaar_core::ledger::{LedgerEntry, Rail};

pub mod agent;
pub mod ledger;
pub mod memory;
pub mod step;
pub mod task;
pub mod turn;

pub use agent::SqlAgentRepository;
pub use ledger::SqlLedgerRepository;
pub use memory::InMemoryStore;
pub use step::SqlStepRepository;
pub use task::SqlTaskRepository;
pub use turn::SqlTurnRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("ledger sequence {sequence} already used for task {task_id}")]
    SequenceConflict { task_id: TaskId, sequence: u32 },
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Agent>, RepositoryError>;
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn save(&self, agent: Agent) -> Result<(), RepositoryError>;
}

/// Task rows. `accumulated_cost` and `max_budget` are written on insert
/// only; afterwards they move exclusively through [`LedgerRepository`]
/// commits.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError>;
    async fn save(&self, task: Task) -> Result<(), RepositoryError>;
    async fn list_recent(&self, limit: u32) -> Result<Vec<Task>, RepositoryError>;
}

/// Step rows. Saving over a terminal step is a no-op at the storage layer.
#[async_trait]
pub trait StepRepository: Send + Sync {
    async fn find_by_id(&self, id: &StepId) -> Result<Option<Step>, RepositoryError>;
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<Step>, RepositoryError>;
    async fn save(&self, step: Step) -> Result<(), RepositoryError>;
}

/// A settlement outcome that must land as one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementCommit {
    pub step: Step,
    pub task_id: TaskId,
    pub accumulated_cost: Decimal,
    pub entries: Vec<LedgerEntry>,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<LedgerEntry>, RepositoryError>;
    async fn list_for_step(&self, step_id: &StepId) -> Result<Vec<LedgerEntry>, RepositoryError>;
    async fn last_for_task(&self, task_id: &TaskId)
        -> Result<Option<LedgerEntry>, RepositoryError>;

    /// Entries on `rail` across every task, newest first.
    async fn list_by_rail(&self, rail: Rail, limit: u32)
        -> Result<Vec<LedgerEntry>, RepositoryError>;

    /// Terminal step update, its entries and the task cost, atomically.
    /// Fails with `Conflict` when the step is already terminal and with
    /// `SequenceConflict` when another writer took one of the sequences.
    async fn commit_settlement(&self, commit: SettlementCommit) -> Result<(), RepositoryError>;

    /// Appends a refund entry and lowers the task cost, atomically.
    async fn commit_refund(
        &self,
        entry: LedgerEntry,
        accumulated_cost: Decimal,
    ) -> Result<(), RepositoryError>;

    /// Appends a balance load entry and raises the task budget, atomically.
    async fn commit_balance_load(
        &self,
        entry: LedgerEntry,
        max_budget: Decimal,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TurnRepository: Send + Sync {
    async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError>;
    async fn list_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value.trim()).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u64): {value}"
        ))
    })
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().map(|db_error| db_error.is_unique_violation()).unwrap_or(false)
}
