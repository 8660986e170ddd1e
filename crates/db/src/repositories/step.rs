use sqlx::{sqlite::SqliteRow, Row};

use bazaar_core::domain::agent::AgentId;
use bazaar_core::domain::step::{Step, StepFailureKind, StepId, StepStatus};
use bazaar_core::domain::task::TaskId;

use super::{
    parse_decimal, parse_json, parse_optional_timestamp, parse_timestamp, parse_u64, to_i64,
    RepositoryError, StepRepository,
};
use crate::DbPool;

pub(crate) const STEP_COLUMNS: &str = "id, task_id, agent_id, skill, subtask, payload_json,
    status, internal_cost, external_cost, requires_external_tool, result, failure_kind,
    failure_message, duration_ms, created_at, completed_at";

/// Upsert that leaves terminal rows untouched.
pub(crate) const UPSERT_STEP_SQL: &str = "INSERT INTO task_steps (
        id,
        task_id,
        agent_id,
        skill,
        subtask,
        payload_json,
        status,
        internal_cost,
        external_cost,
        requires_external_tool,
        result,
        failure_kind,
        failure_message,
        duration_ms,
        created_at,
        completed_at
     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(id) DO UPDATE SET
        status = excluded.status,
        internal_cost = excluded.internal_cost,
        external_cost = excluded.external_cost,
        requires_external_tool = excluded.requires_external_tool,
        result = excluded.result,
        failure_kind = excluded.failure_kind,
        failure_message = excluded.failure_message,
        duration_ms = excluded.duration_ms,
        completed_at = excluded.completed_at
     WHERE task_steps.status NOT IN ('completed', 'failed')";

pub struct SqlStepRepository {
    pool: DbPool,
}

impl SqlStepRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StepRepository for SqlStepRepository {
    async fn find_by_id(&self, id: &StepId) -> Result<Option<Step>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {STEP_COLUMNS} FROM task_steps WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(step_from_row).transpose()
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM task_steps WHERE task_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(step_from_row).collect()
    }

    async fn save(&self, step: Step) -> Result<(), RepositoryError> {
        bind_step(sqlx::query(UPSERT_STEP_SQL), &step)?.execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn bind_step<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    step: &Step,
) -> Result<sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>, RepositoryError>
{
    let payload_json = serde_json::to_string(&step.payload)
        .map_err(|error| RepositoryError::Decode(format!("payload encode: {error}")))?;

    Ok(query
        .bind(step.id.0.clone())
        .bind(step.task_id.0.clone())
        .bind(step.agent_id.0.clone())
        .bind(step.skill.clone())
        .bind(step.subtask.clone())
        .bind(payload_json)
        .bind(step.status.as_str())
        .bind(step.internal_cost.to_string())
        .bind(step.external_cost.to_string())
        .bind(step.requires_external_tool)
        .bind(step.result.clone())
        .bind(step.failure_kind.as_ref().map(StepFailureKind::as_str))
        .bind(step.failure_message.clone())
        .bind(step.duration_ms.map(to_i64))
        .bind(step.created_at.to_rfc3339())
        .bind(step.completed_at.map(|value| value.to_rfc3339())))
}

pub(crate) fn step_from_row(row: SqliteRow) -> Result<Step, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = StepStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_raw}`")))?;

    let failure_kind = row
        .try_get::<Option<String>, _>("failure_kind")?
        .map(|value| {
            StepFailureKind::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown failure kind `{value}`")))
        })
        .transpose()?;

    let payload_json = row.try_get::<String, _>("payload_json")?;

    Ok(Step {
        id: StepId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        skill: row.try_get("skill")?,
        subtask: row.try_get("subtask")?,
        payload: parse_json("payload_json", &payload_json)?,
        status,
        internal_cost: parse_decimal("internal_cost", row.try_get("internal_cost")?)?,
        external_cost: parse_decimal("external_cost", row.try_get("external_cost")?)?,
        requires_external_tool: row.try_get("requires_external_tool")?,
        result: row.try_get("result")?,
        failure_kind,
        failure_message: row.try_get("failure_message")?,
        duration_ms: row
            .try_get::<Option<i64>, _>("duration_ms")?
            .map(|value| parse_u64("duration_ms", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}
