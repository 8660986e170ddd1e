use sqlx::{sqlite::SqliteRow, Row};

use bazaar_core::domain::task::{Task, TaskId, TaskStatus};
use bazaar_core::errors::FailureReason;

use super::{
    parse_decimal, parse_json, parse_optional_timestamp, parse_timestamp, RepositoryError,
    TaskRepository,
};
use crate::DbPool;

const TASK_COLUMNS: &str = "id, utterance, required_skills_json, status, max_budget,
    accumulated_cost, failure_reason, created_at, completed_at";

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(task_from_row).transpose()
    }

    async fn save(&self, task: Task) -> Result<(), RepositoryError> {
        let skills_json = serde_json::to_string(&task.required_skills)
            .map_err(|error| RepositoryError::Decode(format!("skills encode: {error}")))?;

        sqlx::query(
            "INSERT INTO tasks (
                id,
                utterance,
                required_skills_json,
                status,
                max_budget,
                accumulated_cost,
                failure_reason,
                created_at,
                completed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                required_skills_json = excluded.required_skills_json,
                status = excluded.status,
                failure_reason = excluded.failure_reason,
                completed_at = excluded.completed_at",
        )
        .bind(&task.id.0)
        .bind(&task.utterance)
        .bind(skills_json)
        .bind(task.status.as_str())
        .bind(task.max_budget.to_string())
        .bind(task.accumulated_cost.to_string())
        .bind(task.failure_reason.as_ref().map(FailureReason::as_str))
        .bind(task.created_at.to_rfc3339())
        .bind(task.completed_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }
}

fn task_from_row(row: SqliteRow) -> Result<Task, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    let failure_reason = row
        .try_get::<Option<String>, _>("failure_reason")?
        .map(|value| {
            FailureReason::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown failure reason `{value}`")))
        })
        .transpose()?;

    let skills_json = row.try_get::<String, _>("required_skills_json")?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        utterance: row.try_get("utterance")?,
        required_skills: parse_json("required_skills_json", &skills_json)?,
        status,
        max_budget: parse_decimal("max_budget", row.try_get("max_budget")?)?,
        accumulated_cost: parse_decimal("accumulated_cost", row.try_get("accumulated_cost")?)?,
        failure_reason,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}
