use sqlx::{sqlite::SqliteRow, Row};

use bazaar_core::domain::task::{TaskId, TaskStatus};
use bazaar_core::domain::turn::{ConversationTurn, TurnId};
use bazaar_core::ledger::CostBreakdown;

use super::{parse_decimal, parse_timestamp, RepositoryError, TurnRepository};
use crate::DbPool;

pub struct SqlTurnRepository {
    pool: DbPool,
}

impl SqlTurnRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TurnRepository for SqlTurnRepository {
    async fn append(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_turns (
                id,
                task_id,
                utterance,
                response,
                status,
                internal_total,
                external_total,
                total,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id.0)
        .bind(&turn.task_id.0)
        .bind(&turn.utterance)
        .bind(&turn.response)
        .bind(turn.status.as_str())
        .bind(turn.cost.internal_total.to_string())
        .bind(turn.cost.external_total.to_string())
        .bind(turn.cost.total.to_string())
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, task_id, utterance, response, status, internal_total, external_total,
                    total, created_at
             FROM conversation_turns
             WHERE task_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }
}

fn turn_from_row(row: SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    Ok(ConversationTurn {
        id: TurnId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        utterance: row.try_get("utterance")?,
        response: row.try_get("response")?,
        status,
        cost: CostBreakdown {
            internal_total: parse_decimal("internal_total", row.try_get("internal_total")?)?,
            external_total: parse_decimal("external_total", row.try_get("external_total")?)?,
            total: parse_decimal("total", row.try_get("total")?)?,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
