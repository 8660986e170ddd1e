use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use bazaar_core::domain::step::{StepFailureKind, StepId};
use bazaar_core::domain::task::TaskId;
use bazaar_core::ledger::{EntryType, LedgerEntry, LedgerEntryId, Rail};

use super::{
    is_unique_violation, parse_decimal, parse_timestamp, parse_u32, to_i64, LedgerRepository,
    RepositoryError, SettlementCommit,
};
use crate::DbPool;

const ENTRY_COLUMNS: &str = "id, task_id, step_id, sequence, rail, entry_type, amount,
    counterparty, memo, created_at, prev_hash, entry_hash, signature";

pub struct SqlLedgerRepository {
    pool: DbPool,
}

impl SqlLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LedgerRepository for SqlLedgerRepository {
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE task_id = ? ORDER BY sequence ASC"
        ))
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn list_for_step(&self, step_id: &StepId) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE step_id = ? ORDER BY sequence ASC"
        ))
        .bind(&step_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn last_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE task_id = ?
             ORDER BY sequence DESC LIMIT 1"
        ))
        .bind(&task_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn list_by_rail(
        &self,
        rail: Rail,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE rail = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(rail.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn commit_settlement(&self, commit: SettlementCommit) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let step = &commit.step;

        let updated = sqlx::query(
            "UPDATE task_steps SET
                status = ?,
                internal_cost = ?,
                external_cost = ?,
                requires_external_tool = ?,
                result = ?,
                failure_kind = ?,
                failure_message = ?,
                duration_ms = ?,
                completed_at = ?
             WHERE id = ? AND task_id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(step.status.as_str())
        .bind(step.internal_cost.to_string())
        .bind(step.external_cost.to_string())
        .bind(step.requires_external_tool)
        .bind(step.result.as_deref())
        .bind(step.failure_kind.as_ref().map(StepFailureKind::as_str))
        .bind(step.failure_message.as_deref())
        .bind(step.duration_ms.map(to_i64))
        .bind(step.completed_at.map(|value| value.to_rfc3339()))
        .bind(&step.id.0)
        .bind(&commit.task_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM task_steps WHERE id = ?)")
                    .bind(&step.id.0)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(if exists == 1 {
                RepositoryError::Conflict(format!("step {} is already settled", step.id))
            } else {
                RepositoryError::NotFound(format!("step {}", step.id))
            });
        }

        for entry in &commit.entries {
            insert_entry(&mut tx, entry).await?;
        }

        update_task_cost(&mut tx, &commit.task_id, commit.accumulated_cost).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_refund(
        &self,
        entry: LedgerEntry,
        accumulated_cost: Decimal,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_entry(&mut tx, &entry).await?;
        update_task_cost(&mut tx, &entry.task_id, accumulated_cost).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_balance_load(
        &self,
        entry: LedgerEntry,
        max_budget: Decimal,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_entry(&mut tx, &entry).await?;
        let updated = sqlx::query("UPDATE tasks SET max_budget = ? WHERE id = ?")
            .bind(max_budget.to_string())
            .bind(&entry.task_id.0)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound(format!("task {}", entry.task_id)));
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &LedgerEntry,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO ledger_entries (
            id,
            task_id,
            step_id,
            sequence,
            rail,
            entry_type,
            amount,
            counterparty,
            memo,
            created_at,
            prev_hash,
            entry_hash,
            signature
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id.0)
    .bind(&entry.task_id.0)
    .bind(entry.step_id.as_ref().map(|id| id.0.as_str()))
    .bind(i64::from(entry.sequence))
    .bind(entry.rail.as_str())
    .bind(entry.entry_type.as_str())
    .bind(entry.amount.to_string())
    .bind(&entry.counterparty)
    .bind(&entry.memo)
    .bind(entry.created_at.to_rfc3339())
    .bind(entry.prev_hash.as_deref())
    .bind(&entry.entry_hash)
    .bind(&entry.signature)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(error) if is_unique_violation(&error) => Err(RepositoryError::SequenceConflict {
            task_id: entry.task_id.clone(),
            sequence: entry.sequence,
        }),
        Err(error) => Err(error.into()),
    }
}

async fn update_task_cost(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &TaskId,
    accumulated_cost: Decimal,
) -> Result<(), RepositoryError> {
    let updated = sqlx::query("UPDATE tasks SET accumulated_cost = ? WHERE id = ?")
        .bind(accumulated_cost.to_string())
        .bind(&task_id.0)
        .execute(&mut **tx)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("task {task_id}")));
    }
    Ok(())
}

fn entry_from_row(row: SqliteRow) -> Result<LedgerEntry, RepositoryError> {
    let rail_raw = row.try_get::<String, _>("rail")?;
    let rail = Rail::parse(&rail_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown rail `{rail_raw}`")))?;
    let type_raw = row.try_get::<String, _>("entry_type")?;
    let entry_type = EntryType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entry type `{type_raw}`")))?;

    Ok(LedgerEntry {
        id: LedgerEntryId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        step_id: row.try_get::<Option<String>, _>("step_id")?.map(StepId),
        sequence: parse_u32("sequence", row.try_get("sequence")?)?,
        rail,
        entry_type,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        counterparty: row.try_get("counterparty")?,
        memo: row.try_get("memo")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
        signature: row.try_get("signature")?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use bazaar_core::domain::agent::AgentId;
    use bazaar_core::domain::step::{Step, StepStatus};
    use bazaar_core::domain::task::Task;
    use bazaar_core::ledger::{CostBreakdown, EntryType, LedgerEntryDraft, LedgerSealer, Rail};

    use super::SqlLedgerRepository;
    use crate::repositories::{
        LedgerRepository, RepositoryError, SettlementCommit, SqlStepRepository,
        SqlTaskRepository, StepRepository, TaskRepository,
    };
    use crate::test_support::setup_pool;

    async fn seeded(pool: &crate::DbPool) -> (Task, Step) {
        let task = Task::new("search the web", Decimal::ONE);
        SqlTaskRepository::new(pool.clone()).save(task.clone()).await.expect("save task");
        let step = Step::new(
            task.id.clone(),
            AgentId::new("search"),
            "search",
            "find rust news",
            json!({"task": "find rust news"}),
        );
        SqlStepRepository::new(pool.clone()).save(step.clone()).await.expect("save step");
        (task, step)
    }

    #[tokio::test]
    async fn commit_settlement_lands_step_entries_and_cost_together() {
        let pool = setup_pool().await;
        let (task, mut step) = seeded(&pool).await;
        let repo = SqlLedgerRepository::new(pool.clone());
        let sealer = LedgerSealer::new("test-key");

        step.start().expect("start");
        step.complete("results", Decimal::new(5, 2), Decimal::new(5, 2), true, 40)
            .expect("complete");
        let entries = sealer.seal(
            &task.id,
            None,
            vec![
                LedgerEntryDraft {
                    step_id: Some(step.id.clone()),
                    rail: Rail::Internal,
                    entry_type: EntryType::AgentPayment,
                    amount: Decimal::new(5, 2),
                    counterparty: "search".to_string(),
                    memo: "find rust news".to_string(),
                },
                LedgerEntryDraft {
                    step_id: Some(step.id.clone()),
                    rail: Rail::External,
                    entry_type: EntryType::CardSpend,
                    amount: Decimal::new(5, 2),
                    counterparty: "card_rail".to_string(),
                    memo: "find rust news".to_string(),
                },
            ],
        );

        repo.commit_settlement(SettlementCommit {
            step: step.clone(),
            task_id: task.id.clone(),
            accumulated_cost: Decimal::new(10, 2),
            entries: entries.clone(),
        })
        .await
        .expect("commit settlement");

        let stored = repo.list_for_task(&task.id).await.expect("list entries");
        assert_eq!(stored, entries);
        assert!(sealer.verify_chain(&task.id, &stored).valid);
        assert_eq!(CostBreakdown::from_entries(&stored).total, Decimal::new(10, 2));

        let stored_task = SqlTaskRepository::new(pool.clone())
            .find_by_id(&task.id)
            .await
            .expect("find task")
            .expect("task exists");
        assert_eq!(stored_task.accumulated_cost, Decimal::new(10, 2));

        let stored_step = SqlStepRepository::new(pool.clone())
            .find_by_id(&step.id)
            .await
            .expect("find step")
            .expect("step exists");
        assert_eq!(stored_step.status, StepStatus::Completed);
        assert_eq!(repo.list_for_step(&step.id).await.expect("by step").len(), 2);
        assert_eq!(
            repo.last_for_task(&task.id).await.expect("last").map(|entry| entry.sequence),
            Some(2)
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn second_commit_for_same_step_is_a_conflict_and_charges_nothing() {
        let pool = setup_pool().await;
        let (task, mut step) = seeded(&pool).await;
        let repo = SqlLedgerRepository::new(pool.clone());
        let sealer = LedgerSealer::new("test-key");

        step.start().expect("start");
        step.complete("ok", Decimal::new(30, 2), Decimal::ZERO, false, 5).expect("complete");
        let draft = LedgerEntryDraft {
            step_id: Some(step.id.clone()),
            rail: Rail::Internal,
            entry_type: EntryType::AgentPayment,
            amount: Decimal::new(30, 2),
            counterparty: "search".to_string(),
            memo: String::new(),
        };
        let first = sealer.seal(&task.id, None, vec![draft.clone()]);
        repo.commit_settlement(SettlementCommit {
            step: step.clone(),
            task_id: task.id.clone(),
            accumulated_cost: Decimal::new(30, 2),
            entries: first.clone(),
        })
        .await
        .expect("first commit");

        let second = sealer.seal(&task.id, first.last(), vec![draft]);
        let error = repo
            .commit_settlement(SettlementCommit {
                step,
                task_id: task.id.clone(),
                accumulated_cost: Decimal::new(60, 2),
                entries: second,
            })
            .await
            .expect_err("duplicate settlement");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let stored = repo.list_for_task(&task.id).await.expect("list entries");
        assert_eq!(stored.len(), 1);
        let stored_task = SqlTaskRepository::new(pool.clone())
            .find_by_id(&task.id)
            .await
            .expect("find task")
            .expect("task exists");
        assert_eq!(stored_task.accumulated_cost, Decimal::new(30, 2));

        pool.close().await;
    }

    #[tokio::test]
    async fn ledger_rows_reject_updates() {
        let pool = setup_pool().await;
        let (task, mut step) = seeded(&pool).await;
        let repo = SqlLedgerRepository::new(pool.clone());
        step.start().expect("start");
        step.complete("ok", Decimal::new(5, 2), Decimal::ZERO, false, 5).expect("complete");
        let entries = LedgerSealer::new("k").seal(
            &task.id,
            None,
            vec![LedgerEntryDraft {
                step_id: Some(step.id.clone()),
                rail: Rail::Internal,
                entry_type: EntryType::AgentPayment,
                amount: Decimal::new(5, 2),
                counterparty: "search".to_string(),
                memo: String::new(),
            }],
        );
        repo.commit_settlement(SettlementCommit {
            step,
            task_id: task.id.clone(),
            accumulated_cost: Decimal::new(5, 2),
            entries,
        })
        .await
        .expect("commit");

        let result = sqlx::query("UPDATE ledger_entries SET amount = '0' WHERE task_id = ?")
            .bind(&task.id.0)
            .execute(&pool)
            .await;
        assert!(result.is_err(), "append-only trigger should abort updates");

        pool.close().await;
    }

    #[tokio::test]
    async fn reused_sequence_is_reported_separately_from_settled_steps() {
        let pool = setup_pool().await;
        let (task, _step) = seeded(&pool).await;
        let repo = SqlLedgerRepository::new(pool.clone());
        let sealer = LedgerSealer::new("k");
        let refund = LedgerEntryDraft {
            step_id: None,
            rail: Rail::Internal,
            entry_type: EntryType::Refund,
            amount: Decimal::new(1, 2),
            counterparty: "platform".to_string(),
            memo: "goodwill".to_string(),
        };

        let first = sealer.seal(&task.id, None, vec![refund.clone()]);
        repo.commit_refund(first[0].clone(), Decimal::ZERO).await.expect("first refund");

        let stale = sealer.seal(&task.id, None, vec![refund]);
        let error = repo
            .commit_refund(stale[0].clone(), Decimal::ZERO)
            .await
            .expect_err("sequence reused");
        assert!(matches!(
            error,
            RepositoryError::SequenceConflict { ref task_id, sequence: 1 } if *task_id == task.id
        ));

        pool.close().await;
    }

    #[tokio::test]
    async fn rail_listing_spans_tasks_newest_first() {
        let pool = setup_pool().await;
        let (first_task, _) = seeded(&pool).await;
        let (second_task, _) = seeded(&pool).await;
        let repo = SqlLedgerRepository::new(pool.clone());
        let sealer = LedgerSealer::new("k");
        let draft = |rail: Rail, entry_type: EntryType| LedgerEntryDraft {
            step_id: None,
            rail,
            entry_type,
            amount: Decimal::new(2, 2),
            counterparty: "platform".to_string(),
            memo: String::new(),
        };

        let older = sealer.seal(&first_task.id, None, vec![draft(Rail::External, EntryType::BalanceLoad)]);
        repo.commit_balance_load(older[0].clone(), Decimal::new(102, 2)).await.expect("older");
        let internal = sealer.seal(&second_task.id, None, vec![draft(Rail::Internal, EntryType::Refund)]);
        repo.commit_refund(internal[0].clone(), Decimal::ZERO).await.expect("internal");
        let newer =
            sealer.seal(&second_task.id, internal.last(), vec![draft(Rail::External, EntryType::BalanceLoad)]);
        repo.commit_balance_load(newer[0].clone(), Decimal::new(102, 2)).await.expect("newer");

        let external = repo.list_by_rail(Rail::External, 10).await.expect("external");
        let ids: Vec<_> = external.iter().map(|entry| entry.id.clone()).collect();
        assert_eq!(ids, vec![newer[0].id.clone(), older[0].id.clone()]);
        assert_eq!(repo.list_by_rail(Rail::External, 1).await.expect("limited").len(), 1);
        assert_eq!(repo.list_by_rail(Rail::Internal, 10).await.expect("internal").len(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn balance_load_raises_budget_and_leaves_cost_alone() {
        let pool = setup_pool().await;
        let (task, _) = seeded(&pool).await;
        let repo = SqlLedgerRepository::new(pool.clone());
        let entry = LedgerSealer::new("k").seal(
            &task.id,
            None,
            vec![LedgerEntryDraft {
                step_id: None,
                rail: Rail::External,
                entry_type: EntryType::BalanceLoad,
                amount: Decimal::new(50, 2),
                counterparty: "customer_wallet".to_string(),
                memo: "top up".to_string(),
            }],
        );

        repo.commit_balance_load(entry[0].clone(), Decimal::new(150, 2)).await.expect("load");

        let stored = SqlTaskRepository::new(pool.clone())
            .find_by_id(&task.id)
            .await
            .expect("find task")
            .expect("task exists");
        assert_eq!(stored.max_budget, Decimal::new(150, 2));
        assert_eq!(stored.accumulated_cost, Decimal::ZERO);
        assert_eq!(repo.list_for_task(&task.id).await.expect("list"), entry);

        pool.close().await;
    }
}
