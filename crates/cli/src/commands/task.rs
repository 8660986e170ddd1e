use bazaar_core::domain::task::TaskId;
use bazaar_core::ledger::{CostBreakdown, LedgerSealer};
use bazaar_db::MarketplaceStore;
use secrecy::ExposeSecret;
use serde_json::json;

use crate::commands::{open_migrated, prepare, CommandFailure, CommandResult};

pub fn run(task_id: &str) -> CommandResult {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return CommandResult::failure("task", "invalid_argument", "task id must not be empty", 2);
    }

    let (config, runtime) = match prepare("task") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let sealer = LedgerSealer::new(config.ledger.signing_key.expose_secret());
    let task_id = TaskId(task_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let store = MarketplaceStore::sql(pool.clone());
        let report = inspect(&store, &sealer, &task_id).await;
        pool.close().await;
        report
    });

    match result {
        Ok((message, data)) => CommandResult::success_with("task", message, Some(data)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("task", error_class, message, exit_code)
        }
    }
}

async fn inspect(
    store: &MarketplaceStore,
    sealer: &LedgerSealer,
    task_id: &TaskId,
) -> Result<(String, serde_json::Value), CommandFailure> {
    let query_failed = |error: bazaar_db::RepositoryError| ("task_query", error.to_string(), 6u8);

    let task = store
        .tasks
        .find_by_id(task_id)
        .await
        .map_err(query_failed)?
        .ok_or_else(|| ("task_not_found", format!("task `{task_id}` does not exist"), 7u8))?;
    let steps = store.steps.list_for_task(task_id).await.map_err(query_failed)?;
    let entries = store.ledger.list_for_task(task_id).await.map_err(query_failed)?;

    let cost = CostBreakdown::from_entries(&entries);
    let verification = sealer.verify_chain(task_id, &entries);
    let message = format!(
        "task {} is {} with {} step(s), total cost {} ({})",
        task.id,
        task.status.as_str(),
        steps.len(),
        cost.total,
        if verification.valid { "ledger verified" } else { "LEDGER VERIFICATION FAILED" }
    );

    Ok((
        message,
        json!({
            "task": task,
            "steps": steps,
            "cost_breakdown": cost,
            "ledger_entries": entries.len(),
            "ledger_verification": verification,
        }),
    ))
}
