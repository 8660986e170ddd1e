use bazaar_core::ledger::{LedgerEntry, Rail};
use bazaar_db::MarketplaceStore;
use serde_json::json;

use crate::commands::{open_migrated, prepare, CommandFailure, CommandResult};

pub fn run(rail: &str, limit: u32) -> CommandResult {
    let Some(rail) = Rail::parse(rail) else {
        return CommandResult::failure(
            "ledger",
            "invalid_argument",
            format!("unknown rail `{}`, expected internal or external", rail.trim()),
            2,
        );
    };
    if limit == 0 {
        return CommandResult::failure("ledger", "invalid_argument", "limit must be at least 1", 2);
    }

    let (config, runtime) = match prepare("ledger") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let store = MarketplaceStore::sql(pool.clone());
        let entries = list(&store, rail, limit).await;
        pool.close().await;
        entries
    });

    match result {
        Ok(entries) => {
            let net: rust_decimal::Decimal = entries.iter().map(LedgerEntry::signed_amount).sum();
            let message = format!(
                "{} entr{} on the {} rail, net cost {}",
                entries.len(),
                if entries.len() == 1 { "y" } else { "ies" },
                rail.as_str(),
                net
            );
            CommandResult::success_with(
                "ledger",
                message,
                Some(json!({ "rail": rail, "net_cost": net, "entries": entries })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ledger", error_class, message, exit_code)
        }
    }
}

async fn list(
    store: &MarketplaceStore,
    rail: Rail,
    limit: u32,
) -> Result<Vec<LedgerEntry>, CommandFailure> {
    store
        .ledger
        .list_by_rail(rail, limit)
        .await
        .map_err(|error| ("ledger_query", error.to_string(), 6u8))
}
