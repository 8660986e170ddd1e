use bazaar_db::{AgentCatalogSeed, MarketplaceStore};
use serde_json::json;

use crate::commands::{open_migrated, prepare, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let store = MarketplaceStore::sql(pool.clone());

        let seeded = AgentCatalogSeed::load(store.agents.as_ref())
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = AgentCatalogSeed::verify(store.agents.as_ref())
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedOutput, CommandFailure> = if verification.all_passed {
            Ok(SeedOutput {
                inserted: seeded.inserted.into_iter().map(|id| id.0).collect(),
                skipped: seeded.skipped.into_iter().map(|id| id.0).collect(),
            })
        } else {
            let failed = verification.failures().map(|check| check.agent_id).collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => {
            let message = format!(
                "default agent catalog ready: {} inserted, {} already present",
                output.inserted.len(),
                output.skipped.len()
            );
            CommandResult::success_with(
                "seed",
                message,
                Some(json!({ "inserted": output.inserted, "skipped": output.skipped })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    inserted: Vec<String>,
    skipped: Vec<String>,
}

fn verification_message(failed_agents: &[&str]) -> String {
    if failed_agents.is_empty() {
        "Some catalog agents failed to load".to_string()
    } else {
        format!("Seed verification failed for agents: {}", failed_agents.join(", "))
    }
}
