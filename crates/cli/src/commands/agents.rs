use bazaar_core::domain::agent::Agent;
use bazaar_db::MarketplaceStore;
use serde::Serialize;

use crate::commands::{open_migrated, prepare, CommandResult};

#[derive(Debug, Serialize)]
struct AgentRow {
    id: String,
    name: String,
    skills: Vec<String>,
    base_price: String,
    dynamic_price: String,
    load: u8,
    available: bool,
    rating: String,
    jobs_completed: u64,
    endpoint: String,
}

impl From<Agent> for AgentRow {
    fn from(agent: Agent) -> Self {
        Self {
            id: agent.id.0,
            name: agent.name,
            skills: agent.skills,
            base_price: agent.base_price.to_string(),
            dynamic_price: agent.dynamic_price.to_string(),
            load: agent.load,
            available: agent.available,
            rating: agent.stats.rating.to_string(),
            jobs_completed: agent.stats.jobs_completed,
            endpoint: agent.endpoint,
        }
    }
}

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("agents") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let agents = MarketplaceStore::sql(pool.clone())
            .agents
            .list()
            .await
            .map_err(|error| ("agent_listing", error.to_string(), 6u8));
        pool.close().await;
        agents
    });

    match result {
        Ok(agents) => {
            let available = agents.iter().filter(|agent| agent.available).count();
            let message = format!("{} agents registered, {available} available", agents.len());
            let rows = agents.into_iter().map(AgentRow::from).collect::<Vec<_>>();
            CommandResult::success_with("agents", message, serde_json::to_value(rows).ok())
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("agents", error_class, message, exit_code)
        }
    }
}
