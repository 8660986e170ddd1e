use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use bazaar_agent::registry::AgentRegistry;
use bazaar_db::DbPool;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    registry: Arc<AgentRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub agents: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, registry: Arc<AgentRegistry>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, registry })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let agents = agents_check(&state.registry).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "bazaar-server runtime initialized".to_string(),
        },
        database,
        agents,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn agents_check(registry: &AgentRegistry) -> HealthCheck {
    let agents = registry.list().await;
    let available = agents.iter().filter(|agent| agent.available).count();
    HealthCheck {
        status: if available > 0 { "ready" } else { "degraded" },
        detail: format!("{available} of {} agents available", agents.len()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use bazaar_agent::registry::AgentRegistry;
    use bazaar_core::domain::agent::Agent;
    use bazaar_db::{connect_with_settings, MarketplaceStore};
    use rust_decimal::Decimal;

    use crate::health::{health, HealthState};

    async fn registry_with(agents: Vec<Agent>) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new(MarketplaceStore::in_memory().agents));
        for agent in agents {
            registry.register(agent).await.expect("register");
        }
        registry
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let registry = registry_with(vec![Agent::new(
            "search",
            "Search",
            vec!["search".to_owned()],
            Decimal::new(8, 2),
            "http://search.invalid",
        )])
        .await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), registry })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.agents.detail, "1 of 1 agents available");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, registry: registry_with(Vec::new()).await }))
                .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.agents.status, "degraded");
    }
}
