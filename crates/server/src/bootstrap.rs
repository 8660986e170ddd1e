use std::sync::Arc;

use bazaar_agent::gateway::{GatewayError, HttpInvocationGateway, InvocationGateway};
use bazaar_agent::orchestrator::{OrchestratorSettings, TaskOrchestrator};
use bazaar_agent::reasoning::{build_reasoner, ReasoningError};
use bazaar_agent::registry::{AgentRegistry, RegistryError};
use bazaar_agent::settlement::SettlementEngine;
use bazaar_core::audit::{AuditEvent, AuditSink};
use bazaar_core::ledger::Rail;
use bazaar_core::config::{AppConfig, ConfigError};
use bazaar_core::ledger::LedgerSealer;
use bazaar_core::settlement::SettlementPolicy;
use bazaar_db::repositories::RepositoryError;
use bazaar_db::{connect_with_settings, migrations, AgentCatalogSeed, DbPool, MarketplaceStore};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<AgentRegistry>,
    pub gateway: Arc<dyn InvocationGateway>,
    pub orchestrator: Arc<TaskOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent catalog seeding failed: {0}")]
    Seed(#[source] RepositoryError),
    #[error("agent registry failed to load: {0}")]
    Registry(#[from] RegistryError),
    #[error("invocation gateway could not be built: {0}")]
    Gateway(#[from] GatewayError),
    #[error("reasoning collaborator could not be built: {0}")]
    Reasoning(#[from] ReasoningError),
}

/// Forwards audit events into the structured log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = "audit.event",
            audit_event_id = %event.event_id,
            audit_event_type = %event.event_type,
            audit_category = event.category.as_str(),
            audit_outcome = event.outcome.as_str(),
            task_id = event.task_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            step_id = event.step_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            internal_amount = %event.rail_total(Rail::Internal),
            external_amount = %event.rail_total(Rail::External),
            actor = %event.actor,
            detail = ?event.detail,
            "audit event"
        );
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = MarketplaceStore::sql(db_pool.clone());
    if config.registry.seed_defaults {
        let seeded =
            AgentCatalogSeed::load(store.agents.as_ref()).await.map_err(BootstrapError::Seed)?;
        info!(
            event_name = "system.bootstrap.catalog_seeded",
            correlation_id = "bootstrap",
            inserted = ?seeded.inserted,
            skipped = ?seeded.skipped,
            "default agent catalog ensured"
        );
    }

    let registry = Arc::new(AgentRegistry::new(store.agents.clone()));
    let agent_count = registry.load_from_store().await?;

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let settlement = Arc::new(SettlementEngine::new(
        store.clone(),
        SettlementPolicy {
            platform_fee_pct: config.settlement.platform_fee_pct,
            external_counterparty: config.settlement.external_counterparty.clone(),
        },
        LedgerSealer::new(config.ledger.signing_key.expose_secret()),
        audit.clone(),
    ));
    let gateway: Arc<dyn InvocationGateway> = Arc::new(HttpInvocationGateway::new()?);
    let reasoner = build_reasoner(&config.reasoning)?;

    let orchestrator = Arc::new(TaskOrchestrator::new(
        store,
        registry.clone(),
        gateway.clone(),
        settlement,
        reasoner.clone(),
        audit,
        OrchestratorSettings::from_config(&config),
    ));
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        agent_count,
        reasoning_provider = reasoner.name(),
        "orchestrator ready"
    );

    Ok(Application { config, db_pool, registry, gateway, orchestrator })
}

#[cfg(test)]
mod tests {
    use bazaar_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    #[tokio::test]
    async fn bootstrap_reports_unreachable_database() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite:///definitely/missing/dir/bazaar.db".to_string();

        let result = bootstrap_with_config(config).await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }

    #[tokio::test]
    async fn bootstrap_seeds_catalog_and_loads_registry() {
        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                health_probe_interval_secs: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("default config should validate");
        let app = bootstrap_with_config(config).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('agents', 'tasks', 'task_steps', 'ledger_entries', 'conversation_turns')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 5);

        let agents = app.registry.list().await;
        assert_eq!(agents.len(), 6);
        assert!(agents.iter().any(|agent| agent.id.0 == "summarizer"));
        assert!(!app.orchestrator.list_agents().await.is_empty());

        app.db_pool.close().await;
    }
}
