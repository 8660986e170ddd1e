use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use bazaar_core::domain::agent::{Agent, AgentId, AgentStats, MAX_LOAD};

use super::{parse_decimal, parse_json, parse_u64, to_i64, AgentRepository, RepositoryError};
use crate::DbPool;

const AGENT_COLUMNS: &str = "id, name, description, skills_json, base_price, dynamic_price, load,
    endpoint, available, jobs_completed, avg_latency_ms, rating";

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn list(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(agent_from_row).collect()
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(agent_from_row).transpose()
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let skills_json = serde_json::to_string(&agent.skills)
            .map_err(|error| RepositoryError::Decode(format!("skills encode: {error}")))?;

        sqlx::query(
            "INSERT INTO agents (
                id,
                name,
                description,
                skills_json,
                base_price,
                dynamic_price,
                load,
                endpoint,
                available,
                jobs_completed,
                avg_latency_ms,
                rating,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                skills_json = excluded.skills_json,
                base_price = excluded.base_price,
                dynamic_price = excluded.dynamic_price,
                load = excluded.load,
                endpoint = excluded.endpoint,
                available = excluded.available,
                jobs_completed = excluded.jobs_completed,
                avg_latency_ms = excluded.avg_latency_ms,
                rating = excluded.rating,
                updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(skills_json)
        .bind(agent.base_price.to_string())
        .bind(agent.dynamic_price.to_string())
        .bind(i64::from(agent.load))
        .bind(&agent.endpoint)
        .bind(agent.available)
        .bind(to_i64(agent.stats.jobs_completed))
        .bind(to_i64(agent.stats.avg_latency_ms))
        .bind(agent.stats.rating.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, RepositoryError> {
    let skills_json = row.try_get::<String, _>("skills_json")?;
    let load_raw = row.try_get::<i64, _>("load")?;
    let load = u8::try_from(load_raw)
        .ok()
        .filter(|load| *load <= MAX_LOAD)
        .ok_or_else(|| RepositoryError::Decode(format!("agent load out of range: {load_raw}")))?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        skills: parse_json("skills_json", &skills_json)?,
        base_price: parse_decimal("base_price", row.try_get("base_price")?)?,
        dynamic_price: parse_decimal("dynamic_price", row.try_get("dynamic_price")?)?,
        load,
        endpoint: row.try_get("endpoint")?,
        available: row.try_get("available")?,
        stats: AgentStats {
            jobs_completed: parse_u64("jobs_completed", row.try_get("jobs_completed")?)?,
            avg_latency_ms: parse_u64("avg_latency_ms", row.try_get("avg_latency_ms")?)?,
            rating: parse_decimal("rating", row.try_get("rating")?)?,
        },
    })
}
