use rust_decimal::Decimal;

use bazaar_core::domain::agent::{Agent, AgentId, AgentStats};

use crate::repositories::{AgentRepository, RepositoryError};

/// Built-in agent catalog used for local runs and tests.
const SEED_AGENTS: &[SeedAgentContract] = &[
    SeedAgentContract {
        id: "summarizer",
        name: "Summarizer Agent",
        description: "Intelligent text summarization with configurable length",
        skills: &["summarize", "condense", "analyze", "extract"],
        base_price: (5, 2),
        rating: (48, 1),
        jobs_completed: 127,
        avg_latency_ms: 2300,
        endpoint: "http://localhost:8001",
        available: true,
    },
    SeedAgentContract {
        id: "translator",
        name: "Translator Agent",
        description: "Language translation powered by Claude",
        skills: &["translate", "localize", "language"],
        base_price: (10, 2),
        rating: (49, 1),
        jobs_completed: 203,
        avg_latency_ms: 1800,
        endpoint: "http://localhost:8002",
        available: true,
    },
    SeedAgentContract {
        id: "search",
        name: "Search Agent",
        description: "Web search with AI synthesis of results",
        skills: &["search", "research", "web", "find"],
        base_price: (8, 2),
        rating: (47, 1),
        jobs_completed: 89,
        avg_latency_ms: 4500,
        endpoint: "http://localhost:8003",
        available: true,
    },
    SeedAgentContract {
        id: "mock_busy",
        name: "Busy Agent (Mock)",
        description: "Simulates high load scenarios",
        skills: &["test", "mock"],
        base_price: (5, 2),
        rating: (32, 1),
        jobs_completed: 45,
        avg_latency_ms: 8000,
        endpoint: "http://localhost:8004",
        available: false,
    },
    SeedAgentContract {
        id: "mock_highprice",
        name: "Premium Agent (Mock)",
        description: "High-quality but expensive service",
        skills: &["premium", "test"],
        base_price: (85, 2),
        rating: (495, 2),
        jobs_completed: 312,
        avg_latency_ms: 1200,
        endpoint: "http://localhost:8005",
        available: true,
    },
    SeedAgentContract {
        id: "mock_negotiator",
        name: "Negotiator Agent (Mock)",
        description: "Tests price negotiation scenarios",
        skills: &["negotiate", "test"],
        base_price: (50, 2),
        rating: (41, 1),
        jobs_completed: 67,
        avg_latency_ms: 3000,
        endpoint: "http://localhost:8006",
        available: true,
    },
];

struct SeedAgentContract {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    skills: &'static [&'static str],
    /// `(mantissa, scale)` pairs keep the table const.
    base_price: (i64, u32),
    rating: (i64, u32),
    jobs_completed: u64,
    avg_latency_ms: u64,
    endpoint: &'static str,
    available: bool,
}

impl SeedAgentContract {
    fn to_agent(&self) -> Agent {
        let (mantissa, scale) = self.base_price;
        let (rating_mantissa, rating_scale) = self.rating;
        let mut agent = Agent::new(
            self.id,
            self.name,
            self.skills.iter().map(|skill| (*skill).to_string()).collect(),
            Decimal::new(mantissa, scale),
            self.endpoint,
        )
        .with_description(self.description)
        .with_availability(self.available);
        agent.stats = AgentStats {
            jobs_completed: self.jobs_completed,
            avg_latency_ms: self.avg_latency_ms,
            rating: Decimal::new(rating_mantissa, rating_scale),
        };
        agent
    }

    fn matches(&self, agent: &Agent) -> bool {
        let (mantissa, scale) = self.base_price;
        agent.name == self.name
            && agent.endpoint == self.endpoint
            && agent.base_price == Decimal::new(mantissa, scale)
            && self.skills.iter().all(|skill| agent.has_skill(skill))
    }
}

/// Seeds and verifies the default agent catalog.
pub struct AgentCatalogSeed;

impl AgentCatalogSeed {
    pub fn default_agents() -> Vec<Agent> {
        SEED_AGENTS.iter().map(SeedAgentContract::to_agent).collect()
    }

    /// Inserts catalog agents that are missing. Existing rows keep their
    /// runtime load and stats.
    pub async fn load(repo: &dyn AgentRepository) -> Result<SeedResult, RepositoryError> {
        let mut inserted = Vec::new();
        let mut skipped = Vec::new();

        for contract in SEED_AGENTS {
            let id = AgentId::new(contract.id);
            if repo.find_by_id(&id).await?.is_some() {
                skipped.push(id);
                continue;
            }
            repo.save(contract.to_agent()).await?;
            inserted.push(id);
        }

        Ok(SeedResult { inserted, skipped })
    }

    pub async fn verify(repo: &dyn AgentRepository) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_AGENTS.len());
        for contract in SEED_AGENTS {
            let found = repo.find_by_id(&AgentId::new(contract.id)).await?;
            let passed = found.as_ref().map(|agent| contract.matches(agent)).unwrap_or(false);
            checks.push(SeedCheck { agent_id: contract.id, passed });
        }

        let all_passed = checks.iter().all(|check| check.passed);
        Ok(VerificationResult { all_passed, checks })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub inserted: Vec<AgentId>,
    pub skipped: Vec<AgentId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedCheck {
    pub agent_id: &'static str,
    pub passed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_passed: bool,
    pub checks: Vec<SeedCheck>,
}

impl VerificationResult {
    pub fn failures(&self) -> impl Iterator<Item = &SeedCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }
}
