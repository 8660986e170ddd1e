use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::dynamic_price;

/// Upper bound of the load counter. Lower bound is zero.
pub const MAX_LOAD: u8 = 10;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub jobs_completed: u64,
    pub avg_latency_ms: u64,
    pub rating: Decimal,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self { jobs_completed: 0, avg_latency_ms: 0, rating: Decimal::ZERO }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub skills: Vec<String>,
    pub base_price: Decimal,
    pub dynamic_price: Decimal,
    pub load: u8,
    pub endpoint: String,
    pub available: bool,
    pub stats: AgentStats,
}

impl Agent {
    /// Builds an idle, available agent whose dynamic price equals its base price.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        skills: Vec<String>,
        base_price: Decimal,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            description: String::new(),
            skills,
            base_price,
            dynamic_price: base_price,
            load: 0,
            endpoint: endpoint.into(),
            available: true,
            stats: AgentStats::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rating(mut self, rating: Decimal) -> Self {
        self.stats.rating = rating;
        self
    }

    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_load(mut self, load: u8) -> Self {
        self.load = load.min(MAX_LOAD);
        self.dynamic_price = dynamic_price(self.base_price, self.load);
        self
    }

    /// Case-insensitive skill match.
    pub fn has_skill(&self, skill: &str) -> bool {
        let needle = skill.trim();
        self.skills.iter().any(|candidate| candidate.eq_ignore_ascii_case(needle))
    }

    pub fn has_any_skill(&self, required: &[String]) -> bool {
        required.iter().any(|skill| self.has_skill(skill))
    }

    /// Sets the load from a raw in-flight count, clamped to `MAX_LOAD`, and
    /// reprices.
    pub fn set_load(&mut self, count: u32) {
        self.load = u8::try_from(count.min(u32::from(MAX_LOAD))).unwrap_or(MAX_LOAD);
        self.dynamic_price = dynamic_price(self.base_price, self.load);
    }

    /// Applies a signed load delta, clamped to `0..=MAX_LOAD`, and reprices.
    pub fn apply_load_delta(&mut self, delta: i32) {
        let next = (i32::from(self.load) + delta).clamp(0, i32::from(MAX_LOAD));
        self.load = u8::try_from(next).unwrap_or(MAX_LOAD);
        self.dynamic_price = dynamic_price(self.base_price, self.load);
    }

    /// Folds one finished job into the rolling latency average.
    pub fn record_completion(&mut self, duration_ms: u64) {
        let completed = self.stats.jobs_completed;
        let total = self.stats.avg_latency_ms.saturating_mul(completed).saturating_add(duration_ms);
        self.stats.jobs_completed = completed.saturating_add(1);
        self.stats.avg_latency_ms = total / self.stats.jobs_completed;
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Agent, MAX_LOAD};

    fn summarizer() -> Agent {
        Agent::new(
            "summarizer",
            "Summarizer",
            vec!["summarize".to_owned(), "summarization".to_owned()],
            Decimal::new(5, 2),
            "http://localhost:8001",
        )
    }

    #[test]
    fn skill_match_ignores_case_and_whitespace() {
        let agent = summarizer();
        assert!(agent.has_skill("Summarize"));
        assert!(agent.has_skill(" SUMMARIZATION "));
        assert!(!agent.has_skill("translate"));
        assert!(agent.has_any_skill(&["translate".to_owned(), "summarize".to_owned()]));
    }

    #[test]
    fn load_delta_clamps_and_reprices() {
        let mut agent = summarizer();

        agent.apply_load_delta(-3);
        assert_eq!(agent.load, 0);
        assert_eq!(agent.dynamic_price, Decimal::new(5, 2));

        agent.apply_load_delta(5);
        assert_eq!(agent.load, 5);
        assert_eq!(agent.dynamic_price, Decimal::new(575, 4));

        agent.apply_load_delta(40);
        assert_eq!(agent.load, MAX_LOAD);
        assert_eq!(agent.dynamic_price, Decimal::new(650, 4));
    }

    #[test]
    fn raw_counts_above_the_cap_price_at_the_top_band() {
        let mut agent = summarizer();
        agent.set_load(25);
        assert_eq!(agent.load, MAX_LOAD);
        assert_eq!(agent.dynamic_price, Decimal::new(650, 4));

        agent.set_load(0);
        assert_eq!(agent.load, 0);
        assert_eq!(agent.dynamic_price, Decimal::new(5, 2));
    }

    #[test]
    fn completion_updates_rolling_latency() {
        let mut agent = summarizer();
        agent.record_completion(100);
        agent.record_completion(300);

        assert_eq!(agent.stats.jobs_completed, 2);
        assert_eq!(agent.stats.avg_latency_ms, 200);
    }
}
