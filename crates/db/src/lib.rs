pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{AgentCatalogSeed, SeedCheck, SeedResult, VerificationResult};
pub use repositories::{RepositoryError, SettlementCommit};
pub use store::MarketplaceStore;
