use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub reasoning: ReasoningConfig,
    pub gateway: GatewayConfig,
    pub settlement: SettlementConfig,
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReasoningConfig {
    pub provider: ReasoningProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Retries after the first failed reasoning call.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Upper bound on reasoning/tool rounds within one turn.
    pub max_rounds: u32,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub timeout_secs: u64,
    pub turn_deadline_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SettlementConfig {
    pub default_max_budget: Decimal,
    pub platform_fee_pct: Decimal,
    pub external_counterparty: String,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub signing_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Zero disables periodic health probing.
    pub health_probe_interval_secs: u64,
    pub seed_defaults: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningProvider {
    Keyword,
    Anthropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub reasoning_provider: Option<ReasoningProvider>,
    pub reasoning_model: Option<String>,
    pub reasoning_api_key: Option<String>,
    pub gateway_timeout_secs: Option<u64>,
    pub default_max_budget: Option<Decimal>,
    pub platform_fee_pct: Option<Decimal>,
    pub server_port: Option<u16>,
    pub health_probe_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_SIGNING_KEY: &str = "bazaar-local-ledger-key";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://bazaar.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            reasoning: ReasoningConfig {
                provider: ReasoningProvider::Keyword,
                api_key: None,
                base_url: "https://api.anthropic.com".to_string(),
                model: "claude-sonnet-4-5".to_string(),
                max_tokens: 1024,
                timeout_secs: 30,
                max_retries: 1,
                retry_backoff_ms: 250,
                max_rounds: 4,
            },
            gateway: GatewayConfig { timeout_secs: 30, turn_deadline_secs: 120 },
            settlement: SettlementConfig {
                default_max_budget: Decimal::ONE,
                platform_fee_pct: Decimal::ZERO,
                external_counterparty: "card_rail".to_string(),
            },
            ledger: LedgerConfig { signing_key: secret_value(DEFAULT_SIGNING_KEY.to_string()) },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            registry: RegistryConfig { health_probe_interval_secs: 30, seed_defaults: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for ReasoningProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported reasoning provider `{other}` (expected keyword|anthropic)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bazaar.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(reasoning) = patch.reasoning {
            if let Some(provider) = reasoning.provider {
                self.reasoning.provider = provider;
            }
            if let Some(api_key) = reasoning.api_key {
                self.reasoning.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = reasoning.base_url {
                self.reasoning.base_url = base_url;
            }
            if let Some(model) = reasoning.model {
                self.reasoning.model = model;
            }
            if let Some(max_tokens) = reasoning.max_tokens {
                self.reasoning.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = reasoning.timeout_secs {
                self.reasoning.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = reasoning.max_retries {
                self.reasoning.max_retries = max_retries;
            }
            if let Some(retry_backoff_ms) = reasoning.retry_backoff_ms {
                self.reasoning.retry_backoff_ms = retry_backoff_ms;
            }
            if let Some(max_rounds) = reasoning.max_rounds {
                self.reasoning.max_rounds = max_rounds;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(timeout_secs) = gateway.timeout_secs {
                self.gateway.timeout_secs = timeout_secs;
            }
            if let Some(turn_deadline_secs) = gateway.turn_deadline_secs {
                self.gateway.turn_deadline_secs = turn_deadline_secs;
            }
        }

        if let Some(settlement) = patch.settlement {
            if let Some(default_max_budget) = settlement.default_max_budget {
                self.settlement.default_max_budget = default_max_budget;
            }
            if let Some(platform_fee_pct) = settlement.platform_fee_pct {
                self.settlement.platform_fee_pct = platform_fee_pct;
            }
            if let Some(external_counterparty) = settlement.external_counterparty {
                self.settlement.external_counterparty = external_counterparty;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(signing_key) = ledger.signing_key {
                self.ledger.signing_key = secret_value(signing_key);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(registry) = patch.registry {
            if let Some(interval) = registry.health_probe_interval_secs {
                self.registry.health_probe_interval_secs = interval;
            }
            if let Some(seed_defaults) = registry.seed_defaults {
                self.registry.seed_defaults = seed_defaults;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BAZAAR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BAZAAR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("BAZAAR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BAZAAR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_REASONING_PROVIDER") {
            self.reasoning.provider = value.parse()?;
        }
        let api_key =
            read_env("BAZAAR_REASONING_API_KEY").or_else(|| read_env("ANTHROPIC_API_KEY"));
        if let Some(value) = api_key {
            self.reasoning.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("BAZAAR_REASONING_BASE_URL") {
            self.reasoning.base_url = value;
        }
        if let Some(value) = read_env("BAZAAR_REASONING_MODEL") {
            self.reasoning.model = value;
        }
        if let Some(value) = read_env("BAZAAR_REASONING_TIMEOUT_SECS") {
            self.reasoning.timeout_secs = parse_u64("BAZAAR_REASONING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_REASONING_MAX_RETRIES") {
            self.reasoning.max_retries = parse_u32("BAZAAR_REASONING_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_REASONING_MAX_ROUNDS") {
            self.reasoning.max_rounds = parse_u32("BAZAAR_REASONING_MAX_ROUNDS", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_u64("BAZAAR_GATEWAY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_GATEWAY_TURN_DEADLINE_SECS") {
            self.gateway.turn_deadline_secs =
                parse_u64("BAZAAR_GATEWAY_TURN_DEADLINE_SECS", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_SETTLEMENT_DEFAULT_MAX_BUDGET") {
            self.settlement.default_max_budget =
                parse_decimal("BAZAAR_SETTLEMENT_DEFAULT_MAX_BUDGET", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_SETTLEMENT_PLATFORM_FEE_PCT") {
            self.settlement.platform_fee_pct =
                parse_decimal("BAZAAR_SETTLEMENT_PLATFORM_FEE_PCT", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_SETTLEMENT_EXTERNAL_COUNTERPARTY") {
            self.settlement.external_counterparty = value;
        }

        if let Some(value) = read_env("BAZAAR_LEDGER_SIGNING_KEY") {
            self.ledger.signing_key = secret_value(value);
        }

        if let Some(value) = read_env("BAZAAR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BAZAAR_SERVER_PORT") {
            self.server.port = parse_u16("BAZAAR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BAZAAR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("BAZAAR_REGISTRY_HEALTH_PROBE_INTERVAL_SECS") {
            self.registry.health_probe_interval_secs =
                parse_u64("BAZAAR_REGISTRY_HEALTH_PROBE_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("BAZAAR_REGISTRY_SEED_DEFAULTS") {
            self.registry.seed_defaults = parse_bool("BAZAAR_REGISTRY_SEED_DEFAULTS", &value)?;
        }

        let log_level = read_env("BAZAAR_LOGGING_LEVEL").or_else(|| read_env("BAZAAR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BAZAAR_LOGGING_FORMAT").or_else(|| read_env("BAZAAR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.reasoning_provider {
            self.reasoning.provider = provider;
        }
        if let Some(model) = overrides.reasoning_model {
            self.reasoning.model = model;
        }
        if let Some(api_key) = overrides.reasoning_api_key {
            self.reasoning.api_key = Some(secret_value(api_key));
        }
        if let Some(timeout_secs) = overrides.gateway_timeout_secs {
            self.gateway.timeout_secs = timeout_secs;
        }
        if let Some(default_max_budget) = overrides.default_max_budget {
            self.settlement.default_max_budget = default_max_budget;
        }
        if let Some(platform_fee_pct) = overrides.platform_fee_pct {
            self.settlement.platform_fee_pct = platform_fee_pct;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(interval) = overrides.health_probe_interval_secs {
            self.registry.health_probe_interval_secs = interval;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_reasoning(&self.reasoning)?;
        validate_gateway(&self.gateway)?;
        validate_settlement(&self.settlement)?;
        validate_ledger(&self.ledger)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bazaar.toml"), PathBuf::from("config/bazaar.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_reasoning(reasoning: &ReasoningConfig) -> Result<(), ConfigError> {
    if reasoning.timeout_secs == 0 || reasoning.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "reasoning.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if reasoning.max_rounds == 0 || reasoning.max_rounds > 16 {
        return Err(ConfigError::Validation(
            "reasoning.max_rounds must be in range 1..=16".to_string(),
        ));
    }

    if reasoning.provider == ReasoningProvider::Anthropic {
        let missing = reasoning
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "reasoning.api_key is required for the anthropic provider (set BAZAAR_REASONING_API_KEY or ANTHROPIC_API_KEY)"
                    .to_string(),
            ));
        }
        let base_url = reasoning.base_url.trim();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "reasoning.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if gateway.timeout_secs == 0 || gateway.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "gateway.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if gateway.turn_deadline_secs < gateway.timeout_secs {
        return Err(ConfigError::Validation(
            "gateway.turn_deadline_secs must be at least gateway.timeout_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_settlement(settlement: &SettlementConfig) -> Result<(), ConfigError> {
    if settlement.default_max_budget <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "settlement.default_max_budget must be greater than zero".to_string(),
        ));
    }

    if settlement.platform_fee_pct < Decimal::ZERO
        || settlement.platform_fee_pct > Decimal::ONE_HUNDRED
    {
        return Err(ConfigError::Validation(
            "settlement.platform_fee_pct must be in range 0..=100".to_string(),
        ));
    }

    if settlement.external_counterparty.trim().is_empty() {
        return Err(ConfigError::Validation(
            "settlement.external_counterparty must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    if ledger.signing_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "ledger.signing_key must not be empty (set BAZAAR_LEDGER_SIGNING_KEY)".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    reasoning: Option<ReasoningPatch>,
    gateway: Option<GatewayPatch>,
    settlement: Option<SettlementPatch>,
    ledger: Option<LedgerPatch>,
    server: Option<ServerPatch>,
    registry: Option<RegistryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReasoningPatch {
    provider: Option<ReasoningProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_rounds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    timeout_secs: Option<u64>,
    turn_deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SettlementPatch {
    default_max_budget: Option<Decimal>,
    platform_fee_pct: Option<Decimal>,
    external_counterparty: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    signing_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryPatch {
    health_probe_interval_secs: Option<u64>,
    seed_defaults: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
