use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bazaar_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One reported setting: key path, rendered value, and its env override.
struct Field {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source =
            field_source(field.key, field.env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = if config.reasoning.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Field { key: "database.url", value: config.database.url.clone(), env_key: "BAZAAR_DATABASE_URL" },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_key: "BAZAAR_DATABASE_MAX_CONNECTIONS",
        },
        Field {
            key: "reasoning.provider",
            value: format!("{:?}", config.reasoning.provider),
            env_key: "BAZAAR_REASONING_PROVIDER",
        },
        Field {
            key: "reasoning.model",
            value: config.reasoning.model.clone(),
            env_key: "BAZAAR_REASONING_MODEL",
        },
        Field {
            key: "reasoning.base_url",
            value: config.reasoning.base_url.clone(),
            env_key: "BAZAAR_REASONING_BASE_URL",
        },
        Field {
            key: "reasoning.api_key",
            value: api_key.to_string(),
            env_key: "BAZAAR_REASONING_API_KEY",
        },
        Field {
            key: "gateway.timeout_secs",
            value: config.gateway.timeout_secs.to_string(),
            env_key: "BAZAAR_GATEWAY_TIMEOUT_SECS",
        },
        Field {
            key: "gateway.turn_deadline_secs",
            value: config.gateway.turn_deadline_secs.to_string(),
            env_key: "BAZAAR_GATEWAY_TURN_DEADLINE_SECS",
        },
        Field {
            key: "settlement.default_max_budget",
            value: config.settlement.default_max_budget.to_string(),
            env_key: "BAZAAR_SETTLEMENT_DEFAULT_MAX_BUDGET",
        },
        Field {
            key: "settlement.platform_fee_pct",
            value: config.settlement.platform_fee_pct.to_string(),
            env_key: "BAZAAR_SETTLEMENT_PLATFORM_FEE_PCT",
        },
        Field {
            key: "ledger.signing_key",
            value: redact_secret(config.ledger.signing_key.expose_secret()),
            env_key: "BAZAAR_LEDGER_SIGNING_KEY",
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_key: "BAZAAR_SERVER_BIND_ADDRESS",
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_key: "BAZAAR_SERVER_PORT",
        },
        Field {
            key: "registry.health_probe_interval_secs",
            value: config.registry.health_probe_interval_secs.to_string(),
            env_key: "BAZAAR_REGISTRY_HEALTH_PROBE_INTERVAL_SECS",
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_key: "BAZAAR_LOGGING_LEVEL",
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_key: "BAZAAR_LOGGING_FORMAT",
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["bazaar.toml", "config/bazaar.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = trimmed.chars().take(3).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn nested_key_paths_are_found_in_file_documents() {
        let doc: Value = "[settlement]\nplatform_fee_pct = \"2.5\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "settlement.platform_fee_pct"));
        assert!(!contains_path(&doc, "settlement.default_max_budget"));
        assert!(!contains_path(&doc, "ledger.signing_key"));
    }

    #[test]
    fn secrets_keep_only_a_short_prefix() {
        assert_eq!(redact_secret("bazaar-local-ledger-key"), "baz***");
        assert_eq!(redact_secret("  "), "<empty>");
    }
}
