//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `MEMAGENT_*` environment variables.
//!
//! Environment values are coerced by trying bool, then integer, then float,
//! and falling back to string. Configuration problems are fatal at startup;
//! nothing in the agent catches [`AgentError::Configuration`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::bridge::{BridgeTransport, PoolConfig};
use crate::error::AgentError;
use crate::tool::ExecutorConfig;

pub const ENV_PREFIX: &str = "MEMAGENT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// "pipe" or "stdio".
    pub transport: String,
    pub pipe_path: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub max_retries: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            transport: "pipe".to_string(),
            pipe_path: PathBuf::from("/tmp/memagent-bridge.sock"),
            command: String::new(),
            args: Vec::new(),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub pool_size: usize,
    pub min_size: usize,
    pub max_idle_secs: u64,
    pub health_check_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: 5,
            min_size: 2,
            max_idle_secs: 300,
            health_check_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub allow_destructive: bool,
    pub default_timeout_secs: f64,
    pub max_concurrency: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            allow_destructive: false,
            default_timeout_secs: 30.0,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            max_tokens: 2048,
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The full agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeSettings,
    pub pool: PoolSettings,
    pub executor: ExecutorSettings,
    pub llm: LlmSettings,
    pub log: LogSettings,
}

impl Config {
    /// Loads defaults, the optional file, and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, AgentError> {
        let mut value = toml::Value::try_from(Config::default())
            .map_err(|e| AgentError::Configuration(format!("defaults did not serialize: {e}")))?;

        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                AgentError::Configuration(format!("cannot read {}: {e}", path.display()))
            })?;
            let file_value: toml::Value = text.parse().map_err(|e| {
                AgentError::Configuration(format!("invalid TOML in {}: {e}", path.display()))
            })?;
            merge(&mut value, file_value);
            debug!(path = %path.display(), "loaded configuration file");
        }

        apply_env(&mut value, std::env::vars());

        let config: Config = value
            .try_into()
            .map_err(|e| AgentError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.bridge.transport != "pipe" && self.bridge.transport != "stdio" {
            return Err(AgentError::Configuration(format!(
                "bridge.transport must be 'pipe' or 'stdio', got '{}'",
                self.bridge.transport
            )));
        }
        if self.bridge.transport == "stdio" && self.bridge.command.is_empty() {
            return Err(AgentError::Configuration(
                "bridge.command is required for the stdio transport".to_string(),
            ));
        }
        if self.bridge.max_retries == 0 {
            return Err(AgentError::Configuration(
                "bridge.max_retries must be positive".to_string(),
            ));
        }
        if self.pool.pool_size == 0 || self.pool.min_size > self.pool.pool_size {
            return Err(AgentError::Configuration(
                "pool sizes must satisfy 0 < min_size <= pool_size".to_string(),
            ));
        }
        if self.executor.default_timeout_secs <= 0.0 {
            return Err(AgentError::Configuration(
                "executor.default_timeout_secs must be positive".to_string(),
            ));
        }
        if self.llm.enabled && self.llm.api_key.is_none() && std::env::var("OPENAI_API_KEY").is_err()
        {
            return Err(AgentError::Configuration(
                "llm.api_key is required when the LLM is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bridge_transport(&self) -> BridgeTransport {
        if self.bridge.transport == "stdio" {
            BridgeTransport::Stdio {
                command: self.bridge.command.clone(),
                args: self.bridge.args.clone(),
                env: None,
            }
        } else {
            BridgeTransport::Pipe {
                path: self.bridge.pipe_path.clone(),
            }
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool.pool_size,
            min_size: self.pool.min_size,
            max_idle_time: Duration::from_secs(self.pool.max_idle_secs),
            health_check_interval: Duration::from_secs(self.pool.health_check_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            allow_destructive: self.executor.allow_destructive,
            default_timeout: Duration::from_secs_f64(self.executor.default_timeout_secs),
            max_concurrency: self.executor.max_concurrency,
        }
    }
}

/// Deep merge: tables recurse, everything else replaces.
fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Applies `MEMAGENT_SECTION_FIELD=value` overrides onto the config tree.
fn apply_env(value: &mut toml::Value, vars: impl Iterator<Item = (String, String)>) {
    let Some(table) = value.as_table_mut() else {
        return;
    };

    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some((section, field)) = rest.split_once('_') else {
            continue;
        };
        let section = section.to_lowercase();
        let field = field.to_lowercase();

        let entry = table
            .entry(section.clone())
            .or_insert_with(|| toml::Value::Table(Default::default()));
        if let Some(section_table) = entry.as_table_mut() {
            debug!(section = %section, field = %field, "environment override");
            section_table.insert(field, coerce(&raw));
        }
    }
}

/// bool first, then integer, then float, then string.
fn coerce(raw: &str) -> toml::Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return toml::Value::Boolean(true),
        "false" => return toml::Value::Boolean(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return toml::Value::Integer(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}

/// Test seam mirroring [`Config::load`] with explicit inputs.
pub fn load_from(
    file_contents: Option<&str>,
    env: HashMap<String, String>,
) -> Result<Config, AgentError> {
    let mut value = toml::Value::try_from(Config::default())
        .map_err(|e| AgentError::Configuration(format!("defaults did not serialize: {e}")))?;

    if let Some(text) = file_contents {
        let file_value: toml::Value = text
            .parse()
            .map_err(|e| AgentError::Configuration(format!("invalid TOML: {e}")))?;
        merge(&mut value, file_value);
    }
    apply_env(&mut value, env.into_iter());

    let config: Config = value
        .try_into()
        .map_err(|e| AgentError::Configuration(format!("invalid configuration: {e}")))?;
    config.validate()?;
    Ok(config)
}
