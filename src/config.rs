//! Pool configuration.
//!
//! The YAML document has a top-level `llm` map: `use` names the enabled
//! families (single name or comma-separated list), and each enabled family
//! maps to a sequence of key records. One provider instance is created per
//! record, in declaration order.
//!
//! ```yaml
//! llm:
//!   use: openai, gemini
//!   openai:
//!     - { api_key: "sk-...", api_base: "https://api.openai.com/v1", model: "gpt-4o-mini", rate_limit: 20 }
//!   gemini:
//!     - { api_key: "...", api_base: "https://generativelanguage.googleapis.com/v1beta", model: "gemini-1.5-flash" }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ClientError;
use crate::providers::Family;

/// Requests per rolling 60 seconds when an entry does not set `rate_limit`.
pub const DEFAULT_RATE_LIMIT: u32 = 20;

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_API_BASE: &str = "OPENAI_API_BASE";
const ENV_MODEL: &str = "OPENAI_MODEL";
const ENV_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for one provider instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub family: Family,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    /// Requests per rolling 60 seconds, at least 1.
    pub rate_limit: u32,
}

impl InstanceConfig {
    /// Create a configuration with the family's public API base and the
    /// default rate limit.
    pub fn new(family: Family, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            family,
            api_key: api_key.into(),
            api_base: family.default_base().to_string(),
            model: model.into(),
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// The full pool configuration: every instance, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    llm: RawLlm,
}

#[derive(Debug, Deserialize)]
struct RawLlm {
    #[serde(rename = "use")]
    enabled: String,
    #[serde(flatten)]
    families: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    api_key: String,
    api_base: String,
    model: Option<String>,
    rate_limit: Option<u32>,
}

impl PoolConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ClientError> {
        let document: RawDocument = serde_yaml::from_str(text)?;
        build(document)
    }

    /// Load and parse a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Fallback for running without a configuration file: an
    /// `OPENAI_API_KEY` in the environment yields a synthetic
    /// single-instance pool. `OPENAI_API_BASE` and `OPENAI_MODEL`
    /// override the defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let api_key = std::env::var(ENV_API_KEY).map_err(|_| {
            ClientError::config(format!(
                "{ENV_API_KEY} is not set and no configuration file was provided"
            ))
        })?;
        let api_base = std::env::var(ENV_API_BASE)
            .unwrap_or_else(|_| Family::OpenAi.default_base().to_string());
        let model = std::env::var(ENV_MODEL).unwrap_or_else(|_| ENV_DEFAULT_MODEL.to_string());

        Ok(Self {
            instances: vec![InstanceConfig {
                family: Family::OpenAi,
                api_key,
                api_base,
                model,
                rate_limit: DEFAULT_RATE_LIMIT,
            }],
        })
    }
}

fn build(document: RawDocument) -> Result<PoolConfig, ClientError> {
    let mut enabled = Vec::new();
    for name in document.llm.enabled.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let family = Family::parse(name).ok_or_else(|| {
            ClientError::config(format!("unknown provider family `{name}` in `use`"))
        })?;
        if !enabled.contains(&family) {
            enabled.push(family);
        }
    }
    if enabled.is_empty() {
        return Err(ClientError::config("`use` names no provider families"));
    }

    let mut instances = Vec::new();
    for family in enabled {
        let value = document.llm.families.get(family.as_str()).ok_or_else(|| {
            ClientError::config(format!(
                "family `{family}` is enabled but has no key entries"
            ))
        })?;
        let entries: Vec<RawEntry> = serde_yaml::from_value(value.clone()).map_err(|e| {
            ClientError::config(format!("invalid entries for family `{family}`: {e}"))
        })?;
        if entries.is_empty() {
            return Err(ClientError::config(format!(
                "family `{family}` is enabled but has no key entries"
            )));
        }

        for (index, entry) in entries.into_iter().enumerate() {
            let model = entry.model.ok_or_else(|| {
                ClientError::config(format!("{family} entry {index} is missing `model`"))
            })?;
            let rate_limit = entry.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT);
            if rate_limit == 0 {
                return Err(ClientError::config(format!(
                    "{family} entry {index}: `rate_limit` must be at least 1"
                )));
            }
            instances.push(InstanceConfig {
                family,
                api_key: entry.api_key,
                api_base: entry.api_base,
                model,
                rate_limit,
            });
        }
    }

    Ok(PoolConfig { instances })
}
