//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::domain::extraction::ExtractorKind;
use crate::domain::graph::normalize_relationship_type;

/// Loregraph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub extraction: ExtractionConfig,
    pub graph: GraphConfig,
    pub storage: StorageConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_concurrent_jobs: usize,
    pub job_timeout_secs: u64,
    pub default_extractor: ExtractorKind,
    pub max_entities_per_scene: usize,
    pub max_relationships_per_scene: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub relationship_types: Vec<String>,
    pub allow_unknown_relationship_types: bool,
    pub community_seed: u64,
    pub persist_retry_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "anthropic/claude-sonnet-4-20250514".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            timeout_secs: 60,
            base_url: "https://openrouter.ai/api/v1".to_string(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            job_timeout_secs: 120,
            default_extractor: ExtractorKind::Llm,
            max_entities_per_scene: 50,
            max_relationships_per_scene: 100,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            relationship_types: [
                "knows",
                "conflicts_with",
                "located_in",
                "owns",
                "member_of",
                "related_to",
                "loves",
                "works_for",
                "parent_of",
                "part_of",
                "participates_in",
                "allied_with",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allow_unknown_relationship_types: true,
            community_seed: 42,
            persist_retry_attempts: 5,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("LOREGRAPH_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Database path, falling back to `<data dir>/loregraph/loregraph.db`
    pub fn resolved_database_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?
            .join("loregraph");
        Ok(dir.join("loregraph.db"))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOREGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("loregraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;
        if self.extraction.max_concurrent_jobs == 0 {
            return Err(anyhow!("extraction.max_concurrent_jobs must be at least 1"));
        }
        if self.extraction.job_timeout_secs == 0 {
            return Err(anyhow!("extraction.job_timeout_secs must be at least 1"));
        }
        if self.realtime.channel_capacity == 0 {
            return Err(anyhow!("realtime.channel_capacity must be at least 1"));
        }
        if self.graph.persist_retry_attempts == 0 {
            return Err(anyhow!("graph.persist_retry_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // LLM settings
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),
            "llm.base_url" => Ok(self.llm.base_url.clone()),

            // Extraction settings
            "extraction.max_concurrent_jobs" => Ok(self.extraction.max_concurrent_jobs.to_string()),
            "extraction.job_timeout_secs" => Ok(self.extraction.job_timeout_secs.to_string()),
            "extraction.default_extractor" => {
                Ok(self.extraction.default_extractor.as_str().to_string())
            }
            "extraction.max_entities_per_scene" => {
                Ok(self.extraction.max_entities_per_scene.to_string())
            }
            "extraction.max_relationships_per_scene" => {
                Ok(self.extraction.max_relationships_per_scene.to_string())
            }

            // Graph settings
            "graph.relationship_types" => Ok(self.graph.relationship_types.join(", ")),
            "graph.allow_unknown_relationship_types" => {
                Ok(self.graph.allow_unknown_relationship_types.to_string())
            }
            "graph.community_seed" => Ok(self.graph.community_seed.to_string()),
            "graph.persist_retry_attempts" => Ok(self.graph.persist_retry_attempts.to_string()),

            // Storage settings
            "storage.database_path" => Ok(self
                .storage
                .resolved_database_path()?
                .display()
                .to_string()),

            // Realtime settings
            "realtime.channel_capacity" => Ok(self.realtime.channel_capacity.to_string()),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use LOREGRAPH_API_KEY or OPENROUTER_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `loregraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // LLM settings
            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }
            "llm.base_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("Base URL must start with http:// or https://"));
                }
                self.llm.base_url = value.trim_end_matches('/').to_string();
            }

            // Extraction settings
            "extraction.max_concurrent_jobs" => {
                let jobs: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_concurrent_jobs value: {}", value))?;
                if jobs == 0 {
                    return Err(anyhow!("max_concurrent_jobs must be at least 1"));
                }
                self.extraction.max_concurrent_jobs = jobs;
            }
            "extraction.job_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid job_timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("job_timeout_secs must be at least 1"));
                }
                self.extraction.job_timeout_secs = secs;
            }
            "extraction.default_extractor" => {
                self.extraction.default_extractor = ExtractorKind::parse(value).ok_or_else(|| {
                    anyhow!("Invalid extractor: {}. Valid options: llm, ner", value)
                })?;
            }
            "extraction.max_entities_per_scene" => {
                self.extraction.max_entities_per_scene = value
                    .parse()
                    .with_context(|| format!("Invalid max_entities_per_scene value: {}", value))?;
            }
            "extraction.max_relationships_per_scene" => {
                self.extraction.max_relationships_per_scene = value.parse().with_context(|| {
                    format!("Invalid max_relationships_per_scene value: {}", value)
                })?;
            }

            // Graph settings
            "graph.relationship_types" => {
                let types: Vec<String> = value
                    .split(',')
                    .map(normalize_relationship_type)
                    .filter(|s| !s.is_empty())
                    .collect();
                if types.is_empty() {
                    return Err(anyhow!("At least one relationship type is required"));
                }
                self.graph.relationship_types = types;
            }
            "graph.allow_unknown_relationship_types" => {
                self.graph.allow_unknown_relationship_types = value.parse().with_context(|| {
                    format!("Invalid boolean value: {} (expected true or false)", value)
                })?;
            }
            "graph.community_seed" => {
                self.graph.community_seed = value
                    .parse()
                    .with_context(|| format!("Invalid community_seed value: {}", value))?;
            }
            "graph.persist_retry_attempts" => {
                let attempts: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid persist_retry_attempts value: {}", value))?;
                if attempts == 0 {
                    return Err(anyhow!("persist_retry_attempts must be at least 1"));
                }
                self.graph.persist_retry_attempts = attempts;
            }

            // Storage settings
            "storage.database_path" => {
                self.storage.database_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            // Realtime settings
            "realtime.channel_capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid channel_capacity value: {}", value))?;
                if capacity == 0 {
                    return Err(anyhow!("channel_capacity must be at least 1"));
                }
                self.realtime.channel_capacity = capacity;
            }

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the LOREGRAPH_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `loregraph config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.default_model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.base_url",
            "llm.api_key",
            "extraction.max_concurrent_jobs",
            "extraction.job_timeout_secs",
            "extraction.default_extractor",
            "extraction.max_entities_per_scene",
            "extraction.max_relationships_per_scene",
            "graph.relationship_types",
            "graph.allow_unknown_relationship_types",
            "graph.community_seed",
            "graph.persist_retry_attempts",
            "storage.database_path",
            "realtime.channel_capacity",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
