//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::access::Role;

/// Entente configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub resolution: ResolutionConfig,
    pub llm: LlmConfig,
    pub quality: QualityConfig,
    pub storage: StorageConfig,
    /// User id → role names
    pub permissions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum similarity signal for a duplicate-entity conflict
    pub duplicate_threshold: f32,
    /// Minimum text similarity for attribute and temporal candidate pairs
    pub candidate_threshold: f32,
    /// Entities scanned per unscoped detection run
    pub batch_size: usize,
    /// Generate missing embeddings during detection
    pub use_embeddings: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Duplicate/source conflicts at or above this confidence merge automatically
    pub auto_merge_threshold: f32,
    /// Minimum confidence for an AI suggestion to be applied
    pub ai_confidence_threshold: f32,
    /// Minimum confidence gap for deleting the weaker contradictory relationship
    pub relationship_confidence_gap: f32,
    pub max_ai_suggestions: usize,
    /// Experts that receive conflicts automatic resolution could not settle
    pub expert_pool: Vec<String>,
    pub lock_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Dimensions scoring below this get a recommendation
    pub recommendation_threshold: f32,
    pub report_interval_secs: u64,
    pub weights: DimensionWeights,
}

/// Relative weight of each quality dimension in the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub completeness: f32,
    pub accuracy: f32,
    pub consistency: f32,
    pub validity: f32,
    pub uniqueness: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; defaults to the platform data directory
    pub database_path: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.85,
            candidate_threshold: 0.75,
            batch_size: 100,
            use_embeddings: true,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            auto_merge_threshold: 0.95,
            ai_confidence_threshold: 0.8,
            relationship_confidence_gap: 0.3,
            max_ai_suggestions: 3,
            expert_pool: Vec::new(),
            lock_timeout_secs: 30,
        }
    }
}

impl ResolutionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "anthropic/claude-sonnet-4-20250514".to_string(),
            fallback_models: vec![
                "anthropic/claude-3-5-haiku-latest".to_string(),
                "openai/gpt-4o".to_string(),
            ],
            temperature: 0.2,
            max_tokens: 2048,
            timeout_secs: 120,
            embedding_model: "openai/text-embedding-3-small".to_string(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            recommendation_threshold: 0.8,
            report_interval_secs: 3600,
            weights: DimensionWeights::default(),
        }
    }
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            accuracy: 1.0,
            consistency: 1.0,
            validity: 1.0,
            uniqueness: 1.0,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("ENTENTE_API_KEY")
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
    /// Database path, falling back to the platform data directory
    pub fn resolved_database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .ok_or_else(|| anyhow!("Could not determine data directory"))?
                .join("entente")
                .join("entente.db")),
        }
    }
}

fn parse_unit(key: &str, value: &str) -> anyhow::Result<f32> {
    let parsed: f32 = value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(anyhow!("{} must be between 0.0 and 1.0", key));
    }
    Ok(parsed)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

const KEYS: &[&str] = &[
    "detection.duplicate_threshold",
    "detection.candidate_threshold",
    "detection.batch_size",
    "detection.use_embeddings",
    "resolution.auto_merge_threshold",
    "resolution.ai_confidence_threshold",
    "resolution.relationship_confidence_gap",
    "resolution.max_ai_suggestions",
    "resolution.expert_pool",
    "resolution.lock_timeout_secs",
    "llm.default_model",
    "llm.fallback_models",
    "llm.temperature",
    "llm.max_tokens",
    "llm.timeout_secs",
    "llm.embedding_model",
    "llm.api_key",
    "quality.recommendation_threshold",
    "quality.report_interval_secs",
    "quality.weights.completeness",
    "quality.weights.accuracy",
    "quality.weights.consistency",
    "quality.weights.validity",
    "quality.weights.uniqueness",
    "storage.database_path",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ENTENTE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("entente")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default path, or defaults if missing
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        let d = &self.detection;
        if d.candidate_threshold > d.duplicate_threshold {
            return Err(anyhow!(
                "detection.candidate_threshold ({}) must not exceed detection.duplicate_threshold ({})",
                d.candidate_threshold,
                d.duplicate_threshold
            ));
        }
        if d.batch_size == 0 {
            return Err(anyhow!("detection.batch_size must be at least 1"));
        }
        if self.resolution.max_ai_suggestions == 0 {
            return Err(anyhow!("resolution.max_ai_suggestions must be at least 1"));
        }

        for (user, roles) in &self.permissions {
            for role in roles {
                if Role::parse(role).is_none() {
                    return Err(anyhow!(
                        "Unknown role '{}' for user '{}'. Valid roles: viewer, editor, expert, admin",
                        role,
                        user
                    ));
                }
            }
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        if let Some(user) = key.strip_prefix("permissions.") {
            return Ok(self
                .permissions
                .get(user)
                .map(|roles| roles.join(", "))
                .unwrap_or_default());
        }

        match key {
            "detection.duplicate_threshold" => Ok(self.detection.duplicate_threshold.to_string()),
            "detection.candidate_threshold" => Ok(self.detection.candidate_threshold.to_string()),
            "detection.batch_size" => Ok(self.detection.batch_size.to_string()),
            "detection.use_embeddings" => Ok(self.detection.use_embeddings.to_string()),

            "resolution.auto_merge_threshold" => {
                Ok(self.resolution.auto_merge_threshold.to_string())
            }
            "resolution.ai_confidence_threshold" => {
                Ok(self.resolution.ai_confidence_threshold.to_string())
            }
            "resolution.relationship_confidence_gap" => {
                Ok(self.resolution.relationship_confidence_gap.to_string())
            }
            "resolution.max_ai_suggestions" => Ok(self.resolution.max_ai_suggestions.to_string()),
            "resolution.expert_pool" => Ok(self.resolution.expert_pool.join(", ")),
            "resolution.lock_timeout_secs" => Ok(self.resolution.lock_timeout_secs.to_string()),

            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),
            "llm.embedding_model" => Ok(self.llm.embedding_model.clone()),

            "quality.recommendation_threshold" => {
                Ok(self.quality.recommendation_threshold.to_string())
            }
            "quality.report_interval_secs" => Ok(self.quality.report_interval_secs.to_string()),
            "quality.weights.completeness" => Ok(self.quality.weights.completeness.to_string()),
            "quality.weights.accuracy" => Ok(self.quality.weights.accuracy.to_string()),
            "quality.weights.consistency" => Ok(self.quality.weights.consistency.to_string()),
            "quality.weights.validity" => Ok(self.quality.weights.validity.to_string()),
            "quality.weights.uniqueness" => Ok(self.quality.weights.uniqueness.to_string()),

            "storage.database_path" => Ok(self
                .storage
                .resolved_database_path()?
                .display()
                .to_string()),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use ENTENTE_API_KEY or OPENROUTER_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `entente config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if let Some(user) = key.strip_prefix("permissions.") {
            let roles = parse_list(value);
            for role in &roles {
                if Role::parse(role).is_none() {
                    return Err(anyhow!(
                        "Unknown role '{}'. Valid roles: viewer, editor, expert, admin",
                        role
                    ));
                }
            }
            if roles.is_empty() {
                self.permissions.remove(user);
            } else {
                self.permissions.insert(user.to_string(), roles);
            }
            return Ok(());
        }

        match key {
            "detection.duplicate_threshold" => {
                self.detection.duplicate_threshold = parse_unit(key, value)?;
            }
            "detection.candidate_threshold" => {
                self.detection.candidate_threshold = parse_unit(key, value)?;
            }
            "detection.batch_size" => {
                let size: usize = value
                    .parse()
                    .with_context(|| format!("Invalid batch_size value: {}", value))?;
                if size == 0 {
                    return Err(anyhow!("Batch size must be at least 1"));
                }
                self.detection.batch_size = size;
            }
            "detection.use_embeddings" => {
                self.detection.use_embeddings = value
                    .parse()
                    .with_context(|| format!("Invalid use_embeddings value: {}", value))?;
            }

            "resolution.auto_merge_threshold" => {
                self.resolution.auto_merge_threshold = parse_unit(key, value)?;
            }
            "resolution.ai_confidence_threshold" => {
                self.resolution.ai_confidence_threshold = parse_unit(key, value)?;
            }
            "resolution.relationship_confidence_gap" => {
                self.resolution.relationship_confidence_gap = parse_unit(key, value)?;
            }
            "resolution.max_ai_suggestions" => {
                let max: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_ai_suggestions value: {}", value))?;
                if !(1..=3).contains(&max) {
                    return Err(anyhow!("max_ai_suggestions must be between 1 and 3"));
                }
                self.resolution.max_ai_suggestions = max;
            }
            "resolution.expert_pool" => {
                self.resolution.expert_pool = parse_list(value);
            }
            "resolution.lock_timeout_secs" => {
                self.resolution.lock_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid lock_timeout_secs value: {}", value))?;
            }

            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.fallback_models" => {
                self.llm.fallback_models = parse_list(value);
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
            "llm.embedding_model" => {
                self.llm.embedding_model = value.to_string();
            }

            "quality.recommendation_threshold" => {
                self.quality.recommendation_threshold = parse_unit(key, value)?;
            }
            "quality.report_interval_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid report_interval_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Report interval must be at least 1 second"));
                }
                self.quality.report_interval_secs = secs;
            }
            "quality.weights.completeness" => {
                self.quality.weights.completeness = parse_unit(key, value)?;
            }
            "quality.weights.accuracy" => {
                self.quality.weights.accuracy = parse_unit(key, value)?;
            }
            "quality.weights.consistency" => {
                self.quality.weights.consistency = parse_unit(key, value)?;
            }
            "quality.weights.validity" => {
                self.quality.weights.validity = parse_unit(key, value)?;
            }
            "quality.weights.uniqueness" => {
                self.quality.weights.uniqueness = parse_unit(key, value)?;
            }

            "storage.database_path" => {
                self.storage.database_path = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the ENTENTE_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `entente config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut entries: Vec<(String, String)> = KEYS
            .iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect::<anyhow::Result<_>>()?;

        for (user, roles) in &self.permissions {
            entries.push((format!("permissions.{}", user), roles.join(", ")));
        }
        Ok(entries)
    }

    /// Permission table in the shape the permission checker expects
    pub fn permission_table(&self) -> std::collections::HashMap<String, Vec<String>> {
        self.permissions
            .iter()
            .map(|(user, roles)| (user.clone(), roles.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detection.duplicate_threshold, 0.85);
        assert_eq!(config.resolution.auto_merge_threshold, 0.95);
        assert_eq!(config.resolution.max_ai_suggestions, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("detection.duplicate_threshold", "0.9").unwrap();
        assert_eq!(config.get("detection.duplicate_threshold").unwrap(), "0.9");

        config.set("resolution.expert_pool", "alice, bob").unwrap();
        assert_eq!(config.resolution.expert_pool, vec!["alice", "bob"]);

        config.set("permissions.alice", "expert").unwrap();
        assert_eq!(config.get("permissions.alice").unwrap(), "expert");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("detection.duplicate_threshold", "1.5").is_err());
        assert!(config.set("detection.batch_size", "0").is_err());
        assert!(config.set("permissions.bob", "wizard").is_err());
        assert!(config.set("llm.api_key", "sk-123").is_err());
        assert!(config.set("nope", "1").is_err());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.set("resolution.expert_pool", "carol").unwrap();
        config.set("permissions.carol", "expert,admin").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.resolution.expert_pool, vec!["carol"]);
        assert_eq!(
            loaded.permissions.get("carol"),
            Some(&vec!["expert".to_string(), "admin".to_string()])
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[detection]\nbatch_size = 10\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.detection.batch_size, 10);
        assert_eq!(loaded.detection.duplicate_threshold, 0.85);
        assert_eq!(loaded.resolution.max_ai_suggestions, 3);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.detection.batch_size, 100);
    }
}
