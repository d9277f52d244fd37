use std::path::{Path, PathBuf};
use std::time::Duration;

use ideacat_tokens::{
    MessageOverhead, ModelCatalog, ModelSpec, ResponseEstimate, TokenError, TokenEstimator,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration problems that stop a run before any request is sent
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Core(#[from] ideacat_core::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Configuration for ideacat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub estimator: EstimatorConfig,

    #[serde(default)]
    pub models: ModelCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,

    /// Optional hard cap on items per batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items_per_batch: Option<usize>,

    /// Items per batch when token-aware batching is unavailable
    #[serde(default = "default_fallback_batch_size")]
    pub fallback_batch_size: usize,

    #[serde(default = "default_max_retry_rounds")]
    pub max_retry_rounds: u32,

    #[serde(default)]
    pub skip_rate_limit_delay: bool,

    #[serde(default = "default_cooldown")]
    pub rate_limit_cooldown_secs: u64,

    /// Completions at or above this size are treated as truncated
    #[serde(default = "default_completion_ceiling")]
    pub completion_token_ceiling: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default)]
    pub use_test_double: bool,

    #[serde(default)]
    pub test_double_latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default)]
    pub overhead: MessageOverhead,

    #[serde(default)]
    pub response: ResponseEstimate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            categories: default_categories(),
            dispatch: DispatchConfig::default(),
            provider: ProviderConfig::default(),
            estimator: EstimatorConfig::default(),
            models: ModelCatalog::default(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            max_items_per_batch: None,
            fallback_batch_size: default_fallback_batch_size(),
            max_retry_rounds: default_max_retry_rounds(),
            skip_rate_limit_delay: false,
            rate_limit_cooldown_secs: default_cooldown(),
            completion_token_ceiling: default_completion_ceiling(),
            run_timeout_secs: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            temperature: 0.0,
            use_test_double: false,
            test_double_latency_ms: 0,
        }
    }
}

impl DispatchConfig {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn test_double_latency(&self) -> Duration {
        Duration::from_millis(self.test_double_latency_ms)
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_workers() -> usize {
    2
}

fn default_max_tokens_per_batch() -> usize {
    125_000
}

fn default_fallback_batch_size() -> usize {
    50
}

fn default_max_retry_rounds() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    10
}

fn default_completion_ceiling() -> u64 {
    4096
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_categories() -> Vec<String> {
    [
        "Administrative Services",
        "Agriculture and Farming",
        "Angel Investing",
        "Apps",
        "Artificial Intelligence",
        "Arts",
        "Biotechnology",
        "Climate Tech",
        "Clothing and Apparel",
        "Commerce and Shopping",
        "Community and Lifestyle",
        "Construction",
        "Consumer Electronics",
        "Consumer Goods",
        "Content and Publishing",
        "Corporate Services",
        "Data Analytics",
        "Design",
        "Education",
        "Energy",
        "Entertainment",
        "Events",
        "Financial Services",
        "Food and Beverage",
        "Gaming",
        "Government and Military",
        "Hardware",
        "Health Care",
        "Information Technology",
        "Internet Services",
        "Lending and Investments",
        "Manufacturing",
        "Media and Entertainment",
        "Mobile",
        "Music and Audio",
        "Natural Resources",
        "Navigation and Mapping",
        "Payments",
        "Platforms",
        "Privacy and Security",
        "Private Equity",
        "Professional Services",
        "Public Admin and Safety",
        "Real Estate",
        "Retail",
        "Sales and Marketing",
        "Science and Engineering",
        "Social and Non-Profit",
        "Software",
        "Sports",
        "Sustainability",
        "Transportation",
        "Travel and Tourism",
        "Venture Capital",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

impl Config {
    /// Load config from `path`, or from the default location.
    ///
    /// A missing default file is created with defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::read(&path)?
                } else {
                    let config = Config::default();
                    config.save(&path)?;
                    config
                }
            }
        };

        // User-defined models extend the built-in table rather than replace it
        config.models.extend_missing(ModelCatalog::default());
        Ok(config)
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "ideacat", "ideacat") {
            dirs.config_dir().join("config.toml")
        } else {
            PathBuf::from("~/.ideacat/config.toml")
        }
    }

    /// The configured model's catalog entry
    pub fn model_spec(&self) -> Result<&ModelSpec, ConfigError> {
        Ok(self.models.get(&self.model)?)
    }

    /// Categories with surrounding whitespace removed and blanks dropped
    pub fn active_categories(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Token estimator for the configured model's encoding
    pub fn token_estimator(&self) -> Result<TokenEstimator, ConfigError> {
        let spec = self.model_spec()?;
        Ok(TokenEstimator::new(spec.encoding)?
            .with_overhead(self.estimator.overhead)
            .with_response_estimate(self.estimator.response))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model_spec()?;
        ideacat_core::validate_categories(&self.categories)?;

        if self.dispatch.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_workers must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_tokens_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_tokens_per_batch must be at least 1".to_string(),
            ));
        }
        if self.dispatch.fallback_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.fallback_batch_size must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_items_per_batch == Some(0) {
            return Err(ConfigError::Invalid(
                "dispatch.max_items_per_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
