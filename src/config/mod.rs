//! Configuration system for flowplan
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/flowplan/config.{FLOWPLAN_ENV}.json
//! 3. Default values
//!
//! Where FLOWPLAN_ENV can be: production (default), development, test
//!
//! Unknown fields are rejected at every level.
//!
//! # Examples
//!
//! ```no_run
//! use flowplan::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! println!("{} providers configured", config.providers.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - FLOWPLAN_CACHE_TTL_SECS (0 disables expiry)
//! - FLOWPLAN_HEALTH_INTERVAL_SECS
//! - FLOWPLAN_MAX_WORKERS

use crate::capability::{builtin_catalog, default_components, ComponentDescriptor};
use crate::optimizer::{OptimizerConfig, OptimizerTables};
use crate::orchestrator::CoordinatorConfig;
use crate::registry::{
    FeatureFlags, ProviderProfile, ProviderRegistry, QualityVector, RegistryError,
    DEFAULT_SAMPLE_CAPACITY,
};
use crate::router::DEFAULT_PERFORMANCE_WINDOW;
use crate::synthesizer::DEFAULT_MAX_WORKERS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

fn default_health_interval() -> u64 {
    45
}

fn default_health_check_timeout_ms() -> u64 {
    5_000
}

fn default_performance_window() -> usize {
    DEFAULT_PERFORMANCE_WINDOW
}

fn default_sample_capacity() -> usize {
    DEFAULT_SAMPLE_CAPACITY
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

/// Router and health-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// Samples averaged for the recent-performance bonus
    #[serde(default = "default_performance_window")]
    pub performance_window: usize,
    /// Ring buffer size per provider
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            performance_window: default_performance_window(),
            sample_capacity: default_sample_capacity(),
        }
    }
}

impl RouterConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthesizerConfig {
    /// Worker cap for multi-agent graphs
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerSettings {
    #[serde(default)]
    pub tables: OptimizerTables,
    /// Pass switches applied to every plan
    #[serde(default)]
    pub passes: OptimizerConfig,
}

/// Component catalog behind the static capability index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default = "builtin_catalog")]
    pub components: Vec<ComponentDescriptor>,
    /// Used when every capability lookup comes back empty
    #[serde(default = "default_components")]
    pub default_components: Vec<ComponentDescriptor>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            components: builtin_catalog(),
            default_components: default_components(),
        }
    }
}

fn default_providers() -> Vec<ProviderProfile> {
    let all = FeatureFlags::all();
    let text_only = FeatureFlags {
        streaming: true,
        function_calling: true,
        vision: false,
    };
    vec![
        ProviderProfile::new("gpt-4o", "openai")
            .with_base_url("https://api.openai.com/v1")
            .with_context_window(128_000)
            .with_features(all)
            .with_cost(0.0025, 0.01)
            .with_latency(450.0, 90.0)
            .with_quality(QualityVector::new(0.92, 0.88, 0.9, 0.93)),
        ProviderProfile::new("gpt-4o-mini", "openai")
            .with_base_url("https://api.openai.com/v1")
            .with_context_window(128_000)
            .with_features(all)
            .with_cost(0.00015, 0.0006)
            .with_latency(300.0, 120.0)
            .with_quality(QualityVector::new(0.8, 0.78, 0.8, 0.85)),
        ProviderProfile::new("claude-3-5-sonnet", "anthropic")
            .with_base_url("https://api.anthropic.com/v1")
            .with_context_window(200_000)
            .with_features(all)
            .with_cost(0.003, 0.015)
            .with_latency(600.0, 80.0)
            .with_quality(QualityVector::new(0.94, 0.9, 0.9, 0.94)),
        ProviderProfile::new("claude-3-haiku", "anthropic")
            .with_base_url("https://api.anthropic.com/v1")
            .with_context_window(200_000)
            .with_features(text_only)
            .with_cost(0.00025, 0.00125)
            .with_latency(350.0, 140.0)
            .with_quality(QualityVector::new(0.75, 0.72, 0.76, 0.8)),
    ]
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderProfile>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            router: RouterConfig::default(),
            optimizer: OptimizerSettings::default(),
            coordinator: CoordinatorConfig::default(),
            synthesizer: SynthesizerConfig::default(),
            catalog: CatalogConfig::default(),
            debug: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/flowplan/config.{FLOWPLAN_ENV}.json
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        let env = std::env::var("FLOWPLAN_ENV").unwrap_or_else(|_| "production".to_string());
        if let Some(config_dir) = Self::config_dir() {
            let config_path = config_dir.join(format!("config.{}.json", env));
            if config_path.exists() {
                tracing::info!("Loading config from: {:?}", config_path);
                return Self::from_file(&config_path);
            }
        }

        tracing::info!("Using default configuration with environment overrides");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("{} is not a valid number: {:?}", key, value))
            })
        }

        if let Some(value) = lookup("FLOWPLAN_CACHE_TTL_SECS") {
            let secs: u64 = parse("FLOWPLAN_CACHE_TTL_SECS", &value)?;
            self.coordinator.cache_ttl_secs = if secs == 0 { None } else { Some(secs) };
        }

        if let Some(value) = lookup("FLOWPLAN_HEALTH_INTERVAL_SECS") {
            self.router.health_interval_secs = parse("FLOWPLAN_HEALTH_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = lookup("FLOWPLAN_MAX_WORKERS") {
            self.synthesizer.max_workers = parse("FLOWPLAN_MAX_WORKERS", &value)?;
        }

        Ok(())
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate().map_err(ConfigError::ValidationError)?;
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate provider id: {}",
                    provider.id
                )));
            }
        }

        if self.router.health_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "router.health_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.router.performance_window == 0 || self.router.sample_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "router.performance_window and router.sample_capacity must be greater than 0"
                    .to_string(),
            ));
        }

        if self.synthesizer.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "synthesizer.max_workers must be greater than 0".to_string(),
            ));
        }

        let coordinator = &self.coordinator;
        if coordinator.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.top_k must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&coordinator.min_similarity) {
            return Err(ConfigError::ValidationError(format!(
                "coordinator.min_similarity must be between 0.0 and 1.0, got {}",
                coordinator.min_similarity
            )));
        }
        if coordinator.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.cache_capacity must be greater than 0".to_string(),
            ));
        }
        if coordinator.lookup_timeout_ms == 0
            || coordinator.provider_timeout_ms == 0
            || coordinator.sandbox_timeout_ms == 0
        {
            return Err(ConfigError::ValidationError(
                "coordinator timeouts must be greater than 0".to_string(),
            ));
        }
        if coordinator.terminal_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "coordinator.terminal_types cannot be empty".to_string(),
            ));
        }

        self.optimizer
            .tables
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("optimizer.tables: {}", e)))?;

        if self.catalog.default_components.is_empty() {
            return Err(ConfigError::ValidationError(
                "catalog.default_components cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Registry populated with the configured providers, all marked available
    /// until the first health check runs
    pub fn provider_registry(&self) -> Result<ProviderRegistry, RegistryError> {
        ProviderRegistry::from_profiles(self.providers.iter().cloned(), self.router.sample_capacity)
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("flowplan"))
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
