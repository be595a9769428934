//! Stage-type and provider tables the passes consult
//!
//! Loaded from the `optimizer.tables` section of the config file; tests
//! substitute their own fixtures.

use crate::graph::stage;
use crate::graph::RetryPolicy;
use serde::{Deserialize, Serialize};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_essential() -> Vec<String> {
    strings(&[stage::CHAT_INPUT, stage::CHAT_OUTPUT, stage::TEXT_OUTPUT])
}

fn default_cacheable() -> Vec<String> {
    strings(&[stage::LANGUAGE_MODEL, stage::AGENT, stage::VECTOR_STORE, stage::RETRIEVER])
}

fn default_model_call() -> Vec<String> {
    strings(&[stage::LANGUAGE_MODEL])
}

fn default_external_call() -> Vec<String> {
    strings(&[
        stage::LANGUAGE_MODEL,
        stage::AGENT,
        stage::API_REQUEST,
        stage::WEB_SEARCH,
        stage::URL_LOADER,
        stage::CODE_EXECUTOR,
    ])
}

fn default_instruction() -> Vec<String> {
    strings(&[stage::PROMPT, stage::INSTRUCTION])
}

fn default_cache_stage() -> String {
    stage::CACHE.to_string()
}

fn default_fast_providers() -> Vec<String> {
    strings(&["gpt-4o-mini", "claude-3-haiku", "gemini-1.5-flash"])
}

fn default_fast_provider() -> String {
    "gpt-4o-mini".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerTables {
    /// Kept by dead-node elimination even when disconnected
    #[serde(default = "default_essential")]
    pub essential: Vec<String>,
    /// Get a cache node inserted upstream
    #[serde(default = "default_cacheable")]
    pub cacheable: Vec<String>,
    /// Nodes whose `provider` config the substitution passes may rewrite
    #[serde(default = "default_model_call")]
    pub model_call: Vec<String>,
    /// Get a retry policy
    #[serde(default = "default_external_call")]
    pub external_call: Vec<String>,
    /// Candidates for sequential fusion
    #[serde(default = "default_instruction")]
    pub instruction: Vec<String>,
    #[serde(default = "default_cache_stage")]
    pub cache_stage: String,
    #[serde(default = "default_fast_providers")]
    pub fast_providers: Vec<String>,
    #[serde(default = "default_fast_provider")]
    pub default_fast_provider: String,
    #[serde(default)]
    pub retry_default: RetryPolicy,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for OptimizerTables {
    fn default() -> Self {
        Self {
            essential: default_essential(),
            cacheable: default_cacheable(),
            model_call: default_model_call(),
            external_call: default_external_call(),
            instruction: default_instruction(),
            cache_stage: default_cache_stage(),
            fast_providers: default_fast_providers(),
            default_fast_provider: default_fast_provider(),
            retry_default: RetryPolicy::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl OptimizerTables {
    pub fn is_essential(&self, stage_type: &str) -> bool {
        self.essential.iter().any(|s| s == stage_type)
    }

    pub fn is_cacheable(&self, stage_type: &str) -> bool {
        self.cacheable.iter().any(|s| s == stage_type)
    }

    pub fn is_model_call(&self, stage_type: &str) -> bool {
        self.model_call.iter().any(|s| s == stage_type)
    }

    pub fn is_external_call(&self, stage_type: &str) -> bool {
        self.external_call.iter().any(|s| s == stage_type)
    }

    pub fn is_instruction(&self, stage_type: &str) -> bool {
        self.instruction.iter().any(|s| s == stage_type)
    }

    pub fn is_fast(&self, provider_id: &str) -> bool {
        self.fast_providers.iter().any(|p| p == provider_id)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cache_stage.trim().is_empty() {
            return Err("cache_stage must not be empty".to_string());
        }
        if self.default_fast_provider.trim().is_empty() {
            return Err("default_fast_provider must not be empty".to_string());
        }
        if self.retry_default.max_attempts == 0 {
            return Err("retry_default.max_attempts must be at least 1".to_string());
        }
        if self.retry_default.initial_backoff_ms > self.retry_default.max_backoff_ms {
            return Err("retry_default.initial_backoff_ms exceeds max_backoff_ms".to_string());
        }
        Ok(())
    }
}
