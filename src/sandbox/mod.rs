//! Sandboxed execution contract
//!
//! Only consumed while validating plans that contain code-execution
//! nodes. The executor itself lives outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Strict,
    Standard,
    Permissive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SandboxOutcome {
    Success { output: String },
    Failure { error: String },
}

impl SandboxOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SandboxOutcome::Success { .. })
    }
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        language: &str,
        level: SecurityLevel,
    ) -> anyhow::Result<SandboxOutcome>;
}
