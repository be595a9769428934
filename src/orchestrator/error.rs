use crate::router::RouterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Orchestration stage that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DetectMissingInfo,
    InterpretIntent,
    SelectComponents,
    SelectProvider,
    Synthesize,
    Validate,
    Optimize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DetectMissingInfo => "detect_missing_info",
            Stage::InterpretIntent => "interpret_intent",
            Stage::SelectComponents => "select_components",
            Stage::SelectProvider => "select_provider",
            Stage::Synthesize => "synthesize",
            Stage::Validate => "validate",
            Stage::Optimize => "optimize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Orchestration failed at stage {stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("Orchestration cancelled")]
    Cancelled,
}

impl OrchestrationError {
    /// Wrap an error with its stage; a cancelled provider call stays a cancellation
    pub fn at(stage: Stage, error: impl Into<anyhow::Error>) -> Self {
        let source = error.into();
        if matches!(source.downcast_ref::<RouterError>(), Some(RouterError::Cancelled)) {
            return OrchestrationError::Cancelled;
        }
        OrchestrationError::Stage { stage, source }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrchestrationError::Stage { stage, .. } => Some(*stage),
            OrchestrationError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestrationError::Cancelled)
    }

    pub fn router_error(&self) -> Option<&RouterError> {
        match self {
            OrchestrationError::Stage { source, .. } => source.downcast_ref::<RouterError>(),
            OrchestrationError::Cancelled => None,
        }
    }
}
