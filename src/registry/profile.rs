//! Static capability profile of a provider/model

use serde::{Deserialize, Serialize};

/// Optional capabilities a request may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Streaming,
    FunctionCalling,
    Vision,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::FunctionCalling => write!(f, "function_calling"),
            Self::Vision => write!(f, "vision"),
        }
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "streaming" | "stream" => Ok(Self::Streaming),
            "function_calling" | "functions" | "tools" => Ok(Self::FunctionCalling),
            "vision" => Ok(Self::Vision),
            other => Err(format!("Unknown feature: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureFlags {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub function_calling: bool,
    #[serde(default)]
    pub vision: bool,
}

impl FeatureFlags {
    pub fn all() -> Self {
        Self {
            streaming: true,
            function_calling: true,
            vision: true,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Streaming => self.streaming,
            Feature::FunctionCalling => self.function_calling,
            Feature::Vision => self.vision,
        }
    }
}

/// Price per 1000 units (tokens)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostPer1k {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatencyProfile {
    /// Time to first token, in milliseconds
    pub time_to_first_token_ms: f64,
    /// Sustained generation throughput
    pub tokens_per_second: f64,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            time_to_first_token_ms: 1000.0,
            tokens_per_second: 50.0,
        }
    }
}

/// Named axis of the quality vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Reasoning,
    Creativity,
    Factuality,
    InstructionFollowing,
}

impl std::str::FromStr for QualityDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "reasoning" => Ok(Self::Reasoning),
            "creativity" => Ok(Self::Creativity),
            "factuality" => Ok(Self::Factuality),
            "instruction_following" | "instructions" => Ok(Self::InstructionFollowing),
            other => Err(format!("Unknown quality dimension: {}", other)),
        }
    }
}

/// Quality scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityVector {
    pub reasoning: f64,
    pub creativity: f64,
    pub factuality: f64,
    pub instruction_following: f64,
}

impl QualityVector {
    pub fn new(reasoning: f64, creativity: f64, factuality: f64, instruction_following: f64) -> Self {
        Self {
            reasoning,
            creativity,
            factuality,
            instruction_following,
        }
    }

    /// Same score on every axis
    pub fn uniform(score: f64) -> Self {
        Self::new(score, score, score, score)
    }

    pub fn get(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::Reasoning => self.reasoning,
            QualityDimension::Creativity => self.creativity,
            QualityDimension::Factuality => self.factuality,
            QualityDimension::InstructionFollowing => self.instruction_following,
        }
    }

    pub fn mean(&self) -> f64 {
        (self.reasoning + self.creativity + self.factuality + self.instruction_following) / 4.0
    }

    /// Sum of absolute per-dimension differences
    pub fn distance(&self, other: &QualityVector) -> f64 {
        (self.reasoning - other.reasoning).abs()
            + (self.creativity - other.creativity).abs()
            + (self.factuality - other.factuality).abs()
            + (self.instruction_following - other.instruction_following).abs()
    }

    fn is_valid(&self) -> bool {
        [
            self.reasoning,
            self.creativity,
            self.factuality,
            self.instruction_following,
        ]
        .iter()
        .all(|v| (0.0..=1.0).contains(v))
    }
}

/// Capabilities, prices and speed of a backend model.
///
/// Profiles are immutable once registered; availability and performance
/// samples live next to them inside the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderProfile {
    /// Unique provider/model identifier (e.g. "openai/gpt-4o-mini")
    pub id: String,
    /// Owning backend (e.g. "openai", "anthropic")
    pub backend: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default)]
    pub features: FeatureFlags,
    pub cost: CostPer1k,
    #[serde(default)]
    pub latency: LatencyProfile,
    pub quality: QualityVector,
    /// Base URL of an OpenAI-compatible API, used by health checks and the HTTP client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name sent to the API (defaults to the part of `id` after '/')
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Credential reference: env var name like "OPENAI_API_KEY" or a literal key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn default_context_window() -> u32 {
    8192
}

impl ProviderProfile {
    pub fn new(id: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend: backend.into(),
            context_window: default_context_window(),
            features: FeatureFlags::default(),
            cost: CostPer1k::default(),
            latency: LatencyProfile::default(),
            quality: QualityVector::uniform(0.5),
            base_url: None,
            model: None,
            credential: None,
        }
    }

    pub fn with_cost(mut self, input: f64, output: f64) -> Self {
        self.cost = CostPer1k { input, output };
        self
    }

    pub fn with_latency(mut self, time_to_first_token_ms: f64, tokens_per_second: f64) -> Self {
        self.latency = LatencyProfile {
            time_to_first_token_ms,
            tokens_per_second,
        };
        self
    }

    pub fn with_quality(mut self, quality: QualityVector) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Model name used on the wire
    pub fn model_name(&self) -> &str {
        match &self.model {
            Some(model) => model,
            None => self.id.rsplit('/').next().unwrap_or(&self.id),
        }
    }

    /// Quality score used by constraint checks: the mean, or one named axis
    pub fn quality_score(&self, dimension: Option<QualityDimension>) -> f64 {
        match dimension {
            Some(dim) => self.quality.get(dim),
            None => self.quality.mean(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("provider id cannot be empty".to_string());
        }
        if self.backend.trim().is_empty() {
            return Err(format!("provider {} has an empty backend", self.id));
        }
        if self.cost.input < 0.0 || self.cost.output < 0.0 {
            return Err(format!("provider {} has a negative cost", self.id));
        }
        if self.latency.time_to_first_token_ms < 0.0 || self.latency.tokens_per_second <= 0.0 {
            return Err(format!("provider {} has an invalid latency profile", self.id));
        }
        if !self.quality.is_valid() {
            return Err(format!(
                "provider {} has quality scores outside [0, 1]",
                self.id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_distance_is_l1() {
        let a = QualityVector::new(0.9, 0.8, 0.7, 0.6);
        let b = QualityVector::new(0.8, 0.8, 0.9, 0.6);
        assert!((a.distance(&b) - 0.3).abs() < 1e-9);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_quality_score_by_dimension() {
        let profile = ProviderProfile::new("p", "b")
            .with_quality(QualityVector::new(1.0, 0.0, 0.5, 0.5));
        assert_eq!(profile.quality_score(None), 0.5);
        assert_eq!(profile.quality_score(Some(QualityDimension::Reasoning)), 1.0);
    }

    #[test]
    fn test_model_name_defaults_to_id_suffix() {
        let profile = ProviderProfile::new("openai/gpt-4o-mini", "openai");
        assert_eq!(profile.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let json = r#"{"id":"a","backend":"b","cost":{"input":0.1,"output":0.1},
            "quality":{"reasoning":0.5,"creativity":0.5,"factuality":0.5,"instruction_following":0.5},
            "colour":"blue"}"#;
        assert!(serde_json::from_str::<ProviderProfile>(json).is_err());
    }

    #[test]
    fn test_validate_quality_range() {
        let profile = ProviderProfile::new("p", "b").with_quality(QualityVector::uniform(1.5));
        assert!(profile.validate().is_err());
    }
}
