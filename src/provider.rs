//! Provider client abstraction
//!
//! The orchestrator only needs one thing from a model backend: turn a
//! prompt into text. [`ProviderClient`] is that seam. The bundled
//! [`OpenAiCompatibleClient`] speaks the `/chat/completions` dialect shared
//! by OpenAI, Groq and Ollama's `/v1` endpoint.
//!
//! ```no_run
//! use flowplan::provider::{OpenAiCompatibleClient, ProviderClient};
//! use flowplan::registry::ProviderProfile;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // export OPENAI_API_KEY=sk-...
//! let profile = ProviderProfile::new("openai/gpt-4o-mini", "openai")
//!     .with_base_url("https://api.openai.com/v1");
//! let client = OpenAiCompatibleClient::new(std::time::Duration::from_secs(60));
//! let response = client.complete(&profile, "Explain Rust ownership").await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

use crate::registry::{EnvCredentialSource, ProviderProfile};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Response from a model provider
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Model provider trait
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Generate a completion on the given provider
    async fn complete(
        &self,
        profile: &ProviderProfile,
        prompt: &str,
    ) -> Result<ProviderResponse, ProviderError>;
}

pub struct OpenAiCompatibleClient {
    client: Client,
    credentials: EnvCredentialSource,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl OpenAiCompatibleClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            credentials: EnvCredentialSource::new(),
            temperature: 0.2,
            max_tokens: Some(1024),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        profile: &ProviderProfile,
        prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let base_url = profile.base_url.as_deref().ok_or_else(|| {
            ProviderError::ConnectionError(format!("provider {} has no base_url", profile.id))
        })?;
        let api_key = self.credentials.resolve(profile).ok_or_else(|| {
            ProviderError::AuthError(format!("credential for {} not found", profile.id))
        })?;

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: profile.model_name(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        if response.status() == 401 {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(ProviderError::ModelError(format!(
                "HTTP {}: {}",
                status,
                response.text().await?
            )));
        }

        let chat: ChatResponse = response.json().await?;
        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        Ok(ProviderResponse {
            content: choice.message.content,
            model: chat.model,
            finish_reason: choice.finish_reason,
        })
    }
}
