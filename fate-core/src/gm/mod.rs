//! AI Game Master module.
//!
//! Contains the generator seam, the Claude-backed generator, prompt
//! construction, retry policy and the image cooldown gate.

mod agent;
mod image;
pub mod prompts;
mod retry;

pub use agent::GameMaster;
pub use image::ImageGate;
pub use prompts::{ActionSummary, Prompt};
pub use retry::RetryPolicy;

use crate::payload::PayloadError;
use async_trait::async_trait;
use claude::{Claude, Message, Request, StopReason};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from generating content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("The AI service is currently busy or the quota has been exceeded. Please wait a moment and try again.")]
    RateLimited,

    #[error("You've exceeded the image generation quota. Image generation will be paused for a minute to cool down.")]
    ImageRateLimited,

    #[error("Image generation is on cooldown due to recent rate limits.")]
    ImageCooldown,

    #[error("No API key configured")]
    NoApiKey,

    #[error("Generator backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Attempted to call the generator with an empty prompt")]
    EmptyPrompt,
}

impl GeneratorError {
    /// Rate-limit class failures, including the image cooldown.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            GeneratorError::RateLimited
                | GeneratorError::ImageRateLimited
                | GeneratorError::ImageCooldown
        )
    }
}

impl From<claude::Error> for GeneratorError {
    fn from(error: claude::Error) -> Self {
        match error {
            claude::Error::RateLimited { .. } => GeneratorError::RateLimited,
            claude::Error::NoApiKey => GeneratorError::NoApiKey,
            other => GeneratorError::Backend(other.to_string()),
        }
    }
}

/// Configuration for the Game Master.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// The model to use (the client's default when unset).
    pub model: Option<String>,

    /// Maximum tokens for responses.
    pub max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,

    /// Attempts per request, counting the first.
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `2^n` units plus up to one unit of jitter.
    pub base_backoff: Duration,

    /// How long image generation stays off after a rate limit.
    pub image_cooldown: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: Some(0.9),
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            image_cooldown: Duration::from_secs(60),
        }
    }
}

impl GeneratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_image_cooldown(mut self, image_cooldown: Duration) -> Self {
        self.image_cooldown = image_cooldown;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_backoff)
    }
}

/// Anything that can turn a prompt into JSON-ish text.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the raw text response to a prompt.
    async fn generate(&self, prompt: &Prompt) -> Result<String, GeneratorError>;

    /// Produce an image URL for a prompt, or `None` if no image came back.
    async fn generate_image(&self, _prompt: &str) -> Result<Option<String>, GeneratorError> {
        Ok(None)
    }
}

/// Generator backed by the Claude Messages API.
///
/// Responses are prefilled with `{` so the model answers with a bare JSON
/// object. Claude has no image endpoint, so images are never produced.
pub struct ClaudeGenerator {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeGenerator {
    pub fn new(client: Claude) -> Self {
        Self::from_config(client, &GeneratorConfig::default())
    }

    /// Create a generator from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, GeneratorError> {
        Ok(Self::new(Claude::from_env()?))
    }

    pub fn from_config(client: Claude, config: &GeneratorConfig) -> Self {
        let client = match &config.model {
            Some(model) => client.with_model(model.clone()),
            None => client,
        };
        Self {
            client,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl Generator for ClaudeGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GeneratorError> {
        let mut request = Request::new(vec![Message::user(prompt.user.clone())])
            .with_system(prompt.system.clone())
            .with_max_tokens(self.max_tokens)
            .with_prefill("{");
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.client.complete(request).await?;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Generator responded"
        );
        if response.stop_reason == StopReason::MaxTokens {
            warn!(max_tokens = self.max_tokens, "Generator response was truncated");
        }

        Ok(format!("{{{}", response.text))
    }
}
