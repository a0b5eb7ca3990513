//! AI Game Master.
//!
//! The GameMaster turns game situations into prompts, sends them to a
//! [`Generator`] with the retry policy applied, and hands back validated
//! payloads. It never touches game state itself.

use super::image::ImageGate;
use super::prompts::{self, ActionSummary, Prompt};
use super::{ClaudeGenerator, Generator, GeneratorConfig, GeneratorError};
use crate::conflict::Hit;
use crate::payload::{
    parse_payload, CharacterOptions, GeneratedCharacter, NarrativeResponse, OpeningScene, Payload,
    SceneTransition,
};
use crate::settings::Settings;
use crate::world::{Character, GameState};
use tracing::{debug, error, info};

/// The AI Game Master.
pub struct GameMaster {
    generator: Box<dyn Generator>,
    config: GeneratorConfig,
    image_gate: ImageGate,
}

impl GameMaster {
    /// Create a GameMaster around any generator.
    pub fn new(generator: impl Generator + 'static) -> Self {
        let config = GeneratorConfig::default();
        Self {
            generator: Box::new(generator),
            image_gate: ImageGate::new(config.image_cooldown),
            config,
        }
    }

    /// Create a Claude-backed GameMaster from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, GeneratorError> {
        Ok(Self::new(ClaudeGenerator::from_env()?))
    }

    /// Configure the GameMaster. Resets the image cooldown.
    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.image_gate = ImageGate::new(config.image_cooldown);
        self.config = config;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn image_gate(&self) -> &ImageGate {
        &self.image_gate
    }

    /// Send a prompt (retrying rate limits) and parse the reply as `P`.
    pub async fn request<P: Payload>(&self, prompt: &Prompt) -> Result<P, GeneratorError> {
        if prompt.is_empty() {
            error!(kind = P::KIND, "Refusing to send an empty prompt");
            return Err(GeneratorError::EmptyPrompt);
        }

        let policy = self.config.retry_policy();
        let text = policy
            .run(|attempt| {
                debug!(kind = P::KIND, attempt, "Requesting payload");
                self.generator.generate(prompt)
            })
            .await?;

        let payload = parse_payload::<P>(&text)?;
        info!(kind = P::KIND, "Payload accepted");
        Ok(payload)
    }

    pub async fn request_character_options(
        &self,
        genre: &str,
        settings: &Settings,
    ) -> Result<CharacterOptions, GeneratorError> {
        self.request(&prompts::character_options(genre, settings))
            .await
    }

    pub async fn generate_character(
        &self,
        genre: &str,
        settings: &Settings,
    ) -> Result<GeneratedCharacter, GeneratorError> {
        self.request(&prompts::generate_character(genre, settings))
            .await
    }

    pub async fn opening_scene(
        &self,
        character: &Character,
        genre: &str,
        settings: &Settings,
    ) -> Result<OpeningScene, GeneratorError> {
        self.request(&prompts::opening_scene(character, genre, settings))
            .await
    }

    pub async fn resolve_turn(
        &self,
        state: &GameState,
        action: &ActionSummary,
        settings: &Settings,
    ) -> Result<NarrativeResponse, GeneratorError> {
        self.request(&prompts::turn(state, action, settings)).await
    }

    pub async fn taken_out(
        &self,
        state: &GameState,
        hit: &Hit,
        settings: &Settings,
    ) -> Result<SceneTransition, GeneratorError> {
        self.request(&prompts::taken_out(state, hit, settings))
            .await
    }

    pub async fn concession(
        &self,
        state: &GameState,
        hit: &Hit,
        settings: &Settings,
    ) -> Result<SceneTransition, GeneratorError> {
        self.request(&prompts::concession(state, hit, settings))
            .await
    }

    /// Generate an image, honoring the cooldown.
    ///
    /// A rate limit from the backend closes the gate and is reported as
    /// [`GeneratorError::ImageRateLimited`]; while the gate is closed the
    /// backend is not called at all.
    pub async fn image(&mut self, prompt: &str) -> Result<Option<String>, GeneratorError> {
        self.image_gate.check()?;
        if prompt.trim().is_empty() {
            return Err(GeneratorError::EmptyPrompt);
        }

        match self.generator.generate_image(&prompts::image(prompt)).await {
            Ok(url) => Ok(url),
            Err(GeneratorError::RateLimited) | Err(GeneratorError::ImageRateLimited) => {
                self.image_gate.trip();
                Err(GeneratorError::ImageRateLimited)
            }
            Err(e) => {
                error!(error = %e, "Image generation failed");
                Err(e)
            }
        }
    }
}
