//! Testing utilities for the Fate engine.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic testing without API calls
//! - `TestHarness` for scripted game scenarios
//! - Assertion helpers for verifying game state

use crate::dice::{FateDie, FateRoll};
use crate::gm::{GameMaster, Generator, GeneratorConfig, GeneratorError, Prompt};
use crate::session::{GameSession, SessionError, TurnOutcome};
use crate::settings::Settings;
use crate::world::{
    create_sample_character, create_sample_scene, Character, EntryKind, GameState, LogEntry,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A scripted generator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Raw generator text (or an image URL for image replies).
    Text(String),
    RateLimited,
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    images: VecDeque<MockReply>,
    prompts: Vec<Prompt>,
    image_prompts: Vec<String>,
}

/// A generator that returns scripted replies in order.
///
/// Clones share the same script and call record, so a test can keep one
/// handle while the [`GameMaster`] owns another.
#[derive(Debug, Clone, Default)]
pub struct MockGenerator {
    inner: Arc<Mutex<MockState>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a reply for the next text request.
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push_reply(reply);
        self
    }

    /// Queue raw text for the next text request.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(MockReply::Text(text.into()))
    }

    /// Queue a reply for the next image request.
    pub fn with_image(self, reply: MockReply) -> Self {
        self.push_image(reply);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.lock().replies.push_back(reply);
    }

    pub fn push_image(&self, reply: MockReply) {
        self.lock().images.push_back(reply);
    }

    /// Text requests made so far.
    pub fn call_count(&self) -> usize {
        self.lock().prompts.len()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.lock().prompts.clone()
    }

    pub fn image_call_count(&self) -> usize {
        self.lock().image_prompts.len()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.lock().image_prompts.clone()
    }

    /// Scripted text replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GeneratorError> {
        let mut state = self.lock();
        state.prompts.push(prompt.clone());
        match state.replies.pop_front() {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::RateLimited) => Err(GeneratorError::RateLimited),
            Some(MockReply::Fail(message)) => Err(GeneratorError::Backend(message)),
            None => Err(GeneratorError::Backend(
                "The mock generator has no more scripted replies".to_string(),
            )),
        }
    }

    /// Without a scripted image reply, no image is produced.
    async fn generate_image(&self, prompt: &str) -> Result<Option<String>, GeneratorError> {
        let mut state = self.lock();
        state.image_prompts.push(prompt.to_string());
        match state.images.pop_front() {
            Some(MockReply::Text(url)) => Ok(Some(url)),
            Some(MockReply::RateLimited) => Err(GeneratorError::RateLimited),
            Some(MockReply::Fail(message)) => Err(GeneratorError::Backend(message)),
            None => Ok(None),
        }
    }
}

/// Four blank dice: the total is just skill plus invokes.
pub fn flat_roll() -> FateRoll {
    FateRoll::new([FateDie::Blank; 4])
}

/// Test harness for running game scenarios.
pub struct TestHarness {
    /// The game under test.
    pub session: GameSession,
    /// Handle on the generator the session talks to.
    pub mock: MockGenerator,
}

impl TestHarness {
    /// Sample character in the sample scene, default settings, no backoff.
    pub fn new() -> Self {
        Self::with_state(GameState::new(
            create_sample_character("Test Hero"),
            create_sample_scene(),
        ))
    }

    pub fn with_character(character: Character) -> Self {
        Self::with_state(GameState::new(character, create_sample_scene()))
    }

    pub fn with_state(state: GameState) -> Self {
        let mock = MockGenerator::new();
        let gm = GameMaster::new(mock.clone()).with_config(
            GeneratorConfig::default()
                .with_base_backoff(Duration::ZERO)
                .with_image_cooldown(Duration::from_secs(60)),
        );
        let session = GameSession::resume(gm, state, Settings::default());
        Self { session, mock }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.session.set_settings(settings);
        self
    }

    /// Queue a raw turn payload.
    pub fn expect_turn(&mut self, payload: serde_json::Value) -> &mut Self {
        self.mock.push_reply(MockReply::Text(payload.to_string()));
        self
    }

    /// Queue a turn that only narrates.
    pub fn expect_narration(&mut self, text: &str) -> &mut Self {
        self.expect_turn(json!({ "narration": text }))
    }

    pub fn expect_reply(&mut self, reply: MockReply) -> &mut Self {
        self.mock.push_reply(reply);
        self
    }

    pub fn expect_image(&mut self, reply: MockReply) -> &mut Self {
        self.mock.push_image(reply);
        self
    }

    /// Take an action with a flat roll.
    pub async fn act(&mut self, description: &str, skill: &str) -> Result<TurnOutcome, SessionError> {
        self.session
            .player_action_with_roll(description, skill, None, flat_roll())
            .await
    }

    pub fn state(&self) -> &GameState {
        self.session.state()
    }

    pub fn fate_points(&self) -> i32 {
        self.session.character().fate_points
    }

    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.session.state().last_entry()
    }

    /// Contents of every entry of one kind, oldest first.
    pub fn entries(&self, kind: EntryKind) -> Vec<&str> {
        self.session
            .state()
            .entries_of(kind)
            .map(|e| e.content.as_str())
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

#[track_caller]
pub fn assert_fate_points(harness: &TestHarness, expected: i32) {
    let actual = harness.fate_points();
    assert_eq!(actual, expected, "Expected {expected} fate points, got {actual}");
}

/// Assert the newest log entry has the given kind and contains `text`.
#[track_caller]
pub fn assert_last_entry(harness: &TestHarness, kind: EntryKind, text: &str) {
    let Some(entry) = harness.last_entry() else {
        panic!("Expected a non-empty story log");
    };
    assert_eq!(entry.kind, kind, "Unexpected last entry: {entry:?}");
    assert!(
        entry.content.contains(text),
        "Expected last entry to contain '{text}', got '{}'",
        entry.content
    );
}

#[track_caller]
pub fn assert_input_locked(harness: &TestHarness) {
    assert!(harness.session.is_input_locked(), "Expected input to be locked");
}

#[track_caller]
pub fn assert_input_open(harness: &TestHarness) {
    assert!(!harness.session.is_input_locked(), "Expected input to be open");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_generator_script_order() {
        let mock = MockGenerator::new()
            .with_text("one")
            .with_reply(MockReply::RateLimited);

        let prompt = Prompt::new("s", "u");
        assert_eq!(mock.generate(&prompt).await, Ok("one".to_string()));
        assert_eq!(mock.generate(&prompt).await, Err(GeneratorError::RateLimited));
        assert!(matches!(
            mock.generate(&prompt).await,
            Err(GeneratorError::Backend(_))
        ));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_generator_images_default_to_none() {
        let mock = MockGenerator::new();
        assert_eq!(mock.generate_image("a cat").await, Ok(None));
        assert_eq!(mock.image_prompts(), vec!["a cat".to_string()]);
    }

    #[tokio::test]
    async fn test_harness_multiple_turns() {
        let mut harness = TestHarness::new();
        harness
            .expect_narration("Response 1")
            .expect_narration("Response 2");

        harness.act("first", "Notice").await.unwrap();
        assert_last_entry(&harness, EntryKind::Narration, "Response 1");
        harness.act("second", "Notice").await.unwrap();
        assert_last_entry(&harness, EntryKind::Narration, "Response 2");

        // Script exhausted.
        assert!(harness.act("third", "Notice").await.is_err());
        assert_last_entry(&harness, EntryKind::Error, "no more scripted");
        assert_eq!(harness.entries(EntryKind::Action).len(), 2);
        assert_fate_points(&harness, 3);
    }
}
