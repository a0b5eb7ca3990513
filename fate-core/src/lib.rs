//! Fate Core game engine with an AI Game Master.
//!
//! This crate provides:
//! - Fate Core rules: aspects, the skill pyramid, stress tracks and consequences
//! - The fate point economy (invokes, compels, concessions)
//! - A conflict resolver for absorbing hits
//! - Reconciliation of generated narrative into immutable state transitions
//! - An AI Game Master using Claude, with retry and image cooldown
//! - Save/load persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use fate_core::{create_sample_character, GameMaster, GameSession, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gm = GameMaster::from_env()?;
//!     let character = create_sample_character("Aldric");
//!     let mut session = GameSession::start(gm, character, "dark fantasy", Settings::default()).await?;
//!
//!     session.invoke_aspect("Dense Fog")?;
//!     let outcome = session.player_action("I slip past the sentry", "Stealth", None).await?;
//!     if let Some(image) = outcome.image {
//!         session.fetch_image(image).await.ok();
//!     }
//!     println!("{}", session.state().last_entry().map(|e| e.content.as_str()).unwrap_or(""));
//!     Ok(())
//! }
//! ```

pub mod character_builder;
pub mod conflict;
pub mod dice;
pub mod fate;
pub mod gm;
pub mod payload;
pub mod persist;
pub mod reconcile;
pub mod rules;
pub mod session;
pub mod settings;
pub mod testing;
pub mod validate;
pub mod world;

// Primary public API
pub use character_builder::{BuilderError, CharacterBuilder};
pub use conflict::{Absorption, ConflictError, Hit, HitState, PendingHit};
pub use fate::{CompelChoice, FateError, InvokeSet};
pub use gm::{GameMaster, Generator, GeneratorConfig, GeneratorError};
pub use payload::{Compel, NarrativeResponse, PayloadError};
pub use persist::{JsonFileStore, MemoryStore, Persistence, SaveStore};
pub use session::{GameSession, SceneOutcome, SessionError, TurnOutcome};
pub use settings::{Difficulty, ImageFrequency, Language, Settings};
pub use testing::{MockGenerator, MockReply, TestHarness};
pub use world::{
    create_sample_character, create_sample_scene, Character, GameState, Scene, StressType,
};
