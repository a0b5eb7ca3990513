//! GameSession - the primary public API for Fate gameplay.
//!
//! Wraps the [`GameMaster`], the current [`GameState`], staged invokes and
//! any hit or compel awaiting the player. Every method takes `&mut self`, so
//! at most one generator request is in flight per session.

use crate::conflict::{Absorption, ConflictError, PendingHit, TransitionKind};
use crate::dice::{roll_4df, ActionRoll, FateRoll};
use crate::fate::{self, CompelChoice, FateError, InvokeSet, InvokeToggle};
use crate::gm::{ActionSummary, GameMaster, GeneratorError};
use crate::payload::Compel;
use crate::persist::{PersistError, Persistence};
use crate::reconcile::{reconcile, reconcile_transition, settle_image, ImageRequest, Reconciled};
use crate::settings::Settings;
use crate::world::{Character, EntryId, GameState, LogEntry};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from GameSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Fate(#[from] FateError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Resolve the pending hit or compel first")]
    InputLocked,

    #[error("No hit is waiting to be resolved")]
    NoPendingHit,

    #[error("No compel is waiting for an answer")]
    NoPendingCompel,

    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Describe what you want to do")]
    EmptyAction,

    #[error("No save store configured")]
    NoPersistence,
}

/// What a resolved player action produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub roll: ActionRoll,
    pub narration_id: EntryId,
    /// Pass to [`GameSession::fetch_image`] to fill in the narration's image.
    pub image: Option<ImageRequest>,
    pub hit: Option<PendingHit>,
    pub compel: Option<Compel>,
}

/// What ending a conflict produced.
#[derive(Debug, Clone)]
pub struct SceneOutcome {
    pub narration_id: EntryId,
    pub image: Option<ImageRequest>,
}

/// A game in progress.
pub struct GameSession {
    gm: GameMaster,
    settings: Settings,
    state: GameState,
    invokes: InvokeSet,
    pending_hit: Option<PendingHit>,
    pending_compel: Option<Compel>,
    persistence: Option<Persistence>,
}

impl GameSession {
    /// Start a new game: ask for an opening scene for `character` in `genre`.
    ///
    /// The opening image, if any, is awaited here. Failing to get one is not
    /// an error.
    pub async fn start(
        mut gm: GameMaster,
        character: Character,
        genre: &str,
        settings: Settings,
    ) -> Result<Self, SessionError> {
        info!(character = %character.name, genre, "Starting new game");
        let opening = gm.opening_scene(&character, genre, &settings).await?;

        let image_url = match opening.image_prompt.as_deref() {
            Some(prompt) if settings.allows_images() => match gm.image(prompt).await {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "Opening scene image unavailable, continuing without one");
                    None
                }
            },
            _ => None,
        };

        let mut scene = opening.scene;
        scene.image_url = image_url.clone();
        scene.has_offered_compel = false;

        let mut entry = LogEntry::narration(scene.description.clone());
        entry.image_url = image_url;

        let mut state = GameState::new(character, scene);
        state.log(entry);
        Ok(Self::resume(gm, state, settings))
    }

    /// Continue from an existing state, e.g. one just loaded.
    pub fn resume(gm: GameMaster, state: GameState, settings: Settings) -> Self {
        Self {
            gm,
            settings,
            state,
            invokes: InvokeSet::new(),
            pending_hit: None,
            pending_compel: None,
            persistence: None,
        }
    }

    /// Load the saved game and settings. `None` if there is no usable save.
    pub async fn load(
        gm: GameMaster,
        persistence: Persistence,
    ) -> Result<Option<Self>, SessionError> {
        let settings = persistence.load_settings().await?;
        let Some(state) = persistence.load().await? else {
            return Ok(None);
        };
        info!(character = %state.character.name, entries = state.story_log.len(), "Resumed saved game");
        Ok(Some(
            Self::resume(gm, state, settings).with_persistence(persistence),
        ))
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Save the game and the settings.
    pub async fn save(&self) -> Result<(), SessionError> {
        let persistence = self.persistence.as_ref().ok_or(SessionError::NoPersistence)?;
        persistence.save(&self.state).await?;
        persistence.save_settings(&self.settings).await?;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn character(&self) -> &Character {
        &self.state.character
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn game_master(&self) -> &GameMaster {
        &self.gm
    }

    pub fn invokes(&self) -> &InvokeSet {
        &self.invokes
    }

    pub fn pending_hit(&self) -> Option<&PendingHit> {
        self.pending_hit.as_ref()
    }

    pub fn pending_compel(&self) -> Option<&Compel> {
        self.pending_compel.as_ref()
    }

    /// Actions and invokes are refused while a hit or compel is waiting.
    pub fn is_input_locked(&self) -> bool {
        self.pending_hit.is_some() || self.pending_compel.is_some()
    }

    // ========================================================================
    // Player Actions
    // ========================================================================

    /// Stage or un-stage an aspect for the next action.
    ///
    /// A scene aspect with a free invoke is staged for free; anything else
    /// costs a fate point now.
    pub fn invoke_aspect(&mut self, name: &str) -> Result<InvokeToggle, SessionError> {
        if self.is_input_locked() {
            return Err(SessionError::InputLocked);
        }
        if !self.invokes.is_invoked(name) && !self.is_known_aspect(name) {
            return Err(FateError::UnknownAspect(name.to_string()).into());
        }

        let is_free = self
            .state
            .scene
            .aspect(name)
            .is_some_and(|a| a.has_free_invoke);
        let toggle = self
            .invokes
            .toggle(&mut self.state.character, name, is_free)?;
        debug!(aspect = name, ?toggle, fate_points = self.state.character.fate_points, "Invoke toggled");
        Ok(toggle)
    }

    fn is_known_aspect(&self, name: &str) -> bool {
        self.state.scene.aspect(name).is_some()
            || self.state.character.has_aspect(name)
            || self
                .state
                .character
                .consequences
                .iter()
                .any(|c| c.aspect.name == name)
            || self
                .state
                .scene
                .active_opponents()
                .flat_map(|o| o.aspects.iter())
                .any(|a| a.name == name)
    }

    /// Roll and resolve a player action.
    pub async fn player_action(
        &mut self,
        description: &str,
        skill: &str,
        target: Option<&str>,
    ) -> Result<TurnOutcome, SessionError> {
        let dice = roll_4df();
        self.player_action_with_roll(description, skill, target, dice)
            .await
    }

    /// Resolve a player action with dice already rolled.
    ///
    /// If the generator fails, the only change is one appended error entry;
    /// the staged invokes stay so the action can be retried.
    pub async fn player_action_with_roll(
        &mut self,
        description: &str,
        skill: &str,
        target: Option<&str>,
        dice: FateRoll,
    ) -> Result<TurnOutcome, SessionError> {
        if self.is_input_locked() {
            return Err(SessionError::InputLocked);
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(SessionError::EmptyAction);
        }
        let skill = self
            .state
            .character
            .skill(skill)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSkill(skill.to_string()))?;

        let roll = ActionRoll::new(dice, skill.level as i32, self.invokes.bonus());
        let summary = ActionSummary {
            description: description.to_string(),
            skill: skill.name.clone(),
            total: roll.total(),
            invoked: self.invokes.names(),
            target: target.map(str::to_string),
        };
        debug!(skill = %skill.name, total = roll.total(), invokes = self.invokes.len(), "Resolving action");

        let response = match self
            .gm
            .resolve_turn(&self.state, &summary, &self.settings)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Turn failed, keeping staged invokes");
                self.state.log(LogEntry::error(e.to_string()));
                return Err(e.into());
            }
        };

        let mut committed = self.state.clone();
        committed.log(LogEntry::action(format!(
            "\"{}\" using {}.",
            description, skill.name
        )));
        committed.log(LogEntry::roll(roll.to_string()));

        let Reconciled {
            state,
            narration_id,
            image,
            hit,
            compel,
        } = reconcile(
            &committed,
            &response,
            &self.invokes,
            self.settings.allows_images(),
        );

        self.state = state;
        self.invokes.clear();
        self.pending_hit = hit.clone();
        self.pending_compel = compel.clone();

        Ok(TurnOutcome {
            roll,
            narration_id,
            image,
            hit,
            compel,
        })
    }

    /// Generate the image for a log entry and attach it.
    ///
    /// On any failure the entry stops waiting for an image. Rate limits are
    /// also reported in the story log.
    pub async fn fetch_image(&mut self, request: ImageRequest) -> Result<Option<String>, SessionError> {
        match self.gm.image(&request.prompt).await {
            Ok(url) => {
                self.state = settle_image(&self.state, request.entry, url.clone());
                Ok(url)
            }
            Err(e) => {
                self.state = settle_image(&self.state, request.entry, None);
                if e.is_rate_limit() {
                    warn!(error = %e, "Image rate limited");
                    self.state.log(LogEntry::system(e.to_string()));
                } else {
                    warn!(error = %e, "Image generation failed");
                }
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Compels
    // ========================================================================

    /// Answer the pending compel. A reject the player cannot pay for leaves
    /// the compel pending.
    pub fn resolve_compel(&mut self, choice: CompelChoice) -> Result<(), SessionError> {
        let compel = self
            .pending_compel
            .as_ref()
            .ok_or(SessionError::NoPendingCompel)?;
        self.state = fate::resolve_compel(&self.state, compel, choice)?;
        info!(aspect = %compel.aspect, ?choice, fate_points = self.state.character.fate_points, "Compel resolved");
        self.pending_compel = None;
        Ok(())
    }

    // ========================================================================
    // Conflict
    // ========================================================================

    /// Absorb the pending hit with stress boxes and/or a consequence.
    pub fn absorb_hit(&mut self, absorption: &Absorption) -> Result<(), SessionError> {
        let hit = self.pending_hit.as_ref().ok_or(SessionError::NoPendingHit)?;
        self.state = hit.absorb(&self.state, absorption)?;
        self.pending_hit = None;
        Ok(())
    }

    /// Give up the conflict before being taken out: +1 fate point and a new scene.
    pub async fn concede(&mut self) -> Result<SceneOutcome, SessionError> {
        let hit = self.pending_hit.as_ref().ok_or(SessionError::NoPendingHit)?;
        hit.ensure_concedable()?;
        self.end_conflict(TransitionKind::Concession).await
    }

    /// Accept being taken out by a hit that cannot be absorbed.
    pub async fn acknowledge_defeat(&mut self) -> Result<SceneOutcome, SessionError> {
        let hit = self.pending_hit.as_ref().ok_or(SessionError::NoPendingHit)?;
        hit.ensure_taken_out()?;
        self.end_conflict(TransitionKind::TakenOut).await
    }

    /// On failure an error entry is logged and the hit stays pending.
    async fn end_conflict(&mut self, kind: TransitionKind) -> Result<SceneOutcome, SessionError> {
        let hit = self
            .pending_hit
            .as_ref()
            .map(|pending| pending.hit().clone())
            .ok_or(SessionError::NoPendingHit)?;

        let request = match kind {
            TransitionKind::TakenOut => self.gm.taken_out(&self.state, &hit, &self.settings).await,
            TransitionKind::Concession => {
                self.gm.concession(&self.state, &hit, &self.settings).await
            }
        };
        let transition = match request {
            Ok(transition) => transition,
            Err(e) => {
                warn!(error = %e, ?kind, "Scene transition failed, hit still pending");
                self.state.log(LogEntry::error(e.to_string()));
                return Err(e.into());
            }
        };

        let reconciled = reconcile_transition(
            &self.state,
            &transition,
            kind,
            self.settings.allows_images(),
        );
        info!(?kind, fate_points = reconciled.state.character.fate_points, "Conflict ended");
        self.state = reconciled.state;
        self.pending_hit = None;

        Ok(SceneOutcome {
            narration_id: reconciled.narration_id,
            image: reconciled.image,
        })
    }
}
