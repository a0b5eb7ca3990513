//! Structural invariants of a [`GameState`].
//!
//! Persisted state and reconciled state are both checked against the same
//! rules, so a save that loads is one the engine could have produced.

use crate::world::{Consequence, ConsequenceSeverity, GameState, StressTrack};
use std::collections::HashSet;
use thiserror::Error;

/// A broken invariant, naming where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateViolation {
    #[error("Character has no name")]
    UnnamedCharacter,

    #[error("{owner} {track} stress track has {boxes} boxes but {marked} marks")]
    StressTrackMismatch {
        owner: String,
        track: &'static str,
        boxes: usize,
        marked: usize,
    },

    #[error("{owner} holds more than one {severity} consequence")]
    DuplicateConsequence {
        owner: String,
        severity: ConsequenceSeverity,
    },

    #[error("{owner} has a consequence with no name")]
    UnnamedConsequence { owner: String },

    #[error("Scene aspect {0:?} appears more than once")]
    DuplicateSceneAspect(String),

    #[error("Opponent id {0:?} is not unique within the scene")]
    DuplicateOpponentId(String),

    #[error("Story log entry {0} appears more than once")]
    DuplicateEntryId(String),
}

/// Check every invariant, returning the first violation found.
pub fn check_game_state(state: &GameState) -> Result<(), StateViolation> {
    let character = &state.character;
    if character.name.trim().is_empty() {
        return Err(StateViolation::UnnamedCharacter);
    }

    check_track(&character.name, "physical", &character.physical_stress)?;
    check_track(&character.name, "mental", &character.mental_stress)?;
    check_consequences(&character.name, &character.consequences)?;

    let mut aspect_names = HashSet::new();
    for aspect in &state.scene.aspects {
        if !aspect_names.insert(aspect.name.as_str()) {
            return Err(StateViolation::DuplicateSceneAspect(aspect.name.clone()));
        }
    }

    let mut opponent_ids = HashSet::new();
    for opponent in &state.scene.opponents {
        if !opponent_ids.insert(opponent.id.as_str()) {
            return Err(StateViolation::DuplicateOpponentId(opponent.id.clone()));
        }
        check_track(&opponent.name, "physical", &opponent.physical_stress)?;
        check_track(&opponent.name, "mental", &opponent.mental_stress)?;
    }

    let mut entry_ids = HashSet::new();
    for entry in &state.story_log {
        if !entry_ids.insert(entry.id) {
            return Err(StateViolation::DuplicateEntryId(entry.id.to_string()));
        }
    }

    Ok(())
}

pub fn check_track(
    owner: &str,
    track: &'static str,
    stress: &StressTrack,
) -> Result<(), StateViolation> {
    if stress.is_consistent() {
        Ok(())
    } else {
        Err(StateViolation::StressTrackMismatch {
            owner: owner.to_string(),
            track,
            boxes: stress.boxes.len(),
            marked: stress.marked.len(),
        })
    }
}

fn check_consequences(owner: &str, consequences: &[Consequence]) -> Result<(), StateViolation> {
    let mut seen = HashSet::new();
    for consequence in consequences {
        if !seen.insert(consequence.severity) {
            return Err(StateViolation::DuplicateConsequence {
                owner: owner.to_string(),
                severity: consequence.severity,
            });
        }
        if consequence.aspect.name.trim().is_empty() {
            return Err(StateViolation::UnnamedConsequence {
                owner: owner.to_string(),
            });
        }
    }
    Ok(())
}
