//! Fate Core state-change pipeline.
//!
//! Every transition of the game state is expressed the same way:
//! 1. A resolver (narrative reconciler, conflict resolver, fate economy)
//!    decides what should happen and emits a list of [`Effect`]s
//! 2. [`transition`] clones the prior state and applies the effects in order
//!
//! Resolvers never touch the state directly, which keeps them pure and lets
//! the prior state survive untouched when a resolution is rejected.

use crate::world::{
    Aspect, Consequence, EntryId, GameState, LogEntry, Opponent, Scene, StressType,
};
use serde::{Deserialize, Serialize};

/// Which aspect a free invocation is being spent on.
///
/// Scene aspects and the character's consequences are the two places a free
/// invoke can live; both are keyed by aspect name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeTarget {
    /// A scene aspect, spent by the player.
    SceneAspect(String),
    /// A consequence on the character, spent by the opposition.
    Consequence(String),
}

impl InvokeTarget {
    pub fn aspect_name(&self) -> &str {
        match self {
            InvokeTarget::SceneAspect(name) | InvokeTarget::Consequence(name) => name,
        }
    }
}

/// A single, already-decided change to the game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// The scene was replaced wholesale; the compel flag starts cleared.
    SceneReplaced { scene: Scene },

    /// Both stress tracks unmarked and every consequence removed.
    TacticalStateReset,

    /// A new scene aspect appeared. One with the same name is replaced.
    SceneAspectAdded { aspect: Aspect },

    /// Scene aspects removed by exact name.
    SceneAspectsRemoved { names: Vec<String> },

    /// The opponent roster was replaced.
    OpponentsReplaced { opponents: Vec<Opponent> },

    /// A free invocation was spent.
    InvokeConsumed { target: InvokeTarget },

    /// The character's fate points changed.
    FatePointsChanged { delta: i32 },

    /// Stress boxes were checked off.
    StressMarked {
        track: StressType,
        indices: Vec<usize>,
    },

    /// The character took a consequence.
    ConsequenceTaken { consequence: Consequence },

    /// A compel has been surfaced in the current scene.
    CompelOffered,

    /// A story log entry was appended.
    Logged { entry: LogEntry },

    /// A pending image finished (or gave up) for one log entry.
    ImageSettled {
        entry: EntryId,
        image_url: Option<String>,
    },
}

/// Clone `prior` and apply `effects` to the copy.
pub fn transition(prior: &GameState, effects: &[Effect]) -> GameState {
    let mut next = prior.clone();
    apply_effects(&mut next, effects);
    next
}

/// Apply a list of effects to the game state.
pub fn apply_effects(state: &mut GameState, effects: &[Effect]) {
    for effect in effects {
        apply_effect(state, effect);
    }
}

/// Apply a single effect to the game state.
pub fn apply_effect(state: &mut GameState, effect: &Effect) {
    match effect {
        Effect::SceneReplaced { scene } => {
            let mut scene = scene.clone();
            scene.has_offered_compel = false;
            normalize_opponents(&mut scene.opponents);
            state.scene = scene;
        }
        Effect::TacticalStateReset => {
            state.character.reset_tactical_state();
        }
        Effect::SceneAspectAdded { aspect } => {
            match state.scene.aspects.iter_mut().find(|a| a.name == aspect.name) {
                Some(existing) => *existing = aspect.clone(),
                None => state.scene.aspects.push(aspect.clone()),
            }
        }
        Effect::SceneAspectsRemoved { names } => {
            state.scene.aspects.retain(|a| !names.contains(&a.name));
        }
        Effect::OpponentsReplaced { opponents } => {
            let mut opponents = opponents.clone();
            normalize_opponents(&mut opponents);
            state.scene.opponents = opponents;
        }
        Effect::InvokeConsumed { target } => {
            consume_invoke(state, target);
        }
        Effect::FatePointsChanged { delta } => {
            state.character.fate_points += delta;
        }
        Effect::StressMarked { track, indices } => {
            let stress = state.character.stress_track_mut(*track);
            for &index in indices {
                if let Some(mark) = stress.marked.get_mut(index) {
                    *mark = true;
                }
            }
        }
        Effect::ConsequenceTaken { consequence } => {
            state.character.consequences.push(consequence.clone());
        }
        Effect::CompelOffered => {
            state.scene.has_offered_compel = true;
        }
        Effect::Logged { entry } => {
            state.story_log.push(entry.clone());
        }
        Effect::ImageSettled { entry, image_url } => {
            if let Some(log_entry) = state.entry_mut(*entry) {
                log_entry.is_loading_image = false;
                if image_url.is_some() {
                    log_entry.image_url = image_url.clone();
                }
            }
        }
    }
}

fn normalize_opponents(opponents: &mut [Opponent]) {
    for opponent in opponents {
        opponent.physical_stress.normalize();
        opponent.mental_stress.normalize();
    }
}

/// Spend the free invocation on an aspect, wherever it lives.
///
/// Returns true if a free invoke was actually cleared. Aspects without one
/// are left untouched.
pub fn consume_invoke(state: &mut GameState, target: &InvokeTarget) -> bool {
    let aspect = match target {
        InvokeTarget::SceneAspect(name) => state
            .scene
            .aspects
            .iter_mut()
            .find(|a| a.name == *name && a.has_free_invoke),
        InvokeTarget::Consequence(name) => state
            .character
            .consequences
            .iter_mut()
            .map(|c| &mut c.aspect)
            .find(|a| a.name == *name && a.has_free_invoke),
    };

    match aspect {
        Some(aspect) => {
            aspect.has_free_invoke = false;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{
        create_sample_character, create_sample_scene, ConsequenceSeverity, EntryKind,
    };

    fn sample_state() -> GameState {
        GameState::new(create_sample_character("Test"), create_sample_scene())
    }

    #[test]
    fn test_transition_leaves_prior_untouched() {
        let prior = sample_state();
        let next = transition(&prior, &[Effect::FatePointsChanged { delta: -1 }]);

        assert_eq!(prior.character.fate_points, 3);
        assert_eq!(next.character.fate_points, 2);
    }

    #[test]
    fn test_consume_scene_invoke_once() {
        let mut state = sample_state();
        state
            .scene
            .aspects
            .push(Aspect::new("Distracted Guard", "").with_free_invoke());

        let target = InvokeTarget::SceneAspect("Distracted Guard".to_string());
        assert!(consume_invoke(&mut state, &target));
        assert!(!state.scene.aspect("Distracted Guard").unwrap().has_free_invoke);
        assert!(!consume_invoke(&mut state, &target));
    }

    #[test]
    fn test_consume_consequence_invoke() {
        let mut state = sample_state();
        state.character.consequences.push(Consequence {
            severity: ConsequenceSeverity::Mild,
            aspect: Aspect::new("Cracked Rib", "").with_free_invoke(),
        });

        let target = InvokeTarget::Consequence("Cracked Rib".to_string());
        assert!(consume_invoke(&mut state, &target));
        assert!(!state.character.consequences[0].aspect.has_free_invoke);
    }

    #[test]
    fn test_consume_ignores_unknown_aspect() {
        let mut state = sample_state();
        let before = state.clone();
        assert!(!consume_invoke(
            &mut state,
            &InvokeTarget::SceneAspect("Nope".to_string())
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_scene_replaced_clears_compel_flag_and_normalizes() {
        let mut state = sample_state();
        state.scene.has_offered_compel = true;

        let mut opponent = Opponent::new("goon", "Goon");
        opponent.physical_stress.marked = vec![true];
        let mut scene = Scene::new("A rooftop", vec![]).with_opponents(vec![opponent]);
        scene.has_offered_compel = true;

        apply_effect(&mut state, &Effect::SceneReplaced { scene });

        assert!(!state.scene.has_offered_compel);
        assert_eq!(state.scene.opponents[0].physical_stress.marked, vec![true, false]);
    }

    #[test]
    fn test_opponents_replaced_normalizes_tracks() {
        let mut state = sample_state();
        let mut guard = Opponent::new("guard", "Guard");
        guard.physical_stress.boxes = vec![1, 2, 3];
        guard.physical_stress.marked = vec![true];
        guard.mental_stress.marked = vec![false, false, true];

        apply_effect(
            &mut state,
            &Effect::OpponentsReplaced {
                opponents: vec![guard],
            },
        );

        let guard = &state.scene.opponents[0];
        assert_eq!(guard.physical_stress.marked, vec![true, false, false]);
        assert_eq!(guard.mental_stress.marked.len(), guard.mental_stress.boxes.len());
        assert_eq!(crate::validate::check_game_state(&state), Ok(()));
    }

    #[test]
    fn test_added_aspect_replaces_same_name() {
        let mut state = sample_state();
        let name = state.scene.aspects[0].name.clone();
        let count = state.scene.aspects.len();

        apply_effect(
            &mut state,
            &Effect::SceneAspectAdded {
                aspect: Aspect::new(name.clone(), "Thicker than before").with_free_invoke(),
            },
        );

        assert_eq!(state.scene.aspects.len(), count);
        let aspect = state.scene.aspect(&name).unwrap();
        assert!(aspect.has_free_invoke);
        assert_eq!(aspect.description, "Thicker than before");
    }

    #[test]
    fn test_stress_marked_and_logged() {
        let state = sample_state();
        let next = transition(
            &state,
            &[
                Effect::StressMarked {
                    track: StressType::Mental,
                    indices: vec![1],
                },
                Effect::Logged {
                    entry: LogEntry::system("Ouch"),
                },
            ],
        );

        assert_eq!(next.character.mental_stress.marked, vec![false, true]);
        assert_eq!(next.last_entry().map(|e| e.kind), Some(EntryKind::System));
    }

    #[test]
    fn test_image_settled_patches_only_its_entry() {
        let mut state = sample_state();
        let pending = state.log(LogEntry::narration("A").with_pending_image(true));
        let other = state.log(LogEntry::narration("B").with_pending_image(true));

        apply_effect(
            &mut state,
            &Effect::ImageSettled {
                entry: pending,
                image_url: Some("data:image/png;base64,AAAA".to_string()),
            },
        );

        let patched = state.entry(pending).unwrap();
        assert!(!patched.is_loading_image);
        assert!(patched.image_url.is_some());
        assert!(state.entry(other).unwrap().is_loading_image);
    }
}
