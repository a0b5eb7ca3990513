//! Narrative reconciliation.
//!
//! Turns a validated generator response into the next [`GameState`]. The
//! prior state is never modified; all changes are expressed as effects and
//! applied to a copy.

use crate::conflict::{PendingHit, TransitionKind};
use crate::fate::InvokeSet;
use crate::payload::{Compel, NarrativeResponse, SceneTransition};
use crate::rules::{transition, Effect, InvokeTarget};
use crate::validate::check_game_state;
use crate::world::{EntryId, GameState, LogEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Logged whenever a turn moves the story to a new scene.
pub const SCENE_CHANGED: &str =
    "The scene has changed. Your stress and consequences have been cleared.";

/// An image still to be generated for one log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub entry: EntryId,
    pub prompt: String,
}

/// The outcome of merging a generator response.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub state: GameState,
    pub narration_id: EntryId,
    pub image: Option<ImageRequest>,
    pub hit: Option<PendingHit>,
    pub compel: Option<Compel>,
}

/// Effects of a turn response, in application order.
///
/// Free invokes the player staged are spent first, against the scene they
/// were staged in, so a replacement scene or a freshly created advantage
/// with the same name keeps its own invoke.
pub fn turn_effects(
    response: &NarrativeResponse,
    invokes: &InvokeSet,
    narration: LogEntry,
) -> Vec<Effect> {
    let mut effects: Vec<Effect> = invokes
        .free_invokes()
        .map(|name| Effect::InvokeConsumed {
            target: InvokeTarget::SceneAspect(name.to_string()),
        })
        .collect();

    match &response.new_scene {
        Some(scene) => {
            effects.push(Effect::SceneReplaced {
                scene: scene.clone(),
            });
            effects.push(Effect::TacticalStateReset);
        }
        None => {
            if let Some(aspect) = &response.new_scene_aspect {
                effects.push(Effect::SceneAspectAdded {
                    aspect: aspect.clone().with_free_invoke(),
                });
            }
            if let Some(opponents) = &response.updated_opponents {
                effects.push(Effect::OpponentsReplaced {
                    opponents: opponents.clone(),
                });
            }
            if response.compel.is_some() {
                effects.push(Effect::CompelOffered);
            }
        }
    }

    if !response.removed_scene_aspects.is_empty() {
        effects.push(Effect::SceneAspectsRemoved {
            names: response.removed_scene_aspects.clone(),
        });
    }

    effects.extend(response.used_free_invokes.iter().map(|name| Effect::InvokeConsumed {
        target: InvokeTarget::Consequence(name.clone()),
    }));

    effects.push(Effect::Logged { entry: narration });
    if response.new_scene.is_some() {
        effects.push(Effect::Logged {
            entry: LogEntry::system(SCENE_CHANGED),
        });
    }
    effects
}

/// Merge a turn response into `prior`.
///
/// The hit (if any) is sized up against the character as the new state
/// leaves them.
pub fn reconcile(
    prior: &GameState,
    response: &NarrativeResponse,
    invokes: &InvokeSet,
    images_allowed: bool,
) -> Reconciled {
    let image_prompt = response.image_prompt.clone().filter(|_| images_allowed);
    let narration =
        LogEntry::narration(response.narration.clone()).with_pending_image(image_prompt.is_some());
    let narration_id = narration.id;

    let effects = turn_effects(response, invokes, narration);
    let state = transition(prior, &effects);
    debug!(effects = effects.len(), scene_changed = response.new_scene.is_some(), "Reconciled turn");
    report_violations(&state);

    let hit = response.hit.clone().and_then(|hit| {
        PendingHit::new(hit, &state.character)
            .map_err(|e| warn!(error = %e, "Ignored unusable hit"))
            .ok()
    });

    Reconciled {
        image: image_prompt.map(|prompt| ImageRequest {
            entry: narration_id,
            prompt,
        }),
        narration_id,
        hit,
        compel: response.compel.clone(),
        state,
    }
}

/// Merge the new scene that follows being taken out or conceding.
///
/// The fate point change is applied before anything is logged.
pub fn reconcile_transition(
    prior: &GameState,
    response: &SceneTransition,
    kind: TransitionKind,
    images_allowed: bool,
) -> Reconciled {
    let image_prompt = response.image_prompt.clone().filter(|_| images_allowed);
    let narration =
        LogEntry::narration(response.narration.clone()).with_pending_image(image_prompt.is_some());
    let narration_id = narration.id;

    let mut effects = Vec::new();
    if kind.fate_delta() != 0 {
        effects.push(Effect::FatePointsChanged {
            delta: kind.fate_delta(),
        });
    }
    effects.push(Effect::TacticalStateReset);
    effects.push(Effect::SceneReplaced {
        scene: response.new_scene.clone(),
    });
    effects.push(Effect::Logged {
        entry: LogEntry::system(kind.summary()),
    });
    effects.push(Effect::Logged { entry: narration });

    let state = transition(prior, &effects);
    report_violations(&state);

    Reconciled {
        state,
        narration_id,
        image: image_prompt.map(|prompt| ImageRequest {
            entry: narration_id,
            prompt,
        }),
        hit: None,
        compel: None,
    }
}

/// Settle a pending image on its own entry and nothing else.
pub fn settle_image(state: &GameState, entry: EntryId, image_url: Option<String>) -> GameState {
    transition(state, &[Effect::ImageSettled { entry, image_url }])
}

fn report_violations(state: &GameState) {
    if let Err(violation) = check_game_state(state) {
        warn!(%violation, "Reconciled state breaks an invariant");
    }
}
