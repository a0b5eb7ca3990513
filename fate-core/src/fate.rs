//! The fate point economy: invocations, compels and concessions.

use crate::payload::Compel;
use crate::rules::{transition, Effect};
use crate::world::{Character, GameState, LogEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bonus granted per invoked aspect, free or paid.
pub const INVOKE_BONUS: i32 = 2;

/// Fate points awarded for conceding a conflict.
pub const CONCESSION_AWARD: i32 = 1;

/// Errors from fate point operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FateError {
    #[error("No fate points left to spend")]
    NoFatePoints,

    #[error("Unknown aspect: {0}")]
    UnknownAspect(String),
}

/// An aspect staged for invocation on the pending action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedInvoke {
    pub aspect: String,
    /// Paid with the aspect's free invoke rather than a fate point.
    pub free: bool,
}

/// What a call to [`InvokeSet::toggle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeToggle {
    InvokedFree,
    InvokedPaid,
    /// Un-invoked; `refunded` is 1 for a paid invoke, 0 for a free one.
    Revoked { refunded: i32 },
}

/// The set of aspects invoked for the action being prepared.
///
/// Paid invokes cost their fate point at staging time. Free invokes cost
/// nothing until the action resolves, when the reconciler spends them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeSet {
    invokes: Vec<StagedInvoke>,
}

impl InvokeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.invokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokes.is_empty()
    }

    pub fn is_invoked(&self, aspect: &str) -> bool {
        self.invokes.iter().any(|i| i.aspect == aspect)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagedInvoke> {
        self.invokes.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.invokes.iter().map(|i| i.aspect.clone()).collect()
    }

    /// Aspects whose free invoke will be spent when the action resolves.
    pub fn free_invokes(&self) -> impl Iterator<Item = &str> {
        self.invokes
            .iter()
            .filter(|i| i.free)
            .map(|i| i.aspect.as_str())
    }

    /// Total roll bonus: two per invoked aspect.
    pub fn bonus(&self) -> i32 {
        INVOKE_BONUS * self.invokes.len() as i32
    }

    /// Invoke an aspect, or un-invoke it if it is already staged.
    ///
    /// A paid invoke needs at least one fate point and spends it now;
    /// un-invoking a paid invoke gives it back.
    pub fn toggle(
        &mut self,
        character: &mut Character,
        aspect: &str,
        is_free: bool,
    ) -> Result<InvokeToggle, FateError> {
        if let Some(pos) = self.invokes.iter().position(|i| i.aspect == aspect) {
            let staged = self.invokes.remove(pos);
            let refunded = if staged.free { 0 } else { 1 };
            character.fate_points += refunded;
            return Ok(InvokeToggle::Revoked { refunded });
        }

        if is_free {
            self.invokes.push(StagedInvoke {
                aspect: aspect.to_string(),
                free: true,
            });
            return Ok(InvokeToggle::InvokedFree);
        }

        if character.fate_points <= 0 {
            return Err(FateError::NoFatePoints);
        }
        character.fate_points -= 1;
        self.invokes.push(StagedInvoke {
            aspect: aspect.to_string(),
            free: false,
        });
        Ok(InvokeToggle::InvokedPaid)
    }

    pub fn clear(&mut self) {
        self.invokes.clear();
    }
}

/// The player's answer to a compel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompelChoice {
    Accept,
    Reject,
}

/// Fate point change for answering a compel with the given balance.
pub fn compel_delta(fate_points: i32, choice: CompelChoice) -> Result<i32, FateError> {
    match choice {
        CompelChoice::Accept => Ok(1),
        CompelChoice::Reject if fate_points > 0 => Ok(-1),
        CompelChoice::Reject => Err(FateError::NoFatePoints),
    }
}

/// Whether the player can afford to refuse a compel right now.
pub fn can_reject_compel(character: &Character) -> bool {
    character.fate_points > 0
}

/// Effects of answering a compel: the fate point change plus two log lines.
pub fn compel_effects(
    state: &GameState,
    compel: &Compel,
    choice: CompelChoice,
) -> Result<Vec<Effect>, FateError> {
    let delta = compel_delta(state.character.fate_points, choice)?;

    let (summary, narration) = match choice {
        CompelChoice::Accept => (
            format!(
                "You accepted the compel on \"{}\" and gained 1 Fate Point.",
                compel.aspect
            ),
            compel.accept_narration.clone(),
        ),
        CompelChoice::Reject => (
            format!(
                "You rejected the compel on \"{}\" and spent 1 Fate Point.",
                compel.aspect
            ),
            compel.reject_narration.clone(),
        ),
    };

    Ok(vec![
        Effect::FatePointsChanged { delta },
        Effect::Logged {
            entry: LogEntry::system(summary),
        },
        Effect::Logged {
            entry: LogEntry::narration(narration),
        },
    ])
}

/// Answer a compel, producing the next state. A refused reject leaves
/// `state` untouched.
pub fn resolve_compel(
    state: &GameState,
    compel: &Compel,
    choice: CompelChoice,
) -> Result<GameState, FateError> {
    let effects = compel_effects(state, compel, choice)?;
    Ok(transition(state, &effects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{create_sample_character, create_sample_scene, EntryKind};

    fn compel() -> Compel {
        Compel {
            aspect: "Pride Before the Fall".to_string(),
            reason: "A rival mocks you in public.".to_string(),
            accept_narration: "You take the bait.".to_string(),
            reject_narration: "You swallow your pride.".to_string(),
        }
    }

    #[test]
    fn test_paid_invoke_then_revoke_nets_zero() {
        let mut character = create_sample_character("Test");
        let mut invokes = InvokeSet::new();

        assert_eq!(
            invokes.toggle(&mut character, "Scarred Veteran", false),
            Ok(InvokeToggle::InvokedPaid)
        );
        assert_eq!(character.fate_points, 2);
        assert_eq!(invokes.bonus(), 2);

        assert_eq!(
            invokes.toggle(&mut character, "Scarred Veteran", false),
            Ok(InvokeToggle::Revoked { refunded: 1 })
        );
        assert_eq!(character.fate_points, 3);
        assert!(invokes.is_empty());
    }

    #[test]
    fn test_free_invoke_costs_nothing() {
        let mut character = create_sample_character("Test");
        character.fate_points = 0;
        let mut invokes = InvokeSet::new();

        assert_eq!(
            invokes.toggle(&mut character, "Dense Fog", true),
            Ok(InvokeToggle::InvokedFree)
        );
        assert_eq!(character.fate_points, 0);
        assert_eq!(invokes.free_invokes().collect::<Vec<_>>(), vec!["Dense Fog"]);

        assert_eq!(
            invokes.toggle(&mut character, "Dense Fog", true),
            Ok(InvokeToggle::Revoked { refunded: 0 })
        );
        assert_eq!(character.fate_points, 0);
    }

    #[test]
    fn test_paid_invoke_needs_fate_point() {
        let mut character = create_sample_character("Test");
        character.fate_points = 0;
        let mut invokes = InvokeSet::new();

        assert_eq!(
            invokes.toggle(&mut character, "Scarred Veteran", false),
            Err(FateError::NoFatePoints)
        );
        assert!(invokes.is_empty());
        assert_eq!(character.fate_points, 0);
    }

    #[test]
    fn test_bonus_counts_free_and_paid_alike() {
        let mut character = create_sample_character("Test");
        let mut invokes = InvokeSet::new();
        invokes.toggle(&mut character, "Dense Fog", true).unwrap();
        invokes.toggle(&mut character, "Scarred Veteran", false).unwrap();
        invokes.toggle(&mut character, "My Sister's Keeper", false).unwrap();

        assert_eq!(invokes.bonus(), 6);
        assert_eq!(character.fate_points, 1);
    }

    #[test]
    fn test_compel_deltas() {
        assert_eq!(compel_delta(0, CompelChoice::Accept), Ok(1));
        assert_eq!(compel_delta(2, CompelChoice::Reject), Ok(-1));
        assert_eq!(
            compel_delta(0, CompelChoice::Reject),
            Err(FateError::NoFatePoints)
        );
    }

    #[test]
    fn test_accept_compel() {
        let state = GameState::new(create_sample_character("Test"), create_sample_scene());
        let next = resolve_compel(&state, &compel(), CompelChoice::Accept).unwrap();

        assert_eq!(next.character.fate_points, 4);
        let kinds: Vec<_> = next.story_log.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EntryKind::System, EntryKind::Narration]);
        assert_eq!(next.story_log[1].content, "You take the bait.");
    }

    #[test]
    fn test_reject_compel_at_zero_refused() {
        let mut state = GameState::new(create_sample_character("Test"), create_sample_scene());
        state.character.fate_points = 0;

        let result = resolve_compel(&state, &compel(), CompelChoice::Reject);
        assert_eq!(result, Err(FateError::NoFatePoints));
        assert_eq!(state.character.fate_points, 0);
        assert!(state.story_log.is_empty());
    }

    #[test]
    fn test_reject_compel_spends_point() {
        let state = GameState::new(create_sample_character("Test"), create_sample_scene());
        let next = resolve_compel(&state, &compel(), CompelChoice::Reject).unwrap();

        assert_eq!(next.character.fate_points, 2);
        assert!(next.story_log[0].content.contains("rejected"));
        assert_eq!(next.story_log[1].content, "You swallow your pride.");
    }
}
