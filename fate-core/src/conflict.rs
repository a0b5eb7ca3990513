//! Hit absorption.
//!
//! A hit arrives from the generator and becomes a [`PendingHit`]. Its
//! state is fixed at creation time: if the shifts exceed everything the
//! character could possibly absorb, the only way out is to be taken out.
//! Otherwise the player proposes an [`Absorption`], which is validated
//! against the current character before any state changes.

use crate::fate::CONCESSION_AWARD;
use crate::rules::{transition, Effect};
use crate::world::{
    Aspect, Character, Consequence, ConsequenceSeverity, GameState, LogEntry, StressType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Incoming harm the character must deal with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub shifts: u32,
    pub attack_description: String,
    #[serde(rename = "type", default)]
    pub kind: StressType,
}

impl Hit {
    pub fn new(shifts: u32, attack_description: impl Into<String>, kind: StressType) -> Self {
        Self {
            shifts,
            attack_description: attack_description.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("A hit must carry at least one shift")]
    ZeroShifts,

    #[error("Stress box {0} does not exist")]
    NoSuchBox(usize),

    #[error("Stress box {0} is already marked")]
    BoxAlreadyMarked(usize),

    #[error("Stress box {0} was selected twice")]
    DuplicateBox(usize),

    #[error("The {0} consequence slot is already taken")]
    SlotOccupied(ConsequenceSeverity),

    #[error("A consequence needs a name")]
    UnnamedConsequence,

    #[error("Absorbs {absorbed} of {shifts} shifts")]
    Insufficient { absorbed: u32, shifts: u32 },

    #[error("The hit is too strong to absorb; you are taken out")]
    TakenOut,

    #[error("Concession is only possible while the hit is being resolved")]
    ConcessionUnavailable,

    #[error("Only a character who has been taken out can acknowledge defeat")]
    NotTakenOut,
}

/// Everything the character could still absorb on the given track:
/// one shift per unmarked box plus the capacity of every empty
/// consequence slot.
pub fn max_possible_absorption(character: &Character, kind: StressType) -> u32 {
    let stress = character.stress_track(kind).unmarked_count() as u32;
    let slots: u32 = character
        .open_consequence_slots()
        .iter()
        .map(|severity| severity.shifts())
        .sum();
    stress + slots
}

/// A consequence the player wants to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedConsequence {
    pub severity: ConsequenceSeverity,
    pub name: String,
}

impl ProposedConsequence {
    pub fn new(severity: ConsequenceSeverity, name: impl Into<String>) -> Self {
        Self {
            severity,
            name: name.into(),
        }
    }
}

/// The player's proposed way of soaking a hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Absorption {
    pub stress_indices: Vec<usize>,
    pub consequence: Option<ProposedConsequence>,
}

impl Absorption {
    pub fn stress(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            stress_indices: indices.into_iter().collect(),
            consequence: None,
        }
    }

    pub fn with_consequence(
        mut self,
        severity: ConsequenceSeverity,
        name: impl Into<String>,
    ) -> Self {
        self.consequence = Some(ProposedConsequence::new(severity, name));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitState {
    Resolving { capacity: u32 },
    TakenOut { capacity: u32 },
}

/// A hit waiting for the player to respond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingHit {
    hit: Hit,
    state: HitState,
}

impl PendingHit {
    /// Size up a hit against the character as it stands now.
    pub fn new(hit: Hit, character: &Character) -> Result<Self, ConflictError> {
        if hit.shifts == 0 {
            return Err(ConflictError::ZeroShifts);
        }
        let capacity = max_possible_absorption(character, hit.kind);
        let state = if hit.shifts > capacity {
            HitState::TakenOut { capacity }
        } else {
            HitState::Resolving { capacity }
        };
        Ok(Self { hit, state })
    }

    pub fn hit(&self) -> &Hit {
        &self.hit
    }

    pub fn state(&self) -> HitState {
        self.state
    }

    pub fn is_taken_out(&self) -> bool {
        matches!(self.state, HitState::TakenOut { .. })
    }

    pub fn capacity(&self) -> u32 {
        match self.state {
            HitState::Resolving { capacity } | HitState::TakenOut { capacity } => capacity,
        }
    }

    /// Check a proposed absorption, returning the shifts it would soak.
    pub fn validate(
        &self,
        character: &Character,
        absorption: &Absorption,
    ) -> Result<u32, ConflictError> {
        if self.is_taken_out() {
            return Err(ConflictError::TakenOut);
        }

        let track = character.stress_track(self.hit.kind);
        let mut seen = HashSet::new();
        for &index in &absorption.stress_indices {
            if index >= track.len() {
                return Err(ConflictError::NoSuchBox(index));
            }
            if track.is_marked(index) {
                return Err(ConflictError::BoxAlreadyMarked(index));
            }
            if !seen.insert(index) {
                return Err(ConflictError::DuplicateBox(index));
            }
        }

        let mut absorbed = absorption.stress_indices.len() as u32;
        if let Some(consequence) = &absorption.consequence {
            if character.consequence(consequence.severity).is_some() {
                return Err(ConflictError::SlotOccupied(consequence.severity));
            }
            if consequence.name.trim().is_empty() {
                return Err(ConflictError::UnnamedConsequence);
            }
            absorbed += consequence.severity.shifts();
        }

        if absorbed < self.hit.shifts {
            return Err(ConflictError::Insufficient {
                absorbed,
                shifts: self.hit.shifts,
            });
        }
        Ok(absorbed)
    }

    /// Effects of a valid absorption. The new consequence carries a free
    /// invoke for the opposition.
    pub fn absorption_effects(
        &self,
        state: &GameState,
        absorption: &Absorption,
    ) -> Result<Vec<Effect>, ConflictError> {
        self.validate(&state.character, absorption)?;

        let mut indices = absorption.stress_indices.clone();
        indices.sort_unstable();

        let track = state.character.stress_track(self.hit.kind);
        let mut effects = Vec::new();
        if !indices.is_empty() {
            let boxes = indices
                .iter()
                .map(|&i| track.boxes[i].to_string())
                .collect::<Vec<_>>()
                .join(", ");
            effects.push(Effect::StressMarked {
                track: self.hit.kind,
                indices: indices.clone(),
            });
            effects.push(Effect::Logged {
                entry: LogEntry::system(format!(
                    "You took {} {} stress (boxes {}).",
                    indices.len(),
                    self.hit.kind,
                    boxes
                )),
            });
        }

        if let Some(proposed) = &absorption.consequence {
            let name = proposed.name.trim();
            let aspect = Aspect::new(
                name,
                format!(
                    "A {} consequence taken from: {}",
                    proposed.severity, self.hit.attack_description
                ),
            )
            .with_free_invoke();
            effects.push(Effect::ConsequenceTaken {
                consequence: Consequence {
                    severity: proposed.severity,
                    aspect,
                },
            });
            effects.push(Effect::Logged {
                entry: LogEntry::system(format!(
                    "You've gained a {} consequence: \"{}\".",
                    proposed.severity, name
                )),
            });
        }

        Ok(effects)
    }

    /// Apply a valid absorption. On error `state` is left as it was.
    pub fn absorb(
        &self,
        state: &GameState,
        absorption: &Absorption,
    ) -> Result<GameState, ConflictError> {
        let effects = self.absorption_effects(state, absorption)?;
        Ok(transition(state, &effects))
    }

    /// Conceding is allowed only while the hit can still be absorbed.
    pub fn ensure_concedable(&self) -> Result<(), ConflictError> {
        if self.is_taken_out() {
            Err(ConflictError::ConcessionUnavailable)
        } else {
            Ok(())
        }
    }

    /// Acknowledging defeat is the only way out of a taken-out hit.
    pub fn ensure_taken_out(&self) -> Result<(), ConflictError> {
        if self.is_taken_out() {
            Ok(())
        } else {
            Err(ConflictError::NotTakenOut)
        }
    }
}

/// How a conflict ended for the character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    TakenOut,
    Concession,
}

impl TransitionKind {
    pub fn fate_delta(&self) -> i32 {
        match self {
            TransitionKind::TakenOut => 0,
            TransitionKind::Concession => CONCESSION_AWARD,
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            TransitionKind::TakenOut => {
                "You have been Taken Out! All stress and consequences have been cleared."
            }
            TransitionKind::Concession => {
                "You concede the conflict, clearing all stress and consequences and gaining 1 Fate Point."
            }
        }
    }
}
