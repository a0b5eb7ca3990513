//! Character builder for Fate Core character creation.
//!
//! A character needs a high concept, a trouble, three more aspects, two
//! stunts and a complete skill pyramid before it can be played.

use crate::payload::GeneratedCharacter;
use crate::world::{
    default_skills, ladder_label, Aspect, Character, CharacterAspects, Skill, Stunt, StressTrack,
};
use thiserror::Error;

/// Fate points a new character starts with.
pub const STARTING_FATE_POINTS: i32 = 3;

/// Number of aspects beyond high concept and trouble.
pub const OTHER_ASPECT_COUNT: usize = 3;

/// Number of stunts a new character takes.
pub const STUNT_COUNT: usize = 2;

/// Pyramid tiers as `(level, slots)`: one Great, two Good, three Fair, four Average.
pub const PYRAMID: [(i8, usize); 4] = [(4, 1), (3, 2), (2, 3), (1, 4)];

/// Slots available at a level. Mediocre is unlimited; anything off the pyramid has none.
pub fn pyramid_slots(level: i8) -> usize {
    if level == 0 {
        return usize::MAX;
    }
    PYRAMID
        .iter()
        .find(|(tier, _)| *tier == level)
        .map(|(_, slots)| *slots)
        .unwrap_or(0)
}

/// How many skills sit at `level`.
pub fn tier_count(skills: &[Skill], level: i8) -> usize {
    skills.iter().filter(|s| s.level == level).count()
}

/// Sum of all skill levels. A complete pyramid spends 20.
pub fn pyramid_points(skills: &[Skill]) -> i32 {
    skills.iter().map(|s| s.level as i32).sum()
}

/// True when every pyramid tier is filled exactly and nothing sits above +4.
pub fn is_complete_pyramid(skills: &[Skill]) -> bool {
    PYRAMID
        .iter()
        .all(|(level, slots)| tier_count(skills, *level) == *slots)
        && skills.iter().all(|s| (0..=4).contains(&s.level))
}

/// Move a skill to a new level.
///
/// Lowering is always allowed. Raising is allowed only into a tier that
/// still has a free slot. Returns whether the change was applied.
pub fn set_skill_level(skills: &mut [Skill], name: &str, level: i8) -> bool {
    if !(0..=4).contains(&level) {
        return false;
    }
    let Some(index) = skills.iter().position(|s| s.name.eq_ignore_ascii_case(name)) else {
        return false;
    };
    let current = skills[index].level;
    if level == current {
        return true;
    }
    if level > current && tier_count(skills, level) >= pyramid_slots(level) {
        return false;
    }
    skills[index] = Skill::new(skills[index].name.clone(), level);
    true
}

/// Merge generated skill levels into the default skill list.
///
/// Names match case-insensitively; unknown names are ignored.
pub fn merge_skills(generated: impl IntoIterator<Item = (String, i8)>) -> Vec<Skill> {
    let mut skills = default_skills();
    for (name, level) in generated {
        if let Some(skill) = skills.iter_mut().find(|s| s.name.eq_ignore_ascii_case(&name)) {
            skill.level = level;
            skill.level_name = ladder_label(level).to_string();
        }
    }
    skills
}

// ============================================================================
// Builder Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("Character name is required")]
    MissingName,
    #[error("A high concept is required")]
    MissingHighConcept,
    #[error("A trouble is required")]
    MissingTrouble,
    #[error("Expected {expected} other aspects, got {got}")]
    WrongAspectCount { expected: usize, got: usize },
    #[error("Expected {expected} stunts, got {got}")]
    WrongStuntCount { expected: usize, got: usize },
    #[error("Skills do not form a complete pyramid ({points} of 20 points spent)")]
    IncompletePyramid { points: i32 },
}

// ============================================================================
// Character Builder
// ============================================================================

/// Step-by-step character creation.
#[derive(Debug, Clone)]
pub struct CharacterBuilder {
    name: Option<String>,
    high_concept: Option<Aspect>,
    trouble: Option<Aspect>,
    others: Vec<Aspect>,
    stunts: Vec<Stunt>,
    skills: Vec<Skill>,
}

impl Default for CharacterBuilder {
    fn default() -> Self {
        Self {
            name: None,
            high_concept: None,
            trouble: None,
            others: Vec::new(),
            stunts: Vec::new(),
            skills: default_skills(),
        }
    }
}

impl CharacterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a generated character. The result still goes through
    /// [`build`](Self::build), so a generator that ignores the pyramid is caught there.
    pub fn from_generated(generated: GeneratedCharacter) -> Self {
        let GeneratedCharacter {
            name,
            aspects,
            stunts,
            skills,
        } = generated;
        Self {
            name: Some(name),
            high_concept: Some(aspects.high_concept),
            trouble: Some(aspects.trouble),
            others: aspects.others,
            stunts,
            skills: merge_skills(skills.into_iter().map(|s| (s.name, s.level))),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn high_concept(mut self, aspect: Aspect) -> Self {
        self.high_concept = Some(aspect);
        self
    }

    pub fn trouble(mut self, aspect: Aspect) -> Self {
        self.trouble = Some(aspect);
        self
    }

    pub fn aspect(mut self, aspect: Aspect) -> Self {
        self.others.push(aspect);
        self
    }

    pub fn stunt(mut self, stunt: Stunt) -> Self {
        self.stunts.push(stunt);
        self
    }

    /// Set a skill level, subject to the pyramid slot rule.
    /// A refused change leaves the skill where it was.
    pub fn skill(mut self, name: &str, level: i8) -> Self {
        set_skill_level(&mut self.skills, name, level);
        self
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Validate and produce a ready-to-play character.
    pub fn build(self) -> Result<Character, BuilderError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(BuilderError::MissingName)?;
        let high_concept = self
            .high_concept
            .filter(|a| !a.name.trim().is_empty())
            .ok_or(BuilderError::MissingHighConcept)?;
        let trouble = self
            .trouble
            .filter(|a| !a.name.trim().is_empty())
            .ok_or(BuilderError::MissingTrouble)?;

        let others: Vec<Aspect> = self
            .others
            .into_iter()
            .filter(|a| !a.name.trim().is_empty())
            .collect();
        if others.len() != OTHER_ASPECT_COUNT {
            return Err(BuilderError::WrongAspectCount {
                expected: OTHER_ASPECT_COUNT,
                got: others.len(),
            });
        }
        if self.stunts.len() != STUNT_COUNT {
            return Err(BuilderError::WrongStuntCount {
                expected: STUNT_COUNT,
                got: self.stunts.len(),
            });
        }
        if !is_complete_pyramid(&self.skills) {
            return Err(BuilderError::IncompletePyramid {
                points: pyramid_points(&self.skills),
            });
        }

        Ok(Character {
            name: name.trim().to_string(),
            aspects: CharacterAspects {
                high_concept,
                trouble,
                others,
            },
            skills: self.skills,
            stunts: self.stunts,
            fate_points: STARTING_FATE_POINTS,
            physical_stress: StressTrack::standard(),
            mental_stress: StressTrack::standard(),
            consequences: Vec::new(),
        })
    }
}
