//! Fate Core game state types.
//!
//! Contains all types for representing game state: characters, aspects,
//! stress tracks, consequences, scenes, opponents, the story log, and the
//! complete persisted [`GameState`].

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for story log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deserialize `null` as the type's default.
///
/// The generator often sends `null` for "not applicable" lists.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Skill Ladder
// ============================================================================

/// The adjective ladder, highest first.
pub const LADDER: [(i8, &str); 11] = [
    (8, "Legendary"),
    (7, "Epic"),
    (6, "Fantastic"),
    (5, "Superb"),
    (4, "Great"),
    (3, "Good"),
    (2, "Fair"),
    (1, "Average"),
    (0, "Mediocre"),
    (-1, "Poor"),
    (-2, "Terrible"),
];

/// Ladder label for a rating. Ratings off the ladder clamp to its ends.
pub fn ladder_label(level: i8) -> &'static str {
    let clamped = level.clamp(-2, 8);
    LADDER
        .iter()
        .find(|(value, _)| *value == clamped)
        .map(|(_, label)| *label)
        .unwrap_or("Mediocre")
}

/// The eighteen default Fate Core skills.
pub const DEFAULT_SKILL_NAMES: [&str; 18] = [
    "Athletics",
    "Burglary",
    "Contacts",
    "Crafts",
    "Deceive",
    "Drive",
    "Empathy",
    "Fight",
    "Investigate",
    "Lore",
    "Notice",
    "Physique",
    "Provoke",
    "Rapport",
    "Resources",
    "Shoot",
    "Stealth",
    "Will",
];

/// All default skills at Mediocre (+0).
pub fn default_skills() -> Vec<Skill> {
    DEFAULT_SKILL_NAMES
        .iter()
        .map(|name| Skill::new(*name, 0))
        .collect()
}

// ============================================================================
// Aspects, Skills, Stunts
// ============================================================================

/// A narrative descriptor that can be invoked for a +2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aspect {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// A free invocation is waiting to be used on this aspect.
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_false")]
    pub has_free_invoke: bool,
}

impl Aspect {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            has_free_invoke: false,
        }
    }

    /// Mark this aspect as carrying one free invocation.
    pub fn with_free_invoke(mut self) -> Self {
        self.has_free_invoke = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub name: String,
    pub level: i8,
    #[serde(default)]
    pub level_name: String,
}

impl Skill {
    pub fn new(name: impl Into<String>, level: i8) -> Self {
        Self {
            name: name.into(),
            level,
            level_name: ladder_label(level).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stunt {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
}

impl Stunt {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

// ============================================================================
// Stress and Consequences
// ============================================================================

/// Which stress track a hit lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StressType {
    #[default]
    Physical,
    Mental,
}

impl StressType {
    pub fn name(&self) -> &'static str {
        match self {
            StressType::Physical => "physical",
            StressType::Mental => "mental",
        }
    }
}

impl fmt::Display for StressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stress track: box capacities and a parallel marked array.
///
/// `marked.len() == boxes.len()` is the track's invariant; [`StressTrack::normalize`]
/// restores it for tracks that arrive from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StressTrack {
    #[serde(default, deserialize_with = "nullable")]
    pub boxes: Vec<u8>,
    #[serde(default, deserialize_with = "nullable")]
    pub marked: Vec<bool>,
}

impl StressTrack {
    /// Create a track with the given box capacities, all unmarked.
    pub fn new(boxes: Vec<u8>) -> Self {
        let marked = vec![false; boxes.len()];
        Self { boxes, marked }
    }

    /// The standard two-box track `[1, 2]`.
    pub fn standard() -> Self {
        Self::new(vec![1, 2])
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.marked.len() == self.boxes.len()
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.marked.get(index).copied().unwrap_or(false)
    }

    /// Indices of boxes that can still absorb a shift.
    pub fn unmarked_indices(&self) -> Vec<usize> {
        (0..self.boxes.len()).filter(|i| !self.is_marked(*i)).collect()
    }

    pub fn unmarked_count(&self) -> usize {
        self.unmarked_indices().len()
    }

    pub fn marked_count(&self) -> usize {
        (0..self.boxes.len()).filter(|i| self.is_marked(*i)).count()
    }

    /// Unmark every box.
    pub fn clear(&mut self) {
        self.marked = vec![false; self.boxes.len()];
    }

    /// Pad or truncate `marked` to match `boxes`. Returns true if anything changed.
    pub fn normalize(&mut self) -> bool {
        if self.is_consistent() {
            return false;
        }
        self.marked.resize(self.boxes.len(), false);
        true
    }
}

/// Consequence severity, each tier absorbing a fixed number of shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsequenceSeverity {
    Mild,
    Moderate,
    Severe,
}

impl ConsequenceSeverity {
    pub const ALL: [ConsequenceSeverity; 3] = [
        ConsequenceSeverity::Mild,
        ConsequenceSeverity::Moderate,
        ConsequenceSeverity::Severe,
    ];

    /// Shifts absorbed by taking a consequence of this severity.
    pub fn shifts(&self) -> u32 {
        match self {
            ConsequenceSeverity::Mild => 2,
            ConsequenceSeverity::Moderate => 4,
            ConsequenceSeverity::Severe => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConsequenceSeverity::Mild => "mild",
            ConsequenceSeverity::Moderate => "moderate",
            ConsequenceSeverity::Severe => "severe",
        }
    }
}

impl fmt::Display for ConsequenceSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consequence {
    pub severity: ConsequenceSeverity,
    pub aspect: Aspect,
}

/// Consequence slots that are currently free.
pub fn open_consequence_slots(consequences: &[Consequence]) -> Vec<ConsequenceSeverity> {
    ConsequenceSeverity::ALL
        .into_iter()
        .filter(|severity| !consequences.iter().any(|c| c.severity == *severity))
        .collect()
}

// ============================================================================
// Characters and Opponents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterAspects {
    pub high_concept: Aspect,
    pub trouble: Aspect,
    #[serde(default, deserialize_with = "nullable")]
    pub others: Vec<Aspect>,
}

impl CharacterAspects {
    /// High concept, trouble, then the others.
    pub fn all(&self) -> impl Iterator<Item = &Aspect> {
        std::iter::once(&self.high_concept)
            .chain(std::iter::once(&self.trouble))
            .chain(self.others.iter())
    }
}

/// The player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub name: String,
    pub aspects: CharacterAspects,
    pub skills: Vec<Skill>,
    pub stunts: Vec<Stunt>,
    /// Normally non-negative; spending is refused at zero.
    pub fate_points: i32,
    pub physical_stress: StressTrack,
    pub mental_stress: StressTrack,
    pub consequences: Vec<Consequence>,
}

impl Character {
    pub fn stress_track(&self, kind: StressType) -> &StressTrack {
        match kind {
            StressType::Physical => &self.physical_stress,
            StressType::Mental => &self.mental_stress,
        }
    }

    pub fn stress_track_mut(&mut self, kind: StressType) -> &mut StressTrack {
        match kind {
            StressType::Physical => &mut self.physical_stress,
            StressType::Mental => &mut self.mental_stress,
        }
    }

    pub fn consequence(&self, severity: ConsequenceSeverity) -> Option<&Consequence> {
        self.consequences.iter().find(|c| c.severity == severity)
    }

    pub fn open_consequence_slots(&self) -> Vec<ConsequenceSeverity> {
        open_consequence_slots(&self.consequences)
    }

    pub fn skill(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn has_aspect(&self, name: &str) -> bool {
        self.aspects.all().any(|a| a.name == name)
    }

    /// Clear both stress tracks and all consequences.
    pub fn reset_tactical_state(&mut self) {
        self.physical_stress.clear();
        self.mental_stress.clear();
        self.consequences.clear();
    }
}

/// A non-player combatant within a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opponent {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub aspects: Vec<Aspect>,
    #[serde(default, deserialize_with = "nullable")]
    pub physical_stress: StressTrack,
    #[serde(default, deserialize_with = "nullable")]
    pub mental_stress: StressTrack,
    #[serde(default, deserialize_with = "nullable")]
    pub consequences: Vec<Consequence>,
    #[serde(default, deserialize_with = "nullable")]
    pub is_taken_out: bool,
}

impl Opponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aspects: Vec::new(),
            physical_stress: StressTrack::standard(),
            mental_stress: StressTrack::standard(),
            consequences: Vec::new(),
            is_taken_out: false,
        }
    }

    pub fn stress_track(&self, kind: StressType) -> &StressTrack {
        match kind {
            StressType::Physical => &self.physical_stress,
            StressType::Mental => &self.mental_stress,
        }
    }
}

// ============================================================================
// Scenes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub aspects: Vec<Aspect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub opponents: Vec<Opponent>,
    /// A compel has been surfaced in this scene already.
    #[serde(default, deserialize_with = "nullable")]
    pub has_offered_compel: bool,
}

impl Scene {
    pub fn new(description: impl Into<String>, aspects: Vec<Aspect>) -> Self {
        Self {
            description: description.into(),
            aspects,
            image_url: None,
            opponents: Vec::new(),
            has_offered_compel: false,
        }
    }

    pub fn with_opponents(mut self, opponents: Vec<Opponent>) -> Self {
        self.opponents = opponents;
        self
    }

    pub fn aspect(&self, name: &str) -> Option<&Aspect> {
        self.aspects.iter().find(|a| a.name == name)
    }

    pub fn opponent(&self, id: &str) -> Option<&Opponent> {
        self.opponents.iter().find(|o| o.id == id)
    }

    /// Opponents still in the fight.
    pub fn active_opponents(&self) -> impl Iterator<Item = &Opponent> {
        self.opponents.iter().filter(|o| !o.is_taken_out)
    }
}

// ============================================================================
// Story Log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Narration,
    Action,
    Roll,
    System,
    Error,
}

/// One entry in the append-only story log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// An image for this entry is still being generated.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_loading_image: bool,
}

impl LogEntry {
    pub fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            kind,
            content: content.into(),
            image_url: None,
            is_loading_image: false,
        }
    }

    pub fn narration(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Narration, content)
    }

    pub fn action(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Action, content)
    }

    pub fn roll(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Roll, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(EntryKind::System, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Error, content)
    }

    pub fn with_pending_image(mut self, pending: bool) -> Self {
        self.is_loading_image = pending;
        self
    }
}

// ============================================================================
// Game State
// ============================================================================

/// The complete persisted unit: character, scene and story log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub character: Character,
    pub scene: Scene,
    pub story_log: Vec<LogEntry>,
}

impl GameState {
    pub fn new(character: Character, scene: Scene) -> Self {
        Self {
            character,
            scene,
            story_log: Vec::new(),
        }
    }

    /// Append an entry and return its id.
    pub fn log(&mut self, entry: LogEntry) -> EntryId {
        let id = entry.id;
        self.story_log.push(entry);
        id
    }

    pub fn entry(&self, id: EntryId) -> Option<&LogEntry> {
        self.story_log.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut LogEntry> {
        self.story_log.iter_mut().find(|e| e.id == id)
    }

    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.story_log.last()
    }

    /// Entries of one kind, oldest first.
    pub fn entries_of(&self, kind: EntryKind) -> impl Iterator<Item = &LogEntry> {
        self.story_log.iter().filter(move |e| e.kind == kind)
    }
}

// ============================================================================
// Sample Data
// ============================================================================

/// Create a ready-to-play sample character (for tests and demos).
pub fn create_sample_character(name: &str) -> Character {
    let mut skills = default_skills();
    for (skill, level) in [
        ("Fight", 4),
        ("Athletics", 3),
        ("Physique", 3),
        ("Notice", 2),
        ("Will", 2),
        ("Stealth", 2),
        ("Provoke", 1),
        ("Rapport", 1),
        ("Shoot", 1),
        ("Lore", 1),
    ] {
        if let Some(s) = skills.iter_mut().find(|s| s.name == skill) {
            *s = Skill::new(skill, level);
        }
    }

    Character {
        name: name.to_string(),
        aspects: CharacterAspects {
            high_concept: Aspect::new(
                "Disgraced Knight of the Ember Order",
                "Once sworn to the Order, now cast out.",
            ),
            trouble: Aspect::new("Pride Before the Fall", "Never backs down from a challenge."),
            others: vec![
                Aspect::new("Scarred Veteran", "Has seen too many battles."),
                Aspect::new("A Debt to the Smuggler Queen", "Owes a dangerous woman a favor."),
                Aspect::new("My Sister's Keeper", "Will do anything to protect family."),
            ],
        },
        skills,
        stunts: vec![
            Stunt::new("Shield Wall", "+2 to defend with Fight when guarding an ally."),
            Stunt::new("Riposte", "Succeed with style on defense to deal a 2-shift hit."),
        ],
        fate_points: 3,
        physical_stress: StressTrack::standard(),
        mental_stress: StressTrack::standard(),
        consequences: Vec::new(),
    }
}

/// A simple opening scene with two aspects (for tests and demos).
pub fn create_sample_scene() -> Scene {
    Scene::new(
        "Rain hammers the cobbles of the harbor district as lanterns gutter out.",
        vec![
            Aspect::new("Slick Cobblestones", "Footing is treacherous."),
            Aspect::new("Dense Fog", "Hard to see more than a few paces."),
        ],
    )
}
