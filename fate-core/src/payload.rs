//! Generator payloads.
//!
//! Everything the generator sends back is untrusted. Text is first coaxed
//! into JSON by [`repair_json`], then decoded into one of the payload
//! shapes below and validated. Small defects (a zero-shift hit, an opponent
//! whose stress arrays disagree) are repaired and logged; anything that
//! cannot be repaired becomes a [`PayloadError`].

use crate::conflict::Hit;
use crate::world::{
    nullable, Aspect, CharacterAspects, Opponent, Scene, Stunt, StressTrack, StressType,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Used when a hit arrives without saying what caused it.
pub const DEFAULT_ATTACK_DESCRIPTION: &str = "An unexpected blow lands!";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Invalid or malformed JSON from the generator: {0}")]
    Malformed(String),

    #[error("No JSON object found in the generator response")]
    NoJson,

    #[error("Unexpected {kind} payload: {message}")]
    Shape { kind: &'static str, message: String },

    #[error("{kind} payload is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

// ============================================================================
// JSON Repair
// ============================================================================

lazy_static! {
    static ref FENCED: Regex =
        Regex::new(r"(?s)^```(\w+)?\s*\n?(.*?)\n?\s*```$").expect("fenced block pattern");
    static ref MISSING_BRACE: Regex =
        Regex::new(r#"(\},)(\s*)("name":)"#).expect("missing brace pattern");
}

/// Parse generator text as JSON, trying progressively rougher repairs.
///
/// 1. Strip a fenced code block.
/// 2. Parse as-is.
/// 3. Re-open objects in arrays that lost their `{` before a `"name":` key.
/// 4. Parse the span from the first `{` to the last `}`.
pub fn repair_json(text: &str) -> Result<Value, PayloadError> {
    let mut body = text.trim();
    if let Some(inner) = FENCED.captures(body).and_then(|caps| caps.get(2)) {
        if !inner.as_str().trim().is_empty() {
            body = inner.as_str().trim();
        }
    }

    let first_error = match serde_json::from_str::<Value>(body) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let fixed = MISSING_BRACE.replace_all(body, "${1}${2}{${3}");
    if let Ok(value) = serde_json::from_str::<Value>(&fixed) {
        debug!("Repaired generator JSON with missing object brace");
        return Ok(value);
    }

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            match serde_json::from_str::<Value>(&body[start..=end]) {
                Ok(value) => {
                    debug!(
                        skipped = body.len() - (end + 1 - start),
                        "Extracted JSON object from surrounding text"
                    );
                    Ok(value)
                }
                Err(e) => {
                    warn!(error = %e, initial = %first_error, "Generator JSON could not be repaired");
                    Err(PayloadError::Malformed(e.to_string()))
                }
            }
        }
        _ => {
            warn!(error = %first_error, "Generator response contains no JSON object");
            Err(PayloadError::NoJson)
        }
    }
}

// ============================================================================
// Payload Trait
// ============================================================================

/// A validated shape the generator can be asked to produce.
pub trait Payload: Sized {
    /// Name used in errors and logs.
    const KIND: &'static str;

    fn from_value(value: Value) -> Result<Self, PayloadError>;
}

/// Repair, decode and validate generator text as `P`.
pub fn parse_payload<P: Payload>(text: &str) -> Result<P, PayloadError> {
    P::from_value(repair_json(text)?)
}

fn decode<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, PayloadError> {
    serde_json::from_value(value).map_err(|e| PayloadError::Shape {
        kind,
        message: e.to_string(),
    })
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn named_only<T>(items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| !name(item).trim().is_empty())
        .collect()
}

// ============================================================================
// Character Creation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectOptions {
    #[serde(default, deserialize_with = "nullable")]
    pub high_concepts: Vec<Aspect>,
    #[serde(default, deserialize_with = "nullable")]
    pub troubles: Vec<Aspect>,
    #[serde(default, deserialize_with = "nullable")]
    pub others: Vec<Aspect>,
}

/// Menus of aspects and stunts to build a character from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterOptions {
    pub aspects: AspectOptions,
    #[serde(default, deserialize_with = "nullable")]
    pub stunts: Vec<Stunt>,
}

impl Payload for CharacterOptions {
    const KIND: &'static str = "character options";

    fn from_value(value: Value) -> Result<Self, PayloadError> {
        let raw: CharacterOptions = decode(Self::KIND, value)?;
        let options = CharacterOptions {
            aspects: AspectOptions {
                high_concepts: named_only(raw.aspects.high_concepts, |a| a.name.as_str()),
                troubles: named_only(raw.aspects.troubles, |a| a.name.as_str()),
                others: named_only(raw.aspects.others, |a| a.name.as_str()),
            },
            stunts: named_only(raw.stunts, |s| s.name.as_str()),
        };

        let missing = |field| PayloadError::MissingField {
            kind: Self::KIND,
            field,
        };
        if options.aspects.high_concepts.is_empty() {
            return Err(missing("aspects.highConcepts"));
        }
        if options.aspects.troubles.is_empty() {
            return Err(missing("aspects.troubles"));
        }
        if options.aspects.others.is_empty() {
            return Err(missing("aspects.others"));
        }
        if options.stunts.is_empty() {
            return Err(missing("stunts"));
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSkill {
    pub name: String,
    pub level: i8,
}

/// A complete character proposed by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCharacter {
    pub name: String,
    pub aspects: CharacterAspects,
    #[serde(default, deserialize_with = "nullable")]
    pub stunts: Vec<Stunt>,
    #[serde(default, deserialize_with = "nullable")]
    pub skills: Vec<GeneratedSkill>,
}

impl Payload for GeneratedCharacter {
    const KIND: &'static str = "generated character";

    fn from_value(value: Value) -> Result<Self, PayloadError> {
        let mut character: GeneratedCharacter = decode(Self::KIND, value)?;
        let missing = |field| PayloadError::MissingField {
            kind: Self::KIND,
            field,
        };
        if character.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if character.aspects.high_concept.name.trim().is_empty() {
            return Err(missing("aspects.highConcept"));
        }
        if character.aspects.trouble.name.trim().is_empty() {
            return Err(missing("aspects.trouble"));
        }
        character.aspects.others = named_only(character.aspects.others, |a| a.name.as_str());
        character.stunts = named_only(character.stunts, |s| s.name.as_str());
        Ok(character)
    }
}

// ============================================================================
// Scenes and Opponents
// ============================================================================

/// Make an opponent roster safe to store: every id present and unique,
/// every stress track consistent.
pub fn repair_opponents(opponents: Vec<Opponent>) -> Vec<Opponent> {
    let mut seen = HashSet::new();
    opponents
        .into_iter()
        .enumerate()
        .map(|(index, mut opponent)| {
            let base = if opponent.id.trim().is_empty() {
                format!("opponent-{}", index + 1)
            } else {
                opponent.id.trim().to_string()
            };
            let mut id = base.clone();
            let mut suffix = 2;
            while seen.contains(&id) {
                id = format!("{}-{}", base, suffix);
                suffix += 1;
            }
            if id != opponent.id {
                debug!(from = %opponent.id, to = %id, "Assigned opponent id");
            }
            seen.insert(id.clone());
            opponent.id = id;

            repair_track(&opponent.name, StressType::Physical, &mut opponent.physical_stress);
            repair_track(&opponent.name, StressType::Mental, &mut opponent.mental_stress);
            opponent
        })
        .collect()
}

fn repair_track(owner: &str, kind: StressType, track: &mut StressTrack) {
    if track.boxes.is_empty() && track.marked.is_empty() {
        *track = StressTrack::standard();
    } else if track.normalize() {
        warn!(opponent = %owner, track = %kind, boxes = track.boxes.len(), "Normalized opponent stress track");
    }
}

/// Drop unnamed and repeated aspects and repair the opponent roster of a
/// fresh scene. The first aspect of a given name wins.
pub fn repair_scene(mut scene: Scene) -> Scene {
    let mut names = HashSet::new();
    scene.aspects = named_only(scene.aspects, |a| a.name.as_str())
        .into_iter()
        .filter(|a| {
            let fresh = names.insert(a.name.clone());
            if !fresh {
                debug!(aspect = %a.name, "Dropped repeated scene aspect");
            }
            fresh
        })
        .collect();
    scene.opponents = repair_opponents(scene.opponents);
    scene.image_url = None;
    scene.has_offered_compel = false;
    scene
}

fn require_scene(kind: &'static str, scene: Scene) -> Result<Scene, PayloadError> {
    if scene.description.trim().is_empty() {
        return Err(PayloadError::MissingField {
            kind,
            field: "scene.description",
        });
    }
    Ok(repair_scene(scene))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningScene {
    pub scene: Scene,
    #[serde(default)]
    pub image_prompt: Option<String>,
}

impl Payload for OpeningScene {
    const KIND: &'static str = "opening scene";

    fn from_value(value: Value) -> Result<Self, PayloadError> {
        let raw: OpeningScene = decode(Self::KIND, value)?;
        Ok(OpeningScene {
            scene: require_scene(Self::KIND, raw.scene)?,
            image_prompt: non_empty(raw.image_prompt),
        })
    }
}

/// Narration plus a whole new scene, sent after a conflict ends for the
/// character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneTransition {
    pub narration: String,
    pub new_scene: Scene,
    #[serde(default)]
    pub image_prompt: Option<String>,
}

impl Payload for SceneTransition {
    const KIND: &'static str = "scene transition";

    fn from_value(value: Value) -> Result<Self, PayloadError> {
        let raw: SceneTransition = decode(Self::KIND, value)?;
        if raw.narration.trim().is_empty() {
            return Err(PayloadError::MissingField {
                kind: Self::KIND,
                field: "narration",
            });
        }
        Ok(SceneTransition {
            narration: raw.narration,
            new_scene: require_scene(Self::KIND, raw.new_scene)?,
            image_prompt: non_empty(raw.image_prompt),
        })
    }
}

// ============================================================================
// Turn Resolution
// ============================================================================

/// A complication tied to one of the character's aspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compel {
    pub aspect: String,
    pub reason: String,
    #[serde(default)]
    pub accept_narration: String,
    #[serde(default)]
    pub reject_narration: String,
}

/// Turn payload as sent. `hit`, `compel` and `newSceneAspect` stay loose so
/// a broken one can be repaired or dropped without losing the turn.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTurn {
    narration: Option<String>,
    #[serde(default)]
    image_prompt: Option<String>,
    #[serde(default)]
    new_scene_aspect: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    removed_scene_aspects: Vec<String>,
    #[serde(default)]
    hit: Option<Value>,
    #[serde(default)]
    compel: Option<Value>,
    #[serde(default)]
    new_scene: Option<Scene>,
    #[serde(default, deserialize_with = "nullable")]
    used_free_invokes: Vec<String>,
    #[serde(default)]
    updated_opponents: Option<Vec<Opponent>>,
}

/// The validated outcome of a player's turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeResponse {
    pub narration: String,
    pub image_prompt: Option<String>,
    pub new_scene_aspect: Option<Aspect>,
    pub removed_scene_aspects: Vec<String>,
    pub hit: Option<Hit>,
    pub compel: Option<Compel>,
    pub new_scene: Option<Scene>,
    pub used_free_invokes: Vec<String>,
    pub updated_opponents: Option<Vec<Opponent>>,
}

impl NarrativeResponse {
    pub fn narration(narration: impl Into<String>) -> Self {
        Self {
            narration: narration.into(),
            ..Self::default()
        }
    }
}

impl Payload for NarrativeResponse {
    const KIND: &'static str = "turn";

    fn from_value(value: Value) -> Result<Self, PayloadError> {
        let raw: RawTurn = decode(Self::KIND, value)?;
        let narration = non_empty(raw.narration).ok_or(PayloadError::MissingField {
            kind: Self::KIND,
            field: "narration",
        })?;

        let new_scene_aspect = raw
            .new_scene_aspect
            .filter(|v| !v.is_null())
            .and_then(|v| match serde_json::from_value::<Aspect>(v) {
                Ok(aspect) if !aspect.name.trim().is_empty() => Some(aspect),
                Ok(_) => {
                    warn!("Dropped unnamed new scene aspect");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Dropped malformed new scene aspect");
                    None
                }
            });

        let compel = raw
            .compel
            .filter(|v| !v.is_null())
            .and_then(|v| match serde_json::from_value::<Compel>(v) {
                Ok(compel) if !compel.aspect.trim().is_empty() => Some(compel),
                Ok(_) => {
                    warn!("Dropped compel with no aspect");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Dropped malformed compel");
                    None
                }
            });

        Ok(NarrativeResponse {
            narration,
            image_prompt: non_empty(raw.image_prompt),
            new_scene_aspect,
            removed_scene_aspects: raw.removed_scene_aspects,
            hit: raw.hit.filter(|v| !v.is_null()).map(|v| repair_hit(&v)),
            compel,
            new_scene: raw.new_scene.map(repair_scene),
            used_free_invokes: raw.used_free_invokes,
            updated_opponents: raw.updated_opponents.map(repair_opponents),
        })
    }
}

/// Coerce a loosely shaped hit object into a usable [`Hit`].
///
/// Shifts that are missing, non-numeric or not positive become 1;
/// fractional shifts round up.
pub fn repair_hit(value: &Value) -> Hit {
    let shifts = match value.get("shifts").and_then(Value::as_f64) {
        Some(n) if n > 0.0 => n.ceil().min(u32::MAX as f64) as u32,
        other => {
            warn!(shifts = ?other, "Repaired hit with invalid shifts");
            1
        }
    };

    let attack_description = match value.get("attackDescription").and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => {
            warn!("Repaired hit with no attack description");
            DEFAULT_ATTACK_DESCRIPTION.to_string()
        }
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some("physical") => StressType::Physical,
        Some("mental") => StressType::Mental,
        other => {
            warn!(kind = ?other, "Repaired hit with unknown stress type");
            StressType::Physical
        }
    };

    Hit {
        shifts,
        attack_description,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repair_patterns_compile() {
        assert!(FENCED.is_match("```json\n{}\n```"));
        assert!(MISSING_BRACE.is_match(r#"}, "name":"#));
    }

    #[test]
    fn test_repair_plain_and_fenced() {
        assert_eq!(repair_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            repair_json("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_repair_missing_brace() {
        let text = r#"{"stunts": [{"name": "A", "description": "x"}, "name": "B", "description": "y"}]}"#;
        let value = repair_json(text).unwrap();
        assert_eq!(value["stunts"][1]["name"], "B");
    }

    #[test]
    fn test_repair_extracts_object() {
        let value = repair_json(r#"Sure! Here you go: {"narration": "Hi"} Enjoy."#).unwrap();
        assert_eq!(value["narration"], "Hi");
    }

    #[test]
    fn test_repair_gives_up() {
        assert_eq!(repair_json("no json here"), Err(PayloadError::NoJson));
        assert!(matches!(
            repair_json("{ definitely: not json }"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_hit_repairs() {
        let hit = repair_hit(&json!({"shifts": -2, "type": "emotional"}));
        assert_eq!(hit, Hit::new(1, DEFAULT_ATTACK_DESCRIPTION, StressType::Physical));

        let hit = repair_hit(&json!({"shifts": "three", "attackDescription": "Bite", "type": "mental"}));
        assert_eq!(hit, Hit::new(1, "Bite", StressType::Mental));

        let hit = repair_hit(&json!({"shifts": 2.5, "attackDescription": "Slash", "type": "physical"}));
        assert_eq!(hit.shifts, 3);
    }

    #[test]
    fn test_turn_requires_narration() {
        assert_eq!(
            parse_payload::<NarrativeResponse>(r#"{"narration": "  "}"#),
            Err(PayloadError::MissingField {
                kind: "turn",
                field: "narration"
            })
        );
    }

    #[test]
    fn test_turn_with_nulls_and_extra_fields() {
        let turn: NarrativeResponse = parse_payload(
            r#"{
                "narration": "The guard stumbles.",
                "imagePrompt": null,
                "newSceneAspect": {"name": "Off Balance", "description": "Reeling"},
                "removedSceneAspects": null,
                "hit": {"shifts": 2, "attackDescription": "A kick", "type": "physical"},
                "compel": null,
                "newScene": null,
                "usedFreeInvokes": ["Cracked Ribs"],
                "updatedCharacter": {"fatePoints": 99}
            }"#,
        )
        .unwrap();

        assert_eq!(turn.narration, "The guard stumbles.");
        assert_eq!(turn.image_prompt, None);
        assert_eq!(turn.new_scene_aspect.map(|a| a.name), Some("Off Balance".to_string()));
        assert!(turn.removed_scene_aspects.is_empty());
        assert_eq!(turn.hit, Some(Hit::new(2, "A kick", StressType::Physical)));
        assert_eq!(turn.used_free_invokes, vec!["Cracked Ribs".to_string()]);
        assert!(turn.updated_opponents.is_none());
    }

    #[test]
    fn test_malformed_compel_dropped() {
        let turn: NarrativeResponse =
            parse_payload(r#"{"narration": "Hm.", "compel": {"reason": "no aspect"}}"#).unwrap();
        assert!(turn.compel.is_none());
    }

    #[test]
    fn test_opponent_repair() {
        let turn: NarrativeResponse = parse_payload(
            r#"{
                "narration": "More guards arrive.",
                "updatedOpponents": [
                    {"id": "guard", "name": "Guard", "physicalStress": {"boxes": [1, 2, 3], "marked": [true]}, "consequences": null},
                    {"id": "guard", "name": "Second Guard"},
                    {"name": "Captain", "mentalStress": {"boxes": [1], "marked": [false, true]}}
                ]
            }"#,
        )
        .unwrap();

        let opponents = turn.updated_opponents.unwrap();
        let ids: Vec<_> = opponents.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["guard", "guard-2", "opponent-3"]);
        assert_eq!(opponents[0].physical_stress.marked, vec![true, false, false]);
        assert!(opponents[0].consequences.is_empty());
        assert_eq!(opponents[1].physical_stress, StressTrack::standard());
        assert_eq!(opponents[2].mental_stress.marked, vec![false]);
    }

    #[test]
    fn test_character_options_filter_unnamed() {
        let options: CharacterOptions = parse_payload(
            r#"{
                "aspects": {
                    "highConcepts": [{"name": "Sky Pirate", "description": ""}, {"name": "", "description": "?"}],
                    "troubles": [{"name": "Wanted", "description": ""}],
                    "others": [{"name": "Lucky", "description": ""}]
                },
                "stunts": [{"name": "Quick Draw", "description": "+2 to Shoot first"}]
            }"#,
        )
        .unwrap();
        assert_eq!(options.aspects.high_concepts.len(), 1);

        let empty = parse_payload::<CharacterOptions>(
            r#"{"aspects": {"highConcepts": [], "troubles": [], "others": []}, "stunts": []}"#,
        );
        assert!(matches!(empty, Err(PayloadError::MissingField { .. })));
    }

    #[test]
    fn test_opening_scene() {
        let opening: OpeningScene = parse_payload(
            r#"{"scene": {"description": "A burning airship.", "aspects": [{"name": "On Fire", "description": ""}], "hasOfferedCompel": true}, "imagePrompt": ""}"#,
        )
        .unwrap();
        assert!(!opening.scene.has_offered_compel);
        assert_eq!(opening.image_prompt, None);

        let blank = parse_payload::<OpeningScene>(r#"{"scene": {"description": ""}}"#);
        assert!(matches!(blank, Err(PayloadError::MissingField { .. })));
    }

    #[test]
    fn test_repeated_scene_aspects_dropped() {
        let opening: OpeningScene = parse_payload(
            r#"{"scene": {"description": "A fog bank.", "aspects": [{"name": "Dense Fog", "description": "first"}, {"name": "Dense Fog", "description": "second"}, {"name": "Foghorn"}]}}"#,
        )
        .unwrap();
        let names: Vec<&str> = opening.scene.aspects.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Dense Fog", "Foghorn"]);
        assert_eq!(opening.scene.aspects[0].description, "first");
    }

    #[test]
    fn test_scene_transition_shape() {
        let bad = parse_payload::<SceneTransition>(r#"{"narration": "You wake."}"#);
        assert!(matches!(bad, Err(PayloadError::Shape { .. })));
    }
}
