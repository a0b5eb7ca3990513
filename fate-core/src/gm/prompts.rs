//! Prompt construction.
//!
//! Every builder takes [`Settings`] explicitly; the language line and the
//! difficulty guidance come from there.

use crate::conflict::Hit;
use crate::settings::{Difficulty, ImageFrequency, Settings};
use crate::world::{Character, GameState, DEFAULT_SKILL_NAMES};
use std::fmt::Write;

/// A system/user prompt pair for one generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.trim().is_empty()
    }
}

/// What the player did this turn, as the generator needs to hear it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSummary {
    pub description: String,
    pub skill: String,
    pub total: i32,
    pub invoked: Vec<String>,
    pub target: Option<String>,
}

/// Suffix appended to every image prompt.
pub const IMAGE_STYLE: &str =
    "cinematic composition, dramatic lighting, high detail, game art, rpg art style";

const SYSTEM: &str = "You are the Game Master of a Fate Core tabletop role-playing game. \
You answer with exactly one JSON object and nothing else: no prose around it, no code fences. \
All string values are single-line and properly escaped. Fields that do not apply are null or omitted.";

fn system(settings: &Settings) -> String {
    format!("{}\n{}", SYSTEM, settings.language.instruction())
}

fn quoted(names: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let list: Vec<String> = names
        .into_iter()
        .map(|n| format!("\"{}\"", n.as_ref()))
        .collect();
    if list.is_empty() {
        "None".to_string()
    } else {
        list.join(", ")
    }
}

fn difficulty_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => {
            "Keep difficulties low (+0 to +2) and opponents modest (around Average +1)."
        }
        Difficulty::Medium => {
            "Use standard difficulties (+2 to +4) and capable opponents (around Fair +2)."
        }
        Difficulty::Hard => {
            "Use high difficulties (+4 and up); opponents are skilled (Good +3 or better) and work together."
        }
    }
}

fn image_guidance(frequency: ImageFrequency) -> &'static str {
    match frequency {
        ImageFrequency::None => "Never provide an imagePrompt; always set it to null.",
        ImageFrequency::Rarely => {
            "Provide an imagePrompt only for a truly momentous event, at most once a session. Otherwise set it to null."
        }
        ImageFrequency::Sometimes => {
            "Provide an imagePrompt only when a new scene begins, an important opponent appears, or the outcome is dramatic. Otherwise set it to null."
        }
        ImageFrequency::Always => {
            "Always provide a vivid imagePrompt showing the outcome: the character, the setting and the mood."
        }
    }
}

fn character_sheet(character: &Character) -> String {
    let aspects = &character.aspects;
    let top_skills: Vec<String> = character
        .skills
        .iter()
        .filter(|s| s.level > 1)
        .map(|s| format!("{} (+{})", s.name, s.level))
        .collect();

    let mut sheet = String::new();
    let _ = writeln!(sheet, "- Name: {}", character.name);
    let _ = writeln!(
        sheet,
        "- High Concept: \"{}\" ({})",
        aspects.high_concept.name, aspects.high_concept.description
    );
    let _ = writeln!(
        sheet,
        "- Trouble: \"{}\" ({})",
        aspects.trouble.name, aspects.trouble.description
    );
    let _ = writeln!(
        sheet,
        "- Other Aspects: {}",
        quoted(aspects.others.iter().map(|a| a.name.as_str()))
    );
    let _ = writeln!(sheet, "- Top Skills: {}", top_skills.join(", "));
    let _ = writeln!(
        sheet,
        "- Stunts: {}",
        quoted(character.stunts.iter().map(|s| s.name.as_str()))
    );
    sheet
}

const OPPONENT_SHAPE: &str = "Opponents need a unique \"id\", a \"name\", \"aspects\", \
\"isTakenOut\": false, \"consequences\": [] and stress tracks whose boxes and marked fields are both arrays, \
e.g. \"physicalStress\": {\"boxes\": [1, 2], \"marked\": [false, false]}.";

/// Menus of aspects and stunts for building a character by hand.
pub fn character_options(genre: &str, settings: &Settings) -> Prompt {
    let user = format!(
        r#"The player wants to play a "{genre}" game. Offer thematic options for character creation.

Respond with this structure:
{{
  "aspects": {{
    "highConcepts": [{{"name": "...", "description": "One sentence."}}],
    "troubles": [{{"name": "...", "description": "One sentence."}}],
    "others": [{{"name": "...", "description": "One sentence."}}]
  }},
  "stunts": [{{"name": "...", "description": "One sentence naming the mechanical benefit."}}]
}}

Rules:
1. Give 5 high concepts, 5 troubles, 8 other aspects and 8 stunts, all distinct.
2. Stunts grant a clear mechanical benefit, such as +2 to a skill in a narrow circumstance.
3. Every array element is an object wrapped in braces, separated by commas, with no trailing comma."#
    );
    Prompt::new(system(settings), user)
}

/// A complete ready-to-play character.
pub fn generate_character(genre: &str, settings: &Settings) -> Prompt {
    let user = format!(
        r#"The player wants to play a "{genre}" game. Create one complete, thematic character.

Respond with this structure:
{{
  "name": "...",
  "aspects": {{
    "highConcept": {{"name": "...", "description": "One sentence."}},
    "trouble": {{"name": "...", "description": "One sentence."}},
    "others": [{{"name": "...", "description": "One sentence."}}]
  }},
  "stunts": [{{"name": "...", "description": "One sentence."}}],
  "skills": [{{"name": "...", "level": 4}}]
}}

Rules:
1. Exactly 3 other aspects and exactly 2 stunts.
2. Skills follow the pyramid: one at +4, two at +3, three at +2, four at +1 (ten skills in total).
3. Skill names come only from this list: {skills}."#,
        skills = quoted(DEFAULT_SKILL_NAMES)
    );
    Prompt::new(system(settings), user)
}

/// The first scene of a new game.
pub fn opening_scene(character: &Character, genre: &str, settings: &Settings) -> Prompt {
    let user = format!(
        r#"A player has created a character for a "{genre}" game.

Character:
{sheet}
Difficulty: {difficulty}. {guidance}
On EASY start calmly with a low-stakes problem; on MEDIUM engage the character's aspects with a real challenge; on HARD open in the middle of immediate danger.

Respond with this structure:
{{
  "scene": {{
    "description": "What is happening and what the character faces right now.",
    "aspects": [{{"name": "...", "description": "..."}}],
    "opponents": []
  }},
  "imagePrompt": "One vivid sentence describing the character in this moment."
}}

{opponents}"#,
        sheet = character_sheet(character),
        difficulty = settings.difficulty.label(),
        guidance = difficulty_guidance(settings.difficulty),
        opponents = OPPONENT_SHAPE,
    );
    Prompt::new(system(settings), user)
}

/// Resolve the player's action and the opposition's response.
pub fn turn(state: &GameState, action: &ActionSummary, settings: &Settings) -> Prompt {
    let character = &state.character;
    let scene = &state.scene;

    let consequences = if character.consequences.is_empty() {
        "None".to_string()
    } else {
        character
            .consequences
            .iter()
            .map(|c| {
                let tag = if c.aspect.has_free_invoke {
                    " (free GM invoke available)"
                } else {
                    ""
                };
                format!("\"{}\" ({}){}", c.aspect.name, c.severity, tag)
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let opponents = if scene.opponents.is_empty() {
        "  None".to_string()
    } else {
        scene
            .opponents
            .iter()
            .map(|o| {
                format!(
                    "  - ID: {}, Name: {}, Status: {}, Physical Stress: {}/{}, Mental Stress: {}/{}, Consequences: {}",
                    o.id,
                    o.name,
                    if o.is_taken_out { "Taken Out" } else { "Active" },
                    o.physical_stress.marked_count(),
                    o.physical_stress.len(),
                    o.mental_stress.marked_count(),
                    o.mental_stress.len(),
                    quoted(o.consequences.iter().map(|c| c.aspect.name.as_str())),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut player = format!(
        "The player wants to: \"{}\"\nSkill used: \"{}\"\n",
        action.description, action.skill
    );
    if let Some(target) = &action.target {
        let _ = writeln!(player, "Target opponent ID: \"{}\"", target);
    }
    if !action.invoked.is_empty() {
        let _ = writeln!(player, "Invoked aspects: {}", quoted(&action.invoked));
    }
    let _ = write!(player, "Total result (dice + skill + invokes): {}", action.total);

    let user = format!(
        r#"Current situation:

Character:
- Name: {name}
- Aspects: {aspects}
- Consequences: {consequences}
- Fate Points: {fate_points}

Scene:
- Description: {description}
- Scene Aspects: {scene_aspects}
- Opponents:
{opponents}
- Compel already offered in this scene: {compel_offered}

Difficulty: {difficulty}. {guidance}

Player action:
{player}

Resolve the turn:
1. Decide whether the player is overcoming an obstacle, creating an advantage, attacking or defending, and set a fitting difficulty.
2. On a successful attack, subtract the target's defense from the total and apply the shifts to that opponent: mark stress boxes, add consequences (mild absorbs 2, moderate 4), and set "isTakenOut" when they cannot absorb the rest. Return every opponent in "updatedOpponents".
3. On a successful create-an-advantage, add the new situational aspect as "newSceneAspect".
4. Let active opponents react. When one hits the character, report it as "hit": {{"shifts": <positive number>, "attackDescription": "...", "type": "physical" or "mental"}}. {opponent_shape}
5. When no compel has been offered in this scene, look for one, ideally on the trouble aspect. Report it as "compel": {{"aspect": "...", "reason": "...", "acceptNarration": "...", "rejectNarration": "..."}}.
6. If every opponent is taken out or the scene's goal is resolved, end the scene: give "newScene" with a description and aspects, bridge to it in the narration, and list stale aspects in "removedSceneAspects". Otherwise "newScene" is null.
7. Consequences marked with a free GM invoke give the opposition +2 once. Mention any you use and list them in "usedFreeInvokes".
8. "narration" tells the whole turn: the player's result and the opposition's reaction.
9. {image}

Respond with this structure:
{{
  "narration": "...",
  "imagePrompt": null,
  "newSceneAspect": null,
  "removedSceneAspects": [],
  "hit": null,
  "compel": null,
  "newScene": null,
  "usedFreeInvokes": [],
  "updatedOpponents": null
}}"#,
        name = character.name,
        aspects = quoted(character.aspects.all().map(|a| a.name.as_str())),
        consequences = consequences,
        fate_points = character.fate_points,
        description = scene.description,
        scene_aspects = quoted(scene.aspects.iter().map(|a| a.name.as_str())),
        opponents = opponents,
        compel_offered = scene.has_offered_compel,
        difficulty = settings.difficulty.label(),
        guidance = difficulty_guidance(settings.difficulty),
        player = player,
        opponent_shape = OPPONENT_SHAPE,
        image = image_guidance(settings.image_frequency),
    );
    Prompt::new(system(settings), user)
}

fn conflict_over(state: &GameState, hit: &Hit, situation: &str, task: &str, settings: &Settings) -> Prompt {
    let character = &state.character;
    let user = format!(
        r#"{situation}

Character:
- Name: {name}
- Aspects: {aspects}

The blow: {shifts} shifts of {kind} harm from "{attack}".

{task}
The conflict is over. Create the new scene that follows, with a description and a few aspects.

Respond with this structure:
{{
  "narration": "The outcome and the bridge into the new scene.",
  "newScene": {{"description": "...", "aspects": [{{"name": "...", "description": "..."}}]}},
  "imagePrompt": "One vivid sentence describing the new scene."
}}
Do not include hit, compel or updatedCharacter fields."#,
        name = character.name,
        aspects = quoted(character.aspects.all().map(|a| a.name.as_str())),
        shifts = hit.shifts,
        kind = hit.kind,
        attack = hit.attack_description,
    );
    Prompt::new(system(settings), user)
}

/// The character could not absorb a hit.
pub fn taken_out(state: &GameState, hit: &Hit, settings: &Settings) -> Prompt {
    conflict_over(
        state,
        hit,
        "The character has been defeated: they could not absorb the hit and are Taken Out.",
        "Narrate what being taken out means here. They are not necessarily dead: captured, knocked out, left for dead or driven off. Make it matter to the story.",
        settings,
    )
}

/// The character chose to concede before the hit landed.
pub fn concession(state: &GameState, hit: &Hit, settings: &Settings) -> Prompt {
    conflict_over(
        state,
        hit,
        "The character has chosen to concede the conflict rather than be taken out. They lose, but they decide how, and they have already been given a Fate Point.",
        "Narrate a controlled exit that reflects their choice: a tactical retreat, a surrender on their own terms, or giving up the goal to avoid something worse.",
        settings,
    )
}

/// The text sent to the image backend.
pub fn image(prompt: &str) -> String {
    format!("{}, {}", prompt.trim(), IMAGE_STYLE)
}
