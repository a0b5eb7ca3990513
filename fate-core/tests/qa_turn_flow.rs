//! QA tests for the turn loop: invokes, compels, scene changes and images.
//!
//! Driven by a scripted generator, so no API key is needed.
//! Run with: `cargo test -p fate-core --test qa_turn_flow`

use fate_core::fate::{CompelChoice, FateError, InvokeToggle};
use fate_core::gm::GeneratorError;
use fate_core::reconcile::SCENE_CHANGED;
use fate_core::session::SessionError;
use fate_core::settings::{ImageFrequency, Settings};
use fate_core::testing::{
    assert_fate_points, assert_input_locked, assert_input_open, assert_last_entry, MockReply,
    TestHarness,
};
use fate_core::world::{create_sample_character, EntryKind};
use serde_json::json;

// =============================================================================
// INVOKES
// =============================================================================

#[tokio::test]
async fn test_paid_invoke_then_revoke_nets_zero() {
    let mut harness = TestHarness::new();

    let first = harness.session.invoke_aspect("Scarred Veteran").unwrap();
    assert_eq!(first, InvokeToggle::InvokedPaid);
    assert_fate_points(&harness, 2);

    let second = harness.session.invoke_aspect("Scarred Veteran").unwrap();
    assert_eq!(second, InvokeToggle::Revoked { refunded: 1 });
    assert_fate_points(&harness, 3);
    assert!(harness.session.invokes().is_empty());
}

#[tokio::test]
async fn test_paid_invoke_refused_at_zero() {
    let mut character = create_sample_character("Broke");
    character.fate_points = 0;
    let mut harness = TestHarness::with_character(character);

    assert!(matches!(
        harness.session.invoke_aspect("Dense Fog"),
        Err(SessionError::Fate(FateError::NoFatePoints))
    ));
    assert_fate_points(&harness, 0);
}

#[tokio::test]
async fn test_created_advantage_gives_one_free_invoke() {
    let mut harness = TestHarness::new();
    harness.expect_turn(json!({
        "narration": "You kick over a crate; the smuggler is boxed in.",
        "newSceneAspect": { "name": "Cornered", "description": "No way out but through you." }
    }));
    harness.act("Box him in", "Athletics").await.unwrap();
    assert!(harness.state().scene.aspect("Cornered").unwrap().has_free_invoke);

    assert_eq!(
        harness.session.invoke_aspect("Cornered").unwrap(),
        InvokeToggle::InvokedFree
    );
    assert_eq!(
        harness.session.invoke_aspect("Slick Cobblestones").unwrap(),
        InvokeToggle::InvokedPaid
    );
    assert_fate_points(&harness, 2);

    harness.expect_narration("Your blade finds its mark.");
    let outcome = harness.act("Strike", "Fight").await.unwrap();

    // Two invokes, free or paid, are worth +4.
    assert_eq!(outcome.roll.invoke_bonus, 4);
    assert_eq!(outcome.roll.total(), 8);
    assert!(!harness.state().scene.aspect("Cornered").unwrap().has_free_invoke);
    assert!(harness.session.invokes().is_empty());

    // Spent: the next invoke costs a fate point.
    assert_eq!(
        harness.session.invoke_aspect("Cornered").unwrap(),
        InvokeToggle::InvokedPaid
    );
    assert_fate_points(&harness, 1);
}

#[tokio::test]
async fn test_advantage_on_existing_aspect_is_free() {
    let mut harness = TestHarness::new();
    harness.expect_turn(json!({
        "narration": "You bank the lanterns; the fog closes in around you.",
        "newSceneAspect": { "name": "Dense Fog", "description": "Thick enough to hide in." }
    }));
    harness.act("Douse the lights", "Stealth").await.unwrap();

    let fog: Vec<_> = harness
        .state()
        .scene
        .aspects
        .iter()
        .filter(|a| a.name == "Dense Fog")
        .collect();
    assert_eq!(fog.len(), 1);
    assert!(fog[0].has_free_invoke);
    assert_eq!(fog[0].description, "Thick enough to hide in.");

    assert_eq!(
        harness.session.invoke_aspect("Dense Fog").unwrap(),
        InvokeToggle::InvokedFree
    );
    assert_fate_points(&harness, 3);
}

#[tokio::test]
async fn test_staged_free_invoke_spent_on_the_old_aspect() {
    let mut harness = TestHarness::new();
    harness.expect_turn(json!({
        "narration": "You kick over a crate; the smuggler is boxed in.",
        "newSceneAspect": { "name": "Cornered" }
    }));
    harness.act("Box him in", "Athletics").await.unwrap();
    harness.session.invoke_aspect("Cornered").unwrap();

    // The same name comes back as a new advantage: a fresh instance, so a
    // fresh invoke.
    harness.expect_turn(json!({
        "narration": "He scrambles back, still trapped.",
        "newSceneAspect": { "name": "Cornered" }
    }));
    harness.act("Press him", "Fight").await.unwrap();
    assert!(harness.state().scene.aspect("Cornered").unwrap().has_free_invoke);
    assert_fate_points(&harness, 3);

    // Likewise for a new scene that reuses the name.
    harness.session.invoke_aspect("Cornered").unwrap();
    harness.expect_turn(json!({
        "narration": "He bolts into a dead-end alley.",
        "newScene": {
            "description": "A narrow alley walled in brick.",
            "aspects": [{ "name": "Cornered", "hasFreeInvoke": true }]
        }
    }));
    harness.act("Give chase", "Athletics").await.unwrap();
    assert!(harness.state().scene.aspect("Cornered").unwrap().has_free_invoke);
    assert!(harness.session.invokes().is_empty());
}

#[tokio::test]
async fn test_removed_scene_aspects() {
    let mut harness = TestHarness::new();
    harness.expect_turn(json!({
        "narration": "A gust of wind tears the fog apart.",
        "removedSceneAspects": ["Dense Fog"]
    }));
    harness.act("Wait for the wind", "Notice").await.unwrap();

    let names: Vec<_> = harness
        .state()
        .scene
        .aspects
        .iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(names, vec!["Slick Cobblestones"]);
}

// =============================================================================
// COMPELS
// =============================================================================

fn compel_turn() -> serde_json::Value {
    json!({
        "narration": "A rival knight laughs at your broken oath.",
        "compel": {
            "aspect": "Pride Before the Fall",
            "reason": "You cannot let the insult stand.",
            "acceptNarration": "You draw steel in the middle of the square.",
            "rejectNarration": "You grit your teeth and walk away."
        }
    })
}

#[tokio::test]
async fn test_accept_compel() {
    let mut harness = TestHarness::new();
    harness.expect_turn(compel_turn());
    let outcome = harness.act("Cross the square", "Athletics").await.unwrap();

    assert!(outcome.compel.is_some());
    assert!(harness.state().scene.has_offered_compel);
    assert_input_locked(&harness);

    harness.session.resolve_compel(CompelChoice::Accept).unwrap();
    assert_fate_points(&harness, 4);
    assert_input_open(&harness);

    let log = &harness.state().story_log;
    assert_eq!(
        log[log.len() - 2].content,
        "You accepted the compel on \"Pride Before the Fall\" and gained 1 Fate Point."
    );
    assert_last_entry(&harness, EntryKind::Narration, "You draw steel");
}

#[tokio::test]
async fn test_reject_compel_costs_a_fate_point() {
    let mut harness = TestHarness::new();
    harness.expect_turn(compel_turn());
    harness.act("Cross the square", "Athletics").await.unwrap();

    harness.session.resolve_compel(CompelChoice::Reject).unwrap();
    assert_fate_points(&harness, 2);
    assert_last_entry(&harness, EntryKind::Narration, "walk away");
}

#[tokio::test]
async fn test_reject_compel_refused_at_zero() {
    let mut character = create_sample_character("Broke");
    character.fate_points = 0;
    let mut harness = TestHarness::with_character(character);
    harness.expect_turn(compel_turn());
    harness.act("Cross the square", "Athletics").await.unwrap();
    let before = harness.state().clone();

    assert!(matches!(
        harness.session.resolve_compel(CompelChoice::Reject),
        Err(SessionError::Fate(FateError::NoFatePoints))
    ));
    assert_eq!(harness.state(), &before);
    assert!(harness.session.pending_compel().is_some());

    harness.session.resolve_compel(CompelChoice::Accept).unwrap();
    assert_fate_points(&harness, 1);
}

// =============================================================================
// SCENES AND OPPONENTS
// =============================================================================

#[tokio::test]
async fn test_new_scene_resets_tactical_state() {
    let mut harness = TestHarness::new();
    harness.expect_turn(json!({
        "narration": "The smuggler lands a glancing blow.",
        "hit": { "shifts": 1, "attackDescription": "A knife", "type": "physical" }
    }));
    harness.act("Grab the ledger", "Burglary").await.unwrap();
    harness
        .session
        .absorb_hit(&fate_core::conflict::Absorption::stress([0]))
        .unwrap();
    assert!(harness.session.character().physical_stress.marked[0]);

    harness.expect_turn(compel_turn());
    harness.act("Look for trouble", "Provoke").await.unwrap();
    harness.session.resolve_compel(CompelChoice::Accept).unwrap();
    assert!(harness.state().scene.has_offered_compel);

    harness.expect_turn(json!({
        "narration": "You flee across the rooftops to the old lighthouse.",
        "newScene": {
            "description": "Wind howls around the lighthouse lamp.",
            "aspects": [{ "name": "Crumbling Stairs" }]
        }
    }));
    harness.act("Run", "Athletics").await.unwrap();

    let state = harness.state();
    assert_eq!(state.scene.description, "Wind howls around the lighthouse lamp.");
    assert!(!state.scene.has_offered_compel);
    assert!(state.character.physical_stress.marked.iter().all(|m| !m));
    assert!(state.character.consequences.is_empty());

    let log = &state.story_log;
    assert_eq!(log[log.len() - 2].kind, EntryKind::Narration);
    assert_last_entry(&harness, EntryKind::System, SCENE_CHANGED);
}

#[tokio::test]
async fn test_opponent_roster_replaced_and_repaired() {
    let mut harness = TestHarness::new();
    harness.expect_turn(json!({
        "narration": "Two thugs step out of the fog.",
        "updatedOpponents": [
            { "name": "Thug", "physicalStress": { "boxes": [1, 2], "marked": [true] } },
            { "id": "thug", "name": "Second Thug" },
            { "id": "thug", "name": "Third Thug", "isTakenOut": true }
        ]
    }));
    harness.act("Ready my shield", "Fight").await.unwrap();

    let opponents = &harness.state().scene.opponents;
    assert_eq!(opponents.len(), 3);
    assert_eq!(opponents[0].id, "opponent-1");
    assert_eq!(opponents[0].physical_stress.marked, vec![true, false]);
    assert_ne!(opponents[1].id, opponents[2].id);
    assert_eq!(harness.state().scene.active_opponents().count(), 2);

    harness.expect_narration("The thugs scatter.");
    harness
        .session
        .player_action_with_roll(
            "Bash the nearest thug",
            "Fight",
            Some("opponent-1"),
            fate_core::testing::flat_roll(),
        )
        .await
        .unwrap();
    let prompt = harness.mock.prompts().last().cloned().unwrap();
    assert!(prompt.user.contains("opponent-1"));
}

// =============================================================================
// FAILURES AND RETRIES
// =============================================================================

#[tokio::test]
async fn test_rate_limit_retried_then_succeeds() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(MockReply::RateLimited)
        .expect_reply(MockReply::RateLimited)
        .expect_narration("Third time lucky.");

    harness.act("Pick the lock", "Burglary").await.unwrap();
    assert_eq!(harness.mock.call_count(), 3);
    assert_last_entry(&harness, EntryKind::Narration, "Third time lucky.");
}

#[tokio::test]
async fn test_exhausted_retries_leave_one_error_entry() {
    let mut harness = TestHarness::new();
    harness.session.invoke_aspect("Dense Fog").unwrap();
    harness
        .expect_reply(MockReply::RateLimited)
        .expect_reply(MockReply::RateLimited)
        .expect_reply(MockReply::RateLimited);
    let before = harness.state().story_log.len();

    let result = harness.act("Pick the lock", "Burglary").await;
    assert!(matches!(
        result,
        Err(SessionError::Generator(GeneratorError::RateLimited))
    ));
    assert_eq!(harness.state().story_log.len(), before + 1);
    assert_last_entry(&harness, EntryKind::Error, "busy");

    // Staged invokes survive so the retry keeps the paid bonus.
    assert_eq!(harness.session.invokes().len(), 1);
    assert_fate_points(&harness, 2);
}

#[tokio::test]
async fn test_fenced_payload_repaired() {
    let mut harness = TestHarness::new();
    harness.expect_reply(MockReply::Text(
        "Here you go:\n```json\n{\"narration\": \"The door creaks open.\"}\n```".to_string(),
    ));
    harness.act("Push the door", "Physique").await.unwrap();
    assert_last_entry(&harness, EntryKind::Narration, "The door creaks open.");
}

#[tokio::test]
async fn test_garbage_payload_is_an_error() {
    let mut harness = TestHarness::new();
    harness.expect_reply(MockReply::Text("I'd rather not.".to_string()));
    let result = harness.act("Push the door", "Physique").await;
    assert!(matches!(
        result,
        Err(SessionError::Generator(GeneratorError::Payload(_)))
    ));
    assert_eq!(harness.entries(EntryKind::Action).len(), 0);
    assert_eq!(harness.last_entry().map(|e| e.kind), Some(EntryKind::Error));
}

// =============================================================================
// IMAGES
// =============================================================================

fn image_turn(narration: &str) -> serde_json::Value {
    json!({ "narration": narration, "imagePrompt": "A knight in the rain" })
}

#[tokio::test]
async fn test_image_patches_only_its_entry() {
    let mut harness = TestHarness::new();
    harness
        .expect_turn(image_turn("Lightning splits the sky."))
        .expect_image(MockReply::Text("data:image/png;base64,AA".to_string()));

    let outcome = harness.act("Look up", "Notice").await.unwrap();
    let request = outcome.image.unwrap();
    assert_eq!(request.entry, outcome.narration_id);
    assert!(harness.state().entry(request.entry).unwrap().is_loading_image);

    // Another entry lands before the image does.
    harness.expect_narration("Thunder follows.");
    harness.act("Brace", "Physique").await.unwrap();

    let url = harness.session.fetch_image(request.clone()).await.unwrap();
    assert_eq!(url.as_deref(), Some("data:image/png;base64,AA"));

    let state = harness.state();
    let patched = state.entry(request.entry).unwrap();
    assert_eq!(patched.image_url.as_deref(), Some("data:image/png;base64,AA"));
    assert!(!patched.is_loading_image);
    assert_eq!(
        state.story_log.iter().filter(|e| e.image_url.is_some()).count(),
        1
    );
}

#[tokio::test]
async fn test_image_rate_limit_starts_cooldown() {
    let mut harness = TestHarness::new();
    harness
        .expect_turn(image_turn("Rain."))
        .expect_turn(image_turn("More rain."))
        .expect_image(MockReply::RateLimited);

    let first = harness.act("Wait", "Will").await.unwrap().image.unwrap();
    assert!(matches!(
        harness.session.fetch_image(first.clone()).await,
        Err(SessionError::Generator(GeneratorError::ImageRateLimited))
    ));
    assert!(!harness.state().entry(first.entry).unwrap().is_loading_image);
    assert_last_entry(&harness, EntryKind::System, "image generation quota");

    let second = harness.act("Wait more", "Will").await.unwrap().image.unwrap();
    assert!(matches!(
        harness.session.fetch_image(second).await,
        Err(SessionError::Generator(GeneratorError::ImageCooldown))
    ));
    assert_last_entry(&harness, EntryKind::System, "cooldown");
    assert_eq!(harness.mock.image_call_count(), 1);
}

#[tokio::test]
async fn test_images_disabled_by_settings() {
    let mut harness = TestHarness::new()
        .with_settings(Settings::default().with_image_frequency(ImageFrequency::None));
    harness.expect_turn(image_turn("Rain."));

    let outcome = harness.act("Wait", "Will").await.unwrap();
    assert!(outcome.image.is_none());
    assert!(!harness.state().entry(outcome.narration_id).unwrap().is_loading_image);
}
