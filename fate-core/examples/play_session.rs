//! Quick end-to-end run of a Fate session against Claude.
//!
//! Run with: `cargo run -p fate-core --example play_session`

use fate_core::conflict::{Absorption, HitState};
use fate_core::fate::CompelChoice;
use fate_core::world::ConsequenceSeverity;
use fate_core::{create_sample_character, GameMaster, GameSession, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    println!("=== Fate Session ===\n");

    println!("1. Opening scene...");
    let gm = GameMaster::from_env()?;
    let mut session = GameSession::start(
        gm,
        create_sample_character("Aldric"),
        "rain-soaked fantasy port",
        Settings::default(),
    )
    .await?;
    println!("   {}", session.state().scene.description);
    for aspect in &session.state().scene.aspects {
        println!("   Aspect: {}", aspect.name);
    }

    println!("\n2. Taking an action (this calls Claude API)...");
    if let Some(aspect) = session.state().scene.aspects.first().map(|a| a.name.clone()) {
        let toggle = session.invoke_aspect(&aspect)?;
        println!("   Invoked {aspect}: {toggle:?}");
    }
    let outcome = session
        .player_action("I push through the crowd toward the harbor master", "Physique", None)
        .await?;
    println!("   {}", outcome.roll);
    if let Some(entry) = session.state().entry(outcome.narration_id) {
        println!("   {}", entry.content);
    }
    if let Some(image) = outcome.image {
        match session.fetch_image(image).await {
            Ok(url) => println!("   Image: {}", url.is_some()),
            Err(e) => println!("   Image skipped: {e}"),
        }
    }

    println!("\n3. Resolving anything pending...");
    if outcome.compel.is_some() {
        session.resolve_compel(CompelChoice::Accept)?;
        println!("   Accepted compel, fate points: {}", session.character().fate_points);
    }
    if let Some(hit) = outcome.hit {
        match hit.state() {
            HitState::TakenOut { .. } => {
                session.acknowledge_defeat().await?;
                println!("   Taken out");
            }
            HitState::Resolving { .. } => {
                let boxes = session.character().stress_track(hit.hit().kind).unmarked_indices();
                let absorption = Absorption::stress(boxes)
                    .with_consequence(ConsequenceSeverity::Severe, "Battered and Bleeding");
                match session.absorb_hit(&absorption) {
                    Ok(()) => println!("   Absorbed {} shifts", hit.hit().shifts),
                    Err(e) => {
                        println!("   Could not absorb ({e}), conceding");
                        session.concede().await?;
                    }
                }
            }
        }
    }

    println!("\nStory log:");
    for entry in &session.state().story_log {
        println!("   [{:?}] {}", entry.kind, entry.content);
    }
    Ok(())
}
