//! Image cooldown gate.

use super::GeneratorError;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
enum Closed {
    Until(Instant),
    /// The cooldown reaches past any representable instant.
    Indefinitely,
}

/// Suppresses image attempts for a while after the backend rate-limits one.
#[derive(Debug, Clone)]
pub struct ImageGate {
    cooldown: Duration,
    closed: Option<Closed>,
}

impl ImageGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            closed: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left before images may be attempted again.
    pub fn remaining(&self) -> Option<Duration> {
        let left = match self.closed? {
            Closed::Until(until) => until.saturating_duration_since(Instant::now()),
            Closed::Indefinitely => Duration::MAX,
        };
        Some(left).filter(|left| !left.is_zero())
    }

    pub fn is_open(&self) -> bool {
        self.remaining().is_none()
    }

    /// `Err(ImageCooldown)` while the gate is closed.
    pub fn check(&self) -> Result<(), GeneratorError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(GeneratorError::ImageCooldown)
        }
    }

    /// Close the gate for one cooldown period from now.
    pub fn trip(&mut self) {
        warn!(
            cooldown_secs = self.cooldown.as_secs(),
            "Image generation rate limited, pausing"
        );
        self.closed = Some(match Instant::now().checked_add(self.cooldown) {
            Some(until) => Closed::Until(until),
            None => Closed::Indefinitely,
        });
    }
}
