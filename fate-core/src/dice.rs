//! Fate dice.
//!
//! Actions are rolled with four Fate dice (4dF). Each die shows minus,
//! blank or plus, so a roll ranges from -4 to +4.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One face of a Fate die.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FateDie {
    Minus,
    Blank,
    Plus,
}

impl FateDie {
    pub fn value(&self) -> i32 {
        match self {
            FateDie::Minus => -1,
            FateDie::Blank => 0,
            FateDie::Plus => 1,
        }
    }

    pub fn roll_with_rng<R: Rng>(rng: &mut R) -> Self {
        match rng.gen_range(-1..=1) {
            -1 => FateDie::Minus,
            0 => FateDie::Blank,
            _ => FateDie::Plus,
        }
    }
}

impl fmt::Display for FateDie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FateDie::Minus => "-",
            FateDie::Blank => " ",
            FateDie::Plus => "+",
        })
    }
}

/// Four Fate dice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FateRoll {
    pub dice: [FateDie; 4],
}

impl FateRoll {
    pub fn new(dice: [FateDie; 4]) -> Self {
        Self { dice }
    }

    pub fn total(&self) -> i32 {
        self.dice.iter().map(FateDie::value).sum()
    }
}

/// Roll 4dF.
pub fn roll_4df() -> FateRoll {
    roll_4df_with_rng(&mut rand::thread_rng())
}

/// Roll 4dF with a specific RNG (useful for testing).
pub fn roll_4df_with_rng<R: Rng>(rng: &mut R) -> FateRoll {
    FateRoll::new([
        FateDie::roll_with_rng(rng),
        FateDie::roll_with_rng(rng),
        FateDie::roll_with_rng(rng),
        FateDie::roll_with_rng(rng),
    ])
}

/// A resolved action roll: dice + skill + invoke bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRoll {
    pub dice: FateRoll,
    pub skill_level: i32,
    pub invoke_bonus: i32,
}

impl ActionRoll {
    pub fn new(dice: FateRoll, skill_level: i32, invoke_bonus: i32) -> Self {
        Self {
            dice,
            skill_level,
            invoke_bonus,
        }
    }

    pub fn roll(&self) -> i32 {
        self.dice.total()
    }

    pub fn total(&self) -> i32 {
        self.roll() + self.skill_level + self.invoke_bonus
    }
}

/// The story log line for the roll, e.g. `Roll: +1 + Skill: 3 + Invokes: 2 = Total: 6`.
impl fmt::Display for ActionRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roll = self.roll();
        let sign = if roll > 0 { "+" } else { "" };
        write!(f, "Roll: {}{} + Skill: {}", sign, roll, self.skill_level)?;
        if self.invoke_bonus > 0 {
            write!(f, " + Invokes: {}", self.invoke_bonus)?;
        }
        write!(f, " = Total: {}", self.total())
    }
}
