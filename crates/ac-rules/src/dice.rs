//! Die sizes and damage-formula rewriting.
//!
//! `extraDice`, `diceUpgrade` and `diceDowngrade` rules rewrite the dice
//! terms of a damage formula: more dice per term, or a step along the
//! d4 → d6 → d8 → d10 → d12 → d20 ladder.

use serde::{Deserialize, Serialize};

/// A polyhedral die type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Die {
    /// Four-sided die.
    D4,
    /// Six-sided die.
    D6,
    /// Eight-sided die.
    D8,
    /// Ten-sided die.
    D10,
    /// Twelve-sided die.
    D12,
    /// Twenty-sided die.
    D20,
    /// A die with any other number of sides; not on the step ladder.
    Custom(u32),
}

const LADDER: [Die; 6] = [Die::D4, Die::D6, Die::D8, Die::D10, Die::D12, Die::D20];

impl Die {
    /// Returns the number of sides on this die.
    pub fn sides(self) -> u32 {
        match self {
            Self::D4 => 4,
            Self::D6 => 6,
            Self::D8 => 8,
            Self::D10 => 10,
            Self::D12 => 12,
            Self::D20 => 20,
            Self::Custom(n) => n,
        }
    }

    /// The die with the given number of sides.
    pub fn from_sides(sides: u32) -> Self {
        LADDER
            .iter()
            .copied()
            .find(|d| d.sides() == sides)
            .unwrap_or(Self::Custom(sides))
    }

    /// Parse a die from a string like "d20" or "d6".
    pub fn from_str_tag(s: &str) -> Option<Self> {
        let sides = s.trim().to_lowercase().strip_prefix('d')?.parse::<u32>().ok()?;
        (sides >= 2).then(|| Self::from_sides(sides))
    }

    /// Move `steps` along the ladder (negative steps go down), stopping at
    /// either end. Dice off the ladder never change.
    pub fn step(self, steps: i64) -> Self {
        let Some(index) = LADDER.iter().position(|d| *d == self) else {
            return self;
        };
        let last = LADDER.len() as i64 - 1;
        let target = (index as i64 + steps).clamp(0, last);
        LADDER[target as usize]
    }
}

impl std::fmt::Display for Die {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// Rewrite every `NdM` term of a formula: add `extra` dice (never going
/// below one) and step the die `steps` times.
pub fn rewrite_dice_terms(formula: &str, extra: i64, steps: i64) -> String {
    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len() + 4);
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let starts_word = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        if starts_word && i < bytes.len() && bytes[i] == b'd' {
            let faces_start = i + 1;
            let mut j = faces_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            let terminated = j == bytes.len() || !bytes[j].is_ascii_alphanumeric();
            if j > faces_start && terminated {
                let count: i64 = formula[start..i].parse().unwrap_or(1);
                let faces: u32 = formula[faces_start..j].parse().unwrap_or(0);
                let die = Die::from_sides(faces).step(steps);
                let count = (count + extra).max(1);
                out.push_str(&format!("{count}{die}"));
                i = j;
                continue;
            }
        }
        if i == start {
            // Not a digit: copy one character through.
            let ch = formula[i..].chars().next().unwrap_or(' ');
            out.push(ch);
            i += ch.len_utf8();
        } else {
            out.push_str(&formula[start..i]);
        }
    }
    out
}
