//! Choice resolution: the fixed rock/paper/scissors outcome table.

use serde::{Deserialize, Serialize};
use showdown_core::{Choice, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win(Side),
    Tie,
}

fn beats(a: Choice, b: Choice) -> bool {
    matches!(
        (a, b),
        (Choice::Rock, Choice::Scissors)
            | (Choice::Scissors, Choice::Paper)
            | (Choice::Paper, Choice::Rock)
    )
}

/// Deterministic, side-effect free resolution of one round.
pub fn resolve(creator: Choice, challenger: Choice) -> Outcome {
    if creator == challenger {
        Outcome::Tie
    } else if beats(creator, challenger) {
        Outcome::Win(Side::Creator)
    } else {
        Outcome::Win(Side::Challenger)
    }
}
