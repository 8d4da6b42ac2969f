//! Event stream consumed by the presentation layer. The engine never
//! renders anything; it only reports what happened to a wager.

use serde::{Deserialize, Serialize};
use showdown_core::{Amount, Side, WagerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerEvent {
    /// A new wager was funded and listed as open.
    Created { id: WagerId },
    /// A challenger matched the stake; the wager is active.
    Joined { id: WagerId, challenger: String },
    /// One seat committed its choice this round. Whether this reads as
    /// "you chose" or "your opponent chose" is a viewer-relative
    /// projection left to the presentation layer.
    ChoiceSubmitted { id: WagerId, side: Side },
    /// Tie or all-quiet timeout: choices cleared, deadline re-armed.
    Reset { id: WagerId },
    /// Winner recorded and pot paid out. Terminal.
    Settled {
        id: WagerId,
        winner: Side,
        amount: Amount,
        by_forfeit: bool,
    },
    /// Creator deleted the open wager; stake refunded. Terminal.
    Cancelled { id: WagerId },
}

impl WagerEvent {
    pub fn wager_id(&self) -> WagerId {
        match self {
            WagerEvent::Created { id }
            | WagerEvent::Joined { id, .. }
            | WagerEvent::ChoiceSubmitted { id, .. }
            | WagerEvent::Reset { id }
            | WagerEvent::Settled { id, .. }
            | WagerEvent::Cancelled { id } => *id,
        }
    }
}
