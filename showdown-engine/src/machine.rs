//! Bet state machine: `Open → Active → Settled`, with `Cancelled`
//! reachable only from `Open`. Status is monotonic; an `Active → Active`
//! round reset is the one self-loop, and it always clears both choices
//! together so neither player can unilaterally void a committed choice.
//!
//! Transitions here are pure record mutations. Moving money and making
//! the result durable belong to the escrow manager and the coordinator.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use showdown_core::{Participant, Side, Wager, WagerStatus};

fn guard(wager: &Wager, expected: WagerStatus, action: &'static str) -> Result<()> {
    if wager.status != expected {
        return Err(EngineError::InvalidTransition {
            action,
            status: wager.status,
        });
    }
    Ok(())
}

/// `Open → Active`: a challenger took the seat and matched the stake.
pub fn apply_join(
    wager: &mut Wager,
    challenger: Participant,
    deadline: DateTime<Utc>,
) -> Result<()> {
    guard(wager, WagerStatus::Open, "join")?;

    let pot = wager
        .stake
        .checked_mul(2)
        .ok_or(showdown_core::CoreError::AmountOverflow)?;

    wager.challenger = Some(challenger);
    wager.pot = pot;
    wager.creator_choice = None;
    wager.challenger_choice = None;
    wager.status = WagerStatus::Active;
    wager.choice_deadline = Some(deadline);
    Ok(())
}

/// `Active → Active`: round reset after a tie or an all-quiet timeout.
/// Both choices are cleared in the same write and the deadline re-arms.
pub fn apply_reset(wager: &mut Wager, deadline: DateTime<Utc>) -> Result<()> {
    guard(wager, WagerStatus::Active, "reset")?;

    wager.creator_choice = None;
    wager.challenger_choice = None;
    wager.winner = None;
    wager.choice_deadline = Some(deadline);
    Ok(())
}

/// Record a committed choice for one seat. Write-once per round.
pub fn apply_choice(wager: &mut Wager, side: Side, choice: showdown_core::Choice) -> Result<()> {
    if wager.status != WagerStatus::Active {
        return Err(EngineError::WagerNotActive(wager.id));
    }
    if wager.choice_of(side).is_some() {
        return Err(EngineError::ChoiceAlreadyMade(side));
    }

    wager.set_choice(side, choice);
    Ok(())
}

/// Claim the settlement: records the winner while still `Active`.
/// Exactly one caller can make this write stick per round, which is
/// what keeps the payout single-shot under racing settlers.
pub fn claim_winner(wager: &mut Wager, side: Side) -> Result<()> {
    guard(wager, WagerStatus::Active, "claim winner")?;
    if wager.winner.is_some() {
        return Err(EngineError::AlreadySettled(wager.id));
    }

    wager.winner = Some(side);
    Ok(())
}

/// `Active → Settled`: only after the payout transfer is confirmed.
pub fn apply_settled(wager: &mut Wager) -> Result<()> {
    guard(wager, WagerStatus::Active, "settle")?;
    if wager.winner.is_none() {
        return Err(EngineError::internal("settling without a recorded winner"));
    }

    wager.status = WagerStatus::Settled;
    wager.pot = showdown_core::Amount::ZERO;
    wager.choice_deadline = None;
    Ok(())
}

/// `Open → Cancelled`: creator-initiated deletion, refund implied.
pub fn apply_cancel(wager: &mut Wager) -> Result<()> {
    guard(wager, WagerStatus::Open, "cancel")?;

    wager.status = WagerStatus::Cancelled;
    wager.pot = showdown_core::Amount::ZERO;
    Ok(())
}
