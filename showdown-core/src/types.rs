use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amount of ledger units held or transferred.
///
/// The custodian ledger is unit-agnostic; one unit is the smallest
/// indivisible denomination of whatever currency backs the accounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u64) -> Self {
        Amount(units)
    }

    pub fn to_units(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn checked_mul(self, rhs: u64) -> Option<Amount> {
        self.0.checked_mul(rhs).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} units", self.0)
    }
}

/// Opaque reference to a custodian account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef(pub String);

impl AccountRef {
    pub fn new() -> Self {
        AccountRef(format!("acct_{}", Uuid::new_v4()))
    }
}

impl Default for AccountRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type WagerId = Uuid;

/// One of the two seats in a wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Creator,
    Challenger,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Creator => Side::Challenger,
            Side::Challenger => Side::Creator,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Creator => write!(f, "creator"),
            Side::Challenger => write!(f, "challenger"),
        }
    }
}

/// A hand in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::Rock => write!(f, "rock"),
            Choice::Paper => write!(f, "paper"),
            Choice::Scissors => write!(f, "scissors"),
        }
    }
}

impl std::str::FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rock" => Ok(Choice::Rock),
            "paper" => Ok(Choice::Paper),
            "scissors" => Ok(Choice::Scissors),
            other => Err(format!("unknown choice '{}'", other)),
        }
    }
}

/// Wager lifecycle status. Monotonic: a wager never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerStatus {
    Open,
    Active,
    Settled,
    Cancelled,
}

impl WagerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WagerStatus::Open => "open",
            WagerStatus::Active => "active",
            WagerStatus::Settled => "settled",
            WagerStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One participant: display name plus the custodian account that
/// funds the stake and receives the payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub account: AccountRef,
}

impl Participant {
    pub fn new(name: impl Into<String>, account: AccountRef) -> Self {
        Self {
            name: name.into(),
            account,
        }
    }
}

/// The central wager record. Exclusively owned by the ledger store;
/// every mutation goes through a read-modify-conditional-write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub creator: Participant,
    pub challenger: Option<Participant>,
    pub stake: Amount,
    pub custody_account: AccountRef,
    pub pot: Amount,
    pub status: WagerStatus,
    pub creator_choice: Option<Choice>,
    pub challenger_choice: Option<Choice>,
    pub winner: Option<Side>,
    pub choice_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Set when this wager was spawned as a rematch of an earlier one.
    pub rematch_of: Option<WagerId>,
    /// Reserves the challenger seat for a named player (rematch flow).
    pub invited: Option<String>,
}

impl Wager {
    pub fn new(creator: Participant, stake: Amount, custody_account: AccountRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator,
            challenger: None,
            stake,
            custody_account,
            pot: stake,
            status: WagerStatus::Open,
            creator_choice: None,
            challenger_choice: None,
            winner: None,
            choice_deadline: None,
            created_at: Utc::now(),
            rematch_of: None,
            invited: None,
        }
    }

    pub fn choice_of(&self, side: Side) -> Option<Choice> {
        match side {
            Side::Creator => self.creator_choice,
            Side::Challenger => self.challenger_choice,
        }
    }

    pub fn set_choice(&mut self, side: Side, choice: Choice) {
        match side {
            Side::Creator => self.creator_choice = Some(choice),
            Side::Challenger => self.challenger_choice = Some(choice),
        }
    }

    pub fn participant(&self, side: Side) -> Option<&Participant> {
        match side {
            Side::Creator => Some(&self.creator),
            Side::Challenger => self.challenger.as_ref(),
        }
    }

    /// Resolve a player name to the seat they occupy, if any.
    pub fn side_of(&self, name: &str) -> Option<Side> {
        if self.creator.name == name {
            return Some(Side::Creator);
        }
        if self.challenger.as_ref().map(|c| c.name.as_str()) == Some(name) {
            return Some(Side::Challenger);
        }
        None
    }

    pub fn both_choices_made(&self) -> bool {
        self.creator_choice.is_some() && self.challenger_choice.is_some()
    }

    /// Seats that have a committed choice this round.
    pub fn committed_sides(&self) -> Vec<Side> {
        let mut sides = Vec::new();
        if self.creator_choice.is_some() {
            sides.push(Side::Creator);
        }
        if self.challenger_choice.is_some() {
            sides.push(Side::Challenger);
        }
        sides
    }
}

/// Pushed by the storage layer after every acknowledged wager write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerChange {
    pub id: WagerId,
    pub version: i64,
    pub status: WagerStatus,
}
