//! Showdown SDK - Core library for wager storage and fund custody
//!
//! This library provides the ledger store that owns wager records
//! (point reads, version-conditional writes, change notification) and
//! the custodian seam that moves the money. The settlement engine sits
//! on top of it in `showdown-engine`.

pub mod custody;
pub mod error;
pub mod storage;
pub mod types;

pub use custody::{FundsCustodian, LocalCustodian, TxId};
pub use error::{CoreError, Result};
pub use storage::{Storage, StoredWager, WagerStore};
pub use types::{
    AccountRef, Amount, Choice, Participant, Side, Wager, WagerChange, WagerId, WagerStatus,
};
