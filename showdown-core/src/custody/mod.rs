//! Funds custodian seam.
//!
//! The custodian holds its own key material and executes transfers on
//! whatever ledger backs the accounts; the core only ever sees opaque
//! account references and confirmed/failed outcomes. A failed transfer
//! is retryable, a confirmed one is final.

use crate::error::{CoreError, Result};
use crate::types::{AccountRef, Amount};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Identifier of a confirmed transfer.
pub type TxId = String;

#[async_trait]
pub trait FundsCustodian: Send + Sync {
    /// Mint a fresh empty account.
    async fn create_account(&self) -> Result<AccountRef>;

    /// Move `amount` between accounts. `Ok` means the transfer is
    /// confirmed and irreversible; `Err(TransferFailed)` means nothing
    /// moved and the call may be retried.
    async fn transfer(&self, from: &AccountRef, to: &AccountRef, amount: Amount) -> Result<TxId>;

    async fn balance(&self, account: &AccountRef) -> Result<Amount>;
}

/// In-process custodian backed by a plain balance map.
///
/// Stands in for the external custody service in tests and the CLI;
/// notably the signing material never leaves this component.
pub struct LocalCustodian {
    accounts: RwLock<HashMap<AccountRef, Amount>>,
    fail_next: AtomicU32,
}

impl LocalCustodian {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Open a pre-funded account, e.g. a player wallet.
    pub fn open_account(&self, initial: Amount) -> AccountRef {
        let account = AccountRef::new();
        self.accounts.write().insert(account.clone(), initial);
        account
    }

    /// Make the next `n` transfers fail. Used by tests exercising the
    /// coordinator's bounded retry path.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all balances, for persistence by a host process.
    pub fn snapshot(&self) -> HashMap<AccountRef, Amount> {
        self.accounts.read().clone()
    }

    pub fn restore(&self, balances: HashMap<AccountRef, Amount>) {
        *self.accounts.write() = balances;
    }
}

impl Default for LocalCustodian {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FundsCustodian for LocalCustodian {
    async fn create_account(&self) -> Result<AccountRef> {
        let account = AccountRef::new();
        self.accounts.write().insert(account.clone(), Amount::ZERO);
        Ok(account)
    }

    async fn transfer(&self, from: &AccountRef, to: &AccountRef, amount: Amount) -> Result<TxId> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoreError::transfer_failed("injected transfer failure"));
        }

        let mut accounts = self.accounts.write();

        let from_balance = *accounts
            .get(from)
            .ok_or_else(|| CoreError::AccountNotFound(from.to_string()))?;
        if !accounts.contains_key(to) {
            return Err(CoreError::AccountNotFound(to.to_string()));
        }

        let remaining = from_balance.checked_sub(amount).ok_or_else(|| {
            CoreError::InsufficientFunds {
                need: amount.to_units(),
                available: from_balance.to_units(),
            }
        })?;
        // Credit is checked before either balance moves, so an
        // overflowing transfer leaves both accounts untouched.
        let credited = accounts[to]
            .checked_add(amount)
            .ok_or(CoreError::AmountOverflow)?;

        accounts.insert(from.clone(), remaining);
        accounts.insert(to.clone(), credited);

        let txid = format!("tx_{}", Uuid::new_v4());
        tracing::debug!(%from, %to, %amount, txid, "transfer confirmed");
        Ok(txid)
    }

    async fn balance(&self, account: &AccountRef) -> Result<Amount> {
        self.accounts
            .read()
            .get(account)
            .copied()
            .ok_or_else(|| CoreError::AccountNotFound(account.to_string()))
    }
}
