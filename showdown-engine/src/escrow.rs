//! Escrow manager: wager bookkeeping on top of the funds custodian.
//!
//! Every transfer here is an external, irreversible ledger operation.
//! The manager never records a wager as settled itself; it only moves
//! the money and reports what happened. The custody account balance is
//! the ground truth for the pot, which is what makes `payout`
//! idempotent even across a crash between transfer and record.

use crate::error::{EngineError, Result};
use showdown_core::{AccountRef, Amount, CoreError, FundsCustodian, TxId, Wager, WagerStatus};
use std::sync::Arc;

/// Result of a payout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payout {
    /// The pot was transferred to the recipient.
    Paid { amount: Amount, txid: TxId },
    /// The custody account was already drained by an earlier payout;
    /// benign no-op, not a failure.
    AlreadySettled,
}

pub struct EscrowManager {
    custodian: Arc<dyn FundsCustodian>,
}

impl EscrowManager {
    pub fn new(custodian: Arc<dyn FundsCustodian>) -> Self {
        Self { custodian }
    }

    pub fn custodian(&self) -> &Arc<dyn FundsCustodian> {
        &self.custodian
    }

    /// Mint a custody account and move the creator's stake into it.
    /// Fails with `InsufficientFunds` or `TransferFailed` without
    /// leaving a partially funded account behind.
    pub async fn fund(&self, payer: &AccountRef, stake: Amount) -> Result<(AccountRef, TxId)> {
        let custody = self.custodian.create_account().await?;
        let txid = self.custodian.transfer(payer, &custody, stake).await?;

        tracing::info!(%custody, %stake, txid, "escrow funded");
        Ok((custody, txid))
    }

    /// Move the challenger's matching stake into the existing custody
    /// account. The offered amount must equal the wager's stake exactly.
    pub async fn join(&self, wager: &Wager, payer: &AccountRef, amount: Amount) -> Result<TxId> {
        if amount != wager.stake {
            return Err(EngineError::StakeMismatch {
                required: wager.stake.to_units(),
                offered: amount.to_units(),
            });
        }

        let txid = self
            .custodian
            .transfer(payer, &wager.custody_account, amount)
            .await?;

        tracing::info!(wager = %wager.id, %amount, txid, "challenger stake escrowed");
        Ok(txid)
    }

    /// Transfer the entire pot to the recipient. Idempotent: a second
    /// call observes the drained custody account and does nothing.
    pub async fn payout(&self, wager: &Wager, recipient: &AccountRef) -> Result<Payout> {
        let pot = self.custodian.balance(&wager.custody_account).await?;
        if pot.is_zero() {
            tracing::debug!(wager = %wager.id, "payout no-op, pot already drained");
            return Ok(Payout::AlreadySettled);
        }

        let txid = match self
            .custodian
            .transfer(&wager.custody_account, recipient, pot)
            .await
        {
            Ok(txid) => txid,
            Err(e @ CoreError::InsufficientFunds { .. }) => {
                // A concurrent payout may have drained the pot between
                // our read and our transfer; their transfer stands.
                if self
                    .custodian
                    .balance(&wager.custody_account)
                    .await?
                    .is_zero()
                {
                    tracing::debug!(wager = %wager.id, "payout lost to a concurrent drain");
                    return Ok(Payout::AlreadySettled);
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(wager = %wager.id, %recipient, %pot, txid, "pot paid out");
        Ok(Payout::Paid { amount: pot, txid })
    }

    /// Return the creator's stake. Only meaningful while the wager is
    /// still open; an active or settled wager cannot be refunded.
    pub async fn refund(&self, wager: &Wager) -> Result<TxId> {
        if wager.status != WagerStatus::Open {
            return Err(EngineError::InvalidTransition {
                action: "refund",
                status: wager.status,
            });
        }

        let balance = self.custodian.balance(&wager.custody_account).await?;
        if balance.is_zero() {
            return Err(EngineError::AlreadySettled(wager.id));
        }

        // Exactly the stake goes back, never whatever else happens to
        // sit in the account mid-race.
        let txid = self
            .custodian
            .transfer(&wager.custody_account, &wager.creator.account, wager.stake)
            .await?;

        tracing::info!(wager = %wager.id, stake = %wager.stake, txid, "stake refunded to creator");
        Ok(txid)
    }
}
