//! Settlement coordinator: the one component allowed to move a wager
//! between lifecycle states.
//!
//! Every state change is a read-modify-conditional-write against the
//! ledger store; the store's version check is the only serialization
//! point, so no in-process lock is ever held across a custodian call.
//! Settlement itself is split into three durable steps:
//!
//!   1. claim  - conditional write of `winner` while still `Active`;
//!               exactly one racing caller wins this write
//!   2. payout - custodian transfer, idempotent by custody balance
//!   3. record - conditional write `Active -> Settled`, pot zeroed
//!
//! A crash between any two steps is recoverable: re-running settlement
//! re-reads the claim, re-runs the payout as a no-op if it already
//! landed, and re-attempts the record.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::escrow::{EscrowManager, Payout};
use crate::events::WagerEvent;
use crate::machine;
use crate::rules::{self, Outcome};
use crate::timer::ForfeitTimers;
use chrono::Utc;
use showdown_core::{
    AccountRef, Amount, Choice, CoreError, FundsCustodian, Participant, Side, Storage,
    StoredWager, Wager, WagerId, WagerStatus, WagerStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One row of the win standings read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingsEntry {
    pub name: String,
    pub wins: u64,
    pub winnings: Amount,
}

#[derive(Clone)]
pub struct SettlementCoordinator {
    storage: Arc<Storage>,
    escrow: Arc<EscrowManager>,
    timers: ForfeitTimers,
    events: broadcast::Sender<WagerEvent>,
    config: EngineConfig,
}

impl SettlementCoordinator {
    pub fn new(
        storage: Arc<Storage>,
        custodian: Arc<dyn FundsCustodian>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            escrow: Arc::new(EscrowManager::new(custodian)),
            timers: ForfeitTimers::new(),
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WagerEvent> {
        self.events.subscribe()
    }

    pub fn escrow(&self) -> &EscrowManager {
        &self.escrow
    }

    fn store(&self) -> WagerStore<'_> {
        WagerStore::new(&self.storage)
    }

    fn emit(&self, event: WagerEvent) {
        let _ = self.events.send(event);
    }

    pub async fn get(&self, id: WagerId) -> Result<Wager> {
        Ok(self.store().get(id).await?.wager)
    }

    pub async fn list_open(&self) -> Result<Vec<Wager>> {
        Ok(self.store().list_open().await?)
    }

    /// Per-player win standings aggregated from settled wagers.
    /// Ordered by wins, then total pot collected, then name.
    pub async fn standings(&self) -> Result<Vec<StandingsEntry>> {
        let settled = self.store().list_settled().await?;
        let mut tally: HashMap<String, StandingsEntry> = HashMap::new();

        for wager in &settled {
            let Some(side) = wager.winner else { continue };
            let Some(winner) = wager.participant(side) else { continue };

            let pot = wager
                .stake
                .checked_mul(2)
                .ok_or(CoreError::AmountOverflow)?;
            let entry = tally
                .entry(winner.name.clone())
                .or_insert_with(|| StandingsEntry {
                    name: winner.name.clone(),
                    wins: 0,
                    winnings: Amount::ZERO,
                });
            entry.wins += 1;
            entry.winnings = entry
                .winnings
                .checked_add(pot)
                .ok_or(CoreError::AmountOverflow)?;
        }

        let mut standings: Vec<StandingsEntry> = tally.into_values().collect();
        standings.sort_by(|a, b| {
            b.wins
                .cmp(&a.wins)
                .then(b.winnings.cmp(&a.winnings))
                .then(a.name.cmp(&b.name))
        });
        Ok(standings)
    }

    /// Fund a new wager and list it as open.
    pub async fn create(
        &self,
        creator: &str,
        creator_account: &AccountRef,
        stake: Amount,
    ) -> Result<Wager> {
        if stake.is_zero() {
            return Err(EngineError::InvalidStake);
        }

        let (custody, _txid) = self.escrow.fund(creator_account, stake).await?;
        let wager = Wager::new(
            Participant::new(creator, creator_account.clone()),
            stake,
            custody,
        );
        self.store().insert(&wager).await?;

        tracing::info!(wager = %wager.id, creator, %stake, "wager created");
        self.emit(WagerEvent::Created { id: wager.id });
        Ok(wager)
    }

    /// Creator-initiated deletion of a still-open wager; refunds the
    /// stake. The conditional write to `Cancelled` serializes against a
    /// concurrent join, so only one of the two can win.
    pub async fn cancel(&self, id: WagerId, by: &str) -> Result<()> {
        let stored = self.store().get(id).await?;
        let open_wager = stored.wager.clone();

        if open_wager.creator.name != by {
            return Err(EngineError::NotParticipant(by.to_string()));
        }

        let mut wager = stored.wager;
        machine::apply_cancel(&mut wager)?;
        match self.store().update_if_version(id, stored.version, &wager).await {
            Ok(_) => {}
            Err(CoreError::VersionConflict { .. }) => return Err(EngineError::Conflict(id)),
            Err(e) => return Err(e.into()),
        }

        // Record is cancelled; now return the money. A transient
        // transfer failure is retried before surfacing.
        let mut attempts = 0;
        loop {
            match self.escrow.refund(&open_wager).await {
                Ok(_) => break,
                Err(e) if e.is_retryable() && attempts < self.config.settle_retries => {
                    attempts += 1;
                    tracing::warn!(wager = %id, attempts, "refund failed, retrying: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(wager = %id, "wager cancelled and refunded");
        self.emit(WagerEvent::Cancelled { id });
        Ok(())
    }

    /// Challenger takes the open seat with a matching stake. On a lost
    /// join race the already-transferred stake is sent back.
    pub async fn join(
        &self,
        id: WagerId,
        challenger: &str,
        challenger_account: &AccountRef,
        amount: Amount,
    ) -> Result<Wager> {
        let stored = self.store().get(id).await?;
        let wager = &stored.wager;

        if wager.status != WagerStatus::Open {
            return Err(EngineError::InvalidTransition {
                action: "join",
                status: wager.status,
            });
        }
        if wager.creator.name == challenger {
            return Err(EngineError::SelfJoin);
        }
        if let Some(invited) = &wager.invited {
            if invited != challenger {
                return Err(EngineError::NotParticipant(challenger.to_string()));
            }
        }

        // Stake is matched and escrowed before the record flips; the
        // conditional write below decides whether this join counts.
        self.escrow.join(wager, challenger_account, amount).await?;

        let mut updated = stored.wager.clone();
        machine::apply_join(
            &mut updated,
            Participant::new(challenger, challenger_account.clone()),
            Utc::now() + self.config.choice_deadline,
        )?;

        match self
            .store()
            .update_if_version(id, stored.version, &updated)
            .await
        {
            Ok(_) => {}
            Err(CoreError::VersionConflict { .. }) => {
                // Someone else joined or the creator cancelled first.
                // Undo our escrow transfer and report the lost race.
                if let Err(e) = self
                    .escrow
                    .custodian()
                    .transfer(&updated.custody_account, challenger_account, amount)
                    .await
                {
                    tracing::error!(wager = %id, "failed to return stake after lost join race: {e}");
                }
                return Err(EngineError::Conflict(id));
            }
            Err(e) => return Err(e.into()),
        }

        self.arm_timer(&updated);
        tracing::info!(wager = %id, challenger, "challenger joined, wager active");
        self.emit(WagerEvent::Joined {
            id,
            challenger: challenger.to_string(),
        });
        Ok(updated)
    }

    /// Commit one player's choice for the current round. Write-once;
    /// a lost version race is retried exactly once before surfacing
    /// `Conflict` (two tabs of the same player racing themselves).
    ///
    /// Returns the wager as of after the submission, including any
    /// settlement or round reset it triggered.
    pub async fn submit_choice(&self, id: WagerId, player: &str, choice: Choice) -> Result<Wager> {
        let mut side = None;
        for attempt in 0..2 {
            let stored = self.store().get(id).await?;
            let seat = stored
                .wager
                .side_of(player)
                .ok_or_else(|| EngineError::NotParticipant(player.to_string()))?;

            let mut wager = stored.wager.clone();
            machine::apply_choice(&mut wager, seat, choice)?;

            match self
                .store()
                .update_if_version(id, stored.version, &wager)
                .await
            {
                Ok(_) => {
                    side = Some(seat);
                    break;
                }
                Err(CoreError::VersionConflict { .. }) if attempt == 0 => continue,
                Err(CoreError::VersionConflict { .. }) => return Err(EngineError::Conflict(id)),
                Err(e) => return Err(e.into()),
            }
        }

        let side = side.ok_or(EngineError::Conflict(id))?;
        tracing::info!(wager = %id, player, %choice, %side, "choice committed");
        self.emit(WagerEvent::ChoiceSubmitted { id, side });

        // Re-read: if the opponent's choice is in, this submission is
        // the one that completes the round.
        let current = self.store().get(id).await?;
        if current.wager.status == WagerStatus::Active && current.wager.both_choices_made() {
            // Both choices observed: a pending forfeit fire would be
            // stale from here on.
            self.timers.cancel(id);
            return self.resolve_round(current).await;
        }

        Ok(current.wager)
    }

    /// Both choices are in: resolve and either settle or reset on tie.
    async fn resolve_round(&self, stored: StoredWager) -> Result<Wager> {
        let wager = &stored.wager;
        let (a, b) = match (wager.creator_choice, wager.challenger_choice) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(EngineError::internal("resolving round without both choices")),
        };

        match rules::resolve(a, b) {
            Outcome::Tie => {
                tracing::info!(wager = %wager.id, "round tied, resetting");
                self.reset_round(stored).await
            }
            Outcome::Win(_) => self.settle(wager.id).await,
        }
    }

    /// `Active → Active`: clear both choices in one write and re-arm
    /// the deadline. A lost race means someone else already moved the
    /// round on; their result stands.
    async fn reset_round(&self, stored: StoredWager) -> Result<Wager> {
        let id = stored.wager.id;
        let mut wager = stored.wager;
        machine::apply_reset(&mut wager, Utc::now() + self.config.choice_deadline)?;

        match self
            .store()
            .update_if_version(id, stored.version, &wager)
            .await
        {
            Ok(_) => {
                self.arm_timer(&wager);
                self.emit(WagerEvent::Reset { id });
                Ok(wager)
            }
            Err(CoreError::VersionConflict { .. }) => Ok(self.store().get(id).await?.wager),
            Err(e) => Err(e.into()),
        }
    }

    /// Drive settlement to completion. Safe to call from any path at
    /// any time: the claim write picks exactly one winner record, the
    /// payout is idempotent, and the final record write is conditional.
    /// Callers that lose any of the races simply observe the recorded
    /// outcome.
    pub async fn settle(&self, id: WagerId) -> Result<Wager> {
        let mut attempts = 0;
        loop {
            let stored = self.store().get(id).await?;
            let wager = &stored.wager;

            match wager.status {
                WagerStatus::Settled | WagerStatus::Cancelled => return Ok(stored.wager),
                WagerStatus::Open => return Err(EngineError::WagerNotActive(id)),
                WagerStatus::Active => {}
            }

            let (winner, by_forfeit) = match wager.winner {
                // A previous attempt (possibly a crashed process)
                // already claimed; finish its settlement.
                Some(side) => (side, !wager.both_choices_made()),
                None => match self.determine_winner(wager) {
                    Some(pair) => pair,
                    None => {
                        // A persisted tie reaches here when the process
                        // died between the second choice landing and
                        // the round reset; drive the reset now or the
                        // round stays frozen forever.
                        if wager.both_choices_made() {
                            return self.reset_round(stored).await;
                        }
                        // Otherwise nothing to settle: round was reset
                        // or is still waiting on choices.
                        return Ok(stored.wager);
                    }
                },
            };

            let version = if wager.winner.is_none() {
                let mut claimed = stored.wager.clone();
                machine::claim_winner(&mut claimed, winner)?;
                match self
                    .store()
                    .update_if_version(id, stored.version, &claimed)
                    .await
                {
                    Ok(v) => v,
                    Err(CoreError::VersionConflict { .. }) => {
                        // Another settler claimed first; loop to
                        // observe and finish their claim.
                        attempts += 1;
                        if attempts > self.config.settle_retries {
                            return Err(EngineError::Conflict(id));
                        }
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                stored.version
            };

            let recipient = wager
                .participant(winner)
                .ok_or_else(|| EngineError::internal("winner seat is empty"))?
                .account
                .clone();

            // Payout: at-least-one attempt, exactly-once transfer.
            let pot = wager.pot;
            let paid = loop {
                match self.escrow.payout(wager, &recipient).await {
                    Ok(Payout::Paid { amount, .. }) => break amount,
                    Ok(Payout::AlreadySettled) => break pot,
                    Err(e) if e.is_retryable() && attempts < self.config.settle_retries => {
                        attempts += 1;
                        tracing::warn!(wager = %id, attempts, "payout failed, retrying: {e}");
                    }
                    // Surfacing leaves the wager Active with the claim
                    // recorded; a later settle call resumes from here.
                    Err(e) => return Err(e),
                }
            };

            // Record only after the transfer is confirmed.
            let mut settled = stored.wager.clone();
            settled.winner = Some(winner);
            machine::apply_settled(&mut settled)?;
            match self.store().update_if_version(id, version, &settled).await {
                Ok(_) => {
                    self.timers.cancel(id);
                    tracing::info!(wager = %id, %winner, %paid, by_forfeit, "wager settled");
                    self.emit(WagerEvent::Settled {
                        id,
                        winner,
                        amount: paid,
                        by_forfeit,
                    });
                    return Ok(settled);
                }
                Err(CoreError::VersionConflict { .. }) => {
                    // A racing settler recorded first; next read
                    // observes Settled and reports their result.
                    attempts += 1;
                    if attempts > self.config.settle_retries {
                        return Err(EngineError::Conflict(id));
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// What the current record justifies settling, if anything.
    fn determine_winner(&self, wager: &Wager) -> Option<(Side, bool)> {
        if let (Some(a), Some(b)) = (wager.creator_choice, wager.challenger_choice) {
            return match rules::resolve(a, b) {
                Outcome::Win(side) => Some((side, false)),
                // Ties never settle; they loop back to a round reset.
                Outcome::Tie => None,
            };
        }

        // Forfeit is justified only once the persisted deadline is
        // actually behind us and exactly one seat committed.
        let deadline = wager.choice_deadline?;
        if Utc::now() < deadline {
            return None;
        }
        match wager.committed_sides().as_slice() {
            [side] => Some((*side, true)),
            _ => None,
        }
    }

    /// Forfeit timer expiry. The snapshot the timer carried is ignored;
    /// everything is revalidated against the store so that stale fires
    /// (settled wager, re-armed deadline, completed round) are dropped.
    pub async fn handle_timeout(&self, id: WagerId) -> Result<()> {
        let stored = self.store().get(id).await?;
        let wager = &stored.wager;

        if wager.status != WagerStatus::Active {
            tracing::debug!(wager = %id, status = %wager.status, "stale timer fire discarded");
            return Ok(());
        }

        match wager.choice_deadline {
            Some(deadline) if Utc::now() >= deadline => {}
            Some(_) => {
                // Deadline was re-armed under us; follow the new one.
                self.arm_timer(wager);
                return Ok(());
            }
            None => {
                tracing::debug!(wager = %id, "timer fired without a deadline, discarded");
                return Ok(());
            }
        }

        match wager.committed_sides().len() {
            // Nobody acted: restart the round rather than settling, so
            // inaction on both sides is never rewarded.
            0 if wager.winner.is_none() => {
                tracing::info!(wager = %id, "deadline passed with no choices, round restarts");
                self.reset_round(stored).await?;
                Ok(())
            }
            // One absentee forfeits; a stalled round (persisted tie,
            // or a claimed but unrecorded winner) is driven onward.
            _ => {
                self.settle(id).await?;
                Ok(())
            }
        }
    }

    /// Spawn a brand-new wager between the same two players. Funded by
    /// the initiating player; the opponent's seat is reserved and must
    /// be re-funded through a normal join. The old custody account is
    /// never reused.
    pub async fn rematch(&self, id: WagerId, by: &str) -> Result<Wager> {
        let stored = self.store().get(id).await?;
        let old = &stored.wager;

        if old.status != WagerStatus::Settled {
            return Err(EngineError::InvalidTransition {
                action: "rematch",
                status: old.status,
            });
        }
        let side = old
            .side_of(by)
            .ok_or_else(|| EngineError::NotParticipant(by.to_string()))?;
        let initiator = old
            .participant(side)
            .ok_or_else(|| EngineError::internal("initiator seat is empty"))?
            .clone();
        let opponent = old
            .participant(side.other())
            .ok_or_else(|| EngineError::internal("opponent seat is empty"))?
            .clone();

        let (custody, _txid) = self.escrow.fund(&initiator.account, old.stake).await?;
        let mut wager = Wager::new(initiator, old.stake, custody);
        wager.rematch_of = Some(id);
        wager.invited = Some(opponent.name.clone());
        self.store().insert(&wager).await?;

        tracing::info!(old = %id, new = %wager.id, "rematch created");
        self.emit(WagerEvent::Created { id: wager.id });
        Ok(wager)
    }

    /// Re-arm forfeit timers for every active wager from persisted
    /// deadlines. Call once after process start; deadlines already in
    /// the past fire immediately.
    pub async fn resume(&self) -> Result<usize> {
        let active = self.store().list_active().await?;
        for wager in &active {
            self.arm_timer(wager);
        }
        tracing::info!(count = active.len(), "forfeit timers resumed");
        Ok(active.len())
    }

    fn arm_timer(&self, wager: &Wager) {
        let Some(deadline) = wager.choice_deadline else {
            return;
        };
        let this = self.clone();
        let id = wager.id;
        self.timers.arm(id, deadline, async move {
            if let Err(e) = this.handle_timeout(id).await {
                tracing::error!(wager = %id, "timeout handling failed: {e}");
            }
        });
    }
}
