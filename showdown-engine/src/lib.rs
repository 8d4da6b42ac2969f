//! Showdown settlement engine.
//!
//! Two-party, winner-take-all rock/paper/scissors wagers with the
//! stakes escrowed in a neutral custody account. The engine owns the
//! bet lifecycle (`Open -> Active -> Settled`, `Cancelled` from open),
//! the forfeit deadline, and the exactly-once settlement of the pot.
//! Rendering, identity and the custody ledger itself live elsewhere;
//! this crate is invoked in-process by whatever layer owns transport.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod escrow;
pub mod events;
pub mod machine;
pub mod rules;
pub mod timer;

pub use config::EngineConfig;
pub use coordinator::{SettlementCoordinator, StandingsEntry};
pub use error::{EngineError, Result};
pub use escrow::{EscrowManager, Payout};
pub use events::WagerEvent;
pub use rules::{resolve, Outcome};
pub use timer::ForfeitTimers;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use showdown_core::{
        Amount, Choice, LocalCustodian, Participant, Side, Storage, Wager, WagerStatus, WagerStore,
    };
    use std::sync::Arc;

    const STAKE: u64 = 1_000;
    const BANKROLL: u64 = 10_000;

    struct Harness {
        storage: Arc<Storage>,
        custodian: Arc<LocalCustodian>,
        coordinator: SettlementCoordinator,
        alice: showdown_core::AccountRef,
        bob: showdown_core::AccountRef,
    }

    async fn harness(deadline: Duration) -> Harness {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let custodian = Arc::new(LocalCustodian::new());
        let coordinator = SettlementCoordinator::new(
            storage.clone(),
            custodian.clone(),
            EngineConfig::default().with_deadline(deadline),
        );
        let alice = custodian.open_account(Amount::from_units(BANKROLL));
        let bob = custodian.open_account(Amount::from_units(BANKROLL));
        Harness {
            storage,
            custodian,
            coordinator,
            alice,
            bob,
        }
    }

    async fn active_wager(h: &Harness) -> Wager {
        let wager = h
            .coordinator
            .create("alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();
        h.coordinator
            .join(wager.id, "bob", &h.bob, Amount::from_units(STAKE))
            .await
            .unwrap()
    }

    async fn balance(h: &Harness, account: &showdown_core::AccountRef) -> u64 {
        use showdown_core::FundsCustodian;
        h.custodian.balance(account).await.unwrap().to_units()
    }

    #[tokio::test]
    async fn happy_path_rock_beats_scissors() {
        let h = harness(Duration::seconds(60)).await;

        let wager = h
            .coordinator
            .create("alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();
        assert_eq!(wager.status, WagerStatus::Open);
        assert_eq!(wager.pot, Amount::from_units(STAKE));

        let wager = h
            .coordinator
            .join(wager.id, "bob", &h.bob, Amount::from_units(STAKE))
            .await
            .unwrap();
        assert_eq!(wager.status, WagerStatus::Active);
        assert_eq!(wager.pot, Amount::from_units(2 * STAKE));
        assert!(wager.choice_deadline.is_some());

        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Rock)
            .await
            .unwrap();
        let settled = h
            .coordinator
            .submit_choice(wager.id, "bob", Choice::Scissors)
            .await
            .unwrap();

        assert_eq!(settled.status, WagerStatus::Settled);
        assert_eq!(settled.winner, Some(Side::Creator));
        assert_eq!(settled.pot, Amount::ZERO);
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
        assert_eq!(balance(&h, &h.bob).await, BANKROLL - STAKE);

        // Driving settlement again must not pay twice.
        let again = h.coordinator.settle(settled.id).await.unwrap();
        assert_eq!(again.winner, Some(Side::Creator));
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
        assert_eq!(balance(&h, &settled.custody_account).await, 0);
    }

    #[tokio::test]
    async fn mismatched_stake_cannot_join() {
        let h = harness(Duration::seconds(60)).await;
        let wager = h
            .coordinator
            .create("alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();

        let err = h
            .coordinator
            .join(wager.id, "bob", &h.bob, Amount::from_units(STAKE + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StakeMismatch { .. }));

        // Pot and status untouched by the failed join.
        let current = h.coordinator.get(wager.id).await.unwrap();
        assert_eq!(current.status, WagerStatus::Open);
        assert_eq!(current.pot, Amount::from_units(STAKE));
        assert_eq!(balance(&h, &wager.custody_account).await, STAKE);
        assert_eq!(balance(&h, &h.bob).await, BANKROLL);
    }

    #[tokio::test]
    async fn tie_resets_the_round_without_payout() {
        let h = harness(Duration::seconds(60)).await;
        let wager = active_wager(&h).await;
        let first_deadline = wager.choice_deadline.unwrap();

        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Rock)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let after = h
            .coordinator
            .submit_choice(wager.id, "bob", Choice::Rock)
            .await
            .unwrap();

        assert_eq!(after.status, WagerStatus::Active);
        assert_eq!(after.creator_choice, None);
        assert_eq!(after.challenger_choice, None);
        assert_eq!(after.winner, None);
        assert!(after.choice_deadline.unwrap() > first_deadline);

        // No money moved.
        assert_eq!(balance(&h, &wager.custody_account).await, 2 * STAKE);
        assert_eq!(balance(&h, &h.alice).await, BANKROLL - STAKE);
        assert_eq!(balance(&h, &h.bob).await, BANKROLL - STAKE);
    }

    #[tokio::test]
    async fn lone_committed_choice_wins_by_forfeit() {
        let h = harness(Duration::milliseconds(100)).await;
        let wager = active_wager(&h).await;

        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Paper)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let settled = h.coordinator.get(wager.id).await.unwrap();
        assert_eq!(settled.status, WagerStatus::Settled);
        assert_eq!(settled.winner, Some(Side::Creator));
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
        assert_eq!(balance(&h, &h.bob).await, BANKROLL - STAKE);
    }

    #[tokio::test]
    async fn silent_round_restarts_instead_of_settling() {
        let h = harness(Duration::milliseconds(100)).await;
        let wager = active_wager(&h).await;
        let first_deadline = wager.choice_deadline.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let current = h.coordinator.get(wager.id).await.unwrap();
        assert_eq!(current.status, WagerStatus::Active);
        assert_eq!(current.winner, None);
        assert!(current.choice_deadline.unwrap() > first_deadline);
        assert_eq!(balance(&h, &wager.custody_account).await, 2 * STAKE);
    }

    #[tokio::test]
    async fn stale_timer_fire_after_settlement_is_discarded() {
        let h = harness(Duration::seconds(60)).await;
        let wager = active_wager(&h).await;

        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Scissors)
            .await
            .unwrap();
        h.coordinator
            .submit_choice(wager.id, "bob", Choice::Paper)
            .await
            .unwrap();

        // Simulate a timer that fired anyway after settlement.
        h.coordinator.handle_timeout(wager.id).await.unwrap();

        let current = h.coordinator.get(wager.id).await.unwrap();
        assert_eq!(current.status, WagerStatus::Settled);
        assert_eq!(current.winner, Some(Side::Creator));
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
    }

    #[tokio::test]
    async fn racing_settlement_paths_pay_exactly_once() {
        let h = harness(Duration::seconds(60)).await;
        let wager = active_wager(&h).await;

        // Commit both choices through raw store writes so neither
        // submission drives settlement; then race the settlers.
        {
            let store = WagerStore::new(&h.storage);
            let stored = store.get(wager.id).await.unwrap();
            let mut w = stored.wager.clone();
            w.creator_choice = Some(Choice::Rock);
            w.challenger_choice = Some(Choice::Scissors);
            store
                .update_if_version(wager.id, stored.version, &w)
                .await
                .unwrap();
        }

        let (a, b, c) = tokio::join!(
            h.coordinator.settle(wager.id),
            h.coordinator.settle(wager.id),
            h.coordinator.settle(wager.id),
        );

        for result in [a, b, c] {
            let settled = result.unwrap();
            assert_eq!(settled.status, WagerStatus::Settled);
            assert_eq!(settled.winner, Some(Side::Creator));
        }

        // One winner recorded, one payout.
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
        assert_eq!(balance(&h, &h.bob).await, BANKROLL - STAKE);
        assert_eq!(balance(&h, &wager.custody_account).await, 0);
    }

    #[tokio::test]
    async fn choice_submission_guards() {
        let h = harness(Duration::seconds(60)).await;

        let open = h
            .coordinator
            .create("alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();
        let err = h
            .coordinator
            .submit_choice(open.id, "alice", Choice::Rock)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WagerNotActive(_)));

        let wager = active_wager(&h).await;
        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Rock)
            .await
            .unwrap();

        let err = h
            .coordinator
            .submit_choice(wager.id, "alice", Choice::Paper)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ChoiceAlreadyMade(Side::Creator)));

        let err = h
            .coordinator
            .submit_choice(wager.id, "mallory", Choice::Rock)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotParticipant(_)));
    }

    #[tokio::test]
    async fn cancel_refunds_only_open_wagers() {
        let h = harness(Duration::seconds(60)).await;

        let open = h
            .coordinator
            .create("alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();

        let err = h.coordinator.cancel(open.id, "bob").await.unwrap_err();
        assert!(matches!(err, EngineError::NotParticipant(_)));

        h.coordinator.cancel(open.id, "alice").await.unwrap();
        let cancelled = h.coordinator.get(open.id).await.unwrap();
        assert_eq!(cancelled.status, WagerStatus::Cancelled);
        assert_eq!(balance(&h, &h.alice).await, BANKROLL);

        // Active wagers cannot be deleted.
        let active = active_wager(&h).await;
        let err = h.coordinator.cancel(active.id, "alice").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn rematch_reserves_the_opponent_seat() {
        let h = harness(Duration::seconds(60)).await;
        let wager = active_wager(&h).await;

        let err = h.coordinator.rematch(wager.id, "alice").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Rock)
            .await
            .unwrap();
        h.coordinator
            .submit_choice(wager.id, "bob", Choice::Scissors)
            .await
            .unwrap();

        let rematch = h.coordinator.rematch(wager.id, "bob").await.unwrap();
        assert_eq!(rematch.status, WagerStatus::Open);
        assert_eq!(rematch.creator.name, "bob");
        assert_eq!(rematch.invited.as_deref(), Some("alice"));
        assert_eq!(rematch.rematch_of, Some(wager.id));
        assert_ne!(rematch.custody_account, wager.custody_account);
        assert_eq!(rematch.stake, wager.stake);

        // Only the invited opponent can take the seat.
        let carol = h.custodian.open_account(Amount::from_units(BANKROLL));
        let err = h
            .coordinator
            .join(rematch.id, "carol", &carol, Amount::from_units(STAKE))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotParticipant(_)));

        let joined = h
            .coordinator
            .join(rematch.id, "alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();
        assert_eq!(joined.status, WagerStatus::Active);
        assert_eq!(joined.pot, Amount::from_units(2 * STAKE));
    }

    #[tokio::test]
    async fn transient_transfer_failure_is_retried() {
        let h = harness(Duration::seconds(60)).await;
        let wager = active_wager(&h).await;

        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Rock)
            .await
            .unwrap();

        // The payout transfer fails once, then succeeds on retry.
        h.custodian.fail_next(1);
        let settled = h
            .coordinator
            .submit_choice(wager.id, "bob", Choice::Scissors)
            .await
            .unwrap();

        assert_eq!(settled.status, WagerStatus::Settled);
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
    }

    #[tokio::test]
    async fn resume_rearms_timers_from_persisted_deadlines() {
        let h = harness(Duration::seconds(60)).await;

        // Build an active wager whose deadline already passed, as left
        // behind by a process that died before its timer fired.
        use showdown_core::FundsCustodian;
        let custody = h.custodian.create_account().await.unwrap();
        h.custodian
            .transfer(&h.alice, &custody, Amount::from_units(STAKE))
            .await
            .unwrap();
        h.custodian
            .transfer(&h.bob, &custody, Amount::from_units(STAKE))
            .await
            .unwrap();

        let mut wager = Wager::new(
            Participant::new("alice", h.alice.clone()),
            Amount::from_units(STAKE),
            custody,
        );
        wager.challenger = Some(Participant::new("bob", h.bob.clone()));
        wager.pot = Amount::from_units(2 * STAKE);
        wager.status = WagerStatus::Active;
        wager.creator_choice = Some(Choice::Rock);
        wager.choice_deadline = Some(Utc::now() - Duration::seconds(5));
        WagerStore::new(&h.storage).insert(&wager).await.unwrap();

        let resumed = h.coordinator.resume().await.unwrap();
        assert_eq!(resumed, 1);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let settled = h.coordinator.get(wager.id).await.unwrap();
        assert_eq!(settled.status, WagerStatus::Settled);
        assert_eq!(settled.winner, Some(Side::Creator));
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
    }

    #[tokio::test]
    async fn standings_tally_wins_across_settled_wagers() {
        let h = harness(Duration::seconds(60)).await;

        // Alice takes the first wager.
        let first = active_wager(&h).await;
        h.coordinator
            .submit_choice(first.id, "alice", Choice::Rock)
            .await
            .unwrap();
        h.coordinator
            .submit_choice(first.id, "bob", Choice::Scissors)
            .await
            .unwrap();

        // And the rematch.
        let rematch = h.coordinator.rematch(first.id, "alice").await.unwrap();
        h.coordinator
            .join(rematch.id, "bob", &h.bob, Amount::from_units(STAKE))
            .await
            .unwrap();
        h.coordinator
            .submit_choice(rematch.id, "alice", Choice::Paper)
            .await
            .unwrap();
        h.coordinator
            .submit_choice(rematch.id, "bob", Choice::Rock)
            .await
            .unwrap();

        // Bob wins one of his own.
        let third = h
            .coordinator
            .create("bob", &h.bob, Amount::from_units(STAKE))
            .await
            .unwrap();
        h.coordinator
            .join(third.id, "alice", &h.alice, Amount::from_units(STAKE))
            .await
            .unwrap();
        h.coordinator
            .submit_choice(third.id, "bob", Choice::Rock)
            .await
            .unwrap();
        h.coordinator
            .submit_choice(third.id, "alice", Choice::Scissors)
            .await
            .unwrap();

        // An open wager contributes nothing to the tally.
        h.coordinator
            .create("bob", &h.bob, Amount::from_units(STAKE))
            .await
            .unwrap();

        let standings = h.coordinator.standings().await.unwrap();
        assert_eq!(standings.len(), 2);
        assert_eq!(standings[0].name, "alice");
        assert_eq!(standings[0].wins, 2);
        assert_eq!(standings[0].winnings, Amount::from_units(4 * STAKE));
        assert_eq!(standings[1].name, "bob");
        assert_eq!(standings[1].wins, 1);
        assert_eq!(standings[1].winnings, Amount::from_units(2 * STAKE));
    }

    #[tokio::test]
    async fn resume_unfreezes_a_persisted_tie() {
        let h = harness(Duration::seconds(60)).await;

        // Both choices landed but the process died before the tie
        // could reset the round; only the persisted record survives.
        use showdown_core::FundsCustodian;
        let custody = h.custodian.create_account().await.unwrap();
        h.custodian
            .transfer(&h.alice, &custody, Amount::from_units(STAKE))
            .await
            .unwrap();
        h.custodian
            .transfer(&h.bob, &custody, Amount::from_units(STAKE))
            .await
            .unwrap();

        let mut wager = Wager::new(
            Participant::new("alice", h.alice.clone()),
            Amount::from_units(STAKE),
            custody,
        );
        wager.challenger = Some(Participant::new("bob", h.bob.clone()));
        wager.pot = Amount::from_units(2 * STAKE);
        wager.status = WagerStatus::Active;
        wager.creator_choice = Some(Choice::Rock);
        wager.challenger_choice = Some(Choice::Rock);
        wager.choice_deadline = Some(Utc::now() - Duration::seconds(5));
        WagerStore::new(&h.storage).insert(&wager).await.unwrap();

        assert_eq!(h.coordinator.resume().await.unwrap(), 1);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        // Round restarted: choices cleared, fresh deadline, pot intact.
        let current = h.coordinator.get(wager.id).await.unwrap();
        assert_eq!(current.status, WagerStatus::Active);
        assert_eq!(current.creator_choice, None);
        assert_eq!(current.challenger_choice, None);
        assert!(current.choice_deadline.unwrap() > Utc::now());
        assert_eq!(balance(&h, &wager.custody_account).await, 2 * STAKE);

        // And the fresh round plays through to settlement.
        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Paper)
            .await
            .unwrap();
        let settled = h
            .coordinator
            .submit_choice(wager.id, "bob", Choice::Rock)
            .await
            .unwrap();
        assert_eq!(settled.status, WagerStatus::Settled);
        assert_eq!(settled.winner, Some(Side::Creator));
        assert_eq!(balance(&h, &h.alice).await, BANKROLL + STAKE);
    }

    #[tokio::test]
    async fn events_follow_the_lifecycle() {
        let h = harness(Duration::seconds(60)).await;
        let mut events = h.coordinator.subscribe();

        let wager = active_wager(&h).await;
        h.coordinator
            .submit_choice(wager.id, "alice", Choice::Rock)
            .await
            .unwrap();
        h.coordinator
            .submit_choice(wager.id, "bob", Choice::Scissors)
            .await
            .unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            WagerEvent::Created { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            WagerEvent::Joined { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            WagerEvent::ChoiceSubmitted {
                side: Side::Creator,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            WagerEvent::ChoiceSubmitted {
                side: Side::Challenger,
                ..
            }
        ));
        match events.recv().await.unwrap() {
            WagerEvent::Settled {
                winner,
                amount,
                by_forfeit,
                ..
            } => {
                assert_eq!(winner, Side::Creator);
                assert_eq!(amount, Amount::from_units(2 * STAKE));
                assert!(!by_forfeit);
            }
            other => panic!("expected Settled, got {:?}", other),
        }
    }
}
