//! End-to-end scenarios driving the full service in-process:
//! targeting invariants, proposal resolution, auction closing, settlement
//! hand-off, and the concurrency guarantees under parallel load.

use swapmatch::audit::ConsistencyValidator;
use swapmatch::error::CoreError;
use swapmatch::external::{LogNotifier, NullLedger, PermissiveCatalog};
use swapmatch::model::{
    AcceptanceStrategy, CashRange, PaymentType, ProposalSpec, ProposalStatus, SettlementStatus,
    Swap, SwapStatus,
};
use swapmatch::resolver::{CloseOutcome, ProposalResolver};
use swapmatch::retry::RetryPolicy;
use swapmatch::settlement::SettlementCoordinator;
use swapmatch::store::{MemoryStore, SwapStore, WriteBatch};
use swapmatch::sweep::AuctionSweeper;
use swapmatch::targeting::{HistoryLog, TargetingCoordinator};

use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    targeting: TargetingCoordinator,
    resolver: Arc<ProposalResolver>,
    settlement: SettlementCoordinator,
    validator: ConsistencyValidator,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LogNotifier);
    let ledger = Arc::new(NullLedger);
    let retry = RetryPolicy::default();
    let targeting = TargetingCoordinator::new(
        store.clone(),
        Arc::new(HistoryLog::new(25)),
        ledger.clone(),
        notifier.clone(),
        retry.clone(),
    );
    let resolver = Arc::new(ProposalResolver::new(
        store.clone(),
        Arc::new(PermissiveCatalog),
        ledger,
        notifier.clone(),
        retry.clone(),
    ));
    let settlement = SettlementCoordinator::new(store.clone(), notifier, retry);
    let validator = ConsistencyValidator::new(store.clone());
    Harness {
        store,
        targeting,
        resolver,
        settlement,
        validator,
    }
}

fn usd(min: i64, max: i64) -> CashRange {
    CashRange {
        min_cents: min,
        max_cents: max,
        currency: "USD".into(),
    }
}

async fn register_first_match(h: &Harness, owner: Uuid) -> Swap {
    let swap = Swap::new(
        owner,
        AcceptanceStrategy::FirstMatch,
        None,
        vec![PaymentType::Booking, PaymentType::Cash],
        Some(usd(10_000, 50_000)),
        Utc::now(),
    )
    .unwrap();
    h.store.insert_swap(swap.clone()).await.unwrap();
    swap
}

async fn register_auction(h: &Harness, owner: Uuid, ends_in_secs: i64) -> Swap {
    let swap = Swap::new(
        owner,
        AcceptanceStrategy::Auction,
        Some(Utc::now() + Duration::seconds(ends_in_secs)),
        vec![PaymentType::Booking, PaymentType::Cash],
        Some(usd(10_000, 50_000)),
        Utc::now(),
    )
    .unwrap();
    h.store.insert_swap(swap.clone()).await.unwrap();
    swap
}

fn cash(amount: i64) -> ProposalSpec {
    ProposalSpec {
        payment_type: PaymentType::Cash,
        cash_amount_cents: Some(amount),
        booking_ref: None,
        counter_swap_id: None,
    }
}

async fn force_auction_end(store: &MemoryStore, swap_id: Uuid) {
    let swap = store.get_swap(swap_id).await.unwrap().unwrap();
    let mut ended = swap.clone();
    ended.auction_end_at = Some(Utc::now() - Duration::seconds(1));
    ended.version += 1;
    store
        .commit(
            WriteBatch::new()
                .expect_swap_version(swap.id, swap.version)
                .put_swap(ended),
        )
        .await
        .unwrap();
}

// Scenario: first-match swap accepting a $200 cash proposal settles into a
// pending payment of that amount
#[tokio::test]
async fn first_match_cash_acceptance_creates_pending_payment() {
    let h = harness();
    let owner = Uuid::new_v4();
    let swap = register_first_match(&h, owner).await;

    let proposal = h
        .resolver
        .create_proposal(swap.id, Uuid::new_v4(), cash(20_000))
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);

    let accepted = h.resolver.accept_proposal(proposal.id, owner).await.unwrap();
    assert_eq!(accepted.status, ProposalStatus::Accepted);
    assert_eq!(
        h.store.get_swap(swap.id).await.unwrap().unwrap().status,
        SwapStatus::Matched
    );

    let payment = h
        .store
        .payment_for_proposal(proposal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, SettlementStatus::Pending);
    assert_eq!(payment.amount_cents, 20_000);
    assert_eq!(payment.currency, "USD");

    assert!(h.validator.run().await.unwrap().is_clean());
}

// Scenario: A targets B, then B targeting A must fail with a cycle error and
// leave B's edge set untouched
#[tokio::test]
async fn reverse_targeting_fails_cycle_and_leaves_edges_unchanged() {
    let h = harness();
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let s1 = register_first_match(&h, u1).await;
    let s2 = register_first_match(&h, u2).await;

    h.targeting.target_swap(s1.id, s2.id, u1).await.unwrap();
    let err = h.targeting.target_swap(s2.id, s1.id, u2).await.unwrap_err();
    assert!(matches!(err, CoreError::Cycle { .. }));

    assert_eq!(h.store.active_target(s1.id).await.unwrap(), Some(s2.id));
    assert!(h.store.active_edge(s2.id).await.unwrap().is_none());
    assert!(h.validator.run().await.unwrap().is_clean());
}

// Scenario: retargeting into a cycle fails and the original edge stays active
#[tokio::test]
async fn cyclic_retarget_keeps_original_edge_active() {
    let h = harness();
    let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let s1 = register_first_match(&h, u1).await;
    let s2 = register_first_match(&h, u2).await;
    let s3 = register_first_match(&h, u3).await;

    h.targeting.target_swap(s1.id, s2.id, u1).await.unwrap();
    h.targeting.target_swap(s3.id, s1.id, u3).await.unwrap();

    // S1 -> S3 would close S1 -> S3 -> S1
    let err = h
        .targeting
        .retarget_swap(s1.id, s3.id, u1)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cycle { .. }));
    assert_eq!(h.store.active_target(s1.id).await.unwrap(), Some(s2.id));
    assert!(h.validator.run().await.unwrap().is_clean());
}

// Property: concurrent targeting of disjoint swaps all succeeds in parallel
#[tokio::test]
async fn disjoint_targeting_proceeds_in_parallel() {
    let h = harness();
    let mut pairs = Vec::new();
    for _ in 0..32 {
        let owner = Uuid::new_v4();
        let source = register_first_match(&h, owner).await;
        let target = register_first_match(&h, Uuid::new_v4()).await;
        pairs.push((source.id, target.id, owner));
    }

    let targeting = Arc::new(h.targeting);
    let tasks = pairs.iter().map(|(source, target, owner)| {
        let targeting = targeting.clone();
        let (source, target, owner) = (*source, *target, *owner);
        tokio::spawn(async move { targeting.target_swap(source, target, owner).await })
    });
    let results = join_all(tasks).await;

    for result in results {
        result.unwrap().unwrap();
    }
    for (source, target, _) in &pairs {
        assert_eq!(h.store.active_target(*source).await.unwrap(), Some(*target));
    }
    assert!(h.validator.run().await.unwrap().is_clean());
}

// Property: two writers racing on the same source swap - exactly one wins,
// the other sees a conflict, and the edge set reflects only the winner
#[tokio::test]
async fn same_source_concurrent_targeting_has_single_winner() {
    let h = harness();
    let owner = Uuid::new_v4();
    let source = register_first_match(&h, owner).await;
    let t1 = register_first_match(&h, Uuid::new_v4()).await;
    let t2 = register_first_match(&h, Uuid::new_v4()).await;

    let targeting = Arc::new(h.targeting);
    let a = {
        let targeting = targeting.clone();
        let source = source.id;
        let target = t1.id;
        tokio::spawn(async move { targeting.target_swap(source, target, owner).await })
    };
    let b = {
        let targeting = targeting.clone();
        let source = source.id;
        let target = t2.id;
        tokio::spawn(async move { targeting.target_swap(source, target, owner).await })
    };
    let (ra, rb) = (a.await.unwrap(), b.await.unwrap());

    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one writer must win");
    let loser = if ra.is_ok() { rb } else { ra };
    assert!(matches!(loser.unwrap_err(), CoreError::Conflict(_)));

    let winner_target = h.store.active_target(source.id).await.unwrap().unwrap();
    assert!(winner_target == t1.id || winner_target == t2.id);
    assert_eq!(h.store.edges_from(source.id).await.unwrap().len(), 1);
    assert!(h.validator.run().await.unwrap().is_clean());
}

// Property: a proposal racing an auction close lands deterministically on one
// side of the close and is never silently lost
#[tokio::test]
async fn proposal_racing_close_lands_on_one_side() {
    for _ in 0..8 {
        let h = harness();
        let owner = Uuid::new_v4();
        let swap = register_auction(&h, owner, 3600).await;
        h.resolver
            .create_proposal(swap.id, Uuid::new_v4(), cash(30_000))
            .await
            .unwrap();
        force_auction_end(&h.store, swap.id).await;

        let closer = {
            let resolver = h.resolver.clone();
            let swap_id = swap.id;
            tokio::spawn(async move { resolver.close_auction(swap_id).await })
        };
        let creator = {
            let resolver = h.resolver.clone();
            let swap_id = swap.id;
            tokio::spawn(
                async move { resolver.create_proposal(swap_id, Uuid::new_v4(), cash(40_000)).await },
            )
        };
        let close_result = closer.await.unwrap().unwrap();
        let create_result = creator.await.unwrap();

        assert!(!matches!(close_result, CloseOutcome::Expired));
        match create_result {
            // Landed before the close: it must have been resolved by it
            Ok(proposal) => {
                let resolved = h.store.get_proposal(proposal.id).await.unwrap().unwrap();
                assert_ne!(resolved.status, ProposalStatus::Pending);
            }
            // Landed after the close
            Err(e) => assert!(matches!(e, CoreError::Expired(_) | CoreError::Validation(_))),
        }

        let swap_after = h.store.get_swap(swap.id).await.unwrap().unwrap();
        assert_eq!(swap_after.status, SwapStatus::Matched);
        assert!(h.validator.run().await.unwrap().is_clean());
    }
}

// The sweeper closes idle auctions with the same outcome as the lazy path
#[tokio::test]
async fn sweeper_closes_due_auctions() {
    let h = harness();
    let owner = Uuid::new_v4();
    let with_bids = register_auction(&h, owner, 3600).await;
    let without_bids = register_auction(&h, Uuid::new_v4(), 3600).await;
    h.resolver
        .create_proposal(with_bids.id, Uuid::new_v4(), cash(25_000))
        .await
        .unwrap();
    force_auction_end(&h.store, with_bids.id).await;
    force_auction_end(&h.store, without_bids.id).await;

    let sweeper = AuctionSweeper::new(
        h.store.clone(),
        h.resolver.clone(),
        std::time::Duration::from_secs(3600),
    );
    let closed = sweeper.run_once().await.unwrap();
    assert_eq!(closed, 2);

    assert_eq!(
        h.store.get_swap(with_bids.id).await.unwrap().unwrap().status,
        SwapStatus::Matched
    );
    assert_eq!(
        h.store
            .get_swap(without_bids.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        SwapStatus::Expired
    );
    // A second sweep finds nothing due
    assert_eq!(sweeper.run_once().await.unwrap(), 0);
    assert!(h.validator.run().await.unwrap().is_clean());
}

// Full hand-off: acceptance -> pending payment -> gateway funding -> release
#[tokio::test]
async fn settlement_follows_gateway_callbacks() {
    let h = harness();
    let owner = Uuid::new_v4();
    let swap = register_first_match(&h, owner).await;
    let proposal = h
        .resolver
        .create_proposal(swap.id, Uuid::new_v4(), cash(45_000))
        .await
        .unwrap();
    h.resolver.accept_proposal(proposal.id, owner).await.unwrap();

    let payment = h
        .store
        .payment_for_proposal(proposal.id)
        .await
        .unwrap()
        .unwrap();
    let funded = h.settlement.record_funded(payment.id).await.unwrap();
    assert_eq!(funded.status, SettlementStatus::Funded);

    // The escrow record tracks the payment
    let escrow = h
        .store
        .escrow_for_payment(payment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, SettlementStatus::Funded);

    let released = h.settlement.record_released(payment.id).await.unwrap();
    assert_eq!(released.status, SettlementStatus::Released);

    // Refund after release is illegal
    let err = h.settlement.record_refunded(payment.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Settlement { .. }));
    assert!(h.validator.run().await.unwrap().is_clean());
}

// Cancellation before match: proposals expire, the outgoing edge is removed,
// and a matched swap can no longer be cancelled
#[tokio::test]
async fn cancellation_rules() {
    let h = harness();
    let owner = Uuid::new_v4();
    let swap = register_first_match(&h, owner).await;
    let other = register_first_match(&h, Uuid::new_v4()).await;
    h.targeting.target_swap(swap.id, other.id, owner).await.unwrap();
    let proposal = h
        .resolver
        .create_proposal(swap.id, Uuid::new_v4(), cash(20_000))
        .await
        .unwrap();

    let cancelled = h.resolver.cancel_swap(swap.id, owner).await.unwrap();
    assert_eq!(cancelled.status, SwapStatus::Cancelled);
    assert!(h.store.active_edge(swap.id).await.unwrap().is_none());
    assert_eq!(
        h.store
            .get_proposal(proposal.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        ProposalStatus::Expired
    );

    // A matched swap refuses cancellation
    let owner2 = Uuid::new_v4();
    let matched = register_first_match(&h, owner2).await;
    let p = h
        .resolver
        .create_proposal(matched.id, Uuid::new_v4(), cash(20_000))
        .await
        .unwrap();
    h.resolver.accept_proposal(p.id, owner2).await.unwrap();
    let err = h.resolver.cancel_swap(matched.id, owner2).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(h.validator.run().await.unwrap().is_clean());
}

// History listing records exactly the successful mutations, newest first
#[tokio::test]
async fn targeting_history_tracks_successful_operations() {
    let h = harness();
    let owner = Uuid::new_v4();
    let s1 = register_first_match(&h, owner).await;
    let s2 = register_first_match(&h, Uuid::new_v4()).await;
    let s3 = register_first_match(&h, Uuid::new_v4()).await;

    h.targeting.target_swap(s1.id, s2.id, owner).await.unwrap();
    h.targeting.retarget_swap(s1.id, s3.id, owner).await.unwrap();
    h.targeting.remove_target(s1.id, owner).await.unwrap();
    // Failed attempts leave no trace
    let _ = h.targeting.target_swap(s1.id, s1.id, owner).await;

    let page = h.targeting.list_targeting_history(s1.id, 0);
    assert_eq!(page.total, 3);
    let kinds: Vec<_> = page.items.iter().map(|e| e.kind).collect();
    use swapmatch::model::TargetingEventKind::*;
    assert_eq!(kinds, vec![Removed, Retargeted, Targeted]);
}

// Mixed load across many swaps leaves the store fully consistent
#[tokio::test]
async fn concurrent_mixed_load_keeps_invariants() {
    let h = harness();
    let resolver = h.resolver.clone();

    let mut owners = Vec::new();
    let mut swaps = Vec::new();
    for _ in 0..16 {
        let owner = Uuid::new_v4();
        let swap = register_first_match(&h, owner).await;
        owners.push(owner);
        swaps.push(swap.id);
    }

    // Three proposers per swap race; the owner accepts whichever proposal
    // lands first
    let mut tasks = Vec::new();
    for (i, swap_id) in swaps.iter().enumerate() {
        let owner = owners[i];
        let resolver = resolver.clone();
        let swap_id = *swap_id;
        tasks.push(tokio::spawn(async move {
            let created = join_all((0..3).map(|k| {
                let resolver = resolver.clone();
                async move {
                    resolver
                        .create_proposal(swap_id, Uuid::new_v4(), cash(15_000 + k * 5_000))
                        .await
                }
            }))
            .await;
            let first = created.into_iter().flatten().next().unwrap();
            resolver.accept_proposal(first.id, owner).await
        }));
    }
    for task in join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let report = h.validator.run().await.unwrap();
    assert!(report.is_clean(), "violations: {:?}", report.violations);
    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.matched_swaps, 16);
    assert_eq!(stats.accepted_proposals, 16);
}
