//! Proposal lifecycle and auction resolution
//!
//! Proposals are created against open swaps, resolved by owner response
//! (first-match) or by auction closing, and hand off into settlement on
//! acceptance. Closing is lazy: every operation that references a swap first
//! closes its auction if the window has passed; the periodic sweeper drives
//! the same entry point for idle auctions, so both triggers produce identical
//! results.

pub mod ranking;

use crate::auction::{self, AuctionStatus};
use crate::error::{CoreError, CoreResult};
use crate::external::{
    BookingCatalog, LedgerClient, LedgerEntry, Notification, NotificationDispatcher,
};
use crate::metrics;
use crate::model::{
    validate_proposal_spec, AcceptanceStrategy, PaymentTransaction, Proposal, ProposalSpec,
    ProposalStatus, Swap, SwapStatus,
};
use crate::retry::{run_tx, RetryPolicy, TxError};
use crate::settlement::SettlementCoordinator;
use crate::store::{SwapStore, WriteBatch};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reason recorded on siblings when an owner accepts a competing proposal
const REASON_SIBLING_ACCEPTED: &str = "another proposal was accepted";
/// Reason recorded on losing proposals when an auction closes
const REASON_AUCTION_CLOSED: &str = "auction closed";

/// What closing an auction did
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// The swap had already left the open state; nothing to do
    AlreadyClosed,
    /// The best-ranked proposal won
    Matched(Proposal),
    /// No proposals were pending at the deadline
    Expired,
}

impl CloseOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            CloseOutcome::AlreadyClosed => "already_closed",
            CloseOutcome::Matched(_) => "matched",
            CloseOutcome::Expired => "expired",
        }
    }
}

/// Proposal lifecycle operations for a swap
pub struct ProposalResolver {
    store: Arc<dyn SwapStore>,
    catalog: Arc<dyn BookingCatalog>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn NotificationDispatcher>,
    retry: RetryPolicy,
}

impl ProposalResolver {
    pub fn new(
        store: Arc<dyn SwapStore>,
        catalog: Arc<dyn BookingCatalog>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn NotificationDispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            ledger,
            notifier,
            retry,
        }
    }

    /// Submit a proposal against a swap
    pub async fn create_proposal(
        &self,
        source_swap_id: Uuid,
        proposer_id: Uuid,
        spec: ProposalSpec,
    ) -> CoreResult<Proposal> {
        self.ensure_closed(source_swap_id).await?;
        let ledger_ref = self
            .ledger_ref("proposal_created", source_swap_id, proposer_id)
            .await;

        let proposal = run_tx(&self.retry, "create_proposal", || {
            let spec = spec.clone();
            let ledger_ref = ledger_ref.clone();
            async move {
                let swap = self.load_swap(source_swap_id).await?;
                let now = Utc::now();
                match swap.status {
                    SwapStatus::Open => {}
                    SwapStatus::Expired => {
                        return Err(TxError::Fatal(CoreError::Expired(format!(
                            "swap {} expired without a match",
                            swap.id
                        ))))
                    }
                    SwapStatus::Matched | SwapStatus::Cancelled => {
                        return Err(TxError::Fatal(CoreError::Validation(format!(
                            "swap {} is {}",
                            swap.id,
                            swap.status.name()
                        ))))
                    }
                }
                if let Some(end) = swap.auction_end_at {
                    if !auction::is_open(now, end) {
                        return Err(TxError::Fatal(CoreError::Expired(format!(
                            "auction on swap {} ended at {}",
                            swap.id, end
                        ))));
                    }
                }
                validate_proposal_spec(&swap, &spec)?;
                if let Some(booking_ref) = spec.booking_ref {
                    match self.catalog.lookup(booking_ref).await? {
                        None => {
                            return Err(TxError::Fatal(CoreError::Validation(format!(
                                "unknown booking reference {}",
                                booking_ref
                            ))))
                        }
                        Some(meta) if !meta.transferable => {
                            return Err(TxError::Fatal(CoreError::Validation(format!(
                                "booking {} can no longer be proposed",
                                booking_ref
                            ))))
                        }
                        Some(_) => {}
                    }
                }
                if let Some(counter_id) = spec.counter_swap_id {
                    let counter = self.load_swap(counter_id).await?;
                    if counter.owner_id != proposer_id {
                        return Err(TxError::Fatal(CoreError::unauthorized(
                            proposer_id,
                            format!("propose with swap {} they do not own", counter_id),
                        )));
                    }
                    if self.store.active_target(counter_id).await? != Some(swap.id) {
                        return Err(TxError::Fatal(CoreError::Validation(format!(
                            "swap {} does not actively target swap {}",
                            counter_id, swap.id
                        ))));
                    }
                }

                let proposal = Proposal {
                    id: Uuid::new_v4(),
                    source_swap_id: swap.id,
                    target_swap_id: spec.counter_swap_id,
                    proposer_id,
                    target_owner_id: swap.owner_id,
                    payment_type: spec.payment_type,
                    cash_amount_cents: spec.cash_amount_cents,
                    booking_ref: spec.booking_ref,
                    status: ProposalStatus::Pending,
                    created_at: now,
                    responded_at: None,
                    responded_by: None,
                    rejection_reason: None,
                    ledger_ref,
                };
                // Creation bumps the swap version so a close committing in
                // the same instant lands strictly before or after it
                let mut bumped = swap.clone();
                bumped.version += 1;
                self.store
                    .commit(
                        WriteBatch::new()
                            .expect_swap_version(swap.id, swap.version)
                            .put_swap(bumped)
                            .put_proposal(proposal.clone()),
                    )
                    .await?;
                Ok(proposal)
            }
        })
        .await?;

        metrics::record_proposal_created(proposal.payment_type.name());
        self.notifier
            .dispatch(Notification::ProposalReceived {
                proposal_id: proposal.id,
                swap_id: source_swap_id,
            })
            .await;
        info!(proposal = %proposal.id, swap = %source_swap_id, payment_type = proposal.payment_type.name(), "proposal created");
        Ok(proposal)
    }

    /// Owner accepts a pending proposal (first-match swaps only; auctions
    /// accept at close). Idempotent for a proposal that already won.
    pub async fn accept_proposal(
        &self,
        proposal_id: Uuid,
        acting_user_id: Uuid,
    ) -> CoreResult<Proposal> {
        if let Some(p) = self.store.get_proposal(proposal_id).await? {
            self.ensure_closed(p.source_swap_id).await?;
        }

        let (proposal, payment, newly_accepted) =
            run_tx(&self.retry, "accept_proposal", || async move {
                let proposal = self.load_proposal(proposal_id).await?;
                let swap = self.load_swap(proposal.source_swap_id).await?;
                if swap.owner_id != acting_user_id {
                    return Err(TxError::Fatal(CoreError::unauthorized(
                        acting_user_id,
                        format!("respond to proposals on swap {}", swap.id),
                    )));
                }
                match proposal.status {
                    ProposalStatus::Accepted => return Ok((proposal, None, false)),
                    ProposalStatus::Rejected | ProposalStatus::Expired => {
                        return Err(TxError::Fatal(CoreError::Conflict(format!(
                            "proposal {} was already responded to",
                            proposal.id
                        ))))
                    }
                    ProposalStatus::Pending => {}
                }
                if swap.status != SwapStatus::Open {
                    return Err(TxError::Fatal(CoreError::Validation(format!(
                        "swap {} is {}",
                        swap.id,
                        swap.status.name()
                    ))));
                }
                let now = Utc::now();
                if swap.acceptance_strategy == AcceptanceStrategy::Auction {
                    if let Some(end) = swap.auction_end_at {
                        if auction::is_open(now, end) {
                            return Err(TxError::Fatal(CoreError::Validation(
                                "auction proposals are accepted when the auction closes".into(),
                            )));
                        }
                    }
                    // Window passed but the lazy close has not landed yet
                    return Err(TxError::Fatal(CoreError::Expired(format!(
                        "auction on swap {} has ended; awaiting close",
                        swap.id
                    ))));
                }

                let siblings: Vec<Proposal> = self
                    .store
                    .proposals_for_swap(swap.id)
                    .await?
                    .into_iter()
                    .filter(|p| p.id != proposal.id && p.status == ProposalStatus::Pending)
                    .collect();
                let (batch, accepted, payment) = self
                    .acceptance_writes(
                        &swap,
                        proposal,
                        &siblings,
                        Some(acting_user_id),
                        REASON_SIBLING_ACCEPTED,
                        now,
                    )
                    .await?;
                self.store.commit(batch).await?;
                Ok((accepted, payment, true))
            })
            .await?;

        if newly_accepted {
            metrics::record_proposal_resolved("accepted");
            self.notifier
                .dispatch(Notification::ProposalAccepted {
                    proposal_id: proposal.id,
                    swap_id: proposal.source_swap_id,
                    payment_id: payment.as_ref().map(|p| p.id),
                })
                .await;
            info!(proposal = %proposal.id, swap = %proposal.source_swap_id, "proposal accepted");
        } else {
            debug!(proposal = %proposal.id, "accept replay on settled proposal");
        }
        Ok(proposal)
    }

    /// Owner declines a pending proposal
    pub async fn reject_proposal(
        &self,
        proposal_id: Uuid,
        acting_user_id: Uuid,
        reason: String,
    ) -> CoreResult<Proposal> {
        if let Some(p) = self.store.get_proposal(proposal_id).await? {
            self.ensure_closed(p.source_swap_id).await?;
        }

        let rejected = run_tx(&self.retry, "reject_proposal", || {
            let reason = reason.clone();
            async move {
                let proposal = self.load_proposal(proposal_id).await?;
                let swap = self.load_swap(proposal.source_swap_id).await?;
                if swap.owner_id != acting_user_id {
                    return Err(TxError::Fatal(CoreError::unauthorized(
                        acting_user_id,
                        format!("respond to proposals on swap {}", swap.id),
                    )));
                }
                if proposal.status != ProposalStatus::Pending {
                    return Err(TxError::Fatal(CoreError::Conflict(format!(
                        "proposal {} was already responded to",
                        proposal.id
                    ))));
                }
                let now = Utc::now();
                let rejected = proposal.rejected(Some(acting_user_id), now, &reason);
                let mut bumped = swap.clone();
                bumped.version += 1;
                self.store
                    .commit(
                        WriteBatch::new()
                            .expect_swap_version(swap.id, swap.version)
                            .put_swap(bumped)
                            .put_proposal(rejected.clone()),
                    )
                    .await?;
                Ok(rejected)
            }
        })
        .await?;

        metrics::record_proposal_resolved("rejected");
        self.notifier
            .dispatch(Notification::ProposalRejected {
                proposal_id: rejected.id,
                swap_id: rejected.source_swap_id,
            })
            .await;
        info!(proposal = %rejected.id, "proposal rejected");
        Ok(rejected)
    }

    /// Close an auction whose window has passed. Idempotent; both the lazy
    /// trigger and the periodic sweep call this.
    pub async fn close_auction(&self, swap_id: Uuid) -> CoreResult<CloseOutcome> {
        let outcome = run_tx(&self.retry, "close_auction", || async move {
            let swap = self.load_swap(swap_id).await?;
            let Some(end) = swap.auction_end_at else {
                return Err(TxError::Fatal(CoreError::Validation(format!(
                    "swap {} is not an auction",
                    swap.id
                ))));
            };
            if swap.status != SwapStatus::Open {
                return Ok(CloseOutcome::AlreadyClosed);
            }
            let now = Utc::now();
            if auction::is_open(now, end) {
                return Err(TxError::Fatal(CoreError::Validation(format!(
                    "auction on swap {} is still open",
                    swap.id
                ))));
            }

            let pending: Vec<Proposal> = self
                .store
                .proposals_for_swap(swap.id)
                .await?
                .into_iter()
                .filter(|p| p.status == ProposalStatus::Pending)
                .collect();

            match ranking::select_winner(&pending).cloned() {
                None => {
                    let mut expired = swap.clone();
                    expired.status = SwapStatus::Expired;
                    expired.version += 1;
                    self.store
                        .commit(
                            WriteBatch::new()
                                .expect_swap_version(swap.id, swap.version)
                                .put_swap(expired),
                        )
                        .await?;
                    Ok(CloseOutcome::Expired)
                }
                Some(winner) => {
                    let losers: Vec<Proposal> = pending
                        .iter()
                        .filter(|p| p.id != winner.id)
                        .cloned()
                        .collect();
                    let (batch, accepted, _) = self
                        .acceptance_writes(&swap, winner, &losers, None, REASON_AUCTION_CLOSED, now)
                        .await?;
                    self.store.commit(batch).await?;
                    Ok(CloseOutcome::Matched(accepted))
                }
            }
        })
        .await?;

        match &outcome {
            CloseOutcome::AlreadyClosed => {}
            CloseOutcome::Matched(winner) => {
                metrics::record_auction_closed("matched");
                metrics::record_proposal_resolved("accepted");
                self.notifier
                    .dispatch(Notification::AuctionClosed {
                        swap_id,
                        winning_proposal_id: Some(winner.id),
                    })
                    .await;
                info!(swap = %swap_id, winner = %winner.id, "auction closed with winner");
            }
            CloseOutcome::Expired => {
                metrics::record_auction_closed("expired");
                self.notifier
                    .dispatch(Notification::AuctionClosed {
                        swap_id,
                        winning_proposal_id: None,
                    })
                    .await;
                info!(swap = %swap_id, "auction closed without proposals");
            }
        }
        Ok(outcome)
    }

    /// Owner withdraws an open swap. Pending proposals expire and the active
    /// targeting edge is removed in the same commit.
    pub async fn cancel_swap(&self, swap_id: Uuid, acting_user_id: Uuid) -> CoreResult<Swap> {
        self.ensure_closed(swap_id).await?;

        let cancelled = run_tx(&self.retry, "cancel_swap", || async move {
            let swap = self.load_swap(swap_id).await?;
            if swap.owner_id != acting_user_id {
                return Err(TxError::Fatal(CoreError::unauthorized(
                    acting_user_id,
                    format!("cancel swap {}", swap_id),
                )));
            }
            match swap.status {
                SwapStatus::Cancelled => return Ok(swap),
                SwapStatus::Matched => {
                    return Err(TxError::Fatal(CoreError::Validation(
                        "matched swaps cannot be cancelled; refund the settlement instead".into(),
                    )))
                }
                SwapStatus::Expired => {
                    return Err(TxError::Fatal(CoreError::Validation(
                        "expired swaps cannot be cancelled".into(),
                    )))
                }
                SwapStatus::Open => {}
            }
            let now = Utc::now();
            let mut cancelled = swap.clone();
            cancelled.status = SwapStatus::Cancelled;
            cancelled.version += 1;

            let mut batch = WriteBatch::new()
                .expect_swap_version(swap.id, swap.version)
                .put_swap(cancelled.clone());
            for pending in self
                .store
                .proposals_for_swap(swap.id)
                .await?
                .into_iter()
                .filter(|p| p.status == ProposalStatus::Pending)
            {
                batch = batch.put_proposal(pending.expired(now));
            }
            if let Some(edge) = self.store.active_edge(swap.id).await? {
                batch = batch.set_edge_status(edge.id, crate::model::EdgeStatus::Removed);
            }
            self.store.commit(batch).await?;
            Ok(cancelled)
        })
        .await?;

        metrics::record_swap_cancelled();
        self.notifier
            .dispatch(Notification::SwapCancelled { swap_id })
            .await;
        info!(swap = %swap_id, "swap cancelled");
        Ok(cancelled)
    }

    /// Window state for an auction swap (closes it first if due)
    pub async fn get_auction_status(&self, swap_id: Uuid) -> CoreResult<AuctionStatus> {
        self.ensure_closed(swap_id).await?;
        let swap = self
            .store
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| CoreError::not_found("swap", swap_id))?;
        let end = swap.auction_end_at.ok_or_else(|| {
            CoreError::Validation(format!("swap {} is not an auction", swap_id))
        })?;
        Ok(auction::evaluate(Utc::now(), end))
    }

    /// Close the swap's auction if its window has passed. Any operation that
    /// references a swap runs this before proceeding.
    pub async fn ensure_closed(&self, swap_id: Uuid) -> CoreResult<()> {
        let Some(swap) = self.store.get_swap(swap_id).await? else {
            // The caller's own load reports the missing swap
            return Ok(());
        };
        if swap.acceptance_strategy != AcceptanceStrategy::Auction
            || swap.status != SwapStatus::Open
        {
            return Ok(());
        }
        let Some(end) = swap.auction_end_at else {
            return Ok(());
        };
        if auction::is_open(Utc::now(), end) {
            return Ok(());
        }
        match self.close_auction(swap_id).await {
            Ok(_) => Ok(()),
            // A concurrent close or a clock edge already handled it
            Err(CoreError::Validation(msg)) => {
                debug!(swap = %swap_id, reason = %msg, "lazy close skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// All writes for one proposal winning its swap: winner accepted, pending
    /// siblings rejected, swap (and referenced counter-swap) matched,
    /// settlement records for cash
    async fn acceptance_writes(
        &self,
        swap: &Swap,
        winner: Proposal,
        losers: &[Proposal],
        responded_by: Option<Uuid>,
        loser_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(WriteBatch, Proposal, Option<PaymentTransaction>), TxError> {
        let accepted = winner.accepted(responded_by.unwrap_or(swap.owner_id), now);

        let mut matched = swap.clone();
        matched.status = SwapStatus::Matched;
        matched.version += 1;

        let mut batch = WriteBatch::new()
            .expect_swap_version(swap.id, swap.version)
            .put_swap(matched)
            .put_proposal(accepted.clone());
        for loser in losers {
            batch = batch.put_proposal(loser.clone().rejected(None, now, loser_reason));
        }

        if let Some(counter_id) = accepted.target_swap_id {
            let counter = self.load_swap(counter_id).await?;
            if counter.status == SwapStatus::Open {
                let mut counter_matched = counter.clone();
                counter_matched.status = SwapStatus::Matched;
                counter_matched.version += 1;
                batch = batch
                    .expect_swap_version(counter.id, counter.version)
                    .put_swap(counter_matched);
            } else {
                warn!(counter = %counter_id, status = counter.status.name(), "counter swap no longer open at acceptance");
            }
        }

        let payment = match SettlementCoordinator::build_for_acceptance(&accepted, swap, now) {
            Some((payment, escrow)) => {
                batch = batch.put_payment(payment.clone()).put_escrow(escrow);
                Some(payment)
            }
            None => None,
        };
        Ok((batch, accepted, payment))
    }

    async fn load_swap(&self, id: Uuid) -> Result<Swap, TxError> {
        self.store
            .get_swap(id)
            .await?
            .ok_or_else(|| TxError::Fatal(CoreError::not_found("swap", id)))
    }

    async fn load_proposal(&self, id: Uuid) -> Result<Proposal, TxError> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or_else(|| TxError::Fatal(CoreError::not_found("proposal", id)))
    }

    async fn ledger_ref(&self, kind: &'static str, subject: Uuid, actor: Uuid) -> Option<String> {
        match self
            .ledger
            .record(LedgerEntry {
                kind,
                subject,
                actor,
            })
            .await
        {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(kind, subject = %subject, error = %e, "ledger record failed, continuing without reference");
                None
            }
        }
    }
}
