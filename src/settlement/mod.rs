//! Settlement of accepted cash proposals
//!
//! Acceptance of a cash proposal creates a payment transaction and a
//! mirroring escrow account, both `Pending`. Gateway callbacks drive the
//! status machine `Pending -> Funded -> {Released, Refunded}`; anything else
//! is rejected without mutating state, and terminal states are final.

use crate::error::{CoreError, CoreResult};
use crate::external::{Notification, NotificationDispatcher};
use crate::metrics;
use crate::model::{EscrowAccount, PaymentTransaction, Proposal, SettlementStatus, Swap};
use crate::retry::{run_tx, RetryPolicy, TxError};
use crate::store::{SwapStore, WriteBatch};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Drives payment/escrow records through their state machine
pub struct SettlementCoordinator {
    store: Arc<dyn SwapStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    retry: RetryPolicy,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn SwapStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    /// Records created when a cash proposal is accepted. Booking acceptances
    /// settle without payment records and return None.
    pub fn build_for_acceptance(
        proposal: &Proposal,
        swap: &Swap,
        now: DateTime<Utc>,
    ) -> Option<(PaymentTransaction, EscrowAccount)> {
        let amount_cents = proposal.cash_amount_cents?;
        let currency = swap
            .cash_range
            .as_ref()
            .map(|r| r.currency.clone())
            .unwrap_or_else(|| "USD".to_string());
        let payment = PaymentTransaction {
            id: Uuid::new_v4(),
            proposal_id: proposal.id,
            amount_cents,
            currency: currency.clone(),
            status: SettlementStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let escrow = EscrowAccount {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            proposal_id: proposal.id,
            amount_cents,
            currency,
            status: SettlementStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        Some((payment, escrow))
    }

    /// Gateway reported the payment was captured
    pub async fn record_funded(&self, payment_id: Uuid) -> CoreResult<PaymentTransaction> {
        self.transition(payment_id, SettlementStatus::Funded, "record_funded")
            .await
    }

    /// Funds handed over to the counterparty
    pub async fn record_released(&self, payment_id: Uuid) -> CoreResult<PaymentTransaction> {
        self.transition(payment_id, SettlementStatus::Released, "record_released")
            .await
    }

    /// Funds returned to the payer
    pub async fn record_refunded(&self, payment_id: Uuid) -> CoreResult<PaymentTransaction> {
        self.transition(payment_id, SettlementStatus::Refunded, "record_refunded")
            .await
    }

    async fn transition(
        &self,
        payment_id: Uuid,
        to: SettlementStatus,
        op: &'static str,
    ) -> CoreResult<PaymentTransaction> {
        let updated = run_tx(&self.retry, op, || async move {
            let payment = self
                .store
                .get_payment(payment_id)
                .await?
                .ok_or_else(|| TxError::Fatal(CoreError::not_found("payment", payment_id)))?;
            if !payment.status.can_transition_to(to) {
                return Err(TxError::Fatal(CoreError::Settlement {
                    from: payment.status.name().to_string(),
                    to: to.name().to_string(),
                }));
            }
            let now = Utc::now();
            let mut next = payment.clone();
            next.status = to;
            next.updated_at = now;

            let mut batch = WriteBatch::new()
                .expect_payment_status(payment.id, payment.status)
                .put_payment(next.clone());
            if let Some(mut escrow) = self.store.escrow_for_payment(payment.id).await? {
                escrow.status = to;
                escrow.updated_at = now;
                batch = batch.put_escrow(escrow);
            }
            self.store.commit(batch).await?;
            Ok(next)
        })
        .await?;

        metrics::record_settlement_transition(to.name());
        self.notifier
            .dispatch(Notification::SettlementUpdated {
                payment_id,
                status: to,
            })
            .await;
        info!(payment = %payment_id, status = to.name(), "settlement transition");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::LogNotifier;
    use crate::model::{AcceptanceStrategy, CashRange, PaymentType, ProposalStatus};
    use crate::store::MemoryStore;

    fn cash_swap() -> Swap {
        Swap::new(
            Uuid::new_v4(),
            AcceptanceStrategy::FirstMatch,
            None,
            vec![PaymentType::Cash],
            Some(CashRange {
                min_cents: 10_000,
                max_cents: 50_000,
                currency: "USD".into(),
            }),
            Utc::now(),
        )
        .unwrap()
    }

    fn cash_proposal(swap: &Swap, amount: i64) -> Proposal {
        Proposal {
            id: Uuid::new_v4(),
            source_swap_id: swap.id,
            target_swap_id: None,
            proposer_id: Uuid::new_v4(),
            target_owner_id: swap.owner_id,
            payment_type: PaymentType::Cash,
            cash_amount_cents: Some(amount),
            booking_ref: None,
            status: ProposalStatus::Accepted,
            created_at: Utc::now(),
            responded_at: Some(Utc::now()),
            responded_by: Some(swap.owner_id),
            rejection_reason: None,
            ledger_ref: None,
        }
    }

    async fn seeded_payment(store: &Arc<MemoryStore>) -> PaymentTransaction {
        let swap = cash_swap();
        let proposal = cash_proposal(&swap, 20_000);
        let (payment, escrow) =
            SettlementCoordinator::build_for_acceptance(&proposal, &swap, Utc::now()).unwrap();
        store
            .commit(
                WriteBatch::new()
                    .put_payment(payment.clone())
                    .put_escrow(escrow),
            )
            .await
            .unwrap();
        payment
    }

    fn coordinator(store: Arc<MemoryStore>) -> SettlementCoordinator {
        SettlementCoordinator::new(store, Arc::new(LogNotifier), RetryPolicy::default())
    }

    #[test]
    fn booking_acceptance_creates_no_records() {
        let swap = cash_swap();
        let mut proposal = cash_proposal(&swap, 20_000);
        proposal.payment_type = PaymentType::Booking;
        proposal.cash_amount_cents = None;
        assert!(SettlementCoordinator::build_for_acceptance(&proposal, &swap, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn full_lifecycle_funded_then_released() {
        let store = Arc::new(MemoryStore::new());
        let payment = seeded_payment(&store).await;
        let coordinator = coordinator(store.clone());

        let funded = coordinator.record_funded(payment.id).await.unwrap();
        assert_eq!(funded.status, SettlementStatus::Funded);
        let escrow = store.escrow_for_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(escrow.status, SettlementStatus::Funded);

        let released = coordinator.record_released(payment.id).await.unwrap();
        assert_eq!(released.status, SettlementStatus::Released);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let payment = seeded_payment(&store).await;
        let coordinator = coordinator(store.clone());

        // Release before funding
        let err = coordinator.record_released(payment.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Settlement { .. }));

        coordinator.record_funded(payment.id).await.unwrap();
        // Double funding
        let err = coordinator.record_funded(payment.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Settlement { .. }));

        coordinator.record_refunded(payment.id).await.unwrap();
        // Terminal states are final
        let err = coordinator.record_funded(payment.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Settlement { .. }));
        let current = store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(current.status, SettlementStatus::Refunded);
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store);
        let err = coordinator.record_funded(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
