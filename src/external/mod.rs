//! Collaborator seams
//!
//! The core consumes a booking catalog (read-only metadata), a ledger service
//! (opaque audit references) and a notification dispatcher (fire-and-forget).
//! Default implementations here are in-process stand-ins; deployments inject
//! real clients behind the same traits.

use crate::error::CoreResult;
use crate::model::SettlementStatus;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// State transitions broadcast to interested parties. Dispatch must never
/// block on or fail the triggering operation.
#[derive(Debug, Clone)]
pub enum Notification {
    SwapTargeted {
        source_swap_id: Uuid,
        target_swap_id: Uuid,
    },
    TargetRemoved {
        source_swap_id: Uuid,
        target_swap_id: Uuid,
    },
    ProposalReceived {
        proposal_id: Uuid,
        swap_id: Uuid,
    },
    ProposalAccepted {
        proposal_id: Uuid,
        swap_id: Uuid,
        payment_id: Option<Uuid>,
    },
    ProposalRejected {
        proposal_id: Uuid,
        swap_id: Uuid,
    },
    AuctionClosed {
        swap_id: Uuid,
        winning_proposal_id: Option<Uuid>,
    },
    SwapCancelled {
        swap_id: Uuid,
    },
    SettlementUpdated {
        payment_id: Uuid,
        status: SettlementStatus,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::SwapTargeted { .. } => "swap_targeted",
            Notification::TargetRemoved { .. } => "target_removed",
            Notification::ProposalReceived { .. } => "proposal_received",
            Notification::ProposalAccepted { .. } => "proposal_accepted",
            Notification::ProposalRejected { .. } => "proposal_rejected",
            Notification::AuctionClosed { .. } => "auction_closed",
            Notification::SwapCancelled { .. } => "swap_cancelled",
            Notification::SettlementUpdated { .. } => "settlement_updated",
        }
    }
}

/// Fire-and-forget notification fan-out. Implementations must return quickly
/// and swallow their own failures.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification);
}

/// Default dispatcher: structured log lines only
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, notification: Notification) {
        info!(event = notification.name(), payload = ?notification, "notification");
    }
}

/// Read-only booking metadata
#[derive(Debug, Clone)]
pub struct BookingMeta {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    /// Whether the booking can still change hands
    pub transferable: bool,
}

/// Booking-metadata provider, keyed by booking reference
#[async_trait]
pub trait BookingCatalog: Send + Sync {
    async fn lookup(&self, booking_ref: Uuid) -> CoreResult<Option<BookingMeta>>;
}

/// Catalog stand-in that treats every reference as a transferable booking,
/// used until a listings service is wired in
pub struct PermissiveCatalog;

#[async_trait]
impl BookingCatalog for PermissiveCatalog {
    async fn lookup(&self, booking_ref: Uuid) -> CoreResult<Option<BookingMeta>> {
        Ok(Some(BookingMeta {
            id: booking_ref,
            owner_id: None,
            transferable: true,
        }))
    }
}

/// An entry submitted to the external ledger
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub kind: &'static str,
    pub subject: Uuid,
    pub actor: Uuid,
}

/// External ledger service. Returns an opaque reference string the core
/// stores for audit and never interprets.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn record(&self, entry: LedgerEntry) -> CoreResult<String>;
}

/// Ledger stand-in that mints local references
pub struct NullLedger;

#[async_trait]
impl LedgerClient for NullLedger {
    async fn record(&self, entry: LedgerEntry) -> CoreResult<String> {
        let reference = format!("local-{}", Uuid::new_v4());
        debug!(kind = entry.kind, subject = %entry.subject, reference = %reference, "ledger entry");
        Ok(reference)
    }
}
