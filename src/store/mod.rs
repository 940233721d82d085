//! Persistence boundary for the swapmatch core
//!
//! All multi-record mutations flow through a single atomic
//! [`SwapStore::commit`] guarded by per-swap expected versions. Either every
//! write in a batch lands or none does.

mod memory;

pub use memory::MemoryStore;

use crate::error::CoreResult;
use crate::model::{
    EdgeStatus, EscrowAccount, PaymentTransaction, Proposal, SettlementStatus, Swap, TargetEdge,
};

use async_trait::async_trait;
use uuid::Uuid;

/// Why a commit was not applied
#[derive(Debug)]
pub enum CommitError {
    /// An expected swap version or payment status no longer matches; the
    /// writer must re-read and rebuild the batch
    StaleVersion,
    /// Transient store failure; safe to retry with backoff
    Unavailable(String),
}

/// One atomic unit of writes plus the preconditions under which it may apply
#[derive(Debug, Default)]
pub struct WriteBatch {
    expected_swap_versions: Vec<(Uuid, u64)>,
    expected_payment_status: Vec<(Uuid, SettlementStatus)>,
    swap_puts: Vec<Swap>,
    edge_inserts: Vec<TargetEdge>,
    edge_status_updates: Vec<(Uuid, EdgeStatus)>,
    proposal_puts: Vec<Proposal>,
    payment_puts: Vec<PaymentTransaction>,
    escrow_puts: Vec<EscrowAccount>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `swap` to still be at `version` when the batch applies
    pub fn expect_swap_version(mut self, swap_id: Uuid, version: u64) -> Self {
        self.expected_swap_versions.push((swap_id, version));
        self
    }

    /// Require several swaps to still be at their read versions
    pub fn expect_swap_versions(mut self, expectations: &[(Uuid, u64)]) -> Self {
        self.expected_swap_versions.extend_from_slice(expectations);
        self
    }

    /// Require `payment` to still be in `status` when the batch applies
    pub fn expect_payment_status(mut self, payment_id: Uuid, status: SettlementStatus) -> Self {
        self.expected_payment_status.push((payment_id, status));
        self
    }

    /// Insert or replace a swap; the caller bumps the version before putting
    pub fn put_swap(mut self, swap: Swap) -> Self {
        self.swap_puts.push(swap);
        self
    }

    pub fn insert_edge(mut self, edge: TargetEdge) -> Self {
        self.edge_inserts.push(edge);
        self
    }

    pub fn set_edge_status(mut self, edge_id: Uuid, status: EdgeStatus) -> Self {
        self.edge_status_updates.push((edge_id, status));
        self
    }

    pub fn put_proposal(mut self, proposal: Proposal) -> Self {
        self.proposal_puts.push(proposal);
        self
    }

    pub fn put_payment(mut self, payment: PaymentTransaction) -> Self {
        self.payment_puts.push(payment);
        self
    }

    pub fn put_escrow(mut self, escrow: EscrowAccount) -> Self {
        self.escrow_puts.push(escrow);
        self
    }

    pub(crate) fn parts(
        self,
    ) -> (
        Vec<(Uuid, u64)>,
        Vec<(Uuid, SettlementStatus)>,
        Vec<Swap>,
        Vec<TargetEdge>,
        Vec<(Uuid, EdgeStatus)>,
        Vec<Proposal>,
        Vec<PaymentTransaction>,
        Vec<EscrowAccount>,
    ) {
        (
            self.expected_swap_versions,
            self.expected_payment_status,
            self.swap_puts,
            self.edge_inserts,
            self.edge_status_updates,
            self.proposal_puts,
            self.payment_puts,
            self.escrow_puts,
        )
    }
}

/// Read-only snapshot of everything in the store, used by the
/// consistency validator
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub swaps: Vec<Swap>,
    pub edges: Vec<TargetEdge>,
    pub proposals: Vec<Proposal>,
    pub payments: Vec<PaymentTransaction>,
    pub escrows: Vec<EscrowAccount>,
}

/// Aggregate counters for the stats endpoint
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub open_swaps: u64,
    pub matched_swaps: u64,
    pub active_edges: u64,
    pub pending_proposals: u64,
    pub accepted_proposals: u64,
    pub pending_payments: u64,
    pub funded_payments: u64,
}

/// Storage operations for the core. Implementations must be thread-safe;
/// suspension happens only at this boundary.
#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn get_swap(&self, id: Uuid) -> CoreResult<Option<Swap>>;

    /// Register a brand-new swap. Fails with a conflict if the id exists.
    async fn insert_swap(&self, swap: Swap) -> CoreResult<()>;

    async fn list_swaps(&self) -> CoreResult<Vec<Swap>>;

    /// The current Active edge out of `source`, if any
    async fn active_edge(&self, source: Uuid) -> CoreResult<Option<TargetEdge>>;

    /// Target of the current Active edge out of `source`; one lookup of the
    /// chain walk
    async fn active_target(&self, source: Uuid) -> CoreResult<Option<Uuid>>;

    /// Every edge ever created from `source`, any status
    async fn edges_from(&self, source: Uuid) -> CoreResult<Vec<TargetEdge>>;

    async fn get_proposal(&self, id: Uuid) -> CoreResult<Option<Proposal>>;

    async fn proposals_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Proposal>>;

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<PaymentTransaction>>;

    async fn payment_for_proposal(&self, proposal_id: Uuid)
        -> CoreResult<Option<PaymentTransaction>>;

    async fn escrow_for_payment(&self, payment_id: Uuid) -> CoreResult<Option<EscrowAccount>>;

    /// Atomically verify every expectation and apply every write
    async fn commit(&self, batch: WriteBatch) -> Result<(), CommitError>;

    async fn snapshot(&self) -> CoreResult<StoreSnapshot>;

    async fn stats(&self) -> CoreResult<StoreStats>;
}
