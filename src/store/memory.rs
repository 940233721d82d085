//! In-memory store
//!
//! A single `RwLock` over the record maps. The write section is memory-only
//! and bounded, so commits never hold a lock across I/O; linearizability per
//! swap comes from the version expectations checked inside the lock.

use super::{CommitError, StoreSnapshot, StoreStats, SwapStore, WriteBatch};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    EdgeStatus, EscrowAccount, PaymentTransaction, Proposal, ProposalStatus, SettlementStatus,
    Swap, SwapStatus, TargetEdge,
};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    swaps: HashMap<Uuid, Swap>,
    edges: HashMap<Uuid, TargetEdge>,
    /// source swap id -> edge ids, in creation order
    edges_by_source: HashMap<Uuid, Vec<Uuid>>,
    proposals: HashMap<Uuid, Proposal>,
    payments: HashMap<Uuid, PaymentTransaction>,
    escrows: HashMap<Uuid, EscrowAccount>,
}

/// In-memory [`SwapStore`] implementation
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn get_swap(&self, id: Uuid) -> CoreResult<Option<Swap>> {
        Ok(self.inner.read().await.swaps.get(&id).cloned())
    }

    async fn insert_swap(&self, swap: Swap) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.swaps.contains_key(&swap.id) {
            return Err(CoreError::Conflict(format!(
                "swap {} already registered",
                swap.id
            )));
        }
        inner.swaps.insert(swap.id, swap);
        Ok(())
    }

    async fn list_swaps(&self) -> CoreResult<Vec<Swap>> {
        Ok(self.inner.read().await.swaps.values().cloned().collect())
    }

    async fn active_edge(&self, source: Uuid) -> CoreResult<Option<TargetEdge>> {
        let inner = self.inner.read().await;
        Ok(find_active(&inner, source).cloned())
    }

    async fn active_target(&self, source: Uuid) -> CoreResult<Option<Uuid>> {
        let inner = self.inner.read().await;
        Ok(find_active(&inner, source).map(|e| e.target_swap_id))
    }

    async fn edges_from(&self, source: Uuid) -> CoreResult<Vec<TargetEdge>> {
        let inner = self.inner.read().await;
        Ok(inner
            .edges_by_source
            .get(&source)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.edges.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_proposal(&self, id: Uuid) -> CoreResult<Option<Proposal>> {
        Ok(self.inner.read().await.proposals.get(&id).cloned())
    }

    async fn proposals_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Proposal>> {
        let mut proposals: Vec<Proposal> = self
            .inner
            .read()
            .await
            .proposals
            .values()
            .filter(|p| p.source_swap_id == swap_id)
            .cloned()
            .collect();
        proposals.sort_by_key(|p| p.created_at);
        Ok(proposals)
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<PaymentTransaction>> {
        Ok(self.inner.read().await.payments.get(&id).cloned())
    }

    async fn payment_for_proposal(
        &self,
        proposal_id: Uuid,
    ) -> CoreResult<Option<PaymentTransaction>> {
        Ok(self
            .inner
            .read()
            .await
            .payments
            .values()
            .find(|p| p.proposal_id == proposal_id)
            .cloned())
    }

    async fn escrow_for_payment(&self, payment_id: Uuid) -> CoreResult<Option<EscrowAccount>> {
        Ok(self
            .inner
            .read()
            .await
            .escrows
            .values()
            .find(|e| e.payment_id == payment_id)
            .cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CommitError> {
        let (
            expected_versions,
            expected_payment_status,
            swap_puts,
            edge_inserts,
            edge_status_updates,
            proposal_puts,
            payment_puts,
            escrow_puts,
        ) = batch.parts();

        let mut inner = self.inner.write().await;

        // Verify every precondition before applying anything
        for (swap_id, version) in &expected_versions {
            match inner.swaps.get(swap_id) {
                Some(swap) if swap.version == *version => {}
                _ => return Err(CommitError::StaleVersion),
            }
        }
        for (payment_id, status) in &expected_payment_status {
            match inner.payments.get(payment_id) {
                Some(p) if p.status == *status => {}
                _ => return Err(CommitError::StaleVersion),
            }
        }

        for swap in swap_puts {
            inner.swaps.insert(swap.id, swap);
        }
        for edge in edge_inserts {
            inner
                .edges_by_source
                .entry(edge.source_swap_id)
                .or_default()
                .push(edge.id);
            inner.edges.insert(edge.id, edge);
        }
        for (edge_id, status) in edge_status_updates {
            if let Some(edge) = inner.edges.get_mut(&edge_id) {
                edge.status = status;
            }
        }
        for proposal in proposal_puts {
            inner.proposals.insert(proposal.id, proposal);
        }
        for payment in payment_puts {
            inner.payments.insert(payment.id, payment);
        }
        for escrow in escrow_puts {
            inner.escrows.insert(escrow.id, escrow);
        }

        Ok(())
    }

    async fn snapshot(&self) -> CoreResult<StoreSnapshot> {
        let inner = self.inner.read().await;
        Ok(StoreSnapshot {
            swaps: inner.swaps.values().cloned().collect(),
            edges: inner.edges.values().cloned().collect(),
            proposals: inner.proposals.values().cloned().collect(),
            payments: inner.payments.values().cloned().collect(),
            escrows: inner.escrows.values().cloned().collect(),
        })
    }

    async fn stats(&self) -> CoreResult<StoreStats> {
        let inner = self.inner.read().await;
        Ok(StoreStats {
            open_swaps: count(&inner.swaps, |s: &&Swap| s.status == SwapStatus::Open),
            matched_swaps: count(&inner.swaps, |s| s.status == SwapStatus::Matched),
            active_edges: count(&inner.edges, |e: &&TargetEdge| {
                e.status == EdgeStatus::Active
            }),
            pending_proposals: count(&inner.proposals, |p: &&Proposal| {
                p.status == ProposalStatus::Pending
            }),
            accepted_proposals: count(&inner.proposals, |p| p.status == ProposalStatus::Accepted),
            pending_payments: count(&inner.payments, |p: &&PaymentTransaction| {
                p.status == SettlementStatus::Pending
            }),
            funded_payments: count(&inner.payments, |p| p.status == SettlementStatus::Funded),
        })
    }
}

fn find_active(inner: &Inner, source: Uuid) -> Option<&TargetEdge> {
    inner.edges_by_source.get(&source).and_then(|ids| {
        ids.iter()
            .filter_map(|id| inner.edges.get(id))
            .find(|e| e.status == EdgeStatus::Active)
    })
}

fn count<K, V, F: Fn(&&V) -> bool>(map: &HashMap<K, V>, pred: F) -> u64 {
    map.values().filter(|v| pred(v)).count() as u64
}
