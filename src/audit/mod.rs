//! Consistency audit
//!
//! Re-checks the targeting and resolution invariants over a store snapshot.
//! Read-only; used for diagnostics and by tests.

use crate::error::CoreResult;
use crate::model::{EdgeStatus, ProposalStatus, SettlementStatus, SwapStatus};
use crate::store::SwapStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A single invariant violation found in the store
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    DuplicateActiveEdge { source_swap_id: Uuid, count: usize },
    SelfTargetEdge { edge_id: Uuid, swap_id: Uuid },
    EdgeCycle { swap_ids: Vec<Uuid> },
    OrphanEdge { edge_id: Uuid, missing_swap_id: Uuid },
    MultipleAcceptedProposals { swap_id: Uuid, count: usize },
    MatchedWithoutAcceptedProposal { swap_id: Uuid },
    AcceptedCashWithoutPayment { proposal_id: Uuid },
    PaymentWithoutAcceptedProposal { payment_id: Uuid, proposal_id: Uuid },
    EscrowStatusDivergence { payment_id: Uuid, escrow_id: Uuid },
}

/// Result of one audit pass
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub checked_at: DateTime<Utc>,
    pub swaps_checked: usize,
    pub edges_checked: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Re-checks invariants over a snapshot of the store
pub struct ConsistencyValidator {
    store: Arc<dyn SwapStore>,
}

impl ConsistencyValidator {
    pub fn new(store: Arc<dyn SwapStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> CoreResult<AuditReport> {
        let snapshot = self.store.snapshot().await?;
        let mut violations = Vec::new();

        let swap_ids: HashSet<Uuid> = snapshot.swaps.iter().map(|s| s.id).collect();
        let active: Vec<_> = snapshot
            .edges
            .iter()
            .filter(|e| e.status == EdgeStatus::Active)
            .collect();

        // Out-degree and edge shape
        let mut out_counts: HashMap<Uuid, usize> = HashMap::new();
        for edge in &active {
            *out_counts.entry(edge.source_swap_id).or_default() += 1;
            if edge.source_swap_id == edge.target_swap_id {
                violations.push(Violation::SelfTargetEdge {
                    edge_id: edge.id,
                    swap_id: edge.source_swap_id,
                });
            }
            for endpoint in [edge.source_swap_id, edge.target_swap_id] {
                if !swap_ids.contains(&endpoint) {
                    violations.push(Violation::OrphanEdge {
                        edge_id: edge.id,
                        missing_swap_id: endpoint,
                    });
                }
            }
        }
        for (source, count) in out_counts.iter() {
            if *count > 1 {
                violations.push(Violation::DuplicateActiveEdge {
                    source_swap_id: *source,
                    count: *count,
                });
            }
        }

        // Cycle detection over the active edge set: follow each chain; a
        // node revisited within one walk closes a cycle
        let successors: HashMap<Uuid, Uuid> = active
            .iter()
            .map(|e| (e.source_swap_id, e.target_swap_id))
            .collect();
        let mut cleared: HashSet<Uuid> = HashSet::new();
        let mut reported: HashSet<Uuid> = HashSet::new();
        for start in successors.keys() {
            if cleared.contains(start) {
                continue;
            }
            let mut seen: Vec<Uuid> = Vec::new();
            let mut seen_set: HashSet<Uuid> = HashSet::new();
            let mut current = *start;
            loop {
                if seen_set.contains(&current) {
                    let loop_start = seen.iter().position(|id| *id == current).unwrap_or(0);
                    let cycle: Vec<Uuid> = seen[loop_start..].to_vec();
                    if cycle.iter().any(|id| !reported.contains(id)) {
                        reported.extend(cycle.iter().copied());
                        violations.push(Violation::EdgeCycle { swap_ids: cycle });
                    }
                    break;
                }
                seen.push(current);
                seen_set.insert(current);
                match successors.get(&current) {
                    Some(next) => current = *next,
                    None => break,
                }
            }
            cleared.extend(seen);
        }

        // Proposal resolution invariants
        let mut accepted_by_swap: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for proposal in &snapshot.proposals {
            if proposal.status == ProposalStatus::Accepted {
                accepted_by_swap
                    .entry(proposal.source_swap_id)
                    .or_default()
                    .push(proposal.id);
            }
        }
        for (swap_id, accepted) in accepted_by_swap.iter() {
            if accepted.len() > 1 {
                violations.push(Violation::MultipleAcceptedProposals {
                    swap_id: *swap_id,
                    count: accepted.len(),
                });
            }
        }
        for swap in &snapshot.swaps {
            if swap.status == SwapStatus::Matched && !accepted_by_swap.contains_key(&swap.id) {
                violations.push(Violation::MatchedWithoutAcceptedProposal { swap_id: swap.id });
            }
        }

        // Settlement invariants
        let payments_by_proposal: HashMap<Uuid, &crate::model::PaymentTransaction> = snapshot
            .payments
            .iter()
            .map(|p| (p.proposal_id, p))
            .collect();
        for proposal in &snapshot.proposals {
            if proposal.status == ProposalStatus::Accepted
                && proposal.payment_type == crate::model::PaymentType::Cash
                && !payments_by_proposal.contains_key(&proposal.id)
            {
                violations.push(Violation::AcceptedCashWithoutPayment {
                    proposal_id: proposal.id,
                });
            }
        }
        let accepted_ids: HashSet<Uuid> = snapshot
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Accepted)
            .map(|p| p.id)
            .collect();
        for payment in &snapshot.payments {
            if !accepted_ids.contains(&payment.proposal_id) {
                violations.push(Violation::PaymentWithoutAcceptedProposal {
                    payment_id: payment.id,
                    proposal_id: payment.proposal_id,
                });
            }
        }
        let payment_status: HashMap<Uuid, SettlementStatus> =
            snapshot.payments.iter().map(|p| (p.id, p.status)).collect();
        for escrow in &snapshot.escrows {
            if payment_status.get(&escrow.payment_id) != Some(&escrow.status) {
                violations.push(Violation::EscrowStatusDivergence {
                    payment_id: escrow.payment_id,
                    escrow_id: escrow.id,
                });
            }
        }

        if !violations.is_empty() {
            warn!(count = violations.len(), "consistency audit found violations");
        }
        Ok(AuditReport {
            checked_at: Utc::now(),
            swaps_checked: snapshot.swaps.len(),
            edges_checked: snapshot.edges.len(),
            violations,
        })
    }
}
