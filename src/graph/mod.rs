//! Targeting edge graph over the store
//!
//! Maintains the directed "targets" edges between swaps. Invariants: at most
//! one Active edge per source swap, and the Active edge set contains no
//! directed cycle. Out-degree is at most one, so cycle detection is a chain
//! walk from the proposed target, bounded by chain length rather than graph
//! size.
//!
//! Every edge mutation bumps its source swap's version, and every edge write
//! commits with the expected version of each swap its cycle walk visited.
//! Two concurrent writes that could jointly close a cycle therefore share a
//! walked node and one of them is forced to re-validate; writes on disjoint
//! chains share no expectations and never contend.

use crate::error::CoreError;
use crate::model::{EdgeStatus, Swap, TargetEdge};
use crate::retry::TxError;
use crate::store::{SwapStore, WriteBatch};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Hop bound for the chain walk. Unreachable while the acyclicity invariant
/// holds; exceeding it means the chain mutated underneath the walk.
const MAX_WALK_HOPS: usize = 16_384;

/// Edge operations with duplicate, self-target and cycle enforcement
pub struct TargetGraphStore {
    store: Arc<dyn SwapStore>,
}

impl TargetGraphStore {
    pub fn new(store: Arc<dyn SwapStore>) -> Self {
        Self { store }
    }

    /// One optimistic attempt to create `source -> target`. The commit is
    /// conditioned on the source swap version and the version of every swap
    /// the cycle walk visited, so a concurrent edge write anywhere along the
    /// chain forces a re-validation.
    pub(crate) async fn try_add_edge(
        &self,
        source: &Swap,
        target_id: Uuid,
        ledger_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TargetEdge, TxError> {
        if source.id == target_id {
            return Err(TxError::Fatal(CoreError::Validation(
                "a swap cannot target itself".into(),
            )));
        }
        if self.store.active_edge(source.id).await?.is_some() {
            return Err(TxError::Fatal(CoreError::Conflict(format!(
                "swap {} already has an active target",
                source.id
            ))));
        }
        let walked = self.walk_chain(source.id, target_id).await?;

        let edge = TargetEdge::new(source.id, target_id, now, ledger_ref);
        let mut bumped = source.clone();
        bumped.version += 1;
        self.store
            .commit(
                WriteBatch::new()
                    .expect_swap_version(source.id, source.version)
                    .expect_swap_versions(&walked)
                    .put_swap(bumped)
                    .insert_edge(edge.clone()),
            )
            .await?;
        debug!(source = %source.id, target = %target_id, "edge created");
        Ok(edge)
    }

    /// One optimistic attempt to mark the current Active edge Removed.
    /// Returns the removed edge, or None when there was nothing to remove.
    pub(crate) async fn try_remove_edge(
        &self,
        source: &Swap,
    ) -> Result<Option<TargetEdge>, TxError> {
        let Some(edge) = self.store.active_edge(source.id).await? else {
            return Ok(None);
        };
        let mut bumped = source.clone();
        bumped.version += 1;
        self.store
            .commit(
                WriteBatch::new()
                    .expect_swap_version(source.id, source.version)
                    .put_swap(bumped)
                    .set_edge_status(edge.id, EdgeStatus::Removed),
            )
            .await?;
        debug!(source = %source.id, "edge removed");
        Ok(Some(edge))
    }

    /// One optimistic attempt to supersede the Active edge with
    /// `source -> new_target`. Both writes land in one batch: if the new edge
    /// would cycle nothing is applied and the original edge stays Active.
    pub(crate) async fn try_supersede(
        &self,
        source: &Swap,
        new_target_id: Uuid,
        ledger_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TargetEdge, TxError> {
        if source.id == new_target_id {
            return Err(TxError::Fatal(CoreError::Validation(
                "a swap cannot target itself".into(),
            )));
        }
        let old = self.store.active_edge(source.id).await?.ok_or_else(|| {
            TxError::Fatal(CoreError::not_found("active target edge for swap", source.id))
        })?;
        if old.target_swap_id == new_target_id {
            return Err(TxError::Fatal(CoreError::Conflict(format!(
                "swap {} already targets {}",
                source.id, new_target_id
            ))));
        }
        let walked = self.walk_chain(source.id, new_target_id).await?;

        let edge = TargetEdge::new(source.id, new_target_id, now, ledger_ref);
        let mut bumped = source.clone();
        bumped.version += 1;
        self.store
            .commit(
                WriteBatch::new()
                    .expect_swap_version(source.id, source.version)
                    .expect_swap_versions(&walked)
                    .put_swap(bumped)
                    .set_edge_status(old.id, EdgeStatus::Superseded)
                    .insert_edge(edge.clone()),
            )
            .await?;
        debug!(source = %source.id, target = %new_target_id, "edge superseded");
        Ok(edge)
    }

    /// Walk the active chain starting at `start`; reaching `source` closes a
    /// cycle. O(chain length) lookups. Returns the version of every visited
    /// swap so the commit can detect any concurrent change to the chain.
    async fn walk_chain(
        &self,
        source: Uuid,
        start: Uuid,
    ) -> Result<Vec<(Uuid, u64)>, TxError> {
        let mut walked = Vec::new();
        let mut current = start;
        loop {
            let Some(swap) = self.store.get_swap(current).await? else {
                // Dangling chain tail; the audit pass reports these
                break;
            };
            walked.push((current, swap.version));
            match self.store.active_target(current).await? {
                None => break,
                Some(next) if next == source => {
                    crate::metrics::record_cycle_rejection();
                    return Err(TxError::Fatal(CoreError::Cycle {
                        source_id: source,
                        target_id: start,
                    }));
                }
                Some(next) => current = next,
            }
            if walked.len() > MAX_WALK_HOPS {
                return Err(TxError::Unavailable(
                    "targeting chain changed during cycle check".into(),
                ));
            }
        }
        Ok(walked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AcceptanceStrategy, PaymentType, SwapStatus};
    use crate::store::MemoryStore;

    async fn seeded(n: usize) -> (Arc<MemoryStore>, Vec<Swap>) {
        let store = Arc::new(MemoryStore::new());
        let mut swaps = Vec::new();
        for _ in 0..n {
            let swap = Swap::new(
                Uuid::new_v4(),
                AcceptanceStrategy::FirstMatch,
                None,
                vec![PaymentType::Booking],
                None,
                Utc::now(),
            )
            .unwrap();
            store.insert_swap(swap.clone()).await.unwrap();
            swaps.push(swap);
        }
        (store, swaps)
    }

    #[tokio::test]
    async fn rejects_self_target() {
        let (store, swaps) = seeded(1).await;
        let graph = TargetGraphStore::new(store);
        let err = graph
            .try_add_edge(&swaps[0], swaps[0].id, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Fatal(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_duplicate_active_edge() {
        let (store, swaps) = seeded(3).await;
        let graph = TargetGraphStore::new(store.clone());
        graph
            .try_add_edge(&swaps[0], swaps[1].id, None, Utc::now())
            .await
            .unwrap();
        let source = store.get_swap(swaps[0].id).await.unwrap().unwrap();
        let err = graph
            .try_add_edge(&source, swaps[2].id, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Fatal(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn two_node_cycle_is_rejected_and_edges_unchanged() {
        let (store, swaps) = seeded(2).await;
        let graph = TargetGraphStore::new(store.clone());
        graph
            .try_add_edge(&swaps[0], swaps[1].id, None, Utc::now())
            .await
            .unwrap();

        let back_source = store.get_swap(swaps[1].id).await.unwrap().unwrap();
        let err = graph
            .try_add_edge(&back_source, swaps[0].id, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Fatal(CoreError::Cycle { .. })));

        // B gained no edge; A -> B is still the only active edge
        assert!(store.active_edge(swaps[1].id).await.unwrap().is_none());
        assert_eq!(
            store.active_target(swaps[0].id).await.unwrap(),
            Some(swaps[1].id)
        );
    }

    #[tokio::test]
    async fn long_chain_cycle_is_rejected() {
        let (store, swaps) = seeded(5).await;
        let graph = TargetGraphStore::new(store.clone());
        // 0 -> 1 -> 2 -> 3 -> 4
        for i in 0..4 {
            let source = store.get_swap(swaps[i].id).await.unwrap().unwrap();
            graph
                .try_add_edge(&source, swaps[i + 1].id, None, Utc::now())
                .await
                .unwrap();
        }
        // 4 -> 0 closes the loop
        let tail = store.get_swap(swaps[4].id).await.unwrap().unwrap();
        let err = graph
            .try_add_edge(&tail, swaps[0].id, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Fatal(CoreError::Cycle { .. })));
    }

    #[tokio::test]
    async fn cycling_supersede_rolls_back_whole_operation() {
        let (store, swaps) = seeded(3).await;
        let graph = TargetGraphStore::new(store.clone());
        // 0 -> 1, 2 -> 0
        let s0 = store.get_swap(swaps[0].id).await.unwrap().unwrap();
        graph.try_add_edge(&s0, swaps[1].id, None, Utc::now()).await.unwrap();
        let s2 = store.get_swap(swaps[2].id).await.unwrap().unwrap();
        graph.try_add_edge(&s2, swaps[0].id, None, Utc::now()).await.unwrap();

        // Retargeting 0 at 2 would form 0 -> 2 -> 0
        let s0 = store.get_swap(swaps[0].id).await.unwrap().unwrap();
        let err = graph
            .try_supersede(&s0, swaps[2].id, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Fatal(CoreError::Cycle { .. })));

        // Original edge still active, nothing superseded
        assert_eq!(
            store.active_target(swaps[0].id).await.unwrap(),
            Some(swaps[1].id)
        );
        let statuses: Vec<_> = store
            .edges_from(swaps[0].id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![EdgeStatus::Active]);
    }

    #[tokio::test]
    async fn remove_edge_without_active_edge_is_noop() {
        let (store, swaps) = seeded(1).await;
        let graph = TargetGraphStore::new(store.clone());
        assert!(graph.try_remove_edge(&swaps[0]).await.unwrap().is_none());
        let current = store.get_swap(swaps[0].id).await.unwrap().unwrap();
        assert_eq!(current.status, SwapStatus::Open);
        assert_eq!(current.version, 0);
    }
}
