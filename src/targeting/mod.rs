//! Targeting operations
//!
//! Public target/retarget/remove entry points. Each call verifies ownership,
//! delegates edge bookkeeping to [`TargetGraphStore`] under the bounded retry
//! discipline, then appends history and dispatches notifications after the
//! commit has landed.

pub mod history;

pub use history::{HistoryLog, Page};

use crate::error::{CoreError, CoreResult};
use crate::external::{LedgerClient, LedgerEntry, Notification, NotificationDispatcher};
use crate::graph::TargetGraphStore;
use crate::metrics;
use crate::model::{Swap, SwapStatus, TargetEdge, TargetingEvent, TargetingEventKind};
use crate::retry::{run_tx, RetryPolicy, TxError};
use crate::store::SwapStore;

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Coordinates mutations of the targeting graph
pub struct TargetingCoordinator {
    store: Arc<dyn SwapStore>,
    graph: TargetGraphStore,
    history: Arc<HistoryLog>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn NotificationDispatcher>,
    retry: RetryPolicy,
}

impl TargetingCoordinator {
    pub fn new(
        store: Arc<dyn SwapStore>,
        history: Arc<HistoryLog>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn NotificationDispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            graph: TargetGraphStore::new(store.clone()),
            store,
            history,
            ledger,
            notifier,
            retry,
        }
    }

    /// Point `source` at `target`
    pub async fn target_swap(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        acting_user_id: Uuid,
    ) -> CoreResult<TargetEdge> {
        let ledger_ref = self.ledger_ref("swap_targeted", source_id, acting_user_id).await;
        let edge = run_tx(&self.retry, "target_swap", || {
            let ledger_ref = ledger_ref.clone();
            async move {
                let source = self.load_owned_open(source_id, acting_user_id).await?;
                self.load_open_target(target_id).await?;
                self.graph
                    .try_add_edge(&source, target_id, ledger_ref, Utc::now())
                    .await
            }
        })
        .await?;

        metrics::record_edge_op("targeted");
        self.record_history(TargetingEventKind::Targeted, source_id, Some(target_id), acting_user_id);
        self.notifier
            .dispatch(Notification::SwapTargeted {
                source_swap_id: source_id,
                target_swap_id: target_id,
            })
            .await;
        info!(source = %source_id, target = %target_id, "swap targeted");
        Ok(edge)
    }

    /// Replace the current target of `source` with `new_target`
    pub async fn retarget_swap(
        &self,
        source_id: Uuid,
        new_target_id: Uuid,
        acting_user_id: Uuid,
    ) -> CoreResult<TargetEdge> {
        let ledger_ref = self.ledger_ref("swap_retargeted", source_id, acting_user_id).await;
        let edge = run_tx(&self.retry, "retarget_swap", || {
            let ledger_ref = ledger_ref.clone();
            async move {
                let source = self.load_owned_open(source_id, acting_user_id).await?;
                self.load_open_target(new_target_id).await?;
                self.graph
                    .try_supersede(&source, new_target_id, ledger_ref, Utc::now())
                    .await
            }
        })
        .await?;

        metrics::record_edge_op("retargeted");
        self.record_history(
            TargetingEventKind::Retargeted,
            source_id,
            Some(new_target_id),
            acting_user_id,
        );
        self.notifier
            .dispatch(Notification::SwapTargeted {
                source_swap_id: source_id,
                target_swap_id: new_target_id,
            })
            .await;
        info!(source = %source_id, target = %new_target_id, "swap retargeted");
        Ok(edge)
    }

    /// Drop the current target of `source`, if any
    pub async fn remove_target(&self, source_id: Uuid, acting_user_id: Uuid) -> CoreResult<()> {
        let removed = run_tx(&self.retry, "remove_target", || async move {
            let source = self.load_swap(source_id).await?;
            if source.owner_id != acting_user_id {
                return Err(TxError::Fatal(CoreError::unauthorized(
                    acting_user_id,
                    format!("modify swap {}", source_id),
                )));
            }
            self.graph.try_remove_edge(&source).await
        })
        .await?;

        if let Some(edge) = removed {
            metrics::record_edge_op("removed");
            self.record_history(TargetingEventKind::Removed, source_id, None, acting_user_id);
            self.notifier
                .dispatch(Notification::TargetRemoved {
                    source_swap_id: source_id,
                    target_swap_id: edge.target_swap_id,
                })
                .await;
            info!(source = %source_id, "target removed");
        }
        Ok(())
    }

    /// Targeting history for a swap, newest first
    pub fn list_targeting_history(&self, swap_id: Uuid, page: usize) -> Page<TargetingEvent> {
        self.history.list(swap_id, page)
    }

    async fn load_swap(&self, id: Uuid) -> Result<Swap, TxError> {
        self.store
            .get_swap(id)
            .await?
            .ok_or_else(|| TxError::Fatal(CoreError::not_found("swap", id)))
    }

    async fn load_owned_open(&self, id: Uuid, acting_user_id: Uuid) -> Result<Swap, TxError> {
        let swap = self.load_swap(id).await?;
        if swap.owner_id != acting_user_id {
            return Err(TxError::Fatal(CoreError::unauthorized(
                acting_user_id,
                format!("modify swap {}", id),
            )));
        }
        if swap.status != SwapStatus::Open {
            return Err(TxError::Fatal(CoreError::Validation(format!(
                "swap {} is {}",
                id,
                swap.status.name()
            ))));
        }
        Ok(swap)
    }

    async fn load_open_target(&self, id: Uuid) -> Result<Swap, TxError> {
        let swap = self.load_swap(id).await?;
        if swap.status != SwapStatus::Open {
            return Err(TxError::Fatal(CoreError::Validation(format!(
                "target swap {} is {}",
                id,
                swap.status.name()
            ))));
        }
        Ok(swap)
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

    fn record_history(
        &self,
        kind: TargetingEventKind,
        source_swap_id: Uuid,
        target_swap_id: Option<Uuid>,
        actor_id: Uuid,
    ) {
        self.history.append(TargetingEvent {
            kind,
            source_swap_id,
            target_swap_id,
            actor_id,
            at: Utc::now(),
        });
    }
}
