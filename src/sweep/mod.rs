//! Periodic auction sweep
//!
//! The external scheduler role: re-invokes the resolver's closing entry point
//! on an interval so auctions close even with no incoming traffic. The lazy
//! on-access path and this sweep call the same `close_auction`, so results
//! are identical regardless of trigger source.

use crate::metrics;
use crate::model::{AcceptanceStrategy, SwapStatus};
use crate::resolver::ProposalResolver;
use crate::store::SwapStore;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Closes due auctions on a fixed interval
pub struct AuctionSweeper {
    store: Arc<dyn SwapStore>,
    resolver: Arc<ProposalResolver>,
    sweep_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl AuctionSweeper {
    pub fn new(
        store: Arc<dyn SwapStore>,
        resolver: Arc<ProposalResolver>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            sweep_interval,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main sweep loop
    pub async fn run(&self) {
        let mut ticker = interval(self.sweep_interval);
        info!(interval_secs = self.sweep_interval.as_secs(), "auction sweeper started");

        loop {
            if *self.shutdown.read().await {
                break;
            }
            ticker.tick().await;
            match self.run_once().await {
                Ok(closed) if closed > 0 => {
                    info!(closed, "sweep closed due auctions");
                }
                Ok(_) => {}
                Err(e) => error!("auction sweep failed: {}", e),
            }
        }

        info!("auction sweeper stopped");
    }

    /// One sweep pass; returns how many auctions were closed
    pub async fn run_once(&self) -> crate::error::CoreResult<usize> {
        let now = Utc::now();
        let swaps = self.store.list_swaps().await?;

        let mut open_auctions = 0u64;
        let mut due = Vec::new();
        for swap in swaps {
            if swap.acceptance_strategy != AcceptanceStrategy::Auction
                || swap.status != SwapStatus::Open
            {
                continue;
            }
            open_auctions += 1;
            if let Some(end) = swap.auction_end_at {
                if end <= now {
                    due.push(swap.id);
                }
            }
        }
        metrics::set_open_auctions(open_auctions as i64);
        if due.is_empty() {
            return Ok(0);
        }
        debug!(due = due.len(), "closing due auctions");

        let results = join_all(
            due.iter()
                .map(|swap_id| self.resolver.close_auction(*swap_id)),
        )
        .await;

        let mut closed = 0;
        for (swap_id, result) in due.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    debug!(swap = %swap_id, outcome = outcome.name(), "sweep close");
                    closed += 1;
                }
                Err(e) => error!(swap = %swap_id, "sweep close failed: {}", e),
            }
        }
        Ok(closed)
    }

    /// Stop the sweep loop
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
