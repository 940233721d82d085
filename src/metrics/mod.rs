//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Targeting edge churn and cycle rejections
//! - Proposal throughput and resolution outcomes
//! - Auction closes and open-auction backlog
//! - Settlement transitions
//! - Optimistic-concurrency conflicts and operation latency

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Targeting metrics
    pub static ref EDGE_OPS: IntCounterVec = register_int_counter_vec!(
        "swapmatch_edge_operations_total",
        "Total targeting edge operations by kind",
        &["op"]
    ).unwrap();

    pub static ref CYCLE_REJECTIONS: IntCounter = register_int_counter!(
        "swapmatch_cycle_rejections_total",
        "Total targeting attempts rejected for closing a cycle"
    ).unwrap();

    // Proposal metrics
    pub static ref PROPOSALS_CREATED: IntCounterVec = register_int_counter_vec!(
        "swapmatch_proposals_created_total",
        "Total proposals created by payment type",
        &["payment_type"]
    ).unwrap();

    pub static ref PROPOSALS_RESOLVED: IntCounterVec = register_int_counter_vec!(
        "swapmatch_proposals_resolved_total",
        "Total proposals reaching a terminal state by outcome",
        &["outcome"]
    ).unwrap();

    // Auction metrics
    pub static ref AUCTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        "swapmatch_auctions_closed_total",
        "Total auctions closed by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref OPEN_AUCTIONS: IntGauge = register_int_gauge!(
        "swapmatch_open_auctions",
        "Open auction swaps at the last sweep"
    ).unwrap();

    // Swap lifecycle metrics
    pub static ref SWAPS_CANCELLED: IntCounter = register_int_counter!(
        "swapmatch_swaps_cancelled_total",
        "Total swaps cancelled by their owner"
    ).unwrap();

    // Settlement metrics
    pub static ref SETTLEMENT_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "swapmatch_settlement_transitions_total",
        "Total payment/escrow transitions by target status",
        &["to"]
    ).unwrap();

    // Concurrency metrics
    pub static ref VERSION_CONFLICTS: IntCounterVec = register_int_counter_vec!(
        "swapmatch_version_conflicts_total",
        "Optimistic-version conflicts by operation",
        &["op"]
    ).unwrap();

    pub static ref OP_LATENCY: HistogramVec = register_histogram_vec!(
        "swapmatch_operation_latency_seconds",
        "End-to-end operation latency including retries",
        &["op"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_edge_op(op: &str) {
    EDGE_OPS.with_label_values(&[op]).inc();
}

pub fn record_cycle_rejection() {
    CYCLE_REJECTIONS.inc();
}

pub fn record_proposal_created(payment_type: &str) {
    PROPOSALS_CREATED.with_label_values(&[payment_type]).inc();
}

pub fn record_proposal_resolved(outcome: &str) {
    PROPOSALS_RESOLVED.with_label_values(&[outcome]).inc();
}

pub fn record_auction_closed(outcome: &str) {
    AUCTIONS_CLOSED.with_label_values(&[outcome]).inc();
}

pub fn set_open_auctions(count: i64) {
    OPEN_AUCTIONS.set(count);
}

pub fn record_swap_cancelled() {
    SWAPS_CANCELLED.inc();
}

pub fn record_settlement_transition(to: &str) {
    SETTLEMENT_TRANSITIONS.with_label_values(&[to]).inc();
}

pub fn record_version_conflict(op: &str) {
    VERSION_CONFLICTS.with_label_values(&[op]).inc();
}

pub fn op_timer(op: &str) -> HistogramTimer {
    OP_LATENCY.with_label_values(&[op]).start_timer()
}
