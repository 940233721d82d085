//! HTTP API for targeting, proposals, settlement callbacks and monitoring

use crate::audit::ConsistencyValidator;
use crate::auction::AuctionStatus;
use crate::config::ApiConfig;
use crate::error::CoreError;
use crate::model::{
    AcceptanceStrategy, CashRange, PaymentType, Proposal, ProposalSpec, Swap, TargetEdge,
    TargetingEvent,
};
use crate::resolver::ProposalResolver;
use crate::settlement::SettlementCoordinator;
use crate::store::SwapStore;
use crate::targeting::{Page, TargetingCoordinator};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SwapStore>,
    pub targeting: Arc<TargetingCoordinator>,
    pub resolver: Arc<ProposalResolver>,
    pub settlement: Arc<SettlementCoordinator>,
    pub validator: Arc<ConsistencyValidator>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router; split out so tests can drive it in-process
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/audit", get(run_audit))
        .route("/swaps", post(register_swap))
        .route("/swaps/:id", get(get_swap))
        .route("/swaps/:id/target", post(target_swap).delete(remove_target))
        .route("/swaps/:id/retarget", post(retarget_swap))
        .route("/swaps/:id/cancel", post(cancel_swap))
        .route("/swaps/:id/auction", get(get_auction_status))
        .route("/swaps/:id/history", get(list_history))
        .route("/swaps/:id/proposals", get(list_proposals).post(create_proposal))
        .route("/proposals/:id/accept", post(accept_proposal))
        .route("/proposals/:id/reject", post(reject_proposal))
        .route("/payments/:id/events", post(record_payment_event))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Aggregate store counters
async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.store.stats().await?;
    Ok(Json(StatsResponse {
        open_swaps: stats.open_swaps,
        matched_swaps: stats.matched_swaps,
        active_edges: stats.active_edges,
        pending_proposals: stats.pending_proposals,
        accepted_proposals: stats.accepted_proposals,
        pending_payments: stats.pending_payments,
        funded_payments: stats.funded_payments,
    }))
}

/// Run the consistency audit and return the report
async fn run_audit(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.validator.run().await?;
    Ok(Json(report))
}

async fn register_swap(
    State(state): State<AppState>,
    Json(req): Json<RegisterSwapRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let swap = Swap::new(
        req.owner_id,
        req.acceptance_strategy,
        req.auction_end_at,
        req.payment_types,
        req.cash_range,
        Utc::now(),
    )?;
    state.store.insert_swap(swap.clone()).await?;
    info!(swap = %swap.id, "swap registered");
    Ok((StatusCode::CREATED, Json(swap)))
}

async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Swap>, ApiError> {
    state.resolver.ensure_closed(id).await?;
    let swap = state
        .store
        .get_swap(id)
        .await?
        .ok_or(CoreError::NotFound { kind: "swap", id })?;
    Ok(Json(swap))
}

async fn target_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<TargetEdge>, ApiError> {
    let edge = state
        .targeting
        .target_swap(id, req.target_swap_id, req.user_id)
        .await?;
    Ok(Json(edge))
}

async fn retarget_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RetargetRequest>,
) -> Result<Json<TargetEdge>, ApiError> {
    let edge = state
        .targeting
        .retarget_swap(id, req.new_target_swap_id, req.user_id)
        .await?;
    Ok(Json(edge))
}

async fn remove_target(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<StatusCode, ApiError> {
    state.targeting.remove_target(id, req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Swap>, ApiError> {
    let swap = state.resolver.cancel_swap(id, req.user_id).await?;
    Ok(Json(swap))
}

async fn get_auction_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuctionStatus>, ApiError> {
    let status = state.resolver.get_auction_status(id).await?;
    Ok(Json(status))
}

async fn list_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<TargetingEvent>>, ApiError> {
    let page = state
        .targeting
        .list_targeting_history(id, params.page.unwrap_or(0));
    Ok(Json(page))
}

async fn list_proposals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Proposal>>, ApiError> {
    state.resolver.ensure_closed(id).await?;
    let proposals = state.store.proposals_for_swap(id).await?;
    Ok(Json(proposals))
}

async fn create_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = ProposalSpec {
        payment_type: req.payment_type,
        cash_amount_cents: req.cash_amount_cents,
        booking_ref: req.booking_ref,
        counter_swap_id: req.counter_swap_id,
    };
    let proposal = state
        .resolver
        .create_proposal(id, req.proposer_id, spec)
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

async fn accept_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Proposal>, ApiError> {
    let proposal = state.resolver.accept_proposal(id, req.user_id).await?;
    Ok(Json(proposal))
}

async fn reject_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Proposal>, ApiError> {
    let proposal = state
        .resolver
        .reject_proposal(id, req.user_id, req.reason)
        .await?;
    Ok(Json(proposal))
}

/// Payment gateway callback: funded / released / refunded
async fn record_payment_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PaymentEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = match req.event {
        GatewayEvent::Funded => state.settlement.record_funded(id).await?,
        GatewayEvent::Released => state.settlement.record_released(id).await?,
        GatewayEvent::Refunded => state.settlement.record_refunded(id).await?,
    };
    Ok(Json(payment))
}

// Request types

#[derive(Deserialize)]
struct RegisterSwapRequest {
    owner_id: Uuid,
    acceptance_strategy: AcceptanceStrategy,
    auction_end_at: Option<DateTime<Utc>>,
    payment_types: Vec<PaymentType>,
    cash_range: Option<CashRange>,
}

#[derive(Deserialize)]
struct TargetRequest {
    target_swap_id: Uuid,
    user_id: Uuid,
}

#[derive(Deserialize)]
struct RetargetRequest {
    new_target_swap_id: Uuid,
    user_id: Uuid,
}

#[derive(Deserialize)]
struct ActorRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct RejectRequest {
    user_id: Uuid,
    reason: String,
}

#[derive(Deserialize)]
struct PageParams {
    page: Option<usize>,
}

#[derive(Deserialize)]
struct CreateProposalRequest {
    proposer_id: Uuid,
    payment_type: PaymentType,
    cash_amount_cents: Option<i64>,
    booking_ref: Option<Uuid>,
    counter_swap_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct PaymentEventRequest {
    event: GatewayEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GatewayEvent {
    Funded,
    Released,
    Refunded,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct StatsResponse {
    open_swaps: u64,
    matched_swaps: u64,
    active_edges: u64,
    pending_proposals: u64,
    accepted_proposals: u64,
    pending_payments: u64,
    funded_payments: u64,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Maps core errors onto HTTP statuses
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            CoreError::Authorization { .. } => (StatusCode::FORBIDDEN, "authorization"),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            CoreError::Cycle { .. } => (StatusCode::CONFLICT, "cycle"),
            CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::Expired(_) => (StatusCode::GONE, "expired"),
            CoreError::Settlement { .. } => (StatusCode::CONFLICT, "settlement"),
            CoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };
        (
            status,
            Json(ErrorBody {
                error: code,
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
