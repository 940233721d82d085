//! Domain model for swaps, targeting edges, proposals and settlement records
//!
//! Every status field is an exhaustive enum so transitions are checked by the
//! compiler rather than by string comparison. Eligibility rules live here as
//! pure functions returning typed results.

use crate::error::{CoreError, CoreResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a swap resolves competing proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStrategy {
    /// The first proposal the owner accepts wins immediately
    FirstMatch,
    /// Proposals accumulate until a deadline, then the best-ranked one wins
    Auction,
}

/// Payment types a swap can accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Booking,
    Cash,
}

impl PaymentType {
    /// Label for metrics
    pub fn name(&self) -> &'static str {
        match self {
            PaymentType::Booking => "booking",
            PaymentType::Cash => "cash",
        }
    }
}

/// Accepted cash bounds for a swap, in minor units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashRange {
    pub min_cents: i64,
    pub max_cents: i64,
    pub currency: String,
}

impl CashRange {
    pub fn contains(&self, amount_cents: i64) -> bool {
        amount_cents >= self.min_cents && amount_cents <= self.max_cents
    }
}

/// Swap lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Open,
    Matched,
    Cancelled,
    Expired,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SwapStatus::Open)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SwapStatus::Open => "open",
            SwapStatus::Matched => "matched",
            SwapStatus::Cancelled => "cancelled",
            SwapStatus::Expired => "expired",
        }
    }
}

/// An exchange listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub acceptance_strategy: AcceptanceStrategy,
    /// Present iff the strategy is Auction
    pub auction_end_at: Option<DateTime<Utc>>,
    pub payment_types: Vec<PaymentType>,
    pub cash_range: Option<CashRange>,
    pub status: SwapStatus,
    /// Bumped on every committed mutation touching this swap
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Swap {
    /// Build a new open swap, enforcing strategy/deadline coherence
    pub fn new(
        owner_id: Uuid,
        acceptance_strategy: AcceptanceStrategy,
        auction_end_at: Option<DateTime<Utc>>,
        payment_types: Vec<PaymentType>,
        cash_range: Option<CashRange>,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        match (acceptance_strategy, auction_end_at) {
            (AcceptanceStrategy::Auction, None) => {
                return Err(CoreError::Validation(
                    "auction swaps require an auction_end_at deadline".into(),
                ))
            }
            (AcceptanceStrategy::FirstMatch, Some(_)) => {
                return Err(CoreError::Validation(
                    "first-match swaps cannot carry an auction deadline".into(),
                ))
            }
            _ => {}
        }
        if payment_types.is_empty() {
            return Err(CoreError::Validation(
                "a swap must accept at least one payment type".into(),
            ));
        }
        if payment_types.contains(&PaymentType::Cash) {
            match &cash_range {
                None => {
                    return Err(CoreError::Validation(
                        "cash-accepting swaps require a cash range".into(),
                    ))
                }
                Some(r) if r.min_cents < 0 || r.max_cents < r.min_cents => {
                    return Err(CoreError::Validation(format!(
                        "invalid cash range {}..{}",
                        r.min_cents, r.max_cents
                    )))
                }
                _ => {}
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            acceptance_strategy,
            auction_end_at,
            payment_types,
            cash_range,
            status: SwapStatus::Open,
            version: 0,
            created_at: now,
        })
    }

    pub fn accepts(&self, payment_type: PaymentType) -> bool {
        self.payment_types.contains(&payment_type)
    }
}

/// Targeting edge lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Active,
    Superseded,
    Removed,
}

/// A directed "targets" pointer between two swaps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEdge {
    pub id: Uuid,
    pub source_swap_id: Uuid,
    pub target_swap_id: Uuid,
    pub status: EdgeStatus,
    pub created_at: DateTime<Utc>,
    /// Opaque audit reference supplied by the ledger service
    pub ledger_ref: Option<String>,
}

impl TargetEdge {
    pub fn new(
        source_swap_id: Uuid,
        target_swap_id: Uuid,
        now: DateTime<Utc>,
        ledger_ref: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_swap_id,
            target_swap_id,
            status: EdgeStatus::Active,
            created_at: now,
            ledger_ref,
        }
    }
}

/// Proposal lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
        }
    }
}

/// An offer submitted against a swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    /// The swap this proposal was submitted to
    pub source_swap_id: Uuid,
    /// The proposer's own swap whose active edge targets the source swap
    pub target_swap_id: Option<Uuid>,
    pub proposer_id: Uuid,
    /// Owner of the source swap, denormalized at creation; the responder
    pub target_owner_id: Uuid,
    pub payment_type: PaymentType,
    pub cash_amount_cents: Option<i64>,
    pub booking_ref: Option<Uuid>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub ledger_ref: Option<String>,
}

impl Proposal {
    pub fn accepted(mut self, by: Uuid, at: DateTime<Utc>) -> Self {
        self.status = ProposalStatus::Accepted;
        self.responded_by = Some(by);
        self.responded_at = Some(at);
        self.rejection_reason = None;
        self
    }

    pub fn rejected(mut self, by: Option<Uuid>, at: DateTime<Utc>, reason: &str) -> Self {
        self.status = ProposalStatus::Rejected;
        self.responded_by = by;
        self.responded_at = Some(at);
        self.rejection_reason = Some(reason.to_string());
        self
    }

    pub fn expired(mut self, at: DateTime<Utc>) -> Self {
        self.status = ProposalStatus::Expired;
        self.responded_at = Some(at);
        self
    }
}

/// What a caller submits to create a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSpec {
    pub payment_type: PaymentType,
    pub cash_amount_cents: Option<i64>,
    pub booking_ref: Option<Uuid>,
    /// Optional reference to the proposer's own swap (must actively target
    /// the swap being proposed to)
    pub counter_swap_id: Option<Uuid>,
}

/// Eligibility of a proposal spec against a swap, independent of time and
/// concurrency. Returns the first violated rule.
pub fn validate_proposal_spec(swap: &Swap, spec: &ProposalSpec) -> CoreResult<()> {
    if !swap.accepts(spec.payment_type) {
        return Err(CoreError::Validation(format!(
            "swap does not accept {} proposals",
            spec.payment_type.name()
        )));
    }
    match spec.payment_type {
        PaymentType::Cash => {
            let amount = spec.cash_amount_cents.ok_or_else(|| {
                CoreError::Validation("cash proposals require an amount".into())
            })?;
            let range = swap.cash_range.as_ref().ok_or_else(|| {
                CoreError::Validation("swap has no configured cash range".into())
            })?;
            if !range.contains(amount) {
                return Err(CoreError::Validation(format!(
                    "cash amount {} outside accepted range {}..{}",
                    amount, range.min_cents, range.max_cents
                )));
            }
        }
        PaymentType::Booking => {
            if spec.booking_ref.is_none() {
                return Err(CoreError::Validation(
                    "booking proposals require a booking reference".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Payment / escrow lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Funded,
    Released,
    Refunded,
}

impl SettlementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Released | SettlementStatus::Refunded)
    }

    /// Legal transitions: Pending -> Funded -> {Released, Refunded}
    pub fn can_transition_to(&self, to: SettlementStatus) -> bool {
        matches!(
            (self, to),
            (SettlementStatus::Pending, SettlementStatus::Funded)
                | (SettlementStatus::Funded, SettlementStatus::Released)
                | (SettlementStatus::Funded, SettlementStatus::Refunded)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Funded => "funded",
            SettlementStatus::Released => "released",
            SettlementStatus::Refunded => "refunded",
        }
    }
}

/// Payment obligation created when a cash proposal is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Held-funds record mirroring a payment transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub proposal_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of targeting history entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetingEventKind {
    Targeted,
    Retargeted,
    Removed,
}

/// Immutable history entry appended after every mutating targeting call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingEvent {
    pub kind: TargetingEventKind,
    pub source_swap_id: Uuid,
    pub target_swap_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cash_swap(min: i64, max: i64) -> Swap {
        Swap::new(
            Uuid::new_v4(),
            AcceptanceStrategy::FirstMatch,
            None,
            vec![PaymentType::Booking, PaymentType::Cash],
            Some(CashRange {
                min_cents: min,
                max_cents: max,
                currency: "USD".into(),
            }),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn auction_swap_requires_deadline() {
        let err = Swap::new(
            Uuid::new_v4(),
            AcceptanceStrategy::Auction,
            None,
            vec![PaymentType::Cash],
            Some(CashRange {
                min_cents: 0,
                max_cents: 100,
                currency: "USD".into(),
            }),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn cash_amount_must_be_in_range() {
        let swap = cash_swap(10_000, 50_000);
        let spec = ProposalSpec {
            payment_type: PaymentType::Cash,
            cash_amount_cents: Some(60_000),
            booking_ref: None,
            counter_swap_id: None,
        };
        assert!(matches!(
            validate_proposal_spec(&swap, &spec),
            Err(CoreError::Validation(_))
        ));

        let spec_ok = ProposalSpec {
            cash_amount_cents: Some(20_000),
            ..spec
        };
        assert!(validate_proposal_spec(&swap, &spec_ok).is_ok());
    }

    #[test]
    fn disallowed_payment_type_is_rejected() {
        let mut swap = cash_swap(0, 100);
        swap.payment_types = vec![PaymentType::Cash];
        let spec = ProposalSpec {
            payment_type: PaymentType::Booking,
            cash_amount_cents: None,
            booking_ref: Some(Uuid::new_v4()),
            counter_swap_id: None,
        };
        assert!(matches!(
            validate_proposal_spec(&swap, &spec),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn settlement_transitions() {
        use SettlementStatus::*;
        assert!(Pending.can_transition_to(Funded));
        assert!(Funded.can_transition_to(Released));
        assert!(Funded.can_transition_to(Refunded));
        assert!(!Funded.can_transition_to(Funded));
        assert!(!Released.can_transition_to(Funded));
        assert!(!Pending.can_transition_to(Released));
    }
}
