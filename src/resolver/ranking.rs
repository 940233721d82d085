//! Auction ranking policy
//!
//! Cash proposals outrank booking proposals when a swap accepts both types.
//! Within cash, higher amounts rank first and earlier submission breaks
//! ties; booking proposals rank first-received.

use crate::model::{PaymentType, Proposal};

use std::cmp::Ordering;

/// Order two proposals, best first
pub fn compare(a: &Proposal, b: &Proposal) -> Ordering {
    match (a.payment_type, b.payment_type) {
        (PaymentType::Cash, PaymentType::Booking) => Ordering::Less,
        (PaymentType::Booking, PaymentType::Cash) => Ordering::Greater,
        (PaymentType::Cash, PaymentType::Cash) => {
            let amount_a = a.cash_amount_cents.unwrap_or(0);
            let amount_b = b.cash_amount_cents.unwrap_or(0);
            amount_b
                .cmp(&amount_a)
                .then_with(|| a.created_at.cmp(&b.created_at))
        }
        (PaymentType::Booking, PaymentType::Booking) => a.created_at.cmp(&b.created_at),
    }
}

/// The winning proposal among the given pending set, if any
pub fn select_winner(pending: &[Proposal]) -> Option<&Proposal> {
    pending.iter().min_by(|a, b| compare(a, b))
}
