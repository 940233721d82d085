//! Auction time-window evaluation
//!
//! Pure functions of `(now, auction_end_at)`. No stored state; the resolver
//! and the sweeper both gate on these.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Whether an auction window is open and how much time remains
#[derive(Debug, Clone, Serialize)]
pub struct AuctionStatus {
    pub is_open: bool,
    /// Whole seconds remaining; zero once the window has closed
    pub seconds_remaining: i64,
}

/// Evaluate an auction window. The window is open strictly before
/// `auction_end_at`; at the deadline and after, it is closed.
pub fn evaluate(now: DateTime<Utc>, auction_end_at: DateTime<Utc>) -> AuctionStatus {
    let remaining = auction_end_at - now;
    if remaining > Duration::zero() {
        AuctionStatus {
            is_open: true,
            seconds_remaining: remaining.num_seconds(),
        }
    } else {
        AuctionStatus {
            is_open: false,
            seconds_remaining: 0,
        }
    }
}

/// Convenience check used on hot paths
pub fn is_open(now: DateTime<Utc>, auction_end_at: DateTime<Utc>) -> bool {
    auction_end_at > now
}
