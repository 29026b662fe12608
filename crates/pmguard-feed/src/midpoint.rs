//! Midpoint pricing from best bid / best ask.

use pmguard_core::Price;
use pmguard_upstream::OrderBook;

/// Midpoint of the best levels.
///
/// Both sides: their average. One side: that side. Neither: unavailable.
/// A result outside `(0, 1]` is rejected as unavailable.
pub fn midpoint(best_bid: Option<Price>, best_ask: Option<Price>) -> Option<Price> {
    let bid = best_bid.filter(Price::is_positive);
    let ask = best_ask.filter(Price::is_positive);
    let mid = match (bid, ask) {
        (Some(b), Some(a)) => b.midpoint(a),
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    mid.is_quotable().then_some(mid)
}

/// Midpoint of an order book snapshot.
pub fn book_midpoint(book: &OrderBook) -> Option<Price> {
    midpoint(book.best_bid(), book.best_ask())
}
