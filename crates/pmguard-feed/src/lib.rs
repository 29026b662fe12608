//! Price feed for pmguard.
//!
//! Streamed midpoints land in an owned TTL cache; when no fresh streamed
//! price exists the feed pulls the order book and computes the midpoint.

pub mod cache;
pub mod error;
pub mod feed;
pub mod midpoint;
pub mod parser;

pub use cache::{CachedPrice, PriceCache};
pub use error::{FeedError, FeedResult};
pub use feed::{PriceFeed, PriceSource};
pub use midpoint::{book_midpoint, midpoint};
pub use parser::{parse_market_message, PriceUpdate};
