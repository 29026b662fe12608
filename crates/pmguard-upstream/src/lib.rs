//! Upstream trading API boundary.
//!
//! - `TradingApi`: dyn-compatible trait over holdings, order books, bets and balance
//! - `HttpTradingApi`: reqwest implementation
//! - `normalize`: the single place raw response envelopes are interpreted
//! - `UpstreamError`: typed failures with permanent/transient classification
//! - `MockTradingApi`: scriptable implementation for tests

pub mod api;
pub mod error;
pub mod mock;
pub mod normalize;
pub mod types;

pub use api::{with_timeout, BoxFuture, DynTradingApi, HttpApiConfig, HttpTradingApi, TradingApi};
pub use error::{UpstreamError, UpstreamResult};
pub use mock::{MockCall, MockTradingApi};
pub use types::{Balance, BetOutcome, BetRequest, BookLevel, Holding, OrderBook};
