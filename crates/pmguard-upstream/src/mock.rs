//! Scriptable in-memory [`TradingApi`] for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pmguard_core::OwnerRef;
use rust_decimal::Decimal;

use crate::api::{BoxFuture, TradingApi};
use crate::error::{UpstreamError, UpstreamResult};
use crate::types::{Balance, BetOutcome, BetRequest, Holding, OrderBook};

/// A recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    GetPositions(OwnerRef),
    GetOrderBook(String),
    PlaceBet(OwnerRef, BetRequest),
    GetBalance(OwnerRef),
}

/// Mock trading API.
///
/// Holdings and order books are persistent per owner/token until replaced.
/// Bet results are consumed from a queue; when empty, bets are accepted with
/// a generated `trade-N` reference.
#[derive(Debug, Default)]
pub struct MockTradingApi {
    calls: Mutex<Vec<MockCall>>,
    positions: Mutex<HashMap<OwnerRef, UpstreamResult<Vec<Holding>>>>,
    books: Mutex<HashMap<String, OrderBook>>,
    bet_results: Mutex<VecDeque<UpstreamResult<BetOutcome>>>,
    bet_delay: Mutex<Option<Duration>>,
    trade_seq: AtomicU64,
}

impl MockTradingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the holdings returned for an owner.
    pub fn set_positions(&self, owner: &OwnerRef, holdings: Vec<Holding>) {
        self.positions.lock().insert(owner.clone(), Ok(holdings));
    }

    /// Make holdings requests for an owner fail until replaced.
    pub fn fail_positions(&self, owner: &OwnerRef, error: UpstreamError) {
        self.positions.lock().insert(owner.clone(), Err(error));
    }

    pub fn set_order_book(&self, book: OrderBook) {
        self.books.lock().insert(book.token_id.clone(), book);
    }

    /// Queue the result of the next bet.
    pub fn push_bet_result(&self, result: UpstreamResult<BetOutcome>) {
        self.bet_results.lock().push_back(result);
    }

    /// Delay every bet by `delay` before answering.
    pub fn set_bet_delay(&self, delay: Option<Duration>) {
        *self.bet_delay.lock() = delay;
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Bets submitted so far.
    pub fn bets(&self) -> Vec<(OwnerRef, BetRequest)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::PlaceBet(owner, req) => Some((owner.clone(), req.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }
}

impl TradingApi for MockTradingApi {
    fn get_positions<'a>(
        &'a self,
        owner: &'a OwnerRef,
    ) -> BoxFuture<'a, UpstreamResult<Vec<Holding>>> {
        Box::pin(async move {
            self.record(MockCall::GetPositions(owner.clone()));
            self.positions
                .lock()
                .get(owner)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        })
    }

    fn get_order_book<'a>(&'a self, token_id: &'a str) -> BoxFuture<'a, UpstreamResult<OrderBook>> {
        Box::pin(async move {
            self.record(MockCall::GetOrderBook(token_id.to_string()));
            Ok(self
                .books
                .lock()
                .get(token_id)
                .cloned()
                .unwrap_or_else(|| OrderBook {
                    token_id: token_id.to_string(),
                    ..Default::default()
                }))
        })
    }

    fn place_bet<'a>(
        &'a self,
        owner: &'a OwnerRef,
        request: BetRequest,
    ) -> BoxFuture<'a, UpstreamResult<BetOutcome>> {
        Box::pin(async move {
            self.record(MockCall::PlaceBet(owner.clone(), request));
            let delay = *self.bet_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.bet_results.lock().pop_front();
            scripted.unwrap_or_else(|| {
                let n = self.trade_seq.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(BetOutcome::Accepted {
                    trade_ref: format!("trade-{n}"),
                })
            })
        })
    }

    fn get_balance<'a>(&'a self, owner: &'a OwnerRef) -> BoxFuture<'a, UpstreamResult<Balance>> {
        Box::pin(async move {
            self.record(MockCall::GetBalance(owner.clone()));
            Ok(Balance {
                available: Decimal::ZERO,
                currency: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmguard_core::Size;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scripted_bets_then_default() {
        let api = MockTradingApi::new();
        let owner = OwnerRef::new("alice");
        api.push_bet_result(Err(UpstreamError::Timeout(100)));

        let req = BetRequest::sell("m", "t", Size::new(dec!(5)));
        assert!(api.place_bet(&owner, req.clone()).await.is_err());
        assert_eq!(
            api.place_bet(&owner, req).await.unwrap(),
            BetOutcome::Accepted {
                trade_ref: "trade-1".to_string()
            }
        );
        assert_eq!(api.bets().len(), 2);
    }

    #[tokio::test]
    async fn test_positions_failure_persists() {
        let api = MockTradingApi::new();
        let owner = OwnerRef::new("alice");
        api.fail_positions(&owner, UpstreamError::Network("down".to_string()));
        assert!(api.get_positions(&owner).await.is_err());
        assert!(api.get_positions(&owner).await.is_err());
        assert_eq!(api.call_count(), 2);
    }
}
