//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pmguard_core::{OwnerRef, Price, RuleAction, RuleSpec, Size, TradeRule};
use pmguard_engine::{MonitoringWorker, RuleExecutor, WorkerConfig};
use pmguard_feed::{PriceCache, PriceFeed};
use pmguard_position::PositionTracker;
use pmguard_risk::{CircuitBreaker, CircuitBreakerConfig};
use pmguard_store::{EventLog, RuleStore};
use pmguard_upstream::{BookLevel, Holding, MockTradingApi, OrderBook};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Harness {
    pub api: Arc<MockTradingApi>,
    pub store: Arc<RuleStore>,
    pub tracker: Arc<PositionTracker>,
    pub feed: Arc<PriceFeed>,
    pub worker: Arc<MonitoringWorker>,
}

pub fn harness() -> Harness {
    harness_with(WorkerConfig::default(), CircuitBreakerConfig::default())
}

pub fn harness_with(config: WorkerConfig, breaker: CircuitBreakerConfig) -> Harness {
    let api = Arc::new(MockTradingApi::new());
    let store = Arc::new(RuleStore::in_memory(Arc::new(EventLog::in_memory())));
    let tracker = Arc::new(PositionTracker::new(api.clone(), REQUEST_TIMEOUT, 4));
    let feed = Arc::new(PriceFeed::new(
        Arc::new(PriceCache::new(Duration::from_secs(30))),
        api.clone(),
        REQUEST_TIMEOUT,
    ));
    let executor = RuleExecutor::new(store.clone(), tracker.clone(), api.clone(), REQUEST_TIMEOUT);
    let worker = Arc::new(MonitoringWorker::new(
        config,
        store.clone(),
        tracker.clone(),
        feed.clone(),
        executor,
        CircuitBreaker::new(breaker),
    ));
    Harness {
        api,
        store,
        tracker,
        feed,
        worker,
    }
}

pub fn owner() -> OwnerRef {
    OwnerRef::new("alice")
}

pub fn holding(token_id: &str, quantity: Decimal, redeemable: bool) -> Holding {
    Holding {
        market_id: "mkt".to_string(),
        token_id: token_id.to_string(),
        quantity: Size::new(quantity),
        avg_entry_price: Price::new(dec!(0.50)),
        current_price: Price::new(dec!(0.50)),
        market_title: Some("Will it rain?".to_string()),
        outcome: Some("Yes".to_string()),
        end_date: None,
        redeemable,
    }
}

/// Quote `token_id` so its midpoint is exactly `price`.
pub fn set_price(api: &MockTradingApi, token_id: &str, price: Decimal) {
    let level = BookLevel {
        price: Price::new(price),
        size: Size::new(dec!(1000)),
    };
    api.set_order_book(OrderBook {
        token_id: token_id.to_string(),
        bids: vec![level],
        asks: vec![level],
    });
}

pub fn spec(rule_type: &str, trigger: Option<Decimal>) -> RuleSpec {
    RuleSpec {
        owner_ref: owner(),
        market_id: "mkt".to_string(),
        token_id: "tok".to_string(),
        rule_type: rule_type.to_string(),
        trigger_price: trigger.map(Price::new),
        trailing_percent: None,
        reference_price: None,
        action: RuleAction::SellAll,
    }
}

pub fn create(h: &Harness, spec: RuleSpec) -> TradeRule {
    h.store.create(spec).unwrap()
}

// ============================================================================
// Mock market channel
// ============================================================================

/// Minimal market-channel server: records inbound text frames and
/// broadcasts pushed frames to every client.
pub struct MarketServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    push_tx: broadcast::Sender<String>,
}

impl MarketServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, _) = broadcast::channel::<String>(64);

        let (rec, tx) = (received.clone(), push_tx.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (rec, mut push_rx) = (rec.clone(), tx.subscribe());
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if text == "PING" {
                                        let _ = write.send(Message::Text("PONG".to_string())).await;
                                    } else {
                                        rec.lock().await.push(text);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                _ => {}
                            },
                            Ok(text) = push_rx.recv() => {
                                if write.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            push_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    pub fn push(&self, text: &str) {
        let _ = self.push_tx.send(text.to_string());
    }
}
