//! Price feed composing the stream cache with on-demand order-book pulls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pmguard_core::Price;
use pmguard_upstream::{with_timeout, DynTradingApi};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::PriceCache;
use crate::error::{FeedError, FeedResult};
use crate::midpoint::book_midpoint;
use crate::parser::{parse_market_message, PriceUpdate};

/// Where a price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Stream,
    Pull,
}

pub struct PriceFeed {
    cache: Arc<PriceCache>,
    api: DynTradingApi,
    request_timeout: Duration,
}

impl PriceFeed {
    pub fn new(cache: Arc<PriceCache>, api: DynTradingApi, request_timeout: Duration) -> Self {
        Self {
            cache,
            api,
            request_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    /// Current price: a fresh streamed price if cached, else an order-book pull.
    pub async fn price_at(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> FeedResult<(Price, PriceSource)> {
        if let Some(price) = self.cache.get_at(token_id, now) {
            trace!(token_id, %price, "Stream price hit");
            return Ok((price, PriceSource::Stream));
        }
        let price = self.pull_price(token_id).await?;
        Ok((price, PriceSource::Pull))
    }

    pub async fn price(&self, token_id: &str) -> FeedResult<(Price, PriceSource)> {
        self.price_at(token_id, Utc::now()).await
    }

    /// Midpoint of the live order book. Not cached.
    pub async fn pull_price(&self, token_id: &str) -> FeedResult<Price> {
        let book = with_timeout(self.request_timeout, self.api.get_order_book(token_id)).await?;
        match book_midpoint(&book) {
            Some(price) => {
                debug!(token_id, %price, "Pulled midpoint");
                Ok(price)
            }
            None => Err(FeedError::Unavailable(token_id.to_string())),
        }
    }

    /// Apply a stream message to the cache, returning the updates it carried.
    pub fn ingest_at(&self, message: &Value, now: DateTime<Utc>) -> Vec<PriceUpdate> {
        let updates = parse_market_message(message);
        for update in &updates {
            self.cache.insert_at(&update.token_id, update.price, now);
        }
        updates
    }

    pub fn ingest(&self, message: &Value) -> Vec<PriceUpdate> {
        self.ingest_at(message, Utc::now())
    }
}
