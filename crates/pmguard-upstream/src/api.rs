//! Trading API trait and its HTTP implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use pmguard_core::OwnerRef;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{UpstreamError, UpstreamResult};
use crate::normalize;
use crate::types::{Balance, BetOutcome, BetRequest, Holding, OrderBook};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream trading API, one logical account per owner.
///
/// Implementations normalize every response before returning it and surface
/// every failure as an [`UpstreamError`].
pub trait TradingApi: Send + Sync {
    /// Current holdings for the owner.
    fn get_positions<'a>(&'a self, owner: &'a OwnerRef)
        -> BoxFuture<'a, UpstreamResult<Vec<Holding>>>;

    /// Order book for a token.
    fn get_order_book<'a>(&'a self, token_id: &'a str) -> BoxFuture<'a, UpstreamResult<OrderBook>>;

    /// Submit a market order on the owner's behalf.
    fn place_bet<'a>(
        &'a self,
        owner: &'a OwnerRef,
        request: BetRequest,
    ) -> BoxFuture<'a, UpstreamResult<BetOutcome>>;

    /// Account balance (informational).
    fn get_balance<'a>(&'a self, owner: &'a OwnerRef) -> BoxFuture<'a, UpstreamResult<Balance>>;
}

/// Arc wrapper for TradingApi trait objects.
pub type DynTradingApi = Arc<dyn TradingApi>;

/// Bound an upstream call by `timeout`, independent of any client-level timeout.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> UpstreamResult<T>
where
    F: Future<Output = UpstreamResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Settings for [`HttpTradingApi`].
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// API key per owner.
    pub api_keys: HashMap<OwnerRef, String>,
    /// Used for owners without their own key and for public endpoints.
    pub default_api_key: Option<String>,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            api_keys: HashMap::new(),
            default_api_key: None,
        }
    }
}

/// REST client for the upstream trading API.
pub struct HttpTradingApi {
    client: Client,
    config: HttpApiConfig,
}

impl HttpTradingApi {
    pub fn new(config: HttpApiConfig) -> UpstreamResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| UpstreamError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn key_for(&self, owner: &OwnerRef) -> UpstreamResult<&str> {
        self.config
            .api_keys
            .get(owner)
            .or(self.config.default_api_key.as_ref())
            .map(String::as_str)
            .ok_or_else(|| UpstreamError::Unauthorized(owner.to_string()))
    }

    /// Send, map non-2xx to typed errors, and parse the body as JSON.
    async fn send(&self, request: RequestBuilder) -> UpstreamResult<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = normalize::error_body_message(&body);
            warn!(status = status.as_u16(), %message, "Upstream returned error status");
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl TradingApi for HttpTradingApi {
    fn get_positions<'a>(
        &'a self,
        owner: &'a OwnerRef,
    ) -> BoxFuture<'a, UpstreamResult<Vec<Holding>>> {
        Box::pin(async move {
            let key = self.key_for(owner)?;
            let request = self.client.get(self.url("positions")).bearer_auth(key);
            let body = self.send(request).await?;
            let rows = normalize::holdings(owner, body)?;
            debug!(owner = %owner, count = rows.len(), "Fetched holdings");
            Ok(rows)
        })
    }

    fn get_order_book<'a>(&'a self, token_id: &'a str) -> BoxFuture<'a, UpstreamResult<OrderBook>> {
        Box::pin(async move {
            let mut request = self
                .client
                .get(self.url("orderbook"))
                .query(&[("token_id", token_id)]);
            if let Some(key) = &self.config.default_api_key {
                request = request.bearer_auth(key);
            }
            let body = self.send(request).await?;
            normalize::order_book(token_id, body)
        })
    }

    fn place_bet<'a>(
        &'a self,
        owner: &'a OwnerRef,
        request: BetRequest,
    ) -> BoxFuture<'a, UpstreamResult<BetOutcome>> {
        Box::pin(async move {
            let key = self.key_for(owner)?;
            let body = serde_json::json!({
                "market_id": request.market_id,
                "token_id": request.token_id,
                "side": request.side.to_string(),
                "amount": request.amount.to_string(),
            });
            let http = self
                .client
                .post(self.url("bet"))
                .bearer_auth(key)
                .json(&body);
            let response = self.send(http).await?;
            normalize::bet_outcome(response)
        })
    }

    fn get_balance<'a>(&'a self, owner: &'a OwnerRef) -> BoxFuture<'a, UpstreamResult<Balance>> {
        Box::pin(async move {
            let key = self.key_for(owner)?;
            let request = self.client.get(self.url("balance")).bearer_auth(key);
            let body = self.send(request).await?;
            normalize::balance(body)
        })
    }
}
