//! Position tracker.
//!
//! Open positions and the history of closed/vanished ones are held in
//! DashMap caches for synchronous lookups from the evaluator and executor.
//! Refreshes go through the upstream API, one owner at a time or all owners
//! concurrently with per-owner failure isolation.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt};
use pmguard_core::{MonitoredPosition, OwnerRef, PositionKey};
use pmguard_upstream::{with_timeout, DynTradingApi, Holding};
use tracing::{debug, info, warn};

use crate::error::{PositionError, PositionResult};

// ============================================================================
// PositionLookup
// ============================================================================

/// What the tracker knows about a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionLookup {
    /// Held and tradable.
    Open(MonitoredPosition),
    /// Held but the market is closed (redeemable or past end date).
    Closed(MonitoredPosition),
    /// No longer held; carries the last-known row.
    Gone(MonitoredPosition),
    /// Never seen.
    Unknown,
}

impl PositionLookup {
    pub fn open(&self) -> Option<&MonitoredPosition> {
        match self {
            Self::Open(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Outcome of a multi-owner refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<PositionError>,
}

// ============================================================================
// PositionTracker
// ============================================================================

pub struct PositionTracker {
    api: DynTradingApi,
    request_timeout: Duration,
    max_concurrent_refreshes: usize,
    /// Open positions, the only rows eligible for evaluation.
    open: DashMap<PositionKey, MonitoredPosition>,
    /// Last-known rows of closed or vanished positions.
    history: DashMap<PositionKey, MonitoredPosition>,
}

impl PositionTracker {
    pub fn new(api: DynTradingApi, request_timeout: Duration, max_concurrent_refreshes: usize) -> Self {
        Self {
            api,
            request_timeout,
            max_concurrent_refreshes: max_concurrent_refreshes.max(1),
            open: DashMap::new(),
            history: DashMap::new(),
        }
    }

    /// Refresh one owner's positions. Returns the number of open positions.
    pub async fn refresh(&self, owner: &OwnerRef) -> PositionResult<usize> {
        self.refresh_at(owner, Utc::now()).await
    }

    pub async fn refresh_at(&self, owner: &OwnerRef, now: DateTime<Utc>) -> PositionResult<usize> {
        let holdings = with_timeout(self.request_timeout, self.api.get_positions(owner))
            .await
            .map_err(|source| PositionError::Refresh {
                owner: owner.clone(),
                source,
            })?;

        let mut seen = HashSet::new();
        for holding in holdings {
            let position = to_position(owner, holding, now);
            let key = position.key.clone();

            if position.is_open_at(now) {
                self.history.remove(&key);
                self.open.insert(key.clone(), position);
                seen.insert(key);
            } else {
                if self.open.remove(&key).is_some() {
                    info!(position = %key, redeemable = position.redeemable, "Position closed");
                }
                self.history.insert(key, position);
            }
        }

        let vanished: Vec<PositionKey> = self
            .open
            .iter()
            .filter(|e| e.key().owner_ref == *owner && !seen.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in vanished {
            if let Some((key, position)) = self.open.remove(&key) {
                info!(position = %key, "Position no longer held");
                self.history.insert(key, position);
            }
        }

        debug!(owner = %owner, open = seen.len(), "Positions refreshed");
        Ok(seen.len())
    }

    /// Refresh every owner concurrently, isolating failures.
    ///
    /// Fails only when at least one owner was attempted and all of them
    /// failed; partial failures are logged and reported in the summary.
    pub async fn refresh_all(&self, owners: &[OwnerRef]) -> PositionResult<RefreshSummary> {
        let now = Utc::now();
        let results: Vec<PositionResult<usize>> = stream::iter(owners.iter())
            .map(|owner| self.refresh_at(owner, now))
            .buffer_unordered(self.max_concurrent_refreshes)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        let mut summary = RefreshSummary {
            attempted: owners.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    warn!(error = %e, "Owner position refresh failed");
                    summary.failures.push(e);
                }
            }
        }

        if summary.attempted > 0 && summary.succeeded == 0 {
            let last_error = summary
                .failures
                .last()
                .map(|e| e.upstream().clone())
                .unwrap_or(pmguard_upstream::UpstreamError::Network("no result".to_string()));
            return Err(PositionError::AllOwnersFailed {
                attempted: summary.attempted,
                last_error,
            });
        }
        Ok(summary)
    }

    /// Open position for `(owner, market, token)`, if any.
    pub fn get_position(
        &self,
        owner: &OwnerRef,
        market_id: &str,
        token_id: &str,
    ) -> Option<MonitoredPosition> {
        let key = PositionKey::long(owner.clone(), market_id, token_id);
        self.open.get(&key).map(|e| e.value().clone())
    }

    /// Full state of a position as of `now`.
    pub fn lookup_at(
        &self,
        owner: &OwnerRef,
        market_id: &str,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> PositionLookup {
        let key = PositionKey::long(owner.clone(), market_id, token_id);
        if let Some(position) = self.open.get(&key) {
            // End date may have passed since the last refresh.
            return if position.is_open_at(now) {
                PositionLookup::Open(position.clone())
            } else {
                PositionLookup::Closed(position.clone())
            };
        }
        match self.history.get(&key) {
            Some(p) if p.is_closed_at(now) => PositionLookup::Closed(p.clone()),
            Some(p) => PositionLookup::Gone(p.clone()),
            None => PositionLookup::Unknown,
        }
    }

    pub fn lookup(&self, owner: &OwnerRef, market_id: &str, token_id: &str) -> PositionLookup {
        self.lookup_at(owner, market_id, token_id, Utc::now())
    }

    /// Re-fetch the owner's holdings and return the position's live state.
    pub async fn fetch_live(
        &self,
        owner: &OwnerRef,
        market_id: &str,
        token_id: &str,
    ) -> PositionResult<PositionLookup> {
        let now = Utc::now();
        self.refresh_at(owner, now).await?;
        Ok(self.lookup_at(owner, market_id, token_id, now))
    }

    /// Snapshot of open positions.
    pub fn positions(&self) -> Vec<MonitoredPosition> {
        let mut out: Vec<MonitoredPosition> = self.open.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        out
    }

    /// Snapshot of closed/vanished positions.
    pub fn history(&self) -> Vec<MonitoredPosition> {
        self.history.iter().map(|e| e.value().clone()).collect()
    }

    pub fn position_count(&self) -> usize {
        self.open.len()
    }
}

fn to_position(owner: &OwnerRef, h: Holding, now: DateTime<Utc>) -> MonitoredPosition {
    MonitoredPosition {
        key: PositionKey::long(owner.clone(), h.market_id, h.token_id),
        quantity: h.quantity,
        avg_entry_price: h.avg_entry_price,
        current_price: h.current_price,
        market_title: h.market_title,
        outcome: h.outcome,
        end_date: h.end_date,
        redeemable: h.redeemable,
        last_updated_at: now,
    }
}
