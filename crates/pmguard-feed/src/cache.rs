//! Price cache with TTL.
//!
//! An owned instance, never a global: each feed (and each test) builds its
//! own. Stale entries are treated as absent and evicted lazily on read or
//! in bulk via [`PriceCache::evict_expired_at`].

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use pmguard_core::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPrice {
    pub price: Price,
    pub updated_at: DateTime<Utc>,
}

pub struct PriceCache {
    ttl: Duration,
    entries: DashMap<String, CachedPrice>,
}

impl PriceCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(365)),
            entries: DashMap::new(),
        }
    }

    pub fn insert_at(&self, token_id: &str, price: Price, now: DateTime<Utc>) {
        self.entries.insert(
            token_id.to_string(),
            CachedPrice {
                price,
                updated_at: now,
            },
        );
    }

    pub fn insert(&self, token_id: &str, price: Price) {
        self.insert_at(token_id, price, Utc::now());
    }

    /// Fresh price for `token_id`, evicting it if expired.
    pub fn get_at(&self, token_id: &str, now: DateTime<Utc>) -> Option<Price> {
        let entry = *self.entries.get(token_id)?;
        if self.is_expired(&entry, now) {
            self.entries
                .remove_if(token_id, |_, e| self.is_expired(e, now));
            return None;
        }
        Some(entry.price)
    }

    pub fn get(&self, token_id: &str) -> Option<Price> {
        self.get_at(token_id, Utc::now())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, e| {
            let expired = self.is_expired(e, now);
            removed += usize::from(expired);
            !expired
        });
        removed
    }

    pub fn remove(&self, token_id: &str) {
        self.entries.remove(token_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &CachedPrice, now: DateTime<Utc>) -> bool {
        now - entry.updated_at > self.ttl
    }
}
