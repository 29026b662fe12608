//! Per-rule mutual exclusion.
//!
//! The polling cycle and push-triggered evaluations both transition rules;
//! evaluation-and-transition of any one rule is serialized through its lock
//! while different rules proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use pmguard_core::RuleId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct RuleLocks {
    locks: DashMap<RuleId, Arc<Mutex<()>>>,
}

impl RuleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `rule_id`.
    pub async fn lock(&self, rule_id: &RuleId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(rule_id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop locks for rules that no longer need them and nobody holds.
    pub fn retain(&self, keep: impl Fn(&RuleId) -> bool) {
        self.locks
            .retain(|id, lock| keep(id) || Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_rule_is_serialized() {
        let locks = Arc::new(RuleLocks::new());
        let id = RuleId::from_string("r1");
        let guard = locks.lock(&id).await;

        let locks2 = locks.clone();
        let id2 = id.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.lock(&id2).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_rules_do_not_block() {
        let locks = RuleLocks::new();
        let _a = locks.lock(&RuleId::from_string("a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&RuleId::from_string("b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_retain_keeps_held_locks() {
        let locks = RuleLocks::new();
        let held = locks.lock(&RuleId::from_string("held")).await;
        drop(locks.lock(&RuleId::from_string("idle")).await);

        locks.retain(|_| false);
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.retain(|_| false);
        assert!(locks.is_empty());
    }
}
