//! Subscription set tracking.
//!
//! `desired` is what the worker wants watched (the tokens of ACTIVE rules);
//! `active` is what has been sent on the current connection. The connection
//! loop sends the difference whenever either side changes.

use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Tokens to add and remove to bring `active` in line with `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub subscribe: Vec<String>,
    pub unsubscribe: Vec<String>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionSet {
    desired: RwLock<BTreeSet<String>>,
    active: RwLock<BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the desired set. Returns true if it changed.
    pub fn set_desired<I: IntoIterator<Item = String>>(&self, tokens: I) -> bool {
        let next: BTreeSet<String> = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        let mut desired = self.desired.write();
        if *desired == next {
            return false;
        }
        *desired = next;
        true
    }

    pub fn desired(&self) -> Vec<String> {
        self.desired.read().iter().cloned().collect()
    }

    pub fn desired_count(&self) -> usize {
        self.desired.read().len()
    }

    /// Number of tokens subscribed on the live connection.
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Compute the pending diff without applying it.
    pub fn diff(&self) -> SubscriptionDiff {
        let desired = self.desired.read();
        let active = self.active.read();
        SubscriptionDiff {
            subscribe: desired.difference(&active).cloned().collect(),
            unsubscribe: active.difference(&desired).cloned().collect(),
        }
    }

    /// Record that `diff` was sent on the connection.
    pub fn apply(&self, diff: &SubscriptionDiff) {
        let mut active = self.active.write();
        for token in &diff.unsubscribe {
            active.remove(token);
        }
        for token in &diff.subscribe {
            active.insert(token.clone());
        }
    }

    /// Forget the live subscriptions (connection lost).
    pub fn reset_active(&self) {
        self.active.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_add_and_remove() {
        let set = SubscriptionSet::new();
        assert!(set.set_desired(tokens(&["a", "b"])));
        let diff = set.diff();
        assert_eq!(diff.subscribe, tokens(&["a", "b"]));
        set.apply(&diff);
        assert!(set.diff().is_empty());

        assert!(set.set_desired(tokens(&["b", "c"])));
        let diff = set.diff();
        assert_eq!(diff.subscribe, tokens(&["c"]));
        assert_eq!(diff.unsubscribe, tokens(&["a"]));
    }

    #[test]
    fn test_unchanged_desired_reports_false() {
        let set = SubscriptionSet::new();
        set.set_desired(tokens(&["a"]));
        assert!(!set.set_desired(tokens(&["a"])));
    }

    #[test]
    fn test_reset_active_resubscribes_everything() {
        let set = SubscriptionSet::new();
        set.set_desired(tokens(&["a", "b"]));
        set.apply(&set.diff());
        set.reset_active();
        assert_eq!(set.active_count(), 0);
        assert_eq!(set.diff().subscribe, tokens(&["a", "b"]));
    }
}
