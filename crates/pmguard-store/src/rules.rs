//! Rule store: the trigger-rule state machine.
//!
//! New rules are journaled (when a journal is attached) before they become
//! visible. Status changes and ratchets are applied in memory even when the
//! journal write fails: the journal is flagged out of sync and rewritten on
//! the next successful write or `sync_journal` call. Every change is then
//! recorded in the [`EventLog`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pmguard_core::{
    EventType, OwnerRef, Price, RuleId, RuleKind, RulePatch, RuleSpec, RuleStatus, Size, TradeRule,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::error::{StoreError, StoreResult};
use crate::events::EventLog;
use crate::journal::JsonLinesJournal;

pub struct RuleStore {
    rules: RwLock<HashMap<RuleId, TradeRule>>,
    journal: Mutex<Option<JsonLinesJournal>>,
    /// Set when a committed change could not be journaled.
    journal_stale: AtomicBool,
    events: Arc<EventLog>,
}

impl RuleStore {
    /// Memory-only store.
    pub fn in_memory(events: Arc<EventLog>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            journal: Mutex::new(None),
            journal_stale: AtomicBool::new(false),
            events,
        }
    }

    /// Open a journaled store at `path`.
    ///
    /// The journal is replayed last-write-wins per rule id, then compacted to
    /// one line per rule.
    pub fn open(path: impl AsRef<Path>, events: Arc<EventLog>) -> StoreResult<Self> {
        let path = path.as_ref();
        let snapshots: Vec<TradeRule> = JsonLinesJournal::read_all(path)?;
        let replayed = snapshots.len();

        let mut rules = HashMap::new();
        for rule in snapshots {
            rules.insert(rule.id.clone(), rule);
        }

        let mut compacted: Vec<&TradeRule> = rules.values().collect();
        compacted.sort_by_key(|r| r.created_at);
        JsonLinesJournal::rewrite(path, &compacted)?;

        info!(
            path = %path.display(),
            replayed,
            rules = rules.len(),
            "Loaded rule journal"
        );

        Ok(Self::from_parts(
            JsonLinesJournal::open(path)?,
            rules.into_values(),
            events,
        ))
    }

    /// Store over already-loaded rules, appending further changes to `journal`.
    pub fn from_parts(
        journal: JsonLinesJournal,
        rules: impl IntoIterator<Item = TradeRule>,
        events: Arc<EventLog>,
    ) -> Self {
        let rules = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            rules: RwLock::new(rules),
            journal: Mutex::new(Some(journal)),
            journal_stale: AtomicBool::new(false),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Validate and insert a new ACTIVE rule.
    pub fn create(&self, spec: RuleSpec) -> StoreResult<TradeRule> {
        let now = Utc::now();
        let rule = spec.into_rule(now)?;

        {
            let mut rules = self.rules.write();
            self.persist(&rules, &rule)?;
            rules.insert(rule.id.clone(), rule.clone());
        }

        info!(
            rule_id = %rule.id,
            owner = %rule.owner_ref,
            token_id = %rule.token_id,
            rule_type = %rule.rule_type(),
            trigger_price = %rule.trigger_price,
            "Rule created"
        );
        self.events.record(
            &rule.id,
            EventType::RuleCreated,
            json!({
                "rule_type": rule.rule_type(),
                "trigger_price": rule.trigger_price,
                "trailing_percent": rule.trailing_percent(),
                "high_water_mark": rule.high_water_mark(),
                "action": rule.action,
            }),
            now,
        );
        Ok(rule)
    }

    pub fn get(&self, id: &RuleId) -> Option<TradeRule> {
        self.rules.read().get(id).cloned()
    }

    /// All rules, optionally filtered by status, oldest first.
    pub fn list(&self, status: Option<RuleStatus>) -> Vec<TradeRule> {
        let mut out: Vec<TradeRule> = self
            .rules
            .read()
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    pub fn active_rules(&self) -> Vec<TradeRule> {
        self.list(Some(RuleStatus::Active))
    }

    /// Rules in `status` watching `token_id`.
    pub fn rules_for_token(&self, token_id: &str, status: RuleStatus) -> Vec<TradeRule> {
        let mut out: Vec<TradeRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.status == status && r.token_id == token_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Distinct owners with at least one rule in `status`.
    pub fn owners_with(&self, status: RuleStatus) -> Vec<OwnerRef> {
        let mut owners: Vec<OwnerRef> = self
            .rules
            .read()
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.owner_ref.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// Distinct tokens with at least one rule in `status`.
    pub fn tokens_with(&self, status: RuleStatus) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .rules
            .read()
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.token_id.clone())
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens
    }

    pub fn count(&self, status: RuleStatus) -> usize {
        self.rules.read().values().filter(|r| r.status == status).count()
    }

    /// Update trigger price / trailing percent of an ACTIVE rule.
    pub fn update(&self, id: &RuleId, patch: RulePatch) -> StoreResult<TradeRule> {
        let now = Utc::now();
        let updated = {
            let mut rules = self.rules.write();
            let current = rules.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if current.status != RuleStatus::Active {
                return Err(StoreError::InvalidTransition {
                    rule_id: id.clone(),
                    from: current.status,
                    operation: "update",
                });
            }
            let updated = patch.apply(current, now)?;
            self.persist(&rules, &updated)?;
            rules.insert(id.clone(), updated.clone());
            updated
        };

        info!(rule_id = %id, trigger_price = %updated.trigger_price, "Rule updated");
        self.events.record(
            id,
            EventType::RuleUpdated,
            json!({
                "patch": patch,
                "trigger_price": updated.trigger_price,
                "trailing_percent": updated.trailing_percent(),
            }),
            now,
        );
        Ok(updated)
    }

    /// Cancel an ACTIVE rule. Canceling a terminal rule is a no-op.
    pub fn cancel(&self, id: &RuleId) -> StoreResult<TradeRule> {
        {
            let rules = self.rules.read();
            let current = rules.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if current.status.is_terminal() {
                debug!(rule_id = %id, status = %current.status, "Cancel on terminal rule ignored");
                return Ok(current.clone());
            }
        }
        self.transition(id, RuleStatus::Canceled, "cancel", |_| {}, |_| {
            (EventType::RuleCanceled, json!({}))
        })
    }

    /// ACTIVE -> TRIGGERED at `price`.
    pub fn mark_triggered(&self, id: &RuleId, price: Price) -> StoreResult<TradeRule> {
        self.transition(id, RuleStatus::Triggered, "trigger", |_| {}, |rule| {
            (
                EventType::RuleTriggered,
                json!({
                    "price": price,
                    "trigger_price": rule.trigger_price,
                    "rule_type": rule.rule_type(),
                }),
            )
        })
    }

    /// TRIGGERED -> EXECUTED with the upstream trade reference.
    pub fn mark_executed(
        &self,
        id: &RuleId,
        trade_ref: &str,
        amount: Size,
    ) -> StoreResult<TradeRule> {
        self.transition(
            id,
            RuleStatus::Executed,
            "execute",
            |rule| rule.trade_ref = Some(trade_ref.to_string()),
            |_| {
                (
                    EventType::ActionExecuted,
                    json!({ "trade_ref": trade_ref, "amount": amount }),
                )
            },
        )
    }

    /// ACTIVE/TRIGGERED -> FAILED with a reason.
    pub fn mark_failed(&self, id: &RuleId, reason: &str) -> StoreResult<TradeRule> {
        self.transition(
            id,
            RuleStatus::Failed,
            "fail",
            |rule| rule.failure_reason = Some(reason.to_string()),
            |_| (EventType::RuleFailed, json!({ "reason": reason })),
        )
    }

    /// TRIGGERED -> ACTIVE after the upstream parked the order for approval.
    pub fn revert_to_active(&self, id: &RuleId, annotation: Value) -> StoreResult<TradeRule> {
        self.transition(id, RuleStatus::Active, "revert", |_| {}, |_| {
            let mut data = json!({ "pending_approval": true });
            if let (Value::Object(map), Value::Object(extra)) = (&mut data, annotation) {
                map.extend(extra);
            }
            (EventType::ActionAttempt, data)
        })
    }

    /// Persist a trailing-stop ratchet. Only ever moves up.
    pub fn update_trailing(
        &self,
        id: &RuleId,
        new_high_water_mark: Price,
        new_trigger_price: Price,
    ) -> StoreResult<TradeRule> {
        let now = Utc::now();
        let (previous_hwm, previous_trigger, updated) = {
            let mut rules = self.rules.write();
            let current = rules.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if current.status != RuleStatus::Active {
                return Err(StoreError::InvalidTransition {
                    rule_id: id.clone(),
                    from: current.status,
                    operation: "ratchet",
                });
            }
            let RuleKind::TrailingStop {
                trailing_percent,
                high_water_mark,
            } = current.kind
            else {
                return Err(StoreError::Validation(pmguard_core::CoreError::Validation(
                    format!("rule {id} is not a TRAILING_STOP"),
                )));
            };
            if new_high_water_mark < high_water_mark || new_trigger_price < current.trigger_price {
                return Err(StoreError::Validation(pmguard_core::CoreError::Validation(
                    format!(
                        "trailing ratchet must not move down (hwm {high_water_mark} -> {new_high_water_mark})"
                    ),
                )));
            }

            let mut updated = current.clone();
            updated.kind = RuleKind::TrailingStop {
                trailing_percent,
                high_water_mark: new_high_water_mark,
            };
            updated.trigger_price = new_trigger_price;
            updated.updated_at = now;
            let previous_trigger = current.trigger_price;
            rules.insert(id.clone(), updated.clone());
            self.persist_committed(&rules, &updated);
            (high_water_mark, previous_trigger, updated)
        };

        debug!(
            rule_id = %id,
            high_water_mark = %new_high_water_mark,
            trigger_price = %new_trigger_price,
            "Trailing stop ratcheted"
        );
        self.events.record(
            id,
            EventType::RuleTrailingUpdated,
            json!({
                "previous_high_water_mark": previous_hwm,
                "high_water_mark": new_high_water_mark,
                "previous_trigger_price": previous_trigger,
                "trigger_price": new_trigger_price,
            }),
            now,
        );
        Ok(updated)
    }

    /// Apply a state-machine transition, persist it, then record its event.
    fn transition(
        &self,
        id: &RuleId,
        next: RuleStatus,
        operation: &'static str,
        mutate: impl FnOnce(&mut TradeRule),
        event: impl FnOnce(&TradeRule) -> (EventType, Value),
    ) -> StoreResult<TradeRule> {
        let now = Utc::now();
        let (from, updated) = {
            let mut rules = self.rules.write();
            let current = rules.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if !current.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    rule_id: id.clone(),
                    from: current.status,
                    operation,
                });
            }
            let from = current.status;
            let mut updated = current.clone();
            updated.status = next;
            updated.updated_at = now;
            mutate(&mut updated);
            rules.insert(id.clone(), updated.clone());
            self.persist_committed(&rules, &updated);
            (from, updated)
        };

        info!(rule_id = %id, from = %from, to = %next, "Rule status changed");
        let (event_type, data) = event(&updated);
        self.events.record(id, event_type, data, now);
        Ok(updated)
    }

    /// False while a committed change is missing from the journal.
    pub fn journal_in_sync(&self) -> bool {
        !self.journal_stale.load(Ordering::SeqCst)
    }

    /// Rewrite every rule snapshot to the journal if an earlier write failed.
    pub fn sync_journal(&self) -> StoreResult<()> {
        if self.journal_in_sync() {
            return Ok(());
        }
        let rules = self.rules.read();
        let mut guard = self.journal.lock();
        let Some(journal) = guard.as_mut() else {
            return Ok(());
        };
        self.resync(journal, &rules)
    }

    fn resync(
        &self,
        journal: &mut JsonLinesJournal,
        rules: &HashMap<RuleId, TradeRule>,
    ) -> StoreResult<()> {
        journal.append_snapshot(rules.values())?;
        self.journal_stale.store(false, Ordering::SeqCst);
        info!(rules = rules.len(), "Rule journal resynchronized");
        Ok(())
    }

    /// Journal `rule`, resyncing first if an earlier write was lost.
    fn persist(&self, rules: &HashMap<RuleId, TradeRule>, rule: &TradeRule) -> StoreResult<()> {
        let mut guard = self.journal.lock();
        let Some(journal) = guard.as_mut() else {
            return Ok(());
        };
        if !self.journal_in_sync() {
            self.resync(journal, rules)?;
        }
        journal.append(rule)
    }

    /// Journal a change that is already applied in memory. A failure flags
    /// the journal stale instead of undoing the change.
    fn persist_committed(&self, rules: &HashMap<RuleId, TradeRule>, rule: &TradeRule) {
        if let Err(e) = self.persist(rules, rule) {
            self.journal_stale.store(true, Ordering::SeqCst);
            error!(
                rule_id = %rule.id,
                status = %rule.status,
                error = %e,
                "Rule journal write failed, change kept in memory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmguard_core::RuleAction;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn store() -> RuleStore {
        RuleStore::in_memory(Arc::new(EventLog::in_memory()))
    }

    fn stop_loss(trigger: rust_decimal::Decimal) -> RuleSpec {
        RuleSpec {
            owner_ref: OwnerRef::new("alice"),
            market_id: "mkt".to_string(),
            token_id: "tok".to_string(),
            rule_type: "STOP_LOSS".to_string(),
            trigger_price: Some(Price::new(trigger)),
            trailing_percent: None,
            reference_price: None,
            action: RuleAction::SellAll,
        }
    }

    fn trailing(pct: rust_decimal::Decimal, reference: rust_decimal::Decimal) -> RuleSpec {
        RuleSpec {
            rule_type: "TRAILING_STOP".to_string(),
            trigger_price: None,
            trailing_percent: Some(pct),
            reference_price: Some(Price::new(reference)),
            ..stop_loss(dec!(0))
        }
    }

    fn event_types(store: &RuleStore, id: &RuleId) -> Vec<EventType> {
        store
            .events()
            .for_rule(id)
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[test]
    fn test_create_emits_event() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        assert_eq!(store.get(&rule.id).unwrap().status, RuleStatus::Active);
        assert_eq!(event_types(&store, &rule.id), vec![EventType::RuleCreated]);
    }

    #[test]
    fn test_create_rejects_invalid() {
        let store = store();
        assert!(matches!(
            store.create(stop_loss(dec!(1.5))),
            Err(StoreError::Validation(_))
        ));
        assert!(store.list(None).is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        store.mark_triggered(&rule.id, Price::new(dec!(0.25))).unwrap();
        let done = store
            .mark_executed(&rule.id, "0xabc", Size::new(dec!(10)))
            .unwrap();
        assert_eq!(done.status, RuleStatus::Executed);
        assert_eq!(done.trade_ref.as_deref(), Some("0xabc"));
        assert_eq!(
            event_types(&store, &rule.id),
            vec![
                EventType::RuleCreated,
                EventType::RuleTriggered,
                EventType::ActionExecuted
            ]
        );
    }

    #[test]
    fn test_failed_is_terminal() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        store.mark_triggered(&rule.id, Price::new(dec!(0.2))).unwrap();
        let failed = store.mark_failed(&rule.id, "insufficient liquidity").unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("insufficient liquidity"));

        assert!(store.mark_triggered(&rule.id, Price::new(dec!(0.1))).is_err());
        assert!(store.revert_to_active(&rule.id, json!({})).is_err());
        assert!(store.mark_executed(&rule.id, "x", Size::ZERO).is_err());
        assert!(store.update(&rule.id, RulePatch::default()).is_err());
        assert_eq!(store.get(&rule.id).unwrap().status, RuleStatus::Failed);
    }

    #[test]
    fn test_cancel_is_idempotent_on_terminal() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        store.cancel(&rule.id).unwrap();
        let again = store.cancel(&rule.id).unwrap();
        assert_eq!(again.status, RuleStatus::Canceled);
        assert!(again.failure_reason.is_none());
        assert_eq!(
            event_types(&store, &rule.id),
            vec![EventType::RuleCreated, EventType::RuleCanceled]
        );
    }

    #[test]
    fn test_cancel_unknown_rule() {
        let store = store();
        assert!(matches!(
            store.cancel(&RuleId::new()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_only_while_active() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        let patch = RulePatch {
            trigger_price: Some(Price::new(dec!(0.25))),
            ..Default::default()
        };
        let updated = store.update(&rule.id, patch.clone()).unwrap();
        assert_eq!(updated.trigger_price, Price::new(dec!(0.25)));

        store.mark_triggered(&rule.id, Price::new(dec!(0.2))).unwrap();
        assert!(matches!(
            store.update(&rule.id, patch),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_revert_to_active_annotates_attempt() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        store.mark_triggered(&rule.id, Price::new(dec!(0.2))).unwrap();
        let reverted = store
            .revert_to_active(&rule.id, json!({ "approval_ref": "ap-1" }))
            .unwrap();
        assert_eq!(reverted.status, RuleStatus::Active);

        let events = store.events().for_rule(&rule.id);
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::ActionAttempt);
        assert_eq!(last.event_data["pending_approval"], true);
        assert_eq!(last.event_data["approval_ref"], "ap-1");
    }

    #[test]
    fn test_update_trailing_only_moves_up() {
        let store = store();
        let rule = store.create(trailing(dec!(10), dec!(0.50))).unwrap();
        let updated = store
            .update_trailing(&rule.id, Price::new(dec!(0.60)), Price::new(dec!(0.54)))
            .unwrap();
        assert_eq!(updated.high_water_mark(), Some(Price::new(dec!(0.60))));
        assert_eq!(updated.trigger_price, Price::new(dec!(0.54)));

        assert!(store
            .update_trailing(&rule.id, Price::new(dec!(0.55)), Price::new(dec!(0.495)))
            .is_err());
        assert_eq!(
            store.get(&rule.id).unwrap().high_water_mark(),
            Some(Price::new(dec!(0.60)))
        );
    }

    #[test]
    fn test_update_trailing_rejects_other_types() {
        let store = store();
        let rule = store.create(stop_loss(dec!(0.30))).unwrap();
        assert!(store
            .update_trailing(&rule.id, Price::new(dec!(0.6)), Price::new(dec!(0.5)))
            .is_err());
    }

    #[test]
    fn test_owner_and_token_sets() {
        let store = store();
        store.create(stop_loss(dec!(0.30))).unwrap();
        let mut other = stop_loss(dec!(0.20));
        other.owner_ref = OwnerRef::new("bob");
        other.token_id = "tok-2".to_string();
        let bob_rule = store.create(other).unwrap();
        store.cancel(&bob_rule.id).unwrap();

        assert_eq!(
            store.owners_with(RuleStatus::Active),
            vec![OwnerRef::new("alice")]
        );
        assert_eq!(store.tokens_with(RuleStatus::Active), vec!["tok".to_string()]);
        assert_eq!(store.count(RuleStatus::Canceled), 1);
    }

    #[test]
    fn test_journal_replay_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.jsonl");
        let id = {
            let store = RuleStore::open(&path, Arc::new(EventLog::in_memory())).unwrap();
            let rule = store.create(stop_loss(dec!(0.30))).unwrap();
            store.mark_triggered(&rule.id, Price::new(dec!(0.2))).unwrap();
            store.create(stop_loss(dec!(0.10))).unwrap();
            rule.id
        };

        let store = RuleStore::open(&path, Arc::new(EventLog::in_memory())).unwrap();
        assert_eq!(store.list(None).len(), 2);
        assert_eq!(store.get(&id).unwrap().status, RuleStatus::Triggered);

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[cfg(target_os = "linux")]
    fn unwritable_store(rules: Vec<TradeRule>) -> RuleStore {
        // Every write to /dev/full fails with ENOSPC.
        let journal = JsonLinesJournal::open("/dev/full").unwrap();
        RuleStore::from_parts(journal, rules, Arc::new(EventLog::in_memory()))
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_transition_kept_when_journal_write_fails() {
        let seed = store();
        let rule = seed.create(stop_loss(dec!(0.30))).unwrap();
        let triggered = seed.mark_triggered(&rule.id, Price::new(dec!(0.25))).unwrap();

        let store = unwritable_store(vec![triggered]);
        assert!(store.journal_in_sync());

        let executed = store
            .mark_executed(&rule.id, "trade-1", Size::new(dec!(5)))
            .unwrap();
        assert_eq!(executed.status, RuleStatus::Executed);
        assert_eq!(store.get(&rule.id).unwrap().trade_ref.as_deref(), Some("trade-1"));
        assert!(!store.journal_in_sync());
        assert_eq!(event_types(&store, &rule.id), vec![EventType::ActionExecuted]);

        // Still terminal: a second attempt is rejected, not re-applied.
        assert!(matches!(
            store.mark_executed(&rule.id, "trade-2", Size::new(dec!(5))),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(store.sync_journal().is_err());
        assert!(!store.journal_in_sync());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_create_fails_when_journal_write_fails() {
        let store = unwritable_store(Vec::new());
        assert!(matches!(
            store.create(stop_loss(dec!(0.30))),
            Err(StoreError::Persistence(_))
        ));
        assert!(store.list(None).is_empty());
    }

    #[test]
    fn test_sync_journal_is_noop_when_in_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.jsonl");
        let store = RuleStore::open(&path, Arc::new(EventLog::in_memory())).unwrap();
        store.create(stop_loss(dec!(0.30))).unwrap();

        store.sync_journal().unwrap();
        assert!(store.journal_in_sync());
        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }
}
