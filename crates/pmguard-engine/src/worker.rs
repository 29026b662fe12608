//! Monitoring worker: the control loop.
//!
//! One cycle: breaker check, position refresh for every owner with live
//! rules, retry of TRIGGERED rules, evaluation of ACTIVE rules whose
//! position is open, then status/metrics. When the market stream is enabled,
//! each streamed price also re-evaluates the rules on that token right away.
//! The stream is an accelerator only; the poll cadence alone is sufficient.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use pmguard_core::{EventType, Price, RuleId, RuleStatus, TradeRule};
use pmguard_feed::PriceFeed;
use pmguard_position::PositionTracker;
use pmguard_risk::CircuitBreaker;
use pmguard_store::RuleStore;
use pmguard_telemetry::Metrics;
use pmguard_ws::{ConnectionConfig, ConnectionManager};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::EngineResult;
use crate::evaluator::{evaluate, Evaluation};
use crate::executor::RuleExecutor;
use crate::locks::RuleLocks;
use crate::status::{CycleReport, WorkerStatus};

// ============================================================================
// WorkerConfig
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Cycle cadence.
    pub poll_interval: Duration,
    /// Minimum spacing of RULE_EVALUATED events per rule. Zero disables them.
    pub evaluation_event_interval: Duration,
    /// Concurrent rule evaluations / price pulls within a cycle.
    pub max_concurrent_evaluations: usize,
    /// Market stream; `None` runs on polling alone.
    pub stream: Option<ConnectionConfig>,
    /// Inbound stream message queue depth.
    pub stream_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            evaluation_event_interval: Duration::from_secs(60),
            max_concurrent_evaluations: 8,
            stream: None,
            stream_buffer: 1024,
        }
    }
}

/// Which path evaluated a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPath {
    Poll,
    Push,
}

impl TriggerPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Push => "push",
        }
    }
}

struct Lifecycle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

// ============================================================================
// MonitoringWorker
// ============================================================================

pub struct MonitoringWorker {
    config: WorkerConfig,
    store: Arc<RuleStore>,
    tracker: Arc<PositionTracker>,
    feed: Arc<PriceFeed>,
    executor: RuleExecutor,
    breaker: CircuitBreaker,
    locks: RuleLocks,
    /// Last RULE_EVALUATED event per rule.
    evaluated_at: DashMap<RuleId, DateTime<Utc>>,
    last_sync_time: RwLock<Option<DateTime<Utc>>>,
    stream: RwLock<Option<Arc<ConnectionManager>>>,
    seen_reconnects: AtomicU64,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl MonitoringWorker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<RuleStore>,
        tracker: Arc<PositionTracker>,
        feed: Arc<PriceFeed>,
        executor: RuleExecutor,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            config,
            store,
            tracker,
            feed,
            executor,
            breaker,
            locks: RuleLocks::new(),
            evaluated_at: DashMap::new(),
            last_sync_time: RwLock::new(None),
            stream: RwLock::new(None),
            seen_reconnects: AtomicU64::new(0),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    pub fn feed(&self) -> &Arc<PriceFeed> {
        &self.feed
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Schedule the recurring cycle and open the market stream (if enabled).
    ///
    /// Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            debug!("Monitoring worker already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if let Some(stream_config) = &self.config.stream {
            let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
            let manager = Arc::new(ConnectionManager::new(stream_config.clone(), tx));
            manager.update_subscriptions(self.store.tokens_with(RuleStatus::Active));
            *self.stream.write() = Some(Arc::clone(&manager));
            self.seen_reconnects.store(0, Ordering::Relaxed);

            tasks.push(tokio::spawn(async move {
                if let Err(e) = manager.run().await {
                    warn!(error = %e, "Market stream stopped, polling continues");
                }
            }));

            let worker = Arc::clone(self);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                worker.push_loop(rx, token).await;
            }));
        }

        let worker = Arc::clone(self);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            worker.poll_loop(token).await;
        }));

        *lifecycle = Some(Lifecycle { cancel, tasks });
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            stream_enabled = self.config.stream.is_some(),
            "Monitoring worker started"
        );
        true
    }

    /// Stop scheduling cycles and close the stream.
    ///
    /// An in-flight cycle finishes before this returns. Returns false if
    /// not running.
    pub async fn stop(&self) -> bool {
        let taken = self.lifecycle.lock().take();
        let Some(lifecycle) = taken else {
            debug!("Monitoring worker not running");
            return false;
        };

        lifecycle.cancel.cancel();
        let stream = self.stream.write().take();
        if let Some(manager) = stream {
            manager.shutdown();
        }
        for task in lifecycle.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        Metrics::stream_connected(false);
        info!("Monitoring worker stopped");
        true
    }

    async fn poll_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        debug!("Poll loop exited");
    }

    async fn push_loop(&self, mut rx: mpsc::Receiver<Value>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => self.handle_stream_message(&message).await,
                    None => break,
                },
            }
        }
        debug!("Push loop exited");
    }

    // ------------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------------

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        if self.breaker.is_open_at(now) {
            debug!(open_until = ?self.breaker.open_until(), "Circuit breaker open, skipping cycle");
            report.skipped = true;
            self.finish_cycle(&report, started);
            return report;
        }

        // TRIGGERED owners too: their retries re-validate against live holdings.
        let mut owners = self.store.owners_with(RuleStatus::Active);
        owners.extend(self.store.owners_with(RuleStatus::Triggered));
        owners.sort();
        owners.dedup();
        report.owners = owners.len();

        match self.tracker.refresh_all(&owners).await {
            Ok(summary) => {
                self.breaker.record_success();
                *self.last_sync_time.write() = Some(now);
                if !summary.failures.is_empty() {
                    debug!(
                        attempted = summary.attempted,
                        failed = summary.failures.len(),
                        "Partial position refresh"
                    );
                }
            }
            Err(e) => {
                report.refresh_failed = true;
                report.breaker_opened = self.breaker.record_failure_at(now);
                Metrics::refresh_failed();
                warn!(
                    error = %e,
                    consecutive_failures = self.breaker.consecutive_failures(),
                    "Position refresh failed, skipping evaluation"
                );
                self.finish_cycle(&report, started);
                return report;
            }
        }

        report.retried = self.retry_triggered(now).await;
        let (evaluated, triggered) = self.evaluate_active(now).await;
        report.evaluated = evaluated;
        report.triggered = triggered;

        self.feed.cache().evict_expired_at(now);
        self.sync_subscriptions();
        self.prune();
        if let Err(e) = self.store.sync_journal() {
            warn!(error = %e, "Rule journal still out of sync");
        }
        self.finish_cycle(&report, started);
        debug!(?report, "Cycle complete");
        report
    }

    /// Re-attempt rules left TRIGGERED by a transient failure or a crash.
    async fn retry_triggered(&self, now: DateTime<Utc>) -> usize {
        let pending = self.store.list(Some(RuleStatus::Triggered));
        if pending.is_empty() {
            return 0;
        }
        info!(count = pending.len(), "Retrying triggered rules");

        let done: Vec<()> = stream::iter(pending)
            .map(|rule| async move {
                let _guard = self.locks.lock(&rule.id).await;
                if let Err(e) = self.executor.execute_at(&rule.id, now).await {
                    warn!(rule_id = %rule.id, error = %e, "Retry failed");
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        done.len()
    }

    /// Evaluate every ACTIVE rule with an open position. Returns
    /// `(evaluated, triggered)`.
    async fn evaluate_active(&self, now: DateTime<Utc>) -> (usize, usize) {
        let candidates: Vec<TradeRule> = self
            .store
            .active_rules()
            .into_iter()
            .filter(|rule| {
                let open = self
                    .tracker
                    .lookup_at(&rule.owner_ref, &rule.market_id, &rule.token_id, now)
                    .is_open();
                if !open {
                    trace!(rule_id = %rule.id, "Position not open, rule not evaluated");
                }
                open
            })
            .collect();
        if candidates.is_empty() {
            return (0, 0);
        }

        // One price per token per cycle.
        let tokens: BTreeSet<String> = candidates.iter().map(|r| r.token_id.clone()).collect();
        let pulled: Vec<(String, Option<Price>)> = stream::iter(tokens)
            .map(|token| async move {
                match self.feed.price_at(&token, now).await {
                    Ok((price, source)) => {
                        trace!(token_id = %token, %price, ?source, "Price resolved");
                        (token, Some(price))
                    }
                    Err(e) => {
                        warn!(token_id = %token, error = %e, "No price, skipping token");
                        (token, None)
                    }
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        let prices: HashMap<String, Price> = pulled
            .into_iter()
            .filter_map(|(token, price)| price.map(|p| (token, p)))
            .collect();

        let work: Vec<(RuleId, Price)> = candidates
            .iter()
            .filter_map(|r| prices.get(&r.token_id).map(|p| (r.id.clone(), *p)))
            .collect();
        let evaluated = work.len();

        let fired: Vec<bool> = stream::iter(work)
            .map(|(id, price)| async move {
                match self.evaluate_rule(&id, price, now, TriggerPath::Poll).await {
                    Ok(triggered) => triggered,
                    Err(e) => {
                        warn!(rule_id = %id, error = %e, "Rule evaluation failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        (evaluated, fired.into_iter().filter(|t| *t).count())
    }

    /// Evaluate one rule at `price` under its lock, applying side effects.
    ///
    /// Returns true if the rule fired (execution was attempted).
    async fn evaluate_rule(
        &self,
        rule_id: &RuleId,
        price: Price,
        now: DateTime<Utc>,
        path: TriggerPath,
    ) -> EngineResult<bool> {
        let _guard = self.locks.lock(rule_id).await;

        // Re-read under the lock; the other path may have moved it.
        let Some(rule) = self.store.get(rule_id) else {
            return Ok(false);
        };
        if !rule.is_active() {
            return Ok(false);
        }
        if !self
            .tracker
            .lookup_at(&rule.owner_ref, &rule.market_id, &rule.token_id, now)
            .is_open()
        {
            return Ok(false);
        }

        let evaluation = evaluate(&rule, price);
        if let Some(ratchet) = evaluation.ratchet {
            self.store
                .update_trailing(rule_id, ratchet.high_water_mark, ratchet.trigger_price)?;
            Metrics::trailing_ratchet();
        }
        self.record_evaluated(&rule, &evaluation, now);

        if !evaluation.triggered {
            return Ok(false);
        }

        info!(
            rule_id = %rule.id,
            rule_type = %rule.rule_type().as_str(),
            %price,
            trigger_price = %evaluation.trigger_price,
            path = path.as_str(),
            "Rule triggered"
        );
        self.store.mark_triggered(rule_id, price)?;
        Metrics::rule_triggered(rule.rule_type().as_str(), path.as_str());

        let outcome = self.executor.execute_at(rule_id, now).await?;
        debug!(rule_id = %rule.id, outcome = outcome.label(), "Execution finished");
        Ok(true)
    }

    fn record_evaluated(&self, rule: &TradeRule, evaluation: &Evaluation, now: DateTime<Utc>) {
        let interval = self.config.evaluation_event_interval;
        if interval.is_zero() {
            return;
        }
        let due = self.evaluated_at.get(&rule.id).map_or(true, |last| {
            (now - *last)
                .to_std()
                .map_or(false, |elapsed| elapsed >= interval)
        });
        if !due {
            return;
        }
        self.evaluated_at.insert(rule.id.clone(), now);
        self.store.events().record(
            &rule.id,
            EventType::RuleEvaluated,
            json!({
                "price": evaluation.price,
                "trigger_price": evaluation.trigger_price,
                "ratcheted": evaluation.ratchet.is_some(),
                "triggered": evaluation.triggered,
            }),
            now,
        );
    }

    // ------------------------------------------------------------------------
    // Push path
    // ------------------------------------------------------------------------

    /// Re-evaluate ACTIVE rules on `token_id` at a freshly streamed price.
    ///
    /// Skipped while the breaker is open. Returns how many rules fired.
    pub async fn evaluate_token_at(
        &self,
        token_id: &str,
        price: Price,
        now: DateTime<Utc>,
    ) -> usize {
        if self.breaker.is_open_at(now) {
            trace!(token_id, "Breaker open, push evaluation skipped");
            return 0;
        }

        let mut triggered = 0;
        for rule in self.store.rules_for_token(token_id, RuleStatus::Active) {
            match self
                .evaluate_rule(&rule.id, price, now, TriggerPath::Push)
                .await
            {
                Ok(true) => triggered += 1,
                Ok(false) => {}
                Err(e) => warn!(rule_id = %rule.id, error = %e, "Push evaluation failed"),
            }
        }
        if triggered > 0 {
            self.sync_subscriptions();
        }
        triggered
    }

    pub async fn evaluate_token(&self, token_id: &str, price: Price) -> usize {
        self.evaluate_token_at(token_id, price, Utc::now()).await
    }

    /// Apply a stream message to the price cache and re-evaluate the tokens it moved.
    pub async fn handle_stream_message(&self, message: &Value) {
        let updates = self.feed.ingest(message);
        if updates.is_empty() {
            return;
        }
        Metrics::stream_price_updates(updates.len());
        for update in updates {
            self.evaluate_token(&update.token_id, update.price).await;
        }
    }

    /// Point the stream at the tokens of ACTIVE rules.
    pub fn sync_subscriptions(&self) {
        let stream = self.stream.read().clone();
        if let Some(manager) = stream {
            manager.update_subscriptions(self.store.tokens_with(RuleStatus::Active));
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn status_at(&self, now: DateTime<Utc>) -> WorkerStatus {
        let stream = self.stream.read().clone();
        WorkerStatus {
            running: self.is_running(),
            active_rules_count: self.store.count(RuleStatus::Active),
            triggered_rules_count: self.store.count(RuleStatus::Triggered),
            open_positions_count: self.tracker.position_count(),
            last_sync_time: *self.last_sync_time.read(),
            consecutive_failures: self.breaker.consecutive_failures(),
            circuit_breaker_until: self.breaker.open_until().filter(|until| *until > now),
            stream_connected: stream.as_ref().is_some_and(|m| m.is_connected()),
            stream_subscription_count: stream.as_ref().map_or(0, |m| m.subscription_count()),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status_at(Utc::now())
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrent_evaluations.max(1)
    }

    /// Forget per-rule state of rules that can no longer be evaluated.
    fn prune(&self) {
        self.locks
            .retain(|id| self.store.get(id).is_some_and(|r| !r.status.is_terminal()));
        self.evaluated_at
            .retain(|id, _| self.store.get(id).is_some_and(|r| r.is_active()));
    }

    fn finish_cycle(&self, report: &CycleReport, started: Instant) {
        Metrics::cycle_completed(
            report.result_label(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        Metrics::active_rules(self.store.count(RuleStatus::Active));
        Metrics::breaker_open(self.breaker.is_open());

        let stream = self.stream.read().clone();
        if let Some(manager) = stream {
            Metrics::stream_connected(manager.is_connected());
            let total = manager.reconnect_count();
            let seen = self.seen_reconnects.swap(total, Ordering::Relaxed);
            if total > seen {
                Metrics::stream_reconnects(total - seen);
            }
        }
    }
}
