//! WebSocket connection manager.
//!
//! Handles the connection lifecycle, reconnection with bounded exponential
//! backoff, and keeps the server-side subscription set in line with the
//! desired one (restored in full after every reconnect).

use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatMonitor, PING, PONG};
use crate::subscription::{SubscriptionDiff, SubscriptionSet};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the market channel.
    pub url: String,
    /// Maximum consecutive reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// First reconnect delay.
    pub initial_backoff_ms: u64,
    /// Cap on the reconnect delay.
    pub max_backoff_ms: u64,
    /// A connection that lived this long resets the backoff.
    pub stable_after_ms: u64,
    /// Quiet period after which a PING is sent.
    pub heartbeat_interval_ms: u64,
    /// PONG must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// Bound on the TCP + WebSocket handshake.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
            stable_after_ms: 30000,
            heartbeat_interval_ms: 10000,
            heartbeat_timeout_ms: 5000,
            connect_timeout_ms: 10000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Market-channel connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    subscriptions: Arc<SubscriptionSet>,
    heartbeat: HeartbeatMonitor,
    /// Inbound JSON messages, forwarded as-is.
    message_tx: mpsc::Sender<Value>,
    /// Wakes the message loop when the desired subscriptions change.
    resync: Notify,
    reconnect_count: AtomicU64,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, message_tx: mpsc::Sender<Value>) -> Self {
        let heartbeat =
            HeartbeatMonitor::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions: Arc::new(SubscriptionSet::new()),
            heartbeat,
            message_tx,
            resync: Notify::new(),
            reconnect_count: AtomicU64::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Total reconnect attempts since creation.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Tokens subscribed on the live connection.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.active_count()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionSet> {
        &self.subscriptions
    }

    /// Replace the set of watched tokens.
    ///
    /// Takes effect immediately when connected, otherwise on the next connect.
    pub fn update_subscriptions<I: IntoIterator<Item = String>>(&self, tokens: I) {
        if self.subscriptions.set_desired(tokens) {
            debug!(
                desired = self.subscriptions.desired_count(),
                "Subscription set changed"
            );
            self.resync.notify_one();
        }
    }

    /// Signal graceful shutdown.
    ///
    /// Exits the message loop (sending a Close frame) and any pending
    /// reconnect sleep.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and run until shutdown (or max attempts).
    pub async fn run(&self) -> WsResult<()> {
        self.connect_with_retry().await
    }

    async fn connect_with_retry(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;
            let started = Instant::now();

            match self.try_connect().await {
                Ok(()) => info!("WebSocket connection closed"),
                Err(e) => error!(error = %e, "WebSocket connection error"),
            }
            self.subscriptions.reset_active();

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            if started.elapsed() >= Duration::from_millis(self.config.stable_after_ms) {
                attempt = 0;
            }
            attempt += 1;
            self.reconnect_count.fetch_add(1, Ordering::Relaxed);

            if self.config.max_reconnect_attempts > 0
                && attempt > self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;

            let delay = backoff_delay(
                self.config.initial_backoff_ms,
                self.config.max_backoff_ms,
                attempt,
            );
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            // Cancellation-aware sleep
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to market channel");

        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = tokio::time::timeout(
                Duration::from_millis(self.config.connect_timeout_ms),
                connect,
            ) => match result {
                Ok(connected) => connected?,
                Err(_) => return Err(WsError::ConnectionFailed("connect timed out".to_string())),
            },
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        self.heartbeat.reset();
        info!("Market channel connected");

        let mut handshake_sent = false;
        self.sync_subscriptions(&mut write, &mut handshake_sent)
            .await?;

        let mut check = tokio::time::interval(self.heartbeat.check_period());
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }

                () = self.resync.notified() => {
                    self.sync_subscriptions(&mut write, &mut handshake_sent).await?;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Market channel closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Market channel read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Market channel stream ended");
                            return Ok(());
                        }
                        _ => {
                            self.heartbeat.record_message();
                        }
                    }
                }

                _ = check.tick() => {
                    let now = Utc::now();
                    if self.heartbeat.is_timed_out_at(now) {
                        error!("Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping_at(now) {
                        write.send(Message::Text(PING.to_string())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat PING");
                    }
                }
            }
        }
    }

    async fn handle_text_message(&self, text: &str) {
        self.heartbeat.record_message();

        if text.trim() == PONG {
            self.heartbeat.record_pong();
            return;
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, len = text.len(), "Ignoring non-JSON frame");
                return;
            }
        };

        if self.message_tx.send(value).await.is_err() {
            warn!("Message receiver dropped");
        }
    }

    /// Send whatever subscribe/unsubscribe frames bring the connection in
    /// line with the desired set.
    async fn sync_subscriptions(
        &self,
        write: &mut WsWrite,
        handshake_sent: &mut bool,
    ) -> WsResult<()> {
        let diff = self.subscriptions.diff();
        if diff.is_empty() {
            return Ok(());
        }

        for frame in subscription_frames(&diff, *handshake_sent) {
            write.send(Message::Text(frame.to_string())).await?;
        }
        if !diff.subscribe.is_empty() {
            *handshake_sent = true;
        }
        self.subscriptions.apply(&diff);

        info!(
            subscribed = diff.subscribe.len(),
            unsubscribed = diff.unsubscribe.len(),
            active = self.subscriptions.active_count(),
            "Market subscriptions synced"
        );
        Ok(())
    }
}

/// Frames for a subscription diff.
///
/// The first subscription on a connection uses the channel handshake
/// message; later changes use operation messages.
fn subscription_frames(diff: &SubscriptionDiff, handshake_sent: bool) -> Vec<Value> {
    let mut frames = Vec::new();
    if !diff.subscribe.is_empty() {
        if handshake_sent {
            frames.push(json!({
                "operation": "subscribe",
                "assets_ids": diff.subscribe,
            }));
        } else {
            frames.push(json!({
                "type": "market",
                "assets_ids": diff.subscribe,
            }));
        }
    }
    if !diff.unsubscribe.is_empty() && handshake_sent {
        frames.push(json!({
            "operation": "unsubscribe",
            "assets_ids": diff.unsubscribe,
        }));
    }
    frames
}

/// Exponential backoff: `initial * 2^(attempt-1)`, capped at `max`.
pub fn backoff_delay(initial_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = initial_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0); // Infinite
        assert!(config.initial_backoff_ms <= config.max_backoff_ms);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(500, 8000, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 8000, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 8000, 4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(500, 8000, 5), Duration::from_millis(8000));
        assert_eq!(backoff_delay(500, 8000, 60), Duration::from_millis(8000));
    }

    #[test]
    fn test_first_frame_is_handshake() {
        let diff = SubscriptionDiff {
            subscribe: vec!["a".to_string()],
            unsubscribe: vec![],
        };
        let frames = subscription_frames(&diff, false);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "market");
        assert_eq!(frames[0]["assets_ids"][0], "a");
    }

    #[test]
    fn test_later_changes_use_operations() {
        let diff = SubscriptionDiff {
            subscribe: vec!["c".to_string()],
            unsubscribe: vec!["a".to_string()],
        };
        let frames = subscription_frames(&diff, true);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["operation"], "subscribe");
        assert_eq!(frames[1]["operation"], "unsubscribe");
    }

    #[test]
    fn test_update_subscriptions_before_connect() {
        let (tx, _rx) = mpsc::channel(1);
        let manager = ConnectionManager::new(ConnectionConfig::default(), tx);
        manager.update_subscriptions(vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(manager.subscriptions().desired_count(), 2);
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
