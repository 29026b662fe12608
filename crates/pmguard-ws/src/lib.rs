//! Market-channel WebSocket client for pmguard.
//!
//! Provides a best-effort price stream with:
//! - Automatic reconnection with bounded exponential backoff
//! - A dynamic subscription set, diffed into subscribe/unsubscribe frames
//! - Text-level PING/PONG heartbeat with timeout detection
//! - Cancellation-aware shutdown (including a pending reconnect sleep)

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod subscription;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use subscription::{SubscriptionDiff, SubscriptionSet};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
