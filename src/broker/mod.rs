//! Event broker for inter-controller coordination.
//!
//! This module contains:
//! - `EventBroker` trait: publish/subscribe delivery between controllers
//! - `Message` and `Subscription` types returned by broker operations
//! - Broker configuration types
//! - Implementations: NATS, in-memory (single process, for tests)
//!
//! Controllers run in separate OS processes and never call each other
//! directly; every cross-controller interaction goes through this trait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::info;

// Implementation modules
pub mod memory;
pub mod nats;

// Re-exports
pub use memory::{MemoryBroker, MemoryHub};
pub use nats::{NatsBroker, NatsConfig};

// ============================================================================
// Traits
// ============================================================================

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Unsubscribe failed: {0}")]
    Unsubscribe(String),

    #[error("Broker is already closed")]
    AlreadyClosed,
}

/// Handle to an active channel subscription.
///
/// Returned by [`EventBroker::subscribe`] and passed back to
/// [`EventBroker::poll`] and [`EventBroker::close_consumer`]. Subscribing to
/// the same channel twice yields an equal handle, so handles can be compared
/// to detect duplicate subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    channel: String,
}

impl Subscription {
    /// Create a handle for a channel. Backends construct these in
    /// `subscribe`; consumers only pass them back.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// Channel this subscription consumes from.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// A single message received from a channel.
///
/// Either carries a payload or a consumer-side error description. Consumers
/// check [`Message::error`] first; an error message means the subscription
/// itself failed, not that a peer sent bad data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Option<Bytes>,
    error: Option<String>,
}

impl Message {
    /// Message carrying a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: Some(payload.into()),
            error: None,
        }
    }

    /// Message carrying a consumer error instead of a payload.
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Raw payload bytes, if this is a data message.
    pub fn value(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Consumer error description, if the subscription failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Interface for cross-controller pub/sub delivery.
///
/// One broker instance belongs to one controller process. Channels are
/// identified by controller name: each controller subscribes to its own
/// channel and publishes to the channels of the controllers it addresses.
///
/// Implementations:
/// - `NatsBroker`: NATS core pub/sub
/// - `MemoryBroker`: in-process broadcast channels for testing
#[async_trait]
pub trait EventBroker: Send {
    /// Publish a payload to a channel.
    ///
    /// The channel set registered at construction or via
    /// [`EventBroker::new_sibling_channel`] is informational, not an access
    /// control boundary: publishing to a channel outside it logs a warning
    /// but the publish still goes out.
    async fn publish(&mut self, channel: &str, data: Value) -> Result<()>;

    /// Subscribe to a channel, optionally as part of a delivery group.
    ///
    /// Within a delivery group each message goes to exactly one group
    /// member. Subscribing twice to the same channel logs a warning and
    /// returns the existing handle.
    async fn subscribe(&mut self, channel: &str, group: Option<&str>) -> Result<Subscription>;

    /// Wait up to `timeout` for the next message on a subscription.
    ///
    /// Returns `None` when the window elapses without a message. A
    /// subscription whose transport dies mid-wait is logged, holds the rest
    /// of the window, and then also yields `None`; callers distinguish
    /// "nothing arrived" from "broker broke" through error-bearing messages
    /// where the backend can produce them.
    async fn poll(&mut self, subscription: &Subscription, timeout: Duration) -> Option<Message>;

    /// Channels currently registered with this broker.
    fn get_sibling_channels(&self) -> Vec<String>;

    /// Register an additional channel for later publishes.
    ///
    /// Registering a channel that is already known is a no-op.
    async fn new_sibling_channel(&mut self, channel: &str) -> Result<()>;

    /// Close the broker: tear down all subscriptions, flush pending
    /// publishes, and release the transport. Closing twice is an error.
    async fn close(&mut self) -> Result<()>;

    /// Tear down a single subscription.
    ///
    /// Closing a subscription this broker does not hold logs a warning and
    /// is otherwise a no-op.
    async fn close_consumer(&mut self, subscription: &Subscription) -> Result<()>;
}

// ============================================================================
// Poll windows
// ============================================================================

/// Sleep out whatever remains of a poll window started at `started`.
///
/// Pollers treat `None` as a full window elapsing and immediately come
/// around again; a dead subscription that resolved instantly would spin
/// their idle loops flat out.
async fn wait_out_window(started: Instant, window: Duration) {
    let remaining = window.saturating_sub(started.elapsed());
    if !remaining.is_zero() {
        sleep(remaining).await;
    }
}

// ============================================================================
// Payload serialization
// ============================================================================

/// Placeholder substituted for payloads that cannot be serialized.
pub const NOT_SERIALIZABLE: &str = "<not serializable>";

/// Convert a payload into a JSON value for publication.
///
/// Publishing never fails on a bad payload: anything `serde_json` cannot
/// represent is replaced with the [`NOT_SERIALIZABLE`] placeholder string.
pub fn to_payload<T>(data: &T) -> Value
where
    T: Serialize + ?Sized,
{
    serde_json::to_value(data).unwrap_or_else(|_| Value::String(NOT_SERIALIZABLE.to_string()))
}

// ============================================================================
// Configuration
// ============================================================================

/// Broker selection, resolved once at startup.
///
/// The tag picks the backend; the remaining fields configure it. The
/// in-memory broker is deliberately absent: it cannot span the OS processes
/// controllers run in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrokerConfig {
    /// NATS core pub/sub.
    Nats(NatsConfig),
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize an event broker from configuration.
///
/// `channels` is the initial channel set, derived from the identity of the
/// controller that owns the broker.
pub async fn init_event_broker(
    config: &BrokerConfig,
    channels: Vec<String>,
) -> Result<Box<dyn EventBroker>> {
    match config {
        BrokerConfig::Nats(nats_config) => {
            let broker = NatsBroker::connect(nats_config, channels).await?;
            info!(broker_type = "nats", "Event broker initialized");
            Ok(Box::new(broker))
        }
    }
}
