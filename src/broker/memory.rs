//! In-memory implementation of the event broker.
//!
//! Delivery happens over tokio broadcast channels inside one process, so
//! this backend cannot coordinate controllers running in separate OS
//! processes and is not selectable from configuration. It exists to run
//! the full coordination protocol inside a single test binary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{wait_out_window, BrokerError, EventBroker, Message, Result, Subscription};

/// Buffered messages per channel before older ones are dropped.
const CHANNEL_CAPACITY: usize = 1024;

/// Shared hub owning one broadcast channel per channel name.
///
/// Brokers attached to the same hub see each other's traffic; the hub plays
/// the role the NATS server plays for [`super::NatsBroker`].
pub struct MemoryHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryHub {
    /// Hub with the default per-channel capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Hub with an explicit per-channel capacity.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        })
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on a channel. Lets tests wait until a
    /// peer has subscribed before publishing.
    pub async fn receiver_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }
}

/// Event broker local to one process, attached to a [`MemoryHub`].
///
/// Delivery groups are not modeled: every subscriber sees every message.
pub struct MemoryBroker {
    hub: Arc<MemoryHub>,
    channels: Vec<String>,
    receivers: HashMap<String, broadcast::Receiver<Bytes>>,
    closed: bool,
}

impl MemoryBroker {
    /// Broker attached to `hub` with an initial channel set.
    pub fn new(hub: Arc<MemoryHub>, channels: Vec<String>) -> Self {
        Self {
            hub,
            channels,
            receivers: HashMap::new(),
            closed: false,
        }
    }

    fn open(&self) -> Result<()> {
        if self.closed {
            Err(BrokerError::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventBroker for MemoryBroker {
    async fn publish(&mut self, channel: &str, data: Value) -> Result<()> {
        self.open()?;
        // The channel set is informational; publishing outside it is
        // suspicious but still goes out.
        if !self.channels.iter().any(|c| c == channel) {
            warn!(channel = %channel, "Publishing to unknown sibling channel");
        }
        let sender = self.hub.sender(channel).await;
        let payload = Bytes::from(data.to_string().into_bytes());
        if sender.send(payload).is_err() {
            debug!(channel = %channel, "No subscribers on channel; message dropped");
        } else {
            debug!(channel = %channel, "Published message");
        }
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str, group: Option<&str>) -> Result<Subscription> {
        self.open()?;
        if self.receivers.contains_key(channel) {
            warn!(channel = %channel, "Already subscribed to channel");
            return Ok(Subscription::new(channel));
        }
        let receiver = self.hub.sender(channel).await.subscribe();
        self.receivers.insert(channel.to_string(), receiver);
        info!(channel = %channel, group = ?group, "Subscribed to channel");
        Ok(Subscription::new(channel))
    }

    async fn poll(&mut self, subscription: &Subscription, timeout: Duration) -> Option<Message> {
        let Some(receiver) = self.receivers.get_mut(subscription.channel()) else {
            warn!(channel = %subscription.channel(), "Poll on unknown subscription");
            return Some(Message::from_error(format!(
                "no subscription for channel '{}'",
                subscription.channel()
            )));
        };
        let started = Instant::now();
        match tokio::time::timeout(timeout, receiver.recv()).await {
            // Window elapsed without traffic.
            Err(_) => None,
            Ok(Ok(payload)) => Some(Message::new(payload)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!(channel = %subscription.channel(), skipped, "Subscriber lagged; messages dropped");
                Some(Message::from_error(format!(
                    "subscriber lagged by {skipped} messages"
                )))
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                error!(channel = %subscription.channel(), "Channel closed");
                wait_out_window(started, timeout).await;
                None
            }
        }
    }

    fn get_sibling_channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    async fn new_sibling_channel(&mut self, channel: &str) -> Result<()> {
        self.open()?;
        if self.channels.iter().any(|c| c == channel) {
            debug!(channel = %channel, "Sibling channel already registered");
            return Ok(());
        }
        // Pre-create the broadcast channel so peers can subscribe first.
        self.hub.sender(channel).await;
        self.channels.push(channel.to_string());
        debug!(channel = %channel, "Registered sibling channel");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open()?;
        self.closed = true;
        for (channel, receiver) in self.receivers.drain() {
            drop(receiver);
            info!(channel = %channel, "Subscription closed");
        }
        self.channels.clear();
        info!("In-memory event broker closed");
        Ok(())
    }

    async fn close_consumer(&mut self, subscription: &Subscription) -> Result<()> {
        self.open()?;
        match self.receivers.remove(subscription.channel()) {
            Some(receiver) => {
                drop(receiver);
                info!(channel = %subscription.channel(), "Subscription closed");
                Ok(())
            }
            None => {
                warn!(channel = %subscription.channel(), "No subscription for channel; nothing to close");
                Ok(())
            }
        }
    }
}
