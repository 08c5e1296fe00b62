//! NATS implementation of the event broker.
//!
//! Uses core NATS pub/sub, no JetStream: build coordination is
//! request/response over short-lived subjects, so durable streams are not
//! needed. Channels map 1:1 to NATS subjects and delivery groups map to
//! NATS queue groups.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{wait_out_window, BrokerError, EventBroker, Message, Result, Subscription};

/// Default NATS server port.
const DEFAULT_PORT: u16 = 4222;

/// NATS connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl NatsConfig {
    /// Connection URL in `nats://host:port` form.
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

/// Event broker backed by a NATS server.
///
/// Tracks the channel set and the open subscribers of its owning
/// controller. `close` releases the client; afterwards every operation
/// fails with [`BrokerError::AlreadyClosed`].
pub struct NatsBroker {
    client: Option<async_nats::Client>,
    channels: Vec<String>,
    subscribers: HashMap<String, async_nats::Subscriber>,
}

impl NatsBroker {
    /// Connect to the configured server with an initial channel set.
    pub async fn connect(config: &NatsConfig, channels: Vec<String>) -> Result<Self> {
        let url = config.url();
        let client = async_nats::connect(url.as_str())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        info!(url = %url, channels = channels.len(), "Connected to NATS");
        Ok(Self {
            client: Some(client),
            channels,
            subscribers: HashMap::new(),
        })
    }

    fn client(&self) -> Result<&async_nats::Client> {
        self.client.as_ref().ok_or(BrokerError::AlreadyClosed)
    }
}

#[async_trait]
impl EventBroker for NatsBroker {
    async fn publish(&mut self, channel: &str, data: Value) -> Result<()> {
        let client = self.client()?;
        // The channel set is informational; publishing outside it is
        // suspicious but still goes out.
        if !self.channels.iter().any(|c| c == channel) {
            warn!(channel = %channel, "Publishing to unknown sibling channel");
        }
        client
            .publish(channel.to_string(), data.to_string().into_bytes().into())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        debug!(channel = %channel, "Published message");
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str, group: Option<&str>) -> Result<Subscription> {
        self.client()?;
        if self.subscribers.contains_key(channel) {
            warn!(channel = %channel, "Already subscribed to channel");
            return Ok(Subscription::new(channel));
        }
        let client = self.client()?;
        let subscriber = match group {
            Some(group) => {
                client
                    .queue_subscribe(channel.to_string(), group.to_string())
                    .await
            }
            None => client.subscribe(channel.to_string()).await,
        }
        .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        self.subscribers.insert(channel.to_string(), subscriber);
        info!(channel = %channel, group = ?group, "Subscribed to channel");
        Ok(Subscription::new(channel))
    }

    async fn poll(&mut self, subscription: &Subscription, timeout: Duration) -> Option<Message> {
        let Some(subscriber) = self.subscribers.get_mut(subscription.channel()) else {
            warn!(channel = %subscription.channel(), "Poll on unknown subscription");
            return Some(Message::from_error(format!(
                "no subscription for channel '{}'",
                subscription.channel()
            )));
        };
        let started = Instant::now();
        match tokio::time::timeout(timeout, subscriber.next()).await {
            // Window elapsed without traffic.
            Err(_) => None,
            Ok(Some(message)) => Some(Message::new(message.payload)),
            Ok(None) => {
                error!(channel = %subscription.channel(), "Subscription stream closed");
                // A dead stream resolves instantly; hold the rest of the
                // window so pollers keep their cadence.
                wait_out_window(started, timeout).await;
                None
            }
        }
    }

    fn get_sibling_channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    async fn new_sibling_channel(&mut self, channel: &str) -> Result<()> {
        self.client()?;
        if self.channels.iter().any(|c| c == channel) {
            debug!(channel = %channel, "Sibling channel already registered");
            return Ok(());
        }
        // NATS subjects need no server-side declaration; registration is
        // local bookkeeping that authorizes later publishes.
        self.channels.push(channel.to_string());
        debug!(channel = %channel, "Registered sibling channel");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let client = self.client.take().ok_or(BrokerError::AlreadyClosed)?;
        for (channel, mut subscriber) in self.subscribers.drain() {
            match subscriber.unsubscribe().await {
                Ok(()) => info!(channel = %channel, "Subscription closed"),
                Err(e) => warn!(channel = %channel, error = %e, "Failed to unsubscribe"),
            }
        }
        self.channels.clear();
        if let Err(e) = client.flush().await {
            warn!(error = %e, "Failed to flush NATS client on close");
        }
        info!("NATS event broker closed");
        Ok(())
    }

    async fn close_consumer(&mut self, subscription: &Subscription) -> Result<()> {
        self.client()?;
        match self.subscribers.remove(subscription.channel()) {
            Some(mut subscriber) => {
                subscriber
                    .unsubscribe()
                    .await
                    .map_err(|e| BrokerError::Unsubscribe(e.to_string()))?;
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
