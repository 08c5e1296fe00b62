//! Shared test doubles.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::broker::{BrokerError, EventBroker, Message, Result, Subscription};
use crate::topology::{TopologyDeployer, TopologyError};

/// Broker double with pre-scripted poll results.
///
/// Records publishes, registrations, and close calls so tests can assert
/// on the exact broker interaction sequence. An exhausted poll script
/// behaves like an elapsed timeout window.
pub struct ScriptedBroker {
    pub polls: VecDeque<Option<Message>>,
    pub published: Vec<(String, Value)>,
    pub channels: Vec<String>,
    close_calls: Arc<AtomicUsize>,
}

impl ScriptedBroker {
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            polls: VecDeque::new(),
            published: Vec::new(),
            channels,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_polls(channels: Vec<String>, polls: Vec<Option<Message>>) -> Self {
        Self {
            polls: polls.into(),
            ..Self::new(channels)
        }
    }

    /// Counter shared with the broker; survives the broker being consumed
    /// by the lifecycle functions.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }
}

#[async_trait]
impl EventBroker for ScriptedBroker {
    async fn publish(&mut self, channel: &str, data: Value) -> Result<()> {
        self.published.push((channel.to_string(), data));
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str, _group: Option<&str>) -> Result<Subscription> {
        Ok(Subscription::new(channel))
    }

    async fn poll(&mut self, _subscription: &Subscription, _timeout: Duration) -> Option<Message> {
        self.polls.pop_front().unwrap_or(None)
    }

    fn get_sibling_channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    async fn new_sibling_channel(&mut self, channel: &str) -> Result<()> {
        if !self.channels.iter().any(|c| c == channel) {
            self.channels.push(channel.to_string());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.close_calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(BrokerError::AlreadyClosed);
        }
        Ok(())
    }

    async fn close_consumer(&mut self, _subscription: &Subscription) -> Result<()> {
        Ok(())
    }
}

/// Deployer that does nothing and always succeeds.
pub struct NullDeployer;

#[async_trait]
impl TopologyDeployer for NullDeployer {
    async fn deploy(&self, _topology_file: &Path) -> std::result::Result<(), TopologyError> {
        Ok(())
    }

    async fn destroy(&self, _topology_file: &Path) -> std::result::Result<(), TopologyError> {
        Ok(())
    }
}

/// Deployer whose deploys always fail, for exercising degraded builds.
pub struct FailingDeployer;

#[async_trait]
impl TopologyDeployer for FailingDeployer {
    async fn deploy(&self, topology_file: &Path) -> std::result::Result<(), TopologyError> {
        use std::os::unix::process::ExitStatusExt;
        Err(TopologyError::CommandFailed {
            command: format!("clab deploy -t {}", topology_file.display()),
            status: std::process::ExitStatus::from_raw(256),
        })
    }

    async fn destroy(&self, _topology_file: &Path) -> std::result::Result<(), TopologyError> {
        Ok(())
    }
}
