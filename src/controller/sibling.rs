//! Sibling topology controllers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::broker::{self, EventBroker};
use crate::config::Config;
use crate::controller::protocol::ProtocolMessage;
use crate::controller::{Controller, ControllerError};
use crate::topology::{self, TopologyDeployer};

/// How long each idle poll waits before the loop comes around again.
const IDLE_POLL_WINDOW: Duration = Duration::from_secs(1);

/// Controller of one sibling topology.
///
/// Waits on its own channel for build requests, derives its topology from
/// the real one, deploys it, and reports the outcome to the requester.
pub struct SiblingController {
    name: String,
    config: Arc<Config>,
    real_topology: Value,
    deployer: Arc<dyn TopologyDeployer>,
}

impl SiblingController {
    pub fn new(
        name: impl Into<String>,
        config: Arc<Config>,
        real_topology: Value,
        deployer: Arc<dyn TopologyDeployer>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            real_topology,
            deployer,
        }
    }

    /// Build this sibling's topology and describe the outcome.
    ///
    /// Build failures are not fatal here: the response then carries
    /// `running: false` and the requester decides what to do with the
    /// degraded sibling.
    async fn build_topology(&self) -> ProtocolMessage {
        let definition = topology::clone_for_sibling(&self.real_topology, &self.name);
        let path = self.config.sibling_topology_path(&self.name);
        let running = match topology::write_definition(&path, &definition) {
            Ok(()) => match self.deployer.deploy(&path).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(sibling = %self.name, error = %err, "Sibling topology deployment failed");
                    false
                }
            },
            Err(err) => {
                warn!(sibling = %self.name, error = %err, "Failed to write sibling topology file");
                false
            }
        };
        info!(sibling = %self.name, running, "Sibling topology build finished");
        ProtocolMessage::BuildResponse {
            source: self.name.clone(),
            sibling: self.name.clone(),
            nodes: topology::node_names(&definition).into(),
            interfaces: topology::interface_names(&definition).into(),
            topology: definition,
            running,
        }
    }
}

#[async_trait]
impl Controller for SiblingController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn orchestrate(&mut self, broker: &mut dyn EventBroker) -> Result<(), ControllerError> {
        let subscription = broker.subscribe(&self.name, None).await?;
        info!(sibling = %self.name, "Entering sibling main loop");
        loop {
            let Some(message) = broker.poll(&subscription, IDLE_POLL_WINDOW).await else {
                continue;
            };
            if let Some(error) = message.error() {
                warn!(sibling = %self.name, error = %error, "Consumer error; continuing");
                continue;
            }
            let Some(raw) = message.value() else {
                continue;
            };
            match serde_json::from_slice::<ProtocolMessage>(raw) {
                Ok(ProtocolMessage::BuildRequest { source, sibling }) if sibling == self.name => {
                    info!(sibling = %self.name, source = %source, "Received topology build request");
                    let response = self.build_topology().await;
                    broker.new_sibling_channel(&source).await?;
                    broker
                        .publish(&source, broker::to_payload(&response))
                        .await?;
                    debug!(sibling = %self.name, requester = %source, "Topology build response published");
                }
                Ok(_) => {
                    debug!(sibling = %self.name, "Ignoring message not addressed to this sibling")
                }
                Err(err) => {
                    debug!(sibling = %self.name, error = %err, "Ignoring undecodable message")
                }
            }
        }
    }
}
