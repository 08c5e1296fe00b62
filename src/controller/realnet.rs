//! Controller of the real network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::broker::{self, EventBroker, Subscription};
use crate::config::Config;
use crate::controller::protocol::ProtocolMessage;
use crate::controller::{Controller, ControllerError, REALNET_NAME};
use crate::topology::{self, TopologyDeployer};

/// Everything the realnet knows about one built sibling.
///
/// A record exists only once the sibling's build response has arrived, so
/// a present record is always complete.
#[derive(Debug, Clone, PartialEq)]
pub struct SiblingRecord {
    /// The sibling's topology definition.
    pub topology: Value,
    /// Nodes of the sibling topology, exactly as the sibling reported them.
    pub nodes: Value,
    /// Interfaces of the sibling topology, exactly as reported.
    pub interfaces: Value,
    /// Whether the sibling topology is deployed and running.
    pub running: bool,
}

/// Controller of the real network.
///
/// Deploys the real topology, then asks each configured sibling in turn to
/// build its own and collects the responses. Sibling topologies are
/// deployed by their controllers, never from here.
pub struct RealnetController {
    config: Arc<Config>,
    real_nodes: Vec<String>,
    deployer: Arc<dyn TopologyDeployer>,
    records: HashMap<String, SiblingRecord>,
}

impl RealnetController {
    pub fn new(
        config: Arc<Config>,
        real_topology: &Value,
        deployer: Arc<dyn TopologyDeployer>,
    ) -> Self {
        let real_nodes = topology::node_names(real_topology);
        Self {
            config,
            real_nodes,
            deployer,
            records: HashMap::new(),
        }
    }

    /// Nodes of the real network topology.
    pub fn real_nodes(&self) -> &[String] {
        &self.real_nodes
    }

    /// Build record for a sibling, if its response has arrived.
    pub fn sibling(&self, name: &str) -> Option<&SiblingRecord> {
        self.records.get(name)
    }

    /// Number of siblings with a completed build.
    pub fn built_siblings(&self) -> usize {
        self.records.len()
    }

    /// Wait for one sibling's build response on the realnet channel.
    ///
    /// Each poll waits a full `timeout` window; a window that elapses with
    /// no message at all, or a consumer error, aborts the whole build
    /// round. Messages that are not the awaited response keep the wait
    /// going without resetting anything else.
    async fn await_build_response(
        broker: &mut dyn EventBroker,
        subscription: &Subscription,
        sibling: &str,
        timeout: Duration,
    ) -> Result<SiblingRecord, ControllerError> {
        loop {
            let Some(message) = broker.poll(subscription, timeout).await else {
                return Err(ControllerError::BuildTimeout {
                    sibling: sibling.to_string(),
                });
            };
            if let Some(error) = message.error() {
                return Err(ControllerError::Consumer {
                    sibling: sibling.to_string(),
                    message: error.to_string(),
                });
            }
            let Some(raw) = message.value() else {
                continue;
            };
            match serde_json::from_slice::<ProtocolMessage>(raw) {
                Ok(ProtocolMessage::BuildResponse {
                    sibling: responder,
                    topology,
                    nodes,
                    interfaces,
                    running,
                    ..
                }) if responder == sibling => {
                    return Ok(SiblingRecord {
                        topology,
                        nodes,
                        interfaces,
                        running,
                    });
                }
                Ok(_) => {
                    debug!(sibling = %sibling, "Ignoring message not matching awaited build response")
                }
                Err(err) => debug!(sibling = %sibling, error = %err, "Ignoring undecodable message"),
            }
        }
    }
}

#[async_trait]
impl Controller for RealnetController {
    fn name(&self) -> &str {
        REALNET_NAME
    }

    async fn orchestrate(&mut self, broker: &mut dyn EventBroker) -> Result<(), ControllerError> {
        match self.deployer.deploy(&self.config.topology.file).await {
            Ok(()) => info!(nodes = self.real_nodes.len(), "Real topology deployed"),
            Err(err) => warn!(error = %err, "Real topology deployment failed; continuing"),
        }

        info!("Entering realnet main loop");
        let subscription = broker.subscribe(REALNET_NAME, None).await?;

        let timeout = self.config.sibling_timeout();
        for sibling in self.config.sibling_names() {
            info!(sibling = %sibling, "Requesting topology build from sibling");
            broker.new_sibling_channel(&sibling).await?;
            broker
                .publish(
                    &sibling,
                    broker::to_payload(&ProtocolMessage::BuildRequest {
                        source: REALNET_NAME.to_string(),
                        sibling: sibling.clone(),
                    }),
                )
                .await?;

            info!(sibling = %sibling, "Waiting for topology build response");
            let record =
                Self::await_build_response(broker, &subscription, &sibling, timeout).await?;
            debug!(sibling = %sibling, running = record.running, "Topology build response received");
            self.records.insert(sibling, record);
        }

        // TODO: steady-state loop syncing realnet state into the siblings
        Ok(())
    }
}
