//! Controller lifecycle.
//!
//! Every topology (the real network and each sibling) is owned by exactly
//! one controller running in its own OS process. The parent spawns
//! controllers by re-executing its own binary with role markers in the
//! environment; inside the child, [`run`] connects an event broker, hands
//! it to the controller, and closes it exactly once on the way out.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::broker::{self, BrokerError, EventBroker};
use crate::config::{Config, CONFIG_ENV_VAR, LOG_ENV_VAR, ROLE_ENV_VAR, SIBLING_ENV_VAR};

// Implementation modules
pub mod protocol;
pub mod realnet;
pub mod sibling;

// Re-exports
pub use realnet::{RealnetController, SiblingRecord};
pub use sibling::SiblingController;

/// Name (and broker channel) of the real network controller.
pub const REALNET_NAME: &str = "realnet";

/// Role marker value for the realnet controller process.
const ROLE_REALNET: &str = "realnet";
/// Role marker value for sibling controller processes.
const ROLE_SIBLING: &str = "sibling";

/// Controller lifecycle and coordination errors.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("No supported event broker configured")]
    NoBrokerConfigured,

    #[error("Broker failure: {0}")]
    Broker(#[from] BrokerError),

    #[error("Timed out waiting for topology build response from sibling '{sibling}'")]
    BuildTimeout { sibling: String },

    #[error("Consumer error while waiting for sibling '{sibling}': {message}")]
    Consumer { sibling: String, message: String },

    #[error("Invalid controller role: {0}")]
    InvalidRole(String),

    #[error("Failed to spawn controller process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to join controller process: {0}")]
    Join(#[source] std::io::Error),

    #[error("Failed to kill controller process: {0}")]
    Kill(#[source] std::io::Error),
}

/// A controller owns one topology and coordinates with its peers over the
/// event broker, never directly.
#[async_trait]
pub trait Controller: Send {
    /// Controller name; doubles as its broker channel.
    fn name(&self) -> &str;

    /// Run the controller's coordination logic to completion.
    ///
    /// The broker is connected before this is called and closed after it
    /// returns; implementations never close it themselves.
    async fn orchestrate(&mut self, broker: &mut dyn EventBroker) -> Result<(), ControllerError>;
}

/// Which controller a process hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerRole {
    /// Controller of the real network.
    Realnet,
    /// Controller of one sibling topology.
    Sibling { name: String },
}

impl ControllerRole {
    /// Controller name for this role.
    pub fn name(&self) -> &str {
        match self {
            ControllerRole::Realnet => REALNET_NAME,
            ControllerRole::Sibling { name } => name,
        }
    }

    /// Read the role markers a parent process put in the environment.
    ///
    /// `None` means no markers are present: the process is the parent CLI,
    /// not a spawned controller.
    pub fn from_env() -> Result<Option<Self>, ControllerError> {
        let Ok(role) = std::env::var(ROLE_ENV_VAR) else {
            return Ok(None);
        };
        Self::parse(&role, std::env::var(SIBLING_ENV_VAR).ok()).map(Some)
    }

    fn parse(role: &str, sibling: Option<String>) -> Result<Self, ControllerError> {
        match role {
            ROLE_REALNET => Ok(ControllerRole::Realnet),
            ROLE_SIBLING => match sibling {
                Some(name) if !name.is_empty() => Ok(ControllerRole::Sibling { name }),
                _ => Err(ControllerError::InvalidRole(format!(
                    "{SIBLING_ENV_VAR} must be set for sibling processes"
                ))),
            },
            other => Err(ControllerError::InvalidRole(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

/// Connect a broker per configuration and run the controller on it.
///
/// A missing broker configuration is fatal: controllers have no other way
/// to coordinate.
pub async fn run<C: Controller>(controller: C, config: &Config) -> Result<(), ControllerError> {
    let Some(broker_config) = config.broker.as_ref() else {
        error!(controller = %controller.name(), "No supported event broker configured; terminating");
        return Err(ControllerError::NoBrokerConfigured);
    };
    let channels = vec![controller.name().to_string()];
    let broker = broker::init_event_broker(broker_config, channels).await?;
    run_with_broker(controller, broker).await
}

/// Run a controller on an already connected broker.
///
/// The broker is closed exactly once after `orchestrate` returns, on
/// success and on failure alike.
pub async fn run_with_broker<C: Controller>(
    mut controller: C,
    mut broker: Box<dyn EventBroker>,
) -> Result<(), ControllerError> {
    info!(controller = %controller.name(), "Controller running");
    let result = controller.orchestrate(broker.as_mut()).await;
    if let Err(err) = broker.close().await {
        warn!(controller = %controller.name(), error = %err, "Failed to close event broker");
    }
    match &result {
        Ok(()) => info!(controller = %controller.name(), "Controller finished"),
        Err(err) => error!(controller = %controller.name(), error = %err, "Controller failed"),
    }
    result
}

/// Handle to a spawned controller process.
///
/// The child is killed when the handle drops, so an aborted parent does not
/// leave orphan controllers behind.
pub struct ControllerProcess {
    name: String,
    child: Child,
}

impl ControllerProcess {
    /// Controller name this process hosts.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the process to exit.
    pub async fn join(&mut self) -> Result<ExitStatus, ControllerError> {
        let status = self.child.wait().await.map_err(ControllerError::Join)?;
        info!(controller = %self.name, status = %status, "Controller process exited");
        Ok(status)
    }

    /// Kill the process and wait for it to be reaped.
    pub async fn kill(&mut self) -> Result<(), ControllerError> {
        self.child.kill().await.map_err(ControllerError::Kill)?;
        info!(controller = %self.name, "Controller process killed");
        Ok(())
    }
}

/// Spawn a controller in its own OS process.
///
/// Re-executes the current binary with role markers in the environment;
/// the child reads them at startup and runs the matching controller
/// instead of the CLI.
pub fn spawn(
    role: &ControllerRole,
    config_path: Option<&str>,
    debug: bool,
) -> Result<ControllerProcess, ControllerError> {
    let executable = std::env::current_exe().map_err(ControllerError::Spawn)?;
    let mut command = Command::new(&executable);
    match role {
        ControllerRole::Realnet => {
            command.env(ROLE_ENV_VAR, ROLE_REALNET);
        }
        ControllerRole::Sibling { name } => {
            command.env(ROLE_ENV_VAR, ROLE_SIBLING);
            command.env(SIBLING_ENV_VAR, name);
        }
    }
    if let Some(path) = config_path {
        command.env(CONFIG_ENV_VAR, path);
    }
    if debug {
        command.env(LOG_ENV_VAR, "debug");
    }
    command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    let child = command.spawn().map_err(ControllerError::Spawn)?;
    info!(controller = %role.name(), pid = ?child.id(), "Controller process spawned");
    Ok(ControllerProcess {
        name: role.name().to_string(),
        child,
    })
}
