//! Containerlab topology definitions.
//!
//! Definitions are YAML files handled as untyped JSON values: controllers
//! only ever rename, copy, and inspect them, so a typed model of the full
//! containerlab schema would buy nothing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::info;

/// Containerlab binary name.
const CLAB_BIN: &str = "clab";

/// Topology file and deployment errors.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Failed to read topology file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse topology: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to run '{command}': {source}")]
    CommandSpawn {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
    },
}

/// Read a topology definition from a YAML file.
pub fn load_definition(path: &Path) -> Result<Value, TopologyError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let definition = serde_yaml::from_str(&raw)?;
    Ok(definition)
}

/// Write a topology definition to a YAML file.
pub fn write_definition(path: &Path, definition: &Value) -> Result<(), TopologyError> {
    let raw = serde_yaml::to_string(definition)?;
    std::fs::write(path, raw).map_err(|source| TopologyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Derive a sibling's topology from the real one.
///
/// The clone is identical except for the lab name, which gets the sibling
/// name appended so both labs can run on one host.
pub fn clone_for_sibling(real: &Value, sibling: &str) -> Value {
    let mut clone = real.clone();
    let name = match real.get("name").and_then(Value::as_str) {
        Some(base) => format!("{base}_{sibling}"),
        None => sibling.to_string(),
    };
    if let Some(object) = clone.as_object_mut() {
        object.insert("name".to_string(), Value::String(name));
    }
    clone
}

/// Node names defined in a topology.
pub fn node_names(definition: &Value) -> Vec<String> {
    definition
        .pointer("/topology/nodes")
        .and_then(Value::as_object)
        .map(|nodes| nodes.keys().cloned().collect())
        .unwrap_or_default()
}

/// Interface endpoints (`node:interface`) referenced by a topology's links.
pub fn interface_names(definition: &Value) -> Vec<String> {
    let Some(links) = definition.pointer("/topology/links").and_then(Value::as_array) else {
        return Vec::new();
    };
    links
        .iter()
        .filter_map(|link| link.get("endpoints").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// Deploys and destroys topology definitions on the host.
#[async_trait]
pub trait TopologyDeployer: Send + Sync {
    /// Bring the topology up.
    async fn deploy(&self, topology_file: &Path) -> Result<(), TopologyError>;

    /// Tear the topology down and clean up its containers.
    async fn destroy(&self, topology_file: &Path) -> Result<(), TopologyError>;
}

/// Deployer that shells out to the containerlab binary.
pub struct ClabDeployer;

impl ClabDeployer {
    async fn run(&self, args: Vec<String>) -> Result<(), TopologyError> {
        let command = format!("{} {}", CLAB_BIN, args.join(" "));
        info!(command = %command, "Running containerlab");
        let status = Command::new(CLAB_BIN)
            .args(&args)
            .status()
            .await
            .map_err(|source| TopologyError::CommandSpawn {
                command: command.clone(),
                source,
            })?;
        if !status.success() {
            return Err(TopologyError::CommandFailed { command, status });
        }
        info!(command = %command, "Containerlab finished");
        Ok(())
    }
}

#[async_trait]
impl TopologyDeployer for ClabDeployer {
    async fn deploy(&self, topology_file: &Path) -> Result<(), TopologyError> {
        self.run(vec![
            "deploy".to_string(),
            "-t".to_string(),
            topology_file.display().to_string(),
        ])
        .await
    }

    async fn destroy(&self, topology_file: &Path) -> Result<(), TopologyError> {
        self.run(vec![
            "destroy".to_string(),
            "-t".to_string(),
            topology_file.display().to_string(),
            "--cleanup".to_string(),
        ])
        .await
    }
}
