//! End-to-end build protocol tests over the in-memory broker.
//!
//! The realnet and sibling controllers run against a shared hub the way
//! separate processes share a NATS server: every interaction crosses the
//! broker, nothing else.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use digsinet::broker::{MemoryBroker, MemoryHub};
use digsinet::config::{Config, SiblingConfig};
use digsinet::controller::{
    self, Controller, ControllerError, RealnetController, SiblingController, REALNET_NAME,
};
use digsinet::topology::{TopologyDeployer, TopologyError};

/// Deployer that succeeds without touching the host.
struct NullDeployer;

#[async_trait]
impl TopologyDeployer for NullDeployer {
    async fn deploy(&self, _topology_file: &Path) -> Result<(), TopologyError> {
        Ok(())
    }

    async fn destroy(&self, _topology_file: &Path) -> Result<(), TopologyError> {
        Ok(())
    }
}

/// Deployer whose deploys always fail.
struct FailingDeployer;

#[async_trait]
impl TopologyDeployer for FailingDeployer {
    async fn deploy(&self, topology_file: &Path) -> Result<(), TopologyError> {
        use std::os::unix::process::ExitStatusExt;
        Err(TopologyError::CommandFailed {
            command: format!("clab deploy -t {}", topology_file.display()),
            status: std::process::ExitStatus::from_raw(256),
        })
    }

    async fn destroy(&self, _topology_file: &Path) -> Result<(), TopologyError> {
        Ok(())
    }
}

fn real_topology() -> Value {
    json!({
        "name": "real",
        "topology": {
            "nodes": {
                "srl1": {"kind": "nokia_srlinux"},
                "srl2": {"kind": "nokia_srlinux"}
            },
            "links": [{"endpoints": ["srl1:e1-1", "srl2:e1-1"]}]
        }
    })
}

fn test_config(work_dir: &Path, siblings: &[&str], timeout_secs: f64) -> Arc<Config> {
    let mut config = Config::for_test();
    config.work_dir = work_dir.to_path_buf();
    config.sibling_timeout = timeout_secs;
    config.siblings = siblings
        .iter()
        .map(|name| SiblingConfig {
            name: name.to_string(),
        })
        .collect();
    Arc::new(config)
}

/// Run a sibling controller on its own task and wait until its channel
/// subscription is live, like the parent process does by starting siblings
/// before the realnet.
async fn start_sibling(
    hub: &Arc<MemoryHub>,
    config: &Arc<Config>,
    name: &str,
    deployer: Arc<dyn TopologyDeployer>,
) -> tokio::task::JoinHandle<()> {
    let mut controller =
        SiblingController::new(name, Arc::clone(config), real_topology(), deployer);
    let mut broker = MemoryBroker::new(Arc::clone(hub), vec![name.to_string()]);
    let handle = tokio::spawn(async move {
        let _ = controller.orchestrate(&mut broker).await;
    });

    let hub = Arc::clone(hub);
    let channel = name.to_string();
    tokio::time::timeout(Duration::from_secs(2), async move {
        while hub.receiver_count(&channel).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sibling subscribes before the build round starts");
    handle
}

#[tokio::test]
async fn test_build_round_over_shared_hub() {
    let dir = tempfile::tempdir().expect("temp dir");
    let hub = MemoryHub::new();
    let config = test_config(dir.path(), &["security", "capacity"], 5.0);

    let siblings = vec![
        start_sibling(&hub, &config, "security", Arc::new(NullDeployer)).await,
        start_sibling(&hub, &config, "capacity", Arc::new(NullDeployer)).await,
    ];

    let mut realnet =
        RealnetController::new(Arc::clone(&config), &real_topology(), Arc::new(NullDeployer));
    let mut broker = MemoryBroker::new(Arc::clone(&hub), vec![REALNET_NAME.to_string()]);
    realnet
        .orchestrate(&mut broker)
        .await
        .expect("build round completes");

    assert_eq!(realnet.built_siblings(), 2);
    for name in ["security", "capacity"] {
        let record = realnet.sibling(name).expect("record for built sibling");
        assert!(record.running);
        assert_eq!(record.nodes, json!(["srl1", "srl2"]));
        assert_eq!(record.interfaces, json!(["srl1:e1-1", "srl2:e1-1"]));
        assert_eq!(record.topology["name"], format!("real_{name}"));
        // The sibling wrote its derived definition into the work dir.
        assert!(dir.path().join(format!("{name}.clab.yml")).exists());
    }

    for handle in siblings {
        handle.abort();
    }
}

#[tokio::test]
async fn test_missing_sibling_times_out_and_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let hub = MemoryHub::new();
    let config = test_config(dir.path(), &["ghost"], 0.2);

    let realnet =
        RealnetController::new(Arc::clone(&config), &real_topology(), Arc::new(NullDeployer));
    let broker = MemoryBroker::new(Arc::clone(&hub), vec![REALNET_NAME.to_string()]);

    // Through the lifecycle wrapper, so the broker also gets closed.
    let result = controller::run_with_broker(realnet, Box::new(broker)).await;
    assert!(matches!(
        result,
        Err(ControllerError::BuildTimeout { sibling }) if sibling == "ghost"
    ));
}

#[tokio::test]
async fn test_degraded_sibling_build_still_completes_round() {
    let dir = tempfile::tempdir().expect("temp dir");
    let hub = MemoryHub::new();
    let config = test_config(dir.path(), &["security"], 5.0);

    let sibling = start_sibling(&hub, &config, "security", Arc::new(FailingDeployer)).await;

    let mut realnet =
        RealnetController::new(Arc::clone(&config), &real_topology(), Arc::new(NullDeployer));
    let mut broker = MemoryBroker::new(Arc::clone(&hub), vec![REALNET_NAME.to_string()]);
    realnet
        .orchestrate(&mut broker)
        .await
        .expect("degraded build response still completes the round");

    let record = realnet.sibling("security").expect("record");
    assert!(!record.running);
    sibling.abort();
}
