//! digsinet command line interface.
//!
//! One binary, two parts: invoked by a user it is the CLI that spawns and
//! supervises controller processes; re-executed with role markers in the
//! environment it becomes the controller itself.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Instrument};

use digsinet::bootstrap;
use digsinet::config::Config;
use digsinet::controller::{
    self, ControllerProcess, ControllerRole, RealnetController, SiblingController,
};
use digsinet::topology::{self, ClabDeployer, TopologyDeployer};

/// digsinet command line interface
#[derive(Parser, Debug)]
#[command(name = "digsinet")]
#[command(about = "Digital twin network orchestration", long_about = None)]
struct Args {
    /// Deploy the real topology and start all controllers
    #[arg(long)]
    start: bool,

    /// Stop all siblings and cleanup containers
    #[arg(long)]
    stop: bool,

    /// Path to configuration file, defaults to digsinet.yml
    #[arg(long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let role = match ControllerRole::from_env() {
        Ok(role) => role,
        Err(err) => {
            // No subscriber is up yet; this has to go to stderr directly.
            eprintln!("digsinet: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(role) = role {
        return controller_main(role).await;
    }

    let args = Args::parse();
    bootstrap::init_tracing(args.debug);

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if args.stop {
        return stop(&config).await;
    }
    if args.start {
        return start(&config, args.config.as_deref(), args.debug).await;
    }
    warn!("Nothing to do; pass --start or --stop");
    ExitCode::SUCCESS
}

/// Entry point for spawned controller processes.
async fn controller_main(role: ControllerRole) -> ExitCode {
    bootstrap::init_tracing(false);

    let config = match Config::load(None) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(controller = %role.name(), error = %err, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    let real_topology = match topology::load_definition(&config.topology.file) {
        Ok(definition) => definition,
        Err(err) => {
            error!(controller = %role.name(), error = %err, "Failed to load real topology definition");
            return ExitCode::FAILURE;
        }
    };

    let deployer: Arc<dyn TopologyDeployer> = Arc::new(ClabDeployer);
    let span = tracing::info_span!("controller", name = %role.name());
    let result = async {
        match &role {
            ControllerRole::Realnet => {
                let realnet =
                    RealnetController::new(Arc::clone(&config), &real_topology, deployer);
                controller::run(realnet, &config).await
            }
            ControllerRole::Sibling { name } => {
                let sibling = SiblingController::new(
                    name.clone(),
                    Arc::clone(&config),
                    real_topology.clone(),
                    deployer,
                );
                controller::run(sibling, &config).await
            }
        }
    }
    .instrument(span)
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(controller = %role.name(), error = %err, "Controller terminated");
            ExitCode::FAILURE
        }
    }
}

/// Parent-mode `--start`: spawn every controller, then supervise.
async fn start(config: &Config, config_path: Option<&str>, debug: bool) -> ExitCode {
    // Surface topology problems before any process spawns.
    let definition = match topology::load_definition(&config.topology.file) {
        Ok(definition) => definition,
        Err(err) => {
            error!(error = %err, "Failed to load real topology definition");
            return ExitCode::FAILURE;
        }
    };
    info!(
        topology = %config.topology.file.display(),
        nodes = topology::node_names(&definition).len(),
        siblings = config.siblings.len(),
        "Starting digsinet"
    );

    // Siblings come up first so their subscriptions are live before the
    // realnet publishes its first build request.
    let mut siblings: Vec<ControllerProcess> = Vec::new();
    for sibling in &config.siblings {
        let role = ControllerRole::Sibling {
            name: sibling.name.clone(),
        };
        match controller::spawn(&role, config_path, debug) {
            Ok(process) => siblings.push(process),
            Err(err) => {
                error!(sibling = %sibling.name, error = %err, "Failed to spawn sibling controller");
                shutdown(siblings).await;
                return ExitCode::FAILURE;
            }
        }
    }

    let mut realnet = match controller::spawn(&ControllerRole::Realnet, config_path, debug) {
        Ok(process) => process,
        Err(err) => {
            error!(error = %err, "Failed to spawn realnet controller");
            shutdown(siblings).await;
            return ExitCode::FAILURE;
        }
    };

    let status = match realnet.join().await {
        Ok(status) => status,
        Err(err) => {
            error!(error = %err, "Failed to join realnet controller");
            shutdown(siblings).await;
            return ExitCode::FAILURE;
        }
    };
    shutdown(siblings).await;

    if status.success() {
        info!("Realnet controller completed");
        ExitCode::SUCCESS
    } else {
        error!(status = %status, "Realnet controller failed");
        ExitCode::FAILURE
    }
}

/// Kill sibling controllers; they run until told otherwise.
async fn shutdown(mut siblings: Vec<ControllerProcess>) {
    for process in &mut siblings {
        if let Err(err) = process.kill().await {
            warn!(controller = %process.name(), error = %err, "Failed to kill sibling controller");
        }
    }
}

/// Parent-mode `--stop`: destroy the sibling labs, then the real one.
async fn stop(config: &Config) -> ExitCode {
    let deployer = ClabDeployer;
    let mut failed = false;
    for sibling in &config.siblings {
        let path = config.sibling_topology_path(&sibling.name);
        if !path.exists() {
            info!(sibling = %sibling.name, "No generated topology; skipping");
            continue;
        }
        if let Err(err) = deployer.destroy(&path).await {
            warn!(sibling = %sibling.name, error = %err, "Failed to destroy sibling topology");
            failed = true;
        }
    }
    if let Err(err) = deployer.destroy(&config.topology.file).await {
        error!(error = %err, "Failed to destroy real topology");
        failed = true;
    }
    if failed {
        ExitCode::FAILURE
    } else {
        info!("All topologies destroyed");
        ExitCode::SUCCESS
    }
}
