//! Mesh node simulator.
//!
//! Runs a number of mesh nodes over an in-process simulated radio medium.
//! Every node broadcasts a HELLO and listens; once discovery has settled, the
//! first node sends a message to each neighbor it found. When the run ends a
//! JSON report of every node's neighbors and counters is printed on stdout.

use anyhow::{bail, Context};
use clap::Parser;
use mesh_session::{
    id_of, Clock, MeshHandler, MeshSession, MonotonicClock, SenderAddr, SessionConfig,
    SessionStats, SimAir, SimRadio,
};
use mesh_storage::NeighborEntry;
use mesh_wire::{HwAddr, NeighborSummary, NodeId};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::info;

mod config;
mod logging;

use config::MeshConfig;

/// Radio address prefix shared by simulated nodes
const SIM_OUI: [u8; 4] = [0x24, 0x6F, 0x28, 0x00];

/// Mesh node simulator
#[derive(Parser, Debug)]
#[command(name = "pico-mesh", version, about = "Simulate pico-mesh nodes over a shared radio medium")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of simulated nodes
    #[arg(long, default_value_t = 4)]
    nodes: u16,

    /// Total run time, e.g. 2s
    #[arg(long, default_value = "2s")]
    duration: humantime::Duration,

    /// Message the first node sends to each neighbor
    #[arg(long, default_value = "hello mesh")]
    message: String,
}

/// Application side of a simulated node: keeps what it was sent
#[derive(Debug)]
struct Inbox {
    node_id: NodeId,
    received: Vec<Received>,
    shared_tables: usize,
}

impl Inbox {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            received: Vec::new(),
            shared_tables: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Received {
    from: NodeId,
    bytes: usize,
    text: String,
}

impl MeshHandler for Inbox {
    fn on_data(&mut self, from: SenderAddr, payload: &[u8]) -> anyhow::Result<()> {
        let text = String::from_utf8_lossy(payload).into_owned();
        component_info!(
            "app",
            "{} got {} bytes from {}: {:?}",
            self.node_id,
            payload.len(),
            from.node_id,
            text
        );
        self.received.push(Received {
            from: from.node_id,
            bytes: payload.len(),
            text,
        });
        Ok(())
    }

    fn on_neighbor_table(
        &mut self,
        from: SenderAddr,
        table: &[NeighborSummary],
    ) -> anyhow::Result<()> {
        component_debug!(
            "app",
            "{} learned {} neighbor(s) of {}",
            self.node_id,
            table.len(),
            from.node_id
        );
        self.shared_tables += 1;
        Ok(())
    }
}

/// Final state of one node
#[derive(Debug, Serialize)]
struct NodeReport {
    node_id: NodeId,
    hw_addr: String,
    neighbors: Vec<NeighborEntry>,
    received: Vec<Received>,
    shared_tables: usize,
    stats: SessionStats,
}

/// What a node does during the run
struct NodePlan {
    discovery: Duration,
    message: Option<String>,
}

fn sim_addr(index: u16) -> HwAddr {
    let [hi, lo] = (index + 1).to_be_bytes();
    HwAddr([SIM_OUI[0], SIM_OUI[1], SIM_OUI[2], SIM_OUI[3], hi, lo])
}

async fn run_node(
    mut session: MeshSession<SimRadio, Inbox>,
    plan: NodePlan,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<NodeReport> {
    session.start()?;

    session.hello().await?;
    session.rx_enable(Some(plan.discovery));
    session.receive_for(plan.discovery).await?;
    component_info!(
        "node",
        "{} discovered {} neighbor(s)",
        session.node_id(),
        session.neighbors().len()
    );

    if let Some(message) = &plan.message {
        let targets: Vec<NodeId> = session.neighbors().iter().map(|n| n.node_id).collect();
        for target in targets {
            if let Err(e) = session.send(target, message.as_bytes()).await {
                component_warn!("node", "Send to {} failed: {}", target, e);
            }
        }
    }

    session.rx_enable(None);
    session.run(shutdown).await?;
    session.stop()?;

    Ok(NodeReport {
        node_id: session.node_id(),
        hw_addr: session.hw_addr().to_string(),
        neighbors: session.neighbors(),
        received: session.handler().received.clone(),
        shared_tables: session.handler().shared_tables,
        stats: session.stats().clone(),
    })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init("pico-mesh", &args.log_level)?;

    info!("Starting pico-mesh simulator v{}", env!("CARGO_PKG_VERSION"));

    let mesh_config = MeshConfig::load_from_file(&args.config)?;
    if !mesh_config.enabled {
        info!("Mesh disabled by configuration, nothing to do");
        return Ok(());
    }
    if args.nodes == 0 || args.nodes == u16::MAX {
        bail!("--nodes must be between 1 and {}", u16::MAX - 1);
    }

    let duration = Duration::from(args.duration);
    let discovery = duration / 2;
    let session_config: SessionConfig = mesh_config.session_config();

    let air = SimAir::new();
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut nodes = JoinSet::new();

    for index in 0..args.nodes {
        let addr = sim_addr(index);
        let session = MeshSession::new(
            air.attach(addr),
            clock.clone(),
            Inbox::new(id_of(&addr)),
            session_config.clone(),
        )
        .with_context(|| format!("creating node {}", index))?;
        let plan = NodePlan {
            discovery,
            message: (index == 0).then(|| args.message.clone()),
        };
        nodes.spawn(run_node(session, plan, shutdown_rx.clone()));
    }
    info!("Spawned {} node(s) for {}", args.nodes, args.duration);

    tokio::select! {
        _ = tokio::time::sleep(duration) => {
            info!("Simulation time elapsed, stopping nodes");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, stopping nodes");
        }
    }
    // Receivers may all be gone already if every node failed
    let _ = shutdown_tx.send(true);

    let mut reports = Vec::new();
    while let Some(joined) = nodes.join_next().await {
        match joined.context("node task panicked")? {
            Ok(report) => reports.push(report),
            Err(e) => component_error!("node", "Node failed: {:#}", e),
        }
    }
    reports.sort_by_key(|r| r.node_id);

    for report in &reports {
        info!(
            "{} ({}): {} neighbor(s), {} message(s), {} sent / {} received / {} dropped",
            report.node_id,
            report.hw_addr,
            report.neighbors.len(),
            report.received.len(),
            report.stats.frames_sent,
            report.stats.frames_received,
            report.stats.frames_dropped
        );
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);

    info!("pico-mesh simulator finished");
    Ok(())
}
