use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use gridplane::message::types::JobCommand;
use gridplane::node::VirtualCluster;

/// Spin up an in-process virtual cluster from a descriptor and walk a
/// counting job through its lifecycle on the first node.
#[derive(Parser, Debug)]
#[command(name = "gridplane", about = "compute-cluster control plane demo")]
struct Args {
    /// Cluster descriptor, e.g. 2m8n.2-2
    #[arg(default_value = "2m8n.2-2")]
    descriptor: String,

    /// Units the demo job should complete
    #[arg(long, default_value_t = 64)]
    target: u64,
}

fn main() -> anyhow::Result<()> {
    gridplane::logger::init();
    let args = Args::parse();

    let cluster = VirtualCluster::start("demo", &args.descriptor)
        .with_context(|| format!("starting cluster '{}'", args.descriptor))?;
    let topology = cluster.topology().clone();
    log::info!(
        "cluster up: {} machines, {} nodes, {} levels",
        topology.num_machines(),
        topology.num_nodes(),
        topology.num_levels()
    );

    let node = topology.node_ids().into_iter().next().expect("at least one node");
    let mut params = BTreeMap::new();
    params.insert("target".to_string(), args.target.to_string());
    params.insert("unitMillis".to_string(), "5".to_string());

    let job = cluster.start_job(&node, "counting", "demo-counter", params)?;
    if job < 0 {
        bail!("node {} refused the demo job", node);
    }
    let job = job as u32;
    log::info!("started counting job {} on {}", job, node);

    thread::sleep(Duration::from_millis(100));
    log::info!("status: {}, units: {}", cluster.job_status(&node, job)?, cluster.unit_count(&node, job)?);

    cluster.job_command(&node, JobCommand::Pause, job)?;
    let paused_at = cluster.unit_count(&node, job)?;
    log::info!("paused at {} units", paused_at);

    cluster.job_command(&node, JobCommand::Bounce, job)?;
    thread::sleep(Duration::from_millis(100));
    log::info!(
        "after bounce: status {}, units {} (rewound to the last checkpoint)",
        cluster.job_status(&node, job)?,
        cluster.unit_count(&node, job)?
    );

    loop {
        let status = cluster.job_status(&node, job)?;
        if status == "STOPPED" || status == "NOT_FOUND" {
            log::info!("job finished ({})", status);
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    cluster.shutdown();
    Ok(())
}
