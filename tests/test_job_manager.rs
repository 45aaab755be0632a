use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use gridplane::message::types::JobCommand;
use gridplane::node::VirtualCluster;
use gridplane::topology::NodeId;

/// Per-unit processing time of the counting job used throughout.
const UNIT_MILLIS: u64 = 25;

fn counting_params(target: Option<u64>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("unitMillis".to_string(), UNIT_MILLIS.to_string());
    if let Some(target) = target {
        params.insert("target".to_string(), target.to_string());
    }
    params
}

fn wait_for<F: FnMut() -> bool>(what: &str, limit: Duration, mut check: F) {
    let start = Instant::now();
    while !check() {
        assert!(start.elapsed() < limit, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn status_of_a_missing_job_is_not_found_not_an_error() {
    let cluster = VirtualCluster::start("jobs-missing", "1m1n.1").unwrap();
    let node = NodeId::new("node1", 0);

    assert_eq!(cluster.job_status(&node, 999).unwrap(), "NOT_FOUND");
    assert_eq!(cluster.unit_count(&node, 999).unwrap(), -1);
    assert!(!cluster.job_command(&node, JobCommand::Pause, 999).unwrap());

    cluster.shutdown();
}

#[test]
fn pause_freezes_the_counter_and_resume_moves_it() {
    let cluster = VirtualCluster::start("jobs-pause", "1m1n.1").unwrap();
    let node = NodeId::new("node1", 0);

    let job = cluster.start_job(&node, "counting", "pausable", counting_params(None)).unwrap();
    assert!(job > 0);
    let job = job as u32;

    wait_for("the job to run", Duration::from_secs(5), || {
        cluster.job_status(&node, job).unwrap() == "RUNNING"
    });
    wait_for("some progress", Duration::from_secs(5), || {
        cluster.unit_count(&node, job).unwrap() > 0
    });

    assert!(cluster.job_command(&node, JobCommand::Pause, job).unwrap());
    assert_eq!(cluster.job_status(&node, job).unwrap(), "PAUSED");

    // an in-flight unit may still land; wait one unit for the loop to park
    thread::sleep(Duration::from_millis(UNIT_MILLIS * 2));
    let frozen = cluster.unit_count(&node, job).unwrap();

    // a wait strictly shorter than one unit cannot move a paused counter
    thread::sleep(Duration::from_millis(UNIT_MILLIS / 2));
    assert_eq!(cluster.unit_count(&node, job).unwrap(), frozen);
    thread::sleep(Duration::from_millis(UNIT_MILLIS * 4));
    assert_eq!(cluster.unit_count(&node, job).unwrap(), frozen, "paused job kept counting");

    // pausing a paused job is a successful no-op
    assert!(cluster.job_command(&node, JobCommand::Pause, job).unwrap());

    assert!(cluster.job_command(&node, JobCommand::Resume, job).unwrap());
    wait_for("the counter to move after resume", Duration::from_secs(5), || {
        cluster.unit_count(&node, job).unwrap() > frozen
    });

    assert!(cluster.job_command(&node, JobCommand::Stop, job).unwrap());
    cluster.shutdown();
}

#[test]
fn bounce_rewinds_the_counter_to_a_checkpoint() {
    let cluster = VirtualCluster::start("jobs-bounce", "1m1n.1").unwrap();
    let node = NodeId::new("node1", 0);

    // checkpoint every 8 units so a rewind is observable quickly
    let mut params = counting_params(None);
    params.insert("checkpointInterval".to_string(), "8".to_string());
    let job = cluster.start_job(&node, "counting", "bouncy", params).unwrap() as u32;

    // run well past the first checkpoint, but keep clear of the second so
    // the rewind target stays strictly behind the observed count
    wait_for("progress past a checkpoint", Duration::from_secs(10), || {
        cluster.unit_count(&node, job).unwrap() >= 10
    });
    let before_bounce = cluster.unit_count(&node, job).unwrap();

    assert!(cluster.job_command(&node, JobCommand::Bounce, job).unwrap());

    // the counter must come back at or below its pre-bounce value; with the
    // checkpoint strictly behind, a strictly smaller sample is observable
    wait_for("the rewound counter", Duration::from_secs(10), || {
        let count = cluster.unit_count(&node, job).unwrap();
        count >= 0 && count < before_bounce
    });
    wait_for("running again after bounce", Duration::from_secs(10), || {
        cluster.job_status(&node, job).unwrap() == "RUNNING"
    });

    assert!(cluster.job_command(&node, JobCommand::Stop, job).unwrap());
    cluster.shutdown();
}

#[test]
fn bounce_is_refused_once_stopped() {
    let cluster = VirtualCluster::start("jobs-stopped", "1m1n.1").unwrap();
    let node = NodeId::new("node1", 0);

    let job = cluster.start_job(&node, "counting", "short", counting_params(None)).unwrap() as u32;
    wait_for("the job to run", Duration::from_secs(5), || {
        cluster.job_status(&node, job).unwrap() == "RUNNING"
    });

    assert!(cluster.job_command(&node, JobCommand::Stop, job).unwrap());
    wait_for("the job to retire", Duration::from_secs(5), || {
        cluster.job_status(&node, job).unwrap() == "NOT_FOUND"
    });

    // retired means gone from the registry: every command reports not-found
    assert!(!cluster.job_command(&node, JobCommand::Bounce, job).unwrap());
    assert!(!cluster.job_command(&node, JobCommand::Resume, job).unwrap());

    cluster.shutdown();
}

#[test]
fn a_finite_job_runs_to_completion_and_retires() {
    let cluster = VirtualCluster::start("jobs-finite", "1m2n.2").unwrap();
    let node = NodeId::new("node1", 1);

    let mut params = counting_params(Some(5));
    params.insert("unitMillis".to_string(), "5".to_string());
    let job = cluster.start_job(&node, "counting", "finite", params).unwrap() as u32;

    wait_for("completion", Duration::from_secs(10), || {
        cluster.job_status(&node, job).unwrap() == "NOT_FOUND"
    });

    cluster.shutdown();
}

#[test]
fn unknown_job_type_is_refused_with_minus_one() {
    let cluster = VirtualCluster::start("jobs-unknown-type", "1m1n.1").unwrap();
    let node = NodeId::new("node1", 0);

    let id = cluster.start_job(&node, "no-such-type", "x", BTreeMap::new()).unwrap();
    assert_eq!(id, -1);

    cluster.shutdown();
}
