use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gridplane::job::{ControlFlags, JobRegistry};
use gridplane::node::VirtualCluster;
use gridplane::topology::NodeId;
use gridplane::work::server::QueueWorkServer;
use gridplane::work::{PartitionRouting, WorkItem, WorkJob, Worker};

const STRINGS: &str = "Don,Dave,Ryan,Abe,Ken,Spence";

/// Reverses each string and forwards it to the stage's own served queue.
struct StringReverser;

impl Worker for StringReverser {
    fn perform_work(
        &self,
        item: &WorkItem,
        _flags: &ControlFlags,
        _routing: Option<&PartitionRouting>,
        dest: Option<&QueueWorkServer>,
    ) -> bool {
        let Some(text) = item.as_text() else { return false };
        let reversed: String = text.chars().rev().collect();
        match dest {
            Some(server) => server.add_work(WorkItem::text(item.key, &reversed)),
            None => false,
        }
    }
}

/// Terminal drain: collects every arriving string behind one lock.
#[derive(Default)]
struct DrainWorker {
    drained: Mutex<Vec<String>>,
}

impl Worker for DrainWorker {
    fn perform_work(
        &self,
        item: &WorkItem,
        _flags: &ControlFlags,
        _routing: Option<&PartitionRouting>,
        _dest: Option<&QueueWorkServer>,
    ) -> bool {
        match item.as_text() {
            Some(text) => {
                self.drained.lock().unwrap().push(text.to_string());
                true
            }
            None => false,
        }
    }
}

fn upstream_of(params: &BTreeMap<String, String>) -> (NodeId, String) {
    let node: NodeId = params["upstreamNode"].parse().unwrap();
    (node, params["upstreamJob"].clone())
}

fn pipeline_jobs(drain: Arc<DrainWorker>) -> impl Fn(&NodeId) -> JobRegistry {
    move |_node| {
        let drain = drain.clone();
        let mut registry = JobRegistry::new();

        // head stage: serve a fixed batch of keyed strings
        registry.register("batch", |params| {
            let items: Vec<WorkItem> = params["strings"]
                .split(',')
                .enumerate()
                .map(|(key, text)| WorkItem::text(key as i64, text.trim()))
                .collect();
            Some(Box::new(WorkJob::new().seeded(items)))
        });

        // middle stage: fetch, reverse, serve onward
        registry.register("reverse", |params| {
            let (node, job) = upstream_of(params);
            Some(Box::new(
                WorkJob::new()
                    .fetching_from(node, job)
                    .with_worker(Arc::new(StringReverser), 5)
                    .serving(),
            ))
        });

        // terminal stage: fetch and drain
        registry.register("drain", move |params| {
            let (node, job) = upstream_of(params);
            Some(Box::new(
                WorkJob::new().fetching_from(node, job).with_worker(drain.clone(), 5),
            ))
        });

        registry
    }
}

fn stage_params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Four chained stages across four nodes:
/// A serves a batch, B reverses, C reverses back, D drains. The drained
/// output must equal the seeded set exactly (nothing lost, nothing
/// duplicated), and every stage must detect termination on its own.
#[test]
fn four_stage_pipeline_terminates_and_preserves_the_set() {
    let drain = Arc::new(DrainWorker::default());
    let cluster =
        VirtualCluster::start_with_jobs("pipeline", "5m10n.2", pipeline_jobs(drain.clone()))
            .unwrap();

    let node_a = NodeId::new("node1", 0);
    let node_b = NodeId::new("node2", 0);
    let node_c = NodeId::new("node3", 0);
    let node_d = NodeId::new("node4", 0);

    let job_a = cluster
        .start_job(&node_a, "batch", "stage-a", stage_params(&[("strings", STRINGS)]))
        .unwrap();
    assert!(job_a > 0, "stage A must start");

    let job_b = cluster
        .start_job(
            &node_b,
            "reverse",
            "stage-b",
            stage_params(&[("upstreamNode", "node1-0"), ("upstreamJob", "stage-a")]),
        )
        .unwrap();
    let job_c = cluster
        .start_job(
            &node_c,
            "reverse",
            "stage-c",
            stage_params(&[("upstreamNode", "node2-0"), ("upstreamJob", "stage-b")]),
        )
        .unwrap();
    let job_d = cluster
        .start_job(
            &node_d,
            "drain",
            "stage-d",
            stage_params(&[("upstreamNode", "node3-0"), ("upstreamJob", "stage-c")]),
        )
        .unwrap();
    assert!(job_b > 0 && job_c > 0 && job_d > 0);

    // every stage finishes and retires by itself once its upstream drains
    let deadline = Instant::now() + Duration::from_secs(60);
    for (node, job, stage) in [
        (&node_d, job_d as u32, "D"),
        (&node_c, job_c as u32, "C"),
        (&node_b, job_b as u32, "B"),
        (&node_a, job_a as u32, "A"),
    ] {
        loop {
            let status = cluster.job_status(node, job).unwrap();
            if status == "NOT_FOUND" || status == "STOPPED" {
                break;
            }
            assert!(Instant::now() < deadline, "stage {stage} never finished ({status})");
            thread::sleep(Duration::from_millis(100));
        }
    }

    let drained: Vec<String> = drain.drained.lock().unwrap().clone();
    let expected: BTreeSet<String> = STRINGS.split(',').map(str::to_string).collect();
    let drained_set: BTreeSet<String> = drained.iter().cloned().collect();

    assert_eq!(drained.len(), expected.len(), "no item lost or duplicated: {drained:?}");
    assert_eq!(drained_set, expected, "reversal of reversal is identity");

    cluster.shutdown();
}

/// A stage whose worker fails an item keeps going: the item is dropped (and
/// logged), everything else flows through.
#[test]
fn failed_units_do_not_stall_the_pipeline() {
    struct PickyWorker {
        drained: Mutex<Vec<String>>,
    }

    impl Worker for PickyWorker {
        fn perform_work(
            &self,
            item: &WorkItem,
            _flags: &ControlFlags,
            _routing: Option<&PartitionRouting>,
            _dest: Option<&QueueWorkServer>,
        ) -> bool {
            let Some(text) = item.as_text() else { return false };
            if text == "Dave" {
                return false;
            }
            self.drained.lock().unwrap().push(text.to_string());
            true
        }
    }

    let picky = Arc::new(PickyWorker { drained: Mutex::new(Vec::new()) });
    let jobs = {
        let picky = picky.clone();
        move |_node: &NodeId| {
            let picky = picky.clone();
            let mut registry = JobRegistry::new();
            registry.register("batch", |params| {
                let items: Vec<WorkItem> = params["strings"]
                    .split(',')
                    .enumerate()
                    .map(|(key, text)| WorkItem::text(key as i64, text.trim()))
                    .collect();
                Some(Box::new(WorkJob::new().seeded(items)))
            });
            registry.register("picky", move |params| {
                let (node, job) = upstream_of(params);
                Some(Box::new(
                    WorkJob::new().fetching_from(node, job).with_worker(picky.clone(), 2),
                ))
            });
            registry
        }
    };

    let cluster = VirtualCluster::start_with_jobs("pipeline-fail", "2m2n.1", jobs).unwrap();
    let node_a = NodeId::new("node1", 0);
    let node_b = NodeId::new("node2", 0);

    cluster.start_job(&node_a, "batch", "src", stage_params(&[("strings", STRINGS)])).unwrap();
    let sink = cluster
        .start_job(
            &node_b,
            "picky",
            "sink",
            stage_params(&[("upstreamNode", "node1-0"), ("upstreamJob", "src")]),
        )
        .unwrap() as u32;

    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let status = cluster.job_status(&node_b, sink).unwrap();
        if status == "NOT_FOUND" || status == "STOPPED" {
            break;
        }
        assert!(Instant::now() < deadline, "sink stage never finished ({status})");
        thread::sleep(Duration::from_millis(100));
    }

    let drained: BTreeSet<String> = picky.drained.lock().unwrap().iter().cloned().collect();
    let expected: BTreeSet<String> =
        STRINGS.split(',').filter(|s| *s != "Dave").map(str::to_string).collect();
    assert_eq!(drained, expected, "only the failed unit is missing");

    cluster.shutdown();
}
