use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::console::Console;
use crate::error::ClusterError;
use crate::job::JobRegistry;
use crate::message::types::{
    IntResponse, JobCommand, JobCommandMessage, JobProbeMessage, StartJobMessage, StatusResponse,
};
use crate::message::{downcast, standard_registry, Message};
use crate::node::context::NodeContext;
use crate::node::server::NodeServer;
use crate::topology::descriptor::ClusterDescriptor;
use crate::topology::tree::ClusterTopology;
use crate::topology::view::{ClusterView, VirtualTopology};
use crate::topology::NodeId;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// A whole cluster inside one process: every node gets a real server on a
/// 127.0.0.1 port, addresses are substituted through the `VirtualTopology`
/// decorator, and all derivation logic stays the shared production code.
/// This is what makes the control plane testable without machines.
pub struct VirtualCluster {
    name: String,
    runtime: tokio::runtime::Runtime,
    topology: Arc<VirtualTopology>,
    contexts: HashMap<NodeId, Arc<NodeContext>>,
    servers: HashMap<NodeId, NodeServer>,
    console: Arc<Console>,
    data_root: PathBuf,
}

impl VirtualCluster {
    /// Start a cluster for `descriptor` with the crate's standard job types.
    pub fn start(name: &str, descriptor: &str) -> Result<Self, ClusterError> {
        Self::start_with_jobs(name, descriptor, |_| crate::job::standard_jobs())
    }

    /// Start a cluster, building each node's job-type registry with `jobs`.
    pub fn start_with_jobs(
        name: &str,
        descriptor: &str,
        jobs: impl Fn(&NodeId) -> JobRegistry,
    ) -> Result<Self, ClusterError> {
        crate::logger::init();

        let registry = Arc::new(standard_registry());
        let topology = Arc::new(ClusterTopology::new(
            ClusterDescriptor::parse(descriptor)?,
            None,
            None,
        )?);
        let virtual_topology = Arc::new(VirtualTopology::new(topology.clone(), 0));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name(format!("{}-rt", name))
            .build()?;

        let data_root =
            std::env::temp_dir().join(format!("gridplane-{}-{}", name, Uuid::new_v4()));

        let mut contexts = HashMap::new();
        let mut servers = HashMap::new();
        for node in topology.node_ids() {
            let view: Arc<dyn ClusterView> = virtual_topology.clone();
            let ctx = NodeContext::new(
                node.clone(),
                view,
                registry.clone(),
                jobs(&node),
                data_root.join(node.to_string()),
                runtime.handle().clone(),
            );
            let server = runtime.block_on(NodeServer::bind(ctx.clone(), "127.0.0.1:0"))?;
            virtual_topology.record_bound(node.clone(), server.local_addr().to_string());
            contexts.insert(node.clone(), ctx);
            servers.insert(node, server);
        }

        let console_view: Arc<dyn ClusterView> = virtual_topology.clone();
        let console = Arc::new(Console::new(console_view, registry, format!("{}-console", name)));

        log::info!(
            "virtual cluster '{}' up: {} ({} nodes)",
            name,
            topology.descriptor(),
            topology.num_nodes()
        );

        Ok(VirtualCluster {
            name: name.to_string(),
            runtime,
            topology: virtual_topology,
            contexts,
            servers,
            console,
            data_root,
        })
    }

    pub fn topology(&self) -> &ClusterTopology {
        ClusterView::topology(self.topology.as_ref())
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn data_root(&self) -> &PathBuf {
        &self.data_root
    }

    /// Blocking fan-out send through the cluster's console.
    pub fn send(
        &self,
        message: &dyn Message,
        target: &str,
        timeout: Duration,
        require_all: bool,
    ) -> Result<Vec<Option<Box<dyn Message>>>, ClusterError> {
        self.runtime.block_on(self.console.send(message, target, timeout, require_all))
    }

    /// Blocking single-node send through the cluster's console.
    pub fn send_to_node(
        &self,
        message: &dyn Message,
        node: &NodeId,
        timeout: Duration,
    ) -> Result<Box<dyn Message>, ClusterError> {
        self.runtime.block_on(self.console.send_to_node(message, node, timeout))
    }

    /// Dispatch a job to one node; returns the spawned local job id.
    pub fn start_job(
        &self,
        node: &NodeId,
        job_type: &str,
        job_name: &str,
        params: BTreeMap<String, String>,
    ) -> Result<i64, ClusterError> {
        let message = StartJobMessage {
            job_type: job_type.to_string(),
            name: job_name.to_string(),
            params,
        };
        let reply = self.send_to_node(&message, node, COMMAND_TIMEOUT)?;
        Ok(downcast::<IntResponse>(reply.as_ref()).map(|r| r.value).unwrap_or(-1))
    }

    /// Issue a job command and report whether it was accepted.
    pub fn job_command(
        &self,
        node: &NodeId,
        command: JobCommand,
        job: u32,
    ) -> Result<bool, ClusterError> {
        let message = JobCommandMessage::new(command, job);
        let reply = self.send_to_node(&message, node, COMMAND_TIMEOUT)?;
        Ok(downcast::<crate::message::types::BooleanResponse>(reply.as_ref())
            .map(|r| r.value)
            .unwrap_or(false))
    }

    /// Read a job's status string (`NOT_FOUND` for unknown jobs).
    pub fn job_status(&self, node: &NodeId, job: u32) -> Result<String, ClusterError> {
        let message = JobCommandMessage::new(JobCommand::Status, job);
        let reply = self.send_to_node(&message, node, COMMAND_TIMEOUT)?;
        Ok(downcast::<StatusResponse>(reply.as_ref())
            .map(|r| r.value.clone())
            .unwrap_or_else(|| "NOT_FOUND".to_string()))
    }

    /// Read a job's unit counter (`-1` for unknown jobs).
    pub fn unit_count(&self, node: &NodeId, job: u32) -> Result<i64, ClusterError> {
        let reply = self.send_to_node(&JobProbeMessage { job }, node, COMMAND_TIMEOUT)?;
        Ok(downcast::<IntResponse>(reply.as_ref()).map(|r| r.value).unwrap_or(-1))
    }

    /// Take one node's server down, simulating a dead node. Its address
    /// stays in the topology, so sends to it now fail.
    pub fn stop_node(&mut self, node: &NodeId) {
        if let Some(server) = self.servers.remove(node) {
            server.shutdown();
            self.runtime.block_on(server.join());
        }
        if let Some(ctx) = self.contexts.remove(node) {
            ctx.shutdown();
        }
        log::info!("virtual cluster '{}': node {} stopped", self.name, node);
    }

    /// Orderly teardown: stop servers, cancel and join every job, then drop
    /// the runtime and scratch space.
    pub fn shutdown(mut self) {
        log::info!("virtual cluster '{}': shutting down", self.name);
        for (_, server) in self.servers.drain() {
            server.shutdown();
            self.runtime.block_on(server.join());
        }
        for (_, ctx) in self.contexts.drain() {
            ctx.shutdown();
        }
        let _ = std::fs::remove_dir_all(&self.data_root);
    }
}
