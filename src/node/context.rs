use std::path::PathBuf;
use std::sync::Arc;

use crate::console::Console;
use crate::job::manager::JobManager;
use crate::job::JobRegistry;
use crate::message::MessageRegistry;
use crate::topology::view::ClusterView;
use crate::topology::NodeId;

/// Everything message handlers may touch on the hosting node: identity, the
/// shared topology view, the message registry, the local job manager and a
/// console for outbound traffic. Built once per node process and shared by
/// every connection task.
pub struct NodeContext {
    node: NodeId,
    view: Arc<dyn ClusterView>,
    registry: Arc<MessageRegistry>,
    manager: Arc<JobManager>,
    console: Arc<Console>,
    data_dir: PathBuf,
}

impl NodeContext {
    pub fn new(
        node: NodeId,
        view: Arc<dyn ClusterView>,
        registry: Arc<MessageRegistry>,
        jobs: JobRegistry,
        data_dir: PathBuf,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        let console = Arc::new(Console::new(
            view.clone(),
            registry.clone(),
            format!("{}-console", node),
        ));
        let manager = Arc::new(JobManager::new(
            node.clone(),
            jobs,
            console.clone(),
            runtime,
            data_dir.clone(),
        ));
        Arc::new(NodeContext { node, view, registry, manager, console, data_dir })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn view(&self) -> &Arc<dyn ClusterView> {
        &self.view
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Stop every job on this node and wait for their threads.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
