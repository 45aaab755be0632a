use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::error::ClusterError;
use crate::message::codec::WireCodec;
use crate::message::types::Ping;
use crate::message::{Message, MessageRegistry};
use crate::topology::view::ClusterView;
use crate::topology::NodeId;

/// Client-side dispatcher: sends a message to one node or fans it out to
/// every node of a named group, collecting responses under a timeout.
///
/// Fan-out responses are ordered by the group's canonical node order from
/// the topology model, never by arrival, which keeps downstream joins and
/// assertions deterministic. Failures are surfaced, never silently retried.
pub struct Console {
    identifier: String,
    view: Arc<dyn ClusterView>,
    registry: Arc<MessageRegistry>,
}

impl Console {
    pub fn new(
        view: Arc<dyn ClusterView>,
        registry: Arc<MessageRegistry>,
        identifier: impl Into<String>,
    ) -> Self {
        Console { identifier: identifier.into(), view, registry }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn view(&self) -> &Arc<dyn ClusterView> {
        &self.view
    }

    /// Send to a single node and wait up to `timeout` for its response.
    pub async fn send_to_node(
        &self,
        message: &dyn Message,
        node: &NodeId,
        timeout: Duration,
    ) -> Result<Box<dyn Message>, ClusterError> {
        let address = self.view.node_address(node).map_err(ClusterError::Topology)?;
        match tokio::time::timeout(timeout, self.exchange(&address, message)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                log::debug!("{}: exchange with {} failed: {}", self.identifier, node, e);
                Err(ClusterError::unreachable(node.to_string()))
            }
            Err(_) => Err(ClusterError::unreachable(node.to_string())),
        }
    }

    /// Send to every node a group or node name resolves to, in parallel,
    /// each destination under its own independent `timeout`.
    ///
    /// With `require_all`, any unreachable or late node fails the call with
    /// an error naming exactly the missing nodes. Without it, missing
    /// responses appear as explicit `None` entries.
    pub async fn send(
        &self,
        message: &dyn Message,
        target: &str,
        timeout: Duration,
        require_all: bool,
    ) -> Result<Vec<Option<Box<dyn Message>>>, ClusterError> {
        let destinations = self.view.resolve_target(target).map_err(ClusterError::Topology)?;

        let exchanges = destinations.iter().map(|(node, address)| async move {
            match tokio::time::timeout(timeout, self.exchange(address, message)).await {
                Ok(Ok(reply)) => Some(reply),
                Ok(Err(e)) => {
                    log::debug!("{}: no response from {}: {}", self.identifier, node, e);
                    None
                }
                Err(_) => {
                    log::debug!("{}: timeout waiting on {}", self.identifier, node);
                    None
                }
            }
        });
        let replies: Vec<Option<Box<dyn Message>>> = join_all(exchanges).await;

        if require_all {
            let missing: Vec<String> = destinations
                .iter()
                .zip(&replies)
                .filter(|(_, reply)| reply.is_none())
                .map(|((node, _), _)| node.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(ClusterError::Unreachable { nodes: missing });
            }
        }

        Ok(replies)
    }

    /// Liveness check for a single node.
    pub async fn is_alive(&self, node: &NodeId, timeout: Duration) -> bool {
        self.send_to_node(&Ping, node, timeout).await.is_ok()
    }

    /// One request/response round trip over a fresh connection, closed
    /// afterwards.
    async fn exchange(
        &self,
        address: &str,
        message: &dyn Message,
    ) -> Result<Box<dyn Message>, ClusterError> {
        let stream = TcpStream::connect(address).await?;
        let mut framed = Framed::new(stream, WireCodec::new(self.registry.clone()));
        framed.send(message).await.map_err(ClusterError::Wire)?;
        match framed.next().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(ClusterError::Wire(e)),
            None => Err(ClusterError::unreachable(address)),
        }
    }
}
