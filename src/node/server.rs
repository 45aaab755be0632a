use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::error::ClusterError;
use crate::message::codec::WireCodec;
use crate::message::types::BooleanResponse;
use crate::message::Message;
use crate::node::context::NodeContext;
use crate::topology::NodeId;

/// Per-process server side of a node. Each accepted connection gets its own
/// task that decodes frames, runs `handle` and writes back `response`. A
/// failure to decode one connection's stream (unknown type id, truncated
/// frame) drops that connection only; it is never escalated to others.
pub struct NodeServer {
    node: NodeId,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl NodeServer {
    pub async fn bind(ctx: Arc<NodeContext>, address: &str) -> Result<NodeServer, ClusterError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let node = ctx.node().clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(ctx, listener, shutdown_rx));
        log::info!("{}: node server listening on {}", node, local_addr);

        Ok(NodeServer { node, local_addr, shutdown, accept_task })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the accept loop to stop. Requests in flight on existing
    /// connections may still complete.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        log::info!("{}: node server on {} shutting down", self.node, self.local_addr);
    }

    /// Wait for the accept loop to exit; afterwards the bound port is
    /// released for good.
    pub async fn join(self) {
        let _ = self.accept_task.await;
    }
}

async fn accept_loop(
    ctx: Arc<NodeContext>,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(ctx.clone(), stream, peer));
                }
                Err(e) => {
                    log::error!("{}: accept failed: {}", ctx.node(), e);
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// One connection's request loop: the peer may run several sequential
/// exchanges before closing its end.
async fn serve_connection(ctx: Arc<NodeContext>, stream: TcpStream, peer: SocketAddr) {
    let mut framed = Framed::new(stream, WireCodec::new(ctx.registry().clone()));

    while let Some(frame) = framed.next().await {
        match frame {
            Ok(message) => {
                message.handle(&ctx);
                let reply: Box<dyn Message> = message
                    .response(&ctx)
                    .unwrap_or_else(|| Box::new(BooleanResponse::ack()));
                if let Err(e) = framed.send(reply.as_ref()).await {
                    log::warn!("{}: failed replying to {}: {}", ctx.node(), peer, e);
                    break;
                }
            }
            Err(e) => {
                log::warn!("{}: dropping connection from {}: {}", ctx.node(), peer, e);
                break;
            }
        }
    }
}
