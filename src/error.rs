use thiserror::Error;

/// Errors raised while parsing a cluster descriptor or building the topology
/// model. Construction failures are fatal: no partial topology is produced.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("malformed cluster descriptor '{0}'")]
    MalformedDescriptor(String),

    #[error("descriptor '{descriptor}': branching product {product} does not equal nodes per machine {per_machine}")]
    CountMismatch { descriptor: String, product: u64, per_machine: u64 },

    #[error("descriptor '{descriptor}': {nodes} nodes cannot be divided evenly over {machines} machines")]
    IndivisibleNodes { descriptor: String, machines: u64, nodes: u64 },

    #[error("expected {expected} machine names, got {got}")]
    MachineNameCount { expected: usize, got: usize },

    #[error("duplicate machine name '{0}'")]
    DuplicateMachineName(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("unknown group or node '{0}'")]
    UnknownGroup(String),

    #[error("could not read cluster definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse cluster definition JSON: {0}")]
    Definition(#[from] serde_json::Error),
}

/// Errors on the wire: framing and payload (de)serialization.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message type id {0}")]
    UnknownTypeId(u32),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    Oversize(usize),

    #[error("failed to encode message payload: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message payload: {0}")]
    Decode(#[source] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connectivity and dispatch errors surfaced to Console callers.
/// The console never retries on its own; callers decide.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no response from node(s): {}", nodes.join(", "))]
    Unreachable { nodes: Vec<String> },

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    pub fn unreachable(node: impl Into<String>) -> Self {
        ClusterError::Unreachable { nodes: vec![node.into()] }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
