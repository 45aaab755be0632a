pub mod console;
pub mod error;
pub mod job;
pub mod logger;
pub mod message;
pub mod node;
pub mod topology;
pub mod work;

pub use error::{ClusterError, Result, TopologyError, WireError};
pub use topology::tree::{ClusterTopology, NodeId};
