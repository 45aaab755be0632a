pub mod descriptor;
pub mod tree;
pub mod view;

pub use descriptor::{ClusterDefinitionDto, ClusterDescriptor};
pub use tree::{ClusterTopology, NodeId, ALL_NODES_GROUP};
pub use view::{ClusterView, VirtualTopology};
