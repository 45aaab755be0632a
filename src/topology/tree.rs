use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TopologyError;
use crate::topology::descriptor::{ClusterDefinitionDto, ClusterDescriptor};

/// Group name addressing every worker node in the cluster.
pub const ALL_NODES_GROUP: &str = "_all_";

/// One addressable worker process: machine name plus process index on that
/// machine. Machine names compare case-insensitively and are stored
/// lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    machine: String,
    index: usize,
}

impl NodeId {
    pub fn new(machine: impl AsRef<str>, index: usize) -> Self {
        NodeId { machine: machine.as_ref().to_lowercase(), index }
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.machine, self.index)
    }
}

impl FromStr for NodeId {
    type Err = TopologyError;

    /// Parses `machine-index`. Machine names may themselves contain hyphens;
    /// only a numeric final segment is taken as the process index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (machine, index) = s
            .rsplit_once('-')
            .and_then(|(m, i)| i.parse::<usize>().ok().map(|i| (m, i)))
            .ok_or_else(|| TopologyError::UnknownNode(s.to_string()))?;
        if machine.is_empty() {
            return Err(TopologyError::UnknownNode(s.to_string()));
        }
        Ok(NodeId::new(machine, index))
    }
}

/// The topology model: machines, nodes and groups derived from a parsed
/// cluster descriptor. Immutable once constructed; every group lookup is
/// recomputed from the tree plus the declared-group table so membership can
/// never drift from the topology.
///
/// Tree shape: a gateway root, `M` machines beneath it, and beneath every
/// machine the k-level branching tree whose leaves are that machine's nodes.
/// The canonical node order used for every listing (and for console response
/// ordering) is machine-major with ascending process index.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    descriptor: ClusterDescriptor,
    gateway: String,
    machines: Vec<String>,
    declared_groups: BTreeMap<String, Vec<String>>,
    port_base: u16,
}

const DEFAULT_PORT_BASE: u16 = 10_000;

impl ClusterTopology {
    pub fn new(
        descriptor: ClusterDescriptor,
        gateway: Option<String>,
        machine_names: Option<Vec<String>>,
    ) -> Result<Self, TopologyError> {
        let machines = match machine_names {
            Some(names) => {
                if names.len() != descriptor.machines {
                    return Err(TopologyError::MachineNameCount {
                        expected: descriptor.machines,
                        got: names.len(),
                    });
                }
                let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
                for (i, name) in lowered.iter().enumerate() {
                    if lowered[..i].contains(name) {
                        return Err(TopologyError::DuplicateMachineName(name.clone()));
                    }
                }
                lowered
            }
            None => (1..=descriptor.machines).map(|i| format!("node{}", i)).collect(),
        };

        Ok(ClusterTopology {
            descriptor,
            gateway: gateway.unwrap_or_else(|| "gateway".to_string()).to_lowercase(),
            machines,
            declared_groups: BTreeMap::new(),
            port_base: DEFAULT_PORT_BASE,
        })
    }

    /// Build from a parsed definition file, validating every declared group
    /// member against the derived tree.
    pub fn from_definition(dto: ClusterDefinitionDto) -> Result<Self, TopologyError> {
        let descriptor = ClusterDescriptor::parse(&dto.descriptor)?;
        let mut topology = ClusterTopology::new(descriptor, dto.gateway, dto.machines)?;

        let mut declared = BTreeMap::new();
        for (name, members) in dto.groups {
            let mut normalized = Vec::with_capacity(members.len());
            for member in &members {
                let node: NodeId = member.parse()?;
                if !topology.has_node(&node) {
                    return Err(TopologyError::UnknownNode(member.clone()));
                }
                normalized.push(node.to_string());
            }
            declared.insert(name.to_lowercase(), normalized);
        }
        topology.declared_groups = declared;
        Ok(topology)
    }

    pub fn with_port_base(mut self, port_base: u16) -> Self {
        self.port_base = port_base;
        self
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn num_machines(&self) -> usize {
        self.machines.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.descriptor.nodes
    }

    pub fn num_levels(&self) -> usize {
        self.descriptor.num_levels()
    }

    pub fn nodes_per_machine(&self) -> usize {
        self.descriptor.nodes_per_machine()
    }

    /// Number of distinct level-`level` subtrees beneath each machine.
    pub fn level_width(&self, level: usize) -> usize {
        self.descriptor.level_width(level)
    }

    pub fn machine_names(&self) -> &[String] {
        &self.machines
    }

    pub fn has_node(&self, node: &NodeId) -> bool {
        node.index() < self.nodes_per_machine()
            && self.machines.iter().any(|m| m == node.machine())
    }

    /// Every node in canonical order: machine-major, index ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let per_machine = self.nodes_per_machine();
        let mut result = Vec::with_capacity(self.num_nodes());
        for machine in &self.machines {
            for index in 0..per_machine {
                result.push(NodeId::new(machine, index));
            }
        }
        result
    }

    /// Node names at a level. Level 0 means every node. For level `j` in
    /// `1..=k`, each machine contributes one representative (first leaf) per
    /// level-`j` subtree; with `include_descendants` every leaf of each
    /// subtree is listed, subtree-major.
    pub fn node_names(&self, level: usize, include_descendants: bool) -> Vec<String> {
        if level == 0 {
            return self.node_ids().iter().map(|n| n.to_string()).collect();
        }
        if level > self.num_levels() {
            return Vec::new();
        }

        let width = self.descriptor.level_width(level);
        let leaves_below = self.descriptor.leaves_below(level);
        let mut result = Vec::new();
        for machine in &self.machines {
            for subtree in 0..width {
                let first = subtree * leaves_below;
                if include_descendants {
                    for leaf in first..first + leaves_below {
                        result.push(NodeId::new(machine, leaf).to_string());
                    }
                } else {
                    result.push(NodeId::new(machine, first).to_string());
                }
            }
        }
        result
    }

    /// 0-based rank of the node in the canonical cluster-wide order.
    /// Case-insensitive on the machine name.
    pub fn global_position(&self, machine: &str, index: usize) -> Option<usize> {
        if index >= self.nodes_per_machine() {
            return None;
        }
        let machine = machine.to_lowercase();
        self.machines
            .iter()
            .position(|m| *m == machine)
            .map(|rank| rank * self.nodes_per_machine() + index)
    }

    /// 0-based rank of the node within its immediate sibling group, i.e.
    /// among the leaves sharing its parent in the branching tree.
    pub fn local_position(&self, machine: &str, index: usize) -> Option<usize> {
        let machine = machine.to_lowercase();
        if index >= self.nodes_per_machine() || !self.machines.contains(&machine) {
            return None;
        }
        let last_branch = *self.descriptor.branching.last().expect("non-empty branching");
        Some(index % last_branch)
    }

    /// Whether `name` is a known group: the all-nodes group, a structural
    /// `level<j>` group, or a declared group. Plain node names are resolvable
    /// as singleton targets but are not groups.
    pub fn has_group(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        name == ALL_NODES_GROUP
            || self.parse_level_group(&name).is_some()
            || self.declared_groups.contains_key(&name)
    }

    fn parse_level_group(&self, name: &str) -> Option<usize> {
        let level: usize = name.strip_prefix("level")?.parse().ok()?;
        (level >= 1 && level <= self.num_levels()).then_some(level)
    }

    fn resolve_single(&self, name: &str, resolve_to_leaves: bool) -> Option<Vec<String>> {
        if name == ALL_NODES_GROUP {
            return Some(self.node_names(0, true));
        }
        if let Some(level) = self.parse_level_group(name) {
            return Some(self.node_names(level, resolve_to_leaves));
        }
        self.declared_groups.get(name).cloned()
    }

    /// Names of the nodes in a group. Comma-delimited names denote a union.
    /// A name that is no known group is returned as-is, interpreted as a
    /// single node target (validated only at address-resolution time).
    pub fn group_node_names(&self, group: &str, resolve_to_leaves: bool) -> Vec<String> {
        let mut result = Vec::new();
        for piece in group.split(',') {
            let piece = piece.trim().to_lowercase();
            if piece.is_empty() {
                continue;
            }
            match self.resolve_single(&piece, resolve_to_leaves) {
                Some(mut names) => result.append(&mut names),
                None => result.push(piece),
            }
        }
        result
    }

    pub fn num_group_nodes(&self, group: &str) -> usize {
        self.group_node_names(group, true).len()
    }

    /// Position of a node within a group, or -1 when the node is not a
    /// member.
    pub fn group_node_position(&self, group: &str, machine: &str, index: usize) -> i64 {
        let target = NodeId::new(machine, index).to_string();
        self.group_node_names(group, true)
            .iter()
            .position(|name| *name == target)
            .map(|p| p as i64)
            .unwrap_or(-1)
    }

    /// Resolve a group or node name to `NodeId`s in canonical group order.
    /// Unknown names fail with `TopologyError::UnknownGroup`.
    pub fn group_node_ids(&self, target: &str) -> Result<Vec<NodeId>, TopologyError> {
        let mut result = Vec::new();
        for name in self.group_node_names(target, true) {
            let node: NodeId = name
                .parse()
                .map_err(|_| TopologyError::UnknownGroup(target.to_string()))?;
            if !self.has_node(&node) {
                return Err(TopologyError::UnknownGroup(target.to_string()));
            }
            result.push(node);
        }
        Ok(result)
    }

    /// Default host:port resolution for a node on the real cluster: the
    /// machine name is the host, ports are `port_base + index`.
    pub fn default_address(&self, node: &NodeId) -> Result<String, TopologyError> {
        if !self.has_node(node) {
            return Err(TopologyError::UnknownNode(node.to_string()));
        }
        Ok(format!("{}:{}", node.machine(), self.port_base as usize + node.index()))
    }
}
