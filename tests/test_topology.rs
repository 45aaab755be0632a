use gridplane::error::TopologyError;
use gridplane::topology::descriptor::{ClusterDefinitionDto, ClusterDescriptor};
use gridplane::topology::view::{ClusterView, VirtualTopology};
use gridplane::topology::{ClusterTopology, NodeId, ALL_NODES_GROUP};

use std::collections::BTreeMap;
use std::sync::Arc;

fn topology(descriptor: &str) -> ClusterTopology {
    ClusterTopology::new(ClusterDescriptor::parse(descriptor).unwrap(), None, None).unwrap()
}

#[test]
fn descriptor_counts_drive_the_topology() {
    let topo = topology("4m24n.2-3");

    assert_eq!(topo.num_machines(), 4);
    assert_eq!(topo.num_nodes(), 24);
    assert_eq!(topo.num_levels(), 2);
    assert_eq!(topo.nodes_per_machine(), 6);

    // level widths per machine follow the branching prefix products
    assert_eq!(topo.level_width(1), 2);
    assert_eq!(topo.level_width(2), 6);
    assert_eq!(topo.node_names(1, false).len(), 4 * 2);
    assert_eq!(topo.node_names(2, false).len(), 4 * 6);

    let all = topo.node_names(0, true);
    assert_eq!(all.len(), 24);
    assert_eq!(all[0], "node1-0");
    assert_eq!(all[23], "node4-5");
}

#[test]
fn canonical_order_is_machine_major_and_stable() {
    let topo = topology("3m6n.2");
    let expected = vec![
        "node1-0", "node1-1", "node2-0", "node2-1", "node3-0", "node3-1",
    ];
    assert_eq!(topo.node_names(0, true), expected);
    // recomputation yields the identical view
    assert_eq!(topo.node_names(0, true), expected);
}

#[test]
fn level_groups_are_consistent_with_the_tree() {
    let topo = topology("4m24n.2-3");

    // each level-1 subtree holds 3 leaves; its representative is the first
    let reps = topo.node_names(1, false);
    assert_eq!(reps[..4], ["node1-0", "node1-3", "node2-0", "node2-3"]);

    // expanding a level group lists every leaf, subtree-major
    let expanded = topo.node_names(1, true);
    assert_eq!(expanded, topo.node_names(0, true));

    assert!(topo.has_group("level1"));
    assert!(topo.has_group("level2"));
    assert!(!topo.has_group("level3"));
    assert!(topo.has_group(ALL_NODES_GROUP));
    assert_eq!(topo.num_group_nodes(ALL_NODES_GROUP), 24);
    assert_eq!(topo.num_group_nodes("level1"), 8);
}

#[test]
fn global_and_local_positions() {
    let topo = topology("4m24n.2-3");

    assert_eq!(topo.global_position("node1", 0), Some(0));
    assert_eq!(topo.global_position("NODE2", 3), Some(9), "machine lookup is case-insensitive");
    assert_eq!(topo.global_position("node4", 5), Some(23));
    assert_eq!(topo.global_position("node9", 0), None);
    assert_eq!(topo.global_position("node1", 6), None, "index beyond the machine");

    // local rank is the position among leaves sharing a parent (b_k = 3)
    assert_eq!(topo.local_position("node1", 0), Some(0));
    assert_eq!(topo.local_position("node1", 4), Some(1));
    assert_eq!(topo.local_position("Node3", 5), Some(2));
}

#[test]
fn group_positions_are_unique_and_minus_one_for_outsiders() {
    let topo = topology("2m8n.2-2");

    let size = topo.num_group_nodes(ALL_NODES_GROUP);
    let mut seen = Vec::new();
    for node in topo.node_ids() {
        let pos = topo.group_node_position(ALL_NODES_GROUP, node.machine(), node.index());
        assert!(pos >= 0 && (pos as usize) < size, "position {pos} out of [0, {size})");
        assert!(!seen.contains(&pos), "duplicate position {pos}");
        seen.push(pos);
    }

    assert_eq!(topo.group_node_position(ALL_NODES_GROUP, "node1", 99), -1);
    assert_eq!(topo.group_node_position(ALL_NODES_GROUP, "ghost", 0), -1);
    assert_eq!(topo.group_node_position("level1", "node1", 1), -1, "node1-1 is no level-1 representative");
}

#[test]
fn single_nodes_and_comma_unions_resolve_as_targets() {
    let topo = topology("3m6n.2");

    assert!(!topo.has_group("node1-0"), "a plain node name is not a group");
    assert_eq!(topo.group_node_names("node1-0", true), vec!["node1-0"]);
    assert_eq!(topo.group_node_names("Node2-1", true), vec!["node2-1"]);

    let union = topo.group_node_names("node1-0, node3-1", true);
    assert_eq!(union, vec!["node1-0", "node3-1"]);

    let ids = topo.group_node_ids("node1-0,node3-1").unwrap();
    assert_eq!(ids, vec![NodeId::new("node1", 0), NodeId::new("node3", 1)]);

    assert!(matches!(
        topo.group_node_ids("no-such-group"),
        Err(TopologyError::UnknownGroup(_))
    ));
}

#[test]
fn explicit_machine_names_and_gateway() {
    let desc = ClusterDescriptor::parse("3m6n.2").unwrap();
    let topo = ClusterTopology::new(
        desc.clone(),
        Some("gw".to_string()),
        Some(vec!["Suliban".to_string(), "Andorian".to_string(), "Tholian".to_string()]),
    )
    .unwrap();

    assert_eq!(topo.gateway(), "gw");
    assert_eq!(topo.machine_names(), ["suliban", "andorian", "tholian"]);
    assert_eq!(topo.global_position("Suliban", 0), Some(0));
    assert_eq!(topo.global_position("Andorian", 0), Some(2));
    assert_eq!(topo.global_position("Tholian", 1), Some(5));

    let err = ClusterTopology::new(desc.clone(), None, Some(vec!["a".into()])).unwrap_err();
    assert!(matches!(err, TopologyError::MachineNameCount { expected: 3, got: 1 }));

    let err =
        ClusterTopology::new(desc, None, Some(vec!["a".into(), "A".into(), "b".into()])).unwrap_err();
    assert!(matches!(err, TopologyError::DuplicateMachineName(_)));
}

#[test]
fn declared_groups_from_a_definition() {
    let dto = ClusterDefinitionDto {
        descriptor: "2m8n.2-2".to_string(),
        gateway: None,
        machines: None,
        groups: BTreeMap::from([
            ("controller".to_string(), vec!["node1-0".to_string()]),
            (
                "workers".to_string(),
                vec![
                    "node1-1".to_string(),
                    "node1-2".to_string(),
                    "node1-3".to_string(),
                    "node2-0".to_string(),
                ],
            ),
        ]),
    };
    let topo = ClusterTopology::from_definition(dto).unwrap();

    assert!(topo.has_group("controller"));
    assert!(topo.has_group("workers"));
    assert!(!topo.has_group("extractors"));

    assert_eq!(topo.num_group_nodes("workers"), 4);
    assert_eq!(topo.group_node_position("workers", "node1", 1), 0);
    assert_eq!(topo.group_node_position("workers", "node2", 0), 3);
    assert_eq!(topo.group_node_position("workers", "node2", 1), -1);
    assert_eq!(topo.group_node_position("controller", "node1", 0), 0);

    // union of a declared group and a literal node
    assert_eq!(topo.num_group_nodes("controller,node2-3"), 2);
}

#[test]
fn definition_rejects_unknown_members() {
    let dto = ClusterDefinitionDto {
        descriptor: "2m4n.2".to_string(),
        gateway: None,
        machines: None,
        groups: BTreeMap::from([("bad".to_string(), vec!["node7-0".to_string()])]),
    };
    assert!(matches!(
        ClusterTopology::from_definition(dto),
        Err(TopologyError::UnknownNode(_))
    ));
}

#[test]
fn virtual_addresses_substitute_resolution_only() {
    let topo = Arc::new(topology("2m4n.2"));
    let virt = VirtualTopology::new(topo.clone(), 15000);

    // deterministic localhost ports by global position
    assert_eq!(virt.node_address(&NodeId::new("node1", 0)).unwrap(), "127.0.0.1:15000");
    assert_eq!(virt.node_address(&NodeId::new("node2", 1)).unwrap(), "127.0.0.1:15003");

    // recorded bindings win
    virt.record_bound(NodeId::new("node1", 1), "127.0.0.1:40001".to_string());
    assert_eq!(virt.node_address(&NodeId::new("node1", 1)).unwrap(), "127.0.0.1:40001");

    // every derivation rule is still the shared topology's
    assert_eq!(ClusterView::topology(&virt).num_nodes(), 4);
    let resolved = virt.resolve_target(ALL_NODES_GROUP).unwrap();
    assert_eq!(resolved.len(), 4);
    assert_eq!(resolved[0].0, NodeId::new("node1", 0));

    assert!(virt.node_address(&NodeId::new("ghost", 0)).is_err());

    // the real resolver maps machines to hosts instead
    assert_eq!(topo.node_address(&NodeId::new("node2", 1)).unwrap(), "node2:10001");
}
