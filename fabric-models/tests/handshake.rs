// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use fabric_engine::run_simulation;
use fabric_engine::test_helpers::start_test;
use fabric_models::mesh::{Mesh, NEXT_COLUMN, NEXT_ROW, PREV_COLUMN, PREV_ROW};
use fabric_models::router_node::{LinkLayout, LinkWiring, RouterNode, RouterNodeConfig};
use fabric_router::channel::ChannelConfig;
use fabric_router::memory::{MemoryAllocator, SystemMemory};
use fabric_router::routing::RoutingTable;
use fabric_router::types::{LinkId, NodeId};

mod common;
use common::{NODE_BYTES, mesh_config};

#[test]
fn silent_neighbour_times_out() {
    let mut engine = start_test(file!());
    let system = SystemMemory::new(engine.top(), engine.clock(), 2, NODE_BYTES);
    system.connect(NodeId(0), LinkId(0), NodeId(1), LinkId(1));

    let config = RouterNodeConfig::new(ChannelConfig::default(), 4, Some(1000), true);
    let mut alloc0 = MemoryAllocator::new(0x1000, NODE_BYTES);
    let mut alloc1 = MemoryAllocator::new(0x1000, NODE_BYTES);
    let wiring = LinkWiring {
        link: LinkId(0),
        local: LinkLayout::allocate(&mut alloc0, &config).unwrap(),
        peer_node: NodeId(1),
        peer: LinkLayout::allocate(&mut alloc1, &config).unwrap(),
    };

    let node = RouterNode::new(
        engine.top(),
        "node0",
        engine.clock(),
        system.port(NodeId(0)),
        &config,
        RoutingTable::new(0, 0, 1, 2),
        &[wiring],
        alloc0,
    );
    engine.register(Rc::new(node));

    // Keep the simulation alive past the timeout.
    let clock = engine.clock();
    engine.spawn(async move {
        clock.wait_cycles(5000).await;
        Ok(())
    });

    run_simulation!(engine, "Error: top::node0: link0 handshake timed out");
    assert!(engine.cycle_now() >= 1000);
}

#[test]
fn mesh_links_come_up() {
    let mut engine = start_test(file!());
    let mesh = Mesh::new(&engine, engine.top(), &mesh_config(3, 2)).unwrap();

    let clock = engine.clock();
    engine.spawn(async move {
        clock.wait_cycles(50).await;
        Ok(())
    });
    run_simulation!(engine);

    for row in 0..2 {
        for column in 0..3 {
            let node = mesh.node(column, row);
            for link in [NEXT_COLUMN, PREV_COLUMN, NEXT_ROW, PREV_ROW] {
                let expected = mesh.config().neighbour(column, row, link).is_some();
                assert_eq!(node.is_established(link), expected, "{node} {link}");
            }
        }
    }
}
