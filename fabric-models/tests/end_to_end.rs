// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use fabric_engine::clock::Clock;
use fabric_engine::run_simulation;
use fabric_engine::sim_error;
use fabric_engine::test_helpers::start_test;
use fabric_engine::types::SimResult;
use fabric_models::client::FabricClient;
use fabric_models::mesh::{Mesh, MeshConfig, NEXT_COLUMN};
use fabric_models::router_node::RouterNodeConfig;
use fabric_router::channel::ChannelConfig;
use fabric_router::memory::SystemMemory;
use fabric_router::types::{GlobalAddress, NodeId, WORD_BYTES, words_for_bytes};

mod common;
use common::{NODE_BYTES, mesh_config, random_payload};

/// Fail if a write lands before every write issued ahead of it.
async fn check_arrival_order(
    clock: Clock,
    system: Rc<SystemMemory>,
    writes: Rc<Vec<(GlobalAddress, Vec<u8>)>>,
) -> SimResult {
    let arrived = |(target, data): &(GlobalAddress, Vec<u8>)| {
        let mut received = vec![0; data.len()];
        system.read(*target, &mut received);
        received == *data
    };
    loop {
        let in_order = writes.iter().take_while(|w| arrived(*w)).count();
        if in_order == writes.len() {
            return Ok(());
        }
        if let Some(i) = writes[in_order..].iter().position(arrived) {
            return sim_error!(format!(
                "write {} arrived before write {in_order}",
                in_order + i
            ));
        }
        if clock.now() > 100_000 {
            return sim_error!(format!("only {in_order} writes arrived"));
        }
        clock.wait_cycles(1).await;
    }
}

#[test]
fn large_write_crosses_two_hops() {
    let mut engine = start_test(file!());
    let mesh = Mesh::new(&engine, engine.top(), &mesh_config(3, 1)).unwrap();

    let num_bytes = 4096 * WORD_BYTES;
    let target = GlobalAddress::new(NodeId(2), mesh.node(2, 0).alloc_words(4096).unwrap());
    let data = Rc::new(random_payload(1, num_bytes as usize));

    let mut client = FabricClient::new(engine.top(), "client", mesh.node(0, 0), 1024).unwrap();
    {
        let data = data.clone();
        engine.spawn(async move {
            client.async_write(0, 2, target, &data, true).await?;
            client.wait_for_responses().await;
            Ok(())
        });
    }
    run_simulation!(engine);

    let mut received = vec![0; num_bytes as usize];
    mesh.system().read(target, &mut received);
    assert!(received == *data, "payload corrupted in flight");

    assert!(mesh.node(0, 0).productive_forwards(NEXT_COLUMN) >= 4);
    assert!(mesh.node(1, 0).productive_forwards(NEXT_COLUMN) >= 4);
    assert_eq!(mesh.node(2, 0).packets_delivered(), 1);
    assert_eq!(mesh.node(2, 0).responses_sent(), 1);
    for node in mesh.nodes() {
        assert_eq!(node.fault(), None);
    }
}

#[test]
fn clients_share_a_queue() {
    let mut engine = start_test(file!());
    let mesh = Mesh::new(&engine, engine.top(), &mesh_config(3, 1)).unwrap();

    let mut expected = Vec::new();
    for (i, name) in ["client_a", "client_b"].iter().enumerate() {
        let mut client = FabricClient::new(engine.top(), name, mesh.node(0, 0), 64).unwrap();
        let mut writes = Vec::new();
        for j in 0..4 {
            let num_bytes = 200 + 16 * j;
            let target = GlobalAddress::new(NodeId(2), mesh.node(2, 0).alloc_words(16).unwrap());
            let data = random_payload((10 * i + j) as u64, num_bytes);
            expected.push((target, data.clone()));
            writes.push((target, data));
        }
        engine.spawn(async move {
            for (target, data) in writes {
                client.async_write(0, 2, target, &data, true).await?;
            }
            client.wait_for_responses().await;
            Ok(())
        });
    }
    run_simulation!(engine);

    for (target, data) in expected {
        let mut received = vec![0; data.len()];
        mesh.system().read(target, &mut received);
        assert_eq!(received, data);
    }
    assert_eq!(mesh.node(2, 0).responses_sent(), 8);
}

#[test]
fn packets_keep_their_order_across_hops() {
    let mut engine = start_test(file!());
    let router = RouterNodeConfig::new(ChannelConfig::new(32, 8, 4, 2, 2), 8, Some(1000), true);
    let mesh = Mesh::new(&engine, engine.top(), &MeshConfig::new(3, 1, 0, router, NODE_BYTES)).unwrap();

    // Packets of up to 22 words through 32-word buffers keep wrapping.
    let mut writes = Vec::new();
    for i in 0..12 {
        let num_bytes = 160 + 48 * (i % 4);
        let offset = mesh.node(2, 0).alloc_words(words_for_bytes(num_bytes as u32)).unwrap();
        writes.push((GlobalAddress::new(NodeId(2), offset), random_payload(100 + i as u64, num_bytes)));
    }
    let writes = Rc::new(writes);

    let mut client = FabricClient::new(engine.top(), "client", mesh.node(0, 0), 32).unwrap();
    {
        let writes = writes.clone();
        engine.spawn(async move {
            for (target, data) in writes.iter() {
                client.async_write(0, 2, *target, data, false).await?;
            }
            Ok(())
        });
    }
    engine.spawn(check_arrival_order(engine.clock(), mesh.system().clone(), writes.clone()));
    run_simulation!(engine);

    assert_eq!(mesh.node(2, 0).packets_delivered(), 12);
    assert!(mesh.node(1, 0).productive_forwards(NEXT_COLUMN) >= 12);
    for node in mesh.nodes() {
        assert_eq!(node.fault(), None);
    }
}
