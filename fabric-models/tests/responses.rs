// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;
use std::rc::Rc;

use fabric_engine::run_simulation;
use fabric_engine::test_helpers::start_test;
use fabric_models::client::FabricClient;
use fabric_models::mesh::Mesh;
use fabric_router::types::{GlobalAddress, NodeId};

mod common;
use common::{mesh_config, random_payload};

#[test]
fn responses_return_in_flight_counter_to_zero() {
    let mut engine = start_test(file!());
    let config = mesh_config(2, 2);
    let mesh = Mesh::new(&engine, engine.top(), &config).unwrap();

    let mut writes = Vec::new();
    for device in 0..4u16 {
        let (column, row) = (device % 2, device / 2);
        let offset = mesh.node(column, row).alloc_words(8).unwrap();
        let target = GlobalAddress::new(NodeId(device.into()), offset);
        writes.push((device, target, random_payload(device.into(), 128)));
    }

    let mut client = FabricClient::new(engine.top(), "client", mesh.node(0, 0), 256).unwrap();
    let peak_in_flight = Rc::new(Cell::new(0));
    {
        let writes = writes.clone();
        let peak_in_flight = peak_in_flight.clone();
        engine.spawn(async move {
            for (device, target, data) in &writes {
                client.async_write(0, *device, *target, data, true).await?;
                peak_in_flight.set(peak_in_flight.get().max(client.in_flight()));
            }
            client.wait_for_responses().await;
            assert_eq!(client.in_flight(), 0);
            Ok(())
        });
    }
    run_simulation!(engine);

    for (_, target, data) in &writes {
        let mut received = vec![0; data.len()];
        mesh.system().read(*target, &mut received);
        assert_eq!(&received, data);
    }
    assert!(peak_in_flight.get() >= 1);

    // The local write needs no response.
    let responses: u64 = mesh.nodes().iter().map(|node| node.responses_sent()).sum();
    assert_eq!(responses, 3);
}
