// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![allow(dead_code)]

use fabric_engine::clock::Clock;
use fabric_engine::sim_error;
use fabric_engine::types::SimResult;
use fabric_models::mesh::MeshConfig;
use fabric_models::router_node::RouterNodeConfig;
use fabric_router::channel::ChannelConfig;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub const NODE_BYTES: u32 = 0x10_0000;

pub fn mesh_config(num_columns: u16, num_rows: u16) -> MeshConfig {
    let router = RouterNodeConfig::new(ChannelConfig::new(1024, 256, 64, 4, 16), 8, Some(1000), true);
    MeshConfig::new(num_columns, num_rows, 0, router, NODE_BYTES)
}

pub fn random_payload(seed: u64, num_bytes: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0; num_bytes];
    rng.fill_bytes(&mut data);
    data
}

/// Wait a cycle at a time until `done` holds, failing after `limit` cycles.
pub async fn wait_until(clock: &Clock, limit: u64, mut done: impl FnMut() -> bool) -> SimResult {
    let start = clock.now();
    while !done() {
        if clock.now() - start > limit {
            return sim_error!(format!("condition not met after {limit} cycles"));
        }
        clock.wait_cycles(1).await;
    }
    Ok(())
}
