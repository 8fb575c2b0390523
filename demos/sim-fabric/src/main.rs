// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulate traffic across a mesh of router nodes.
//!
//! See `lib.rs` for details.

use std::fs;
use std::io::{self, BufWriter};
use std::sync::Arc;

use byte_unit::{AdjustedByte, Byte, UnitType};
use fabric_engine::engine::Engine;
use fabric_engine::run_simulation;
use fabric_engine::types::SimError;
use fabric_models::mesh::{Mesh, NEXT_COLUMN, NEXT_ROW, PREV_COLUMN, PREV_ROW};
use fabric_track::entity::Entity;
use fabric_track::tracker::text_tracker;
use fabric_track::{Tracker, Writer, error, info};
use sim_fabric::config::SimConfig;
use sim_fabric::traffic::Traffic;

/// Create a text tracker writing to stdout or the configured log file.
fn setup_tracker(config: &SimConfig) -> Result<Tracker, SimError> {
    let entity_manager = config.entity_manager()?;
    let log_file = config.log_file();
    let writer: Writer = if log_file == "-" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        let file = fs::File::create(&log_file)
            .map_err(|e| SimError(format!("unable to create {log_file}: {e}")))?;
        Box::new(BufWriter::new(file))
    };
    Ok(text_tracker(entity_manager, writer))
}

fn main() -> Result<(), SimError> {
    let config = SimConfig::parse_all_sources()?;
    let tracker = setup_tracker(&config)?;

    let mut engine = Engine::new(&tracker);
    let top = engine.top().clone();

    let mesh_config = config.mesh_config()?;
    let traffic_config = config.traffic_config()?;
    let mesh = Mesh::new(&engine, &top, &mesh_config)?;
    let traffic = Traffic::spawn(&engine, &mesh, &traffic_config)?;
    info!(top ; "Platform built and connected");

    run_simulation!(engine);

    let cycles = engine.cycle_now();
    if let Err(e) = traffic.verify(&mesh) {
        error!(top ; "{e}");
        error!(top ; "Deadlock detected at cycle {cycles}");
        tracker.shutdown();
        return Err(e);
    }

    print_summary(&top, &mesh, cycles, traffic.packets_sent(), traffic.payload_bytes_sent());
    tracker.shutdown();
    Ok(())
}

fn print_summary(top: &Arc<Entity>, mesh: &Mesh, cycles: u64, packets: u64, payload_bytes: u64) {
    let (payload_value, payload_per_cycle) = compute_adjusted_value_and_rate(cycles, payload_bytes);
    info!(top ; "Pass: Sent {packets} packets in {cycles} cycles.");
    info!(top ; "Payload: {payload_value:.2} ({payload_per_cycle:.2}/cycle).");

    for node in mesh.nodes() {
        let forwards: u64 = [NEXT_COLUMN, PREV_COLUMN, NEXT_ROW, PREV_ROW]
            .into_iter()
            .map(|link| node.productive_forwards(link))
            .sum();
        info!(top ;
            "{node}: {} packets delivered, {} responses, {forwards} productive forwards",
            node.packets_delivered(),
            node.responses_sent()
        );
    }
}

fn compute_adjusted_value_and_rate(cycles: u64, num_bytes: u64) -> (AdjustedByte, AdjustedByte) {
    // Convert to a binary-only unit (KiB, MiB, etc)
    let count = Byte::from_u64(num_bytes).get_appropriate_unit(UnitType::Binary);
    let rate = num_bytes as f64 / cycles.max(1) as f64;
    let per_cycle = Byte::from_f64(rate).unwrap_or(Byte::from_u64(0));
    (count, per_cycle.get_appropriate_unit(UnitType::Binary))
}
