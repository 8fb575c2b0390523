// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulate a mesh of router nodes exchanging traffic.
//!
//! Every node runs a client that writes seeded random packets to random
//! devices of the mesh and asks for a response to each remote write. Once
//! the simulation finishes the last packet written between every pair of
//! devices is read back and compared.
//!
//! # Configuration
//!
//! Settings are merged from (lowest priority first):
//!  1. the built-in defaults,
//!  1. `sim-fabric.toml` in the working directory,
//!  1. the file given by `--conf-file` / `FABRIC_CONF_FILE`,
//!  1. environment variables prefixed with `FABRIC_` (`FABRIC_COLUMNS=4`),
//!  1. the command line.
//!
//! # Examples
//!
//! ```text
//! cargo run --bin sim-fabric --release -- --columns 4 --rows 4 --kib-to-send 64
//! ```
//!
//! Show the channel activity of a single node:
//! ```text
//! cargo run --bin sim-fabric -- --log-level trace --log-filter-regex "node_1_0"
//! ```
//!
//! Trace packets through the channels of the middle column:
//! ```text
//! cargo run --bin sim-fabric -- --trace-filter-regex "node_1_.*" -l trace.log
//! ```

pub mod config;
pub mod traffic;
