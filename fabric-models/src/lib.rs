// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Models built from the [fabric channels](fabric_router).
//!
//! A [`RouterNode`](router_node::RouterNode) runs every channel of one node.
//! A [`Mesh`](mesh::Mesh) builds and wires a grid of them, and a
//! [`FabricClient`](client::FabricClient) injects traffic at a node.

pub mod client;
pub mod mesh;
pub mod router_node;
pub mod sessions;
