// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Next-hop lookup.
//!
//! A packet for another mesh is routed on the mesh id alone. A packet for
//! this mesh is routed on the device id. The tables are filled once when the
//! node is brought up and are read-only afterwards.

use std::fmt;

use crate::types::LinkId;

/// Where a packet goes next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Deliver on this node.
    Local,
    /// Forward over the given link.
    Link(LinkId),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Local => write!(f, "local"),
            Route::Link(link) => write!(f, "{link}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RoutingTable {
    mesh_id: u16,
    device_id: u16,
    inter_mesh: Vec<Option<LinkId>>,
    intra_mesh: Vec<Option<LinkId>>,
}

impl RoutingTable {
    /// Create an empty table for the node `(mesh_id, device_id)` in a system
    /// of `num_meshes` meshes of up to `num_devices` devices each.
    #[must_use]
    pub fn new(mesh_id: u16, device_id: u16, num_meshes: u16, num_devices: u16) -> Self {
        Self {
            mesh_id,
            device_id,
            inter_mesh: vec![None; usize::from(num_meshes)],
            intra_mesh: vec![None; usize::from(num_devices)],
        }
    }

    #[must_use]
    pub fn mesh_id(&self) -> u16 {
        self.mesh_id
    }

    #[must_use]
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    /// Route packets for mesh `mesh_id` over `link`.
    ///
    /// # Panics
    ///
    /// If `mesh_id` is outside the table.
    pub fn set_inter_mesh(&mut self, mesh_id: u16, link: LinkId) {
        self.inter_mesh[usize::from(mesh_id)] = Some(link);
    }

    /// Route packets for device `device_id` of this mesh over `link`.
    ///
    /// # Panics
    ///
    /// If `device_id` is outside the table.
    pub fn set_intra_mesh(&mut self, device_id: u16, link: LinkId) {
        self.intra_mesh[usize::from(device_id)] = Some(link);
    }

    /// Resolve the next hop for a destination. `None` means the destination
    /// cannot be reached from this node.
    #[must_use]
    pub fn next_hop(&self, dst_mesh_id: u16, dst_device_id: u16) -> Option<Route> {
        if dst_mesh_id != self.mesh_id {
            return self
                .inter_mesh
                .get(usize::from(dst_mesh_id))
                .copied()
                .flatten()
                .map(Route::Link);
        }
        if dst_device_id == self.device_id {
            return Some(Route::Local);
        }
        self.intra_mesh
            .get(usize::from(dst_device_id))
            .copied()
            .flatten()
            .map(Route::Link)
    }
}
