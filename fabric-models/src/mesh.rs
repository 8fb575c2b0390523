// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A rectangular mesh of router nodes.
//!
//! Devices are numbered row by row. Each node uses up to four links:
//!
//! | Link | Neighbour |
//! |------|-----------|
//! | 0 | next column |
//! | 1 | previous column |
//! | 2 | next row |
//! | 3 | previous row |
//!
//! Routes are dimension ordered: a packet first travels along its row to the
//! destination column, then along the column.

use std::rc::Rc;
use std::sync::Arc;

use fabric_engine::engine::Engine;
use fabric_engine::types::SimError;
use fabric_router::memory::{MemoryAllocator, SystemMemory};
use fabric_router::routing::RoutingTable;
use fabric_router::types::{LinkId, NodeId};
use fabric_track::entity::Entity;
use fabric_track::info;

use crate::router_node::{LinkLayout, LinkWiring, RouterNode, RouterNodeConfig};

pub const NEXT_COLUMN: LinkId = LinkId(0);
pub const PREV_COLUMN: LinkId = LinkId(1);
pub const NEXT_ROW: LinkId = LinkId(2);
pub const PREV_ROW: LinkId = LinkId(3);

/// Start of the memory used by the links of a node.
const LINK_MEMORY_START: u32 = 0x1000;

#[derive(Clone, Debug)]
pub struct MeshConfig {
    num_columns: u16,
    num_rows: u16,
    mesh_id: u16,
    router: RouterNodeConfig,
    node_bytes: u32,
}

impl MeshConfig {
    /// # Panics
    ///
    /// If the mesh is empty.
    #[must_use]
    pub fn new(
        num_columns: u16,
        num_rows: u16,
        mesh_id: u16,
        router: RouterNodeConfig,
        node_bytes: u32,
    ) -> Self {
        assert!(num_columns > 0 && num_rows > 0, "a mesh needs at least one node");
        Self {
            num_columns,
            num_rows,
            mesh_id,
            router,
            node_bytes,
        }
    }

    #[must_use]
    pub fn num_columns(&self) -> u16 {
        self.num_columns
    }

    #[must_use]
    pub fn num_rows(&self) -> u16 {
        self.num_rows
    }

    #[must_use]
    pub fn num_devices(&self) -> u16 {
        self.num_columns * self.num_rows
    }

    #[must_use]
    pub fn mesh_id(&self) -> u16 {
        self.mesh_id
    }

    #[must_use]
    pub fn router(&self) -> &RouterNodeConfig {
        &self.router
    }

    #[must_use]
    pub fn node_bytes(&self) -> u32 {
        self.node_bytes
    }

    #[must_use]
    pub fn device_id(&self, column: u16, row: u16) -> u16 {
        row * self.num_columns + column
    }

    /// The neighbour reached over `link`, if there is one.
    #[must_use]
    pub fn neighbour(&self, column: u16, row: u16, link: LinkId) -> Option<(u16, u16)> {
        match link {
            NEXT_COLUMN if column + 1 < self.num_columns => Some((column + 1, row)),
            PREV_COLUMN if column > 0 => Some((column - 1, row)),
            NEXT_ROW if row + 1 < self.num_rows => Some((column, row + 1)),
            PREV_ROW if row > 0 => Some((column, row - 1)),
            _ => None,
        }
    }

    /// The link leaving `(column, row)` towards `device_id`.
    #[must_use]
    pub fn first_link(&self, column: u16, row: u16, device_id: u16) -> Option<LinkId> {
        let (dst_column, dst_row) = (device_id % self.num_columns, device_id / self.num_columns);
        if dst_column > column {
            Some(NEXT_COLUMN)
        } else if dst_column < column {
            Some(PREV_COLUMN)
        } else if dst_row > row {
            Some(NEXT_ROW)
        } else if dst_row < row {
            Some(PREV_ROW)
        } else {
            None
        }
    }

    fn routing_table(&self, column: u16, row: u16) -> RoutingTable {
        let mut table = RoutingTable::new(
            self.mesh_id,
            self.device_id(column, row),
            self.mesh_id + 1,
            self.num_devices(),
        );
        for device_id in 0..self.num_devices() {
            if let Some(link) = self.first_link(column, row, device_id) {
                table.set_intra_mesh(device_id, link);
            }
        }
        table
    }
}

pub struct Mesh {
    pub entity: Arc<Entity>,
    config: MeshConfig,
    system: Rc<SystemMemory>,
    nodes: Vec<RouterNode>,
}

impl Mesh {
    /// Build the mesh and register every node with `engine`.
    pub fn new(engine: &Engine, parent: &Arc<Entity>, config: &MeshConfig) -> Result<Self, SimError> {
        let entity = Arc::new(Entity::new(parent, &format!("mesh{}", config.mesh_id())));
        let num_devices = config.num_devices();
        let system = SystemMemory::new(
            &entity,
            engine.clock(),
            u32::from(num_devices),
            config.node_bytes(),
        );

        let all_links = [NEXT_COLUMN, PREV_COLUMN, NEXT_ROW, PREV_ROW];
        let position = |device_id: u16| (device_id % config.num_columns(), device_id / config.num_columns());

        // Every node's memory is laid out before any channel is built, as
        // each side of a link needs the addresses of the other.
        let mut allocators = Vec::with_capacity(usize::from(num_devices));
        let mut layouts = Vec::with_capacity(usize::from(num_devices));
        for device_id in 0..num_devices {
            let (column, row) = position(device_id);
            let mut alloc = MemoryAllocator::new(LINK_MEMORY_START, config.node_bytes());
            let mut node_layouts = [None; 4];
            for link in all_links {
                if config.neighbour(column, row, link).is_some() {
                    node_layouts[link.index()] = Some(LinkLayout::allocate(&mut alloc, config.router())?);
                }
            }
            allocators.push(alloc);
            layouts.push(node_layouts);
        }

        let mut nodes = Vec::with_capacity(usize::from(num_devices));
        for (device_id, alloc) in (0..num_devices).zip(allocators) {
            let (column, row) = position(device_id);
            let mut wiring = Vec::new();
            for link in all_links {
                let (Some((peer_column, peer_row)), Some(local)) =
                    (config.neighbour(column, row, link), layouts[usize::from(device_id)][link.index()])
                else {
                    continue;
                };
                let peer_device = config.device_id(peer_column, peer_row);
                let peer_link = reverse(link);
                let Some(peer) = layouts[usize::from(peer_device)][peer_link.index()] else {
                    return Err(SimError(format!("{entity}: {peer_device} has no {peer_link}")));
                };
                if device_id < peer_device {
                    system.connect(NodeId(device_id.into()), link, NodeId(peer_device.into()), peer_link);
                }
                wiring.push(LinkWiring {
                    link,
                    local,
                    peer_node: NodeId(peer_device.into()),
                    peer,
                });
            }

            let node = RouterNode::new(
                &entity,
                &format!("node_{column}_{row}"),
                engine.clock(),
                system.port(NodeId(device_id.into())),
                config.router(),
                config.routing_table(column, row),
                &wiring,
                alloc,
            );
            engine.register(Rc::new(node.clone()));
            nodes.push(node);
        }

        info!(entity ; "{} x {} mesh of {num_devices} nodes", config.num_columns(), config.num_rows());
        Ok(Self {
            entity,
            config: config.clone(),
            system,
            nodes,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    #[must_use]
    pub fn system(&self) -> &Rc<SystemMemory> {
        &self.system
    }

    #[must_use]
    pub fn nodes(&self) -> &[RouterNode] {
        &self.nodes
    }

    /// # Panics
    ///
    /// If the position is outside the mesh.
    #[must_use]
    pub fn node(&self, column: u16, row: u16) -> &RouterNode {
        assert!(column < self.config.num_columns() && row < self.config.num_rows());
        &self.nodes[usize::from(self.config.device_id(column, row))]
    }
}

fn reverse(link: LinkId) -> LinkId {
    match link {
        NEXT_COLUMN => PREV_COLUMN,
        PREV_COLUMN => NEXT_COLUMN,
        NEXT_ROW => PREV_ROW,
        _ => NEXT_ROW,
    }
}
