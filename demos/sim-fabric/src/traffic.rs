// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Random traffic between all devices of a mesh.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fabric_engine::engine::Engine;
use fabric_engine::sim_error;
use fabric_engine::types::{SimError, SimResult};
use fabric_models::client::FabricClient;
use fabric_models::mesh::Mesh;
use fabric_router::types::{GlobalAddress, words_for_bytes};
use fabric_track::info;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::TrafficConfig;

/// Last payload written from one device to another.
type Written = Rc<RefCell<Vec<Vec<Option<Vec<u8>>>>>>;

/// Handle on the traffic of a run, used to check the results once the
/// simulation has finished.
pub struct Traffic {
    config: TrafficConfig,
    num_devices: usize,

    /// `landing[dst][src]` is where `src` writes on `dst`.
    landing: Vec<Vec<GlobalAddress>>,
    written: Written,
    packets_sent: Rc<Cell<u64>>,
    clients_finished: Rc<Cell<usize>>,
}

impl Traffic {
    /// Create a client on every node of `mesh` and spawn its traffic.
    pub fn spawn(engine: &Engine, mesh: &Mesh, config: &TrafficConfig) -> Result<Self, SimError> {
        let num_devices = mesh.nodes().len();
        let packet_words = words_for_bytes(config.packet_bytes);

        let mut landing = Vec::with_capacity(num_devices);
        for node in mesh.nodes() {
            let mut regions = Vec::with_capacity(num_devices);
            for _ in 0..num_devices {
                let offset = node.alloc_words(packet_words)?;
                regions.push(GlobalAddress::new(node.node(), offset));
            }
            landing.push(regions);
        }

        let traffic = Self {
            config: config.clone(),
            num_devices,
            landing,
            written: Rc::new(RefCell::new(vec![vec![None; num_devices]; num_devices])),
            packets_sent: Rc::new(Cell::new(0)),
            clients_finished: Rc::new(Cell::new(0)),
        };

        for (src, node) in mesh.nodes().iter().enumerate() {
            let client = FabricClient::new(
                engine.top(),
                &format!("client{src}"),
                node,
                config.client_buffer_words,
            )?;
            engine.spawn(traffic.run_client(client, src, node.mesh_id()));
        }

        info!(engine.top() ;
            "{num_devices} clients each sending {} packets of {} bytes",
            config.packets_per_client,
            config.packet_bytes
        );
        Ok(traffic)
    }

    fn run_client(
        &self,
        mut client: FabricClient,
        src: usize,
        mesh_id: u16,
    ) -> impl Future<Output = SimResult> + 'static {
        let config = self.config.clone();
        let num_devices = self.num_devices;
        let targets: Vec<GlobalAddress> = self.landing.iter().map(|regions| regions[src]).collect();
        let written = self.written.clone();
        let packets_sent = self.packets_sent.clone();
        let clients_finished = self.clients_finished.clone();

        async move {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(src as u64));
            let mut payload = vec![0; config.packet_bytes as usize];
            for _ in 0..config.packets_per_client {
                let dst = rng.gen_range(0..num_devices);
                rng.fill_bytes(&mut payload);
                client
                    .async_write(mesh_id, dst as u16, targets[dst], &payload, true)
                    .await?;
                written.borrow_mut()[dst][src] = Some(payload.clone());
                packets_sent.set(packets_sent.get() + 1);
            }
            client.wait_for_responses().await;
            clients_finished.set(clients_finished.get() + 1);
            Ok(())
        }
    }

    #[must_use]
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.get()
    }

    #[must_use]
    pub fn payload_bytes_sent(&self) -> u64 {
        self.packets_sent() * u64::from(self.config.packet_bytes)
    }

    /// Check that every client finished and that the last packet between
    /// each pair of devices arrived intact.
    pub fn verify(&self, mesh: &Mesh) -> SimResult {
        let finished = self.clients_finished.get();
        if finished != self.num_devices {
            return sim_error!(format!(
                "{finished}/{} clients finished, {} packets sent",
                self.num_devices,
                self.packets_sent()
            ));
        }

        let written = self.written.borrow();
        for (dst, sources) in written.iter().enumerate() {
            for (src, payload) in sources.iter().enumerate() {
                let Some(payload) = payload else {
                    continue;
                };
                let mut received = vec![0; payload.len()];
                mesh.system().read(self.landing[dst][src], &mut received);
                if received != *payload {
                    return sim_error!(format!(
                        "payload from device {src} to device {dst} corrupted"
                    ));
                }
            }
        }
        Ok(())
    }
}
