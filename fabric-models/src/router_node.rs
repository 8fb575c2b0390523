// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A node of the fabric.
//!
//! A router node owns every channel of its links:
//!
//! ```rust
//! //            +-------------------- link n -------------------+
//! // queue ---> | consumer ---------------------------------->  | ---> peer
//! //            | producer <----------------------------------  | <--- peer
//! //            |    \--> local memory / queue of another link  |
//! //            | control_out --------------------------------> | ---> peer
//! //            | control_in <--------------------------------- | <--- peer
//! //            +-----------------------------------------------+
//! # use std; // Just here to prevent doc warning for an invalid doc block
//! ```
//!
//! Its main loop services every link once per cycle. A link is only used
//! once its handshake has completed.

use std::cell::{Cell, Ref, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;

use async_trait::async_trait;
use fabric_engine::clock::Clock;
use fabric_engine::sim_error;
use fabric_engine::traits::Runnable;
use fabric_engine::types::{SimError, SimResult};
use fabric_router::channel::consumer::Consumer;
use fabric_router::channel::producer::Producer;
use fabric_router::channel::{ChannelConfig, ChannelFault, ConsumerLayout, PeerBuffer, ProducerLayout};
use fabric_router::control::{
    ControlInbound, ControlInboundLayout, ControlOutbound, ControlOutboundLayout,
};
use fabric_router::handshake::LinkHandshake;
use fabric_router::memory::{MemoryAllocator, NodePort};
use fabric_router::packet::{Command, PacketHeader};
use fabric_router::pull_request::QueueHandle;
use fabric_router::routing::{Route, RoutingTable};
use fabric_router::transport::{Memory, Transport};
use fabric_router::types::{GlobalAddress, LinkId, NodeId};
use fabric_track::entity::Entity;
use fabric_track::{debug, info, trace};

use crate::sessions::{SocketSession, SocketSessions};

#[derive(Clone, Debug)]
pub struct RouterNodeConfig {
    channel: ChannelConfig,
    control_slots: u32,
    handshake_timeout: Option<u64>,
    stop_on_fault: bool,
}

impl RouterNodeConfig {
    /// # Panics
    ///
    /// If `control_slots` is zero.
    #[must_use]
    pub fn new(
        channel: ChannelConfig,
        control_slots: u32,
        handshake_timeout: Option<u64>,
        stop_on_fault: bool,
    ) -> Self {
        assert!(control_slots > 0, "a control channel needs at least one slot");
        Self {
            channel,
            control_slots,
            handshake_timeout,
            stop_on_fault,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    #[must_use]
    pub fn control_slots(&self) -> u32 {
        self.control_slots
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Option<u64> {
        self.handshake_timeout
    }

    #[must_use]
    pub fn stop_on_fault(&self) -> bool {
        self.stop_on_fault
    }
}

impl Default for RouterNodeConfig {
    fn default() -> Self {
        Self::new(ChannelConfig::default(), 8, Some(1000), true)
    }
}

/// Memory used on one node by one link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkLayout {
    pub handshake_mailbox: u32,
    pub handshake_scratch: u32,
    pub consumer: ConsumerLayout,
    pub producer: ProducerLayout,
    pub control_out: ControlOutboundLayout,
    pub control_in: ControlInboundLayout,
}

impl LinkLayout {
    pub fn allocate(alloc: &mut MemoryAllocator, config: &RouterNodeConfig) -> Result<Self, SimError> {
        Ok(Self {
            handshake_mailbox: alloc.alloc_words(1)?,
            handshake_scratch: alloc.alloc_words(1)?,
            consumer: ConsumerLayout::allocate(alloc, config.channel())?,
            producer: ProducerLayout::allocate(alloc, config.channel())?,
            control_out: ControlOutboundLayout::allocate(alloc, config.control_slots())?,
            control_in: ControlInboundLayout::allocate(alloc, config.control_slots())?,
        })
    }
}

/// How one link of a node is connected.
#[derive(Clone, Copy, Debug)]
pub struct LinkWiring {
    pub link: LinkId,
    pub local: LinkLayout,
    pub peer_node: NodeId,
    pub peer: LinkLayout,
}

struct LinkChannels {
    link: LinkId,
    established: bool,
    handshake: LinkHandshake,
    consumer: Consumer,
    producer: Producer,
    control_in: ControlInbound,
}

struct RouterNodeState {
    port: RefCell<NodePort>,
    allocator: RefCell<MemoryAllocator>,
    links: RefCell<Vec<LinkChannels>>,

    /// Indexed by link.
    control_out: RefCell<Vec<Option<ControlOutbound>>>,

    /// Control messages from this node waiting for a free slot.
    control_backlog: RefCell<VecDeque<PacketHeader>>,
    sessions: RefCell<SocketSessions>,
    responses_sent: Cell<u64>,
}

#[derive(Clone)]
pub struct RouterNode {
    pub entity: Arc<Entity>,
    clock: Clock,
    config: RouterNodeConfig,
    routing: Rc<RoutingTable>,
    state: Rc<RouterNodeState>,
}

impl RouterNode {
    /// Build the channels of every link and clear their memory.
    ///
    /// `allocator` must already exclude the link layouts; the node hands out
    /// what is left to its clients.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Arc<Entity>,
        name: &str,
        clock: Clock,
        mut port: NodePort,
        config: &RouterNodeConfig,
        routing: RoutingTable,
        links: &[LinkWiring],
        allocator: MemoryAllocator,
    ) -> Self {
        let entity = Arc::new(Entity::new(parent, name));
        let routing = Rc::new(routing);
        let channel_config = config.channel();

        let mut channels = Vec::with_capacity(links.len());
        let mut control_out = Vec::new();
        for wiring in links {
            let link = wiring.link;
            let link_entity = Arc::new(Entity::new(&entity, &link.to_string()));

            let handshake = LinkHandshake::new(
                &link_entity,
                link,
                wiring.local.handshake_mailbox,
                wiring.local.handshake_scratch,
                wiring.peer.handshake_mailbox,
                config.handshake_timeout(),
            );

            let mut consumer = Consumer::new(
                &link_entity,
                "consumer",
                &wiring.local.consumer,
                &PeerBuffer::new(link, &wiring.peer.producer, channel_config),
                channel_config,
            );
            consumer.init(&mut port);

            let mut producer = Producer::new(
                &link_entity,
                "producer",
                &wiring.local.producer,
                GlobalAddress::new(wiring.peer_node, wiring.peer.consumer.read_ptr_mailbox),
                routing.clone(),
                channel_config,
            );
            producer.init(&mut port);

            let mut outbound = ControlOutbound::new(
                &link_entity,
                link,
                &wiring.local.control_out,
                &wiring.peer.control_in,
                config.control_slots(),
            );
            outbound.init(&mut port);
            if control_out.len() <= link.index() {
                control_out.resize_with(link.index() + 1, || None);
            }
            control_out[link.index()] = Some(outbound);

            let mut control_in = ControlInbound::new(
                &link_entity,
                &wiring.local.control_in,
                config.control_slots(),
                GlobalAddress::new(wiring.peer_node, wiring.peer.control_out.read_ptr_mailbox),
                routing.clone(),
            );
            control_in.init(&mut port);

            port.write_u32(wiring.local.handshake_mailbox, 0);

            channels.push(LinkChannels {
                link,
                established: false,
                handshake,
                consumer,
                producer,
                control_in,
            });
        }

        // Any producer may forward to any link of this node.
        let queues: Vec<(LinkId, QueueHandle)> = channels
            .iter()
            .map(|channels| (channels.link, channels.consumer.queue_handle(&port)))
            .collect();
        for channels in &mut channels {
            for (link, queue) in &queues {
                channels.producer.connect_next_hop(*link, *queue);
            }
        }

        let sessions = SocketSessions::new(&entity);
        Self {
            entity,
            clock,
            config: config.clone(),
            routing,
            state: Rc::new(RouterNodeState {
                port: RefCell::new(port),
                allocator: RefCell::new(allocator),
                links: RefCell::new(channels),
                control_out: RefCell::new(control_out),
                control_backlog: RefCell::new(VecDeque::new()),
                sessions: RefCell::new(sessions),
                responses_sent: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.state.port.borrow().node()
    }

    #[must_use]
    pub fn mesh_id(&self) -> u16 {
        self.routing.mesh_id()
    }

    #[must_use]
    pub fn device_id(&self) -> u16 {
        self.routing.device_id()
    }

    #[must_use]
    pub fn routing(&self) -> &Rc<RoutingTable> {
        &self.routing
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// A new handle on this node's memory.
    #[must_use]
    pub fn port(&self) -> NodePort {
        self.state.port.borrow().clone()
    }

    /// Reserve `num_words` of this node's memory.
    pub fn alloc_words(&self, num_words: u32) -> Result<u32, SimError> {
        self.state.allocator.borrow_mut().alloc_words(num_words)
    }

    /// The queue of the consumer that sends over `link`.
    #[must_use]
    pub fn queue_handle(&self, link: LinkId) -> Option<QueueHandle> {
        let port = self.state.port.borrow();
        self.state
            .links
            .borrow()
            .iter()
            .find(|channels| channels.link == link)
            .map(|channels| channels.consumer.queue_handle(&*port))
    }

    /// Send a header-only control message from this node.
    pub fn send_control(&self, message: PacketHeader) {
        self.state.control_backlog.borrow_mut().push_back(message);
    }

    #[must_use]
    pub fn session(&self, socket_id: u16) -> Option<SocketSession> {
        self.state.sessions.borrow().session(socket_id)
    }

    #[must_use]
    pub fn sessions(&self) -> Ref<'_, SocketSessions> {
        self.state.sessions.borrow()
    }

    #[must_use]
    pub fn is_established(&self, link: LinkId) -> bool {
        self.state
            .links
            .borrow()
            .iter()
            .any(|channels| channels.link == link && channels.established)
    }

    /// Calls to `forward` that moved data over `link`.
    #[must_use]
    pub fn productive_forwards(&self, link: LinkId) -> u64 {
        self.state
            .links
            .borrow()
            .iter()
            .find(|channels| channels.link == link)
            .map_or(0, |channels| channels.consumer.productive_forwards())
    }

    #[must_use]
    pub fn packets_delivered(&self) -> u64 {
        self.state
            .links
            .borrow()
            .iter()
            .map(|channels| channels.producer.packets_delivered())
            .sum()
    }

    #[must_use]
    pub fn responses_sent(&self) -> u64 {
        self.state.responses_sent.get()
    }

    /// The first fault found on any channel of this node.
    #[must_use]
    pub fn fault(&self) -> Option<(LinkId, ChannelFault)> {
        first_fault(&self.state.links.borrow())
    }

    /// Service every link once.
    pub fn service(&self) -> SimResult {
        let mut port = self.state.port.borrow_mut();
        let mut links = self.state.links.borrow_mut();
        let mut control_out = self.state.control_out.borrow_mut();
        let mut sessions = self.state.sessions.borrow_mut();
        let mut completed = Vec::new();

        for channels in links.iter_mut() {
            if !channels.established {
                match channels.handshake.poll(&mut *port) {
                    Poll::Pending => continue,
                    Poll::Ready(true) => {
                        info!(self.entity ; "{} established", channels.link);
                        channels.established = true;
                    }
                    Poll::Ready(false) => {
                        return sim_error!(format!(
                            "{}: {} handshake timed out",
                            self.entity, channels.link
                        ));
                    }
                }
            }

            channels.consumer.pull_data(&mut *port);
            channels.consumer.forward(&mut *port);
            channels.producer.step(&mut *port);
            completed.extend(channels.producer.take_completed());
            channels
                .control_in
                .process(&mut *port, &mut *sessions, control_out.as_mut_slice());
        }

        {
            let mut backlog = self.state.control_backlog.borrow_mut();
            for header in completed {
                backlog.push_back(self.response_for(&header));
                self.state.responses_sent.set(self.state.responses_sent.get() + 1);
            }

            while let Some(message) = backlog.front() {
                match self.routing.next_hop(message.dst_mesh_id, message.dst_device_id) {
                    Some(Route::Local) => {
                        deliver_local_control(&mut *port, &mut sessions, message);
                    }
                    Some(Route::Link(link)) => {
                        let sent = control_out
                            .get_mut(link.index())
                            .and_then(Option::as_mut)
                            .is_some_and(|outbound| outbound.try_send(&mut *port, message));
                        if !sent {
                            break;
                        }
                    }
                    None => {
                        return sim_error!(format!("{}: no route for {message}", self.entity));
                    }
                }
                backlog.pop_front();
            }
        }

        for channels in links.iter() {
            if !channels.established {
                continue;
            }
            if let Some(outbound) = control_out
                .get_mut(channels.link.index())
                .and_then(Option::as_mut)
            {
                outbound.forward(&mut *port);
            }
        }

        if self.config.stop_on_fault() {
            if let Some((link, fault)) = first_fault(&links) {
                return sim_error!(format!("{}: {link}: {fault}", self.entity));
            }
        }
        Ok(())
    }

    fn response_for(&self, header: &PacketHeader) -> PacketHeader {
        trace!(self.entity ; "response for {header}");
        PacketHeader::new(
            Command::AsyncWriteResponse,
            header.src_mesh_id,
            header.src_device_id,
        )
        .set_src(self.mesh_id(), self.device_id())
        .set_target(header.response_address)
    }
}

fn first_fault(links: &[LinkChannels]) -> Option<(LinkId, ChannelFault)> {
    links.iter().find_map(|channels| {
        channels
            .consumer
            .fault()
            .or(channels.producer.fault())
            .or(channels.control_in.fault())
            .map(|fault| (channels.link, fault))
    })
}

/// Handle a control message that never left this node.
fn deliver_local_control(
    port: &mut NodePort,
    sessions: &mut SocketSessions,
    message: &PacketHeader,
) {
    use fabric_router::control::SessionManager;

    match message.command {
        Command::AsyncWriteResponse => {
            port.remote_fetch_add(GlobalAddress(message.session_target_address), -1);
        }
        command if command.is_socket_control() => sessions.handle(message),
        _ => debug!(sessions.entity ; "dropping {message}"),
    }
}

impl fmt::Display for RouterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)
    }
}

#[async_trait(?Send)]
impl Runnable for RouterNode {
    async fn run(&self) -> SimResult {
        loop {
            self.service()?;
            self.clock.wait_cycles_or_exit(1).await;
        }
    }
}
