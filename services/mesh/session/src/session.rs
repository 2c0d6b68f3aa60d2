//! Mesh session: the stateful protocol engine.
//!
//! A session owns the sequence counter, the neighbor and peer registries, the
//! receive window and in-flight reassembly. Exactly one task drives it; every
//! method takes `&mut self`.

use crate::clock::Clock;
use crate::error::{SessionError, TransportError};
use crate::handler::{MeshHandler, SenderAddr};
use crate::identity::{id_of, LocalIdentity};
use crate::transport::{Datagram, Radio};
use crate::window::RxWindow;
use bytes::Bytes;
use mesh_storage::{
    NeighborEntry, NeighborTable, Observation, PeerCache, DEFAULT_MAX_NEIGHBORS,
    DEFAULT_MAX_PEERS,
};
use mesh_wire::{
    decode_table, encode_table, parse_packet, Chunker, Flags, Header, HwAddr, NodeId, Packet,
    PacketType, Reassembler, ReassemblyLimits, WireError, CHECKSUM_SIZE, DEFAULT_TTL,
    HEADER_SIZE,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// HELLO capability bit: node bridges the mesh to another network
pub const CAP_GATEWAY: u8 = 1 << 0;

/// Configuration for a mesh session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Link-layer pre-shared key, installed on the radio at start
    pub psk: Option<Bytes>,
    /// TTL for locally originated unicast frames
    pub ttl: u8,
    /// Neighbor table capacity
    pub max_neighbors: usize,
    /// Peer cache capacity
    pub max_peers: usize,
    /// How often a closed receive window is re-checked
    pub rx_poll_interval: Duration,
    /// How long an incomplete chunk series is kept
    pub reassembly_timeout: Duration,
    /// Chunk series held at once
    pub max_reassemblies: usize,
    /// Largest message accepted for sending or reassembly
    pub max_message_size: usize,
    /// Attach a neighbor table snapshot to HELLO_ACK
    pub share_neighbors: bool,
    /// Advertise gateway capability in HELLO
    pub gateway: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            psk: None,
            ttl: DEFAULT_TTL,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            max_peers: DEFAULT_MAX_PEERS,
            rx_poll_interval: Duration::from_secs(1),
            reassembly_timeout: Duration::from_secs(5),
            max_reassemblies: 8,
            max_message_size: 4096,
            share_neighbors: false,
            gateway: false,
        }
    }
}

impl SessionConfig {
    fn reassembly_limits(&self) -> ReassemblyLimits {
        ReassemblyLimits {
            lifetime_ms: u32::try_from(self.reassembly_timeout.as_millis()).unwrap_or(u32::MAX),
            max_series: self.max_reassemblies,
            max_message: self.max_message_size,
        }
    }
}

/// Counters for a session
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionStats {
    /// Frames handed to the radio
    pub frames_sent: u64,
    /// Frames taken from the radio
    pub frames_received: u64,
    /// Received frames discarded as invalid, foreign or our own
    pub frames_dropped: u64,
    /// Bytes handed to the radio
    pub bytes_out: u64,
    /// Bytes taken from the radio
    pub bytes_in: u64,
    /// Complete messages handed to the application
    pub messages_delivered: u64,
    /// Application callbacks that returned an error
    pub callback_failures: u64,
    /// Tick of the last received frame
    pub last_frame_in_ms: Option<u32>,
    /// Tick of the last sent frame
    pub last_frame_out_ms: Option<u32>,
}

/// Destination of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// Radio address, used as is
    ByAddress(HwAddr),
    /// Node id, resolved through the neighbor table
    ById(NodeId),
}

impl From<HwAddr> for Peer {
    fn from(addr: HwAddr) -> Self {
        Peer::ByAddress(addr)
    }
}

impl From<NodeId> for Peer {
    fn from(id: NodeId) -> Self {
        Peer::ById(id)
    }
}

enum RunEvent {
    Frame(Result<Datagram, TransportError>),
    Tick,
    Shutdown,
}

/// Mesh protocol engine bound to one radio
pub struct MeshSession<R: Radio, H: MeshHandler> {
    radio: R,
    clock: Arc<dyn Clock>,
    handler: H,
    config: SessionConfig,
    identity: LocalIdentity,
    neighbors: NeighborTable,
    peers: PeerCache,
    chunker: Chunker,
    reassembler: Reassembler,
    seq: u16,
    started: bool,
    rx: RxWindow,
    stats: SessionStats,
}

impl<R: Radio, H: MeshHandler> MeshSession<R, H> {
    /// Create a stopped session
    pub fn new(
        radio: R,
        clock: Arc<dyn Clock>,
        handler: H,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let identity = LocalIdentity::new(radio.hw_addr());
        // Pieces sized so every frame fits the radio
        let chunk_size = radio
            .max_frame_size()
            .saturating_sub(HEADER_SIZE + CHECKSUM_SIZE);
        Ok(Self {
            neighbors: NeighborTable::new(config.max_neighbors)?,
            peers: PeerCache::new(config.max_peers)?,
            reassembler: Reassembler::with_limits(config.reassembly_limits()),
            chunker: Chunker::with_chunk_size(chunk_size),
            radio,
            clock,
            handler,
            config,
            identity,
            seq: 0,
            started: false,
            rx: RxWindow::Closed,
            stats: SessionStats::default(),
        })
    }

    /// Local node id
    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    /// Local radio address
    pub fn hw_addr(&self) -> HwAddr {
        self.identity.hw_addr()
    }

    /// Whether `start()` has been called
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Last sequence number used
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Known neighbors, oldest first
    pub fn neighbors(&self) -> Vec<NeighborEntry> {
        self.neighbors.entries()
    }

    /// One known neighbor
    pub fn neighbor(&self, node_id: NodeId) -> Option<&NeighborEntry> {
        self.neighbors.get(node_id)
    }

    /// The application handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The application handler, mutably
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The underlying radio
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Switch the radio on and make the broadcast address sendable
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Ok(());
        }
        self.radio.set_active(true)?;
        if let Some(psk) = &self.config.psk {
            self.radio.set_key(psk)?;
        }
        self.register_peer(HwAddr::BROADCAST)?;
        self.started = true;
        info!(
            "Mesh session started as {} ({})",
            self.node_id(),
            self.hw_addr()
        );
        Ok(())
    }

    /// Close the receive window and switch the radio off
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if !self.started {
            return Ok(());
        }
        self.rx_disable();
        self.started = false;
        self.radio.set_active(false)?;
        info!("Mesh session {} stopped", self.node_id());
        Ok(())
    }

    /// Expect frames for `window`, or until disabled
    pub fn rx_enable(&mut self, window: Option<Duration>) {
        self.rx = RxWindow::open(self.clock.ticks_ms(), window);
        debug!("Receive window open: {:?}", window);
    }

    /// Stop expecting frames
    pub fn rx_disable(&mut self) {
        self.rx = RxWindow::Closed;
    }

    /// Whether frames are expected right now
    pub fn rx_expected(&self) -> bool {
        self.rx.is_open(self.clock.ticks_ms())
    }

    /// Broadcast a discovery HELLO
    pub async fn hello(&mut self) -> Result<u16, SessionError> {
        self.ensure_started()?;
        let seq = self.next_seq();
        let header = Header::new(PacketType::Hello, self.node_id(), NodeId::BROADCAST, seq)
            .with_ttl(1)
            .with_flags(Flags::BROADCAST | Flags::ACK | Flags::UNSECURE);
        let caps = if self.config.gateway { CAP_GATEWAY } else { 0 };

        let frames = self.chunker.chunk_message(header, &[caps])?;
        for frame in frames {
            self.transmit(HwAddr::BROADCAST, frame, false).await?;
        }
        debug!("{} sent HELLO seq {}", self.node_id(), seq);
        Ok(seq)
    }

    /// Answer a HELLO, optionally with our neighbor table
    pub async fn hello_ack(&mut self, to: SenderAddr) -> Result<u16, SessionError> {
        self.ensure_started()?;
        self.register_peer(to.hw_addr)?;
        let seq = self.next_seq();
        let header = Header::new(PacketType::HelloAck, self.node_id(), to.node_id, seq)
            .with_ttl(1)
            .with_flags(Flags::UNICAST | self.security_flag());

        let payload = if self.config.share_neighbors {
            encode_table(&self.neighbors.summaries())
        } else {
            Bytes::new()
        };

        let frames = self.chunker.chunk_message(header, &payload)?;
        for frame in frames {
            self.transmit(to.hw_addr, frame, true).await?;
        }
        debug!("{} sent HELLO_ACK seq {} to {}", self.node_id(), seq, to.node_id);
        Ok(seq)
    }

    /// Send an application message, chunked when needed. Returns the
    /// sequence number shared by all of its frames.
    pub async fn send(
        &mut self,
        peer: impl Into<Peer>,
        payload: &[u8],
    ) -> Result<u16, SessionError> {
        self.ensure_started()?;
        if payload.len() > self.config.max_message_size {
            return Err(WireError::Size(payload.len()).into());
        }

        let addr = self.resolve(peer.into())?;
        let broadcast = addr.is_broadcast();
        let (dst, flags, ack) = if broadcast {
            (NodeId::BROADCAST, Flags::BROADCAST, false)
        } else {
            (id_of(&addr), Flags::UNICAST | Flags::ACK, true)
        };
        self.register_peer(addr)?;

        let seq = self.next_seq();
        let header = Header::new(PacketType::Data, self.node_id(), dst, seq)
            .with_ttl(self.config.ttl)
            .with_flags(flags | self.security_flag());

        let frames = self.chunker.chunk_message(header, payload)?;
        let count = frames.len();
        for frame in frames {
            self.transmit(addr, frame, ack).await?;
        }
        debug!(
            "{} sent {} bytes to {} in {} frame(s), seq {}",
            self.node_id(),
            payload.len(),
            addr,
            count,
            seq
        );
        Ok(seq)
    }

    /// Wait for one frame and process it
    pub async fn receive_once(&mut self) -> Result<(), SessionError> {
        self.ensure_started()?;
        let datagram = self.radio.receive().await?;
        self.handle_datagram(datagram).await;
        Ok(())
    }

    /// Process every frame already queued, without waiting
    pub async fn poll_receive(&mut self) -> Result<usize, SessionError> {
        self.ensure_started()?;
        let mut count = 0;
        while let Some(datagram) = self.radio.try_receive()? {
            self.handle_datagram(datagram).await;
            count += 1;
        }
        Ok(count)
    }

    /// Process frames as they arrive until `timeout` has elapsed
    pub async fn receive_for(&mut self, timeout: Duration) -> Result<usize, SessionError> {
        self.ensure_started()?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut count = 0;
        loop {
            match tokio::time::timeout_at(deadline, self.radio.receive()).await {
                Ok(datagram) => {
                    self.handle_datagram(datagram?).await;
                    count += 1;
                }
                Err(_) => return Ok(count),
            }
        }
    }

    /// Receive loop. While the window is closed it re-checks every poll
    /// interval; while open it waits on the radio. Returns once `shutdown`
    /// turns true or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        self.ensure_started()?;
        let poll = self.config.rx_poll_interval;
        debug!("{} receive loop running", self.node_id());

        loop {
            if *shutdown.borrow() {
                break;
            }

            let event = if self.rx_expected() {
                tokio::select! {
                    res = self.radio.receive() => RunEvent::Frame(res),
                    changed = shutdown.changed() => match changed {
                        Ok(()) => RunEvent::Tick,
                        Err(_) => RunEvent::Shutdown,
                    },
                    // Re-check a window that may have a deadline
                    _ = tokio::time::sleep(poll) => RunEvent::Tick,
                }
            } else {
                tokio::select! {
                    changed = shutdown.changed() => match changed {
                        Ok(()) => RunEvent::Tick,
                        Err(_) => RunEvent::Shutdown,
                    },
                    _ = tokio::time::sleep(poll) => RunEvent::Tick,
                }
            };

            match event {
                RunEvent::Frame(Ok(datagram)) => self.handle_datagram(datagram).await,
                RunEvent::Frame(Err(TransportError::Closed)) => {
                    warn!("{} radio closed, leaving receive loop", self.node_id());
                    return Err(TransportError::Closed.into());
                }
                RunEvent::Frame(Err(e)) => warn!("{} receive failed: {}", self.node_id(), e),
                RunEvent::Tick => {}
                RunEvent::Shutdown => break,
            }
        }

        debug!("{} receive loop stopped", self.node_id());
        Ok(())
    }

    /// Validate and dispatch one inbound frame. Invalid frames are dropped
    /// and counted, never surfaced.
    pub async fn handle_datagram(&mut self, datagram: Datagram) {
        let now = self.clock.ticks_ms();
        self.stats.frames_received += 1;
        self.stats.bytes_in += datagram.bytes.len() as u64;
        self.stats.last_frame_in_ms = Some(now);
        self.reassembler.expire(now);

        let Datagram { addr, bytes, rssi } = datagram;
        let packet = match parse_packet(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Dropping frame from {}: {}", addr, e);
                self.stats.frames_dropped += 1;
                return;
            }
        };

        let me = self.node_id();
        let src = packet.src();
        if src == me {
            trace!("Dropping own frame seq {}", packet.header.seq);
            self.stats.frames_dropped += 1;
            return;
        }
        if src != id_of(&addr) {
            trace!("Dropping frame from {} claiming src {}", addr, src);
            self.stats.frames_dropped += 1;
            return;
        }
        if !packet.header.is_broadcast() && packet.header.dst != me {
            trace!("Dropping frame for {} from {}", packet.header.dst, src);
            self.stats.frames_dropped += 1;
            return;
        }

        let from = SenderAddr {
            hw_addr: addr,
            node_id: src,
        };
        self.observe(&packet, from, rssi, now);

        match packet.typ() {
            PacketType::Hello => self.on_hello(&packet, from).await,
            PacketType::HelloAck => self.on_hello_ack(&packet, from, now),
            PacketType::Data => self.on_data(&packet, from, now),
            PacketType::Ack | PacketType::Ctrl => {
                debug!("Ignoring {:?} from {}", packet.typ(), src);
            }
        }
    }

    fn observe(&mut self, packet: &Packet, from: SenderAddr, rssi: i8, now: u32) {
        let is_gateway = match packet.typ() {
            PacketType::Hello => packet.payload.first().map(|caps| caps & CAP_GATEWAY != 0),
            _ => None,
        };
        let update = self.neighbors.upsert(Observation {
            node_id: from.node_id,
            hw_addr: from.hw_addr,
            version: packet.header.version,
            seq: packet.header.seq,
            now_ms: now,
            rssi,
            is_gateway,
        });
        if update.is_new() {
            info!(
                "{} discovered neighbor {} ({}, {} dBm)",
                self.node_id(),
                from.node_id,
                from.hw_addr,
                rssi
            );
        }
    }

    async fn on_hello(&mut self, packet: &Packet, from: SenderAddr) {
        debug!("{} got HELLO from {}", self.node_id(), from.node_id);
        if !packet.flags().contains(Flags::ACK) {
            return;
        }
        if let Err(e) = self.hello_ack(from).await {
            warn!("HELLO_ACK to {} failed: {}", from.node_id, e);
        }
    }

    fn on_hello_ack(&mut self, packet: &Packet, from: SenderAddr, now: u32) {
        debug!("{} got HELLO_ACK from {}", self.node_id(), from.node_id);
        let Some(body) = self.message_body(packet, now) else {
            return;
        };
        if body.is_empty() {
            return;
        }

        let table = match decode_table(&body) {
            Ok(table) => table,
            Err(e) => {
                trace!("Bad neighbor table from {}: {}", from.node_id, e);
                return;
            }
        };
        debug!(
            "{} received {} shared neighbor(s) from {}",
            self.node_id(),
            table.len(),
            from.node_id
        );
        if let Err(e) = self.handler.on_neighbor_table(from, &table) {
            self.stats.callback_failures += 1;
            error!("Neighbor table handler failed for {}: {:#}", from.node_id, e);
        }
    }

    fn on_data(&mut self, packet: &Packet, from: SenderAddr, now: u32) {
        let Some(body) = self.message_body(packet, now) else {
            return;
        };
        self.stats.messages_delivered += 1;
        if let Err(e) = self.handler.on_data(from, &body) {
            self.stats.callback_failures += 1;
            error!("Data handler failed for message from {}: {:#}", from.node_id, e);
        }
    }

    /// Whole message carried by a packet, once its chunk series completes
    fn message_body(&mut self, packet: &Packet, now: u32) -> Option<Bytes> {
        if packet.flags().is_chunk() {
            self.reassembler.add_chunk(packet, now)
        } else {
            Some(packet.payload.clone())
        }
    }

    async fn transmit(
        &mut self,
        addr: HwAddr,
        frame: Bytes,
        ack: bool,
    ) -> Result<(), SessionError> {
        let len = frame.len() as u64;
        self.radio.send(addr, frame, ack).await?;
        self.stats.frames_sent += 1;
        self.stats.bytes_out += len;
        self.stats.last_frame_out_ms = Some(self.clock.ticks_ms());
        Ok(())
    }

    fn resolve(&self, peer: Peer) -> Result<HwAddr, SessionError> {
        match peer {
            Peer::ByAddress(addr) => Ok(addr),
            Peer::ById(NodeId::BROADCAST) => Ok(HwAddr::BROADCAST),
            Peer::ById(id) => self
                .neighbors
                .hw_addr_of(id)
                .ok_or(SessionError::UnknownNode(id)),
        }
    }

    fn register_peer(&mut self, addr: HwAddr) -> Result<(), SessionError> {
        if self.peers.contains(&addr) {
            return Ok(());
        }
        self.radio.add_peer(addr)?;
        self.peers.register(addr);
        Ok(())
    }

    fn security_flag(&self) -> Flags {
        if self.config.psk.is_some() {
            Flags::SECURE
        } else {
            Flags::UNSECURE
        }
    }

    fn next_seq(&mut self) -> u16 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn ensure_started(&self) -> Result<(), SessionError> {
        if self.started {
            Ok(())
        } else {
            Err(SessionError::NotStarted)
        }
    }
}
