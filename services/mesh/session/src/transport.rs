//! Radio transport collaborator and an in-process simulated medium.
//!
//! The mesh session only talks to a [`Radio`]. Real hardware drivers
//! implement it on the device; [`SimAir`] and [`SimRadio`] stand in for the
//! air on a host, for tests and the simulation binary.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use mesh_wire::{HwAddr, MAX_FRAME_SIZE};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Length of a transport pre-shared key
pub const KEY_LEN: usize = 16;

/// Largest frame a simulated radio carries, the ESP-NOW payload limit
pub const SIM_MAX_FRAME_SIZE: usize = 250;

/// Frames a simulated radio buffers before new arrivals are dropped
pub const SIM_QUEUE_DEPTH: usize = 64;

/// One frame as handed up by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Radio address of the sender
    pub addr: HwAddr,
    /// Raw frame bytes
    pub bytes: Bytes,
    /// Signal strength in dBm
    pub rssi: i8,
}

/// Connectionless broadcast-capable radio link
#[async_trait]
pub trait Radio: Send {
    /// Local radio address
    fn hw_addr(&self) -> HwAddr;

    /// Switch the radio on or off
    fn set_active(&mut self, active: bool) -> Result<(), TransportError>;

    /// Register a unicast target
    fn add_peer(&mut self, addr: HwAddr) -> Result<(), TransportError>;

    /// Install the link-layer pre-shared key
    fn set_key(&mut self, key: &[u8]) -> Result<(), TransportError>;

    /// Largest frame the radio accepts
    fn max_frame_size(&self) -> usize {
        MAX_FRAME_SIZE
    }

    /// Transmit a frame, waiting until the radio accepts it
    async fn send(&mut self, addr: HwAddr, frame: Bytes, ack: bool) -> Result<(), TransportError>;

    /// Wait for the next frame
    async fn receive(&mut self) -> Result<Datagram, TransportError>;

    /// Next queued frame, if any, without waiting
    fn try_receive(&mut self) -> Result<Option<Datagram>, TransportError>;
}

#[derive(Debug)]
struct Port {
    tx: mpsc::Sender<Datagram>,
    active: Arc<AtomicBool>,
}

#[derive(Debug)]
struct AirInner {
    ports: DashMap<HwAddr, Port>,
    rssi: i8,
}

/// Shared simulated air: every attached radio hears broadcasts
#[derive(Debug, Clone)]
pub struct SimAir {
    inner: Arc<AirInner>,
}

impl SimAir {
    /// Empty medium where every link reports -50 dBm
    pub fn new() -> Self {
        Self::with_rssi(-50)
    }

    /// Empty medium with a fixed link signal strength
    pub fn with_rssi(rssi: i8) -> Self {
        Self {
            inner: Arc::new(AirInner {
                ports: DashMap::new(),
                rssi,
            }),
        }
    }

    /// Attach a radio with the given address. An existing radio with the same
    /// address is cut off.
    pub fn attach(&self, hw_addr: HwAddr) -> SimRadio {
        let (tx, rx) = mpsc::channel(SIM_QUEUE_DEPTH);
        let active = Arc::new(AtomicBool::new(false));
        let port = Port {
            tx,
            active: active.clone(),
        };
        if self.inner.ports.insert(hw_addr, port).is_some() {
            warn!("Radio {} attached twice, previous one detached", hw_addr);
        }
        SimRadio {
            air: self.clone(),
            hw_addr,
            rx,
            active,
            peers: HashSet::new(),
            key: None,
        }
    }

    /// Number of attached radios
    pub fn len(&self) -> usize {
        self.inner.ports.len()
    }

    /// Whether no radio is attached
    pub fn is_empty(&self) -> bool {
        self.inner.ports.is_empty()
    }

    fn deliver(&self, from: HwAddr, to: &Port, frame: &Bytes) -> bool {
        if !to.active.load(Ordering::Acquire) {
            return false;
        }
        let datagram = Datagram {
            addr: from,
            bytes: frame.clone(),
            rssi: self.inner.rssi,
        };
        match to.tx.try_send(datagram) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Receive queue full, frame from {} dropped", from);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn broadcast(&self, from: HwAddr, frame: &Bytes) -> usize {
        self.inner
            .ports
            .iter()
            .filter(|port| *port.key() != from)
            .filter(|port| self.deliver(from, port.value(), frame))
            .count()
    }

    fn unicast(&self, from: HwAddr, to: HwAddr, frame: &Bytes) -> bool {
        self.inner
            .ports
            .get(&to)
            .map(|port| self.deliver(from, port.value(), frame))
            .unwrap_or(false)
    }
}

impl Default for SimAir {
    fn default() -> Self {
        Self::new()
    }
}

/// Radio attached to a [`SimAir`]
#[derive(Debug)]
pub struct SimRadio {
    air: SimAir,
    hw_addr: HwAddr,
    rx: mpsc::Receiver<Datagram>,
    active: Arc<AtomicBool>,
    peers: HashSet<HwAddr>,
    key: Option<[u8; KEY_LEN]>,
}

impl SimRadio {
    /// Whether the radio is switched on
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a key is installed
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Whether an address was registered as a unicast target
    pub fn has_peer(&self, addr: &HwAddr) -> bool {
        self.peers.contains(addr)
    }
}

#[async_trait]
impl Radio for SimRadio {
    fn hw_addr(&self) -> HwAddr {
        self.hw_addr
    }

    fn set_active(&mut self, active: bool) -> Result<(), TransportError> {
        self.active.store(active, Ordering::Release);
        if !active {
            while self.rx.try_recv().is_ok() {}
        }
        Ok(())
    }

    fn add_peer(&mut self, addr: HwAddr) -> Result<(), TransportError> {
        self.peers.insert(addr);
        Ok(())
    }

    fn set_key(&mut self, key: &[u8]) -> Result<(), TransportError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| TransportError::InvalidKey(key.len()))?;
        self.key = Some(key);
        Ok(())
    }

    fn max_frame_size(&self) -> usize {
        SIM_MAX_FRAME_SIZE
    }

    async fn send(&mut self, addr: HwAddr, frame: Bytes, ack: bool) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Inactive);
        }
        if frame.len() > SIM_MAX_FRAME_SIZE {
            return Err(TransportError::PayloadTooLarge(frame.len()));
        }

        if addr.is_broadcast() {
            let heard = self.air.broadcast(self.hw_addr, &frame);
            trace!("{} broadcast {} bytes, heard by {}", self.hw_addr, frame.len(), heard);
            return Ok(());
        }

        if !self.peers.contains(&addr) {
            return Err(TransportError::UnknownPeer(addr));
        }
        let delivered = self.air.unicast(self.hw_addr, addr, &frame);
        trace!(
            "{} -> {} {} bytes, delivered: {}",
            self.hw_addr,
            addr,
            frame.len(),
            delivered
        );
        if ack && !delivered {
            return Err(TransportError::NoAck(addr));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Datagram, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    fn try_receive(&mut self) -> Result<Option<Datagram>, TransportError> {
        match self.rx.try_recv() {
            Ok(datagram) => Ok(Some(datagram)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        // Only detach if the port is still ours
        self.air
            .inner
            .ports
            .remove_if(&self.hw_addr, |_, port| Arc::ptr_eq(&port.active, &self.active));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> HwAddr {
        HwAddr([0x02, 0, 0, 0, 0, last])
    }

    fn active(air: &SimAir, last: u8) -> SimRadio {
        let mut radio = air.attach(addr(last));
        radio.set_active(true).unwrap();
        radio
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_others() {
        let air = SimAir::new();
        let mut a = active(&air, 1);
        let mut b = active(&air, 2);
        let mut c = active(&air, 3);

        a.send(HwAddr::BROADCAST, Bytes::from_static(b"hi"), false)
            .await
            .unwrap();

        for radio in [&mut b, &mut c] {
            let dg = radio.try_receive().unwrap().unwrap();
            assert_eq!(dg.addr, addr(1));
            assert_eq!(&dg.bytes[..], b"hi");
            assert_eq!(dg.rssi, -50);
        }
        assert!(a.try_receive().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unicast_needs_peer() {
        let air = SimAir::new();
        let mut a = active(&air, 1);
        let mut b = active(&air, 2);

        let frame = Bytes::from_static(b"x");
        assert_eq!(
            a.send(addr(2), frame.clone(), true).await,
            Err(TransportError::UnknownPeer(addr(2)))
        );

        a.add_peer(addr(2)).unwrap();
        a.send(addr(2), frame, true).await.unwrap();
        assert_eq!(b.receive().await.unwrap().addr, addr(1));
    }

    #[tokio::test]
    async fn test_inactive_radio() {
        let air = SimAir::new();
        let mut a = active(&air, 1);
        let mut b = air.attach(addr(2));
        a.add_peer(addr(2)).unwrap();

        // Asleep receivers hear nothing and give no acknowledgment
        assert_eq!(
            a.send(addr(2), Bytes::from_static(b"x"), true).await,
            Err(TransportError::NoAck(addr(2)))
        );
        a.send(addr(2), Bytes::from_static(b"x"), false).await.unwrap();
        assert!(b.try_receive().unwrap().is_none());

        assert_eq!(
            b.send(HwAddr::BROADCAST, Bytes::from_static(b"x"), false).await,
            Err(TransportError::Inactive)
        );
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let air = SimAir::new();
        let mut a = active(&air, 1);
        assert_eq!(a.max_frame_size(), SIM_MAX_FRAME_SIZE);

        // A full codec frame is one byte over the radio limit
        let frame = Bytes::from(vec![0u8; MAX_FRAME_SIZE]);
        assert_eq!(
            a.send(HwAddr::BROADCAST, frame, false).await,
            Err(TransportError::PayloadTooLarge(MAX_FRAME_SIZE))
        );
        let frame = Bytes::from(vec![0u8; SIM_MAX_FRAME_SIZE]);
        a.send(HwAddr::BROADCAST, frame, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let air = SimAir::new();
        let mut a = active(&air, 1);
        let mut b = active(&air, 2);
        a.add_peer(addr(2)).unwrap();

        for _ in 0..SIM_QUEUE_DEPTH {
            a.send(addr(2), Bytes::from_static(b"x"), true).await.unwrap();
        }
        assert_eq!(
            a.send(addr(2), Bytes::from_static(b"x"), true).await,
            Err(TransportError::NoAck(addr(2)))
        );
        a.send(HwAddr::BROADCAST, Bytes::from_static(b"y"), false)
            .await
            .unwrap();

        let mut queued = 0;
        while let Some(dg) = b.try_receive().unwrap() {
            assert_eq!(&dg.bytes[..], b"x");
            queued += 1;
        }
        assert_eq!(queued, SIM_QUEUE_DEPTH);

        // Room again once drained
        a.send(addr(2), Bytes::from_static(b"z"), true).await.unwrap();
        assert_eq!(&b.try_receive().unwrap().unwrap().bytes[..], b"z");
    }

    #[tokio::test]
    async fn test_link_rssi() {
        let air = SimAir::with_rssi(-80);
        let mut a = active(&air, 1);
        let mut b = active(&air, 2);
        a.send(HwAddr::BROADCAST, Bytes::from_static(b"hi"), false)
            .await
            .unwrap();
        assert_eq!(b.receive().await.unwrap().rssi, -80);
    }

    #[test]
    fn test_key_length_checked() {
        let air = SimAir::new();
        let mut a = air.attach(addr(1));
        assert_eq!(a.set_key(b"short"), Err(TransportError::InvalidKey(5)));
        a.set_key(&[7u8; KEY_LEN]).unwrap();
        assert!(a.has_key());
    }

    #[test]
    fn test_drop_detaches() {
        let air = SimAir::new();
        let a = air.attach(addr(1));
        let _b = air.attach(addr(2));
        assert_eq!(air.len(), 2);
        drop(a);
        assert_eq!(air.len(), 1);
    }
}
