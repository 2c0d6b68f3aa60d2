//! Mesh protocol engine for battery-powered radio nodes.
//!
//! This crate ties the wire codec and bounded registries together into a
//! [`MeshSession`]: node identity, neighbor discovery through HELLO and
//! HELLO_ACK, receive-window gating, and chunked application messages over a
//! connectionless [`Radio`].
//!
//! ## Features
//!
//! - **Node identity**: 16-bit ids derived from radio addresses
//! - **Discovery**: broadcast HELLO answered by unicast HELLO_ACK, optionally
//!   carrying the responder's neighbor table
//! - **Messaging**: unicast DATA, chunked and reassembled transparently
//! - **Receive window**: tells the scheduler whether replies are expected
//! - **Simulated air**: [`SimAir`] runs many nodes in one process
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_session::{MeshSession, MonotonicClock, SenderAddr, SessionConfig, SimAir};
//! use mesh_wire::HwAddr;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let air = SimAir::new();
//! let clock = Arc::new(MonotonicClock::new());
//! let radio = air.attach(HwAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x01]));
//!
//! let handler = |from: SenderAddr, payload: &[u8]| -> anyhow::Result<()> {
//!     println!("{} bytes from {}", payload.len(), from.node_id);
//!     Ok(())
//! };
//!
//! let mut session = MeshSession::new(radio, clock, handler, SessionConfig::default())?;
//! session.start()?;
//! session.hello().await?;
//! session.rx_enable(Some(Duration::from_secs(2)));
//! session.receive_for(Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod handler;
pub mod identity;
pub mod session;
pub mod transport;
pub mod window;

// Re-export main types
pub use clock::{ticks_diff, Clock, MonotonicClock};
pub use error::{SessionError, TransportError};
pub use handler::{MeshHandler, SenderAddr};
pub use identity::{id_of, LocalIdentity};
pub use session::{MeshSession, Peer, SessionConfig, SessionStats, CAP_GATEWAY};
pub use transport::{
    Datagram, Radio, SimAir, SimRadio, KEY_LEN, SIM_MAX_FRAME_SIZE, SIM_QUEUE_DEPTH,
};
pub use window::{parse_window, RxWindow};
