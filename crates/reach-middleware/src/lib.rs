//! `reach-middleware` – the Control Channel.
//!
//! Keeps a remote brain and an on-robot body synchronised over two logical
//! streams: best-effort telemetry (robot → client) and ordered, acknowledged
//! commands (client → robot).
//!
//! # Modules
//!
//! - [`protocol`] – typed JSON envelope `{type, sequence, payload, timestamp}`.
//! - [`sequence`] – follower-side sequence gate (ordering, duplicates, gaps).
//! - [`follower`] – the on-robot [`Follower`] actor.
//! - [`link`] – the [`Connector`] seam and the in-process loopback link.
//! - [`ws`] – WebSocket transport (one port per stream).
//! - [`client`] – the leader-side [`RobotClient`].
//! - [`bus`] – topic-partitioned event bus and the drop-oldest [`FrameStream`].

pub mod bus;
pub mod client;
pub mod follower;
pub mod link;
pub mod protocol;
pub mod sequence;
pub mod ws;

pub use bus::{BusEvent, BusPayload, EventBus, FrameStream, Topic, TopicReceiver};
pub use client::{ClientConfig, RobotClient};
pub use follower::{Follower, FollowerConfig, FollowerHandle};
pub use link::{ClientLink, Connector, LinkStatus, LoopbackConnector};
pub use protocol::{Envelope, LinkControl, Message, MessageType, decode, encode};
pub use sequence::{Admission, SequenceGate};
pub use ws::{WsConnector, WsServer};
