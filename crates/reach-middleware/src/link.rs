//! Transport seam of the control channel.
//!
//! The Robot Client never speaks to sockets directly. It asks a
//! [`Connector`] for a [`ClientLink`], a trio of channels carrying decoded
//! [`Message`]s, and the transport behind it can be the in-process
//! [`LoopbackConnector`], the WebSocket
//! [`WsConnector`][crate::ws::WsConnector], or any middleware bridge that
//! honours the same ordering and acknowledgement semantics.

use async_trait::async_trait;
use reach_types::ReachError;
use tokio::sync::mpsc;

use crate::follower::FollowerHandle;
use crate::protocol::Message;

/// Whether the client currently holds a working link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "up"),
            LinkStatus::Down => write!(f, "down"),
        }
    }
}

/// Client end of one established link.
///
/// Dropping any of the inbound receivers' senders (on the far side) signals
/// link loss.
pub struct ClientLink {
    /// Best-effort telemetry: states and frames.
    pub telemetry: mpsc::Receiver<Message>,
    /// Command acknowledgements, in the order the follower produced them.
    pub acks: mpsc::UnboundedReceiver<Message>,
    /// Commands and link-control messages towards the follower.
    pub commands: mpsc::UnboundedSender<Message>,
}

/// Something that can (re-)establish a [`ClientLink`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<ClientLink, ReachError>;
}

/// In-process link straight into a running [`Follower`][crate::follower::Follower].
#[derive(Clone)]
pub struct LoopbackConnector {
    handle: FollowerHandle,
}

impl LoopbackConnector {
    pub fn new(handle: FollowerHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    fn endpoint(&self) -> String {
        "loopback".to_string()
    }

    async fn connect(&self) -> Result<ClientLink, ReachError> {
        if self.handle.is_closed() {
            return Err(ReachError::LinkDown("follower is not running".into()));
        }
        let telemetry = self.handle.attach_telemetry();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ack_tx, acks) = mpsc::unbounded_channel();
        self.handle.attach_commands(command_rx, ack_tx);
        Ok(ClientLink {
            telemetry,
            acks,
            commands,
        })
    }
}
