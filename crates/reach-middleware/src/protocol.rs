//! Wire framing for the control channel.
//!
//! Every message travels as a typed JSON envelope:
//!
//! ```json
//! {"type":"command","sequence":7,"payload":{...},"timestamp":"2024-05-01T12:00:00Z"}
//! ```
//!
//! `sequence` is present only on commands and acknowledgements.

use chrono::{DateTime, Utc};
use reach_types::{Command, CommandAck, ImageFrame, ReachError, RobotState, SeqNo};
use serde::{Deserialize, Serialize};

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    State,
    Command,
    Ack,
    Frame,
    Control,
}

/// Out-of-band link settings sent client → follower. Not sequenced, not
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum LinkControl {
    /// Switch telemetry between the nominal and the fast publish interval.
    FastMode { enabled: bool },
}

/// The typed envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SeqNo>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Decoded control-channel traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    State(RobotState),
    Command(Command),
    Ack(CommandAck),
    Frame(ImageFrame),
    Control(LinkControl),
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::State(_) => MessageType::State,
            Message::Command(_) => MessageType::Command,
            Message::Ack(_) => MessageType::Ack,
            Message::Frame(_) => MessageType::Frame,
            Message::Control(_) => MessageType::Control,
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, ReachError> {
        let kind = self.kind();
        let (sequence, timestamp, payload) = match self {
            Message::State(s) => (None, s.timestamp, to_value(&s)?),
            Message::Command(c) => (Some(c.seq), c.issued_at, to_value(&c)?),
            Message::Ack(a) => (Some(a.seq), a.timestamp, to_value(&a)?),
            Message::Frame(f) => (None, f.timestamp, to_value(&f)?),
            Message::Control(c) => (None, Utc::now(), to_value(&c)?),
        };
        Ok(Envelope { kind, sequence, payload, timestamp })
    }

    pub fn from_envelope(env: Envelope) -> Result<Message, ReachError> {
        let msg = match env.kind {
            MessageType::State => Message::State(from_value(env.payload)?),
            MessageType::Command => Message::Command(from_value(env.payload)?),
            MessageType::Ack => Message::Ack(from_value(env.payload)?),
            MessageType::Frame => Message::Frame(from_value(env.payload)?),
            MessageType::Control => Message::Control(from_value(env.payload)?),
        };
        let inner = match &msg {
            Message::Command(c) => Some(c.seq),
            Message::Ack(a) => Some(a.seq),
            _ => None,
        };
        if let (Some(seq), Some(inner)) = (env.sequence, inner) {
            if seq != inner {
                return Err(ReachError::Serialization(format!(
                    "envelope sequence {seq} disagrees with payload sequence {inner}"
                )));
            }
        }
        Ok(msg)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ReachError> {
    serde_json::to_value(value).map_err(|e| ReachError::Serialization(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, ReachError> {
    serde_json::from_value(value).map_err(|e| ReachError::Serialization(e.to_string()))
}

/// Encode `msg` as one JSON text frame.
pub fn encode(msg: Message) -> Result<String, ReachError> {
    let env = msg.into_envelope()?;
    serde_json::to_string(&env).map_err(|e| ReachError::Serialization(e.to_string()))
}

/// Decode one JSON text frame.
pub fn decode(text: &str) -> Result<Message, ReachError> {
    let env: Envelope =
        serde_json::from_str(text).map_err(|e| ReachError::Serialization(e.to_string()))?;
    Message::from_envelope(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_types::{AckStatus, CommandKind, Pose2};

    #[test]
    fn command_envelope_carries_sequence() -> Result<(), Box<dyn std::error::Error>> {
        let cmd = Command::new(
            42,
            CommandKind::BaseMove { target: Pose2::new(0.5, 0.0, 0.0), relative: true },
        );
        let text = encode(Message::Command(cmd.clone()))?;
        let raw: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(raw["type"], "command");
        assert_eq!(raw["sequence"], 42);
        assert_eq!(decode(&text)?, Message::Command(cmd));
        Ok(())
    }

    #[test]
    fn control_envelope_has_no_sequence() -> Result<(), Box<dyn std::error::Error>> {
        let text = encode(Message::Control(LinkControl::FastMode { enabled: true }))?;
        let raw: serde_json::Value = serde_json::from_str(&text)?;
        assert!(raw.get("sequence").is_none());
        assert_eq!(
            decode(&text)?,
            Message::Control(LinkControl::FastMode { enabled: true })
        );
        Ok(())
    }

    #[test]
    fn mismatched_sequence_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let ack = CommandAck::new(3, AckStatus::Accepted);
        let mut env = Message::Ack(ack).into_envelope()?;
        env.sequence = Some(4);
        assert!(matches!(
            Message::from_envelope(env),
            Err(ReachError::Serialization(_))
        ));
        Ok(())
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(decode("not json"), Err(ReachError::Serialization(_))));
        assert!(matches!(
            decode(r#"{"type":"teleport","payload":{},"timestamp":"2024-01-01T00:00:00Z"}"#),
            Err(ReachError::Serialization(_))
        ));
    }
}
