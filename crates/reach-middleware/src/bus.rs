//! Client-side, topic-partitioned publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber sees every
//! event without a slow subscriber blocking the publisher. A subscriber that
//! falls behind loses the *oldest* buffered events, which is exactly the
//! back-pressure policy wanted for camera frames.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Every fresh [`RobotState`] accepted into the cache |
//! | [`Topic::Frames`] | Camera frames from the follower |
//! | [`Topic::LinkAlerts`] | Link up / down transitions |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reach_types::{ImageFrame, RobotState};
use tokio::sync::{broadcast, watch};
use tracing::warn;
use uuid::Uuid;

use crate::link::LinkStatus;

/// Default per-topic capacity.
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Frames,
    LinkAlerts,
}

#[derive(Debug, Clone)]
pub enum BusPayload {
    State(RobotState),
    Frame(Arc<ImageFrame>),
    Link { status: LinkStatus, reason: String },
}

#[derive(Debug, Clone)]
pub struct BusEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"reach-middleware::client"`
    pub source: String,
    pub payload: BusPayload,
}

impl BusEvent {
    pub fn new(source: impl Into<String>, payload: BusPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Shared event bus. Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<BusEvent>,
    frames: broadcast::Sender<BusEvent>,
    link_alerts: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a bus; `frame_capacity` bounds the per-subscriber frame buffer.
    pub fn new(capacity: usize, frame_capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity.max(1));
        let (frames, _) = broadcast::channel(frame_capacity.max(1));
        let (link_alerts, _) = broadcast::channel(capacity.max(1));
        Self {
            telemetry,
            frames,
            link_alerts,
        }
    }

    /// Publish to `topic`, returning how many subscribers were handed the
    /// event. Zero subscribers is normal.
    pub fn publish_to(&self, topic: Topic, event: BusEvent) -> usize {
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<BusEvent> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Frames => &self.frames,
            Topic::LinkAlerts => &self.link_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receivers
// ---------------------------------------------------------------------------

/// An async receiver bound to one [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<BusEvent>,
}

impl TopicReceiver {
    /// Next event on this topic.
    ///
    /// `Err(RecvError::Lagged(n))` means `n` of the oldest events were dropped
    /// for this subscriber; `Err(RecvError::Closed)` means the bus is gone.
    pub async fn recv(&mut self) -> Result<BusEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Lazy, infinite, non-restartable sequence of camera frames.
///
/// Backed by a bounded broadcast subscription: when the consumer is slower
/// than the robot, the oldest buffered frames are dropped and the publisher
/// never waits. [`FrameStream::next`] returns `None` once the owning client
/// shuts down.
pub struct FrameStream {
    receiver: TopicReceiver,
    shutdown: watch::Receiver<bool>,
    dropped: u64,
}

impl FrameStream {
    pub(crate) fn new(receiver: TopicReceiver, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            receiver,
            shutdown,
            dropped: 0,
        }
    }

    /// Frames discarded so far because this consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub async fn next(&mut self) -> Option<Arc<ImageFrame>> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return None;
                    }
                }
                event = self.receiver.recv() => match event {
                    Ok(BusEvent { payload: BusPayload::Frame(frame), .. }) => return Some(frame),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.dropped += n;
                        warn!(dropped = n, "frame consumer lagging, oldest frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}
