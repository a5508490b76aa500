//! [`LinkWatchdog`] – liveness of the control channel's streams.
//!
//! The Robot Client calls [`LinkWatchdog::heartbeat`] whenever a message
//! arrives on a stream. A stream whose deadline has passed is reported as
//! [`LinkHealth::Stale`]; the client's supervisor treats stale telemetry as a
//! dropped link.

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// The logical streams of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Robot → client state snapshots.
    Telemetry,
    /// Robot → client command acknowledgements.
    Acks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Alive,
    /// Nothing heard within the deadline (or never registered).
    Stale,
}

struct StreamEntry {
    last_seen: Instant,
    timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// LinkWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the last message time of each registered stream.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use reach_kernel::watchdog::{LinkHealth, LinkWatchdog, Stream};
///
/// let mut wd = LinkWatchdog::new();
/// wd.register(Stream::Telemetry, Duration::from_secs(1));
/// wd.heartbeat(Stream::Telemetry);
/// assert_eq!(wd.health(Stream::Telemetry), LinkHealth::Alive);
/// ```
#[derive(Default)]
pub struct LinkWatchdog {
    streams: HashMap<Stream, StreamEntry>,
}

impl LinkWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stream` with a silence deadline. The stream starts alive;
    /// re-registering resets it.
    pub fn register(&mut self, stream: Stream, timeout: Duration) {
        self.streams.insert(
            stream,
            StreamEntry {
                last_seen: Instant::now(),
                timeout,
            },
        );
    }

    /// Record traffic on `stream`. No-op for unregistered streams.
    pub fn heartbeat(&mut self, stream: Stream) {
        if let Some(entry) = self.streams.get_mut(&stream) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn health(&self, stream: Stream) -> LinkHealth {
        match self.streams.get(&stream) {
            Some(entry) if entry.last_seen.elapsed() <= entry.timeout => LinkHealth::Alive,
            _ => LinkHealth::Stale,
        }
    }

    /// Time since the last message on `stream`, if registered.
    pub fn silence(&self, stream: Stream) -> Option<Duration> {
        self.streams.get(&stream).map(|e| e.last_seen.elapsed())
    }

    /// Every registered stream whose deadline has passed.
    pub fn stale_streams(&self) -> Vec<Stream> {
        self.streams
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > entry.timeout)
            .map(|(stream, _)| *stream)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_stream_is_alive() {
        let mut wd = LinkWatchdog::new();
        wd.register(Stream::Telemetry, Duration::from_secs(5));
        assert_eq!(wd.health(Stream::Telemetry), LinkHealth::Alive);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let mut wd = LinkWatchdog::new();
        wd.register(Stream::Telemetry, Duration::from_millis(40));
        thread::sleep(Duration::from_millis(25));
        wd.heartbeat(Stream::Telemetry);
        thread::sleep(Duration::from_millis(25));
        assert_eq!(wd.health(Stream::Telemetry), LinkHealth::Alive);
    }

    #[test]
    fn silent_stream_goes_stale() {
        let mut wd = LinkWatchdog::new();
        wd.register(Stream::Telemetry, Duration::from_millis(20));
        wd.register(Stream::Acks, Duration::from_secs(60));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.health(Stream::Telemetry), LinkHealth::Stale);
        assert_eq!(wd.stale_streams(), vec![Stream::Telemetry]);
    }

    #[test]
    fn unregistered_stream_is_stale() {
        let mut wd = LinkWatchdog::new();
        wd.heartbeat(Stream::Acks);
        assert_eq!(wd.health(Stream::Acks), LinkHealth::Stale);
        assert!(wd.silence(Stream::Acks).is_none());
    }
}
