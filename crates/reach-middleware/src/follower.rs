//! On-robot Follower: executes commands and publishes telemetry.
//!
//! A single actor task owns the [`RobotBody`]. It interleaves three kinds of
//! work, in strict priority order:
//!
//! 1. **Stop** commands, which arrive on a dedicated lane so they overtake
//!    any motion command still queued behind them;
//! 2. the telemetry tick, which steps the body and publishes a fresh
//!    [`RobotState`] (plus a camera frame every Nth tick);
//! 3. queued commands, admitted through a per-session [`SequenceGate`] and
//!    the [`CommandVerifier`] before reaching the body.
//!
//! Telemetry is fire-and-forget: a full subscriber buffer drops the message,
//! never stalls the loop.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use reach_hal::{Camera, RobotBody};
use reach_kernel::CommandVerifier;
use reach_types::{AckStatus, Command, CommandAck, CommandKind, RobotState, SeqNo};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::link::LoopbackConnector;
use crate::protocol::{LinkControl, Message};
use crate::sequence::{Admission, SequenceGate};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FollowerConfig {
    /// Nominal telemetry period.
    pub publish_interval: Duration,
    /// Telemetry period while fast mode is enabled.
    pub fast_interval: Duration,
    /// Publish a camera frame every this many ticks (0 disables frames).
    pub frame_every: u32,
    /// Per-subscriber telemetry buffer; overflow drops messages.
    pub telemetry_buffer: usize,
    /// Motion commands accepted per second before further ones are rejected.
    pub max_commands_per_sec: u32,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(100),
            fast_interval: Duration::from_millis(20),
            frame_every: 5,
            telemetry_buffer: 32,
            max_commands_per_sec: 100,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

enum Inbound {
    Command {
        session: u64,
        command: Command,
        reply: mpsc::UnboundedSender<Message>,
    },
    SessionClosed(u64),
}

/// Cloneable handle used by transports to attach streams to a running
/// [`Follower`].
#[derive(Clone)]
pub struct FollowerHandle {
    priority_tx: mpsc::UnboundedSender<Inbound>,
    queue_tx: mpsc::UnboundedSender<Inbound>,
    control_tx: mpsc::UnboundedSender<LinkControl>,
    sinks: Arc<Mutex<Vec<mpsc::Sender<Message>>>>,
    next_session: Arc<AtomicU64>,
    telemetry_buffer: usize,
}

impl FollowerHandle {
    /// Subscribe to telemetry (states and frames).
    pub fn attach_telemetry(&self) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.telemetry_buffer.max(1));
        self.sinks.lock().push(tx);
        rx
    }

    /// Start consuming a command stream. Acknowledgements for commands read
    /// from `commands` are sent on `acks`.
    pub fn attach_commands(
        &self,
        commands: mpsc::UnboundedReceiver<Message>,
        acks: mpsc::UnboundedSender<Message>,
    ) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let handle = self.clone();
        tokio::spawn(async move { handle.ingress(session, commands, acks).await });
    }

    /// Drop every telemetry subscriber, as if all clients lost the network.
    pub fn disconnect_all(&self) {
        self.sinks.lock().clear();
    }

    /// True once the follower task has ended.
    pub fn is_closed(&self) -> bool {
        self.queue_tx.is_closed()
    }

    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector::new(self.clone())
    }

    async fn ingress(
        self,
        session: u64,
        mut commands: mpsc::UnboundedReceiver<Message>,
        reply: mpsc::UnboundedSender<Message>,
    ) {
        debug!(session, "command session opened");
        while let Some(msg) = commands.recv().await {
            match msg {
                Message::Command(command) => {
                    let lane = match command.kind {
                        CommandKind::Stop => &self.priority_tx,
                        _ => &self.queue_tx,
                    };
                    let inbound = Inbound::Command {
                        session,
                        command,
                        reply: reply.clone(),
                    };
                    if lane.send(inbound).is_err() {
                        break;
                    }
                }
                Message::Control(control) => {
                    let _ = self.control_tx.send(control);
                }
                other => warn!(session, kind = ?other.kind(), "unexpected message on command stream"),
            }
        }
        let _ = self.queue_tx.send(Inbound::SessionClosed(session));
        debug!(session, "command session closed");
    }

    fn broadcast(&self, msg: &Message) {
        self.sinks.lock().retain(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("telemetry subscriber full, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Follower
// ────────────────────────────────────────────────────────────────────────────

pub struct Follower {
    cfg: FollowerConfig,
    body: Box<dyn RobotBody>,
    camera: Option<Box<dyn Camera>>,
    verifier: CommandVerifier,
    limiter: DefaultDirectRateLimiter,
    gates: HashMap<u64, SequenceGate>,
    last_executed: SeqNo,
    telemetry_seq: u64,
    ticks: u64,
    fast: bool,
    last_tick: Instant,
    handle: FollowerHandle,
    priority_rx: mpsc::UnboundedReceiver<Inbound>,
    queue_rx: mpsc::UnboundedReceiver<Inbound>,
    control_rx: mpsc::UnboundedReceiver<LinkControl>,
}

impl Follower {
    /// A follower driving `body` with the standard safety rules.
    pub fn new(body: Box<dyn RobotBody>, cfg: FollowerConfig) -> Self {
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let rate = NonZeroU32::new(cfg.max_commands_per_sec).unwrap_or(NonZeroU32::MIN);
        let handle = FollowerHandle {
            priority_tx,
            queue_tx,
            control_tx,
            sinks: Arc::new(Mutex::new(Vec::new())),
            next_session: Arc::new(AtomicU64::new(1)),
            telemetry_buffer: cfg.telemetry_buffer,
        };
        Self {
            cfg,
            body,
            camera: None,
            verifier: CommandVerifier::standard(),
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            gates: HashMap::new(),
            last_executed: 0,
            telemetry_seq: 0,
            ticks: 0,
            fast: false,
            last_tick: Instant::now(),
            handle,
            priority_rx,
            queue_rx,
            control_rx,
        }
    }

    pub fn with_camera(mut self, camera: Box<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_verifier(mut self, verifier: CommandVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn handle(&self) -> FollowerHandle {
        self.handle.clone()
    }

    /// Run on a background task. Send `true` on the returned watch to stop.
    pub fn spawn(self) -> (FollowerHandle, watch::Sender<bool>, JoinHandle<()>) {
        let handle = self.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        (handle, shutdown_tx, task)
    }

    #[instrument(skip_all, name = "follower")]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.ticker();
        info!(interval_ms = self.period().as_millis() as u64, "follower running");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(inbound) = self.priority_rx.recv() => self.handle_inbound(inbound),
                _ = ticker.tick() => self.tick(),
                Some(control) = self.control_rx.recv() => {
                    self.apply_control(control);
                    ticker = self.ticker();
                }
                Some(inbound) = self.queue_rx.recv() => self.handle_inbound(inbound),
            }
        }
        self.body.halt();
        self.handle.disconnect_all();
        info!("follower stopped");
    }

    fn period(&self) -> Duration {
        if self.fast { self.cfg.fast_interval } else { self.cfg.publish_interval }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    fn apply_control(&mut self, control: LinkControl) {
        match control {
            LinkControl::FastMode { enabled } => {
                info!(enabled, "telemetry fast mode");
                self.fast = enabled;
            }
        }
    }

    fn compose_state(&self) -> RobotState {
        let body = self.body.snapshot();
        RobotState {
            timestamp: Utc::now(),
            seq_id: self.telemetry_seq,
            base_pose: body.base_pose,
            joint_positions: body.joint_positions,
            joint_velocities: body.joint_velocities,
            gripper: body.gripper,
            control_mode: body.control_mode,
            last_executed_seq: self.last_executed,
            at_goal: body.at_goal,
            battery_percent: body.battery_percent,
            faults: body.faults,
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.body.step(now.duration_since(self.last_tick));
        self.last_tick = now;

        self.telemetry_seq += 1;
        self.handle.broadcast(&Message::State(self.compose_state()));

        self.ticks += 1;
        let every = u64::from(self.cfg.frame_every);
        if every > 0 && self.ticks % every == 0 {
            if let Some(camera) = self.camera.as_mut() {
                let pose = self.body.snapshot().camera_pose;
                match camera.capture(&pose) {
                    Ok(frame) => self.handle.broadcast(&Message::Frame(frame)),
                    Err(e) => warn!(camera = camera.id(), error = %e, "frame capture failed"),
                }
            }
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Command { session, command, reply } => {
                let status = self.execute(session, &command);
                let _ = reply.send(Message::Ack(CommandAck::new(command.seq, status)));
            }
            Inbound::SessionClosed(session) => {
                self.gates.remove(&session);
            }
        }
    }

    fn execute(&mut self, session: u64, command: &Command) -> AckStatus {
        let admission = self.gates.entry(session).or_default().admit(command.seq);
        let fresh = matches!(admission, Admission::Fresh { .. });

        if matches!(command.kind, CommandKind::Stop) {
            self.body.halt();
            if fresh {
                self.last_executed = command.seq;
            }
            info!(seq = command.seq, "stop executed");
            return AckStatus::Accepted;
        }
        if !fresh {
            debug!(seq = command.seq, ?admission, "command discarded");
            return AckStatus::Discarded;
        }
        if self.limiter.check().is_err() {
            warn!(seq = command.seq, "command rate limit exceeded");
            return AckStatus::Rejected("command rate limit exceeded".into());
        }
        let state = self.compose_state();
        let applied = self
            .verifier
            .verify(&command.kind, &state)
            .and_then(|()| self.body.apply(&command.kind));
        match applied {
            Ok(()) => {
                self.last_executed = command.seq;
                debug!(seq = command.seq, kind = command.kind.label(), "command executed");
                AckStatus::Accepted
            }
            Err(e) => AckStatus::Rejected(e.to_string()),
        }
    }
}
