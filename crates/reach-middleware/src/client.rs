//! Leader-side facade over the control channel.
//!
//! [`RobotClient`] owns the live [`RobotState`] cache and the outbound
//! command path. Telemetry and acknowledgements are consumed by a background
//! supervisor task, so a slow acknowledgement never delays the state cache
//! and [`RobotClient::get_state`] never touches the network.
//!
//! Motion primitives are `async` and resolve when the follower reports the
//! command executed *and* settled, or fail with:
//!
//! | Error | When |
//! |---|---|
//! | [`ReachError::CommandTimeout`] | no confirming state before the deadline |
//! | [`ReachError::Cancelled`] | a [`stop`][RobotClient::stop] pre-empted the command |
//! | [`ReachError::CommandRejected`] | a follower safety rule refused it |
//! | [`ReachError::LinkDown`] | the link dropped while waiting |
//!
//! On link loss the supervisor reconnects with exponential backoff; callers
//! simply see [`LinkStatus::Up`] again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reach_kernel::{LinkHealth, LinkWatchdog, Stream};
use reach_types::{
    AckStatus, Command, CommandKind, ControlMode, GRIPPER_CLOSED, GRIPPER_OPEN, Pose2, ReachError,
    RobotState, SeqNo,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::bus::{BusEvent, BusPayload, EventBus, FrameStream, Topic, TopicReceiver};
use crate::link::{ClientLink, Connector, LinkStatus};
use crate::protocol::{LinkControl, Message};

const SOURCE: &str = "reach-middleware::client";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// How long to wait for a command acknowledgement.
    pub ack_timeout: Duration,
    /// Deadline for a blocking motion to report arrival.
    pub move_timeout: Duration,
    /// Deadline for a stop acknowledgement before the link is declared down.
    pub stop_timeout: Duration,
    /// Deadline per intermediate trajectory waypoint.
    pub waypoint_timeout: Duration,
    /// Metres; intermediate waypoints count as reached within this radius.
    pub waypoint_position_tolerance: f32,
    /// Radians; heading tolerance for intermediate waypoints.
    pub waypoint_rotation_tolerance: f32,
    /// Telemetry silence after which the link is considered down.
    pub link_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Frames buffered per `stream_images` consumer.
    pub frame_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            move_timeout: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(1),
            waypoint_timeout: Duration::from_secs(20),
            waypoint_position_tolerance: 0.2,
            waypoint_rotation_tolerance: 0.75,
            link_timeout: Duration::from_secs(2),
            reconnect_initial: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(5),
            frame_buffer: 8,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct ClientInner {
    cfg: ClientConfig,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    next_seq: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<SeqNo, oneshot::Sender<AckStatus>>>,
    state_tx: watch::Sender<Option<RobotState>>,
    link_tx: watch::Sender<LinkStatus>,
    stop_epoch: watch::Sender<u64>,
    relink: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
}

/// Cheaply cloneable handle; all clones share one link and state cache.
#[derive(Clone)]
pub struct RobotClient {
    inner: Arc<ClientInner>,
}

impl RobotClient {
    /// Connect through `connector` and wait for the first telemetry message.
    ///
    /// # Errors
    ///
    /// [`ReachError::LinkDown`] when the connector fails or no telemetry
    /// arrives within `link_timeout`.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        cfg: ClientConfig,
    ) -> Result<RobotClient, ReachError> {
        let link = connector.connect().await?;
        info!(endpoint = %connector.endpoint(), "control link established");
        let (state_tx, _) = watch::channel(None);
        let (link_tx, _) = watch::channel(LinkStatus::Down);
        let (stop_epoch, _) = watch::channel(0);
        let (relink, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(ClientInner {
            bus: EventBus::new(64, cfg.frame_buffer),
            cfg,
            connector,
            next_seq: AtomicU64::new(1),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            state_tx,
            link_tx,
            stop_epoch,
            relink,
            shutdown,
        });
        tokio::spawn(supervise(Arc::clone(&inner), link));

        let client = RobotClient { inner };
        if let Err(e) = client.wait_for_state(client.inner.cfg.link_timeout).await {
            client.shutdown();
            return Err(ReachError::LinkDown(format!("no telemetry after connect: {e}")));
        }
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.cfg
    }

    /// Latest cached state, if any has arrived. Never blocks.
    pub fn get_state(&self) -> Option<RobotState> {
        self.inner.state_tx.borrow().clone()
    }

    /// Wait until at least one state is cached.
    pub async fn wait_for_state(&self, timeout: Duration) -> Result<RobotState, ReachError> {
        let mut rx = self.inner.state_tx.subscribe();
        let found = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_some())).await;
        match found {
            Ok(Ok(state)) => state
                .clone()
                .ok_or_else(|| ReachError::LinkDown("state cache empty".into())),
            Ok(Err(_)) => Err(ReachError::LinkDown("client closed".into())),
            Err(_) => Err(ReachError::LinkDown(format!(
                "no telemetry within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    pub fn link_status(&self) -> LinkStatus {
        *self.inner.link_tx.borrow()
    }

    /// Camera frames as a lazy, drop-oldest stream.
    pub fn stream_images(&self) -> FrameStream {
        FrameStream::new(
            self.inner.bus.subscribe_to(Topic::Frames),
            self.inner.shutdown.subscribe(),
        )
    }

    /// Raw access to the client's event bus.
    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        self.inner.bus.subscribe_to(topic)
    }

    /// Stop the supervisor and end every frame stream.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    // -----------------------------------------------------------------------
    // Motion primitives
    // -----------------------------------------------------------------------

    /// Drive the base to an absolute pose and wait for arrival.
    pub async fn move_to(&self, pose: Pose2) -> Result<RobotState, ReachError> {
        self.blocking(CommandKind::BaseMove { target: pose, relative: false }, |_| true)
            .await
    }

    /// Drive the base by `delta` in its own frame and wait for arrival.
    pub async fn move_by(&self, delta: Pose2) -> Result<RobotState, ReachError> {
        self.blocking(CommandKind::BaseMove { target: delta, relative: true }, |_| true)
            .await
    }

    pub async fn move_arm(&self, joints: Vec<f32>) -> Result<RobotState, ReachError> {
        self.blocking(CommandKind::ArmMove { joints }, |_| true).await
    }

    /// Drive the gripper to a normalised aperture and wait until it settles
    /// (fully, or against a grasped object).
    pub async fn set_gripper(&self, position: f32) -> Result<RobotState, ReachError> {
        self.blocking(CommandKind::Gripper { position }, |_| true).await
    }

    pub async fn open_gripper(&self) -> Result<RobotState, ReachError> {
        self.set_gripper(GRIPPER_OPEN).await
    }

    pub async fn close_gripper(&self) -> Result<RobotState, ReachError> {
        self.set_gripper(GRIPPER_CLOSED).await
    }

    /// Switch posture and wait until the follower reports the new mode with
    /// the arm settled.
    pub async fn set_mode(&self, mode: ControlMode) -> Result<RobotState, ReachError> {
        self.blocking(CommandKind::SetMode { mode }, move |s| s.control_mode == mode)
            .await
    }

    /// Follow `waypoints` in order. Intermediate waypoints are passed once
    /// the base is within the waypoint tolerances; the last one is a full
    /// blocking move.
    #[instrument(skip_all, fields(waypoints = waypoints.len()))]
    pub async fn execute_trajectory(&self, waypoints: &[Pose2]) -> Result<RobotState, ReachError> {
        let Some((last, intermediate)) = waypoints.split_last() else {
            return self
                .get_state()
                .ok_or_else(|| ReachError::LinkDown("no state cached".into()));
        };
        let epoch = *self.inner.stop_epoch.borrow();
        let cfg = &self.inner.cfg;
        for wp in intermediate {
            let seq = self
                .dispatch(CommandKind::BaseMove { target: *wp, relative: false })
                .await?;
            let wp = *wp;
            self.wait_for(seq, epoch, cfg.waypoint_timeout, |s| {
                s.last_executed_seq >= seq
                    && (s.at_goal
                        || (s.base_pose.distance_to(&wp) <= cfg.waypoint_position_tolerance
                            && s.base_pose.heading_error(&wp) <= cfg.waypoint_rotation_tolerance))
            })
            .await?;
            trace!(seq, x = wp.x, y = wp.y, "waypoint passed");
        }
        let seq = self
            .dispatch(CommandKind::BaseMove { target: *last, relative: false })
            .await?;
        self.wait_for(seq, epoch, cfg.move_timeout, |s| s.settled_after(seq))
            .await
    }

    /// Cancel whatever is in flight.
    ///
    /// Every pending motion wait fails with [`ReachError::Cancelled`]. The
    /// stop itself must be acknowledged within `stop_timeout`; otherwise the
    /// link is torn down and [`ReachError::LinkDown`] is returned.
    #[instrument(skip_all)]
    pub async fn stop(&self) -> Result<(), ReachError> {
        self.inner.stop_epoch.send_modify(|e| *e += 1);
        let (seq, ack) = self.inner.issue(CommandKind::Stop)?;
        match self.inner.await_ack(seq, ack, self.inner.cfg.stop_timeout).await {
            Err(ReachError::CommandTimeout { .. }) => {
                warn!(seq, "stop not acknowledged, dropping link");
                self.inner.relink.send_modify(|e| *e += 1);
                self.inner.set_link(LinkStatus::Down, "stop not acknowledged");
                Err(ReachError::LinkDown(format!("stop {seq} not acknowledged")))
            }
            other => {
                info!(seq, "stop acknowledged");
                other
            }
        }
    }

    /// Toggle the follower's fast telemetry mode. Fire-and-forget.
    pub fn set_fast_mode(&self, enabled: bool) -> Result<(), ReachError> {
        self.inner.send_raw(Message::Control(LinkControl::FastMode { enabled }))
    }

    /// Send a command and wait only for its acknowledgement.
    pub async fn dispatch(&self, kind: CommandKind) -> Result<SeqNo, ReachError> {
        let (seq, ack) = self.inner.issue(kind)?;
        self.inner.await_ack(seq, ack, self.inner.cfg.ack_timeout).await?;
        Ok(seq)
    }

    async fn blocking<F>(&self, kind: CommandKind, extra: F) -> Result<RobotState, ReachError>
    where
        F: Fn(&RobotState) -> bool,
    {
        let epoch = *self.inner.stop_epoch.borrow();
        let label = kind.label();
        let seq = self.dispatch(kind).await?;
        debug!(seq, command = label, "waiting for arrival");
        self.wait_for(seq, epoch, self.inner.cfg.move_timeout, |s| {
            s.settled_after(seq) && extra(s)
        })
        .await
    }

    /// Wait for a state satisfying `done`, failing on stop, link loss, or
    /// deadline.
    async fn wait_for<F>(
        &self,
        seq: SeqNo,
        epoch: u64,
        timeout: Duration,
        done: F,
    ) -> Result<RobotState, ReachError>
    where
        F: Fn(&RobotState) -> bool,
    {
        let mut states = self.inner.state_tx.subscribe();
        let mut stops = self.inner.stop_epoch.subscribe();
        let mut link = self.inner.link_tx.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            if *stops.borrow_and_update() != epoch {
                return Err(ReachError::Cancelled { seq });
            }
            if *link.borrow_and_update() == LinkStatus::Down {
                return Err(ReachError::LinkDown(format!("link lost while waiting on {seq}")));
            }
            if let Some(state) = states.borrow_and_update().as_ref() {
                if done(state) {
                    return Ok(state.clone());
                }
            }
            tokio::select! {
                _ = states.changed() => {}
                _ = stops.changed() => {}
                _ = link.changed() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ReachError::CommandTimeout {
                        seq,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }
}

impl ClientInner {
    /// Assign the next sequence number and put the command on the wire.
    fn issue(&self, kind: CommandKind) -> Result<(SeqNo, oneshot::Receiver<AckStatus>), ReachError> {
        let (tx, rx) = oneshot::channel();
        let outbound = self.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            return Err(ReachError::LinkDown("not connected".into()));
        };
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().insert(seq, tx);
        if sender.send(Message::Command(Command::new(seq, kind))).is_err() {
            self.pending.lock().remove(&seq);
            return Err(ReachError::LinkDown("command stream closed".into()));
        }
        Ok((seq, rx))
    }

    fn send_raw(&self, msg: Message) -> Result<(), ReachError> {
        let outbound = self.outbound.lock();
        outbound
            .as_ref()
            .ok_or_else(|| ReachError::LinkDown("not connected".into()))?
            .send(msg)
            .map_err(|_| ReachError::LinkDown("command stream closed".into()))
    }

    async fn await_ack(
        &self,
        seq: SeqNo,
        ack: oneshot::Receiver<AckStatus>,
        timeout: Duration,
    ) -> Result<(), ReachError> {
        match tokio::time::timeout(timeout, ack).await {
            Err(_) => {
                self.pending.lock().remove(&seq);
                Err(ReachError::CommandTimeout {
                    seq,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(_)) => Err(ReachError::LinkDown(format!("link lost before ack of {seq}"))),
            Ok(Ok(AckStatus::Accepted)) => Ok(()),
            Ok(Ok(AckStatus::Discarded)) => Err(ReachError::Cancelled { seq }),
            Ok(Ok(AckStatus::Rejected(reason))) => Err(ReachError::CommandRejected { seq, reason }),
        }
    }

    fn set_link(&self, status: LinkStatus, reason: &str) {
        let previous = self.link_tx.send_replace(status);
        if previous != status {
            self.bus.publish_to(
                Topic::LinkAlerts,
                BusEvent::new(SOURCE, BusPayload::Link { status, reason: reason.to_string() }),
            );
        }
    }

    fn accept_state(&self, state: RobotState, last_seq_id: &mut Option<u64>) {
        if last_seq_id.is_some_and(|last| state.seq_id <= last) {
            trace!(seq_id = state.seq_id, "stale telemetry dropped");
            return;
        }
        *last_seq_id = Some(state.seq_id);
        self.next_seq
            .fetch_max(state.last_executed_seq + 1, Ordering::SeqCst);
        self.state_tx.send_replace(Some(state.clone()));
        self.bus
            .publish_to(Topic::Telemetry, BusEvent::new(SOURCE, BusPayload::State(state)));
    }

    fn resolve_ack(&self, seq: SeqNo, status: AckStatus) {
        match self.pending.lock().remove(&seq) {
            Some(waiter) => {
                let _ = waiter.send(status);
            }
            None => trace!(seq, "ack without waiter"),
        }
    }

    /// Pump one link until it fails. Returns the reason.
    async fn pump(&self, link: ClientLink, shutdown: &mut watch::Receiver<bool>) -> String {
        let ClientLink {
            mut telemetry,
            mut acks,
            commands,
        } = link;
        *self.outbound.lock() = Some(commands);
        self.set_link(LinkStatus::Up, "connected");

        let mut relink = self.relink.subscribe();
        let mut watchdog = LinkWatchdog::new();
        watchdog.register(Stream::Telemetry, self.cfg.link_timeout);
        let mut check = tokio::time::interval((self.cfg.link_timeout / 4).max(Duration::from_millis(10)));
        let mut last_seq_id = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return "client shutdown".into();
                    }
                }
                _ = relink.changed() => return "link reset requested".into(),
                msg = telemetry.recv() => match msg {
                    None => return "telemetry stream closed".into(),
                    Some(Message::State(state)) => {
                        watchdog.heartbeat(Stream::Telemetry);
                        self.accept_state(state, &mut last_seq_id);
                    }
                    Some(Message::Frame(frame)) => {
                        watchdog.heartbeat(Stream::Telemetry);
                        self.bus.publish_to(
                            Topic::Frames,
                            BusEvent::new(SOURCE, BusPayload::Frame(Arc::new(frame))),
                        );
                    }
                    Some(other) => warn!(kind = ?other.kind(), "unexpected message on telemetry stream"),
                },
                msg = acks.recv() => match msg {
                    None => return "command stream closed".into(),
                    Some(Message::Ack(ack)) => self.resolve_ack(ack.seq, ack.status),
                    Some(other) => warn!(kind = ?other.kind(), "unexpected message on ack stream"),
                },
                _ = check.tick() => {
                    if watchdog.health(Stream::Telemetry) == LinkHealth::Stale {
                        let silence = watchdog.silence(Stream::Telemetry).unwrap_or_default();
                        return format!("telemetry silent for {} ms", silence.as_millis());
                    }
                }
            }
        }
    }

    fn drop_link(&self, reason: &str) {
        *self.outbound.lock() = None;
        self.pending.lock().clear();
        self.set_link(LinkStatus::Down, reason);
        warn!(reason, "control link down");
    }

    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<ClientLink> {
        let mut delay = self.cfg.reconnect_initial;
        loop {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
            }
            match self.connector.connect().await {
                Ok(link) => {
                    info!(endpoint = %self.connector.endpoint(), "control link re-established");
                    return Some(link);
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "reconnect failed");
                    delay = (delay * 2).min(self.cfg.reconnect_max);
                }
            }
        }
    }
}

#[instrument(skip_all, fields(endpoint = %inner.connector.endpoint()))]
async fn supervise(inner: Arc<ClientInner>, mut link: ClientLink) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let reason = inner.pump(link, &mut shutdown).await;
        inner.drop_link(&reason);
        if *shutdown.borrow() {
            break;
        }
        match inner.reconnect(&mut shutdown).await {
            Some(next) => link = next,
            None => break,
        }
    }
    debug!("client supervisor stopped");
}
