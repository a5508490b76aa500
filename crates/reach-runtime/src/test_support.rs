//! Fixtures shared by the runtime's unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reach_hal::{SimBody, SimCamera, SimWorld};
use reach_middleware::{ClientConfig, Follower, FollowerConfig, FollowerHandle, RobotClient};
use reach_perception::{SharedVoxelMap, VoxelMap, VoxelMapConfig};
use reach_planner::MotionPlanner;
use reach_types::ReachError;
use tokio::sync::watch;

use crate::context::{TaskConfig, TaskContext, WorldView};
use crate::operation::Operation;

/// Keeps the simulated Follower alive for the duration of a test.
pub struct SimGuard {
    pub world: Arc<SimWorld>,
    pub handle: FollowerHandle,
    shutdown: watch::Sender<bool>,
}

impl Drop for SimGuard {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn fast_follower(world: Arc<SimWorld>) -> Follower {
    let cfg = FollowerConfig {
        publish_interval: Duration::from_millis(20),
        frame_every: 2,
        ..Default::default()
    };
    Follower::new(Box::new(SimBody::new().with_world(Arc::clone(&world))), cfg)
        .with_camera(Box::new(SimCamera::new("head", world)))
}

pub fn fast_client_config() -> ClientConfig {
    ClientConfig {
        reconnect_initial: Duration::from_millis(20),
        link_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

/// A task context wired to a simulated robot in the demo room, with an
/// empty map and millisecond retry delays.
pub async fn sim_context() -> Result<(TaskContext, SimGuard), ReachError> {
    let world = Arc::new(SimWorld::demo_room());
    let (handle, shutdown, _task) = fast_follower(Arc::clone(&world)).spawn();
    let client = RobotClient::connect(Arc::new(handle.connector()), fast_client_config()).await?;
    let config = TaskConfig { retry_delay_ms: 1, settle_ms: 20, ..Default::default() };
    let ctx = TaskContext::new(
        client,
        SharedVoxelMap::new(VoxelMap::new(VoxelMapConfig::default())),
        MotionPlanner::default(),
        config,
    );
    Ok((ctx, SimGuard { world, handle, shutdown }))
}

/// Counts how often probe operations are built and run.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    built: Arc<AtomicUsize>,
    actions: Arc<AtomicUsize>,
}

impl Probe {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }
}

/// Scriptable operation that issues no commands.
pub struct ProbeOp {
    name: String,
    probe: Probe,
    pre_ok: bool,
    post_ok: bool,
    fail_first: usize,
    error: Option<ReachError>,
}

impl ProbeOp {
    pub fn new(name: impl Into<String>, probe: &Probe) -> Self {
        probe.built.fetch_add(1, Ordering::SeqCst);
        Self {
            name: name.into(),
            probe: probe.clone(),
            pre_ok: true,
            post_ok: true,
            fail_first: 0,
            error: None,
        }
    }

    pub fn precondition_fails(mut self) -> Self {
        self.pre_ok = false;
        self
    }

    pub fn postcondition_fails(mut self) -> Self {
        self.post_ok = false;
        self
    }

    /// Fail the first `n` actions counted by the probe, then succeed.
    pub fn fail_first(mut self, n: usize, error: ReachError) -> Self {
        self.fail_first = n;
        self.error = Some(error);
        self
    }

    pub fn fail_always(self, error: ReachError) -> Self {
        self.fail_first(usize::MAX, error)
    }
}

#[async_trait]
impl Operation for ProbeOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn precondition(&self, _world: &WorldView<'_>) -> Result<(), String> {
        if self.pre_ok { Ok(()) } else { Err("probe precondition".into()) }
    }

    async fn action(&mut self, _ctx: &mut TaskContext) -> Result<(), ReachError> {
        let before = self.probe.actions.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) if before < self.fail_first => Err(e.clone()),
            _ => Ok(()),
        }
    }

    fn postcondition(&self, _world: &WorldView<'_>) -> Result<(), String> {
        if self.post_ok { Ok(()) } else { Err("probe postcondition".into()) }
    }
}
