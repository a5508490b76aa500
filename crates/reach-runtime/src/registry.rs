//! Named tasks and the engine that runs them.
//!
//! A [`TaskRegistry`] maps task names to builders producing a fresh
//! [`Manager`] tree. [`TaskEngine::launch`] looks a task up, builds an
//! explicit [`TaskContext`] for it, keeps the map updater running while it
//! executes, and tears everything down afterwards. The outcome, including
//! the full attempt log, comes back as a [`TaskReport`].
//!
//! Built-in tasks:
//!
//! | Name | Arguments | Does |
//! |---|---|---|
//! | `explore` | `[steps]` | drive to successive frontiers; succeeds if one step did |
//! | `go_to` | `<category>` | find an object of the category and approach it |
//! | `pickup` | `<category>` | find, approach and grasp; re-approach once if the grasp fails |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reach_middleware::RobotClient;
use reach_perception::{Segmenter, SharedVoxelMap};
use reach_planner::MotionPlanner;
use reach_types::{ControlMode, ReachError};
use serde::Serialize;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::context::{TaskConfig, TaskContext};
use crate::manager::{AttemptRecord, Manager, Step};
use crate::map_updater::MapUpdater;
use crate::operation::{Operation, OperationRun, OperationStatus};
use crate::operations::{
    ExploreFrontierOperation, GoToObjectOperation, GraspObjectOperation, SearchForObjectOperation,
    SetModeOperation, WaitOperation,
};

pub type TaskBuilder = Arc<dyn Fn(&[String], &TaskConfig) -> Result<Manager, ReachError> + Send + Sync>;
pub type SegmenterFactory = Arc<dyn Fn() -> Box<dyn Segmenter> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TaskRegistry {
    builders: BTreeMap<String, TaskBuilder>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `explore`, `go_to` and `pickup`.
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register("explore", explore_task);
        reg.register("go_to", go_to_task);
        reg.register("pickup", pickup_task);
        reg
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        builder: impl Fn(&[String], &TaskConfig) -> Result<Manager, ReachError> + Send + Sync + 'static,
    ) {
        self.builders.insert(name.into(), Arc::new(builder));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    pub fn build(&self, name: &str, args: &[String], cfg: &TaskConfig) -> Result<Manager, ReachError> {
        let builder = self.builders.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            ReachError::Config(format!("unknown task '{name}' (known: {})", known.join(", ")))
        })?;
        builder(args, cfg)
    }
}

fn category_arg(task: &str, args: &[String]) -> Result<String, ReachError> {
    args.first()
        .cloned()
        .ok_or_else(|| ReachError::Config(format!("task '{task}' needs an object category")))
}

fn explore_task(args: &[String], cfg: &TaskConfig) -> Result<Manager, ReachError> {
    let steps = match args.first() {
        Some(n) => n
            .parse::<usize>()
            .map_err(|_| ReachError::Config(format!("explore: '{n}' is not a step count")))?,
        None => cfg.explore_steps,
    };
    let settle = Duration::from_millis(cfg.settle_ms);
    let sweep = move || {
        let mut sweep = Manager::best_effort("frontier_sweep", 1);
        for _ in 0..steps {
            sweep.add(frontier_step(settle));
        }
        sweep
    };
    Ok(Manager::sequential("explore")
        .then(Step::new("navigation_mode", || SetModeOperation::new(ControlMode::Navigation)))
        .then(Step::new("frontier_sweep", sweep).retries(0)))
}

/// One exploration move followed by a pause for the map to catch up.
fn frontier_step(settle: Duration) -> Step {
    Step::new("frontier_step", move || {
        Manager::sequential("frontier_step")
            .then(Step::new("explore_frontier", ExploreFrontierOperation::new))
            .then(Step::new("settle", move || WaitOperation::new(settle)))
    })
}

fn go_to_task(args: &[String], _cfg: &TaskConfig) -> Result<Manager, ReachError> {
    let category = category_arg("go_to", args)?;
    let search = category.clone();
    Ok(Manager::sequential(format!("go_to({category})"))
        .then(Step::new("navigation_mode", || SetModeOperation::new(ControlMode::Navigation)))
        .then(Step::new("search", move || SearchForObjectOperation::new(search.clone())))
        .then(Step::new("go_to_object", GoToObjectOperation::new)))
}

fn pickup_task(args: &[String], _cfg: &TaskConfig) -> Result<Manager, ReachError> {
    let category = category_arg("pickup", args)?;
    let search = category.clone();
    Ok(Manager::sequential(format!("pickup({category})"))
        .then(Step::new("navigation_mode", || SetModeOperation::new(ControlMode::Navigation)))
        .then(Step::new("search", move || SearchForObjectOperation::new(search.clone())))
        .then(Step::new("go_to_object", GoToObjectOperation::new))
        .then(Step::new("grasp_with_recovery", grasp_with_recovery).retries(0))
        .with_postcondition(|w| match &w.state {
            Some(s) if s.gripper.holding => Ok(()),
            _ => Err("nothing in the gripper".into()),
        }))
}

/// Grasp; on failure re-approach the object once and grasp again.
fn grasp_with_recovery() -> Manager {
    let mut m = Manager::conditional("grasp_with_recovery");
    let grasp = m.add(Step::new("grasp", GraspObjectOperation::new));
    let approach = m.add(Step::new("re_approach", GoToObjectOperation::new));
    let regrasp = m.add(Step::new("regrasp", GraspObjectOperation::new));
    m.on_failure(grasp, approach).on_success(approach, regrasp);
    m
}

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub run_id: Uuid,
    pub task: String,
    pub status: OperationStatus,
    pub error: Option<ReachError>,
    pub attempts: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Frames fused into the map while the task ran.
    pub frames: u64,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.status == OperationStatus::Succeeded
    }
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        writeln!(f, "task {} [{}]: {:?} in {secs:.1}s, {} frames", self.task, self.run_id, self.status, self.frames)?;
        if let Some(e) = &self.error {
            writeln!(f, "  error: {e}")?;
        }
        fn walk(f: &mut fmt::Formatter<'_>, records: &[AttemptRecord], depth: usize) -> fmt::Result {
            for r in records {
                write!(f, "{:indent$}- {} #{} {:?}", "", r.operation, r.attempt, r.status, indent = depth * 2)?;
                match &r.error {
                    Some(e) => writeln!(f, " ({e})")?,
                    None => writeln!(f)?,
                }
                walk(f, &r.children, depth + 1)?;
            }
            Ok(())
        }
        walk(f, &self.attempts, 1)
    }
}

/// Runs named tasks against one robot and one persistent map.
pub struct TaskEngine {
    client: RobotClient,
    map: SharedVoxelMap,
    planner: MotionPlanner,
    config: TaskConfig,
    registry: TaskRegistry,
    segmenter: Option<SegmenterFactory>,
    stride: u32,
    state_timeout: Duration,
}

impl TaskEngine {
    pub fn new(client: RobotClient, map: SharedVoxelMap, planner: MotionPlanner, config: TaskConfig) -> Self {
        Self {
            client,
            map,
            planner,
            config,
            registry: TaskRegistry::standard(),
            segmenter: None,
            stride: 2,
            state_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Segment frames before fusing them; a fresh segmenter is made per run.
    pub fn with_segmenter(mut self, factory: impl Fn() -> Box<dyn Segmenter> + Send + Sync + 'static) -> Self {
        self.segmenter = Some(Arc::new(factory));
        self
    }

    /// Back-project every `stride`-th pixel of each frame.
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn client(&self) -> &RobotClient {
        &self.client
    }

    pub fn map(&self) -> &SharedVoxelMap {
        &self.map
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Build and run the named task.
    ///
    /// Fails only when the task cannot be started: unknown name, bad
    /// arguments or no telemetry. Task failures are reported in the
    /// returned [`TaskReport`].
    pub async fn launch(&self, name: &str, args: &[String]) -> Result<TaskReport, ReachError> {
        let manager = self.registry.build(name, args, &self.config)?;
        self.client.wait_for_state(self.state_timeout).await?;
        Ok(self.execute(manager).await)
    }

    /// Run an already built manager under a fresh context.
    pub async fn execute(&self, manager: Manager) -> TaskReport {
        let run_id = Uuid::new_v4();
        let task = manager.name().to_string();
        let started_at = Utc::now();

        let updater = MapUpdater::spawn(
            &self.client,
            self.map.clone(),
            self.segmenter.as_ref().map(|make| make()),
            self.stride,
        );
        let mut ctx = TaskContext::new(
            self.client.clone(),
            self.map.clone(),
            self.planner.clone(),
            self.config.clone(),
        );
        let mut run = OperationRun::new(manager);
        let span = info_span!("task", %run_id, task = %task);
        let result = run.execute(&mut ctx).instrument(span).await;
        let stats = updater.stop().await;
        drop(ctx);

        match &result {
            Ok(()) => info!(%run_id, task = %task, frames = stats.frames, "task succeeded"),
            Err(e) => warn!(%run_id, task = %task, error = %e, "task failed"),
        }
        TaskReport {
            run_id,
            task,
            status: run.status(),
            error: result.err(),
            attempts: run.operation().report().to_vec(),
            started_at,
            finished_at: Utc::now(),
            frames: stats.frames,
        }
    }
}
