//! Explicit task context handed to every operation.
//!
//! A [`TaskContext`] is built when a task starts and dropped when it ends.
//! It bundles the robot client, the shared map, the planner and the task's
//! scratch memory. Predicates only ever see a [`WorldView`], a read-only
//! projection taken at the moment they are evaluated.

use std::collections::BTreeSet;

use parking_lot::RwLockReadGuard;
use reach_middleware::RobotClient;
use reach_perception::{Instance, InstanceId, SharedVoxelMap, VoxelMap};
use reach_planner::MotionPlanner;
use reach_types::{Pose2, RobotState};
use serde::{Deserialize, Serialize};

use crate::guard::RepeatGuard;

/// Tunables shared by the task operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Extra attempts granted to a step that fails recoverably.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Arrival tolerances checked by navigation postconditions.
    pub position_tolerance: f32,
    pub heading_tolerance: f32,
    /// Distance kept between the base and an object's footprint.
    pub standoff: f32,
    /// Exploration steps a search may spend before giving up.
    pub search_budget: usize,
    /// Steps of the `explore` task.
    pub explore_steps: usize,
    /// Identical frontier goals in a row that count as stuck.
    pub frontier_repeat_limit: usize,
    /// Pause after each exploration step so fresh frames reach the map.
    pub settle_ms: u64,
    /// Arm kinematics: base centre to arm root, and lift height to fingers.
    pub arm_base_offset: f32,
    pub gripper_height_offset: f32,
    pub max_arm_extension: f32,
    pub lift_after_grasp: f32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 200,
            position_tolerance: 0.1,
            heading_tolerance: 0.2,
            standoff: 0.6,
            search_budget: 8,
            explore_steps: 5,
            frontier_repeat_limit: 3,
            settle_ms: 400,
            arm_base_offset: 0.3,
            gripper_height_offset: 0.2,
            max_arm_extension: 0.52,
            lift_after_grasp: 0.15,
        }
    }
}

/// Scratch state carried between the operations of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskMemory {
    pub target_category: Option<String>,
    pub current_object: Option<InstanceId>,
    pub current_receptacle: Option<InstanceId>,
    /// Instances the planner could not reach; searches skip them.
    pub unreachable: BTreeSet<InstanceId>,
    pub frontier_guard: RepeatGuard,
}

pub struct TaskContext {
    pub client: RobotClient,
    pub map: SharedVoxelMap,
    pub planner: MotionPlanner,
    pub memory: TaskMemory,
    pub config: TaskConfig,
}

impl TaskContext {
    pub fn new(client: RobotClient, map: SharedVoxelMap, planner: MotionPlanner, config: TaskConfig) -> Self {
        let memory = TaskMemory {
            frontier_guard: RepeatGuard::new(config.frontier_repeat_limit),
            ..Default::default()
        };
        Self { client, map, planner, memory, config }
    }

    /// Read-only snapshot for predicates. Must not be held across an await.
    pub fn view(&self) -> WorldView<'_> {
        WorldView {
            state: self.client.get_state(),
            map: self.map.read(),
            memory: &self.memory,
            config: &self.config,
        }
    }
}

/// What a precondition or postcondition may look at.
pub struct WorldView<'a> {
    pub state: Option<RobotState>,
    pub map: RwLockReadGuard<'a, VoxelMap>,
    pub memory: &'a TaskMemory,
    pub config: &'a TaskConfig,
}

impl WorldView<'_> {
    pub fn pose(&self) -> Result<Pose2, String> {
        self.state.as_ref().map(|s| s.base_pose).ok_or_else(|| "no robot state yet".to_string())
    }

    pub fn current_object(&self) -> Result<&Instance, String> {
        let id = self.memory.current_object.ok_or_else(|| "no object selected".to_string())?;
        self.map.query_instance(id).ok_or_else(|| format!("instance {id} is not in the map"))
    }
}
