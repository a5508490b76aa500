//! Kinematic simulation of a mobile manipulator for headless testing.
//!
//! [`SimBody`] rate-limits every actuator towards its commanded target, so
//! motions take real (simulated) time and can be pre-empted by a stop. Paired
//! with a [`SimWorld`] it also decides whether a closing gripper ends up
//! holding something.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use reach_hal::{RobotBody, SimBody};
//! use reach_types::{CommandKind, Pose2};
//!
//! let mut body = SimBody::new();
//! body.apply(&CommandKind::BaseMove { target: Pose2::new(0.1, 0.0, 0.0), relative: false })
//!     .unwrap();
//! for _ in 0..20 {
//!     body.step(Duration::from_millis(50));
//! }
//! assert!(body.snapshot().at_goal);
//! ```

use std::sync::Arc;
use std::time::Duration;

use reach_types::{
    ARM_JOINT_NAMES, CameraPose, CommandKind, ControlMode, GRIPPER_CLOSED, GRIPPER_OPEN,
    GripperState, Point3, Pose2, ReachError, wrap_angle,
};
use tracing::debug;

use crate::body::{BodyState, RobotBody};
use crate::world::SimWorld;

const JOINT_COUNT: usize = ARM_JOINT_NAMES.len();

/// Arm posture used while driving: lift low, arm retracted.
pub const NAVIGATION_POSTURE: [f32; JOINT_COUNT] = [0.3, 0.0, 0.0, 0.0, 0.0];
/// Arm posture used for manipulation: lift raised, wrist pitched down.
pub const MANIPULATION_POSTURE: [f32; JOINT_COUNT] = [0.6, 0.0, 0.0, -0.6, 0.0];

/// Tuning for [`SimBody`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimBodyConfig {
    /// m/s
    pub max_linear_speed: f32,
    /// rad/s
    pub max_angular_speed: f32,
    /// Joint units per second.
    pub joint_speed: f32,
    /// Normalised aperture per second.
    pub gripper_speed: f32,
    pub position_tolerance: f32,
    pub angle_tolerance: f32,
    /// Battery percent lost per simulated second.
    pub battery_drain_per_sec: f32,
    pub camera_height: f32,
    /// Horizontal offset of the wrist from the base centre with the arm fully
    /// retracted.
    pub arm_base_offset: f32,
    /// Vertical offset of the fingers above the lift carriage.
    pub gripper_height_offset: f32,
    /// How close an object must be to the fingers to be grasped.
    pub grasp_radius: f32,
}

impl Default for SimBodyConfig {
    fn default() -> Self {
        Self {
            max_linear_speed: 0.6,
            max_angular_speed: 1.5,
            joint_speed: 1.0,
            gripper_speed: 2.0,
            position_tolerance: 0.01,
            angle_tolerance: 0.02,
            battery_drain_per_sec: 0.01,
            camera_height: 1.2,
            arm_base_offset: 0.3,
            gripper_height_offset: 0.2,
            grasp_radius: 0.15,
        }
    }
}

/// A simulated mobile manipulator.
pub struct SimBody {
    cfg: SimBodyConfig,
    world: Option<Arc<SimWorld>>,
    pose: Pose2,
    base_target: Option<Pose2>,
    joints: [f32; JOINT_COUNT],
    joint_velocities: [f32; JOINT_COUNT],
    joint_targets: [f32; JOINT_COUNT],
    gripper: f32,
    gripper_target: f32,
    /// Aperture at which the fingers meet the held object.
    grip_stop: Option<f32>,
    mode: ControlMode,
    battery: f32,
    faults: Vec<String>,
}

impl Default for SimBody {
    fn default() -> Self {
        Self::with_config(SimBodyConfig::default())
    }
}

impl SimBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(cfg: SimBodyConfig) -> Self {
        Self {
            cfg,
            world: None,
            pose: Pose2::default(),
            base_target: None,
            joints: NAVIGATION_POSTURE,
            joint_velocities: [0.0; JOINT_COUNT],
            joint_targets: NAVIGATION_POSTURE,
            gripper: GRIPPER_OPEN,
            gripper_target: GRIPPER_OPEN,
            grip_stop: None,
            mode: ControlMode::Navigation,
            battery: 100.0,
            faults: Vec::new(),
        }
    }

    /// Attach a world so that grasps can find objects.
    pub fn with_world(mut self, world: Arc<SimWorld>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_pose(mut self, pose: Pose2) -> Self {
        self.pose = pose;
        self
    }

    /// Raise a fault flag, as a driver would on overcurrent or e-stop.
    pub fn inject_fault(&mut self, fault: impl Into<String>) {
        self.faults.push(fault.into());
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// World position of the point between the fingers.
    pub fn gripper_point(&self) -> Point3 {
        let reach = self.cfg.arm_base_offset + self.joints[1];
        let (s, c) = self.pose.theta.sin_cos();
        Point3::new(
            self.pose.x + c * reach,
            self.pose.y + s * reach,
            self.joints[0] + self.cfg.gripper_height_offset,
        )
    }

    fn camera_pose(&self) -> CameraPose {
        let pitch = match self.mode {
            ControlMode::Navigation => -0.35,
            ControlMode::Manipulation => -0.8,
        };
        CameraPose {
            position: Point3::new(self.pose.x, self.pose.y, self.cfg.camera_height),
            yaw: self.pose.theta,
            pitch,
        }
    }

    fn base_settled(&self) -> bool {
        match self.base_target {
            None => true,
            Some(t) => {
                self.pose.distance_to(&t) <= self.cfg.position_tolerance
                    && self.pose.heading_error(&t) <= self.cfg.angle_tolerance
            }
        }
    }

    fn arm_settled(&self) -> bool {
        self.joints
            .iter()
            .zip(self.joint_targets.iter())
            .all(|(j, t)| (j - t).abs() <= self.cfg.position_tolerance)
    }

    fn gripper_settled(&self) -> bool {
        match self.grip_stop {
            Some(stop) if self.gripper_target <= stop => (self.gripper - stop).abs() < 1e-4,
            _ => (self.gripper - self.gripper_target).abs() <= self.cfg.position_tolerance,
        }
    }

    fn step_base(&mut self, dt: f32) {
        let Some(target) = self.base_target else {
            return;
        };
        let dist = self.pose.distance_to(&target);
        if dist > 0.0 {
            let travel = (self.cfg.max_linear_speed * dt).min(dist);
            self.pose.x += (target.x - self.pose.x) / dist * travel;
            self.pose.y += (target.y - self.pose.y) / dist * travel;
        }
        let err = wrap_angle(target.theta - self.pose.theta);
        let turn = (self.cfg.max_angular_speed * dt).min(err.abs());
        self.pose.theta = wrap_angle(self.pose.theta + turn.copysign(err));
        if self.base_settled() {
            self.pose = target;
            self.base_target = None;
        }
    }

    fn step_arm(&mut self, dt: f32) {
        let max = self.cfg.joint_speed * dt;
        for i in 0..JOINT_COUNT {
            let err = self.joint_targets[i] - self.joints[i];
            let delta = err.clamp(-max, max);
            self.joints[i] += delta;
            self.joint_velocities[i] = if dt > 0.0 { delta / dt } else { 0.0 };
        }
    }

    fn step_gripper(&mut self, dt: f32) {
        let max = self.cfg.gripper_speed * dt;
        let err = self.gripper_target - self.gripper;
        let next = self.gripper + err.clamp(-max, max);

        if err < 0.0 && self.grip_stop.is_none() {
            let width = self
                .world
                .as_ref()
                .and_then(|w| w.graspable_near(self.gripper_point(), self.cfg.grasp_radius))
                .map(|b| (b.grip_width() / 0.15).clamp(GRIPPER_CLOSED, GRIPPER_OPEN));
            if let Some(stop) = width {
                if next <= stop {
                    debug!(aperture = stop, "sim gripper closed on object");
                    self.gripper = stop;
                    self.grip_stop = Some(stop);
                    return;
                }
            }
        }
        if let Some(stop) = self.grip_stop {
            if self.gripper_target <= stop {
                return;
            }
            if next > stop + 1e-3 {
                self.grip_stop = None;
            }
        }
        self.gripper = next;
    }
}

impl RobotBody for SimBody {
    fn apply(&mut self, command: &CommandKind) -> Result<(), ReachError> {
        match command {
            CommandKind::BaseMove { target, relative } => {
                let resolved = if *relative { self.pose.compose(target) } else { *target };
                self.base_target = Some(Pose2 { theta: wrap_angle(resolved.theta), ..resolved });
            }
            CommandKind::ArmMove { joints } => {
                if joints.len() != JOINT_COUNT {
                    return Err(ReachError::HardwareFault {
                        component: "arm".into(),
                        details: format!("expected {JOINT_COUNT} joints, got {}", joints.len()),
                    });
                }
                self.joint_targets.copy_from_slice(joints);
            }
            CommandKind::Gripper { position } => {
                self.gripper_target = position.clamp(GRIPPER_CLOSED, GRIPPER_OPEN);
            }
            CommandKind::SetMode { mode } => {
                self.mode = *mode;
                self.joint_targets = match mode {
                    ControlMode::Navigation => NAVIGATION_POSTURE,
                    ControlMode::Manipulation => MANIPULATION_POSTURE,
                };
            }
            CommandKind::Stop => self.halt(),
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.base_target = None;
        self.joint_targets = self.joints;
        self.joint_velocities = [0.0; JOINT_COUNT];
        self.gripper_target = self.grip_stop.unwrap_or(self.gripper);
    }

    fn step(&mut self, dt: Duration) {
        let dt = dt.as_secs_f32();
        self.step_base(dt);
        self.step_arm(dt);
        self.step_gripper(dt);
        self.battery = (self.battery - self.cfg.battery_drain_per_sec * dt).max(0.0);
    }

    fn snapshot(&self) -> BodyState {
        BodyState {
            base_pose: self.pose,
            joint_positions: self.joints.to_vec(),
            joint_velocities: self.joint_velocities.to_vec(),
            gripper: GripperState {
                position: self.gripper,
                holding: self.grip_stop.is_some(),
            },
            control_mode: self.mode,
            at_goal: self.base_settled() && self.arm_settled() && self.gripper_settled(),
            battery_percent: self.battery.round().clamp(0.0, 100.0) as u8,
            faults: self.faults.clone(),
            camera_pose: self.camera_pose(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use reach_types::angle_difference;

    fn poses_match(a: &Pose2, b: &Pose2) -> bool {
        a.distance_to(b) <= 0.01 && angle_difference(a.theta, b.theta) <= 0.02
    }

    fn run(body: &mut SimBody, secs: f32) {
        let steps = (secs / 0.05).ceil() as usize;
        for _ in 0..steps {
            body.step(Duration::from_millis(50));
        }
    }

    #[test]
    fn base_move_takes_time_and_settles() {
        let mut body = SimBody::new();
        body.apply(&CommandKind::BaseMove { target: Pose2::new(1.2, 0.0, 0.0), relative: false })
            .unwrap();
        run(&mut body, 1.0);
        let mid = body.snapshot();
        assert!(!mid.at_goal);
        assert!(mid.base_pose.x > 0.3 && mid.base_pose.x < 1.2);
        run(&mut body, 2.0);
        let done = body.snapshot();
        assert!(done.at_goal);
        assert!(poses_match(&done.base_pose, &Pose2::new(1.2, 0.0, 0.0)));
    }

    #[test]
    fn relative_move_uses_current_heading() {
        let mut body = SimBody::new().with_pose(Pose2::new(0.0, 0.0, std::f32::consts::FRAC_PI_2));
        body.apply(&CommandKind::BaseMove { target: Pose2::new(0.5, 0.0, 0.0), relative: true })
            .unwrap();
        run(&mut body, 2.0);
        let s = body.snapshot();
        assert!((s.base_pose.y - 0.5).abs() < 0.02);
        assert!(s.base_pose.x.abs() < 0.02);
    }

    #[test]
    fn halt_freezes_motion_in_place() {
        let mut body = SimBody::new();
        body.apply(&CommandKind::BaseMove { target: Pose2::new(3.0, 0.0, 0.0), relative: false })
            .unwrap();
        run(&mut body, 0.5);
        body.apply(&CommandKind::Stop).unwrap();
        let stopped_at = body.snapshot().base_pose;
        run(&mut body, 1.0);
        let s = body.snapshot();
        assert_eq!(s.base_pose, stopped_at);
        assert!(s.at_goal);
    }

    #[test]
    fn arm_move_rejects_wrong_joint_count() {
        let mut body = SimBody::new();
        let err = body.apply(&CommandKind::ArmMove { joints: vec![0.1, 0.2] }).unwrap_err();
        assert!(matches!(err, ReachError::HardwareFault { .. }));
    }

    #[test]
    fn set_mode_switches_posture() {
        let mut body = SimBody::new();
        body.apply(&CommandKind::SetMode { mode: ControlMode::Manipulation }).unwrap();
        assert!(!body.snapshot().at_goal);
        run(&mut body, 1.5);
        let s = body.snapshot();
        assert_eq!(s.control_mode, ControlMode::Manipulation);
        assert!(s.at_goal);
        assert!((s.joint_positions[0] - MANIPULATION_POSTURE[0]).abs() < 0.02);
        assert!(s.camera_pose.pitch < -0.5);
    }

    #[test]
    fn closing_on_nothing_reaches_closed() {
        let mut body = SimBody::new().with_world(Arc::new(SimWorld::demo_room()));
        body.apply(&CommandKind::Gripper { position: GRIPPER_CLOSED }).unwrap();
        run(&mut body, 1.0);
        let s = body.snapshot();
        assert!(!s.gripper.holding);
        assert!(s.gripper.position < 0.02);
    }

    #[test]
    fn closing_next_to_cup_holds_it() {
        // Cup centre is at (1.9, 0.0, 0.81); park so the fingers land on it.
        let mut body = SimBody::new()
            .with_world(Arc::new(SimWorld::demo_room()))
            .with_pose(Pose2::new(1.4, 0.0, 0.0));
        body.apply(&CommandKind::ArmMove { joints: vec![0.6, 0.2, 0.0, 0.0, 0.0] }).unwrap();
        run(&mut body, 1.0);
        body.apply(&CommandKind::Gripper { position: GRIPPER_CLOSED }).unwrap();
        run(&mut body, 1.0);
        let s = body.snapshot();
        assert!(s.gripper.holding);
        assert!(s.at_goal);
        assert!(s.gripper.position > 0.3);

        body.apply(&CommandKind::Gripper { position: GRIPPER_OPEN }).unwrap();
        run(&mut body, 1.0);
        assert!(!body.snapshot().gripper.holding);
    }

    #[test]
    fn faults_are_reported() {
        let mut body = SimBody::new();
        body.inject_fault("lift_overcurrent");
        assert_eq!(body.snapshot().faults, vec!["lift_overcurrent".to_string()]);
        body.clear_faults();
        assert!(body.snapshot().faults.is_empty());
    }
}
