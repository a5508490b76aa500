//! [`CommandVerifier`] – follower-side safety interlock.
//!
//! Before a [`CommandKind`] reaches the body, pass it through
//! [`CommandVerifier::verify`]. Every registered [`Rule`] is evaluated in
//! order against the command and the latest [`RobotState`]; the first
//! violation returns a [`ReachError::HardwareFault`] and the command is
//! acknowledged as rejected instead of executed.
//!
//! | Rule | Rejects |
//! |---|---|
//! | [`StepCapRule`] | relative base moves longer or wider than the caps |
//! | [`JointLimitRule`] | arm moves outside a joint's range |
//! | [`GripperRangeRule`] | apertures outside `[0, 1]` |
//! | [`FaultInterlockRule`] | any motion while the body reports faults |

use reach_types::{
    ARM_JOINT_NAMES, CommandKind, GRIPPER_CLOSED, GRIPPER_OPEN, ReachError, RobotState,
    joint_index,
};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single physical invariant a command must satisfy.
pub trait Rule: Send + Sync {
    /// Name used in rejection messages.
    fn name(&self) -> &str;

    /// `Ok(())` when `command` is safe to apply given `state`.
    fn check(&self, command: &CommandKind, state: &RobotState) -> Result<(), ReachError>;
}

// ────────────────────────────────────────────────────────────────────────────
// CommandVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine evaluated by the Follower for every command.
///
/// # Example
///
/// ```
/// use reach_kernel::verifier::{CommandVerifier, GripperRangeRule};
/// use reach_types::CommandKind;
/// # use reach_types::{RobotState, Pose2, GripperState, ControlMode};
/// # let state = RobotState {
/// #     timestamp: chrono::Utc::now(), seq_id: 0, base_pose: Pose2::default(),
/// #     joint_positions: vec![0.0; 5], joint_velocities: vec![0.0; 5],
/// #     gripper: GripperState::default(), control_mode: ControlMode::Navigation,
/// #     last_executed_seq: 0, at_goal: true, battery_percent: 100, faults: vec![],
/// # };
///
/// let mut verifier = CommandVerifier::new();
/// verifier.add_rule(Box::new(GripperRangeRule));
///
/// assert!(verifier.verify(&CommandKind::Gripper { position: 0.5 }, &state).is_ok());
/// assert!(verifier.verify(&CommandKind::Gripper { position: 1.5 }, &state).is_err());
/// ```
#[derive(Default)]
pub struct CommandVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl CommandVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier with every built-in rule at its default limits.
    pub fn standard() -> Self {
        let mut v = Self::new();
        v.add_rule(Box::new(FaultInterlockRule));
        v.add_rule(Box::new(StepCapRule::default()));
        for rule in JointLimitRule::defaults() {
            v.add_rule(Box::new(rule));
        }
        v.add_rule(Box::new(GripperRangeRule));
        v
    }

    /// Register a new [`Rule`]. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Validate `command` against every registered rule.
    ///
    /// `Stop` is accepted unconditionally.
    pub fn verify(&self, command: &CommandKind, state: &RobotState) -> Result<(), ReachError> {
        if matches!(command, CommandKind::Stop) {
            return Ok(());
        }
        for rule in &self.rules {
            if let Err(e) = rule.check(command, state) {
                warn!(rule = rule.name(), command = command.label(), error = %e, "command rejected");
                return Err(e);
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Caps the size of a single relative base move.
pub struct StepCapRule {
    /// Metres.
    pub max_step: f32,
    /// Radians.
    pub max_turn: f32,
}

impl Default for StepCapRule {
    fn default() -> Self {
        Self {
            max_step: 2.0,
            max_turn: std::f32::consts::TAU,
        }
    }
}

impl Rule for StepCapRule {
    fn name(&self) -> &str {
        "step_cap"
    }

    fn check(&self, command: &CommandKind, _state: &RobotState) -> Result<(), ReachError> {
        if let CommandKind::BaseMove { target, relative: true } = command {
            let step = target.x.hypot(target.y);
            if step > self.max_step {
                return Err(ReachError::HardwareFault {
                    component: "base".into(),
                    details: format!("step {step:.2} m exceeds cap {}", self.max_step),
                });
            }
            if target.theta.abs() > self.max_turn {
                return Err(ReachError::HardwareFault {
                    component: "base".into(),
                    details: format!("turn {:.2} rad exceeds cap {}", target.theta, self.max_turn),
                });
            }
        }
        Ok(())
    }
}

/// Keeps one named arm joint inside `[min, max]`.
pub struct JointLimitRule {
    pub joint: String,
    pub min: f32,
    pub max: f32,
}

impl JointLimitRule {
    pub fn new(joint: impl Into<String>, min: f32, max: f32) -> Self {
        Self { joint: joint.into(), min, max }
    }

    /// Limits for every joint in [`ARM_JOINT_NAMES`].
    pub fn defaults() -> Vec<JointLimitRule> {
        let limits = [(0.0, 1.1), (0.0, 0.52), (-1.75, 4.0), (-1.57, 0.56), (-3.14, 3.14)];
        ARM_JOINT_NAMES
            .iter()
            .zip(limits)
            .map(|(name, (min, max))| JointLimitRule::new(*name, min, max))
            .collect()
    }
}

impl Rule for JointLimitRule {
    fn name(&self) -> &str {
        "joint_limit"
    }

    fn check(&self, command: &CommandKind, _state: &RobotState) -> Result<(), ReachError> {
        let CommandKind::ArmMove { joints } = command else {
            return Ok(());
        };
        let Some(target) = joint_index(&self.joint).and_then(|i| joints.get(i)) else {
            return Ok(());
        };
        if *target < self.min || *target > self.max || !target.is_finite() {
            return Err(ReachError::HardwareFault {
                component: self.joint.clone(),
                details: format!("target {target} out of [{}, {}]", self.min, self.max),
            });
        }
        Ok(())
    }
}

/// Rejects gripper apertures outside the normalised range.
pub struct GripperRangeRule;

impl Rule for GripperRangeRule {
    fn name(&self) -> &str {
        "gripper_range"
    }

    fn check(&self, command: &CommandKind, _state: &RobotState) -> Result<(), ReachError> {
        match command {
            CommandKind::Gripper { position }
                if !(GRIPPER_CLOSED..=GRIPPER_OPEN).contains(position) =>
            {
                Err(ReachError::HardwareFault {
                    component: "gripper".into(),
                    details: format!("aperture {position} out of [{GRIPPER_CLOSED}, {GRIPPER_OPEN}]"),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Refuses any motion while the body reports an active fault.
pub struct FaultInterlockRule;

impl Rule for FaultInterlockRule {
    fn name(&self) -> &str {
        "fault_interlock"
    }

    fn check(&self, command: &CommandKind, state: &RobotState) -> Result<(), ReachError> {
        if command.is_motion() && state.has_faults() {
            return Err(ReachError::HardwareFault {
                component: "body".into(),
                details: format!("active faults: {}", state.faults.join(", ")),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_types::{ControlMode, GripperState, Pose2};

    fn state() -> RobotState {
        RobotState {
            timestamp: chrono::Utc::now(),
            seq_id: 0,
            base_pose: Pose2::default(),
            joint_positions: vec![0.3, 0.0, 0.0, 0.0, 0.0],
            joint_velocities: vec![0.0; 5],
            gripper: GripperState::default(),
            control_mode: ControlMode::Navigation,
            last_executed_seq: 0,
            at_goal: true,
            battery_percent: 100,
            faults: vec![],
        }
    }

    fn arm(joints: [f32; 5]) -> CommandKind {
        CommandKind::ArmMove { joints: joints.to_vec() }
    }

    // ------------------------------------------------------------------ StepCapRule

    #[test]
    fn short_relative_step_passes() {
        let v = CommandVerifier::standard();
        let cmd = CommandKind::BaseMove { target: Pose2::new(0.5, 0.2, 0.3), relative: true };
        assert!(v.verify(&cmd, &state()).is_ok());
    }

    #[test]
    fn long_relative_step_rejected() {
        let v = CommandVerifier::standard();
        let cmd = CommandKind::BaseMove { target: Pose2::new(5.0, 0.0, 0.0), relative: true };
        assert!(matches!(
            v.verify(&cmd, &state()),
            Err(ReachError::HardwareFault { ref component, .. }) if component == "base"
        ));
    }

    #[test]
    fn step_cap_ignores_absolute_moves() {
        let v = CommandVerifier::standard();
        let cmd = CommandKind::BaseMove { target: Pose2::new(5.0, 0.0, 0.0), relative: false };
        assert!(v.verify(&cmd, &state()).is_ok());
    }

    // ------------------------------------------------------------------ JointLimitRule

    #[test]
    fn arm_within_limits_passes() {
        let v = CommandVerifier::standard();
        assert!(v.verify(&arm([0.6, 0.2, 0.0, -0.5, 0.0]), &state()).is_ok());
    }

    #[test]
    fn lift_over_max_rejected() {
        let v = CommandVerifier::standard();
        assert!(matches!(
            v.verify(&arm([1.5, 0.2, 0.0, 0.0, 0.0]), &state()),
            Err(ReachError::HardwareFault { ref component, .. }) if component == "lift"
        ));
    }

    #[test]
    fn nan_joint_target_rejected() {
        let v = CommandVerifier::standard();
        assert!(v.verify(&arm([0.5, f32::NAN, 0.0, 0.0, 0.0]), &state()).is_err());
    }

    // ------------------------------------------------------------------ Gripper / faults

    #[test]
    fn gripper_out_of_range_rejected() {
        let v = CommandVerifier::standard();
        assert!(v.verify(&CommandKind::Gripper { position: -0.1 }, &state()).is_err());
        assert!(v.verify(&CommandKind::Gripper { position: 1.0 }, &state()).is_ok());
    }

    #[test]
    fn faults_block_motion_but_not_stop() {
        let v = CommandVerifier::standard();
        let mut s = state();
        s.faults.push("wheel_stall".into());
        let cmd = CommandKind::BaseMove { target: Pose2::new(0.1, 0.0, 0.0), relative: true };
        assert!(v.verify(&cmd, &s).is_err());
        assert!(v.verify(&CommandKind::Stop, &s).is_ok());
    }

    #[test]
    fn empty_verifier_always_passes() {
        let v = CommandVerifier::new();
        assert!(v.verify(&arm([99.0; 5]), &state()).is_ok());
    }

    #[test]
    fn first_failing_rule_short_circuits() {
        let v = CommandVerifier::standard();
        let mut s = state();
        s.faults.push("estop".into());
        // Fault interlock is registered first, so it names the body, not the lift.
        let result = v.verify(&arm([9.0, 0.0, 0.0, 0.0, 0.0]), &s);
        assert!(matches!(result, Err(ReachError::HardwareFault { ref component, .. }) if component == "body"));
    }
}
