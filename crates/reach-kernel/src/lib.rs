//! `reach-kernel` – Safety & Supervision
//!
//! Enforces rules; never plans.
//!
//! # Modules
//!
//! - [`verifier`] – [`CommandVerifier`][verifier::CommandVerifier]: the
//!   Follower runs every incoming [`Command`][reach_types::Command] through a
//!   list of [`Rule`][verifier::Rule]s (step caps, joint limits, gripper
//!   range, fault interlock) before the body sees it. `Stop` always passes.
//! - [`watchdog`] – [`LinkWatchdog`][watchdog::LinkWatchdog]: tracks the
//!   last message seen on each stream of the control channel so the Robot
//!   Client can declare the link down when telemetry goes silent.

pub mod verifier;
pub mod watchdog;

pub use verifier::{
    CommandVerifier, FaultInterlockRule, GripperRangeRule, JointLimitRule, Rule, StepCapRule,
};
pub use watchdog::{LinkHealth, LinkWatchdog, Stream};
