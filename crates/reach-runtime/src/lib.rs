//! `reach-runtime` – the Task Engine.
//!
//! Sequences robot behaviour as Operations composed into Managers, with
//! explicit precondition and postcondition checks and bounded local retry.
//!
//! # Modules
//!
//! - [`operation`] – the [`Operation`] contract and the [`OperationRun`]
//!   state machine (`NotStarted → Running → Succeeded | Failed`).
//! - [`manager`] – [`Manager`]: sequential, best-effort and conditional
//!   composition, itself an [`Operation`].
//! - [`context`] – the explicit [`TaskContext`] handed to every operation,
//!   and the read-only [`WorldView`] predicates see.
//! - [`operations`] – navigation, exploration, search and grasp operations.
//! - [`map_updater`] – streams camera frames into the shared voxel map.
//! - [`registry`] – named tasks and the [`TaskEngine`] that launches them.
//! - [`guard`] – [`RepeatGuard`], stuck detection for exploration.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter. Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export spans to any OTLP collector.
//!
//! # Failure handling
//!
//! Errors are classified by [`ReachError::is_recoverable`]. Managers retry
//! recoverable failures of a step with a freshly built operation, up to
//! [`TaskConfig::max_retries`]; a link loss or a cancelled command aborts
//! the whole task immediately.
//!
//! [`ReachError::is_recoverable`]: reach_types::ReachError::is_recoverable

pub mod context;
pub mod guard;
pub mod manager;
pub mod map_updater;
pub mod operation;
pub mod operations;
pub mod registry;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use context::{TaskConfig, TaskContext, TaskMemory, WorldView};
pub use guard::RepeatGuard;
pub use manager::{AttemptRecord, Manager, Policy, Step};
pub use map_updater::{GroundTruthSegmenter, MapUpdater, UpdaterStats};
pub use operation::{Operation, OperationRun, OperationStatus};
pub use registry::{TaskEngine, TaskRegistry, TaskReport};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
