//! The Operation contract and its state machine.
//!
//! ```text
//!               precondition ok            action ok + postcondition ok
//! NotStarted ───────────────────▶ Running ─────────────────────────────▶ Succeeded
//!     │                              │
//!     │ precondition unmet           │ action error / postcondition violated
//!     ▼                              ▼
//! (stays NotStarted, error)        Failed
//! ```
//!
//! `Succeeded` and `Failed` are terminal: an [`OperationRun`] executes its
//! operation at most once. Retrying means building a fresh operation.

use async_trait::async_trait;
use reach_types::ReachError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::{TaskContext, WorldView};
use crate::manager::AttemptRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }
}

/// A preconditioned robot action.
///
/// Predicates receive a [`WorldView`] and report why they do not hold as a
/// plain message; the action is the only place commands are issued.
#[async_trait]
pub trait Operation: Send {
    fn name(&self) -> &str;

    fn precondition(&self, _world: &WorldView<'_>) -> Result<(), String> {
        Ok(())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError>;

    fn postcondition(&self, _world: &WorldView<'_>) -> Result<(), String> {
        Ok(())
    }

    /// Attempt log of nested steps, for operations that compose others.
    fn attempts(&self) -> Vec<AttemptRecord> {
        Vec::new()
    }
}

#[async_trait]
impl Operation for Box<dyn Operation> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        (**self).precondition(world)
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        (**self).action(ctx).await
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        (**self).postcondition(world)
    }

    fn attempts(&self) -> Vec<AttemptRecord> {
        (**self).attempts()
    }
}

/// One execution of one operation, owning its status.
pub struct OperationRun<O: Operation = Box<dyn Operation>> {
    op: O,
    status: OperationStatus,
}

impl<O: Operation> OperationRun<O> {
    pub fn new(op: O) -> Self {
        Self { op, status: OperationStatus::NotStarted }
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn operation(&self) -> &O {
        &self.op
    }

    /// Drive the state machine to a terminal status, or leave it at
    /// `NotStarted` when the precondition does not hold.
    pub async fn execute(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        if self.status != OperationStatus::NotStarted {
            return Err(ReachError::TaskFailed {
                task: self.op.name().to_string(),
                reason: format!("already {:?}", self.status),
            });
        }

        let pre = self.op.precondition(&ctx.view());
        if let Err(why) = pre {
            debug!(op = self.op.name(), %why, "precondition unmet");
            return Err(ReachError::PreconditionUnmet(format!("{}: {why}", self.op.name())));
        }

        self.status = OperationStatus::Running;
        debug!(op = self.op.name(), "running");
        if let Err(e) = self.op.action(ctx).await {
            self.status = OperationStatus::Failed;
            warn!(op = self.op.name(), error = %e, "action failed");
            return Err(e);
        }

        let post = self.op.postcondition(&ctx.view());
        match post {
            Ok(()) => {
                self.status = OperationStatus::Succeeded;
                debug!(op = self.op.name(), "succeeded");
                Ok(())
            }
            Err(why) => {
                self.status = OperationStatus::Failed;
                warn!(op = self.op.name(), %why, "postcondition violated");
                Err(ReachError::PostconditionViolation(format!("{}: {why}", self.op.name())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Probe, ProbeOp, sim_context};

    #[tokio::test]
    async fn unmet_precondition_never_runs_action() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let probe = Probe::default();
        let mut run = OperationRun::new(ProbeOp::new("blocked", &probe).precondition_fails());
        let err = run.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::PreconditionUnmet(_)));
        assert!(err.is_recoverable());
        assert_eq!(run.status(), OperationStatus::NotStarted);
        assert_eq!(probe.actions(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn violated_postcondition_fails_after_action() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let probe = Probe::default();
        let mut run = OperationRun::new(ProbeOp::new("unverified", &probe).postcondition_fails());
        let err = run.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::PostconditionViolation(_)));
        assert_eq!(run.status(), OperationStatus::Failed);
        assert_eq!(probe.actions(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn success_is_terminal() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let probe = Probe::default();
        let mut run = OperationRun::new(ProbeOp::new("fine", &probe));
        run.execute(&mut ctx).await?;
        assert_eq!(run.status(), OperationStatus::Succeeded);
        assert!(run.status().is_terminal());

        assert!(run.execute(&mut ctx).await.is_err());
        assert_eq!(probe.actions(), 1);
        Ok(())
    }
}
