//! Managers: operations composed of other operations.
//!
//! A [`Manager`] owns a list of [`Step`]s. A step is a factory, so an
//! operation is only built when the manager reaches it, and built afresh for
//! every retry. The composition [`Policy`] decides the order and the success
//! criterion:
//!
//! | Policy | Runs | Succeeds when |
//! |---|---|---|
//! | [`Policy::Sequential`] | steps in order, stopping at the first failure | every step succeeded |
//! | [`Policy::BestEffort`] | every step regardless of failures | at least `min_successes` steps succeeded |
//! | [`Policy::Conditional`] | from step 0, following success/failure edges | the last step executed succeeded |
//!
//! Recoverable failures are retried up to the step's bound; an unrecoverable
//! one (a dropped link, a cancelled command) aborts the manager at once, under
//! every policy, and propagates unchanged to the enclosing manager.
//!
//! Managers implement [`Operation`] and nest freely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reach_types::ReachError;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::{TaskContext, WorldView};
use crate::operation::{Operation, OperationRun, OperationStatus};

/// Upper bound on transitions followed by a conditional manager.
pub const MAX_TRANSITIONS: usize = 64;

type Factory = Arc<dyn Fn() -> Box<dyn Operation> + Send + Sync>;
type Predicate = Arc<dyn Fn(&WorldView<'_>) -> Result<(), String> + Send + Sync>;

/// Builds a fresh operation each time the manager needs one.
#[derive(Clone)]
pub struct Step {
    label: String,
    factory: Factory,
    retries: Option<u32>,
}

impl Step {
    pub fn new<O, F>(label: impl Into<String>, factory: F) -> Self
    where
        O: Operation + 'static,
        F: Fn() -> O + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Operation>),
            retries: None,
        }
    }

    /// Override the context's retry bound for this step.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Sequential,
    BestEffort { min_successes: usize },
    Conditional,
}

/// One attempt at one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub operation: String,
    pub attempt: u32,
    pub status: OperationStatus,
    pub error: Option<ReachError>,
    /// Attempts made inside the step, when it is itself a manager.
    pub children: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Edges {
    on_success: Option<usize>,
    on_failure: Option<usize>,
}

pub struct Manager {
    name: String,
    policy: Policy,
    steps: Vec<Step>,
    edges: Vec<Edges>,
    precondition: Option<Predicate>,
    postcondition: Option<Predicate>,
    log: Vec<AttemptRecord>,
}

impl Manager {
    fn with_policy(name: impl Into<String>, policy: Policy) -> Self {
        Self {
            name: name.into(),
            policy,
            steps: Vec::new(),
            edges: Vec::new(),
            precondition: None,
            postcondition: None,
            log: Vec::new(),
        }
    }

    pub fn sequential(name: impl Into<String>) -> Self {
        Self::with_policy(name, Policy::Sequential)
    }

    pub fn best_effort(name: impl Into<String>, min_successes: usize) -> Self {
        Self::with_policy(name, Policy::BestEffort { min_successes })
    }

    pub fn conditional(name: impl Into<String>) -> Self {
        Self::with_policy(name, Policy::Conditional)
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Append a step (builder form).
    pub fn then(mut self, step: Step) -> Self {
        self.add(step);
        self
    }

    /// Append a step and return its index, for wiring conditional edges.
    pub fn add(&mut self, step: Step) -> usize {
        self.steps.push(step);
        self.edges.push(Edges::default());
        self.steps.len() - 1
    }

    /// After `from` succeeds, continue with `to`.
    pub fn on_success(&mut self, from: usize, to: usize) -> &mut Self {
        if let Some(e) = self.edges.get_mut(from) {
            e.on_success = Some(to);
        }
        self
    }

    /// After `from` fails recoverably, continue with `to`.
    pub fn on_failure(&mut self, from: usize, to: usize) -> &mut Self {
        if let Some(e) = self.edges.get_mut(from) {
            e.on_failure = Some(to);
        }
        self
    }

    pub fn with_precondition(
        mut self,
        check: impl Fn(&WorldView<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.precondition = Some(Arc::new(check));
        self
    }

    pub fn with_postcondition(
        mut self,
        check: impl Fn(&WorldView<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.postcondition = Some(Arc::new(check));
        self
    }

    pub fn report(&self) -> &[AttemptRecord] {
        &self.log
    }

    /// Run one step with retries. Returns the last error on failure.
    async fn run_step(&mut self, index: usize, ctx: &mut TaskContext) -> Result<(), ReachError> {
        let step = self.steps[index].clone();
        let bound = step.retries.unwrap_or(ctx.config.max_retries);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut run = OperationRun::new((step.factory)());
            let result = run.execute(ctx).await;
            self.log.push(AttemptRecord {
                operation: step.label.clone(),
                attempt,
                status: run.status(),
                error: result.as_ref().err().cloned(),
                children: run.operation().attempts(),
            });
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt <= bound => {
                    warn!(manager = %self.name, step = %step.label, attempt, error = %e, "retrying step");
                    tokio::time::sleep(Duration::from_millis(ctx.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn failure(&self, cause: ReachError) -> ReachError {
        if cause.is_recoverable() {
            ReachError::TaskFailed { task: self.name.clone(), reason: cause.to_string() }
        } else {
            cause
        }
    }

    async fn run_sequential(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        for i in 0..self.steps.len() {
            self.run_step(i, ctx).await.map_err(|e| self.failure(e))?;
        }
        Ok(())
    }

    async fn run_best_effort(&mut self, ctx: &mut TaskContext, min_successes: usize) -> Result<(), ReachError> {
        let mut successes = 0;
        let mut last_error = None;
        for i in 0..self.steps.len() {
            match self.run_step(i, ctx).await {
                Ok(()) => successes += 1,
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }
        if successes >= min_successes {
            return Ok(());
        }
        Err(ReachError::TaskFailed {
            task: self.name.clone(),
            reason: format!(
                "{successes} of {} steps succeeded, {min_successes} required{}",
                self.steps.len(),
                last_error.map(|e| format!("; last error: {e}")).unwrap_or_default()
            ),
        })
    }

    async fn run_conditional(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        let mut current = if self.steps.is_empty() { None } else { Some(0) };
        let mut outcome = Ok(());
        let mut transitions = 0;
        while let Some(i) = current {
            transitions += 1;
            if transitions > MAX_TRANSITIONS {
                return Err(ReachError::TaskFailed {
                    task: self.name.clone(),
                    reason: format!("more than {MAX_TRANSITIONS} transitions"),
                });
            }
            outcome = self.run_step(i, ctx).await;
            let edges = self.edges[i];
            current = match &outcome {
                Ok(()) => edges.on_success,
                Err(e) if !e.is_recoverable() => return Err(e.clone()),
                Err(_) => edges.on_failure,
            };
        }
        outcome.map_err(|e| self.failure(e))
    }
}

#[async_trait]
impl Operation for Manager {
    fn name(&self) -> &str {
        &self.name
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        self.precondition.as_ref().map_or(Ok(()), |p| p(world))
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        info!(manager = %self.name, policy = ?self.policy, steps = self.steps.len(), "manager started");
        let result = match self.policy {
            Policy::Sequential => self.run_sequential(ctx).await,
            Policy::BestEffort { min_successes } => self.run_best_effort(ctx, min_successes).await,
            Policy::Conditional => self.run_conditional(ctx).await,
        };
        match &result {
            Ok(()) => info!(manager = %self.name, "manager succeeded"),
            Err(e) => warn!(manager = %self.name, error = %e, "manager failed"),
        }
        result
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        self.postcondition.as_ref().map_or(Ok(()), |p| p(world))
    }

    fn attempts(&self) -> Vec<AttemptRecord> {
        self.log.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Probe, ProbeOp, sim_context};

    fn probe_step(label: &'static str, probe: &Probe, configure: fn(ProbeOp) -> ProbeOp) -> Step {
        let probe = probe.clone();
        Step::new(label, move || configure(ProbeOp::new(label, &probe)))
    }

    #[tokio::test]
    async fn sequential_stops_at_first_failure() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let (a, b, c) = (Probe::default(), Probe::default(), Probe::default());
        let manager = Manager::sequential("abc")
            .then(probe_step("A", &a, |op| op))
            .then(probe_step("B", &b, |op| op.fail_always(ReachError::NoPath("wall".into()))).retries(0))
            .then(probe_step("C", &c, |op| op));

        let mut run = OperationRun::new(manager);
        let err = run.execute(&mut ctx).await.unwrap_err();
        assert_eq!(run.status(), OperationStatus::Failed);
        assert!(matches!(err, ReachError::TaskFailed { ref task, .. } if task == "abc"));
        assert_eq!(a.built(), 1);
        assert_eq!(b.built(), 1);
        assert_eq!(c.built(), 0, "C must never be instantiated");

        let log = run.operation().report();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].status, OperationStatus::Succeeded);
        assert_eq!(log[1].status, OperationStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn recoverable_failures_retry_with_fresh_operations() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        ctx.config.retry_delay_ms = 1;
        let flaky = Probe::default();
        let manager = Manager::sequential("flaky").then(
            probe_step("F", &flaky, |op| op.fail_first(2, ReachError::NoPath("not yet".into()))).retries(2),
        );
        let mut run = OperationRun::new(manager);
        run.execute(&mut ctx).await?;
        assert_eq!(flaky.built(), 3);
        let attempts: Vec<u32> = run.operation().report().iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn retry_bound_is_respected() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        ctx.config.retry_delay_ms = 1;
        let flaky = Probe::default();
        let manager = Manager::sequential("bounded").then(
            probe_step("F", &flaky, |op| op.fail_always(ReachError::NoPath("never".into()))).retries(1),
        );
        let mut run = OperationRun::new(manager);
        assert!(run.execute(&mut ctx).await.is_err());
        assert_eq!(flaky.built(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn unrecoverable_error_propagates_through_nesting() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let (dead, after) = (Probe::default(), Probe::default());
        let inner = {
            let dead = dead.clone();
            move || {
                Manager::best_effort("inner", 0)
                    .then(probe_step("link", &dead, |op| op.fail_always(ReachError::LinkDown("cable".into()))).retries(5))
            }
        };
        let outer = Manager::best_effort("outer", 0)
            .then(Step::new("inner", inner).retries(5))
            .then(probe_step("after", &after, |op| op));

        let mut run = OperationRun::new(outer);
        let err = run.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::LinkDown(_)));
        assert_eq!(dead.built(), 1, "no retry after link loss");
        assert_eq!(after.built(), 0);

        let log = run.operation().report();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].children.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_counts_successes() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let p = Probe::default();
        let build = |min| {
            Manager::best_effort("sweep", min)
                .then(probe_step("ok", &p, |op| op))
                .then(probe_step("bad", &p, |op| op.fail_always(ReachError::NoPath("x".into()))).retries(0))
                .then(probe_step("ok2", &p, |op| op))
        };
        OperationRun::new(build(2)).execute(&mut ctx).await?;
        let err = OperationRun::new(build(3)).execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::TaskFailed { .. }));
        assert_eq!(p.built(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn conditional_branches_on_terminal_status() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let (grasp, recover, regrasp, celebrate) =
            (Probe::default(), Probe::default(), Probe::default(), Probe::default());
        let mut manager = Manager::conditional("grasp_with_recovery");
        let g = manager.add(probe_step("grasp", &grasp, |op| op.fail_always(ReachError::NoPath("slip".into()))).retries(0));
        let r = manager.add(probe_step("reposition", &recover, |op| op));
        let g2 = manager.add(probe_step("regrasp", &regrasp, |op| op));
        let done = manager.add(probe_step("celebrate", &celebrate, |op| op));
        manager.on_failure(g, r).on_success(r, g2);
        let _ = done;

        let mut run = OperationRun::new(manager);
        run.execute(&mut ctx).await?;
        assert_eq!((grasp.built(), recover.built(), regrasp.built()), (1, 1, 1));
        assert_eq!(celebrate.built(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn conditional_fails_when_last_step_fails() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let p = Probe::default();
        let mut manager = Manager::conditional("one_shot");
        manager.add(probe_step("try", &p, |op| op.fail_always(ReachError::NoPath("no".into()))).retries(0));
        let err = OperationRun::new(manager).execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::TaskFailed { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn conditional_cycles_are_bounded() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let p = Probe::default();
        let mut manager = Manager::conditional("spin");
        let a = manager.add(probe_step("a", &p, |op| op));
        manager.on_success(a, a);
        let err = OperationRun::new(manager).execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::TaskFailed { .. }));
        assert_eq!(p.built(), MAX_TRANSITIONS);
        Ok(())
    }

    #[tokio::test]
    async fn manager_predicates_gate_the_whole_composite() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        let p = Probe::default();
        let gated = Manager::sequential("gated")
            .with_precondition(|w| if w.memory.target_category.is_some() { Ok(()) } else { Err("no target".into()) })
            .then(probe_step("x", &p, |op| op));
        let mut run = OperationRun::new(gated);
        assert!(matches!(run.execute(&mut ctx).await, Err(ReachError::PreconditionUnmet(_))));
        assert_eq!(p.built(), 0);

        let checked = Manager::sequential("checked")
            .with_postcondition(|_| Err("never satisfied".into()))
            .then(probe_step("x", &p, |op| op));
        let mut run = OperationRun::new(checked);
        assert!(matches!(run.execute(&mut ctx).await, Err(ReachError::PostconditionViolation(_))));
        assert_eq!(run.status(), OperationStatus::Failed);
        Ok(())
    }
}
