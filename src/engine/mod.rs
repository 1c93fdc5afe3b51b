//! The path-forking execution engine.

pub mod context;
pub mod executor;
pub mod transform;

pub use context::{Context, StackFrame};
pub use executor::{Executor, ExecutorOptions};
pub use transform::{Argument, OpState, OpValue, TransformBuilder};

use crate::assertion::Assertion;
use crate::solver::{Model, ModelResult, Solver, SolverError};

/// How a single exploration path ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathOutcome {
    /// The entry function returned normally.
    Success,
    /// A property violation was detected and reported.
    Fail,
    /// The path condition became unsatisfiable.
    Unreachable,
    /// All successors of an execution step were pruned.
    Dead,
}

/// A detected property violation, stable for external serialization.
#[derive(Clone, Debug)]
pub struct Failure {
    pub assertion: Assertion,
    pub message: String,
}

impl Failure {
    pub fn new<M: Into<String>>(assertion: Assertion, message: M) -> Failure {
        Failure {
            assertion,
            message: message.into(),
        }
    }
}

/// Receives the terminal state of every explored path.
pub trait ExecutionPolicy {
    fn on_path_complete(
        &mut self,
        ctx: &Context,
        outcome: PathOutcome,
        assertion: Option<&Assertion>,
    );
}

/// Receives counterexamples for detected failures.
pub trait FailureLogger {
    fn log_failure(&mut self, model: &dyn Model, ctx: &Context, failure: &Failure);
}

/// Sink for sibling contexts produced when an execution step forks.
pub trait ContextStore {
    fn add(&mut self, ctx: Context);
}

impl ContextStore for Vec<Context> {
    fn add(&mut self, ctx: Context) {
        self.push(ctx);
    }
}

/// The engine services available to an executing operation: the solver plus
/// the failure/policy callbacks. The context itself travels separately so
/// that forked states can own theirs.
pub struct Env<'a, S: Solver> {
    pub solver: &'a S,
    pub logger: &'a mut dyn FailureLogger,
    pub policy: &'a mut dyn ExecutionPolicy,
}

impl<'a, S: Solver> Env<'a, S> {
    /// Checks whether `assertion` is feasible together with the path
    /// condition and, if so, reports it as a failure with a model attached.
    pub fn log_failure(
        &mut self,
        ctx: &mut Context,
        assertion: Assertion,
        message: &str,
    ) -> Result<(), SolverError> {
        let result = ctx.resolve(self.solver, &assertion)?;
        if let ModelResult::Sat(model) = result {
            let failure = Failure::new(assertion, message);
            self.logger.log_failure(model.as_ref(), ctx, &failure);
            self.policy
                .on_path_complete(ctx, PathOutcome::Fail, Some(&failure.assertion));
        }
        Ok(())
    }
}
