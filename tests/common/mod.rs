//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chimera::assertion::{Assertion, AssertionList};
use chimera::engine::{Context, ExecutionPolicy, Executor, ExecutorOptions, Failure, FailureLogger, PathOutcome};
use chimera::ir::Symbol;
use chimera::solver::{Model, ModelResult, ModelValue, Solver, SolverError, SolverResult};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Solver answering queries from a pre-recorded script, for deterministic
/// tests of the forking machinery. Panics if the engine issues more
/// queries than scripted.
pub struct ScriptedSolver {
    answers: RefCell<VecDeque<SolverResult>>,
}

impl ScriptedSolver {
    pub fn new(answers: &[SolverResult]) -> ScriptedSolver {
        ScriptedSolver {
            answers: RefCell::new(answers.iter().copied().collect()),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.answers.borrow().is_empty()
    }
}

struct EmptyModel;

impl Model for EmptyModel {
    fn lookup(&self, _symbol: &Symbol, _size: Option<usize>) -> Option<ModelValue> {
        None
    }
}

impl Solver for ScriptedSolver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn resolve(
        &self,
        _assertions: &mut AssertionList,
        extra: &Assertion,
    ) -> Result<ModelResult, SolverError> {
        if extra.is_constant_value(false) {
            return Ok(ModelResult::Unsat);
        }
        let answer = self
            .answers
            .borrow_mut()
            .pop_front()
            .expect("solver script exhausted");
        Ok(match answer {
            SolverResult::Sat => ModelResult::Sat(Box::new(EmptyModel)),
            SolverResult::Unsat => ModelResult::Unsat,
            SolverResult::Unknown => ModelResult::Unknown,
        })
    }
}

/// Records every completed path outcome.
#[derive(Default)]
pub struct RecordingPolicy {
    pub outcomes: Vec<PathOutcome>,
}

impl ExecutionPolicy for RecordingPolicy {
    fn on_path_complete(
        &mut self,
        _ctx: &Context,
        outcome: PathOutcome,
        _assertion: Option<&Assertion>,
    ) {
        self.outcomes.push(outcome);
    }
}

/// Records failure messages and, when configured with a probe symbol, the
/// model value bound to it at each failure.
#[derive(Default)]
pub struct RecordingLogger {
    pub probe: Option<Symbol>,
    pub messages: Vec<String>,
    pub probed: Vec<Option<ModelValue>>,
}

impl RecordingLogger {
    pub fn probing(symbol: Symbol) -> RecordingLogger {
        RecordingLogger {
            probe: Some(symbol),
            messages: Vec::new(),
            probed: Vec::new(),
        }
    }
}

impl FailureLogger for RecordingLogger {
    fn log_failure(&mut self, model: &dyn Model, _ctx: &Context, failure: &Failure) {
        self.messages.push(failure.message.clone());
        if let Some(symbol) = &self.probe {
            self.probed.push(model.lookup(symbol, None));
        }
    }
}

/// Runs `ctx` and every forked sibling it spawns to completion.
pub fn explore<S: Solver>(
    ctx: Context,
    solver: &S,
    logger: &mut RecordingLogger,
    policy: &mut RecordingPolicy,
) -> Result<(), SolverError> {
    let mut pending = vec![ctx];
    while let Some(ctx) = pending.pop() {
        let mut forked = Vec::new();
        Executor::new(
            ctx,
            solver,
            logger,
            policy,
            &mut forked,
            ExecutorOptions::default(),
        )
        .run()?;
        pending.extend(forked);
    }
    Ok(())
}
