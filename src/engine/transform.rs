//! The transform builder: a deferred pipeline of operations over a path
//! state, executed as a depth-first search that may split one context into
//! many.
//!
//! Most operations are declarative descriptors; the generic variants carry
//! closures for the rare cases that need arbitrary state surgery. The
//! interesting one is `Resolve`, which turns a possibly-aliasing pointer
//! access into one forked successor per feasible target allocation.

use super::context::Context;
use super::Env;
use crate::ir::Type;
use crate::lir::ValueId;
use crate::solver::{Solver, SolverError, SolverResult};
use crate::value::LirValue;
use log::trace;
use std::collections::HashMap;

/// Result slot of an operation, usable as a later operation's input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpValue(u32);

/// Input to an operation: an SSA value of the program, the result of an
/// earlier operation, or an immediate.
#[derive(Clone, Debug)]
pub enum Argument {
    Lir(ValueId),
    Op(OpValue),
    Immediate(LirValue),
}

impl From<ValueId> for Argument {
    fn from(id: ValueId) -> Argument {
        Argument::Lir(id)
    }
}

impl From<OpValue> for Argument {
    fn from(value: OpValue) -> Argument {
        Argument::Op(value)
    }
}

impl From<LirValue> for Argument {
    fn from(value: LirValue) -> Argument {
        Argument::Immediate(value)
    }
}

/// One in-flight state of the pipeline DFS: an owned context, the values
/// produced by already-executed operations, and the operation pointer.
pub struct OpState {
    pub ctx: Context,
    values: HashMap<u32, LirValue>,
    inst: usize,
}

impl OpState {
    fn new(ctx: Context) -> OpState {
        OpState {
            ctx,
            values: HashMap::new(),
            inst: 0,
        }
    }

    pub fn lookup(&self, arg: &Argument) -> LirValue {
        match arg {
            Argument::Lir(id) => self.ctx.lookup(*id),
            Argument::Op(value) => self
                .values
                .get(&value.0)
                .unwrap_or_else(|| panic!("operation result {:?} not yet produced", value))
                .clone(),
            Argument::Immediate(value) => value.clone(),
        }
    }

    pub fn insert(&mut self, slot: OpValue, value: LirValue) {
        self.values.insert(slot.0, value);
    }

    /// Slot of the operation currently executing.
    pub fn current(&self) -> OpValue {
        OpValue(self.inst as u32 - 1)
    }

    /// Derived state continuing from the same operation with a different
    /// context.
    pub fn fork(&self, ctx: Context) -> OpState {
        OpState {
            ctx,
            values: self.values.clone(),
            inst: self.inst,
        }
    }
}

type TransformFn<S> = Box<dyn Fn(&mut OpState, &mut Env<S>) -> Result<(), SolverError>>;
type TransformForkFn<S> =
    Box<dyn Fn(OpState, &mut Env<S>, &mut dyn FnMut(OpState)) -> Result<(), SolverError>>;

enum Operation<S: Solver> {
    Assign { dest: ValueId, arg: Argument },
    Read { ptr: Argument, ty: Type },
    Write { ptr: Argument, value: Argument, ty: Type },
    Resolve { ptr: Argument, ty: Type, die_on_failure: bool },
    Transform(TransformFn<S>),
    TransformFork(TransformForkFn<S>),
}

pub struct TransformBuilder<S: Solver> {
    operations: Vec<Operation<S>>,
}

impl<S: Solver> TransformBuilder<S> {
    pub fn new() -> TransformBuilder<S> {
        TransformBuilder {
            operations: Vec::new(),
        }
    }

    fn push(&mut self, op: Operation<S>) -> OpValue {
        self.operations.push(op);
        OpValue(self.operations.len() as u32 - 1)
    }

    /// Binds an SSA value in the top frame to the argument's value.
    pub fn assign<A: Into<Argument>>(&mut self, dest: ValueId, arg: A) {
        self.push(Operation::Assign {
            dest,
            arg: arg.into(),
        });
    }

    /// Typed read through an already-resolved pointer.
    pub fn read<A: Into<Argument>>(&mut self, ptr: A, ty: Type) -> OpValue {
        self.push(Operation::Read {
            ptr: ptr.into(),
            ty,
        })
    }

    /// Typed write through an already-resolved pointer.
    pub fn write<P: Into<Argument>, V: Into<Argument>>(&mut self, ptr: P, value: V, ty: Type) {
        self.push(Operation::Write {
            ptr: ptr.into(),
            value: value.into(),
            ty,
        });
    }

    /// Pointer resolution: validity check, failure reporting, then one
    /// forked successor per feasible target allocation. The result slot
    /// holds the resolved pointer in each successor.
    pub fn resolve<A: Into<Argument>>(
        &mut self,
        ptr: A,
        ty: Type,
        die_on_failure: bool,
    ) -> OpValue {
        self.push(Operation::Resolve {
            ptr: ptr.into(),
            ty,
            die_on_failure,
        })
    }

    /// Generic non-forking step mutating the state in place.
    pub fn transform<F>(&mut self, f: F) -> OpValue
    where
        F: Fn(&mut OpState, &mut Env<S>) -> Result<(), SolverError> + 'static,
    {
        self.push(Operation::Transform(Box::new(f)))
    }

    /// Generic forking step: consumes the state and pushes zero or more
    /// successors through the insert callback.
    pub fn transform_fork<F>(&mut self, f: F) -> OpValue
    where
        F: Fn(OpState, &mut Env<S>, &mut dyn FnMut(OpState)) -> Result<(), SolverError> + 'static,
    {
        self.push(Operation::TransformFork(Box::new(f)))
    }

    /// Runs the recorded pipeline against a fork of `ctx` and returns the
    /// surviving contexts. Zero results mean every path was pruned; one
    /// means execution continues in place; more mean the step forked.
    pub fn execute(&self, ctx: &Context, env: &mut Env<S>) -> Result<Vec<Context>, SolverError> {
        let mut stack = vec![OpState::new(ctx.fork_once())];
        let mut output = Vec::new();

        while let Some(mut state) = stack.pop() {
            if state.inst >= self.operations.len() {
                output.push(state.ctx);
                continue;
            }
            let op = &self.operations[state.inst];
            state.inst += 1;

            match op {
                Operation::Assign { dest, arg } => {
                    let value = state.lookup(arg);
                    state.ctx.top_frame_mut().insert(*dest, value);
                    stack.push(state);
                }
                Operation::Read { ptr, ty } => {
                    let target = state.lookup(ptr).scalar().pointer().clone();
                    let layout = state.ctx.layout();
                    let value = state
                        .ctx
                        .heaps
                        .ptr_allocation(&target)
                        .read(target.offset(), ty, &layout);
                    let slot = state.current();
                    state.insert(slot, value);
                    stack.push(state);
                }
                Operation::Write { ptr, value, ty } => {
                    let target = state.lookup(ptr).scalar().pointer().clone();
                    let layout = state.ctx.layout();
                    let lowered = state
                        .lookup(value)
                        .lowered(&state.ctx.heaps, layout.pointer_width);
                    state
                        .ctx
                        .heaps
                        .ptr_allocation_mut(&target)
                        .write(target.offset(), ty, &lowered, &layout);
                    stack.push(state);
                }
                Operation::Resolve {
                    ptr,
                    ty,
                    die_on_failure,
                } => {
                    self.run_resolve(state, ptr, ty, *die_on_failure, env, &mut stack)?;
                }
                Operation::Transform(f) => {
                    f(&mut state, env)?;
                    stack.push(state);
                }
                Operation::TransformFork(f) => {
                    f(state, env, &mut |successor| stack.push(successor))?;
                }
            }
        }

        Ok(output)
    }

    fn run_resolve(
        &self,
        mut state: OpState,
        ptr: &Argument,
        ty: &Type,
        die_on_failure: bool,
        env: &mut Env<S>,
        stack: &mut Vec<OpState>,
    ) -> Result<(), SolverError> {
        let layout = state.ctx.layout();
        let len = layout.type_store_size(ty);
        let slot = state.current();
        let unresolved = state.lookup(ptr).scalar().pointer().clone();

        let valid = state.ctx.heaps.check_valid(&unresolved, len);
        let invalid = valid.negate();
        // An Unknown answer still reports the potential failure: invalid
        // accesses are flagged conservatively.
        if state.ctx.check(env.solver, &invalid)? != SolverResult::Unsat {
            env.log_failure(&mut state.ctx, invalid, "invalid pointer load/store")?;

            if die_on_failure {
                // Out-of-bounds pointers tend to alias almost everything,
                // which produces fork storms without useful bug reports.
                return Ok(());
            }
        }

        let resolved = state.ctx.resolve_ptr(env.solver, &unresolved)?;
        trace!("resolve forks into {} successors", resolved.len());

        let forks = state.ctx.fork(resolved.len());
        for (mut fork, target) in forks.into_iter().zip(resolved) {
            let inbounds = fork
                .heaps
                .ptr_allocation(&target)
                .check_inbounds(target.offset(), len);
            fork.add(inbounds);

            if !unresolved.is_resolved() {
                fork.backprop(&unresolved, &target);
            }

            let mut successor = state.fork(fork);
            successor.insert(slot, LirValue::pointer(target));
            stack.push(successor);
        }
        Ok(())
    }
}

impl<S: Solver> Default for TransformBuilder<S> {
    fn default() -> TransformBuilder<S> {
        TransformBuilder::new()
    }
}
