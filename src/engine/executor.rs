//! The execution loop: dispatches LIR instructions against the current
//! context, driving the transform builder for memory accesses and forking
//! at data-dependent branches.

use super::context::{Context, StackFrame};
use super::transform::{Argument, TransformBuilder};
use super::{ContextStore, Env, ExecutionPolicy, FailureLogger, PathOutcome};
use crate::assertion::Assertion;
use crate::ir::{BinaryOp, ICmpOp, TermRef, Type};
use crate::lir::{Instruction, Operand, Param};
use crate::memory::{HeapId, Pointer};
use crate::solver::{Solver, SolverError, SolverResult};
use crate::value::{LirScalar, LirValue};
use log::trace;

pub mod defaults {
    pub const MAX_CALL_DEPTH: usize = 256;
    pub const KILL_PATH_ON_INVALID_POINTER: bool = false;
}

#[derive(Clone, Copy, Debug)]
pub struct ExecutorOptions {
    /// Paths exceeding this call depth are completed as dead.
    pub max_call_depth: usize,
    /// Stop a path entirely once an invalid pointer access was reported
    /// instead of continuing into the in-bounds successors.
    pub kill_path_on_invalid_pointer: bool,
}

impl Default for ExecutorOptions {
    fn default() -> ExecutorOptions {
        ExecutorOptions {
            max_call_depth: defaults::MAX_CALL_DEPTH,
            kill_path_on_invalid_pointer: defaults::KILL_PATH_ON_INVALID_POINTER,
        }
    }
}

/// Drives one context until its path completes or forks. Sibling contexts
/// produced by forks go to the store for independent continuation.
pub struct Executor<'a, S: Solver> {
    ctx: Option<Context>,
    solver: &'a S,
    logger: &'a mut dyn FailureLogger,
    policy: &'a mut dyn ExecutionPolicy,
    store: &'a mut dyn ContextStore,
    options: ExecutorOptions,
}

impl<'a, S: Solver> Executor<'a, S> {
    pub fn new(
        ctx: Context,
        solver: &'a S,
        logger: &'a mut dyn FailureLogger,
        policy: &'a mut dyn ExecutionPolicy,
        store: &'a mut dyn ContextStore,
        options: ExecutorOptions,
    ) -> Executor<'a, S> {
        Executor {
            ctx: Some(ctx),
            solver,
            logger,
            policy,
            store,
            options,
        }
    }

    /// Runs until this context's path completes (or is handed off to the
    /// store as multiple forked siblings).
    pub fn run(mut self) -> Result<(), SolverError> {
        while self.ctx.is_some() {
            self.step()?;
        }
        Ok(())
    }

    fn ctx(&self) -> &Context {
        self.ctx.as_ref().expect("stepping a completed path")
    }

    fn ctx_mut(&mut self) -> &mut Context {
        self.ctx.as_mut().expect("stepping a completed path")
    }

    fn advance(&mut self) {
        self.ctx_mut().top_frame_mut().inst += 1;
    }

    fn assign(&mut self, dest: crate::lir::ValueId, value: LirValue) {
        self.ctx_mut().top_frame_mut().insert(dest, value);
    }

    fn complete(&mut self, outcome: PathOutcome, assertion: Option<&Assertion>) {
        let ctx = self.ctx.take().expect("path already complete");
        trace!("path complete: {:?}", outcome);
        self.policy.on_path_complete(&ctx, outcome, assertion);
    }

    fn eval(&self, operand: &Operand) -> LirValue {
        match operand {
            Operand::Value(id) => self.ctx().lookup(*id),
            Operand::ConstInt { width, value } => {
                LirValue::term(TermRef::const_int(*width, *value))
            }
            Operand::ConstFloat { ty, bits } => {
                LirValue::term(TermRef::const_float(ty.clone(), *bits))
            }
            // each undef use is an independent unconstrained value, so mint
            // fresh numbered symbols instead of sharing one undef node
            Operand::Undef { ty } => match ty {
                Type::Pointer => {
                    let width = self.ctx().layout().pointer_width;
                    LirValue::pointer(Pointer::unresolved(TermRef::fresh(Type::Int(width))))
                }
                Type::Vector { elem, count } => LirValue::Vector(
                    (0..*count)
                        .map(|_| LirScalar::Term(TermRef::fresh((**elem).clone())))
                        .collect(),
                ),
                _ => LirValue::term(TermRef::fresh(ty.clone())),
            },
        }
    }

    /// Evaluates an operand down to a single term; pointers lower to their
    /// address.
    fn eval_term(&self, operand: &Operand) -> TermRef {
        let value = self.eval(operand);
        let ctx = self.ctx();
        value
            .scalar()
            .to_term(&ctx.heaps, ctx.layout().pointer_width)
    }

    fn scalar_term(&self, scalar: &LirScalar) -> TermRef {
        let ctx = self.ctx();
        scalar.to_term(&ctx.heaps, ctx.layout().pointer_width)
    }

    fn step(&mut self) -> Result<(), SolverError> {
        let instruction = {
            let ctx = self.ctx();
            let frame = ctx.top_frame();
            let function = ctx.module.function(frame.function);
            let block = function.block(frame.block);
            assert!(
                frame.inst < block.instructions.len(),
                "basic block without terminator"
            );
            trace!(
                "[{} b{} i{}] {:?}",
                function.name,
                frame.block.0,
                frame.inst,
                block.instructions[frame.inst]
            );
            block.instructions[frame.inst].clone()
        };

        match &instruction {
            Instruction::Binary { dest, op, lhs, rhs } => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                if matches!(
                    *op,
                    BinaryOp::UDiv | BinaryOp::SDiv | BinaryOp::URem | BinaryOp::SRem
                ) {
                    self.guard_division(&r)?;
                    if self.ctx.is_none() {
                        return Ok(());
                    }
                }
                let value = self.apply_binary(*op, &l, &r);
                self.assign(*dest, value);
                self.advance();
            }
            Instruction::Unary {
                dest,
                op,
                ty,
                operand,
            } => {
                let v = self.eval(operand);
                let value = match (&v, ty) {
                    (LirValue::Vector(elems), Type::Vector { elem, .. }) => LirValue::Vector(
                        elems
                            .iter()
                            .map(|s| {
                                LirScalar::Term(TermRef::unop(
                                    *op,
                                    (**elem).clone(),
                                    self.scalar_term(s),
                                ))
                            })
                            .collect(),
                    ),
                    _ => LirValue::term(TermRef::unop(
                        *op,
                        ty.clone(),
                        self.scalar_term(v.scalar()),
                    )),
                };
                self.assign(*dest, value);
                self.advance();
            }
            Instruction::ICmp { dest, op, lhs, rhs } => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                let value = match (&l, &r) {
                    (LirValue::Vector(a), LirValue::Vector(b)) => LirValue::Vector(
                        a.iter()
                            .zip(b)
                            .map(|(x, y)| {
                                LirScalar::Term(TermRef::icmp(
                                    *op,
                                    self.scalar_term(x),
                                    self.scalar_term(y),
                                ))
                            })
                            .collect(),
                    ),
                    _ => LirValue::term(TermRef::icmp(
                        *op,
                        self.scalar_term(l.scalar()),
                        self.scalar_term(r.scalar()),
                    )),
                };
                self.assign(*dest, value);
                self.advance();
            }
            Instruction::FCmp { dest, op, lhs, rhs } => {
                let l = self.eval_term(lhs);
                let r = self.eval_term(rhs);
                self.assign(*dest, LirValue::term(TermRef::fcmp(*op, l, r)));
                self.advance();
            }
            Instruction::Select {
                dest,
                cond,
                on_true,
                on_false,
            } => {
                let cond = self.eval_term(cond);
                let t = self.eval(on_true);
                let f = self.eval(on_false);
                let value = match cond.as_const_int() {
                    Some(1) => t,
                    Some(_) => f,
                    None => self.symbolic_select(cond, &t, &f),
                };
                self.assign(*dest, value);
                self.advance();
            }
            Instruction::Alloca { dest, ty, count } => {
                let layout = self.ctx().layout();
                let bytes = layout.type_store_size(ty) * count;
                let size = TermRef::const_int(layout.pointer_width, bytes as u128);
                let ctx = self.ctx_mut();
                let (id, assume) =
                    ctx.heaps
                        .allocate_symbolic(HeapId::Stack, size, layout.pointer_width);
                ctx.add(assume);
                trace!("alloca of {} bytes -> {:?}", bytes, id);
                let zero = TermRef::const_int(layout.pointer_width, 0);
                self.assign(
                    *dest,
                    LirValue::pointer(Pointer::resolved(HeapId::Stack, id, zero)),
                );
                self.advance();
            }
            Instruction::Load { dest, ptr, ty } => {
                let ptr_value = self.eval(ptr);
                self.advance();
                let mut builder = TransformBuilder::new();
                let resolved = builder.resolve(
                    Argument::Immediate(ptr_value),
                    ty.clone(),
                    self.options.kill_path_on_invalid_pointer,
                );
                let value = builder.read(resolved, ty.clone());
                builder.assign(*dest, value);
                self.run_builder(builder)?;
            }
            Instruction::Store { ptr, value, ty } => {
                let ptr_value = self.eval(ptr);
                let stored = self.eval(value);
                self.advance();
                let mut builder = TransformBuilder::new();
                let resolved = builder.resolve(
                    Argument::Immediate(ptr_value),
                    ty.clone(),
                    self.options.kill_path_on_invalid_pointer,
                );
                builder.write(resolved, Argument::Immediate(stored), ty.clone());
                self.run_builder(builder)?;
            }
            Instruction::PtrAdd { dest, ptr, offset } => {
                let base = self.eval(ptr);
                let off = self.eval_term(offset);
                let result = match base.scalar() {
                    LirScalar::Pointer(Pointer::Resolved {
                        heap,
                        alloc,
                        offset,
                    }) => Pointer::resolved(*heap, *alloc, TermRef::add(*offset, off)),
                    LirScalar::Pointer(Pointer::Unresolved { address }) => {
                        Pointer::unresolved(TermRef::add(*address, off))
                    }
                    LirScalar::Term(term) => Pointer::unresolved(TermRef::add(*term, off)),
                };
                self.assign(*dest, LirValue::pointer(result));
                self.advance();
            }
            Instruction::Phi { dest, incoming } => {
                let pred = self
                    .ctx()
                    .top_frame()
                    .pred_block
                    .expect("phi executed without a predecessor block");
                let operand = incoming
                    .iter()
                    .find(|(block, _)| *block == pred)
                    .map(|(_, operand)| operand.clone())
                    .unwrap_or_else(|| panic!("phi has no incoming value for block {:?}", pred));
                let value = self.eval(&operand);
                self.assign(*dest, value);
                self.advance();
            }
            Instruction::Call { dest, callee, args } => {
                if self.ctx().stack.len() >= self.options.max_call_depth {
                    trace!("maximum call depth reached");
                    self.complete(PathOutcome::Dead, None);
                    return Ok(());
                }
                let module = self.ctx().module.clone();
                let (id, function) = module
                    .function_named(callee)
                    .unwrap_or_else(|| panic!("call to unknown function {}", callee));
                let params: Vec<Param> = function.params.clone();
                assert_eq!(args.len(), params.len(), "call arity mismatch");
                let arguments: Vec<LirValue> = args.iter().map(|a| self.eval(a)).collect();

                self.advance();
                let mut frame = StackFrame::new(id);
                frame.return_dest = *dest;
                for (param, value) in params.iter().zip(arguments) {
                    frame.insert(param.id, value);
                }
                self.ctx_mut().push_frame(frame);
            }
            Instruction::Return { value } => {
                let result = value.as_ref().map(|v| self.eval(v));
                let frame = self.ctx_mut().pop();
                if self.ctx().stack.is_empty() {
                    self.complete(PathOutcome::Success, None);
                    return Ok(());
                }
                if let (Some(dest), Some(result)) = (frame.return_dest, result) {
                    self.assign(dest, result);
                }
            }
            Instruction::Branch { target } => {
                self.ctx_mut().top_frame_mut().jump_to(*target);
            }
            Instruction::CondBranch {
                cond,
                on_true,
                on_false,
            } => {
                let term = self.eval_term(cond);
                if let Some(v) = term.as_const_int() {
                    let target = if v == 1 { *on_true } else { *on_false };
                    self.ctx_mut().top_frame_mut().jump_to(target);
                    return Ok(());
                }
                let on_true = *on_true;
                let on_false = *on_false;
                let mut builder = TransformBuilder::new();
                builder.transform_fork(move |state, env, insert| {
                    for (cond, target) in [(term, on_true), (TermRef::not(term), on_false)] {
                        let mut fork = state.ctx.fork_once();
                        fork.add(Assertion::new(cond));
                        // Unknown keeps the branch: prune only proven-dead arms
                        match fork.check(env.solver, &Assertion::empty())? {
                            SolverResult::Unsat => {
                                trace!("branch to b{} is unreachable", target.0);
                            }
                            _ => {
                                fork.top_frame_mut().jump_to(target);
                                insert(state.fork(fork));
                            }
                        }
                    }
                    Ok(())
                });
                self.run_builder(builder)?;
            }
            Instruction::Assert { cond } => {
                let term = self.eval_term(cond);
                let assertion = Assertion::new(term);
                let negated = assertion.negate();
                let solver = self.solver;
                match self.ctx_mut().check(solver, &negated)? {
                    SolverResult::Sat => {
                        let mut env = Env {
                            solver: self.solver,
                            logger: &mut *self.logger,
                            policy: &mut *self.policy,
                        };
                        let ctx = self.ctx.as_mut().expect("stepping a completed path");
                        env.log_failure(ctx, negated, "assertion failure")?;
                        // failure reported; this path stops here
                        self.ctx = None;
                    }
                    _ => {
                        self.ctx_mut().add(assertion);
                        self.advance();
                    }
                }
            }
            Instruction::Assume { cond } => {
                let term = self.eval_term(cond);
                self.ctx_mut().add(Assertion::new(term));
                let solver = self.solver;
                if self.ctx_mut().check(solver, &Assertion::empty())? == SolverResult::Unsat {
                    self.complete(PathOutcome::Unreachable, None);
                    return Ok(());
                }
                self.advance();
            }
            Instruction::Unreachable => {
                let mut env = Env {
                    solver: self.solver,
                    logger: &mut *self.logger,
                    policy: &mut *self.policy,
                };
                let ctx = self.ctx.as_mut().expect("stepping a completed path");
                env.log_failure(
                    ctx,
                    Assertion::new(TermRef::const_bool(true)),
                    "unreachable code reached",
                )?;
                self.ctx = None;
            }
        }
        Ok(())
    }

    fn apply_binary(&self, op: BinaryOp, lhs: &LirValue, rhs: &LirValue) -> LirValue {
        match (lhs, rhs) {
            (LirValue::Vector(a), LirValue::Vector(b)) => LirValue::Vector(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| {
                        LirScalar::Term(TermRef::binop(
                            op,
                            self.scalar_term(x),
                            self.scalar_term(y),
                        ))
                    })
                    .collect(),
            ),
            _ => LirValue::term(TermRef::binop(
                op,
                self.scalar_term(lhs.scalar()),
                self.scalar_term(rhs.scalar()),
            )),
        }
    }

    fn symbolic_select(&self, cond: TermRef, t: &LirValue, f: &LirValue) -> LirValue {
        match (t, f) {
            (LirValue::Scalar(LirScalar::Term(a)), LirValue::Scalar(LirScalar::Term(b))) => {
                LirValue::term(TermRef::select(cond, *a, *b))
            }
            (LirValue::Scalar(a), LirValue::Scalar(b)) => {
                // pointer arms select over addresses and lose resolution
                let address = TermRef::select(cond, self.scalar_term(a), self.scalar_term(b));
                LirValue::pointer(Pointer::unresolved(address))
            }
            (LirValue::Vector(a), LirValue::Vector(b)) => LirValue::Vector(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| {
                        LirScalar::Term(TermRef::select(
                            cond,
                            self.scalar_term(x),
                            self.scalar_term(y),
                        ))
                    })
                    .collect(),
            ),
            (t, f) => panic!("select over mismatched values {:?} and {:?}", t, f),
        }
    }

    /// Division and remainder need a non-zero divisor; a feasible zero is
    /// reported as a failure and excluded from the continuing path.
    fn guard_division(&mut self, divisor: &LirValue) -> Result<(), SolverError> {
        let term = match divisor {
            LirValue::Scalar(LirScalar::Term(term)) => *term,
            _ => return Ok(()),
        };
        if let Some(value) = term.as_const_int() {
            if value != 0 {
                return Ok(());
            }
        }
        let width = term.ty().bitwidth();
        let zero = TermRef::const_int(width, 0);
        let is_zero = Assertion::new(TermRef::icmp(ICmpOp::Eq, term, zero));

        let solver = self.solver;
        if self.ctx_mut().check(solver, &is_zero)? != SolverResult::Unsat {
            let mut env = Env {
                solver: self.solver,
                logger: &mut *self.logger,
                policy: &mut *self.policy,
            };
            let ctx = self.ctx.as_mut().expect("stepping a completed path");
            env.log_failure(ctx, is_zero.clone(), "division by zero")?;
        }

        if term.as_const_int() == Some(0) {
            // constantly zero: the failure is the whole story of this path
            self.ctx = None;
            return Ok(());
        }
        self.ctx_mut().add(is_zero.negate());
        Ok(())
    }

    fn run_builder(&mut self, builder: TransformBuilder<S>) -> Result<(), SolverError> {
        let mut outputs = {
            let mut env = Env {
                solver: self.solver,
                logger: &mut *self.logger,
                policy: &mut *self.policy,
            };
            let ctx = self.ctx.as_ref().expect("stepping a completed path");
            builder.execute(ctx, &mut env)?
        };
        match outputs.len() {
            0 => self.complete(PathOutcome::Dead, None),
            1 => self.ctx = Some(outputs.pop().expect("one output")),
            n => {
                trace!("execution step forked into {} contexts", n);
                for ctx in outputs {
                    self.store.add(ctx);
                }
                self.ctx = None;
            }
        }
        Ok(())
    }
}
