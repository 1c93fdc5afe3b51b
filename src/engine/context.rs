//! A single path's execution state: stack, heap and path condition.

use crate::assertion::{Assertion, AssertionList};
use crate::ir::{ICmpOp, Symbol, TermRef, Type};
use crate::lir::{BlockId, DataLayout, FuncId, Module, ValueId};
use crate::memory::{MemHeaps, Pointer};
use crate::solver::{ModelResult, Solver, SolverError, SolverResult};
use crate::value::{LirScalar, LirValue};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

/// One function activation: the SSA environment plus control position.
#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: FuncId,
    pub block: BlockId,
    /// Predecessor block, consulted by phi nodes.
    pub pred_block: Option<BlockId>,
    /// Index of the next instruction within the current block.
    pub inst: usize,
    /// Where the caller wants the return value.
    pub return_dest: Option<ValueId>,
    values: HashMap<ValueId, LirValue>,
}

impl StackFrame {
    pub fn new(function: FuncId) -> StackFrame {
        StackFrame {
            function,
            block: BlockId(0),
            pred_block: None,
            inst: 0,
            return_dest: None,
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: ValueId, value: LirValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: ValueId) -> Option<&LirValue> {
        self.values.get(&id)
    }

    pub fn lookup(&self, id: ValueId) -> &LirValue {
        self.values
            .get(&id)
            .unwrap_or_else(|| panic!("use of unassigned SSA value {}", id))
    }

    pub fn jump_to(&mut self, target: BlockId) {
        self.pred_block = Some(self.block);
        self.block = target;
        self.inst = 0;
    }
}

/// Exclusive owner of one exploration path's state. Forking is a value
/// copy; terms are shared handles, so copies are cheap and fully
/// independent afterwards.
#[derive(Clone, Debug)]
pub struct Context {
    pub stack: Vec<StackFrame>,
    pub assertions: AssertionList,
    pub heaps: MemHeaps,
    pub module: Arc<Module>,
}

impl Context {
    pub fn new(module: Arc<Module>) -> Context {
        Context {
            stack: Vec::new(),
            assertions: AssertionList::new(),
            heaps: MemHeaps::new(),
            module,
        }
    }

    /// Context poised at the entry of `name`, with every parameter bound to
    /// a fresh symbolic value named after it.
    pub fn for_function(module: Arc<Module>, name: &str) -> Option<Context> {
        let (id, function) = module.function_named(name)?;
        let pointer_width = module.layout.pointer_width;
        let mut frame = StackFrame::new(id);
        for param in &function.params {
            frame.insert(param.id, symbolic_value(&param.ty, &param.name, pointer_width));
        }
        let mut ctx = Context::new(module);
        ctx.stack.push(frame);
        Some(ctx)
    }

    pub fn layout(&self) -> DataLayout {
        self.module.layout
    }

    pub fn top_frame(&self) -> &StackFrame {
        self.stack.last().expect("empty call stack")
    }

    pub fn top_frame_mut(&mut self) -> &mut StackFrame {
        self.stack.last_mut().expect("empty call stack")
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack.push(frame);
    }

    /// Discards the top frame. Any return value must already have been
    /// installed in the caller frame.
    pub fn pop(&mut self) -> StackFrame {
        self.stack.pop().expect("pop from empty call stack")
    }

    pub fn lookup(&self, id: ValueId) -> LirValue {
        self.top_frame().lookup(id).clone()
    }

    pub fn add(&mut self, assertion: Assertion) {
        self.assertions.insert(assertion);
    }

    /// Independent copy with the same path condition.
    pub fn fork_once(&self) -> Context {
        self.clone()
    }

    pub fn fork(&self, n: usize) -> Vec<Context> {
        (0..n).map(|_| self.clone()).collect()
    }

    /// Pins an unresolved pointer to a freshly resolved candidate by
    /// asserting that their addresses coincide, strengthening all later
    /// queries on this path.
    pub fn backprop(&mut self, unresolved: &Pointer, resolved: &Pointer) {
        assert!(!unresolved.is_resolved() && resolved.is_resolved());
        let width = self.module.layout.pointer_width;
        let address = unresolved.offset();
        let pinned = resolved.address(&self.heaps, width);
        self.add(Assertion::new(TermRef::icmp(ICmpOp::Eq, address, pinned)));
    }

    /// Feasibility of the path condition together with `extra`.
    pub fn check<S: Solver + ?Sized>(
        &mut self,
        solver: &S,
        extra: &Assertion,
    ) -> Result<SolverResult, SolverError> {
        solver.check(&mut self.assertions, extra)
    }

    /// Same query, but asks for a model on SAT.
    pub fn resolve<S: Solver + ?Sized>(
        &mut self,
        solver: &S,
        extra: &Assertion,
    ) -> Result<ModelResult, SolverError> {
        solver.resolve(&mut self.assertions, extra)
    }

    /// Maps a possibly-unresolved pointer to every allocation it can feasibly
    /// point into under the current path condition, in deterministic heap
    /// order. Resolved pointers map to themselves.
    pub fn resolve_ptr<S: Solver + ?Sized>(
        &mut self,
        solver: &S,
        ptr: &Pointer,
    ) -> Result<Vec<Pointer>, SolverError> {
        if ptr.is_resolved() {
            return Ok(vec![ptr.clone()]);
        }
        let address = ptr.offset();
        let candidates: Vec<_> = self
            .heaps
            .iter_allocations()
            .map(|(heap, alloc, allocation)| {
                let contained = allocation
                    .contains(address, 1)
                    .value()
                    .expect("contains is never empty");
                (heap, alloc, contained, allocation.base)
            })
            .collect();

        let mut resolved = Vec::new();
        for (heap, alloc, contained, base) in candidates {
            // an Unknown answer keeps the candidate: feasibility checks do
            // not prune conservatively
            match self.check(solver, &Assertion::new(contained))? {
                SolverResult::Unsat => {}
                _ => {
                    let offset = TermRef::sub(address, base);
                    resolved.push(Pointer::resolved(heap, alloc, offset));
                }
            }
        }
        trace!(
            "resolved pointer {} into {} candidate allocations",
            address,
            resolved.len()
        );
        Ok(resolved)
    }
}

fn symbolic_value(ty: &Type, name: &str, pointer_width: u32) -> LirValue {
    match ty {
        Type::Int(_) | Type::Float { .. } => {
            LirValue::term(TermRef::symbolic(ty.clone(), Symbol::named(name)))
        }
        Type::Pointer => LirValue::pointer(Pointer::unresolved(TermRef::symbolic(
            Type::Int(pointer_width),
            Symbol::named(name),
        ))),
        Type::Vector { elem, count } => LirValue::Vector(
            (0..*count)
                .map(|i| {
                    LirScalar::Term(TermRef::symbolic(
                        (**elem).clone(),
                        Symbol::named(format!("{}[{}]", name, i)),
                    ))
                })
                .collect(),
        ),
        t => panic!("cannot make a symbolic parameter of type {}", t),
    }
}
