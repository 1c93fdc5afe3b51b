//! End-to-end tests against a real `z3` binary. Each test bails out early
//! when no solver is installed, so the suite stays runnable everywhere.

mod common;

use common::{explore, init, RecordingLogger, RecordingPolicy};

use chimera::assertion::{Assertion, AssertionList};
use chimera::engine::{Context, PathOutcome};
use chimera::ir::{ICmpOp, Symbol, TermRef, Type, UnaryOp};
use chimera::lir::{Block, BlockId, DataLayout, Function, Instruction, Module, Operand, Param, ValueId};
use chimera::solver::{ModelResult, ModelValue, Solver, SolverResult, Z3Process};
use std::sync::Arc;

macro_rules! require_z3 {
    () => {
        if !Z3Process::is_available() {
            eprintln!("skipping: no z3 binary on PATH");
            return;
        }
    };
}

#[test]
fn feasibility_checks_answer_sat_and_unsat() {
    init();
    require_z3!();
    let solver = Z3Process::new();

    let x = TermRef::symbolic(Type::Int(32), Symbol::named("fx"));
    let mut list = AssertionList::new();
    list.insert(Assertion::new(TermRef::icmp(
        ICmpOp::Ult,
        x,
        TermRef::const_int(32, 10),
    )));
    list.insert(Assertion::new(TermRef::icmp(
        ICmpOp::Ugt,
        x,
        TermRef::const_int(32, 2),
    )));

    assert_eq!(
        solver.check(&mut list, &Assertion::empty()).unwrap(),
        SolverResult::Sat
    );
    // the SAT answer marked the whole list as proven
    assert!(list.unproven().is_empty());

    let infeasible = Assertion::new(TermRef::icmp(ICmpOp::Eq, x, TermRef::const_int(32, 0)));
    assert_eq!(
        solver.check(&mut list, &infeasible).unwrap(),
        SolverResult::Unsat
    );
    // the failed extra was rolled back
    assert_eq!(
        solver.check(&mut list, &Assertion::empty()).unwrap(),
        SolverResult::Sat
    );
}

#[test]
fn models_decode_integers_including_wide_ones() {
    init();
    require_z3!();
    let solver = Z3Process::new();

    let y = TermRef::symbolic(Type::Int(32), Symbol::named("my"));
    let wide = TermRef::symbolic(Type::Int(128), Symbol::named("mw"));
    let mut list = AssertionList::new();
    list.insert(Assertion::new(TermRef::icmp(
        ICmpOp::Eq,
        y,
        TermRef::const_int(32, 42),
    )));
    list.insert(Assertion::new(TermRef::icmp(
        ICmpOp::Eq,
        wide,
        TermRef::const_int(128, 1u128 << 100),
    )));

    match solver.resolve(&mut list, &Assertion::empty()).unwrap() {
        ModelResult::Sat(model) => {
            assert_eq!(
                model.lookup(&Symbol::named("my"), None),
                Some(ModelValue::Int {
                    value: 42,
                    width: 32
                })
            );
            assert_eq!(
                model.lookup(&Symbol::named("mw"), None),
                Some(ModelValue::Int {
                    value: 1u128 << 100,
                    width: 128
                })
            );
            assert_eq!(model.lookup(&Symbol::named("absent"), None), None);
        }
        other => panic!("expected SAT, got {:?}", other.kind()),
    }
}

#[test]
fn nan_models_decode_to_quiet_nan_with_positive_sign() {
    init();
    require_z3!();
    let solver = Z3Process::new();

    let f = TermRef::symbolic(Type::float64(), Symbol::named("nanf"));
    let mut list = AssertionList::new();
    list.insert(Assertion::new(TermRef::unop(
        UnaryOp::FIsNaN,
        Type::bool(),
        f,
    )));

    match solver.resolve(&mut list, &Assertion::empty()).unwrap() {
        ModelResult::Sat(model) => {
            match model.lookup(&Symbol::named("nanf"), None) {
                Some(ModelValue::Float { bits, .. }) => {
                    assert_eq!(bits >> 63, 0, "NaN sign is forced to 0");
                    assert_eq!((bits >> 52) & 0x7ff, 0x7ff, "exponent is all ones");
                    assert_ne!(bits & ((1u64 << 52) - 1), 0, "fraction is non-zero");
                }
                other => panic!("expected a float value, got {:?}", other),
            }
        }
        other => panic!("expected SAT, got {:?}", other.kind()),
    }
}

#[test]
fn array_models_decode_bytes_via_repeated_select() {
    init();
    require_z3!();
    let solver = Z3Process::new();

    let mem = TermRef::symbolic(Type::Array { index_width: 64 }, Symbol::named("amem"));
    let mut list = AssertionList::new();
    for (index, byte) in [(0u128, 0xabu128), (1, 0xcd)] {
        list.insert(Assertion::new(TermRef::icmp(
            ICmpOp::Eq,
            TermRef::load(mem, TermRef::const_int(64, index)),
            TermRef::const_int(8, byte),
        )));
    }

    match solver.resolve(&mut list, &Assertion::empty()).unwrap() {
        ModelResult::Sat(model) => {
            match model.lookup(&Symbol::named("amem"), Some(2)) {
                Some(ModelValue::Bytes(bytes)) => assert_eq!(bytes, vec![0xab, 0xcd]),
                other => panic!("expected bytes, got {:?}", other),
            }
        }
        other => panic!("expected SAT, got {:?}", other.kind()),
    }
}

fn module(functions: Vec<Function>) -> Arc<Module> {
    Arc::new(Module {
        functions,
        layout: DataLayout::default(),
    })
}

#[test]
fn failing_assertion_yields_a_counterexample_model() {
    init();
    require_z3!();
    // main(x): assert x != 3
    let m = module(vec![Function {
        name: "main".into(),
        params: vec![Param {
            id: ValueId(0),
            name: "cex".into(),
            ty: Type::Int(32),
        }],
        blocks: vec![Block {
            instructions: vec![
                Instruction::ICmp {
                    dest: ValueId(1),
                    op: ICmpOp::Ne,
                    lhs: Operand::Value(ValueId(0)),
                    rhs: Operand::int(32, 3),
                },
                Instruction::Assert {
                    cond: Operand::Value(ValueId(1)),
                },
                Instruction::Return { value: None },
            ],
        }],
    }]);

    let solver = Z3Process::new();
    let ctx = Context::for_function(m, "main").unwrap();
    let mut logger = RecordingLogger::probing(Symbol::named("cex"));
    let mut policy = RecordingPolicy::default();
    explore(ctx, &solver, &mut logger, &mut policy).unwrap();

    assert_eq!(logger.messages, vec!["assertion failure"]);
    assert_eq!(
        logger.probed,
        vec![Some(ModelValue::Int { value: 3, width: 32 })]
    );
    assert_eq!(policy.outcomes, vec![PathOutcome::Fail]);
}

#[test]
fn branch_assertions_constrain_each_explored_arm() {
    init();
    require_z3!();
    // main(x): if x <s 5 { assert x <s 6 } else { assert x >=s 5 }
    let m = module(vec![Function {
        name: "main".into(),
        params: vec![Param {
            id: ValueId(0),
            name: "bx".into(),
            ty: Type::Int(32),
        }],
        blocks: vec![
            Block {
                instructions: vec![
                    Instruction::ICmp {
                        dest: ValueId(1),
                        op: ICmpOp::Slt,
                        lhs: Operand::Value(ValueId(0)),
                        rhs: Operand::int(32, 5),
                    },
                    Instruction::CondBranch {
                        cond: Operand::Value(ValueId(1)),
                        on_true: BlockId(1),
                        on_false: BlockId(2),
                    },
                ],
            },
            Block {
                instructions: vec![
                    Instruction::ICmp {
                        dest: ValueId(2),
                        op: ICmpOp::Slt,
                        lhs: Operand::Value(ValueId(0)),
                        rhs: Operand::int(32, 6),
                    },
                    Instruction::Assert {
                        cond: Operand::Value(ValueId(2)),
                    },
                    Instruction::Return { value: None },
                ],
            },
            Block {
                instructions: vec![
                    Instruction::ICmp {
                        dest: ValueId(3),
                        op: ICmpOp::Sge,
                        lhs: Operand::Value(ValueId(0)),
                        rhs: Operand::int(32, 5),
                    },
                    Instruction::Assert {
                        cond: Operand::Value(ValueId(3)),
                    },
                    Instruction::Return { value: None },
                ],
            },
        ],
    }]);

    let solver = Z3Process::new();
    let ctx = Context::for_function(m, "main").unwrap();
    let mut logger = RecordingLogger::default();
    let mut policy = RecordingPolicy::default();
    explore(ctx, &solver, &mut logger, &mut policy).unwrap();

    assert!(logger.messages.is_empty(), "both arms hold: {:?}", logger.messages);
    assert_eq!(policy.outcomes, vec![PathOutcome::Success; 2]);
}

#[test]
fn aliasing_load_forks_and_each_arm_sees_its_allocation() {
    init();
    require_z3!();
    use chimera::memory::{Allocation, HeapId};

    // two 4-byte allocations at 0 and 16; p constrained to {2, 17}
    let m = module(vec![Function {
        name: "main".into(),
        params: vec![Param {
            id: ValueId(0),
            name: "ap".into(),
            ty: Type::Pointer,
        }],
        blocks: vec![Block {
            instructions: vec![
                Instruction::Load {
                    dest: ValueId(1),
                    ptr: Operand::Value(ValueId(0)),
                    ty: Type::Int(8),
                },
                Instruction::Return { value: None },
            ],
        }],
    }]);

    let mut ctx = Context::for_function(m, "main").unwrap();
    for base in [0u64, 16] {
        ctx.heaps.allocate(
            HeapId::Heap,
            Allocation::new(
                TermRef::const_int(64, base as u128),
                TermRef::const_int(64, 4),
                TermRef::alloc(TermRef::const_int(8, 0), TermRef::const_int(64, 4)),
            ),
        );
    }
    let p = TermRef::symbolic(Type::Int(64), Symbol::named("ap"));
    ctx.add(Assertion::new(TermRef::or(
        TermRef::icmp(ICmpOp::Eq, p, TermRef::const_int(64, 2)),
        TermRef::icmp(ICmpOp::Eq, p, TermRef::const_int(64, 17)),
    )));

    let solver = Z3Process::new();
    let mut logger = RecordingLogger::default();
    let mut policy = RecordingPolicy::default();
    explore(ctx, &solver, &mut logger, &mut policy).unwrap();

    // no invalid access is possible, and exactly two paths complete
    assert!(logger.messages.is_empty());
    assert_eq!(policy.outcomes, vec![PathOutcome::Success; 2]);
}
