//! Path-forking symbolic execution core for a typed, SSA-form low-level
//! IR.
//!
//! The engine explores feasible execution paths of a program symbolically:
//! data-dependent branches and aliasing pointer accesses fork the current
//! [`engine::Context`] into independent successors, an external SMT solver
//! prunes infeasible paths, and detected violations are reported together
//! with a counterexample model.

#[macro_use]
pub mod util;

pub mod assertion;
pub mod engine;
pub mod ir;
pub mod lir;
pub mod memory;
pub mod solver;
pub mod value;
