//! Solver facade: feasibility checks and model extraction over the path
//! condition, with the IR-to-SMT translation layer behind it.

pub mod sexp;
pub mod translate;
pub mod z3;

pub use self::z3::Z3Process;

use crate::assertion::{Assertion, AssertionList};
use crate::ir::Symbol;
use std::io;
use thiserror::Error;

/// A concrete value decoded from a solver model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelValue {
    Int { value: u128, width: u32 },
    Float { bits: u64, exp: u32, sig: u32 },
    Bytes(Vec<u8>),
}

impl ModelValue {
    /// The value packed into a u64 where it fits; bytes are read
    /// little-endian.
    pub fn as_u64(&self) -> Option<u64> {
        use byteorder::{ByteOrder, LittleEndian};
        match self {
            ModelValue::Int { value, width } if *width <= 64 => Some(*value as u64),
            ModelValue::Int { .. } => None,
            ModelValue::Float { bits, .. } => Some(*bits),
            ModelValue::Bytes(bytes) if !bytes.is_empty() && bytes.len() <= 8 => {
                Some(LittleEndian::read_uint(bytes, bytes.len()))
            }
            ModelValue::Bytes(_) => None,
        }
    }
}

/// Assignment of values to symbolic constants satisfying a SAT query.
pub trait Model {
    /// Looks up the value bound to `symbol`. For array symbols the number
    /// of bytes to read must be supplied.
    fn lookup(&self, symbol: &Symbol, size: Option<usize>) -> Option<ModelValue>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverResult {
    Sat,
    Unsat,
    Unknown,
}

/// Result of a query that also asked for a model.
pub enum ModelResult {
    Sat(Box<dyn Model>),
    Unsat,
    Unknown,
}

impl ModelResult {
    pub fn kind(&self) -> SolverResult {
        match self {
            ModelResult::Sat(_) => SolverResult::Sat,
            ModelResult::Unsat => SolverResult::Unsat,
            ModelResult::Unknown => SolverResult::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("failed to launch solver process: {0}")]
    Spawn(String),

    #[error("solver pipe failed with IO error: {0}")]
    Io(String),

    #[error("malformed solver response: {0}")]
    Malformed(String),
}

impl From<io::Error> for SolverError {
    fn from(err: io::Error) -> SolverError {
        SolverError::Io(err.to_string())
    }
}

/// The reasoning backend as seen by the execution engine.
///
/// `check` answers feasibility only; `resolve` also produces a model on
/// SAT. Implementations must call [`AssertionList::mark_proven`] after a
/// SAT answer to a query with an empty extra assertion; that is what makes
/// the `unproven()` fast path here sound.
pub trait Solver {
    fn name(&self) -> &'static str;

    fn resolve(
        &self,
        assertions: &mut AssertionList,
        extra: &Assertion,
    ) -> Result<ModelResult, SolverError>;

    fn check(
        &self,
        assertions: &mut AssertionList,
        extra: &Assertion,
    ) -> Result<SolverResult, SolverError> {
        if extra.is_constant_value(false) {
            return Ok(SolverResult::Unsat);
        }
        if extra.is_constant_value(true) {
            if assertions.unproven().is_empty() {
                return Ok(SolverResult::Sat);
            }
            return Ok(self.resolve(assertions, &Assertion::empty())?.kind());
        }

        let checkpoint = assertions.checkpoint();
        assertions.insert(extra.clone());
        let result = if assertions.unproven().is_empty() {
            Ok(SolverResult::Sat)
        } else {
            self.resolve(assertions, &Assertion::empty())
                .map(|r| r.kind())
        };
        assertions.restore(checkpoint);
        result
    }
}
