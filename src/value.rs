//! Register values: what an SSA name is bound to in a stack frame.
//!
//! A scalar is either a plain symbolic term or a pointer into the abstract
//! heap; vectors and aggregates nest them.

use crate::memory::{MemHeaps, Pointer};
use crate::ir::TermRef;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LirScalar {
    Term(TermRef),
    Pointer(Pointer),
}

impl LirScalar {
    pub fn term(&self) -> TermRef {
        match self {
            LirScalar::Term(term) => *term,
            LirScalar::Pointer(_) => panic!("expected a term, found a pointer"),
        }
    }

    pub fn pointer(&self) -> &Pointer {
        match self {
            LirScalar::Pointer(ptr) => ptr,
            LirScalar::Term(_) => panic!("expected a pointer, found a term"),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, LirScalar::Pointer(_))
    }

    /// Lowers the scalar to a term; pointers become their address at the
    /// given width.
    pub fn to_term(&self, heaps: &MemHeaps, pointer_width: u32) -> TermRef {
        match self {
            LirScalar::Term(term) => *term,
            LirScalar::Pointer(ptr) => ptr.address(heaps, pointer_width),
        }
    }
}

impl From<TermRef> for LirScalar {
    fn from(term: TermRef) -> LirScalar {
        LirScalar::Term(term)
    }
}

impl From<Pointer> for LirScalar {
    fn from(ptr: Pointer) -> LirScalar {
        LirScalar::Pointer(ptr)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LirValue {
    Scalar(LirScalar),
    Vector(Vec<LirScalar>),
    Aggregate(Vec<LirValue>),
}

impl LirValue {
    pub fn term(term: TermRef) -> LirValue {
        LirValue::Scalar(LirScalar::Term(term))
    }

    pub fn pointer(ptr: Pointer) -> LirValue {
        LirValue::Scalar(LirScalar::Pointer(ptr))
    }

    pub fn scalar(&self) -> &LirScalar {
        match self {
            LirValue::Scalar(scalar) => scalar,
            other => panic!("expected a scalar value, found {:?}", other),
        }
    }

    /// Copy of the value with every pointer scalar lowered to its address
    /// term. Used before writing values into allocations.
    pub fn lowered(&self, heaps: &MemHeaps, pointer_width: u32) -> LirValue {
        match self {
            LirValue::Scalar(s) => LirValue::term(s.to_term(heaps, pointer_width)),
            LirValue::Vector(elems) => LirValue::Vector(
                elems
                    .iter()
                    .map(|s| LirScalar::Term(s.to_term(heaps, pointer_width)))
                    .collect(),
            ),
            LirValue::Aggregate(members) => LirValue::Aggregate(
                members
                    .iter()
                    .map(|v| v.lowered(heaps, pointer_width))
                    .collect(),
            ),
        }
    }
}

impl From<LirScalar> for LirValue {
    fn from(scalar: LirScalar) -> LirValue {
        LirValue::Scalar(scalar)
    }
}
