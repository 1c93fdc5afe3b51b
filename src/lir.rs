//! The low-level IR consumed by the execution engine.
//!
//! This is the read-only program representation handed to the engine by a
//! front end: typed SSA values, functions split into basic blocks, and the
//! target data layout. Parsing or building this IR from source formats is
//! not this crate's concern.

use crate::ir::{BinaryOp, FCmpOp, ICmpOp, Type, UnaryOp};
use std::fmt;

/// Identity of an SSA value within a function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Index of a basic block within its function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Index of a function within the module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Target data layout: pointer width in bits and byte order.
#[derive(Clone, Copy, Debug)]
pub struct DataLayout {
    pub pointer_width: u32,
    pub little_endian: bool,
}

impl Default for DataLayout {
    fn default() -> DataLayout {
        DataLayout {
            pointer_width: 64,
            little_endian: true,
        }
    }
}

impl DataLayout {
    /// Number of bytes a value of `ty` occupies in memory.
    pub fn type_store_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Int(w) => u64::from((w + 7) / 8),
            Type::Float { exp, sig } => u64::from((exp + sig + 7) / 8),
            Type::Pointer => u64::from(self.pointer_width / 8),
            Type::Vector { elem, count } => self.type_store_size(elem) * u64::from(*count),
            Type::Void => 0,
            t => panic!("type {} has no store size", t),
        }
    }
}

/// An instruction operand: an SSA value or an immediate constant.
#[derive(Clone, Debug)]
pub enum Operand {
    Value(ValueId),
    ConstInt { width: u32, value: u128 },
    ConstFloat { ty: Type, bits: u64 },
    Undef { ty: Type },
}

impl Operand {
    pub fn int(width: u32, value: u128) -> Operand {
        Operand::ConstInt { width, value }
    }
}

impl From<ValueId> for Operand {
    fn from(id: ValueId) -> Operand {
        Operand::Value(id)
    }
}

#[derive(Clone, Debug)]
pub enum Instruction {
    Binary {
        dest: ValueId,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    Unary {
        dest: ValueId,
        op: UnaryOp,
        ty: Type,
        operand: Operand,
    },
    ICmp {
        dest: ValueId,
        op: ICmpOp,
        lhs: Operand,
        rhs: Operand,
    },
    FCmp {
        dest: ValueId,
        op: FCmpOp,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        dest: ValueId,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    /// Stack allocation of `count` elements of `ty`.
    Alloca {
        dest: ValueId,
        ty: Type,
        count: u64,
    },
    Load {
        dest: ValueId,
        ptr: Operand,
        ty: Type,
    },
    Store {
        ptr: Operand,
        value: Operand,
        ty: Type,
    },
    /// Pointer plus byte offset (offset is an integer at pointer width).
    PtrAdd {
        dest: ValueId,
        ptr: Operand,
        offset: Operand,
    },
    Phi {
        dest: ValueId,
        incoming: Vec<(BlockId, Operand)>,
    },
    Call {
        dest: Option<ValueId>,
        callee: String,
        args: Vec<Operand>,
    },
    Branch {
        target: BlockId,
    },
    CondBranch {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },
    Return {
        value: Option<Operand>,
    },
    /// Property that must hold; a feasible violation is a reported failure.
    Assert {
        cond: Operand,
    },
    /// Constraint assumed to hold from here on.
    Assume {
        cond: Operand,
    },
    Unreachable,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub id: ValueId,
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }
}

#[derive(Clone, Debug)]
pub struct Module {
    pub functions: Vec<Function>,
    pub layout: DataLayout,
}

impl Module {
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_named(&self, name: &str) -> Option<(FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (FuncId(i as u32), f))
    }
}
