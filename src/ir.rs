//! Hash-consed symbolic IR.
//!
//! Terms form an immutable DAG over bit-vectors, IEEE floats and
//! byte-indexed arrays. Every term lives in a global interning pool and is
//! referred to by a small copyable [`TermRef`] handle; constructing a term
//! that is structurally equal to an existing one yields the same handle.
//! All trivial constant folds happen at construction time, so downstream
//! code can rely on e.g. `add(3, 4)` being the same term as `7`.

use indexmap::IndexSet;
use lazy_static::lazy_static;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Type of a term.
///
/// `Float { exp, sig }` counts the significand including the hidden bit, so
/// an IEEE double is `Float { exp: 11, sig: 53 }`. `Array` elements are
/// always 8 bits wide; only the index width varies.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int(u32),
    Float { exp: u32, sig: u32 },
    Array { index_width: u32 },
    Pointer,
    Void,
    Vector { elem: Box<Type>, count: u32 },
    Function,
}

impl Type {
    pub const fn bool() -> Type {
        Type::Int(1)
    }

    pub const fn float32() -> Type {
        Type::Float { exp: 8, sig: 24 }
    }

    pub const fn float64() -> Type {
        Type::Float { exp: 11, sig: 53 }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    /// Total bit width of an integer or float type.
    pub fn bitwidth(&self) -> u32 {
        match self {
            Type::Int(w) => *w,
            Type::Float { exp, sig } => exp + sig,
            t => panic!("type {:?} has no bit width", t),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Int(w) => write!(f, "i{}", w),
            Type::Float { exp, sig } => write!(f, "f{}:{}", exp, sig),
            Type::Array { index_width } => write!(f, "[i{} x i8]", index_width),
            Type::Pointer => write!(f, "ptr"),
            Type::Void => write!(f, "void"),
            Type::Vector { elem, count } => write!(f, "<{} x {}>", count, elem),
            Type::Function => write!(f, "fn"),
        }
    }
}

/// A named or numbered symbolic constant identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Named(String),
    Numbered(u64),
}

impl Symbol {
    pub fn named<S: Into<String>>(name: S) -> Symbol {
        Symbol::Named(name.into())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Symbol::Named(name) => write!(f, "{}", name),
            Symbol::Numbered(n) => write!(f, "#{}", n),
        }
    }
}

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(0);

/// Hands out a process-unique numbered symbol.
pub fn fresh_symbol() -> Symbol {
    Symbol::Numbered(NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    FNeg,
    FIsNaN,
    Trunc,
    ZExt,
    SExt,
    Bitcast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinaryOp {
    pub fn is_float_op(&self) -> bool {
        use BinaryOp::*;
        matches!(self, FAdd | FSub | FMul | FDiv | FRem)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ICmpOp {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FCmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Structural payload of a term node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TermKind {
    ConstInt { value: u128 },
    ConstFloat { bits: u64 },
    Undef,
    Symbolic(Symbol),
    Unary { op: UnaryOp, operand: TermRef },
    Binary { op: BinaryOp, lhs: TermRef, rhs: TermRef },
    ICmp { op: ICmpOp, lhs: TermRef, rhs: TermRef },
    FCmp { op: FCmpOp, lhs: TermRef, rhs: TermRef },
    Select { cond: TermRef, on_true: TermRef, on_false: TermRef },
    Load { array: TermRef, index: TermRef },
    Store { array: TermRef, index: TermRef, value: TermRef },
    FixedArray { elems: Vec<TermRef> },
    Alloc { default: TermRef, size: TermRef },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TermData {
    pub kind: TermKind,
    pub ty: Type,
}

/// Handle into the global term pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermRef(NonZeroU32);

impl fmt::Debug for TermRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "t{}", self.index())
    }
}

#[derive(Default)]
struct TermPool {
    terms: IndexSet<TermData>,
}

lazy_static! {
    static ref POOL: RwLock<TermPool> = RwLock::new(TermPool::default());
}

fn intern(data: TermData) -> TermRef {
    let mut pool = POOL.write().expect("term pool poisoned");
    let (index, _) = pool.terms.insert_full(data);
    TermRef::from_index(index)
}

fn mask(width: u32) -> u128 {
    assert!(width >= 1 && width <= 128, "unsupported bit width {}", width);
    if width == 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

fn as_signed(value: u128, width: u32) -> i128 {
    let shift = 128 - width;
    ((value << shift) as i128) >> shift
}

impl TermRef {
    fn from_index(index: usize) -> TermRef {
        TermRef(NonZeroU32::new((index + 1) as u32).expect("term pool overflow"))
    }

    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    pub fn data(self) -> TermData {
        POOL.read()
            .expect("term pool poisoned")
            .terms
            .get_index(self.index())
            .expect("invalid term reference")
            .clone()
    }

    pub fn ty(self) -> Type {
        self.data().ty
    }

    pub fn kind(self) -> TermKind {
        self.data().kind
    }

    pub fn as_const_int(self) -> Option<u128> {
        match self.kind() {
            TermKind::ConstInt { value } => Some(value),
            _ => None,
        }
    }

    /// True iff this is the 1-bit integer constant `value`.
    pub fn is_constant_value(self, value: bool) -> bool {
        self.ty() == Type::bool() && self.as_const_int() == Some(value as u128)
    }

    // ---- constructors ----

    pub fn const_int(width: u32, value: u128) -> TermRef {
        intern(TermData {
            kind: TermKind::ConstInt {
                value: value & mask(width),
            },
            ty: Type::Int(width),
        })
    }

    pub fn const_bool(value: bool) -> TermRef {
        TermRef::const_int(1, value as u128)
    }

    /// Float constant from raw IEEE bits.
    pub fn const_float(ty: Type, bits: u64) -> TermRef {
        assert!(ty.is_float(), "const_float requires a float type");
        let width = ty.bitwidth();
        assert!(width <= 64, "unsupported float width {}", width);
        let bits = if width == 64 {
            bits
        } else {
            bits & ((1u64 << width) - 1)
        };
        intern(TermData {
            kind: TermKind::ConstFloat { bits },
            ty,
        })
    }

    pub fn const_f64(value: f64) -> TermRef {
        TermRef::const_float(Type::float64(), value.to_bits())
    }

    pub fn undef(ty: Type) -> TermRef {
        intern(TermData {
            kind: TermKind::Undef,
            ty,
        })
    }

    pub fn symbolic(ty: Type, symbol: Symbol) -> TermRef {
        assert!(
            ty.is_int() || ty.is_float() || ty.is_array(),
            "cannot make symbolic constants of type {}",
            ty
        );
        intern(TermData {
            kind: TermKind::Symbolic(symbol),
            ty,
        })
    }

    /// Fresh numbered symbolic constant of the given type.
    pub fn fresh(ty: Type) -> TermRef {
        TermRef::symbolic(ty, fresh_symbol())
    }

    pub fn binop(op: BinaryOp, lhs: TermRef, rhs: TermRef) -> TermRef {
        let ty = lhs.ty();
        assert_eq!(ty, rhs.ty(), "binop operand types differ");
        if op.is_float_op() {
            assert!(ty.is_float(), "float binop on {}", ty);
        } else {
            assert!(ty.is_int(), "integer binop on {}", ty);
            let width = ty.bitwidth();
            if let (Some(a), Some(b)) = (lhs.as_const_int(), rhs.as_const_int()) {
                if let Some(value) = fold_int_binop(op, a, b, width) {
                    return TermRef::const_int(width, value);
                }
            }
            // boolean combinator folds
            if ty == Type::bool() {
                match op {
                    BinaryOp::And => {
                        if lhs.is_constant_value(true) {
                            return rhs;
                        }
                        if rhs.is_constant_value(true) {
                            return lhs;
                        }
                        if lhs.is_constant_value(false) || rhs.is_constant_value(false) {
                            return TermRef::const_bool(false);
                        }
                    }
                    BinaryOp::Or => {
                        if lhs.is_constant_value(false) {
                            return rhs;
                        }
                        if rhs.is_constant_value(false) {
                            return lhs;
                        }
                        if lhs.is_constant_value(true) || rhs.is_constant_value(true) {
                            return TermRef::const_bool(true);
                        }
                    }
                    _ => {}
                }
            }
        }
        intern(TermData {
            kind: TermKind::Binary { op, lhs, rhs },
            ty,
        })
    }

    pub fn unop(op: UnaryOp, ty: Type, operand: TermRef) -> TermRef {
        let src = operand.ty();
        match op {
            UnaryOp::Not => {
                assert!(src.is_int(), "not on {}", src);
                assert_eq!(ty, src);
                if let Some(v) = operand.as_const_int() {
                    return TermRef::const_int(src.bitwidth(), !v);
                }
                // not(not x) = x
                if let TermKind::Unary {
                    op: UnaryOp::Not,
                    operand: inner,
                } = operand.kind()
                {
                    return inner;
                }
            }
            UnaryOp::FNeg => {
                assert!(src.is_float(), "fneg on {}", src);
                assert_eq!(ty, src);
                if let TermKind::ConstFloat { bits } = operand.kind() {
                    let sign = 1u64 << (src.bitwidth() - 1);
                    return TermRef::const_float(src, bits ^ sign);
                }
            }
            UnaryOp::FIsNaN => {
                assert!(src.is_float(), "fisnan on {}", src);
                assert_eq!(ty, Type::bool());
                if let TermKind::ConstFloat { bits } = operand.kind() {
                    return TermRef::const_bool(float_is_nan(bits, &src));
                }
            }
            UnaryOp::Trunc => {
                assert!(src.is_int() && ty.is_int(), "trunc {} to {}", src, ty);
                assert!(ty.bitwidth() <= src.bitwidth());
                if ty == src {
                    return operand;
                }
                if let Some(v) = operand.as_const_int() {
                    return TermRef::const_int(ty.bitwidth(), v);
                }
            }
            UnaryOp::ZExt => {
                assert!(src.is_int() && ty.is_int(), "zext {} to {}", src, ty);
                assert!(ty.bitwidth() >= src.bitwidth());
                if ty == src {
                    return operand;
                }
                if let Some(v) = operand.as_const_int() {
                    return TermRef::const_int(ty.bitwidth(), v);
                }
            }
            UnaryOp::SExt => {
                assert!(src.is_int() && ty.is_int(), "sext {} to {}", src, ty);
                assert!(ty.bitwidth() >= src.bitwidth());
                if ty == src {
                    return operand;
                }
                if let Some(v) = operand.as_const_int() {
                    let extended = as_signed(v, src.bitwidth()) as u128;
                    return TermRef::const_int(ty.bitwidth(), extended);
                }
            }
            UnaryOp::Bitcast => {
                assert!(
                    (src.is_int() || src.is_float()) && (ty.is_int() || ty.is_float()),
                    "bitcast {} to {}",
                    src,
                    ty
                );
                assert_eq!(src.bitwidth(), ty.bitwidth(), "bitcast changes width");
                if ty == src {
                    return operand;
                }
                // bitcast(bitcast(x, _), ty) = x when types line up
                if let TermKind::Unary {
                    op: UnaryOp::Bitcast,
                    operand: inner,
                } = operand.kind()
                {
                    if inner.ty() == ty {
                        return inner;
                    }
                }
                match operand.kind() {
                    TermKind::ConstInt { value } if ty.is_float() => {
                        return TermRef::const_float(ty, value as u64);
                    }
                    TermKind::ConstFloat { bits } if ty.is_int() => {
                        return TermRef::const_int(ty.bitwidth(), bits as u128);
                    }
                    _ => {}
                }
            }
        }
        intern(TermData {
            kind: TermKind::Unary { op, operand },
            ty,
        })
    }

    pub fn icmp(op: ICmpOp, lhs: TermRef, rhs: TermRef) -> TermRef {
        let ty = lhs.ty();
        assert_eq!(ty, rhs.ty(), "icmp operand types differ");
        assert!(ty.is_int(), "icmp on {}", ty);
        if let (Some(a), Some(b)) = (lhs.as_const_int(), rhs.as_const_int()) {
            let width = ty.bitwidth();
            return TermRef::const_bool(const_int_compare(op, a, b, width));
        }
        intern(TermData {
            kind: TermKind::ICmp { op, lhs, rhs },
            ty: Type::bool(),
        })
    }

    pub fn fcmp(op: FCmpOp, lhs: TermRef, rhs: TermRef) -> TermRef {
        let ty = lhs.ty();
        assert_eq!(ty, rhs.ty(), "fcmp operand types differ");
        assert!(ty.is_float(), "fcmp on {}", ty);
        intern(TermData {
            kind: TermKind::FCmp { op, lhs, rhs },
            ty: Type::bool(),
        })
    }

    pub fn select(cond: TermRef, on_true: TermRef, on_false: TermRef) -> TermRef {
        assert_eq!(cond.ty(), Type::bool(), "select condition must be i1");
        assert_eq!(on_true.ty(), on_false.ty(), "select arm types differ");
        if cond.is_constant_value(true) {
            return on_true;
        }
        if cond.is_constant_value(false) {
            return on_false;
        }
        intern(TermData {
            ty: on_true.ty(),
            kind: TermKind::Select {
                cond,
                on_true,
                on_false,
            },
        })
    }

    pub fn load(array: TermRef, index: TermRef) -> TermRef {
        let aty = array.ty();
        let index_width = match aty {
            Type::Array { index_width } => index_width,
            t => panic!("load from non-array {}", t),
        };
        assert_eq!(index.ty(), Type::Int(index_width), "load index width");
        // Walk store chains for a known constant index.
        if let Some(i) = index.as_const_int() {
            let mut current = array;
            loop {
                match current.kind() {
                    TermKind::Store {
                        array: prev,
                        index: sidx,
                        value,
                    } => match sidx.as_const_int() {
                        Some(j) if j == i => return value,
                        Some(_) => current = prev,
                        None => break,
                    },
                    TermKind::Alloc { default, .. } => return default,
                    TermKind::FixedArray { elems } => {
                        if let Ok(i) = usize::try_from(i) {
                            if i < elems.len() {
                                return elems[i];
                            }
                        }
                        break;
                    }
                    _ => break,
                }
            }
        }
        intern(TermData {
            kind: TermKind::Load { array, index },
            ty: Type::Int(8),
        })
    }

    pub fn store(array: TermRef, index: TermRef, value: TermRef) -> TermRef {
        let aty = array.ty();
        let index_width = match aty {
            Type::Array { index_width } => index_width,
            t => panic!("store into non-array {}", t),
        };
        assert_eq!(index.ty(), Type::Int(index_width), "store index width");
        assert_eq!(value.ty(), Type::Int(8), "store value must be a byte");
        intern(TermData {
            kind: TermKind::Store {
                array,
                index,
                value,
            },
            ty: aty,
        })
    }

    pub fn fixed_array(index_width: u32, elems: Vec<TermRef>) -> TermRef {
        assert!(
            elems.iter().all(|e| e.ty() == Type::Int(8)),
            "fixed array elements must be bytes"
        );
        intern(TermData {
            kind: TermKind::FixedArray { elems },
            ty: Type::Array { index_width },
        })
    }

    /// Symbolic allocation: an array filled with `default` up to `size`.
    pub fn alloc(default: TermRef, size: TermRef) -> TermRef {
        assert_eq!(default.ty(), Type::Int(8), "alloc default must be a byte");
        let index_width = match size.ty() {
            Type::Int(w) => w,
            t => panic!("alloc size of type {}", t),
        };
        intern(TermData {
            kind: TermKind::Alloc { default, size },
            ty: Type::Array { index_width },
        })
    }

    // ---- conveniences used throughout the heap and engine ----

    pub fn add(lhs: TermRef, rhs: TermRef) -> TermRef {
        TermRef::binop(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: TermRef, rhs: TermRef) -> TermRef {
        TermRef::binop(BinaryOp::Sub, lhs, rhs)
    }

    pub fn and(lhs: TermRef, rhs: TermRef) -> TermRef {
        TermRef::binop(BinaryOp::And, lhs, rhs)
    }

    pub fn or(lhs: TermRef, rhs: TermRef) -> TermRef {
        TermRef::binop(BinaryOp::Or, lhs, rhs)
    }

    pub fn not(operand: TermRef) -> TermRef {
        TermRef::unop(UnaryOp::Not, operand.ty(), operand)
    }

    pub fn zext(width: u32, operand: TermRef) -> TermRef {
        TermRef::unop(UnaryOp::ZExt, Type::Int(width), operand)
    }

    pub fn trunc(width: u32, operand: TermRef) -> TermRef {
        TermRef::unop(UnaryOp::Trunc, Type::Int(width), operand)
    }

    pub fn bitcast(ty: Type, operand: TermRef) -> TermRef {
        TermRef::unop(UnaryOp::Bitcast, ty, operand)
    }
}

fn fold_int_binop(op: BinaryOp, a: u128, b: u128, width: u32) -> Option<u128> {
    use BinaryOp::*;
    let m = mask(width);
    let value = match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        // Division and remainder by zero stay symbolic; feasibility of the
        // surrounding path decides what they mean.
        UDiv => {
            if b == 0 {
                return None;
            }
            a / b
        }
        SDiv => {
            if b == 0 {
                return None;
            }
            as_signed(a, width).wrapping_div(as_signed(b, width)) as u128
        }
        URem => {
            if b == 0 {
                return None;
            }
            a % b
        }
        SRem => {
            if b == 0 {
                return None;
            }
            as_signed(a, width).wrapping_rem(as_signed(b, width)) as u128
        }
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Shl => {
            if b >= width as u128 {
                return None;
            }
            a << b
        }
        LShr => {
            if b >= width as u128 {
                return None;
            }
            a >> b
        }
        AShr => {
            if b >= width as u128 {
                return None;
            }
            (as_signed(a, width) >> b) as u128
        }
        FAdd | FSub | FMul | FDiv | FRem => return None,
    };
    Some(value & m)
}

fn const_int_compare(op: ICmpOp, a: u128, b: u128, width: u32) -> bool {
    let (sa, sb) = (as_signed(a, width), as_signed(b, width));
    match op {
        ICmpOp::Eq => a == b,
        ICmpOp::Ne => a != b,
        ICmpOp::Ugt => a > b,
        ICmpOp::Uge => a >= b,
        ICmpOp::Ult => a < b,
        ICmpOp::Ule => a <= b,
        ICmpOp::Sgt => sa > sb,
        ICmpOp::Sge => sa >= sb,
        ICmpOp::Slt => sa < sb,
        ICmpOp::Sle => sa <= sb,
    }
}

pub(crate) fn float_is_nan(bits: u64, ty: &Type) -> bool {
    let (exp, sig) = match ty {
        Type::Float { exp, sig } => (*exp, *sig),
        t => panic!("float_is_nan on {}", t),
    };
    let frac_bits = sig - 1;
    let exp_mask = (1u64 << exp) - 1;
    let frac_mask = (1u64 << frac_bits) - 1;
    let exponent = (bits >> frac_bits) & exp_mask;
    let fraction = bits & frac_mask;
    exponent == exp_mask && fraction != 0
}

impl fmt::Display for TermRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            TermKind::ConstInt { value } => write!(f, "{}:{}", value, self.ty()),
            TermKind::ConstFloat { bits } => write!(f, "{:#x}:{}", bits, self.ty()),
            TermKind::Undef => write!(f, "undef:{}", self.ty()),
            TermKind::Symbolic(symbol) => write!(f, "{}", symbol),
            TermKind::Unary { op, operand } => write!(f, "({:?} {})", op, operand),
            TermKind::Binary { op, lhs, rhs } => write!(f, "({:?} {} {})", op, lhs, rhs),
            TermKind::ICmp { op, lhs, rhs } => write!(f, "(icmp.{:?} {} {})", op, lhs, rhs),
            TermKind::FCmp { op, lhs, rhs } => write!(f, "(fcmp.{:?} {} {})", op, lhs, rhs),
            TermKind::Select {
                cond,
                on_true,
                on_false,
            } => write!(f, "(select {} {} {})", cond, on_true, on_false),
            TermKind::Load { array, index } => write!(f, "(load {} {})", array, index),
            TermKind::Store {
                array,
                index,
                value,
            } => write!(f, "(store {} {} {})", array, index, value),
            TermKind::FixedArray { elems } => write!(f, "(fixed-array [{} elems])", elems.len()),
            TermKind::Alloc { default, size } => write!(f, "(alloc {} {})", default, size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structurally_equal_terms_share_identity() {
        let x = TermRef::symbolic(Type::Int(32), Symbol::named("x"));
        let y = TermRef::symbolic(Type::Int(32), Symbol::named("y"));
        let a = TermRef::add(x, y);
        let b = TermRef::add(x, y);
        assert_eq!(a, b);
        let c = TermRef::add(y, x);
        assert_ne!(a, c);
    }

    #[test]
    fn const_add_folds() {
        let a = TermRef::const_int(32, 3);
        let b = TermRef::const_int(32, 4);
        assert_eq!(TermRef::add(a, b), TermRef::const_int(32, 7));
    }

    #[test]
    fn const_arithmetic_wraps_to_width() {
        let a = TermRef::const_int(8, 0xff);
        let b = TermRef::const_int(8, 1);
        assert_eq!(TermRef::add(a, b), TermRef::const_int(8, 0));
        let c = TermRef::const_int(8, 0x80);
        assert_eq!(
            TermRef::binop(BinaryOp::SDiv, c, TermRef::const_int(8, 2)),
            TermRef::const_int(8, 0xc0)
        );
    }

    #[test]
    fn division_by_zero_stays_symbolic() {
        let a = TermRef::const_int(32, 7);
        let z = TermRef::const_int(32, 0);
        let d = TermRef::binop(BinaryOp::UDiv, a, z);
        assert!(d.as_const_int().is_none());
    }

    #[test]
    fn icmp_folds_signed_and_unsigned() {
        let minus_one = TermRef::const_int(32, u32::MAX as u128);
        let one = TermRef::const_int(32, 1);
        assert!(TermRef::icmp(ICmpOp::Slt, minus_one, one).is_constant_value(true));
        assert!(TermRef::icmp(ICmpOp::Ult, minus_one, one).is_constant_value(false));
    }

    #[test]
    fn select_and_bool_folds() {
        let x = TermRef::symbolic(Type::Int(64), Symbol::named("v"));
        let y = TermRef::const_int(64, 5);
        assert_eq!(TermRef::select(TermRef::const_bool(true), x, y), x);
        assert_eq!(TermRef::select(TermRef::const_bool(false), x, y), y);

        let c = TermRef::symbolic(Type::bool(), Symbol::named("c"));
        assert_eq!(TermRef::and(c, TermRef::const_bool(true)), c);
        assert!(TermRef::and(c, TermRef::const_bool(false)).is_constant_value(false));
        assert_eq!(TermRef::or(c, TermRef::const_bool(false)), c);
        assert!(TermRef::or(c, TermRef::const_bool(true)).is_constant_value(true));
        assert_eq!(TermRef::not(TermRef::not(c)), c);
    }

    #[test]
    fn cast_identities() {
        let x = TermRef::symbolic(Type::Int(32), Symbol::named("w"));
        assert_eq!(TermRef::zext(32, x), x);
        assert_eq!(TermRef::trunc(32, x), x);
        assert_eq!(TermRef::bitcast(Type::Int(32), x), x);

        let f = TermRef::bitcast(Type::float32(), x);
        assert_eq!(TermRef::bitcast(Type::Int(32), f), x);
    }

    #[test]
    fn const_casts_fold() {
        let v = TermRef::const_int(8, 0x80);
        assert_eq!(TermRef::zext(32, v), TermRef::const_int(32, 0x80));
        assert_eq!(
            TermRef::unop(UnaryOp::SExt, Type::Int(32), v),
            TermRef::const_int(32, 0xffff_ff80)
        );
        assert_eq!(TermRef::trunc(4, v), TermRef::const_int(4, 0));
    }

    #[test]
    fn load_of_store_folds_on_constant_indices() {
        let base = TermRef::alloc(TermRef::const_int(8, 0), TermRef::const_int(64, 16));
        let idx3 = TermRef::const_int(64, 3);
        let idx5 = TermRef::const_int(64, 5);
        let byte = TermRef::const_int(8, 0xab);
        let stored = TermRef::store(base, idx3, byte);
        assert_eq!(TermRef::load(stored, idx3), byte);
        // distinct constant index sees through to the allocation default
        assert_eq!(TermRef::load(stored, idx5), TermRef::const_int(8, 0));
    }

    #[test]
    fn fnan_detection_on_constants() {
        let nan = TermRef::const_f64(f64::NAN);
        assert!(TermRef::unop(UnaryOp::FIsNaN, Type::bool(), nan).is_constant_value(true));
        let one = TermRef::const_f64(1.0);
        assert!(TermRef::unop(UnaryOp::FIsNaN, Type::bool(), one).is_constant_value(false));
    }
}
