//! Translation from symbolic IR terms to SMT-LIB 2.
//!
//! Every distinct compound term becomes one `define-fun`, so the emitted
//! script is linear in the number of distinct nodes no matter how heavily
//! subterms are shared. A per-translator cache keyed by term identity makes
//! revisits O(1). Boolean/bit-vector conversions are explicit: SMT wants
//! `Bool` in logical positions while the IR speaks 1-bit vectors.

use super::sexp::Sexp;
use crate::ir::{BinaryOp, FCmpOp, ICmpOp, Symbol, TermKind, TermRef, Type, UnaryOp};
use std::collections::HashMap;

/// SMT sort of a translated expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmtSort {
    Bool,
    BitVec(u32),
    Float { exp: u32, sig: u32 },
    Array { index_width: u32 },
}

pub(crate) fn sort_sexp(sort: &SmtSort) -> Sexp {
    match sort {
        SmtSort::Bool => Sexp::atom("Bool"),
        SmtSort::BitVec(w) => Sexp::app("_", vec![Sexp::atom("BitVec"), Sexp::atom(w.to_string())]),
        SmtSort::Float { exp, sig } => Sexp::app(
            "_",
            vec![
                Sexp::atom("FloatingPoint"),
                Sexp::atom(exp.to_string()),
                Sexp::atom(sig.to_string()),
            ],
        ),
        SmtSort::Array { index_width } => Sexp::app(
            "Array",
            vec![
                sort_sexp(&SmtSort::BitVec(*index_width)),
                sort_sexp(&SmtSort::BitVec(8)),
            ],
        ),
    }
}

fn type_to_sort(ty: &Type) -> SmtSort {
    match ty {
        Type::Int(w) => SmtSort::BitVec(*w),
        Type::Float { exp, sig } => SmtSort::Float {
            exp: *exp,
            sig: *sig,
        },
        Type::Array { index_width } => SmtSort::Array {
            index_width: *index_width,
        },
        t => panic!("cannot translate values of type {}", t),
    }
}

/// SMT symbol for a named or numbered symbolic constant.
pub(crate) fn symbol_atom(symbol: &Symbol) -> Sexp {
    match symbol {
        Symbol::Named(name) => {
            assert!(!name.contains('|'), "symbol name contains a pipe");
            Sexp::atom(format!("|{}|", name))
        }
        Symbol::Numbered(n) => Sexp::atom(format!("|#{}|", n)),
    }
}

pub(crate) fn bv_literal(value: u128, width: u32) -> Sexp {
    Sexp::app(
        "_",
        vec![
            Sexp::atom(format!("bv{}", value)),
            Sexp::atom(width.to_string()),
        ],
    )
}

fn bin_literal(value: u64, width: u32) -> Sexp {
    Sexp::atom(format!("#b{:0>width$b}", value, width = width as usize))
}

#[derive(Clone)]
struct Smt {
    expr: Sexp,
    sort: SmtSort,
}

fn normalize_to_bool(smt: Smt) -> Smt {
    if smt.sort == SmtSort::BitVec(1) {
        Smt {
            expr: Sexp::app("=", vec![smt.expr, Sexp::atom("#b1")]),
            sort: SmtSort::Bool,
        }
    } else {
        smt
    }
}

fn normalize_to_bv(smt: Smt) -> Smt {
    if smt.sort == SmtSort::Bool {
        Smt {
            expr: Sexp::app("ite", vec![smt.expr, Sexp::atom("#b1"), Sexp::atom("#b0")]),
            sort: SmtSort::BitVec(1),
        }
    } else {
        smt
    }
}

/// One translation session, scoped to a single solver query.
pub struct Translator {
    commands: Vec<Sexp>,
    cache: HashMap<TermRef, Smt>,
    symbols: HashMap<Symbol, SmtSort>,
    fresh: u32,
}

impl Translator {
    pub fn new() -> Translator {
        Translator {
            commands: Vec::new(),
            cache: HashMap::new(),
            symbols: HashMap::new(),
            fresh: 0,
        }
    }

    /// Translates `term` and appends an `(assert …)` for it.
    pub fn assert(&mut self, term: TermRef) {
        let smt = normalize_to_bool(self.visit(term));
        assert_eq!(smt.sort, SmtSort::Bool, "asserted term is not boolean");
        self.commands.push(Sexp::app("assert", vec![smt.expr]));
    }

    pub fn commands(&self) -> &[Sexp] {
        &self.commands
    }

    /// Consumes the translator, yielding the script and the symbol → sort
    /// map the model needs for decoding.
    pub fn into_parts(self) -> (Vec<Sexp>, HashMap<Symbol, SmtSort>) {
        (self.commands, self.symbols)
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        let n = self.fresh;
        self.fresh += 1;
        format!("|{}!{}|", prefix, n)
    }

    fn define(&mut self, term: TermRef, body: Sexp, sort: SmtSort) -> Smt {
        let name = format!("t{}", term.index());
        self.commands.push(Sexp::app(
            "define-fun",
            vec![
                Sexp::atom(name.clone()),
                Sexp::List(Vec::new()),
                sort_sexp(&sort),
                body,
            ],
        ));
        Smt {
            expr: Sexp::atom(name),
            sort,
        }
    }

    fn visit(&mut self, term: TermRef) -> Smt {
        if let Some(hit) = self.cache.get(&term) {
            return hit.clone();
        }
        let smt = self.translate(term);
        self.cache.insert(term, smt.clone());
        smt
    }

    fn translate(&mut self, term: TermRef) -> Smt {
        let data = term.data();
        match data.kind {
            TermKind::ConstInt { value } => Smt {
                expr: bv_literal(value, data.ty.bitwidth()),
                sort: SmtSort::BitVec(data.ty.bitwidth()),
            },
            TermKind::ConstFloat { bits } => {
                let (exp, sig) = match data.ty {
                    Type::Float { exp, sig } => (exp, sig),
                    _ => unreachable!(),
                };
                let frac_bits = sig - 1;
                let sign = (bits >> (exp + frac_bits)) & 1;
                let exponent = (bits >> frac_bits) & ((1u64 << exp) - 1);
                let fraction = bits & ((1u64 << frac_bits) - 1);
                Smt {
                    expr: Sexp::app(
                        "fp",
                        vec![
                            bin_literal(sign, 1),
                            bin_literal(exponent, exp),
                            bin_literal(fraction, frac_bits),
                        ],
                    ),
                    sort: SmtSort::Float { exp, sig },
                }
            }
            TermKind::Undef => {
                // unconstrained fresh constant per query
                let sort = type_to_sort(&data.ty);
                let name = self.fresh_name("undef");
                self.commands.push(Sexp::app(
                    "declare-const",
                    vec![Sexp::atom(name.clone()), sort_sexp(&sort)],
                ));
                Smt {
                    expr: Sexp::atom(name),
                    sort,
                }
            }
            TermKind::Symbolic(symbol) => {
                let sort = type_to_sort(&data.ty);
                if let Some(known) = self.symbols.get(&symbol) {
                    assert_eq!(known, &sort, "symbol {} re-used at a different sort", symbol);
                } else {
                    self.commands.push(Sexp::app(
                        "declare-const",
                        vec![symbol_atom(&symbol), sort_sexp(&sort)],
                    ));
                    self.symbols.insert(symbol.clone(), sort.clone());
                }
                Smt {
                    expr: symbol_atom(&symbol),
                    sort,
                }
            }
            TermKind::Unary { op, operand } => self.translate_unary(term, op, operand, &data.ty),
            TermKind::Binary { op, lhs, rhs } => self.translate_binary(term, op, lhs, rhs),
            TermKind::ICmp { op, lhs, rhs } => {
                let l = normalize_to_bv(self.visit(lhs));
                let r = normalize_to_bv(self.visit(rhs));
                let head = match op {
                    ICmpOp::Eq => "=",
                    ICmpOp::Ne => "distinct",
                    ICmpOp::Ugt => "bvugt",
                    ICmpOp::Uge => "bvuge",
                    ICmpOp::Ult => "bvult",
                    ICmpOp::Ule => "bvule",
                    ICmpOp::Sgt => "bvsgt",
                    ICmpOp::Sge => "bvsge",
                    ICmpOp::Slt => "bvslt",
                    ICmpOp::Sle => "bvsle",
                };
                let body = Sexp::app(head, vec![l.expr, r.expr]);
                self.define(term, body, SmtSort::Bool)
            }
            TermKind::FCmp { op, lhs, rhs } => {
                let l = self.visit(lhs);
                let r = self.visit(rhs);
                let body = match op {
                    FCmpOp::Eq => Sexp::app("fp.eq", vec![l.expr, r.expr]),
                    FCmpOp::Ne => Sexp::app(
                        "not",
                        vec![Sexp::app("fp.eq", vec![l.expr, r.expr])],
                    ),
                    FCmpOp::Gt => Sexp::app("fp.gt", vec![l.expr, r.expr]),
                    FCmpOp::Ge => Sexp::app("fp.geq", vec![l.expr, r.expr]),
                    FCmpOp::Lt => Sexp::app("fp.lt", vec![l.expr, r.expr]),
                    FCmpOp::Le => Sexp::app("fp.leq", vec![l.expr, r.expr]),
                };
                self.define(term, body, SmtSort::Bool)
            }
            TermKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = normalize_to_bool(self.visit(cond));
                let t = normalize_to_bv(self.visit(on_true));
                let f = normalize_to_bv(self.visit(on_false));
                let sort = t.sort.clone();
                let body = Sexp::app("ite", vec![c.expr, t.expr, f.expr]);
                self.define(term, body, sort)
            }
            TermKind::Load { array, index } => {
                let a = self.visit(array);
                let i = normalize_to_bv(self.visit(index));
                let body = Sexp::app("select", vec![a.expr, i.expr]);
                self.define(term, body, SmtSort::BitVec(8))
            }
            TermKind::Store {
                array,
                index,
                value,
            } => {
                let a = self.visit(array);
                let i = normalize_to_bv(self.visit(index));
                let v = normalize_to_bv(self.visit(value));
                let sort = a.sort.clone();
                let body = Sexp::app("store", vec![a.expr, i.expr, v.expr]);
                self.define(term, body, sort)
            }
            TermKind::Alloc { default, .. } => {
                let d = normalize_to_bv(self.visit(default));
                let sort = type_to_sort(&data.ty);
                let body = Sexp::list(vec![
                    Sexp::app("as", vec![Sexp::atom("const"), sort_sexp(&sort)]),
                    d.expr,
                ]);
                self.define(term, body, sort)
            }
            TermKind::FixedArray { elems } => {
                let sort = type_to_sort(&data.ty);
                let index_width = match sort {
                    SmtSort::Array { index_width } => index_width,
                    _ => unreachable!(),
                };
                let name = self.fresh_name("array");
                self.commands.push(Sexp::app(
                    "declare-const",
                    vec![Sexp::atom(name.clone()), sort_sexp(&sort)],
                ));
                for (i, elem) in elems.iter().enumerate() {
                    let e = normalize_to_bv(self.visit(*elem));
                    let select = Sexp::app(
                        "select",
                        vec![Sexp::atom(name.clone()), bv_literal(i as u128, index_width)],
                    );
                    self.commands
                        .push(Sexp::app("assert", vec![Sexp::app("=", vec![select, e.expr])]));
                }
                Smt {
                    expr: Sexp::atom(name),
                    sort,
                }
            }
        }
    }

    fn translate_unary(&mut self, term: TermRef, op: UnaryOp, operand: TermRef, ty: &Type) -> Smt {
        match op {
            UnaryOp::Not => {
                let v = normalize_to_bool(self.visit(operand));
                if v.sort == SmtSort::Bool {
                    self.define(term, Sexp::app("not", vec![v.expr]), SmtSort::Bool)
                } else {
                    let sort = v.sort.clone();
                    self.define(term, Sexp::app("bvnot", vec![v.expr]), sort)
                }
            }
            UnaryOp::FNeg => {
                let v = self.visit(operand);
                let sort = v.sort.clone();
                self.define(term, Sexp::app("fp.neg", vec![v.expr]), sort)
            }
            UnaryOp::FIsNaN => {
                let v = self.visit(operand);
                self.define(term, Sexp::app("fp.isNaN", vec![v.expr]), SmtSort::Bool)
            }
            UnaryOp::Trunc => {
                let v = normalize_to_bv(self.visit(operand));
                let width = ty.bitwidth();
                let body = Sexp::list(vec![
                    Sexp::app(
                        "_",
                        vec![
                            Sexp::atom("extract"),
                            Sexp::atom((width - 1).to_string()),
                            Sexp::atom("0"),
                        ],
                    ),
                    v.expr,
                ]);
                self.define(term, body, SmtSort::BitVec(width))
            }
            UnaryOp::ZExt | UnaryOp::SExt => {
                let v = normalize_to_bv(self.visit(operand));
                let src_width = match v.sort {
                    SmtSort::BitVec(w) => w,
                    _ => panic!("extension of non-bitvector"),
                };
                let width = ty.bitwidth();
                let name = if op == UnaryOp::ZExt {
                    "zero_extend"
                } else {
                    "sign_extend"
                };
                let body = Sexp::list(vec![
                    Sexp::app(
                        "_",
                        vec![
                            Sexp::atom(name),
                            Sexp::atom((width - src_width).to_string()),
                        ],
                    ),
                    v.expr,
                ]);
                self.define(term, body, SmtSort::BitVec(width))
            }
            UnaryOp::Bitcast => {
                let v = self.visit(operand);
                match (v.sort.clone(), ty) {
                    (SmtSort::Float { .. }, Type::Int(w)) => self.define(
                        term,
                        Sexp::app("fp.to_ieee_bv", vec![v.expr]),
                        SmtSort::BitVec(*w),
                    ),
                    (_, Type::Float { exp, sig }) => {
                        let v = normalize_to_bv(v);
                        let body = Sexp::list(vec![
                            Sexp::app(
                                "_",
                                vec![
                                    Sexp::atom("to_fp"),
                                    Sexp::atom(exp.to_string()),
                                    Sexp::atom(sig.to_string()),
                                ],
                            ),
                            v.expr,
                        ]);
                        self.define(
                            term,
                            body,
                            SmtSort::Float {
                                exp: *exp,
                                sig: *sig,
                            },
                        )
                    }
                    (sort, t) => panic!("unsupported bitcast from {:?} to {}", sort, t),
                }
            }
        }
    }

    fn translate_binary(&mut self, term: TermRef, op: BinaryOp, lhs: TermRef, rhs: TermRef) -> Smt {
        use BinaryOp::*;
        match op {
            And | Or => {
                let l = normalize_to_bool(self.visit(lhs));
                let r = normalize_to_bool(self.visit(rhs));
                if l.sort == SmtSort::Bool {
                    let head = if op == And { "and" } else { "or" };
                    self.define(term, Sexp::app(head, vec![l.expr, r.expr]), SmtSort::Bool)
                } else {
                    let head = if op == And { "bvand" } else { "bvor" };
                    let sort = l.sort.clone();
                    self.define(term, Sexp::app(head, vec![l.expr, r.expr]), sort)
                }
            }
            FAdd | FSub | FMul | FDiv => {
                let l = self.visit(lhs);
                let r = self.visit(rhs);
                let head = match op {
                    FAdd => "fp.add",
                    FSub => "fp.sub",
                    FMul => "fp.mul",
                    FDiv => "fp.div",
                    _ => unreachable!(),
                };
                let sort = l.sort.clone();
                let body = Sexp::app(head, vec![Sexp::atom("RNE"), l.expr, r.expr]);
                self.define(term, body, sort)
            }
            FRem => {
                let l = self.visit(lhs);
                let r = self.visit(rhs);
                let sort = l.sort.clone();
                self.define(term, Sexp::app("fp.rem", vec![l.expr, r.expr]), sort)
            }
            _ => {
                let l = normalize_to_bv(self.visit(lhs));
                let r = normalize_to_bv(self.visit(rhs));
                let head = match op {
                    Add => "bvadd",
                    Sub => "bvsub",
                    Mul => "bvmul",
                    UDiv => "bvudiv",
                    SDiv => "bvsdiv",
                    URem => "bvurem",
                    SRem => "bvsrem",
                    Xor => "bvxor",
                    Shl => "bvshl",
                    LShr => "bvlshr",
                    AShr => "bvashr",
                    _ => unreachable!(),
                };
                let sort = l.sort.clone();
                self.define(term, Sexp::app(head, vec![l.expr, r.expr]), sort)
            }
        }
    }
}

impl Default for Translator {
    fn default() -> Translator {
        Translator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Symbol;

    fn script(translator: &Translator) -> String {
        translator
            .commands()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn declares_each_symbol_once() {
        let x = TermRef::symbolic(Type::Int(32), Symbol::named("x"));
        let lt = TermRef::icmp(ICmpOp::Ult, x, TermRef::const_int(32, 10));
        let gt = TermRef::icmp(ICmpOp::Ugt, x, TermRef::const_int(32, 2));
        let mut translator = Translator::new();
        translator.assert(lt);
        translator.assert(gt);
        let text = script(&translator);
        assert_eq!(text.matches("declare-const |x|").count(), 1);
        assert!(text.contains("(bvult |x| (_ bv10 32))"));
        assert!(text.contains("(bvugt |x| (_ bv2 32))"));
    }

    #[test]
    fn one_bit_vectors_normalize_to_bool() {
        let flag = TermRef::symbolic(Type::bool(), Symbol::named("flag"));
        let mut translator = Translator::new();
        translator.assert(flag);
        let text = script(&translator);
        assert!(text.contains("(assert (= |flag| #b1))"));
    }

    #[test]
    fn bool_and_stays_boolean_and_wide_and_is_bitwise() {
        let a = TermRef::symbolic(Type::bool(), Symbol::named("a"));
        let b = TermRef::symbolic(Type::bool(), Symbol::named("b"));
        let mut translator = Translator::new();
        translator.assert(TermRef::and(a, b));
        assert!(script(&translator).contains("(and (= |a| #b1) (= |b| #b1))"));

        let x = TermRef::symbolic(Type::Int(8), Symbol::named("wx"));
        let y = TermRef::symbolic(Type::Int(8), Symbol::named("wy"));
        let masked = TermRef::icmp(ICmpOp::Eq, TermRef::and(x, y), TermRef::const_int(8, 0));
        let mut translator = Translator::new();
        translator.assert(masked);
        assert!(script(&translator).contains("(bvand |wx| |wy|)"));
    }

    #[test]
    fn float_constants_split_into_ieee_fields() {
        let one = TermRef::const_f64(1.0);
        let sym = TermRef::symbolic(Type::float64(), Symbol::named("f"));
        let cmp = TermRef::fcmp(FCmpOp::Lt, sym, one);
        let mut translator = Translator::new();
        translator.assert(cmp);
        let text = script(&translator);
        // 1.0 = sign 0, exponent 01111111111, zero fraction
        assert!(text.contains("(fp #b0 #b01111111111 #b0000000000000000000000000000000000000000000000000000)"));
        assert!(text.contains("fp.lt"));
    }

    #[test]
    fn shared_subterms_are_defined_once() {
        let x = TermRef::symbolic(Type::Int(64), Symbol::named("shared"));
        let sum = TermRef::add(x, TermRef::const_int(64, 1));
        let both = TermRef::and(
            TermRef::icmp(ICmpOp::Ult, sum, TermRef::const_int(64, 100)),
            TermRef::icmp(ICmpOp::Ugt, sum, TermRef::const_int(64, 10)),
        );
        let mut translator = Translator::new();
        translator.assert(both);
        let text = script(&translator);
        assert_eq!(text.matches("(bvadd |shared| (_ bv1 64))").count(), 1);
    }

    #[test]
    fn casts_and_memory_ops_emit_expected_forms() {
        let byte = TermRef::symbolic(Type::Int(8), Symbol::named("m"));
        let wide = TermRef::zext(32, byte);
        let data = TermRef::symbolic(
            Type::Array { index_width: 64 },
            Symbol::named("mem"),
        );
        let idx = TermRef::symbolic(Type::Int(64), Symbol::named("i"));
        let loaded = TermRef::load(TermRef::store(data, idx, TermRef::const_int(8, 1)), idx);
        let cmp = TermRef::icmp(
            ICmpOp::Eq,
            TermRef::zext(32, loaded),
            wide,
        );
        let mut translator = Translator::new();
        translator.assert(cmp);
        let text = script(&translator);
        assert!(text.contains("((_ zero_extend 24) |m|)"));
        assert!(text.contains("(store |mem| |i| (_ bv1 8))"));
        assert!(text.contains("(select"));
    }
}
