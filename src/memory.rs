//! The symbolic heap: byte-array allocations and pointer resolution.
//!
//! Memory is a set of allocations, each an array-of-bytes term plus a base
//! address and a size. Typed reads and writes are assembled from byte-level
//! `load`/`store` term composition; validity checks produce assertions that
//! feed the path condition.

use crate::assertion::Assertion;
use crate::ir::{BinaryOp, ICmpOp, TermRef, Type};
use crate::lir::DataLayout;
use crate::value::{LirScalar, LirValue};
use indexmap::IndexMap;

/// The coarse region a pointer lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapId {
    Stack,
    Globals,
    Heap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocId(pub u32);

/// A pointer value: either pinned to a specific allocation or a bare
/// address term that may alias several allocations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pointer {
    Resolved {
        heap: HeapId,
        alloc: AllocId,
        offset: TermRef,
    },
    Unresolved {
        address: TermRef,
    },
}

impl Pointer {
    pub fn resolved(heap: HeapId, alloc: AllocId, offset: TermRef) -> Pointer {
        Pointer::Resolved {
            heap,
            alloc,
            offset,
        }
    }

    pub fn unresolved(address: TermRef) -> Pointer {
        Pointer::Unresolved { address }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Pointer::Resolved { .. })
    }

    /// The in-allocation offset of a resolved pointer, or the raw address
    /// of an unresolved one.
    pub fn offset(&self) -> TermRef {
        match self {
            Pointer::Resolved { offset, .. } => *offset,
            Pointer::Unresolved { address } => *address,
        }
    }

    /// Absolute address term of this pointer.
    pub fn address(&self, heaps: &MemHeaps, pointer_width: u32) -> TermRef {
        match self {
            Pointer::Resolved { offset, .. } => {
                let base = heaps.ptr_allocation(self).base;
                debug_assert_eq!(offset.ty(), Type::Int(pointer_width));
                TermRef::add(base, *offset)
            }
            Pointer::Unresolved { address } => {
                debug_assert_eq!(address.ty(), Type::Int(pointer_width));
                *address
            }
        }
    }
}

/// One contiguous allocation: base address, size and byte contents, all as
/// terms. The data term always has array sort with 8-bit elements and an
/// index width equal to the address width.
#[derive(Clone, Debug)]
pub struct Allocation {
    pub base: TermRef,
    pub size: TermRef,
    pub data: TermRef,
}

impl Allocation {
    pub fn new(base: TermRef, size: TermRef, data: TermRef) -> Allocation {
        assert!(data.ty().is_array(), "allocation data must be an array");
        assert_eq!(base.ty(), size.ty(), "base and size widths differ");
        Allocation { base, size, data }
    }

    fn index_width(&self) -> u32 {
        match self.data.ty() {
            Type::Array { index_width } => index_width,
            _ => unreachable!(),
        }
    }

    /// `offset + len <= size && offset + len >= offset` (unsigned, no
    /// overflow).
    pub fn check_inbounds(&self, offset: TermRef, len: u64) -> Assertion {
        let width = self.index_width();
        let end = TermRef::add(offset, TermRef::const_int(width, len as u128));
        let fits = TermRef::icmp(ICmpOp::Ule, end, self.size);
        let no_wrap = TermRef::icmp(ICmpOp::Uge, end, offset);
        Assertion::new(TermRef::and(fits, no_wrap))
    }

    /// Assertion that an absolute address with `len` trailing bytes lies
    /// within this allocation.
    pub fn contains(&self, address: TermRef, len: u64) -> Assertion {
        self.check_inbounds(TermRef::sub(address, self.base), len)
    }

    /// Typed read of `ty` at `offset`, assembling bytes little-endian
    /// (or big-endian if the layout says so) and bit-casting to the target
    /// type. Pointer-typed reads come back unresolved.
    pub fn read(&self, offset: TermRef, ty: &Type, layout: &DataLayout) -> LirValue {
        match ty {
            Type::Vector { elem, count } => {
                let elem_size = layout.type_store_size(elem);
                let width = self.index_width();
                let elems = (0..*count)
                    .map(|i| {
                        let at = TermRef::add(
                            offset,
                            TermRef::const_int(width, (elem_size * u64::from(i)) as u128),
                        );
                        self.read_scalar(at, elem, layout)
                    })
                    .collect();
                LirValue::Vector(elems)
            }
            _ => LirValue::Scalar(self.read_scalar(offset, ty, layout)),
        }
    }

    fn read_scalar(&self, offset: TermRef, ty: &Type, layout: &DataLayout) -> LirScalar {
        let width = self.index_width();
        let bytes = layout.type_store_size(ty) as u32;
        assert!(bytes > 0, "cannot read a zero-sized type");
        let bits = bytes * 8;

        let mut assembled: Option<TermRef> = None;
        for i in 0..bytes {
            let at = TermRef::add(offset, TermRef::const_int(width, i as u128));
            let byte = TermRef::zext(bits, TermRef::load(self.data, at));
            let position = if layout.little_endian { i } else { bytes - 1 - i };
            let shifted = if position == 0 {
                byte
            } else {
                TermRef::binop(
                    BinaryOp::Shl,
                    byte,
                    TermRef::const_int(bits, (position * 8) as u128),
                )
            };
            assembled = Some(match assembled {
                Some(acc) => TermRef::or(acc, shifted),
                None => shifted,
            });
        }
        let raw = assembled.expect("at least one byte");

        match ty {
            Type::Int(w) => LirScalar::Term(TermRef::trunc(*w, raw)),
            Type::Float { .. } => LirScalar::Term(TermRef::bitcast(ty.clone(), raw)),
            Type::Pointer => LirScalar::Pointer(Pointer::unresolved(raw)),
            t => panic!("cannot read values of type {}", t),
        }
    }

    /// Typed write, the dual of [`Allocation::read`]. Pointer scalars must
    /// have been lowered to terms beforehand (see [`LirValue::lowered`]).
    pub fn write(&mut self, offset: TermRef, ty: &Type, value: &LirValue, layout: &DataLayout) {
        match (ty, value) {
            (Type::Vector { elem, count }, LirValue::Vector(elems)) => {
                assert_eq!(elems.len(), *count as usize, "vector arity mismatch");
                let elem_size = layout.type_store_size(elem);
                let width = self.index_width();
                for (i, scalar) in elems.iter().enumerate() {
                    let at = TermRef::add(
                        offset,
                        TermRef::const_int(width, (elem_size * i as u64) as u128),
                    );
                    self.write_scalar(at, elem, scalar.term(), layout);
                }
            }
            (_, LirValue::Scalar(scalar)) => {
                self.write_scalar(offset, ty, scalar.term(), layout);
            }
            (t, v) => panic!("write of {:?} as type {}", v, t),
        }
    }

    fn write_scalar(&mut self, offset: TermRef, ty: &Type, value: TermRef, layout: &DataLayout) {
        let width = self.index_width();
        let bytes = layout.type_store_size(ty) as u32;
        let bits = bytes * 8;

        let raw = match ty {
            Type::Int(w) => {
                assert_eq!(value.ty(), Type::Int(*w), "written value type mismatch");
                TermRef::zext(bits, value)
            }
            Type::Float { .. } => {
                assert_eq!(&value.ty(), ty, "written value type mismatch");
                TermRef::zext(bits, TermRef::bitcast(Type::Int(ty.bitwidth()), value))
            }
            Type::Pointer => {
                assert_eq!(value.ty(), Type::Int(bits), "pointer width mismatch");
                value
            }
            t => panic!("cannot write values of type {}", t),
        };

        for i in 0..bytes {
            let position = if layout.little_endian { i } else { bytes - 1 - i };
            let shifted = if position == 0 {
                raw
            } else {
                TermRef::binop(
                    BinaryOp::LShr,
                    raw,
                    TermRef::const_int(bits, (position * 8) as u128),
                )
            };
            let byte = TermRef::trunc(8, shifted);
            let at = TermRef::add(offset, TermRef::const_int(width, i as u128));
            self.data = TermRef::store(self.data, at, byte);
        }
    }
}

/// One region's allocations, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    allocations: IndexMap<AllocId, Allocation>,
    next: u32,
}

impl Heap {
    pub fn allocate(&mut self, allocation: Allocation) -> AllocId {
        let id = AllocId(self.next);
        self.next += 1;
        self.allocations.insert(id, allocation);
        id
    }

    pub fn get(&self, id: AllocId) -> Option<&Allocation> {
        self.allocations.get(&id)
    }

    pub fn get_mut(&mut self, id: AllocId) -> Option<&mut Allocation> {
        self.allocations.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AllocId, &Allocation)> {
        self.allocations.iter().map(|(id, a)| (*id, a))
    }
}

/// All memory regions of one execution context.
#[derive(Clone, Debug)]
pub struct MemHeaps {
    heaps: IndexMap<HeapId, Heap>,
}

impl Default for MemHeaps {
    fn default() -> MemHeaps {
        let mut heaps = IndexMap::new();
        heaps.insert(HeapId::Stack, Heap::default());
        heaps.insert(HeapId::Globals, Heap::default());
        heaps.insert(HeapId::Heap, Heap::default());
        MemHeaps { heaps }
    }
}

impl MemHeaps {
    pub fn new() -> MemHeaps {
        MemHeaps::default()
    }

    pub fn allocate(&mut self, heap: HeapId, allocation: Allocation) -> AllocId {
        self.heaps
            .get_mut(&heap)
            .expect("unknown heap id")
            .allocate(allocation)
    }

    /// Fresh allocation with a symbolic base address and zero-filled
    /// contents. Returns the id together with the assumption that the base
    /// is non-null and the allocation does not wrap the address space.
    pub fn allocate_symbolic(
        &mut self,
        heap: HeapId,
        size: TermRef,
        pointer_width: u32,
    ) -> (AllocId, Assertion) {
        assert_eq!(size.ty(), Type::Int(pointer_width), "size width mismatch");
        let base = TermRef::fresh(Type::Int(pointer_width));
        let data = TermRef::alloc(TermRef::const_int(8, 0), size);
        let id = self.allocate(heap, Allocation::new(base, size, data));

        let zero = TermRef::const_int(pointer_width, 0);
        let non_null = TermRef::icmp(ICmpOp::Ne, base, zero);
        let end = TermRef::add(base, size);
        let no_wrap = TermRef::icmp(ICmpOp::Uge, end, base);
        (id, Assertion::new(TermRef::and(non_null, no_wrap)))
    }

    /// Every live allocation across all regions, in deterministic order.
    pub fn iter_allocations(&self) -> impl Iterator<Item = (HeapId, AllocId, &Allocation)> {
        self.heaps
            .iter()
            .flat_map(|(heap, h)| h.iter().map(move |(id, a)| (*heap, id, a)))
    }

    /// The allocation a resolved pointer points into. Total for resolved
    /// pointers; unresolved pointers are a programmer error here.
    pub fn ptr_allocation(&self, ptr: &Pointer) -> &Allocation {
        match ptr {
            Pointer::Resolved { heap, alloc, .. } => self
                .heaps
                .get(heap)
                .and_then(|h| h.get(*alloc))
                .expect("resolved pointer into unknown allocation"),
            Pointer::Unresolved { .. } => panic!("ptr_allocation on unresolved pointer"),
        }
    }

    pub fn ptr_allocation_mut(&mut self, ptr: &Pointer) -> &mut Allocation {
        match ptr {
            Pointer::Resolved { heap, alloc, .. } => self
                .heaps
                .get_mut(heap)
                .and_then(|h| h.get_mut(*alloc))
                .expect("resolved pointer into unknown allocation"),
            Pointer::Unresolved { .. } => panic!("ptr_allocation on unresolved pointer"),
        }
    }

    /// Assertion that accessing `len` bytes through `ptr` is valid: the
    /// named allocation's bounds check for resolved pointers, otherwise the
    /// disjunction over all live allocations.
    pub fn check_valid(&self, ptr: &Pointer, len: u64) -> Assertion {
        match ptr {
            Pointer::Resolved { offset, .. } => {
                self.ptr_allocation(ptr).check_inbounds(*offset, len)
            }
            Pointer::Unresolved { address } => {
                let mut valid: Option<TermRef> = None;
                for (_, _, allocation) in self.iter_allocations() {
                    let contained = allocation
                        .contains(*address, len)
                        .value()
                        .expect("contains is never empty");
                    valid = Some(match valid {
                        Some(acc) => TermRef::or(acc, contained),
                        None => contained,
                    });
                }
                match valid {
                    Some(term) => Assertion::new(term),
                    None => Assertion::new(TermRef::const_bool(false)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Symbol;

    fn fixed_allocation(base: u64, size: u64) -> Allocation {
        let pw = 64;
        Allocation::new(
            TermRef::const_int(pw, base as u128),
            TermRef::const_int(pw, size as u128),
            TermRef::alloc(TermRef::const_int(8, 0), TermRef::const_int(pw, size as u128)),
        )
    }

    #[test]
    fn byte_write_then_read_round_trips() {
        let layout = DataLayout::default();
        let mut alloc = fixed_allocation(0, 8);
        let offset = TermRef::const_int(64, 3);
        alloc.write(
            offset,
            &Type::Int(8),
            &LirValue::term(TermRef::const_int(8, 0xab)),
            &layout,
        );
        let value = alloc.read(offset, &Type::Int(8), &layout);
        assert_eq!(value.scalar().term(), TermRef::const_int(8, 0xab));
    }

    #[test]
    fn multi_byte_round_trip_is_little_endian() {
        let layout = DataLayout::default();
        let mut alloc = fixed_allocation(0, 16);
        let offset = TermRef::const_int(64, 4);
        alloc.write(
            offset,
            &Type::Int(32),
            &LirValue::term(TermRef::const_int(32, 0xdead_beef)),
            &layout,
        );
        let value = alloc.read(offset, &Type::Int(32), &layout);
        assert_eq!(value.scalar().term(), TermRef::const_int(32, 0xdead_beef));
        // the least significant byte lands at the lowest address
        let low = alloc.read(offset, &Type::Int(8), &layout);
        assert_eq!(low.scalar().term(), TermRef::const_int(8, 0xef));
    }

    #[test]
    fn float_round_trip_through_bytes() {
        let layout = DataLayout::default();
        let mut alloc = fixed_allocation(0, 16);
        let offset = TermRef::const_int(64, 0);
        let value = TermRef::const_f64(1.5);
        alloc.write(
            offset,
            &Type::float64(),
            &LirValue::term(value),
            &layout,
        );
        let back = alloc.read(offset, &Type::float64(), &layout);
        assert_eq!(back.scalar().term(), value);
    }

    #[test]
    fn inbounds_folds_for_constant_offsets() {
        let alloc = fixed_allocation(0, 8);
        assert!(alloc
            .check_inbounds(TermRef::const_int(64, 4), 4)
            .is_constant_value(true));
        assert!(alloc
            .check_inbounds(TermRef::const_int(64, 5), 4)
            .is_constant_value(false));
        // end wrapping past zero is rejected
        assert!(alloc
            .check_inbounds(TermRef::const_int(64, u64::MAX as u128), 4)
            .is_constant_value(false));
    }

    #[test]
    fn check_valid_over_unresolved_pointer_is_a_disjunction() {
        let mut heaps = MemHeaps::new();
        heaps.allocate(HeapId::Heap, fixed_allocation(0x1000, 4));
        heaps.allocate(HeapId::Heap, fixed_allocation(0x2000, 4));

        let addr = TermRef::symbolic(Type::Int(64), Symbol::named("p"));
        let ptr = Pointer::unresolved(addr);
        let valid = heaps.check_valid(&ptr, 1);
        assert!(!valid.is_empty());
        assert!(!valid.is_constant_value(true));
        assert!(!valid.is_constant_value(false));

        // a concrete in-bounds address folds to true
        let hit = Pointer::unresolved(TermRef::const_int(64, 0x2002));
        assert!(heaps.check_valid(&hit, 1).is_constant_value(true));
        let miss = Pointer::unresolved(TermRef::const_int(64, 0x3000));
        assert!(heaps.check_valid(&miss, 1).is_constant_value(false));
    }

    #[test]
    fn pointer_reads_come_back_unresolved() {
        let layout = DataLayout::default();
        let mut heaps = MemHeaps::new();
        let id = heaps.allocate(HeapId::Stack, fixed_allocation(0x4000, 16));
        let target = Pointer::resolved(HeapId::Stack, id, TermRef::const_int(64, 0));

        // write the address of `target` itself at offset 8
        let addr = target.address(&heaps, 64);
        let alloc = heaps.ptr_allocation_mut(&target);
        alloc.write(
            TermRef::const_int(64, 8),
            &Type::Pointer,
            &LirValue::term(addr),
            &layout,
        );
        let read = alloc.read(TermRef::const_int(64, 8), &Type::Pointer, &layout);
        match read.scalar() {
            LirScalar::Pointer(Pointer::Unresolved { address }) => {
                assert_eq!(*address, TermRef::const_int(64, 0x4000));
            }
            other => panic!("expected an unresolved pointer, found {:?}", other),
        }
    }
}
