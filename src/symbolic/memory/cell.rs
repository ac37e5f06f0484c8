use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::Zero;
use z3::ast::BV;
use z3::{Context, Solver};

use crate::symbolic::z3_ext::{
    bv_from_bigint, len_val, u64_from_bv, DATA_BITS, LEN_BITS, MAX_CELL_BITS, MAX_CELL_REFS,
};

/// Where a cell's contents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrigin {
    /// Built by the executed code (or the harness); lengths usually concrete.
    Allocated,
    /// Contents unknown until constrained; children materialize lazily.
    Input,
}

/// One immutable TVM cell: ≤1023 data bits, ≤4 child references.
///
/// The payload is a 1023-bit vector with bit 0 of the cell at the MOST
/// significant position (left-aligned), which keeps reads at symbolic
/// offsets a shift-and-extract instead of a byte loop.
#[derive(Debug, Clone)]
pub struct Cell<'ctx> {
    /// Unique per analysis run; dictionary roots and input-cell children are
    /// keyed by it.
    pub id: u64,
    pub data: BV<'ctx>,
    pub data_len: BV<'ctx>,
    pub refs: Vec<Arc<Cell<'ctx>>>,
    pub refs_len: BV<'ctx>,
    pub origin: CellOrigin,
}

impl<'ctx> Cell<'ctx> {
    pub fn empty(ctx: &'ctx Context, id: u64) -> Self {
        Self {
            id,
            data: BV::from_u64(ctx, 0, DATA_BITS),
            data_len: len_val(ctx, 0),
            refs: Vec::new(),
            refs_len: len_val(ctx, 0),
            origin: CellOrigin::Allocated,
        }
    }

    /// Allocated cell with a concrete bit length and explicit children.
    pub fn allocated(
        ctx: &'ctx Context,
        id: u64,
        data: BV<'ctx>,
        data_len: BV<'ctx>,
        refs: Vec<Arc<Cell<'ctx>>>,
    ) -> Self {
        let refs_len = len_val(ctx, refs.len() as u64);
        Self {
            id,
            data,
            data_len,
            refs,
            refs_len,
            origin: CellOrigin::Allocated,
        }
    }

    /// Allocated cell whose payload is the given concrete bit string.
    pub fn from_bits(
        ctx: &'ctx Context,
        id: u64,
        bits: &[bool],
        refs: Vec<Arc<Cell<'ctx>>>,
    ) -> Self {
        debug_assert!(bits.len() as u64 <= MAX_CELL_BITS);
        let mut value = BigInt::zero();
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                value += BigInt::from(1) << (DATA_BITS as usize - 1 - i);
            }
        }
        let data = bv_from_bigint(ctx, &value, DATA_BITS);
        Self::allocated(ctx, id, data, len_val(ctx, bits.len() as u64), refs)
    }

    /// Fresh input cell. Well-formedness (length and ref-count ranges) holds
    /// on every path, so it is asserted into the solver base rather than
    /// carried as a path constraint.
    pub fn fresh_input(ctx: &'ctx Context, solver: &Solver<'ctx>, id: u64) -> Self {
        let data = BV::new_const(ctx, format!("cell_data_{id}"), DATA_BITS);
        let data_len = BV::new_const(ctx, format!("cell_bits_{id}"), LEN_BITS);
        let refs_len = BV::new_const(ctx, format!("cell_refs_{id}"), LEN_BITS);
        solver.assert(&data_len.bvule(&len_val(ctx, MAX_CELL_BITS)));
        solver.assert(&refs_len.bvule(&len_val(ctx, MAX_CELL_REFS)));
        Self {
            id,
            data,
            data_len,
            refs: Vec::new(),
            refs_len,
            origin: CellOrigin::Input,
        }
    }

    pub fn is_input(&self) -> bool {
        self.origin == CellOrigin::Input
    }

    pub fn concrete_data_len(&self) -> Option<u64> {
        u64_from_bv(&self.data_len)
    }

    pub fn concrete_refs_len(&self) -> Option<u64> {
        u64_from_bv(&self.refs_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::biguint_from_bv;
    use num_bigint::BigUint;
    use z3::Config;

    #[test]
    fn test_from_bits_left_aligns_payload() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // 10110000 stored in the top bits of the payload.
        let bits = [true, false, true, true];
        let cell = Cell::from_bits(&ctx, 1, &bits, Vec::new());

        let expected = (BigUint::from(0b1011u32)) << (DATA_BITS as usize - 4);
        assert_eq!(biguint_from_bv(&cell.data), Some(expected));
        assert_eq!(cell.concrete_data_len(), Some(4));
        assert_eq!(cell.concrete_refs_len(), Some(0));
    }

    #[test]
    fn test_fresh_input_lengths_are_bounded() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let cell = Cell::fresh_input(&ctx, &solver, 7);
        assert!(cell.is_input());

        // The base assertions must forbid an over-long payload.
        solver.assert(&cell.data_len.bvugt(&len_val(&ctx, MAX_CELL_BITS)));
        assert_eq!(solver.check(), z3::SatResult::Unsat);
    }
}
