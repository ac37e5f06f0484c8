use std::sync::Arc;

use z3::ast::{Ast, Bool, BV};
use z3::Context;

use super::cell::Cell;
use crate::symbolic::z3_ext::{len_val, u64_from_bv, DATA_BITS, INT_BITS, LEN_BITS};

/// Read cursor over a cell: (cell, data position, ref position).
///
/// Reads work on the cursor copy and never mutate the source cell. The ref
/// position is a plain `usize`: reference loads always advance by a constant,
/// only the *bound* (an input cell's ref count) can be symbolic.
#[derive(Debug, Clone)]
pub struct CellSlice<'ctx> {
    pub cell: Arc<Cell<'ctx>>,
    pub data_pos: BV<'ctx>,
    pub ref_pos: usize,
}

impl<'ctx> CellSlice<'ctx> {
    pub fn new(ctx: &'ctx Context, cell: Arc<Cell<'ctx>>) -> Self {
        Self {
            cell,
            data_pos: len_val(ctx, 0),
            ref_pos: 0,
        }
    }

    pub fn remaining_bits(&self) -> BV<'ctx> {
        self.cell.data_len.bvsub(&self.data_pos)
    }

    pub fn remaining_refs(&self, ctx: &'ctx Context) -> BV<'ctx> {
        self.cell.refs_len.bvsub(&len_val(ctx, self.ref_pos as u64))
    }

    /// Condition under which reading `width` more bits underflows the cell.
    pub fn bits_underflow(&self, width: &BV<'ctx>) -> Bool<'ctx> {
        self.data_pos.bvadd(width).bvugt(&self.cell.data_len)
    }

    /// Condition under which loading one more reference underflows.
    pub fn refs_underflow(&self, ctx: &'ctx Context) -> Bool<'ctx> {
        len_val(ctx, self.ref_pos as u64 + 1).bvugt(&self.cell.refs_len)
    }

    /// Condition under which the slice has been read to the very end.
    pub fn is_exhausted(&self, ctx: &'ctx Context) -> Bool<'ctx> {
        let no_bits = self.remaining_bits()._eq(&len_val(ctx, 0));
        let no_refs = self
            .remaining_refs(ctx)
            ._eq(&len_val(ctx, 0));
        Bool::and(ctx, &[&no_bits, &no_refs])
    }

    /// The unread payload, aligned so the next bit to read sits at the top
    /// of a full-width window.
    pub fn remaining_window(&self) -> BV<'ctx> {
        let pos = self.data_pos.zero_ext(DATA_BITS - LEN_BITS);
        self.cell.data.bvshl(&pos)
    }

    fn top_int_window(&self) -> BV<'ctx> {
        self.remaining_window()
            .extract(DATA_BITS - 1, DATA_BITS - INT_BITS)
    }

    /// Reads `width` bits (concrete, ≤ 256) as an unsigned integer without
    /// advancing. The caller is responsible for the bounds check.
    pub fn preload_uint(&self, width: u32) -> BV<'ctx> {
        debug_assert!(width >= 1 && width <= INT_BITS - 1);
        let top = self.top_int_window();
        top.bvlshr(&BV::from_u64(top.get_ctx(), (INT_BITS - width) as u64, INT_BITS))
    }

    /// Reads `width` bits (concrete) as a signed integer without advancing.
    pub fn preload_int(&self, width: u32) -> BV<'ctx> {
        debug_assert!(width >= 1 && width <= INT_BITS);
        let top = self.top_int_window();
        top.bvashr(&BV::from_u64(top.get_ctx(), (INT_BITS - width) as u64, INT_BITS))
    }

    /// Symbolic-width unsigned read: `width` is a length-sorted BV ≤ 256.
    pub fn preload_uint_dyn(&self, ctx: &'ctx Context, width: &BV<'ctx>) -> BV<'ctx> {
        let top = self.top_int_window();
        let shift = BV::from_u64(ctx, INT_BITS as u64, INT_BITS)
            .bvsub(&width.zero_ext(INT_BITS - LEN_BITS));
        top.bvlshr(&shift)
    }

    /// Symbolic-width signed read.
    pub fn preload_int_dyn(&self, ctx: &'ctx Context, width: &BV<'ctx>) -> BV<'ctx> {
        let top = self.top_int_window();
        let shift = BV::from_u64(ctx, INT_BITS as u64, INT_BITS)
            .bvsub(&width.zero_ext(INT_BITS - LEN_BITS));
        top.bvashr(&shift)
    }

    /// Advances the cursor by `width` bits. Bounds must already be checked.
    pub fn advance_bits(&mut self, width: &BV<'ctx>) {
        self.data_pos = self.data_pos.bvadd(width);
    }

    pub fn advance_ref(&mut self) {
        self.ref_pos += 1;
    }

    /// Child cell at the current ref position, when the backing cell carries
    /// explicit children (allocated cells). Input-cell children are
    /// materialized by the machine state, not here.
    pub fn peek_ref(&self) -> Option<Arc<Cell<'ctx>>> {
        self.cell.refs.get(self.ref_pos).cloned()
    }

    pub fn concrete_remaining_bits(&self) -> Option<u64> {
        u64_from_bv(&self.remaining_bits())
    }

    /// Structural equality of the unread payload of two slices: equal bit
    /// counts and equal bit content.
    pub fn contents_equal(&self, ctx: &'ctx Context, other: &Self) -> Bool<'ctx> {
        let n_self = self.remaining_bits();
        let n_other = other.remaining_bits();
        let same_len = n_self._eq(&n_other);

        let ones = BV::from_u64(ctx, 0, DATA_BITS).bvnot();
        let total = BV::from_u64(ctx, DATA_BITS as u64, DATA_BITS);
        let n = n_self.zero_ext(DATA_BITS - LEN_BITS);
        let keep = ones.bvshl(&total.bvsub(&n));

        let a = self.remaining_window().bvand(&keep);
        let b = other.remaining_window().bvand(&keep);
        Bool::and(ctx, &[&same_len, &a._eq(&b)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::{bigint_from_bv, biguint_from_bv};
    use num_bigint::{BigInt, BigUint};
    use z3::Config;

    fn bits_of(byte: u8) -> Vec<bool> {
        (0..8).rev().map(|i| byte & (1 << i) != 0).collect()
    }

    #[test]
    fn test_preload_then_advance_reads_in_order() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // Payload 0xA7 = 1010 0111.
        let cell = Arc::new(Cell::from_bits(&ctx, 1, &bits_of(0xA7), Vec::new()));
        let mut slice = CellSlice::new(&ctx, cell);

        let hi = slice.preload_uint(4);
        assert_eq!(biguint_from_bv(&hi), Some(BigUint::from(0xAu32)));
        slice.advance_bits(&len_val(&ctx, 4));

        let lo = slice.preload_uint(4);
        assert_eq!(biguint_from_bv(&lo), Some(BigUint::from(0x7u32)));
        slice.advance_bits(&len_val(&ctx, 4));

        assert_eq!(slice.concrete_remaining_bits(), Some(0));
    }

    #[test]
    fn test_preload_int_sign_extends() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // 1111 as a 4-bit signed integer is -1.
        let cell = Arc::new(Cell::from_bits(&ctx, 1, &[true, true, true, true], Vec::new()));
        let slice = CellSlice::new(&ctx, cell);
        assert_eq!(bigint_from_bv(&slice.preload_int(4)), Some(BigInt::from(-1)));
        assert_eq!(
            biguint_from_bv(&slice.preload_uint(4)),
            Some(BigUint::from(15u32))
        );
    }

    #[test]
    fn test_underflow_condition_is_exact() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let cell = Arc::new(Cell::from_bits(&ctx, 1, &bits_of(0xFF), Vec::new()));
        let slice = CellSlice::new(&ctx, cell);

        let fits = slice.bits_underflow(&len_val(&ctx, 8));
        assert_eq!(fits.simplify().as_bool(), Some(false));
        let breaks = slice.bits_underflow(&len_val(&ctx, 9));
        assert_eq!(breaks.simplify().as_bool(), Some(true));
    }

    #[test]
    fn test_dynamic_width_read_matches_static() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let cell = Arc::new(Cell::from_bits(&ctx, 1, &bits_of(0xC3), Vec::new()));
        let slice = CellSlice::new(&ctx, cell);

        let stat = slice.preload_uint(6);
        let dynamic = slice.preload_uint_dyn(&ctx, &len_val(&ctx, 6));
        assert_eq!(
            stat._eq(&dynamic).simplify().as_bool(),
            Some(true),
            "6-bit dynamic read must equal the static read"
        );
    }
}
