use std::sync::Arc;

use z3::ast::{Bool, BV};
use z3::Context;

use super::cell::Cell;
use crate::symbolic::z3_ext::{len_val, DATA_BITS, LEN_BITS, MAX_CELL_BITS, MAX_CELL_REFS};

/// Write cursor over an unfinished cell.
///
/// `max_bits` is a concrete upper bound on the final data length, propagated
/// additively across stores. While it stays ≤ 1023 every overflow check is
/// decided without the solver, which matters at the store volume of one run.
#[derive(Debug, Clone)]
pub struct Builder<'ctx> {
    pub data: BV<'ctx>,
    pub data_len: BV<'ctx>,
    pub refs: Vec<Arc<Cell<'ctx>>>,
    pub max_bits: Option<u64>,
}

impl<'ctx> Builder<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            data: BV::from_u64(ctx, 0, DATA_BITS),
            data_len: len_val(ctx, 0),
            refs: Vec::new(),
            max_bits: Some(0),
        }
    }

    /// True when storing `extra` more bits provably cannot overflow,
    /// regardless of any symbolic lengths involved.
    pub fn provably_fits(&self, extra: u64) -> bool {
        self.max_bits
            .map(|bound| bound + extra <= MAX_CELL_BITS)
            .unwrap_or(false)
    }

    /// Condition under which appending `width` bits overflows the cell.
    pub fn overflow_condition(&self, ctx: &'ctx Context, width: &BV<'ctx>) -> Bool<'ctx> {
        self.data_len
            .bvadd(width)
            .bvugt(&len_val(ctx, MAX_CELL_BITS))
    }

    pub fn refs_full(&self) -> bool {
        self.refs.len() as u64 >= MAX_CELL_REFS
    }

    /// Appends the low `width` bits of `value`. `width` may be symbolic;
    /// `width_cap` is the static maximum the instruction permits and feeds
    /// the additive bound.
    pub fn store_uint(
        &self,
        ctx: &'ctx Context,
        value: &BV<'ctx>,
        width: &BV<'ctx>,
        width_cap: u64,
    ) -> Self {
        let n = width.zero_ext(DATA_BITS - LEN_BITS);
        let v = value.zero_ext(DATA_BITS - value.get_size());

        let one = BV::from_u64(ctx, 1, DATA_BITS);
        let mask = one.bvshl(&n).bvsub(&one);
        let field = v.bvand(&mask);

        // Left-align the field so its first bit lands at position data_len.
        let total = BV::from_u64(ctx, DATA_BITS as u64, DATA_BITS);
        let len = self.data_len.zero_ext(DATA_BITS - LEN_BITS);
        let shift = total.bvsub(&n).bvsub(&len);

        Self {
            data: self.data.bvor(&field.bvshl(&shift)),
            data_len: self.data_len.bvadd(width),
            refs: self.refs.clone(),
            max_bits: self.max_bits.map(|bound| bound + width_cap),
        }
    }

    /// Appends the top `count` bits of a payload-aligned window (the shape
    /// produced by [`super::CellSlice::remaining_window`]).
    pub fn store_window(
        &self,
        ctx: &'ctx Context,
        window: &BV<'ctx>,
        count: &BV<'ctx>,
        width_cap: u64,
    ) -> Self {
        let n = count.zero_ext(DATA_BITS - LEN_BITS);
        let total = BV::from_u64(ctx, DATA_BITS as u64, DATA_BITS);
        let ones = BV::from_u64(ctx, 0, DATA_BITS).bvnot();

        // Keep only the top `count` bits of the window, then drop it at the
        // current write position.
        let keep = ones.bvshl(&total.bvsub(&n));
        let len = self.data_len.zero_ext(DATA_BITS - LEN_BITS);
        let placed = window.bvand(&keep).bvlshr(&len);

        Self {
            data: self.data.bvor(&placed),
            data_len: self.data_len.bvadd(count),
            refs: self.refs.clone(),
            max_bits: self.max_bits.map(|bound| bound + width_cap),
        }
    }

    pub fn store_ref(&self, child: Arc<Cell<'ctx>>) -> Self {
        let mut refs = self.refs.clone();
        refs.push(child);
        Self {
            data: self.data.clone(),
            data_len: self.data_len.clone(),
            refs,
            max_bits: self.max_bits,
        }
    }

    /// Seals the builder into an immutable cell with the given identity.
    pub fn seal(&self, ctx: &'ctx Context, id: u64) -> Cell<'ctx> {
        Cell::allocated(
            ctx,
            id,
            self.data.clone(),
            self.data_len.clone(),
            self.refs.clone(),
        )
    }
}
