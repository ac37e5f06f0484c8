use std::sync::Arc;

use z3::ast::{Ast, BV};

use crate::insn::{CellParseInstr, CodeCell};
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::StepError;
use crate::symbolic::memory::{Cell, CellSlice};
use crate::symbolic::opcodes::{ensure_slice_bits, ensure_slice_ref, require_or_raise};
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::{MockRecord, VmState};
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{
    bool_to_int, int_val, int_zero, len_val, DATA_BITS, INT_BITS, LEN_BITS,
};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &CellParseInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        CellParseInstr::PushSlice(bits) => {
            let id = interp.fresh_cell_id();
            let cell = Arc::new(Cell::from_bits(ctx, id, bits, Vec::new()));
            state.stack.push(StackValue::Slice(CellSlice::new(ctx, cell)))
        }
        CellParseInstr::PushRef(code_cell) => {
            let cell = build_code_cell(interp, code_cell);
            state.stack.push(StackValue::Cell(cell))
        }
        CellParseInstr::CellToSlice => {
            let c = state.stack.pop_cell()?;
            state.stack.push(StackValue::Slice(CellSlice::new(ctx, c)))
        }
        CellParseInstr::EndParse => {
            let s = state.stack.pop_slice()?;
            let exhausted = s.is_exhausted(ctx);
            require_or_raise(interp, state, exhausted, VmFailure::CellUnderflow, out)
        }
        CellParseInstr::LdUint(n) => load_static(interp, state, *n, false, true, out),
        CellParseInstr::LdInt(n) => load_static(interp, state, *n, true, true, out),
        CellParseInstr::PldUint(n) => load_static(interp, state, *n, false, false, out),
        CellParseInstr::PldInt(n) => load_static(interp, state, *n, true, false, out),
        CellParseInstr::LdUintVar => load_var(interp, state, false, out),
        CellParseInstr::LdIntVar => load_var(interp, state, true, out),
        CellParseInstr::LdRef => {
            let mut s = state.stack.pop_slice()?;
            ensure_slice_ref(interp, state, &s, out)?;
            let child = resolve_ref(interp, state, &s)?;
            s.advance_ref();
            state.stack.push(StackValue::Cell(child))?;
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::PldRef => {
            let s = state.stack.pop_slice()?;
            ensure_slice_ref(interp, state, &s, out)?;
            let child = resolve_ref(interp, state, &s)?;
            state.stack.push(StackValue::Cell(child))?;
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::LdRefToSlice => {
            let mut s = state.stack.pop_slice()?;
            ensure_slice_ref(interp, state, &s, out)?;
            let child = resolve_ref(interp, state, &s)?;
            s.advance_ref();
            state
                .stack
                .push(StackValue::Slice(CellSlice::new(ctx, child)))?;
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::LdSlice(n) => {
            let mut s = state.stack.pop_slice()?;
            let w = len_val(ctx, *n as u64);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            let cut = cut_front(interp, &s, &w);
            s.advance_bits(&w);
            state.stack.push(StackValue::Slice(cut))?;
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::LdSliceVar => {
            let n = state.stack.pop_int()?;
            let mut s = state.stack.pop_slice()?;
            let in_range = slice_width_range(ctx, &n);
            require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)?;
            let w = n.extract(LEN_BITS - 1, 0);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            let cut = cut_front(interp, &s, &w);
            s.advance_bits(&w);
            state.stack.push(StackValue::Slice(cut))?;
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::SliceBits => {
            let s = state.stack.pop_slice()?;
            let bits = s.remaining_bits().zero_ext(INT_BITS - LEN_BITS);
            state.stack.push_int(bits)
        }
        CellParseInstr::SliceRefs => {
            let s = state.stack.pop_slice()?;
            let refs = s.remaining_refs(ctx).zero_ext(INT_BITS - LEN_BITS);
            state.stack.push_int(refs)
        }
        CellParseInstr::SliceBitRefs => {
            let s = state.stack.pop_slice()?;
            let bits = s.remaining_bits().zero_ext(INT_BITS - LEN_BITS);
            let refs = s.remaining_refs(ctx).zero_ext(INT_BITS - LEN_BITS);
            state.stack.push_int(bits)?;
            state.stack.push_int(refs)
        }
        CellParseInstr::SliceEmpty => {
            let s = state.stack.pop_slice()?;
            let e = s.is_exhausted(ctx);
            state.stack.push_int(bool_to_int(ctx, &e))
        }
        CellParseInstr::SliceDataEmpty => {
            let s = state.stack.pop_slice()?;
            let e = s.remaining_bits()._eq(&len_val(ctx, 0));
            state.stack.push_int(bool_to_int(ctx, &e))
        }
        CellParseInstr::SliceRefsEmpty => {
            let s = state.stack.pop_slice()?;
            let e = s.remaining_refs(ctx)._eq(&len_val(ctx, 0));
            state.stack.push_int(bool_to_int(ctx, &e))
        }
        CellParseInstr::SkipBits(n) => {
            let mut s = state.stack.pop_slice()?;
            let w = len_val(ctx, *n as u64);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            s.advance_bits(&w);
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::SkipBitsVar => {
            let n = state.stack.pop_int()?;
            let mut s = state.stack.pop_slice()?;
            let in_range = slice_width_range(ctx, &n);
            require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)?;
            let w = n.extract(LEN_BITS - 1, 0);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            s.advance_bits(&w);
            state.stack.push(StackValue::Slice(s))
        }
        CellParseInstr::CutFirst => {
            let n = state.stack.pop_int()?;
            let s = state.stack.pop_slice()?;
            let in_range = slice_width_range(ctx, &n);
            require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)?;
            let w = n.extract(LEN_BITS - 1, 0);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            let cut = cut_front(interp, &s, &w);
            state.stack.push(StackValue::Slice(cut))
        }
        CellParseInstr::SliceDepth => {
            let s = state.stack.pop_slice()?;
            let mock = interp.fresh_int("slice_depth");
            state.add_constraint(mock.bvsge(&int_zero(ctx)));
            state.add_constraint(mock.bvsle(&int_val(ctx, 1024)));
            state.mocks.push(MockRecord::CellDepth {
                cell: s.cell.clone(),
                mock: mock.clone(),
            });
            state.stack.push_int(mock)
        }
        CellParseInstr::SliceEq => {
            let b = state.stack.pop_slice()?;
            let a = state.stack.pop_slice()?;
            let eq = a.contents_equal(ctx, &b);
            state.stack.push_int(bool_to_int(ctx, &eq))
        }
        CellParseInstr::CheckBits => {
            let n = state.stack.pop_int()?;
            let s = state.stack.pop_slice()?;
            let in_range = slice_width_range(ctx, &n);
            require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)?;
            let w = n.extract(LEN_BITS - 1, 0);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            state.stack.push(StackValue::Slice(s))
        }
    }
}

fn slice_width_range<'ctx>(ctx: &'ctx z3::Context, n: &BV<'ctx>) -> z3::ast::Bool<'ctx> {
    z3::ast::Bool::and(
        ctx,
        &[&n.bvsge(&int_zero(ctx)), &n.bvsle(&int_val(ctx, 1023))],
    )
}

fn load_static<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    width: u32,
    signed: bool,
    advance: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let mut s = state.stack.pop_slice()?;
    let w = len_val(ctx, width as u64);
    ensure_slice_bits(interp, state, &s, &w, out)?;
    let value = if signed {
        s.preload_int(width)
    } else {
        s.preload_uint(width)
    };
    state.stack.push_int(value)?;
    if advance {
        s.advance_bits(&w);
        state.stack.push(StackValue::Slice(s))?;
    }
    Ok(())
}

fn load_var<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    signed: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let n = state.stack.pop_int()?;
    let mut s = state.stack.pop_slice()?;

    let max_w = if signed { 257 } else { 256 };
    let in_range = z3::ast::Bool::and(
        ctx,
        &[&n.bvsge(&int_zero(ctx)), &n.bvsle(&int_val(ctx, max_w))],
    );
    require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)?;

    let w = n.extract(LEN_BITS - 1, 0);
    ensure_slice_bits(interp, state, &s, &w, out)?;
    let value = if signed {
        s.preload_int_dyn(ctx, &w)
    } else {
        s.preload_uint_dyn(ctx, &w)
    };
    s.advance_bits(&w);
    state.stack.push_int(value)?;
    state.stack.push(StackValue::Slice(s))
}

/// Child at the slice's ref cursor, materializing input-cell children.
pub fn resolve_ref<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    s: &CellSlice<'ctx>,
) -> Result<Arc<Cell<'ctx>>, StepError> {
    if let Some(child) = s.peek_ref() {
        return Ok(child);
    }
    let id = interp.fresh_cell_id();
    Ok(state.input_child(interp.ctx, &interp.solver, &s.cell, s.ref_pos, id))
}

/// New slice over an allocated cell holding the next `w` unread bits.
pub fn cut_front<'ctx>(
    interp: &mut Interpreter<'ctx>,
    s: &CellSlice<'ctx>,
    w: &BV<'ctx>,
) -> CellSlice<'ctx> {
    let ctx = interp.ctx;
    let ones = BV::from_u64(ctx, 0, DATA_BITS).bvnot();
    let total = BV::from_u64(ctx, DATA_BITS as u64, DATA_BITS);
    let n = w.zero_ext(DATA_BITS - LEN_BITS);
    let keep = ones.bvshl(&total.bvsub(&n));
    let data = s.remaining_window().bvand(&keep);
    let id = interp.fresh_cell_id();
    let cell = Arc::new(Cell::allocated(ctx, id, data, w.clone(), Vec::new()));
    CellSlice::new(ctx, cell)
}

fn build_code_cell<'ctx>(interp: &mut Interpreter<'ctx>, cc: &CodeCell) -> Arc<Cell<'ctx>> {
    let children = cc
        .children
        .iter()
        .map(|child| build_code_cell(interp, child))
        .collect();
    let id = interp.fresh_cell_id();
    Arc::new(Cell::from_bits(interp.ctx, id, &cc.bits, children))
}
