use std::sync::Arc;

use crate::insn::CellBuildInstr;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::memory::{Builder, CellSlice};
use crate::symbolic::opcodes::{ensure_builder_bits, require_or_raise};
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::{MockRecord, VmState};
use crate::symbolic::utils::math;
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{
    int_val, int_zero, len_val, u64_from_bv, INT_BITS, LEN_BITS,
};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &CellBuildInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        CellBuildInstr::NewBuilder => state.stack.push(StackValue::Builder(Builder::new(ctx))),
        CellBuildInstr::EndCell => {
            let b = state.stack.pop_builder()?;
            let id = interp.fresh_cell_id();
            state.stack.push(StackValue::Cell(Arc::new(b.seal(ctx, id))))
        }
        CellBuildInstr::StUint(n) => store_static(interp, state, *n, false, out),
        CellBuildInstr::StInt(n) => store_static(interp, state, *n, true, out),
        CellBuildInstr::StUintVar => store_var(interp, state, false, out),
        CellBuildInstr::StIntVar => store_var(interp, state, true, out),
        CellBuildInstr::StRef => {
            let b = state.stack.pop_builder()?;
            let c = state.stack.pop_cell()?;
            if b.refs_full() {
                return Err(StepError::vm(VmFailure::CellOverflow));
            }
            state.stack.push(StackValue::Builder(b.store_ref(c)))
        }
        CellBuildInstr::StBuilderRef => {
            let b = state.stack.pop_builder()?;
            let inner = state.stack.pop_builder()?;
            if b.refs_full() {
                return Err(StepError::vm(VmFailure::CellOverflow));
            }
            let id = interp.fresh_cell_id();
            let child = Arc::new(inner.seal(ctx, id));
            state.stack.push(StackValue::Builder(b.store_ref(child)))
        }
        CellBuildInstr::StSlice => {
            let b = state.stack.pop_builder()?;
            let s = state.stack.pop_slice()?;
            let appended = store_slice_into(interp, state, &b, &s, out)?;
            state.stack.push(StackValue::Builder(appended))
        }
        CellBuildInstr::StBuilder => {
            let b = state.stack.pop_builder()?;
            let inner = state.stack.pop_builder()?;
            let count = inner.data_len.clone();
            let cap = inner.max_bits.unwrap_or(crate::symbolic::z3_ext::MAX_CELL_BITS);
            ensure_builder_bits(interp, state, &b, &count, cap, out)?;
            if b.refs.len() + inner.refs.len() > crate::symbolic::z3_ext::MAX_CELL_REFS as usize {
                return Err(StepError::vm(VmFailure::CellOverflow));
            }
            let mut merged = b.store_window(ctx, &inner.data, &count, cap);
            for child in &inner.refs {
                merged = merged.store_ref(child.clone());
            }
            state.stack.push(StackValue::Builder(merged))
        }
        CellBuildInstr::BuilderBits => {
            let b = state.stack.pop_builder()?;
            let bits = b.data_len.zero_ext(INT_BITS - LEN_BITS);
            state.stack.push(StackValue::Builder(b))?;
            state.stack.push_int(bits)
        }
        CellBuildInstr::BuilderRefs => {
            let b = state.stack.pop_builder()?;
            let refs = int_val(ctx, b.refs.len() as i64);
            state.stack.push(StackValue::Builder(b))?;
            state.stack.push_int(refs)
        }
        CellBuildInstr::BuilderRemBits => {
            let b = state.stack.pop_builder()?;
            let max = len_val(ctx, crate::symbolic::z3_ext::MAX_CELL_BITS);
            let rem = max.bvsub(&b.data_len).zero_ext(INT_BITS - LEN_BITS);
            state.stack.push(StackValue::Builder(b))?;
            state.stack.push_int(rem)
        }
        CellBuildInstr::BuilderDepth => {
            let b = state.stack.pop_builder()?;
            let id = interp.fresh_cell_id();
            let cell = Arc::new(b.seal(ctx, id));
            let mock = interp.fresh_int("builder_depth");
            state.add_constraint(mock.bvsge(&int_zero(ctx)));
            state.add_constraint(mock.bvsle(&int_val(ctx, 1024)));
            state.mocks.push(MockRecord::CellDepth {
                cell,
                mock: mock.clone(),
            });
            state.stack.push(StackValue::Builder(b))?;
            state.stack.push_int(mock)
        }
    }
}

fn store_static<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    width: u32,
    signed: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let b = state.stack.pop_builder()?;
    let x = state.stack.pop_int()?;

    let fits = if signed {
        math::fits_signed(ctx, &x, width)
    } else {
        math::fits_unsigned(ctx, &x, width)
    };
    require_or_raise(interp, state, fits, VmFailure::RangeCheck, out)?;

    let w = len_val(ctx, width as u64);
    ensure_builder_bits(interp, state, &b, &w, width as u64, out)?;
    state
        .stack
        .push(StackValue::Builder(b.store_uint(ctx, &x, &w, width as u64)))
}

fn store_var<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    signed: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let b = state.stack.pop_builder()?;
    let n = state.stack.pop_int()?;
    let x = state.stack.pop_int()?;

    let max_w = if signed { 257 } else { 256 };
    let in_range = z3::ast::Bool::and(
        ctx,
        &[&n.bvsge(&int_zero(ctx)), &n.bvsle(&int_val(ctx, max_w))],
    );
    require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)?;

    let w = n.extract(LEN_BITS - 1, 0);
    let fits = if signed {
        math::fits_signed_dyn(ctx, &x, &w)
    } else {
        math::fits_unsigned_dyn(ctx, &x, &w)
    };
    require_or_raise(interp, state, fits, VmFailure::RangeCheck, out)?;

    ensure_builder_bits(interp, state, &b, &w, max_w as u64, out)?;
    state
        .stack
        .push(StackValue::Builder(b.store_uint(ctx, &x, &w, max_w as u64)))
}

/// Appends a slice's unread payload and remaining refs to a builder.
pub fn store_slice_into<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    b: &Builder<'ctx>,
    s: &CellSlice<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<Builder<'ctx>, StepError> {
    let ctx = interp.ctx;
    let count = s.remaining_bits();
    let cap = s
        .concrete_remaining_bits()
        .unwrap_or(crate::symbolic::z3_ext::MAX_CELL_BITS);
    ensure_builder_bits(interp, state, b, &count, cap, out)?;

    let mut merged = b.store_window(ctx, &s.remaining_window(), &count, cap);

    let rem_refs = require_concrete(
        u64_from_bv(&s.remaining_refs(ctx)),
        "slice ref count for store",
    )? as usize;
    if merged.refs.len() + rem_refs > crate::symbolic::z3_ext::MAX_CELL_REFS as usize {
        return Err(StepError::vm(VmFailure::CellOverflow));
    }
    for i in 0..rem_refs {
        let idx = s.ref_pos + i;
        let child = match s.cell.refs.get(idx) {
            Some(c) => c.clone(),
            None => {
                let id = interp.fresh_cell_id();
                state.input_child(ctx, &interp.solver, &s.cell, idx, id)
            }
        };
        merged = merged.store_ref(child);
    }
    Ok(merged)
}
