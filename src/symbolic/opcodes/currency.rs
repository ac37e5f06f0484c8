//! Currency amounts and message-address parsing.
//!
//! Grams are `VarUInteger 16`: a 4-bit byte count then that many bytes.
//! Address parsing covers `addr_none` and `addr_std`; the var/extern forms
//! are explicit backlog.

use z3::ast::{Ast, Bool, BV};

use crate::insn::CurrencyInstr;
use crate::symbolic::engine::{BranchPlan, Interpreter};
use crate::symbolic::error::StepError;
use crate::symbolic::memory::{Builder, CellSlice};
use crate::symbolic::opcodes::{ensure_builder_bits, ensure_slice_bits, require_or_raise};
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{int_val, int_zero, len_val, LEN_BITS};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &CurrencyInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match instr {
        CurrencyInstr::LdGrams => {
            let s = state.stack.pop_slice()?;
            let (value, rest) = load_var_uint(interp, state, s, 4, out)?;
            state.stack.push_int(value)?;
            state.stack.push(StackValue::Slice(rest))
        }
        CurrencyInstr::LdVarUint(len_bits) => {
            let s = state.stack.pop_slice()?;
            let (value, rest) = load_var_uint(interp, state, s, *len_bits, out)?;
            state.stack.push_int(value)?;
            state.stack.push(StackValue::Slice(rest))
        }
        CurrencyInstr::StGrams => {
            let b = state.stack.pop_builder()?;
            let x = state.stack.pop_int()?;
            let stored = store_grams(interp, state, b, &x, out)?;
            state.stack.push(StackValue::Builder(stored))
        }
        CurrencyInstr::LdMsgAddr => {
            let s = state.stack.pop_slice()?;
            load_msg_addr(interp, state, s, out)
        }
        CurrencyInstr::ParseStdAddr => {
            let s = state.stack.pop_slice()?;
            parse_std_addr(interp, state, s, out)
        }
    }
}

/// Reads a VarUInteger: `len_bits` of byte count, then 8×count bits.
pub fn load_var_uint<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    mut s: CellSlice<'ctx>,
    len_bits: u32,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(BV<'ctx>, CellSlice<'ctx>), StepError> {
    let ctx = interp.ctx;
    let prefix = len_val(ctx, len_bits as u64);
    ensure_slice_bits(interp, state, &s, &prefix, out)?;
    let count = s.preload_uint_dyn(ctx, &prefix);
    s.advance_bits(&prefix);

    // count is a byte count; the payload is 8×count bits.
    let width = count
        .extract(LEN_BITS - 1, 0)
        .bvmul(&len_val(ctx, 8));
    ensure_slice_bits(interp, state, &s, &width, out)?;
    let value = s.preload_uint_dyn(ctx, &width);
    s.advance_bits(&width);
    Ok((value, s))
}

/// Stores a VarUInteger 16 with the canonical minimal byte length.
pub fn store_grams<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    b: Builder<'ctx>,
    x: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<Builder<'ctx>, StepError> {
    let ctx = interp.ctx;
    let nonneg = x.bvsge(&int_zero(ctx));
    require_or_raise(interp, state, nonneg, VmFailure::RangeCheck, out)?;

    // Concrete amounts take concrete widths, which keeps later cursor
    // positions over the sealed cell foldable.
    if let Some(v) = crate::symbolic::z3_ext::biguint_from_bv(x) {
        let byte_len = (v.bits() as u64).div_ceil(8);
        let four = len_val(ctx, 4);
        ensure_builder_bits(interp, state, &b, &four, 4, out)?;
        let b = b.store_uint(ctx, &int_val(ctx, byte_len as i64), &four, 4);
        let width = len_val(ctx, byte_len * 8);
        ensure_builder_bits(interp, state, &b, &width, byte_len * 8, out)?;
        return Ok(b.store_uint(ctx, x, &width, byte_len * 8));
    }

    // Canonical length: the least l with x < 2^(8l), 0 ≤ l ≤ 15.
    let len = interp.fresh_int("grams_len");
    let eight = int_val(ctx, 8);
    let one = int_val(ctx, 1);
    let upper = one.bvshl(&len.bvmul(&eight));
    state.add_constraint(len.bvsge(&int_zero(ctx)));
    state.add_constraint(len.bvsle(&int_val(ctx, 15)));
    state.add_constraint(x.bvslt(&upper));
    let minimal = Bool::or(
        ctx,
        &[
            &len._eq(&int_zero(ctx)),
            &x.bvsge(&one.bvshl(&len.bvsub(&one).bvmul(&eight))),
        ],
    );
    state.add_constraint(minimal);

    let four = len_val(ctx, 4);
    ensure_builder_bits(interp, state, &b, &four, 4, out)?;
    let b = b.store_uint(ctx, &len, &four, 4);

    let width = len.extract(LEN_BITS - 1, 0).bvmul(&len_val(ctx, 8));
    ensure_builder_bits(interp, state, &b, &width, 120, out)?;
    Ok(b.store_uint(ctx, x, &width, 120))
}

/// LDMSGADDR: split off the address part; push (address slice, remainder).
fn load_msg_addr<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    s: CellSlice<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let two = len_val(ctx, 2);
    ensure_slice_bits(interp, state, &s, &two, out)?;
    let tag = s.preload_uint(2);

    let finish = |interp: &mut Interpreter<'ctx>,
                  state: &mut VmState<'ctx>,
                  s: &CellSlice<'ctx>,
                  addr_bits: u64,
                  out: &mut Vec<VmState<'ctx>>|
     -> Result<(), StepError> {
        let w = len_val(ctx, addr_bits);
        ensure_slice_bits(interp, state, s, &w, out)?;
        let addr = cut_bits(interp, s, addr_bits);
        let mut rest = s.clone();
        rest.advance_bits(&w);
        state.stack.push(StackValue::Slice(addr))?;
        state.stack.push(StackValue::Slice(rest))
    };

    // addr_none$00 (2 bits) vs addr_std$10 (2 + 1 + 8 + 256 bits); the
    // var/extern forms are explicit backlog.
    let none_or_backlog = |interp: &mut Interpreter<'ctx>,
                           state: &mut VmState<'ctx>,
                           out: &mut Vec<VmState<'ctx>>|
     -> Result<(), StepError> {
        let is_none = tag._eq(&int_zero(ctx));
        match interp.fork_on(state, is_none) {
            BranchPlan::TakeTrue => finish(interp, state, &s, 2, out),
            BranchPlan::TakeFalse => {
                Err(StepError::unimplemented("LDMSGADDR var/extern address form"))
            }
            BranchPlan::Both { other } => {
                interp.absorb_error(
                    other,
                    StepError::unimplemented("LDMSGADDR var/extern address form"),
                    out,
                );
                finish(interp, state, &s, 2, out)
            }
            BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
        }
    };

    let is_std = tag._eq(&int_val(ctx, 0b10));
    match interp.fork_on(state, is_std) {
        BranchPlan::TakeTrue => finish(interp, state, &s, 267, out),
        BranchPlan::TakeFalse => none_or_backlog(interp, state, out),
        BranchPlan::Both { mut other } => {
            match none_or_backlog(interp, &mut other, out) {
                Ok(()) => {
                    if !other.dead {
                        out.push(other);
                    }
                }
                Err(err) => interp.absorb_error(other, err, out),
            }
            finish(interp, state, &s, 267, out)
        }
        BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
    }
}

/// REWRITESTDADDR: parse addr_std into (workchain, address).
fn parse_std_addr<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    mut s: CellSlice<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let header = len_val(ctx, 3);
    ensure_slice_bits(interp, state, &s, &header, out)?;
    let tag = s.preload_uint(2);
    let is_std = tag._eq(&int_val(ctx, 0b10));
    match interp.fork_on(state, is_std) {
        BranchPlan::TakeTrue => {}
        BranchPlan::TakeFalse => {
            return Err(StepError::unimplemented(
                "REWRITESTDADDR non-standard address form",
            ))
        }
        BranchPlan::Both { other } => {
            // The non-std side is explicit backlog: discarded with a
            // diagnostic rather than silently approximated.
            interp.absorb_error(
                other,
                StepError::unimplemented("REWRITESTDADDR non-standard address form"),
                out,
            );
        }
        BranchPlan::Dead | BranchPlan::Undecided => return Ok(()),
    }

    // Anycast must be absent for the rewrite to be the identity.
    let anycast = s.preload_uint(3).bvand(&int_val(ctx, 1));
    require_or_raise(
        interp,
        state,
        anycast._eq(&int_zero(ctx)),
        VmFailure::CellUnderflow,
        out,
    )?;
    s.advance_bits(&header);

    let wc_w = len_val(ctx, 8);
    ensure_slice_bits(interp, state, &s, &wc_w, out)?;
    let wc = s.preload_int(8);
    s.advance_bits(&wc_w);

    let addr_w = len_val(ctx, 256);
    ensure_slice_bits(interp, state, &s, &addr_w, out)?;
    let addr = s.preload_uint(256);
    s.advance_bits(&addr_w);

    state.stack.push_int(wc)?;
    state.stack.push_int(addr)
}

/// A standalone slice holding the next `bits` unread bits of `s`.
fn cut_bits<'ctx>(
    interp: &mut Interpreter<'ctx>,
    s: &CellSlice<'ctx>,
    bits: u64,
) -> CellSlice<'ctx> {
    let w = len_val(interp.ctx, bits);
    crate::symbolic::opcodes::cells_parse::cut_front(interp, s, &w)
}
