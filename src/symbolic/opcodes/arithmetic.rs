use z3::ast::{Ast, Bool, BV};

use crate::insn::ArithInstr;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::StepError;
use crate::symbolic::opcodes::require_or_raise;
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;
use crate::symbolic::utils::math;
use crate::symbolic::z3_ext::{bv_from_bigint, int_val, int_zero, INT_BITS, LEN_BITS};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &ArithInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        ArithInstr::PushInt(v) => state.stack.push_int(int_val(ctx, *v)),
        ArithInstr::PushIntBig(v) => state.stack.push_int(bv_from_bigint(ctx, v, INT_BITS)),
        ArithInstr::PushPow2(n) => {
            let one = int_val(ctx, 1);
            state
                .stack
                .push_int(one.bvshl(&int_val(ctx, *n as i64)))
        }
        ArithInstr::PushPow2Dec(n) => {
            let one = int_val(ctx, 1);
            let p = one.bvshl(&int_val(ctx, *n as i64));
            state.stack.push_int(p.bvsub(&int_val(ctx, 1)))
        }
        ArithInstr::PushNegPow2(n) => {
            let one = int_val(ctx, 1);
            let p = one.bvshl(&int_val(ctx, *n as i64));
            state.stack.push_int(p.bvneg())
        }
        ArithInstr::Add => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            let safe = Bool::and(
                ctx,
                &[&x.bvadd_no_overflow(&y, true), &x.bvadd_no_underflow(&y)],
            );
            require_or_raise(interp, state, safe, VmFailure::IntegerOverflow, out)?;
            state.stack.push_int(x.bvadd(&y))
        }
        ArithInstr::Sub => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            sub_checked(interp, state, &x, &y, out)
        }
        ArithInstr::SubR => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            sub_checked(interp, state, &y, &x, out)
        }
        ArithInstr::Mul => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            mul_checked(interp, state, &x, &y, out)
        }
        ArithInstr::Div => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            div_guards(interp, state, &x, &y, out)?;
            state.stack.push_int(math::floor_div(ctx, &x, &y))
        }
        ArithInstr::Mod => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            div_guards(interp, state, &x, &y, out)?;
            state.stack.push_int(math::floor_mod(ctx, &x, &y))
        }
        ArithInstr::DivMod => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            div_guards(interp, state, &x, &y, out)?;
            state.stack.push_int(math::floor_div(ctx, &x, &y))?;
            state.stack.push_int(math::floor_mod(ctx, &x, &y))
        }
        ArithInstr::Inc => add_const(interp, state, 1, out),
        ArithInstr::Dec => add_const(interp, state, -1, out),
        ArithInstr::AddConst(c) => add_const(interp, state, *c as i64, out),
        ArithInstr::MulConst(c) => {
            let x = state.stack.pop_int()?;
            let y = int_val(ctx, *c as i64);
            mul_checked(interp, state, &x, &y, out)
        }
        ArithInstr::Negate => {
            let x = state.stack.pop_int()?;
            require_or_raise(
                interp,
                state,
                x.bvneg_no_overflow(),
                VmFailure::IntegerOverflow,
                out,
            )?;
            state.stack.push_int(x.bvneg())
        }
        ArithInstr::Abs => {
            let x = state.stack.pop_int()?;
            require_or_raise(
                interp,
                state,
                x.bvneg_no_overflow(),
                VmFailure::IntegerOverflow,
                out,
            )?;
            let neg = x.bvslt(&int_zero(ctx));
            state.stack.push_int(neg.ite(&x.bvneg(), &x))
        }
        ArithInstr::Min => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            state.stack.push_int(x.bvslt(&y).ite(&x, &y))
        }
        ArithInstr::Max => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            state.stack.push_int(x.bvsgt(&y).ite(&x, &y))
        }
        ArithInstr::MinMax => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            let lo = x.bvslt(&y).ite(&x, &y);
            let hi = x.bvslt(&y).ite(&y, &x);
            state.stack.push_int(lo)?;
            state.stack.push_int(hi)
        }
        ArithInstr::Lshift(n) => {
            let x = state.stack.pop_int()?;
            let amount = int_val(ctx, *n as i64);
            require_or_raise(
                interp,
                state,
                math::lshift_no_overflow(&x, &amount),
                VmFailure::IntegerOverflow,
                out,
            )?;
            state.stack.push_int(x.bvshl(&amount))
        }
        ArithInstr::Rshift(n) => {
            let x = state.stack.pop_int()?;
            state.stack.push_int(x.bvashr(&int_val(ctx, *n as i64)))
        }
        ArithInstr::LshiftVar => {
            let n = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            shift_range_guard(interp, state, &n, out)?;
            require_or_raise(
                interp,
                state,
                math::lshift_no_overflow(&x, &n),
                VmFailure::IntegerOverflow,
                out,
            )?;
            state.stack.push_int(x.bvshl(&n))
        }
        ArithInstr::RshiftVar => {
            let n = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            shift_range_guard(interp, state, &n, out)?;
            state.stack.push_int(x.bvashr(&n))
        }
        ArithInstr::Pow2 => {
            let n = state.stack.pop_int()?;
            shift_range_guard(interp, state, &n, out)?;
            let one = int_val(ctx, 1);
            require_or_raise(
                interp,
                state,
                math::lshift_no_overflow(&one, &n),
                VmFailure::IntegerOverflow,
                out,
            )?;
            state.stack.push_int(one.bvshl(&n))
        }
        ArithInstr::And => {
            binary_int_op!(state, bvand);
            Ok(())
        }
        ArithInstr::Or => {
            binary_int_op!(state, bvor);
            Ok(())
        }
        ArithInstr::Xor => {
            binary_int_op!(state, bvxor);
            Ok(())
        }
        ArithInstr::Not => {
            unary_int_op!(state, bvnot);
            Ok(())
        }
        ArithInstr::Fits(n) => {
            let x = state.stack.pop_int()?;
            let ok = math::fits_signed(ctx, &x, *n as u32);
            require_or_raise(interp, state, ok, VmFailure::IntegerOverflow, out)?;
            state.stack.push_int(x)
        }
        ArithInstr::UFits(n) => {
            let x = state.stack.pop_int()?;
            let ok = math::fits_unsigned(ctx, &x, *n as u32);
            require_or_raise(interp, state, ok, VmFailure::IntegerOverflow, out)?;
            state.stack.push_int(x)
        }
        ArithInstr::FitsVar => {
            let n = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            let width = narrow_width(&n)?;
            let ok = math::fits_signed_dyn(ctx, &x, &width);
            require_or_raise(interp, state, ok, VmFailure::IntegerOverflow, out)?;
            state.stack.push_int(x)
        }
        ArithInstr::UFitsVar => {
            let n = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            let width = narrow_width(&n)?;
            let ok = math::fits_unsigned_dyn(ctx, &x, &width);
            require_or_raise(interp, state, ok, VmFailure::IntegerOverflow, out)?;
            state.stack.push_int(x)
        }
        ArithInstr::MulDiv => {
            let (q, _r) = muldiv(interp, state, out)?;
            state.stack.push_int(q)
        }
        ArithInstr::MulDivMod => {
            let (q, r) = muldiv(interp, state, out)?;
            state.stack.push_int(q)?;
            state.stack.push_int(r)
        }
        ArithInstr::LshiftDiv => Err(StepError::unimplemented("LSHIFTDIV")),
        ArithInstr::LshiftDivMod => Err(StepError::unimplemented("LSHIFTDIVMOD")),
    }
}

fn add_const<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    c: i64,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let x = state.stack.pop_int()?;
    let y = int_val(ctx, c);
    let safe = Bool::and(
        ctx,
        &[&x.bvadd_no_overflow(&y, true), &x.bvadd_no_underflow(&y)],
    );
    require_or_raise(interp, state, safe, VmFailure::IntegerOverflow, out)?;
    state.stack.push_int(x.bvadd(&y))
}

fn sub_checked<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    x: &BV<'ctx>,
    y: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let safe = Bool::and(
        ctx,
        &[&x.bvsub_no_overflow(y), &x.bvsub_no_underflow(y, true)],
    );
    require_or_raise(interp, state, safe, VmFailure::IntegerOverflow, out)?;
    state.stack.push_int(x.bvsub(y))
}

fn mul_checked<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    x: &BV<'ctx>,
    y: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let safe = Bool::and(
        ctx,
        &[&x.bvmul_no_overflow(y, true), &x.bvmul_no_underflow(y)],
    );
    require_or_raise(interp, state, safe, VmFailure::IntegerOverflow, out)?;
    state.stack.push_int(x.bvmul(y))
}

/// Division guards: a feasible zero divisor forks into the hard failure, and
/// INT_MIN / −1 overflows.
fn div_guards<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    x: &BV<'ctx>,
    y: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let nonzero = y._eq(&int_zero(ctx)).not();
    require_or_raise(interp, state, nonzero, VmFailure::IntegerOverflow, out)?;
    require_or_raise(
        interp,
        state,
        x.bvsdiv_no_overflow(y),
        VmFailure::IntegerOverflow,
        out,
    )
}

/// Shift amounts must lie in 0..=256.
fn shift_range_guard<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    n: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let in_range = Bool::and(
        ctx,
        &[
            &n.bvsge(&int_zero(ctx)),
            &n.bvsle(&int_val(ctx, 256)),
        ],
    );
    require_or_raise(interp, state, in_range, VmFailure::RangeCheck, out)
}

/// Converts a 257-bit width operand (guarded to 0..=1023) to length sort.
fn narrow_width<'ctx>(n: &BV<'ctx>) -> Result<BV<'ctx>, StepError> {
    Ok(n.extract(LEN_BITS - 1, 0))
}

/// x*y/z on the widened domain, floor-rounded, with a result-range check.
fn muldiv<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(BV<'ctx>, BV<'ctx>), StepError> {
    let ctx = interp.ctx;
    let z = state.stack.pop_int()?;
    let y = state.stack.pop_int()?;
    let x = state.stack.pop_int()?;

    let nonzero = z._eq(&int_zero(ctx)).not();
    require_or_raise(interp, state, nonzero, VmFailure::IntegerOverflow, out)?;

    // Widen to 514 bits so the product never wraps.
    let wide = |v: &BV<'ctx>| v.sign_ext(INT_BITS);
    let prod = wide(&x).bvmul(&wide(&y));
    let zw = wide(&z);

    let q_wide = wide_floor_div(ctx, &prod, &zw);
    let r_wide = wide_floor_mod(ctx, &prod, &zw);

    // The quotient must fit back into 257 bits.
    let q = q_wide.extract(INT_BITS - 1, 0);
    let fits = q.sign_ext(INT_BITS)._eq(&q_wide);
    require_or_raise(interp, state, fits, VmFailure::IntegerOverflow, out)?;

    let r = r_wide.extract(INT_BITS - 1, 0);
    Ok((q, r))
}

fn wide_floor_div<'ctx>(ctx: &'ctx z3::Context, x: &BV<'ctx>, y: &BV<'ctx>) -> BV<'ctx> {
    let width = x.get_size();
    let zero = BV::from_u64(ctx, 0, width);
    let q = x.bvsdiv(y);
    let r = x.bvsrem(y);
    let needs_fix = Bool::and(
        ctx,
        &[
            &r._eq(&zero).not(),
            &r.bvslt(&zero)._eq(&y.bvslt(&zero)).not(),
        ],
    );
    needs_fix.ite(&q.bvsub(&BV::from_u64(ctx, 1, width)), &q)
}

fn wide_floor_mod<'ctx>(ctx: &'ctx z3::Context, x: &BV<'ctx>, y: &BV<'ctx>) -> BV<'ctx> {
    let width = x.get_size();
    let zero = BV::from_u64(ctx, 0, width);
    let r = x.bvsrem(y);
    let needs_fix = Bool::and(
        ctx,
        &[
            &r._eq(&zero).not(),
            &r.bvslt(&zero)._eq(&y.bvslt(&zero)).not(),
        ],
    );
    needs_fix.ite(&r.bvadd(y), &r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::u64_from_bv;

    #[test]
    fn test_narrow_width_is_len_sorted() {
        let cfg = z3::Config::new();
        let ctx = z3::Context::new(&cfg);
        let n = int_val(&ctx, 17);
        let w = narrow_width(&n).unwrap();
        assert_eq!(w.get_size(), LEN_BITS);
        assert_eq!(u64_from_bv(&w), Some(17));
    }
}
