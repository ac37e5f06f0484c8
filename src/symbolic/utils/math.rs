//! Canonical location for shared symbolic integer helpers.
//! Rule: generic reusable bit-vector arithmetic belongs in this file.

use z3::ast::{Ast, Bool, BV};
use z3::Context;

use crate::symbolic::z3_ext::{int_val, int_zero, INT_BITS, LEN_BITS};

/// Floor division (round toward −∞), matching the VM's DIV. The caller
/// guards against a zero divisor.
pub fn floor_div<'ctx>(ctx: &'ctx Context, x: &BV<'ctx>, y: &BV<'ctx>) -> BV<'ctx> {
    let q = x.bvsdiv(y);
    let r = x.bvsrem(y);
    let zero = int_zero(ctx);
    let needs_fix = Bool::and(
        ctx,
        &[
            &r._eq(&zero).not(),
            &r.bvslt(&zero)._eq(&y.bvslt(&zero)).not(),
        ],
    );
    needs_fix.ite(&q.bvsub(&int_val(ctx, 1)), &q)
}

/// Floor modulus: result has the divisor's sign, `x = y*floor_div + mod`.
pub fn floor_mod<'ctx>(ctx: &'ctx Context, x: &BV<'ctx>, y: &BV<'ctx>) -> BV<'ctx> {
    let r = x.bvsrem(y);
    let zero = int_zero(ctx);
    let needs_fix = Bool::and(
        ctx,
        &[
            &r._eq(&zero).not(),
            &r.bvslt(&zero)._eq(&y.bvslt(&zero)).not(),
        ],
    );
    needs_fix.ite(&r.bvadd(y), &r)
}

/// x fits a signed `width`-bit integer (concrete width).
pub fn fits_signed<'ctx>(ctx: &'ctx Context, x: &BV<'ctx>, width: u32) -> Bool<'ctx> {
    if width >= INT_BITS {
        return Bool::from_bool(ctx, true);
    }
    let shift = BV::from_u64(ctx, (INT_BITS - width) as u64, INT_BITS);
    x.bvshl(&shift).bvashr(&shift)._eq(x)
}

/// x fits an unsigned `width`-bit integer (concrete width).
pub fn fits_unsigned<'ctx>(ctx: &'ctx Context, x: &BV<'ctx>, width: u32) -> Bool<'ctx> {
    if width >= INT_BITS {
        // Unsigned range still excludes negative values.
        return x.bvsge(&int_zero(ctx));
    }
    let shift = BV::from_u64(ctx, width as u64, INT_BITS);
    x.bvlshr(&shift)._eq(&int_zero(ctx))
}

/// x fits a signed integer of symbolic width (length-sorted BV).
pub fn fits_signed_dyn<'ctx>(ctx: &'ctx Context, x: &BV<'ctx>, width: &BV<'ctx>) -> Bool<'ctx> {
    let shift = BV::from_u64(ctx, INT_BITS as u64, INT_BITS)
        .bvsub(&width.zero_ext(INT_BITS - LEN_BITS));
    x.bvshl(&shift).bvashr(&shift)._eq(x)
}

/// x fits an unsigned integer of symbolic width.
pub fn fits_unsigned_dyn<'ctx>(ctx: &'ctx Context, x: &BV<'ctx>, width: &BV<'ctx>) -> Bool<'ctx> {
    x.bvlshr(&width.zero_ext(INT_BITS - LEN_BITS))
        ._eq(&int_zero(ctx))
}

/// Signed overflow-free left shift: shifting back recovers the value.
pub fn lshift_no_overflow<'ctx>(x: &BV<'ctx>, amount: &BV<'ctx>) -> Bool<'ctx> {
    x.bvshl(amount).bvashr(amount)._eq(x)
}
