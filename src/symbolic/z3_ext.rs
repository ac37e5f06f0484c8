//! Width helpers and solver plumbing shared by the whole symbolic core.
//!
//! TVM integers are 257-bit signed bit-vectors; cell payloads are 1023-bit
//! left-aligned bit-vectors with 16-bit length/position fields. Everything
//! that converts between Rust integers, `num_bigint` values and z3 ASTs
//! lives here.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use z3::ast::{Ast, Bool, BV};
use z3::{Context, Model, SatResult, Solver};

/// Width of a TVM integer (signed 257-bit).
pub const INT_BITS: u32 = 257;
/// Width of a cell data payload.
pub const DATA_BITS: u32 = 1023;
/// Width of length/position fields (bit offsets into a cell).
pub const LEN_BITS: u32 = 16;
/// Maximum number of data bits in one cell.
pub const MAX_CELL_BITS: u64 = 1023;
/// Maximum number of child references in one cell.
pub const MAX_CELL_REFS: u64 = 4;

pub fn int_val(ctx: &Context, v: i64) -> BV<'_> {
    BV::from_i64(ctx, v, INT_BITS)
}

pub fn int_zero(ctx: &Context) -> BV<'_> {
    BV::from_u64(ctx, 0, INT_BITS)
}

/// TVM truth value: comparisons produce -1, not 1.
pub fn int_true(ctx: &Context) -> BV<'_> {
    int_val(ctx, -1)
}

pub fn len_val(ctx: &Context, v: u64) -> BV<'_> {
    BV::from_u64(ctx, v, LEN_BITS)
}

pub fn bool_to_int<'ctx>(ctx: &'ctx Context, b: &Bool<'ctx>) -> BV<'ctx> {
    b.ite(&int_true(ctx), &int_zero(ctx))
}

/// A TVM condition is "true" iff the integer is non-zero.
pub fn int_is_true<'ctx>(ctx: &'ctx Context, v: &BV<'ctx>) -> Bool<'ctx> {
    v._eq(&int_zero(ctx)).not()
}

/// Builds a BV of the given width from a (possibly negative) big integer,
/// two's-complement encoded. Values wider than `width` are truncated.
pub fn bv_from_bigint<'ctx>(ctx: &'ctx Context, value: &BigInt, width: u32) -> BV<'ctx> {
    let modulus = BigUint::one() << width;
    let mag = match value.sign() {
        Sign::Minus => {
            let abs = value.magnitude() % &modulus;
            if abs.is_zero() {
                abs
            } else {
                &modulus - abs
            }
        }
        _ => value.magnitude() % &modulus,
    };

    // Assemble from 64-bit limbs, most significant first, to avoid the
    // string-parsing constructors which can silently degrade on failure.
    let limbs = mag.to_u64_digits();
    let mut acc: Option<BV<'ctx>> = None;
    let limb_count = (width + 63) / 64;
    for i in (0..limb_count).rev() {
        let limb = limbs.get(i as usize).copied().unwrap_or(0);
        let piece_width = if i == limb_count - 1 && width % 64 != 0 {
            width % 64
        } else {
            64
        };
        let piece = if piece_width == 64 {
            BV::from_u64(ctx, limb, 64)
        } else {
            BV::from_u64(ctx, limb & ((1u64 << piece_width) - 1), piece_width)
        };
        acc = Some(match acc {
            None => piece,
            Some(prev) => prev.concat(&piece),
        });
    }
    acc.unwrap_or_else(|| BV::from_u64(ctx, 0, width))
}

/// Concrete unsigned value of a BV, if z3 can fold it to a constant.
pub fn biguint_from_bv(bv: &BV) -> Option<BigUint> {
    let simplified = bv.simplify();
    if let Some(v) = simplified.as_u64() {
        return Some(BigUint::from(v));
    }
    parse_numeral(&simplified.to_string())
}

/// Concrete signed (two's-complement) value of a BV.
pub fn bigint_from_bv(bv: &BV) -> Option<BigInt> {
    let width = bv.get_size();
    let mag = biguint_from_bv(bv)?;
    let sign_bit = BigUint::one() << (width - 1);
    if mag >= sign_bit {
        let modulus = BigUint::one() << width;
        Some(BigInt::from(mag) - BigInt::from(modulus))
    } else {
        Some(BigInt::from(mag))
    }
}

pub fn u64_from_bv(bv: &BV) -> Option<u64> {
    bv.simplify().as_u64()
}

fn parse_numeral(s: &str) -> Option<BigUint> {
    if let Some(hex) = s.strip_prefix("#x") {
        BigUint::parse_bytes(hex.as_bytes(), 16)
    } else if let Some(bin) = s.strip_prefix("#b") {
        BigUint::parse_bytes(bin.as_bytes(), 2)
    } else {
        None
    }
}

/// Evaluates a BV in a model and returns its unsigned value.
pub fn model_biguint(model: &Model, bv: &BV) -> Option<BigUint> {
    let completed = model.eval(bv, true)?;
    biguint_from_bv(&completed)
}

pub fn model_u64(model: &Model, bv: &BV) -> Option<u64> {
    model_biguint(model, bv).and_then(|v| u64::try_from(v).ok())
}

pub fn model_bool(model: &Model, b: &Bool) -> Option<bool> {
    model.eval(b, true)?.as_bool()
}

/// Three-valued result of a satisfiability probe. Unknown is surfaced, never
/// silently collapsed into either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatOutcome {
    Sat,
    Unsat,
    Unknown,
}

/// Checks the conjunction of `assumptions` against the solver's base
/// assertions without mutating solver state.
pub fn check_under<'ctx>(solver: &Solver<'ctx>, assumptions: &[Bool<'ctx>]) -> SatOutcome {
    match solver.check_assumptions(assumptions) {
        SatResult::Sat => SatOutcome::Sat,
        SatResult::Unsat => SatOutcome::Unsat,
        SatResult::Unknown => SatOutcome::Unknown,
    }
}

pub fn configure_solver(ctx: &Context, solver: &Solver, timeout_ms: u32) {
    let mut params = z3::Params::new(ctx);
    params.set_u32("timeout", timeout_ms);
    params.set_u32("rlimit", 200_000_000);
    params.set_bool("model.partial", false);
    params.set_u32("random_seed", 42); // Deterministic by default
    solver.set_params(&params);
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::Config;

    #[test]
    fn test_bigint_roundtrip_at_int_width() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        for v in [0i64, 1, -1, 42, -4095, i64::MAX, i64::MIN] {
            let bv = bv_from_bigint(&ctx, &BigInt::from(v), INT_BITS);
            assert_eq!(bigint_from_bv(&bv), Some(BigInt::from(v)), "value {v}");
        }
    }

    #[test]
    fn test_bigint_roundtrip_wide_value() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // 2^200 + 17 does not fit in u64 and exercises the limb assembly.
        let big = (BigInt::one() << 200) + BigInt::from(17);
        let bv = bv_from_bigint(&ctx, &big, INT_BITS);
        assert_eq!(bigint_from_bv(&bv), Some(big));
    }

    #[test]
    fn test_int_true_is_minus_one() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let t = int_true(&ctx);
        assert_eq!(bigint_from_bv(&t), Some(BigInt::from(-1)));
    }

    #[test]
    fn test_check_under_does_not_pollute_solver() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let x = BV::new_const(&ctx, "x", INT_BITS);
        let is_five = x._eq(&int_val(&ctx, 5));
        let is_six = x._eq(&int_val(&ctx, 6));

        assert_eq!(check_under(&solver, &[is_five.clone()]), SatOutcome::Sat);
        assert_eq!(check_under(&solver, &[is_six.clone()]), SatOutcome::Sat);
        // Contradictory only when combined; each probe must leave no residue.
        assert_eq!(check_under(&solver, &[is_five, is_six]), SatOutcome::Unsat);
    }
}
