//! Property sweep: the symbolic integer helpers agree bit-for-bit with a
//! big-integer reference model on randomly drawn operands.

use num_bigint::BigInt;
use proptest::prelude::*;
use z3::ast::Ast;
use tonprobe::symbolic::utils::math::{floor_div, floor_mod, fits_signed, fits_unsigned};
use tonprobe::symbolic::z3_ext::{bigint_from_bv, bv_from_bigint, int_val, INT_BITS};
use z3::{Config, Context};

fn reference_floor_div(x: i64, y: i64) -> i64 {
    let q = x / y;
    let r = x % y;
    if r != 0 && (r < 0) != (y < 0) {
        q - 1
    } else {
        q
    }
}

fn reference_floor_mod(x: i64, y: i64) -> i64 {
    let r = x % y;
    if r != 0 && (r < 0) != (y < 0) {
        r + y
    } else {
        r
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn test_floor_div_matches_reference(x in any::<i32>(), y in any::<i32>()) {
        prop_assume!(y != 0);
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let xv = int_val(&ctx, x as i64);
        let yv = int_val(&ctx, y as i64);

        let q = bigint_from_bv(&floor_div(&ctx, &xv, &yv)).expect("concrete quotient");
        let r = bigint_from_bv(&floor_mod(&ctx, &xv, &yv)).expect("concrete remainder");

        prop_assert_eq!(q, BigInt::from(reference_floor_div(x as i64, y as i64)));
        prop_assert_eq!(r, BigInt::from(reference_floor_mod(x as i64, y as i64)));
    }

    #[test]
    fn test_fits_predicates_match_ranges(x in any::<i64>(), width in 1u32..64) {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let xv = int_val(&ctx, x);

        let lo = -(1i128 << (width - 1));
        let hi = (1i128 << (width - 1)) - 1;
        let expect_signed = (x as i128) >= lo && (x as i128) <= hi;
        let expect_unsigned = x >= 0 && (x as i128) < (1i128 << width);

        prop_assert_eq!(
            fits_signed(&ctx, &xv, width).simplify().as_bool(),
            Some(expect_signed)
        );
        prop_assert_eq!(
            fits_unsigned(&ctx, &xv, width).simplify().as_bool(),
            Some(expect_unsigned)
        );
    }

    #[test]
    fn test_int_encoding_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 1..33)) {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let value = BigInt::from_signed_bytes_be(&bytes);
        let bv = bv_from_bigint(&ctx, &value, INT_BITS);
        prop_assert_eq!(bigint_from_bv(&bv), Some(value));
    }
}
