//! Lazy universal quantifiers over input-dictionary membership.
//!
//! A quantifier states "for every key actually present in the unknown
//! backing store, P(k) holds". Bit-vector solvers cannot take the
//! quantifier directly, so instantiation is deferred: the engine grounds
//! each quantifier at every key it ever learns about, in both directions
//! (new key against old quantifiers, new quantifier against old keys).
//! Membership of a ground key is itself a tracked boolean, so instantiation
//! yields `(contains(k) ∧ not-shadowed(k)) → P(k)` and stays sound for keys
//! whose membership is never decided.

use z3::ast::{Ast, Bool, BV};
use z3::Context;

/// One ground key the engine has learned about, with its membership flag.
#[derive(Debug, Clone)]
pub struct KnownKey<'ctx> {
    pub key: BV<'ctx>,
    pub contains: Bool<'ctx>,
}

/// The property P quantified over all present backing keys.
#[derive(Debug, Clone)]
pub enum QuantShape<'ctx> {
    /// k ≠ key — the non-existence branch of a has-key query.
    NotEqual { key: BV<'ctx> },
    /// k ≤ pivot (max) or k ≥ pivot (min).
    Bound {
        pivot: BV<'ctx>,
        signed: bool,
        is_max: bool,
    },
    /// No key lies strictly between the pivot and the chosen result
    /// (next/prev closeness).
    ClosestInRange {
        pivot: BV<'ctx>,
        result: BV<'ctx>,
        signed: bool,
        toward_greater: bool,
        allow_eq: bool,
    },
    /// No key lies on the given side of the pivot at all — the absent
    /// branch of next/prev.
    NoneBeyond {
        pivot: BV<'ctx>,
        signed: bool,
        toward_greater: bool,
        allow_eq: bool,
    },
    /// The backing contributes no visible key at all — the absent branch of
    /// min/max. P(k) is `false`; the shadow guard carries the information.
    Absent,
}

#[derive(Debug, Clone)]
pub struct DictQuantifier<'ctx> {
    pub shape: QuantShape<'ctx>,
    /// Keys shadowed by the modification log at registration time; the
    /// property only ranges over backing keys still visible through the log.
    pub shadowed: Vec<BV<'ctx>>,
}

fn side_condition<'ctx>(
    k: &BV<'ctx>,
    pivot: &BV<'ctx>,
    signed: bool,
    toward_greater: bool,
    allow_eq: bool,
) -> Bool<'ctx> {
    match (toward_greater, allow_eq, signed) {
        (true, false, true) => k.bvsgt(pivot),
        (true, false, false) => k.bvugt(pivot),
        (true, true, true) => k.bvsge(pivot),
        (true, true, false) => k.bvuge(pivot),
        (false, false, true) => k.bvslt(pivot),
        (false, false, false) => k.bvult(pivot),
        (false, true, true) => k.bvsle(pivot),
        (false, true, false) => k.bvule(pivot),
    }
}

impl<'ctx> DictQuantifier<'ctx> {
    pub fn new(shape: QuantShape<'ctx>, shadowed: Vec<BV<'ctx>>) -> Self {
        Self { shape, shadowed }
    }

    fn property(&self, ctx: &'ctx Context, k: &BV<'ctx>) -> Bool<'ctx> {
        match &self.shape {
            QuantShape::NotEqual { key } => k._eq(key).not(),
            QuantShape::Bound {
                pivot,
                signed,
                is_max,
            } => {
                if *is_max {
                    if *signed {
                        k.bvsle(pivot)
                    } else {
                        k.bvule(pivot)
                    }
                } else if *signed {
                    k.bvsge(pivot)
                } else {
                    k.bvuge(pivot)
                }
            }
            QuantShape::ClosestInRange {
                pivot,
                result,
                signed,
                toward_greater,
                allow_eq,
            } => {
                // No present key may be on the pivot's side AND strictly
                // closer than the chosen result.
                let on_side = side_condition(k, pivot, *signed, *toward_greater, *allow_eq);
                let closer = if *toward_greater {
                    if *signed {
                        k.bvslt(result)
                    } else {
                        k.bvult(result)
                    }
                } else if *signed {
                    k.bvsgt(result)
                } else {
                    k.bvugt(result)
                };
                Bool::and(ctx, &[&on_side, &closer]).not()
            }
            QuantShape::NoneBeyond {
                pivot,
                signed,
                toward_greater,
                allow_eq,
            } => side_condition(k, pivot, *signed, *toward_greater, *allow_eq).not(),
            QuantShape::Absent => Bool::from_bool(ctx, false),
        }
    }

    /// Grounds the quantifier at one known key.
    pub fn instantiate(&self, ctx: &'ctx Context, known: &KnownKey<'ctx>) -> Bool<'ctx> {
        let mut antecedent = vec![known.contains.clone()];
        for shadow in &self.shadowed {
            antecedent.push(known.key._eq(shadow).not());
        }
        let refs: Vec<&Bool<'ctx>> = antecedent.iter().collect();
        Bool::and(ctx, &refs).implies(&self.property(ctx, &known.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::{Config, SatResult, Solver};

    const W: u32 = 16;

    fn key<'ctx>(ctx: &'ctx Context, v: u64) -> BV<'ctx> {
        BV::from_u64(ctx, v, W)
    }

    #[test]
    fn test_not_equal_instantiation_excludes_key() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let absent = key(&ctx, 7);
        let q = DictQuantifier::new(QuantShape::NotEqual { key: absent.clone() }, Vec::new());

        let member = KnownKey {
            key: key(&ctx, 7),
            contains: Bool::from_bool(&ctx, true),
        };
        solver.assert(&q.instantiate(&ctx, &member));
        // A contained key equal to the excluded one is contradictory.
        assert_eq!(solver.check(), SatResult::Unsat);
    }

    #[test]
    fn test_shadowed_key_is_exempt() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let absent = key(&ctx, 7);
        // Key 7 is shadowed by the modification log, so the quantifier says
        // nothing about it.
        let q = DictQuantifier::new(
            QuantShape::NotEqual { key: absent },
            vec![key(&ctx, 7)],
        );

        let member = KnownKey {
            key: key(&ctx, 7),
            contains: Bool::from_bool(&ctx, true),
        };
        solver.assert(&q.instantiate(&ctx, &member));
        assert_eq!(solver.check(), SatResult::Sat);
    }

    #[test]
    fn test_bound_quantifier_orders_members() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let pivot = BV::new_const(&ctx, "max_rep", W);
        let q = DictQuantifier::new(
            QuantShape::Bound {
                pivot: pivot.clone(),
                signed: false,
                is_max: true,
            },
            Vec::new(),
        );

        let member = KnownKey {
            key: key(&ctx, 100),
            contains: Bool::from_bool(&ctx, true),
        };
        solver.assert(&q.instantiate(&ctx, &member));
        // The max representative cannot be below a contained key.
        solver.assert(&pivot.bvult(&key(&ctx, 100)));
        assert_eq!(solver.check(), SatResult::Unsat);
    }

    #[test]
    fn test_uncontained_key_is_vacuous() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let q = DictQuantifier::new(QuantShape::Absent, Vec::new());
        let ghost = KnownKey {
            key: key(&ctx, 3),
            contains: Bool::from_bool(&ctx, false),
        };
        solver.assert(&q.instantiate(&ctx, &ghost));
        assert_eq!(solver.check(), SatResult::Sat);
    }
}
