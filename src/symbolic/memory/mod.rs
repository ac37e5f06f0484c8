//! Cell/builder/slice memory model.
//!
//! Cells are immutable and `Arc`-shared, so cloning a machine state shares
//! the whole cell graph structurally. Every bounds check distinguishes three
//! severities (real / structural / undecided) via [`classify_bounds`].

pub mod builder;
pub mod cell;
pub mod slice;

pub use builder::Builder;
pub use cell::{Cell, CellOrigin};
pub use slice::CellSlice;

use z3::ast::{Ast, Bool};
use z3::Solver;

use crate::symbolic::z3_ext::{check_under, SatOutcome};

/// Resolution of one bounds check against the current path.
#[derive(Debug, Clone)]
pub enum BoundsCheck<'ctx> {
    /// The access is in bounds on every instantiation of this path.
    Ok,
    /// The access violates bounds on every instantiation: a real error.
    Violates,
    /// Both outcomes are feasible; the caller must fork. The violating
    /// branch depends on unknown input, so it is classified structural.
    Fork {
        ok: Bool<'ctx>,
        violation: Bool<'ctx>,
    },
    /// The solver timed out; severity is reported as undecided, not guessed.
    Undecided,
}

/// Classifies `violation` (the condition under which the access is out of
/// bounds) against the path assumptions.
///
/// Concrete conditions never touch the solver. For symbolic conditions the
/// probe order matters: if no non-violating instantiation exists the access
/// is a definite error even though the lengths were symbolic.
pub fn classify_bounds<'ctx>(
    solver: &Solver<'ctx>,
    path: &[Bool<'ctx>],
    violation: Bool<'ctx>,
) -> BoundsCheck<'ctx> {
    if let Some(concrete) = violation.simplify().as_bool() {
        return if concrete {
            BoundsCheck::Violates
        } else {
            BoundsCheck::Ok
        };
    }

    let ok_cond = violation.not();

    let mut assumptions: Vec<Bool<'ctx>> = path.to_vec();
    assumptions.push(ok_cond.clone());
    let ok_feasible = check_under(solver, &assumptions);
    *assumptions.last_mut().expect("assumption just pushed") = violation.clone();
    let violation_feasible = check_under(solver, &assumptions);

    match (ok_feasible, violation_feasible) {
        (SatOutcome::Unknown, _) | (_, SatOutcome::Unknown) => BoundsCheck::Undecided,
        (SatOutcome::Unsat, _) => BoundsCheck::Violates,
        (SatOutcome::Sat, SatOutcome::Unsat) => BoundsCheck::Ok,
        (SatOutcome::Sat, SatOutcome::Sat) => BoundsCheck::Fork {
            ok: ok_cond,
            violation,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::{len_val, LEN_BITS};
    use z3::ast::BV;
    use z3::{Config, Context};

    #[test]
    fn test_concrete_violation_skips_solver() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let pos = len_val(&ctx, 1030);
        let len = len_val(&ctx, 1023);
        let violation = pos.bvugt(&len);
        assert!(matches!(
            classify_bounds(&solver, &[], violation),
            BoundsCheck::Violates
        ));

        let fine = len_val(&ctx, 8).bvugt(&len);
        assert!(matches!(
            classify_bounds(&solver, &[], fine),
            BoundsCheck::Ok
        ));
    }

    #[test]
    fn test_symbolic_violation_forks() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let len = BV::new_const(&ctx, "len", LEN_BITS);
        solver.assert(&len.bvule(&len_val(&ctx, 1023)));
        let violation = len_val(&ctx, 64).bvugt(&len);

        assert!(matches!(
            classify_bounds(&solver, &[], violation),
            BoundsCheck::Fork { .. }
        ));
    }

    #[test]
    fn test_path_constrained_violation_is_definite() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let len = BV::new_const(&ctx, "len", LEN_BITS);
        let path = vec![len.bvult(&len_val(&ctx, 8))];
        // Reading 64 bits from a cell the path already proved shorter than 8.
        let violation = len_val(&ctx, 64).bvugt(&len);
        assert!(matches!(
            classify_bounds(&solver, &path, violation),
            BoundsCheck::Violates
        ));
    }
}
