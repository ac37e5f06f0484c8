//! Per-category instruction handlers.
//!
//! Each handler is a total match over its category union; variants kept as
//! explicit backlog return an `Unimplemented` fault, which discards only the
//! faulting state and is counted by the interpreter.

#[macro_use]
pub mod op_macros;
pub mod actions;
pub mod arithmetic;
pub mod cells_build;
pub mod cells_parse;
pub mod compare;
pub mod config;
pub mod control;
pub mod crypto;
pub mod currency;
pub mod debug;
pub mod dict;
pub mod stack;
pub mod tuples;

use z3::ast::{Bool, BV};

use crate::insn::Instr;
use crate::symbolic::engine::{BranchPlan, Interpreter};
use crate::symbolic::error::StepError;
use crate::symbolic::memory::{classify_bounds, BoundsCheck, Builder, CellSlice};
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;

pub fn dispatch<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &Instr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match instr {
        Instr::Stack(i) => stack::exec(interp, state, i),
        Instr::Arith(i) => arithmetic::exec(interp, state, i, out),
        Instr::Cmp(i) => compare::exec(interp, state, i),
        Instr::Cont(i) => control::exec(interp, state, i, out),
        Instr::Tuple(i) => tuples::exec(interp, state, i, out),
        Instr::CellBuild(i) => cells_build::exec(interp, state, i, out),
        Instr::CellParse(i) => cells_parse::exec(interp, state, i, out),
        Instr::Dict(i) => dict::exec(interp, state, i, out),
        Instr::Crypto(i) => crypto::exec(interp, state, i),
        Instr::Currency(i) => currency::exec(interp, state, i, out),
        Instr::Config(i) => config::exec(interp, state, i, out),
        Instr::Action(i) => actions::exec(interp, state, i, out),
        Instr::Debug(i) => debug::exec(interp, state, i, out),
    }
}

/// Applies the three-way bounds classification to a slice read of `width`
/// bits. On a two-sided outcome the violating branch is raised as a
/// structural cell underflow in a forked sibling; the surviving `state`
/// carries the in-bounds constraint.
pub fn ensure_slice_bits<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    slice: &CellSlice<'ctx>,
    width: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let violation = slice.bits_underflow(width);
    apply_bounds(interp, state, violation, VmFailure::CellUnderflow, out)
}

/// Same classification for loading one more reference.
pub fn ensure_slice_ref<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    slice: &CellSlice<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let violation = slice.refs_underflow(interp.ctx);
    apply_bounds(interp, state, violation, VmFailure::CellUnderflow, out)
}

/// Builder-side overflow check; short-circuits through the additive bound
/// so the solver is only consulted when the bound is exhausted.
pub fn ensure_builder_bits<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    builder: &Builder<'ctx>,
    width: &BV<'ctx>,
    width_cap: u64,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    if builder.provably_fits(width_cap) {
        return Ok(());
    }
    let violation = builder.overflow_condition(interp.ctx, width);
    apply_bounds(interp, state, violation, VmFailure::CellOverflow, out)
}

fn apply_bounds<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    violation: Bool<'ctx>,
    failure: VmFailure,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match classify_bounds(&interp.solver, &state.path, violation) {
        BoundsCheck::Ok => Ok(()),
        BoundsCheck::Violates => Err(StepError::vm(failure)),
        BoundsCheck::Fork { ok, violation } => {
            let mut failing = state.clone();
            failing.add_constraint(violation);
            interp.raise(
                &mut failing,
                failure,
                crate::symbolic::outcome::BoundsClass::Structural,
                out,
            );
            out.push(failing);
            state.add_constraint(ok);
            Ok(())
        }
        BoundsCheck::Undecided => Err(StepError::undecided("bounds check")),
    }
}

/// Forks on `cond`; when the false side is feasible it is raised with
/// `failure` in a sibling, and `state` continues under `cond`.
pub fn require_or_raise<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    cond: Bool<'ctx>,
    failure: VmFailure,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match interp.fork_on(state, cond) {
        BranchPlan::TakeTrue => Ok(()),
        BranchPlan::TakeFalse => Err(StepError::vm(failure)),
        BranchPlan::Both { mut other } => {
            interp.raise(
                &mut other,
                failure,
                crate::symbolic::outcome::BoundsClass::Real,
                out,
            );
            out.push(other);
            Ok(())
        }
        BranchPlan::Dead => Ok(()),
        BranchPlan::Undecided => Ok(()),
    }
}
