//! Dictionary instruction handlers.
//!
//! Concrete modification-log dictionaries resolve by scanning the log
//! newest-first, forking on key equality where the solver cannot decide it.
//! Input-dictionary backings add exists/absent forks whose facts are
//! expressed through the lazy quantifier machinery in `symbolic::dict`.

use std::sync::Arc;

use z3::ast::{Ast, Bool, BV};

use crate::insn::{DictInstr, DictKeyKind, DictSetMode};
use crate::symbolic::dict::{
    fold_extremum, fold_near, log_candidates, Candidate, DictOp, DictQuantifier, DictState,
    DictValue, QuantShape,
};
use crate::symbolic::engine::{BranchPlan, Interpreter};
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::memory::{Cell, CellSlice};
use crate::symbolic::opcodes::{ensure_slice_bits, require_or_raise};
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;
use crate::symbolic::utils::math;
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{
    int_true, int_zero, len_val, u64_from_bv, DATA_BITS, INT_BITS,
};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &DictInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match instr {
        DictInstr::NewDict => state.stack.push(StackValue::Null),
        DictInstr::Get { key, by_ref } => exec_get(interp, state, *key, *by_ref, out),
        DictInstr::Set { key, mode, by_ref } => {
            exec_set(interp, state, *key, *mode, *by_ref, out)
        }
        DictInstr::Del { key } => exec_del(interp, state, *key, out),
        DictInstr::Extremum { key, max } => exec_extremum(interp, state, *key, *max, out),
        DictInstr::GetNear {
            key,
            next,
            allow_eq,
        } => exec_get_near(interp, state, *key, *next, *allow_eq, out),
    }
}

/// Pops the dictionary root and key width shared by every dict op.
fn pop_dict_and_width<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    key: DictKeyKind,
) -> Result<(Option<Arc<Cell<'ctx>>>, u32), StepError> {
    let n = state.stack.pop_int()?;
    let n = require_concrete(u64_from_bv(&n), "dictionary key width")?;
    let max = match key {
        DictKeyKind::Slice => 1023,
        DictKeyKind::Signed => 257,
        DictKeyKind::Unsigned => 256,
    };
    if n == 0 || n > max {
        return Err(StepError::vm(VmFailure::RangeCheck));
    }
    let root = state.stack.pop_maybe_cell()?;
    Ok((root, n as u32))
}

/// Resolves the dictionary state behind a root cell, binding fresh input
/// roots on first contact.
fn dict_state_for<'ctx>(
    state: &mut VmState<'ctx>,
    root: &Option<Arc<Cell<'ctx>>>,
    key_bits: u32,
) -> Result<DictState<'ctx>, StepError> {
    match root {
        None => Ok(DictState::empty(key_bits)),
        Some(cell) => {
            if let Some(existing) = state.dicts.lookup(cell.id) {
                if existing.key_bits != key_bits {
                    return Err(StepError::vm(VmFailure::DictError));
                }
                return Ok(existing.clone());
            }
            if cell.is_input() {
                return Ok(state.dicts.bind_input_root(cell.id, key_bits).clone());
            }
            Err(StepError::internal(
                "allocated cell used as dictionary root without a registry entry",
            ))
        }
    }
}

/// Pops a key operand and narrows it to the dictionary's key width.
fn pop_key<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    kind: DictKeyKind,
    key_bits: u32,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<BV<'ctx>, StepError> {
    let ctx = interp.ctx;
    match kind {
        DictKeyKind::Slice => {
            let s = state.stack.pop_slice()?;
            let w = len_val(ctx, key_bits as u64);
            ensure_slice_bits(interp, state, &s, &w, out)?;
            let window = s.remaining_window();
            Ok(window.extract(DATA_BITS - 1, DATA_BITS - key_bits))
        }
        DictKeyKind::Signed => {
            let x = state.stack.pop_int()?;
            let fits = math::fits_signed(ctx, &x, key_bits);
            require_or_raise(interp, state, fits, VmFailure::RangeCheck, out)?;
            Ok(x.extract(key_bits - 1, 0))
        }
        DictKeyKind::Unsigned => {
            let x = state.stack.pop_int()?;
            let fits = math::fits_unsigned(ctx, &x, key_bits);
            require_or_raise(interp, state, fits, VmFailure::RangeCheck, out)?;
            Ok(x.extract(key_bits - 1, 0))
        }
    }
}

fn key_to_int<'ctx>(kind: DictKeyKind, key: &BV<'ctx>) -> BV<'ctx> {
    let width = key.get_size();
    match kind {
        DictKeyKind::Signed => key.sign_ext(INT_BITS - width),
        _ => key.zero_ext(INT_BITS - width),
    }
}

#[derive(Debug, Clone)]
enum ScanOutcome<'ctx> {
    Found(DictValue<'ctx>),
    Absent,
}

type ScanSink<'a, 'ctx> = &'a mut dyn FnMut(
    &mut Interpreter<'ctx>,
    &mut VmState<'ctx>,
    &mut Vec<VmState<'ctx>>,
    ScanOutcome<'ctx>,
) -> Result<(), StepError>;

/// Resolves `key` against the modification log and backing, forking where
/// equality is undecidable. Every surviving branch reaches `sink` exactly
/// once.
fn scan_dict<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
    dict: &DictState<'ctx>,
    key: &BV<'ctx>,
    sink: ScanSink<'_, 'ctx>,
) -> Result<(), StepError> {
    let mut i = dict.ops.len();
    while i > 0 {
        i -= 1;
        let op = &dict.ops[i];
        let differs = key._eq(op.key()).not();
        match interp.fork_on(state, differs) {
            BranchPlan::TakeTrue => continue,
            BranchPlan::TakeFalse => {
                let outcome = match op {
                    DictOp::Store { value, .. } => ScanOutcome::Found(value.clone()),
                    DictOp::Remove { .. } => ScanOutcome::Absent,
                };
                return sink(interp, state, out, outcome);
            }
            BranchPlan::Both { mut other } => {
                // `other` carries key == op.key and resolves here.
                let outcome = match op {
                    DictOp::Store { value, .. } => ScanOutcome::Found(value.clone()),
                    DictOp::Remove { .. } => ScanOutcome::Absent,
                };
                match sink(interp, &mut other, out, outcome) {
                    Ok(()) => {
                        if !other.dead {
                            out.push(other);
                        }
                    }
                    Err(err) => interp.absorb_error(other, err, out),
                }
            }
            BranchPlan::Dead | BranchPlan::Undecided => return Ok(()),
        }
    }
    scan_backing(interp, state, out, dict, key, sink)
}

/// The residual case: the key matched no log entry; consult the backing.
fn scan_backing<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
    dict: &DictState<'ctx>,
    key: &BV<'ctx>,
    sink: ScanSink<'_, 'ctx>,
) -> Result<(), StepError> {
    let scope_id = match dict.backing {
        crate::symbolic::dict::DictBacking::Empty => {
            return sink(interp, state, out, ScanOutcome::Absent)
        }
        crate::symbolic::dict::DictBacking::Input(id) => id,
    };

    let exists = interp.fresh_bool("dict_has_key");
    match interp.fork_on(state, exists) {
        BranchPlan::Both { mut other } => {
            // `other` is the non-existence side.
            backing_absent(interp, &mut other, scope_id, key);
            match sink(interp, &mut other, out, ScanOutcome::Absent) {
                Ok(()) => {
                    if !other.dead {
                        out.push(other);
                    }
                }
                Err(err) => interp.absorb_error(other, err, out),
            }
            let value = backing_found(interp, state, scope_id, key)?;
            sink(interp, state, out, ScanOutcome::Found(value))
        }
        // A fresh boolean always admits both sides unless the solver gave
        // up; treat one-sided outcomes defensively.
        BranchPlan::TakeTrue => {
            let value = backing_found(interp, state, scope_id, key)?;
            sink(interp, state, out, ScanOutcome::Found(value))
        }
        BranchPlan::TakeFalse => {
            backing_absent(interp, state, scope_id, key);
            sink(interp, state, out, ScanOutcome::Absent)
        }
        BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
    }
}

/// The key is present in the backing: discover it and hand out its value.
fn backing_found<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    scope_id: u64,
    key: &BV<'ctx>,
) -> Result<DictValue<'ctx>, StepError> {
    let ctx = interp.ctx;
    let cell_id = interp.fresh_cell_id();
    let mut constraints = Vec::new();
    let scope = state
        .dicts
        .scope_mut(scope_id)
        .ok_or_else(|| StepError::internal("input dictionary scope missing"))?;
    scope.discover_key(ctx, key.clone(), Bool::from_bool(ctx, true), &mut constraints);
    let value_cell = scope.value_cell_for(ctx, &interp.solver, key, cell_id, &mut constraints);
    state.add_constraints(constraints);
    Ok(DictValue::Slice(CellSlice::new(ctx, value_cell)))
}

/// The key is absent from the backing: register the disequality quantifier
/// (and learn the key with an open membership flag, which the quantifier
/// itself then forces to false).
fn backing_absent<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    scope_id: u64,
    key: &BV<'ctx>,
) {
    let ctx = interp.ctx;
    let contains = interp.fresh_bool("dict_contains");
    let mut constraints = Vec::new();
    if let Some(scope) = state.dicts.scope_mut(scope_id) {
        scope.discover_key(ctx, key.clone(), contains, &mut constraints);
        scope.register_quantifier(
            ctx,
            DictQuantifier::new(QuantShape::NotEqual { key: key.clone() }, Vec::new()),
            &mut constraints,
        );
    }
    state.add_constraints(constraints);
}

/// Installs a freshly derived dictionary state under a new sentinel root.
fn new_root<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    dict: DictState<'ctx>,
) -> Arc<Cell<'ctx>> {
    let id = interp.fresh_cell_id();
    let root = Arc::new(Cell::empty(interp.ctx, id));
    state.dicts.register_root(id, dict);
    root
}

/// Appends a log op, keeping the invariant: an op key on an input backing is
/// a known key and must be checked against every quantifier.
fn append_op<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    mut dict: DictState<'ctx>,
    op: DictOp<'ctx>,
) -> DictState<'ctx> {
    if let crate::symbolic::dict::DictBacking::Input(scope_id) = dict.backing {
        let ctx = interp.ctx;
        let contains = interp.fresh_bool("dict_contains");
        let mut constraints = Vec::new();
        if let Some(scope) = state.dicts.scope_mut(scope_id) {
            scope.discover_key(ctx, op.key().clone(), contains, &mut constraints);
        }
        state.add_constraints(constraints);
    }
    dict.ops.push(op);
    dict
}

fn push_value_and_flag<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    value: DictValue<'ctx>,
    by_ref: bool,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match (by_ref, value) {
        (false, DictValue::Slice(s)) => state.stack.push(StackValue::Slice(s))?,
        (false, DictValue::Cell(c)) => {
            // A by-ref stored value read as a slice: one ref, no data.
            let id = interp.fresh_cell_id();
            let wrapper = Arc::new(Cell::allocated(
                ctx,
                id,
                BV::from_u64(ctx, 0, DATA_BITS),
                len_val(ctx, 0),
                vec![c],
            ));
            state.stack.push(StackValue::Slice(CellSlice::new(ctx, wrapper)))?
        }
        (true, DictValue::Cell(c)) => state.stack.push(StackValue::Cell(c))?,
        (true, DictValue::Slice(s)) => {
            if s.cell.is_input() {
                state.add_constraint(s.cell.refs_len.bvuge(&len_val(ctx, 1)));
            }
            let child = crate::symbolic::opcodes::cells_parse::resolve_ref(interp, state, &s)?;
            state.stack.push(StackValue::Cell(child))?
        }
    }
    state.stack.push_int(int_true(ctx))
}

/// How CONFIGPARAM variants publish the looked-up cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLookupStyle {
    /// Push the cell or null (CONFIGOPTPARAM).
    OptCell,
    /// Push the cell and −1, or 0 (CONFIGPARAM).
    CellFlag,
}

/// Network-configuration lookup: a dictionary get with 32-bit signed keys
/// against the environment's configuration root.
pub fn config_dict_lookup<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    root: Option<Arc<Cell<'ctx>>>,
    style: ConfigLookupStyle,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let idx = state.stack.pop_int()?;
    let fits = math::fits_signed(ctx, &idx, 32);
    require_or_raise(interp, state, fits, VmFailure::RangeCheck, out)?;
    let key = idx.extract(31, 0);
    let dict = dict_state_for(state, &root, 32)?;

    scan_dict(
        interp,
        state,
        out,
        &dict,
        &key,
        &mut |interp, state, _out, outcome| {
            let ctx = interp.ctx;
            match outcome {
                ScanOutcome::Found(value) => {
                    let cell =
                        crate::symbolic::opcodes::config::value_to_cell(interp, state, value)?;
                    state.stack.push(StackValue::Cell(cell))?;
                    if style == ConfigLookupStyle::CellFlag {
                        state.stack.push_int(int_true(ctx))?;
                    }
                    Ok(())
                }
                ScanOutcome::Absent => match style {
                    ConfigLookupStyle::OptCell => state.stack.push(StackValue::Null),
                    ConfigLookupStyle::CellFlag => state.stack.push_int(int_zero(ctx)),
                },
            }
        },
    )
}

fn exec_get<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    kind: DictKeyKind,
    by_ref: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let (root, key_bits) = pop_dict_and_width(interp, state, kind)?;
    let key = pop_key(interp, state, kind, key_bits, out)?;
    let dict = dict_state_for(state, &root, key_bits)?;

    scan_dict(
        interp,
        state,
        out,
        &dict,
        &key,
        &mut |interp, state, _out, outcome| match outcome {
            ScanOutcome::Found(value) => push_value_and_flag(interp, state, value, by_ref),
            ScanOutcome::Absent => state.stack.push_int(int_zero(interp.ctx)),
        },
    )
}

fn exec_set<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    kind: DictKeyKind,
    mode: DictSetMode,
    by_ref: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let (root, key_bits) = pop_dict_and_width(interp, state, kind)?;
    let key = pop_key(interp, state, kind, key_bits, out)?;
    let value = if by_ref {
        DictValue::Cell(state.stack.pop_cell()?)
    } else {
        DictValue::Slice(state.stack.pop_slice()?)
    };
    let dict = dict_state_for(state, &root, key_bits)?;

    match mode {
        DictSetMode::Set => {
            let op = DictOp::Store {
                key,
                value,
            };
            let updated = append_op(interp, state, dict, op);
            let new = new_root(interp, state, updated);
            state.stack.push(StackValue::Cell(new))
        }
        DictSetMode::Replace | DictSetMode::Add => {
            let store_when_found = mode == DictSetMode::Replace;
            let root_clone = root.clone();
            scan_dict(
                interp,
                state,
                out,
                &dict.clone(),
                &key.clone(),
                &mut |interp, state, _out, outcome| {
                    let found = matches!(outcome, ScanOutcome::Found(_));
                    let ctx = interp.ctx;
                    if found == store_when_found {
                        let op = DictOp::Store {
                            key: key.clone(),
                            value: value.clone(),
                        };
                        let updated = append_op(interp, state, dict.clone(), op);
                        let new = new_root(interp, state, updated);
                        state.stack.push(StackValue::Cell(new))?;
                        state.stack.push_int(int_true(ctx))
                    } else {
                        match &root_clone {
                            Some(cell) => state.stack.push(StackValue::Cell(cell.clone()))?,
                            None => state.stack.push(StackValue::Null)?,
                        }
                        state.stack.push_int(int_zero(ctx))
                    }
                },
            )
        }
    }
}

fn exec_del<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    kind: DictKeyKind,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let (root, key_bits) = pop_dict_and_width(interp, state, kind)?;
    let key = pop_key(interp, state, kind, key_bits, out)?;
    let dict = dict_state_for(state, &root, key_bits)?;
    let root_clone = root.clone();

    scan_dict(
        interp,
        state,
        out,
        &dict.clone(),
        &key.clone(),
        &mut |interp, state, _out, outcome| {
            let ctx = interp.ctx;
            match outcome {
                ScanOutcome::Found(_) => {
                    let op = DictOp::Remove { key: key.clone() };
                    let updated = append_op(interp, state, dict.clone(), op);
                    // A concretely emptied dictionary collapses back to null.
                    let emptied = dict_is_concretely_empty(ctx, &updated);
                    if emptied {
                        state.stack.push(StackValue::Null)?;
                    } else {
                        let new = new_root(interp, state, updated);
                        state.stack.push(StackValue::Cell(new))?;
                    }
                    state.stack.push_int(int_true(ctx))
                }
                ScanOutcome::Absent => {
                    match &root_clone {
                        Some(cell) => state.stack.push(StackValue::Cell(cell.clone()))?,
                        None => state.stack.push(StackValue::Null)?,
                    }
                    state.stack.push_int(int_zero(ctx))
                }
            }
        },
    )
}

fn dict_is_concretely_empty<'ctx>(ctx: &'ctx z3::Context, dict: &DictState<'ctx>) -> bool {
    if dict.backing != crate::symbolic::dict::DictBacking::Empty {
        return false;
    }
    log_candidates(ctx, &dict.ops)
        .iter()
        .all(|c| c.present.simplify().as_bool() == Some(false))
}

/// Shared tail of min/max and next/prev: fork on `found`, resolve the value
/// of the winning key through the ordinary scan, and push results.
fn finish_key_query<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
    dict: &DictState<'ctx>,
    kind: DictKeyKind,
    found: Bool<'ctx>,
    best: BV<'ctx>,
) -> Result<(), StepError> {
    let push_absent = |interp: &mut Interpreter<'ctx>,
                       state: &mut VmState<'ctx>|
     -> Result<(), StepError> { state.stack.push_int(int_zero(interp.ctx)) };

    let resolve_found = |interp: &mut Interpreter<'ctx>,
                         state: &mut VmState<'ctx>,
                         out: &mut Vec<VmState<'ctx>>|
     -> Result<(), StepError> {
        let best = best.clone();
        scan_dict(
            interp,
            state,
            out,
            dict,
            &best.clone(),
            &mut |interp, state, _out, outcome| {
                match outcome {
                    ScanOutcome::Found(value) => {
                        push_value_and_flag_keyed(interp, state, value, kind, &best)
                    }
                    ScanOutcome::Absent => {
                        // The fold proved a present key; an absent resolution
                        // is an infeasible residue.
                        state.dead = true;
                        Ok(())
                    }
                }
            },
        )
    };

    match interp.fork_on(state, found) {
        BranchPlan::TakeTrue => resolve_found(interp, state, out),
        BranchPlan::TakeFalse => push_absent(interp, state),
        BranchPlan::Both { mut other } => {
            match push_absent(interp, &mut other) {
                Ok(()) => {
                    if !other.dead {
                        out.push(other);
                    }
                }
                Err(err) => interp.absorb_error(other, err, out),
            }
            resolve_found(interp, state, out)
        }
        BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
    }
}

fn push_value_and_flag_keyed<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    value: DictValue<'ctx>,
    kind: DictKeyKind,
    key: &BV<'ctx>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match value {
        DictValue::Slice(s) => state.stack.push(StackValue::Slice(s))?,
        DictValue::Cell(c) => {
            let id = interp.fresh_cell_id();
            let wrapper = Arc::new(Cell::allocated(
                ctx,
                id,
                BV::from_u64(ctx, 0, DATA_BITS),
                len_val(ctx, 0),
                vec![c],
            ));
            state
                .stack
                .push(StackValue::Slice(CellSlice::new(ctx, wrapper)))?
        }
    }
    state.stack.push_int(key_to_int(kind, key))?;
    state.stack.push_int(int_true(ctx))
}

fn exec_extremum<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    kind: DictKeyKind,
    want_max: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let (root, key_bits) = pop_dict_and_width(interp, state, kind)?;
    let dict = dict_state_for(state, &root, key_bits)?;
    let signed = kind == DictKeyKind::Signed;
    let mut candidates = log_candidates(ctx, &dict.ops);
    if candidates.is_empty() {
        // Width for the fold when the log is empty.
        candidates.push(Candidate {
            present: Bool::from_bool(ctx, false),
            key: BV::from_u64(ctx, 0, key_bits),
        });
    }

    match dict.backing {
        crate::symbolic::dict::DictBacking::Empty => {
            let (found, best) = fold_extremum(ctx, &candidates, signed, want_max);
            finish_key_query(interp, state, out, &dict, kind, found, best)
        }
        crate::symbolic::dict::DictBacking::Input(scope_id) => {
            let backing_has = interp.fresh_bool("dict_nonempty");
            match interp.fork_on(state, backing_has) {
                BranchPlan::Both { mut other } => {
                    // `other`: the backing contributes no visible key.
                    register_absent_backing(interp, &mut other, scope_id, &dict);
                    let (found, best) = fold_extremum(ctx, &candidates, signed, want_max);
                    match finish_key_query(interp, &mut other, out, &dict, kind, found, best) {
                        Ok(()) => {
                            if !other.dead {
                                out.push(other);
                            }
                        }
                        Err(err) => interp.absorb_error(other, err, out),
                    }

                    let rep = backing_extremum_rep(
                        interp, state, scope_id, &dict, key_bits, signed, want_max,
                    )?;
                    let mut with_rep = candidates.clone();
                    with_rep.push(Candidate {
                        present: Bool::from_bool(ctx, true),
                        key: rep,
                    });
                    let (found, best) = fold_extremum(ctx, &with_rep, signed, want_max);
                    finish_key_query(interp, state, out, &dict, kind, found, best)
                }
                BranchPlan::TakeTrue => {
                    let rep = backing_extremum_rep(
                        interp, state, scope_id, &dict, key_bits, signed, want_max,
                    )?;
                    candidates.push(Candidate {
                        present: Bool::from_bool(ctx, true),
                        key: rep,
                    });
                    let (found, best) = fold_extremum(ctx, &candidates, signed, want_max);
                    finish_key_query(interp, state, out, &dict, kind, found, best)
                }
                BranchPlan::TakeFalse => {
                    register_absent_backing(interp, state, scope_id, &dict);
                    let (found, best) = fold_extremum(ctx, &candidates, signed, want_max);
                    finish_key_query(interp, state, out, &dict, kind, found, best)
                }
                BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
            }
        }
    }
}

/// Representative backing key for an extremum query: present, visible
/// through the log, and a bound of every other backing key.
fn backing_extremum_rep<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    scope_id: u64,
    dict: &DictState<'ctx>,
    key_bits: u32,
    signed: bool,
    want_max: bool,
) -> Result<BV<'ctx>, StepError> {
    let ctx = interp.ctx;
    let rep = interp.fresh_bv("dict_extremum_rep", key_bits);
    let mut constraints = Vec::new();
    for shadow in dict.shadow_keys() {
        constraints.push(rep._eq(&shadow).not());
    }
    let scope = state
        .dicts
        .scope_mut(scope_id)
        .ok_or_else(|| StepError::internal("input dictionary scope missing"))?;
    scope.discover_key(ctx, rep.clone(), Bool::from_bool(ctx, true), &mut constraints);
    scope.register_quantifier(
        ctx,
        DictQuantifier::new(
            QuantShape::Bound {
                pivot: rep.clone(),
                signed,
                is_max: want_max,
            },
            dict.shadow_keys(),
        ),
        &mut constraints,
    );
    state.add_constraints(constraints);
    Ok(rep)
}

fn register_absent_backing<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    scope_id: u64,
    dict: &DictState<'ctx>,
) {
    let ctx = interp.ctx;
    let mut constraints = Vec::new();
    if let Some(scope) = state.dicts.scope_mut(scope_id) {
        scope.register_quantifier(
            ctx,
            DictQuantifier::new(QuantShape::Absent, dict.shadow_keys()),
            &mut constraints,
        );
    }
    state.add_constraints(constraints);
}

fn exec_get_near<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    kind: DictKeyKind,
    next: bool,
    allow_eq: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let (root, key_bits) = pop_dict_and_width(interp, state, kind)?;
    let pivot = pop_key(interp, state, kind, key_bits, out)?;
    let dict = dict_state_for(state, &root, key_bits)?;
    let signed = kind == DictKeyKind::Signed;
    let mut candidates = log_candidates(ctx, &dict.ops);
    if candidates.is_empty() {
        candidates.push(Candidate {
            present: Bool::from_bool(ctx, false),
            key: BV::from_u64(ctx, 0, key_bits),
        });
    }

    match dict.backing {
        crate::symbolic::dict::DictBacking::Empty => {
            let (found, best) = fold_near(ctx, &candidates, &pivot, signed, next, allow_eq);
            finish_key_query(interp, state, out, &dict, kind, found, best)
        }
        crate::symbolic::dict::DictBacking::Input(scope_id) => {
            let backing_has = interp.fresh_bool("dict_has_near");
            match interp.fork_on(state, backing_has) {
                BranchPlan::Both { mut other } => {
                    register_none_beyond(interp, &mut other, scope_id, &dict, &pivot, signed, next, allow_eq);
                    let (found, best) =
                        fold_near(ctx, &candidates, &pivot, signed, next, allow_eq);
                    match finish_key_query(interp, &mut other, out, &dict, kind, found, best) {
                        Ok(()) => {
                            if !other.dead {
                                out.push(other);
                            }
                        }
                        Err(err) => interp.absorb_error(other, err, out),
                    }

                    let rep = backing_near_rep(
                        interp, state, scope_id, &dict, key_bits, &pivot, signed, next, allow_eq,
                    )?;
                    let mut with_rep = candidates.clone();
                    with_rep.push(Candidate {
                        present: Bool::from_bool(ctx, true),
                        key: rep,
                    });
                    let (found, best) =
                        fold_near(ctx, &with_rep, &pivot, signed, next, allow_eq);
                    finish_key_query(interp, state, out, &dict, kind, found, best)
                }
                BranchPlan::TakeTrue => {
                    let rep = backing_near_rep(
                        interp, state, scope_id, &dict, key_bits, &pivot, signed, next, allow_eq,
                    )?;
                    candidates.push(Candidate {
                        present: Bool::from_bool(ctx, true),
                        key: rep,
                    });
                    let (found, best) =
                        fold_near(ctx, &candidates, &pivot, signed, next, allow_eq);
                    finish_key_query(interp, state, out, &dict, kind, found, best)
                }
                BranchPlan::TakeFalse => {
                    register_none_beyond(interp, state, scope_id, &dict, &pivot, signed, next, allow_eq);
                    let (found, best) =
                        fold_near(ctx, &candidates, &pivot, signed, next, allow_eq);
                    finish_key_query(interp, state, out, &dict, kind, found, best)
                }
                BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
            }
        }
    }
}

/// Representative backing key on the pivot's side, with the closest-in-range
/// quantifier tying every other backing key away from the gap.
#[allow(clippy::too_many_arguments)]
fn backing_near_rep<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    scope_id: u64,
    dict: &DictState<'ctx>,
    key_bits: u32,
    pivot: &BV<'ctx>,
    signed: bool,
    toward_greater: bool,
    allow_eq: bool,
) -> Result<BV<'ctx>, StepError> {
    let ctx = interp.ctx;
    let rep = interp.fresh_bv("dict_near_rep", key_bits);
    let mut constraints = Vec::new();
    for shadow in dict.shadow_keys() {
        constraints.push(rep._eq(&shadow).not());
    }
    let on_side = match (toward_greater, allow_eq, signed) {
        (true, false, true) => rep.bvsgt(pivot),
        (true, false, false) => rep.bvugt(pivot),
        (true, true, true) => rep.bvsge(pivot),
        (true, true, false) => rep.bvuge(pivot),
        (false, false, true) => rep.bvslt(pivot),
        (false, false, false) => rep.bvult(pivot),
        (false, true, true) => rep.bvsle(pivot),
        (false, true, false) => rep.bvule(pivot),
    };
    constraints.push(on_side);
    let scope = state
        .dicts
        .scope_mut(scope_id)
        .ok_or_else(|| StepError::internal("input dictionary scope missing"))?;
    scope.discover_key(ctx, rep.clone(), Bool::from_bool(ctx, true), &mut constraints);
    scope.register_quantifier(
        ctx,
        DictQuantifier::new(
            QuantShape::ClosestInRange {
                pivot: pivot.clone(),
                result: rep.clone(),
                signed,
                toward_greater,
                allow_eq,
            },
            dict.shadow_keys(),
        ),
        &mut constraints,
    );
    state.add_constraints(constraints);
    Ok(rep)
}

#[allow(clippy::too_many_arguments)]
fn register_none_beyond<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    scope_id: u64,
    dict: &DictState<'ctx>,
    pivot: &BV<'ctx>,
    signed: bool,
    toward_greater: bool,
    allow_eq: bool,
) {
    let ctx = interp.ctx;
    let mut constraints = Vec::new();
    if let Some(scope) = state.dicts.scope_mut(scope_id) {
        scope.register_quantifier(
            ctx,
            DictQuantifier::new(
                QuantShape::NoneBeyond {
                    pivot: pivot.clone(),
                    signed,
                    toward_greater,
                    allow_eq,
                },
                dict.shadow_keys(),
            ),
            &mut constraints,
        );
    }
    state.add_constraints(constraints);
}
