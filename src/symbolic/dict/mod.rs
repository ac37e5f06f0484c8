//! Dictionary (hashmap) constraint engine.
//!
//! A dictionary value is abstracted as a *modification log* (ordered
//! store/remove operations) over a backing that is either empty or an
//! *input dictionary* — a store whose members are unknown and discovered
//! lazily through quantifier instantiation (see [`quant`]).
//!
//! SOUNDNESS INVARIANT: every registered quantifier must be instantiated at
//! every known key, and every known key must be checked against every
//! quantifier. [`InputDictScope::discover_key`] and
//! [`InputDictScope::register_quantifier`] are the only two functions that
//! extend either set, and each one grounds the other side completely, so
//! the invariant holds by construction.

pub mod quant;

use std::collections::HashMap;
use std::sync::Arc;

use z3::ast::{Ast, Bool, BV};
use z3::{Context, Solver};

use crate::symbolic::memory::{Cell, CellSlice};

pub use quant::{DictQuantifier, KnownKey, QuantShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictBacking {
    Empty,
    /// Identity of the input-dictionary scope backing this value.
    Input(u64),
}

#[derive(Debug, Clone)]
pub enum DictValue<'ctx> {
    Slice(CellSlice<'ctx>),
    Cell(Arc<Cell<'ctx>>),
}

#[derive(Debug, Clone)]
pub enum DictOp<'ctx> {
    Store { key: BV<'ctx>, value: DictValue<'ctx> },
    Remove { key: BV<'ctx> },
}

impl<'ctx> DictOp<'ctx> {
    pub fn key(&self) -> &BV<'ctx> {
        match self {
            DictOp::Store { key, .. } | DictOp::Remove { key } => key,
        }
    }
}

/// One dictionary root: key width, backing and the ordered modification log.
#[derive(Debug, Clone)]
pub struct DictState<'ctx> {
    pub key_bits: u32,
    pub backing: DictBacking,
    pub ops: Vec<DictOp<'ctx>>,
}

impl<'ctx> DictState<'ctx> {
    pub fn empty(key_bits: u32) -> Self {
        Self {
            key_bits,
            backing: DictBacking::Empty,
            ops: Vec::new(),
        }
    }

    pub fn input(key_bits: u32, scope_id: u64) -> Self {
        Self {
            key_bits,
            backing: DictBacking::Input(scope_id),
            ops: Vec::new(),
        }
    }

    /// Keys the modification log rebinds or removes; backing keys equal to
    /// one of these are invisible through this dictionary value.
    pub fn shadow_keys(&self) -> Vec<BV<'ctx>> {
        self.ops.iter().map(|op| op.key().clone()).collect()
    }
}

/// Lazily discovered facts about one input dictionary.
#[derive(Debug, Clone)]
pub struct InputDictScope<'ctx> {
    pub key_bits: u32,
    pub known: Vec<KnownKey<'ctx>>,
    pub quants: Vec<DictQuantifier<'ctx>>,
    /// Value cells handed out per discovered key; repeated queries for
    /// provably-equal keys must see consistent contents.
    pub values: Vec<(BV<'ctx>, Arc<Cell<'ctx>>)>,
}

impl<'ctx> InputDictScope<'ctx> {
    pub fn new(key_bits: u32) -> Self {
        Self {
            key_bits,
            known: Vec::new(),
            quants: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Introduces a ground key. Direction 1 of the invariant: the new key is
    /// immediately checked against every quantifier registered so far.
    pub fn discover_key(
        &mut self,
        ctx: &'ctx Context,
        key: BV<'ctx>,
        contains: Bool<'ctx>,
        constraints: &mut Vec<Bool<'ctx>>,
    ) {
        let known = KnownKey { key, contains };
        for q in &self.quants {
            constraints.push(q.instantiate(ctx, &known));
        }
        self.known.push(known);
    }

    /// Registers a quantifier. Direction 2 of the invariant: the new
    /// quantifier is immediately ground at every key known so far.
    pub fn register_quantifier(
        &mut self,
        ctx: &'ctx Context,
        q: DictQuantifier<'ctx>,
        constraints: &mut Vec<Bool<'ctx>>,
    ) {
        for k in &self.known {
            constraints.push(q.instantiate(ctx, k));
        }
        self.quants.push(q);
    }

    /// Value cell for a discovered key. Reuses the exact same cell for a
    /// syntactically identical key; otherwise creates a fresh input cell and
    /// ties its shallow contents to every earlier value under key equality.
    pub fn value_cell_for(
        &mut self,
        ctx: &'ctx Context,
        solver: &Solver<'ctx>,
        key: &BV<'ctx>,
        cell_id: u64,
        constraints: &mut Vec<Bool<'ctx>>,
    ) -> Arc<Cell<'ctx>> {
        for (seen, cell) in &self.values {
            if seen == key {
                return cell.clone();
            }
        }
        let fresh = Arc::new(Cell::fresh_input(ctx, solver, cell_id));
        for (seen, cell) in &self.values {
            let same_key = key._eq(seen);
            let same_data = fresh.data._eq(&cell.data);
            let same_len = fresh.data_len._eq(&cell.data_len);
            let same_refs = fresh.refs_len._eq(&cell.refs_len);
            let same_contents = Bool::and(ctx, &[&same_data, &same_len, &same_refs]);
            constraints.push(same_key.implies(&same_contents));
        }
        self.values.push((key.clone(), fresh.clone()));
        fresh
    }
}

/// Per-state dictionary bookkeeping: root cell id → dictionary state, and
/// input-scope id → discovered facts. Cloned with the machine state.
#[derive(Debug, Clone, Default)]
pub struct DictRegistry<'ctx> {
    pub states: HashMap<u64, DictState<'ctx>>,
    pub scopes: HashMap<u64, InputDictScope<'ctx>>,
}

impl<'ctx> DictRegistry<'ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_root(&mut self, root_id: u64, state: DictState<'ctx>) {
        self.states.insert(root_id, state);
    }

    pub fn lookup(&self, root_id: u64) -> Option<&DictState<'ctx>> {
        self.states.get(&root_id)
    }

    /// Binds an input cell as a dictionary root on first use.
    pub fn bind_input_root(&mut self, root_id: u64, key_bits: u32) -> &DictState<'ctx> {
        self.scopes
            .entry(root_id)
            .or_insert_with(|| InputDictScope::new(key_bits));
        self.states
            .entry(root_id)
            .or_insert_with(|| DictState::input(key_bits, root_id))
    }

    pub fn scope_mut(&mut self, scope_id: u64) -> Option<&mut InputDictScope<'ctx>> {
        self.scopes.get_mut(&scope_id)
    }
}

/// One possibly-present binding considered by an extremum or near query.
#[derive(Debug, Clone)]
pub struct Candidate<'ctx> {
    pub present: Bool<'ctx>,
    pub key: BV<'ctx>,
}

/// Effective bindings of a modification log: a store contributes a candidate
/// present iff no later op rebinds (or removes) the same key.
pub fn log_candidates<'ctx>(ctx: &'ctx Context, ops: &[DictOp<'ctx>]) -> Vec<Candidate<'ctx>> {
    let mut out = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        let DictOp::Store { key, .. } = op else {
            continue;
        };
        let mut still_bound = Vec::new();
        for later in &ops[i + 1..] {
            still_bound.push(later.key()._eq(key).not());
        }
        let refs: Vec<&Bool<'ctx>> = still_bound.iter().collect();
        out.push(Candidate {
            present: Bool::and(ctx, &refs),
            key: key.clone(),
        });
    }
    out
}

fn prefer<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>, signed: bool, want_greater: bool) -> Bool<'ctx> {
    match (want_greater, signed) {
        (true, true) => a.bvsgt(b),
        (true, false) => a.bvugt(b),
        (false, true) => a.bvslt(b),
        (false, false) => a.bvult(b),
    }
}

/// Symbolic fold selecting the extremal present key among the candidates.
/// Returns (found, best); `best` is meaningful only under `found`.
pub fn fold_extremum<'ctx>(
    ctx: &'ctx Context,
    candidates: &[Candidate<'ctx>],
    signed: bool,
    want_max: bool,
) -> (Bool<'ctx>, BV<'ctx>) {
    let width = candidates
        .first()
        .map(|c| c.key.get_size())
        .unwrap_or(1);
    let mut found = Bool::from_bool(ctx, false);
    let mut best = BV::from_u64(ctx, 0, width);
    for cand in candidates {
        let better = Bool::or(
            ctx,
            &[
                &found.not(),
                &prefer(&cand.key, &best, signed, want_max),
            ],
        );
        let take = Bool::and(ctx, &[&cand.present, &better]);
        best = take.ite(&cand.key, &best);
        found = Bool::or(ctx, &[&found, &cand.present]);
    }
    (found, best)
}

/// Symbolic fold selecting the present key closest to the pivot on the given
/// side (next: smallest key above; prev: largest key below).
pub fn fold_near<'ctx>(
    ctx: &'ctx Context,
    candidates: &[Candidate<'ctx>],
    pivot: &BV<'ctx>,
    signed: bool,
    toward_greater: bool,
    allow_eq: bool,
) -> (Bool<'ctx>, BV<'ctx>) {
    let width = candidates
        .first()
        .map(|c| c.key.get_size())
        .unwrap_or_else(|| pivot.get_size());
    let mut found = Bool::from_bool(ctx, false);
    let mut best = BV::from_u64(ctx, 0, width);
    for cand in candidates {
        let on_side = match (toward_greater, allow_eq, signed) {
            (true, false, true) => cand.key.bvsgt(pivot),
            (true, false, false) => cand.key.bvugt(pivot),
            (true, true, true) => cand.key.bvsge(pivot),
            (true, true, false) => cand.key.bvuge(pivot),
            (false, false, true) => cand.key.bvslt(pivot),
            (false, false, false) => cand.key.bvult(pivot),
            (false, true, true) => cand.key.bvsle(pivot),
            (false, true, false) => cand.key.bvule(pivot),
        };
        let eligible = Bool::and(ctx, &[&cand.present, &on_side]);
        // Closest on the "greater" side is the minimum, and vice versa.
        let better = Bool::or(
            ctx,
            &[
                &found.not(),
                &prefer(&cand.key, &best, signed, !toward_greater),
            ],
        );
        let take = Bool::and(ctx, &[&eligible, &better]);
        best = take.ite(&cand.key, &best);
        found = Bool::or(ctx, &[&found, &eligible]);
    }
    (found, best)
}
