//! One symbolically executed machine state.
//!
//! States are forked by cloning: cells are `Arc`-shared and every other
//! field is an owned collection, so siblings never observe each other's
//! mutations. The solver itself holds only universally-valid assertions;
//! everything path-dependent lives in `path` and is passed as assumptions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use z3::ast::{Bool, BV};
use z3::{Context, Solver};

use crate::insn::Code;
use crate::symbolic::cont::ControlRegs;
use crate::symbolic::dict::DictRegistry;
use crate::symbolic::error::StepError;
use crate::symbolic::memory::{Cell, CellSlice};
use crate::symbolic::outcome::{TerminalKind, VmFailure};
use crate::symbolic::value::OperandStack;
use crate::transaction::message::{Delivery, OutboundMessage, QueuedMessage};

/// Transaction phase of the active contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compute,
    Action,
    Exit,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct GasMeter {
    pub used: u64,
    pub limit: u64,
    pub trace: Vec<u64>,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            used: 0,
            limit,
            trace: Vec::new(),
        }
    }

    pub fn charge(&mut self, cost: u64) -> Result<(), StepError> {
        self.used += cost;
        self.trace.push(cost);
        if self.used > self.limit {
            return Err(StepError::vm(VmFailure::OutOfGas));
        }
        Ok(())
    }
}

/// Mocked values replaced by real ones during post-processing.
#[derive(Debug, Clone)]
pub enum MockRecord<'ctx> {
    CellHash {
        cell: Arc<Cell<'ctx>>,
        mock: BV<'ctx>,
    },
    SliceHash {
        slice: CellSlice<'ctx>,
        mock: BV<'ctx>,
    },
    /// SHA256U over slice data bits only.
    DataHash {
        slice: CellSlice<'ctx>,
        mock: BV<'ctx>,
    },
    CellDepth {
        cell: Arc<Cell<'ctx>>,
        mock: BV<'ctx>,
    },
    Signature {
        hash: BV<'ctx>,
        signature: CellSlice<'ctx>,
        pubkey: BV<'ctx>,
        valid: Bool<'ctx>,
    },
    FwdFee {
        msg: Arc<Cell<'ctx>>,
        mock: BV<'ctx>,
    },
}

/// Suspended caller for a synchronous checker call.
#[derive(Debug, Clone)]
pub struct CheckerFrame<'ctx> {
    pub contract: usize,
    pub code: Code,
    pub ip: usize,
    pub stack: OperandStack<'ctx>,
    pub regs: ControlRegs<'ctx>,
}

#[derive(Debug, Clone)]
pub struct VmState<'ctx> {
    pub stack: OperandStack<'ctx>,
    pub regs: ControlRegs<'ctx>,
    pub code: Code,
    pub ip: usize,

    pub path: Vec<Bool<'ctx>>,
    pub gas: GasMeter,
    /// Per-method-id recursion depth on the call stack.
    pub call_depths: HashMap<i64, usize>,

    pub dicts: DictRegistry<'ctx>,
    /// Lazily materialized children of input cells: (cell id, ref index).
    pub input_children: HashMap<(u64, usize), Arc<Cell<'ctx>>>,
    pub mocks: Vec<MockRecord<'ctx>>,

    pub phase: Phase,
    pub terminal: Option<TerminalKind>,
    /// Infeasible or defensively dropped; the driver discards dead states.
    pub dead: bool,

    pub active_contract: usize,
    /// Committed persistent storage per loaded contract.
    pub storages: Vec<Arc<Cell<'ctx>>>,
    /// Contract balance along this path.
    pub balance: BV<'ctx>,
    /// COMMIT snapshot of (c4, c5), kept across a failing tail of the
    /// compute phase.
    pub committed: Option<(Arc<Cell<'ctx>>, Arc<Cell<'ctx>>)>,
    /// Set once a send spent the whole remaining balance; a second one is a
    /// well-formedness (soft) failure.
    pub sent_remaining_value: bool,

    pub queue: VecDeque<QueuedMessage<'ctx>>,
    pub deliveries: Vec<Delivery>,
    /// Messages routed to a loaded contract, in send order.
    pub emitted: Vec<OutboundMessage<'ctx>>,
    /// Messages with no resolvable destination, kept rather than failed.
    pub unprocessed: Vec<OutboundMessage<'ctx>>,
    pub checker_frames: Vec<CheckerFrame<'ctx>>,
    /// Consumption index into an ordered routing scheme.
    pub route_cursor: usize,
    /// Gas spent in completed earlier phases/contracts of this path.
    pub gas_prior: u64,

    pub steps: usize,
}

impl<'ctx> VmState<'ctx> {
    pub fn gas_total(&self) -> u64 {
        self.gas_prior + self.gas.used
    }
}

impl<'ctx> VmState<'ctx> {
    pub fn add_constraint(&mut self, constraint: Bool<'ctx>) {
        self.path.push(constraint);
    }

    pub fn add_constraints(&mut self, constraints: impl IntoIterator<Item = Bool<'ctx>>) {
        self.path.extend(constraints);
    }

    pub fn halt(&mut self, kind: TerminalKind) {
        self.terminal = Some(kind);
    }

    pub fn is_halted(&self) -> bool {
        self.terminal.is_some()
    }

    /// Child of an input cell at `idx`, materialized once per state so
    /// repeated loads see the same cell.
    pub fn input_child(
        &mut self,
        ctx: &'ctx Context,
        solver: &Solver<'ctx>,
        parent: &Arc<Cell<'ctx>>,
        idx: usize,
        fresh_id: u64,
    ) -> Arc<Cell<'ctx>> {
        if let Some(existing) = self.input_children.get(&(parent.id, idx)) {
            return existing.clone();
        }
        let child = Arc::new(Cell::fresh_input(ctx, solver, fresh_id));
        self.input_children
            .insert((parent.id, idx), child.clone());
        child
    }

    /// Enter a method body, tracking per-method recursion depth.
    pub fn enter_method(&mut self, method_id: i64) -> usize {
        let depth = self.call_depths.entry(method_id).or_insert(0);
        *depth += 1;
        *depth
    }

    pub fn leave_method(&mut self, method_id: i64) {
        if let Some(depth) = self.call_depths.get_mut(&method_id) {
            *depth = depth.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_meter_trips_on_exhaustion() {
        let mut gas = GasMeter::new(100);
        assert!(gas.charge(60).is_ok());
        assert!(gas.charge(40).is_ok());
        let err = gas.charge(1).unwrap_err();
        assert_eq!(err, StepError::vm(VmFailure::OutOfGas));
        assert_eq!(gas.trace.len(), 3);
    }
}
