//! Normalized outbound messages produced by the action phase.

use std::sync::Arc;

use z3::ast::BV;

use crate::symbolic::memory::{Cell, CellSlice};

/// One outbound message in emission order: the attached value, the full
/// message cell, and cursors over body and destination address.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'ctx> {
    pub value: BV<'ctx>,
    pub cell: Arc<Cell<'ctx>>,
    pub body: CellSlice<'ctx>,
    pub dest: CellSlice<'ctx>,
    /// Send mode bits from the action record.
    pub mode: BV<'ctx>,
}

/// A message queued for delivery to a loaded contract.
#[derive(Debug, Clone)]
pub struct QueuedMessage<'ctx> {
    pub dest_contract: usize,
    pub message: OutboundMessage<'ctx>,
}

/// One observed cross-contract delivery transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub from: usize,
    pub to: usize,
}
