//! Heterogeneous operand stack.
//!
//! Typed pops raise the VM's type-check failure on mismatch and stack
//! underflow on exhaustion, so handlers can use `?` all the way through.

use std::sync::Arc;

use z3::ast::BV;

use crate::symbolic::cont::Continuation;
use crate::symbolic::error::StepError;
use crate::symbolic::memory::{Builder, Cell, CellSlice};
use crate::symbolic::outcome::VmFailure;

pub const MAX_STACK_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub enum StackValue<'ctx> {
    Null,
    Int(BV<'ctx>),
    Cell(Arc<Cell<'ctx>>),
    Slice(CellSlice<'ctx>),
    Builder(Builder<'ctx>),
    Cont(Arc<Continuation<'ctx>>),
    Tuple(Arc<Vec<StackValue<'ctx>>>),
}

impl<'ctx> StackValue<'ctx> {
    pub fn type_name(&self) -> &'static str {
        match self {
            StackValue::Null => "null",
            StackValue::Int(_) => "int",
            StackValue::Cell(_) => "cell",
            StackValue::Slice(_) => "slice",
            StackValue::Builder(_) => "builder",
            StackValue::Cont(_) => "continuation",
            StackValue::Tuple(_) => "tuple",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperandStack<'ctx> {
    items: Vec<StackValue<'ctx>>,
}

impl<'ctx> OperandStack<'ctx> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, value: StackValue<'ctx>) -> Result<(), StepError> {
        if self.items.len() >= MAX_STACK_DEPTH {
            return Err(StepError::vm(VmFailure::StackOverflow));
        }
        self.items.push(value);
        Ok(())
    }

    pub fn push_int(&mut self, value: BV<'ctx>) -> Result<(), StepError> {
        self.push(StackValue::Int(value))
    }

    pub fn pop(&mut self) -> Result<StackValue<'ctx>, StepError> {
        self.items.pop().ok_or_else(StepError::underflow)
    }

    pub fn pop_int(&mut self) -> Result<BV<'ctx>, StepError> {
        match self.pop()? {
            StackValue::Int(v) => Ok(v),
            _ => Err(StepError::type_check()),
        }
    }

    pub fn pop_cell(&mut self) -> Result<Arc<Cell<'ctx>>, StepError> {
        match self.pop()? {
            StackValue::Cell(c) => Ok(c),
            _ => Err(StepError::type_check()),
        }
    }

    pub fn pop_slice(&mut self) -> Result<CellSlice<'ctx>, StepError> {
        match self.pop()? {
            StackValue::Slice(s) => Ok(s),
            _ => Err(StepError::type_check()),
        }
    }

    pub fn pop_builder(&mut self) -> Result<Builder<'ctx>, StepError> {
        match self.pop()? {
            StackValue::Builder(b) => Ok(b),
            _ => Err(StepError::type_check()),
        }
    }

    pub fn pop_cont(&mut self) -> Result<Arc<Continuation<'ctx>>, StepError> {
        match self.pop()? {
            StackValue::Cont(c) => Ok(c),
            _ => Err(StepError::type_check()),
        }
    }

    pub fn pop_tuple(&mut self) -> Result<Arc<Vec<StackValue<'ctx>>>, StepError> {
        match self.pop()? {
            StackValue::Tuple(t) => Ok(t),
            _ => Err(StepError::type_check()),
        }
    }

    /// Dictionary operands are "cell or null".
    pub fn pop_maybe_cell(&mut self) -> Result<Option<Arc<Cell<'ctx>>>, StepError> {
        match self.pop()? {
            StackValue::Null => Ok(None),
            StackValue::Cell(c) => Ok(Some(c)),
            _ => Err(StepError::type_check()),
        }
    }

    pub fn peek(&self, from_top: usize) -> Result<&StackValue<'ctx>, StepError> {
        let len = self.items.len();
        if from_top >= len {
            return Err(StepError::underflow());
        }
        Ok(&self.items[len - 1 - from_top])
    }

    pub fn swap(&mut self, i: usize, j: usize) -> Result<(), StepError> {
        let len = self.items.len();
        if i >= len || j >= len {
            return Err(StepError::underflow());
        }
        self.items.swap(len - 1 - i, len - 1 - j);
        Ok(())
    }

    /// Removes s(i), shifting everything above it down.
    pub fn remove(&mut self, from_top: usize) -> Result<StackValue<'ctx>, StepError> {
        let len = self.items.len();
        if from_top >= len {
            return Err(StepError::underflow());
        }
        Ok(self.items.remove(len - 1 - from_top))
    }

    /// Inserts a value at depth `from_top` (0 = push).
    pub fn insert(&mut self, from_top: usize, value: StackValue<'ctx>) -> Result<(), StepError> {
        let len = self.items.len();
        if from_top > len {
            return Err(StepError::underflow());
        }
        if len >= MAX_STACK_DEPTH {
            return Err(StepError::vm(VmFailure::StackOverflow));
        }
        self.items.insert(len - from_top, value);
        Ok(())
    }

    /// Takes the top `count` values, preserving their order.
    pub fn take_top(&mut self, count: usize) -> Result<Vec<StackValue<'ctx>>, StepError> {
        if self.items.len() < count {
            return Err(StepError::underflow());
        }
        Ok(self.items.split_off(self.items.len() - count))
    }

    pub fn extend(&mut self, values: Vec<StackValue<'ctx>>) -> Result<(), StepError> {
        if self.items.len() + values.len() > MAX_STACK_DEPTH {
            return Err(StepError::vm(VmFailure::StackOverflow));
        }
        self.items.extend(values);
        Ok(())
    }

    /// Drops everything above the bottom `keep` values.
    pub fn keep_only_bottom(&mut self, keep: usize) -> Result<(), StepError> {
        if self.items.len() < keep {
            return Err(StepError::underflow());
        }
        self.items.truncate(keep);
        Ok(())
    }

    /// Drops everything below the top `keep` values.
    pub fn keep_only_top(&mut self, keep: usize) -> Result<(), StepError> {
        if self.items.len() < keep {
            return Err(StepError::underflow());
        }
        let cut = self.items.len() - keep;
        self.items.drain(..cut);
        Ok(())
    }

    pub fn items(&self) -> &[StackValue<'ctx>] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::int_val;
    use z3::{Config, Context};

    #[test]
    fn test_typed_pop_mismatch_is_type_check() {
        let mut stack = OperandStack::<'_>::new();
        stack.push(StackValue::Null).unwrap();
        assert_eq!(stack.pop_int().unwrap_err(), StepError::type_check());
    }

    #[test]
    fn test_pop_empty_is_underflow() {
        let mut stack = OperandStack::<'_>::new();
        assert_eq!(stack.pop().unwrap_err(), StepError::underflow());
    }

    #[test]
    fn test_take_top_preserves_order() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let mut stack = OperandStack::new();
        for v in [1, 2, 3] {
            stack.push_int(int_val(&ctx, v)).unwrap();
        }
        let top = stack.take_top(2).unwrap();
        assert_eq!(top.len(), 2);
        // Order preserved: [2, 3] with 3 last (top).
        match (&top[0], &top[1]) {
            (StackValue::Int(a), StackValue::Int(b)) => {
                use crate::symbolic::z3_ext::u64_from_bv;
                assert_eq!(u64_from_bv(a), Some(2));
                assert_eq!(u64_from_bv(b), Some(3));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(stack.depth(), 1);
    }
}
