use std::sync::Arc;

use crate::insn::TupleInstr;
use crate::symbolic::engine::{BranchPlan, Interpreter};
use crate::symbolic::error::StepError;
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{bool_to_int, int_is_true, int_val};

const MAX_TUPLE_LEN: usize = 255;

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &TupleInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        TupleInstr::Null => state.stack.push(StackValue::Null),
        TupleInstr::IsNull => {
            let v = state.stack.pop()?;
            let is_null = matches!(v, StackValue::Null);
            let b = z3::ast::Bool::from_bool(ctx, is_null);
            state.stack.push_int(bool_to_int(ctx, &b))
        }
        TupleInstr::MkTuple(n) => {
            let items = state.stack.take_top(*n as usize)?;
            state.stack.push(StackValue::Tuple(Arc::new(items)))
        }
        TupleInstr::Nil => state.stack.push(StackValue::Tuple(Arc::new(Vec::new()))),
        TupleInstr::Index(i) => {
            let t = state.stack.pop_tuple()?;
            let v = t
                .get(*i as usize)
                .cloned()
                .ok_or(StepError::vm(VmFailure::RangeCheck))?;
            state.stack.push(v)
        }
        TupleInstr::IndexQ(i) => {
            let v = match state.stack.pop()? {
                StackValue::Null => StackValue::Null,
                StackValue::Tuple(t) => t.get(*i as usize).cloned().unwrap_or(StackValue::Null),
                _ => return Err(StepError::type_check()),
            };
            state.stack.push(v)
        }
        TupleInstr::Untuple(n) => {
            let t = state.stack.pop_tuple()?;
            if t.len() != *n as usize {
                return Err(StepError::type_check());
            }
            state.stack.extend(t.as_ref().clone())
        }
        TupleInstr::UnpackFirst(n) => {
            let t = state.stack.pop_tuple()?;
            if t.len() < *n as usize {
                return Err(StepError::type_check());
            }
            state.stack.extend(t[..*n as usize].to_vec())
        }
        TupleInstr::Explode(_) => Err(StepError::unimplemented("EXPLODE")),
        TupleInstr::TupleLen => {
            let t = state.stack.pop_tuple()?;
            state.stack.push_int(int_val(ctx, t.len() as i64))
        }
        TupleInstr::TupleLenQ => {
            let len = match state.stack.pop()? {
                StackValue::Tuple(t) => t.len() as i64,
                _ => -1,
            };
            state.stack.push_int(int_val(ctx, len))
        }
        TupleInstr::Last => {
            let t = state.stack.pop_tuple()?;
            let v = t
                .last()
                .cloned()
                .ok_or(StepError::vm(VmFailure::RangeCheck))?;
            state.stack.push(v)
        }
        TupleInstr::TPush => {
            let v = state.stack.pop()?;
            let t = state.stack.pop_tuple()?;
            if t.len() >= MAX_TUPLE_LEN {
                return Err(StepError::type_check());
            }
            let mut items = t.as_ref().clone();
            items.push(v);
            state.stack.push(StackValue::Tuple(Arc::new(items)))
        }
        TupleInstr::TPop => {
            let t = state.stack.pop_tuple()?;
            let mut items = t.as_ref().clone();
            let v = items.pop().ok_or(StepError::vm(VmFailure::RangeCheck))?;
            state.stack.push(StackValue::Tuple(Arc::new(items)))?;
            state.stack.push(v)
        }
        TupleInstr::SetIndex(i) => {
            let v = state.stack.pop()?;
            let t = state.stack.pop_tuple()?;
            let idx = *i as usize;
            if idx >= t.len() {
                return Err(StepError::vm(VmFailure::RangeCheck));
            }
            let mut items = t.as_ref().clone();
            items[idx] = v;
            state.stack.push(StackValue::Tuple(Arc::new(items)))
        }
        TupleInstr::NullSwapIf => null_swap(interp, state, true, out),
        TupleInstr::NullSwapIfNot => null_swap(interp, state, false, out),
    }
}

/// Inserts a Null under the top integer when the flag direction matches.
fn null_swap<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    when_true: bool,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let flag = state.stack.pop_int()?;
    let cond = if when_true {
        int_is_true(ctx, &flag)
    } else {
        int_is_true(ctx, &flag).not()
    };
    let insert = |s: &mut VmState<'ctx>, flag: z3::ast::BV<'ctx>| -> Result<(), StepError> {
        s.stack.push(StackValue::Null)?;
        s.stack.push_int(flag)
    };
    match interp.fork_on(state, cond) {
        BranchPlan::TakeTrue => insert(state, flag),
        BranchPlan::TakeFalse => state.stack.push_int(flag),
        BranchPlan::Both { mut other } => {
            other.stack.push_int(flag.clone())?;
            out.push(other);
            insert(state, flag)
        }
        BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
    }
}
