use crate::insn::StackInstr;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::state::VmState;
use crate::symbolic::z3_ext::{int_val, u64_from_bv};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &StackInstr,
) -> Result<(), StepError> {
    match instr {
        StackInstr::Nop => Ok(()),
        StackInstr::Xchg0(i) => state.stack.swap(0, *i as usize),
        StackInstr::Xchg(i, j) => state.stack.swap(*i as usize, *j as usize),
        StackInstr::Push(i) => {
            let v = state.stack.peek(*i as usize)?.clone();
            state.stack.push(v)
        }
        StackInstr::Pop(i) => {
            let top = state.stack.pop()?;
            if *i > 0 {
                // POP s(i): replace s(i) with the old top.
                let removed = state.stack.remove(*i as usize - 1)?;
                drop(removed);
                state.stack.insert(*i as usize - 1, top)?;
            }
            Ok(())
        }
        StackInstr::Rot => {
            // a b c -> b c a
            state.stack.swap(1, 2)?;
            state.stack.swap(0, 1)
        }
        StackInstr::RotRev => {
            // a b c -> c a b
            state.stack.swap(0, 1)?;
            state.stack.swap(1, 2)
        }
        StackInstr::Swap2 => {
            state.stack.swap(0, 2)?;
            state.stack.swap(1, 3)
        }
        StackInstr::Dup2 => {
            let b = state.stack.peek(0)?.clone();
            let a = state.stack.peek(1)?.clone();
            state.stack.push(a)?;
            state.stack.push(b)
        }
        StackInstr::Over2 => {
            let b = state.stack.peek(2)?.clone();
            let a = state.stack.peek(3)?.clone();
            state.stack.push(a)?;
            state.stack.push(b)
        }
        StackInstr::Drop2 => {
            state.stack.pop()?;
            state.stack.pop()?;
            Ok(())
        }
        StackInstr::Tuck => {
            let b = state.stack.pop()?;
            let a = state.stack.pop()?;
            state.stack.push(b.clone())?;
            state.stack.push(a)?;
            state.stack.push(b)
        }
        StackInstr::Pick => {
            let n = pop_small_index(state)?;
            let v = state.stack.peek(n)?.clone();
            state.stack.push(v)
        }
        StackInstr::Roll => {
            let n = pop_small_index(state)?;
            let v = state.stack.remove(n)?;
            state.stack.push(v)
        }
        StackInstr::RollRev => {
            let n = pop_small_index(state)?;
            let top = state.stack.pop()?;
            state.stack.insert(n, top)
        }
        StackInstr::BlkSwap(i, j) => {
            let upper = state.stack.take_top(*j as usize)?;
            let lower = state.stack.take_top(*i as usize)?;
            state.stack.extend(upper)?;
            state.stack.extend(lower)
        }
        StackInstr::BlkPush(n, i) => {
            for _ in 0..*n {
                let v = state.stack.peek(*i as usize)?.clone();
                state.stack.push(v)?;
            }
            Ok(())
        }
        StackInstr::BlkDrop(n) => {
            for _ in 0..*n {
                state.stack.pop()?;
            }
            Ok(())
        }
        StackInstr::DropX => {
            let n = pop_small_index(state)?;
            for _ in 0..n {
                state.stack.pop()?;
            }
            Ok(())
        }
        StackInstr::Reverse(n, i) => {
            let above = state.stack.take_top(*i as usize)?;
            let mut block = state.stack.take_top(*n as usize)?;
            block.reverse();
            state.stack.extend(block)?;
            state.stack.extend(above)
        }
        StackInstr::Depth => {
            let depth = state.stack.depth() as i64;
            state.stack.push_int(int_val(interp.ctx, depth))
        }
        StackInstr::OnlyTopX => {
            let n = pop_small_index(state)?;
            state.stack.keep_only_top(n)
        }
        StackInstr::OnlyX => {
            let n = pop_small_index(state)?;
            state.stack.keep_only_bottom(n)
        }
    }
}

/// Stack indices must be concrete; a symbolic depth is an interpreter
/// limitation, not a VM error.
fn pop_small_index(state: &mut VmState<'_>) -> Result<usize, StepError> {
    let v = state.stack.pop_int()?;
    let n = require_concrete(u64_from_bv(&v), "stack index")?;
    Ok(n as usize)
}
