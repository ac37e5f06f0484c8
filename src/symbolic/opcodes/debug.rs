use crate::insn::DebugInstr;
use crate::machine::init_contract_regs;
use crate::symbolic::cont::Continuation;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::state::{CheckerFrame, VmState};
use crate::symbolic::value::OperandStack;
use crate::symbolic::z3_ext::u64_from_bv;
use std::sync::Arc;

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &DebugInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match instr {
        DebugInstr::DumpStack => {
            tracing::debug!(depth = state.stack.depth(), "DUMPSTK");
            Ok(())
        }
        DebugInstr::Dump(i) => {
            match state.stack.peek(*i as usize) {
                Ok(v) => tracing::debug!(slot = i, value = v.type_name(), "DUMP"),
                Err(_) => tracing::debug!(slot = i, "DUMP: empty"),
            }
            Ok(())
        }
        DebugInstr::CheckerCall => {
            let method = state.stack.pop_int()?;
            let method_id = require_concrete(u64_from_bv(&method), "checker method id")? as i64;
            let target = state.stack.pop_int()?;
            let target = require_concrete(u64_from_bv(&target), "checker target contract")? as usize;
            if target >= interp.contracts.len() {
                return Err(StepError::internal(format!(
                    "checker call to unloaded contract {target}"
                )));
            }

            // Suspend the caller in an explicit frame, independent of the
            // message queue.
            let frame = CheckerFrame {
                contract: state.active_contract,
                code: state.code.clone(),
                ip: state.ip,
                stack: std::mem::replace(&mut state.stack, OperandStack::new()),
                regs: state.regs.clone(),
            };
            state.checker_frames.push(frame);

            state.active_contract = target;
            init_contract_regs(interp, state, target);
            state
                .stack
                .push_int(crate::symbolic::z3_ext::int_val(interp.ctx, method_id))?;
            let dispatch = Arc::new(Continuation::MethodDispatch { contract: target });
            interp.jump(state, dispatch, out)
        }
    }
}
