//! Output-action instructions: each one prepends a record to the c5 action
//! list (newest first); the action phase walks and interprets the list
//! after the compute phase halts.

use std::sync::Arc;

use crate::insn::ActionInstr;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::memory::Builder;
use crate::symbolic::opcodes::require_or_raise;
use crate::symbolic::outcome::{SoftFailure, TerminalKind, VmFailure};
use crate::symbolic::state::VmState;
use crate::symbolic::z3_ext::{int_zero, len_val, u64_from_bv};
use crate::transaction::actions::{ACT_RESERVE_TAG, ACT_SEND_MSG_TAG, ACT_SET_CODE_TAG};

/// Mode flag: attach the whole remaining balance.
pub const SEND_ALL_BALANCE: u64 = 128;

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &ActionInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        ActionInstr::SendRawMsg => {
            let mode = state.stack.pop_int()?;
            let msg = state.stack.pop_cell()?;

            // Well-formedness policy: the remaining balance can only leave
            // once per action phase.
            if let Some(m) = u64_from_bv(&mode) {
                if m & SEND_ALL_BALANCE != 0 {
                    if state.sent_remaining_value {
                        state.halt(TerminalKind::Soft(SoftFailure::DoubleSendRemainingValue));
                        return Ok(());
                    }
                    state.sent_remaining_value = true;
                }
            }

            let b = Builder::new(ctx)
                .store_uint(
                    ctx,
                    &crate::symbolic::z3_ext::int_val(ctx, ACT_SEND_MSG_TAG as i64),
                    &len_val(ctx, 32),
                    32,
                )
                .store_uint(ctx, &mode, &len_val(ctx, 8), 8)
                .store_ref(state.regs.c5.clone())
                .store_ref(msg);
            let id = interp.fresh_cell_id();
            state.regs.c5 = Arc::new(b.seal(ctx, id));
            Ok(())
        }
        ActionInstr::RawReserve => {
            let mode = state.stack.pop_int()?;
            let amount = state.stack.pop_int()?;
            require_or_raise(
                interp,
                state,
                amount.bvsge(&int_zero(ctx)),
                VmFailure::RangeCheck,
                out,
            )?;

            let b = Builder::new(ctx)
                .store_uint(
                    ctx,
                    &crate::symbolic::z3_ext::int_val(ctx, ACT_RESERVE_TAG as i64),
                    &len_val(ctx, 32),
                    32,
                )
                .store_uint(ctx, &mode, &len_val(ctx, 8), 8)
                .store_uint(ctx, &amount, &len_val(ctx, 128), 128)
                .store_ref(state.regs.c5.clone());
            let id = interp.fresh_cell_id();
            state.regs.c5 = Arc::new(b.seal(ctx, id));
            Ok(())
        }
        ActionInstr::SetCode => {
            let code = state.stack.pop_cell()?;
            let b = Builder::new(ctx)
                .store_uint(
                    ctx,
                    &crate::symbolic::z3_ext::int_val(ctx, ACT_SET_CODE_TAG as i64),
                    &len_val(ctx, 32),
                    32,
                )
                .store_ref(state.regs.c5.clone())
                .store_ref(code);
            let id = interp.fresh_cell_id();
            state.regs.c5 = Arc::new(b.seal(ctx, id));
            Ok(())
        }
        ActionInstr::Accept => {
            // External-message acceptance lifts the gas ceiling.
            state.gas.limit = u64::MAX / 2;
            Ok(())
        }
        ActionInstr::SetGasLimit => {
            let g = state.stack.pop_int()?;
            let g = require_concrete(u64_from_bv(&g), "gas limit")?;
            state.gas.limit = state.gas.limit.min(g.max(state.gas.used));
            Ok(())
        }
        ActionInstr::Commit => {
            state.committed = Some((state.regs.c4.clone(), state.regs.c5.clone()));
            Ok(())
        }
    }
}
