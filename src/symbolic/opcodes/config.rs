//! Environment (c7) and network-configuration instructions.
//!
//! The environment tuple lives at c7[0]; the configuration dictionary is an
//! input dictionary rooted at an input cell, so CONFIGPARAM lookups flow
//! through the same quantifier machinery as user dictionaries.

use std::sync::Arc;

use crate::insn::ConfigInstr;
use crate::symbolic::dict::DictValue;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::StepError;
use crate::symbolic::opcodes::dict::{config_dict_lookup, ConfigLookupStyle};
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;
use crate::symbolic::value::StackValue;

/// Index of the configuration root inside the environment tuple.
pub const ENV_CONFIG_INDEX: usize = 9;

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &ConfigInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match instr {
        ConfigInstr::GetParam(i) => {
            let v = env_param(state, *i as usize)?;
            state.stack.push(v)
        }
        ConfigInstr::ConfigRoot => {
            let v = env_param(state, ENV_CONFIG_INDEX)?;
            state.stack.push(v)
        }
        ConfigInstr::ConfigParam { opt } => {
            let root = match env_param(state, ENV_CONFIG_INDEX)? {
                StackValue::Cell(c) => Some(c),
                StackValue::Null => None,
                _ => return Err(StepError::type_check()),
            };
            let style = if *opt {
                ConfigLookupStyle::OptCell
            } else {
                ConfigLookupStyle::CellFlag
            };
            config_dict_lookup(interp, state, root, style, out)
        }
        ConfigInstr::GetGlob(i) => {
            let v = state
                .regs
                .c7
                .get(*i as usize)
                .cloned()
                .unwrap_or(StackValue::Null);
            state.stack.push(v)
        }
        ConfigInstr::SetGlob(i) => {
            let v = state.stack.pop()?;
            let idx = *i as usize;
            let mut globals = state.regs.c7.as_ref().clone();
            if idx >= globals.len() {
                if idx > 254 {
                    return Err(StepError::vm(VmFailure::RangeCheck));
                }
                globals.resize(idx + 1, StackValue::Null);
            }
            globals[idx] = v;
            state.regs.c7 = Arc::new(globals);
            Ok(())
        }
    }
}

/// One slot of the environment tuple at c7[0].
fn env_param<'ctx>(state: &VmState<'ctx>, idx: usize) -> Result<StackValue<'ctx>, StepError> {
    let env = match state.regs.c7.first() {
        Some(StackValue::Tuple(t)) => t.clone(),
        _ => return Err(StepError::type_check()),
    };
    env.get(idx)
        .cloned()
        .ok_or(StepError::vm(VmFailure::RangeCheck))
}

/// Used by the dict handler's CONFIGPARAM lookup; converting a stored value
/// to its cell form shares the input-cell materialization path.
pub fn value_to_cell<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    value: DictValue<'ctx>,
) -> Result<Arc<crate::symbolic::memory::Cell<'ctx>>, StepError> {
    match value {
        DictValue::Cell(c) => Ok(c),
        DictValue::Slice(s) => {
            if s.cell.is_input() {
                let one = crate::symbolic::z3_ext::len_val(interp.ctx, 1);
                state.add_constraint(s.cell.refs_len.bvuge(&one));
            }
            crate::symbolic::opcodes::cells_parse::resolve_ref(interp, state, &s)
        }
    }
}
