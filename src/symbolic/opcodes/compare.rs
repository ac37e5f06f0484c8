use z3::ast::{Ast, BV};

use crate::insn::CmpInstr;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::StepError;
use crate::symbolic::state::VmState;
use crate::symbolic::z3_ext::{bool_to_int, int_val, int_zero};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &CmpInstr,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        CmpInstr::Sgn => {
            let x = state.stack.pop_int()?;
            let zero = int_zero(ctx);
            let sgn = x
                .bvslt(&zero)
                .ite(&int_val(ctx, -1), &x.bvsgt(&zero).ite(&int_val(ctx, 1), &zero));
            state.stack.push_int(sgn)
        }
        CmpInstr::Less => {
            comparison_op!(ctx, state, bvslt);
            Ok(())
        }
        CmpInstr::Equal => {
            comparison_op!(ctx, state, _eq);
            Ok(())
        }
        CmpInstr::Leq => {
            comparison_op!(ctx, state, bvsle);
            Ok(())
        }
        CmpInstr::Greater => {
            comparison_op!(ctx, state, bvsgt);
            Ok(())
        }
        CmpInstr::Geq => {
            comparison_op!(ctx, state, bvsge);
            Ok(())
        }
        CmpInstr::Neq => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            let res = x._eq(&y).not();
            state.stack.push_int(bool_to_int(ctx, &res))
        }
        CmpInstr::Cmp => {
            let y = state.stack.pop_int()?;
            let x = state.stack.pop_int()?;
            let cmp = x.bvslt(&y).ite(
                &int_val(ctx, -1),
                &x.bvsgt(&y).ite(&int_val(ctx, 1), &int_zero(ctx)),
            );
            state.stack.push_int(cmp)
        }
        CmpInstr::EqInt(c) => against_const(ctx, state, *c, |x, c| x._eq(c)),
        CmpInstr::NeqInt(c) => against_const(ctx, state, *c, |x, c| x._eq(c).not()),
        CmpInstr::GtInt(c) => against_const(ctx, state, *c, |x, c| x.bvsgt(c)),
        CmpInstr::LessInt(c) => against_const(ctx, state, *c, |x, c| x.bvslt(c)),
    }
}

fn against_const<'ctx>(
    ctx: &'ctx z3::Context,
    state: &mut VmState<'ctx>,
    c: i16,
    cmp: impl FnOnce(&BV<'ctx>, &BV<'ctx>) -> z3::ast::Bool<'ctx>,
) -> Result<(), StepError> {
    let x = state.stack.pop_int()?;
    let res = cmp(&x, &int_val(ctx, c as i64));
    state.stack.push_int(bool_to_int(ctx, &res))
}
