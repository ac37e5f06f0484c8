use std::sync::Arc;

use crate::insn::ContInstr;
use crate::symbolic::cont::{Continuation, OrdCont, SavedRegs};
use crate::symbolic::engine::{failure_from_code, BranchPlan, Interpreter};
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::outcome::{BoundsClass, VmFailure};
use crate::symbolic::state::VmState;
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{int_is_true, int_val, u64_from_bv};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &ContInstr,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        ContInstr::PushCont(code) => state
            .stack
            .push(StackValue::Cont(Continuation::ordinary(code.clone()))),
        ContInstr::Execute => {
            let cont = state.stack.pop_cont()?;
            interp.call(state, cont, out)
        }
        ContInstr::JmpX => {
            let cont = state.stack.pop_cont()?;
            interp.jump(state, cont, out)
        }
        ContInstr::CallXArgs(params, rets) => {
            let cont = state.stack.pop_cont()?;
            let args = state.stack.take_top(*params as usize)?;
            let caller_stack = state.stack.take_top(state.stack.depth())?;
            let take = if *rets < 0 {
                None
            } else {
                Some(*rets as usize)
            };
            let ret = Arc::new(Continuation::Ordinary(OrdCont {
                code: state.code.clone(),
                ip: state.ip,
                saved: SavedRegs {
                    c0: Some(state.regs.c0.clone()),
                    ..SavedRegs::default()
                },
                captured_stack: Some(caller_stack),
                take_on_jump: take,
                method_exit: None,
            }));
            state.stack.extend(args)?;
            state.regs.c0 = ret;
            interp.jump(state, cont, out)
        }
        ContInstr::JmpXArgs(params) => {
            let cont = state.stack.pop_cont()?;
            let args = state.stack.take_top(*params as usize)?;
            state.stack.keep_only_bottom(0)?;
            state.stack.extend(args)?;
            interp.jump(state, cont, out)
        }
        ContInstr::Ret => {
            let c0 = state.regs.c0.clone();
            interp.jump(state, c0, out)
        }
        ContInstr::RetAlt => {
            let c1 = state.regs.c1.clone();
            interp.jump(state, c1, out)
        }
        ContInstr::If => {
            let cont = state.stack.pop_cont()?;
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeTrue => interp.call(state, cont, out),
                BranchPlan::TakeFalse | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                BranchPlan::Both { other } => {
                    out.push(other);
                    interp.call(state, cont, out)
                }
            }
        }
        ContInstr::IfNot => {
            let cont = state.stack.pop_cont()?;
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeFalse => interp.call(state, cont, out),
                BranchPlan::TakeTrue | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                BranchPlan::Both { mut other } => {
                    interp.call(&mut other, cont, out)?;
                    out.push(other);
                    Ok(())
                }
            }
        }
        ContInstr::IfJmp => {
            let cont = state.stack.pop_cont()?;
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeTrue => interp.jump(state, cont, out),
                BranchPlan::TakeFalse | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                BranchPlan::Both { other } => {
                    out.push(other);
                    interp.jump(state, cont, out)
                }
            }
        }
        ContInstr::IfNotJmp => {
            let cont = state.stack.pop_cont()?;
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeFalse => interp.jump(state, cont, out),
                BranchPlan::TakeTrue | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                BranchPlan::Both { mut other } => {
                    interp.jump(&mut other, cont, out)?;
                    out.push(other);
                    Ok(())
                }
            }
        }
        ContInstr::IfElse => {
            let else_cont = state.stack.pop_cont()?;
            let then_cont = state.stack.pop_cont()?;
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeTrue => interp.call(state, then_cont, out),
                BranchPlan::TakeFalse => interp.call(state, else_cont, out),
                BranchPlan::Both { mut other } => {
                    interp.call(&mut other, else_cont, out)?;
                    out.push(other);
                    interp.call(state, then_cont, out)
                }
                BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
            }
        }
        ContInstr::IfRet => {
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeTrue => {
                    let c0 = state.regs.c0.clone();
                    interp.jump(state, c0, out)
                }
                BranchPlan::TakeFalse | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                BranchPlan::Both { other } => {
                    out.push(other);
                    let c0 = state.regs.c0.clone();
                    interp.jump(state, c0, out)
                }
            }
        }
        ContInstr::IfNotRet => {
            let flag = state.stack.pop_int()?;
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeFalse => {
                    let c0 = state.regs.c0.clone();
                    interp.jump(state, c0, out)
                }
                BranchPlan::TakeTrue | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                BranchPlan::Both { mut other } => {
                    let c0 = other.regs.c0.clone();
                    interp.jump(&mut other, c0, out)?;
                    out.push(other);
                    Ok(())
                }
            }
        }
        ContInstr::CondSel => {
            let y = state.stack.pop()?;
            let x = state.stack.pop()?;
            let flag = state.stack.pop_int()?;
            // Two ints merge symbolically; otherwise the state must fork.
            if let (StackValue::Int(xv), StackValue::Int(yv)) = (&x, &y) {
                let sel = int_is_true(ctx, &flag).ite(xv, yv);
                return state.stack.push_int(sel);
            }
            match interp.fork_on(state, int_is_true(ctx, &flag)) {
                BranchPlan::TakeTrue => state.stack.push(x),
                BranchPlan::TakeFalse => state.stack.push(y),
                BranchPlan::Both { mut other } => {
                    other.stack.push(y)?;
                    out.push(other);
                    state.stack.push(x)
                }
                BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
            }
        }
        ContInstr::Repeat => {
            let body = state.stack.pop_cont()?;
            let count = state.stack.pop_int()?;
            let after = current_cont(state);
            let loop_cont = Arc::new(Continuation::Repeat {
                remaining: count,
                body,
                after,
                loop_id: interp.fresh_loop_id(),
            });
            interp.jump(state, loop_cont, out)
        }
        ContInstr::Until => {
            let body = state.stack.pop_cont()?;
            let after = current_cont(state);
            let loop_cont = Arc::new(Continuation::Until {
                body: body.clone(),
                after,
                loop_id: interp.fresh_loop_id(),
            });
            state.regs.c0 = loop_cont;
            interp.jump(state, body, out)
        }
        ContInstr::While => {
            let body = state.stack.pop_cont()?;
            let cond = state.stack.pop_cont()?;
            let after = current_cont(state);
            let loop_cont = Arc::new(Continuation::While {
                cond: cond.clone(),
                body,
                after,
                checking: true,
                loop_id: interp.fresh_loop_id(),
            });
            state.regs.c0 = loop_cont;
            interp.jump(state, cond, out)
        }
        ContInstr::Again => {
            let body = state.stack.pop_cont()?;
            let loop_cont = Arc::new(Continuation::Again {
                body: body.clone(),
                loop_id: interp.fresh_loop_id(),
            });
            state.regs.c0 = loop_cont;
            interp.jump(state, body, out)
        }
        ContInstr::PushCtr(i) => match i {
            0 => state.stack.push(StackValue::Cont(state.regs.c0.clone())),
            1 => state.stack.push(StackValue::Cont(state.regs.c1.clone())),
            2 => state.stack.push(StackValue::Cont(state.regs.c2.clone())),
            3 => state.stack.push(StackValue::Cont(state.regs.c3.clone())),
            4 => state.stack.push(StackValue::Cell(state.regs.c4.clone())),
            5 => state.stack.push(StackValue::Cell(state.regs.c5.clone())),
            7 => state.stack.push(StackValue::Tuple(state.regs.c7.clone())),
            _ => Err(StepError::vm(VmFailure::RangeCheck)),
        },
        ContInstr::PopCtr(i) => match i {
            0 => {
                state.regs.c0 = state.stack.pop_cont()?;
                Ok(())
            }
            1 => {
                state.regs.c1 = state.stack.pop_cont()?;
                Ok(())
            }
            2 => {
                state.regs.c2 = state.stack.pop_cont()?;
                Ok(())
            }
            3 => {
                state.regs.c3 = state.stack.pop_cont()?;
                Ok(())
            }
            4 => {
                state.regs.c4 = state.stack.pop_cell()?;
                Ok(())
            }
            5 => {
                state.regs.c5 = state.stack.pop_cell()?;
                Ok(())
            }
            7 => {
                state.regs.c7 = state.stack.pop_tuple()?;
                Ok(())
            }
            _ => Err(StepError::vm(VmFailure::RangeCheck)),
        },
        ContInstr::SetContCtr(i) => {
            let cont = state.stack.pop_cont()?;
            let Continuation::Ordinary(ord) = cont.as_ref() else {
                return Err(StepError::unimplemented(
                    "SETCONTCTR on non-ordinary continuation",
                ));
            };
            let mut ord = ord.clone();
            match i {
                0 => ord.saved.c0 = Some(state.stack.pop_cont()?),
                1 => ord.saved.c1 = Some(state.stack.pop_cont()?),
                2 => ord.saved.c2 = Some(state.stack.pop_cont()?),
                3 => ord.saved.c3 = Some(state.stack.pop_cont()?),
                4 => ord.saved.c4 = Some(state.stack.pop_cell()?),
                5 => ord.saved.c5 = Some(state.stack.pop_cell()?),
                7 => ord.saved.c7 = Some(state.stack.pop_tuple()?),
                _ => return Err(StepError::vm(VmFailure::RangeCheck)),
            }
            state
                .stack
                .push(StackValue::Cont(Arc::new(Continuation::Ordinary(ord))))
        }
        ContInstr::SaveCtr(i) => {
            let Continuation::Ordinary(ord) = state.regs.c0.as_ref() else {
                return Ok(());
            };
            let mut ord = ord.clone();
            match i {
                0 => {
                    if ord.saved.c0.is_none() {
                        ord.saved.c0 = Some(state.regs.c0.clone());
                    }
                }
                1 => {
                    if ord.saved.c1.is_none() {
                        ord.saved.c1 = Some(state.regs.c1.clone());
                    }
                }
                2 => {
                    if ord.saved.c2.is_none() {
                        ord.saved.c2 = Some(state.regs.c2.clone());
                    }
                }
                3 => {
                    if ord.saved.c3.is_none() {
                        ord.saved.c3 = Some(state.regs.c3.clone());
                    }
                }
                4 => {
                    if ord.saved.c4.is_none() {
                        ord.saved.c4 = Some(state.regs.c4.clone());
                    }
                }
                5 => {
                    if ord.saved.c5.is_none() {
                        ord.saved.c5 = Some(state.regs.c5.clone());
                    }
                }
                7 => {
                    if ord.saved.c7.is_none() {
                        ord.saved.c7 = Some(state.regs.c7.clone());
                    }
                }
                _ => return Err(StepError::vm(VmFailure::RangeCheck)),
            }
            state.regs.c0 = Arc::new(Continuation::Ordinary(ord));
            Ok(())
        }
        ContInstr::Atexit => {
            let cont = state.stack.pop_cont()?;
            state.regs.c0 = cont.with_saved_c0(state.regs.c0.clone());
            Ok(())
        }
        ContInstr::AtexitAlt => {
            let cont = state.stack.pop_cont()?;
            state.regs.c1 = cont.with_saved_c1(state.regs.c1.clone());
            Ok(())
        }
        ContInstr::Compos => {
            let second = state.stack.pop_cont()?;
            let first = state.stack.pop_cont()?;
            state
                .stack
                .push(StackValue::Cont(first.with_saved_c0(second)))
        }
        ContInstr::ComposAlt => {
            let second = state.stack.pop_cont()?;
            let first = state.stack.pop_cont()?;
            state
                .stack
                .push(StackValue::Cont(first.with_saved_c1(second)))
        }
        ContInstr::ComposBoth => {
            let second = state.stack.pop_cont()?;
            let first = state.stack.pop_cont()?;
            let composed = first.with_saved_c0(second.clone()).with_saved_c1(second);
            state.stack.push(StackValue::Cont(composed))
        }
        ContInstr::CallDict(method_id) => {
            state.stack.push_int(int_val(ctx, *method_id))?;
            let ret = Arc::new(Continuation::Ordinary(OrdCont {
                code: state.code.clone(),
                ip: state.ip,
                saved: SavedRegs {
                    c0: Some(state.regs.c0.clone()),
                    ..SavedRegs::default()
                },
                captured_stack: None,
                take_on_jump: None,
                method_exit: Some(*method_id),
            }));
            state.regs.c0 = ret;
            let c3 = state.regs.c3.clone();
            interp.jump(state, c3, out)
        }
        ContInstr::JmpDict(method_id) => {
            state.stack.push_int(int_val(ctx, *method_id))?;
            let c3 = state.regs.c3.clone();
            interp.jump(state, c3, out)
        }
        ContInstr::Throw(code) => Err(StepError::vm(failure_from_code(*code as i32))),
        ContInstr::ThrowIf(code) => {
            let flag = state.stack.pop_int()?;
            throw_conditional(interp, state, *code, int_is_true(ctx, &flag), out)
        }
        ContInstr::ThrowIfNot(code) => {
            let flag = state.stack.pop_int()?;
            throw_conditional(
                interp,
                state,
                *code,
                int_is_true(ctx, &flag).not(),
                out,
            )
        }
        ContInstr::ThrowAny => {
            let code = state.stack.pop_int()?;
            let code = require_concrete(u64_from_bv(&code), "exception code")?;
            Err(StepError::vm(failure_from_code(code as i32)))
        }
        ContInstr::Try => {
            let handler = state.stack.pop_cont()?;
            let body = state.stack.pop_cont()?;
            let old_c2 = state.regs.c2.clone();
            let handler = match handler.as_ref() {
                Continuation::Ordinary(ord) => {
                    let mut ord = ord.clone();
                    if ord.saved.c2.is_none() {
                        ord.saved.c2 = Some(old_c2.clone());
                    }
                    Arc::new(Continuation::Ordinary(ord))
                }
                _ => handler,
            };
            let ret = Arc::new(Continuation::Ordinary(OrdCont {
                code: state.code.clone(),
                ip: state.ip,
                saved: SavedRegs {
                    c0: Some(state.regs.c0.clone()),
                    c2: Some(old_c2),
                    ..SavedRegs::default()
                },
                captured_stack: None,
                take_on_jump: None,
                method_exit: None,
            }));
            state.regs.c0 = ret;
            state.regs.c2 = handler;
            interp.jump(state, body, out)
        }
    }
}

/// The rest of the current code as a continuation ("after" of a loop).
fn current_cont<'ctx>(state: &VmState<'ctx>) -> Arc<Continuation<'ctx>> {
    Arc::new(Continuation::Ordinary(OrdCont {
        code: state.code.clone(),
        ip: state.ip,
        saved: SavedRegs::default(),
        captured_stack: None,
        take_on_jump: None,
        method_exit: None,
    }))
}

fn throw_conditional<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    code: u16,
    cond: z3::ast::Bool<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    match interp.fork_on(state, cond) {
        BranchPlan::TakeTrue => Err(StepError::vm(failure_from_code(code as i32))),
        BranchPlan::TakeFalse | BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
        BranchPlan::Both { mut other } => {
            interp.raise(
                &mut other,
                failure_from_code(code as i32),
                BoundsClass::Real,
                out,
            );
            out.push(other);
            Ok(())
        }
    }
}
