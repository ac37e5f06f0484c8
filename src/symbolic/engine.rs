//! The instruction interpreter: one `step` consumes a state and yields its
//! successors. Forking is clone-based; the solver carries only universal
//! assertions, so sibling states never interfere.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use z3::ast::{Ast, Bool, BV};
use z3::{Context, Solver};

use crate::config::analyzer::AnalyzerOptions;
use crate::insn::Code;
use crate::symbolic::cont::{Continuation, OrdCont, SavedRegs};
use crate::symbolic::error::{FaultKind, StepError};
use crate::symbolic::memory::Cell;
use crate::symbolic::opcodes;
use crate::symbolic::outcome::{BoundsClass, TerminalKind, VmFailure};
use crate::symbolic::state::VmState;
use crate::symbolic::value::OperandStack;
use crate::symbolic::z3_ext::{
    check_under, configure_solver, int_val, int_zero, u64_from_bv, SatOutcome, INT_BITS,
};

/// Loaded code of one contract: the entry stream plus its method table.
#[derive(Debug, Clone)]
pub struct ContractCode {
    pub entry: Code,
    pub methods: HashMap<i64, Code>,
}

/// Run-wide environment unknowns shared by every contract invocation.
#[derive(Debug, Clone)]
pub struct EnvScalars<'ctx> {
    pub now: BV<'ctx>,
    pub block_lt: BV<'ctx>,
    pub trans_lt: BV<'ctx>,
    pub rand_seed: BV<'ctx>,
}

/// What happened when a state was split on a condition.
#[derive(Debug)]
pub enum BranchPlan<'ctx> {
    /// Only the condition-true side is feasible; `state` now follows it.
    TakeTrue,
    /// Only the condition-false side is feasible; `state` now follows it.
    TakeFalse,
    /// Both sides are feasible; `state` follows true, `other` follows false.
    Both { other: VmState<'ctx> },
    /// The path itself is infeasible.
    Dead,
    /// The solver answered unknown; the state was parked as undecided.
    Undecided,
}

pub struct Interpreter<'ctx> {
    pub ctx: &'ctx Context,
    pub solver: Solver<'ctx>,
    pub options: AnalyzerOptions,
    pub contracts: Vec<ContractCode>,
    /// One network-configuration root per run, shared by every contract's
    /// environment so cross-contract reads agree.
    pub config_root: Arc<Cell<'ctx>>,
    pub env: EnvScalars<'ctx>,
    next_cell_id: u64,
    next_unknown_id: u64,
    next_loop_id: u64,
    backlog: Vec<String>,
}

impl<'ctx> Interpreter<'ctx> {
    pub fn new(ctx: &'ctx Context, options: AnalyzerOptions, contracts: Vec<ContractCode>) -> Self {
        let solver = Solver::new(ctx);
        configure_solver(ctx, &solver, options.solver_timeout_ms);
        let config_root = Arc::new(Cell::fresh_input(ctx, &solver, 0));

        let env = EnvScalars {
            now: BV::new_const(ctx, "env_now", INT_BITS),
            block_lt: BV::new_const(ctx, "env_block_lt", INT_BITS),
            trans_lt: BV::new_const(ctx, "env_trans_lt", INT_BITS),
            rand_seed: BV::new_const(ctx, "env_rand_seed", INT_BITS),
        };
        // Environment scalars are valid on every path: assert their domains
        // into the solver base.
        let zero = int_zero(ctx);
        let max32 = int_val(ctx, u32::MAX as i64);
        solver.assert(&env.now.bvsge(&zero));
        solver.assert(&env.now.bvsle(&max32));
        solver.assert(&env.block_lt.bvsge(&zero));
        solver.assert(&env.trans_lt.bvsge(&zero));
        solver.assert(&env.rand_seed.bvsge(&zero));

        Self {
            ctx,
            solver,
            options,
            contracts,
            config_root,
            env,
            next_cell_id: 1,
            next_unknown_id: 1,
            next_loop_id: 1,
            backlog: Vec::new(),
        }
    }

    /// Explicitly-unimplemented handlers hit along any path so far.
    pub fn backlog(&self) -> &[String] {
        &self.backlog
    }

    pub fn fresh_cell_id(&mut self) -> u64 {
        let id = self.next_cell_id;
        self.next_cell_id += 1;
        id
    }

    /// Loop ids are owned by this interpreter instance, one analysis run.
    pub fn fresh_loop_id(&mut self) -> u64 {
        let id = self.next_loop_id;
        self.next_loop_id += 1;
        id
    }

    pub fn fresh_int(&mut self, prefix: &str) -> BV<'ctx> {
        let id = self.next_unknown_id;
        self.next_unknown_id += 1;
        BV::new_const(self.ctx, format!("{prefix}_{id}"), INT_BITS)
    }

    pub fn fresh_bv(&mut self, prefix: &str, width: u32) -> BV<'ctx> {
        let id = self.next_unknown_id;
        self.next_unknown_id += 1;
        BV::new_const(self.ctx, format!("{prefix}_{id}"), width)
    }

    pub fn fresh_bool(&mut self, prefix: &str) -> Bool<'ctx> {
        let id = self.next_unknown_id;
        self.next_unknown_id += 1;
        Bool::new_const(self.ctx, format!("{prefix}_{id}"))
    }

    pub fn fresh_input_cell(&mut self) -> Arc<Cell<'ctx>> {
        let id = self.fresh_cell_id();
        Arc::new(Cell::fresh_input(self.ctx, &self.solver, id))
    }

    /// Splits `state` on `cond` in place: after the call `state` follows the
    /// feasible true side when there is one. Infeasible sides are pruned by
    /// the solver; unknown parks the state in the undecided bucket.
    pub fn fork_on(&mut self, state: &mut VmState<'ctx>, cond: Bool<'ctx>) -> BranchPlan<'ctx> {
        if let Some(concrete) = cond.simplify().as_bool() {
            return if concrete {
                state.add_constraint(cond);
                BranchPlan::TakeTrue
            } else {
                state.add_constraint(cond.not());
                BranchPlan::TakeFalse
            };
        }

        let mut assumptions = state.path.clone();
        assumptions.push(cond.clone());
        let true_side = check_under(&self.solver, &assumptions);
        *assumptions.last_mut().expect("assumption present") = cond.not();
        let false_side = check_under(&self.solver, &assumptions);

        match (true_side, false_side) {
            (SatOutcome::Unknown, _) | (_, SatOutcome::Unknown) => {
                state.halt(TerminalKind::Undecided {
                    context: "fork condition undecided".into(),
                });
                BranchPlan::Undecided
            }
            (SatOutcome::Sat, SatOutcome::Sat) => {
                let mut other = state.clone();
                other.add_constraint(cond.not());
                state.add_constraint(cond);
                BranchPlan::Both { other }
            }
            (SatOutcome::Sat, SatOutcome::Unsat) => {
                state.add_constraint(cond);
                BranchPlan::TakeTrue
            }
            (SatOutcome::Unsat, SatOutcome::Sat) => {
                state.add_constraint(cond.not());
                BranchPlan::TakeFalse
            }
            (SatOutcome::Unsat, SatOutcome::Unsat) => {
                state.dead = true;
                BranchPlan::Dead
            }
        }
    }

    /// Transfers control to a continuation, in place. Loop continuations may
    /// fork; extra branches land in `out`.
    pub fn jump(
        &mut self,
        state: &mut VmState<'ctx>,
        cont: Arc<Continuation<'ctx>>,
        out: &mut Vec<VmState<'ctx>>,
    ) -> Result<(), StepError> {
        if state.dead || state.is_halted() {
            return Ok(());
        }
        match cont.as_ref() {
            Continuation::Ordinary(ord) => {
                state.regs.apply_saved(&ord.saved);
                if let Some(method_id) = ord.method_exit {
                    state.leave_method(method_id);
                }
                if let Some(captured) = &ord.captured_stack {
                    let mut base = OperandStack::new();
                    base.extend(captured.clone())?;
                    let passed = match ord.take_on_jump {
                        Some(n) => state.stack.take_top(n)?,
                        None => state.stack.take_top(state.stack.depth())?,
                    };
                    base.extend(passed)?;
                    state.stack = base;
                }
                state.code = ord.code.clone();
                state.ip = ord.ip;
                Ok(())
            }
            Continuation::Quit(code) => {
                state.halt(TerminalKind::Success { alt: *code == 1 });
                Ok(())
            }
            Continuation::ExcQuit => {
                // Stack shape on exception entry: [arg, excno].
                let excno = state.stack.pop_int()?;
                let code = u64_from_bv(&excno)
                    .and_then(|v| i32::try_from(v).ok())
                    .unwrap_or(-1);
                state.halt(TerminalKind::failure(failure_from_code(code)));
                Ok(())
            }
            Continuation::MethodDispatch { contract } => {
                let method_bv = state.stack.pop_int()?;
                let method_id = crate::symbolic::z3_ext::bigint_from_bv(&method_bv)
                    .and_then(|v| i64::try_from(v).ok())
                    .ok_or_else(|| StepError::non_concrete("method id"))?;
                let contract_code = self
                    .contracts
                    .get(*contract)
                    .ok_or_else(|| StepError::internal(format!("contract {contract} missing")))?;
                let code = contract_code
                    .methods
                    .get(&method_id)
                    .cloned()
                    .ok_or_else(|| StepError::vm(VmFailure::Custom(11)))?;

                let depth = state.enter_method(method_id);
                if depth > self.options.recursion_limit {
                    tracing::warn!(method_id, depth, "recursion cap exceeded; dropping state");
                    state.dead = true;
                    return Ok(());
                }
                state.code = code;
                state.ip = 0;
                Ok(())
            }
            Continuation::Repeat {
                remaining,
                body,
                after,
                loop_id,
            } => {
                let more = remaining.bvsgt(&int_zero(self.ctx));
                match self.fork_on(state, more) {
                    BranchPlan::TakeTrue => {
                        self.enter_repeat_body(state, remaining, body, after, *loop_id, out)
                    }
                    BranchPlan::TakeFalse => self.jump(state, after.clone(), out),
                    BranchPlan::Both { mut other } => {
                        self.jump(&mut other, after.clone(), out)?;
                        out.push(other);
                        self.enter_repeat_body(state, remaining, body, after, *loop_id, out)
                    }
                    BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                }
            }
            Continuation::Until {
                body,
                after,
                loop_id: _,
            } => {
                // Entered when the body returns; top of stack is the flag.
                let flag = state.stack.pop_int()?;
                let done = flag._eq(&int_zero(self.ctx)).not();
                match self.fork_on(state, done) {
                    BranchPlan::TakeTrue => self.jump(state, after.clone(), out),
                    BranchPlan::TakeFalse => self.rerun_loop_body(state, &cont, body, out),
                    BranchPlan::Both { mut other } => {
                        self.rerun_loop_body(&mut other, &cont, body, out)?;
                        out.push(other);
                        self.jump(state, after.clone(), out)
                    }
                    BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                }
            }
            Continuation::While {
                cond: cond_cont,
                body,
                after,
                checking,
                loop_id,
            } => {
                if *checking {
                    // The condition continuation just returned its flag.
                    let flag = state.stack.pop_int()?;
                    let enter = flag._eq(&int_zero(self.ctx)).not();
                    let run_phase = Arc::new(Continuation::While {
                        cond: cond_cont.clone(),
                        body: body.clone(),
                        after: after.clone(),
                        checking: false,
                        loop_id: *loop_id,
                    });
                    match self.fork_on(state, enter) {
                        BranchPlan::TakeTrue => {
                            self.rerun_loop_body(state, &run_phase, body, out)
                        }
                        BranchPlan::TakeFalse => self.jump(state, after.clone(), out),
                        BranchPlan::Both { mut other } => {
                            self.jump(&mut other, after.clone(), out)?;
                            out.push(other);
                            self.rerun_loop_body(state, &run_phase, body, out)
                        }
                        BranchPlan::Dead | BranchPlan::Undecided => Ok(()),
                    }
                } else {
                    // The body returned; evaluate the condition again.
                    let check_phase = Arc::new(Continuation::While {
                        cond: cond_cont.clone(),
                        body: body.clone(),
                        after: after.clone(),
                        checking: true,
                        loop_id: *loop_id,
                    });
                    self.rerun_loop_body(state, &check_phase, cond_cont, out)
                }
            }
            Continuation::Again { body, loop_id: _ } => {
                state.regs.c0 = cont.clone();
                self.jump(state, body.clone(), out)
            }
        }
    }

    fn enter_repeat_body(
        &mut self,
        state: &mut VmState<'ctx>,
        remaining: &BV<'ctx>,
        body: &Arc<Continuation<'ctx>>,
        after: &Arc<Continuation<'ctx>>,
        loop_id: u64,
        out: &mut Vec<VmState<'ctx>>,
    ) -> Result<(), StepError> {
        state.regs.c0 = Arc::new(Continuation::Repeat {
            remaining: remaining.bvsub(&int_val(self.ctx, 1)),
            body: body.clone(),
            after: after.clone(),
            loop_id,
        });
        self.jump(state, body.clone(), out)
    }

    fn rerun_loop_body(
        &mut self,
        state: &mut VmState<'ctx>,
        loop_cont: &Arc<Continuation<'ctx>>,
        body: &Arc<Continuation<'ctx>>,
        out: &mut Vec<VmState<'ctx>>,
    ) -> Result<(), StepError> {
        state.regs.c0 = loop_cont.clone();
        self.jump(state, body.clone(), out)
    }

    /// Ordinary call discipline: the return continuation restores c0.
    pub fn call(
        &mut self,
        state: &mut VmState<'ctx>,
        target: Arc<Continuation<'ctx>>,
        out: &mut Vec<VmState<'ctx>>,
    ) -> Result<(), StepError> {
        let ret = Arc::new(Continuation::Ordinary(OrdCont {
            code: state.code.clone(),
            ip: state.ip,
            saved: SavedRegs {
                c0: Some(state.regs.c0.clone()),
                ..SavedRegs::default()
            },
            captured_stack: None,
            take_on_jump: None,
            method_exit: None,
        }));
        state.regs.c0 = ret;
        self.jump(state, target, out)
    }

    /// Raises a VM exception: route to c2, or terminate on the default
    /// handler.
    pub fn raise(
        &mut self,
        state: &mut VmState<'ctx>,
        failure: VmFailure,
        class: BoundsClass,
        out: &mut Vec<VmState<'ctx>>,
    ) {
        let handler = state.regs.c2.clone();
        if matches!(handler.as_ref(), Continuation::ExcQuit) {
            state.halt(TerminalKind::Failure { failure, class });
            return;
        }
        state.stack = OperandStack::new();
        let arg_push = state.stack.push_int(int_zero(self.ctx));
        let code_push = state
            .stack
            .push_int(int_val(self.ctx, failure.exit_code() as i64));
        state.regs.c2 = Continuation::exc_quit();
        if arg_push.is_err() || code_push.is_err() {
            state.halt(TerminalKind::Failure { failure, class });
            return;
        }
        if let Err(err) = self.jump(state, handler, out) {
            tracing::warn!(?err, "exception handler jump failed; terminating state");
            state.halt(TerminalKind::Failure { failure, class });
        }
    }

    /// Executes one instruction of `state`, returning every surviving
    /// successor. A fault inside the handler discards only this state.
    pub fn step(&mut self, mut state: VmState<'ctx>) -> Vec<VmState<'ctx>> {
        let mut out = Vec::new();
        if state.is_halted() || state.dead {
            return vec![state];
        }
        state.steps += 1;

        let result = {
            let state_ref = &mut state;
            let out_ref = &mut out;
            catch_unwind(AssertUnwindSafe(|| {
                self.step_inner(state_ref, out_ref)
            }))
        };

        match result {
            Ok(Ok(())) => {
                if !state.dead {
                    out.insert(0, state);
                }
            }
            Ok(Err(err)) => self.absorb_error(state, err, &mut out),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".into());
                tracing::error!(panic = %msg, "interpreter fault; discarding state");
            }
        }

        out.retain(|s| !s.dead);
        out
    }

    fn step_inner(
        &mut self,
        state: &mut VmState<'ctx>,
        out: &mut Vec<VmState<'ctx>>,
    ) -> Result<(), StepError> {
        // Falling off the end of a continuation is an implicit RET.
        if state.ip >= state.code.len() {
            let ret = state.regs.c0.clone();
            return self.jump(state, ret, out);
        }

        let instr = state.code[state.ip].clone();
        state.ip += 1;
        state.gas.charge(instr.gas_cost())?;

        opcodes::dispatch(self, state, &instr, out)
    }

    /// Applies a handler error to a state: VM failures route through the
    /// exception machinery, undecided parks the state, faults discard it.
    /// Also used for forked siblings that fail mid-handler.
    pub(crate) fn absorb_error(
        &mut self,
        mut state: VmState<'ctx>,
        err: StepError,
        out: &mut Vec<VmState<'ctx>>,
    ) {
        match err {
            StepError::Vm { failure, class } => {
                // Gas exhaustion is terminal, never catchable.
                if failure == VmFailure::OutOfGas {
                    state.halt(TerminalKind::Failure { failure, class });
                } else {
                    self.raise(&mut state, failure, class, out);
                }
                if !state.dead {
                    out.push(state);
                }
            }
            StepError::Undecided { context } => {
                state.halt(TerminalKind::Undecided { context });
                out.push(state);
            }
            StepError::Fault(fault) => {
                if fault.kind == FaultKind::Unimplemented {
                    self.backlog.push(fault.message.clone());
                }
                tracing::warn!(
                    kind = ?fault.kind,
                    message = %fault.message,
                    "instruction fault; discarding state"
                );
            }
        }
    }
}

/// Maps a thrown exception number back to the VM failure taxonomy.
pub fn failure_from_code(code: i32) -> VmFailure {
    match code {
        2 => VmFailure::StackUnderflow,
        3 => VmFailure::StackOverflow,
        4 => VmFailure::IntegerOverflow,
        5 => VmFailure::RangeCheck,
        6 => VmFailure::InvalidOpcode,
        7 => VmFailure::TypeCheck,
        8 => VmFailure::CellOverflow,
        9 => VmFailure::CellUnderflow,
        10 => VmFailure::DictError,
        13 => VmFailure::OutOfGas,
        37 => VmFailure::InsufficientFunds,
        other => VmFailure::Custom(other),
    }
}
