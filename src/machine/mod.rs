//! Multi-contract execution state machine.
//!
//! Drives each symbolic state through COMPUTE → ACTION → EXIT and either
//! delivers a queued message to another contract (multi-contract mode) or
//! terminates. A second, queue-independent mechanism lets a checker
//! contract synchronously call into any loaded contract through explicit
//! caller frames.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Context as AnyhowContext;
use z3::Model;

use crate::config::analyzer::{AnalyzerOptions, ExternalAddressPolicy};
use crate::error::SetupError;
use crate::insn::CodeCell;
use crate::symbolic::cont::{Continuation, ControlRegs};
use crate::symbolic::dict::DictRegistry;
use crate::symbolic::engine::{ContractCode, Interpreter};
use crate::symbolic::error::StepError;
use crate::symbolic::memory::{Cell, CellSlice};
use crate::symbolic::outcome::{SoftFailure, TerminalKind, VmFailure};
use crate::symbolic::state::{GasMeter, Phase, VmState};
use crate::symbolic::value::{OperandStack, StackValue};
use crate::symbolic::z3_ext::{int_val, int_zero};
use crate::transaction::actions::{parse_action_list, parse_outbound_message, ParsedAction};
use crate::transaction::message::{Delivery, QueuedMessage};
use crate::transaction::routing::{contract_account_id, resolve_destination, RoutingScheme};

/// One loaded contract: decoded code plus its initial persistent storage
/// (concrete, or absent = unknown input).
#[derive(Debug, Clone)]
pub struct ContractSetup {
    pub code: ContractCode,
    pub storage: Option<CodeCell>,
}

/// One terminal execution of the analysis.
pub struct Execution<'ctx> {
    pub terminal: TerminalKind,
    pub gas_used: u64,
    pub steps: usize,
    pub deliveries: Vec<Delivery>,
    pub emitted: Vec<crate::transaction::message::OutboundMessage<'ctx>>,
    pub unprocessed: Vec<crate::transaction::message::OutboundMessage<'ctx>>,
    /// Assignment for every reachable unknown; absent for states parked in
    /// the undecided bucket.
    pub model: Option<Model<'ctx>>,
}

#[derive(Default)]
pub struct AnalysisReport<'ctx> {
    pub executions: Vec<Execution<'ctx>>,
    /// States whose mocked values could not be reconciled with any model.
    pub dropped_inconsistent: usize,
}

pub struct Analyzer<'ctx> {
    pub interp: Interpreter<'ctx>,
    pub routing: Option<RoutingScheme>,
    storage_inits: Vec<Option<CodeCell>>,
}

impl<'ctx> Analyzer<'ctx> {
    pub fn new(
        ctx: &'ctx z3::Context,
        options: AnalyzerOptions,
        contracts: Vec<ContractSetup>,
        routing: Option<RoutingScheme>,
    ) -> Self {
        let mut codes = Vec::with_capacity(contracts.len());
        let mut storage_inits = Vec::with_capacity(contracts.len());
        for setup in contracts {
            codes.push(setup.code);
            storage_inits.push(setup.storage);
        }
        Self {
            interp: Interpreter::new(ctx, options, codes),
            routing,
            storage_inits,
        }
    }

    /// Explores every reachable terminal state of `method_id` on the entry
    /// contract.
    pub fn run(&mut self, entry_contract: usize, method_id: i64) -> anyhow::Result<AnalysisReport<'ctx>> {
        let initial = self
            .build_initial_state(entry_contract, method_id)
            .context("building the initial machine state")?;

        let mut report = AnalysisReport::default();
        let mut worklist: Vec<VmState<'ctx>> = vec![initial];
        let mut budget = self.interp.options.step_budget;

        while let Some(state) = worklist.pop() {
            if state.dead {
                continue;
            }
            if budget == 0 {
                tracing::warn!("step budget exhausted; remaining states dropped");
                break;
            }
            budget -= 1;

            if state.is_halted() {
                self.on_halted(state, &mut worklist, &mut report);
                continue;
            }

            let successors = self.interp.step(state);
            worklist.extend(successors);
        }

        Ok(report)
    }

    fn build_initial_state(
        &mut self,
        entry_contract: usize,
        method_id: i64,
    ) -> Result<VmState<'ctx>, SetupError> {
        let ctx = self.interp.ctx;
        let contract = self
            .interp
            .contracts
            .get(entry_contract)
            .ok_or(SetupError::UnknownContract(entry_contract))?
            .clone();
        let code = contract
            .methods
            .get(&method_id)
            .cloned()
            .ok_or(SetupError::UnknownMethod {
                contract: entry_contract,
                method_id,
            })?;

        // Per-contract committed storage: concrete when provided, unknown
        // input otherwise.
        let mut storages = Vec::with_capacity(self.storage_inits.len());
        let inits = self.storage_inits.clone();
        for init in &inits {
            let cell = match init {
                Some(code_cell) => build_concrete_cell(&mut self.interp, code_cell),
                None => self.interp.fresh_input_cell(),
            };
            storages.push(cell);
        }

        let balance = self.interp.fresh_int("balance");

        let mut state = VmState {
            stack: OperandStack::new(),
            regs: placeholder_regs(ctx),
            code,
            ip: 0,
            path: vec![
                balance.bvsge(&int_zero(ctx)),
            ],
            gas: GasMeter::new(self.interp.options.gas_limit),
            call_depths: HashMap::new(),
            dicts: DictRegistry::new(),
            input_children: HashMap::new(),
            mocks: Vec::new(),
            phase: Phase::Compute,
            terminal: None,
            dead: false,
            active_contract: entry_contract,
            storages,
            balance,
            committed: None,
            sent_remaining_value: false,
            queue: VecDeque::new(),
            deliveries: Vec::new(),
            emitted: Vec::new(),
            unprocessed: Vec::new(),
            checker_frames: Vec::new(),
            route_cursor: 0,
            gas_prior: 0,
            steps: 0,
        };
        init_contract_regs(&mut self.interp, &mut state, entry_contract);
        state.enter_method(method_id);
        Ok(state)
    }

    /// Phase progression for a state the compute loop has halted.
    fn on_halted(
        &mut self,
        mut state: VmState<'ctx>,
        worklist: &mut Vec<VmState<'ctx>>,
        report: &mut AnalysisReport<'ctx>,
    ) {
        let terminal = state.terminal.clone().expect("halted state has a kind");

        // A suspended checker caller resumes with the callee's exit code,
        // regardless of how the callee ended.
        if !state.checker_frames.is_empty() {
            let frame = state.checker_frames.pop().expect("frame present");
            let exit = terminal.exit_code();
            state.terminal = None;
            state.active_contract = frame.contract;
            state.code = frame.code;
            state.ip = frame.ip;
            state.stack = frame.stack;
            state.regs = frame.regs;
            if state
                .stack
                .push_int(int_val(self.interp.ctx, exit as i64))
                .is_ok()
            {
                worklist.push(state);
            }
            return;
        }

        match (&state.phase, &terminal) {
            (Phase::Compute, TerminalKind::Success { .. }) => {
                // Action-phase failures must terminalize, never re-enter
                // contract code through a leftover exception handler.
                state.regs.c2 = Continuation::exc_quit();
                let mut forks = Vec::new();
                match self.run_action_phase(&mut state, &mut forks) {
                    Ok(()) => {
                        state.phase = Phase::Exit;
                        worklist.push(state);
                    }
                    Err(err) => {
                        self.interp.absorb_error(state, err, &mut forks);
                    }
                }
                // Structural-failure siblings from message parsing are
                // terminal action-phase states.
                for mut fork in forks {
                    if !fork.dead {
                        if fork.phase == Phase::Compute && fork.terminal.is_some() {
                            fork.phase = Phase::Exit;
                        }
                        worklist.push(fork);
                    }
                }
            }
            (Phase::Exit, TerminalKind::Success { .. })
                if self.interp.options.multi_contract && !state.queue.is_empty() =>
            {
                match self.deliver_next(&mut state) {
                    Ok(()) => worklist.push(state),
                    Err(err) => {
                        let mut sink = Vec::new();
                        self.interp.absorb_error(state, err, &mut sink);
                        worklist.extend(sink);
                    }
                }
            }
            _ => self.finalize(state, report),
        }
    }

    /// ACTION: interpret the pending-action list into routed, queued
    /// messages and unprocessed leftovers.
    fn run_action_phase(
        &mut self,
        state: &mut VmState<'ctx>,
        out: &mut Vec<VmState<'ctx>>,
    ) -> Result<(), StepError> {
        let ctx = self.interp.ctx;
        let actions_root = state.regs.c5.clone();
        let actions = parse_action_list(&actions_root, self.interp.options.max_actions)?;

        // Commit the successful compute phase's storage.
        let active = state.active_contract;
        state.storages[active] = state.regs.c4.clone();
        state.sent_remaining_value = false;

        for action in actions {
            match action {
                ParsedAction::Reserve { amount, .. } => {
                    let enough = state.balance.bvsge(&amount);
                    crate::symbolic::opcodes::require_or_raise(
                        &mut self.interp,
                        state,
                        enough,
                        VmFailure::InsufficientFunds,
                        out,
                    )?;
                }
                ParsedAction::SetCode { .. } => {
                    // Recorded for completeness; code swaps take effect
                    // outside the analyzed transaction.
                }
                ParsedAction::SendMsg { mode, msg } => {
                    match parse_outbound_message(&mut self.interp, state, &msg, &mode, out) {
                        Ok(outbound) => {
                            // Forward fee is a mock here; fixation pins it to
                            // the real formula over the resolved cells.
                            let fee = self.interp.fresh_int("fwd_fee");
                            state.add_constraint(fee.bvsge(&int_zero(self.interp.ctx)));
                            state.mocks.push(crate::symbolic::state::MockRecord::FwdFee {
                                msg: msg.clone(),
                                mock: fee.clone(),
                            });

                            let spend = outbound.value.bvadd(&fee);
                            let enough = state.balance.bvsge(&spend);
                            crate::symbolic::opcodes::require_or_raise(
                                &mut self.interp,
                                state,
                                enough,
                                VmFailure::InsufficientFunds,
                                out,
                            )?;
                            state.balance = state.balance.bvsub(&spend);

                            let dest = resolve_destination(
                                &outbound,
                                self.interp.contracts.len(),
                                self.routing.as_ref(),
                                &mut state.route_cursor,
                            );
                            match dest {
                                Some(dest_contract) => {
                                    state.emitted.push(outbound.clone());
                                    state.queue.push_back(QueuedMessage {
                                        dest_contract,
                                        message: outbound,
                                    });
                                }
                                None => {
                                    if self.interp.options.external_addresses
                                        == ExternalAddressPolicy::Strict
                                    {
                                        state.halt(TerminalKind::Soft(
                                            SoftFailure::DeprecatedAddressEncoding,
                                        ));
                                        return Ok(());
                                    }
                                    state.unprocessed.push(outbound)
                                }
                            }
                        }
                        Err(StepError::Fault(fault)) => {
                            tracing::debug!(
                                reason = %fault.message,
                                "message kept unprocessed"
                            );
                            if self.interp.options.external_addresses
                                == ExternalAddressPolicy::Strict
                            {
                                state.halt(TerminalKind::Soft(
                                    SoftFailure::DeprecatedAddressEncoding,
                                ));
                                return Ok(());
                            }
                            let whole = CellSlice::new(ctx, msg.clone());
                            state.unprocessed.push(
                                crate::transaction::message::OutboundMessage {
                                    value: int_zero(ctx),
                                    cell: msg.clone(),
                                    body: whole.clone(),
                                    dest: whole,
                                    mode,
                                },
                            );
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }
        Ok(())
    }

    /// EXIT → COMPUTE of the destination contract.
    fn deliver_next(&mut self, state: &mut VmState<'ctx>) -> Result<(), StepError> {
        let queued = state
            .queue
            .pop_front()
            .ok_or_else(|| StepError::internal("deliver_next on empty queue"))?;
        let dest = queued.dest_contract;

        state.deliveries.push(Delivery {
            from: state.active_contract,
            to: dest,
        });
        state.active_contract = dest;
        state.gas_prior += state.gas.used;
        state.gas = GasMeter::new(self.interp.options.gas_limit);
        state.terminal = None;
        state.phase = Phase::Compute;
        state.call_depths.clear();

        init_contract_regs(&mut self.interp, state, dest);

        // Internal-receive convention: balance, message value, full message
        // cell, body slice.
        state.balance = state.balance.bvadd(&queued.message.value);
        state.stack = OperandStack::new();
        state.stack.push_int(state.balance.clone())?;
        state.stack.push_int(queued.message.value.clone())?;
        state
            .stack
            .push(StackValue::Cell(queued.message.cell.clone()))?;
        state
            .stack
            .push(StackValue::Slice(queued.message.body.clone()))?;

        let contract = &self.interp.contracts[dest];
        state.code = contract
            .methods
            .get(&0)
            .cloned()
            .unwrap_or_else(|| contract.entry.clone());
        state.ip = 0;
        Ok(())
    }

    /// Post-processing: reconcile mocks with a model, then publish or drop.
    fn finalize(&mut self, state: VmState<'ctx>, report: &mut AnalysisReport<'ctx>) {
        let terminal = state.terminal.clone().expect("finalized state has a kind");
        if matches!(terminal, TerminalKind::Undecided { .. }) {
            report.executions.push(Execution {
                terminal,
                gas_used: state.gas_total(),
                steps: state.steps,
                deliveries: state.deliveries.clone(),
                emitted: state.emitted.clone(),
                unprocessed: state.unprocessed.clone(),
                model: None,
            });
            return;
        }

        match crate::fixation::fixate(&self.interp, &state) {
            crate::fixation::FixationResult::Consistent(model) => {
                report.executions.push(Execution {
                    terminal,
                    gas_used: state.gas_total(),
                    steps: state.steps,
                    deliveries: state.deliveries.clone(),
                    emitted: state.emitted.clone(),
                    unprocessed: state.unprocessed.clone(),
                    model: Some(model),
                });
            }
            crate::fixation::FixationResult::Inconsistent => {
                report.dropped_inconsistent += 1;
            }
            crate::fixation::FixationResult::Undecided => {
                report.executions.push(Execution {
                    terminal: TerminalKind::Undecided {
                        context: "fixation check".into(),
                    },
                    gas_used: state.gas_total(),
                    steps: state.steps,
                    deliveries: state.deliveries.clone(),
                    emitted: state.emitted.clone(),
                    unprocessed: state.unprocessed.clone(),
                    model: None,
                });
            }
        }
    }
}

/// Registers for entering a contract: quit/exception defaults, the method
/// dispatcher, committed storage, an empty action list and a fresh
/// environment tuple.
pub fn init_contract_regs<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    contract: usize,
) {
    let ctx = interp.ctx;
    let storage = state
        .storages
        .get(contract)
        .cloned()
        .unwrap_or_else(|| interp.fresh_input_cell());
    let actions_id = interp.fresh_cell_id();
    let actions = Arc::new(Cell::empty(ctx, actions_id));
    let env = build_env(interp, state, contract);

    state.regs = ControlRegs {
        c0: Continuation::quit0(),
        c1: Continuation::quit1(),
        c2: Continuation::exc_quit(),
        c3: Arc::new(Continuation::MethodDispatch { contract }),
        c4: storage,
        c5: actions,
        c7: Arc::new(vec![StackValue::Tuple(env)]),
    };
}

/// The environment tuple at c7[0]: magic, counters, time scalars, balance,
/// own address and the configuration root.
fn build_env<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &VmState<'ctx>,
    contract: usize,
) -> Arc<Vec<StackValue<'ctx>>> {
    let ctx = interp.ctx;
    let myaddr = contract_address_slice(interp, contract);
    let balance_pair = vec![
        StackValue::Int(state.balance.clone()),
        StackValue::Null,
    ];
    Arc::new(vec![
        StackValue::Int(int_val(ctx, 0x076e_f1ea)),
        StackValue::Int(int_zero(ctx)),
        StackValue::Int(int_zero(ctx)),
        StackValue::Int(interp.env.now.clone()),
        StackValue::Int(interp.env.block_lt.clone()),
        StackValue::Int(interp.env.trans_lt.clone()),
        StackValue::Int(interp.env.rand_seed.clone()),
        StackValue::Tuple(Arc::new(balance_pair)),
        StackValue::Slice(myaddr),
        StackValue::Cell(interp.config_root.clone()),
    ])
}

/// addr_std slice for a loaded contract: workchain 0, account id index+1.
pub fn contract_address_slice<'ctx>(
    interp: &mut Interpreter<'ctx>,
    contract: usize,
) -> CellSlice<'ctx> {
    let ctx = interp.ctx;
    let mut bits = Vec::with_capacity(267);
    bits.extend_from_slice(&[true, false]); // addr_std$10
    bits.push(false); // no anycast
    bits.extend(std::iter::repeat(false).take(8)); // workchain 0
    let account = contract_account_id(contract);
    for i in (0..256).rev() {
        bits.push(if i < 64 { (account >> i) & 1 == 1 } else { false });
    }
    let id = interp.fresh_cell_id();
    let cell = Arc::new(Cell::from_bits(ctx, id, &bits, Vec::new()));
    CellSlice::new(ctx, cell)
}

fn placeholder_regs<'ctx>(ctx: &'ctx z3::Context) -> ControlRegs<'ctx> {
    ControlRegs {
        c0: Continuation::quit0(),
        c1: Continuation::quit1(),
        c2: Continuation::exc_quit(),
        c3: Arc::new(Continuation::MethodDispatch { contract: 0 }),
        c4: Arc::new(Cell::empty(ctx, u64::MAX)),
        c5: Arc::new(Cell::empty(ctx, u64::MAX - 1)),
        c7: Arc::new(Vec::new()),
    }
}

/// Builds a concrete cell tree from its decoded description.
pub fn build_concrete_cell<'ctx>(
    interp: &mut Interpreter<'ctx>,
    code_cell: &CodeCell,
) -> Arc<Cell<'ctx>> {
    let children = code_cell
        .children
        .iter()
        .map(|child| build_concrete_cell(interp, child))
        .collect();
    let id = interp.fresh_cell_id();
    Arc::new(Cell::from_bits(interp.ctx, id, &code_cell.bits, children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::u64_from_bv;

    #[test]
    fn test_contract_address_roundtrip() {
        let cfg = z3::Config::new();
        let ctx = z3::Context::new(&cfg);
        let mut interp = Interpreter::new(&ctx, AnalyzerOptions::default(), Vec::new());

        let slice = contract_address_slice(&mut interp, 2);
        // Tag bits 10, then zeros, then account id 3 in the low bits.
        assert_eq!(u64_from_bv(&slice.preload_uint(2)), Some(0b10));
        let mut tail = slice.clone();
        tail.advance_bits(&crate::symbolic::z3_ext::len_val(&ctx, 11));
        let account = crate::symbolic::z3_ext::biguint_from_bv(&tail.preload_uint(256)).unwrap();
        assert_eq!(u64::try_from(account).unwrap(), 3);
    }
}
