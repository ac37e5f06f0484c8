//! Synchronous checker calls: a designated contract calls into another
//! loaded contract and observes its exit code, independent of the message
//! queue.

mod probe_utils;

use probe_utils::{analyze_contracts, contract, failures_with, successes};
use tonprobe::config::analyzer::AnalyzerOptions;
use tonprobe::insn::{ArithInstr, CmpInstr, ContInstr, DebugInstr, Instr};
use tonprobe::symbolic::outcome::VmFailure;

#[test]
fn test_checker_observes_success_exit_code() {
    let checker = contract(vec![
        Instr::Arith(ArithInstr::PushInt(1)), // target contract
        Instr::Arith(ArithInstr::PushInt(0)), // method id
        Instr::Debug(DebugInstr::CheckerCall),
        Instr::Cmp(CmpInstr::EqInt(0)),
        Instr::Cont(ContInstr::ThrowIfNot(70)),
    ]);
    let target = contract(vec![Instr::Arith(ArithInstr::PushInt(9))]);

    analyze_contracts(
        vec![checker, target],
        None,
        AnalyzerOptions::default(),
        |report| {
            assert_eq!(failures_with(report, VmFailure::Custom(70)), 0);
            assert_eq!(successes(report), 1);
        },
    );
}

#[test]
fn test_checker_observes_callee_failure_code() {
    let checker = contract(vec![
        Instr::Arith(ArithInstr::PushInt(1)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Debug(DebugInstr::CheckerCall),
        // The callee threw 55; the checker sees it and asserts on it.
        Instr::Cmp(CmpInstr::EqInt(55)),
        Instr::Cont(ContInstr::ThrowIfNot(71)),
    ]);
    let target = contract(vec![Instr::Cont(ContInstr::Throw(55))]);

    analyze_contracts(
        vec![checker, target],
        None,
        AnalyzerOptions::default(),
        |report| {
            assert_eq!(failures_with(report, VmFailure::Custom(71)), 0);
            assert_eq!(successes(report), 1);
        },
    );
}

#[test]
fn test_checker_can_chain_calls_across_contracts() {
    let checker = contract(vec![
        Instr::Arith(ArithInstr::PushInt(1)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Debug(DebugInstr::CheckerCall),
        Instr::Arith(ArithInstr::PushInt(2)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Debug(DebugInstr::CheckerCall),
        // Both callees succeeded.
        Instr::Arith(ArithInstr::Add),
        Instr::Cmp(CmpInstr::EqInt(0)),
        Instr::Cont(ContInstr::ThrowIfNot(72)),
    ]);
    let one = contract(vec![Instr::Arith(ArithInstr::PushInt(1))]);
    let two = contract(vec![Instr::Arith(ArithInstr::PushInt(2))]);

    analyze_contracts(
        vec![checker, one, two],
        None,
        AnalyzerOptions::default(),
        |report| {
            assert_eq!(failures_with(report, VmFailure::Custom(72)), 0);
            assert_eq!(successes(report), 1);
        },
    );
}
