//! Gas accounting: exhaustion is a terminal failure, never an exception a
//! contract can catch.

mod probe_utils;

use probe_utils::{analyze_contracts, contract, failures_with, successes};
use tonprobe::config::analyzer::AnalyzerOptions;
use tonprobe::insn::{code_of, ArithInstr, ContInstr, Instr, StackInstr};
use tonprobe::symbolic::outcome::VmFailure;

#[test]
fn test_infinite_loop_runs_out_of_gas() {
    let body = code_of(vec![Instr::Stack(StackInstr::Nop)]);
    let program = vec![
        Instr::Cont(ContInstr::PushCont(body)),
        Instr::Cont(ContInstr::Again),
    ];
    let mut options = AnalyzerOptions::default();
    options.gas_limit = 2_000;

    analyze_contracts(vec![contract(program)], None, options, |report| {
        assert_eq!(failures_with(report, VmFailure::OutOfGas), 1);
        assert_eq!(successes(report), 0);
    });
}

#[test]
fn test_out_of_gas_is_not_catchable() {
    // TRY around the burner: the handler must never run.
    let burner = code_of(vec![
        Instr::Cont(ContInstr::PushCont(code_of(vec![Instr::Stack(
            StackInstr::Nop,
        )]))),
        Instr::Cont(ContInstr::Again),
    ]);
    let handler = code_of(vec![
        Instr::Stack(StackInstr::Drop2),
        Instr::Arith(ArithInstr::PushInt(1)),
    ]);
    let program = vec![
        Instr::Cont(ContInstr::PushCont(burner)),
        Instr::Cont(ContInstr::PushCont(handler)),
        Instr::Cont(ContInstr::Try),
    ];
    let mut options = AnalyzerOptions::default();
    options.gas_limit = 2_000;

    analyze_contracts(vec![contract(program)], None, options, |report| {
        assert_eq!(failures_with(report, VmFailure::OutOfGas), 1);
        assert_eq!(successes(report), 0);
    });
}

#[test]
fn test_gas_is_reported_per_execution() {
    let program = vec![
        Instr::Arith(ArithInstr::PushInt(1)),
        Instr::Arith(ArithInstr::PushInt(2)),
        Instr::Arith(ArithInstr::Add),
    ];

    analyze_contracts(
        vec![contract(program)],
        None,
        AnalyzerOptions::default(),
        |report| {
            assert_eq!(successes(report), 1);
            let exec = &report.executions[0];
            assert!(exec.gas_used > 0);
            assert!(exec.gas_used < 1_000);
        },
    );
}
