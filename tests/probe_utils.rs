//! Shared helpers for integration tests: build a one-method contract, run
//! the analyzer over it, and inspect the terminal executions.
#![allow(dead_code)]

use std::collections::HashMap;

use tonprobe::config::analyzer::AnalyzerOptions;
use tonprobe::insn::{code_of, Instr};
use tonprobe::machine::{AnalysisReport, Analyzer, ContractSetup};
use tonprobe::symbolic::engine::ContractCode;
use tonprobe::symbolic::outcome::{BoundsClass, TerminalKind, VmFailure};
use tonprobe::transaction::routing::RoutingScheme;
use z3::{Config, Context};

pub fn contract(instrs: Vec<Instr>) -> ContractSetup {
    let code = code_of(instrs);
    ContractSetup {
        code: ContractCode {
            entry: code.clone(),
            methods: HashMap::from([(0i64, code)]),
        },
        storage: None,
    }
}

/// Runs one contract's method 0 and hands the report to the check closure.
pub fn analyze(instrs: Vec<Instr>, check: impl FnOnce(&AnalysisReport<'_>)) {
    analyze_contracts(vec![contract(instrs)], None, AnalyzerOptions::default(), check);
}

pub fn analyze_contracts(
    contracts: Vec<ContractSetup>,
    routing: Option<RoutingScheme>,
    mut options: AnalyzerOptions,
    check: impl FnOnce(&AnalysisReport<'_>),
) {
    // Tests favour determinism over exploration depth.
    options.step_budget = options.step_budget.min(50_000);
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut analyzer = Analyzer::new(&ctx, options, contracts, routing);
    let report = analyzer.run(0, 0).expect("analysis runs");
    check(&report);
}

pub fn successes(report: &AnalysisReport<'_>) -> usize {
    report
        .executions
        .iter()
        .filter(|e| e.terminal.is_success())
        .count()
}

pub fn failures_with(report: &AnalysisReport<'_>, failure: VmFailure) -> usize {
    report
        .executions
        .iter()
        .filter(|e| matches!(&e.terminal, TerminalKind::Failure { failure: f, .. } if *f == failure))
        .count()
}

pub fn structural_failures(report: &AnalysisReport<'_>) -> usize {
    report
        .executions
        .iter()
        .filter(|e| {
            matches!(
                &e.terminal,
                TerminalKind::Failure {
                    class: BoundsClass::Structural,
                    ..
                }
            )
        })
        .count()
}
