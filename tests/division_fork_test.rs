//! A division with a symbolic divisor must split into exactly the
//! divide-by-zero failure and the succeeding quotient path.

mod probe_utils;

use probe_utils::{analyze, failures_with, structural_failures, successes};
use tonprobe::insn::{ArithInstr, CellParseInstr, CmpInstr, ContInstr, Instr, StackInstr};
use tonprobe::symbolic::outcome::VmFailure;

/// PUSHINT 5; PUSHINT x (x read from unknown storage); DIV.
fn div_program() -> Vec<Instr> {
    vec![
        // x: a symbolic 32-bit integer parsed from the storage cell.
        Instr::Cont(ContInstr::PushCtr(4)),
        Instr::CellParse(CellParseInstr::CellToSlice),
        Instr::CellParse(CellParseInstr::LdInt(32)),
        Instr::Stack(StackInstr::Pop(0)),
        // 5 / x.
        Instr::Arith(ArithInstr::PushInt(5)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::Div),
    ]
}

#[test]
fn test_symbolic_divisor_forks_zero_and_nonzero() {
    analyze(div_program(), |report| {
        assert_eq!(
            failures_with(report, VmFailure::IntegerOverflow),
            1,
            "exactly one divide-by-zero branch"
        );
        assert_eq!(successes(report), 1, "exactly one succeeding branch");
    });
}

#[test]
fn test_short_storage_cell_is_structural_not_real() {
    // The 32-bit read from an unknown-length storage cell can also fail
    // structurally; that branch must be classified structural, never real.
    analyze(div_program(), |report| {
        assert!(structural_failures(report) >= 1);
        for exec in &report.executions {
            if let tonprobe::symbolic::outcome::TerminalKind::Failure { failure, class } =
                &exec.terminal
            {
                if *failure == VmFailure::CellUnderflow {
                    assert_eq!(
                        *class,
                        tonprobe::symbolic::outcome::BoundsClass::Structural,
                        "underflow on unknown input must be structural"
                    );
                }
            }
        }
    });
}

#[test]
fn test_quotient_sign_is_checked_on_the_path() {
    // 5 / x with x != 0: additionally assert the quotient is correctly
    // signed by trapping a violation in-program: q > 5 is impossible for
    // positive x, and |q| <= 5 always holds for floor division by nonzero.
    let mut program = div_program();
    // |q| <= 5 i.e. -5 <= q <= 5: check q <= 5 here.
    program.extend([
        Instr::Stack(StackInstr::Push(0)),
        Instr::Cmp(CmpInstr::GtInt(5)),
        Instr::Cont(ContInstr::ThrowIf(61)),
        Instr::Stack(StackInstr::Push(0)),
        Instr::Cmp(CmpInstr::LessInt(-6)),
        Instr::Cont(ContInstr::ThrowIf(62)),
    ]);
    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(61)), 0);
        assert_eq!(failures_with(report, VmFailure::Custom(62)), 0);
        assert_eq!(successes(report), 1);
    });
}
