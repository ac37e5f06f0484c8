//! Slice cursor discipline: preload does not advance, loads advance by
//! exactly the read width, and reading past the end raises cell underflow
//! instead of a negative remainder.

mod probe_utils;

use probe_utils::{analyze, failures_with, successes};
use tonprobe::insn::{
    CellParseInstr, CmpInstr, ContInstr, Instr, StackInstr,
};
use tonprobe::symbolic::outcome::{BoundsClass, TerminalKind, VmFailure};

fn byte_bits(byte: u8) -> Vec<bool> {
    (0..8).rev().map(|i| byte & (1 << i) != 0).collect()
}

#[test]
fn test_preload_then_load_reduces_remaining_by_width() {
    let program = vec![
        Instr::CellParse(CellParseInstr::PushSlice(byte_bits(0xC3))),
        // preload leaves the cursor alone.
        Instr::Stack(StackInstr::Push(0)),
        Instr::CellParse(CellParseInstr::PldUint(4)),
        Instr::Cmp(CmpInstr::EqInt(0xC)),
        Instr::Cont(ContInstr::ThrowIfNot(50)),
        // remaining is still 8.
        Instr::Stack(StackInstr::Push(0)),
        Instr::CellParse(CellParseInstr::SliceBits),
        Instr::Cmp(CmpInstr::EqInt(8)),
        Instr::Cont(ContInstr::ThrowIfNot(51)),
        // the load advances by exactly 4.
        Instr::CellParse(CellParseInstr::LdUint(4)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Stack(StackInstr::Pop(0)),
        Instr::CellParse(CellParseInstr::SliceBits),
        Instr::Cmp(CmpInstr::EqInt(4)),
        Instr::Cont(ContInstr::ThrowIfNot(52)),
    ];

    analyze(program, |report| {
        for code in [50, 51, 52] {
            assert_eq!(failures_with(report, VmFailure::Custom(code)), 0);
        }
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_overread_raises_real_cell_underflow() {
    let program = vec![
        Instr::CellParse(CellParseInstr::PushSlice(byte_bits(0xFF))),
        Instr::CellParse(CellParseInstr::LdUint(16)),
    ];

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::CellUnderflow), 1);
        assert_eq!(successes(report), 0);
        for exec in &report.executions {
            if let TerminalKind::Failure { class, .. } = &exec.terminal {
                // A concrete 8-bit slice read 16 bits: a definite error.
                assert_eq!(*class, BoundsClass::Real);
            }
        }
    });
}

#[test]
fn test_skip_then_endparse_detects_leftovers() {
    let program = vec![
        Instr::CellParse(CellParseInstr::PushSlice(byte_bits(0x00))),
        Instr::CellParse(CellParseInstr::SkipBits(4)),
        // 4 bits remain: ENDS must raise.
        Instr::CellParse(CellParseInstr::EndParse),
    ];

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::CellUnderflow), 1);
        assert_eq!(successes(report), 0);
    });
}
