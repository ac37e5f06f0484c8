//! Builder round trips: store → seal → reopen reproduces bits and refs,
//! for concrete and symbolic payloads alike.

mod probe_utils;

use probe_utils::{analyze, failures_with, successes};
use tonprobe::insn::{
    ArithInstr, CellBuildInstr, CellParseInstr, CmpInstr, ContInstr, Instr, StackInstr,
};
use tonprobe::symbolic::outcome::VmFailure;

#[test]
fn test_concrete_store_reopen_reads_back() {
    let program = vec![
        Instr::Arith(ArithInstr::PushInt(0xA5)),
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        Instr::CellBuild(CellBuildInstr::StUint(8)),
        Instr::CellBuild(CellBuildInstr::EndCell),
        Instr::CellParse(CellParseInstr::CellToSlice),
        Instr::CellParse(CellParseInstr::LdUint(8)),
        // The slice must now be fully consumed.
        Instr::CellParse(CellParseInstr::EndParse),
        Instr::Cmp(CmpInstr::EqInt(0xA5)),
        Instr::Cont(ContInstr::ThrowIfNot(90)),
    ];

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(90)), 0);
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_symbolic_payload_roundtrip_is_exact() {
    // x is an unknown 16-bit value from storage; the round trip must be an
    // identity on every instantiation, so the mismatch throw is infeasible.
    let program = vec![
        Instr::Cont(ContInstr::PushCtr(4)),
        Instr::CellParse(CellParseInstr::CellToSlice),
        Instr::CellParse(CellParseInstr::LdUint(16)),
        Instr::Stack(StackInstr::Pop(0)),
        // stack: x
        Instr::Stack(StackInstr::Push(0)),
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        Instr::CellBuild(CellBuildInstr::StUint(16)),
        Instr::CellBuild(CellBuildInstr::EndCell),
        Instr::CellParse(CellParseInstr::CellToSlice),
        Instr::CellParse(CellParseInstr::LdUint(16)),
        Instr::Stack(StackInstr::Pop(0)),
        // stack: x x'
        Instr::Cmp(CmpInstr::Equal),
        Instr::Cont(ContInstr::ThrowIfNot(91)),
    ];

    analyze(program, |report| {
        assert_eq!(
            failures_with(report, VmFailure::Custom(91)),
            0,
            "round trip must reproduce symbolic bits exactly"
        );
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_ref_roundtrip_preserves_child() {
    let program = vec![
        // child := cell with one 0xFF byte.
        Instr::Arith(ArithInstr::PushInt(0xFF)),
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        Instr::CellBuild(CellBuildInstr::StUint(8)),
        Instr::CellBuild(CellBuildInstr::EndCell),
        // parent := cell referencing child.
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        Instr::CellBuild(CellBuildInstr::StRef),
        Instr::CellBuild(CellBuildInstr::EndCell),
        // reopen, fetch the child back, read its payload.
        Instr::CellParse(CellParseInstr::CellToSlice),
        Instr::CellParse(CellParseInstr::LdRef),
        Instr::Stack(StackInstr::Pop(0)),
        Instr::CellParse(CellParseInstr::CellToSlice),
        Instr::CellParse(CellParseInstr::LdUint(8)),
        Instr::CellParse(CellParseInstr::EndParse),
        Instr::Cmp(CmpInstr::EqInt(0xFF)),
        Instr::Cont(ContInstr::ThrowIfNot(92)),
    ];

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(92)), 0);
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_builder_overflow_is_a_real_error() {
    // 1023-bit capacity: five 256-bit stores must overflow deterministically.
    let mut program = vec![
        Instr::CellBuild(CellBuildInstr::NewBuilder),
    ];
    for _ in 0..5 {
        program.extend([
            Instr::Arith(ArithInstr::PushInt(1)),
            Instr::Stack(StackInstr::Xchg0(1)),
            Instr::CellBuild(CellBuildInstr::StUint(256)),
        ]);
    }

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::CellOverflow), 1);
        assert_eq!(successes(report), 0);
        // Concrete lengths: the classification must be Real.
        for exec in &report.executions {
            if let tonprobe::symbolic::outcome::TerminalKind::Failure { class, .. } =
                &exec.terminal
            {
                assert_eq!(*class, tonprobe::symbolic::outcome::BoundsClass::Real);
            }
        }
    });
}
