//! Post-processing: mocked hashes and signature verdicts must be pinned to
//! real values, and states whose mocks contradict the model are dropped
//! rather than reported.

mod probe_utils;

use probe_utils::{analyze, failures_with, successes};
use tonprobe::insn::{
    ArithInstr, CellBuildInstr, CellParseInstr, CmpInstr, ContInstr, CryptoInstr, Instr,
    StackInstr,
};
use tonprobe::symbolic::outcome::VmFailure;

fn build_byte_cell(byte: i64) -> Vec<Instr> {
    vec![
        Instr::Arith(ArithInstr::PushInt(byte)),
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        Instr::CellBuild(CellBuildInstr::StUint(8)),
        Instr::CellBuild(CellBuildInstr::EndCell),
    ]
}

#[test]
fn test_same_cell_hashes_equal_after_fixation() {
    // Two mocks of the same cell start unconstrained, so the "differs"
    // branch exists during the run; fixation pins both to the same real
    // hash and drops that branch as inconsistent.
    let mut program = build_byte_cell(0x5A);
    program.extend([
        Instr::Stack(StackInstr::Push(0)),
        Instr::Crypto(CryptoInstr::HashCellU),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Crypto(CryptoInstr::HashCellU),
        Instr::Cmp(CmpInstr::Equal),
        Instr::Cont(ContInstr::ThrowIfNot(95)),
    ]);

    analyze(program, |report| {
        assert_eq!(
            failures_with(report, VmFailure::Custom(95)),
            0,
            "the hash-mismatch branch must be dropped by fixation"
        );
        assert_eq!(successes(report), 1);
        assert!(
            report.dropped_inconsistent >= 1,
            "the inconsistent branch is dropped, not silently forgotten"
        );
    });
}

#[test]
fn test_different_cells_hash_differently_after_fixation() {
    let mut program = build_byte_cell(0x11);
    program.extend(build_byte_cell(0x22));
    program.extend([
        Instr::Crypto(CryptoInstr::HashCellU),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Crypto(CryptoInstr::HashCellU),
        // Equal hashes of different cells must be impossible post-fixation.
        Instr::Cmp(CmpInstr::Equal),
        Instr::Cont(ContInstr::ThrowIf(96)),
    ]);

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(96)), 0);
        assert_eq!(successes(report), 1);
        assert!(report.dropped_inconsistent >= 1);
    });
}

#[test]
fn test_arbitrary_signature_fixates_invalid() {
    // A zeroed 512-bit signature over an arbitrary hash/key cannot match
    // the deterministic witness, so the "valid" branch is inconsistent.
    let program = vec![
        Instr::Arith(ArithInstr::PushInt(123_456)),
        Instr::CellParse(CellParseInstr::PushSlice(vec![false; 512])),
        Instr::Arith(ArithInstr::PushInt(5)),
        Instr::Crypto(CryptoInstr::CheckSignU),
        Instr::Cont(ContInstr::ThrowIf(97)),
    ];

    analyze(program, |report| {
        assert_eq!(
            failures_with(report, VmFailure::Custom(97)),
            0,
            "signature-valid branch must not survive fixation"
        );
        assert_eq!(successes(report), 1);
        assert!(report.dropped_inconsistent >= 1);
    });
}

#[test]
fn test_cell_depth_fixates_to_real_depth() {
    // A leaf cell has depth 0; the mocked depth must collapse to it.
    let mut program = build_byte_cell(0x77);
    program.extend([
        Instr::Crypto(CryptoInstr::CellDepth),
        Instr::Cmp(CmpInstr::EqInt(0)),
        Instr::Cont(ContInstr::ThrowIfNot(98)),
    ]);

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(98)), 0);
        assert_eq!(successes(report), 1);
    });
}
