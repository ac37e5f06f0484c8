//! Concrete-dictionary semantics: newest binding wins, regardless of prior
//! history, and min/max resolve to the true extrema.

mod probe_utils;

use probe_utils::{analyze, failures_with, successes};
use tonprobe::insn::{
    ArithInstr, CellParseInstr, CmpInstr, ContInstr, DictInstr, DictKeyKind, DictSetMode, Instr,
    StackInstr, TupleInstr,
};
use tonprobe::symbolic::outcome::VmFailure;

fn bits_of(byte: u8) -> Vec<bool> {
    (0..8).rev().map(|i| byte & (1 << i) != 0).collect()
}

/// value slice, key int, dict, width → new dict.
fn set_entry(key: i64, value: u8) -> Vec<Instr> {
    vec![
        Instr::CellParse(CellParseInstr::PushSlice(bits_of(value))),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(key)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Set {
            key: DictKeyKind::Signed,
            mode: DictSetMode::Set,
            by_ref: false,
        }),
    ]
}

/// key int, dict, width → value flag; throws `missing` when absent.
fn get_entry(key: i64, missing: u16) -> Vec<Instr> {
    vec![
        Instr::Arith(ArithInstr::PushInt(key)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Get {
            key: DictKeyKind::Signed,
            by_ref: false,
        }),
        Instr::Cont(ContInstr::ThrowIfNot(missing)),
    ]
}

#[test]
fn test_get_after_set_returns_stored_value() {
    let mut program = vec![Instr::Dict(DictInstr::NewDict)];
    program.extend(set_entry(7, 0xAB));
    program.extend(get_entry(7, 100));
    // The fetched slice must equal the stored payload bit-for-bit.
    program.extend([
        Instr::CellParse(CellParseInstr::PushSlice(bits_of(0xAB))),
        Instr::CellParse(CellParseInstr::SliceEq),
        Instr::Cont(ContInstr::ThrowIfNot(101)),
    ]);

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(100)), 0);
        assert_eq!(failures_with(report, VmFailure::Custom(101)), 0);
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_set_overwrites_prior_binding() {
    let mut program = vec![Instr::Dict(DictInstr::NewDict)];
    program.extend(set_entry(7, 0x11));
    program.extend(set_entry(7, 0x22));
    program.extend(get_entry(7, 100));
    program.extend([
        Instr::CellParse(CellParseInstr::PushSlice(bits_of(0x22))),
        Instr::CellParse(CellParseInstr::SliceEq),
        Instr::Cont(ContInstr::ThrowIfNot(101)),
    ]);

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(101)), 0);
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_get_after_delete_is_absent_regardless_of_history() {
    let mut program = vec![Instr::Dict(DictInstr::NewDict)];
    program.extend(set_entry(7, 0xAB));
    program.extend(set_entry(9, 0xCD));
    program.extend([
        Instr::Arith(ArithInstr::PushInt(7)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Del {
            key: DictKeyKind::Signed,
        }),
        // Delete succeeded.
        Instr::Cont(ContInstr::ThrowIfNot(102)),
    ]);
    // Now the key must be gone: throw 103 if still present.
    program.extend([
        Instr::Arith(ArithInstr::PushInt(7)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Get {
            key: DictKeyKind::Signed,
            by_ref: false,
        }),
        Instr::Cont(ContInstr::ThrowIf(103)),
    ]);

    analyze(program, |report| {
        assert_eq!(failures_with(report, VmFailure::Custom(102)), 0);
        assert_eq!(failures_with(report, VmFailure::Custom(103)), 0);
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_min_max_over_three_keys() {
    let mut program = vec![Instr::Dict(DictInstr::NewDict)];
    for (k, v) in [(3, 0x33u8), (9, 0x99), (7, 0x77)] {
        program.extend(set_entry(k, v));
    }
    // max → 9.
    program.extend([
        Instr::Stack(StackInstr::Push(0)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Extremum {
            key: DictKeyKind::Signed,
            max: true,
        }),
        Instr::Cont(ContInstr::ThrowIfNot(110)),
        Instr::Cmp(CmpInstr::EqInt(9)),
        Instr::Cont(ContInstr::ThrowIfNot(111)),
        Instr::Stack(StackInstr::Pop(0)),
    ]);
    // min → 3.
    program.extend([
        Instr::Stack(StackInstr::Push(0)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Extremum {
            key: DictKeyKind::Signed,
            max: false,
        }),
        Instr::Cont(ContInstr::ThrowIfNot(112)),
        Instr::Cmp(CmpInstr::EqInt(3)),
        Instr::Cont(ContInstr::ThrowIfNot(113)),
        Instr::Stack(StackInstr::Pop(0)),
    ]);
    program.push(Instr::Tuple(TupleInstr::Null));

    analyze(program, |report| {
        for code in [110, 111, 112, 113] {
            assert_eq!(
                failures_with(report, VmFailure::Custom(code)),
                0,
                "unexpected failure {code}"
            );
        }
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_get_next_prev_walk_neighbors() {
    let mut program = vec![Instr::Dict(DictInstr::NewDict)];
    for (k, v) in [(3, 0x33u8), (7, 0x77), (9, 0x99)] {
        program.extend(set_entry(k, v));
    }
    // next(4) → 7.
    program.extend([
        Instr::Stack(StackInstr::Push(0)),
        Instr::Arith(ArithInstr::PushInt(4)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::GetNear {
            key: DictKeyKind::Signed,
            next: true,
            allow_eq: false,
        }),
        Instr::Cont(ContInstr::ThrowIfNot(120)),
        Instr::Cmp(CmpInstr::EqInt(7)),
        Instr::Cont(ContInstr::ThrowIfNot(121)),
        Instr::Stack(StackInstr::Pop(0)),
    ]);
    // prev(4) → 3.
    program.extend([
        Instr::Stack(StackInstr::Push(0)),
        Instr::Arith(ArithInstr::PushInt(4)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::GetNear {
            key: DictKeyKind::Signed,
            next: false,
            allow_eq: false,
        }),
        Instr::Cont(ContInstr::ThrowIfNot(122)),
        Instr::Cmp(CmpInstr::EqInt(3)),
        Instr::Cont(ContInstr::ThrowIfNot(123)),
        Instr::Stack(StackInstr::Pop(0)),
    ]);
    program.push(Instr::Tuple(TupleInstr::Null));

    analyze(program, |report| {
        for code in [120, 121, 122, 123] {
            assert_eq!(
                failures_with(report, VmFailure::Custom(code)),
                0,
                "unexpected failure {code}"
            );
        }
        assert_eq!(successes(report), 1);
    });
}
