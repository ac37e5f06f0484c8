//! Input-dictionary reasoning: existence forks, and facts discovered on a
//! path stay consistent with every later query on that path.

mod probe_utils;

use probe_utils::{analyze, failures_with, successes};
use tonprobe::insn::{
    ArithInstr, ContInstr, DictInstr, DictKeyKind, Instr, StackInstr,
};
use tonprobe::symbolic::outcome::VmFailure;

/// Uses the (unknown) storage cell as a dictionary root with 8-bit keys.
fn push_storage_dict() -> Vec<Instr> {
    vec![Instr::Cont(ContInstr::PushCtr(4))]
}

fn get_key(key: i64, missing: u16) -> Vec<Instr> {
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
fn test_has_key_forks_exists_and_absent() {
    let mut program = push_storage_dict();
    program.extend(get_key(5, 77));
    // exists branch keeps the value slice on the stack.
    program.push(Instr::Stack(StackInstr::Pop(0)));

    analyze(program, |report| {
        assert_eq!(
            failures_with(report, VmFailure::Custom(77)),
            1,
            "one branch where key 5 is absent"
        );
        assert_eq!(successes(report), 1, "one branch where key 5 exists");
    });
}

#[test]
fn test_second_get_cannot_contradict_first() {
    // On the path where has-key(5) held, a later get(5) must hold too: the
    // disequality quantifier of its absent branch is ground at the already
    // discovered key, making that branch unsatisfiable.
    let mut program = push_storage_dict();
    program.push(Instr::Stack(StackInstr::Push(0)));
    program.extend(get_key(5, 77));
    program.push(Instr::Stack(StackInstr::Pop(0)));
    program.extend(get_key(5, 78));
    program.push(Instr::Stack(StackInstr::Pop(0)));

    analyze(program, |report| {
        assert_eq!(
            failures_with(report, VmFailure::Custom(77)),
            1,
            "the first query still forks"
        );
        assert_eq!(
            failures_with(report, VmFailure::Custom(78)),
            0,
            "an existence/value contradiction between queries is unsound"
        );
        assert_eq!(successes(report), 1);
    });
}

#[test]
fn test_min_never_coexists_with_smaller_member() {
    // On one path: min(D) = m, and has-key(k) with k < m. The bound
    // quantifier must make that path infeasible, so every surviving
    // execution that saw both has min <= k.
    let mut program = push_storage_dict();
    // D D
    program.push(Instr::Stack(StackInstr::Push(0)));
    // min over 8-bit signed keys.
    program.extend([
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Extremum {
            key: DictKeyKind::Signed,
            max: false,
        }),
        // Branch where the dictionary is empty: throw 80.
        Instr::Cont(ContInstr::ThrowIfNot(80)),
        // stack: D value min_key
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Stack(StackInstr::Pop(0)),
        // stack: D min_key
    ]);
    // has-key(-100): -100 is below any discovered min only if the engine
    // lets it be; get on the same dict.
    program.extend([
        Instr::Stack(StackInstr::Xchg0(1)),
        // stack: min_key D
        Instr::Arith(ArithInstr::PushInt(-100)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Arith(ArithInstr::PushInt(8)),
        Instr::Dict(DictInstr::Get {
            key: DictKeyKind::Signed,
            by_ref: false,
        }),
        // On the exists branch, drop the value and compare: min <= -100
        // must hold, i.e. min > -100 is impossible.
        Instr::Cont(ContInstr::ThrowIfNot(81)),
        Instr::Stack(StackInstr::Pop(0)),
        // stack: min_key
        Instr::Cmp(tonprobe::insn::CmpInstr::GtInt(-100)),
        // min_key > -100 while -100 is a member: must be unreachable.
        Instr::Cont(ContInstr::ThrowIf(82)),
    ]);

    analyze(program, |report| {
        assert_eq!(
            failures_with(report, VmFailure::Custom(82)),
            0,
            "min greater than a present key breaks the bound quantifier"
        );
        // Sanity: both the empty-dict and the key-absent branches exist.
        assert_eq!(failures_with(report, VmFailure::Custom(80)), 1);
        assert!(failures_with(report, VmFailure::Custom(81)) <= 1);
        assert!(successes(report) >= 1);
    });
}
