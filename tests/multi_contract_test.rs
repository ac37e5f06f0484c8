//! Multi-contract delivery: A sends one internal message; the routing
//! scheme names B; the run records exactly one A→B transition and ends in
//! B's compute result.

mod probe_utils;

use std::collections::HashMap;

use probe_utils::{analyze_contracts, contract, successes};
use tonprobe::config::analyzer::AnalyzerOptions;
use tonprobe::insn::{
    ArithInstr, CellBuildInstr, CellParseInstr, ContInstr, CurrencyInstr, Instr, StackInstr,
};
use tonprobe::machine::ContractSetup;
use tonprobe::transaction::message::Delivery;
use tonprobe::transaction::routing::RoutingScheme;

/// addr_std bits for workchain 0 and the given account id.
fn addr_std_bits(account: u64) -> Vec<bool> {
    let mut bits = vec![true, false]; // addr_std$10
    bits.push(false); // no anycast
    bits.extend(std::iter::repeat(false).take(8)); // workchain 0
    for i in (0..256).rev() {
        bits.push(i < 64 && (account >> i) & 1 == 1);
    }
    bits
}

/// Builds an internal message to `account` and hands it to SENDRAWMSG.
fn send_message_to(account: u64) -> Vec<Instr> {
    let mut program = vec![
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        // int_msg_info$0 + flags: 4 zero bits.
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(4)),
        // src: addr_none$00.
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(2)),
        // dest.
        Instr::CellParse(CellParseInstr::PushSlice(addr_std_bits(account))),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StSlice),
        // value: 3 grams, no extra currencies.
        Instr::Arith(ArithInstr::PushInt(3)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Currency(CurrencyInstr::StGrams),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(1)),
        // ihr_fee, fwd_fee: zero grams each.
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Currency(CurrencyInstr::StGrams),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Currency(CurrencyInstr::StGrams),
        // created_lt:64 created_at:32, zero.
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(64)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(32)),
        // no state-init, body inline (empty).
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(1)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(1)),
        Instr::CellBuild(CellBuildInstr::EndCell),
    ];
    program.extend([
        // mode 0.
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Action(tonprobe::insn::ActionInstr::SendRawMsg),
    ]);
    program
}

fn receiver() -> ContractSetup {
    // B: drop the internal-receive arguments and finish.
    contract(vec![
        Instr::Stack(StackInstr::Pop(0)),
        Instr::Stack(StackInstr::Pop(0)),
        Instr::Stack(StackInstr::Pop(0)),
        Instr::Stack(StackInstr::Pop(0)),
        Instr::Arith(ArithInstr::PushInt(42)),
    ])
}

#[test]
fn test_structural_destination_delivers_to_b() {
    // Account id 2 is contract index 1 (B): structural resolution.
    let a = contract(send_message_to(2));
    let b = receiver();
    let mut options = AnalyzerOptions::default();
    options.multi_contract = true;

    analyze_contracts(vec![a, b], None, options, |report| {
        assert_eq!(successes(report), 1);
        let exec = report
            .executions
            .iter()
            .find(|e| e.terminal.is_success())
            .expect("a successful execution");
        assert_eq!(exec.deliveries, vec![Delivery { from: 0, to: 1 }]);
        assert_eq!(exec.emitted.len(), 1);
        assert!(exec.unprocessed.is_empty());
    });
}

#[test]
fn test_routing_scheme_resolves_unknown_destination() {
    // Account id 99 matches no loaded contract; the ordered scheme names B.
    let a = contract(send_message_to(99));
    let b = receiver();
    let mut options = AnalyzerOptions::default();
    options.multi_contract = true;

    analyze_contracts(
        vec![a, b],
        Some(RoutingScheme::Ordered(vec![1])),
        options,
        |report| {
            assert_eq!(successes(report), 1);
            let exec = report
                .executions
                .iter()
                .find(|e| e.terminal.is_success())
                .expect("a successful execution");
            assert_eq!(exec.deliveries, vec![Delivery { from: 0, to: 1 }]);
        },
    );
}

#[test]
fn test_unroutable_message_is_kept_not_failed() {
    let a = contract(send_message_to(99));
    let b = receiver();
    let mut options = AnalyzerOptions::default();
    options.multi_contract = true;

    analyze_contracts(vec![a, b], None, options, |report| {
        assert_eq!(successes(report), 1);
        let exec = report
            .executions
            .iter()
            .find(|e| e.terminal.is_success())
            .expect("a successful execution");
        assert!(exec.deliveries.is_empty());
        assert_eq!(exec.unprocessed.len(), 1);
    });
}

#[test]
fn test_strict_address_policy_flags_unknown_destination() {
    use tonprobe::config::analyzer::ExternalAddressPolicy;
    use tonprobe::symbolic::outcome::{SoftFailure, TerminalKind};

    let a = contract(send_message_to(99));
    let b = receiver();
    let mut options = AnalyzerOptions::default();
    options.multi_contract = true;
    options.external_addresses = ExternalAddressPolicy::Strict;

    analyze_contracts(vec![a, b], None, options, |report| {
        let soft = report
            .executions
            .iter()
            .filter(|e| {
                matches!(
                    e.terminal,
                    TerminalKind::Soft(SoftFailure::DeprecatedAddressEncoding)
                )
            })
            .count();
        assert_eq!(soft, 1, "the unroutable send is flagged, not dropped");
        assert_eq!(successes(report), 0);
    });
}

#[test]
fn test_without_multi_contract_no_delivery_happens() {
    let a = contract(send_message_to(2));
    let b = receiver();

    analyze_contracts(vec![a, b], None, AnalyzerOptions::default(), |report| {
        assert_eq!(successes(report), 1);
        let exec = report
            .executions
            .iter()
            .find(|e| e.terminal.is_success())
            .expect("a successful execution");
        assert!(exec.deliveries.is_empty());
    });
}

#[test]
fn test_double_send_of_remaining_value_is_soft_failure() {
    use tonprobe::symbolic::outcome::{SoftFailure, TerminalKind};

    // Mode 128 attaches the whole remaining balance; doing it twice is a
    // well-formedness violation, reported on the soft axis.
    let mut program = Vec::new();
    for _ in 0..2 {
        program.extend([
            Instr::CellBuild(CellBuildInstr::NewBuilder),
            Instr::CellBuild(CellBuildInstr::EndCell),
            Instr::Arith(ArithInstr::PushInt(128)),
            Instr::Action(tonprobe::insn::ActionInstr::SendRawMsg),
        ]);
    }

    analyze_contracts(
        vec![contract(program)],
        None,
        AnalyzerOptions::default(),
        |report| {
            let soft = report
                .executions
                .iter()
                .filter(|e| {
                    matches!(
                        e.terminal,
                        TerminalKind::Soft(SoftFailure::DoubleSendRemainingValue)
                    )
                })
                .count();
            assert_eq!(soft, 1);
            assert_eq!(successes(report), 0);
        },
    );
}

#[test]
fn test_opcode_routing_dispatches_on_body() {
    // Body carries opcode 0x11223344; the table routes it to B.
    let mut program = vec![
        Instr::CellBuild(CellBuildInstr::NewBuilder),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(4)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(2)),
        Instr::CellParse(CellParseInstr::PushSlice(addr_std_bits(99))),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StSlice),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Currency(CurrencyInstr::StGrams),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(1)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Currency(CurrencyInstr::StGrams),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::Currency(CurrencyInstr::StGrams),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(64)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(32)),
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(1)),
        // body inline with the dispatch opcode.
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(1)),
        Instr::Arith(ArithInstr::PushInt(0x1122_3344)),
        Instr::Stack(StackInstr::Xchg0(1)),
        Instr::CellBuild(CellBuildInstr::StUint(32)),
        Instr::CellBuild(CellBuildInstr::EndCell),
    ];
    program.extend([
        Instr::Arith(ArithInstr::PushInt(0)),
        Instr::Action(tonprobe::insn::ActionInstr::SendRawMsg),
    ]);

    let a = contract(program);
    let b = receiver();
    let mut options = AnalyzerOptions::default();
    options.multi_contract = true;

    let table = HashMap::from([(
        0x1122_3344u32,
        tonprobe::transaction::routing::RouteEntry::Contract(1),
    )]);

    analyze_contracts(
        vec![a, b],
        Some(RoutingScheme::OpcodeTable(table)),
        options,
        |report| {
            assert_eq!(successes(report), 1);
            let exec = report
                .executions
                .iter()
                .find(|e| e.terminal.is_success())
                .expect("a successful execution");
            assert_eq!(exec.deliveries, vec![Delivery { from: 0, to: 1 }]);
        },
    );
}
