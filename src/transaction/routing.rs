//! Destination resolution for outbound messages.
//!
//! Structural resolution (a concrete `addr_std` matching a loaded contract)
//! is tried first; the optional routing scheme covers the rest. Messages
//! neither resolves stay "unprocessed" — never a failure.

use std::collections::HashMap;

use z3::ast::Ast;

use crate::symbolic::z3_ext::u64_from_bv;
use crate::transaction::message::OutboundMessage;

#[derive(Debug, Clone)]
pub enum RouteEntry {
    Contract(usize),
    /// Dispatch on the next 32-bit opcode deeper in the body.
    Nested(HashMap<u32, RouteEntry>),
}

#[derive(Debug, Clone)]
pub enum RoutingScheme {
    /// Fixed destination order, consumed one id per sent message.
    Ordered(Vec<usize>),
    /// Dispatch on the leading 32-bit opcode of the message body.
    OpcodeTable(HashMap<u32, RouteEntry>),
}

/// Workchain/account encoded for a loaded contract: account ids are small
/// integers so structural matches stay concrete.
pub fn contract_account_id(index: usize) -> u64 {
    index as u64 + 1
}

/// Attempts to resolve a destination contract. `route_cursor` advances only
/// when an ordered scheme is consulted.
pub fn resolve_destination<'ctx>(
    msg: &OutboundMessage<'ctx>,
    contract_count: usize,
    scheme: Option<&RoutingScheme>,
    route_cursor: &mut usize,
) -> Option<usize> {
    if let Some(found) = structural_destination(msg, contract_count) {
        return Some(found);
    }
    match scheme? {
        RoutingScheme::Ordered(order) => {
            let next = order.get(*route_cursor).copied();
            if next.is_some() {
                *route_cursor += 1;
            }
            next.filter(|idx| *idx < contract_count)
        }
        RoutingScheme::OpcodeTable(table) => {
            let mut body = msg.body.clone();
            let mut current = table;
            loop {
                if u64_from_bv(&body.remaining_bits()).map_or(true, |n| n < 32) {
                    return None;
                }
                let op = u64_from_bv(&body.preload_uint(32))? as u32;
                match current.get(&op)? {
                    RouteEntry::Contract(idx) => {
                        return (*idx < contract_count).then_some(*idx);
                    }
                    RouteEntry::Nested(inner) => {
                        let ctx = body.cell.data.get_ctx();
                        body.advance_bits(&crate::symbolic::z3_ext::len_val(ctx, 32));
                        current = inner;
                    }
                }
            }
        }
    }
}

/// Concrete `addr_std` destinations (workchain 0, account id = index + 1).
fn structural_destination<'ctx>(
    msg: &OutboundMessage<'ctx>,
    contract_count: usize,
) -> Option<usize> {
    let dest = &msg.dest;
    // Layout: 10 anycast(1) wc(8) account(256).
    let tag = u64_from_bv(&dest.preload_uint(2))?;
    if tag != 0b10 {
        return None;
    }
    let header = u64_from_bv(&dest.preload_uint(11))?;
    // anycast bit and workchain must be zero.
    if header & 0x1ff != 0 {
        return None;
    }
    let mut body = dest.clone();
    body.advance_bits(&crate::symbolic::z3_ext::len_val(
        dest.cell.data.get_ctx(),
        11,
    ));
    let account = crate::symbolic::z3_ext::biguint_from_bv(&body.preload_uint(256))?;
    let account = u64::try_from(account).ok()?;
    if account == 0 {
        return None;
    }
    let idx = (account - 1) as usize;
    (idx < contract_count).then_some(idx)
}
