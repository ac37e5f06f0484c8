//! Walks the pending-action list produced by the compute phase and parses
//! each record into its semantic action, reusing the three-way-checked
//! slice reads for the message wire layout.

use std::sync::Arc;

use z3::ast::{Ast, BV};

use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::{require_concrete, StepError};
use crate::symbolic::memory::{Cell, CellSlice};
use crate::symbolic::opcodes::cells_parse::{cut_front, resolve_ref};
use crate::symbolic::opcodes::currency::load_var_uint;
use crate::symbolic::opcodes::ensure_slice_bits;
use crate::symbolic::outcome::VmFailure;
use crate::symbolic::state::VmState;
use crate::symbolic::z3_ext::{len_val, u64_from_bv};
use crate::transaction::message::OutboundMessage;

pub const ACT_SEND_MSG_TAG: u64 = 0x0ec3_c86d;
pub const ACT_RESERVE_TAG: u64 = 0x36e6_b809;
pub const ACT_SET_CODE_TAG: u64 = 0xad4d_e08e;

/// Action-phase result code for an over-long list (exit surface 33).
pub const TOO_MANY_ACTIONS: i32 = 33;

#[derive(Debug, Clone)]
pub enum ParsedAction<'ctx> {
    SendMsg {
        mode: BV<'ctx>,
        msg: Arc<Cell<'ctx>>,
    },
    /// Currency reservation: recorded, no routing effect.
    Reserve {
        mode: BV<'ctx>,
        amount: BV<'ctx>,
    },
    SetCode {
        code: Arc<Cell<'ctx>>,
    },
}

/// Unlinks the action list (newest first, linked through the first ref) and
/// returns the parsed actions in emission order.
pub fn parse_action_list<'ctx>(
    root: &Arc<Cell<'ctx>>,
    cap: usize,
) -> Result<Vec<ParsedAction<'ctx>>, StepError> {
    let mut parsed = Vec::new();
    let mut cursor = root.clone();

    loop {
        let len = require_concrete(cursor.concrete_data_len(), "action record length")?;
        if len == 0 && cursor.refs.is_empty() {
            break;
        }
        if parsed.len() >= cap {
            return Err(StepError::vm(VmFailure::Custom(TOO_MANY_ACTIONS)));
        }

        let slice = CellSlice::new(cursor.data.get_ctx(), cursor.clone());
        let tag = require_concrete(u64_from_bv(&slice.preload_uint(32)), "action tag")?;
        let prev = cursor
            .refs
            .first()
            .cloned()
            .ok_or_else(|| StepError::internal("action record without a back link"))?;

        let mut after_tag = slice.clone();
        after_tag.advance_bits(&len_val(cursor.data.get_ctx(), 32));

        match tag {
            ACT_SEND_MSG_TAG => {
                let mode = after_tag.preload_uint(8);
                let msg = cursor
                    .refs
                    .get(1)
                    .cloned()
                    .ok_or_else(|| StepError::internal("send action without message ref"))?;
                parsed.push(ParsedAction::SendMsg { mode, msg });
            }
            ACT_RESERVE_TAG => {
                let mode = after_tag.preload_uint(8);
                let mut amount_s = after_tag.clone();
                amount_s.advance_bits(&len_val(cursor.data.get_ctx(), 8));
                let amount = amount_s.preload_uint(128);
                parsed.push(ParsedAction::Reserve { mode, amount });
            }
            ACT_SET_CODE_TAG => {
                let code = cursor
                    .refs
                    .get(1)
                    .cloned()
                    .ok_or_else(|| StepError::internal("set-code action without code ref"))?;
                parsed.push(ParsedAction::SetCode { code });
            }
            other => {
                return Err(StepError::internal(format!(
                    "unknown action tag {other:#010x}"
                )))
            }
        }
        cursor = prev;
    }

    parsed.reverse();
    Ok(parsed)
}

/// Parses a message cell against the internal-message wire layout.
///
/// Bounds checks fork structural-failure siblings into `out`. Flag bits and
/// address tags that the path leaves symbolic make the message structurally
/// unresolvable; the caller keeps it as "unprocessed" instead of failing.
pub fn parse_outbound_message<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    msg: &Arc<Cell<'ctx>>,
    mode: &BV<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<OutboundMessage<'ctx>, StepError> {
    let ctx = interp.ctx;
    let mut s = CellSlice::new(ctx, msg.clone());

    // int_msg_info$0 ihr_disabled:Bits bounce:Bits bounced:Bits
    let header = len_val(ctx, 4);
    ensure_slice_bits(interp, state, &s, &header, out)?;
    let tag0 = require_concrete(u64_from_bv(&s.preload_uint(1)), "message header tag")?;
    if tag0 != 0 {
        return Err(StepError::non_concrete("external-message header"));
    }
    s.advance_bits(&header);

    // src address: skipped structurally.
    skip_address(interp, state, &mut s, out)?;

    // dest address: recorded as a slice for routing.
    let dest = read_dest_address(interp, state, &mut s, out)?;

    // value: grams + extra-currency dictionary marker.
    let (value, rest) = load_var_uint(interp, state, s, 4, out)?;
    s = rest;
    let one = len_val(ctx, 1);
    ensure_slice_bits(interp, state, &s, &one, out)?;
    let extra = require_concrete(u64_from_bv(&s.preload_uint(1)), "extra-currency marker")?;
    s.advance_bits(&one);
    if extra != 0 {
        // Extra currencies ride in a ref we do not interpret.
        s.advance_ref();
    }

    // ihr_fee and fwd_fee.
    let (_ihr, rest) = load_var_uint(interp, state, s, 4, out)?;
    let (_fwd, rest) = load_var_uint(interp, state, rest, 4, out)?;
    s = rest;

    // created_lt:uint64 created_at:uint32
    let stamps = len_val(ctx, 96);
    ensure_slice_bits(interp, state, &s, &stamps, out)?;
    s.advance_bits(&stamps);

    // state-init: maybe, inline or by ref.
    ensure_slice_bits(interp, state, &s, &one, out)?;
    let has_init = require_concrete(u64_from_bv(&s.preload_uint(1)), "state-init marker")?;
    s.advance_bits(&one);
    if has_init != 0 {
        ensure_slice_bits(interp, state, &s, &one, out)?;
        let by_ref = require_concrete(u64_from_bv(&s.preload_uint(1)), "state-init placement")?;
        s.advance_bits(&one);
        if by_ref != 0 {
            s.advance_ref();
        } else {
            return Err(StepError::non_concrete("inline state-init"));
        }
    }

    // body: inline or by ref.
    ensure_slice_bits(interp, state, &s, &one, out)?;
    let body_ref = require_concrete(u64_from_bv(&s.preload_uint(1)), "body placement")?;
    s.advance_bits(&one);
    let body = if body_ref != 0 {
        let child = resolve_ref(interp, state, &s)?;
        CellSlice::new(ctx, child)
    } else {
        s
    };

    Ok(OutboundMessage {
        value,
        cell: msg.clone(),
        body,
        dest,
        mode: mode.clone(),
    })
}

/// Skips one MsgAddress (addr_none or addr_std).
fn skip_address<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    s: &mut CellSlice<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let two = len_val(ctx, 2);
    ensure_slice_bits(interp, state, s, &two, out)?;
    let tag = require_concrete(u64_from_bv(&s.preload_uint(2)), "address tag")?;
    let width = match tag {
        0b00 => 2,
        0b10 => 267,
        _ => return Err(StepError::non_concrete("var/extern address form")),
    };
    let w = len_val(ctx, width);
    ensure_slice_bits(interp, state, s, &w, out)?;
    s.advance_bits(&w);
    Ok(())
}

/// Reads the destination address field as a standalone slice and advances.
fn read_dest_address<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    s: &mut CellSlice<'ctx>,
    out: &mut Vec<VmState<'ctx>>,
) -> Result<CellSlice<'ctx>, StepError> {
    let ctx = interp.ctx;
    let two = len_val(ctx, 2);
    ensure_slice_bits(interp, state, s, &two, out)?;
    let tag = require_concrete(u64_from_bv(&s.preload_uint(2)), "destination tag")?;
    if tag != 0b10 {
        return Err(StepError::non_concrete("non-standard destination address"));
    }
    let w = len_val(ctx, 267);
    ensure_slice_bits(interp, state, s, &w, out)?;
    let dest = cut_front(interp, s, &w);
    s.advance_bits(&w);
    Ok(dest)
}
