//! Value fixation: replaces mocked hashes, depths, signature verdicts and
//! forward fees with real values computed from a terminal state's model,
//! then re-checks the path. Unsatisfiable means the mocks were inconsistent
//! with the model, and the state is dropped rather than reported.

use std::sync::Arc;

use num_bigint::{BigInt, BigUint};
use sha2::{Digest, Sha256};
use z3::ast::{Ast, Bool};
use z3::Model;

use crate::symbolic::engine::Interpreter;
use crate::symbolic::memory::{Cell, CellSlice};
use crate::symbolic::state::{MockRecord, VmState};
use crate::symbolic::z3_ext::{
    bv_from_bigint, check_under, model_biguint, model_u64, SatOutcome, INT_BITS, MAX_CELL_REFS,
};

/// Process-fixed signing seed. Determinism is the contract; the exact bytes
/// carry no meaning downstream.
pub const SIGNING_SEED: [u8; 32] = *b"tonprobe.deterministic.signer.v1";

pub enum FixationResult<'ctx> {
    /// Mocks reconciled; the final model witnesses the execution.
    Consistent(Model<'ctx>),
    /// No model satisfies both the path and the real values.
    Inconsistent,
    /// The solver gave up on the combined check.
    Undecided,
}

/// A cell fully resolved through the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteCell {
    pub bits: Vec<bool>,
    pub children: Vec<ConcreteCell>,
}

impl ConcreteCell {
    pub fn depth(&self) -> u16 {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Standard representation hash: descriptor bytes, padded data, child
    /// depths, child hashes.
    pub fn repr_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        let b = self.bits.len();
        let d1 = self.children.len() as u8;
        let d2 = ((b / 8) + b.div_ceil(8)) as u8;
        hasher.update([d1, d2]);
        hasher.update(self.padded_data());
        for child in &self.children {
            hasher.update(child.depth().to_be_bytes());
        }
        for child in &self.children {
            hasher.update(child.repr_hash());
        }
        hasher.finalize().into()
    }

    /// Data bytes with the completion tag when the bit count is ragged.
    fn padded_data(&self) -> Vec<u8> {
        let mut bytes = bits_to_bytes(&self.bits);
        if self.bits.len() % 8 != 0 {
            let idx = bytes.len() - 1;
            bytes[idx] |= 0x80 >> (self.bits.len() % 8);
        }
        bytes
    }

    /// Tree totals (bits, cells) for fee computation.
    pub fn stats(&self) -> (u64, u64) {
        let mut bits = self.bits.len() as u64;
        let mut cells = 1u64;
        for child in &self.children {
            let (b, c) = child.stats();
            bits += b;
            cells += c;
        }
        (bits, cells)
    }
}

fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

/// Resolves a cell to concrete contents under the model. Children of input
/// cells come from the state's lazily-materialized map; children the path
/// never touched resolve to empty cells.
pub fn resolve_cell<'ctx>(
    model: &Model<'ctx>,
    state: &VmState<'ctx>,
    cell: &Arc<Cell<'ctx>>,
) -> Option<ConcreteCell> {
    let len = model_u64(model, &cell.data_len)? as usize;
    let data = model_biguint(model, &cell.data)?;
    let bits = top_bits(&data, len);

    let refs_len = model_u64(model, &cell.refs_len)?.min(MAX_CELL_REFS) as usize;
    let mut children = Vec::with_capacity(refs_len);
    for idx in 0..refs_len {
        let child = if let Some(explicit) = cell.refs.get(idx) {
            resolve_cell(model, state, explicit)?
        } else if let Some(lazy) = state.input_children.get(&(cell.id, idx)) {
            resolve_cell(model, state, lazy)?
        } else {
            ConcreteCell {
                bits: Vec::new(),
                children: Vec::new(),
            }
        };
        children.push(child);
    }
    Some(ConcreteCell { bits, children })
}

/// Resolves the unread portion of a slice as its own cell.
pub fn resolve_slice<'ctx>(
    model: &Model<'ctx>,
    state: &VmState<'ctx>,
    slice: &CellSlice<'ctx>,
) -> Option<ConcreteCell> {
    let whole = resolve_cell(model, state, &slice.cell)?;
    let pos = model_u64(model, &slice.data_pos)? as usize;
    if pos > whole.bits.len() || slice.ref_pos > whole.children.len() {
        return None;
    }
    Some(ConcreteCell {
        bits: whole.bits[pos..].to_vec(),
        children: whole.children[slice.ref_pos..].to_vec(),
    })
}

/// The top `len` bits of a value in a left-aligned payload field.
fn top_bits(value: &BigUint, len: usize) -> Vec<bool> {
    let width = crate::symbolic::z3_ext::DATA_BITS as usize;
    (0..len)
        .map(|i| value.bit((width - 1 - i) as u64))
        .collect()
}

/// Deterministic 64-byte signature witness for a resolved hash.
pub fn signature_witness(hash: &[u8; 32]) -> [u8; 64] {
    let mut first = Sha256::new();
    first.update(SIGNING_SEED);
    first.update(hash);
    let a: [u8; 32] = first.finalize().into();

    let mut second = Sha256::new();
    second.update(SIGNING_SEED);
    second.update(hash);
    second.update([1u8]);
    let b: [u8; 32] = second.finalize().into();

    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&a);
    out[32..].copy_from_slice(&b);
    out
}

/// Public key of the process-fixed pair.
pub fn fixed_public_key() -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(SIGNING_SEED);
    h.update(b"pub");
    h.finalize().into()
}

pub fn fixate<'ctx>(interp: &Interpreter<'ctx>, state: &VmState<'ctx>) -> FixationResult<'ctx> {
    // First: a model for the raw path.
    match check_under(&interp.solver, &state.path) {
        SatOutcome::Sat => {}
        SatOutcome::Unsat => return FixationResult::Inconsistent,
        SatOutcome::Unknown => return FixationResult::Undecided,
    }
    let Some(model) = interp.solver.get_model() else {
        return FixationResult::Undecided;
    };

    // Second: pin every mock to its real value under that model.
    let mut constraints: Vec<Bool<'ctx>> = state.path.clone();
    for record in &state.mocks {
        let pinned = match pin_mock(interp, state, &model, record) {
            Some(c) => c,
            None => return FixationResult::Undecided,
        };
        constraints.push(pinned);
    }

    match check_under(&interp.solver, &constraints) {
        SatOutcome::Sat => match interp.solver.get_model() {
            Some(final_model) => FixationResult::Consistent(final_model),
            None => FixationResult::Undecided,
        },
        SatOutcome::Unsat => FixationResult::Inconsistent,
        SatOutcome::Unknown => FixationResult::Undecided,
    }
}

fn pin_mock<'ctx>(
    interp: &Interpreter<'ctx>,
    state: &VmState<'ctx>,
    model: &Model<'ctx>,
    record: &MockRecord<'ctx>,
) -> Option<Bool<'ctx>> {
    let ctx = interp.ctx;
    match record {
        MockRecord::CellHash { cell, mock } => {
            let resolved = resolve_cell(model, state, cell)?;
            let hash = BigUint::from_bytes_be(&resolved.repr_hash());
            Some(mock._eq(&bv_from_bigint(ctx, &BigInt::from(hash), INT_BITS)))
        }
        MockRecord::SliceHash { slice, mock } => {
            let resolved = resolve_slice(model, state, slice)?;
            let hash = BigUint::from_bytes_be(&resolved.repr_hash());
            Some(mock._eq(&bv_from_bigint(ctx, &BigInt::from(hash), INT_BITS)))
        }
        MockRecord::DataHash { slice, mock } => {
            let resolved = resolve_slice(model, state, slice)?;
            let digest: [u8; 32] = Sha256::digest(bits_to_bytes(&resolved.bits)).into();
            let hash = BigUint::from_bytes_be(&digest);
            Some(mock._eq(&bv_from_bigint(ctx, &BigInt::from(hash), INT_BITS)))
        }
        MockRecord::CellDepth { cell, mock } => {
            let resolved = resolve_cell(model, state, cell)?;
            let depth = resolved.depth() as i64;
            Some(mock._eq(&crate::symbolic::z3_ext::int_val(ctx, depth)))
        }
        MockRecord::Signature {
            hash,
            signature,
            pubkey,
            valid,
        } => {
            let hash_value = model_biguint(model, hash)?;
            let mut hash_bytes = [0u8; 32];
            let raw = hash_value.to_bytes_be();
            let raw = if raw.len() > 32 { &raw[raw.len() - 32..] } else { &raw[..] };
            hash_bytes[32 - raw.len()..].copy_from_slice(raw);

            let witness = signature_witness(&hash_bytes);
            let resolved_sig = resolve_slice(model, state, signature)?;
            let sig_ok = resolved_sig.bits.len() >= 512
                && bits_to_bytes(&resolved_sig.bits[..512]) == witness.to_vec();

            let key_value = model_biguint(model, pubkey)?;
            let expected_key = BigUint::from_bytes_be(&fixed_public_key());
            let key_ok = key_value == expected_key;

            let expected = sig_ok && key_ok;
            Some(valid._eq(&Bool::from_bool(ctx, expected)))
        }
        MockRecord::FwdFee { msg, mock } => {
            let resolved = resolve_cell(model, state, msg)?;
            let (bits, cells) = resolved.stats();
            let prices = interp.options.fwd_prices;
            let fee = prices.lump_price
                + (bits * prices.bit_price + cells * prices.cell_price).div_ceil(1 << 16);
            let fee = BigInt::from(fee);
            Some(mock._eq(&bv_from_bigint(ctx, &fee, INT_BITS)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_hash_distinguishes_contents() {
        let a = ConcreteCell {
            bits: vec![true, false, true],
            children: Vec::new(),
        };
        let b = ConcreteCell {
            bits: vec![true, false, false],
            children: Vec::new(),
        };
        assert_ne!(a.repr_hash(), b.repr_hash());
        assert_eq!(a.repr_hash(), a.repr_hash());
    }

    #[test]
    fn test_depth_follows_deepest_child() {
        let leaf = ConcreteCell {
            bits: Vec::new(),
            children: Vec::new(),
        };
        let mid = ConcreteCell {
            bits: vec![true],
            children: vec![leaf.clone()],
        };
        let root = ConcreteCell {
            bits: Vec::new(),
            children: vec![leaf, mid],
        };
        assert_eq!(root.depth(), 2);
    }

    #[test]
    fn test_signature_witness_is_deterministic() {
        let h = [7u8; 32];
        assert_eq!(signature_witness(&h), signature_witness(&h));
        assert_ne!(signature_witness(&h), signature_witness(&[8u8; 32]));
    }

    #[test]
    fn test_stats_counts_tree_totals() {
        let leaf = ConcreteCell {
            bits: vec![true; 10],
            children: Vec::new(),
        };
        let root = ConcreteCell {
            bits: vec![false; 5],
            children: vec![leaf.clone(), leaf],
        };
        assert_eq!(root.stats(), (25, 3));
    }
}
