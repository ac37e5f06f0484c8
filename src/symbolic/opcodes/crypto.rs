//! Cryptographic instructions.
//!
//! Hashes, depths and signature checks are mocked with fresh unknowns and
//! recorded; post-processing replaces them with real values computed from
//! the model and re-checks the path (see `fixation`).

use z3::ast::{Ast, BV};

use crate::insn::CryptoInstr;
use crate::symbolic::engine::Interpreter;
use crate::symbolic::error::StepError;
use crate::symbolic::state::{MockRecord, VmState};
use crate::symbolic::value::StackValue;
use crate::symbolic::z3_ext::{bool_to_int, int_val, int_zero, INT_BITS};

pub fn exec<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    instr: &CryptoInstr,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    match instr {
        CryptoInstr::HashCellU => {
            let cell = state.stack.pop_cell()?;
            let mock = interp.fresh_int("cell_hash");
            constrain_hash_range(state, &mock);
            state.mocks.push(MockRecord::CellHash {
                cell,
                mock: mock.clone(),
            });
            state.stack.push_int(mock)
        }
        CryptoInstr::HashSliceU => {
            let slice = state.stack.pop_slice()?;
            let mock = interp.fresh_int("slice_hash");
            constrain_hash_range(state, &mock);
            state.mocks.push(MockRecord::SliceHash {
                slice,
                mock: mock.clone(),
            });
            state.stack.push_int(mock)
        }
        CryptoInstr::Sha256U => {
            let slice = state.stack.pop_slice()?;
            let mock = interp.fresh_int("data_hash");
            constrain_hash_range(state, &mock);
            state.mocks.push(MockRecord::DataHash {
                slice,
                mock: mock.clone(),
            });
            state.stack.push_int(mock)
        }
        CryptoInstr::CheckSignU => {
            let pubkey = state.stack.pop_int()?;
            let signature = state.stack.pop_slice()?;
            let hash = state.stack.pop_int()?;
            push_signature_mock(interp, state, hash, signature, pubkey)
        }
        CryptoInstr::CheckSignS => {
            let pubkey = state.stack.pop_int()?;
            let signature = state.stack.pop_slice()?;
            let data = state.stack.pop_slice()?;
            // Data-slice variant: the signed hash is itself a mocked value
            // over the data, fixed together with the signature later.
            let hash = interp.fresh_int("signed_data_hash");
            constrain_hash_range(state, &hash);
            state.mocks.push(MockRecord::DataHash {
                slice: data,
                mock: hash.clone(),
            });
            push_signature_mock(interp, state, hash, signature, pubkey)
        }
        CryptoInstr::CellDepth => {
            let cell = state.stack.pop_cell()?;
            let mock = interp.fresh_int("cell_depth");
            state.add_constraint(mock.bvsge(&int_zero(ctx)));
            state.add_constraint(mock.bvsle(&int_val(ctx, 1024)));
            state.mocks.push(MockRecord::CellDepth {
                cell,
                mock: mock.clone(),
            });
            state.stack.push_int(mock)
        }
    }
}

fn push_signature_mock<'ctx>(
    interp: &mut Interpreter<'ctx>,
    state: &mut VmState<'ctx>,
    hash: BV<'ctx>,
    signature: crate::symbolic::memory::CellSlice<'ctx>,
    pubkey: BV<'ctx>,
) -> Result<(), StepError> {
    let ctx = interp.ctx;
    let valid = interp.fresh_bool("sig_valid");
    state.mocks.push(MockRecord::Signature {
        hash,
        signature,
        pubkey,
        valid: valid.clone(),
    });
    state.stack.push_int(bool_to_int(ctx, &valid))
}

/// Hash mocks are unsigned 256-bit values inside the 257-bit int domain.
fn constrain_hash_range<'ctx>(state: &mut VmState<'ctx>, mock: &BV<'ctx>) {
    let ctx = mock.get_ctx();
    state.add_constraint(mock.bvsge(&int_zero(ctx)));
    let bound = BV::from_u64(ctx, 1, INT_BITS).bvshl(&int_val(ctx, 256));
    state.add_constraint(mock.bvslt(&bound));
}
