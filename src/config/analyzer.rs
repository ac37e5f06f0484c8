use serde::{Deserialize, Serialize};

/// Default compute-phase gas budget per contract invocation.
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// Hard cap on entries walked out of the pending-action list.
pub const MAX_ACTIONS: usize = 255;

/// Default per-method recursion cap before a state is dropped.
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

/// Default bound on interpreter steps across one analysis run.
pub const DEFAULT_STEP_BUDGET: usize = 200_000;

/// Default z3 wall-clock timeout per check, in milliseconds.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u32 = 15_000;

/// Message forward-fee parameters (masterchain defaults, config param 25 shape).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FwdPrices {
    pub lump_price: u64,
    pub bit_price: u64,
    pub cell_price: u64,
}

impl Default for FwdPrices {
    fn default() -> Self {
        Self {
            lump_price: 400_000,
            bit_price: 26_214_400,
            cell_price: 2_621_440_000,
        }
    }
}

/// How the engine treats destination addresses it cannot prove belong to a
/// loaded contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalAddressPolicy {
    /// Keep messages to unknown destinations as unprocessed results.
    Permissive,
    /// Flag them as a soft well-formedness failure.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerOptions {
    pub gas_limit: u64,
    pub recursion_limit: usize,
    pub step_budget: usize,
    pub max_actions: usize,
    pub solver_timeout_ms: u32,
    pub multi_contract: bool,
    pub external_addresses: ExternalAddressPolicy,
    pub fwd_prices: FwdPrices,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            step_budget: DEFAULT_STEP_BUDGET,
            max_actions: MAX_ACTIONS,
            solver_timeout_ms: DEFAULT_SOLVER_TIMEOUT_MS,
            multi_contract: false,
            external_addresses: ExternalAddressPolicy::Permissive,
            fwd_prices: FwdPrices::default(),
        }
    }
}
