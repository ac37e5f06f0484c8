//! Terminal result kinds: VM exit codes, the soft well-formedness axis, and
//! the structural-vs-real classification for bounds failures.

use serde::{Deserialize, Serialize};

/// VM-defined hard failure with a stable numeric exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmFailure {
    StackUnderflow,
    StackOverflow,
    IntegerOverflow,
    RangeCheck,
    InvalidOpcode,
    TypeCheck,
    CellOverflow,
    CellUnderflow,
    DictError,
    OutOfGas,
    InsufficientFunds,
    Custom(i32),
}

impl VmFailure {
    pub fn exit_code(&self) -> i32 {
        match self {
            VmFailure::StackUnderflow => 2,
            VmFailure::StackOverflow => 3,
            VmFailure::IntegerOverflow => 4,
            VmFailure::RangeCheck => 5,
            VmFailure::InvalidOpcode => 6,
            VmFailure::TypeCheck => 7,
            VmFailure::CellOverflow => 8,
            VmFailure::CellUnderflow => 9,
            VmFailure::DictError => 10,
            VmFailure::OutOfGas => -14,
            VmFailure::InsufficientFunds => 37,
            VmFailure::Custom(code) => *code,
        }
    }
}

/// Violations of the add-on well-formedness policy. Same exit surface as a
/// hard failure but kept on a parallel axis so callers may downgrade them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoftFailure {
    /// Message built with a deprecated (non `addr_std`) destination encoding.
    DeprecatedAddressEncoding,
    /// Remaining balance sent twice in one action phase.
    DoubleSendRemainingValue,
}

/// Whether a bounds failure blames the contract or the generated input.
///
/// The same exit code (cell underflow/overflow) can mean "contract bug" or
/// "malformed input we synthesized"; the two are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundsClass {
    /// The violated length was concrete, or violation is unavoidable.
    Real,
    /// The violation only occurs for specific unknown-input instantiations.
    Structural,
}

/// Why a state stopped executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalKind {
    /// Normal (exit 0) or alternate (exit 1) success.
    Success { alt: bool },
    /// Hard VM failure with its classification where applicable.
    Failure {
        failure: VmFailure,
        class: BoundsClass,
    },
    /// Well-formedness policy violation.
    Soft(SoftFailure),
    /// The solver answered unknown while deciding reachability; the state is
    /// reported in its own bucket rather than guessed either way.
    Undecided { context: String },
}

impl TerminalKind {
    pub fn failure(failure: VmFailure) -> Self {
        TerminalKind::Failure {
            failure,
            class: BoundsClass::Real,
        }
    }

    pub fn structural(failure: VmFailure) -> Self {
        TerminalKind::Failure {
            failure,
            class: BoundsClass::Structural,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            TerminalKind::Success { alt: false } => 0,
            TerminalKind::Success { alt: true } => 1,
            TerminalKind::Failure { failure, .. } => failure.exit_code(),
            TerminalKind::Soft(_) => 0,
            TerminalKind::Undecided { .. } => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalKind::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(VmFailure::StackUnderflow.exit_code(), 2);
        assert_eq!(VmFailure::TypeCheck.exit_code(), 7);
        assert_eq!(VmFailure::CellUnderflow.exit_code(), 9);
        assert_eq!(VmFailure::OutOfGas.exit_code(), -14);
        assert_eq!(VmFailure::Custom(777).exit_code(), 777);
    }

    #[test]
    fn test_structural_and_real_never_compare_equal() {
        let real = TerminalKind::failure(VmFailure::CellUnderflow);
        let structural = TerminalKind::structural(VmFailure::CellUnderflow);
        assert_ne!(real, structural);
        assert_eq!(real.exit_code(), structural.exit_code());
    }
}
