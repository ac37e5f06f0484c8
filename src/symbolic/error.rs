use crate::symbolic::outcome::{BoundsClass, VmFailure};

/// Error channel for one interpreted instruction.
///
/// `Vm` maps to the in-VM exception machinery (c2 / terminal exit codes);
/// `Fault` is an internal interpreter problem and discards only the
/// offending state, with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    Vm {
        failure: VmFailure,
        class: BoundsClass,
    },
    /// The solver answered unknown while deciding this step.
    Undecided {
        context: String,
    },
    Fault(StepFault),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFault {
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Instruction variant exists but its handler is explicit backlog.
    Unimplemented,
    /// An operand had to be concrete but the path left it symbolic.
    NonConcreteOperand,
    Internal,
}

impl StepError {
    pub fn vm(failure: VmFailure) -> Self {
        StepError::Vm {
            failure,
            class: BoundsClass::Real,
        }
    }

    pub fn structural(failure: VmFailure) -> Self {
        StepError::Vm {
            failure,
            class: BoundsClass::Structural,
        }
    }

    pub fn type_check() -> Self {
        Self::vm(VmFailure::TypeCheck)
    }

    pub fn underflow() -> Self {
        Self::vm(VmFailure::StackUnderflow)
    }

    pub fn undecided(context: impl Into<String>) -> Self {
        StepError::Undecided {
            context: context.into(),
        }
    }

    pub fn unimplemented(what: impl Into<String>) -> Self {
        StepError::Fault(StepFault {
            kind: FaultKind::Unimplemented,
            message: what.into(),
        })
    }

    pub fn non_concrete(what: impl Into<String>) -> Self {
        StepError::Fault(StepFault {
            kind: FaultKind::NonConcreteOperand,
            message: what.into(),
        })
    }

    pub fn internal(what: impl Into<String>) -> Self {
        StepError::Fault(StepFault {
            kind: FaultKind::Internal,
            message: what.into(),
        })
    }
}

impl From<VmFailure> for StepError {
    fn from(failure: VmFailure) -> Self {
        StepError::vm(failure)
    }
}

/// Lifts an `Option` whose absence means an internal fault, mirroring the
/// "fail the state, not the process" discipline.
pub fn require_concrete<T>(value: Option<T>, what: &str) -> Result<T, StepError> {
    value.ok_or_else(|| StepError::non_concrete(what.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_error_defaults_to_real_class() {
        let err = StepError::vm(VmFailure::CellUnderflow);
        assert_eq!(
            err,
            StepError::Vm {
                failure: VmFailure::CellUnderflow,
                class: BoundsClass::Real
            }
        );
    }

    #[test]
    fn test_require_concrete_reports_fault_kind() {
        let missing: Option<u64> = None;
        match require_concrete(missing, "ref count") {
            Err(StepError::Fault(fault)) => {
                assert_eq!(fault.kind, FaultKind::NonConcreteOperand);
                assert!(fault.message.contains("ref count"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
