//! Per-invocation outcome

use crate::stager::FetchError;
use pyjit_sandbox::{RuntimeError, ValidationError};

/// How one invocation ended. Produced once, consumed by the reporter.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Success,
    ValidationRejected(ValidationError),
    FetchFailed(FetchError),
    RuntimeFailed(RuntimeError),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    /// Short stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::ValidationRejected(_) => "validation_rejected",
            ExecutionOutcome::FetchFailed(_) => "fetch_failed",
            ExecutionOutcome::RuntimeFailed(_) => "runtime_failed",
        }
    }
}

impl From<ValidationError> for ExecutionOutcome {
    fn from(e: ValidationError) -> Self {
        ExecutionOutcome::ValidationRejected(e)
    }
}

impl From<FetchError> for ExecutionOutcome {
    fn from(e: FetchError) -> Self {
        ExecutionOutcome::FetchFailed(e)
    }
}

impl From<RuntimeError> for ExecutionOutcome {
    fn from(e: RuntimeError) -> Self {
        ExecutionOutcome::RuntimeFailed(e)
    }
}
