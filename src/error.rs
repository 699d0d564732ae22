//! Error taxonomy of the neutralization engine
//!
//! None of these abort a pass. The engine folds them into per-method
//! outcomes; the only place they surface as `Err` is the host seam.

use thiserror::Error;

use crate::model::MethodRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NeutralizeError {
    /// Class or method not present in the process
    #[error("{0} not found")]
    LookupMiss(String),

    /// Method already carries a replacement; treated as success
    #[error("{0} already neutralized")]
    InstallConflict(MethodRef),

    /// Host refused the install (native, abstract, final ...)
    #[error("cannot hook {method}: {reason}")]
    InstallUnsupported { method: MethodRef, reason: String },

    /// A neutralized factory was invoked and raised its marker error
    #[error("{message}")]
    MarkerRaised { method: MethodRef, message: String },
}

impl NeutralizeError {
    pub fn unsupported(method: MethodRef, reason: impl Into<String>) -> Self {
        NeutralizeError::InstallUnsupported { method, reason: reason.into() }
    }

    /// True for the errors that count as a successful install
    pub fn is_idempotent_success(&self) -> bool {
        matches!(self, NeutralizeError::InstallConflict(_))
    }

    /// True when this is the designed "capability withdrawn" signal
    pub fn is_marker(&self) -> bool {
        matches!(self, NeutralizeError::MarkerRaised { .. })
    }
}

pub type Result<T, E = NeutralizeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn mref() -> MethodRef {
        MethodRef { class: "a.B".to_string(), signature: "build()".to_string() }
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            NeutralizeError::LookupMiss("a.B".to_string()).to_string(),
            "a.B not found"
        );
        assert_eq!(
            NeutralizeError::unsupported(mref(), "native method").to_string(),
            "cannot hook a.B#build(): native method"
        );
        assert_eq!(
            NeutralizeError::MarkerRaised { method: mref(), message: "disabled".to_string() }.to_string(),
            "disabled"
        );
    }

    #[test]
    fn test_conflict_counts_as_success() {
        assert!(NeutralizeError::InstallConflict(mref()).is_idempotent_success());
        assert!(!NeutralizeError::unsupported(mref(), "final").is_idempotent_success());
        assert!(NeutralizeError::MarkerRaised { method: mref(), message: String::new() }.is_marker());
    }
}
