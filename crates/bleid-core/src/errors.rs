//! Error types for identity and privacy operations
//!
//! [`GatewayError`] describes a single failed controller command. [`IdentityError`]
//! is the taxonomy surfaced to callers of the identity coordinator; it wraps
//! gateway failures according to the phase in which they happened.

use core::fmt;

use crate::types::{AdvHandle, IdentityIndex, LeAddress};

// ----------------------------------------------------------------------------
// Gateway Errors
// ----------------------------------------------------------------------------

/// Failure of a single command sent to the controller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("controller rejected command with status 0x{status:02x}")]
    Rejected { status: u8 },
    #[error("command timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

// ----------------------------------------------------------------------------
// Radio Targets
// ----------------------------------------------------------------------------

/// A radio operation that can be paused and resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RadioTarget {
    Advertising(AdvHandle),
    Scanner,
}

impl fmt::Display for RadioTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioTarget::Advertising(handle) => write!(f, "advertising set {}", handle),
            RadioTarget::Scanner => write!(f, "scanner"),
        }
    }
}

/// A radio operation that could not be re-enabled after an identity operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeFailure {
    pub target: RadioTarget,
    pub error: GatewayError,
}

impl fmt::Display for ResumeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

// ----------------------------------------------------------------------------
// Identity Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by identity operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid identity {index}")]
    InvalidIdentity { index: IdentityIndex },

    #[error("capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },

    #[error("identity {index} is busy")]
    IdentityBusy { index: IdentityIndex },

    #[error("identity {index} is still referenced by advertising or scanning")]
    IdentityInUse { index: IdentityIndex },

    #[error("address {address} is already registered")]
    DuplicateAddress { address: LeAddress },

    #[error("peer {peer} is not in the resolving list of identity {index}")]
    PeerNotFound {
        index: IdentityIndex,
        peer: LeAddress,
    },

    #[error("random source unavailable")]
    RandomUnavailable,

    #[error("private address generation failed after {attempts} attempts")]
    AddressGenerationFailed { attempts: u32 },

    #[error("failed to pause {target}: {source}")]
    PauseFailed {
        target: RadioTarget,
        source: GatewayError,
    },

    #[error("{} radio operation(s) failed to resume", .failures.len())]
    ResumeFailed { failures: Vec<ResumeFailure> },

    #[error("command 0x{opcode:04x} timed out after {duration_ms}ms")]
    GatewayTimeout { opcode: u16, duration_ms: u64 },

    #[error("command 0x{opcode:04x} failed: {source}")]
    CommandFailed { opcode: u16, source: GatewayError },

    #[error("pairing layer failed to clear bonds of identity {index}: {reason}")]
    PairingFailed { index: IdentityIndex, reason: String },

    #[error("operation on identity {index} was cancelled before it started")]
    OperationCancelled { index: IdentityIndex },

    #[error("coordinator shut down before the operation completed")]
    CoordinatorShutdown,

    #[error("invalid {what} format")]
    InvalidFormat { what: &'static str },
}

impl IdentityError {
    /// Map a failed command issued while updating identity state
    pub fn from_command(opcode: u16, error: GatewayError) -> Self {
        match error {
            GatewayError::Timeout { duration_ms } => {
                IdentityError::GatewayTimeout { opcode, duration_ms }
            }
            source => IdentityError::CommandFailed { opcode, source },
        }
    }

    /// Whether the failure may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::RandomUnavailable)
    }

    pub(crate) fn invalid_format(what: &'static str) -> Self {
        IdentityError::InvalidFormat { what }
    }
}

/// Result type for identity operations
pub type Result<T> = core::result::Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_mapping() {
        let timeout = IdentityError::from_command(0x2005, GatewayError::Timeout { duration_ms: 10 });
        assert_eq!(
            timeout,
            IdentityError::GatewayTimeout {
                opcode: 0x2005,
                duration_ms: 10
            }
        );

        let rejected = IdentityError::from_command(0x2005, GatewayError::Rejected { status: 0x0c });
        assert!(matches!(
            rejected,
            IdentityError::CommandFailed {
                opcode: 0x2005,
                source: GatewayError::Rejected { status: 0x0c }
            }
        ));
    }

    #[test]
    fn test_display() {
        let err = IdentityError::PauseFailed {
            target: RadioTarget::Advertising(AdvHandle::new(1)),
            source: GatewayError::Rejected { status: 0x0c },
        };
        assert_eq!(
            err.to_string(),
            "failed to pause advertising set 1: controller rejected command with status 0x0c"
        );

        let err = IdentityError::ResumeFailed {
            failures: vec![ResumeFailure {
                target: RadioTarget::Scanner,
                error: GatewayError::Timeout { duration_ms: 5 },
            }],
        };
        assert_eq!(err.to_string(), "1 radio operation(s) failed to resume");
        assert!(!err.is_transient());
        assert!(IdentityError::RandomUnavailable.is_transient());
    }
}
