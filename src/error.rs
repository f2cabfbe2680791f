//! Error types for protocol declaration, registration, and dispatch.
//!
//! All failures are surfaced synchronously to the immediate caller and are
//! never retried: a dispatch failure means an implementation is missing, not
//! that a transient condition occurred. A failed dispatch never writes to any
//! cache.

use crate::protocol::Arity;

// =============================================================================
// Protocol Errors
// =============================================================================

/// Errors raised by protocol declaration, binding registration, and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A protocol was redeclared with a different operation set.
    ///
    /// Identical redeclaration is idempotent and does not raise this.
    DuplicateProtocol { name: String },

    /// A binding or static slot was supplied for an operation the protocol
    /// never declared. The registry is left unchanged.
    UnknownOperation { protocol: String, operation: String },

    /// No static, cached, registered, or default implementation exists for
    /// the receiver's type.
    NoImplementation { operation: String, type_name: String },

    /// Argument count outside the operation's declared arity family.
    ArityMismatch {
        operation: String,
        expected: Arity,
        actual: usize,
    },

    /// Error raised from inside a protocol implementation.
    Op { operation: String, message: String },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateProtocol { name } => {
                write!(f, "protocol '{}' already declared with a different shape", name)
            }
            Self::UnknownOperation { protocol, operation } => {
                write!(f, "protocol '{}' has no operation '{}'", protocol, operation)
            }
            Self::NoImplementation { operation, type_name } => {
                write!(f, "no implementation of '{}' for type '{}'", operation, type_name)
            }
            Self::ArityMismatch {
                operation,
                expected,
                actual,
            } => {
                write!(f, "'{}' takes {}, got {}", operation, expected, actual)
            }
            Self::Op { operation, message } => {
                write!(f, "'{}' failed: {}", operation, message)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, ProtocolError>;

impl ProtocolError {
    /// Build an implementation-level error for the given operation.
    ///
    /// Convenience for user callables that need to fail with a message.
    pub fn op(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Op {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_no_implementation() {
        let err = ProtocolError::NoImplementation {
            operation: "ls".to_string(),
            type_name: "int".to_string(),
        };
        assert_eq!(err.to_string(), "no implementation of 'ls' for type 'int'");
    }

    #[test]
    fn test_display_arity() {
        let err = ProtocolError::ArityMismatch {
            operation: "ls".to_string(),
            expected: Arity::Exact(1),
            actual: 3,
        };
        assert_eq!(err.to_string(), "'ls' takes exactly 1 argument, got 3");
    }

    #[test]
    fn test_op_constructor() {
        let err = ProtocolError::op("ls", "path not found");
        assert!(matches!(err, ProtocolError::Op { .. }));
        assert_eq!(err.to_string(), "'ls' failed: path not found");
    }
}
