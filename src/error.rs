//! Error types for equiparar operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, EquipararError>;

/// Main error type for equiparar operations.
///
/// Conversion and verification failures carry enough context to identify the
/// offending parameter slot or configuration field without re-running.
///
/// # Examples
///
/// ```
/// use equiparar::error::EquipararError;
///
/// let err = EquipararError::LayoutMismatch {
///     slot: "interactions.0.linear_up".to_string(),
///     expected: 1024,
///     actual: 512,
/// };
/// assert!(err.to_string().contains("layout mismatch"));
/// ```
#[derive(Debug)]
pub enum EquipararError {
    /// Total element count of a parameter slot disagrees between the two
    /// layouts. Signals an irrep-layout incompatibility; conversion aborts.
    LayoutMismatch {
        /// Parameter slot path (dotted module path)
        slot: String,
        /// Element count expected by the target layout
        expected: usize,
        /// Element count found in the source
        actual: usize,
    },

    /// Tensor shapes don't match for the operation.
    ShapeMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape found
        actual: String,
    },

    /// Model is not tagged with the backend the operation requires.
    BackendMismatch {
        /// Backend the operation expected
        expected: String,
        /// Backend the model is tagged with
        actual: String,
    },

    /// Requested backend is not compiled into this build.
    BackendUnavailable {
        /// Backend name (e.g., "fused")
        backend: String,
    },

    /// Invalid hyperparameter value provided.
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Failed to parse a layout descriptor string.
    ParseError {
        /// Input that failed to parse
        input: String,
        /// What went wrong
        message: String,
    },

    /// I/O error (file not found, permission denied, etc.).
    Io(std::io::Error),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for EquipararError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquipararError::LayoutMismatch {
                slot,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Parameter layout mismatch at '{slot}': target layout holds {expected} elements, source holds {actual}"
                )
            }
            EquipararError::ShapeMismatch { expected, actual } => {
                write!(f, "Shape mismatch: expected {expected}, got {actual}")
            }
            EquipararError::BackendMismatch { expected, actual } => {
                write!(
                    f,
                    "Backend mismatch: operation requires a {expected} model, got {actual}"
                )
            }
            EquipararError::BackendUnavailable { backend } => {
                write!(f, "Backend not available in this build: {backend}")
            }
            EquipararError::InvalidHyperparameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid hyperparameter: {param} = {value}, expected {constraint}"
                )
            }
            EquipararError::ParseError { input, message } => {
                write!(f, "Cannot parse '{input}': {message}")
            }
            EquipararError::Io(e) => write!(f, "I/O error: {e}"),
            EquipararError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            EquipararError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EquipararError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EquipararError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EquipararError {
    fn from(e: std::io::Error) -> Self {
        EquipararError::Io(e)
    }
}

impl From<serde_json::Error> for EquipararError {
    fn from(e: serde_json::Error) -> Self {
        EquipararError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_mismatch_display() {
        let err = EquipararError::LayoutMismatch {
            slot: "products.1".to_string(),
            expected: 96,
            actual: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("products.1"));
        assert!(msg.contains("96"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_backend_unavailable_display() {
        let err = EquipararError::BackendUnavailable {
            backend: "fused".to_string(),
        };
        assert!(err.to_string().contains("fused"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = EquipararError::from(io);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_parse_error_display() {
        let err = EquipararError::ParseError {
            input: "32q0e".to_string(),
            message: "expected 'x' separator".to_string(),
        };
        assert!(err.to_string().contains("32q0e"));
    }
}
