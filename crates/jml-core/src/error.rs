//! Error Types
//!
//! Standardized, serializable error type shared by the engine and its callers.
//!
//! # Example
//!
//! ```
//! use jml_core::{JmlError, Result};
//!
//! fn find_rule(id: &str) -> Result<String> {
//!     if id.is_empty() {
//!         return Err(JmlError::NotFound {
//!             resource: "TriggerRule".to_string(),
//!             id: None,
//!         });
//!     }
//!     Ok(format!("Rule {}", id))
//! }
//! # assert!(find_rule("").is_err());
//! ```

use serde::Serialize;
use thiserror::Error;

/// Standardized error type for the JML engine.
///
/// # Variants
///
/// - `ValidationError` - Input or configuration failed validation
/// - `NotFound` - Referenced configuration or request does not exist
/// - `InvalidTransition` - Lifecycle request state machine refused a transition
/// - `OutOfOrder` - Delta arrived with a timestamp not after the last applied one
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JmlError {
    /// Input validation failure.
    ///
    /// Aborts processing of the offending attribute only.
    #[error("Validation error on field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },

    /// Requested resource was not found.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        /// The type of resource that was not found (e.g., "TriggerRule")
        resource: String,
        /// Optional identifier of the resource
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Lifecycle request transition refused.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Delta delivered out of timestamp order for its identity.
    #[error("Out-of-order delta for identity {identity}")]
    OutOfOrder {
        /// Identity whose delta log rejected the append
        identity: String,
    },
}

/// Type alias for Results using `JmlError`.
pub type Result<T> = std::result::Result<T, JmlError>;

#[cfg(test)]
mod tests {
    use super::*;

    mod display_tests {
        use super::*;

        #[test]
        fn test_validation_display_format() {
            let error = JmlError::ValidationError {
                field: "employmentStatus".to_string(),
                message: "null rejected".to_string(),
            };
            assert_eq!(
                error.to_string(),
                "Validation error on field 'employmentStatus': null rejected"
            );
        }

        #[test]
        fn test_not_found_without_id() {
            let error = JmlError::NotFound {
                resource: "TriggerRule".to_string(),
                id: None,
            };
            assert_eq!(error.to_string(), "TriggerRule not found");
        }

        #[test]
        fn test_not_found_with_id() {
            let error = JmlError::NotFound {
                resource: "AttributeSource".to_string(),
                id: Some("isr-hris".to_string()),
            };
            assert_eq!(error.to_string(), "AttributeSource not found: isr-hris");
        }

        #[test]
        fn test_invalid_transition_display() {
            let error = JmlError::InvalidTransition {
                from: "completed".to_string(),
                to: "cancelled".to_string(),
            };
            assert!(error.to_string().contains("completed"));
            assert!(error.to_string().contains("cancelled"));
        }

        #[test]
        fn test_is_std_error() {
            let error = JmlError::OutOfOrder {
                identity: "identity-001".to_string(),
            };
            let _: &dyn std::error::Error = &error;
        }
    }

    mod serde_tests {
        use super::*;

        #[test]
        fn test_validation_serialization() {
            let error = JmlError::ValidationError {
                field: "name".to_string(),
                message: "empty".to_string(),
            };
            let json = serde_json::to_string(&error).unwrap();
            assert!(json.contains("\"type\":\"validation_error\""));
            assert!(json.contains("\"field\":\"name\""));
        }

        #[test]
        fn test_not_found_skips_none_id() {
            let error = JmlError::NotFound {
                resource: "Request".to_string(),
                id: None,
            };
            let json = serde_json::to_string(&error).unwrap();
            assert!(!json.contains("\"id\""));
        }

        #[test]
        fn test_out_of_order_serialization() {
            let error = JmlError::OutOfOrder {
                identity: "identity-001".to_string(),
            };
            let json = serde_json::to_string(&error).unwrap();
            assert!(json.contains("\"type\":\"out_of_order\""));
        }
    }
}
