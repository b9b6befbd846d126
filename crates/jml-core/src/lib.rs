//! JML Core Library
//!
//! Shared types and traits for the identity lifecycle decision engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (engine-minted UUIDs and external keys)
//! - [`traits`] - Audit-join traits (Correlated)
//! - [`error`] - Standardized error types (JmlError)
//!
//! # Example
//!
//! ```
//! use jml_core::{CorrelationId, IdentityId, JmlError, Result};
//!
//! let identity = IdentityId::new("identity-001");
//! let correlation = CorrelationId::new("corr-42");
//!
//! fn example() -> Result<()> {
//!     Err(JmlError::NotFound { resource: "Identity".to_string(), id: None })
//! }
//! # assert_eq!(identity.as_str(), "identity-001");
//! # assert_eq!(correlation.to_string(), "corr-42");
//! # assert!(example().is_err());
//! ```

pub mod error;
pub mod ids;
pub mod traits;

pub use error::{JmlError, Result};
pub use ids::{
    ConflictId, CorrelationId, DeltaId, IdentityId, ParseIdError, RequestId, ResolutionId, RuleId,
    SourceId, TaskId, ViolationId,
};
pub use traits::Correlated;
