//! Audit-Join Traits
//!
//! Every artifact the engine produces carries the correlation key of the delta that
//! caused it. This module provides the trait used to read that key generically.
//!
//! # Example
//!
//! ```
//! use jml_core::{Correlated, CorrelationId};
//!
//! struct Finding {
//!     correlation_id: CorrelationId,
//! }
//!
//! impl Correlated for Finding {
//!     fn correlation_id(&self) -> &CorrelationId {
//!         &self.correlation_id
//!     }
//! }
//!
//! let finding = Finding { correlation_id: CorrelationId::new("corr-1") };
//! assert!(finding.shares_correlation(&CorrelationId::new("corr-1")));
//! ```

use crate::ids::CorrelationId;

/// Trait for artifacts that carry an upstream correlation key.
///
/// # Object Safety
///
/// This trait is object-safe: `&dyn Correlated` can be used to join
/// heterogeneous artifacts (deltas, resolutions, requests) by key.
pub trait Correlated {
    /// Returns the correlation key propagated from the originating delta.
    fn correlation_id(&self) -> &CorrelationId;

    /// Returns true when this artifact belongs to the given correlation key.
    fn shares_correlation(&self, other: &CorrelationId) -> bool {
        self.correlation_id() == other
    }
}
