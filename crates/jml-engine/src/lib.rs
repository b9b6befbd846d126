//! Identity lifecycle (joiner/mover/leaver) decision engine.
//!
//! This crate turns attribute changes reported by authoritative sources into
//! governed lifecycle requests.
//!
//! # Features
//!
//! - Attribute mastership resolution across competing sources
//! - Conflict detection for unresolvable mastership situations
//! - Prioritized trigger rules with transition and date-window conditions
//! - A boolean predicate language for custom conditions
//! - Birthright access policies and separation-of-duties checks
//! - Risk scoring for lifecycle actions
//! - Request assembly with approval chains, effective dates and provisioning tasks
//! - Audit logging for every decision
//!
//! # Modules
//!
//! - [`engine`] - [`LifecycleEngine`], the entry point wiring everything together
//! - [`mastership`] - sources, declarations, the resolver and conflicts
//! - [`trigger`] - rules, the evaluator, rule storage and firing metrics
//! - [`predicate`] - the custom-condition expression language
//! - [`policy`] - birthright policies and `SoD` rules
//! - [`request`] - lifecycle requests, their state machine and assembly
//! - [`risk`] - action risk scoring
//! - [`audit`] - [`audit::AuditStore`] and its in-memory implementation
//!
//! # Example
//!
//! ```
//! use jml_engine::risk::RiskScorer;
//! use jml_engine::{ActionType, EngineConfig, RiskLevel};
//!
//! let scorer = RiskScorer::from_config(&EngineConfig::default());
//! let score = scorer.score(ActionType::Leaver, "employmentStatus", RiskLevel::Low, 0);
//! assert!(score.total <= 100);
//! ```

pub mod access_plan;
pub mod audit;
pub mod clock;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod identity;
pub mod mastership;
pub mod policy;
pub mod predicate;
pub mod request;
pub mod risk;
pub mod trigger;
pub mod types;
pub mod values;

// Re-export commonly used types
pub use access_plan::AccessPlan;
pub use config::{ConfigError, EngineConfig};
pub use delta::AttributeDelta;
pub use engine::{
    AccessPlanning, DeltaEvaluation, EngineStores, LifecycleEngine, ProcessOutcome,
};
pub use error::{EngineError, Result};
pub use identity::{IdentitySnapshot, SourceValue};
pub use mastership::{AttributeSource, ConflictDetection, MastershipResolution};
pub use policy::{BirthrightPolicy, SodRule, SodViolation};
pub use request::{LifecycleRequest, RequestStatus};
pub use risk::{RiskScore, RiskScorer};
pub use trigger::{TriggerEvaluation, TriggerOutputSpec, TriggerRule};
pub use types::{ActionType, Approver, LogicalOperator, RiskLevel, Severity};

pub use jml_core::{
    ConflictId, Correlated, CorrelationId, DeltaId, IdentityId, RequestId, ResolutionId, RuleId,
    SourceId, TaskId, ViolationId,
};
