//! Engine error types.

use chrono::{DateTime, Utc};
use jml_core::{ConflictId, IdentityId, JmlError, RequestId, RuleId, SourceId, TaskId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::request::RequestStatus;

/// Errors returned by engine operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Malformed input or configuration.
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    /// The winning declaration's null policy rejected a null value.
    #[error("Null value for attribute '{attribute}' rejected by source {source_id}")]
    NullRejected {
        attribute: String,
        source_id: SourceId,
    },

    /// No active, in-scope source declares mastership of the attribute.
    #[error("No mastering source for attribute '{attribute}'")]
    NoMasteringSource { attribute: String },

    #[error("Attribute source not found: {0}")]
    SourceNotFound(SourceId),

    #[error("Trigger rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("Lifecycle request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Mastership conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    #[error("Provisioning task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Approval step {step} not found on request {request_id}")]
    StepNotFound { request_id: RequestId, step: u32 },

    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: &'static str, id: String },

    /// Delta timestamp not strictly after the last one applied for the identity.
    #[error("Out-of-order delta for identity {identity_id}: {received} is not after {last}")]
    OutOfOrderDelta {
        identity_id: IdentityId,
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// An id appears in both the added and removed set of one category.
    #[error("Invalid access plan: {category} '{id}' is both added and removed")]
    InvalidAccessPlan { category: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<EngineError> for JmlError {
    fn from(err: EngineError) -> Self {
        let not_found = |resource: &str, id: String| JmlError::NotFound {
            resource: resource.to_string(),
            id: Some(id),
        };
        match err {
            EngineError::Validation { field, message } => {
                JmlError::ValidationError { field, message }
            }
            EngineError::NullRejected { attribute, .. } => JmlError::ValidationError {
                field: attribute,
                message: "null value rejected by mastering source".to_string(),
            },
            EngineError::NoMasteringSource { attribute } => {
                not_found("MasteringSource", attribute)
            }
            EngineError::SourceNotFound(id) => not_found("AttributeSource", id.to_string()),
            EngineError::RuleNotFound(id) => not_found("TriggerRule", id.to_string()),
            EngineError::RequestNotFound(id) => not_found("LifecycleRequest", id.to_string()),
            EngineError::ConflictNotFound(id) => not_found("ConflictDetection", id.to_string()),
            EngineError::TaskNotFound(id) => not_found("ProvisioningTask", id.to_string()),
            EngineError::StepNotFound { request_id, step } => {
                not_found("ApprovalStep", format!("{request_id}#{step}"))
            }
            EngineError::AlreadyExists { resource, id } => JmlError::ValidationError {
                field: "id".to_string(),
                message: format!("{resource} already exists: {id}"),
            },
            EngineError::OutOfOrderDelta { identity_id, .. } => JmlError::OutOfOrder {
                identity: identity_id.to_string(),
            },
            EngineError::InvalidTransition { from, to } => JmlError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            EngineError::InvalidAccessPlan { category, id } => JmlError::ValidationError {
                field: category.to_string(),
                message: format!("'{id}' is both added and removed"),
            },
            EngineError::Config(e) => JmlError::ValidationError {
                field: "config".to_string(),
                message: e.to_string(),
            },
        }
    }
}
