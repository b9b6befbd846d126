//! Lifecycle requests: assembly, state machine and storage.
//!
//! - [`model`] - request, approval step and task types with the state machine
//! - [`assembler`] - builds a request from a triggered rule
//! - [`service`] - request storage and audited request operations

pub mod assembler;
pub mod model;
pub mod service;

pub use assembler::{effective_date, next_business_day, AssemblyInput, RequestAssembler};
pub use model::{
    ApprovalStatus, ApprovalStep, ChangeSet, LifecycleRequest, ProvisioningTask, RequestStatus,
    TaskKind, TaskOutcome, TaskStatus,
};
pub use service::{InMemoryRequestStore, LifecycleRequestService, RequestMutation, RequestStore};
