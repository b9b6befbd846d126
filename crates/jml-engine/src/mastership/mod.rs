//! Attribute mastership: which source is authoritative for an attribute.
//!
//! - [`source`] - attribute sources, declarations and the source registry
//! - [`resolver`] - the resolution algorithm
//! - [`conflict`] - conflict records awaiting administrator action

pub mod conflict;
pub mod resolver;
pub mod source;

pub use conflict::{
    ConflictDetection, ConflictKind, ConflictStatus, ConflictStore, InMemoryConflictStore,
};
pub use resolver::{
    DecidedBy, MastershipCandidate, MastershipComparator, MastershipResolution,
    MastershipResolver, ResolutionInput,
};
pub use source::{
    AttributeMastershipDeclaration, AttributeSource, AttributeSourceRegistry,
    InMemorySourceRegistry, MastershipKind, NullPolicy, PrecedenceKind, PrecedenceStrategy,
    SourceScope, TieBreakPolicy,
};
