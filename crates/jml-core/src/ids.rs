//! Strongly Typed Identifiers
//!
//! Two families of identifiers are used by the engine:
//!
//! - Engine-minted identifiers (`RequestId`, `DeltaId`, ...) wrap a random UUID.
//! - Externally assigned keys (`IdentityId`, `SourceId`, `RuleId`, `CorrelationId`)
//!   wrap the string handed to us by the system of record or administrator.
//!
//! Both are newtypes so that an identity key can never be passed where a
//! source key is expected.
//!
//! # Example
//!
//! ```
//! use jml_core::{IdentityId, RequestId, SourceId};
//!
//! let identity = IdentityId::new("identity-001");
//! let source = SourceId::new("isr-hris");
//! let request = RequestId::new();
//!
//! fn requires_identity(id: &IdentityId) -> String {
//!     id.to_string()
//! }
//!
//! assert_eq!(requires_identity(&identity), "identity-001");
//! // requires_identity(&source); // This would not compile!
//! # let _ = (source, request);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a UUID-backed identifier minted by the engine
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

/// Macro to define a string key assigned outside the engine
macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an externally assigned key.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the key, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        message: "key cannot be empty".to_string(),
                    });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_key!(
    /// Key of an identity in the identity directory (e.g. `identity-001`).
    IdentityId
);

define_key!(
    /// Key of an authoritative attribute source (e.g. `isr-hris`).
    SourceId
);

define_key!(
    /// Key of a trigger rule, assigned by the administrator who authored it.
    RuleId
);

define_key!(
    /// Upstream correlation key.
    ///
    /// Propagated unchanged into every artifact the engine produces so that audit
    /// records from different systems can be joined.
    CorrelationId
);

define_id!(
    /// Identifier of an ingested attribute delta.
    DeltaId
);

define_id!(
    /// Identifier of an immutable mastership resolution record.
    ResolutionId
);

define_id!(
    /// Identifier of a mastership conflict awaiting administrator action.
    ConflictId
);

define_id!(
    /// Identifier of an assembled lifecycle (JML) request.
    ///
    /// # Example
    ///
    /// ```
    /// use jml_core::RequestId;
    ///
    /// let id = RequestId::new();
    /// let parsed: RequestId = id.to_string().parse().unwrap();
    /// assert_eq!(id, parsed);
    /// ```
    RequestId
);

define_id!(
    /// Identifier of a provisioning task inside a lifecycle request.
    TaskId
);

define_id!(
    /// Identifier of a separation-of-duties violation.
    ViolationId
);
