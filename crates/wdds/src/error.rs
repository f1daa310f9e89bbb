// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Error surface for the publication API.
//!
//! All fallible operations return enumerated result values; the core never
//! unwinds for control flow. Infrastructure-plane conditions (missed
//! deadlines, lost liveliness, incompatible QoS) do not surface here - they
//! update status structs and fire listener callbacks instead.

/// Errors returned by wdds publication operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Parameter / precondition errors
    // ========================================================================
    /// An argument is malformed (nil handle where one is required, handle on
    /// an unkeyed topic, zero history depth, ...).
    BadParameter(String),
    /// The entity is not in the state the operation requires (stale instance
    /// handle, keep_last writer under a coherent publisher, ...).
    PreconditionNotMet(String),
    /// QoS policy combination is invalid.
    InconsistentPolicy(String),
    /// Attempt to change a policy that is immutable after creation.
    ImmutablePolicy,

    // ========================================================================
    // Lifecycle errors
    // ========================================================================
    /// Operation requires an enabled entity.
    NotEnabled,
    /// The entity has already been closed or deleted.
    AlreadyDeleted,
    /// Operation is not legal for this entity configuration.
    IllegalOperation(String),

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// A resource limit was reached (max_instances, pool exhaustion, ...).
    OutOfResources(String),
    /// A blocking operation exceeded its deadline.
    Timeout,
    /// Non-blocking path would have to wait (internal; blocking callers map
    /// this to waiting or `Timeout`).
    WouldBlock,

    // ========================================================================
    // Data errors
    // ========================================================================
    /// Sample serialization or key extraction failed.
    Serialization,
    /// Requested data does not exist.
    NoData,

    // ========================================================================
    // Other
    // ========================================================================
    /// Requested feature or operation is not supported.
    Unsupported,
    /// Denied by the security plugin boundary.
    NotAllowedBySecurity,
    /// Generic failure (backwards source timestamp, oversized synchronous
    /// sample, persistence backend fault, ...).
    Generic(String),
    /// I/O error from a backend with underlying cause.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::InconsistentPolicy(msg) => write!(f, "Inconsistent policy: {}", msg),
            Error::ImmutablePolicy => write!(f, "Policy is immutable after creation"),
            Error::NotEnabled => write!(f, "Entity is not enabled"),
            Error::AlreadyDeleted => write!(f, "Entity already deleted"),
            Error::IllegalOperation(msg) => write!(f, "Illegal operation: {}", msg),
            Error::OutOfResources(msg) => write!(f, "Out of resources: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::WouldBlock => write!(f, "Operation would block"),
            Error::Serialization => write!(f, "Sample serialization failed"),
            Error::NoData => write!(f, "No data"),
            Error::Unsupported => write!(f, "Unsupported operation"),
            Error::NotAllowedBySecurity => write!(f, "Not allowed by security"),
            Error::Generic(msg) => write!(f, "{}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(format!("{}", Error::Timeout), "Operation timed out");
        assert_eq!(format!("{}", Error::NotEnabled), "Entity is not enabled");
        assert!(format!("{}", Error::BadParameter("nil handle".into())).contains("nil handle"));
    }

    #[test]
    fn test_io_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::from(io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
