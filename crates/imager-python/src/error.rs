//! Error types for the embedded interpreter host.
//!
//! Two tiers exist. [`HostError`] covers everything that can go wrong before
//! the guest runtime is touched; once pre-initialization starts, failures
//! terminate the process. [`GuestError`] is the structured form of the guest's
//! per-thread error slot, produced on demand after a facade operation returned
//! an empty handle.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up the interpreter host.
#[derive(Error, Debug)]
pub enum HostError {
    /// A host was already constructed in this process.
    #[error("Interpreter host already constructed in this process")]
    AlreadyInitialized,

    /// The guest runtime was initialized by someone other than the host.
    #[error("Guest runtime is already active outside of the interpreter host")]
    RuntimeAlreadyActive,

    /// A search path entry cannot be handed to the guest as text.
    #[error("Search path entry is not valid Unicode: {}", .0.display())]
    NonUnicodePath(PathBuf),

    /// The host configuration failed validation.
    #[error("Invalid host configuration: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for host setup.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// The facade operation a guest error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Module not found, syntax error, or the module raised while loading.
    Import,
    /// Name absent on the object.
    Attribute,
    /// The callable raised, or the arguments did not match.
    Call,
    /// The value is not representable as the requested host type.
    Conversion,
    /// Tuple slot assignment was rejected.
    Tuple,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Import => "import",
            FailureKind::Attribute => "attribute lookup",
            FailureKind::Call => "call",
            FailureKind::Conversion => "conversion",
            FailureKind::Tuple => "tuple assignment",
        };
        f.write_str(name)
    }
}

/// A guest exception lifted out of the per-thread error slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failed: {exception}: {message}")]
pub struct GuestError {
    /// Operation that failed.
    pub kind: FailureKind,

    /// Guest exception type name, e.g. `ModuleNotFoundError`.
    pub exception: String,

    /// Rendered exception value.
    pub message: String,
}

impl GuestError {
    /// Create a guest error.
    pub fn new(kind: FailureKind, exception: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            exception: exception.into(),
            message: message.into(),
        }
    }

    /// Whether the guest exception type has the given name.
    pub fn is(&self, exception: &str) -> bool {
        self.exception == exception
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_error_display() {
        let err = GuestError::new(
            FailureKind::Import,
            "ModuleNotFoundError",
            "No module named 'xyz'",
        );
        assert_eq!(
            err.to_string(),
            "import failed: ModuleNotFoundError: No module named 'xyz'"
        );
        assert!(err.is("ModuleNotFoundError"));
        assert!(!err.is("ImportError"));
    }

    #[test]
    fn test_host_error_display() {
        let err = HostError::NonUnicodePath(PathBuf::from("/opt/app"));
        assert_eq!(
            err.to_string(),
            "Search path entry is not valid Unicode: /opt/app"
        );

        let err = HostError::InvalidConfig("program_name is empty".into());
        assert!(err.to_string().contains("program_name is empty"));
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Attribute.to_string(), "attribute lookup");
        assert_eq!(FailureKind::Conversion.to_string(), "conversion");
    }
}
