//! Shared error taxonomy.
//!
//! Every fallible core operation returns `Result<T, Error>`. Each layer
//! catches only what it can handle; the retry orchestrator only retries
//! `recoverable() == true` errors.

use std::fmt;

use thiserror::Error;

/// The kind of failure, independent of where it occurred.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure, process spawn failure, timeout. Recoverable.
    #[error("system error: {0}")]
    System(String),

    /// Transient cache-peer unreachable. Recoverable.
    #[error("network error: {0}")]
    Network(String),

    /// OOM, FD exhaustion. Recoverable with backoff.
    #[error("resource error: {0}")]
    Resource(String),

    /// Missing compiler, wrong toolchain version. Not recoverable.
    #[error("environment error: {0}")]
    Environment(String),

    /// Compile error, linker error, test failure. Not recoverable.
    #[error("build error: {0}")]
    Build(String),

    /// Malformed config, unknown dependency, cycle. Not recoverable.
    #[error("config error: {0}")]
    Config(String),

    /// Corrupt cache, bad checkpoint, signature mismatch. Not recoverable;
    /// the affected store resets rather than propagating failure upward.
    #[error("integrity error: {0}")]
    Integrity(String),
}

/// The taxonomy category alone, used by the retry orchestrator's per-category
/// policy table without needing the error's message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    System,
    Network,
    Resource,
    Environment,
    Build,
    Config,
    Integrity,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::System => "system",
            ErrorCategory::Network => "network",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Environment => "environment",
            ErrorCategory::Build => "build",
            ErrorCategory::Config => "config",
            ErrorCategory::Integrity => "integrity",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::System(_) => ErrorCategory::System,
            Error::Network(_) => ErrorCategory::Network,
            Error::Resource(_) => ErrorCategory::Resource,
            Error::Environment(_) => ErrorCategory::Environment,
            Error::Build(_) => ErrorCategory::Build,
            Error::Config(_) => ErrorCategory::Config,
            Error::Integrity(_) => ErrorCategory::Integrity,
        }
    }

    /// Whether the retry orchestrator should consider re-attempting the
    /// operation that produced this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::System | ErrorCategory::Network | ErrorCategory::Resource
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
