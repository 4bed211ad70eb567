//! Error types for the embedded script runtime.

use crate::runtime::registry::TimerId;
use std::fmt;
use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostic for a failure raised by script code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ScriptFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: Option<String>, line: Option<u32>) -> Self {
        self.file = file;
        self.line = line;
        self
    }
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({}:{})", self.message, file, line),
            (Some(file), None) => write!(f, "{} ({})", self.message, file),
            (None, Some(line)) => write!(f, "{} (line {})", self.message, line),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Main error type for the runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Script code threw.
    #[error("Script error: {0}")]
    Script(ScriptFailure),

    /// The engine rejected a call made against it.
    #[error("Engine usage error: {0}")]
    Usage(String),

    /// A deferred invocation carried an argument the engine cannot represent.
    #[error("Argument resolution failed: {0}")]
    Resolution(String),

    /// Broken runtime invariant (stale value handle, double release, ...).
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The ingress queue no longer accepts work.
    #[error("Runtime has been shut down")]
    Shutdown,

    #[error("Unknown timer id {0}")]
    UnknownTimer(TimerId),

    /// The owner thread could not be started.
    #[error("Failed to spawn runtime thread: {0}")]
    Spawn(String),

    /// The owner thread exited abnormally.
    #[error("Runtime thread terminated: {0}")]
    Terminated(String),
}

impl Error {
    /// Create a script error from a bare message.
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script(ScriptFailure::new(message))
    }

    /// Create an engine usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a resolution error.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    /// Create a contract violation.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Script-domain failures the event loop reports and survives.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Script(_) | Error::Usage(_) | Error::Resolution(_)
        )
    }

    /// Host-facing diagnostic for this error.
    pub fn to_failure(&self) -> ScriptFailure {
        match self {
            Error::Script(failure) => failure.clone(),
            other => ScriptFailure::new(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        assert!(Error::script("boom").is_recoverable());
        assert!(Error::usage("bad handle").is_recoverable());
        assert!(Error::resolution("array").is_recoverable());
        assert!(!Error::contract("double release").is_recoverable());
        assert!(!Error::Shutdown.is_recoverable());
        assert!(!Error::config("heap").is_recoverable());
    }

    #[test]
    fn test_failure_display() {
        let failure = ScriptFailure::new("Uncaught Error: boom").at(Some("main.js".into()), Some(3));
        assert_eq!(failure.to_string(), "Uncaught Error: boom (main.js:3)");
        assert_eq!(
            ScriptFailure::new("oops").at(None, Some(7)).to_string(),
            "oops (line 7)"
        );
    }

    #[test]
    fn test_to_failure_keeps_location() {
        let err = Error::Script(ScriptFailure::new("x").at(Some("a.js".into()), Some(1)));
        let failure = err.to_failure();
        assert_eq!(failure.file.as_deref(), Some("a.js"));
        assert_eq!(failure.line, Some(1));

        let failure = Error::resolution("unsupported argument type 'array'").to_failure();
        assert!(failure.message.contains("array"));
        assert!(failure.file.is_none());
    }
}
