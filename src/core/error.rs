//! Error taxonomy shared by every component.
//!
//! Errors are wrapped with context as they cross component boundaries
//! (`Error::context`), and `Error::kind` sees through the wrapping so
//! callers can still ask "was this a not-found?".

use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the runtime can report.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad argument shapes, nil marshal targets, invalid configuration.
    #[error("{0}")]
    BadParameter(String),

    /// A required resource or initialization is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The value shape or feature is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Something is already set and may not be set again.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Dialing or talking to a remote target failed.
    #[error("{target}: {source}")]
    ConnectionProblem {
        target: String,
        #[source]
        source: Box<Error>,
    },

    /// A byte stream ended.
    #[error("unexpected end of stream")]
    Eof,

    /// The owning process was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A remote (or local) command exited unsuccessfully.
    #[error("command `{command}` exited with {status}: {stderr}")]
    Remote {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A concurrent branch died without reporting a result.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Another error with a message describing where it happened.
    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

/// Error class, independent of how many context layers wrap it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadParameter,
    NotFound,
    NotImplemented,
    AlreadyExists,
    ConnectionProblem,
    Eof,
    Cancelled,
    Remote,
    Internal,
    Io,
    Yaml,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadParameter => "bad parameter",
            Self::NotFound => "not found",
            Self::NotImplemented => "not implemented",
            Self::AlreadyExists => "already exists",
            Self::ConnectionProblem => "connection problem",
            Self::Eof => "eof",
            Self::Cancelled => "cancelled",
            Self::Remote => "remote command failed",
            Self::Internal => "internal",
            Self::Io => "io",
            Self::Yaml => "yaml",
        };
        write!(f, "{}", s)
    }
}

impl Error {
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn connection_problem(target: impl Into<String>, source: Error) -> Self {
        Self::ConnectionProblem {
            target: target.into(),
            source: Box::new(source),
        }
    }

    /// Wrap this error with a description of the failing step.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::Context {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Class of the innermost non-context error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadParameter(_) => ErrorKind::BadParameter,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::ConnectionProblem { .. } => ErrorKind::ConnectionProblem,
            Self::Eof => ErrorKind::Eof,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => ErrorKind::Eof,
            Self::Io(_) => ErrorKind::Io,
            Self::Yaml(_) => ErrorKind::Yaml,
            Self::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind() == ErrorKind::Eof
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}

/// Attach context to a `Result` in one call.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(message))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sees_through_context() {
        let err = Error::already_exists("client already set")
            .context("bind copy")
            .context("host h1");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.is_already_exists());
        assert_eq!(
            err.to_string(),
            "host h1: bind copy: already exists: client already set"
        );
    }

    #[test]
    fn test_io_unexpected_eof_is_eof() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        let err: Error = io.into();
        assert!(err.is_eof());
        assert!(Error::Eof.context("scp").is_eof());
    }

    #[test]
    fn test_connection_problem_display() {
        let err = Error::connection_problem(
            "could not connect to h1:22",
            Error::bad_parameter("refused"),
        );
        assert_eq!(err.kind(), ErrorKind::ConnectionProblem);
        assert_eq!(err.to_string(), "could not connect to h1:22: refused");
    }

    #[test]
    fn test_result_ext_context() {
        let r: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = r.context("reading manifest").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().starts_with("reading manifest: "));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotImplemented.to_string(), "not implemented");
        assert_eq!(ErrorKind::AlreadyExists.to_string(), "already exists");
    }
}
