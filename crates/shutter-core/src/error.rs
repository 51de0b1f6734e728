use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShutterError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("conflict updating {kind} {key}: the object has been modified")]
    Conflict { kind: &'static str, key: String },

    #[error("invalid object key '{0}': expected 'namespace/name' or 'name'")]
    InvalidKey(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("device API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("executing http request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid endpoint URL '{0}'")]
    InvalidEndpoint(String),

    #[error("deadline exceeded while {op}")]
    Timeout { op: String },

    /// The cause is folded into the message rather than exposed as
    /// `source()`, so `{:#}` chains don't repeat it.
    #[error("{op}: {cause}")]
    Context { op: String, cause: Box<ShutterError> },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ShutterError {
    /// Whether the scheduler should retry the pass with backoff.
    ///
    /// Misconfiguration (bad keys, bad config, bad endpoint URLs) will fail the
    /// same way on every attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            ShutterError::InvalidKey(_)
            | ShutterError::InvalidConfig(_)
            | ShutterError::InvalidEndpoint(_)
            | ShutterError::AlreadyExists { .. } => false,
            ShutterError::Context { cause, .. } => cause.is_retriable(),
            _ => true,
        }
    }

    /// The innermost error, skipping any operation context.
    pub fn root(&self) -> &ShutterError {
        match self {
            ShutterError::Context { cause, .. } => cause.root(),
            other => other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), ShutterError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), ShutterError::NotFound { .. })
    }
}

/// Attach the operation that was in flight to an error.
pub trait ResultExt<T> {
    fn op(self, op: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn op(self, op: impl Into<String>) -> Result<T> {
        self.map_err(|cause| ShutterError::Context {
            op: op.into(),
            cause: Box::new(cause),
        })
    }
}

pub type Result<T> = std::result::Result<T, ShutterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prefixed_to_message() {
        let err: Result<()> = Err(ShutterError::Http {
            status: 500,
            body: "boom".into(),
        });
        let err = err.op("reading status").unwrap_err();
        assert_eq!(err.to_string(), "reading status: HTTP 500: boom");
    }

    #[test]
    fn nested_context_keeps_root() {
        let err: Result<()> = Err(ShutterError::Conflict {
            kind: "MoveRequest",
            key: "default/r1".into(),
        });
        let err = err.op("updating status").op("reconciling").unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retriable());
    }

    #[test]
    fn config_errors_are_terminal() {
        assert!(!ShutterError::InvalidConfig("workers".into()).is_retriable());
        let wrapped: Result<()> = Err(ShutterError::InvalidEndpoint("::".into()));
        assert!(!wrapped.op("connecting").unwrap_err().is_retriable());
    }

    #[test]
    fn timeout_is_retriable() {
        let err = ShutterError::Timeout {
            op: "reading status".into(),
        };
        assert!(err.is_retriable());
        assert_eq!(err.to_string(), "deadline exceeded while reading status");
    }
}
