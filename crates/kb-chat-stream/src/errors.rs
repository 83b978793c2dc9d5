/// Message used when the backend fails without telling us why.
pub const DEFAULT_SERVER_ERROR: &str = "The server is temporarily unavailable, please try again later";

/// Message used when an `error` event carries no readable message.
pub const DEFAULT_STREAM_ERROR: &str = "stream response error";

/// Errors raised by a transport before or while frames are being read.
///
/// These never leave the crate directly; the session controller folds them
/// into a [`ChatFailure`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The stream did not open within the connect timeout.
    #[error("connect timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// The backend answered, but not with an event stream.
    #[error("stream rejected: {message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },
    /// Network or body read failure.
    #[error("transport error: {message}")]
    Io { message: String },
    /// The request could not be constructed at all. Never retried.
    #[error("fatal transport error: {message}")]
    Fatal { message: String },
}

impl TransportError {
    /// Creates an open-time rejection.
    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates an I/O failure.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a fatal failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> String {
        match self {
            Self::Timeout { .. } => self.to_string(),
            Self::Rejected { message, .. } | Self::Io { message } | Self::Fatal { message } => {
                message.clone()
            }
        }
    }

    pub(crate) fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::ConnectTimeout,
            Self::Rejected { .. } => FailureKind::OpenRejected,
            Self::Io { .. } | Self::Fatal { .. } => FailureKind::Transport,
        }
    }
}

/// Category of a failed chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No successful open within the connect timeout.
    ConnectTimeout,
    /// Bad status or content type when the stream opened.
    OpenRejected,
    /// Mid-stream network failure.
    Transport,
    /// The backend sent an `error` event.
    Stream,
}

/// Failure half of a session result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ChatFailure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Message suitable for showing to the user.
    pub message: String,
    /// Answer text accumulated before the failure.
    pub partial_text: String,
}

impl ChatFailure {
    pub(crate) fn new(
        kind: FailureKind,
        message: impl Into<String>,
        partial_text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            partial_text: partial_text.into(),
        }
    }
}

/// Top-level error type for the public chat API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to the run builder.
    #[error("validation error: {0}")]
    Validation(String),
    /// The session started and finalized as a failure.
    #[error(transparent)]
    Failed(ChatFailure),
}

impl ChatError {
    /// Returns the failure when the session itself failed.
    pub fn failure(&self) -> Option<&ChatFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns the answer text produced before the failure, if any.
    pub fn partial_text(&self) -> &str {
        self.failure().map_or("", |f| f.partial_text.as_str())
    }
}

impl From<ChatFailure> for ChatError {
    fn from(value: ChatFailure) -> Self {
        ChatError::Failed(value)
    }
}

const MESSAGE_PATHS: &[&[&str]] = &[
    &["message"],
    &["data", "message"],
    &["response", "data", "message"],
    &["response", "message"],
    &["msg"],
    &["error", "message"],
    &["statusText"],
];

/// Extracts a human-readable message from a JSON error value.
///
/// Strings are used as-is; objects are probed for the usual message fields.
/// Empty results fall back to `default`.
pub fn error_text(value: &serde_json::Value, default: &str) -> String {
    if let Some(text) = value.as_str() {
        return non_empty_or(text, default);
    }
    for path in MESSAGE_PATHS {
        let mut current = Some(value);
        for key in *path {
            current = current.and_then(|v| v.get(*key));
        }
        if let Some(text) = current.and_then(|v| v.as_str())
            && !text.trim().is_empty()
        {
            return text.to_string();
        }
    }
    default.to_string()
}

pub(crate) fn non_empty_or(text: &str, default: &str) -> String {
    if text.trim().is_empty() {
        default.to_string()
    } else {
        text.to_string()
    }
}
