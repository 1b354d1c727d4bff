//! Error types for twm IPC operations
//!
//! Errors are split by blast radius: `SpawnError`, `TransportError` and
//! `CommandError` end the operation they occurred in, while `DecodeError`
//! and `HandlerError` are confined to a single line and never stop a session.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by event handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The external tool could not be launched
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The executable is not on `$PATH` (or the given path does not exist)
    #[error("`{program}` not found - is the twm CLI installed and on PATH?")]
    NotFound { program: String },

    /// The executable exists but may not be executed
    #[error("Permission denied launching `{program}`")]
    PermissionDenied {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other OS-level launch failure
    #[error("Failed to launch `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without the requested pipe
    #[error("`{program}` was spawned without a {stream} pipe")]
    MissingPipe {
        program: String,
        stream: &'static str,
    },
}

impl SpawnError {
    pub(crate) fn from_io(program: &str, source: std::io::Error) -> Self {
        let program = program.to_string();
        match source.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound { program },
            std::io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program, source },
            _ => SpawnError::Io { program, source },
        }
    }
}

/// The protocol channel to a running child is broken
///
/// Unlike a `DecodeError`, this is fatal to the session: no further lines
/// can be trusted once the pipe itself fails.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading the tool's standard output failed
    #[error("Failed to read from tool stdout: {0}")]
    Read(#[source] std::io::Error),

    /// Waiting for the tool to exit failed
    #[error("Failed to wait for tool exit: {0}")]
    Wait(#[source] std::io::Error),

    /// Delivering a termination signal failed
    #[error("Failed to signal tool process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// The reader task ended without reporting why
    #[error("Stream reader stopped unexpectedly")]
    ReaderLost,
}

/// Why a single line could not be turned into an event
#[derive(Debug, Error)]
pub enum DecodeCause {
    #[error("not valid UTF-8: {0}")]
    InvalidUtf8(#[source] std::str::Utf8Error),

    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("expected a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("missing string field `name`")]
    MissingName,

    #[error("field `name` is empty")]
    EmptyName,

    #[error("field `data` must be an object, got {found}")]
    DataNotObject { found: &'static str },
}

/// A single malformed line; recoverable
#[derive(Debug, Error)]
#[error("Failed to decode event line {line:?}: {cause}")]
pub struct DecodeError {
    /// The offending line, terminator stripped
    ///
    /// Invalid UTF-8 is shown with replacement characters here only.
    pub line: String,
    #[source]
    pub cause: DecodeCause,
}

/// What went wrong inside a handler
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error(transparent)]
    Failed(BoxError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// A consumer handler failed for one event; recoverable
#[derive(Debug, Error)]
#[error("Handler for `{event}` failed: {source}")]
pub struct HandlerError {
    /// Name of the event being handled
    pub event: String,
    #[source]
    pub source: HandlerFailure,
}

/// Trailing bytes were dropped at end of stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stream ended inside a record; discarded {bytes} unterminated byte(s)")]
pub struct TruncatedStreamWarning {
    pub bytes: usize,
}

/// Errors from a one-shot `twm` query
#[derive(Debug, Error)]
pub enum CommandError {
    /// The tool is not installed
    #[error("`{program}` not found - is the twm CLI installed and on PATH?")]
    ToolNotFound { program: String },

    /// The tool exists but could not be launched
    #[error(transparent)]
    Launch(SpawnError),

    /// The tool exited with a non-zero status
    #[error("twm exited with {}: {message}", describe_exit(.code))]
    ProcessFailed { code: Option<i32>, message: String },

    /// The tool's output is not a valid response envelope
    #[error("Malformed response from twm: {reason}")]
    MalformedResponse { reason: String },

    /// The window manager answered with an error envelope
    #[error("twm rejected the request: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    /// The caller-supplied timeout elapsed; the child has been killed
    #[error("twm did not answer within {after:?}")]
    TimedOut { after: Duration },

    /// Collecting the tool's output failed
    #[error("Failed to collect twm output: {0}")]
    Io(#[source] std::io::Error),
}

impl From<SpawnError> for CommandError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::NotFound { program } => CommandError::ToolNotFound { program },
            other => CommandError::Launch(other),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// A streaming session ended abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Event stream transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
