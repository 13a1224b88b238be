use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// URL prefixes accepted at submission time.
pub const ACCEPTED_SCHEMES: &[&str] = &["http://", "https://"];

/// Unique identifier for a submitted extraction task.
///
/// Rendered as a hyphenated UUID v4.  Ids are generated once per submission
/// and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Externally observable task state.
///
/// `Unknown` is not a stored state; it is what callers see for ids with no
/// record (never issued, or already evicted).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
    Unknown,
}

impl TaskStatus {
    /// Returns `true` once no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

/// Snapshot returned by status queries and pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub status: TaskStatus,
    /// Present only in the `error` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatusView {
    pub fn processing() -> Self {
        Self { status: TaskStatus::Processing, error: None }
    }

    pub fn completed() -> Self {
        Self { status: TaskStatus::Completed, error: None }
    }

    pub fn unknown() -> Self {
        Self { status: TaskStatus::Unknown, error: None }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self { status: TaskStatus::Error, error: Some(detail.into()) }
    }
}

/// The file produced by a successful extraction.
///
/// `content` is reference counted, so handing the artifact to a response
/// body never copies the PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the extractor's working directory, as announced by
    /// its `Generated:` line.
    pub filename: String,
    pub content: Bytes,
}

impl Artifact {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self { filename: filename.into(), content: content.into() }
    }

    /// Final path component of [`Self::filename`], suitable for a download
    /// header.
    pub fn download_name(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("document.pdf")
    }
}

/// Why a task ended in the `error` state.
///
/// The `Display` output is the detail string shown to users verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    /// The extraction command could not be started at all.
    #[error("Subprocess error: {0}")]
    Launch(String),

    /// The command exited non-zero; `tail` holds its last output lines.
    #[error("Command failed with exit code {code}\n{tail}")]
    ExitCode { code: i32, tail: String },

    /// The command was killed without an exit code.
    #[error("Command terminated by signal\n{tail}")]
    Signalled { tail: String },

    /// Exit status zero but no `Generated:` line was printed.
    #[error("No Generated file found in output")]
    MissingMarker,

    #[error("Generated PDF not found at {path}")]
    MissingArtifact { path: String },

    #[error("Generated path escapes working directory: {name}")]
    EscapesWorkDir { name: String },

    #[error("Unexpected error: {0}")]
    Io(String),

    #[error("Unexpected error: worker panicked")]
    Panicked,

    #[error("Command timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Task cancelled")]
    Cancelled,
}

impl From<std::io::Error> for TaskFailure {
    fn from(e: std::io::Error) -> Self {
        TaskFailure::Io(e.to_string())
    }
}

/// Errors returned synchronously to the submitting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The URL does not start with an accepted scheme.
    #[error("Please enter a valid HTTP or HTTPS URL")]
    InvalidUrl,

    /// Every admission slot is held; the submission was not accepted.
    #[error("server busy: {running} tasks in flight (limit {limit})")]
    Busy { running: usize, limit: usize },

    /// The task store is full of tasks that are still processing.
    #[error("task store full (capacity {capacity})")]
    StoreFull { capacity: usize },
}

/// Check the only submission constraint: an `http://` or `https://` prefix.
pub fn validate_url(url: &str) -> Result<&str, CoordinatorError> {
    let url = url.trim();
    if ACCEPTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        Ok(url)
    } else {
        Err(CoordinatorError::InvalidUrl)
    }
}
