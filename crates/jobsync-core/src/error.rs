//! Error taxonomy for jobsync.
//!
//! Each layer has its own enum so callers can tell a transient remote
//! failure from a malformed job name, a broken template or a repository
//! that never settled.

use thiserror::Error;

/// Marker produced when a run is cancelled (Ctrl-C or deadline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Errors returned by the CI server, SCM and artifact-manager collaborators.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("cannot decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid url: {0}")]
    Url(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, 5xx, 429 and I/O errors are transient. Other
    /// statuses, decode errors, cancellation and missing or unreadable
    /// files are not.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transport(_) => true,
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            RemoteError::Decode { .. } | RemoteError::Url(_) | RemoteError::Cancelled(_) => false,
        }
    }
}

/// Result type for collaborator calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors from mapping job names back to branches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("malformed job name {job_name}: split on -continuous- yields {parts} part(s), expected 2")]
    MalformedJobName { job_name: String, parts: usize },
}

/// Errors from discovering, fetching or rendering job templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template references unknown field .{field}")]
    UnknownField { field: String },

    #[error("unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },

    #[error("unsupported job document root <{root}>")]
    UnsupportedDocument { root: String },

    #[error("xml error: {0}")]
    Xml(String),

    #[error("unexpected template location {path}")]
    Layout { path: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the per-branch artifact repository lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{step} failed for repository {repository_id}: {source}")]
    Remote {
        step: &'static str,
        repository_id: String,
        #[source]
        source: RemoteError,
    },

    #[error("repository {repository_id} is not yet visible")]
    NotSettled { repository_id: String },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Failures that abort the reconciliation of one (project, slug).
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("scm error for {project_key}/{slug}: {source}")]
    Scm {
        project_key: String,
        slug: String,
        #[source]
        source: RemoteError,
    },

    #[error("repository {project_key}/{slug} has no ssh clone url")]
    NoSshUrl { project_key: String, slug: String },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ReconcileError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconcileError::Cancelled(_))
    }
}
