//! Tree-level error types.

use std::io;
use thiserror::Error;

use treefs_types::{NodeId, VolumeId};

use crate::backend::BackendError;

/// Error raised by file system and node operations.
///
/// Precondition failures (missing node, duplicate name, root protections) are
/// raised before any backend call. Backend failures surface as
/// [`FsError::PersistenceFailed`] after the transaction was rolled back and the
/// in-memory state restored.
#[derive(Debug, Error)]
pub enum FsError {
    /// A node with that name already exists. Carries the existing node so
    /// callers can decide to reuse it.
    #[error("path already exists: {path}")]
    AlreadyExists { path: String, existing: Option<NodeId> },

    /// The node does not exist (never created, or deleted).
    #[error("path does not exist: {0}")]
    PathDoesNotExist(String),

    /// The root directory cannot be deleted.
    #[error("path cannot be deleted: {0}")]
    CannotDelete(String),

    /// The root directory cannot be renamed.
    #[error("the root directory cannot be renamed")]
    RootCannotBeRenamed,

    /// `create` was called on a volume that is already persisted.
    #[error("file system already exists: {0}")]
    FileSystemAlreadyExists(VolumeId),

    /// The volume is not persisted (not created yet, or unknown id).
    #[error("file system does not exist: {0}")]
    FileSystemDoesNotExist(VolumeId),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Path has an empty segment.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Name is empty or contains a separator.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Move/copy target would orphan the root or create a cycle.
    #[error("cannot place {path} under {target}")]
    InvalidTarget { path: String, target: String },

    /// No volume id was given and the store does not hold exactly one.
    #[error("expected exactly one volume in the store, found {0}")]
    AmbiguousVolume(usize),

    /// Cluster size must be positive.
    #[error("invalid cluster size: {0}")]
    InvalidClusterSize(u32),

    /// The backend rejected a unit of work; it was rolled back and undone.
    #[error("persistence failed during {op}: {source}")]
    PersistenceFailed {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    /// The persistence worker has shut down.
    #[error("file system is closed")]
    Closed,

    /// I/O error (worker thread spawn, config files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Create an AlreadyExists error without an existing node handle.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists {
            path: path.into(),
            existing: None,
        }
    }

    /// Create an AlreadyExists error pointing at the existing node.
    pub fn already_exists_at(path: impl Into<String>, existing: NodeId) -> Self {
        Self::AlreadyExists {
            path: path.into(),
            existing: Some(existing),
        }
    }

    /// Create a PathDoesNotExist error.
    pub fn does_not_exist(path: impl Into<String>) -> Self {
        Self::PathDoesNotExist(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an InvalidName error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    /// Create an InvalidTarget error.
    pub fn invalid_target(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::InvalidTarget {
            path: path.into(),
            target: target.into(),
        }
    }

    /// Wrap a backend failure for the named operation.
    pub fn persistence(op: &'static str, source: BackendError) -> Self {
        Self::PersistenceFailed { op, source }
    }

    /// The existing node carried by an AlreadyExists error, if any.
    pub fn existing(&self) -> Option<NodeId> {
        match self {
            Self::AlreadyExists { existing, .. } => *existing,
            _ => None,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::PersistenceFailed { .. })
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::AlreadyExists { path, .. } => io::Error::new(io::ErrorKind::AlreadyExists, path),
            FsError::PathDoesNotExist(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::CannotDelete(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            FsError::RootCannotBeRenamed => io::Error::new(
                io::ErrorKind::PermissionDenied,
                "the root directory cannot be renamed",
            ),
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::NotAFile(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::InvalidPath(msg) | FsError::InvalidName(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            FsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Tree operation result type.
pub type FsResult<T> = Result<T, FsError>;
