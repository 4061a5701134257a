//! Persistence backend capability.
//!
//! The tree engine talks to storage only through [`Backend`]: four record
//! operations plus a transaction boundary. Backends know nothing about paths,
//! names, or invariants; they store and return rows.
//!
//! - [`SqliteBackend`] - durable storage in a SQLite database
//! - [`MemoryBackend`] - ephemeral tables, with fault injection for tests

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use strum::{Display, EnumString};
use thiserror::Error;

use treefs_types::{ClusterId, ClusterRecord, NodeId, NodeRecord, VolumeId, VolumeRecord};

/// Backend error type.
#[derive(Debug, Error)]
pub enum BackendError {
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An update or delete matched no row.
    #[error("no such entity: {0}")]
    Missing(String),

    /// An insert collided with an existing row.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Transaction boundary misuse (commit without begin, nested begin).
    #[error("transaction state: {0}")]
    Transaction(String),

    /// Failure injected by a test harness.
    #[error("injected failure on {0}")]
    Injected(BackendOp),
}

impl BackendError {
    /// Create a Missing error.
    pub fn missing(what: impl Into<String>) -> Self {
        Self::Missing(what.into())
    }

    /// Create a Conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create a Corrupt error.
    pub fn corrupt(what: impl Into<String>) -> Self {
        Self::Corrupt(what.into())
    }
}

/// Backend result type.
pub type BackendResult<T> = Result<T, BackendError>;

/// The backend operations, named for logging and fault injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackendOp {
    Select,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
}

/// What a `select` asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Query {
    /// One volume by id.
    Volume(VolumeId),
    /// Every volume in the store.
    Volumes,
    /// The root node of a volume.
    Root(VolumeId),
    /// One node by id.
    Node(NodeId),
    /// Direct children of a directory.
    Children(NodeId),
    /// Clusters of a file, ordered by `seq`.
    Clusters(NodeId),
}

/// A persisted row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Volume(VolumeRecord),
    Node(NodeRecord),
    Cluster(ClusterRecord),
}

impl Record {
    pub fn into_volume(self) -> Option<VolumeRecord> {
        match self {
            Record::Volume(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<NodeRecord> {
        match self {
            Record::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_cluster(self) -> Option<ClusterRecord> {
        match self {
            Record::Cluster(c) => Some(c),
            _ => None,
        }
    }

    /// Reference to the entity this row persists.
    pub fn entity(&self) -> EntityRef {
        match self {
            Record::Volume(v) => EntityRef::Volume(v.id),
            Record::Node(n) => EntityRef::Node(n.id),
            Record::Cluster(c) => EntityRef::Cluster(c.id),
        }
    }
}

/// Identifies one entity for `delete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Volume(VolumeId),
    Node(NodeId),
    Cluster(ClusterId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Volume(id) => write!(f, "volume {id}"),
            EntityRef::Node(id) => write!(f, "node {id}"),
            EntityRef::Cluster(id) => write!(f, "cluster {id}"),
        }
    }
}

/// Narrow CRUD capability over a persistent store.
///
/// All calls arrive from the single persistence worker thread, always inside
/// `begin` … `commit`/`rollback`, so implementations need no locking of their
/// own beyond what `Send` requires.
pub trait Backend: Send + 'static {
    /// Open a transaction.
    fn begin(&mut self) -> BackendResult<()>;

    /// Make every change since `begin` durable.
    fn commit(&mut self) -> BackendResult<()>;

    /// Discard every change since `begin`.
    fn rollback(&mut self) -> BackendResult<()>;

    /// Fetch rows. An empty result means "does not exist".
    fn select(&mut self, query: &Query) -> BackendResult<Vec<Record>>;

    /// Persist a new entity.
    fn insert(&mut self, record: &Record) -> BackendResult<()>;

    /// Persist mutated fields of an existing entity.
    fn update(&mut self, record: &Record) -> BackendResult<()>;

    /// Remove an entity.
    fn delete(&mut self, entity: &EntityRef) -> BackendResult<()>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn begin(&mut self) -> BackendResult<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> BackendResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> BackendResult<()> {
        (**self).rollback()
    }

    fn select(&mut self, query: &Query) -> BackendResult<Vec<Record>> {
        (**self).select(query)
    }

    fn insert(&mut self, record: &Record) -> BackendResult<()> {
        (**self).insert(record)
    }

    fn update(&mut self, record: &Record) -> BackendResult<()> {
        (**self).update(record)
    }

    fn delete(&mut self, entity: &EntityRef) -> BackendResult<()> {
        (**self).delete(entity)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
