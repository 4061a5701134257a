//! Transactional path-tree engine.
//!
//! A volume ([`FileSystem`]) holds a tree of directories and files. File
//! content is split into fixed-size clusters. Every mutation runs as a
//! [`UnitOfWork`]: in-memory state changes first, the backend persists it on
//! the [`Worker`] thread, and a backend failure rolls the transaction back and
//! restores the in-memory state exactly.
//!
//! ```text
//! FileSystem ──owns──▶ Tree (NodeId → Node)      in-memory, TxCell fields
//!      │
//!      └──owns──▶ Worker ──thread──▶ Box<dyn Backend>
//!                                      ├── SqliteBackend
//!                                      └── MemoryBackend
//! ```

pub mod backend;
pub mod cell;
pub mod cluster;
pub mod config;
mod directory;
pub mod error;
mod file;
pub mod filesystem;
pub mod node;
pub mod unit_of_work;
pub mod worker;

pub use backend::{
    Backend, BackendError, BackendOp, BackendResult, EntityRef, MemoryBackend, Query, Record,
    SqliteBackend,
};
pub use cell::TxCell;
pub use cluster::Cluster;
pub use config::{ConfigError, StoreConfig, VolumeConfig};
pub use error::{FsError, FsResult};
pub use filesystem::FileSystem;
pub use node::{NodePath, SEPARATOR};
pub use unit_of_work::UnitOfWork;
pub use worker::Worker;

pub use treefs_types::{ClusterId, NodeId, NodeKind, VolumeId};
