//! Shared identity and record types for treefs.
//!
//! A pure leaf crate: typed IDs and the logical row shapes a persistence
//! backend stores. It has no internal treefs dependencies.
//!
//! ```text
//! Volume (VolumeId)
//!     └── root Node (parent_id = None)
//!           └── Node (NodeId, kind = directory | file)
//!                 └── Cluster (ClusterId, owner_id, seq), files only
//! ```

pub mod ids;
pub mod record;

pub use ids::{ClusterId, NodeId, VolumeId};
pub use record::{ClusterRecord, NodeKind, NodeRecord, VolumeRecord};
