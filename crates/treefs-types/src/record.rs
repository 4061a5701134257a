//! Persisted record shapes.
//!
//! These are the logical rows a backend stores. They carry no behavior beyond
//! conversion helpers; the kernel owns every invariant over them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ids::{ClusterId, NodeId, VolumeId};

/// Node variant as persisted in the `kind` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NodeKind {
    /// A directory: holds child nodes.
    #[strum(to_string = "directory", serialize = "dir")]
    Directory,
    /// A file: holds an ordered cluster list.
    File,
}

impl NodeKind {
    /// Convert to the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Directory => "directory",
            NodeKind::File => "file",
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }
}

/// Volume metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: VolumeId,
    pub label: String,
    pub cluster_size: u32,
    pub root_name: String,
}

/// A directory or file entry.
///
/// `parent_id` is `None` only for a volume's root. `size` is the recorded
/// byte length of a file's content and always 0 for directories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub volume_id: VolumeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
}

/// One fixed-size chunk of a file's content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub owner_id: NodeId,
    /// Position of this cluster within its file.
    pub seq: u32,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ClusterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRecord")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("seq", &self.seq)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_node_kind_strings() {
        assert_eq!(NodeKind::Directory.to_string(), "directory");
        assert_eq!(NodeKind::File.as_str(), "file");
        assert_eq!(NodeKind::from_str("DIR").unwrap(), NodeKind::Directory);
        assert_eq!(NodeKind::from_str("file").unwrap(), NodeKind::File);
        assert!(NodeKind::from_str("symlink").is_err());
    }

    #[test]
    fn test_node_record_serde_shape() {
        let record = NodeRecord {
            id: NodeId::new(),
            volume_id: VolumeId::new(),
            parent_id: None,
            name: "root".into(),
            kind: NodeKind::Directory,
            size: 0,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "directory");
        assert!(json["parent_id"].is_null());
        let back: NodeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_cluster_debug_hides_payload() {
        let record = ClusterRecord {
            id: ClusterId::new(),
            owner_id: NodeId::new(),
            seq: 2,
            data: vec![7; 4096],
        };
        let rendered = format!("{record:?}");
        assert!(rendered.contains("len: 4096"));
        assert!(!rendered.contains("7, 7"));
    }
}
