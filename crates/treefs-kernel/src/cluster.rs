//! Fixed-size content blocks.

use treefs_types::{ClusterId, ClusterRecord, NodeId};

use crate::backend::{Backend, BackendResult, EntityRef, Record};

/// One chunk of a file's content, exactly `cluster_size` bytes once allocated.
#[derive(Clone, PartialEq, Eq)]
pub struct Cluster {
    id: ClusterId,
    owner: NodeId,
    seq: u32,
    data: Vec<u8>,
}

impl Cluster {
    pub fn new(owner: NodeId, seq: u32, data: Vec<u8>) -> Self {
        Self {
            id: ClusterId::new(),
            owner,
            seq,
            data,
        }
    }

    pub(crate) fn from_record(record: ClusterRecord) -> Self {
        Self {
            id: record.id,
            owner: record.owner_id,
            seq: record.seq,
            data: record.data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn record(&self) -> ClusterRecord {
        ClusterRecord {
            id: self.id,
            owner_id: self.owner,
            seq: self.seq,
            data: self.data.clone(),
        }
    }

    /// Persist this cluster. Returns it back for the owner's cluster list.
    ///
    /// Runs inside a worker job, so it commits or rolls back together with
    /// the rest of that job.
    pub fn allocate(self, backend: &mut dyn Backend) -> BackendResult<Self> {
        backend.insert(&Record::Cluster(self.record()))?;
        Ok(self)
    }

    /// Remove this cluster from the backend and drop its data.
    ///
    /// Returns the owning file. On failure the cluster is left untouched.
    pub fn free(&mut self, backend: &mut dyn Backend) -> BackendResult<NodeId> {
        backend.delete(&EntityRef::Cluster(self.id))?;
        self.data = Vec::new();
        Ok(self.owner)
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("seq", &self.seq)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendOp, MemoryBackend};
    use treefs_types::{NodeKind, NodeRecord, VolumeId, VolumeRecord};

    /// A backend holding one volume and one file, inside an open transaction.
    fn seeded() -> (MemoryBackend, NodeId) {
        let mut backend = MemoryBackend::new();
        let volume = VolumeId::new();
        let file = NodeId::new();
        backend.begin().unwrap();
        backend
            .insert(&Record::Volume(VolumeRecord {
                id: volume,
                label: "TEST".into(),
                cluster_size: 4,
                root_name: "root".into(),
            }))
            .unwrap();
        backend
            .insert(&Record::Node(NodeRecord {
                id: file,
                volume_id: volume,
                parent_id: None,
                name: "f".into(),
                kind: NodeKind::File,
                size: 4,
            }))
            .unwrap();
        (backend, file)
    }

    #[test]
    fn test_free_clears_data_and_names_owner() {
        let (mut backend, owner) = seeded();

        let mut cluster = Cluster::new(owner, 0, vec![7; 4]).allocate(&mut backend).unwrap();
        assert_eq!(backend.clusters_of(owner).len(), 1);
        assert_eq!(cluster.free(&mut backend).unwrap(), owner);
        backend.commit().unwrap();

        assert!(cluster.data().is_empty());
        assert!(backend.clusters_of(owner).is_empty());
    }

    #[test]
    fn test_failed_free_keeps_data() {
        let (mut backend, owner) = seeded();

        let mut cluster = Cluster::new(owner, 0, vec![7; 4]).allocate(&mut backend).unwrap();
        backend.fail_next(BackendOp::Delete);
        assert!(matches!(
            cluster.free(&mut backend),
            Err(BackendError::Injected(BackendOp::Delete))
        ));
        backend.rollback().unwrap();

        assert_eq!(cluster.data(), &[7; 4]);
        assert!(backend.clusters_of(owner).is_empty());
    }
}
