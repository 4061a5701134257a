//! In-memory backend.
//!
//! Used for scratch volumes and testing. All data is lost when the last handle
//! is dropped. Handles are cheap clones sharing one store, so a test can keep
//! a handle after moving another into a file system, then inspect persisted
//! rows or arm failures.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use treefs_types::{ClusterId, ClusterRecord, NodeId, NodeRecord, VolumeId, VolumeRecord};

use super::{Backend, BackendError, BackendOp, BackendResult, EntityRef, Query, Record};

#[derive(Debug, Clone, Default)]
struct Tables {
    volumes: HashMap<VolumeId, VolumeRecord>,
    nodes: HashMap<NodeId, NodeRecord>,
    clusters: HashMap<ClusterId, ClusterRecord>,
}

impl Tables {
    /// Sibling names are unique per (volume, parent).
    fn name_taken(&self, node: &NodeRecord) -> bool {
        self.nodes.values().any(|n| {
            n.id != node.id
                && n.volume_id == node.volume_id
                && n.parent_id.is_some()
                && n.parent_id == node.parent_id
                && n.name == node.name
        })
    }
}

/// A pending injected failure: let `skip` calls of `op` succeed, then fail one.
#[derive(Debug, Clone, Copy)]
struct Fault {
    op: BackendOp,
    skip: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    /// Copy of `tables` taken at `begin`, restored on `rollback`.
    snapshot: Option<Tables>,
    faults: Vec<Fault>,
    calls: HashMap<BackendOp, usize>,
}

impl MemoryState {
    fn record_call(&mut self, op: BackendOp) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;

        let mut fired = false;
        self.faults.retain_mut(|fault| {
            if fired || fault.op != op {
                return true;
            }
            if fault.skip == 0 {
                fired = true;
                false
            } else {
                fault.skip -= 1;
                true
            }
        });

        if fired {
            Err(BackendError::Injected(op))
        } else {
            Ok(())
        }
    }

    fn require_transaction(&self) -> BackendResult<()> {
        if self.snapshot.is_none() {
            return Err(BackendError::Transaction("no open transaction".into()));
        }
        Ok(())
    }
}

/// In-memory backend with shared, inspectable state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: BackendOp) {
        self.fail_nth(op, 0);
    }

    /// Let `skip` calls of `op` succeed, then fail the one after.
    pub fn fail_nth(&self, op: BackendOp, skip: usize) {
        self.state.lock().faults.push(Fault { op, skip });
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Number of times `op` was invoked, including failed calls.
    pub fn calls(&self, op: BackendOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn volume(&self, id: VolumeId) -> Option<VolumeRecord> {
        self.state.lock().tables.volumes.get(&id).cloned()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.state.lock().tables.nodes.get(&id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().tables.nodes.len()
    }

    /// Persisted clusters of a file, ordered by `seq`.
    pub fn clusters_of(&self, owner: NodeId) -> Vec<ClusterRecord> {
        let state = self.state.lock();
        let mut clusters: Vec<ClusterRecord> = state
            .tables
            .clusters
            .values()
            .filter(|c| c.owner_id == owner)
            .cloned()
            .collect();
        clusters.sort_by_key(|c| c.seq);
        clusters
    }

    pub fn cluster_count(&self) -> usize {
        self.state.lock().tables.clusters.len()
    }

    /// True while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().snapshot.is_some()
    }
}

impl Backend for MemoryBackend {
    fn begin(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.record_call(BackendOp::Begin)?;
        if state.snapshot.is_some() {
            return Err(BackendError::Transaction("transaction already open".into()));
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.require_transaction()?;
        state.record_call(BackendOp::Commit)?;
        state.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        let snapshot = state
            .snapshot
            .take()
            .ok_or_else(|| BackendError::Transaction("no open transaction".into()))?;
        state.tables = snapshot;
        Ok(())
    }

    fn select(&mut self, query: &Query) -> BackendResult<Vec<Record>> {
        let mut state = self.state.lock();
        state.require_transaction()?;
        state.record_call(BackendOp::Select)?;
        let tables = &state.tables;

        let records = match *query {
            Query::Volume(id) => tables
                .volumes
                .get(&id)
                .cloned()
                .map(Record::Volume)
                .into_iter()
                .collect(),
            Query::Volumes => {
                let mut volumes: Vec<&VolumeRecord> = tables.volumes.values().collect();
                volumes.sort_by_key(|v| v.id);
                volumes.into_iter().cloned().map(Record::Volume).collect()
            }
            Query::Root(volume) => tables
                .nodes
                .values()
                .find(|n| n.volume_id == volume && n.parent_id.is_none())
                .cloned()
                .map(Record::Node)
                .into_iter()
                .collect(),
            Query::Node(id) => tables
                .nodes
                .get(&id)
                .cloned()
                .map(Record::Node)
                .into_iter()
                .collect(),
            Query::Children(parent) => {
                let mut children: Vec<&NodeRecord> = tables
                    .nodes
                    .values()
                    .filter(|n| n.parent_id == Some(parent))
                    .collect();
                children.sort_by(|a, b| a.name.cmp(&b.name));
                children.into_iter().cloned().map(Record::Node).collect()
            }
            Query::Clusters(owner) => {
                let mut clusters: Vec<&ClusterRecord> = tables
                    .clusters
                    .values()
                    .filter(|c| c.owner_id == owner)
                    .collect();
                clusters.sort_by_key(|c| c.seq);
                clusters.into_iter().cloned().map(Record::Cluster).collect()
            }
        };

        Ok(records)
    }

    fn insert(&mut self, record: &Record) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.require_transaction()?;
        state.record_call(BackendOp::Insert)?;
        let tables = &mut state.tables;

        match record {
            Record::Volume(v) => {
                if tables.volumes.contains_key(&v.id) {
                    return Err(BackendError::conflict(format!("volume {}", v.id)));
                }
                tables.volumes.insert(v.id, v.clone());
            }
            Record::Node(n) => {
                if !tables.volumes.contains_key(&n.volume_id) {
                    return Err(BackendError::missing(format!("volume {}", n.volume_id)));
                }
                if let Some(parent) = n.parent_id
                    && !tables.nodes.contains_key(&parent)
                {
                    return Err(BackendError::missing(format!("parent node {parent}")));
                }
                if tables.nodes.contains_key(&n.id) || tables.name_taken(n) {
                    return Err(BackendError::conflict(format!("node {} ({})", n.id, n.name)));
                }
                tables.nodes.insert(n.id, n.clone());
            }
            Record::Cluster(c) => {
                if !tables.nodes.contains_key(&c.owner_id) {
                    return Err(BackendError::missing(format!("owner node {}", c.owner_id)));
                }
                if tables.clusters.contains_key(&c.id) {
                    return Err(BackendError::conflict(format!("cluster {}", c.id)));
                }
                tables.clusters.insert(c.id, c.clone());
            }
        }
        Ok(())
    }

    fn update(&mut self, record: &Record) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.require_transaction()?;
        state.record_call(BackendOp::Update)?;
        let tables = &mut state.tables;

        match record {
            Record::Volume(v) => match tables.volumes.get_mut(&v.id) {
                Some(slot) => *slot = v.clone(),
                None => return Err(BackendError::missing(format!("volume {}", v.id))),
            },
            Record::Node(n) => {
                if !tables.nodes.contains_key(&n.id) {
                    return Err(BackendError::missing(format!("node {}", n.id)));
                }
                if tables.name_taken(n) {
                    return Err(BackendError::conflict(format!("node {} ({})", n.id, n.name)));
                }
                tables.nodes.insert(n.id, n.clone());
            }
            Record::Cluster(c) => match tables.clusters.get_mut(&c.id) {
                Some(slot) => *slot = c.clone(),
                None => return Err(BackendError::missing(format!("cluster {}", c.id))),
            },
        }
        Ok(())
    }

    fn delete(&mut self, entity: &EntityRef) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.require_transaction()?;
        state.record_call(BackendOp::Delete)?;
        let tables = &mut state.tables;

        let removed = match *entity {
            EntityRef::Volume(id) => {
                let removed = tables.volumes.remove(&id).is_some();
                if removed {
                    let doomed: Vec<NodeId> = tables
                        .nodes
                        .values()
                        .filter(|n| n.volume_id == id)
                        .map(|n| n.id)
                        .collect();
                    tables.clusters.retain(|_, c| !doomed.contains(&c.owner_id));
                    tables.nodes.retain(|_, n| n.volume_id != id);
                }
                removed
            }
            EntityRef::Node(id) => {
                if tables.nodes.values().any(|n| n.parent_id == Some(id)) {
                    return Err(BackendError::conflict(format!("node {id} still has children")));
                }
                tables.clusters.retain(|_, c| c.owner_id != id);
                tables.nodes.remove(&id).is_some()
            }
            EntityRef::Cluster(id) => tables.clusters.remove(&id).is_some(),
        };

        if removed {
            Ok(())
        } else {
            Err(BackendError::missing(entity.to_string()))
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treefs_types::NodeKind;

    fn volume() -> VolumeRecord {
        VolumeRecord {
            id: VolumeId::new(),
            label: "TEST".into(),
            cluster_size: 4,
            root_name: "root".into(),
        }
    }

    fn node(volume: VolumeId, parent: Option<NodeId>, name: &str) -> NodeRecord {
        NodeRecord {
            id: NodeId::new(),
            volume_id: volume,
            parent_id: parent,
            name: name.into(),
            kind: NodeKind::Directory,
            size: 0,
        }
    }

    #[test]
    fn test_rollback_restores_tables() {
        let mut backend = MemoryBackend::new();
        let v = volume();

        backend.begin().unwrap();
        backend.insert(&Record::Volume(v.clone())).unwrap();
        backend.commit().unwrap();

        backend.begin().unwrap();
        backend.delete(&EntityRef::Volume(v.id)).unwrap();
        assert!(backend.volume(v.id).is_none());
        backend.rollback().unwrap();

        assert_eq!(backend.volume(v.id), Some(v));
        assert!(!backend.in_transaction());
    }

    #[test]
    fn test_operations_require_transaction() {
        let mut backend = MemoryBackend::new();
        let err = backend.select(&Query::Volumes).unwrap_err();
        assert!(matches!(err, BackendError::Transaction(_)));
    }

    #[test]
    fn test_sibling_names_are_unique() {
        let mut backend = MemoryBackend::new();
        let v = volume();
        let root = node(v.id, None, "root");
        let a = node(v.id, Some(root.id), "a");
        let dup = node(v.id, Some(root.id), "a");

        backend.begin().unwrap();
        backend.insert(&Record::Volume(v)).unwrap();
        backend.insert(&Record::Node(root)).unwrap();
        backend.insert(&Record::Node(a)).unwrap();
        let err = backend.insert(&Record::Node(dup)).unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
        backend.rollback().unwrap();
    }

    #[test]
    fn test_children_sorted_by_name() {
        let mut backend = MemoryBackend::new();
        let v = volume();
        let root = node(v.id, None, "root");
        let root_id = root.id;

        backend.begin().unwrap();
        backend.insert(&Record::Volume(v.clone())).unwrap();
        backend.insert(&Record::Node(root)).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            backend.insert(&Record::Node(node(v.id, Some(root_id), name))).unwrap();
        }
        let names: Vec<String> = backend
            .select(&Query::Children(root_id))
            .unwrap()
            .into_iter()
            .filter_map(Record::into_node)
            .map(|n| n.name)
            .collect();
        backend.commit().unwrap();

        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_fail_nth_skips_then_fires_once() {
        let mut backend = MemoryBackend::new();
        backend.fail_nth(BackendOp::Insert, 1);

        backend.begin().unwrap();
        backend.insert(&Record::Volume(volume())).unwrap();
        let err = backend.insert(&Record::Volume(volume())).unwrap_err();
        assert!(matches!(err, BackendError::Injected(BackendOp::Insert)));
        backend.insert(&Record::Volume(volume())).unwrap();
        backend.commit().unwrap();

        assert_eq!(backend.calls(BackendOp::Insert), 3);
    }

    #[test]
    fn test_delete_refuses_node_with_children() {
        let mut backend = MemoryBackend::new();
        let v = volume();
        let root = node(v.id, None, "root");
        let root_id = root.id;

        backend.begin().unwrap();
        backend.insert(&Record::Volume(v.clone())).unwrap();
        backend.insert(&Record::Node(root)).unwrap();
        backend.insert(&Record::Node(node(v.id, Some(root_id), "child"))).unwrap();
        let err = backend.delete(&EntityRef::Node(root_id)).unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
        backend.commit().unwrap();
    }
}
