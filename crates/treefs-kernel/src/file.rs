//! File content: cluster management and byte views.
//!
//! Content is stored as `ceil(len / cluster_size)` clusters, each exactly
//! `cluster_size` bytes. The last one is zero-padded. The true length is kept
//! on the node record, so [`FileSystem::read`] returns exactly what was
//! written while [`FileSystem::get_data`] returns the padded cluster view.

use treefs_types::NodeId;

use crate::backend::{Backend, BackendResult, Query, Record};
use crate::cluster::Cluster;
use crate::error::{FsError, FsResult};
use crate::filesystem::FileSystem;
use crate::node::{FileState, NodeBody};
use crate::unit_of_work::{UnitOfWork, jobs};

impl FileSystem {
    fn file_state(&self, id: NodeId) -> FsResult<&FileState> {
        match &self.tree.live(id)?.body {
            NodeBody::File(state) => Ok(state),
            NodeBody::Directory(_) => Err(FsError::not_a_file(self.tree.display_path(id))),
        }
    }

    fn file_state_mut(&mut self, id: NodeId) -> FsResult<&mut FileState> {
        let path = self.tree.display_path(id);
        match &mut self.tree.live_mut(id)?.body {
            NodeBody::File(state) => Ok(state),
            NodeBody::Directory(_) => Err(FsError::not_a_file(path)),
        }
    }

    /// Make sure the cluster list is in memory.
    fn load_clusters(&mut self, id: NodeId) -> FsResult<()> {
        if self.file_state(id)?.clusters.is_some() {
            return Ok(());
        }
        let rows = UnitOfWork::new(&self.worker, "load clusters").run(jobs::select(Query::Clusters(id)))?;
        let clusters: Vec<Cluster> = rows
            .into_iter()
            .filter_map(Record::into_cluster)
            .map(Cluster::from_record)
            .collect();
        tracing::trace!(file = %id, count = clusters.len(), "loaded clusters");
        self.file_state_mut(id)?.clusters = Some(clusters);
        Ok(())
    }

    /// Recorded content length in bytes.
    pub fn size(&self, id: NodeId) -> FsResult<u64> {
        Ok(*self.file_state(id)?.size.get())
    }

    pub fn cluster_count(&mut self, id: NodeId) -> FsResult<usize> {
        self.load_clusters(id)?;
        Ok(self.file_state(id)?.clusters.as_ref().map_or(0, Vec::len))
    }

    /// Replace a file's content.
    ///
    /// The old clusters are freed, the new length is recorded and one cluster
    /// per `cluster_size` chunk of `data` is allocated, all in one backend
    /// transaction. On failure the file keeps its previous content, both in
    /// memory and in the backend.
    #[tracing::instrument(skip(self, data), fields(len = data.len()), name = "fs.set_data")]
    pub fn set_data(&mut self, id: NodeId, data: &[u8]) -> FsResult<()> {
        self.load_clusters(id)?;

        let volume = self.unique_id();
        let cluster_size = self.cluster_size() as usize;
        let fresh: Vec<Cluster> = data
            .chunks(cluster_size)
            .enumerate()
            .map(|(seq, chunk)| {
                let mut block = vec![0u8; cluster_size];
                block[..chunk.len()].copy_from_slice(chunk);
                Cluster::new(id, seq as u32, block)
            })
            .collect();

        let node = self.tree.live_mut(id)?;
        let stored = UnitOfWork::new(&self.worker, "set data").execute(
            node,
            |n| {
                if let NodeBody::File(file) = &mut n.body {
                    file.size.set(data.len() as u64);
                }
            },
            |n| {
                let stale = match &n.body {
                    NodeBody::File(file) => file.clusters.clone().unwrap_or_default(),
                    NodeBody::Directory(_) => Vec::new(),
                };
                rewrite_clusters(stale, jobs::update(Record::Node(n.record(volume))), fresh)
            },
            |n| {
                if let NodeBody::File(file) = &mut n.body {
                    file.size.undo();
                }
            },
        )?;
        node.commit();

        self.file_state_mut(id)?.clusters = Some(stored);
        tracing::debug!(file = %id, len = data.len(), "content written");
        Ok(())
    }

    /// Concatenated cluster data, padding included.
    pub fn get_data(&mut self, id: NodeId) -> FsResult<Vec<u8>> {
        self.load_clusters(id)?;
        let state = self.file_state(id)?;
        Ok(state
            .clusters
            .iter()
            .flatten()
            .flat_map(|c| c.data().iter().copied())
            .collect())
    }

    /// Content truncated to the recorded length.
    pub fn read(&mut self, id: NodeId) -> FsResult<Vec<u8>> {
        let mut data = self.get_data(id)?;
        let size = usize::try_from(self.size(id)?).unwrap_or(usize::MAX);
        data.truncate(size);
        Ok(data)
    }

    /// Free every cluster of a file in one transaction.
    ///
    /// The recorded size is left alone. On failure no cluster is freed.
    pub fn delete_clusters(&mut self, id: NodeId) -> FsResult<()> {
        let stale = self.loaded_clusters(id)?;
        UnitOfWork::new(&self.worker, "free clusters").run(rewrite_clusters(stale, |_| Ok(()), Vec::new()))?;
        self.file_state_mut(id)?.clusters = Some(Vec::new());
        Ok(())
    }

    /// A copy of the file's cluster list, loading it first if needed.
    pub(crate) fn loaded_clusters(&mut self, id: NodeId) -> FsResult<Vec<Cluster>> {
        self.load_clusters(id)?;
        Ok(self.file_state(id)?.clusters.clone().unwrap_or_default())
    }
}

/// Backend job that frees `stale`, runs `then`, and allocates `fresh`, in
/// that order. Returns the allocated clusters.
pub(crate) fn rewrite_clusters<J>(
    mut stale: Vec<Cluster>,
    then: J,
    fresh: Vec<Cluster>,
) -> impl FnOnce(&mut dyn Backend) -> BackendResult<Vec<Cluster>> + Send + 'static
where
    J: FnOnce(&mut dyn Backend) -> BackendResult<()> + Send + 'static,
{
    move |backend: &mut dyn Backend| {
        for cluster in &mut stale {
            cluster.free(&mut *backend)?;
        }
        then(&mut *backend)?;
        let mut stored = Vec::with_capacity(fresh.len());
        for cluster in fresh {
            stored.push(cluster.allocate(&mut *backend)?);
        }
        Ok(stored)
    }
}
