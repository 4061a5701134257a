//! The volume: identity, metadata, root directory, and the node arena.

use treefs_types::{NodeId, NodeKind, VolumeId, VolumeRecord};

use crate::backend::{Backend, Query, Record};
use crate::cell::TxCell;
use crate::config::VolumeConfig;
use crate::error::{FsError, FsResult};
use crate::node::{Node, Tree};
use crate::unit_of_work::{UnitOfWork, jobs};
use crate::worker::Worker;

/// A hierarchical file system persisted through a [`Backend`].
///
/// All node operations take a [`NodeId`] and live on this type. The backend
/// runs on a dedicated worker thread, see [`Worker`].
///
/// ```no_run
/// use treefs_kernel::{FileSystem, MemoryBackend, VolumeConfig};
///
/// let mut fs = FileSystem::new(MemoryBackend::new(), VolumeConfig::default())?;
/// fs.create()?;
/// let root = fs.root()?;
/// let notes = fs.create_file(root, "docs/notes.txt")?;
/// fs.set_data(notes, b"hello")?;
/// assert_eq!(fs.read(notes)?, b"hello");
/// # Ok::<(), treefs_kernel::FsError>(())
/// ```
#[derive(Debug)]
pub struct FileSystem {
    id: VolumeId,
    label: TxCell<String>,
    cluster_size: u32,
    root_name: String,
    root: Option<NodeId>,
    pub(crate) tree: Tree,
    pub(crate) worker: Worker,
}

impl FileSystem {
    /// A new, not yet persisted volume. Call [`create`](Self::create) to
    /// persist it.
    pub fn new<B: Backend>(backend: B, config: VolumeConfig) -> FsResult<Self> {
        config.validate()?;
        let worker = Worker::spawn(backend)?;
        Ok(Self {
            id: VolumeId::new(),
            label: TxCell::new(config.label),
            cluster_size: config.cluster_size,
            root_name: config.root_name,
            root: None,
            tree: Tree::default(),
            worker,
        })
    }

    /// Attach to a volume already persisted in `backend`.
    pub fn open<B: Backend>(backend: B, id: VolumeId) -> FsResult<Self> {
        let worker = Worker::spawn(backend)?;
        let record = UnitOfWork::new(&worker, "open volume")
            .run(jobs::select(Query::Volume(id)))?
            .into_iter()
            .find_map(Record::into_volume)
            .ok_or(FsError::FileSystemDoesNotExist(id))?;
        Ok(Self::from_record(record, worker))
    }

    /// Attach to the only volume in `backend`.
    pub fn open_sole<B: Backend>(backend: B) -> FsResult<Self> {
        let worker = Worker::spawn(backend)?;
        let mut volumes: Vec<VolumeRecord> = UnitOfWork::new(&worker, "list volumes")
            .run(jobs::select(Query::Volumes))?
            .into_iter()
            .filter_map(Record::into_volume)
            .collect();
        match volumes.pop() {
            Some(record) if volumes.is_empty() => Ok(Self::from_record(record, worker)),
            Some(_) => Err(FsError::AmbiguousVolume(volumes.len() + 1)),
            None => Err(FsError::AmbiguousVolume(0)),
        }
    }

    fn from_record(record: VolumeRecord, worker: Worker) -> Self {
        tracing::debug!(volume = %record.id, label = %record.label, "opened volume");
        Self {
            id: record.id,
            label: TxCell::new(record.label),
            cluster_size: record.cluster_size,
            root_name: record.root_name,
            root: None,
            tree: Tree::default(),
            worker,
        }
    }

    fn record(&self) -> VolumeRecord {
        VolumeRecord {
            id: self.id,
            label: self.label.get().clone(),
            cluster_size: self.cluster_size,
            root_name: self.root_name.clone(),
        }
    }

    /// Persist the volume.
    #[tracing::instrument(skip(self), fields(volume = %self.id), name = "fs.create")]
    pub fn create(&mut self) -> FsResult<()> {
        if self.exists()? {
            return Err(FsError::FileSystemAlreadyExists(self.id));
        }
        UnitOfWork::new(&self.worker, "create volume").run(jobs::insert(Record::Volume(self.record())))?;
        tracing::info!(volume = %self.id, label = %self.label, cluster_size = self.cluster_size, "volume created");
        Ok(())
    }

    /// Whether the volume is persisted. Always asks the backend.
    pub fn exists(&self) -> FsResult<bool> {
        let rows = UnitOfWork::new(&self.worker, "select volume").run(jobs::select(Query::Volume(self.id)))?;
        Ok(!rows.is_empty())
    }

    /// Stop the persistence worker. Every later backend call fails with
    /// [`FsError::Closed`].
    pub fn close(&mut self) {
        if !self.worker.is_closed() {
            self.worker.shutdown();
            tracing::debug!(volume = %self.id, "closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }

    pub fn unique_id(&self) -> VolumeId {
        self.id
    }

    pub fn volume_label(&self) -> &str {
        self.label.get()
    }

    /// Change the label. Restored in memory when the backend rejects it.
    #[tracing::instrument(skip(self), name = "fs.set_volume_label")]
    pub fn set_volume_label(&mut self, label: &str) -> FsResult<()> {
        let (id, cluster_size, root_name) = (self.id, self.cluster_size, self.root_name.clone());
        UnitOfWork::new(&self.worker, "set volume label").execute(
            &mut self.label,
            |l| l.set(label.to_string()),
            |l| {
                jobs::update(Record::Volume(VolumeRecord {
                    id,
                    label: l.get().clone(),
                    cluster_size,
                    root_name,
                }))
            },
            |l| {
                l.undo();
            },
        )?;
        self.label.commit();
        Ok(())
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Number of nodes currently held in memory.
    pub fn loaded_nodes(&self) -> usize {
        self.tree.len()
    }

    /// Every volume in the same store.
    pub fn volumes(&self) -> FsResult<Vec<VolumeRecord>> {
        Ok(UnitOfWork::new(&self.worker, "list volumes")
            .run(jobs::select(Query::Volumes))?
            .into_iter()
            .filter_map(Record::into_volume)
            .collect())
    }

    /// The root directory, loading or creating it on first use.
    pub fn root(&mut self) -> FsResult<NodeId> {
        if let Some(root) = self.root {
            return Ok(root);
        }
        if !self.exists()? {
            return Err(FsError::FileSystemDoesNotExist(self.id));
        }

        let stored = UnitOfWork::new(&self.worker, "select root")
            .run(jobs::select(Query::Root(self.id)))?
            .into_iter()
            .find_map(Record::into_node);
        let root = match stored {
            Some(record) => {
                let id = record.id;
                self.tree.insert(Node::from_record(record));
                id
            }
            None => self.create_node(Node::new(NodeKind::Directory, None, self.root_name.clone()))?,
        };
        self.root = Some(root);
        Ok(root)
    }
}
