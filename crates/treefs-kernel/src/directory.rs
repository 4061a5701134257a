//! Directory operations: listing, path resolution, creation, copy.

use treefs_types::{NodeId, NodeKind};

use crate::backend::{Query, Record};
use crate::error::{FsError, FsResult};
use crate::filesystem::FileSystem;
use crate::node::{Node, NodeBody, SEPARATOR, validate_name};
use crate::unit_of_work::{UnitOfWork, jobs};

/// Split a relative path into its segments. Rejects empty paths and empty
/// segments (leading, trailing, or doubled separators).
fn segments(path: &str) -> FsResult<Vec<&str>> {
    if path.is_empty() {
        return Err(FsError::invalid_path(path));
    }
    let parts: Vec<&str> = path.split(SEPARATOR).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(FsError::invalid_path(path));
    }
    Ok(parts)
}

impl FileSystem {
    fn require_directory(&self, id: NodeId) -> FsResult<()> {
        if self.tree.live(id)?.kind().is_dir() {
            Ok(())
        } else {
            Err(FsError::not_a_directory(self.tree.display_path(id)))
        }
    }

    /// Direct children of a directory.
    ///
    /// The first call loads them from the backend; later calls are served
    /// from the cache, which mutations keep current.
    pub fn children(&mut self, dir: NodeId) -> FsResult<Vec<NodeId>> {
        self.require_directory(dir)?;
        if let NodeBody::Directory(state) = &self.tree.live(dir)?.body
            && let Some(children) = &state.children
        {
            return Ok(children.clone());
        }

        let rows = UnitOfWork::new(&self.worker, "list children").run(jobs::select(Query::Children(dir)))?;
        let mut children = Vec::with_capacity(rows.len());
        for record in rows.into_iter().filter_map(Record::into_node) {
            children.push(record.id);
            if !self.tree.contains(record.id) {
                self.tree.insert(Node::from_record(record));
            }
        }
        tracing::trace!(dir = %dir, count = children.len(), "loaded children");

        if let NodeBody::Directory(state) = &mut self.tree.live_mut(dir)?.body {
            state.children = Some(children.clone());
        }
        Ok(children)
    }

    /// Direct child of `dir` called `name`.
    pub fn find_child(&mut self, dir: NodeId, name: &str) -> FsResult<Option<NodeId>> {
        let children = self.children(dir)?;
        Ok(children
            .into_iter()
            .find(|c| self.tree.get(*c).is_some_and(|n| n.name() == name)))
    }

    /// Resolve a relative path below `dir`.
    ///
    /// Files are leaves: when a segment resolves to a file, that file is the
    /// result even if segments remain.
    #[tracing::instrument(skip(self), name = "fs.get_path")]
    pub fn get_path(&mut self, dir: NodeId, path: &str) -> FsResult<Option<NodeId>> {
        self.require_directory(dir)?;
        let parts = segments(path)?;

        let mut cursor = dir;
        for (i, part) in parts.iter().enumerate() {
            let Some(child) = self.find_child(cursor, part)? else {
                return Ok(None);
            };
            if i + 1 == parts.len() || self.is_file(child) {
                return Ok(Some(child));
            }
            cursor = child;
        }
        Ok(Some(cursor))
    }

    /// Create a single child node of the given kind.
    pub(crate) fn create_child(&mut self, dir: NodeId, name: &str, kind: NodeKind) -> FsResult<NodeId> {
        validate_name(name)?;
        if let Some(existing) = self.find_child(dir, name)? {
            return Err(FsError::already_exists_at(self.tree.display_path(existing), existing));
        }
        self.create_node(Node::new(kind, Some(dir), name))
    }

    /// Create a directory chain below `dir`, reusing directories that
    /// already exist along the way.
    ///
    /// Fails with `AlreadyExists` (carrying the existing node) when the full
    /// path is already taken, and with `NotADirectory` when an intermediate
    /// segment is a file.
    #[tracing::instrument(skip(self), name = "fs.create_directory")]
    pub fn create_directory(&mut self, dir: NodeId, path: &str) -> FsResult<NodeId> {
        self.require_directory(dir)?;
        let parts = segments(path)?;

        let mut cursor = dir;
        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            cursor = match self.find_child(cursor, part)? {
                Some(existing) if last => {
                    return Err(FsError::already_exists_at(self.tree.display_path(existing), existing));
                }
                Some(existing) if self.is_file(existing) => {
                    return Err(FsError::not_a_directory(self.tree.display_path(existing)));
                }
                Some(existing) => existing,
                None => self.create_child(cursor, part, NodeKind::Directory)?,
            };
        }
        Ok(cursor)
    }

    /// Create an empty file at `path` below `dir`, creating missing parent
    /// directories.
    #[tracing::instrument(skip(self), name = "fs.create_file")]
    pub fn create_file(&mut self, dir: NodeId, path: &str) -> FsResult<NodeId> {
        self.require_directory(dir)?;
        segments(path)?;

        let (parent, name) = match path.rsplit_once(SEPARATOR) {
            None => (dir, path),
            Some((parent_path, name)) => {
                let parent = match self.create_directory(dir, parent_path) {
                    Ok(parent) => parent,
                    Err(FsError::AlreadyExists {
                        existing: Some(existing),
                        ..
                    }) if self.is_directory(existing) => existing,
                    Err(FsError::AlreadyExists {
                        existing: Some(existing),
                        ..
                    }) => return Err(FsError::not_a_directory(self.tree.display_path(existing))),
                    Err(e) => return Err(e),
                };
                (parent, name)
            }
        };
        self.create_child(parent, name, NodeKind::File)
    }

    /// Copy a node, and its subtree, into `target` under the same name.
    ///
    /// Copies get fresh ids. File content is copied into new clusters.
    /// Returns the copy.
    #[tracing::instrument(skip(self), name = "fs.copy_to")]
    pub fn copy_to(&mut self, id: NodeId, target: NodeId) -> FsResult<NodeId> {
        let node = self.tree.live(id)?;
        let kind = node.kind();
        let name = node.name().to_string();
        self.require_directory(target)?;
        if self.tree.is_within(target, id) {
            return Err(FsError::invalid_target(self.tree.display_path(id), self.tree.display_path(target)));
        }

        let copy = self.create_child(target, &name, kind)?;
        match kind {
            NodeKind::Directory => {
                for child in self.children(id)? {
                    self.copy_to(child, copy)?;
                }
            }
            NodeKind::File => {
                let data = self.read(id)?;
                if !data.is_empty() {
                    self.set_data(copy, &data)?;
                }
            }
        }
        Ok(copy)
    }
}
