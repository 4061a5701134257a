//! Path nodes: the in-memory arena and the operations shared by directories
//! and files.
//!
//! Nodes live in a [`Tree`] owned by the [`FileSystem`] and are addressed by
//! [`NodeId`]. A node is only in the tree once it is known to exist: either it
//! was created in this session or it was loaded from the backend while
//! listing its parent. Deleted nodes are removed from the tree, so a stale id
//! fails with `PathDoesNotExist`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use treefs_types::{NodeId, NodeKind, NodeRecord, VolumeId};

use crate::backend::{EntityRef, Query, Record};
use crate::cell::TxCell;
use crate::cluster::Cluster;
use crate::error::{FsError, FsResult};
use crate::file::rewrite_clusters;
use crate::filesystem::FileSystem;
use crate::unit_of_work::{UnitOfWork, jobs};

/// Path separator used in path strings.
pub const SEPARATOR: char = '/';

/// Persistence state of a node as known to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Existence {
    /// Built in memory, not persisted yet.
    New,
    Present,
    Deleted,
}

#[derive(Debug, Default)]
pub(crate) struct DirectoryState {
    /// Child ids, `None` until first listed.
    pub(crate) children: Option<Vec<NodeId>>,
}

#[derive(Debug, Default)]
pub(crate) struct FileState {
    /// Clusters in `seq` order, `None` until first loaded.
    pub(crate) clusters: Option<Vec<Cluster>>,
    pub(crate) size: TxCell<u64>,
}

#[derive(Debug)]
pub(crate) enum NodeBody {
    Directory(DirectoryState),
    File(FileState),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: TxCell<String>,
    pub(crate) parent: TxCell<Option<NodeId>>,
    pub(crate) existence: TxCell<Existence>,
    pub(crate) body: NodeBody,
}

impl Node {
    /// A node that does not exist yet. Its child or cluster cache starts out
    /// loaded and empty.
    pub(crate) fn new(kind: NodeKind, parent: Option<NodeId>, name: impl Into<String>) -> Self {
        let body = match kind {
            NodeKind::Directory => NodeBody::Directory(DirectoryState {
                children: Some(Vec::new()),
            }),
            NodeKind::File => NodeBody::File(FileState {
                clusters: Some(Vec::new()),
                size: TxCell::new(0),
            }),
        };
        Self {
            id: NodeId::new(),
            name: TxCell::new(name.into()),
            parent: TxCell::new(parent),
            existence: TxCell::new(Existence::New),
            body,
        }
    }

    pub(crate) fn from_record(record: NodeRecord) -> Self {
        let body = match record.kind {
            NodeKind::Directory => NodeBody::Directory(DirectoryState::default()),
            NodeKind::File => NodeBody::File(FileState {
                clusters: None,
                size: TxCell::new(record.size),
            }),
        };
        Self {
            id: record.id,
            name: TxCell::new(record.name),
            parent: TxCell::new(record.parent_id),
            existence: TxCell::new(Existence::Present),
            body,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Directory(_) => NodeKind::Directory,
            NodeBody::File(_) => NodeKind::File,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.name.get()
    }

    pub(crate) fn parent(&self) -> Option<NodeId> {
        *self.parent.get()
    }

    pub(crate) fn size(&self) -> u64 {
        match &self.body {
            NodeBody::File(file) => *file.size.get(),
            NodeBody::Directory(_) => 0,
        }
    }

    pub(crate) fn record(&self, volume_id: VolumeId) -> NodeRecord {
        NodeRecord {
            id: self.id,
            volume_id,
            parent_id: self.parent(),
            name: self.name().to_string(),
            kind: self.kind(),
            size: self.size(),
        }
    }

    /// Accept every pending speculative value.
    pub(crate) fn commit(&mut self) {
        self.name.commit();
        self.parent.commit();
        self.existence.commit();
        if let NodeBody::File(file) = &mut self.body {
            file.size.commit();
        }
    }
}

/// Arena of live nodes.
#[derive(Debug, Default)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, Node>,
}

impl Tree {
    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// The node, if it exists.
    pub(crate) fn live(&self, id: NodeId) -> FsResult<&Node> {
        match self.nodes.get(&id) {
            Some(node) if *node.existence.get() == Existence::Present => Ok(node),
            _ => Err(FsError::does_not_exist(id.to_string())),
        }
    }

    pub(crate) fn live_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        match self.nodes.get_mut(&id) {
            Some(node) if *node.existence.get() == Existence::Present => Ok(node),
            _ => Err(FsError::does_not_exist(id.to_string())),
        }
    }

    pub(crate) fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Names from the root down to `id`. Stops early at a node missing from
    /// the arena.
    pub(crate) fn path_of(&self, id: NodeId) -> NodePath {
        let mut components = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            components.push(node.name().to_string());
            cursor = node.parent();
        }
        components.reverse();
        NodePath { components }
    }

    /// Path string for error messages; falls back to the raw id.
    pub(crate) fn display_path(&self, id: NodeId) -> String {
        if self.contains(id) {
            self.path_of(id).to_string()
        } else {
            id.to_string()
        }
    }

    /// True when `node` is `ancestor` or lies below it.
    pub(crate) fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes.get(&current).and_then(Node::parent);
        }
        false
    }

    /// Record `child` in the parent's child cache, when that cache is loaded.
    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(Node {
            body: NodeBody::Directory(DirectoryState { children: Some(children) }),
            ..
        }) = self.nodes.get_mut(&parent)
            && !children.contains(&child)
        {
            children.push(child);
        }
    }

    pub(crate) fn detach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(Node {
            body: NodeBody::Directory(DirectoryState { children: Some(children) }),
            ..
        }) = self.nodes.get_mut(&parent)
        {
            children.retain(|c| *c != child);
        }
    }
}

/// A node's location as the names from the root down.
///
/// Equality and hashing are structural over the components. Ordering by
/// leaf name, used for listings, is [`NodePath::cmp_name`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath {
    components: Vec<String>,
}

impl NodePath {
    /// Leaf name.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn parent(&self) -> Option<NodePath> {
        let (_, rest) = self.components.split_last()?;
        Some(NodePath {
            components: rest.to_vec(),
        })
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// Compare by leaf name only.
    pub fn cmp_name(&self, other: &NodePath) -> Ordering {
        self.name().cmp(&other.name())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(component)?;
        }
        Ok(())
    }
}

/// A node name is non-empty and has no separator.
pub(crate) fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(FsError::invalid_name(name));
    }
    Ok(())
}

impl FileSystem {
    pub fn name(&self, id: NodeId) -> FsResult<&str> {
        Ok(self.tree.live(id)?.name())
    }

    /// Containing directory; `None` for the root.
    pub fn parent(&self, id: NodeId) -> FsResult<Option<NodeId>> {
        Ok(self.tree.live(id)?.parent())
    }

    pub fn kind(&self, id: NodeId) -> FsResult<NodeKind> {
        Ok(self.tree.live(id)?.kind())
    }

    pub fn is_directory(&self, id: NodeId) -> bool {
        self.tree.live(id).is_ok_and(|n| n.kind().is_dir())
    }

    pub fn is_file(&self, id: NodeId) -> bool {
        self.tree.live(id).is_ok_and(|n| n.kind().is_file())
    }

    /// The volume a node belongs to.
    pub fn volume_of(&self, id: NodeId) -> FsResult<VolumeId> {
        self.tree.live(id)?;
        Ok(self.unique_id())
    }

    pub fn path(&self, id: NodeId) -> FsResult<NodePath> {
        self.tree.live(id)?;
        Ok(self.tree.path_of(id))
    }

    /// Order two nodes by name.
    pub fn compare_names(&self, a: NodeId, b: NodeId) -> FsResult<Ordering> {
        Ok(self.tree.live(a)?.name().cmp(self.tree.live(b)?.name()))
    }

    /// Whether a node exists in this volume.
    ///
    /// Answered from memory for nodes this session has seen; other ids are
    /// looked up in the backend.
    pub fn node_exists(&self, id: NodeId) -> FsResult<bool> {
        if let Some(node) = self.tree.get(id) {
            return Ok(*node.existence.get() == Existence::Present);
        }
        let volume = self.unique_id();
        let rows = UnitOfWork::new(&self.worker, "select node").run(jobs::select(Query::Node(id)))?;
        Ok(rows
            .into_iter()
            .filter_map(Record::into_node)
            .any(|n| n.volume_id == volume))
    }

    /// Persist a node built with [`Node::new`] and add it to the tree.
    pub(crate) fn create_node(&mut self, mut node: Node) -> FsResult<NodeId> {
        if *node.existence.get() != Existence::New {
            return Err(FsError::already_exists_at(node.name().to_string(), node.id));
        }

        let volume = self.unique_id();
        UnitOfWork::new(&self.worker, "create node").execute(
            &mut node,
            |n| n.existence.set(Existence::Present),
            |n| jobs::insert(Record::Node(n.record(volume))),
            |n| {
                n.existence.undo();
            },
        )?;
        node.commit();

        let id = node.id;
        let parent = node.parent();
        tracing::debug!(node = %id, name = node.name(), kind = %node.kind(), "created");
        self.tree.insert(node);
        if let Some(parent) = parent {
            self.tree.attach(parent, id);
        }
        Ok(id)
    }

    /// Change a node's name. Fails for the root and when a sibling already
    /// uses the new name.
    #[tracing::instrument(skip(self), name = "fs.rename")]
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> FsResult<()> {
        let node = self.tree.live(id)?;
        let parent = node.parent().ok_or(FsError::RootCannotBeRenamed)?;
        validate_name(new_name)?;
        if node.name() == new_name {
            return Ok(());
        }
        if let Some(clash) = self.find_child(parent, new_name)? {
            return Err(FsError::already_exists_at(self.tree.display_path(clash), clash));
        }

        let volume = self.unique_id();
        let node = self.tree.live_mut(id)?;
        UnitOfWork::new(&self.worker, "rename").execute(
            node,
            |n| n.name.set(new_name.to_string()),
            |n| jobs::update(Record::Node(n.record(volume))),
            |n| {
                n.name.undo();
            },
        )?;
        node.commit();
        Ok(())
    }

    /// Re-parent a node under `target`, keeping its id and its subtree.
    #[tracing::instrument(skip(self), name = "fs.move_to")]
    pub fn move_to(&mut self, id: NodeId, target: NodeId) -> FsResult<()> {
        let node = self.tree.live(id)?;
        let target_node = self.tree.live(target)?;
        if !target_node.kind().is_dir() {
            return Err(FsError::not_a_directory(self.tree.display_path(target)));
        }
        let Some(old_parent) = node.parent() else {
            return Err(FsError::invalid_target(self.tree.display_path(id), self.tree.display_path(target)));
        };
        if self.tree.is_within(target, id) {
            return Err(FsError::invalid_target(self.tree.display_path(id), self.tree.display_path(target)));
        }
        if old_parent == target {
            return Ok(());
        }
        let name = node.name().to_string();
        if let Some(clash) = self.find_child(target, &name)? {
            return Err(FsError::already_exists_at(self.tree.display_path(clash), clash));
        }

        let volume = self.unique_id();
        let node = self.tree.live_mut(id)?;
        UnitOfWork::new(&self.worker, "move").execute(
            node,
            |n| n.parent.set(Some(target)),
            |n| jobs::update(Record::Node(n.record(volume))),
            |n| {
                n.parent.undo();
            },
        )?;
        node.commit();

        self.tree.detach(old_parent, id);
        self.tree.attach(target, id);
        Ok(())
    }

    /// Delete a node and everything below it.
    ///
    /// Directories delete their children first. A file's clusters are freed
    /// in the same transaction as the file itself. Returns the containing
    /// directory. The root cannot be deleted.
    #[tracing::instrument(skip(self), name = "fs.delete")]
    pub fn delete(&mut self, id: NodeId) -> FsResult<NodeId> {
        let node = self.tree.live(id)?;
        let Some(parent) = node.parent() else {
            return Err(FsError::CannotDelete(self.tree.display_path(id)));
        };

        let stale = match node.kind() {
            NodeKind::Directory => {
                for child in self.children(id)? {
                    self.delete(child)?;
                }
                Vec::new()
            }
            NodeKind::File => self.loaded_clusters(id)?,
        };

        let node = self.tree.live_mut(id)?;
        UnitOfWork::new(&self.worker, "delete").execute(
            node,
            |n| n.existence.set(Existence::Deleted),
            |n| rewrite_clusters(stale, jobs::delete(EntityRef::Node(n.id)), Vec::new()),
            |n| {
                n.existence.undo();
            },
        )?;
        node.commit();

        self.tree.remove(id);
        self.tree.detach(parent, id);
        tracing::debug!(node = %id, "deleted");
        Ok(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> NodePath {
        NodePath {
            components: parts.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_path_display_and_parent() {
        let p = path(&["root", "a", "b"]);
        assert_eq!(p.to_string(), "root/a/b");
        assert_eq!(p.name(), Some("b"));
        assert_eq!(p.parent(), Some(path(&["root", "a"])));
        assert!(p.starts_with(&path(&["root"])));
        assert_eq!(path(&[]).parent(), None);
    }

    #[test]
    fn test_path_name_ordering_ignores_location() {
        let a = path(&["root", "z", "alpha"]);
        let b = path(&["root", "beta"]);
        assert_eq!(a.cmp_name(&b), Ordering::Less);
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(matches!(validate_name(""), Err(FsError::InvalidName(_))));
        assert!(matches!(validate_name("a/b"), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn test_tree_within_and_cache() {
        let mut tree = Tree::default();
        let mut root = Node::new(NodeKind::Directory, None, "root");
        root.existence = TxCell::new(Existence::Present);
        let root_id = root.id;
        let mut child = Node::new(NodeKind::Directory, Some(root_id), "a");
        child.existence = TxCell::new(Existence::Present);
        let child_id = child.id;
        tree.insert(root);
        tree.insert(child);
        tree.attach(root_id, child_id);
        tree.attach(root_id, child_id);

        assert!(tree.is_within(child_id, root_id));
        assert!(tree.is_within(child_id, child_id));
        assert!(!tree.is_within(root_id, child_id));
        assert_eq!(tree.path_of(child_id).to_string(), "root/a");

        let Some(Node {
            body: NodeBody::Directory(dir),
            ..
        }) = tree.get(root_id)
        else {
            panic!("root is a directory");
        };
        assert_eq!(dir.children.as_deref(), Some(&[child_id][..]));

        tree.detach(root_id, child_id);
        let Some(Node {
            body: NodeBody::Directory(dir),
            ..
        }) = tree.get(root_id)
        else {
            panic!("root is a directory");
        };
        assert_eq!(dir.children.as_deref(), Some(&[][..]));
    }
}
