//! SQLite persistence for volumes, nodes, and clusters.
//!
//! One row per entity. Sibling-name uniqueness and ownership are enforced by
//! the schema as well as by the tree engine, so a corrupted caller cannot
//! write an inconsistent tree.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::Path;
use std::str::FromStr;

use treefs_types::{ClusterId, ClusterRecord, NodeId, NodeKind, NodeRecord, VolumeId, VolumeRecord};

use super::{Backend, BackendError, BackendResult, EntityRef, Query, Record};

/// Database handle for tree persistence.
pub struct SqliteBackend {
    conn: Connection,
}

const SCHEMA: &str = r#"
-- Volumes (one per file system)
CREATE TABLE IF NOT EXISTS volumes (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    cluster_size INTEGER NOT NULL CHECK (cluster_size > 0),
    root_name TEXT NOT NULL,
    created_at INTEGER DEFAULT (unixepoch())
);

-- Directories and files (parent_id NULL only for a volume root)
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    volume_id TEXT NOT NULL,
    parent_id TEXT,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    UNIQUE (volume_id, parent_id, name),
    FOREIGN KEY (volume_id) REFERENCES volumes(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES nodes(id)
);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id, name);
CREATE INDEX IF NOT EXISTS idx_nodes_root ON nodes(volume_id) WHERE parent_id IS NULL;

-- File content chunks
CREATE TABLE IF NOT EXISTS clusters (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    data BLOB NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES nodes(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_clusters_owner ON clusters(owner_id, seq);
"#;

// =============================================================================
// Row Structs (module-private helpers)
// =============================================================================

/// Maps a row from the volumes table.
#[derive(Debug)]
struct VolumeRow {
    id: String,
    label: String,
    cluster_size: i64,
    root_name: String,
}

/// Maps a row from the nodes table.
#[derive(Debug)]
struct NodeRow {
    id: String,
    volume_id: String,
    parent_id: Option<String>,
    name: String,
    kind: String,
    size: i64,
}

/// Maps a row from the clusters table.
struct ClusterRow {
    id: String,
    owner_id: String,
    seq: i64,
    data: Vec<u8>,
}

const VOLUME_COLUMNS: &str = "id, label, cluster_size, root_name";
const NODE_COLUMNS: &str = "id, volume_id, parent_id, name, kind, size";
const CLUSTER_COLUMNS: &str = "id, owner_id, seq, data";

fn volume_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VolumeRow> {
    Ok(VolumeRow {
        id: row.get(0)?,
        label: row.get(1)?,
        cluster_size: row.get(2)?,
        root_name: row.get(3)?,
    })
}

fn node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        volume_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        kind: row.get(4)?,
        size: row.get(5)?,
    })
}

fn cluster_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClusterRow> {
    Ok(ClusterRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        seq: row.get(2)?,
        data: row.get(3)?,
    })
}

// =============================================================================
// Conversion Functions
// =============================================================================

fn parse_id<T>(column: &str, raw: &str) -> BackendResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| BackendError::corrupt(format!("{column} {raw:?}: {e}")))
}

fn row_to_volume(row: VolumeRow) -> BackendResult<VolumeRecord> {
    Ok(VolumeRecord {
        id: parse_id::<VolumeId>("volumes.id", &row.id)?,
        label: row.label,
        cluster_size: u32::try_from(row.cluster_size)
            .map_err(|_| BackendError::corrupt(format!("volumes.cluster_size {}", row.cluster_size)))?,
        root_name: row.root_name,
    })
}

fn row_to_node(row: NodeRow) -> BackendResult<NodeRecord> {
    let parent_id = match row.parent_id.as_deref() {
        Some(raw) => Some(parse_id::<NodeId>("nodes.parent_id", raw)?),
        None => None,
    };
    Ok(NodeRecord {
        id: parse_id::<NodeId>("nodes.id", &row.id)?,
        volume_id: parse_id::<VolumeId>("nodes.volume_id", &row.volume_id)?,
        parent_id,
        name: row.name,
        kind: NodeKind::from_str(&row.kind)
            .map_err(|_| BackendError::corrupt(format!("nodes.kind {:?}", row.kind)))?,
        size: u64::try_from(row.size)
            .map_err(|_| BackendError::corrupt(format!("nodes.size {}", row.size)))?,
    })
}

fn row_to_cluster(row: ClusterRow) -> BackendResult<ClusterRecord> {
    Ok(ClusterRecord {
        id: parse_id::<ClusterId>("clusters.id", &row.id)?,
        owner_id: parse_id::<NodeId>("clusters.owner_id", &row.owner_id)?,
        seq: u32::try_from(row.seq)
            .map_err(|_| BackendError::corrupt(format!("clusters.seq {}", row.seq)))?,
        data: row.data,
    })
}

/// Constraint violations become `Conflict` so callers can tell them apart
/// from I/O-level failures.
fn classify(err: rusqlite::Error, what: impl FnOnce() -> String) -> BackendError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            BackendError::conflict(format!("{}: {err}", what()))
        }
        other => BackendError::Sqlite(other),
    }
}

fn expect_one(changed: usize, entity: impl FnOnce() -> String) -> BackendResult<()> {
    if changed == 0 {
        Err(BackendError::missing(entity()))
    } else {
        Ok(())
    }
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> BackendResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> BackendResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn require_transaction(&self) -> BackendResult<()> {
        if self.conn.is_autocommit() {
            return Err(BackendError::Transaction("no open transaction".into()));
        }
        Ok(())
    }

    // =========================================================================
    // Selects
    // =========================================================================

    fn select_volumes(&self, id: Option<VolumeId>) -> BackendResult<Vec<Record>> {
        let rows: Vec<VolumeRow> = match id {
            Some(id) => self
                .conn
                .query_row(
                    &format!("SELECT {VOLUME_COLUMNS} FROM volumes WHERE id = ?1"),
                    params![id.to_string()],
                    volume_row,
                )
                .optional()?
                .into_iter()
                .collect(),
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {VOLUME_COLUMNS} FROM volumes ORDER BY id"))?;
                let rows = stmt.query_map([], volume_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        rows.into_iter()
            .map(|row| row_to_volume(row).map(Record::Volume))
            .collect()
    }

    fn select_nodes(&self, sql_where: &str, key: String) -> BackendResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE {sql_where} ORDER BY name"
        ))?;
        let rows = stmt
            .query_map(params![key], node_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| row_to_node(row).map(Record::Node))
            .collect()
    }

    fn select_clusters(&self, owner: NodeId) -> BackendResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM clusters WHERE owner_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map(params![owner.to_string()], cluster_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| row_to_cluster(row).map(Record::Cluster))
            .collect()
    }
}

impl Backend for SqliteBackend {
    fn begin(&mut self) -> BackendResult<()> {
        if !self.conn.is_autocommit() {
            return Err(BackendError::Transaction("transaction already open".into()));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<()> {
        self.require_transaction()?;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> BackendResult<()> {
        self.require_transaction()?;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn select(&mut self, query: &Query) -> BackendResult<Vec<Record>> {
        self.require_transaction()?;
        match *query {
            Query::Volume(id) => self.select_volumes(Some(id)),
            Query::Volumes => self.select_volumes(None),
            Query::Root(volume) => {
                self.select_nodes("volume_id = ?1 AND parent_id IS NULL", volume.to_string())
            }
            Query::Node(id) => self.select_nodes("id = ?1", id.to_string()),
            Query::Children(parent) => self.select_nodes("parent_id = ?1", parent.to_string()),
            Query::Clusters(owner) => self.select_clusters(owner),
        }
    }

    fn insert(&mut self, record: &Record) -> BackendResult<()> {
        self.require_transaction()?;
        let result = match record {
            Record::Volume(v) => self.conn.execute(
                "INSERT INTO volumes (id, label, cluster_size, root_name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![v.id.to_string(), v.label, v.cluster_size, v.root_name],
            ),
            Record::Node(n) => self.conn.execute(
                "INSERT INTO nodes (id, volume_id, parent_id, name, kind, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    n.id.to_string(),
                    n.volume_id.to_string(),
                    n.parent_id.map(|p| p.to_string()),
                    n.name,
                    n.kind.as_str(),
                    n.size as i64,
                ],
            ),
            Record::Cluster(c) => self.conn.execute(
                "INSERT INTO clusters (id, owner_id, seq, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![c.id.to_string(), c.owner_id.to_string(), c.seq, c.data],
            ),
        };
        result.map_err(|e| classify(e, || record.entity().to_string()))?;
        Ok(())
    }

    fn update(&mut self, record: &Record) -> BackendResult<()> {
        self.require_transaction()?;
        let result = match record {
            Record::Volume(v) => self.conn.execute(
                "UPDATE volumes SET label = ?2, cluster_size = ?3, root_name = ?4 WHERE id = ?1",
                params![v.id.to_string(), v.label, v.cluster_size, v.root_name],
            ),
            Record::Node(n) => self.conn.execute(
                "UPDATE nodes SET parent_id = ?2, name = ?3, kind = ?4, size = ?5 WHERE id = ?1",
                params![
                    n.id.to_string(),
                    n.parent_id.map(|p| p.to_string()),
                    n.name,
                    n.kind.as_str(),
                    n.size as i64,
                ],
            ),
            Record::Cluster(c) => self.conn.execute(
                "UPDATE clusters SET owner_id = ?2, seq = ?3, data = ?4 WHERE id = ?1",
                params![c.id.to_string(), c.owner_id.to_string(), c.seq, c.data],
            ),
        };
        let changed = result.map_err(|e| classify(e, || record.entity().to_string()))?;
        expect_one(changed, || record.entity().to_string())
    }

    fn delete(&mut self, entity: &EntityRef) -> BackendResult<()> {
        self.require_transaction()?;
        let result = match *entity {
            EntityRef::Volume(id) => self
                .conn
                .execute("DELETE FROM volumes WHERE id = ?1", params![id.to_string()]),
            EntityRef::Node(id) => self
                .conn
                .execute("DELETE FROM nodes WHERE id = ?1", params![id.to_string()]),
            EntityRef::Cluster(id) => self
                .conn
                .execute("DELETE FROM clusters WHERE id = ?1", params![id.to_string()]),
        };
        let changed = result.map_err(|e| classify(e, || entity.to_string()))?;
        expect_one(changed, || entity.to_string())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> VolumeRecord {
        VolumeRecord {
            id: VolumeId::new(),
            label: "TEST".into(),
            cluster_size: 8,
            root_name: "root".into(),
        }
    }

    fn node(volume: VolumeId, parent: Option<NodeId>, name: &str, kind: NodeKind) -> NodeRecord {
        NodeRecord {
            id: NodeId::new(),
            volume_id: volume,
            parent_id: parent,
            name: name.into(),
            kind,
            size: 0,
        }
    }

    #[test]
    fn test_volume_crud() {
        let mut db = SqliteBackend::in_memory().unwrap();
        let mut v = volume();

        db.begin().unwrap();
        db.insert(&Record::Volume(v.clone())).unwrap();
        db.commit().unwrap();

        db.begin().unwrap();
        let loaded = db.select(&Query::Volume(v.id)).unwrap();
        assert_eq!(loaded, vec![Record::Volume(v.clone())]);

        v.label = "RENAMED".into();
        db.update(&Record::Volume(v.clone())).unwrap();
        let all = db.select(&Query::Volumes).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].clone().into_volume().unwrap().label, "RENAMED");

        db.delete(&EntityRef::Volume(v.id)).unwrap();
        assert!(db.select(&Query::Volume(v.id)).unwrap().is_empty());
        db.commit().unwrap();
    }

    #[test]
    fn test_rollback_discards_changes() {
        let mut db = SqliteBackend::in_memory().unwrap();
        let v = volume();

        db.begin().unwrap();
        db.insert(&Record::Volume(v.clone())).unwrap();
        db.rollback().unwrap();

        db.begin().unwrap();
        assert!(db.select(&Query::Volume(v.id)).unwrap().is_empty());
        db.commit().unwrap();
    }

    #[test]
    fn test_tree_rows_and_constraints() {
        let mut db = SqliteBackend::in_memory().unwrap();
        let v = volume();
        let root = node(v.id, None, "root", NodeKind::Directory);
        let docs = node(v.id, Some(root.id), "docs", NodeKind::Directory);
        let clash = node(v.id, Some(root.id), "docs", NodeKind::File);

        db.begin().unwrap();
        db.insert(&Record::Volume(v.clone())).unwrap();
        db.insert(&Record::Node(root.clone())).unwrap();
        db.insert(&Record::Node(docs.clone())).unwrap();

        let err = db.insert(&Record::Node(clash)).unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)), "got {err:?}");

        let found = db.select(&Query::Root(v.id)).unwrap();
        assert_eq!(found, vec![Record::Node(root.clone())]);

        let children = db.select(&Query::Children(root.id)).unwrap();
        assert_eq!(children, vec![Record::Node(docs.clone())]);

        // Parent still has a child: foreign key refuses the delete.
        let err = db.delete(&EntityRef::Node(root.id)).unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)), "got {err:?}");
        db.commit().unwrap();
    }

    #[test]
    fn test_clusters_ordered_by_seq() {
        let mut db = SqliteBackend::in_memory().unwrap();
        let v = volume();
        let root = node(v.id, None, "root", NodeKind::Directory);
        let file = node(v.id, Some(root.id), "f", NodeKind::File);

        db.begin().unwrap();
        db.insert(&Record::Volume(v)).unwrap();
        db.insert(&Record::Node(root)).unwrap();
        db.insert(&Record::Node(file.clone())).unwrap();
        for seq in [2u32, 0, 1] {
            db.insert(&Record::Cluster(ClusterRecord {
                id: ClusterId::new(),
                owner_id: file.id,
                seq,
                data: vec![seq as u8; 8],
            }))
            .unwrap();
        }
        let seqs: Vec<u32> = db
            .select(&Query::Clusters(file.id))
            .unwrap()
            .into_iter()
            .filter_map(Record::into_cluster)
            .map(|c| c.seq)
            .collect();
        db.commit().unwrap();

        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_update_and_delete() {
        let mut db = SqliteBackend::in_memory().unwrap();

        db.begin().unwrap();
        let err = db.update(&Record::Volume(volume())).unwrap_err();
        assert!(matches!(err, BackendError::Missing(_)));
        let err = db.delete(&EntityRef::Node(NodeId::new())).unwrap_err();
        assert!(matches!(err, BackendError::Missing(_)));
        db.rollback().unwrap();
    }

    #[test]
    fn test_requires_transaction() {
        let mut db = SqliteBackend::in_memory().unwrap();
        assert!(matches!(
            db.select(&Query::Volumes).unwrap_err(),
            BackendError::Transaction(_)
        ));
        assert!(matches!(db.commit().unwrap_err(), BackendError::Transaction(_)));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volumes.db");
        let v = volume();

        {
            let mut db = SqliteBackend::open(&path).unwrap();
            db.begin().unwrap();
            db.insert(&Record::Volume(v.clone())).unwrap();
            db.commit().unwrap();
        }

        let mut db = SqliteBackend::open(&path).unwrap();
        db.begin().unwrap();
        assert_eq!(db.select(&Query::Volume(v.id)).unwrap(), vec![Record::Volume(v)]);
        db.commit().unwrap();
    }
}
