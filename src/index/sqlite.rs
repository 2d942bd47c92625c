/// SQLite index backend
///
/// Stores index documents in a single SQLite database with WAL mode. One
/// row per remote entry, unique on `(system, full_path)`, plus a
/// `permissions` table that cascades when its document goes away. Tree
/// operations rewrite a document and its descendants inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{IndexDocument, IndexError, IndexStore};
use crate::file_id::join_path;
use crate::providers::{FileType, Permission, PermissionLevel, RemoteFile};

const DOC_COLUMNS: &str =
    "id, system, path, name, full_path, owner, ext, file_type, size, last_modified";

pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

/// Raw `documents` row before its text columns are validated
struct DocRow {
    id: i64,
    system: String,
    path: String,
    name: String,
    full_path: String,
    owner: String,
    ext: String,
    file_type: String,
    size: i64,
    last_modified: Option<String>,
}

impl DocRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            system: row.get(1)?,
            path: row.get(2)?,
            name: row.get(3)?,
            full_path: row.get(4)?,
            owner: row.get(5)?,
            ext: row.get(6)?,
            file_type: row.get(7)?,
            size: row.get(8)?,
            last_modified: row.get(9)?,
        })
    }

    fn into_document(self, permissions: Vec<Permission>) -> Result<(i64, IndexDocument), IndexError> {
        let file_type: FileType = self
            .file_type
            .parse()
            .map_err(|_| IndexError::Corrupt(format!("{}: file type '{}'", self.full_path, self.file_type)))?;
        let last_modified = match self.last_modified {
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(&ts)
                    .map_err(|_| IndexError::Corrupt(format!("{}: timestamp '{}'", self.full_path, ts)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok((
            self.id,
            IndexDocument {
                system: self.system,
                owner: self.owner,
                path: self.path,
                name: self.name,
                full_path: self.full_path,
                ext: self.ext,
                file_type,
                size: self.size.max(0) as u64,
                last_modified,
                permissions,
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initialize schema on an already-opened connection
pub fn init_db_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            system TEXT NOT NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            full_path TEXT NOT NULL,
            owner TEXT NOT NULL,
            ext TEXT NOT NULL DEFAULT '',
            file_type TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            last_modified TEXT,
            UNIQUE(system, full_path)
        );

        CREATE TABLE IF NOT EXISTS permissions (
            doc_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            level TEXT NOT NULL,
            FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE,
            UNIQUE(doc_id, username)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(system, path);
        CREATE INDEX IF NOT EXISTS idx_permissions_user ON permissions(username);",
    )?;

    Ok(())
}

impl SqliteIndex {
    /// Open (or create) the index database at `path`
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_db_schema(&conn)?;
        tracing::debug!("Opened index at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        init_db_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Acquire DB lock with poison recovery
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| {
            tracing::warn!("Index DB mutex was poisoned, recovering: {e}");
            e.into_inner()
        })
    }
}

// ---------------------------------------------------------------------------
// Row helpers (all run under the connection lock)
// ---------------------------------------------------------------------------

/// Prefix shared by every descendant of `full_path`, with its length in characters.
/// Matched with `substr` so the comparison stays case-sensitive.
fn descendant_prefix(full_path: &str) -> (String, i64) {
    let prefix = format!("{}/", full_path);
    let len = prefix.chars().count() as i64;
    (prefix, len)
}

fn load_permissions(conn: &Connection, doc_id: i64) -> Result<Vec<Permission>, IndexError> {
    let mut stmt = conn.prepare_cached(
        "SELECT username, level FROM permissions WHERE doc_id = ?1 ORDER BY username",
    )?;
    let rows = stmt.query_map(params![doc_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    Ok(rows
        .filter_map(|r| match r {
            Ok((username, level)) => match level.parse::<PermissionLevel>() {
                Ok(level) => Some(Permission { username, level }),
                Err(e) => {
                    tracing::warn!("Skipping permission row for doc {doc_id}: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Row decode error in permissions: {e}");
                None
            }
        })
        .collect())
}

fn query_documents(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<(i64, IndexDocument)>, IndexError> {
    let sql = format!("SELECT {} FROM documents WHERE {}", DOC_COLUMNS, where_clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<DocRow> = stmt
        .query_map(params, DocRow::from_row)?
        .filter_map(|r| match r {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::warn!("Row decode error in documents: {e}");
                None
            }
        })
        .collect();

    let mut docs = Vec::with_capacity(rows.len());
    for row in rows {
        let permissions = load_permissions(conn, row.id)?;
        match row.into_document(permissions) {
            Ok(doc) => docs.push(doc),
            Err(e) => tracing::warn!("Skipping index document: {e}"),
        }
    }
    Ok(docs)
}

fn find(conn: &Connection, system: &str, full_path: &str) -> Result<Option<(i64, IndexDocument)>, IndexError> {
    let sql = format!(
        "SELECT {} FROM documents WHERE system = ?1 AND full_path = ?2",
        DOC_COLUMNS
    );
    let row = conn
        .query_row(&sql, params![system, full_path], DocRow::from_row)
        .optional()?;
    match row {
        Some(row) => {
            let permissions = load_permissions(conn, row.id)?;
            row.into_document(permissions).map(Some)
        }
        None => Ok(None),
    }
}

/// Document at `full_path` followed by all of its descendants
fn subtree(conn: &Connection, system: &str, full_path: &str) -> Result<Vec<(i64, IndexDocument)>, IndexError> {
    let (prefix, len) = descendant_prefix(full_path);
    query_documents(
        conn,
        "system = ?1 AND (full_path = ?2 OR substr(full_path, 1, ?4) = ?3) ORDER BY length(full_path)",
        &[&system, &full_path, &prefix, &len],
    )
}

fn delete_subtree(conn: &Connection, system: &str, full_path: &str) -> Result<u64, IndexError> {
    let (prefix, len) = descendant_prefix(full_path);
    let removed = conn.execute(
        "DELETE FROM documents
         WHERE system = ?1 AND (full_path = ?2 OR substr(full_path, 1, ?4) = ?3)",
        params![system, full_path, prefix, len],
    )?;
    Ok(removed as u64)
}

/// Insert or update the metadata columns; returns the row id
fn upsert_metadata(conn: &Connection, doc: &IndexDocument) -> Result<i64, IndexError> {
    let id = conn.query_row(
        "INSERT INTO documents (system, path, name, full_path, owner, ext, file_type, size, last_modified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(system, full_path) DO UPDATE SET
            path = excluded.path,
            name = excluded.name,
            owner = excluded.owner,
            ext = excluded.ext,
            file_type = excluded.file_type,
            size = excluded.size,
            last_modified = excluded.last_modified
         RETURNING id",
        params![
            doc.system,
            doc.path,
            doc.name,
            doc.full_path,
            doc.owner,
            doc.ext,
            doc.file_type.to_string(),
            doc.size as i64,
            doc.last_modified.map(|ts| ts.to_rfc3339()),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn replace_permissions(conn: &Connection, doc_id: i64, permissions: &[Permission]) -> Result<(), IndexError> {
    conn.execute("DELETE FROM permissions WHERE doc_id = ?1", params![doc_id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO permissions (doc_id, username, level) VALUES (?1, ?2, ?3)",
    )?;
    for perm in permissions.iter().filter(|p| p.level != PermissionLevel::None) {
        stmt.execute(params![doc_id, perm.username, perm.level.as_str()])?;
    }
    Ok(())
}

fn set_permission(conn: &Connection, doc_id: i64, username: &str, level: PermissionLevel) -> Result<(), IndexError> {
    if level == PermissionLevel::None {
        conn.execute(
            "DELETE FROM permissions WHERE doc_id = ?1 AND username = ?2",
            params![doc_id, username],
        )?;
    } else {
        conn.execute(
            "INSERT INTO permissions (doc_id, username, level) VALUES (?1, ?2, ?3)
             ON CONFLICT(doc_id, username) DO UPDATE SET level = excluded.level",
            params![doc_id, username, level.as_str()],
        )?;
    }
    Ok(())
}

/// Current stored version of `doc`, checked against the acting user
fn scoped(conn: &Connection, doc: &IndexDocument, username: &str) -> Result<IndexDocument, IndexError> {
    match find(conn, &doc.system, &doc.full_path)? {
        Some((_, current)) if current.visible_to(username) => Ok(current),
        _ => Err(IndexError::NotFound(doc.file_id())),
    }
}

/// Rewrite the subtree rooted at `source` under `dest_full_path`.
/// `adjust` is applied to every relocated document before it is stored.
fn relocate_subtree(
    conn: &Connection,
    source: &IndexDocument,
    dest_full_path: &str,
    remove_source: bool,
    adjust: impl Fn(&mut IndexDocument),
) -> Result<IndexDocument, IndexError> {
    let dest_full_path = dest_full_path.trim_matches('/');
    let tree = subtree(conn, &source.system, &source.full_path)?;

    // whatever already sits at the destination is replaced
    delete_subtree(conn, &source.system, dest_full_path)?;
    if remove_source {
        delete_subtree(conn, &source.system, &source.full_path)?;
    }

    let mut root = None;
    for (_, doc) in tree {
        let suffix = &doc.full_path[source.full_path.len()..];
        let mut moved = doc.relocated(&format!("{}{}", dest_full_path, suffix));
        adjust(&mut moved);
        let id = upsert_metadata(conn, &moved)?;
        replace_permissions(conn, id, &moved.permissions)?;
        if suffix.is_empty() {
            root = Some(moved);
        }
    }

    root.ok_or_else(|| IndexError::NotFound(source.file_id()))
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn listing(&self, system: &str, username: &str, path: &str) -> Result<Vec<IndexDocument>, IndexError> {
        let conn = self.lock();
        let path = path.trim_matches('/');
        let docs = query_documents(
            &conn,
            "system = ?1 AND path = ?2 ORDER BY file_type, name",
            &[&system, &path],
        )?;
        Ok(docs
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| doc.visible_to(username))
            .collect())
    }

    async fn from_file_path(
        &self,
        system: &str,
        username: &str,
        full_path: &str,
    ) -> Result<Option<IndexDocument>, IndexError> {
        let conn = self.lock();
        Ok(find(&conn, system, full_path.trim_matches('/'))?
            .map(|(_, doc)| doc)
            .filter(|doc| doc.visible_to(username)))
    }

    /// Permissions already recorded for the path are kept
    async fn from_remote(&self, owner: &str, file: &RemoteFile) -> Result<IndexDocument, IndexError> {
        let conn = self.lock();
        let mut doc = IndexDocument::from_remote(owner, file);
        let id = upsert_metadata(&conn, &doc)?;
        doc.permissions = load_permissions(&conn, id)?;
        Ok(doc)
    }

    async fn save(&self, doc: &IndexDocument) -> Result<(), IndexError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let id = upsert_metadata(&tx, doc)?;
        replace_permissions(&tx, id, &doc.permissions)?;
        tx.commit()?;
        Ok(())
    }

    async fn copy(&self, doc: &IndexDocument, username: &str, dest_full_path: &str) -> Result<IndexDocument, IndexError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let source = scoped(&tx, doc, username)?;
        let copied = relocate_subtree(&tx, &source, dest_full_path, false, |d| {
            d.owner = username.to_string();
            d.permissions.clear();
        })?;
        tx.commit()?;
        Ok(copied)
    }

    async fn move_to(&self, doc: &IndexDocument, username: &str, dest_full_path: &str) -> Result<IndexDocument, IndexError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let source = scoped(&tx, doc, username)?;
        if source.full_path == dest_full_path.trim_matches('/') {
            return Ok(source);
        }
        let moved = relocate_subtree(&tx, &source, dest_full_path, true, |_| {})?;
        tx.commit()?;
        Ok(moved)
    }

    async fn rename(&self, doc: &IndexDocument, username: &str, new_name: &str) -> Result<IndexDocument, IndexError> {
        let dest = join_path(&doc.path, new_name);
        self.move_to(doc, username, &dest).await
    }

    async fn share(
        &self,
        doc: &IndexDocument,
        username: &str,
        grantee: &str,
        level: PermissionLevel,
    ) -> Result<IndexDocument, IndexError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let source = scoped(&tx, doc, username)?;

        let targets = if source.is_dir() {
            subtree(&tx, &source.system, &source.full_path)?
        } else {
            find(&tx, &source.system, &source.full_path)?.into_iter().collect()
        };
        for (id, _) in &targets {
            set_permission(&tx, *id, grantee, level)?;
        }

        let updated = find(&tx, &source.system, &source.full_path)?
            .map(|(_, d)| d)
            .ok_or_else(|| IndexError::NotFound(source.file_id()))?;
        tx.commit()?;
        Ok(updated)
    }

    async fn delete_recursive(&self, system: &str, full_path: &str) -> Result<u64, IndexError> {
        let conn = self.lock();
        let removed = delete_subtree(&conn, system, full_path.trim_matches('/'))?;
        tracing::debug!("Removed {} index documents under {}/{}", removed, system, full_path);
        Ok(removed)
    }
}
