//! Search index mirror
//!
//! The index holds one `IndexDocument` per remote file or folder so that
//! listings and searches do not have to hit the remote system. It is
//! derived data: the remote system stays authoritative and the index may
//! lag behind it. Documents form a tree through their `full_path` prefixes,
//! so recursive operations work by prefix rather than by parent links.
//!
//! Every method takes the acting username; documents are visible to a user
//! when the user owns them or holds a readable permission on them.

pub mod sqlite;

pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::file_id::join_path;
use crate::providers::{FileType, Permission, PermissionLevel, RemoteFile};

/// Index error type
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Corrupt document: {0}")]
    Corrupt(String),
}

/// Denormalized mirror of a remote entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub system: String,
    pub owner: String,
    /// Parent directory path
    pub path: String,
    pub name: String,
    /// Always `path + "/" + name`
    pub full_path: String,
    pub ext: String,
    pub file_type: FileType,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl IndexDocument {
    /// Build a document for `file`, owned by `owner`
    pub fn from_remote(owner: &str, file: &RemoteFile) -> Self {
        Self {
            system: file.system.clone(),
            owner: owner.to_string(),
            path: file.path.clone(),
            name: file.name.clone(),
            full_path: file.full_path(),
            ext: file.ext.clone(),
            file_type: file.file_type,
            size: file.size,
            last_modified: file.last_modified,
            permissions: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    pub fn file_id(&self) -> String {
        format!("{}/{}", self.system, self.full_path)
    }

    /// Whether `username` may see this document
    pub fn visible_to(&self, username: &str) -> bool {
        self.owner == username
            || self
                .permissions
                .iter()
                .any(|p| p.username == username && p.level.can_read())
    }

    /// Permission held by `username`, if any
    pub fn permission_for(&self, username: &str) -> Option<PermissionLevel> {
        self.permissions
            .iter()
            .find(|p| p.username == username)
            .map(|p| p.level)
    }

    /// Same document relocated so that its full path becomes `full_path`
    pub(crate) fn relocated(&self, full_path: &str) -> Self {
        let (path, name) = crate::file_id::split_parent(full_path);
        let mut doc = self.clone();
        doc.path = path.to_string();
        doc.name = name.to_string();
        doc.full_path = join_path(path, name);
        if !doc.is_dir() {
            doc.ext = crate::file_id::extension_of(name);
        }
        doc
    }
}

/// Capability set of the search index
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Direct children of `path` visible to `username`
    async fn listing(&self, system: &str, username: &str, path: &str) -> Result<Vec<IndexDocument>, IndexError>;

    /// Document at `full_path`, if indexed and visible to `username`
    async fn from_file_path(
        &self,
        system: &str,
        username: &str,
        full_path: &str,
    ) -> Result<Option<IndexDocument>, IndexError>;

    /// Index `file` with `owner` as its owner, replacing any existing document
    async fn from_remote(&self, owner: &str, file: &RemoteFile) -> Result<IndexDocument, IndexError>;

    /// Insert or replace a document, permissions included
    async fn save(&self, doc: &IndexDocument) -> Result<(), IndexError>;

    /// Copy a document and its descendants to `dest_full_path`.
    /// Copies are owned by `username` and carry no permissions.
    async fn copy(&self, doc: &IndexDocument, username: &str, dest_full_path: &str) -> Result<IndexDocument, IndexError>;

    /// Move a document and its descendants to `dest_full_path`
    async fn move_to(&self, doc: &IndexDocument, username: &str, dest_full_path: &str) -> Result<IndexDocument, IndexError>;

    /// Rename in place
    async fn rename(&self, doc: &IndexDocument, username: &str, new_name: &str) -> Result<IndexDocument, IndexError>;

    /// Grant `level` to `grantee` on the document and, for folders, its descendants.
    /// `PermissionLevel::None` revokes.
    async fn share(
        &self,
        doc: &IndexDocument,
        username: &str,
        grantee: &str,
        level: PermissionLevel,
    ) -> Result<IndexDocument, IndexError>;

    /// Remove the document at `full_path` and every descendant; returns the count removed
    async fn delete_recursive(&self, system: &str, full_path: &str) -> Result<u64, IndexError>;
}
