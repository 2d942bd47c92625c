//! Shared types for remote storage providers
//!
//! This module contains the types exchanged between the file manager and a
//! remote storage backend: file handles, sharing permissions, temporary
//! links, job archive descriptors and the provider error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::file_id::{extension_of, split_parent};

/// Kind of a remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::File => write!(f, "file"),
            FileType::Dir => write!(f, "dir"),
        }
    }
}

impl FromStr for FileType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(FileType::File),
            "dir" | "folder" => Ok(FileType::Dir),
            other => Err(ProviderError::ParseError(format!("unknown file type '{}'", other))),
        }
    }
}

/// Remote file/directory handle
///
/// One entry as reported by the remote storage system. `path` is the parent
/// directory relative to the storage root (its first segment is the owner's
/// home folder), so `full_path()` is always `path + "/" + name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Storage system id
    pub system: String,
    /// Owner of the home folder this entry lives in
    pub owner: String,
    /// Parent directory path
    pub path: String,
    /// File or directory name
    pub name: String,
    /// Extension including the leading dot, empty for directories
    pub ext: String,
    pub file_type: FileType,
    /// File size in bytes (0 for directories)
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Named links reported by the backend (`self`, cached `postit`, ...)
    #[serde(default)]
    pub links: HashMap<String, String>,
}

impl RemoteFile {
    /// Create a directory handle from a full path
    pub fn directory(system: &str, full_path: &str) -> Self {
        Self::new(system, full_path, FileType::Dir, 0)
    }

    /// Create a file handle from a full path
    pub fn file(system: &str, full_path: &str, size: u64) -> Self {
        Self::new(system, full_path, FileType::File, size)
    }

    fn new(system: &str, full_path: &str, file_type: FileType, size: u64) -> Self {
        let full_path = full_path.trim_matches('/');
        let (path, name) = split_parent(full_path);
        let owner = full_path.split('/').next().unwrap_or_default().to_string();
        let ext = match file_type {
            FileType::File => extension_of(name),
            FileType::Dir => String::new(),
        };

        Self {
            system: system.to_string(),
            owner,
            path: path.to_string(),
            name: name.to_string(),
            ext,
            file_type,
            size,
            last_modified: None,
            links: HashMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Opaque identifier (`system/full_path`) for this entry
    pub fn file_id(&self) -> String {
        format!("{}/{}", self.system, self.full_path())
    }
}

/// Permission level understood by the remote permissions service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    None,
    Read,
    Write,
    Execute,
    ReadWrite,
    ReadExecute,
    WriteExecute,
    All,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::None => "NONE",
            PermissionLevel::Read => "READ",
            PermissionLevel::Write => "WRITE",
            PermissionLevel::Execute => "EXECUTE",
            PermissionLevel::ReadWrite => "READ_WRITE",
            PermissionLevel::ReadExecute => "READ_EXECUTE",
            PermissionLevel::WriteExecute => "WRITE_EXECUTE",
            PermissionLevel::All => "ALL",
        }
    }

    /// Whether this level lets the grantee see the entry at all
    pub fn can_read(&self) -> bool {
        matches!(
            self,
            PermissionLevel::Read
                | PermissionLevel::ReadWrite
                | PermissionLevel::ReadExecute
                | PermissionLevel::All
        )
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(PermissionLevel::None),
            "READ" => Ok(PermissionLevel::Read),
            "WRITE" => Ok(PermissionLevel::Write),
            "EXECUTE" => Ok(PermissionLevel::Execute),
            "READ_WRITE" => Ok(PermissionLevel::ReadWrite),
            "READ_EXECUTE" => Ok(PermissionLevel::ReadExecute),
            "WRITE_EXECUTE" => Ok(PermissionLevel::WriteExecute),
            "ALL" => Ok(PermissionLevel::All),
            other => Err(ProviderError::ParseError(format!("unknown permission '{}'", other))),
        }
    }
}

/// Sharing record attached to a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub username: String,
    pub level: PermissionLevel,
}

/// Time-boxed download link issued by the remote system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempLink {
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_uses: Option<u32>,
}

/// Where a finished job left its outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArchive {
    pub job_id: String,
    pub owner: String,
    pub archive_system: String,
    pub archive_path: String,
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Timeout")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::NetworkError(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::ParseError(err.to_string())
        } else {
            ProviderError::NetworkError(err.to_string())
        }
    }
}
