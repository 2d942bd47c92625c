//! Remote storage providers
//!
//! The file manager talks to the authoritative storage platform only through
//! the `RemoteFs` trait. The platform exposes files as `system/path`
//! resources with POSIX-like directories; every path below is relative to
//! the storage root and starts with the owner's home folder.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 FileManager                  │
//! └──────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//! ┌─────────────────────┐  ┌─────────────────────┐
//! │   RemoteFs trait    │  │  IndexStore trait   │
//! │ list, copy, move... │  │ listing, mirror ops │
//! └─────────────────────┘  └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    AgaveProvider    │
//! │ files/postits/jobs  │
//! └─────────────────────┘
//! ```

pub mod agave;
pub mod http_retry;
pub mod types;

pub use agave::AgaveProvider;
pub use types::*;

use async_trait::async_trait;

/// Capability set of the remote storage platform
///
/// Implementations are stateless from the caller's point of view (every
/// call carries its own system and path), so all methods take `&self` and
/// one instance can be shared behind an `Arc` by concurrent operations.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Fetch a single file or directory handle
    async fn stat(&self, system: &str, path: &str) -> Result<RemoteFile, ProviderError>;

    /// List the direct children of a directory
    async fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteFile>, ProviderError>;

    /// Server-side copy within one system; returns the new entry
    async fn copy(&self, file: &RemoteFile, dest_path: &str) -> Result<RemoteFile, ProviderError>;

    /// Server-side move within one system; returns the moved entry
    async fn move_to(&self, file: &RemoteFile, dest_path: &str) -> Result<RemoteFile, ProviderError>;

    /// Rename in place
    async fn rename(&self, file: &RemoteFile, new_name: &str) -> Result<RemoteFile, ProviderError>;

    /// Delete a file or a whole directory tree
    async fn delete(&self, file: &RemoteFile) -> Result<(), ProviderError>;

    /// Create directory `name` under `parent_path`
    async fn mkdir(&self, system: &str, parent_path: &str, name: &str) -> Result<RemoteFile, ProviderError>;

    /// Issue a temporary download link.
    /// With `force` false a link already cached on the handle may be reused.
    async fn create_temp_link(&self, file: &RemoteFile, force: bool) -> Result<TempLink, ProviderError>;

    /// Grant `level` on the entry to `username`
    async fn share(&self, file: &RemoteFile, username: &str, level: PermissionLevel) -> Result<(), ProviderError>;

    /// Read at most `max_bytes` from the start of a file
    async fn download_bytes(&self, file: &RemoteFile, max_bytes: usize) -> Result<Vec<u8>, ProviderError>;

    /// Ask `system` to ingest `url_to_ingest` into `dest_path` asynchronously
    async fn import(&self, system: &str, dest_path: &str, url_to_ingest: &str) -> Result<(), ProviderError> {
        let _ = (system, dest_path, url_to_ingest);
        Err(ProviderError::NotSupported("import".to_string()))
    }

    /// Resolve where a finished job archived its outputs
    async fn job_archive(&self, job_id: &str) -> Result<JobArchive, ProviderError> {
        let _ = job_id;
        Err(ProviderError::NotSupported("job lookup".to_string()))
    }
}
