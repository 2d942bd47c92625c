//! File manager - remote storage and search index orchestration
//!
//! A `FileManager` applies one logical file operation to two independently
//! failing backends: the remote storage system, which is authoritative, and
//! the search index, which mirrors it. Every mutation runs remote first and
//! index second. There is no rollback: once the remote call succeeded its
//! result stands, and a failed index update is reported as
//! `ManagerError::IndexPending` so callers can tell "remote applied, index
//! pending" apart from "nothing happened".
//!
//! The manager holds no state of its own beyond the acting user and its
//! collaborators; it is cheap to build one per request.

mod trash;

pub use trash::{trash_name, TRASH_DIR};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{DataEvent, EventBus};
use crate::file_id::FileId;
use crate::index::{IndexDocument, IndexError, IndexStore};
use crate::preview::{strategy_for, text_excerpt, FileKind, Preview, PreviewAction, PreviewFormat, PreviewStrategy};
use crate::providers::{PermissionLevel, ProviderError, RemoteFile, RemoteFs, TempLink};
use crate::registry::{ManagerRegistry, ResourceManager};

/// File manager error type
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Move across systems or resources, unknown destination resource, ...
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote storage error: {0}")]
    Remote(#[from] ProviderError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The remote mutation is final; only its index mirror failed
    #[error("{operation} of {path} applied remotely, index update pending: {source}")]
    IndexPending {
        operation: &'static str,
        path: String,
        #[source]
        source: IndexError,
    },
}

impl ManagerError {
    /// Whether the remote storage already reflects the operation
    pub fn remote_applied(&self) -> bool {
        matches!(self, ManagerError::IndexPending { .. })
    }
}

/// Wrap an index update that follows a successful remote mutation
fn mirror<T>(operation: &'static str, path: &str, result: Result<T, IndexError>) -> Result<T, ManagerError> {
    result.map_err(|source| {
        warn!("Index update after {} of {} failed: {}", operation, path, source);
        ManagerError::IndexPending {
            operation,
            path: path.to_string(),
            source,
        }
    })
}

/// Where a listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    Index,
    Remote,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub source: ListingSource,
    pub children: Vec<IndexDocument>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CopyOutcome {
    /// Native copy within one system, index updated
    Copied { document: IndexDocument },
    /// Asynchronous ingest job submitted to another system
    ImportQueued { system: String, path: String },
    /// Handed to the destination resource's manager
    Delegated { resource: String },
}

/// Per-deployment settings of a file manager
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub resource: String,
    pub default_system: String,
    pub ingest_scheme: String,
    pub preview_text_limit: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            resource: "agave".to_string(),
            default_system: "designsafe.storage.default".to_string(),
            ingest_scheme: "agave".to_string(),
            preview_text_limit: 256 * 1024,
        }
    }
}

pub struct FileManager {
    username: String,
    settings: ManagerSettings,
    remote: Arc<dyn RemoteFs>,
    index: Arc<dyn IndexStore>,
    registry: Weak<ManagerRegistry>,
    events: Option<EventBus>,
}

impl FileManager {
    pub fn new(
        username: &str,
        settings: ManagerSettings,
        remote: Arc<dyn RemoteFs>,
        index: Arc<dyn IndexStore>,
        registry: &Arc<ManagerRegistry>,
    ) -> Self {
        Self {
            username: username.to_string(),
            settings,
            remote,
            index,
            registry: Arc::downgrade(registry),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn parse_file_id(&self, file_id: &str) -> FileId {
        FileId::parse(file_id, &self.settings.default_system, &self.username)
    }

    /// True when the identifier points into another user's home folder
    pub fn is_shared(&self, file_id: &str) -> bool {
        self.parse_file_id(file_id).owner != self.username
    }

    async fn lookup_manager(&self, resource: &str) -> Option<Arc<dyn ResourceManager>> {
        match self.registry.upgrade() {
            Some(registry) => registry.lookup(resource).await,
            None => None,
        }
    }

    async fn remote_handle(&self, id: &FileId) -> Result<RemoteFile, ManagerError> {
        self.remote
            .stat(&id.system, &id.path)
            .await
            .map_err(|e| match e {
                ProviderError::NotFound(_) => ManagerError::NotFound(id.to_string()),
                other => ManagerError::Remote(other),
            })
    }

    async fn index_document(&self, id: &FileId) -> Result<Option<IndexDocument>, ManagerError> {
        Ok(self
            .index
            .from_file_path(&id.system, &self.username, &id.path)
            .await?)
    }

    /// Children of a folder, from the index when it has any, else from the remote system.
    /// The remote fallback never writes to the index.
    pub async fn listing(&self, file_id: &str) -> Result<Listing, ManagerError> {
        let id = self.parse_file_id(file_id);
        let children = self.index.listing(&id.system, &self.username, &id.path).await?;
        if !children.is_empty() {
            debug!("Listing {} served from index ({} entries)", id, children.len());
            return Ok(Listing {
                source: ListingSource::Index,
                children,
            });
        }

        debug!("Index has no entries under {}, listing remote", id);
        let children = self
            .remote
            .list(&id.system, &id.path)
            .await?
            .iter()
            .map(|file| IndexDocument::from_remote(&file.owner, file))
            .collect();
        Ok(Listing {
            source: ListingSource::Remote,
            children,
        })
    }

    /// Copy within this resource (native or by import) or hand off to another resource
    pub async fn copy(
        &self,
        file_id: &str,
        dest_resource: &str,
        dest_file_id: &str,
    ) -> Result<CopyOutcome, ManagerError> {
        if dest_resource != self.settings.resource {
            let manager = self.lookup_manager(dest_resource).await.ok_or_else(|| {
                ManagerError::Unsupported(format!("unknown destination resource '{}'", dest_resource))
            })?;
            debug!("Delegating copy of {} to resource {}", file_id, dest_resource);
            manager
                .import_file(dest_file_id, &self.settings.resource, file_id)
                .await?;
            info!("Copy of {} handed to {}", file_id, dest_resource);
            return Ok(CopyOutcome::Delegated {
                resource: dest_resource.to_string(),
            });
        }

        let source = self.parse_file_id(file_id);
        let dest = self.parse_file_id(dest_file_id);

        if source.system != dest.system {
            let uri = source.to_uri(&self.settings.ingest_scheme);
            debug!("Cross-system copy of {} via import into {}", source, dest);
            self.remote.import(&dest.system, &dest.path, &uri).await?;
            info!("Queued import of {} into {}", uri, dest);
            return Ok(CopyOutcome::ImportQueued {
                system: dest.system,
                path: dest.path,
            });
        }

        let file = self.remote_handle(&source).await?;
        let doc = self.index_document(&source).await?;
        let copied = self.remote.copy(&file, &dest.path).await?;
        info!("Copied {} to {}", source, copied.file_id());

        let document = match doc {
            Some(doc) => mirror("copy", &dest.path, self.index.copy(&doc, &self.username, &dest.path).await)?,
            None => mirror("copy", &dest.path, self.index.from_remote(&self.username, &copied).await)?,
        };
        Ok(CopyOutcome::Copied { document })
    }

    /// Move within one system of this resource; anything else is rejected up front
    pub async fn move_file(
        &self,
        file_id: &str,
        dest_resource: &str,
        dest_file_id: &str,
    ) -> Result<IndexDocument, ManagerError> {
        let source = self.parse_file_id(file_id);
        let dest = self.parse_file_id(dest_file_id);

        if dest_resource != self.settings.resource {
            return Err(ManagerError::Unsupported(format!(
                "cannot move {} to resource '{}'; copy and delete instead",
                source, dest_resource
            )));
        }
        if source.system != dest.system {
            return Err(ManagerError::Unsupported(format!(
                "cannot move {} across systems to {}; copy and delete instead",
                source, dest
            )));
        }

        let file = self.remote_handle(&source).await?;
        let doc = self.index_document(&source).await?;
        let moved = self.remote.move_to(&file, &dest.path).await?;
        info!("Moved {} to {}", source, moved.file_id());

        match doc {
            Some(doc) => mirror("move", &dest.path, self.index.move_to(&doc, &self.username, &dest.path).await),
            None => mirror("move", &dest.path, self.index.from_remote(&source.owner, &moved).await),
        }
    }

    /// Delete remotely, then drop the document and every descendant from the index.
    /// Returns the number of index documents removed.
    pub async fn delete(&self, file_id: &str) -> Result<u64, ManagerError> {
        let id = self.parse_file_id(file_id);
        let file = self.remote_handle(&id).await?;
        self.remote.delete(&file).await?;
        info!("Deleted {}", id);

        mirror("delete", &id.path, self.index.delete_recursive(&id.system, &id.path).await)
    }

    /// Create `name` inside the folder `file_id`; the new folder is owned by the acting user
    pub async fn mkdir(&self, file_id: &str, name: &str) -> Result<IndexDocument, ManagerError> {
        let parent = self.parse_file_id(file_id);
        let dir = self.remote.mkdir(&parent.system, &parent.path, name).await?;
        info!("Created {}", dir.file_id());

        mirror("mkdir", &dir.full_path(), self.index.from_remote(&self.username, &dir).await)
    }

    pub async fn rename(&self, file_id: &str, new_name: &str) -> Result<IndexDocument, ManagerError> {
        let id = self.parse_file_id(file_id);
        let file = self.remote_handle(&id).await?;
        let doc = self.index_document(&id).await?;
        let renamed = self.remote.rename(&file, new_name).await?;
        info!("Renamed {} to {}", id, renamed.name);

        match doc {
            Some(doc) => mirror("rename", &id.path, self.index.rename(&doc, &self.username, new_name).await),
            None => mirror("rename", &id.path, self.index.from_remote(&id.owner, &renamed).await),
        }
    }

    /// Grant `level` to `grantee`, acting user as grantor, on both backends
    pub async fn share(
        &self,
        file_id: &str,
        grantee: &str,
        level: PermissionLevel,
    ) -> Result<IndexDocument, ManagerError> {
        let id = self.parse_file_id(file_id);
        let file = self.remote_handle(&id).await?;
        let doc = self.index_document(&id).await?;
        self.remote.share(&file, grantee, level).await?;
        info!("{} granted {} on {} to {}", self.username, level, id, grantee);

        let doc = match doc {
            Some(doc) => doc,
            None => mirror("share", &id.path, self.index.from_remote(&id.owner, &file).await)?,
        };
        let shared = mirror(
            "share",
            &id.path,
            self.index.share(&doc, &self.username, grantee, level).await,
        )?;

        if let Some(events) = &self.events {
            events.publish(DataEvent::ShareStarted {
                recipient: self.username.clone(),
                grantor: self.username.clone(),
                grantee: grantee.to_string(),
                permission: level,
                file_id: id.to_string(),
            });
        }
        Ok(shared)
    }

    /// Fresh temporary link for a file; folders have none
    pub async fn download(&self, file_id: &str) -> Result<Option<TempLink>, ManagerError> {
        let id = self.parse_file_id(file_id);
        let file = self.remote_handle(&id).await?;
        if file.is_dir() {
            debug!("No download link for folder {}", id);
            return Ok(None);
        }
        Ok(Some(self.remote.create_temp_link(&file, true).await?))
    }

    pub async fn preview(&self, file_id: &str, format: PreviewFormat) -> Result<Preview, ManagerError> {
        let id = self.parse_file_id(file_id);
        let file = self.remote_handle(&id).await?;
        let kind = if file.is_dir() {
            FileKind::Unsupported
        } else {
            FileKind::classify(&file.ext)
        };
        let strategy = strategy_for(kind);
        debug!("Preview of {} as {:?} via {:?}", id, kind, strategy);

        let action = match strategy {
            PreviewStrategy::InlineLink | PreviewStrategy::ViewerLink => PreviewAction::Link {
                link: self.remote.create_temp_link(&file, false).await?,
                inline: strategy == PreviewStrategy::InlineLink,
            },
            PreviewStrategy::StreamContent => {
                // one byte past the limit tells a cut excerpt from an exact fit
                let limit = self.settings.preview_text_limit;
                let bytes = self.remote.download_bytes(&file, limit.saturating_add(1)).await?;
                let (text, truncated) = text_excerpt(&bytes, limit);
                PreviewAction::Content { text, truncated }
            }
            PreviewStrategy::NoPreview => PreviewAction::Unavailable,
        };

        Ok(Preview::new(file.file_id(), kind, action, format))
    }
}

#[async_trait]
impl ResourceManager for FileManager {
    fn resource(&self) -> &str {
        &self.settings.resource
    }

    /// Submit an import job that pulls the source into `dest_file_id`
    async fn import_file(
        &self,
        dest_file_id: &str,
        source_resource: &str,
        source_file_id: &str,
    ) -> Result<(), ManagerError> {
        let dest = self.parse_file_id(dest_file_id);
        let url = if source_resource == self.settings.resource {
            self.parse_file_id(source_file_id)
                .to_uri(&self.settings.ingest_scheme)
        } else {
            let source = self.lookup_manager(source_resource).await.ok_or_else(|| {
                ManagerError::Unsupported(format!("unknown source resource '{}'", source_resource))
            })?;
            source.export_url(source_file_id).await?
        };

        self.remote.import(&dest.system, &dest.path, &url).await?;
        info!("Importing {} from {} into {}", source_file_id, source_resource, dest);
        Ok(())
    }

    async fn export_url(&self, file_id: &str) -> Result<String, ManagerError> {
        let id = self.parse_file_id(file_id);
        let file = self.remote_handle(&id).await?;
        if file.is_dir() {
            return Err(ManagerError::Unsupported(format!("cannot export folder {}", id)));
        }
        Ok(self.remote.create_temp_link(&file, true).await?.url)
    }
}
