//! Soft delete
//!
//! Trash is an ordinary `.Trash` folder in the owner's home. Trashing an
//! entry moves it there, renaming it first when `.Trash` already holds
//! something with the same name.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{mirror, FileManager, ManagerError};
use crate::file_id::{extension_of, FileId};
use crate::index::IndexDocument;
use crate::providers::ProviderError;

pub const TRASH_DIR: &str = ".Trash";

/// `"report.pdf"` -> `"report 2024-05-01 10-11-12.123.pdf"`
pub fn trash_name(name: &str, now: DateTime<Utc>) -> String {
    let ext = extension_of(name);
    let stem = &name[..name.len() - ext.len()];
    format!("{} {}{}", stem, now.format("%Y-%m-%d %H-%M-%S%.3f"), ext)
}

impl FileManager {
    /// Move an entry into its owner's trash folder
    pub async fn move_to_trash(&self, file_id: &str) -> Result<IndexDocument, ManagerError> {
        let id = self.parse_file_id(file_id);
        let trash = FileId::home(&id.system, &id.owner).child(TRASH_DIR);

        if id.path == trash.path || id.path.starts_with(&format!("{}/", trash.path)) {
            return Err(ManagerError::Unsupported(format!("{} is already in the trash", id)));
        }
        if id.path == id.owner {
            return Err(ManagerError::Unsupported(format!("cannot trash home folder {}", id)));
        }

        self.ensure_trash(&trash).await?;

        let mut source = id.clone();
        let collision = trash.child(id.name());
        if self.index_document(&collision).await?.is_some() {
            let new_name = trash_name(id.name(), Utc::now());
            debug!("{} already exists, trashing {} as '{}'", collision, id, new_name);
            // a failed rename leaves everything in place
            self.rename(file_id, &new_name).await?;
            source = id.sibling(&new_name);
        }

        let dest = trash.child(source.name());
        let trashed = self
            .move_file(&source.to_string(), &self.settings.resource, &dest.to_string())
            .await?;
        info!("Moved {} to trash", id);
        Ok(trashed)
    }

    /// Create the trash folder unless the index already knows it
    async fn ensure_trash(&self, trash: &FileId) -> Result<(), ManagerError> {
        if self.index_document(trash).await?.is_some() {
            return Ok(());
        }

        debug!("Creating trash folder {}", trash);
        let dir = match self
            .remote
            .mkdir(&trash.system, trash.parent_path(), TRASH_DIR)
            .await
        {
            Ok(dir) => dir,
            Err(ProviderError::AlreadyExists(_)) => self.remote_handle(trash).await?,
            Err(e) => return Err(e.into()),
        };

        mirror("mkdir", &trash.path, self.index.from_remote(&self.username, &dir).await)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trash_name_keeps_extension() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 11, 12).unwrap();
        assert_eq!(trash_name("report.pdf", now), "report 2024-05-01 10-11-12.000.pdf");
        assert_eq!(trash_name("folder", now), "folder 2024-05-01 10-11-12.000");
        assert_eq!(trash_name(".bashrc", now), ".bashrc 2024-05-01 10-11-12.000");
    }
}
