//! Opaque file identifiers
//!
//! Callers address files as `"<system>/<owner>/<path...>"`. The path keeps
//! the owner's home folder as its first segment, mirroring the remote
//! layout where every user's files live under a folder named after them.
//! Parsing never fails: missing pieces fall back to the caller's defaults.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parsed file identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    pub system: String,
    pub owner: String,
    /// Path relative to the storage root, starting with the owner segment
    pub path: String,
}

impl FileId {
    /// Parse an opaque identifier.
    ///
    /// An empty identifier resolves to the acting user's home folder on the
    /// default system; an identifier with only a system segment resolves to
    /// the acting user's home folder on that system.
    pub fn parse(id: &str, default_system: &str, username: &str) -> Self {
        let id = id.trim().trim_matches('/');

        if id.is_empty() {
            return Self::home(default_system, username);
        }

        match id.split_once('/') {
            Some((system, rest)) => {
                let rest = rest.trim_matches('/');
                if rest.is_empty() {
                    return Self::home(system, username);
                }
                let owner = rest.split('/').next().unwrap_or(username);
                Self {
                    system: system.to_string(),
                    owner: owner.to_string(),
                    path: rest.to_string(),
                }
            }
            None => Self::home(id, username),
        }
    }

    /// Home folder of `username` on `system`
    pub fn home(system: &str, username: &str) -> Self {
        Self {
            system: system.to_string(),
            owner: username.to_string(),
            path: username.to_string(),
        }
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        split_parent(&self.path).1
    }

    /// Parent directory path (empty for a home folder)
    pub fn parent_path(&self) -> &str {
        split_parent(&self.path).0
    }

    /// Identifier of a direct child of this path
    pub fn child(&self, name: &str) -> Self {
        Self {
            system: self.system.clone(),
            owner: self.owner.clone(),
            path: join_path(&self.path, name),
        }
    }

    /// Identifier of a sibling entry (same parent, different name)
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            system: self.system.clone(),
            owner: self.owner.clone(),
            path: join_path(self.parent_path(), name),
        }
    }

    /// Fully-qualified URI used when asking a system to ingest this file
    pub fn to_uri(&self, scheme: &str) -> String {
        format!("{}://{}", scheme, self)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system, self.path)
    }
}

/// Split `a/b/c` into (`a/b`, `c`)
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Extension including the leading dot; dotfiles have none
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM: &str = "designsafe.storage.default";

    #[test]
    fn test_empty_id_resolves_to_home() {
        let id = FileId::parse("", SYSTEM, "alice");
        assert_eq!(id.system, SYSTEM);
        assert_eq!(id.owner, "alice");
        assert_eq!(id.path, "alice");

        assert_eq!(FileId::parse("  /  ", SYSTEM, "alice"), id);
    }

    #[test]
    fn test_folder_and_file_ids() {
        let id = FileId::parse(&format!("{}/alice/path/to/folder", SYSTEM), SYSTEM, "alice");
        assert_eq!(id.system, SYSTEM);
        assert_eq!(id.owner, "alice");
        assert_eq!(id.path, "alice/path/to/folder");

        let id = FileId::parse("other.system/bob/path/to/file.txt", SYSTEM, "alice");
        assert_eq!(id.system, "other.system");
        assert_eq!(id.owner, "bob");
        assert_eq!(id.path, "bob/path/to/file.txt");
        assert_eq!(id.name(), "file.txt");
        assert_eq!(id.parent_path(), "bob/path/to");
        assert_eq!(id.to_string(), "other.system/bob/path/to/file.txt");
    }

    #[test]
    fn test_system_only_id() {
        let id = FileId::parse("other.system", SYSTEM, "alice");
        assert_eq!(id, FileId::home("other.system", "alice"));
        assert_eq!(FileId::parse("other.system/", SYSTEM, "alice"), id);
    }

    #[test]
    fn test_child_sibling_and_uri() {
        let id = FileId::parse(&format!("{}/alice/docs/a.txt", SYSTEM), SYSTEM, "alice");
        assert_eq!(id.sibling("b.txt").path, "alice/docs/b.txt");
        assert_eq!(FileId::home(SYSTEM, "alice").child(".Trash").path, "alice/.Trash");
        assert_eq!(id.to_uri("agave"), format!("agave://{}/alice/docs/a.txt", SYSTEM));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("img.png"), ".png");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of(".bashrc"), "");
    }
}
