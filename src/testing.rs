//! Test doubles shared by the unit tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::events::EventBus;
use crate::file_id::join_path;
use crate::index::SqliteIndex;
use crate::manager::{FileManager, ManagerSettings};
use crate::providers::{JobArchive, PermissionLevel, ProviderError, RemoteFile, RemoteFs, TempLink};
use crate::registry::ManagerRegistry;

pub const SYSTEM: &str = "data.storage";
pub const OTHER_SYSTEM: &str = "data.community";
pub const USER: &str = "alice";

/// In-memory `RemoteFs` that records every call as `"<op> <args>"`
#[derive(Default)]
pub struct FakeRemote {
    tree: Mutex<BTreeMap<String, RemoteFile>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    jobs: Mutex<HashMap<String, JobArchive>>,
    unreadable: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
    bytes_served: Mutex<usize>,
}

fn key(system: &str, path: &str) -> String {
    format!("{}/{}", system, path.trim_matches('/'))
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_dir(&self, system: &str, path: &str) -> RemoteFile {
        let dir = RemoteFile::directory(system, path);
        self.tree.lock().unwrap().insert(dir.file_id(), dir.clone());
        dir
    }

    pub fn add_file(&self, system: &str, path: &str, content: &[u8]) -> RemoteFile {
        let file = RemoteFile::file(system, path, content.len() as u64);
        self.tree.lock().unwrap().insert(file.file_id(), file.clone());
        self.content.lock().unwrap().insert(file.file_id(), content.to_vec());
        file
    }

    pub fn add_job(&self, archive: JobArchive) {
        self.jobs.lock().unwrap().insert(archive.job_id.clone(), archive);
    }

    /// Listing this directory fails
    pub fn make_unreadable(&self, system: &str, path: &str) {
        self.unreadable.lock().unwrap().insert(key(system, path));
    }

    /// Every later call to `op` fails with a server error
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn exists(&self, system: &str, path: &str) -> bool {
        self.tree.lock().unwrap().contains_key(&key(system, path))
    }

    /// Content bytes handed out by `download_bytes`
    pub fn bytes_served(&self) -> usize {
        *self.bytes_served.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Arguments of every recorded call to `op`
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        let prefix = format!("{} ", op);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn record(&self, op: &'static str, args: String) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(format!("{} {}", op, args));
        if self.failing.lock().unwrap().contains(op) {
            return Err(ProviderError::ServerError(format!("{} failed", op)));
        }
        Ok(())
    }

    fn get(&self, system: &str, path: &str) -> Result<RemoteFile, ProviderError> {
        self.tree
            .lock()
            .unwrap()
            .get(&key(system, path))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(key(system, path)))
    }

    /// Entries at or below `file`
    fn subtree(&self, file: &RemoteFile) -> Vec<RemoteFile> {
        let root = file.file_id();
        let prefix = format!("{}/", root);
        self.tree
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| **k == root || k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn place(&self, file: &RemoteFile, dest_path: &str, remove_source: bool) -> RemoteFile {
        let dest_path = dest_path.trim_matches('/');
        let entries = self.subtree(file);
        let source_root = file.full_path();
        let mut tree = self.tree.lock().unwrap();
        let mut content = self.content.lock().unwrap();
        let mut root = None;

        for entry in entries {
            let suffix = &entry.full_path()[source_root.len()..];
            let new_path = format!("{}{}", dest_path, suffix);
            let mut moved = if entry.is_dir() {
                RemoteFile::directory(&entry.system, &new_path)
            } else {
                RemoteFile::file(&entry.system, &new_path, entry.size)
            };
            moved.last_modified = entry.last_modified;

            let bytes = if remove_source {
                tree.remove(&entry.file_id());
                content.remove(&entry.file_id())
            } else {
                content.get(&entry.file_id()).cloned()
            };
            if let Some(bytes) = bytes {
                content.insert(moved.file_id(), bytes);
            }
            tree.insert(moved.file_id(), moved.clone());
            if suffix.is_empty() {
                root = Some(moved);
            }
        }
        root.unwrap_or_else(|| RemoteFile::directory(&file.system, dest_path))
    }
}

#[async_trait]
impl RemoteFs for FakeRemote {
    async fn stat(&self, system: &str, path: &str) -> Result<RemoteFile, ProviderError> {
        self.record("stat", key(system, path))?;
        self.get(system, path)
    }

    async fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        self.record("list", key(system, path))?;
        if self.unreadable.lock().unwrap().contains(&key(system, path)) {
            return Err(ProviderError::PermissionDenied(key(system, path)));
        }
        let parent = path.trim_matches('/');
        Ok(self
            .tree
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.system == system && f.path == parent)
            .cloned()
            .collect())
    }

    async fn copy(&self, file: &RemoteFile, dest_path: &str) -> Result<RemoteFile, ProviderError> {
        self.record("copy", format!("{} -> {}", file.file_id(), dest_path))?;
        Ok(self.place(file, dest_path, false))
    }

    async fn move_to(&self, file: &RemoteFile, dest_path: &str) -> Result<RemoteFile, ProviderError> {
        self.record("move", format!("{} -> {}", file.file_id(), dest_path))?;
        Ok(self.place(file, dest_path, true))
    }

    async fn rename(&self, file: &RemoteFile, new_name: &str) -> Result<RemoteFile, ProviderError> {
        self.record("rename", format!("{} -> {}", file.file_id(), new_name))?;
        Ok(self.place(file, &join_path(&file.path, new_name), true))
    }

    async fn delete(&self, file: &RemoteFile) -> Result<(), ProviderError> {
        self.record("delete", file.file_id())?;
        let entries = self.subtree(file);
        let mut tree = self.tree.lock().unwrap();
        for entry in entries {
            tree.remove(&entry.file_id());
        }
        Ok(())
    }

    async fn mkdir(&self, system: &str, parent_path: &str, name: &str) -> Result<RemoteFile, ProviderError> {
        let path = join_path(parent_path, name);
        self.record("mkdir", key(system, &path))?;
        if self.exists(system, &path) {
            return Err(ProviderError::AlreadyExists(key(system, &path)));
        }
        Ok(self.add_dir(system, &path))
    }

    async fn create_temp_link(&self, file: &RemoteFile, force: bool) -> Result<TempLink, ProviderError> {
        self.record("create_temp_link", format!("{} force={}", file.file_id(), force))?;
        Ok(TempLink {
            url: format!("https://tenant.test/postits/{}", file.name),
            expires_at: None,
            remaining_uses: Some(1),
        })
    }

    async fn share(&self, file: &RemoteFile, username: &str, level: PermissionLevel) -> Result<(), ProviderError> {
        self.record("share", format!("{} {} {}", file.file_id(), username, level))
    }

    async fn download_bytes(&self, file: &RemoteFile, max_bytes: usize) -> Result<Vec<u8>, ProviderError> {
        self.record("download_bytes", format!("{} max={}", file.file_id(), max_bytes))?;
        let content = self.content.lock().unwrap();
        let bytes = content.get(&file.file_id()).map(Vec::as_slice).unwrap_or_default();
        let served = bytes[..bytes.len().min(max_bytes)].to_vec();
        *self.bytes_served.lock().unwrap() += served.len();
        Ok(served)
    }

    async fn import(&self, system: &str, dest_path: &str, url_to_ingest: &str) -> Result<(), ProviderError> {
        self.record("import", format!("{} {}", key(system, dest_path), url_to_ingest))
    }

    async fn job_archive(&self, job_id: &str) -> Result<JobArchive, ProviderError> {
        self.record("job_archive", job_id.to_string())?;
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("job {}", job_id)))
    }
}

/// A manager for `USER` over a fake remote and an in-memory index
pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub index: Arc<SqliteIndex>,
    pub registry: Arc<ManagerRegistry>,
    pub events: EventBus,
    pub manager: FileManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::for_user(USER)
    }

    pub fn for_user(username: &str) -> Self {
        let remote = FakeRemote::new();
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let registry = Arc::new(ManagerRegistry::new());
        let events = EventBus::new(16);
        let settings = ManagerSettings {
            default_system: SYSTEM.to_string(),
            preview_text_limit: 64,
            ..ManagerSettings::default()
        };
        let manager = FileManager::new(username, settings, remote.clone(), index.clone(), &registry)
            .with_events(events.clone());
        Self {
            remote,
            index,
            registry,
            events,
            manager,
        }
    }

    pub fn id(path: &str) -> String {
        key(SYSTEM, path)
    }
}
