//! Job output reindexing
//!
//! When a remote job reaches the `INDEXING` stage its archived outputs are
//! walked on the remote system and written to the index, so they show up in
//! index-backed listings. Directory listings run in parallel (bounded by a
//! semaphore) while index writes stay serial, one document at a time.
//! Folders that cannot be listed are logged and skipped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::events::{DataEvent, EventBus};
use crate::file_id::split_parent;
use crate::index::{IndexError, IndexStore};
use crate::providers::{ProviderError, RemoteFile, RemoteFs};

#[derive(Error, Debug)]
pub enum ReindexError {
    #[error("Remote storage error: {0}")]
    Remote(#[from] ProviderError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Reindex queue is closed")]
    QueueClosed,
}

/// Remote job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Staged,
    Queued,
    Running,
    Archiving,
    Indexing,
    Finished,
    Failed,
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Staged => "STAGED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Archiving => "ARCHIVING",
            JobStatus::Indexing => "INDEXING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "STAGED" => Ok(JobStatus::Staged),
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "ARCHIVING" => Ok(JobStatus::Archiving),
            "INDEXING" => Ok(JobStatus::Indexing),
            "FINISHED" => Ok(JobStatus::Finished),
            "FAILED" => Ok(JobStatus::Failed),
            "STOPPED" => Ok(JobStatus::Stopped),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Status change of a remote job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub job_owner: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReindexReport {
    pub job_id: String,
    pub archive_system: String,
    pub archive_path: String,
    /// Documents written, archive folder and ancestors included
    pub indexed: u64,
    /// Folders that could not be listed
    pub skipped_dirs: u64,
}

type ListResult = (String, Result<Vec<RemoteFile>, ProviderError>);

pub struct ReindexTask {
    remote: Arc<dyn RemoteFs>,
    index: Arc<dyn IndexStore>,
    events: Option<EventBus>,
    concurrency: usize,
}

impl ReindexTask {
    pub fn new(remote: Arc<dyn RemoteFs>, index: Arc<dyn IndexStore>, concurrency: usize) -> Self {
        Self {
            remote,
            index,
            events: None,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Index a job's outputs; events other than `INDEXING` are ignored
    pub async fn handle(&self, event: &JobEvent) -> Result<Option<ReindexReport>, ReindexError> {
        if event.status != JobStatus::Indexing {
            debug!("Ignoring job {} in status {}", event.job_id, event.status);
            return Ok(None);
        }

        let archive = self.remote.job_archive(&event.job_id).await?;
        info!(
            "Indexing outputs of job {} at {}/{}",
            event.job_id, archive.archive_system, archive.archive_path
        );

        let (mut indexed, skipped_dirs) = self
            .index_tree(&archive.archive_system, &archive.archive_path, &event.job_owner)
            .await?;
        indexed += self
            .index_ancestors(&archive.archive_system, &archive.archive_path, &event.job_owner)
            .await?;

        if let Some(events) = &self.events {
            events.publish(DataEvent::JobIndexed {
                recipient: event.job_owner.clone(),
                job_id: event.job_id.clone(),
                status: JobStatus::Finished,
                archive_path: format!("{}/{}", archive.archive_system, archive.archive_path),
            });
        }

        info!("Job {} indexed: {} documents, {} folders skipped", event.job_id, indexed, skipped_dirs);
        Ok(Some(ReindexReport {
            job_id: event.job_id.clone(),
            archive_system: archive.archive_system,
            archive_path: archive.archive_path,
            indexed,
            skipped_dirs,
        }))
    }

    /// Index every entry below `root`; returns (documents written, folders skipped)
    pub async fn index_tree(&self, system: &str, root: &str, owner: &str) -> Result<(u64, u64), ReindexError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<ListResult> = JoinSet::new();
        let mut indexed = 0u64;
        let mut skipped = 0u64;

        self.spawn_list(&mut tasks, &semaphore, system, root.trim_matches('/'));

        while let Some(joined) = tasks.join_next().await {
            let (dir, listed) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Listing task failed: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let children = match listed {
                Ok(children) => children,
                Err(e) => {
                    warn!("Skipping {}/{}: {}", system, dir, e);
                    skipped += 1;
                    continue;
                }
            };

            for child in children {
                self.index.from_remote(owner, &child).await?;
                indexed += 1;
                if child.is_dir() {
                    self.spawn_list(&mut tasks, &semaphore, system, &child.full_path());
                }
            }
        }

        Ok((indexed, skipped))
    }

    fn spawn_list(&self, tasks: &mut JoinSet<ListResult>, semaphore: &Arc<Semaphore>, system: &str, dir: &str) {
        let remote = self.remote.clone();
        let semaphore = semaphore.clone();
        let system = system.to_string();
        let dir = dir.to_string();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let listed = remote.list(&system, &dir).await;
            (dir, listed)
        });
    }

    /// Index `path` and each of its parent folders up to the storage root
    async fn index_ancestors(&self, system: &str, path: &str, owner: &str) -> Result<u64, ReindexError> {
        let mut current = path.trim_matches('/').to_string();
        let mut indexed = 0;

        while !current.is_empty() {
            match self.remote.stat(system, &current).await {
                Ok(folder) => {
                    self.index.from_remote(owner, &folder).await?;
                    indexed += 1;
                }
                Err(e) => warn!("Cannot index ancestor {}/{}: {}", system, current, e),
            }
            current = split_parent(&current).0.to_string();
        }

        Ok(indexed)
    }
}

/// Background worker processing job events in arrival order
pub struct ReindexQueue {
    task_tx: mpsc::Sender<JobEvent>,
    worker: JoinHandle<()>,
}

impl ReindexQueue {
    pub fn spawn(task: Arc<ReindexTask>, capacity: usize) -> Self {
        let (task_tx, mut task_rx) = mpsc::channel::<JobEvent>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(event) = task_rx.recv().await {
                match task.handle(&event).await {
                    Ok(Some(report)) => debug!("Reindex of job {} done: {:?}", report.job_id, report),
                    Ok(None) => {}
                    Err(e) => warn!("Reindex of job {} failed: {}", event.job_id, e),
                }
            }
            debug!("Reindex queue drained");
        });

        Self { task_tx, worker }
    }

    pub async fn submit(&self, event: JobEvent) -> Result<(), ReindexError> {
        self.task_tx
            .send(event)
            .await
            .map_err(|_| ReindexError::QueueClosed)
    }

    /// Stop accepting events and wait for queued ones to finish
    pub async fn shutdown(self) {
        drop(self.task_tx);
        if let Err(e) = self.worker.await {
            warn!("Reindex worker ended abnormally: {}", e);
        }
    }
}
