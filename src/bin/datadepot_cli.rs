//! DataDepot CLI - manage files on remote research storage
//!
//! Usage:
//!   datadepot-cli ls [file-id]                     List a folder
//!   datadepot-cli cp <file-id> <dest-file-id>      Copy (optionally to another resource)
//!   datadepot-cli mv <file-id> <dest-file-id>      Move within one system
//!   datadepot-cli trash <file-id>                  Move to the owner's .Trash
//!   datadepot-cli rm <file-id>                     Delete permanently
//!   datadepot-cli reindex <job-id> --owner <user>  Index a job's archived outputs
//!
//! File ids are `system/path`; a bare path uses the configured default system.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use datadepot::config::{default_config_path, load_config, DepotConfig};
use datadepot::events::EventBus;
use datadepot::index::{IndexStore, SqliteIndex};
use datadepot::manager::FileManager;
use datadepot::preview::PreviewFormat;
use datadepot::providers::agave::AgaveConfig;
use datadepot::providers::{AgaveProvider, PermissionLevel, RemoteFs};
use datadepot::registry::ManagerRegistry;
use datadepot::reindex::{JobEvent, JobStatus, ReindexTask};

#[derive(Parser)]
#[command(
    name = "datadepot-cli",
    about = "DataDepot CLI - file management over remote research storage",
    version
)]
struct Cli {
    /// Config file (default: <config dir>/datadepot/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Acting username
    #[arg(long, short, global = true, env = "DATADEPOT_USER")]
    user: Option<String>,

    /// Tenant API access token
    #[arg(long, global = true, env = "DATADEPOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder (default: your home folder)
    Ls {
        #[arg(default_value = "")]
        file_id: String,
    },
    /// Copy a file or folder
    Cp {
        file_id: String,
        dest_file_id: String,
        /// Destination resource (default: this depot's resource)
        #[arg(long)]
        resource: Option<String>,
    },
    /// Move a file or folder within one system
    Mv { file_id: String, dest_file_id: String },
    /// Move a file or folder to the trash
    Trash { file_id: String },
    /// Delete a file or folder and everything below it
    Rm { file_id: String },
    /// Create a folder
    Mkdir {
        /// Parent folder
        file_id: String,
        name: String,
    },
    /// Rename a file or folder in place
    Rename { file_id: String, new_name: String },
    /// Grant a permission level to another user (NONE revokes)
    Share {
        file_id: String,
        username: String,
        #[arg(default_value = "READ")]
        permission: PermissionLevel,
    },
    /// Print a temporary download link
    Download { file_id: String },
    /// Describe how a file can be previewed
    Preview {
        file_id: String,
        #[arg(long, default_value = "json")]
        format: PreviewFormat,
    },
    /// Index the archived outputs of a job
    Reindex {
        job_id: String,
        /// Owner of the job and of the indexed documents
        #[arg(long)]
        owner: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_remote(config: &DepotConfig, token: Option<String>) -> anyhow::Result<Arc<dyn RemoteFs>> {
    let Some(token) = token else {
        bail!("an access token is required (--token or DATADEPOT_TOKEN)");
    };

    let mut agave = AgaveConfig::new(&config.tenant_base_url, SecretString::from(token))?;
    agave.timeout = Duration::from_secs(config.http_timeout_secs);
    agave.retry = config.retry.clone();
    agave.postit_lifetime_secs = config.postit_lifetime_secs;
    agave.postit_max_uses = config.postit_max_uses;

    Ok(Arc::new(AgaveProvider::new(agave)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("datadepot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let remote = build_remote(&config, cli.token)?;
    let index: Arc<dyn IndexStore> = Arc::new(
        SqliteIndex::open(&config.index_path)
            .with_context(|| format!("opening index {}", config.index_path.display()))?,
    );
    let events = EventBus::new(64);

    if let Commands::Reindex { job_id, owner } = &cli.command {
        let task = ReindexTask::new(remote, index, config.reindex_concurrency).with_events(events);
        let event = JobEvent {
            job_id: job_id.clone(),
            job_owner: owner.clone(),
            status: JobStatus::Indexing,
        };
        return print_json(&task.handle(&event).await?);
    }

    let Some(username) = cli.user else {
        bail!("a username is required (--user or DATADEPOT_USER)");
    };

    let registry = Arc::new(ManagerRegistry::new());
    let manager = Arc::new(
        FileManager::new(&username, config.manager_settings(), remote, index, &registry)
            .with_events(events),
    );
    registry.register(manager.clone()).await;

    match cli.command {
        Commands::Ls { file_id } => print_json(&manager.listing(&file_id).await?),
        Commands::Cp {
            file_id,
            dest_file_id,
            resource,
        } => {
            let resource = resource.unwrap_or_else(|| config.resource.clone());
            print_json(&manager.copy(&file_id, &resource, &dest_file_id).await?)
        }
        Commands::Mv { file_id, dest_file_id } => {
            print_json(&manager.move_file(&file_id, &config.resource, &dest_file_id).await?)
        }
        Commands::Trash { file_id } => print_json(&manager.move_to_trash(&file_id).await?),
        Commands::Rm { file_id } => {
            let removed = manager.delete(&file_id).await?;
            print_json(&serde_json::json!({ "deleted": file_id, "index_removed": removed }))
        }
        Commands::Mkdir { file_id, name } => print_json(&manager.mkdir(&file_id, &name).await?),
        Commands::Rename { file_id, new_name } => print_json(&manager.rename(&file_id, &new_name).await?),
        Commands::Share {
            file_id,
            username,
            permission,
        } => print_json(&manager.share(&file_id, &username, permission).await?),
        Commands::Download { file_id } => match manager.download(&file_id).await? {
            Some(link) => print_json(&link),
            None => bail!("{} is a folder and cannot be downloaded", file_id),
        },
        Commands::Preview { file_id, format } => {
            let preview = manager.preview(&file_id, format).await?;
            match (&preview.html, format) {
                (Some(html), PreviewFormat::Html) => {
                    println!("{}", html);
                    Ok(())
                }
                _ => print_json(&preview),
            }
        }
        Commands::Reindex { .. } => Ok(()),
    }
}
