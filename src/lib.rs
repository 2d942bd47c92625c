// DataDepot - File management over remote research storage
// Remote operations mirrored into a local searchable index

pub mod config;
pub mod events;
pub mod file_id;
pub mod index;
pub mod manager;
pub mod preview;
pub mod providers;
pub mod registry;
pub mod reindex;

#[cfg(test)]
mod testing;

pub use config::{load_config, DepotConfig};
pub use events::{DataEvent, EventBus};
pub use file_id::FileId;
pub use index::{IndexDocument, IndexError, IndexStore, SqliteIndex};
pub use manager::{CopyOutcome, FileManager, Listing, ListingSource, ManagerError, ManagerSettings};
pub use preview::{Preview, PreviewFormat};
pub use providers::{AgaveProvider, ProviderError, RemoteFs};
pub use registry::{ManagerRegistry, ResourceManager};
pub use reindex::{JobEvent, JobStatus, ReindexQueue, ReindexTask};
