//! Resource registry - cross-provider manager lookup
//!
//! Each storage resource (the tenant storage, a cloud drive, ...) is served
//! by one `ResourceManager`. Managers are registered at process start and
//! looked up by resource name when an operation crosses a resource
//! boundary. Managers keep only a weak handle on the registry, so
//! registering a manager that also holds the registry does not leak.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::manager::ManagerError;

/// One storage resource's file manager, as seen by other resources
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Resource name this manager serves
    fn resource(&self) -> &str;

    /// Pull `source_file_id` from `source_resource` into `dest_file_id`
    async fn import_file(
        &self,
        dest_file_id: &str,
        source_resource: &str,
        source_file_id: &str,
    ) -> Result<(), ManagerError>;

    /// URL another resource can fetch `file_id` from
    async fn export_url(&self, file_id: &str) -> Result<String, ManagerError>;
}

/// Map of resource name -> manager
#[derive(Default)]
pub struct ManagerRegistry {
    managers: RwLock<HashMap<String, Arc<dyn ResourceManager>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager under its resource name, replacing any previous one
    pub async fn register(&self, manager: Arc<dyn ResourceManager>) {
        let resource = manager.resource().to_string();
        let mut managers = self.managers.write().await;
        if managers.insert(resource.clone(), manager).is_some() {
            info!("Replaced manager for resource {}", resource);
        } else {
            info!("Registered manager for resource {}", resource);
        }
    }

    pub async fn lookup(&self, resource: &str) -> Option<Arc<dyn ResourceManager>> {
        self.managers.read().await.get(resource).cloned()
    }

    /// Registered resource names, sorted
    pub async fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticManager(&'static str);

    #[async_trait]
    impl ResourceManager for StaticManager {
        fn resource(&self) -> &str {
            self.0
        }

        async fn import_file(&self, _dest: &str, _source_resource: &str, _source: &str) -> Result<(), ManagerError> {
            Ok(())
        }

        async fn export_url(&self, file_id: &str) -> Result<String, ManagerError> {
            Ok(format!("{}://{}", self.0, file_id))
        }
    }

    #[tokio::test]
    async fn test_lookup_registered_and_unknown() {
        let registry = ManagerRegistry::new();
        registry.register(Arc::new(StaticManager("dropbox"))).await;
        registry.register(Arc::new(StaticManager("box"))).await;

        let manager = registry.lookup("dropbox").await.unwrap();
        assert_eq!(manager.resource(), "dropbox");
        assert_eq!(manager.export_url("a/b").await.unwrap(), "dropbox://a/b");
        assert!(registry.lookup("gdrive").await.is_none());
        assert_eq!(registry.resources().await, vec!["box", "dropbox"]);
    }
}
