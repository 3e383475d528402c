//! Entry point: a database is a transport plus the collection handles opened on it.
//!
//! # Example
//!
//! ```ignore
//! use webdb_core::{config::DatabaseConfig, database::Database};
//!
//! let db = Database::with_config(transport, DatabaseConfig::new().batch_size(200));
//! let users = db.collection("users");
//! let again = db.collection("users"); // shares readiness with `users`
//! ```

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

use crate::{
    collection::Collection,
    config::DatabaseConfig,
    error::WebDbResult,
    lifecycle::Lifecycle,
    transport::{CollectionInfo, Transport},
};

/// Statistics for every collection the transport knows about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseInfo {
    pub collections: Vec<CollectionInfo>,
}

impl DatabaseInfo {
    pub fn doc_count(&self) -> u64 {
        self.collections.iter().map(|info| info.doc_count).sum()
    }
}

/// A document database bound to a specific transport.
pub struct Database<T> {
    transport: Arc<T>,
    config: Arc<DatabaseConfig>,
    lifecycles: Mutex<HashMap<String, Arc<Lifecycle>>>,
}

/// A database over a type-erased transport, for picking the transport at runtime.
pub type DynDatabase = Database<Arc<dyn Transport>>;

impl<T: Transport> std::fmt::Debug for Database<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .finish()
    }
}

impl<T> Database<T>
where
    T: Transport + 'static,
{
    /// Creates a database with the default configuration.
    pub fn new(transport: T) -> Self {
        Database::with_config(transport, DatabaseConfig::default())
    }

    pub fn with_config(transport: T, config: DatabaseConfig) -> Self {
        Database::from_shared(Arc::new(transport), config)
    }

    /// Creates a database over a transport that is shared with other code.
    pub fn from_shared(transport: Arc<T>, config: DatabaseConfig) -> Self {
        Database {
            transport,
            config: Arc::new(config),
            lifecycles: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns a handle on the named collection. Nothing is created until first use.
    ///
    /// Handles for the same name share one readiness state, so initializing or dropping
    /// through one is seen by all of them.
    pub fn collection(&self, name: &str) -> Collection<T> {
        let lifecycle = Arc::clone(
            self.lifecycles
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Lifecycle::new(name))),
        );

        Collection::new(
            name.to_string(),
            Arc::clone(&self.transport),
            lifecycle,
            Arc::clone(&self.config),
        )
    }

    /// Lists the collections that exist in storage.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn list_collections(&self) -> WebDbResult<Vec<String>> {
        self.transport.list_collections().await
    }

    /// Drops every collection in storage and resets every handle.
    ///
    /// Returns the number of collections dropped.
    ///
    /// # Errors
    ///
    /// Stops at the first transport failure other than a collection already being gone.
    pub async fn drop_all(&self) -> WebDbResult<usize> {
        let names = self.transport.list_collections().await?;

        let mut dropped = 0;
        for name in &names {
            match self.transport.destroy_collection(name).await {
                Ok(()) => dropped += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    self.reset_all();
                    return Err(err);
                }
            }
        }

        self.reset_all();
        tracing::info!(dropped, "dropped all collections");
        Ok(dropped)
    }

    /// Compacts one collection.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::CollectionNotFound`](crate::error::WebDbError::CollectionNotFound)
    /// for an unknown collection.
    pub async fn compact(&self, name: &str) -> WebDbResult<()> {
        self.transport.compact(name).await?;
        tracing::debug!(collection = %name, "compacted collection");
        Ok(())
    }

    /// Collects statistics for every collection in storage.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn info(&self) -> WebDbResult<DatabaseInfo> {
        let mut collections = Vec::new();
        for name in self.transport.list_collections().await? {
            match self.transport.collection_info(&name).await {
                Ok(info) => collections.push(info),
                // Dropped between listing and reading.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }

        Ok(DatabaseInfo { collections })
    }

    /// Shuts the transport down.
    ///
    /// # Errors
    ///
    /// Propagates the transport's shutdown failure.
    pub async fn shutdown(&self) -> WebDbResult<()> {
        self.transport.shutdown().await
    }

    fn reset_all(&self) {
        for lifecycle in self.lifecycles.lock().values() {
            lifecycle.reset();
        }
    }
}
