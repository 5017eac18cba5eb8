//! Datastore drivers and settings

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use recload_common::Configuration;

use super::bulk::DEFAULT_BULK_CAPACITY;
use super::connection::ConnectionFactory;
use super::postgres::PgConnectionFactory;
use super::retry::{RetryPolicy, DEFAULT_RETRY_COOLDOWN};
use super::Datastore;
use crate::error::{DatastoreResult, IngestError, Result};
use crate::registry_key;

/// Settings of one `datastore` section
#[derive(Debug, Clone)]
pub struct DatastoreSettings {
    pub name: String,
    pub driver: String,
    pub connection_url: String,
    pub max_pool_size: usize,
    pub batch_size: usize,
    pub should_drop: bool,
    pub init_sql: Option<String>,
    pub retry_cooldown: Duration,
    pub retry_deadline: Option<Duration>,
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self {
            name: "datastore".to_string(),
            driver: "postgres".to_string(),
            connection_url: String::new(),
            max_pool_size: 1,
            batch_size: DEFAULT_BULK_CAPACITY,
            should_drop: false,
            init_sql: None,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            retry_deadline: None,
        }
    }
}

impl DatastoreSettings {
    /// Read a `datastore` section; `driver` is required
    pub fn from_config(name: &str, config: &Configuration) -> Result<Self> {
        let driver = config
            .opt_string("driver")
            .filter(|d| !d.is_empty())
            .ok_or_else(|| IngestError::config("datastore.driver is required"))?;

        let defaults = Self::default();
        let parameters = config.subtree("parameters");
        Ok(Self {
            name: name.to_string(),
            driver,
            connection_url: config.string("connection-url", ""),
            max_pool_size: parameters.usize("max-pool-size", defaults.max_pool_size).max(1),
            batch_size: parameters.usize("batch.max-size", defaults.batch_size).max(1),
            should_drop: parameters.bool("should-drop", defaults.should_drop),
            init_sql: parameters
                .opt_string("init-storage-sql")
                .filter(|sql| !sql.trim().is_empty()),
            retry_cooldown: parameters
                .opt_uint("connection.retry-cooldown-ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_cooldown),
            retry_deadline: parameters
                .opt_uint("connection.retry-deadline-secs")
                .map(Duration::from_secs),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_cooldown, self.retry_deadline)
    }
}

pub type DriverConstructor =
    Arc<dyn Fn(&DatastoreSettings) -> DatastoreResult<Arc<dyn ConnectionFactory>> + Send + Sync>;

/// Driver name to connection factory lookup
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, DriverConstructor>,
    fallback: Option<DriverConstructor>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let postgres: DriverConstructor = Arc::new(
            |settings: &DatastoreSettings| -> DatastoreResult<Arc<dyn ConnectionFactory>> {
                Ok(Arc::new(PgConnectionFactory::new(&settings.connection_url)?))
            },
        );
        for name in ["postgres", "postgresql", "PostgreDatastore"] {
            registry.register(name, Arc::clone(&postgres));
        }
        registry
    }

    pub fn register(&mut self, name: &str, constructor: DriverConstructor) {
        self.drivers.insert(registry_key(name), constructor);
    }

    /// Resolve every driver name to `constructor` (dry runs)
    pub fn redirect_all(&mut self, constructor: DriverConstructor) {
        self.drivers.clear();
        self.fallback = Some(constructor);
    }

    pub fn resolve(&self, settings: &DatastoreSettings) -> Result<Arc<dyn ConnectionFactory>> {
        let constructor = self
            .drivers
            .get(&registry_key(&settings.driver))
            .or(self.fallback.as_ref())
            .ok_or_else(|| IngestError::unknown("datastore driver", &settings.driver))?;
        Ok(constructor(settings)?)
    }

    /// Settings plus resolved driver, ready to create datastores
    pub fn factory(&self, settings: DatastoreSettings) -> Result<DatastoreFactory> {
        let connections = self.resolve(&settings)?;
        Ok(DatastoreFactory::new(settings, connections))
    }
}

/// Creates independent [`Datastore`]s for one configuration
#[derive(Clone)]
pub struct DatastoreFactory {
    settings: DatastoreSettings,
    connections: Arc<dyn ConnectionFactory>,
}

impl DatastoreFactory {
    pub fn new(settings: DatastoreSettings, connections: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            settings,
            connections,
        }
    }

    pub fn settings(&self) -> &DatastoreSettings {
        &self.settings
    }

    /// A fresh datastore with its own pool, buffer and task pool
    pub fn create(&self) -> Datastore {
        Datastore::new(self.settings.clone(), Arc::clone(&self.connections))
    }
}

impl std::fmt::Debug for DatastoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreFactory")
            .field("settings", &self.settings)
            .field("backend", &self.connections.describe())
            .finish()
    }
}
