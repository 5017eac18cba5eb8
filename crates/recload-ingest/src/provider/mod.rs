//! Datasource discovery
//!
//! A [`DataProvider`] enumerates datasources from some origin. The engine
//! never uses a provider directly; it enters a [`ProviderScope`], which
//! guarantees cleanup and datasource release on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use recload_ingest::provider::{FileDataProvider, HandlerRegistry, ProviderScope};
//!
//! let handlers = Arc::new(HandlerRegistry::builtin());
//! let scope = ProviderScope::enter(Box::new(FileDataProvider::new("./data", handlers)))?;
//! for datasource in scope.datasources() {
//!     println!("{}", datasource.name());
//! }
//! # Ok::<(), recload_ingest::IngestError>(())
//! ```

pub mod datasource;
pub mod file;
pub mod gzip;
pub mod handler;
pub mod json;
pub mod loader;
pub mod registry;
pub mod zip;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use recload_common::Configuration;

pub use datasource::{Datasource, DatasourceState, RecordLoader, RecordSlice};
pub use file::FileDataProvider;
pub use handler::{ArchiveEntry, ArchiveHandler, FileHandler};
pub use loader::{ContentLoader, FileContentLoader};
pub use registry::HandlerRegistry;

use crate::error::{IngestError, Result};
use crate::registry_key;

/// Source of datasources
pub trait DataProvider: Send {
    fn name(&self) -> &str;

    /// Discover datasources; must be called before [`DataProvider::datasources`]
    fn initialize(&mut self) -> Result<()>;

    fn datasources(&self) -> &[Arc<Datasource>];

    fn total(&self) -> usize {
        self.datasources().len()
    }

    fn cleanup(&mut self) {}
}

/// Scope guard around an initialized provider
///
/// Dropping the scope runs the provider's cleanup and releases every
/// datasource. A failed `initialize` still runs both before the error is
/// returned.
pub struct ProviderScope {
    provider: Box<dyn DataProvider>,
}

impl ProviderScope {
    pub fn enter(mut provider: Box<dyn DataProvider>) -> Result<Self> {
        let initialized = provider.initialize();
        let scope = Self { provider };
        initialized.map(|()| scope)
    }

    pub fn provider(&self) -> &dyn DataProvider {
        self.provider.as_ref()
    }

    pub fn datasources(&self) -> &[Arc<Datasource>] {
        self.provider.datasources()
    }
}

impl Drop for ProviderScope {
    fn drop(&mut self) {
        debug!(provider = self.provider.name(), "Leaving provider scope");
        self.provider.cleanup();
        for datasource in self.provider.datasources() {
            datasource.release();
        }
    }
}

pub type ProviderConstructor =
    fn(&Configuration, Arc<HandlerRegistry>) -> Result<Box<dyn DataProvider>>;

/// Provider name to constructor lookup
pub struct ProviderRegistry {
    handlers: Arc<HandlerRegistry>,
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            constructors: HashMap::new(),
        }
    }

    pub fn builtin(handlers: Arc<HandlerRegistry>) -> Self {
        let mut registry = Self::new(handlers);
        registry.register("FileDataProvider", FileDataProvider::from_config);
        registry.register("file", FileDataProvider::from_config);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: ProviderConstructor) {
        self.constructors.insert(registry_key(name), constructor);
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Build the provider named by `provider` in a `datasource` section
    pub fn create(&self, config: &Configuration) -> Result<Box<dyn DataProvider>> {
        let name = config.string("provider", "FileDataProvider");
        let constructor = self
            .constructors
            .get(&registry_key(&name))
            .ok_or_else(|| IngestError::unknown("data provider", &name))?;
        constructor(config, Arc::clone(&self.handlers))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::provider::datasource::tests::datasource;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        datasources: Vec<Arc<Datasource>>,
        fail: bool,
        cleanups: Arc<AtomicUsize>,
    }

    impl DataProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn initialize(&mut self) -> Result<()> {
            for ds in &self.datasources {
                ds.load()?;
            }
            if self.fail {
                return Err(IngestError::config("boom"));
            }
            Ok(())
        }

        fn datasources(&self) -> &[Arc<Datasource>] {
            &self.datasources
        }

        fn cleanup(&mut self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fixed(fail: bool) -> (FixedProvider, Vec<Arc<Datasource>>, Arc<AtomicUsize>) {
        let datasources = vec![Arc::new(datasource("a", 2)), Arc::new(datasource("b", 3))];
        let cleanups = Arc::new(AtomicUsize::new(0));
        let provider = FixedProvider {
            datasources: datasources.clone(),
            fail,
            cleanups: Arc::clone(&cleanups),
        };
        (provider, datasources, cleanups)
    }

    #[test]
    fn test_scope_releases_on_drop() {
        let (provider, datasources, cleanups) = fixed(false);
        {
            let scope = ProviderScope::enter(Box::new(provider)).unwrap();
            assert_eq!(scope.provider().total(), 2);
            assert_eq!(datasources[0].state(), DatasourceState::Loaded);
        }
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(datasources.iter().all(|d| d.state() == DatasourceState::Released));
    }

    #[test]
    fn test_scope_cleans_up_when_initialize_fails() {
        let (provider, datasources, cleanups) = fixed(true);
        assert!(ProviderScope::enter(Box::new(provider)).is_err());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(datasources.iter().all(|d| d.state() == DatasourceState::Released));
    }

    #[test]
    fn test_provider_registry_resolution() {
        let registry = ProviderRegistry::builtin(Arc::new(HandlerRegistry::builtin()));
        let config = Configuration::new(json!({"data-path": "/tmp"}));
        assert_eq!(registry.create(&config).unwrap().name(), "FileDataProvider");

        let unknown = Configuration::new(json!({"provider": "ftp", "data-path": "/tmp"}));
        assert!(matches!(
            registry.create(&unknown),
            Err(IngestError::UnknownComponent { .. })
        ));
    }
}
