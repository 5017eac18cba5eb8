//! Batch processing
//!
//! A [`DataProcessor`] prepares one process definition: it sets up the
//! datastore once, discovers datasources and partitions them into batches,
//! each handed out as a [`BatchExecutor`].

mod executor;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use recload_common::Configuration;

pub use executor::{BatchExecutor, BatchReport};

use crate::datastore::DatastoreFactory;
use crate::error::{IngestError, Result};
use crate::provider::{DataProvider, Datasource, ProviderScope};
use crate::transform::Transformer;

/// Processor settings of one process definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Target number of batches
    pub max_processes: usize,
    /// Datasources processed concurrently inside one batch
    pub max_io_workers: usize,
    /// Slices each loaded datasource is cut into
    pub slices: usize,
    pub load_timeout: Option<Duration>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            max_processes: cpus,
            max_io_workers: cpus.div_ceil(2).max(1),
            slices: 1,
            load_timeout: None,
        }
    }
}

impl ProcessorSettings {
    /// Read a `processor` section
    pub fn from_config(config: &Configuration) -> Self {
        let defaults = Self::default();
        Self {
            max_processes: config.usize("max-processes", defaults.max_processes).max(1),
            max_io_workers: config.usize("max-io-workers", defaults.max_io_workers).max(1),
            slices: config.usize("slices", defaults.slices).max(1),
            load_timeout: config.opt_uint("load-timeout-secs").map(Duration::from_secs),
        }
    }
}

/// Split `items` into batches of `max(1, round(total / parts))`
///
/// Halves round to even, so 10 items over 4 parts make batches of two.
/// Order is preserved, no batch is empty and at most `parts + 1` batches are
/// produced; the last one absorbs any overflow.
pub fn partition<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let total = items.len();
    let parts = parts.max(1);
    let batch_size = ((total as f64 / parts as f64).round_ties_even() as usize).max(1);

    let mut batches: Vec<Vec<T>> = Vec::new();
    for item in items {
        let start_new = batches
            .last()
            .map_or(true, |current| current.len() >= batch_size && batches.len() <= parts);
        if start_new {
            batches.push(Vec::with_capacity(batch_size));
        }
        if let Some(current) = batches.last_mut() {
            current.push(item);
        }
    }
    batches
}

/// Shared by every executor of one process definition
pub(crate) struct BatchContext {
    pub(crate) process: String,
    pub(crate) datastores: DatastoreFactory,
    pub(crate) transformer: Arc<dyn Transformer>,
    pub(crate) settings: ProcessorSettings,
}

pub struct DataProcessor {
    name: String,
    provider: Box<dyn DataProvider>,
    datastores: DatastoreFactory,
    transformer: Arc<dyn Transformer>,
    settings: ProcessorSettings,
}

impl DataProcessor {
    pub fn new(
        name: impl Into<String>,
        provider: Box<dyn DataProvider>,
        datastores: DatastoreFactory,
        transformer: Arc<dyn Transformer>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            datastores,
            transformer,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set up the datastore, discover datasources and partition them
    ///
    /// The returned iterator owns the provider scope; datasources are released
    /// when it is dropped.
    pub async fn datasources(self) -> Result<BatchExecutors> {
        info!(process = %self.name, "Initialize datasource for process");

        let datastore = self.datastores.create();
        datastore.initialize().await;
        let setup = datastore.setup().await;
        datastore.close().await;
        setup?;

        let provider = self.provider;
        let scope = tokio::task::spawn_blocking(move || ProviderScope::enter(provider))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))??;

        let total = scope.provider().total();
        let batches = partition(scope.datasources().to_vec(), self.settings.max_processes);
        info!(
            process = %self.name,
            total,
            batches = batches.len(),
            "Start processing datasources"
        );

        Ok(BatchExecutors {
            context: Arc::new(BatchContext {
                process: self.name,
                datastores: self.datastores,
                transformer: self.transformer,
                settings: self.settings,
            }),
            batches: batches.into_iter(),
            next_id: 1,
            _scope: scope,
        })
    }
}

/// Lazily yields one executor per batch
pub struct BatchExecutors {
    context: Arc<BatchContext>,
    batches: std::vec::IntoIter<Vec<Arc<Datasource>>>,
    next_id: usize,
    _scope: ProviderScope,
}

impl Iterator for BatchExecutors {
    type Item = BatchExecutor;

    fn next(&mut self) -> Option<BatchExecutor> {
        let batch = self.batches.next()?;
        let id = format!("datasource-batch-executor-{}", self.next_id);
        self.next_id += 1;
        Some(BatchExecutor::new(id, batch, Arc::clone(&self.context)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

impl ExactSizeIterator for BatchExecutors {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_partition_examples() {
        assert_eq!(partition(vec!['a', 'b'], 2), vec![vec!['a'], vec!['b']]);
        assert_eq!(
            partition((0..10).collect(), 4),
            vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7], vec![8, 9]]
        );
        assert_eq!(partition((0..5).collect(), 2), vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(partition((0..6).collect(), 4), vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
        assert_eq!(
            partition((0..7).collect(), 3),
            vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6]]
        );
        assert_eq!(partition(vec![1, 2, 3], 8), vec![vec![1], vec![2], vec![3]]);
        assert!(partition(Vec::<u8>::new(), 4).is_empty());
    }

    #[test]
    fn test_partition_overflow_lands_in_last_batch() {
        // round(9 / 4) = 2, so four batches of two and one of one
        let batches = partition((0..9).collect::<Vec<_>>(), 4);
        assert_eq!(batches.len(), 5);
        let batches = partition((0..11).collect::<Vec<_>>(), 4);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 3, 2]);
    }

    #[test]
    fn test_default_io_workers_round_up() {
        let settings = ProcessorSettings::default();
        assert_eq!(settings.max_io_workers, settings.max_processes.div_ceil(2));
        assert!(settings.max_io_workers >= 1);
    }

    #[test]
    fn test_settings_from_config() {
        let config = Configuration::new(json!({
            "max-processes": 2,
            "max-io-workers": 0,
            "load-timeout-secs": 30
        }));
        let settings = ProcessorSettings::from_config(&config);
        assert_eq!(settings.max_processes, 2);
        assert_eq!(settings.max_io_workers, 1);
        assert_eq!(settings.slices, 1);
        assert_eq!(settings.load_timeout, Some(Duration::from_secs(30)));
    }

    proptest! {
        #[test]
        fn prop_partition_preserves_order_and_bounds(total in 0usize..300, parts in 0usize..32) {
            let items: Vec<usize> = (0..total).collect();
            let batches = partition(items.clone(), parts);

            prop_assert!(batches.len() <= parts.max(1) + 1);
            prop_assert!(batches.iter().all(|b| !b.is_empty()));
            let joined: Vec<usize> = batches.into_iter().flatten().collect();
            prop_assert_eq!(joined, items);
        }
    }
}
