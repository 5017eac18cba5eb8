//! Batch execution

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::BatchContext;
use crate::datastore::{Datastore, DatastoreReport};
use crate::error::{IngestError, Result};
use crate::provider::Datasource;
use crate::transform::{evaluate, RecordOutcome};

/// Counters of one or more executed batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub datasources_processed: usize,
    pub datasources_failed: usize,
    pub records_loaded: usize,
    pub accepted: usize,
    pub invalid: usize,
    pub filtered: usize,
    /// Records whose transform or save failed
    pub failed: usize,
    pub datastore: DatastoreReport,
}

impl BatchReport {
    /// Add another report's counters to this one
    pub fn absorb(&mut self, other: &BatchReport) {
        self.datasources_processed += other.datasources_processed;
        self.datasources_failed += other.datasources_failed;
        self.records_loaded += other.records_loaded;
        self.accepted += other.accepted;
        self.invalid += other.invalid;
        self.filtered += other.filtered;
        self.failed += other.failed;
        self.datastore.records_written += other.datastore.records_written;
        self.datastore.records_lost += other.datastore.records_lost;
        self.datastore.bulk_inserts += other.datastore.bulk_inserts;
        self.datastore.failed_operations += other.datastore.failed_operations;
    }
}

/// Runs one batch of datasources against its own datastore
pub struct BatchExecutor {
    id: String,
    batch: Vec<Arc<Datasource>>,
    context: Arc<BatchContext>,
}

impl BatchExecutor {
    pub(crate) fn new(id: String, batch: Vec<Arc<Datasource>>, context: Arc<BatchContext>) -> Self {
        Self { id, batch, context }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the process definition this batch belongs to
    pub fn process(&self) -> &str {
        &self.context.process
    }

    pub fn datasources(&self) -> &[Arc<Datasource>] {
        &self.batch
    }

    /// Load, transform and persist every datasource of the batch
    ///
    /// Datasources run in windows of `max-io-workers`; a window completes
    /// before the next one starts. Failures are logged and counted, they
    /// never abort the batch.
    pub async fn execute(self) -> BatchReport {
        let span = info_span!("batch", process = %self.context.process, executor = %self.id);
        self.run().instrument(span).await
    }

    async fn run(self) -> BatchReport {
        info!(datasources = self.batch.len(), "Start batch");

        let datastore = Arc::new(self.context.datastores.create());
        datastore.initialize().await;

        let mut report = BatchReport::default();
        let window_size = self.context.settings.max_io_workers.max(1);

        for window in self.batch.chunks(window_size) {
            let mut tasks = JoinSet::new();
            for datasource in window {
                tasks.spawn(
                    process_datasource(
                        Arc::clone(datasource),
                        Arc::clone(&self.context),
                        Arc::clone(&datastore),
                    )
                    .in_current_span(),
                );
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => report.absorb(&outcome),
                    Err(e) => {
                        error!(error = %e, "Datasource task failed");
                        report.datasources_failed += 1;
                    },
                }
            }
        }

        report.datastore = datastore.close().await;
        info!(
            processed = report.datasources_processed,
            failed = report.datasources_failed,
            accepted = report.accepted,
            written = report.datastore.records_written,
            "Batch finished"
        );
        report
    }
}

async fn process_datasource(
    datasource: Arc<Datasource>,
    context: Arc<BatchContext>,
    datastore: Arc<Datastore>,
) -> BatchReport {
    let mut report = BatchReport::default();

    match load(&datasource, context.settings.load_timeout).await {
        Ok(count) => {
            debug!(datasource = %datasource, records = count, "Datasource loaded");
            report.records_loaded = count;
        },
        Err(e) => {
            warn!(datasource = %datasource, error = %e, "Could not load datasource");
            datasource.release();
            report.datasources_failed = 1;
            return report;
        },
    }

    for slice in datasource.slices(context.settings.slices) {
        for raw in slice.iter() {
            match evaluate(context.transformer.as_ref(), raw.clone()) {
                Ok(RecordOutcome::Accepted(record)) => {
                    datastore.bulk_insert(record.with_source(datasource.name())).await;
                    report.accepted += 1;
                },
                Ok(RecordOutcome::Invalid(model)) => {
                    debug!(datasource = %datasource, model = ?model, "Model is not valid, skipping");
                    report.invalid += 1;
                },
                Ok(RecordOutcome::Filtered(model)) => {
                    debug!(datasource = %datasource, model = ?model, "Model was filtered out");
                    report.filtered += 1;
                },
                Err(e) => {
                    error!(datasource = %datasource, record = %raw, error = %e, "Could not transform data model");
                    report.failed += 1;
                },
            }
        }
    }

    datasource.release();
    report.datasources_processed = 1;
    report
}

async fn load(datasource: &Arc<Datasource>, timeout: Option<Duration>) -> Result<usize> {
    let target = Arc::clone(datasource);
    let task = tokio::task::spawn_blocking(move || target.load());

    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| IngestError::LoadTimeout {
                name: datasource.name().to_string(),
                timeout: limit,
            })?,
        None => task.await,
    };
    joined.map_err(|e| IngestError::Task(e.to_string()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::datastore::{DatastoreFactory, DatastoreSettings, MemoryBackend};
    use crate::processor::ProcessorSettings;
    use crate::provider::datasource::tests::{datasource, StaticRecords};
    use crate::provider::{DatasourceState, RecordLoader};
    use crate::transform::{ModelRegistry, Transformer, TransformerRegistry};
    use recload_common::Configuration;
    use serde_json::{json, Value};

    #[derive(Debug)]
    struct BrokenRecords;

    impl RecordLoader for BrokenRecords {
        fn load(&self) -> Result<Vec<Value>> {
            Err(IngestError::archive("broken.zip", "truncated"))
        }
    }

    fn transformer(model: &str) -> Arc<dyn Transformer> {
        let config = Configuration::new(json!({
            "transformer": "GenericTransformer",
            "parameters": {"model": model}
        }));
        TransformerRegistry::builtin()
            .create(&config, &ModelRegistry::builtin())
            .unwrap()
    }

    fn context(backend: &MemoryBackend, model: &str, max_io_workers: usize) -> Arc<BatchContext> {
        let settings = DatastoreSettings {
            batch_size: 2,
            ..DatastoreSettings::default()
        };
        Arc::new(BatchContext {
            process: "test".to_string(),
            datastores: DatastoreFactory::new(settings, backend.factory()),
            transformer: transformer(model),
            settings: ProcessorSettings {
                max_processes: 1,
                max_io_workers,
                slices: 3,
                load_timeout: None,
            },
        })
    }

    #[tokio::test]
    async fn test_execute_persists_every_record() {
        let backend = MemoryBackend::new();
        let batch: Vec<_> = [("a", 4), ("b", 0), ("c", 3)]
            .into_iter()
            .map(|(name, count)| Arc::new(datasource(name, count)))
            .collect();

        let executor = BatchExecutor::new(
            "datasource-batch-executor-1".into(),
            batch.clone(),
            context(&backend, "GenericModel", 2),
        );
        let report = executor.execute().await;

        assert_eq!(report.datasources_processed, 3);
        assert_eq!(report.records_loaded, 7);
        assert_eq!(report.accepted, 7);
        assert_eq!(report.datastore.records_written, 7);
        assert_eq!(backend.record_count(), 7);
        assert_eq!(backend.open_connections(), 0);
        assert!(batch.iter().all(|d| d.state() == DatasourceState::Released));

        let mut sources: Vec<_> = backend
            .records()
            .into_iter()
            .filter_map(|r| r.source)
            .collect();
        sources.sort();
        sources.dedup();
        assert_eq!(sources, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_failed_datasource_does_not_abort_batch() {
        let backend = MemoryBackend::new();
        let broken = Arc::new(Datasource::new("broken", Arc::new(BrokenRecords)));
        let batch = vec![Arc::clone(&broken), Arc::new(datasource("ok", 2))];

        let report = BatchExecutor::new("x".into(), batch, context(&backend, "GenericModel", 1))
            .execute()
            .await;

        assert_eq!(report.datasources_failed, 1);
        assert_eq!(report.datasources_processed, 1);
        assert_eq!(backend.record_count(), 2);
        assert_eq!(broken.state(), DatasourceState::Unloaded);
    }

    #[tokio::test]
    async fn test_outcomes_are_counted() {
        let backend = MemoryBackend::new();
        let company = |code: &str| {
            json!({
                "ogrn": "1027700132195",
                "name": "Stroy",
                "data": {"СвОКВЭД": {"СвОКВЭДОсн": {"КодОКВЭД": code}}}
            })
        };
        let records = vec![
            company("61.10"),
            company("47.11"),
            json!({"name": "no registration number"}),
            json!("not an object"),
            company("61.20"),
        ];
        let batch = vec![Arc::new(Datasource::new(
            "companies.json",
            Arc::new(StaticRecords(records)),
        ))];

        let report = BatchExecutor::new("x".into(), batch, context(&backend, "Company", 4))
            .execute()
            .await;

        assert_eq!(report.accepted, 2);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(backend.record_count(), 2);
        assert!(backend.records().iter().all(|r| r.kind == "company"));
    }

    #[derive(Debug)]
    struct SlowRecords(Duration);

    impl RecordLoader for SlowRecords {
        fn load(&self) -> Result<Vec<Value>> {
            std::thread::sleep(self.0);
            Ok((0..1000).map(|n| json!({ "n": n })).collect())
        }
    }

    #[tokio::test]
    async fn test_load_timeout_leaves_datasource_released() {
        let backend = MemoryBackend::new();
        let slow = Arc::new(Datasource::new(
            "slow.json",
            Arc::new(SlowRecords(Duration::from_millis(300))),
        ));

        let mut context = context(&backend, "GenericModel", 1);
        Arc::get_mut(&mut context).unwrap().settings.load_timeout = Some(Duration::from_millis(50));

        let report = BatchExecutor::new("x".into(), vec![Arc::clone(&slow)], context)
            .execute()
            .await;
        assert_eq!(report.datasources_failed, 1);
        assert_eq!(report.records_loaded, 0);

        // Let the abandoned load run to completion
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_ne!(slow.state(), DatasourceState::Loaded);
        assert_eq!(slow.len(), 0);
        assert_eq!(backend.record_count(), 0);
    }

    #[test]
    fn test_report_absorb() {
        let mut total = BatchReport::default();
        let one = BatchReport {
            datasources_processed: 1,
            accepted: 3,
            datastore: DatastoreReport {
                records_written: 3,
                bulk_inserts: 1,
                ..DatastoreReport::default()
            },
            ..BatchReport::default()
        };
        total.absorb(&one);
        total.absorb(&one);
        assert_eq!(total.accepted, 6);
        assert_eq!(total.datastore.bulk_inserts, 2);
    }
}
