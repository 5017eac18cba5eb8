//! Run preparation
//!
//! Turns a resolved configuration into ready batch executors, one group per
//! enabled process definition. A definition that cannot be prepared is
//! reported in [`PreparedRun::failures`] and never stops the others.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use recload_common::Configuration;

use crate::datastore::{DatastoreSettings, DriverRegistry, MemoryBackend};
use crate::error::{IngestError, Result};
use crate::processor::{BatchExecutors, BatchReport, DataProcessor, ProcessorSettings};
use crate::provider::{HandlerRegistry, ProviderRegistry, ProviderScope};
use crate::transform::{ModelRegistry, TransformerRegistry};

/// Every lookup table a run resolves components from
pub struct Registries {
    pub handlers: Arc<HandlerRegistry>,
    pub providers: ProviderRegistry,
    pub transformers: TransformerRegistry,
    pub models: ModelRegistry,
    pub drivers: DriverRegistry,
}

impl Registries {
    pub fn builtin() -> Self {
        let handlers = Arc::new(HandlerRegistry::builtin());
        Self {
            providers: ProviderRegistry::builtin(Arc::clone(&handlers)),
            handlers,
            transformers: TransformerRegistry::builtin(),
            models: ModelRegistry::builtin(),
            drivers: DriverRegistry::builtin(),
        }
    }

    /// Built-in registries with every datastore writing into `backend`
    pub fn dry_run(backend: &MemoryBackend) -> Self {
        let mut registries = Self::builtin();
        registries.drivers.redirect_all(backend.driver());
        registries
    }
}

#[derive(Debug)]
pub struct ProcessFailure {
    pub process: String,
    pub error: IngestError,
}

/// Batch executors of one process definition
pub struct PreparedProcess {
    pub name: String,
    pub executors: BatchExecutors,
}

impl PreparedProcess {
    /// Run every batch concurrently and total their reports
    pub async fn execute(self) -> BatchReport {
        let PreparedProcess { name, mut executors } = self;
        let handles: Vec<_> = executors
            .by_ref()
            .map(|executor| tokio::spawn(executor.execute()))
            .collect();

        let mut total = BatchReport::default();
        for result in join_all(handles).await {
            match result {
                Ok(report) => total.absorb(&report),
                Err(e) => error!(process = %name, error = %e, "Batch executor panicked"),
            }
        }

        // Datasources are released when the executors' provider scope drops
        drop(executors);
        info!(
            process = %name,
            datasources = total.datasources_processed,
            failed = total.datasources_failed,
            written = total.datastore.records_written,
            "Process finished"
        );
        total
    }
}

#[derive(Default)]
pub struct PreparedRun {
    pub processes: Vec<PreparedProcess>,
    pub failures: Vec<ProcessFailure>,
    /// Definitions skipped as disabled or incomplete
    pub skipped: Vec<String>,
}

impl PreparedRun {
    pub fn batch_count(&self) -> usize {
        self.processes.iter().map(|p| p.executors.len()).sum()
    }
}

/// Totals of a whole run
#[derive(Debug, Default)]
pub struct RunReport {
    pub totals: BatchReport,
    pub failures: Vec<ProcessFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Definitions under `processes`, optionally narrowed to one name
fn definitions(config: &Configuration, only: Option<&str>) -> Vec<(String, Configuration)> {
    config
        .each("processes")
        .into_iter()
        .filter(|(name, _)| only.map_or(true, |only| only == name))
        .collect()
}

/// Prepare every enabled process definition
pub async fn prepare(config: &Configuration, registries: &Registries, only: Option<&str>) -> PreparedRun {
    let mut run = PreparedRun::default();

    for (name, definition) in definitions(config, only) {
        if definition.bool("disabled", false) {
            info!(process = %name, "Process is disabled, skipping");
            run.skipped.push(name);
            continue;
        }

        let datasource = definition.subtree("datasource");
        let datastore = definition.subtree("datastore");
        if datasource.is_empty() || datastore.is_empty() {
            warn!(
                process = %name,
                "Process must configure both datasource and datastore, skipping"
            );
            run.skipped.push(name);
            continue;
        }

        match prepare_process(&name, &definition, registries).await {
            Ok(executors) => {
                info!(process = %name, batches = executors.len(), "Process prepared");
                run.processes.push(PreparedProcess { name, executors });
            },
            Err(e) => {
                error!(process = %name, error = %e, "Could not initialize process");
                run.failures.push(ProcessFailure {
                    process: name,
                    error: e,
                });
            },
        }
    }

    run
}

async fn prepare_process(
    name: &str,
    definition: &Configuration,
    registries: &Registries,
) -> Result<BatchExecutors> {
    let provider = registries.providers.create(&definition.subtree("datasource"))?;
    let settings = DatastoreSettings::from_config(name, &definition.subtree("datastore"))?;
    let datastores = registries.drivers.factory(settings)?;

    let processor = definition.subtree("processor");
    let transformer = registries
        .transformers
        .create(&processor.subtree("transformer"), &registries.models)?;

    DataProcessor::new(
        name,
        provider,
        datastores,
        transformer,
        ProcessorSettings::from_config(&processor),
    )
    .datasources()
    .await
}

/// Run every prepared process one after another
pub async fn execute(run: PreparedRun) -> RunReport {
    let mut report = RunReport {
        failures: run.failures,
        ..RunReport::default()
    };
    for process in run.processes {
        let totals = process.execute().await;
        report.totals.absorb(&totals);
    }
    report
}

/// Datasource names each enabled process would ingest
///
/// Only the provider runs; nothing touches a datastore.
pub async fn discover(
    config: &Configuration,
    registries: &Registries,
    only: Option<&str>,
) -> Vec<(String, Result<Vec<String>>)> {
    let mut discovered = Vec::new();
    for (name, definition) in definitions(config, only) {
        if definition.bool("disabled", false) {
            continue;
        }
        let names = discover_process(&definition, registries).await;
        discovered.push((name, names));
    }
    discovered
}

async fn discover_process(definition: &Configuration, registries: &Registries) -> Result<Vec<String>> {
    let provider = registries.providers.create(&definition.subtree("datasource"))?;
    tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let scope = ProviderScope::enter(provider)?;
        Ok(scope
            .datasources()
            .iter()
            .map(|d| d.name().to_string())
            .collect())
    })
    .await
    .map_err(|e| IngestError::Task(e.to_string()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.json"), r#"[{"k": 1}, {"k": 2}]"#).unwrap();
        fs::write(dir.path().join("two.json"), r#"{"k": 3}"#).unwrap();
        dir
    }

    fn config(data_path: &str) -> Configuration {
        Configuration::new(json!({
            "processes": {
                "generic": {
                    "datasource": {"data-path": data_path},
                    "processor": {"max-processes": 2},
                    "datastore": {"driver": "postgres", "connection-url": "postgres://x/y"}
                },
                "off": {
                    "disabled": true,
                    "datasource": {"data-path": data_path},
                    "datastore": {"driver": "postgres"}
                },
                "incomplete": {
                    "datasource": {"data-path": data_path}
                },
                "missing-root": {
                    "datasource": {"data-path": "/nonexistent/recload"},
                    "datastore": {"driver": "postgres"}
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_prepare_and_execute() {
        let dir = data_dir();
        let backend = MemoryBackend::new();
        let config = config(dir.path().to_str().unwrap());

        let run = prepare(&config, &Registries::dry_run(&backend), None).await;
        assert_eq!(run.skipped, vec!["off", "incomplete"]);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].process, "missing-root");
        assert_eq!(run.processes.len(), 1);
        assert_eq!(run.batch_count(), 2);
        // setup runs before discovery, so the failing definition provisions too
        assert_eq!(backend.schema_creations(), 2);

        let report = execute(run).await;
        assert!(!report.is_success());
        assert_eq!(report.totals.accepted, 3);
        assert_eq!(report.totals.datastore.records_written, 3);
        assert_eq!(backend.record_count(), 3);
    }

    #[tokio::test]
    async fn test_prepare_only_one_process() {
        let dir = data_dir();
        let backend = MemoryBackend::new();
        let config = config(dir.path().to_str().unwrap());

        let run = prepare(&config, &Registries::dry_run(&backend), Some("generic")).await;
        assert!(run.failures.is_empty());
        assert!(run.skipped.is_empty());
        assert_eq!(run.processes[0].name, "generic");
    }

    #[tokio::test]
    async fn test_unreachable_database_fails_only_its_process() {
        let dir = data_dir();
        let backend = MemoryBackend::new();
        backend.set_unreachable(true);
        let config = config(dir.path().to_str().unwrap());

        let run = prepare(&config, &Registries::dry_run(&backend), Some("generic")).await;
        assert!(run.processes.is_empty());
        assert!(matches!(run.failures[0].error, IngestError::Datastore(_)));
    }

    #[tokio::test]
    async fn test_discover() {
        let dir = data_dir();
        let config = config(dir.path().to_str().unwrap());

        let discovered = discover(&config, &Registries::builtin(), None).await;
        let names: Vec<_> = discovered.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["generic", "incomplete", "missing-root"]);

        let generic = discovered[0].1.as_ref().unwrap();
        assert_eq!(generic.len(), 2);
        assert!(generic[0].ends_with("one.json"));
        assert!(discovered[2].1.is_err());
    }
}
