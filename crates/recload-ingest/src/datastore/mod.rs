//! Persistence
//!
//! A [`Datastore`] buffers accepted records into bulk inserts and runs every
//! backend operation on its own bounded task pool, each task borrowing a
//! connection from the datastore's [`ConnectionPool`]. A failed operation is
//! logged and its records are counted as lost; it never fails the caller.
//!
//! # Example
//!
//! ```no_run
//! use recload_ingest::datastore::{DatastoreSettings, MemoryBackend, DatastoreFactory};
//! use recload_ingest::transform::EntityRecord;
//!
//! # async fn run() {
//! let backend = MemoryBackend::new();
//! let factory = DatastoreFactory::new(DatastoreSettings::default(), backend.factory());
//!
//! let datastore = factory.create();
//! datastore.initialize().await;
//! datastore.bulk_insert(EntityRecord::new("generic", serde_json::json!({"k": 1}))).await;
//! let report = datastore.close().await;
//! assert_eq!(report.records_written, 1);
//! # }
//! ```

pub mod bulk;
pub mod connection;
pub mod driver;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod retry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub use bulk::BulkInsert;
pub use connection::{Connection, ConnectionFactory};
pub use driver::{DatastoreFactory, DatastoreSettings, DriverConstructor, DriverRegistry};
pub use memory::MemoryBackend;
pub use pool::{ConnectionPool, PoolStats};
pub use retry::RetryPolicy;

use crate::error::DatastoreResult;
use crate::transform::EntityRecord;

/// Counters of one datastore's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatastoreReport {
    pub records_written: u64,
    pub records_lost: u64,
    pub bulk_inserts: u64,
    pub failed_operations: u64,
}

#[derive(Debug, Default)]
struct AtomicDatastoreStats {
    records_written: AtomicU64,
    records_lost: AtomicU64,
    bulk_inserts: AtomicU64,
    failed_operations: AtomicU64,
}

impl AtomicDatastoreStats {
    fn snapshot(&self) -> DatastoreReport {
        DatastoreReport {
            records_written: self.records_written.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            bulk_inserts: self.bulk_inserts.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }
}

enum Operation {
    Insert(EntityRecord),
    BulkInsert(Vec<EntityRecord>),
    Setup {
        drop_existing: bool,
        init_sql: Option<String>,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Insert(_) => "insert",
            Operation::BulkInsert(_) => "bulk_insert",
            Operation::Setup { .. } => "setup",
        }
    }

    fn record_count(&self) -> u64 {
        match self {
            Operation::Insert(_) => 1,
            Operation::BulkInsert(records) => records.len() as u64,
            Operation::Setup { .. } => 0,
        }
    }
}

pub struct Datastore {
    settings: DatastoreSettings,
    connections: Arc<dyn ConnectionFactory>,
    pool: Arc<ConnectionPool>,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    buffer: Mutex<BulkInsert<EntityRecord>>,
    stats: Arc<AtomicDatastoreStats>,
}

impl Datastore {
    pub fn new(settings: DatastoreSettings, connections: Arc<dyn ConnectionFactory>) -> Self {
        let pool = ConnectionPool::new(
            settings.name.clone(),
            Arc::clone(&connections),
            settings.max_pool_size,
            settings.retry_policy(),
        );
        Self {
            permits: Arc::new(Semaphore::new(pool.max_size())),
            buffer: Mutex::new(BulkInsert::new(settings.batch_size)),
            pool: Arc::new(pool),
            tasks: TaskTracker::new(),
            stats: Arc::new(AtomicDatastoreStats::default()),
            settings,
            connections,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &DatastoreSettings {
        &self.settings
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Open the pool's connections
    pub async fn initialize(&self) {
        self.pool.init_pool().await;
    }

    /// Provision the database, then create the schema and run the init script
    ///
    /// Only provisioning failures are returned; schema and script failures
    /// are logged and the datastore stays usable.
    pub async fn setup(&self) -> DatastoreResult<()> {
        self.connections.ensure_database().await?;

        let setup = self.submit(Operation::Setup {
            drop_existing: self.settings.should_drop,
            init_sql: self.settings.init_sql.clone(),
        });
        if let Ok(Some(_)) = setup.await {
            info!(datastore = %self.name(), backend = %self.connections.describe(), "Datastore is ready");
        }
        Ok(())
    }

    /// Persist one record on the task pool
    pub fn insert(&self, record: EntityRecord) -> JoinHandle<Option<u64>> {
        self.submit(Operation::Insert(record))
    }

    /// Buffer a record, flushing the buffer first when it is full
    pub async fn bulk_insert(&self, record: EntityRecord) {
        let full = {
            let mut buffer = self.buffer.lock().await;
            let full = buffer.is_completed().then(|| buffer.take());
            buffer.store(record);
            full
        };
        if let Some(full) = full {
            debug!(datastore = %self.name(), records = full.len(), "Bulk buffer is full, flushing");
            self.submit(Operation::BulkInsert(full.into_items()));
        }
    }

    /// Records waiting in the bulk buffer
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Submit whatever is buffered, if anything
    pub async fn flush(&self) -> Option<JoinHandle<Option<u64>>> {
        let pending = {
            let mut buffer = self.buffer.lock().await;
            (!buffer.is_empty()).then(|| buffer.take())
        };
        pending.map(|buffer| self.submit(Operation::BulkInsert(buffer.into_items())))
    }

    /// Wait for every submitted task
    pub async fn sync(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Flush the buffer, wait for every task and close the pool
    pub async fn close(&self) -> DatastoreReport {
        self.flush().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.pool.close_all().await;

        let report = self.report();
        info!(
            datastore = %self.name(),
            written = report.records_written,
            lost = report.records_lost,
            bulk_inserts = report.bulk_inserts,
            "Datastore closed"
        );
        report
    }

    pub fn report(&self) -> DatastoreReport {
        self.stats.snapshot()
    }

    fn submit(&self, operation: Operation) -> JoinHandle<Option<u64>> {
        let pool = Arc::clone(&self.pool);
        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);
        self.tasks.spawn(perform(pool, permits, stats, operation))
    }
}

async fn perform(
    pool: Arc<ConnectionPool>,
    permits: Arc<Semaphore>,
    stats: Arc<AtomicDatastoreStats>,
    operation: Operation,
) -> Option<u64> {
    let name = operation.name();
    let records = operation.record_count();
    let is_bulk = matches!(operation, Operation::BulkInsert(_));
    let failed = |stats: &AtomicDatastoreStats| {
        stats.failed_operations.fetch_add(1, Ordering::Relaxed);
        stats.records_lost.fetch_add(records, Ordering::Relaxed);
    };

    let Ok(_permit) = permits.acquire_owned().await else {
        failed(&stats);
        return None;
    };

    let mut connection = match pool.acquire().await {
        Ok(connection) => connection,
        Err(e) => {
            error!(operation = name, records, error = %e, "Could not acquire connection");
            failed(&stats);
            return None;
        },
    };

    let result = match operation {
        Operation::Insert(record) => connection.insert(&record).await,
        Operation::BulkInsert(records) => connection.bulk_insert(&records).await,
        Operation::Setup {
            drop_existing,
            init_sql,
        } => run_setup(connection.as_mut(), drop_existing, init_sql.as_deref()).await,
    };

    if let Err(e) = pool.release(connection).await {
        warn!(operation = name, error = %e, "Could not return connection to pool");
    }

    match result {
        Ok(written) => {
            if is_bulk {
                stats.bulk_inserts.fetch_add(1, Ordering::Relaxed);
            }
            stats.records_written.fetch_add(written, Ordering::Relaxed);
            Some(written)
        },
        Err(e) => {
            error!(operation = name, records, error = %e, "Datastore operation failed, records are lost");
            failed(&stats);
            None
        },
    }
}

async fn run_setup(
    connection: &mut dyn Connection,
    drop_existing: bool,
    init_sql: Option<&str>,
) -> DatastoreResult<u64> {
    let mut outcome = Ok(0);
    if let Err(e) = connection.create_schema(drop_existing).await {
        error!(error = %e, "Could not create storage schema");
        outcome = Err(e);
    }
    if let Some(sql) = init_sql {
        if let Err(e) = connection.execute_script(sql).await {
            error!(error = %e, "Could not run storage init SQL");
            outcome = Err(e);
        }
    }
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn datastore(backend: &MemoryBackend, batch_size: usize, max_pool_size: usize) -> Datastore {
        let settings = DatastoreSettings {
            name: "test".into(),
            driver: "memory".into(),
            batch_size,
            max_pool_size,
            ..DatastoreSettings::default()
        };
        DatastoreFactory::new(settings, backend.factory()).create()
    }

    fn record(n: usize) -> EntityRecord {
        EntityRecord::new("generic", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_twelve_records_capacity_five() {
        let backend = MemoryBackend::new();
        let store = datastore(&backend, 5, 2);
        store.initialize().await;

        for n in 0..12 {
            store.bulk_insert(record(n)).await;
        }
        store.sync().await;

        assert_eq!(backend.bulk_sizes(), vec![5, 5]);
        assert_eq!(store.buffered().await, 2);

        let report = store.close().await;
        let mut sizes = backend.bulk_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 5, 5]);
        assert_eq!(report.records_written, 12);
        assert_eq!(report.bulk_inserts, 3);
        assert_eq!(backend.record_count(), 12);
        assert_eq!(backend.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_single_insert() {
        let backend = MemoryBackend::new();
        let store = datastore(&backend, 10, 1);

        let written = store.insert(record(1)).await.unwrap();
        assert_eq!(written, Some(1));
        store.close().await;
        assert_eq!(backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_close_without_records() {
        let backend = MemoryBackend::new();
        let store = datastore(&backend, 10, 1);
        store.initialize().await;
        let report = store.close().await;
        assert_eq!(report, DatastoreReport::default());
        assert!(backend.bulk_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_setup_creates_schema_and_runs_script() {
        let backend = MemoryBackend::new();
        let settings = DatastoreSettings {
            should_drop: true,
            init_sql: Some("CREATE INDEX idx ON entities (name);".into()),
            ..DatastoreSettings::default()
        };
        let store = DatastoreFactory::new(settings, backend.factory()).create();

        store.setup().await.unwrap();
        store.close().await;
        assert_eq!(backend.schema_drops(), 1);
        assert_eq!(backend.schema_creations(), 1);
        assert_eq!(backend.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_fails_when_database_unreachable() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(true);
        let store = datastore(&backend, 10, 1);
        assert!(store.setup().await.is_err());
        assert_eq!(backend.schema_creations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_out_transient_outage() {
        let backend = MemoryBackend::new();
        let store = datastore(&backend, 2, 1);
        backend.fail_next_connects(2);

        store.bulk_insert(record(1)).await;
        store.bulk_insert(record(2)).await;
        store.bulk_insert(record(3)).await;
        let report = store.close().await;

        assert_eq!(report.records_written, 3);
        assert_eq!(report.records_lost, 0);
    }
}
