//! In-memory backend
//!
//! Keeps every write in process memory. Used for `--dry-run` and by tests
//! that exercise the full pipeline without a database.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connection::{Connection, ConnectionFactory};
use super::driver::{DatastoreSettings, DriverConstructor};
use crate::error::{DatastoreError, DatastoreResult};
use crate::transform::EntityRecord;

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<EntityRecord>,
    bulk_sizes: Vec<usize>,
    scripts: Vec<String>,
    schema_creations: usize,
    schema_drops: usize,
    connections_opened: usize,
    connections_closed: usize,
    failing_connects: usize,
    unreachable: bool,
}

/// Shared in-memory store; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(MemoryConnectionFactory {
            backend: self.clone(),
        })
    }

    /// Driver constructor resolving every datastore to this backend
    pub fn driver(&self) -> DriverConstructor {
        let backend = self.clone();
        Arc::new(
            move |_settings: &DatastoreSettings| -> DatastoreResult<Arc<dyn ConnectionFactory>> {
                Ok(backend.factory())
            },
        )
    }

    pub fn records(&self) -> Vec<EntityRecord> {
        self.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Size of every bulk insert, in completion order
    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.lock().bulk_sizes.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn schema_creations(&self) -> usize {
        self.lock().schema_creations
    }

    pub fn schema_drops(&self) -> usize {
        self.lock().schema_drops
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        let state = self.lock();
        state.connections_opened - state.connections_closed
    }

    /// Make the next `count` connection attempts fail transiently
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// Make database provisioning fail, as for an unreachable server
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct MemoryConnectionFactory {
    backend: MemoryBackend,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn ensure_database(&self) -> DatastoreResult<()> {
        if self.backend.lock().unreachable {
            return Err(DatastoreError::Config("memory backend is unreachable".into()));
        }
        Ok(())
    }

    async fn connect(&self) -> DatastoreResult<Box<dyn Connection>> {
        let mut state = self.backend.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(DatastoreError::Connection("memory backend unavailable".into()));
        }
        state.connections_opened += 1;
        Ok(Box::new(MemoryConnection {
            backend: self.backend.clone(),
            open: true,
        }))
    }
}

struct MemoryConnection {
    backend: MemoryBackend,
    open: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> DatastoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DatastoreError::Closed)
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn test(&mut self) -> bool {
        self.open
    }

    async fn bulk_insert(&mut self, records: &[EntityRecord]) -> DatastoreResult<u64> {
        self.ensure_open()?;
        let mut state = self.backend.lock();
        state.records.extend_from_slice(records);
        state.bulk_sizes.push(records.len());
        Ok(records.len() as u64)
    }

    async fn create_schema(&mut self, drop_existing: bool) -> DatastoreResult<()> {
        self.ensure_open()?;
        let mut state = self.backend.lock();
        if drop_existing {
            state.schema_drops += 1;
            state.records.clear();
        }
        state.schema_creations += 1;
        Ok(())
    }

    async fn execute_script(&mut self, sql: &str) -> DatastoreResult<()> {
        self.ensure_open()?;
        self.backend.lock().scripts.push(sql.to_string());
        Ok(())
    }

    async fn close(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.backend.lock().connections_closed += 1;
        }
    }
}
