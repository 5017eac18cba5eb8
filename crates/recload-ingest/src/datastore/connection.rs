//! Backend connection abstraction

use async_trait::async_trait;

use crate::error::DatastoreResult;
use crate::transform::EntityRecord;

/// An open backend connection
#[async_trait]
pub trait Connection: Send {
    /// Cheap liveness probe
    async fn test(&mut self) -> bool;

    async fn insert(&mut self, record: &EntityRecord) -> DatastoreResult<u64> {
        self.bulk_insert(std::slice::from_ref(record)).await
    }

    /// Persist records atomically, returning how many rows were written
    async fn bulk_insert(&mut self, records: &[EntityRecord]) -> DatastoreResult<u64>;

    /// Create the entity tables, dropping them first when asked
    async fn create_schema(&mut self, drop_existing: bool) -> DatastoreResult<()>;

    async fn execute_script(&mut self, sql: &str) -> DatastoreResult<()>;

    async fn close(&mut self);
}

/// Creates connections for one configured backend
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Backend description safe for logs (no credentials)
    fn describe(&self) -> String;

    /// Make sure the target database exists
    async fn ensure_database(&self) -> DatastoreResult<()> {
        Ok(())
    }

    /// Open a new connection
    async fn connect(&self) -> DatastoreResult<Box<dyn Connection>>;
}
