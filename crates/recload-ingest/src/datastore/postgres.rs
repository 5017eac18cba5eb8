//! PostgreSQL backend

use async_trait::async_trait;
use sqlx::migrate::MigrateDatabase;
use sqlx::types::Json;
use sqlx::{Connection as _, Executor as _, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use super::connection::{Connection, ConnectionFactory};
use crate::error::{DatastoreError, DatastoreResult};
use crate::transform::EntityRecord;

/// Rows per `INSERT` statement, keeping bind parameters under the protocol limit
const ENTITY_ROWS_PER_STATEMENT: usize = 1000;
const ATTRIBUTE_ROWS_PER_STATEMENT: usize = 5000;

pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id UUID PRIMARY KEY,
    kind VARCHAR(64) NOT NULL,
    external_id VARCHAR(256),
    name VARCHAR(1024),
    data JSONB NOT NULL,
    source TEXT,
    content_hash CHAR(64) NOT NULL,
    ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_entities_kind_external_id ON entities (kind, external_id);
CREATE INDEX IF NOT EXISTS idx_entities_content_hash ON entities (content_hash);

CREATE TABLE IF NOT EXISTS entity_attributes (
    id BIGSERIAL PRIMARY KEY,
    entity_id UUID NOT NULL REFERENCES entities (id) ON DELETE CASCADE,
    name VARCHAR(256) NOT NULL,
    value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entity_attributes_entity_id ON entity_attributes (entity_id);
"#;

pub const DROP_SCHEMA_SQL: &str = r#"
DROP TABLE IF EXISTS entity_attributes;
DROP TABLE IF EXISTS entities;
"#;

/// Replace the password of a connection URL with `***`
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _password)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

pub struct PgConnectionFactory {
    url: String,
}

impl PgConnectionFactory {
    pub fn new(url: &str) -> DatastoreResult<Self> {
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(DatastoreError::Config(format!(
                "connection-url must be a postgres:// URL, got '{}'",
                redact_url(url)
            )));
        }
        Ok(Self {
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    fn describe(&self) -> String {
        redact_url(&self.url)
    }

    async fn ensure_database(&self) -> DatastoreResult<()> {
        if !Postgres::database_exists(&self.url).await? {
            info!(database = %self.describe(), "Database does not exist, creating it");
            Postgres::create_database(&self.url).await?;
        }
        Ok(())
    }

    async fn connect(&self) -> DatastoreResult<Box<dyn Connection>> {
        let connection = PgConnection::connect(&self.url).await?;
        debug!(database = %self.describe(), "Opened connection");
        Ok(Box::new(PgDatastoreConnection {
            connection: Some(connection),
        }))
    }
}

pub struct PgDatastoreConnection {
    connection: Option<PgConnection>,
}

impl PgDatastoreConnection {
    fn open(&mut self) -> DatastoreResult<&mut PgConnection> {
        self.connection.as_mut().ok_or(DatastoreError::Closed)
    }
}

#[async_trait]
impl Connection for PgDatastoreConnection {
    async fn test(&mut self) -> bool {
        match self.connection.as_mut() {
            Some(connection) => sqlx::query("SELECT 1").execute(connection).await.is_ok(),
            None => false,
        }
    }

    async fn bulk_insert(&mut self, records: &[EntityRecord]) -> DatastoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.open()?.begin().await?;
        let mut written = 0;

        for chunk in records.chunks(ENTITY_ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO entities (id, kind, external_id, name, data, source, content_hash, ingested_at) ",
            );
            query_builder.push_values(chunk, |mut b, record| {
                b.push_bind(record.id)
                    .push_bind(&record.kind)
                    .push_bind(&record.external_id)
                    .push_bind(&record.name)
                    .push_bind(Json(&record.data))
                    .push_bind(&record.source)
                    .push_bind(&record.content_hash)
                    .push_bind(record.ingested_at);
            });
            written += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        let attributes: Vec<(Uuid, &str, &str)> = records
            .iter()
            .flat_map(|record| {
                record
                    .attributes
                    .iter()
                    .map(move |a| (record.id, a.name.as_str(), a.value.as_str()))
            })
            .collect();

        for chunk in attributes.chunks(ATTRIBUTE_ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO entity_attributes (entity_id, name, value) ");
            query_builder.push_values(chunk, |mut b, (entity_id, name, value)| {
                b.push_bind(*entity_id).push_bind(*name).push_bind(*value);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn create_schema(&mut self, drop_existing: bool) -> DatastoreResult<()> {
        let connection = self.open()?;
        if drop_existing {
            info!("Dropping existing entity tables");
            connection.execute(sqlx::raw_sql(DROP_SCHEMA_SQL)).await?;
        }
        connection.execute(sqlx::raw_sql(CREATE_SCHEMA_SQL)).await?;
        Ok(())
    }

    async fn execute_script(&mut self, sql: &str) -> DatastoreResult<()> {
        let connection = self.open()?;
        connection.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "Connection did not close cleanly");
            }
        }
    }
}
