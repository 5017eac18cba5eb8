//! Recload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch ingestion of raw JSON records, possibly nested inside archives,
//! into a relational store.
//!
//! # Pipeline
//!
//! - **provider**: walks a directory tree, opens archives and turns every
//!   supported file into a lazily loaded [`provider::Datasource`]
//! - **transform**: maps raw records into models that are saved, validated
//!   and filtered before persisting
//! - **processor**: partitions datasources into batches and executes them
//! - **datastore**: pooled, retrying connections and buffered bulk inserts
//! - **producer**: prepares every enabled process definition of a run
//!
//! # Example
//!
//! ```no_run
//! use recload_common::Configuration;
//! use recload_ingest::producer::{self, Registries};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Configuration::load("settings.yml")?;
//!     let run = producer::prepare(&config, &Registries::builtin(), None).await;
//!     let report = producer::execute(run).await;
//!     println!("{} records written", report.totals.datastore.records_written);
//!     Ok(())
//! }
//! ```

pub mod datastore;
pub mod error;
pub mod processor;
pub mod producer;
pub mod provider;
pub mod transform;

pub use error::{DatastoreError, IngestError, Result};

/// Lookup key for registry names: `Postgre_Datastore` matches `postgredatastore`
pub(crate) fn registry_key(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}
