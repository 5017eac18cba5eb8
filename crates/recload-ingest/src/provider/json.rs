//! JSON handlers
//!
//! `.json` documents hold either an array of records or one record; `.jsonl`
//! and `.ndjson` hold one record per line.

use serde_json::Value;
use std::sync::Arc;

use super::datasource::{Datasource, RecordLoader};
use super::handler::FileHandler;
use super::loader::ContentLoader;
use crate::error::{IngestError, Result};

/// Handler for `.json` documents
#[derive(Debug, Default)]
pub struct JsonFileHandler;

impl JsonFileHandler {
    pub fn create() -> Result<Arc<dyn FileHandler>> {
        Ok(Arc::new(Self))
    }
}

impl FileHandler for JsonFileHandler {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn datasources(&self, name: &str, content: Arc<dyn ContentLoader>) -> Result<Vec<Datasource>> {
        Ok(vec![Datasource::new(name, Arc::new(JsonRecords { content }))])
    }
}

/// Parses a whole JSON document into records
#[derive(Debug)]
pub struct JsonRecords {
    content: Arc<dyn ContentLoader>,
}

impl RecordLoader for JsonRecords {
    fn load(&self) -> Result<Vec<Value>> {
        let bytes = self.content.load()?;
        let document: Value = serde_json::from_slice(&bytes).map_err(|source| IngestError::Decode {
            name: self.content.describe(),
            source,
        })?;

        Ok(match document {
            Value::Array(records) => records,
            record => vec![record],
        })
    }
}

/// Handler for line-delimited JSON
#[derive(Debug, Default)]
pub struct JsonLinesFileHandler;

impl JsonLinesFileHandler {
    pub fn create() -> Result<Arc<dyn FileHandler>> {
        Ok(Arc::new(Self))
    }
}

impl FileHandler for JsonLinesFileHandler {
    fn name(&self) -> &'static str {
        "json-lines"
    }

    fn extensions(&self) -> &[&'static str] {
        &["jsonl", "ndjson"]
    }

    fn datasources(&self, name: &str, content: Arc<dyn ContentLoader>) -> Result<Vec<Datasource>> {
        Ok(vec![Datasource::new(name, Arc::new(JsonLinesRecords { content }))])
    }
}

#[derive(Debug)]
pub struct JsonLinesRecords {
    content: Arc<dyn ContentLoader>,
}

impl RecordLoader for JsonLinesRecords {
    fn load(&self) -> Result<Vec<Value>> {
        let bytes = self.content.load()?;
        serde_json::Deserializer::from_slice(&bytes)
            .into_iter::<Value>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| IngestError::Decode {
                name: self.content.describe(),
                source,
            })
    }
}
