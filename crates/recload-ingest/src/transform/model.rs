//! Domain models and their persistable form

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use recload_common::checksum::json_checksum;
use recload_common::config::lookup;
use recload_common::Configuration;

use super::company::Company;
use crate::error::Result;
use crate::registry_key;

/// Raw input record with dot-path field access
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(Value);

impl RawRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Value at a dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path).filter(|v| !v.is_null())
    }

    /// Text at `path`; numbers are rendered, empty strings count as absent
    pub fn text(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_empty_object(&self) -> bool {
        self.0.as_object().map_or(true, |fields| fields.is_empty())
    }
}

/// Name/value pair stored next to an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Row written to the `entities` table, with its attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub kind: String,
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub data: Value,
    pub attributes: Vec<Attribute>,
    pub source: Option<String>,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            external_id: None,
            name: None,
            content_hash: json_checksum(&data),
            data,
            attributes: Vec::new(),
            source: None,
            ingested_at: Utc::now(),
        }
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Domain entity built from one raw record
///
/// The engine calls [`Model::save`] first, then [`Model::validate`] and
/// [`Model::filter`]; only a model passing both gates becomes a record.
pub trait Model: Send + fmt::Debug {
    fn kind(&self) -> &str;

    /// Normalize raw fields into the model's own fields
    fn save(&mut self) -> Result<()>;

    fn validate(&self) -> bool;

    fn filter(&self) -> bool {
        true
    }

    fn record(&self) -> EntityRecord;
}

pub type ModelConstructor = fn(RawRecord, &Configuration) -> Box<dyn Model>;

/// Model name to constructor lookup
#[derive(Clone, Default)]
pub struct ModelRegistry {
    constructors: HashMap<String, ModelConstructor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("GenericModel", GenericModel::create);
        registry.register("Company", Company::create);
        registry
    }

    /// Register a constructor; names match case-insensitively, ignoring `-` and `_`
    pub fn register(&mut self, name: &str, constructor: ModelConstructor) {
        self.constructors.insert(registry_key(name), constructor);
    }

    pub fn get(&self, name: &str) -> Option<ModelConstructor> {
        self.constructors.get(&registry_key(name)).copied()
    }
}

/// Keeps the raw record as-is
#[derive(Debug)]
pub struct GenericModel {
    raw: RawRecord,
    kind: String,
    id_field: Option<String>,
    name_field: Option<String>,
    external_id: Option<String>,
    name: Option<String>,
}

impl GenericModel {
    pub fn create(raw: RawRecord, parameters: &Configuration) -> Box<dyn Model> {
        Box::new(Self {
            raw,
            kind: parameters.string("kind", "generic"),
            id_field: parameters.opt_string("id-field"),
            name_field: parameters.opt_string("name-field"),
            external_id: None,
            name: None,
        })
    }
}

impl Model for GenericModel {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn save(&mut self) -> Result<()> {
        self.external_id = self.id_field.as_deref().and_then(|f| self.raw.text(f));
        self.name = self.name_field.as_deref().and_then(|f| self.raw.text(f));
        Ok(())
    }

    fn validate(&self) -> bool {
        !self.raw.is_empty_object()
    }

    fn record(&self) -> EntityRecord {
        EntityRecord::new(&self.kind, self.raw.as_value().clone())
            .with_external_id(self.external_id.clone())
            .with_name(self.name.clone())
    }
}
