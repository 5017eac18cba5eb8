//! Record transformation
//!
//! A [`Transformer`] turns one raw record into a [`Model`]; [`evaluate`] runs
//! the model through save, validate and filter and reports the outcome.

pub mod company;
pub mod model;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use recload_common::Configuration;

pub use company::Company;
pub use model::{
    Attribute, EntityRecord, GenericModel, Model, ModelConstructor, ModelRegistry, RawRecord,
};

use crate::error::{IngestError, Result};
use crate::registry_key;

/// Maps raw records to models
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, raw: Value) -> Result<Box<dyn Model>>;
}

/// Builds the model named by the `model` parameter (default `GenericModel`)
pub struct GenericTransformer {
    model: String,
    constructor: ModelConstructor,
    parameters: Configuration,
}

impl GenericTransformer {
    pub fn new(parameters: Configuration, models: &ModelRegistry) -> Result<Self> {
        let model = parameters.string("model", "GenericModel");
        let constructor = models
            .get(&model)
            .ok_or_else(|| IngestError::unknown("model", &model))?;
        Ok(Self {
            model,
            constructor,
            parameters,
        })
    }

    pub fn create(parameters: &Configuration, models: &ModelRegistry) -> Result<Arc<dyn Transformer>> {
        Ok(Arc::new(Self::new(parameters.clone(), models)?))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Transformer for GenericTransformer {
    fn name(&self) -> &str {
        "GenericTransformer"
    }

    fn transform(&self, raw: Value) -> Result<Box<dyn Model>> {
        Ok((self.constructor)(RawRecord::new(raw), &self.parameters))
    }
}

/// What happened to one raw record
#[derive(Debug)]
pub enum RecordOutcome {
    Accepted(EntityRecord),
    Invalid(Box<dyn Model>),
    Filtered(Box<dyn Model>),
}

/// Transform, save, validate and filter one raw record
pub fn evaluate(transformer: &dyn Transformer, raw: Value) -> Result<RecordOutcome> {
    let mut model = transformer.transform(raw)?;
    model.save()?;

    if !model.validate() {
        return Ok(RecordOutcome::Invalid(model));
    }
    if !model.filter() {
        return Ok(RecordOutcome::Filtered(model));
    }
    Ok(RecordOutcome::Accepted(model.record()))
}

pub type TransformerConstructor = fn(&Configuration, &ModelRegistry) -> Result<Arc<dyn Transformer>>;

/// Transformer name to constructor lookup
pub struct TransformerRegistry {
    constructors: HashMap<String, TransformerConstructor>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("GenericTransformer", GenericTransformer::create);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: TransformerConstructor) {
        self.constructors.insert(registry_key(name), constructor);
    }

    /// Build from a `processor.transformer` section
    pub fn create(&self, config: &Configuration, models: &ModelRegistry) -> Result<Arc<dyn Transformer>> {
        let name = config.string("transformer", "GenericTransformer");
        let constructor = self
            .constructors
            .get(&registry_key(&name))
            .ok_or_else(|| IngestError::unknown("transformer", &name))?;
        constructor(&config.subtree("parameters"), models)
    }
}
