//! Company register entries
//!
//! Records follow the state register export layout: top-level `ogrn`, `inn`,
//! `kpp`, `name`, `full_name` and the activity classification under
//! `data.СвОКВЭД` (`СвОКВЭДОсн` for the main code, `СвОКВЭДДоп` for the
//! additional ones, either a single object or a list).

use serde_json::{json, Value};

use recload_common::Configuration;

use super::model::{EntityRecord, Model, RawRecord};
use crate::error::{IngestError, Result};

const MAIN_ACTIVITY: &str = "data.СвОКВЭД.СвОКВЭДОсн.КодОКВЭД";
const ADDITIONAL_ACTIVITIES: &str = "data.СвОКВЭД.СвОКВЭДДоп";
const ACTIVITY_CODE: &str = "КодОКВЭД";

pub const DEFAULT_ACTIVITY_PREFIX: &str = "61";

#[derive(Debug)]
pub struct Company {
    raw: RawRecord,
    activity_prefix: String,
    ogrn: Option<String>,
    inn: Option<String>,
    kpp: Option<String>,
    full_name: Option<String>,
    name: Option<String>,
    activity_code: Option<String>,
    additional_activities: Vec<String>,
}

impl Company {
    pub fn create(raw: RawRecord, parameters: &Configuration) -> Box<dyn Model> {
        Box::new(Self {
            raw,
            activity_prefix: parameters.string("activity-prefix", DEFAULT_ACTIVITY_PREFIX),
            ogrn: None,
            inn: None,
            kpp: None,
            full_name: None,
            name: None,
            activity_code: None,
            additional_activities: Vec::new(),
        })
    }

    pub fn ogrn(&self) -> Option<&str> {
        self.ogrn.as_deref()
    }

    pub fn activity_code(&self) -> Option<&str> {
        self.activity_code.as_deref()
    }

    fn additional_codes(&self) -> Vec<String> {
        let code = |entry: &Value| match entry.get(ACTIVITY_CODE) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        match self.raw.get(ADDITIONAL_ACTIVITIES) {
            Some(Value::Array(entries)) => entries.iter().filter_map(code).collect(),
            Some(entry @ Value::Object(_)) => code(entry).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl Model for Company {
    fn kind(&self) -> &str {
        "company"
    }

    fn save(&mut self) -> Result<()> {
        if !self.raw.as_value().is_object() {
            return Err(IngestError::Transform(
                "company record must be a JSON object".to_string(),
            ));
        }

        self.inn = self.raw.text("inn");
        self.kpp = self.raw.text("kpp");
        self.ogrn = self.raw.text("ogrn");
        self.name = self.raw.text("name");
        self.full_name = self.raw.text("full_name").or_else(|| self.name.clone());
        self.activity_code = self.raw.text(MAIN_ACTIVITY);
        self.additional_activities = self.additional_codes();
        Ok(())
    }

    fn validate(&self) -> bool {
        self.ogrn.is_some()
            && self.activity_code.is_some()
            && (self.full_name.is_some() || self.name.is_some())
    }

    fn filter(&self) -> bool {
        self.activity_code
            .as_deref()
            .is_some_and(|code| code.starts_with(&self.activity_prefix))
    }

    fn record(&self) -> EntityRecord {
        let data = json!({
            "ogrn": self.ogrn,
            "inn": self.inn,
            "kpp": self.kpp,
            "full_name": self.full_name,
            "name": self.name,
            "okved_code": self.activity_code,
        });

        let mut record = EntityRecord::new(self.kind(), data)
            .with_external_id(self.ogrn.clone())
            .with_name(self.full_name.clone());
        if let Some(code) = &self.activity_code {
            record = record.with_attribute("okved_main", code);
        }
        for code in &self.additional_activities {
            record = record.with_attribute("okved_additional", code);
        }
        record
    }
}
