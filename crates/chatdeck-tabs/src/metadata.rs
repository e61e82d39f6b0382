//! Metadata attached to tabs and messages
//!
//! A handful of well-known keys are typed; anything else lands in `extra` and
//! is written back out unchanged. Writes through [`Metadata::insert`] land in
//! the typed field for a well-known key, so `extra` never shadows one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TabError;
use crate::Result;

const TAGS: &str = "tags";
const SOURCE: &str = "source";
const FAILED: &str = "failed";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Free-form labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Where the record came from (e.g. "cli", "web", "restore")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Set when the message was produced after a generator failure
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Metadata {
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.source.is_none()
            && !self.failed
            && self.extra.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Extension values, without the well-known keys
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Store a value under `key`, returning the previous one.
    ///
    /// Well-known keys update their typed field and must carry a value of
    /// that field's type; anything else is kept as an opaque extension value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<Option<Value>> {
        let key = key.into();
        let previous = match key.as_str() {
            TAGS => replace_typed(&key, &mut self.tags, value)?,
            SOURCE => replace_typed(&key, &mut self.source, value)?,
            FAILED => replace_typed(&key, &mut self.failed, value)?,
            _ => return Ok(self.extra.insert(key, value)),
        };
        Ok(Some(previous))
    }
}

fn replace_typed<T>(key: &str, field: &mut T, value: Value) -> Result<Value>
where
    T: Serialize + DeserializeOwned,
{
    let next: T = serde_json::from_value(value).map_err(|e| TabError::InvalidMetadata {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    let previous = std::mem::replace(field, next);
    Ok(serde_json::to_value(previous).unwrap_or(Value::Null))
}
