//! Typed payloads passed into and out of tasks.
//!
//! A payload is a flat map of named fields to primitive values. Tasks read
//! their input from one and publish their output as another; the wiring of a
//! chain moves fields from one task's output into the next task's input.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field carrying an image locator through the blur chain.
pub const KEY_IMAGE_URI: &str = "image_uri";

/// Field carrying the blur level for the transform step.
pub const KEY_BLUR_LEVEL: &str = "blur_level";

/// A primitive payload value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Str(String),
    Int(i64),
    /// Reference to a blob (file path, `file://` URL, media URL, ...).
    Locator(String),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::Str,
            Value::Int(_) => ValueType::Int,
            Value::Locator(_) => ValueType::Locator,
        }
    }
}

/// The type of a payload field, used by task contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Str,
    Int,
    Locator,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Str => "string",
            ValueType::Int => "integer",
            ValueType::Locator => "locator",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_str(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, Value::Str(value.into()))
    }

    pub fn with_int(self, key: impl Into<String>, value: i64) -> Self {
        self.with(key, Value::Int(value))
    }

    pub fn with_locator(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, Value::Locator(value.into()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_locator(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::Locator(s)) => Some(s),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every field of `other` into `self`. With `overwrite == false`
    /// fields already present in `self` are kept.
    pub fn merge_from(&mut self, other: &Payload, overwrite: bool) {
        for (key, value) in &other.0 {
            if overwrite || !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
