//! Tagged value tree used for [`crate::event::Event`] payload and metadata.
//!
//! Event payloads originate from many sources — agent SDKs, mods, the
//! gateway's own system handlers — so they need a shape that round-trips
//! through JSON exactly, including fields this crate doesn't know about yet.
//! A `serde_json::Value`-shaped enum gets us that for free while still
//! giving callers typed accessors for the handful of shapes they expect.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A JSON-equivalent value. `Map` uses a `BTreeMap` so two payloads built
/// from the same fields always serialize identically, which matters for
/// idempotency-cache keys in mod handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Convenience map type used at call sites constructing payload/metadata.
pub type ValueMap = BTreeMap<String, Value>;

/// Builds a [`ValueMap`] from `(key, value)` pairs, mirroring `serde_json::json!`
/// ergonomics without pulling in a macro crate for it.
#[macro_export]
macro_rules! value_map {
    () => { $crate::value::ValueMap::new() };
    ($($k:expr => $v:expr),+ $(,)?) => {{
        let mut m = $crate::value::ValueMap::new();
        $(m.insert($k.to_string(), $crate::value::Value::from($v));)+
        m
    }};
}
