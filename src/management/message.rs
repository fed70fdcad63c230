//! Management protocol messages and typed values.
//!
//! Reply attributes may arrive as any of several integer widths and
//! signedness variants; [`Record`] accessors normalise them so callers
//! only ever see `i64`/`u64`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::management::types::{ManagementError, ManagementResult};

/// A wire-level value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer variant that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Ubyte(v) => Some(i64::from(v)),
            Value::Ushort(v) => Some(i64::from(v)),
            Value::Uint(v) => Some(i64::from(v)),
            Value::Ulong(v) => i64::try_from(v).ok(),
            Value::Byte(v) => Some(i64::from(v)),
            Value::Short(v) => Some(i64::from(v)),
            Value::Int(v) => Some(i64::from(v)),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Any non-negative integer variant.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Ubyte(v) => Some(u64::from(v)),
            Value::Ushort(v) => Some(u64::from(v)),
            Value::Uint(v) => Some(u64::from(v)),
            Value::Ulong(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert a JSON value, mapping integers to `Long`/`Ulong`.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Long(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Ulong(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ulong(v) => serde_json::Value::from(*v),
            other => other
                .as_i64()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        }
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
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Ulong(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

/// One management request or reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Value>,
    pub application_properties: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Message {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.application_properties.get(key)
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.to_string(), value.into());
        self
    }
}

/// A query result row keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Pair a positional result row with the reply's attribute names.
    pub fn from_row(names: &[String], row: &[Value]) -> ManagementResult<Self> {
        if names.len() != row.len() {
            return Err(ManagementError::Malformed(format!(
                "result row has {} values for {} attributes",
                row.len(),
                names.len()
            )));
        }
        Ok(Record(
            names.iter().cloned().zip(row.iter().cloned()).collect(),
        ))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    fn typed<T>(
        &self,
        field: &str,
        expected: &'static str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> ManagementResult<T>
    where
        T: Default,
    {
        match self.get(field) {
            None => Ok(T::default()),
            Some(value) => convert(value).ok_or_else(|| ManagementError::FieldType {
                field: field.to_string(),
                expected,
            }),
        }
    }

    pub fn string(&self, field: &str) -> ManagementResult<String> {
        self.typed(field, "a string", |v| v.as_str().map(str::to_string))
    }

    pub fn boolean(&self, field: &str) -> ManagementResult<bool> {
        self.typed(field, "a boolean", Value::as_bool)
    }

    pub fn int(&self, field: &str) -> ManagementResult<i64> {
        self.typed(field, "an integer", Value::as_i64)
    }

    pub fn uint(&self, field: &str) -> ManagementResult<u64> {
        self.typed(field, "an unsigned integer", Value::as_u64)
    }

    /// Ports are strings on some entities and integers on others.
    pub fn port(&self, field: &str) -> ManagementResult<String> {
        self.typed(field, "a port", |v| match v {
            Value::String(s) => Some(s.clone()),
            other => other.as_i64().map(|p| p.to_string()),
        })
    }

    pub fn strings(&self, field: &str) -> ManagementResult<Vec<String>> {
        self.typed(field, "a list of strings", |v| {
            v.as_list()?
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect()
        })
    }

    /// The record as a JSON object, for mapping onto serde types.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Record(fields)
    }
}
