use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Case data context: a JSON object shared by every task of a case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CaseData(Map<String, Value>);

impl CaseData {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge task output into the case data. Objects are merged key by key;
    /// any other value is stored under `fallback_key`.
    pub fn merge(&mut self, output: &Value, fallback_key: &str) {
        match output {
            Value::Null => {}
            Value::Object(fields) => {
                for (key, value) in fields {
                    self.0.insert(key.clone(), value.clone());
                }
            }
            other => {
                self.0.insert(fallback_key.to_string(), other.clone());
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for CaseData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Value> for CaseData {
    /// Non-object values are wrapped under a `value` key.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
        }
    }
}

/// JSON truthiness used by split and completion predicates.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
