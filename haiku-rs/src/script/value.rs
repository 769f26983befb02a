//! Runtime value type for Haiku programs.
//!
//! Values are JSON-shaped: scalars, ordered lists, and insertion-ordered
//! mappings.  Request descriptors and responses are built from them.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// Insertion-ordered key → value mapping.
pub type Map = IndexMap<String, Value>;

/// A Haiku runtime value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(Map),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            // Collections print as compact JSON.
            Value::List(_) | Value::Map(_) => match serde_json::to_string(self) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl Value {
    /// Name of the type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "mapping",
        }
    }

    /// `false`, zero, `""`, empty collections, and null are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Member lookup: mapping key, or list index given as a decimal string.
    pub fn get(&self, segment: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(segment),
            Value::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Follow a dotted path, or `None` if some segment does not resolve.
    pub fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter().try_fold(self, |cur, seg| cur.get(seg.as_ref()))
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// Type-aware ordering used by `<`, `>`, `<=`, `>=`.
    ///
    /// Numbers compare numerically across int/float, strings lexically,
    /// `false < true`, null below everything.  Unrelated types order as
    /// `Less`.
    pub fn cmp_value(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::List(_), Value::List(_)) | (Value::Map(_), Value::Map(_)) => {
                self.to_string().cmp(&other.to_string())
            }
            _ => Ordering::Less,
        }
    }

    /// `==` semantics: equal under [`cmp_value`](Self::cmp_value), so
    /// mismatched types are never equal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        self.cmp_value(other) == Ordering::Equal
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_scalars() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Int(25).to_string(), "25");
        assert_eq!(Value::Float(98.5).to_string(), "98.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::from("abc").to_string(), "abc");
    }

    #[test]
    fn display_collections_as_json() {
        let v = Value::from(json!({"a": [1, "x"], "b": null}));
        assert_eq!(v.to_string(), r#"{"a":[1,"x"],"b":null}"#);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(Map::new()).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn numeric_comparison_promotes() {
        assert_eq!(Value::Int(3).cmp_value(&Value::Float(2.5)), Ordering::Greater);
        assert!(Value::Int(2).loose_eq(&Value::Float(2.0)));
    }

    #[test]
    fn null_sorts_first_and_equals_only_null() {
        assert_eq!(Value::Null.cmp_value(&Value::Int(-100)), Ordering::Less);
        assert_eq!(Value::from("").cmp_value(&Value::Null), Ordering::Greater);
        assert!(Value::Null.loose_eq(&Value::Null));
        assert!(!Value::Null.loose_eq(&Value::Bool(false)));
    }

    #[test]
    fn mismatched_types_are_less_and_unequal() {
        assert_eq!(Value::from("5").cmp_value(&Value::Int(5)), Ordering::Less);
        assert_eq!(Value::Int(5).cmp_value(&Value::from("5")), Ordering::Less);
        assert!(!Value::from("5").loose_eq(&Value::Int(5)));
    }

    #[test]
    fn bool_ordering() {
        assert_eq!(Value::Bool(false).cmp_value(&Value::Bool(true)), Ordering::Less);
    }

    #[test]
    fn lookup_paths() {
        let v = Value::from(json!({"data": {"items": [{"id": 7}]}}));
        assert_eq!(v.lookup_path(&["data", "items", "0", "id"]), Some(&Value::Int(7)));
        assert_eq!(v.lookup_path(&["data", "items", "3"]), None);
        assert_eq!(v.lookup_path(&["data", "items", "-1"]), None);
        assert_eq!(v.lookup_path(&["data", "items", "0", "id", "deeper"]), None);
    }

    #[test]
    fn serializes_untagged() {
        let mut m = Map::new();
        m.insert("get".into(), Value::from("https://x"));
        m.insert("n".into(), Value::Null);
        let s = serde_json::to_string(&Value::Map(m)).unwrap();
        assert_eq!(s, r#"{"get":"https://x","n":null}"#);
    }
}
