use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Data a template is applied to.
///
/// Aggregates are `Arc`-wrapped so binding `.` to a nested value or handing a
/// map to an included template never copies it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<IndexMap<String, Value>>),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into().into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    pub fn map(entries: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Value::Map(Arc::new(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        ))
    }

    /// Converts any serializable value through its JSON form.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::from)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Zero values, empty strings and empty aggregates are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::String(value) => !value.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.get(key)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Map entries ordered by key, the order `range` and printing use.
    pub fn sorted_entries(&self) -> Option<Vec<(&str, &Value)>> {
        let mut entries: Vec<_> = self
            .as_map()?
            .iter()
            .map(|(key, value)| (key.as_str(), value))
            .collect();
        entries.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));
        Some(entries)
    }
}

/// Prints the way `{{.}}` interpolates: nil as nothing, aggregates in
/// bracketed form with map keys sorted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::String(value) => f.write_str(value),
            Value::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(_) => {
                f.write_str("map[")?;
                for (index, (key, value)) in self.sorted_entries().unwrap_or_default().into_iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Int(value),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(value) => Value::string(value),
            serde_json::Value::Array(items) => Value::list(items.into_iter().map(Value::from)),
            serde_json::Value::Object(entries) => {
                Value::map(entries.into_iter().map(|(key, value)| (key, Value::from(value))))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::string(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_json() {
        let value = Value::from(json!({"b": [1, 2.5, "x"], "a": null, "c": true}));
        assert_eq!(value.get("b").and_then(Value::as_list).map(<[_]>::len), Some(3));
        assert_eq!(value.get("b").unwrap().as_list().unwrap()[1], Value::Float(2.5));
        assert_eq!(value.get("a"), Some(&Value::Null));
        assert_eq!(value.get("c").and_then(Value::as_bool), Some(true));
    }

    #[test]
    fn converts_serializable_structs() {
        #[derive(Serialize)]
        struct Todo {
            title: &'static str,
            done: bool,
        }
        let value = Value::from_serialize(&Todo {
            title: "write",
            done: false,
        })
        .unwrap();
        assert_eq!(value.get("title").and_then(Value::as_str), Some("write"));
    }

    #[test]
    fn truthiness() {
        for falsy in [
            Value::Null,
            Value::Bool(false),
            Value::Int(0),
            Value::Float(0.0),
            Value::from(""),
            Value::list([]),
            Value::map(Vec::<(String, Value)>::new()),
        ] {
            assert!(!falsy.is_truthy(), "{falsy:?}");
        }
        for truthy in [Value::Int(-1), Value::from("0"), Value::list([Value::Null])] {
            assert!(truthy.is_truthy(), "{truthy:?}");
        }
    }

    #[test]
    fn display() {
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::Float(1.25).to_string(), "1.25");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(
            Value::list([Value::Int(1), Value::from("a")]).to_string(),
            "[1 a]"
        );
        assert_eq!(
            Value::map([("z", Value::Int(1)), ("a", Value::Bool(true))]).to_string(),
            "map[a:true z:1]"
        );
    }

    #[test]
    fn clones_share_aggregates() {
        let list = Value::list([Value::Int(1)]);
        let copy = list.clone();
        let (Value::List(left), Value::List(right)) = (&list, &copy) else {
            panic!("expected lists");
        };
        assert!(Arc::ptr_eq(left, right));
    }
}
