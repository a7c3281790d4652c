use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Backend neutral value of one column.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, empty text/bytes/list and the nil uuid are considered empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Uuid(u) => u.is_nil(),
            _ => false,
        }
    }

    /// Key columns also treat numeric zero as not yet assigned.
    pub fn is_unassigned(&self) -> bool {
        self.is_empty() || matches!(self, Value::Int(0))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::List(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Declared type of a column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Any,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    List(Box<ValueType>),
}

impl ValueType {
    pub fn list_of(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }

    /// Null is accepted by every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ValueType::Any, _) => true,
            (ValueType::Bool, Value::Bool(_))
            | (ValueType::Int, Value::Int(_))
            | (ValueType::Float, Value::Float(_))
            | (ValueType::Text, Value::Text(_))
            | (ValueType::Bytes, Value::Bytes(_))
            | (ValueType::Uuid, Value::Uuid(_))
            | (ValueType::Timestamp, Value::Timestamp(_)) => true,
            (ValueType::List(element), Value::List(items)) => items.iter().all(|i| element.accepts(i)),
            _ => false,
        }
    }
}

/// Conversion between a Rust field type and a [`Value`].
pub trait ColumnValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, String>;
}

/// Anything that can be written into a column, borrowed text included.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl<T: ColumnValue> IntoValue for T {
    fn into_value(self) -> Value {
        self.to_value()
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T, String> {
    Err(format!("expected {expected}, found {}", value.type_name()))
}

impl ColumnValue for Value {
    fn to_value(&self) -> Value { self.clone() }
    fn from_value(value: Value) -> Result<Self, String> { Ok(value) }
}

macro_rules! impl_column_value_for_integer {
    ($($t:ty),*) => {
        $(
            impl ColumnValue for $t {
                fn to_value(&self) -> Value {
                    Value::Int(*self as i64)
                }
                fn from_value(value: Value) -> Result<Self, String> {
                    match value {
                        Value::Int(i) => <$t>::try_from(i).map_err(|e| format!("{} out of range for {}: {}", i, stringify!($t), e)),
                        other => mismatch("int", &other),
                    }
                }
            }
        )*
    };
}

impl_column_value_for_integer!(i8, i16, i32, i64, u8, u16, u32, isize);

/// Values above `i64::MAX` have no `Int` form and are stored as text.
impl ColumnValue for u64 {
    fn to_value(&self) -> Value {
        i64::try_from(*self).map(Value::Int).unwrap_or_else(|_| Value::Text(self.to_string()))
    }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Int(i) => u64::try_from(i).map_err(|e| format!("{} out of range for u64: {}", i, e)),
            Value::Text(s) => s.parse::<u64>().map_err(|e| format!("{} is not a u64: {}", s, e)),
            other => mismatch("int", &other),
        }
    }
}

impl ColumnValue for f64 {
    fn to_value(&self) -> Value { Value::Float(*self) }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => mismatch("float", &other),
        }
    }
}

impl ColumnValue for f32 {
    fn to_value(&self) -> Value { Value::Float(*self as f64) }
    fn from_value(value: Value) -> Result<Self, String> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl ColumnValue for bool {
    fn to_value(&self) -> Value { Value::Bool(*self) }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl ColumnValue for String {
    fn to_value(&self) -> Value { Value::Text(self.clone()) }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Text(s) => Ok(s),
            other => mismatch("text", &other),
        }
    }
}

impl ColumnValue for Uuid {
    fn to_value(&self) -> Value { Value::Uuid(*self) }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Null => Ok(Uuid::nil()),
            Value::Text(s) => Uuid::parse_str(&s).map_err(|e| e.to_string()),
            other => mismatch("uuid", &other),
        }
    }
}

impl ColumnValue for DateTime<Utc> {
    fn to_value(&self) -> Value { Value::Timestamp(*self) }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => mismatch("timestamp", &other),
        }
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: ColumnValue> ColumnValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ColumnValue::to_value).collect())
    }
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            other => mismatch("list", &other),
        }
    }
}

/// Identity of a stored entity, simple or composed of several columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Simple(Value),
    Composite(Vec<(String, Value)>),
}

impl Key {
    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Key::Composite(parts.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }

    /// Storable form of the key, composites become a list in column order.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Simple(v) => v.clone(),
            Key::Composite(parts) => Value::List(parts.iter().map(|(_, v)| v.clone()).collect()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Key::Simple(v) => v.is_empty(),
            Key::Composite(parts) => parts.is_empty() || parts.iter().any(|(_, v)| v.is_empty()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Simple(v) => write!(f, "{v}"),
            Key::Composite(parts) => {
                write!(f, "{{")?;
                for (i, (name, value)) in parts.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{name}={value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<Value> for Key {
    fn from(v: Value) -> Self { Key::Simple(v) }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self { Key::Simple(Value::Int(v)) }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self { Key::Simple(Value::Int(v as i64)) }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self { Key::Simple(Value::Text(v.to_string())) }
}

impl From<String> for Key {
    fn from(v: String) -> Self { Key::Simple(Value::Text(v)) }
}

impl From<Uuid> for Key {
    fn from(v: Uuid) -> Self { Key::Simple(Value::Uuid(v)) }
}

/// Column name to value map exchanged with the storage collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnData {
    values: BTreeMap<String, Value>,
}

impl ColumnData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl IntoValue) -> Self {
        self.values.insert(column.into(), value.into_value());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(column.into(), value)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Present and not null.
    pub fn has_value(&self, column: &str) -> bool {
        self.values.get(column).is_some_and(|v| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Overwrites existing columns with the ones from `other`.
    pub fn merge(&mut self, other: ColumnData) {
        self.values.extend(other.values);
    }
}

impl FromIterator<(String, Value)> for ColumnData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

impl IntoIterator for ColumnData {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
