// used for the Date representation
use chrono::{DateTime, SecondsFormat, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;

// struct values are keyed by field name, using the same fast hasher everywhere
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::{BTreeMap, HashMap};

// composite values are shared nodes, so that navigated views alias their parent
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// used to print out readable forms of a value
use std::fmt;

pub type Shared<T> = Arc<RwLock<T>>;
pub type FieldHasher = BuildHasherDefault<SeaHasher>;
pub type FieldMap = HashMap<String, Value, FieldHasher>;

pub(crate) fn shared<T>(inner: T) -> Shared<T> {
    Arc::new(RwLock::new(inner))
}
// A poisoned node was never left half-written by us, so keep going with it.
pub(crate) fn read<T>(node: &Shared<T>) -> RwLockReadGuard<'_, T> {
    node.read().unwrap_or_else(PoisonError::into_inner)
}
pub(crate) fn write<T>(node: &Shared<T>) -> RwLockWriteGuard<'_, T> {
    node.write().unwrap_or_else(PoisonError::into_inner)
}

/// Raw data described by some [`crate::datatype::DataType`].
///
/// Scalars are held inline. Lists, maps and structs are shared nodes:
/// cloning a `Value` aliases the same backing store, and only a deep copy
/// made through the describing type breaks that aliasing.
///
/// `Absent` is the explicit "not materialized" marker, used for reference
/// slots that have not been written yet and for fields whose type declares
/// no default.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Absent,
    Text(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    Date(DateTime<Utc>),
    List(Shared<Vec<Value>>),
    Map(Shared<BTreeMap<String, Value>>),
    Struct(Shared<FieldMap>),
}

impl Value {
    pub fn list(elements: Vec<Value>) -> Self {
        Value::List(shared(elements))
    }
    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(shared(entries))
    }
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let mut map = FieldMap::default();
        for (name, value) in fields {
            map.insert(name.into(), value);
        }
        Value::Struct(shared(map))
    }
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(*l),
            Value::Integer(i) => Some(*i as i64),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
    /// Numeric view used by range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Long(l) => Some(*l as f64),
            Value::Double(d) => Some(*d),
            Value::Decimal(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }
    /// Number of elements held by a list or map.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(read(list).len()),
            Value::Map(map) => Some(read(map).len()),
            _ => None,
        }
    }
    /// True when both values are the same shared node (or both scalars that compare equal).
    pub fn aliases(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
    pub fn describe(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.aliases(other) {
            return true;
        }
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => *read(a) == *read(b),
            (Value::Map(a), Value::Map(b)) => *read(a) == *read(b),
            (Value::Struct(a), Value::Struct(b)) => {
                let (a, b) = (read(a), read(b));
                // absent fields and missing fields mean the same thing
                let present = |m: &FieldMap| m.iter().filter(|(_, v)| !v.is_absent()).count();
                present(&a) == present(&b)
                    && a.iter()
                        .filter(|(_, v)| !v.is_absent())
                        .all(|(k, v)| b.get(k) == Some(v))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Absent => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::List(list) => {
                let parts: Vec<String> = read(list).iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = read(map).iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Struct(fields) => {
                let fields = read(fields);
                let mut names: Vec<&String> = fields.keys().collect();
                names.sort();
                let parts: Vec<String> = names.iter().map(|k| format!("{}={}", k, fields[*k])).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}
impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}
impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Decimal(d)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_alias_composites() {
        let list = Value::list(vec![Value::from("a")]);
        let alias = list.clone();
        if let Value::List(node) = &alias {
            write(node).push(Value::from("b"));
        }
        assert_eq!(list.len(), Some(2));
        assert!(list.aliases(&alias));
    }

    #[test]
    fn struct_equality_ignores_absent_fields() {
        let a = Value::record([("x", Value::from(1)), ("y", Value::Absent)]);
        let b = Value::record([("x", Value::from(1))]);
        assert_eq!(a, b);
        let c = Value::record([("x", Value::from(2))]);
        assert_ne!(a, c);
    }

    #[test]
    fn display_forms() {
        let list = Value::list(vec![Value::from(1), Value::from(2)]);
        assert_eq!(list.to_string(), "[1, 2]");
        let record = Value::record([("b", Value::from(true)), ("a", Value::from("x"))]);
        assert_eq!(record.to_string(), "{a=x, b=true}");
    }
}
