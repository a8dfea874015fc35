// used to map kind and type code names both ways when types are restored
use bimap::BiMap;
use lazy_static::lazy_static;

// used for the Date representation and its fixed string form
use chrono::{DateTime, SecondsFormat, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;

use std::collections::{BTreeMap, HashSet};
// used to print out readable forms of a data type
use std::fmt;
// used when parsing a string into a scalar
use std::str::FromStr;
use std::sync::Arc;

use tracing::trace;

use crate::convert::{Conversion, Converter, ErrorRecorder, Recorder, Validator};
use crate::dictionary::DictionaryReference;
use crate::error::{MetatypeError, Result};
use crate::object::EditableDataObject;
use crate::path::{DataPath, Segment};
use crate::settings;
use crate::value::{read, shared, write, FieldMap, Value};

// well-known attribute names
pub const CLASS: &str = "Class";
pub const CHOICES: &str = "Choices";
pub const REF_TYPE_ID: &str = "RefTypeId";

// a reference that resolves to a reference that ... gives up after this many hops
const MAX_REFERENCE_HOPS: usize = 64;

// ------------- Type codes --------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeCode {
    Simple,
    Date,
    Enumerated,
    List,
    Map,
    Struct,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleKind {
    String,
    Integer,
    Long,
    Double,
    Decimal,
    Boolean,
}

lazy_static! {
    static ref TYPE_CODES: BiMap<&'static str, TypeCode> = {
        let mut codes = BiMap::new();
        codes.insert("Simple", TypeCode::Simple);
        codes.insert("Date", TypeCode::Date);
        codes.insert("Enumerated", TypeCode::Enumerated);
        codes.insert("List", TypeCode::List);
        codes.insert("Map", TypeCode::Map);
        codes.insert("Struct", TypeCode::Struct);
        codes.insert("Reference", TypeCode::Reference);
        codes
    };
    static ref SIMPLE_KINDS: BiMap<&'static str, SimpleKind> = {
        let mut kinds = BiMap::new();
        kinds.insert("String", SimpleKind::String);
        kinds.insert("Integer", SimpleKind::Integer);
        kinds.insert("Long", SimpleKind::Long);
        kinds.insert("Double", SimpleKind::Double);
        kinds.insert("Decimal", SimpleKind::Decimal);
        kinds.insert("Boolean", SimpleKind::Boolean);
        kinds
    };
}

impl TypeCode {
    pub const ALL: [TypeCode; 7] = [
        TypeCode::Simple,
        TypeCode::Date,
        TypeCode::Enumerated,
        TypeCode::List,
        TypeCode::Map,
        TypeCode::Struct,
        TypeCode::Reference,
    ];
    pub fn name(&self) -> &'static str {
        TYPE_CODES.get_by_right(self).copied().unwrap_or_default()
    }
    pub fn from_name(name: &str) -> Option<TypeCode> {
        TYPE_CODES.get_by_left(name).copied()
    }
}

impl SimpleKind {
    pub const ALL: [SimpleKind; 6] = [
        SimpleKind::String,
        SimpleKind::Integer,
        SimpleKind::Long,
        SimpleKind::Double,
        SimpleKind::Decimal,
        SimpleKind::Boolean,
    ];
    pub fn name(&self) -> &'static str {
        SIMPLE_KINDS.get_by_right(self).copied().unwrap_or_default()
    }
    pub fn from_name(name: &str) -> Option<SimpleKind> {
        SIMPLE_KINDS.get_by_left(name).copied()
    }
    pub fn default_value(&self) -> Value {
        match self {
            SimpleKind::String => Value::Text(String::new()),
            SimpleKind::Integer => Value::Integer(0),
            SimpleKind::Long => Value::Long(0),
            SimpleKind::Double => Value::Double(0.0),
            SimpleKind::Decimal => Value::Decimal(BigDecimal::from(0)),
            SimpleKind::Boolean => Value::Boolean(false),
        }
    }
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (SimpleKind::String, Value::Text(_))
                | (SimpleKind::Integer, Value::Integer(_))
                | (SimpleKind::Long, Value::Long(_))
                | (SimpleKind::Double, Value::Double(_))
                | (SimpleKind::Decimal, Value::Decimal(_))
                | (SimpleKind::Boolean, Value::Boolean(_))
        )
    }
    pub fn parse(&self, text: &str) -> Result<Value> {
        let failed = |reason: &dyn fmt::Display| {
            MetatypeError::ConversionError(format!("'{}' is not a valid {}: {}", text, self.name(), reason))
        };
        match self {
            SimpleKind::String => Ok(Value::Text(text.to_owned())),
            SimpleKind::Integer => text.parse::<i32>().map(Value::Integer).map_err(|e| failed(&e)),
            SimpleKind::Long => text.parse::<i64>().map(Value::Long).map_err(|e| failed(&e)),
            SimpleKind::Double => text.parse::<f64>().map(Value::Double).map_err(|e| failed(&e)),
            SimpleKind::Decimal => BigDecimal::from_str(text).map(Value::Decimal).map_err(|e| failed(&e)),
            SimpleKind::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(failed(&"expected true or false")),
            },
        }
    }
}

/// The fixed string form of a Date: an ISO-8601 instant with millisecond precision.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an ISO-8601 instant, truncating anything finer than a millisecond.
pub fn parse_instant(text: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text.trim())
        .map_err(|e| MetatypeError::ConversionError(format!("'{}' is not an ISO-8601 instant: {}", text, e)))?;
    DateTime::from_timestamp_millis(parsed.timestamp_millis())
        .ok_or_else(|| MetatypeError::ConversionError(format!("'{}' is out of range", text)))
}

// ------------- Field --------------
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    data_type: DataType,
    initial: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type, initial: None }
    }
    pub fn with_initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = Some(initial.into());
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }
    pub fn initial(&self) -> Option<&Value> {
        self.initial.as_ref()
    }
}

// ------------- DataType --------------
#[derive(Debug, Clone)]
pub enum TypeKind {
    Simple(SimpleKind),
    Date,
    Enumerated(Vec<String>),
    List(DataType),
    Map(DataType),
    Struct(Vec<Field>),
    Reference { type_id: String, dictionary: DictionaryReference },
}

#[derive(Debug, Clone)]
struct TypeNode {
    kind: TypeKind,
    class: String,
    attributes: BTreeMap<String, String>,
    validators: Vec<Arc<dyn Validator>>,
    converters: BTreeMap<Conversion, Arc<dyn Converter>>,
}

/// An immutable schema node describing one kind of value.
///
/// Cloning is cheap and shares the node. Anything that looks like mutation
/// (`with_validators`, `with_converters`, ...) builds a new node, so a type
/// that has been handed out or registered in a dictionary never changes.
///
/// Equality is structural and looks through references: a Reference type
/// equals whatever it resolves to. Validators and converters do not take
/// part in equality.
#[derive(Debug, Clone)]
pub struct DataType(Arc<TypeNode>);

impl DataType {
    fn from_kind(kind: TypeKind, class: &str) -> Self {
        DataType(Arc::new(TypeNode {
            kind,
            class: class.to_owned(),
            attributes: BTreeMap::new(),
            validators: Vec::new(),
            converters: BTreeMap::new(),
        }))
    }
    pub fn simple(kind: SimpleKind) -> Self {
        Self::from_kind(TypeKind::Simple(kind), kind.name())
    }
    pub fn date() -> Self {
        Self::from_kind(TypeKind::Date, TypeCode::Date.name())
    }
    pub fn enumerated<S: Into<String>>(choices: impl IntoIterator<Item = S>) -> Self {
        let choices = choices.into_iter().map(Into::into).collect();
        Self::from_kind(TypeKind::Enumerated(choices), TypeCode::Enumerated.name())
    }
    pub fn list(element: DataType) -> Self {
        Self::from_kind(TypeKind::List(element), TypeCode::List.name())
    }
    pub fn map(element: DataType) -> Self {
        Self::from_kind(TypeKind::Map(element), TypeCode::Map.name())
    }
    /// Fields keep their declaration order; a repeated name keeps its first occurrence.
    pub fn structure(fields: Vec<Field>) -> Self {
        let mut seen = HashSet::new();
        let fields = fields.into_iter().filter(|f| seen.insert(f.name.clone())).collect();
        Self::from_kind(TypeKind::Struct(fields), TypeCode::Struct.name())
    }
    pub fn reference(type_id: impl Into<String>, dictionary: DictionaryReference) -> Self {
        Self::from_kind(
            TypeKind::Reference { type_id: type_id.into(), dictionary },
            TypeCode::Reference.name(),
        )
    }

    fn derive(&self, change: impl FnOnce(&mut TypeNode)) -> DataType {
        let mut node = (*self.0).clone();
        change(&mut node);
        DataType(Arc::new(node))
    }
    pub fn with_validators(&self, validators: impl IntoIterator<Item = Arc<dyn Validator>>) -> DataType {
        self.derive(|node| node.validators.extend(validators))
    }
    pub fn with_converter(&self, conversion: Conversion, converter: Arc<dyn Converter>) -> DataType {
        self.derive(|node| {
            node.converters.insert(conversion, converter);
        })
    }
    pub fn with_converters(&self, converters: impl IntoIterator<Item = (Conversion, Arc<dyn Converter>)>) -> DataType {
        self.derive(|node| node.converters.extend(converters))
    }
    pub fn with_attribute(&self, name: impl Into<String>, value: impl Into<String>) -> DataType {
        self.derive(|node| {
            node.attributes.insert(name.into(), value.into());
        })
    }
    pub fn with_class(&self, class: impl Into<String>) -> DataType {
        self.derive(|node| node.class = class.into())
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }
    pub fn type_code(&self) -> TypeCode {
        match &self.0.kind {
            TypeKind::Simple(_) => TypeCode::Simple,
            TypeKind::Date => TypeCode::Date,
            TypeKind::Enumerated(_) => TypeCode::Enumerated,
            TypeKind::List(_) => TypeCode::List,
            TypeKind::Map(_) => TypeCode::Map,
            TypeKind::Struct(_) => TypeCode::Struct,
            TypeKind::Reference { .. } => TypeCode::Reference,
        }
    }
    /// The backing representation.
    pub fn class(&self) -> &str {
        &self.0.class
    }
    /// Well-known attributes are derived from the declaration; anything else
    /// comes from the open attribute map.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match (name, &self.0.kind) {
            (CLASS, _) => Some(self.0.class.clone()),
            (CHOICES, TypeKind::Enumerated(choices)) => Some(choices.join(",")),
            (REF_TYPE_ID, TypeKind::Reference { type_id, .. }) => Some(type_id.clone()),
            _ => self.0.attributes.get(name).cloned(),
        }
    }
    /// The open attribute map, without the well-known entries.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.0.attributes
    }
    pub fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.0.validators
    }
    pub fn converter(&self, conversion: Conversion) -> Option<&Arc<dyn Converter>> {
        self.0.converters.get(&conversion)
    }
    pub fn fields(&self) -> Option<&[Field]> {
        match &self.0.kind {
            TypeKind::Struct(fields) => Some(fields),
            _ => None,
        }
    }
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().and_then(|fields| fields.iter().find(|f| f.name == name))
    }
    pub fn element_type(&self) -> Option<&DataType> {
        match &self.0.kind {
            TypeKind::List(element) | TypeKind::Map(element) => Some(element),
            _ => None,
        }
    }
    pub fn choices(&self) -> Option<&[String]> {
        match &self.0.kind {
            TypeKind::Enumerated(choices) => Some(choices),
            _ => None,
        }
    }
    pub fn reference_target(&self) -> Option<(&str, &DictionaryReference)> {
        match &self.0.kind {
            TypeKind::Reference { type_id, dictionary } => Some((type_id, dictionary)),
            _ => None,
        }
    }
    pub fn is_reference(&self) -> bool {
        matches!(self.0.kind, TypeKind::Reference { .. })
    }
    pub fn is_composite(&self) -> bool {
        matches!(self.0.kind, TypeKind::List(_) | TypeKind::Map(_) | TypeKind::Struct(_))
    }
    /// Named child types: struct fields in order, or the single `element` of a list or map.
    pub fn children(&self) -> Vec<(String, DataType, Option<Value>)> {
        match &self.0.kind {
            TypeKind::Struct(fields) => fields
                .iter()
                .map(|f| (f.name.clone(), f.data_type.clone(), f.initial.clone()))
                .collect(),
            TypeKind::List(element) | TypeKind::Map(element) => {
                vec![("element".to_owned(), element.clone(), None)]
            }
            _ => Vec::new(),
        }
    }

    // ------------- References --------------
    fn lookup(type_id: &str, dictionary: &DictionaryReference) -> Result<DataType> {
        dictionary.resolve()?.get_type(type_id).ok_or_else(|| {
            MetatypeError::MissingDictionaryEntry(format!("type '{}' in dictionary '{}'", type_id, dictionary))
        })
    }
    /// Follows references until a concrete type is reached; any other type resolves to itself.
    pub fn resolve(&self) -> Result<DataType> {
        let mut current = self.clone();
        for _ in 0..MAX_REFERENCE_HOPS {
            let next = match &current.0.kind {
                TypeKind::Reference { type_id, dictionary } => Some(Self::lookup(type_id, dictionary)?),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(MetatypeError::MissingDictionaryEntry(format!("{} never reaches a concrete type", self)))
    }
    /// True when some reference inside this declaration (not behind another reference) points at `dictionary`.
    pub(crate) fn references_dictionary(&self, dictionary: &DictionaryReference) -> bool {
        match &self.0.kind {
            TypeKind::Reference { dictionary: target, .. } => target == dictionary,
            TypeKind::List(element) | TypeKind::Map(element) => element.references_dictionary(dictionary),
            TypeKind::Struct(fields) => fields.iter().any(|f| f.data_type.references_dictionary(dictionary)),
            _ => false,
        }
    }
    /// A copy in which every reference into `from` points into `to` instead.
    pub(crate) fn retarget(&self, from: &DictionaryReference, to: &DictionaryReference) -> DataType {
        if !self.references_dictionary(from) {
            return self.clone();
        }
        self.derive(|node| {
            node.kind = match &node.kind {
                TypeKind::Reference { type_id, dictionary } if dictionary == from => TypeKind::Reference {
                    type_id: type_id.clone(),
                    dictionary: to.clone(),
                },
                TypeKind::List(element) => TypeKind::List(element.retarget(from, to)),
                TypeKind::Map(element) => TypeKind::Map(element.retarget(from, to)),
                TypeKind::Struct(fields) => TypeKind::Struct(
                    fields
                        .iter()
                        .map(|f| Field {
                            name: f.name.clone(),
                            data_type: f.data_type.retarget(from, to),
                            initial: f.initial.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
        })
    }

    // ------------- Definition and defaults --------------
    pub fn assert_valid_definition(&self) -> Result<()> {
        let invalid = |message: String| Err(MetatypeError::InvalidTypeDefinition(message));
        match &self.0.kind {
            TypeKind::Simple(_) | TypeKind::Date => Ok(()),
            TypeKind::Enumerated(choices) => {
                if choices.is_empty() {
                    return invalid("an enumeration needs at least one choice".into());
                }
                let mut seen = HashSet::new();
                for choice in choices {
                    if choice.is_empty() {
                        return invalid("an enumeration choice cannot be empty".into());
                    }
                    if !seen.insert(choice) {
                        return invalid(format!("the choice '{}' is repeated", choice));
                    }
                }
                Ok(())
            }
            TypeKind::List(element) | TypeKind::Map(element) => element.assert_valid_definition(),
            TypeKind::Struct(fields) => {
                for field in fields {
                    let name = &field.name;
                    if name.is_empty() || name.trim() != name || name.contains(['.', '[', ']']) {
                        return invalid(format!("'{}' cannot be used as a field name", name));
                    }
                    field.data_type.assert_valid_definition()?;
                    if let Some(initial) = &field.initial {
                        field.data_type.assert_valid(initial).map_err(|e| {
                            MetatypeError::InvalidTypeDefinition(format!("initial value of '{}': {}", name, e))
                        })?;
                    }
                }
                Ok(())
            }
            TypeKind::Reference { type_id, dictionary } => {
                if type_id.trim().is_empty() {
                    return invalid("a reference needs a type id".into());
                }
                if dictionary.dictionary_id().trim().is_empty() {
                    return invalid(format!("the reference to '{}' names no dictionary", type_id));
                }
                Ok(())
            }
        }
    }

    /// The default instance, or `None` when the type declares no default.
    ///
    /// A Reference never builds a default: following it could cycle back to
    /// the struct being built. Its slot stays absent until it is written.
    pub fn new_value(&self) -> Option<Value> {
        match &self.0.kind {
            TypeKind::Simple(kind) => Some(kind.default_value()),
            TypeKind::Date => Some(Value::Date(DateTime::<Utc>::default())),
            TypeKind::Enumerated(choices) => choices.first().map(|c| Value::Text(c.clone())),
            TypeKind::List(_) => Some(Value::list(Vec::new())),
            TypeKind::Map(_) => Some(Value::map(BTreeMap::new())),
            TypeKind::Struct(fields) => {
                let mut values = FieldMap::default();
                for field in fields {
                    let value = match &field.initial {
                        Some(initial) => field.data_type.deep_copy(initial).unwrap_or_else(|_| initial.clone()),
                        None => field.data_type.new_value().unwrap_or_default(),
                    };
                    values.insert(field.name.clone(), value);
                }
                Some(Value::Struct(shared(values)))
            }
            TypeKind::Reference { .. } => None,
        }
    }
    /// A fresh setter holding the default instance.
    pub fn new_object(&self) -> EditableDataObject {
        EditableDataObject::new(self.clone(), self.new_value().unwrap_or_default())
    }

    // ------------- Validation --------------
    /// Fail-fast check of structure and validators.
    pub fn assert_valid(&self, value: &Value) -> Result<()> {
        self.assert_valid_at(value, &DataPath::root())
    }
    pub(crate) fn assert_valid_at(&self, value: &Value, path: &DataPath) -> Result<()> {
        let mut scratch = ErrorRecorder::new();
        self.walk(value, path, &mut scratch, true)
    }
    /// Checks everything and records every problem; never fails.
    pub fn deep_validate(&self, value: &Value, recorder: &mut dyn Recorder) {
        self.deep_validate_at(value, &DataPath::root(), recorder)
    }
    pub(crate) fn deep_validate_at(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder) {
        if let Err(e) = self.walk(value, path, recorder, false) {
            recorder.report_failure(path, "validation stopped", &e);
        }
    }
    fn walk(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder, fail_fast: bool) -> Result<()> {
        if self.is_reference() {
            // the reference's own validators first, then the target's
            self.run_validators(value, path, recorder, fail_fast)?;
            if value.is_absent() {
                return Ok(());
            }
            return match self.resolve() {
                Ok(target) => target.walk(value, path, recorder, fail_fast),
                Err(e) if fail_fast => Err(e),
                Err(e) => {
                    recorder.report_failure(path, "unresolved reference", &e);
                    Ok(())
                }
            };
        }
        if let Some(message) = self.mismatch(value) {
            return Self::reject(path, message, recorder, fail_fast);
        }
        self.run_validators(value, path, recorder, fail_fast)?;
        match (&self.0.kind, value) {
            (TypeKind::List(element), Value::List(elements)) => {
                for (i, e) in read(elements).iter().enumerate() {
                    element.walk(e, &path.child(Segment::Index(i)), recorder, fail_fast)?;
                }
                Ok(())
            }
            (TypeKind::Map(element), Value::Map(entries)) => {
                for (key, e) in read(entries).iter() {
                    element.walk(e, &path.child(Segment::name(key)), recorder, fail_fast)?;
                }
                Ok(())
            }
            (TypeKind::Struct(fields), Value::Struct(values)) => {
                let values = read(values);
                let mut undeclared: Vec<&String> = values
                    .iter()
                    .filter(|(name, v)| !v.is_absent() && self.field(name).is_none())
                    .map(|(name, _)| name)
                    .collect();
                undeclared.sort();
                for name in undeclared {
                    Self::reject(&path.child(Segment::name(name)), "undeclared field".into(), recorder, fail_fast)?;
                }
                for field in fields {
                    let v = values.get(&field.name).cloned().unwrap_or_default();
                    field.data_type.walk(&v, &path.child(Segment::name(&field.name)), recorder, fail_fast)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
    // Shallow structural check; absent always fits.
    fn mismatch(&self, value: &Value) -> Option<String> {
        match (&self.0.kind, value) {
            (_, Value::Absent) => None,
            (TypeKind::Simple(kind), v) if kind.accepts(v) => None,
            (TypeKind::Date, Value::Date(_))
            | (TypeKind::List(_), Value::List(_))
            | (TypeKind::Map(_), Value::Map(_))
            | (TypeKind::Struct(_), Value::Struct(_)) => None,
            (TypeKind::Enumerated(choices), Value::Text(t)) => (!choices.contains(t))
                .then(|| format!("'{}' is not one of {}", t, choices.join(", "))),
            _ => Some(format!("expected a {} value, found {}", self.0.class, value.describe())),
        }
    }
    fn run_validators(&self, value: &Value, path: &DataPath, recorder: &mut dyn Recorder, fail_fast: bool) -> Result<()> {
        let before = recorder.error_count(None);
        for validator in &self.0.validators {
            validator.validate(value, path, recorder);
        }
        if fail_fast && recorder.error_count(None) > before {
            let message = recorder.error_messages(None).get(before).cloned().unwrap_or_default();
            return Err(MetatypeError::invalid_value(path, message));
        }
        Ok(())
    }
    fn reject(path: &DataPath, message: String, recorder: &mut dyn Recorder, fail_fast: bool) -> Result<()> {
        if fail_fast {
            Err(MetatypeError::invalid_value(path, message))
        } else {
            recorder.report_error(path, message);
            Ok(())
        }
    }

    // ------------- Copying --------------
    /// Scalars are copied by value, composites rebuilt node by node.
    pub fn deep_copy(&self, value: &Value) -> Result<Value> {
        if value.is_absent() {
            return Ok(Value::Absent);
        }
        match (&self.0.kind, value) {
            (TypeKind::Reference { .. }, _) => self.resolve()?.deep_copy(value),
            (TypeKind::List(element), Value::List(elements)) => {
                let copies = read(elements)
                    .iter()
                    .map(|e| element.deep_copy(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::list(copies))
            }
            (TypeKind::Map(element), Value::Map(entries)) => {
                let copies = read(entries)
                    .iter()
                    .map(|(k, e)| Ok((k.clone(), element.deep_copy(e)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(Value::map(copies))
            }
            (TypeKind::Struct(_), Value::Struct(values)) => {
                let mut copies = FieldMap::default();
                for (name, v) in read(values).iter() {
                    let Some(field) = self.field(name) else {
                        if v.is_absent() {
                            continue;
                        }
                        return Err(MetatypeError::invalid_value(name, "undeclared field"));
                    };
                    copies.insert(name.clone(), field.data_type.deep_copy(v)?);
                }
                Ok(Value::Struct(shared(copies)))
            }
            (TypeKind::List(_) | TypeKind::Map(_) | TypeKind::Struct(_), other) => Err(MetatypeError::invalid_value(
                "",
                format!("expected a {} value, found {}", self.0.class, other.describe()),
            )),
            _ => Ok(value.clone()),
        }
    }

    // ------------- String conversion --------------
    pub fn to_string_value(&self, value: &Value) -> Result<String> {
        if let Some(converter) = self.converter(Conversion::ToString) {
            return match converter.convert(value, self)? {
                Value::Text(text) => Ok(text),
                other => Err(MetatypeError::ConversionError(format!(
                    "to-string converter produced {} instead of text",
                    other.describe()
                ))),
            };
        }
        match (&self.0.kind, value) {
            (_, Value::Absent) => Ok(String::new()),
            (TypeKind::Reference { .. }, _) => self.resolve()?.to_string_value(value),
            (TypeKind::List(element), Value::List(elements)) => {
                let parts = read(elements)
                    .iter()
                    .map(|e| element.to_string_value(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("[{}]", parts.join(", ")))
            }
            (TypeKind::Map(element), Value::Map(entries)) => {
                let parts = read(entries)
                    .iter()
                    .map(|(k, e)| Ok(format!("{}={}", k, element.to_string_value(e)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            (TypeKind::Struct(fields), Value::Struct(values)) => {
                let values = read(values);
                let parts = fields
                    .iter()
                    .map(|f| {
                        let v = values.get(&f.name).cloned().unwrap_or_default();
                        Ok(format!("{}={}", f.name, f.data_type.to_string_value(&v)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            _ => Ok(value.to_string()),
        }
    }
    pub fn from_string(&self, text: &str) -> Result<Value> {
        if let Some(converter) = self.converter(Conversion::FromString) {
            return converter.convert(&Value::Text(text.to_owned()), self);
        }
        match &self.0.kind {
            TypeKind::Simple(kind) => kind.parse(text),
            TypeKind::Date => parse_instant(text).map(Value::Date),
            TypeKind::Enumerated(choices) => {
                if choices.iter().any(|c| c == text) {
                    Ok(Value::Text(text.to_owned()))
                } else {
                    Err(MetatypeError::ConversionError(format!(
                        "'{}' is not one of {}",
                        text,
                        choices.join(", ")
                    )))
                }
            }
            TypeKind::Reference { .. } => self.resolve()?.from_string(text),
            TypeKind::List(_) | TypeKind::Map(_) | TypeKind::Struct(_) => Err(MetatypeError::UnsupportedOperation(
                format!("a {} value cannot be read from a string", self.type_code().name()),
            )),
        }
    }
    /// Converts and validates `text`; a conversion or validation failure is
    /// recorded at `path` and yields `None`.
    pub(crate) fn parse_checked(&self, text: &str, path: &DataPath, recorder: &mut dyn Recorder) -> Result<Option<Value>> {
        let value = match self.from_string(text) {
            Ok(value) => value,
            Err(e) if e.is_recordable() => {
                recorder.report_failure(path, &format!("cannot convert '{}'", text), &e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let before = recorder.error_count(None);
        self.walk(&value, path, recorder, false)?;
        Ok((recorder.error_count(None) == before).then_some(value))
    }

    // ------------- Path resolution --------------
    pub fn type_for(&self, segment: &Segment) -> Result<DataType> {
        match (&self.0.kind, segment) {
            (TypeKind::Struct(fields), Segment::Name(name)) => fields
                .iter()
                .find(|f| &f.name == name)
                .map(|f| f.data_type.clone())
                .ok_or_else(|| MetatypeError::invalid_path(segment, format!("no field '{}' is declared", name))),
            (TypeKind::Map(element), Segment::Name(_)) => Ok(element.clone()),
            (TypeKind::List(element), Segment::Index(_)) => Ok(element.clone()),
            (TypeKind::Struct(_) | TypeKind::Map(_), Segment::Index(_)) => Err(MetatypeError::invalid_path(
                segment,
                format!("a {} cannot be indexed", self.type_code().name()),
            )),
            (TypeKind::List(_), Segment::Name(_)) => {
                Err(MetatypeError::invalid_path(segment, "a list element is addressed as [n]"))
            }
            (TypeKind::Reference { .. }, _) => self.resolve()?.type_for(segment),
            _ => Err(MetatypeError::invalid_path(
                segment,
                format!("a {} value only accepts the empty path", self.type_code().name()),
            )),
        }
    }
    pub fn type_at(&self, path: &DataPath) -> Result<DataType> {
        let mut current = self.clone();
        for segment in path.segments() {
            current = current.type_for(segment).map_err(|e| rebase_error(e, path))?;
        }
        Ok(current)
    }
    /// The child value selected by `segment`, without changing `data`.
    ///
    /// Reading a list position past the end yields the element default.
    pub fn value_for(&self, segment: &Segment, data: &Value) -> Result<Value> {
        if self.is_reference() {
            return self.resolve()?.value_for(segment, data);
        }
        let child_type = self.type_for(segment)?;
        match (&self.0.kind, data, segment) {
            (TypeKind::List(_), Value::Absent, _) => Ok(child_type.new_value().unwrap_or_default()),
            (_, Value::Absent, _) => Ok(Value::Absent),
            (TypeKind::Struct(_), Value::Struct(values), Segment::Name(name)) => {
                Ok(read(values).get(name).cloned().unwrap_or_default())
            }
            (TypeKind::Map(_), Value::Map(entries), Segment::Name(key)) => {
                Ok(read(entries).get(key).cloned().unwrap_or_default())
            }
            (TypeKind::List(_), Value::List(elements), Segment::Index(index)) => Ok(read(elements)
                .get(*index)
                .cloned()
                .unwrap_or_else(|| child_type.new_value().unwrap_or_default())),
            (_, other, _) => Err(MetatypeError::invalid_value(
                segment,
                format!("expected a {} value, found {}", self.0.class, other.describe()),
            )),
        }
    }
    pub fn get(&self, data: &Value, path: &DataPath) -> Result<Value> {
        let Some((segment, rest)) = path.split_first() else {
            return Ok(data.clone());
        };
        let child_type = self.type_for(segment)?;
        let child_value = self.value_for(segment, data)?;
        trace!(segment = %segment, remaining = %rest, "resolved path segment");
        child_type.get(&child_value, &rest)
    }
    /// Navigates to the slot at `path`, creating whatever is missing on the
    /// way (absent composites, list padding), and hands it to `apply`.
    pub(crate) fn update_at<R>(
        &self,
        data: &mut Value,
        path: &DataPath,
        apply: &mut dyn FnMut(&DataType, &mut Value) -> Result<R>,
    ) -> Result<R> {
        let Some((segment, rest)) = path.split_first() else {
            return apply(self, data);
        };
        if self.is_reference() {
            return self.resolve()?.update_at(data, path, apply);
        }
        let child_type = self.type_for(segment)?;
        self.materialize(data);
        match (&self.0.kind, data, segment) {
            (TypeKind::Struct(_), Value::Struct(values), Segment::Name(name)) => {
                let mut values = write(values);
                let slot = values.entry(name.clone()).or_default();
                child_type.update_at(slot, &rest, apply)
            }
            (TypeKind::Map(_), Value::Map(entries), Segment::Name(key)) => {
                let mut entries = write(entries);
                let slot = entries.entry(key.clone()).or_default();
                child_type.update_at(slot, &rest, apply)
            }
            (TypeKind::List(_), Value::List(elements), Segment::Index(index)) => {
                let length = index
                    .checked_add(1)
                    .ok_or_else(|| MetatypeError::invalid_path(segment, "the index is out of range"))?;
                let mut elements = write(elements);
                pad(&mut elements, length, &child_type, segment)?;
                child_type.update_at(&mut elements[*index], &rest, apply)
            }
            (_, other, _) => Err(MetatypeError::invalid_value(
                segment,
                format!("expected a {} value, found {}", self.0.class, other.describe()),
            )),
        }
    }
    // An absent composite becomes its default so that it can be written into.
    fn materialize(&self, data: &mut Value) {
        if data.is_absent() && self.is_composite() {
            if let Some(value) = self.new_value() {
                *data = value;
            }
        }
    }
    /// Writes a copy of `value` at `path`; `data` never shares nodes with `value`.
    pub fn set(&self, data: &mut Value, path: &DataPath, value: Value) -> Result<()> {
        let mut pending = Some(self.type_at(path)?.adopt(&value, path)?);
        self.update_at(data, path, &mut |_: &DataType, slot: &mut Value| {
            *slot = pending.take().unwrap_or_default();
            Ok(())
        })
    }
    /// Checks `value` and copies it. Runs before any node is locked for
    /// writing, since `value` may alias a node on the write path.
    pub(crate) fn adopt(&self, value: &Value, path: &DataPath) -> Result<Value> {
        self.assert_valid_at(value, path)?;
        self.deep_copy(value)
    }
    /// Appends a copy of `value` (or the element default) to the list at `path`.
    pub fn add_element(&self, data: &mut Value, path: &DataPath, value: Option<Value>) -> Result<()> {
        let mut pending = Some(self.type_at(path)?.element_value(value)?);
        self.update_at(data, path, &mut |target: &DataType, slot: &mut Value| {
            target.push_element(slot, pending.take().unwrap_or_default())
        })
    }
    /// What appending `value` to a list of this type stores.
    pub(crate) fn element_value(&self, value: Option<Value>) -> Result<Value> {
        let target = self.resolve()?;
        let TypeKind::List(element) = &target.0.kind else {
            return Err(MetatypeError::UnsupportedOperation(format!(
                "cannot add an element to a {} value",
                target.type_code().name()
            )));
        };
        match value {
            Some(value) => element.adopt(&value, &DataPath::root()),
            None => Ok(element.new_value().unwrap_or_default()),
        }
    }
    pub(crate) fn push_element(&self, slot: &mut Value, value: Value) -> Result<()> {
        let target = self.resolve()?;
        if target.type_code() != TypeCode::List {
            return Err(MetatypeError::UnsupportedOperation(format!(
                "cannot add an element to a {} value",
                target.type_code().name()
            )));
        }
        target.materialize(slot);
        match slot {
            Value::List(elements) => {
                write(elements).push(value);
                Ok(())
            }
            other => Err(MetatypeError::invalid_value("", format!("expected a list, found {}", other.describe()))),
        }
    }
    /// Grows the list in `data` to at least `length` elements; true when it grew.
    pub(crate) fn extend_list(&self, data: &mut Value, length: usize) -> Result<bool> {
        let target = self.resolve()?;
        let TypeKind::List(element) = &target.0.kind else {
            return Ok(false);
        };
        target.materialize(data);
        match data {
            Value::List(elements) => pad(&mut write(elements), length, element, &Segment::Index(length.saturating_sub(1))),
            _ => Ok(false),
        }
    }
    /// Removes the list element or map entry at `path` and returns it.
    pub fn remove_element(&self, data: &mut Value, path: &DataPath) -> Result<Value> {
        let Some((parent, last)) = path.split_last() else {
            return Err(MetatypeError::UnsupportedOperation("the root value cannot be removed".into()));
        };
        let last = last.clone();
        self.update_at(data, &parent, &mut |target: &DataType, slot: &mut Value| target.remove_child(slot, &last))
    }
    fn remove_child(&self, slot: &mut Value, segment: &Segment) -> Result<Value> {
        let target = self.resolve()?;
        target.type_for(segment)?;
        match (&target.0.kind, slot, segment) {
            (TypeKind::List(_), Value::List(elements), Segment::Index(index)) => {
                let mut elements = write(elements);
                if *index < elements.len() {
                    Ok(elements.remove(*index))
                } else {
                    Err(MetatypeError::invalid_path(
                        segment,
                        format!("the list only has {} elements", elements.len()),
                    ))
                }
            }
            (TypeKind::Map(_), Value::Map(entries), Segment::Name(key)) => write(entries)
                .remove(key)
                .ok_or_else(|| MetatypeError::invalid_path(segment, "no such entry")),
            (TypeKind::Struct(_), _, _) => Err(MetatypeError::UnsupportedOperation(
                "struct fields are fixed; set the field instead".into(),
            )),
            (_, Value::Absent, _) => Err(MetatypeError::invalid_path(segment, "nothing to remove")),
            (_, other, _) => Err(MetatypeError::invalid_value(
                segment,
                format!("expected a {} value, found {}", target.0.class, other.describe()),
            )),
        }
    }
    pub fn size(&self, data: &Value, path: &DataPath) -> Result<usize> {
        let target = self.type_at(path)?.resolve()?;
        match target.type_code() {
            TypeCode::List | TypeCode::Map => Ok(self.get(data, path)?.len().unwrap_or(0)),
            code => Err(MetatypeError::UnsupportedOperation(format!("a {} value has no size", code.name()))),
        }
    }
    /// Map keys in order, or the declared field names of a struct.
    pub fn element_names(&self, data: &Value, path: &DataPath) -> Result<Vec<String>> {
        let target = self.type_at(path)?.resolve()?;
        match &target.0.kind {
            TypeKind::Struct(fields) => Ok(fields.iter().map(|f| f.name.clone()).collect()),
            TypeKind::Map(_) => match self.get(data, path)? {
                Value::Map(entries) => Ok(read(&entries).keys().cloned().collect()),
                _ => Ok(Vec::new()),
            },
            _ => Err(MetatypeError::UnsupportedOperation(format!(
                "a {} value has no element names",
                target.type_code().name()
            ))),
        }
    }

    // ------------- Equality --------------
    fn equivalent(&self, other: &DataType, seen: &mut HashSet<(usize, usize)>) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if let (Some(a), Some(b)) = (self.reference_target(), other.reference_target()) {
            if a == b {
                return true;
            }
        }
        let (a, b) = match (self.resolve(), other.resolve()) {
            (Ok(a), Ok(b)) => (a, b),
            _ => return false,
        };
        // recursive types meet themselves again; assume equal on the second visit
        if !seen.insert((Arc::as_ptr(&a.0) as usize, Arc::as_ptr(&b.0) as usize)) {
            return true;
        }
        a.0.class == b.0.class
            && a.0.attributes == b.0.attributes
            && match (&a.0.kind, &b.0.kind) {
                (TypeKind::Simple(x), TypeKind::Simple(y)) => x == y,
                (TypeKind::Date, TypeKind::Date) => true,
                (TypeKind::Enumerated(x), TypeKind::Enumerated(y)) => x == y,
                (TypeKind::List(x), TypeKind::List(y)) | (TypeKind::Map(x), TypeKind::Map(y)) => {
                    x.equivalent(y, seen)
                }
                (TypeKind::Struct(x), TypeKind::Struct(y)) => {
                    x.len() == y.len()
                        && x.iter().zip(y).all(|(f, g)| {
                            f.name == g.name && f.initial == g.initial && f.data_type.equivalent(&g.data_type, seen)
                        })
                }
                _ => false,
            }
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.equivalent(other, &mut HashSet::new())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0.kind {
            TypeKind::Simple(kind) => write!(f, "{}", kind.name()),
            TypeKind::Date => write!(f, "Date"),
            TypeKind::Enumerated(choices) => write!(f, "Enumerated({})", choices.join("|")),
            TypeKind::List(element) => write!(f, "List<{}>", element),
            TypeKind::Map(element) => write!(f, "Map<{}>", element),
            TypeKind::Struct(fields) => {
                let parts: Vec<String> = fields.iter().map(|x| format!("{}: {}", x.name, x.data_type)).collect();
                write!(f, "Struct{{{}}}", parts.join(", "))
            }
            TypeKind::Reference { type_id, dictionary } => write!(f, "Ref({}@{})", type_id, dictionary),
        }
    }
}

// Lists grow with fresh element defaults, bounded by the configured padding limit.
fn pad(elements: &mut Vec<Value>, length: usize, element: &DataType, segment: &Segment) -> Result<bool> {
    if length <= elements.len() {
        return Ok(false);
    }
    let padding = length - elements.len();
    let limit = settings::current().max_list_padding;
    if padding > limit {
        return Err(MetatypeError::invalid_path(
            segment,
            format!("writing here would append {} elements (limit {})", padding, limit),
        ));
    }
    elements.resize_with(length, || element.new_value().unwrap_or_default());
    Ok(true)
}

// Errors raised while walking a path name the segment; report the whole path instead.
fn rebase_error(error: MetatypeError, path: &DataPath) -> MetatypeError {
    match error {
        MetatypeError::InvalidPath { message, .. } => MetatypeError::invalid_path(path, message),
        other => other,
    }
}
