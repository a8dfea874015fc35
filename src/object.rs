//! Values paired with the type that describes them.
//!
//! A [`DataObject`] reads, an [`EditableDataObject`] also writes. Both hold
//! the root value of the object they were created from together with the
//! path to the part they look at, so a view obtained with
//! [`Getter::data_getter`] or [`Setter::data_setter`] always sees (and makes)
//! the same changes as its parent. [`Getter::deep_copy`] is the only way to
//! get an independent value.

use bigdecimal::RoundingMode;
use tracing::{trace, warn};

// used to print out readable forms of an object
use std::fmt;
use std::fmt::Write;

use crate::convert::Recorder;
use crate::datatype::{DataType, TypeCode};
use crate::error::{MetatypeError, Result};
use crate::path::{DataPath, Segment};
use crate::value::{read, shared, write, Shared, Value};

// ------------- Anchor -------------
// The shared root value and where in it a view is looking.
#[derive(Debug, Clone)]
struct Anchor {
    root_type: DataType,
    cell: Shared<Value>,
    base: DataPath,
}

impl Anchor {
    fn new(data_type: DataType, value: Value) -> Self {
        Self { root_type: data_type, cell: shared(value), base: DataPath::root() }
    }
    fn at(&self, relative: &DataPath) -> Anchor {
        Anchor { root_type: self.root_type.clone(), cell: self.cell.clone(), base: self.base.join(relative) }
    }
    fn get(&self, relative: &DataPath) -> Result<Value> {
        let root = read(&self.cell);
        self.root_type.get(&root, &self.base.join(relative))
    }
    fn update<R>(&self, relative: &DataPath, apply: &mut dyn FnMut(&DataType, &mut Value) -> Result<R>) -> Result<R> {
        let mut root = write(&self.cell);
        self.root_type.update_at(&mut root, &self.base.join(relative), apply)
    }
}

// ------------- Getter -------------
pub trait Getter {
    fn data_type(&self) -> &DataType;
    fn get_at(&self, path: &str) -> Result<Value>;
    /// The string form of the value at `path`; `format` is a strftime pattern
    /// for dates or `.N` (decimal places) for doubles and decimals.
    fn get_as_string_at(&self, path: &str, format: Option<&str>) -> Result<String>;
    fn type_at(&self, path: &str) -> Result<DataType>;
    fn map_element_names_at(&self, path: &str) -> Result<Vec<String>>;
    fn size_at(&self, path: &str) -> Result<usize>;
    /// An independent, editable copy.
    fn deep_copy(&self) -> Result<EditableDataObject>;
    fn data_getter(&self, path: &str) -> Result<DataObject>;
    fn assert_valid_data(&self) -> Result<()>;
    /// Records every problem with the value, keyed by path relative to this object.
    fn validate(&self, recorder: &mut dyn Recorder) -> Result<()>;

    fn get(&self) -> Result<Value> {
        self.get_at("")
    }
    fn get_as_string(&self) -> Result<String> {
        self.get_as_string_at("", None)
    }
    fn map_element_names(&self) -> Result<Vec<String>> {
        self.map_element_names_at("")
    }
    fn size(&self) -> Result<usize> {
        self.size_at("")
    }
}

// ------------- Setter -------------
pub trait Setter: Getter {
    /// Writes a copy of `value`, so the object never shares nodes with it.
    fn set_at(&self, path: &str, value: Value) -> Result<()>;
    fn set_from_string_at(&self, path: &str, text: &str) -> Result<()>;
    /// Conversion and validation failures go to `recorder` and leave the value
    /// untouched; returns whether the value was written.
    fn set_from_string_recorded(&self, path: &str, text: &str, recorder: &mut dyn Recorder) -> Result<bool>;
    /// Appends a copy of `value`, or the element default, to the list at `path`.
    fn add_element(&self, path: &str, value: Option<Value>) -> Result<()>;
    fn remove_element(&self, path: &str) -> Result<Value>;
    fn data_setter(&self, path: &str) -> Result<EditableDataObject>;

    fn set(&self, value: Value) -> Result<()> {
        self.set_at("", value)
    }
    fn set_from_string(&self, text: &str) -> Result<()> {
        self.set_from_string_at("", text)
    }

    /// Applies a batch of path to string assignments to a copy of this value.
    ///
    /// Returns the updated copy, or `None` when nothing changed. An entry that
    /// fails to convert or validate is recorded against its path and skipped;
    /// the others still apply. This object is never modified.
    fn set_string_data<I, K, V>(&self, entries: I, recorder: &mut dyn Recorder) -> Result<Option<EditableDataObject>>
    where
        Self: Sized,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let batch = entries
            .into_iter()
            .map(|(path, text)| Ok((DataPath::parse(path.as_ref())?, text.into())))
            .collect::<Result<Vec<_>>>()?;
        let copy = self.deep_copy()?;
        let changed = {
            let mut root = write(&copy.anchor.cell);
            apply_strings(&copy.data_type, &mut root, batch, &DataPath::root(), recorder)?
        };
        Ok(changed.then_some(copy))
    }
}

// ------------- Objects -------------
#[derive(Debug, Clone)]
pub struct DataObject {
    anchor: Anchor,
    data_type: DataType,
}

#[derive(Debug, Clone)]
pub struct EditableDataObject {
    anchor: Anchor,
    data_type: DataType,
}

impl DataObject {
    pub fn new(data_type: DataType, value: Value) -> Self {
        Self { anchor: Anchor::new(data_type.clone(), value), data_type }
    }
    /// Like `new`, but only for a value the type accepts.
    pub fn wrap(data_type: DataType, value: Value) -> Result<Self> {
        data_type.assert_valid(&value)?;
        Ok(Self::new(data_type, value))
    }
}

impl EditableDataObject {
    pub fn new(data_type: DataType, value: Value) -> Self {
        Self { anchor: Anchor::new(data_type.clone(), value), data_type }
    }
    pub fn wrap(data_type: DataType, value: Value) -> Result<Self> {
        data_type.assert_valid(&value)?;
        Ok(Self::new(data_type, value))
    }
    /// A read-only view of the same value.
    pub fn read_only(&self) -> DataObject {
        DataObject { anchor: self.anchor.clone(), data_type: self.data_type.clone() }
    }
}

// Both objects read the same way.
macro_rules! impl_getter {
    ($object:ty) => {
        impl Getter for $object {
            fn data_type(&self) -> &DataType {
                &self.data_type
            }
            fn get_at(&self, path: &str) -> Result<Value> {
                self.anchor.get(&DataPath::parse(path)?)
            }
            fn get_as_string_at(&self, path: &str, format: Option<&str>) -> Result<String> {
                let target = self.type_at(path)?;
                let value = self.get_at(path)?;
                match format {
                    None => target.to_string_value(&value),
                    Some(format) => format_value(&target.resolve()?, &value, format),
                }
            }
            fn type_at(&self, path: &str) -> Result<DataType> {
                self.data_type.type_at(&DataPath::parse(path)?)
            }
            fn map_element_names_at(&self, path: &str) -> Result<Vec<String>> {
                self.data_type.element_names(&self.get()?, &DataPath::parse(path)?)
            }
            fn size_at(&self, path: &str) -> Result<usize> {
                self.data_type.size(&self.get()?, &DataPath::parse(path)?)
            }
            fn deep_copy(&self) -> Result<EditableDataObject> {
                let copy = self.data_type.deep_copy(&self.get()?)?;
                Ok(EditableDataObject::new(self.data_type.clone(), copy))
            }
            fn data_getter(&self, path: &str) -> Result<DataObject> {
                let relative = DataPath::parse(path)?;
                let data_type = self.data_type.type_at(&relative)?;
                Ok(DataObject { anchor: self.anchor.at(&relative), data_type })
            }
            fn assert_valid_data(&self) -> Result<()> {
                self.data_type.assert_valid(&self.get()?)
            }
            fn validate(&self, recorder: &mut dyn Recorder) -> Result<()> {
                self.data_type.deep_validate(&self.get()?, recorder);
                Ok(())
            }
        }

        impl fmt::Display for $object {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self.get() {
                    Ok(value) => write!(f, "{}", value),
                    Err(e) => write!(f, "<{}>", e),
                }
            }
        }
    };
}

impl_getter!(DataObject);
impl_getter!(EditableDataObject);

impl Setter for EditableDataObject {
    fn set_at(&self, path: &str, value: Value) -> Result<()> {
        let relative = DataPath::parse(path)?;
        let mut pending = Some(self.data_type.type_at(&relative)?.adopt(&value, &relative)?);
        self.anchor.update(&relative, &mut |_: &DataType, slot: &mut Value| {
            *slot = pending.take().unwrap_or_default();
            Ok(())
        })
    }
    fn set_from_string_at(&self, path: &str, text: &str) -> Result<()> {
        let value = self.type_at(path)?.from_string(text)?;
        self.set_at(path, value)
    }
    fn set_from_string_recorded(&self, path: &str, text: &str, recorder: &mut dyn Recorder) -> Result<bool> {
        let relative = DataPath::parse(path)?;
        let target = self.data_type.type_at(&relative)?;
        match target.parse_checked(text, &relative, recorder)? {
            Some(value) => {
                self.set_at(path, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
    fn add_element(&self, path: &str, value: Option<Value>) -> Result<()> {
        let relative = DataPath::parse(path)?;
        let mut pending = Some(self.data_type.type_at(&relative)?.element_value(value)?);
        self.anchor.update(&relative, &mut |target: &DataType, slot: &mut Value| {
            target.push_element(slot, pending.take().unwrap_or_default())
        })
    }
    fn remove_element(&self, path: &str) -> Result<Value> {
        let relative = DataPath::parse(path)?;
        if relative.is_root() {
            return Err(MetatypeError::UnsupportedOperation("the value itself cannot be removed".into()));
        }
        let mut root = write(&self.anchor.cell);
        self.anchor.root_type.remove_element(&mut root, &self.anchor.base.join(&relative))
    }
    fn data_setter(&self, path: &str) -> Result<EditableDataObject> {
        let relative = DataPath::parse(path)?;
        let data_type = self.data_type.type_at(&relative)?;
        Ok(EditableDataObject { anchor: self.anchor.at(&relative), data_type })
    }
}

// ------------- Formatting -------------
fn format_value(data_type: &DataType, value: &Value, format: &str) -> Result<String> {
    let unsupported = || {
        MetatypeError::UnsupportedOperation(format!("the format '{}' does not apply to {}", format, data_type))
    };
    let places = || format.strip_prefix('.').and_then(|n| n.parse::<usize>().ok());
    match value {
        Value::Absent => Ok(String::new()),
        Value::Date(instant) => {
            let mut out = String::new();
            write!(out, "{}", instant.format(format))
                .map_err(|_| MetatypeError::ConversionError(format!("'{}' is not a usable date format", format)))?;
            Ok(out)
        }
        Value::Double(d) => places().map(|n| format!("{:.*}", n, d)).ok_or_else(unsupported),
        Value::Decimal(d) => places()
            .map(|n| d.with_scale_round(n as i64, RoundingMode::HalfUp).to_string())
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

// ------------- Batch string update -------------
// Applies `batch` (paths relative to `data`) and reports whether anything changed.
// `prefix` is where `data` sits in the object, for recorded paths.
fn apply_strings(
    data_type: &DataType,
    data: &mut Value,
    mut batch: Vec<(DataPath, String)>,
    prefix: &DataPath,
    recorder: &mut dyn Recorder,
) -> Result<bool> {
    batch.sort_by(|a, b| a.0.segments().cmp(b.0.segments()));
    let target = data_type.resolve()?;
    let mut changed = false;
    if target.type_code() == TypeCode::List {
        let highest = batch.iter().filter_map(|(path, _)| path.first().and_then(Segment::as_index)).max();
        if let Some(highest) = highest {
            let length = highest.checked_add(1).ok_or_else(|| {
                MetatypeError::invalid_path(prefix.child(Segment::Index(highest)), "the index is out of range")
            })?;
            changed |= target.extend_list(data, length)?;
        }
    }
    let mut consumed = vec![false; batch.len()];
    for i in 0..batch.len() {
        if consumed[i] {
            continue;
        }
        consumed[i] = true;
        let (path, text) = &batch[i];
        let Some((segment, rest)) = path.split_first() else {
            changed |= write_leaf(&target, data, text, prefix, recorder)?;
            continue;
        };
        let child_path = prefix.child(segment.clone());
        let step = DataPath::from(segment.clone());
        if rest.is_root() {
            let child_type = target.type_for(segment)?;
            if child_type.resolve()?.type_code() == TypeCode::List {
                trace!(path = %child_path, "appending a default element");
                let mut fresh = Some(child_type.element_value(None)?);
                target.update_at(data, &step, &mut |t: &DataType, slot: &mut Value| {
                    t.push_element(slot, fresh.take().unwrap_or_default())
                })?;
                changed = true;
            } else {
                changed |= target.update_at(data, &step, &mut |t: &DataType, slot: &mut Value| {
                    write_leaf(t, slot, text, &child_path, recorder)
                })?;
            }
            continue;
        }
        // entries under the same segment need not be adjacent ("items2" sorts between "items.a" and "items[0]")
        let mut sub_batch = vec![(rest, text.clone())];
        for j in i + 1..batch.len() {
            if consumed[j] || batch[j].0.first() != Some(segment) {
                continue;
            }
            consumed[j] = true;
            if let Some((_, rest)) = batch[j].0.split_first() {
                sub_batch.push((rest, batch[j].1.clone()));
            }
        }
        trace!(path = %child_path, entries = sub_batch.len(), "descending");
        changed |= target.update_at(data, &step, &mut |t: &DataType, slot: &mut Value| {
            apply_strings(t, slot, std::mem::take(&mut sub_batch), &child_path, recorder)
        })?;
    }
    Ok(changed)
}

fn write_leaf(data_type: &DataType, slot: &mut Value, text: &str, path: &DataPath, recorder: &mut dyn Recorder) -> Result<bool> {
    match data_type.parse_checked(text, path, recorder)? {
        Some(value) if value == *slot => Ok(false),
        Some(value) => {
            trace!(path = %path, "updated from '{}'", text);
            *slot = value;
            Ok(true)
        }
        None => {
            warn!(path = %path, "rejected '{}'", text);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ErrorRecorder;
    use crate::datatype::{Field, SimpleKind};

    fn sample() -> DataType {
        DataType::structure(vec![
            Field::new("items", DataType::list(DataType::simple(SimpleKind::Integer))),
            Field::new("items2", DataType::simple(SimpleKind::String)),
            Field::new(
                "meta",
                DataType::structure(vec![
                    Field::new("a", DataType::simple(SimpleKind::String)),
                    Field::new("b", DataType::simple(SimpleKind::Boolean)),
                ]),
            ),
        ])
    }

    #[test]
    fn entries_sharing_a_segment_are_grouped() {
        let object = sample().new_object();
        let mut recorder = ErrorRecorder::new();
        let updated = object
            .set_string_data(
                [("meta.a", "x"), ("items2", "y"), ("meta.b", "true"), ("items[1]", "5")],
                &mut recorder,
            )
            .unwrap()
            .unwrap();
        assert!(!recorder.has_errors(None));
        assert_eq!(updated.get_at("meta.a").unwrap(), Value::from("x"));
        assert_eq!(updated.get_at("meta.b").unwrap(), Value::from(true));
        assert_eq!(updated.get_at("items2").unwrap(), Value::from("y"));
        assert_eq!(updated.size_at("items").unwrap(), 2);
        assert_eq!(updated.get_at("items[1]").unwrap(), Value::from(5));
    }

    #[test]
    fn a_bare_list_entry_appends_a_default() {
        let object = sample().new_object();
        let mut recorder = ErrorRecorder::new();
        let updated = object.set_string_data([("items", "ignored")], &mut recorder).unwrap().unwrap();
        assert_eq!(updated.size_at("items").unwrap(), 1);
        assert_eq!(updated.get_at("items[0]").unwrap(), Value::from(0));
    }

    #[test]
    fn failures_are_recorded_with_their_full_path() {
        let object = sample().new_object();
        let mut recorder = ErrorRecorder::new();
        let updated = object
            .set_string_data([("meta.b", "maybe"), ("meta.a", "ok")], &mut recorder)
            .unwrap()
            .unwrap();
        assert_eq!(recorder.paths(), vec!["meta.b"]);
        assert_eq!(updated.get_at("meta.a").unwrap(), Value::from("ok"));
        assert_eq!(updated.get_at("meta.b").unwrap(), Value::from(false));
    }

    #[test]
    fn formats() {
        let object = DataType::structure(vec![
            Field::new("when", DataType::date()),
            Field::new("ratio", DataType::simple(SimpleKind::Double)),
            Field::new("amount", DataType::simple(SimpleKind::Decimal)),
        ])
        .new_object();
        object.set_from_string_at("when", "2021-03-04T05:06:07.000Z").unwrap();
        object.set_from_string_at("ratio", "0.127").unwrap();
        object.set_from_string_at("amount", "10.456").unwrap();
        assert_eq!(object.get_as_string_at("when", Some("%Y/%m/%d")).unwrap(), "2021/03/04");
        assert_eq!(object.get_as_string_at("ratio", Some(".2")).unwrap(), "0.13");
        assert_eq!(object.get_as_string_at("amount", Some(".2")).unwrap(), "10.46");
        assert!(matches!(
            object.get_as_string_at("ratio", Some("%Y")),
            Err(MetatypeError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn read_only_views_share_the_value() {
        let object = sample().new_object();
        let view = object.read_only();
        object.set_at("items2", Value::from("shared")).unwrap();
        assert_eq!(view.get_at("items2").unwrap(), Value::from("shared"));
    }
}
