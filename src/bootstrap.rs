//! Types and dictionaries described as data.
//!
//! The persistent shape of a type is itself a type, declared with the
//! engine in a private dictionary:
//!
//! ```text
//! TypeState   = { typeCode: Enumerated(Simple|Date|...),
//!                 attributes: { Class, Choices: List<String>, RefTypeId, Extra: Map<String> },
//!                 dictionaryReference: Ref(DictionaryReferenceState),
//!                 children: List<{ name, state: Ref(TypeState), hasInitialValue,
//!                                  initialValue: List<{ segments: List<String>, kind, text }> }> }
//! DictionaryState = { dictId, parentId, types: List<{ typeId, state: Ref(TypeState) }> }
//! ```
//!
//! The `state` of a child refers back to `TypeState`, which is what lets a
//! finite declaration describe arbitrarily deep types. A Reference is stored
//! as its target id and dictionary, never expanded, so recursive types
//! produce finite states too.
//!
//! An initial value is flattened into entries keyed by the segments leading
//! to them: a `Node` entry for each list, map or struct (written as a fresh
//! default before its children), a `Leaf` entry holding the string form of
//! anything else, and an `Absent` entry for unset slots. Segments are stored
//! one by one rather than as a path string, so map keys may contain any
//! character.

use lazy_static::lazy_static;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::datatype::{DataType, Field, SimpleKind, TypeCode, TypeKind, CHOICES, CLASS, REF_TYPE_ID};
use crate::dictionary::{DictionaryReference, DictionaryStore, TypeDictionary};
use crate::error::{MetatypeError, Result};
use crate::factory::TypeFactory;
use crate::object::{EditableDataObject, Getter, Setter};
use crate::path::{DataPath, Segment};
use crate::value::{read, Value};

pub const BOOTSTRAP_DICTIONARY_ID: &str = "metatype.bootstrap";
pub const TYPE_STATE: &str = "TypeState";
pub const DICTIONARY_STATE: &str = "DictionaryState";
pub const DICTIONARY_REFERENCE_STATE: &str = "DictionaryReferenceState";

const EXTRA: &str = "Extra";
const LEAF: &str = "Leaf";
const NODE: &str = "Node";
const ABSENT: &str = "Absent";

struct MetaSchema {
    dictionary: Arc<TypeDictionary>,
    type_state: DataType,
    dictionary_state: DataType,
}

lazy_static! {
    static ref SCHEMA: Mutex<Option<Arc<MetaSchema>>> = Mutex::new(None);
}

fn schema() -> Result<Arc<MetaSchema>> {
    let mut slot = SCHEMA.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(schema) = slot.as_ref() {
        return Ok(Arc::clone(schema));
    }
    let schema = Arc::new(build()?);
    *slot = Some(Arc::clone(&schema));
    Ok(schema)
}

fn build() -> Result<MetaSchema> {
    let dictionary = DictionaryStore::root().new_dictionary(Some(BOOTSTRAP_DICTIONARY_ID))?;
    let factory = TypeFactory::with_dictionary(Arc::clone(&dictionary));
    let text = || factory.simple(SimpleKind::String);

    let reference_state = factory.declare_struct(vec![
        Field::new("kind", factory.declare_enumeration(["Local", "Remote"])?),
        Field::new("dictionaryId", text()),
        Field::new("locator", text()),
    ])?;
    factory.register(DICTIONARY_REFERENCE_STATE, reference_state)?;

    let attributes = factory.declare_struct(vec![
        Field::new(CLASS, text()),
        Field::new(CHOICES, factory.declare_list(text())?),
        Field::new(REF_TYPE_ID, text()),
        Field::new(EXTRA, factory.declare_map(text())?),
    ])?;
    let initial_entry = factory.declare_struct(vec![
        Field::new("segments", factory.declare_list(text())?),
        Field::new("kind", factory.declare_enumeration([LEAF, NODE, ABSENT])?),
        Field::new("text", text()),
    ])?;
    let child = factory.declare_struct(vec![
        Field::new("name", text()),
        Field::new("state", factory.declare_reference(TYPE_STATE)?),
        Field::new("hasInitialValue", factory.simple(SimpleKind::Boolean)),
        Field::new("initialValue", factory.declare_list(initial_entry)?),
    ])?;
    let type_state = factory.declare_struct(vec![
        Field::new("typeCode", factory.declare_enumeration(TypeCode::ALL.iter().map(|c| c.name()))?),
        Field::new("attributes", attributes),
        Field::new("dictionaryReference", factory.declare_reference(DICTIONARY_REFERENCE_STATE)?),
        Field::new("children", factory.declare_list(child)?),
    ])?;
    factory.register(TYPE_STATE, type_state.clone())?;

    let entry = factory.declare_struct(vec![
        Field::new("typeId", text()),
        Field::new("state", factory.declare_reference(TYPE_STATE)?),
    ])?;
    let dictionary_state = factory.declare_struct(vec![
        Field::new("dictId", text()),
        Field::new("parentId", text()),
        Field::new("types", factory.declare_list(entry)?),
    ])?;
    factory.register(DICTIONARY_STATE, dictionary_state.clone())?;

    debug!(dictionary = %dictionary.id(), "declared the state schema");
    Ok(MetaSchema { dictionary, type_state, dictionary_state })
}

/// The type every populated type state conforms to.
pub fn type_state_schema() -> Result<DataType> {
    Ok(schema()?.type_state.clone())
}

pub fn dictionary_state_schema() -> Result<DataType> {
    Ok(schema()?.dictionary_state.clone())
}

/// The private dictionary holding the state schema.
pub fn bootstrap_dictionary() -> Result<Arc<TypeDictionary>> {
    Ok(Arc::clone(&schema()?.dictionary))
}

// ------------- Types -------------
pub fn populate_type_state(data_type: &DataType) -> Result<EditableDataObject> {
    let state = schema()?.type_state.new_object();
    state.set_at("typeCode", Value::from(data_type.type_code().name()))?;
    state.set_at("attributes.Class", Value::from(data_type.class()))?;
    if let Some(choices) = data_type.choices() {
        let choices = choices.iter().map(|c| Value::from(c.as_str())).collect();
        state.set_at("attributes.Choices", Value::list(choices))?;
    }
    if !data_type.attributes().is_empty() {
        let extra: BTreeMap<String, Value> = data_type
            .attributes()
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        state.set_at("attributes.Extra", Value::map(extra))?;
    }
    if let Some((type_id, dictionary)) = data_type.reference_target() {
        state.set_at("attributes.RefTypeId", Value::from(type_id))?;
        let kind = match dictionary {
            DictionaryReference::Local { .. } => "Local",
            DictionaryReference::Remote { .. } => "Remote",
        };
        state.set_at("dictionaryReference.kind", Value::from(kind))?;
        state.set_at("dictionaryReference.dictionaryId", Value::from(dictionary.dictionary_id()))?;
        if let Some(locator) = dictionary.locator() {
            state.set_at("dictionaryReference.locator", Value::from(locator))?;
        }
    }
    for (i, (name, child_type, initial)) in data_type.children().into_iter().enumerate() {
        let slot = format!("children[{}]", i);
        state.set_at(&format!("{}.name", slot), Value::from(name))?;
        let nested = populate_type_state(&child_type)?;
        state.set_at(&format!("{}.state", slot), nested.get()?)?;
        if let Some(initial) = initial {
            state.set_at(&format!("{}.hasInitialValue", slot), Value::from(true))?;
            let mut entries = Vec::new();
            flatten(&child_type, &initial, &mut Vec::new(), &mut entries)?;
            for (j, (segments, kind, text)) in entries.into_iter().enumerate() {
                let entry = format!("{}.initialValue[{}]", slot, j);
                let segments = segments.into_iter().map(Value::from).collect();
                state.set_at(&format!("{}.segments", entry), Value::list(segments))?;
                state.set_at(&format!("{}.kind", entry), Value::from(kind))?;
                state.set_at(&format!("{}.text", entry), Value::from(text))?;
            }
        }
    }
    Ok(state)
}

type InitialEntry = (Vec<String>, &'static str, String);

fn flatten(data_type: &DataType, value: &Value, at: &mut Vec<String>, out: &mut Vec<InitialEntry>) -> Result<()> {
    if value.is_absent() {
        out.push((at.clone(), ABSENT, String::new()));
        return Ok(());
    }
    let target = data_type.resolve()?;
    let children: Vec<(String, DataType, Value)> = match (target.kind(), value) {
        (TypeKind::List(element), Value::List(elements)) => read(elements)
            .iter()
            .enumerate()
            .map(|(i, e)| (i.to_string(), element.clone(), e.clone()))
            .collect(),
        (TypeKind::Map(element), Value::Map(entries)) => read(entries)
            .iter()
            .map(|(key, e)| (key.clone(), element.clone(), e.clone()))
            .collect(),
        (TypeKind::Struct(fields), Value::Struct(values)) => {
            let values = read(values);
            fields
                .iter()
                .map(|f| (f.name().to_owned(), f.data_type().clone(), values.get(f.name()).cloned().unwrap_or_default()))
                .collect()
        }
        _ => {
            out.push((at.clone(), LEAF, data_type.to_string_value(value)?));
            return Ok(());
        }
    };
    out.push((at.clone(), NODE, String::new()));
    for (name, child_type, child) in children {
        at.push(name);
        flatten(&child_type, &child, at, out)?;
        at.pop();
    }
    Ok(())
}

// Stored segments become a path by asking each type on the way what it is indexed by.
fn path_for(data_type: &DataType, segments: &[String]) -> Result<DataPath> {
    let mut path = DataPath::root();
    let mut current = data_type.clone();
    for segment in segments {
        let resolved = current.resolve()?;
        let segment = if resolved.type_code() == TypeCode::List {
            Segment::Index(segment.parse().map_err(|_| malformed(format!("'{}' is not a list index", segment)))?)
        } else {
            Segment::name(segment.as_str())
        };
        current = resolved.type_for(&segment)?;
        path = path.child(segment);
    }
    Ok(path)
}

fn restore_initial(field_type: &DataType, state: &dyn Getter, slot: &str) -> Result<Value> {
    let mut value = Value::Absent;
    for j in 0..state.size_at(&format!("{}.initialValue", slot))? {
        let entry = format!("{}.initialValue[{}]", slot, j);
        let segments = (0..state.size_at(&format!("{}.segments", entry))?)
            .map(|k| text_at(state, &format!("{}.segments[{}]", entry, k)))
            .collect::<Result<Vec<_>>>()?;
        let path = path_for(field_type, &segments)?;
        let mut pending = match text_at(state, &format!("{}.kind", entry))?.as_str() {
            LEAF => Some(field_type.type_at(&path)?.from_string(&text_at(state, &format!("{}.text", entry))?)?),
            NODE => None,
            _ => Some(Value::Absent),
        };
        field_type.update_at(&mut value, &path, &mut |t: &DataType, target: &mut Value| {
            *target = match pending.take() {
                Some(v) => v,
                None => t.resolve()?.new_value().unwrap_or_default(),
            };
            Ok(())
        })?;
    }
    Ok(value)
}

fn text_at(state: &dyn Getter, path: &str) -> Result<String> {
    Ok(state.get_at(path)?.as_text().unwrap_or_default().to_owned())
}

fn malformed(message: String) -> MetatypeError {
    MetatypeError::InvalidTypeDefinition(format!("malformed type state: {}", message))
}

pub fn restore_from_state_object(state: &dyn Getter) -> Result<DataType> {
    let code_name = text_at(state, "typeCode")?;
    let code = TypeCode::from_name(&code_name).ok_or_else(|| malformed(format!("unknown type code '{}'", code_name)))?;
    let class = text_at(state, "attributes.Class")?;
    let children = state.size_at("children")?;
    let restored = match code {
        TypeCode::Simple => {
            let kind = SimpleKind::from_name(&class).ok_or_else(|| malformed(format!("unknown simple kind '{}'", class)))?;
            DataType::simple(kind)
        }
        TypeCode::Date => DataType::date(),
        TypeCode::Enumerated => {
            let count = state.size_at("attributes.Choices")?;
            let choices = (0..count)
                .map(|i| text_at(state, &format!("attributes.Choices[{}]", i)))
                .collect::<Result<Vec<_>>>()?;
            DataType::enumerated(choices)
        }
        TypeCode::List | TypeCode::Map => {
            if children != 1 {
                return Err(malformed(format!("a {} has one element type, found {}", code_name, children)));
            }
            let element = restore_from_state_object(&state.data_getter("children[0].state")?)?;
            if code == TypeCode::List { DataType::list(element) } else { DataType::map(element) }
        }
        TypeCode::Struct => {
            let mut fields = Vec::with_capacity(children);
            for i in 0..children {
                let slot = format!("children[{}]", i);
                let name = text_at(state, &format!("{}.name", slot))?;
                let field_type = restore_from_state_object(&state.data_getter(&format!("{}.state", slot))?)?;
                let mut field = Field::new(name, field_type.clone());
                if state.get_at(&format!("{}.hasInitialValue", slot))?.as_bool() == Some(true) {
                    field = field.with_initial(restore_initial(&field_type, state, &slot)?);
                }
                fields.push(field);
            }
            DataType::structure(fields)
        }
        TypeCode::Reference => {
            let type_id = text_at(state, "attributes.RefTypeId")?;
            let dictionary_id = text_at(state, "dictionaryReference.dictionaryId")?;
            let dictionary = match text_at(state, "dictionaryReference.kind")?.as_str() {
                "Local" => DictionaryReference::local(dictionary_id),
                "Remote" => DictionaryReference::remote(text_at(state, "dictionaryReference.locator")?, dictionary_id),
                _ => return Err(malformed(format!("the reference to '{}' has no dictionary", type_id))),
            };
            DataType::reference(type_id, dictionary)
        }
    };
    let mut restored = if class.is_empty() { restored } else { restored.with_class(class) };
    // keys may contain path characters, so the map is read whole
    if let Value::Map(entries) = state.get_at("attributes.Extra")? {
        for (name, value) in read(&entries).iter() {
            if let Some(value) = value.as_text() {
                restored = restored.with_attribute(name.clone(), value);
            }
        }
    }
    restored.assert_valid_definition()?;
    Ok(restored)
}

// ------------- Dictionaries -------------
/// The state of the types registered directly in `dictionary` (built-ins excluded).
pub fn populate_dictionary_state(dictionary: &TypeDictionary) -> Result<EditableDataObject> {
    let state = schema()?.dictionary_state.new_object();
    state.set_at("dictId", Value::from(dictionary.id()))?;
    if let Some(parent) = dictionary.parent() {
        state.set_at("parentId", Value::from(parent.id()))?;
    }
    let mut i = 0;
    for type_id in dictionary.type_ids() {
        let Some(data_type) = dictionary.get_local_type(&type_id) else {
            continue;
        };
        state.set_at(&format!("types[{}].typeId", i), Value::from(type_id))?;
        state.set_at(&format!("types[{}].state", i), populate_type_state(&data_type)?.get()?)?;
        i += 1;
    }
    Ok(state)
}

/// Registers the types described by `state` in the dictionary it names,
/// creating that dictionary under its recorded parent (or the root) if needed.
pub fn get_type_dictionary(state: &dyn Getter) -> Result<Arc<TypeDictionary>> {
    let id = text_at(state, "dictId")?;
    if id.trim().is_empty() {
        return Err(malformed("a dictionary state needs an id".into()));
    }
    let parent_id = text_at(state, "parentId")?;
    let parent = DictionaryStore::get(&parent_id).unwrap_or_else(DictionaryStore::root);
    let dictionary = parent.new_dictionary(Some(&id))?;
    let mut types = Vec::new();
    for i in 0..state.size_at("types")? {
        let type_id = text_at(state, &format!("types[{}].typeId", i))?;
        let data_type = restore_from_state_object(&state.data_getter(&format!("types[{}].state", i))?)?;
        types.push((type_id, data_type));
    }
    debug!(dictionary = %id, count = types.len(), "restored dictionary");
    dictionary.set_types(types)?;
    Ok(dictionary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_schema_describes_itself() {
        let schema = type_state_schema().unwrap();
        let state = populate_type_state(&schema).unwrap();
        state.assert_valid_data().unwrap();
        let restored = restore_from_state_object(&state).unwrap();
        assert_eq!(restored, schema);
    }

    #[test]
    fn references_are_not_expanded() {
        let reference = DataType::reference("Anything", DictionaryReference::remote("fake:here", "there"));
        let state = populate_type_state(&reference).unwrap();
        assert_eq!(state.size_at("children").unwrap(), 0);
        assert_eq!(state.get_at("dictionaryReference.locator").unwrap(), Value::from("fake:here"));
        let restored = restore_from_state_object(&state).unwrap();
        assert_eq!(restored.reference_target(), reference.reference_target());
    }

    #[test]
    fn unknown_type_codes_are_rejected() {
        let state = populate_type_state(&DataType::date()).unwrap();
        assert_eq!(restore_from_state_object(&state).unwrap(), DataType::date());
        let broken = DataType::structure(vec![Field::new("typeCode", DataType::simple(SimpleKind::String))]).new_object();
        broken.set_at("typeCode", Value::from("Tuple")).unwrap();
        let err = restore_from_state_object(&broken).unwrap_err();
        assert!(matches!(err, MetatypeError::InvalidTypeDefinition(_)));
    }
}
