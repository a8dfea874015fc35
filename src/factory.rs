use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bootstrap;
use crate::convert::{Conversion, Converter, Validator};
use crate::datatype::{DataType, Field, SimpleKind};
use crate::dictionary::{DictionaryReference, DictionaryStore, TypeDictionary};
use crate::error::{MetatypeError, Result};
use crate::object::Getter;

/// Declares types and checks them as they are built.
///
/// A factory is bound to one dictionary: `declare_reference` points into it
/// and `register` files new types under it. The default factory uses the
/// root dictionary, which only supports anonymous declarations.
#[derive(Debug, Clone)]
pub struct TypeFactory {
    dictionary: Arc<TypeDictionary>,
}

impl Default for TypeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeFactory {
    pub fn new() -> Self {
        Self { dictionary: DictionaryStore::root() }
    }
    pub fn with_dictionary(dictionary: Arc<TypeDictionary>) -> Self {
        Self { dictionary }
    }
    pub fn dictionary(&self) -> &Arc<TypeDictionary> {
        &self.dictionary
    }
    pub fn simple(&self, kind: SimpleKind) -> DataType {
        DataType::simple(kind)
    }
    /// Looks an id up through the bound dictionary and its parents.
    pub fn builtin(&self, type_id: &str) -> Result<DataType> {
        self.dictionary.get_type(type_id).ok_or_else(|| {
            MetatypeError::MissingDictionaryEntry(format!("type '{}' in dictionary '{}'", type_id, self.dictionary.id()))
        })
    }
    fn checked(data_type: DataType) -> Result<DataType> {
        data_type.assert_valid_definition()?;
        Ok(data_type)
    }
    pub fn declare_struct(&self, fields: Vec<Field>) -> Result<DataType> {
        Self::checked(DataType::structure(fields))
    }
    pub fn declare_map(&self, element: DataType) -> Result<DataType> {
        Self::checked(DataType::map(element))
    }
    pub fn declare_list(&self, element: DataType) -> Result<DataType> {
        Self::checked(DataType::list(element))
    }
    pub fn declare_enumeration<S: Into<String>>(&self, choices: impl IntoIterator<Item = S>) -> Result<DataType> {
        Self::checked(DataType::enumerated(choices))
    }
    pub fn declare_reference(&self, type_id: &str) -> Result<DataType> {
        Self::checked(self.dictionary.reference_to(type_id))
    }
    pub fn declare_reference_in(&self, type_id: &str, dictionary: DictionaryReference) -> Result<DataType> {
        Self::checked(DataType::reference(type_id, dictionary))
    }
    /// A new struct with the fields of `base` followed by `extra`.
    pub fn extend_struct(&self, base: &DataType, extra: Vec<Field>) -> Result<DataType> {
        let resolved = base.resolve()?;
        let fields = resolved.fields().ok_or_else(|| {
            MetatypeError::UnsupportedOperation(format!("only a struct can be extended, not {}", base))
        })?;
        let mut combined = fields.to_vec();
        combined.extend(extra);
        let mut extended = DataType::structure(combined).with_class(resolved.class());
        for (name, value) in resolved.attributes() {
            extended = extended.with_attribute(name.clone(), value.clone());
        }
        Self::checked(extended.with_validators(resolved.validators().iter().cloned()))
    }
    pub fn add_validators(&self, data_type: &DataType, validators: Vec<Arc<dyn Validator>>) -> DataType {
        data_type.with_validators(validators)
    }
    pub fn set_converters(&self, data_type: &DataType, converters: BTreeMap<Conversion, Arc<dyn Converter>>) -> DataType {
        data_type.with_converters(converters)
    }
    /// Files `data_type` under `type_id` in the bound dictionary and returns a reference to it.
    pub fn register(&self, type_id: &str, data_type: DataType) -> Result<DataType> {
        self.dictionary.put_type(type_id, data_type)?;
        self.declare_reference(type_id)
    }
    /// Rebuilds a type from its persisted state.
    pub fn restore_from_state_object(&self, state: &dyn Getter) -> Result<DataType> {
        bootstrap::restore_from_state_object(state)
    }
}
