//! Named type registries.
//!
//! A [`TypeDictionary`] maps type ids to [`DataType`]s and may have a parent,
//! which is consulted whenever an id is not registered locally. Every
//! dictionary descends from the immutable root dictionary holding the
//! built-in scalars. Dictionaries are kept in the process-wide
//! [`DictionaryStore`] so that a [`DictionaryReference`] can find them by id.
//!
//! Creating a child of a non-root dictionary copies every parent type that
//! refers back into the parent, pointing those references at the child
//! instead. Registering an override in the child then reaches every type
//! that recursively referenced the overridden id, while the parent and its
//! other children keep seeing the original.

use lazy_static::lazy_static;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// used to print out readable forms of a reference
use std::fmt;

use tracing::debug;

use crate::datatype::{DataType, SimpleKind};
use crate::error::{MetatypeError, Result};
use crate::settings;

pub const ROOT_DICTIONARY_ID: &str = "root";

// ------------- DictionaryReference -------------
/// Where a Reference type finds its target dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictionaryReference {
    /// A dictionary in this process, by id.
    Local { dictionary_id: String },
    /// A dictionary behind a registered [`RemoteDictionaryContainerResolver`].
    Remote { locator: String, dictionary_id: String },
}

impl DictionaryReference {
    pub fn local(dictionary_id: impl Into<String>) -> Self {
        DictionaryReference::Local { dictionary_id: dictionary_id.into() }
    }
    pub fn remote(locator: impl Into<String>, dictionary_id: impl Into<String>) -> Self {
        DictionaryReference::Remote { locator: locator.into(), dictionary_id: dictionary_id.into() }
    }
    pub fn dictionary_id(&self) -> &str {
        match self {
            DictionaryReference::Local { dictionary_id } | DictionaryReference::Remote { dictionary_id, .. } => {
                dictionary_id
            }
        }
    }
    pub fn locator(&self) -> Option<&str> {
        match self {
            DictionaryReference::Remote { locator, .. } => Some(locator),
            DictionaryReference::Local { .. } => None,
        }
    }
    pub fn resolve(&self) -> Result<Arc<TypeDictionary>> {
        DictionaryStore::resolve(self)
    }
}

impl fmt::Display for DictionaryReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DictionaryReference::Local { dictionary_id } => write!(f, "{}", dictionary_id),
            DictionaryReference::Remote { locator, dictionary_id } => write!(f, "{}/{}", locator, dictionary_id),
        }
    }
}

// ------------- Containers -------------
/// Anything that can hand out dictionaries for local references.
pub trait DictionaryContainer: Send + Sync {
    fn get_type_dictionary(&self, reference: &DictionaryReference) -> Result<Arc<TypeDictionary>>;
}

/// Finds the container behind a remote reference.
pub trait RemoteDictionaryContainerResolver: Send + Sync {
    fn get_remote_dictionary_container(&self, reference: &DictionaryReference) -> Result<Arc<dyn DictionaryContainer>>;
}

// ------------- TypeDictionary -------------
#[derive(Debug)]
pub struct TypeDictionary {
    id: String,
    parent: Option<Arc<TypeDictionary>>,
    types: Mutex<BTreeMap<String, DataType>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TypeDictionary {
    fn root() -> Self {
        let mut types = BTreeMap::new();
        for kind in SimpleKind::ALL {
            types.insert(kind.name().to_owned(), DataType::simple(kind));
        }
        types.insert("Date".to_owned(), DataType::date());
        Self { id: ROOT_DICTIONARY_ID.to_owned(), parent: None, types: Mutex::new(types) }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn parent(&self) -> Option<&Arc<TypeDictionary>> {
        self.parent.as_ref()
    }
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
    /// A local reference to this dictionary.
    pub fn reference(&self) -> DictionaryReference {
        DictionaryReference::local(self.id.clone())
    }
    /// A Reference type pointing at `type_id` in this dictionary.
    pub fn reference_to(&self, type_id: impl Into<String>) -> DataType {
        DataType::reference(type_id, self.reference())
    }
    /// Looks here first, then up the parent chain.
    pub fn get_type(&self, type_id: &str) -> Option<DataType> {
        match self.get_local_type(type_id) {
            Some(found) => Some(found),
            None => self.parent.as_ref().and_then(|parent| parent.get_type(type_id)),
        }
    }
    pub fn get_local_type(&self, type_id: &str) -> Option<DataType> {
        lock(&self.types).get(type_id).cloned()
    }
    fn assert_mutable(&self) -> Result<()> {
        if self.is_root() {
            Err(MetatypeError::ImmutableDictionary(self.id.clone()))
        } else {
            Ok(())
        }
    }
    pub fn put_type(&self, type_id: impl Into<String>, data_type: DataType) -> Result<()> {
        self.assert_mutable()?;
        let type_id = type_id.into();
        if type_id.trim().is_empty() {
            return Err(MetatypeError::InvalidTypeDefinition("a type id cannot be blank".into()));
        }
        data_type.assert_valid_definition()?;
        debug!(dictionary = %self.id, type_id = %type_id, "registered {}", data_type);
        lock(&self.types).insert(type_id, data_type);
        Ok(())
    }
    /// Registers every entry, or none of them when one is not a valid definition.
    pub fn set_types(&self, types: impl IntoIterator<Item = (String, DataType)>) -> Result<()> {
        self.assert_mutable()?;
        let types: Vec<(String, DataType)> = types.into_iter().collect();
        for (type_id, data_type) in &types {
            if type_id.trim().is_empty() {
                return Err(MetatypeError::InvalidTypeDefinition("a type id cannot be blank".into()));
            }
            data_type.assert_valid_definition()?;
        }
        debug!(dictionary = %self.id, count = types.len(), "registered types");
        lock(&self.types).extend(types);
        Ok(())
    }
    pub fn remove_type(&self, type_id: &str) -> Result<Option<DataType>> {
        self.assert_mutable()?;
        let removed = lock(&self.types).remove(type_id);
        if removed.is_some() {
            debug!(dictionary = %self.id, type_id = %type_id, "removed type");
        }
        Ok(removed)
    }
    /// Ids registered directly in this dictionary, in order.
    pub fn type_ids(&self) -> Vec<String> {
        lock(&self.types).keys().cloned().collect()
    }
    /// Ids visible from this dictionary, including inherited ones.
    pub fn all_type_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.type_ids().into_iter().collect();
        if let Some(parent) = &self.parent {
            ids.extend(parent.all_type_ids());
        }
        ids.into_iter().collect()
    }
    /// A child dictionary, registered in the store.
    ///
    /// Asking again for an id that is already registered hands back that
    /// dictionary unchanged. Without an id one is generated from the
    /// configured prefix.
    pub fn new_dictionary(self: &Arc<Self>, id: Option<&str>) -> Result<Arc<TypeDictionary>> {
        if let Some(existing) = id.and_then(DictionaryStore::get) {
            return Ok(existing);
        }
        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(MetatypeError::InvalidTypeDefinition("a dictionary id cannot be blank".into()));
            }
            Some(id) => id.to_owned(),
            None => DictionaryStore::generate_id(),
        };
        let mut types = BTreeMap::new();
        if !self.is_root() {
            let from = self.reference();
            let to = DictionaryReference::local(id.clone());
            for (type_id, data_type) in lock(&self.types).iter() {
                if data_type.references_dictionary(&from) {
                    debug!(parent = %self.id, child = %id, type_id = %type_id, "repaired self-references");
                    types.insert(type_id.clone(), data_type.retarget(&from, &to));
                }
            }
        }
        let child = Arc::new(TypeDictionary { id, parent: Some(Arc::clone(self)), types: Mutex::new(types) });
        Ok(DictionaryStore::register(child))
    }
}

// ------------- DictionaryStore -------------
lazy_static! {
    static ref ROOT: Arc<TypeDictionary> = Arc::new(TypeDictionary::root());
    static ref DICTIONARIES: Mutex<HashMap<String, Arc<TypeDictionary>>> = Mutex::new(HashMap::new());
    static ref RESOLVERS: Mutex<HashMap<String, Arc<dyn RemoteDictionaryContainerResolver>>> =
        Mutex::new(HashMap::new());
}

static GENERATED: AtomicU64 = AtomicU64::new(1);

/// The process-wide registry of dictionaries and remote resolvers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryStore;

impl DictionaryStore {
    pub fn root() -> Arc<TypeDictionary> {
        Arc::clone(&ROOT)
    }
    pub fn get(id: &str) -> Option<Arc<TypeDictionary>> {
        if id == ROOT_DICTIONARY_ID {
            return Some(Self::root());
        }
        lock(&DICTIONARIES).get(id).cloned()
    }
    pub fn contains(id: &str) -> bool {
        Self::get(id).is_some()
    }
    pub fn ids() -> Vec<String> {
        let mut ids: Vec<String> = lock(&DICTIONARIES).keys().cloned().collect();
        ids.push(ROOT_DICTIONARY_ID.to_owned());
        ids.sort();
        ids
    }
    // The first registration of an id wins.
    fn register(dictionary: Arc<TypeDictionary>) -> Arc<TypeDictionary> {
        match lock(&DICTIONARIES).entry(dictionary.id.clone()) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                debug!(dictionary = %dictionary.id, "created dictionary");
                Arc::clone(slot.insert(dictionary))
            }
        }
    }
    fn generate_id() -> String {
        let prefix = settings::current().dictionary_id_prefix;
        loop {
            let id = format!("{}-{}", prefix, GENERATED.fetch_add(1, Ordering::Relaxed));
            if !Self::contains(&id) {
                return id;
            }
        }
    }
    /// Installs the resolver for remote locators starting with `scheme:`.
    pub fn register_resolver(scheme: impl Into<String>, resolver: Arc<dyn RemoteDictionaryContainerResolver>) {
        let scheme = scheme.into();
        debug!(scheme = %scheme, "registered remote resolver");
        lock(&RESOLVERS).insert(scheme, resolver);
    }
    pub fn remove_resolver(scheme: &str) -> bool {
        lock(&RESOLVERS).remove(scheme).is_some()
    }
    pub fn resolve(reference: &DictionaryReference) -> Result<Arc<TypeDictionary>> {
        match reference {
            DictionaryReference::Local { dictionary_id } => Self::get(dictionary_id)
                .ok_or_else(|| MetatypeError::MissingDictionaryEntry(format!("no dictionary '{}'", dictionary_id))),
            DictionaryReference::Remote { locator, dictionary_id } => {
                let scheme = locator.split(':').next().unwrap_or_default();
                let resolver = lock(&RESOLVERS).get(scheme).cloned().ok_or_else(|| {
                    MetatypeError::MissingDictionaryEntry(format!("no resolver for the locator '{}'", locator))
                })?;
                let container = resolver.get_remote_dictionary_container(reference)?;
                container.get_type_dictionary(&DictionaryReference::local(dictionary_id.clone()))
            }
        }
    }
}

impl DictionaryContainer for DictionaryStore {
    fn get_type_dictionary(&self, reference: &DictionaryReference) -> Result<Arc<TypeDictionary>> {
        DictionaryStore::resolve(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Field;

    #[test]
    fn root_is_immutable_and_holds_builtins() {
        let root = DictionaryStore::root();
        assert!(root.is_root());
        assert_eq!(root.get_type("Integer"), Some(DataType::simple(SimpleKind::Integer)));
        assert_eq!(root.get_type("Date"), Some(DataType::date()));
        let err = root.put_type("X", DataType::date()).unwrap_err();
        assert!(matches!(err, MetatypeError::ImmutableDictionary(_)));
        assert!(matches!(root.remove_type("Date"), Err(MetatypeError::ImmutableDictionary(_))));
    }

    #[test]
    fn lookups_walk_the_parent_chain() {
        let child = DictionaryStore::root().new_dictionary(Some("dictionary.unit.lookups")).unwrap();
        assert!(child.get_type("Boolean").is_some());
        assert!(child.get_local_type("Boolean").is_none());
        assert!(child.get_type("Nope").is_none());
        child.put_type("Flag", DataType::simple(SimpleKind::Boolean)).unwrap();
        assert_eq!(child.type_ids(), vec!["Flag"]);
        assert!(child.all_type_ids().contains(&"Date".to_owned()));
    }

    #[test]
    fn generated_ids_are_unique() {
        let root = DictionaryStore::root();
        let a = root.new_dictionary(None).unwrap();
        let b = root.new_dictionary(None).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(DictionaryStore::contains(a.id()));
    }

    #[test]
    fn repair_only_copies_self_referencing_types() {
        let parent = DictionaryStore::root().new_dictionary(Some("dictionary.unit.repair")).unwrap();
        parent.put_type("Plain", DataType::simple(SimpleKind::String)).unwrap();
        parent
            .put_type(
                "Chain",
                DataType::structure(vec![
                    Field::new("value", DataType::simple(SimpleKind::Integer)),
                    Field::new("next", parent.reference_to("Chain")),
                ]),
            )
            .unwrap();
        let child = parent.new_dictionary(Some("dictionary.unit.repair.child")).unwrap();
        assert_eq!(child.type_ids(), vec!["Chain"]);
        let copied = child.get_local_type("Chain").unwrap();
        let (type_id, target) = copied.field("next").unwrap().data_type().reference_target().unwrap();
        assert_eq!(type_id, "Chain");
        assert_eq!(target, &child.reference());
    }

    #[test]
    fn unknown_remote_scheme_is_missing() {
        let reference = DictionaryReference::remote("nowhere:thing", "d");
        assert!(matches!(reference.resolve(), Err(MetatypeError::MissingDictionaryEntry(_))));
    }
}
