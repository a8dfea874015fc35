use std::sync::Arc;

use metatype::dictionary::{DictionaryContainer, RemoteDictionaryContainerResolver};
use metatype::{
    DataType, DictionaryReference, DictionaryStore, Field, Getter, MetatypeError, Result, Setter, SimpleKind,
    TypeDictionary, TypeFactory, Value,
};

#[test]
fn root_dictionary_cannot_be_changed() {
    let root = DictionaryStore::root();
    assert!(matches!(
        root.put_type("Mine", DataType::date()),
        Err(MetatypeError::ImmutableDictionary(_))
    ));
    assert!(matches!(root.remove_type("String"), Err(MetatypeError::ImmutableDictionary(_))));
    assert!(matches!(root.set_types(Vec::new()), Err(MetatypeError::ImmutableDictionary(_))));
    assert!(root.get_type("String").is_some());
}

#[test]
fn creating_an_existing_id_returns_the_same_dictionary() {
    let root = DictionaryStore::root();
    let first = root.new_dictionary(Some("tests.idempotent")).unwrap();
    first.put_type("Flag", DataType::simple(SimpleKind::Boolean)).unwrap();
    let second = root.new_dictionary(Some("tests.idempotent")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.get_type("Flag").is_some());
    assert!(DictionaryStore::ids().contains(&"tests.idempotent".to_owned()));
}

#[test]
fn lookups_fall_back_to_parents_and_misses_are_not_errors() {
    let parent = DictionaryStore::root().new_dictionary(Some("tests.lookup.parent")).unwrap();
    parent.put_type("Code", DataType::simple(SimpleKind::String)).unwrap();
    let child = parent.new_dictionary(Some("tests.lookup.child")).unwrap();
    assert_eq!(child.get_type("Code"), Some(DataType::simple(SimpleKind::String)));
    assert_eq!(child.get_type("Integer"), Some(DataType::simple(SimpleKind::Integer)));
    assert!(child.get_type("Missing").is_none());
    assert_eq!(child.parent().map(|p| p.id().to_owned()), Some("tests.lookup.parent".to_owned()));

    child.put_type("Code", DataType::simple(SimpleKind::Long)).unwrap();
    assert_eq!(child.get_type("Code"), Some(DataType::simple(SimpleKind::Long)));
    assert_eq!(parent.get_type("Code"), Some(DataType::simple(SimpleKind::String)));
    child.remove_type("Code").unwrap();
    assert_eq!(child.get_type("Code"), Some(DataType::simple(SimpleKind::String)));
}

#[test]
fn overrides_in_a_child_reach_inherited_self_references() {
    let d1 = DictionaryStore::root().new_dictionary(Some("tests.override.d1")).unwrap();
    d1.put_type("B", DataType::simple(SimpleKind::String)).unwrap();
    d1.put_type("A", DataType::structure(vec![Field::new("b", d1.reference_to("B"))])).unwrap();
    let d2 = d1.new_dictionary(Some("tests.override.d2")).unwrap();
    d2.put_type("B", DataType::simple(SimpleKind::Integer)).unwrap();

    let from_d2 = d2.reference_to("A").new_object();
    from_d2.set_from_string_at("b", "7").unwrap();
    assert_eq!(from_d2.get_at("b").unwrap(), Value::from(7));
    assert_eq!(from_d2.type_at("b").unwrap().resolve().unwrap(), DataType::simple(SimpleKind::Integer));

    let from_d1 = d1.reference_to("A").new_object();
    from_d1.set_from_string_at("b", "7").unwrap();
    assert_eq!(from_d1.get_at("b").unwrap(), Value::from("7"));
    assert_eq!(from_d1.type_at("b").unwrap().resolve().unwrap(), DataType::simple(SimpleKind::String));
}

#[test]
fn self_referential_defaults_terminate() {
    let dictionary = DictionaryStore::root().new_dictionary(Some("tests.node")).unwrap();
    let factory = TypeFactory::with_dictionary(dictionary.clone());
    let node = factory
        .declare_struct(vec![
            Field::new("value", factory.simple(SimpleKind::Integer)),
            Field::new("left", factory.declare_reference("Node").unwrap()),
            Field::new("right", factory.declare_reference("Node").unwrap()),
        ])
        .unwrap();
    let node_ref = factory.register("Node", node.clone()).unwrap();
    assert_eq!(node_ref.new_value(), None);

    let object = node.new_object();
    assert_eq!(object.get_at("left").unwrap(), Value::Absent);
    assert_eq!(object.get_at("right").unwrap(), Value::Absent);
    object.set_at("left.right.value", Value::from(5)).unwrap();
    assert_eq!(object.get_at("left.value").unwrap(), Value::from(0));
    assert_eq!(object.get_at("left.right.value").unwrap(), Value::from(5));
    assert_eq!(object.get_at("left.left").unwrap(), Value::Absent);
    assert_eq!(node_ref, node);
}

#[test]
fn a_reference_to_an_unknown_id_fails_on_use() {
    let dictionary = DictionaryStore::root().new_dictionary(Some("tests.dangling")).unwrap();
    let dangling = dictionary.reference_to("Ghost");
    assert!(dangling.assert_valid_definition().is_ok());
    assert!(matches!(dangling.resolve(), Err(MetatypeError::MissingDictionaryEntry(_))));
    let missing = DataType::reference("X", DictionaryReference::local("tests.no.such.dictionary"));
    assert!(matches!(missing.resolve(), Err(MetatypeError::MissingDictionaryEntry(_))));
}

struct FakeContainer {
    dictionary: Arc<TypeDictionary>,
}

impl DictionaryContainer for FakeContainer {
    fn get_type_dictionary(&self, reference: &DictionaryReference) -> Result<Arc<TypeDictionary>> {
        if reference.dictionary_id() == self.dictionary.id() {
            Ok(Arc::clone(&self.dictionary))
        } else {
            Err(MetatypeError::MissingDictionaryEntry(reference.to_string()))
        }
    }
}

struct FakeResolver {
    container: Arc<FakeContainer>,
}

impl RemoteDictionaryContainerResolver for FakeResolver {
    fn get_remote_dictionary_container(&self, _reference: &DictionaryReference) -> Result<Arc<dyn DictionaryContainer>> {
        Ok(self.container.clone())
    }
}

#[test]
fn remote_references_go_through_the_registered_resolver() {
    let backing = DictionaryStore::root().new_dictionary(Some("tests.remote.backing")).unwrap();
    backing.put_type("Money", DataType::simple(SimpleKind::Decimal)).unwrap();
    let container = Arc::new(FakeContainer { dictionary: backing });
    DictionaryStore::register_resolver("fake", Arc::new(FakeResolver { container }));

    let money = DataType::reference("Money", DictionaryReference::remote("fake://ledger", "tests.remote.backing"));
    assert_eq!(money.resolve().unwrap(), DataType::simple(SimpleKind::Decimal));
    let wallet = DataType::structure(vec![Field::new("balance", money)]).new_object();
    wallet.set_from_string_at("balance", "10.50").unwrap();
    assert_eq!(wallet.get_as_string_at("balance", Some(".1")).unwrap(), "10.5");

    let elsewhere = DataType::reference("Money", DictionaryReference::remote("fake://ledger", "tests.remote.other"));
    assert!(matches!(elsewhere.resolve(), Err(MetatypeError::MissingDictionaryEntry(_))));
    let unregistered = DataType::reference("Money", DictionaryReference::remote("other://x", "tests.remote.backing"));
    assert!(matches!(unregistered.resolve(), Err(MetatypeError::MissingDictionaryEntry(_))));
}
