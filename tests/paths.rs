use metatype::{
    DataPath, DataType, DictionaryStore, Field, Getter, MetatypeError, Setter, SimpleKind, TypeFactory, Value,
};

fn person() -> DataType {
    DataType::structure(vec![
        Field::new("name", DataType::simple(SimpleKind::String)),
        Field::new("age", DataType::simple(SimpleKind::Integer)),
        Field::new(
            "address",
            DataType::structure(vec![
                Field::new("street", DataType::simple(SimpleKind::String)),
                Field::new("city", DataType::simple(SimpleKind::String)),
            ]),
        ),
        Field::new("phones", DataType::list(DataType::simple(SimpleKind::String))),
        Field::new("scores", DataType::map(DataType::simple(SimpleKind::Double))),
    ])
}

#[test]
fn struct_defaults_and_string_access() {
    let object = person().new_object();
    assert_eq!(object.get_at("name").unwrap(), Value::from(""));
    assert_eq!(object.get_at("age").unwrap(), Value::from(0));
    object.set_from_string_at("age", "42").unwrap();
    assert_eq!(object.get_as_string_at("age", None).unwrap(), "42");
    assert_eq!(object.get_at("age").unwrap(), Value::from(42));
}

#[test]
fn list_starts_empty_and_grows_by_add() {
    let object = DataType::list(DataType::simple(SimpleKind::String)).new_object();
    assert_eq!(object.size().unwrap(), 0);
    object.add_element("", Some(Value::from("a"))).unwrap();
    assert_eq!(object.size().unwrap(), 1);
    assert_eq!(object.get_at("[0]").unwrap(), Value::from("a"));
}

#[test]
fn what_is_set_is_what_is_read() {
    let object = person().new_object();
    let writes = [
        ("name", Value::from("Grace")),
        ("address.city", Value::from("Arlington")),
        ("phones[2]", Value::from("555-0100")),
        ("scores.math", Value::from(9.5)),
    ];
    for (path, value) in &writes {
        object.set_at(path, value.clone()).unwrap();
    }
    for (path, value) in &writes {
        assert_eq!(&object.get_at(path).unwrap(), value, "reading back {}", path);
    }
    // every name or index the object reports can be written and read back
    for name in object.map_element_names_at("scores").unwrap() {
        let path = format!("scores.{}", name);
        object.set_at(&path, Value::from(1.0)).unwrap();
        assert_eq!(object.get_at(&path).unwrap(), Value::from(1.0));
    }
    for i in 0..object.size_at("phones").unwrap() {
        let path = format!("phones[{}]", i);
        object.set_at(&path, Value::from(format!("n{}", i))).unwrap();
        assert_eq!(object.get_at(&path).unwrap(), Value::from(format!("n{}", i)));
    }
}

#[test]
fn reading_past_the_end_leaves_the_list_alone() {
    let object = person().new_object();
    object.add_element("phones", Some(Value::from("first"))).unwrap();
    assert_eq!(object.get_at("phones[5]").unwrap(), Value::from(""));
    assert_eq!(object.size_at("phones").unwrap(), 1);
}

#[test]
fn writing_past_the_end_pads_with_defaults() {
    let object = person().new_object();
    object.set_at("phones[3]", Value::from("last")).unwrap();
    assert_eq!(object.size_at("phones").unwrap(), 4);
    for i in 0..3 {
        assert_eq!(object.get_at(&format!("phones[{}]", i)).unwrap(), Value::from(""));
    }
}

#[test]
fn element_names_follow_declaration_and_key_order() {
    let object = person().new_object();
    assert_eq!(
        object.map_element_names().unwrap(),
        vec!["name", "age", "address", "phones", "scores"]
    );
    object.set_at("scores.zeta", Value::from(1.0)).unwrap();
    object.set_at("scores.alpha", Value::from(2.0)).unwrap();
    assert_eq!(object.map_element_names_at("scores").unwrap(), vec!["alpha", "zeta"]);
    assert_eq!(object.size_at("scores").unwrap(), 2);
    assert!(matches!(object.size_at("name"), Err(MetatypeError::UnsupportedOperation(_))));
}

#[test]
fn malformed_and_mismatched_paths() {
    let object = person().new_object();
    for path in ["nope", "name.first", "name[0]", "phones.first", "address[1]", "phones[x]", "phones[", "a..b"] {
        let err = object.get_at(path).unwrap_err();
        assert!(matches!(err, MetatypeError::InvalidPath { .. }), "{} gave {}", path, err);
    }
    assert!(DataPath::parse("").unwrap().is_root());
}

#[test]
fn views_share_their_parent_value() {
    let object = person().new_object();
    let address = object.data_setter("address").unwrap();
    address.set_at("city", Value::from("Oslo")).unwrap();
    assert_eq!(object.get_at("address.city").unwrap(), Value::from("Oslo"));

    object.set_at("address.street", Value::from("Main St")).unwrap();
    assert_eq!(address.get_at("street").unwrap(), Value::from("Main St"));

    let phone = object.data_setter("phones[1]").unwrap();
    phone.set(Value::from("555")).unwrap();
    assert_eq!(object.size_at("phones").unwrap(), 2);
    assert_eq!(object.data_getter("phones").unwrap().get_at("[1]").unwrap(), Value::from("555"));
    assert_eq!(phone.data_type(), &DataType::simple(SimpleKind::String));
}

#[test]
fn removing_elements() {
    let object = person().new_object();
    object.set_at("scores.a", Value::from(1.0)).unwrap();
    object.add_element("phones", Some(Value::from("x"))).unwrap();
    object.add_element("phones", None).unwrap();
    assert_eq!(object.remove_element("scores.a").unwrap(), Value::from(1.0));
    assert_eq!(object.size_at("scores").unwrap(), 0);
    assert_eq!(object.remove_element("phones[0]").unwrap(), Value::from("x"));
    assert_eq!(object.size_at("phones").unwrap(), 1);
    assert!(matches!(object.remove_element("name"), Err(MetatypeError::UnsupportedOperation(_))));
    assert!(matches!(object.add_element("name", None), Err(MetatypeError::UnsupportedOperation(_))));
}

#[test]
fn set_rejects_values_of_the_wrong_kind() {
    let object = person().new_object();
    let err = object.set_at("age", Value::from("forty")).unwrap_err();
    assert!(matches!(err, MetatypeError::InvalidValue { .. }));
    assert_eq!(object.get_at("age").unwrap(), Value::from(0));
    let err = object.add_element("phones", Some(Value::from(3))).unwrap_err();
    assert!(matches!(err, MetatypeError::InvalidValue { .. }));
}

#[test]
fn the_largest_index_is_an_invalid_path() {
    let object = DataType::list(DataType::simple(SimpleKind::Integer)).new_object();
    let last = format!("[{}]", usize::MAX);
    let err = object.set_at(&last, Value::from(1)).unwrap_err();
    assert!(matches!(err, MetatypeError::InvalidPath { .. }));
    assert_eq!(object.get_at(&last).unwrap(), Value::from(0));
    assert_eq!(object.size().unwrap(), 0);
}

#[test]
fn a_value_can_be_written_into_its_own_subtree() {
    let dictionary = DictionaryStore::root().new_dictionary(Some("tests.paths.chain")).unwrap();
    let factory = TypeFactory::with_dictionary(dictionary);
    let chain = factory
        .declare_struct(vec![
            Field::new("v", factory.simple(SimpleKind::Integer)),
            Field::new("next", factory.declare_reference("Chain").unwrap()),
            Field::new("seen", factory.declare_list(factory.declare_reference("Chain").unwrap()).unwrap()),
        ])
        .unwrap();
    factory.register("Chain", chain.clone()).unwrap();

    let n = chain.new_object();
    n.set_at("v", Value::from(1)).unwrap();
    n.set_at("next", n.get().unwrap()).unwrap();
    n.add_element("seen", Some(n.get().unwrap())).unwrap();
    n.data_setter("next").unwrap().set_at("next", n.get().unwrap()).unwrap();

    n.set_at("v", Value::from(2)).unwrap();
    assert_eq!(n.get_at("next.v").unwrap(), Value::from(1));
    assert_eq!(n.get_at("next.next.v").unwrap(), Value::from(1));
    assert_eq!(n.get_at("next.next.next.v").unwrap(), Value::from(1));
    assert_eq!(n.get_at("next.next.next.next").unwrap(), Value::Absent);
    assert_eq!(n.get_at("seen[0].next.v").unwrap(), Value::from(1));
    assert_eq!(n.size_at("seen").unwrap(), 1);
    assert_eq!(n.size_at("next.seen").unwrap(), 0);
    n.assert_valid_data().unwrap();
}
