use metatype::{DataType, DictionaryStore, Field, Getter, Setter, SimpleKind, Value};

fn nested() -> DataType {
    let line = DataType::structure(vec![
        Field::new("sku", DataType::simple(SimpleKind::String)),
        Field::new("tags", DataType::list(DataType::simple(SimpleKind::String))),
    ]);
    DataType::structure(vec![
        Field::new("lines", DataType::list(line)),
        Field::new("notes", DataType::map(DataType::simple(SimpleKind::String))),
    ])
}

#[test]
fn copies_and_originals_are_independent_at_every_depth() {
    let original = nested().new_object();
    original.set_at("lines[0].sku", Value::from("A")).unwrap();
    original.set_at("lines[0].tags[0]", Value::from("red")).unwrap();
    original.set_at("notes.gift", Value::from("yes")).unwrap();

    let copy = original.deep_copy().unwrap();
    assert_eq!(copy.get().unwrap(), original.get().unwrap());

    copy.set_at("lines[0].tags[0]", Value::from("blue")).unwrap();
    copy.set_at("notes.gift", Value::from("no")).unwrap();
    copy.add_element("lines", None).unwrap();
    assert_eq!(original.get_at("lines[0].tags[0]").unwrap(), Value::from("red"));
    assert_eq!(original.get_at("notes.gift").unwrap(), Value::from("yes"));
    assert_eq!(original.size_at("lines").unwrap(), 1);

    original.set_at("lines[0].sku", Value::from("B")).unwrap();
    assert_eq!(copy.get_at("lines[0].sku").unwrap(), Value::from("A"));
}

#[test]
fn copy_of_a_view_is_detached_from_the_parent() {
    let original = nested().new_object();
    original.set_at("lines[0].sku", Value::from("A")).unwrap();
    let line = original.data_getter("lines[0]").unwrap().deep_copy().unwrap();
    line.set_at("sku", Value::from("Z")).unwrap();
    assert_eq!(original.get_at("lines[0].sku").unwrap(), Value::from("A"));
    assert_eq!(line.get_at("sku").unwrap(), Value::from("Z"));
}

#[test]
fn recursive_tree_through_two_dictionaries() {
    let d0 = DictionaryStore::root().new_dictionary(Some("tests.tree.d0")).unwrap();
    let d1 = d0.new_dictionary(Some("tests.tree.d1")).unwrap();
    d1.put_type(
        "Tree",
        DataType::structure(vec![
            Field::new("value", DataType::simple(SimpleKind::Integer)),
            Field::new("left", d1.reference_to("Tree")),
            Field::new("right", d1.reference_to("Tree")),
        ]),
    )
    .unwrap();
    let tree = d1.get_type("Tree").unwrap();
    let root = tree.new_object();
    root.set_at("value", Value::from(1)).unwrap();
    root.set_at("left.value", Value::from(2)).unwrap();
    root.set_at("right.value", Value::from(3)).unwrap();
    assert_eq!(root.get_at("left.left").unwrap(), Value::Absent);

    let copy = root.deep_copy().unwrap();
    for path in ["value", "left.value", "right.value", "left.left", "right.right"] {
        assert_eq!(copy.get_at(path).unwrap(), root.get_at(path).unwrap(), "{}", path);
    }
    copy.set_at("left.value", Value::from(20)).unwrap();
    assert_eq!(root.get_at("left.value").unwrap(), Value::from(2));
    root.assert_valid_data().unwrap();
    copy.assert_valid_data().unwrap();
}
