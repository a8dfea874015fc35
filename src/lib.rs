//! Metatype – a runtime type and schema engine.
//!
//! Metatype describes structured data as immutable metadata and lets you
//! build, navigate, validate, convert and persist values that conform to it.
//! It is meant to sit underneath schema-driven form engines, configuration
//! validators and generic object mappers: anything that has to deal with
//! data whose shape is only known at runtime.
//!
//! The central concept is the [`datatype::DataType`], a closed set of kinds:
//! * `Simple` – strings, integers, longs, doubles, decimals and booleans.
//! * `Date` – an instant, written as ISO-8601 with millisecond precision.
//! * `Enumerated` – a fixed, ordered set of string choices.
//! * `List` and `Map` – one element type for every position or key.
//! * `Struct` – an ordered set of named fields, each with an optional initial value.
//! * `Reference` – a type id looked up in a [`dictionary::TypeDictionary`],
//!   which is how recursive schemas are declared.
//!
//! Types are shared through `Arc` and never change once built; adding a
//! validator or a converter produces a new type.
//!
//! ## Modules
//! * [`path`] – The path grammar (`orders[2].lines[0].amount`), parsed with pest.
//! * [`value`] – The raw [`value::Value`] representation.
//! * [`datatype`] – Types, their defaults, validation, copying, string
//!   conversion and path resolution.
//! * [`convert`] – Pluggable validators and converters, and the error recorder.
//! * [`dictionary`] – Hierarchical type registries and the process-wide store.
//! * [`factory`] – Checked declaration of new types.
//! * [`object`] – Getter/setter wrappers pairing a type with a value,
//!   including batch updates from strings.
//! * [`bootstrap`] – The schema of schemas, used to persist and restore
//!   types and whole dictionaries.
//! * [`settings`] – Engine settings and their process-wide installation.
//!
//! ## Values and aliasing
//! Lists, maps and structs are shared nodes. A view obtained with
//! [`object::Getter::data_getter`] or [`object::Setter::data_setter`] looks
//! into the value of its parent, so changes made through one are seen by the
//! other. Only [`object::Getter::deep_copy`] produces an independent value.
//!
//! ## Dictionaries
//! Every dictionary descends from the immutable root dictionary, which holds
//! the built-in scalar types. A child dictionary can override ids of its
//! parent; types of the parent that reference back into the parent are
//! copied into the child when it is created, so that such overrides reach
//! them as well.
//!
//! ## Quick Start
//! ```
//! use metatype::{DataType, Field, Getter, Setter, SimpleKind, Value};
//! let person = DataType::structure(vec![
//!     Field::new("name", DataType::simple(SimpleKind::String)),
//!     Field::new("age", DataType::simple(SimpleKind::Integer)),
//! ]);
//! let alice = person.new_object();
//! alice.set_from_string_at("age", "42").unwrap();
//! alice.set_at("name", Value::from("Alice")).unwrap();
//! assert_eq!(alice.get_as_string_at("age", None).unwrap(), "42");
//! assert_eq!(alice.get_at("age").unwrap(), Value::from(42));
//! ```

pub mod bootstrap;
pub mod convert;
pub mod datatype;
pub mod dictionary;
pub mod error;
pub mod factory;
pub mod object;
pub mod path;
pub mod settings;
pub mod value;

pub use convert::{Conversion, Converter, ErrorRecorder, FnConverter, Recorder, Validator};
pub use datatype::{DataType, Field, SimpleKind, TypeCode, TypeKind};
pub use dictionary::{DictionaryReference, DictionaryStore, TypeDictionary};
pub use error::{MetatypeError, Result};
pub use factory::TypeFactory;
pub use object::{DataObject, EditableDataObject, Getter, Setter};
pub use path::{DataPath, Segment};
pub use settings::EngineConfig;
pub use value::Value;
