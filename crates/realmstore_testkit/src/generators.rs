//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data that respects the
//! model's invariants.

use proptest::prelude::*;
use realmstore_model::{
    ElementKind, Locator, LogMessage, LogSeverity, Parameter, ParameterBag, ParameterValue,
    Resource,
};
use std::collections::BTreeMap;

/// Strategy for generating a single locator segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_.-]{0,11}").expect("Invalid regex")
}

/// Strategy for generating element types.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Item", "Machine", "Person", "Location"]).prop_map(String::from)
}

/// Strategy for generating element kinds.
pub fn kind_strategy() -> impl Strategy<Value = ElementKind> {
    prop::sample::select(ElementKind::ALL.to_vec())
}

/// Strategy for generating element locators, optionally pointing into a bag.
pub fn locator_strategy() -> impl Strategy<Value = Locator> {
    (
        kind_strategy(),
        type_name_strategy(),
        segment_strategy(),
        prop::option::of(segment_strategy()),
    )
        .prop_map(|(kind, type_name, id, bag)| {
            let locator = Locator::for_element(kind, &type_name, &id);
            match bag {
                Some(bag) => locator
                    .append("Bag")
                    .and_then(|l| l.append(bag))
                    .expect("Generated segments are valid"),
                None => locator,
            }
        })
}

/// Strategy for generating parameter values.
pub fn parameter_value_strategy() -> impl Strategy<Value = ParameterValue> {
    prop_oneof![
        "[a-z ]{0,16}".prop_map(ParameterValue::String),
        any::<i64>().prop_map(ParameterValue::Integer),
        (-1.0e6f64..1.0e6).prop_map(ParameterValue::Float),
        any::<bool>().prop_map(ParameterValue::Boolean),
        prop::collection::vec("[a-z]{1,6}", 0..4).prop_map(ParameterValue::StringList),
    ]
}

/// Strategy for generating a resource with up to two bags.
pub fn resource_strategy() -> impl Strategy<Value = Resource> {
    (
        type_name_strategy(),
        segment_strategy(),
        prop::collection::btree_map(
            "[a-z]{1,6}",
            prop::collection::btree_map("[a-z]{1,6}", parameter_value_strategy(), 0..4),
            0..3,
        ),
    )
        .prop_map(|(type_name, id, bags)| {
            let mut resource = Resource::new(id.clone(), id, type_name);
            for (bag_id, params) in bags {
                let mut bag = ParameterBag::new(bag_id.clone(), bag_id, "Parameters");
                for (param_id, value) in params {
                    bag.put(Parameter::new(param_id.clone(), param_id, value));
                }
                resource = resource.with_bag(bag);
            }
            resource
        })
}

/// Strategy for generating resources with unique `(type, id)` pairs.
pub fn unique_resources_strategy(max: usize) -> impl Strategy<Value = Vec<Resource>> {
    prop::collection::vec(resource_strategy(), 0..max).prop_map(|resources| {
        let mut unique = BTreeMap::new();
        for r in resources {
            unique.entry((r.type_name.clone(), r.id.clone())).or_insert(r);
        }
        unique.into_values().collect()
    })
}

/// Strategy for generating log messages of one realm.
pub fn log_message_strategy(realm: &'static str) -> impl Strategy<Value = LogMessage> {
    (
        locator_strategy(),
        prop::sample::select(vec![
            LogSeverity::Info,
            LogSeverity::Notification,
            LogSeverity::Warning,
            LogSeverity::Error,
        ]),
        "[a-z]{1,8}(\\.[a-z]{1,8}){0,2}",
    )
        .prop_map(move |(locator, severity, key)| {
            LogMessage::new(realm, "alice", locator, severity, key.clone(), key)
        })
}
