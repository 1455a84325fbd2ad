//! Attribute groups and typed parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interpretation of a parameter without special meaning.
pub const INTERPRETATION_NONE: &str = "None";
/// Interpretation marking a parameter as a reference to a resource.
pub const INTERPRETATION_RESOURCE_REF: &str = "Resource-Ref";
/// Interpretation marking a parameter as a reference to an order.
pub const INTERPRETATION_ORDER_REF: &str = "Order-Ref";
/// Interpretation marking a parameter as a reference to an activity.
pub const INTERPRETATION_ACTIVITY_REF: &str = "Activity-Ref";
/// Unit of measure for parameters without one.
pub const UOM_NONE: &str = "None";

/// The value held by a [`Parameter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ParameterValue {
    /// Text value.
    String(String),
    /// Signed integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Boolean flag.
    Boolean(bool),
    /// Ordered list of strings.
    StringList(Vec<String>),
}

impl ParameterValue {
    /// Returns the value as a string slice if it is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A single typed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Identifier, unique within its bag.
    pub id: String,
    /// Display name.
    pub name: String,
    /// The value.
    pub value: ParameterValue,
    /// How the value is to be read; see the `INTERPRETATION_*` constants.
    #[serde(default = "default_none")]
    pub interpretation: String,
    /// Unit of measure. For references this holds the target type.
    #[serde(default = "default_none")]
    pub uom: String,
}

fn default_none() -> String {
    INTERPRETATION_NONE.to_string()
}

impl Parameter {
    /// Creates a parameter with no interpretation and no unit.
    pub fn new(id: impl Into<String>, name: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
            interpretation: INTERPRETATION_NONE.to_string(),
            uom: UOM_NONE.to_string(),
        }
    }

    /// Creates a reference parameter pointing at `target_type/target_id`.
    pub fn reference(
        id: impl Into<String>,
        interpretation: &str,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            value: ParameterValue::String(target_id.into()),
            interpretation: interpretation.to_string(),
            uom: target_type.into(),
        }
    }

    /// Sets the interpretation.
    #[must_use]
    pub fn with_interpretation(mut self, interpretation: impl Into<String>) -> Self {
        self.interpretation = interpretation.into();
        self
    }

    /// Sets the unit of measure.
    #[must_use]
    pub fn with_uom(mut self, uom: impl Into<String>) -> Self {
        self.uom = uom.into();
        self
    }
}

/// A named group of parameters attached to a root element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBag {
    /// Identifier, unique within its element.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Bag type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Parameters keyed by id.
    #[serde(default)]
    pub parameters: BTreeMap<String, Parameter>,
}

impl ParameterBag {
    /// Creates an empty bag.
    pub fn new(id: impl Into<String>, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_name: type_name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Adds or replaces a parameter.
    pub fn put(&mut self, parameter: Parameter) {
        self.parameters.insert(parameter.id.clone(), parameter);
    }

    /// Returns a parameter by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Parameter> {
        self.parameters.get(id)
    }

    /// Builder variant of [`ParameterBag::put`].
    #[must_use]
    pub fn with(mut self, parameter: Parameter) -> Self {
        self.put(parameter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_parameter_layout() {
        let p = Parameter::reference("car", INTERPRETATION_RESOURCE_REF, "Car", "c1");
        assert_eq!(p.uom, "Car");
        assert_eq!(p.value.as_str(), Some("c1"));
        assert_eq!(p.interpretation, INTERPRETATION_RESOURCE_REF);
    }

    #[test]
    fn bag_put_replaces() {
        let mut bag = ParameterBag::new("specs", "Specs", "Specs");
        bag.put(Parameter::new("w", "Weight", ParameterValue::Float(1.0)));
        bag.put(Parameter::new("w", "Weight", ParameterValue::Float(2.0)));
        assert_eq!(bag.parameters.len(), 1);
        assert_eq!(bag.get("w").unwrap().value, ParameterValue::Float(2.0));
    }

    #[test]
    fn missing_interpretation_defaults_to_none() {
        let json = r#"{"id":"a","name":"A","value":{"kind":"Integer","value":3}}"#;
        let p: Parameter = serde_json::from_str(json).unwrap();
        assert_eq!(p.interpretation, INTERPRETATION_NONE);
        assert_eq!(p.uom, UOM_NONE);
    }
}
