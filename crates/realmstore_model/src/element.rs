//! Root elements: resources, orders and activities.

use crate::error::ModelError;
use crate::locator::Locator;
use crate::parameter::{Parameter, ParameterBag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Element type used for templates. A template's id is the type it templates.
pub const TEMPLATE: &str = "Template";

/// The closed set of root element kinds.
///
/// The kind's tag doubles as the observer subscription key and as the first
/// locator segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// Things: machines, people, stock locations.
    Resource,
    /// Documents with a lifecycle state.
    Order,
    /// Plans made of actions on resources.
    Activity,
}

impl ElementKind {
    /// All kinds, in preload order.
    pub const ALL: [ElementKind; 3] = [Self::Resource, Self::Order, Self::Activity];

    /// Returns the tag string for this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Resource => "Resource",
            Self::Order => "Order",
            Self::Activity => "Activity",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ElementKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Resource" => Ok(Self::Resource),
            "Order" => Ok(Self::Order),
            "Activity" => Ok(Self::Activity),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// The kind of mutation applied to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// The element was added.
    Add,
    /// The element was modified.
    Modify,
    /// The element was removed.
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of orders, activities and actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    /// Newly created.
    #[default]
    Created,
    /// Planned for execution.
    Planned,
    /// Currently executing.
    Execution,
    /// Execution stopped.
    Stopped,
    /// Execution failed.
    Error,
    /// Execution finished.
    Executed,
    /// Closed, no further changes expected.
    Closed,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Resource {}
    impl Sealed for super::Order {}
    impl Sealed for super::Activity {}
}

/// Capabilities shared by the three root element kinds.
///
/// Sealed: the set of kinds is closed.
pub trait RootElement:
    Clone + fmt::Debug + PartialEq + Send + Sync + 'static + sealed::Sealed
{
    /// The kind implemented by this type.
    const KIND: ElementKind;

    /// Returns the id, unique per type within a realm.
    fn id(&self) -> &str;
    /// Returns the display name.
    fn name(&self) -> &str;
    /// Returns the element type.
    fn type_name(&self) -> &str;
    /// Returns the version, incremented on every committed update.
    fn version(&self) -> u64;
    /// Sets the version.
    fn set_version(&mut self, version: u64);
    /// Returns the attribute groups.
    fn bags(&self) -> &BTreeMap<String, ParameterBag>;
    /// Returns the attribute groups mutably.
    fn bags_mut(&mut self) -> &mut BTreeMap<String, ParameterBag>;
    /// Wraps this element in the [`Element`] variant.
    fn into_element(self) -> Element;
    /// Unwraps an [`Element`] of this kind.
    fn from_element(element: Element) -> Option<Self>;

    /// Returns the locator `<kind>/<type>/<id>`.
    fn locator(&self) -> Locator {
        Locator::for_element(Self::KIND, self.type_name(), self.id())
    }

    /// Returns a bag by id.
    fn bag(&self, id: &str) -> Option<&ParameterBag> {
        self.bags().get(id)
    }

    /// Returns a parameter by bag and parameter id.
    fn parameter(&self, bag_id: &str, param_id: &str) -> Option<&Parameter> {
        self.bag(bag_id).and_then(|b| b.get(param_id))
    }

    /// Adds or replaces a bag.
    fn put_bag(&mut self, bag: ParameterBag) {
        self.bags_mut().insert(bag.id.clone(), bag);
    }
}

macro_rules! impl_root_element {
    ($ty:ident, $kind:ident) => {
        impl RootElement for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn type_name(&self) -> &str {
                &self.type_name
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }

            fn bags(&self) -> &BTreeMap<String, ParameterBag> {
                &self.bags
            }

            fn bags_mut(&mut self) -> &mut BTreeMap<String, ParameterBag> {
                &mut self.bags
            }

            fn into_element(self) -> Element {
                Element::$kind(self)
            }

            fn from_element(element: Element) -> Option<Self> {
                match element {
                    Element::$kind(e) => Some(e),
                    _ => None,
                }
            }
        }

        impl $ty {
            /// Builder variant of [`RootElement::put_bag`].
            #[must_use]
            pub fn with_bag(mut self, bag: ParameterBag) -> Self {
                self.put_bag(bag);
                self
            }
        }
    };
}

/// A thing: a machine, a person, a stock location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Version counter.
    #[serde(default)]
    pub version: u64,
    /// Attribute groups keyed by bag id.
    #[serde(default)]
    pub bags: BTreeMap<String, ParameterBag>,
}

impl Resource {
    /// Creates a resource without bags.
    pub fn new(id: impl Into<String>, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_name: type_name.into(),
            version: 0,
            bags: BTreeMap::new(),
        }
    }
}

/// A document with a lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Order type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Version counter.
    #[serde(default)]
    pub version: u64,
    /// Lifecycle state.
    #[serde(default)]
    pub state: State,
    /// Attribute groups keyed by bag id.
    #[serde(default)]
    pub bags: BTreeMap<String, ParameterBag>,
}

impl Order {
    /// Creates an order in state [`State::Created`].
    pub fn new(id: impl Into<String>, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_name: type_name.into(),
            version: 0,
            state: State::Created,
            bags: BTreeMap::new(),
        }
    }
}

/// A single step of an activity, performed on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identifier, unique within the activity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Action type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Type of the resource this action works on.
    pub resource_type: String,
    /// Id of the resource this action works on.
    pub resource_id: String,
    /// Lifecycle state.
    #[serde(default)]
    pub state: State,
}

impl Action {
    /// Creates an action bound to `resource_type/resource_id`.
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            type_name: type_name.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            state: State::Created,
        }
    }
}

/// A plan made of actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Activity type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Version counter.
    #[serde(default)]
    pub version: u64,
    /// Lifecycle state.
    #[serde(default)]
    pub state: State,
    /// Attribute groups keyed by bag id.
    #[serde(default)]
    pub bags: BTreeMap<String, ParameterBag>,
    /// Ordered actions.
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Activity {
    /// Creates an activity without actions.
    pub fn new(id: impl Into<String>, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_name: type_name.into(),
            version: 0,
            state: State::Created,
            bags: BTreeMap::new(),
            actions: Vec::new(),
        }
    }

    /// Appends an action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Returns an action by id.
    #[must_use]
    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }
}

impl_root_element!(Resource, Resource);
impl_root_element!(Order, Order);
impl_root_element!(Activity, Activity);

/// Any root element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Element {
    /// A resource.
    Resource(Resource),
    /// An order.
    Order(Order),
    /// An activity.
    Activity(Activity),
}

impl Element {
    /// Returns the kind of the wrapped element.
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Resource(_) => ElementKind::Resource,
            Self::Order(_) => ElementKind::Order,
            Self::Activity(_) => ElementKind::Activity,
        }
    }

    /// Returns the id of the wrapped element.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Resource(e) => e.id(),
            Self::Order(e) => e.id(),
            Self::Activity(e) => e.id(),
        }
    }

    /// Returns the type of the wrapped element.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Resource(e) => e.type_name(),
            Self::Order(e) => e.type_name(),
            Self::Activity(e) => e.type_name(),
        }
    }

    /// Returns the version of the wrapped element.
    #[must_use]
    pub fn version(&self) -> u64 {
        match self {
            Self::Resource(e) => e.version(),
            Self::Order(e) => e.version(),
            Self::Activity(e) => e.version(),
        }
    }

    /// Returns the bags of the wrapped element.
    #[must_use]
    pub fn bags(&self) -> &BTreeMap<String, ParameterBag> {
        match self {
            Self::Resource(e) => e.bags(),
            Self::Order(e) => e.bags(),
            Self::Activity(e) => e.bags(),
        }
    }

    /// Returns the locator of the wrapped element.
    #[must_use]
    pub fn locator(&self) -> Locator {
        Locator::for_element(self.kind(), self.type_name(), self.id())
    }

    /// Returns the resource if this is one.
    #[must_use]
    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the order if this is one.
    #[must_use]
    pub fn as_order(&self) -> Option<&Order> {
        match self {
            Self::Order(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the activity if this is one.
    #[must_use]
    pub fn as_activity(&self) -> Option<&Activity> {
        match self {
            Self::Activity(a) => Some(a),
            _ => None,
        }
    }
}
