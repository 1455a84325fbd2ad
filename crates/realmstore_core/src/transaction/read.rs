//! Read operations of a transaction.

use super::Transaction;
use crate::command::RealmElement;
use crate::error::{CoreError, CoreResult};
use realmstore_model::{
    AccessType, Action, Activity, Audit, Element, ElementKind, Locator, Order, Parameter,
    ParameterBag, Resource, RootElement, INTERPRETATION_ACTIVITY_REF, INTERPRETATION_ORDER_REF,
    INTERPRETATION_RESOURCE_REF, TEMPLATE,
};

/// Result of [`Transaction::find_element`].
#[derive(Debug, Clone, PartialEq)]
pub enum FoundElement {
    /// A root element.
    Element(Element),
    /// A parameter bag of a root element.
    Bag(ParameterBag),
    /// A single parameter.
    Parameter(Parameter),
}

const BAG_SEGMENT: &str = "Bag";

impl Transaction<'_> {
    fn get_by<T: RealmElement>(&mut self, type_name: &str, id: &str) -> CoreResult<Option<T>> {
        let found = match self.cache.get::<T>(type_name, id) {
            Some(hit) => Some(hit),
            None => {
                let found = T::map(self.realm).get(type_name, id)?;
                if let Some(element) = &found {
                    self.cache.put(element);
                }
                found
            }
        };
        if let Some(element) = &found {
            self.realm.stats().record_read();
            self.audit_read(element);
        }
        Ok(found)
    }

    fn get_by_or_fail<T: RealmElement>(&mut self, type_name: &str, id: &str) -> CoreResult<T> {
        self.get_by::<T>(type_name, id)?.ok_or_else(|| {
            CoreError::not_found(format!(
                "{} does not exist",
                Locator::for_element(T::KIND, type_name, id)
            ))
        })
    }

    fn stream<T: RealmElement>(&mut self, types: &[&str]) -> CoreResult<Vec<T>> {
        let map = T::map(self.realm);
        let types: Vec<String> = if types.is_empty() {
            map.types()?.into_iter().collect()
        } else {
            types.iter().map(|t| (*t).to_string()).collect()
        };
        let mut elements = Vec::new();
        for type_name in &types {
            elements.extend(map.get_all(type_name)?);
        }
        for element in &elements {
            self.realm.stats().record_read();
            self.audit_read(element);
        }
        Ok(elements)
    }

    fn template<T: RealmElement>(&mut self, type_name: &str) -> CoreResult<Option<T>> {
        self.get_by::<T>(TEMPLATE, type_name)
    }

    fn template_or_fail<T: RealmElement>(&mut self, type_name: &str) -> CoreResult<T> {
        self.template::<T>(type_name)?.ok_or_else(|| {
            CoreError::not_found(format!("no {} template for type {type_name}", T::KIND))
        })
    }

    fn by_ref<T: RealmElement>(
        &mut self,
        parameter: &Parameter,
        interpretation: &str,
    ) -> CoreResult<Option<T>> {
        if parameter.interpretation != interpretation {
            return Err(CoreError::validation(format!(
                "parameter {} is not a {interpretation} reference but {}",
                parameter.id, parameter.interpretation
            )));
        }
        let Some(id) = parameter.value.as_str() else {
            return Err(CoreError::validation(format!(
                "reference parameter {} does not hold a string id",
                parameter.id
            )));
        };
        if id.is_empty() {
            return Ok(None);
        }
        self.get_by::<T>(&parameter.uom, id)
    }

    fn audit_read<T: RootElement>(&mut self, element: &T) {
        if self.realm.config().audit_trail_for_read {
            self.read_audits.push(Audit::new(
                self.realm.name(),
                &self.credential.username,
                T::KIND.tag(),
                element.type_name(),
                element.id(),
                AccessType::Read,
                &self.action,
            ));
        }
    }

    // === Resources ===

    /// Returns the resource `type_name/id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_resource_by(&mut self, type_name: &str, id: &str) -> CoreResult<Option<Resource>> {
        self.get_by(type_name, id)
    }

    /// Returns the resource `type_name/id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if it does not exist.
    pub fn get_resource_by_or_fail(&mut self, type_name: &str, id: &str) -> CoreResult<Resource> {
        self.get_by_or_fail(type_name, id)
    }

    /// Returns true if the resource exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn has_resource(&self, type_name: &str, id: &str) -> CoreResult<bool> {
        self.realm.resources().contains(type_name, id)
    }

    /// Returns the resources of the given types, or of every type if
    /// `types` is empty.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn stream_resources(&mut self, types: &[&str]) -> CoreResult<Vec<Resource>> {
        self.stream(types)
    }

    /// Returns a copy of the resource template for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_resource_template(&mut self, type_name: &str) -> CoreResult<Option<Resource>> {
        self.template(type_name)
    }

    /// Like [`get_resource_template`](Self::get_resource_template), but a
    /// missing template is an error.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if there is no template.
    pub fn get_resource_template_or_fail(&mut self, type_name: &str) -> CoreResult<Resource> {
        self.template_or_fail(type_name)
    }

    /// Resolves a `Resource-Ref` parameter.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `parameter` is not a resource reference.
    pub fn get_resource_by_ref(&mut self, parameter: &Parameter) -> CoreResult<Option<Resource>> {
        self.by_ref(parameter, INTERPRETATION_RESOURCE_REF)
    }

    /// Returns the resource an action works on.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_resource_for(&mut self, action: &Action) -> CoreResult<Option<Resource>> {
        self.get_by(&action.resource_type, &action.resource_id)
    }

    // === Orders ===

    /// Returns the order `type_name/id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_order_by(&mut self, type_name: &str, id: &str) -> CoreResult<Option<Order>> {
        self.get_by(type_name, id)
    }

    /// Returns the order `type_name/id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if it does not exist.
    pub fn get_order_by_or_fail(&mut self, type_name: &str, id: &str) -> CoreResult<Order> {
        self.get_by_or_fail(type_name, id)
    }

    /// Returns true if the order exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn has_order(&self, type_name: &str, id: &str) -> CoreResult<bool> {
        self.realm.orders().contains(type_name, id)
    }

    /// Returns the orders of the given types, or all of them.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn stream_orders(&mut self, types: &[&str]) -> CoreResult<Vec<Order>> {
        self.stream(types)
    }

    /// Returns a copy of the order template for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_order_template(&mut self, type_name: &str) -> CoreResult<Option<Order>> {
        self.template(type_name)
    }

    /// Returns a copy of the order template for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if there is no template.
    pub fn get_order_template_or_fail(&mut self, type_name: &str) -> CoreResult<Order> {
        self.template_or_fail(type_name)
    }

    /// Resolves an `Order-Ref` parameter.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `parameter` is not an order reference.
    pub fn get_order_by_ref(&mut self, parameter: &Parameter) -> CoreResult<Option<Order>> {
        self.by_ref(parameter, INTERPRETATION_ORDER_REF)
    }

    // === Activities ===

    /// Returns the activity `type_name/id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_activity_by(&mut self, type_name: &str, id: &str) -> CoreResult<Option<Activity>> {
        self.get_by(type_name, id)
    }

    /// Returns the activity `type_name/id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if it does not exist.
    pub fn get_activity_by_or_fail(&mut self, type_name: &str, id: &str) -> CoreResult<Activity> {
        self.get_by_or_fail(type_name, id)
    }

    /// Returns true if the activity exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn has_activity(&self, type_name: &str, id: &str) -> CoreResult<bool> {
        self.realm.activities().contains(type_name, id)
    }

    /// Returns the activities of the given types, or all of them.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn stream_activities(&mut self, types: &[&str]) -> CoreResult<Vec<Activity>> {
        self.stream(types)
    }

    /// Returns a copy of the activity template for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get_activity_template(&mut self, type_name: &str) -> CoreResult<Option<Activity>> {
        self.template(type_name)
    }

    /// Returns a copy of the activity template for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if there is no template.
    pub fn get_activity_template_or_fail(&mut self, type_name: &str) -> CoreResult<Activity> {
        self.template_or_fail(type_name)
    }

    /// Resolves an `Activity-Ref` parameter.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `parameter` is not an activity
    /// reference.
    pub fn get_activity_by_ref(&mut self, parameter: &Parameter) -> CoreResult<Option<Activity>> {
        self.by_ref(parameter, INTERPRETATION_ACTIVITY_REF)
    }

    // === Locators ===

    /// Resolves a locator of the shape `Kind/Type/Id`, `Kind/Type/Id/Bag/<bag>`
    /// or `Kind/Type/Id/Bag/<bag>/<param>`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the locator has another shape or any
    /// part of it does not exist.
    pub fn find_element(&mut self, locator: &Locator) -> CoreResult<FoundElement> {
        let not_found = || CoreError::not_found(format!("nothing at {locator}"));
        let segments = locator.segments();
        if segments.len() < 3 || segments.len() == 4 || segments.len() > 6 {
            return Err(not_found());
        }
        if segments.len() > 3 && segments[3] != BAG_SEGMENT {
            return Err(not_found());
        }

        let kind = locator.kind().ok_or_else(not_found)?;
        let (type_name, id) = (segments[1].as_str(), segments[2].as_str());
        let element = match kind {
            ElementKind::Resource => self.get_by::<Resource>(type_name, id)?.map(Resource::into_element),
            ElementKind::Order => self.get_by::<Order>(type_name, id)?.map(Order::into_element),
            ElementKind::Activity => self.get_by::<Activity>(type_name, id)?.map(Activity::into_element),
        }
        .ok_or_else(not_found)?;

        match segments {
            [_, _, _] => Ok(FoundElement::Element(element)),
            [_, _, _, _, bag] => element
                .bags()
                .get(bag)
                .cloned()
                .map(FoundElement::Bag)
                .ok_or_else(not_found),
            [_, _, _, _, bag, param] => element
                .bags()
                .get(bag)
                .and_then(|b| b.get(param))
                .cloned()
                .map(FoundElement::Parameter)
                .ok_or_else(not_found),
            _ => Err(not_found()),
        }
    }

    // === Audits ===

    /// Returns the recorded audits, optionally for one element kind tag.
    ///
    /// The query itself is audited as a read of element type `Audit`
    /// unless [`set_suppress_audits_for_audits`](Self::set_suppress_audits_for_audits)
    /// is set.
    pub fn query_audits(&mut self, element_type: Option<&str>) -> Vec<Audit> {
        let audits = self.realm.audit_trail().query(element_type);
        if !self.suppress_audits_for_audits {
            self.read_audits.push(Audit::new(
                self.realm.name(),
                &self.credential.username,
                "Audit",
                element_type.unwrap_or("*"),
                "query",
                AccessType::Read,
                &self.action,
            ));
        }
        audits
    }
}
