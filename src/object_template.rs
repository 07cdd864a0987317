//! Object Templates
//!
//! Templates declare the shape of objects the embedder hands to script:
//! plain properties and accessors applied to every instance, named and
//! indexed interceptors, internal-field slots and a class name.
//!
//! Instantiation follows the interceptor state. A template without
//! interceptors produces an ordinary object. With interceptors, the
//! instance is wrapped in a host proxy whose traps dispatch back into the
//! callbacks installed here; the configured trap set is exactly the subset
//! implied by which interceptor slots are non-null. Each instance carries
//! its own [`InstanceRecord`], a copy of the interceptor slots and
//! internal-field reservation taken at instantiation time, riding on the
//! instance as external data.
//!
//! Trap bodies never panic and never surface internal host errors to the
//! engine: a trap that fails internally logs the error and answers with its
//! neutral sentinel (`undefined` for reads, `false` for writes and
//! deletes). A pending script exception thrown by a user callback is the
//! one error that propagates unchanged.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::handles::{HandleScope, Local};
use crate::jsrt::{
    CallContext, ExternalValue, JsError, JsResult, JsValueType, PropertyId, Rooted, Runtime,
    ValueRef,
};
use crate::traps::{self, classify_key, KeyClass, ProxyTrap, TrapHandlers};
use crate::utils::{self, DescriptorOption};
use crate::value::{ok_or_log, Array, Object, String, Value};

// ---- attributes ----

/// Attribute bits restricting a declared property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAttribute(u32);

impl PropertyAttribute {
    /// No restrictions
    pub const NONE: PropertyAttribute = PropertyAttribute(0);
    /// The property cannot be written
    pub const READ_ONLY: PropertyAttribute = PropertyAttribute(1);
    /// The property is skipped by enumeration
    pub const DONT_ENUM: PropertyAttribute = PropertyAttribute(2);
    /// The property cannot be deleted or reconfigured
    pub const DONT_DELETE: PropertyAttribute = PropertyAttribute(4);

    /// Whether every bit of `other` is set in `self`
    pub fn contains(self, other: PropertyAttribute) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bit value
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Default for PropertyAttribute {
    fn default() -> Self {
        PropertyAttribute::NONE
    }
}

impl std::ops::BitOr for PropertyAttribute {
    type Output = PropertyAttribute;

    fn bitor(self, other: PropertyAttribute) -> PropertyAttribute {
        PropertyAttribute(self.0 | other.0)
    }
}

// ---- callback signatures ----

/// Reads an intercepted named property; `None` reads as `undefined`
pub type NamedPropertyGetterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    Local<'s, Value>,
    &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>>;

/// Writes an intercepted named property; `None` reports the write as
/// unhandled
pub type NamedPropertySetterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    Local<'s, Value>,
    Local<'s, Value>,
    &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>>;

/// Reports the attributes of an intercepted named property
pub type NamedPropertyQueryCallback = for<'s> fn(
    &mut HandleScope<'s>,
    Local<'s, Value>,
    &PropertyCallbackInfo<'s>,
) -> Option<PropertyAttribute>;

/// Deletes an intercepted named property; `None` falls back to the
/// ordinary delete
pub type NamedPropertyDeleterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    Local<'s, Value>,
    &PropertyCallbackInfo<'s>,
) -> Option<bool>;

/// Lists the named keys an interceptor exposes
pub type NamedPropertyEnumeratorCallback =
    for<'s> fn(&mut HandleScope<'s>, &PropertyCallbackInfo<'s>) -> Option<Local<'s, Array>>;

/// Reads an intercepted indexed property
pub type IndexedPropertyGetterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    u32,
    &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>>;

/// Writes an intercepted indexed property
pub type IndexedPropertySetterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    u32,
    Local<'s, Value>,
    &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>>;

/// Reports the attributes of an intercepted indexed property
pub type IndexedPropertyQueryCallback =
    for<'s> fn(&mut HandleScope<'s>, u32, &PropertyCallbackInfo<'s>) -> Option<PropertyAttribute>;

/// Deletes an intercepted indexed property
pub type IndexedPropertyDeleterCallback =
    for<'s> fn(&mut HandleScope<'s>, u32, &PropertyCallbackInfo<'s>) -> Option<bool>;

/// Lists the indexed keys an interceptor exposes
pub type IndexedPropertyEnumeratorCallback =
    for<'s> fn(&mut HandleScope<'s>, &PropertyCallbackInfo<'s>) -> Option<Local<'s, Array>>;

/// Getter half of a declared accessor property
pub type AccessorGetterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    Local<'s, String>,
    &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>>;

/// Setter half of a declared accessor property
pub type AccessorSetterCallback = for<'s> fn(
    &mut HandleScope<'s>,
    Local<'s, String>,
    Local<'s, Value>,
    &PropertyCallbackInfo<'s>,
);

/// Body of a native function created through the bridge
pub type FunctionCallback = for<'s> fn(
    &mut HandleScope<'s>,
    &FunctionCallbackInfo<'s>,
) -> Option<Local<'s, Value>>;

/// Context handed to property interceptor and accessor callbacks
pub struct PropertyCallbackInfo<'s> {
    pub(crate) this: Local<'s, Object>,
    pub(crate) data: Local<'s, Value>,
}

impl<'s> PropertyCallbackInfo<'s> {
    /// The receiver of the intercepted operation
    pub fn this(&self) -> Local<'s, Object> {
        self.this
    }

    /// The data value supplied when the handler was installed, or
    /// `undefined`
    pub fn data(&self) -> Local<'s, Value> {
        self.data
    }
}

/// Context handed to function callbacks
pub struct FunctionCallbackInfo<'s> {
    pub(crate) this: Local<'s, Object>,
    pub(crate) callee: Local<'s, crate::value::Function>,
    pub(crate) data: Local<'s, Value>,
    pub(crate) args: Vec<Local<'s, Value>>,
    pub(crate) is_construct: bool,
    pub(crate) undefined: Local<'s, Value>,
}

impl<'s> FunctionCallbackInfo<'s> {
    /// The receiver of the call
    pub fn this(&self) -> Local<'s, Object> {
        self.this
    }

    /// The function object being invoked
    pub fn callee(&self) -> Local<'s, crate::value::Function> {
        self.callee
    }

    /// The data value bound to the function template, or `undefined`
    pub fn data(&self) -> Local<'s, Value> {
        self.data
    }

    /// Number of arguments passed by the caller
    pub fn length(&self) -> usize {
        self.args.len()
    }

    /// The argument at `index`; `undefined` past the end
    pub fn get(&self, index: usize) -> Local<'s, Value> {
        self.args.get(index).copied().unwrap_or(self.undefined)
    }

    /// Whether the function was invoked with construct semantics
    pub fn is_construct_call(&self) -> bool {
        self.is_construct
    }
}

// ---- handler configurations ----

/// Interceptor slots for named property traffic
#[derive(Default, Clone, Copy)]
pub struct NamedPropertyHandlerConfiguration {
    /// Intercepts reads
    pub getter: Option<NamedPropertyGetterCallback>,
    /// Intercepts writes
    pub setter: Option<NamedPropertySetterCallback>,
    /// Reports property attributes
    pub query: Option<NamedPropertyQueryCallback>,
    /// Intercepts deletions
    pub deleter: Option<NamedPropertyDeleterCallback>,
    /// Lists intercepted keys
    pub enumerator: Option<NamedPropertyEnumeratorCallback>,
}

/// Interceptor slots for indexed property traffic
#[derive(Default, Clone, Copy)]
pub struct IndexedPropertyHandlerConfiguration {
    /// Intercepts reads
    pub getter: Option<IndexedPropertyGetterCallback>,
    /// Intercepts writes
    pub setter: Option<IndexedPropertySetterCallback>,
    /// Reports property attributes
    pub query: Option<IndexedPropertyQueryCallback>,
    /// Intercepts deletions
    pub deleter: Option<IndexedPropertyDeleterCallback>,
    /// Lists intercepted keys
    pub enumerator: Option<IndexedPropertyEnumeratorCallback>,
}

impl NamedPropertyHandlerConfiguration {
    fn is_empty(&self) -> bool {
        self.getter.is_none()
            && self.setter.is_none()
            && self.query.is_none()
            && self.deleter.is_none()
            && self.enumerator.is_none()
    }
}

impl IndexedPropertyHandlerConfiguration {
    fn is_empty(&self) -> bool {
        self.getter.is_none()
            && self.setter.is_none()
            && self.query.is_none()
            && self.deleter.is_none()
            && self.enumerator.is_none()
    }
}

// ---- template and instance state ----

/// Mutable template definition, carried as external data on the template
/// object
pub(crate) struct ObjectTemplateData {
    class_name: RefCell<Option<std::string::String>>,
    named: Cell<NamedPropertyHandlerConfiguration>,
    indexed: Cell<IndexedPropertyHandlerConfiguration>,
    named_data: RefCell<Option<Rooted>>,
    indexed_data: RefCell<Option<Rooted>>,
    internal_field_count: Cell<usize>,
    override_to_string: Cell<bool>,
    /// Host object holding the declared properties; cloned onto every
    /// instance
    properties: Rooted,
}

/// Per-instance snapshot of the interceptor slots, riding on the instance
/// as external data
///
/// Later template mutations do not affect objects already instantiated.
pub(crate) struct InstanceRecord {
    named: NamedPropertyHandlerConfiguration,
    indexed: IndexedPropertyHandlerConfiguration,
    named_data: Option<Rooted>,
    indexed_data: Option<Rooted>,
    internal_fields: RefCell<Vec<Option<Rooted>>>,
}

impl InstanceRecord {
    fn named_data_value(&self, rt: &Runtime) -> ValueRef {
        self.named_data
            .as_ref()
            .map(Rooted::value)
            .unwrap_or(rt.undefined_value())
    }

    fn indexed_data_value(&self, rt: &Runtime) -> ValueRef {
        self.indexed_data
            .as_ref()
            .map(Rooted::value)
            .unwrap_or(rt.undefined_value())
    }
}

fn template_data(rt: &Runtime, template: ValueRef) -> Option<Rc<ObjectTemplateData>> {
    let data = rt.external_data(template).ok()??;
    data.downcast::<ObjectTemplateData>().ok()
}

/// The instance record of a template-made object, following the wrapper's
/// prototype link when the handle fronts a proxy
pub(crate) fn instance_record(rt: &Runtime, object: ValueRef) -> Option<Rc<InstanceRecord>> {
    if let Some(record) = record_of(rt, object) {
        return Some(record);
    }
    let prototype = rt.get_prototype(object).ok()?;
    record_of(rt, prototype)
}

fn record_of(rt: &Runtime, value: ValueRef) -> Option<Rc<InstanceRecord>> {
    let data = rt.external_data(value).ok()??;
    data.downcast::<InstanceRecord>().ok()
}

/// The class name declared on a template, if any
pub(crate) fn template_class_name(rt: &Runtime, template: ValueRef) -> Option<std::string::String> {
    let data = template_data(rt, template)?;
    let name = data.class_name.borrow().clone();
    name
}

// ---- internal fields ----

pub(crate) fn internal_field_count(scope: &HandleScope<'_>, object: Local<'_, Object>) -> usize {
    instance_record(scope.rt, object.raw())
        .map(|record| record.internal_fields.borrow().len())
        .unwrap_or(0)
}

pub(crate) fn get_internal_field<'t>(
    scope: &mut HandleScope<'t>,
    object: Local<'_, Object>,
    index: usize,
) -> Option<Local<'t, Value>> {
    let record = instance_record(scope.rt, object.raw())?;
    let raw = {
        let fields = record.internal_fields.borrow();
        fields
            .get(index)
            .and_then(|slot| slot.as_ref().map(Rooted::value))
            .unwrap_or(scope.rt.undefined_value())
    };
    Some(scope.local(raw))
}

pub(crate) fn set_internal_field(
    scope: &mut HandleScope<'_>,
    object: Local<'_, Object>,
    index: usize,
    value: Local<'_, Value>,
) -> bool {
    let Some(record) = instance_record(scope.rt, object.raw()) else {
        return false;
    };
    if index >= record.internal_fields.borrow().len() {
        return false;
    }
    let Some(root) = ok_or_log(scope.rt.root(value.raw()), "internal field store") else {
        return false;
    };
    record.internal_fields.borrow_mut()[index] = Some(root);
    true
}

// ---- the template surface ----

/// Declares the shape of objects created from it
pub struct ObjectTemplate(());

impl ObjectTemplate {
    /// Creates an empty template in the current context
    pub fn new<'s>(scope: &mut HandleScope<'s>) -> Option<Local<'s, ObjectTemplate>> {
        let raw = ok_or_log(new_template_cell(scope.rt), "object template creation")?;
        Some(scope.local(raw))
    }
}

pub(crate) fn new_template_cell(rt: &mut Runtime) -> JsResult<ValueRef> {
    let properties = rt.create_object()?;
    let properties = rt.root(properties)?;
    let data: ExternalValue = Rc::new(ObjectTemplateData {
        class_name: RefCell::new(None),
        named: Cell::new(NamedPropertyHandlerConfiguration::default()),
        indexed: Cell::new(IndexedPropertyHandlerConfiguration::default()),
        named_data: RefCell::new(None),
        indexed_data: RefCell::new(None),
        internal_field_count: Cell::new(0),
        override_to_string: Cell::new(false),
        properties,
    });
    rt.create_external(data, None)
}

impl<'s> Local<'s, ObjectTemplate> {
    fn data(self, scope: &HandleScope<'_>) -> Option<Rc<ObjectTemplateData>> {
        let data = template_data(scope.rt, self.raw());
        if data.is_none() {
            debug!("template operation on a non-template object");
        }
        data
    }

    /// Installs the named-property interceptors
    ///
    /// `data` is handed to every callback through
    /// [`PropertyCallbackInfo::data`]; the latest installation wins.
    pub fn set_named_property_handler(
        self,
        scope: &mut HandleScope<'_>,
        config: NamedPropertyHandlerConfiguration,
        data: Option<Local<'_, Value>>,
    ) {
        let Some(template) = self.data(scope) else {
            return;
        };
        template.named.set(config);
        let rooted =
            data.and_then(|value| ok_or_log(scope.rt.root(value.raw()), "interceptor data"));
        *template.named_data.borrow_mut() = rooted;
    }

    /// Installs the indexed-property interceptors
    pub fn set_indexed_property_handler(
        self,
        scope: &mut HandleScope<'_>,
        config: IndexedPropertyHandlerConfiguration,
        data: Option<Local<'_, Value>>,
    ) {
        let Some(template) = self.data(scope) else {
            return;
        };
        template.indexed.set(config);
        let rooted =
            data.and_then(|value| ok_or_log(scope.rt.root(value.raw()), "interceptor data"));
        *template.indexed_data.borrow_mut() = rooted;
    }

    /// Reserves internal-field slots on future instances
    pub fn set_internal_field_count(self, scope: &mut HandleScope<'_>, count: usize) {
        if let Some(template) = self.data(scope) {
            template.internal_field_count.set(count);
        }
    }

    /// Sets the class name future instances report as their constructor
    pub fn set_class_name(self, scope: &mut HandleScope<'_>, name: Local<'_, String>) {
        let Some(template) = self.data(scope) else {
            return;
        };
        let Some(name) = ok_or_log(scope.rt.string_content(name.raw()), "class name") else {
            return;
        };
        *template.class_name.borrow_mut() = Some(name.to_string());
    }

    /// Makes instances front their proxy with a plain wrapper object, so
    /// script can shadow `toString` and friends on the instance itself
    pub fn set_supports_override_to_string(self, scope: &mut HandleScope<'_>, supports: bool) {
        if let Some(template) = self.data(scope) {
            template.override_to_string.set(supports);
        }
    }

    /// Declares a data property stamped onto every instance
    pub fn set(
        self,
        scope: &mut HandleScope<'_>,
        name: Local<'_, String>,
        value: Local<'_, Value>,
        attributes: PropertyAttribute,
    ) {
        let Some(template) = self.data(scope) else {
            return;
        };
        let holder = template.properties.value();
        let result =
            define_template_property(scope.rt, holder, name.raw(), value.raw(), attributes);
        if let Err(error) = result {
            debug!("template property declaration failed: {}", error);
        }
    }

    /// Declares an accessor property stamped onto every instance
    ///
    /// `READ_ONLY` is meaningless for accessors and ignored; the other
    /// attribute bits apply.
    pub fn set_accessor(
        self,
        scope: &mut HandleScope<'_>,
        name: Local<'_, String>,
        getter: AccessorGetterCallback,
        setter: Option<AccessorSetterCallback>,
        data: Option<Local<'_, Value>>,
        attributes: PropertyAttribute,
    ) {
        let Some(template) = self.data(scope) else {
            return;
        };
        let holder = template.properties.value();
        let result = define_template_accessor(
            scope.rt,
            holder,
            name.raw(),
            getter,
            setter,
            data.map(|value| value.raw()),
            attributes,
        );
        if let Err(error) = result {
            debug!("template accessor declaration failed: {}", error);
        }
    }

    /// Builds an instance in the current context
    pub fn new_instance(self, scope: &mut HandleScope<'s>) -> Option<Local<'s, Object>> {
        let raw = ok_or_log(instantiate(scope.rt, self.raw(), None), "template instantiation")?;
        Some(scope.local(raw))
    }
}

pub(crate) fn define_template_property(
    rt: &mut Runtime,
    holder: ValueRef,
    name: ValueRef,
    value: ValueRef,
    attributes: PropertyAttribute,
) -> JsResult<()> {
    let name = rt.to_string(name)?;
    let writable = !attributes.contains(PropertyAttribute::READ_ONLY);
    let enumerable = !attributes.contains(PropertyAttribute::DONT_ENUM);
    let configurable = !attributes.contains(PropertyAttribute::DONT_DELETE);
    let defined = match classify_key(&name) {
        KeyClass::Indexed(index) => rt.define_indexed_data_property(
            holder,
            index,
            value,
            writable,
            enumerable,
            configurable,
        )?,
        KeyClass::Named => rt.define_data_property(
            holder,
            PropertyId::from_name(&name),
            value,
            writable,
            enumerable,
            configurable,
        )?,
    };
    if defined {
        Ok(())
    } else {
        Err(JsError::InvalidArgument("template property was rejected"))
    }
}

fn define_template_accessor(
    rt: &mut Runtime,
    holder: ValueRef,
    name: ValueRef,
    getter: AccessorGetterCallback,
    setter: Option<AccessorSetterCallback>,
    data: Option<ValueRef>,
    attributes: PropertyAttribute,
) -> JsResult<()> {
    let name = rt.to_string(name)?;
    let rooted = match data {
        Some(value) => Some(rt.root(value)?),
        None => None,
    };
    let state: ExternalValue = Rc::new(AccessorState {
        getter,
        setter,
        data: rooted,
        name: name.to_string(),
    });
    let get_fn = utils::create_function_with_state(rt, "get", accessor_get, Rc::clone(&state))?;
    let set_fn = match setter {
        Some(_) => Some(utils::create_function_with_state(rt, "set", accessor_set, state)?),
        None => None,
    };
    let descriptor = rt.create_object()?;
    let ids = (rt.ids.get, rt.ids.set, rt.ids.enumerable, rt.ids.configurable);
    rt.set_property(descriptor, ids.0, get_fn)?;
    if let Some(set_fn) = set_fn {
        rt.set_property(descriptor, ids.1, set_fn)?;
    }
    let enumerable = rt.boolean_value(!attributes.contains(PropertyAttribute::DONT_ENUM));
    rt.set_property(descriptor, ids.2, enumerable)?;
    let configurable = rt.boolean_value(!attributes.contains(PropertyAttribute::DONT_DELETE));
    rt.set_property(descriptor, ids.3, configurable)?;
    utils::define_property(rt, holder, &name, descriptor)
}

// ---- instantiation ----

/// Builds an object from the template, optionally under an explicit
/// prototype
///
/// The instance record is attached first, then the prototype, then the
/// proxy wrap when interceptors are present (fronted by a plain wrapper
/// when `toString` overriding is on), and finally the declared properties
/// and class name are applied to the result.
pub(crate) fn instantiate(
    rt: &mut Runtime,
    template: ValueRef,
    prototype: Option<ValueRef>,
) -> JsResult<ValueRef> {
    let data =
        template_data(rt, template).ok_or(JsError::InvalidArgument("not an object template"))?;
    let named = data.named.get();
    let indexed = data.indexed.get();
    let record: ExternalValue = Rc::new(InstanceRecord {
        named,
        indexed,
        named_data: data.named_data.borrow().clone(),
        indexed_data: data.indexed_data.borrow().clone(),
        internal_fields: RefCell::new(vec![None; data.internal_field_count.get()]),
    });
    let instance = rt.create_external(record, None)?;
    if let Some(prototype) = prototype {
        rt.set_prototype(instance, prototype)?;
    }
    let mut result = instance;
    if !named.is_empty() || !indexed.is_empty() {
        let handlers = select_traps(&named, &indexed);
        let config = traps::create_proxy_trap_config(rt, &handlers)?;
        result = traps::create_proxy(rt, instance, config)?;
        if data.override_to_string.get() {
            let wrapper = rt.create_object()?;
            rt.set_prototype(wrapper, result)?;
            result = wrapper;
        }
    }
    utils::copy_properties(rt, data.properties.value(), result)?;
    let class_name = data.class_name.borrow().clone();
    if let Some(class_name) = class_name {
        install_constructor(rt, result, &class_name)?;
    }
    debug!(
        "template instantiated: intercepted={} internal_fields={}",
        !named.is_empty() || !indexed.is_empty(),
        data.internal_field_count.get()
    );
    Ok(result)
}

/// The trap subset implied by the installed interceptor slots
fn select_traps(
    named: &NamedPropertyHandlerConfiguration,
    indexed: &IndexedPropertyHandlerConfiguration,
) -> TrapHandlers {
    let getter = named.getter.is_some() || indexed.getter.is_some();
    let setter = named.setter.is_some() || indexed.setter.is_some();
    let deleter = named.deleter.is_some() || indexed.deleter.is_some();
    let query = named.query.is_some() || indexed.query.is_some();
    let enumerator = named.enumerator.is_some() || indexed.enumerator.is_some();
    let mut handlers = TrapHandlers::default();
    if getter {
        handlers.get = Some(get_trap);
    }
    if setter {
        handlers.set = Some(set_trap);
    }
    if deleter {
        handlers.delete_property = Some(delete_property_trap);
    }
    if enumerator {
        handlers.enumerate = Some(enumerate_trap);
        handlers.own_keys = Some(own_keys_trap);
    }
    if enumerator || query {
        handlers.has = Some(has_trap);
        handlers.has_own = Some(has_own_trap);
    }
    if query || getter {
        handlers.get_own_property_descriptor = Some(get_own_property_descriptor_trap);
    }
    handlers
}

fn install_constructor(rt: &mut Runtime, object: ValueRef, class_name: &str) -> JsResult<()> {
    let constructor = rt.create_function("", constructor_stub)?;
    let constructor_id = rt.ids.constructor;
    rt.define_data_property(object, constructor_id, constructor, true, false, true)?;
    utils::set_constructor_name(rt, object, class_name)
}

fn constructor_stub(rt: &mut Runtime, _cx: &CallContext) -> JsResult<ValueRef> {
    Ok(rt.undefined_value())
}

// ---- trap bodies ----

fn require_record(rt: &Runtime, target: ValueRef) -> JsResult<Rc<InstanceRecord>> {
    instance_record(rt, target).ok_or(JsError::InvalidArgument("interceptor record is missing"))
}

/// Converts a trap outcome into the value handed back to the engine
///
/// Internal failures are logged and answered with the trap's sentinel; a
/// pending script exception propagates.
fn settle(trap: ProxyTrap, result: JsResult<ValueRef>, sentinel: ValueRef) -> JsResult<ValueRef> {
    match result {
        Ok(value) => Ok(value),
        Err(JsError::ScriptException) => Err(JsError::ScriptException),
        Err(error) => {
            debug!("{} trap failed: {}", trap.name(), error);
            Ok(sentinel)
        }
    }
}

pub(crate) fn check_exception(rt: &Runtime) -> JsResult<()> {
    if rt.has_exception() {
        return Err(JsError::ScriptException);
    }
    Ok(())
}

fn get_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let key = cx.arg_or(1, rt.undefined_value());
    let result = get_trap_body(rt, target, key);
    let sentinel = rt.undefined_value();
    settle(ProxyTrap::Get, result, sentinel)
}

/// Get: the getter for the key's class wins outright; its unset result
/// reads as `undefined`. Only an absent getter falls back to the target.
fn get_trap_body(rt: &mut Runtime, target: ValueRef, key: ValueRef) -> JsResult<ValueRef> {
    let record = require_record(rt, target)?;
    let name = rt.to_string(key)?;
    match classify_key(&name) {
        KeyClass::Indexed(index) => match record.indexed.getter {
            Some(getter) => {
                let data = record.indexed_data_value(rt);
                invoke_indexed_getter(rt, getter, index, target, data)
            }
            None => rt.get_indexed(target, index),
        },
        KeyClass::Named => match record.named.getter {
            Some(getter) => {
                let data = record.named_data_value(rt);
                invoke_named_getter(rt, getter, &name, target, data)
            }
            None => rt.get_property(target, PropertyId::from_name(&name)),
        },
    }
}

fn set_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let key = cx.arg_or(1, rt.undefined_value());
    let value = cx.arg_or(2, rt.undefined_value());
    let result = set_trap_body(rt, target, key, value);
    let result = result.map(|handled| rt.boolean_value(handled));
    settle(ProxyTrap::Set, result, rt.boolean_value(false))
}

/// Set: a present setter consumes the write and reports whether it handled
/// it; with no setter the write goes to the target directly.
fn set_trap_body(
    rt: &mut Runtime,
    target: ValueRef,
    key: ValueRef,
    value: ValueRef,
) -> JsResult<bool> {
    let record = require_record(rt, target)?;
    let name = rt.to_string(key)?;
    match classify_key(&name) {
        KeyClass::Indexed(index) => match record.indexed.setter {
            Some(setter) => {
                let data = record.indexed_data_value(rt);
                invoke_indexed_setter(rt, setter, index, value, target, data)
            }
            None => {
                rt.set_indexed(target, index, value)?;
                Ok(true)
            }
        },
        KeyClass::Named => match record.named.setter {
            Some(setter) => {
                let data = record.named_data_value(rt);
                invoke_named_setter(rt, setter, &name, value, target, data)
            }
            None => {
                rt.set_property(target, PropertyId::from_name(&name), value)?;
                Ok(true)
            }
        },
    }
}

fn delete_property_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let key = cx.arg_or(1, rt.undefined_value());
    let result = delete_trap_body(rt, target, key);
    let result = result.map(|deleted| rt.boolean_value(deleted));
    settle(ProxyTrap::DeleteProperty, result, rt.boolean_value(false))
}

/// Delete: the deleter's verdict wins when it gives one; an unset result
/// falls back to the ordinary delete.
fn delete_trap_body(rt: &mut Runtime, target: ValueRef, key: ValueRef) -> JsResult<bool> {
    let record = require_record(rt, target)?;
    let name = rt.to_string(key)?;
    match classify_key(&name) {
        KeyClass::Indexed(index) => {
            if let Some(deleter) = record.indexed.deleter {
                let data = record.indexed_data_value(rt);
                if let Some(deleted) = invoke_indexed_deleter(rt, deleter, index, target, data)? {
                    return Ok(deleted);
                }
            }
            rt.delete_indexed(target, index)
        }
        KeyClass::Named => {
            if let Some(deleter) = record.named.deleter {
                let data = record.named_data_value(rt);
                if let Some(deleted) = invoke_named_deleter(rt, deleter, &name, target, data)? {
                    return Ok(deleted);
                }
            }
            rt.delete_property(target, PropertyId::from_name(&name))
        }
    }
}

fn has_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let key = cx.arg_or(1, rt.undefined_value());
    let result = has_trap_body(rt, target, key, false);
    let result = result.map(|found| rt.boolean_value(found));
    settle(ProxyTrap::Has, result, rt.boolean_value(false))
}

fn has_own_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let key = cx.arg_or(1, rt.undefined_value());
    let result = has_trap_body(rt, target, key, true);
    let result = result.map(|found| rt.boolean_value(found));
    settle(ProxyTrap::HasOwn, result, rt.boolean_value(false))
}

/// Has / HasOwn: a query answers with its attribute bits (nonzero means
/// present, and an unset result counts as present); failing that an
/// enumerator answers with a key scan, case-insensitive for named keys;
/// with neither installed the target answers, own-only for HasOwn.
fn has_trap_body(
    rt: &mut Runtime,
    target: ValueRef,
    key: ValueRef,
    own_only: bool,
) -> JsResult<bool> {
    let record = require_record(rt, target)?;
    let name = rt.to_string(key)?;
    match classify_key(&name) {
        KeyClass::Indexed(index) => {
            if let Some(query) = record.indexed.query {
                let data = record.indexed_data_value(rt);
                let attributes = invoke_indexed_query(rt, query, index, target, data)?;
                return Ok(attributes.map(|a| a.bits() != 0).unwrap_or(true));
            }
            if let Some(enumerator) = record.indexed.enumerator {
                let data = record.indexed_data_value(rt);
                let Some(keys) = invoke_enumerator(rt, enumerator, target, data)? else {
                    return Ok(false);
                };
                let key_value = rt.string_value(&name)?;
                return utils::is_value_in_array(rt, keys, key_value);
            }
            if own_only {
                rt.has_own_indexed(target, index)
            } else {
                rt.has_indexed(target, index)
            }
        }
        KeyClass::Named => {
            if let Some(query) = record.named.query {
                let data = record.named_data_value(rt);
                let attributes = invoke_named_query(rt, query, &name, target, data)?;
                return Ok(attributes.map(|a| a.bits() != 0).unwrap_or(true));
            }
            if let Some(enumerator) = record.named.enumerator {
                let data = record.named_data_value(rt);
                let Some(keys) = invoke_enumerator(rt, enumerator, target, data)? else {
                    return Ok(false);
                };
                let key_value = rt.string_value(&name)?;
                return utils::is_case_insensitive_string_value_in_array(rt, keys, key_value);
            }
            let id = PropertyId::from_name(&name);
            if own_only {
                rt.has_own_property(target, id)
            } else {
                rt.has_property(target, id)
            }
        }
    }
}

fn enumerate_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let result = keys_trap_body(rt, target, false);
    let sentinel = rt.undefined_value();
    settle(ProxyTrap::Enumerate, result, sentinel)
}

fn own_keys_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let result = keys_trap_body(rt, target, true);
    let sentinel = rt.undefined_value();
    settle(ProxyTrap::OwnKeys, result, sentinel)
}

/// Enumerate / OwnKeys: indexed keys then named keys, each list taken from
/// its enumerator when installed and from the target otherwise, behind a
/// fresh single-use iterator.
fn keys_trap_body(rt: &mut Runtime, target: ValueRef, own_only: bool) -> JsResult<ValueRef> {
    let record = require_record(rt, target)?;
    let indexed = match record.indexed.enumerator {
        Some(enumerator) => {
            let data = record.indexed_data_value(rt);
            match invoke_enumerator(rt, enumerator, target, data)? {
                Some(keys) => keys,
                None => rt.create_array(0)?,
            }
        }
        None if own_only => utils::get_indexed_own_keys(rt, target)?,
        None => utils::get_enumerable_indexed_properties(rt, target)?,
    };
    let named = match record.named.enumerator {
        Some(enumerator) => {
            let data = record.named_data_value(rt);
            match invoke_enumerator(rt, enumerator, target, data)? {
                Some(keys) => keys,
                None => rt.create_array(0)?,
            }
        }
        None if own_only => utils::get_named_own_keys(rt, target)?,
        None => utils::get_enumerable_named_properties(rt, target)?,
    };
    let keys = utils::concat_arrays(rt, indexed, named)?;
    utils::create_enumeration_iterator(rt, keys)
}

fn get_own_property_descriptor_trap(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let target = cx.arg_or(0, rt.undefined_value());
    let key = cx.arg_or(1, rt.undefined_value());
    let record = match require_record(rt, target) {
        Ok(record) => record,
        Err(error) => return descriptor_failure(rt, error),
    };
    let name = match rt.to_string(key) {
        Ok(name) => name,
        Err(error) => return descriptor_failure(rt, error),
    };
    let result = descriptor_trap_body(rt, &record, target, &name);
    let sentinel = rt.undefined_value();
    settle(ProxyTrap::GetOwnPropertyDescriptor, result, sentinel)
}

/// Failures before the key is even classified answer `false`; everything
/// past that point answers `undefined`.
fn descriptor_failure(rt: &mut Runtime, error: JsError) -> JsResult<ValueRef> {
    if matches!(error, JsError::ScriptException) {
        return Err(error);
    }
    debug!("getOwnPropertyDescriptor trap failed: {}", error);
    Ok(rt.boolean_value(false))
}

/// GetOwnPropertyDescriptor: with neither query nor getter for the key's
/// class the target's own descriptor passes through untouched. Otherwise a
/// descriptor is synthesized from the negated query bits and the getter's
/// value; a property whose bits are zero-or-absent and whose value is
/// `undefined` reports as absent.
fn descriptor_trap_body(
    rt: &mut Runtime,
    record: &InstanceRecord,
    target: ValueRef,
    name: &str,
) -> JsResult<ValueRef> {
    match classify_key(name) {
        KeyClass::Indexed(index) => {
            let query = record.indexed.query;
            let getter = record.indexed.getter;
            if query.is_none() && getter.is_none() {
                return rt.get_own_indexed_descriptor(target, index);
            }
            let data = record.indexed_data_value(rt);
            let attributes = match query {
                Some(query) => match invoke_indexed_query(rt, query, index, target, data)? {
                    Some(attributes) => Some(attributes),
                    None => return Ok(rt.undefined_value()),
                },
                None => None,
            };
            let value = match getter {
                Some(getter) => invoke_indexed_getter(rt, getter, index, target, data)?,
                None => rt.get_indexed(target, index)?,
            };
            synthesize_descriptor(rt, value, attributes)
        }
        KeyClass::Named => {
            let query = record.named.query;
            let getter = record.named.getter;
            if query.is_none() && getter.is_none() {
                return rt.get_own_property_descriptor(target, PropertyId::from_name(name));
            }
            let data = record.named_data_value(rt);
            let attributes = match query {
                Some(query) => match invoke_named_query(rt, query, name, target, data)? {
                    Some(attributes) => Some(attributes),
                    None => return Ok(rt.undefined_value()),
                },
                None => None,
            };
            let value = match getter {
                Some(getter) => invoke_named_getter(rt, getter, name, target, data)?,
                None => rt.get_property(target, PropertyId::from_name(name))?,
            };
            synthesize_descriptor(rt, value, attributes)
        }
    }
}

fn synthesize_descriptor(
    rt: &mut Runtime,
    value: ValueRef,
    attributes: Option<PropertyAttribute>,
) -> JsResult<ValueRef> {
    let bits = attributes.unwrap_or(PropertyAttribute::NONE);
    if bits.bits() == 0 && matches!(rt.type_of(value)?, JsValueType::Undefined) {
        return Ok(rt.undefined_value());
    }
    utils::create_property_descriptor(
        rt,
        Some(value),
        DescriptorOption::from(!bits.contains(PropertyAttribute::READ_ONLY)),
        DescriptorOption::from(!bits.contains(PropertyAttribute::DONT_ENUM)),
        DescriptorOption::from(!bits.contains(PropertyAttribute::DONT_DELETE)),
    )
}

// ---- callback invocation ----

fn invoke_named_getter(
    rt: &mut Runtime,
    getter: NamedPropertyGetterCallback,
    name: &str,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<ValueRef> {
    let mut scope = HandleScope::with_runtime(rt);
    let key_raw = scope.rt.string_value(name)?;
    let key: Local<'_, Value> = scope.local(key_raw);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let result = getter(&mut scope, key, &info);
    check_exception(scope.rt)?;
    Ok(result.map(|value| value.raw()).unwrap_or(scope.rt.undefined_value()))
}

fn invoke_indexed_getter(
    rt: &mut Runtime,
    getter: IndexedPropertyGetterCallback,
    index: u32,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<ValueRef> {
    let mut scope = HandleScope::with_runtime(rt);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let result = getter(&mut scope, index, &info);
    check_exception(scope.rt)?;
    Ok(result.map(|value| value.raw()).unwrap_or(scope.rt.undefined_value()))
}

fn invoke_named_setter(
    rt: &mut Runtime,
    setter: NamedPropertySetterCallback,
    name: &str,
    value: ValueRef,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<bool> {
    let mut scope = HandleScope::with_runtime(rt);
    let key_raw = scope.rt.string_value(name)?;
    let key: Local<'_, Value> = scope.local(key_raw);
    let value = scope.local(value);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let handled = setter(&mut scope, key, value, &info).is_some();
    check_exception(scope.rt)?;
    Ok(handled)
}

fn invoke_indexed_setter(
    rt: &mut Runtime,
    setter: IndexedPropertySetterCallback,
    index: u32,
    value: ValueRef,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<bool> {
    let mut scope = HandleScope::with_runtime(rt);
    let value = scope.local(value);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let handled = setter(&mut scope, index, value, &info).is_some();
    check_exception(scope.rt)?;
    Ok(handled)
}

fn invoke_named_query(
    rt: &mut Runtime,
    query: NamedPropertyQueryCallback,
    name: &str,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<Option<PropertyAttribute>> {
    let mut scope = HandleScope::with_runtime(rt);
    let key_raw = scope.rt.string_value(name)?;
    let key: Local<'_, Value> = scope.local(key_raw);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let attributes = query(&mut scope, key, &info);
    check_exception(scope.rt)?;
    Ok(attributes)
}

fn invoke_indexed_query(
    rt: &mut Runtime,
    query: IndexedPropertyQueryCallback,
    index: u32,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<Option<PropertyAttribute>> {
    let mut scope = HandleScope::with_runtime(rt);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let attributes = query(&mut scope, index, &info);
    check_exception(scope.rt)?;
    Ok(attributes)
}

fn invoke_named_deleter(
    rt: &mut Runtime,
    deleter: NamedPropertyDeleterCallback,
    name: &str,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<Option<bool>> {
    let mut scope = HandleScope::with_runtime(rt);
    let key_raw = scope.rt.string_value(name)?;
    let key: Local<'_, Value> = scope.local(key_raw);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let deleted = deleter(&mut scope, key, &info);
    check_exception(scope.rt)?;
    Ok(deleted)
}

fn invoke_indexed_deleter(
    rt: &mut Runtime,
    deleter: IndexedPropertyDeleterCallback,
    index: u32,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<Option<bool>> {
    let mut scope = HandleScope::with_runtime(rt);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let deleted = deleter(&mut scope, index, &info);
    check_exception(scope.rt)?;
    Ok(deleted)
}

/// Invokes a named or indexed enumerator; both share a signature. The
/// returned array is raw, `None` when the callback gave nothing back.
fn invoke_enumerator(
    rt: &mut Runtime,
    enumerator: NamedPropertyEnumeratorCallback,
    this: ValueRef,
    data: ValueRef,
) -> JsResult<Option<ValueRef>> {
    let mut scope = HandleScope::with_runtime(rt);
    let info = PropertyCallbackInfo {
        this: scope.local(this),
        data: scope.local(data),
    };
    let keys = enumerator(&mut scope, &info).map(|array| array.raw());
    check_exception(scope.rt)?;
    Ok(keys)
}

// ---- accessor thunks ----

struct AccessorState {
    getter: AccessorGetterCallback,
    setter: Option<AccessorSetterCallback>,
    data: Option<Rooted>,
    name: std::string::String,
}

fn accessor_state(rt: &mut Runtime, cx: &CallContext) -> JsResult<Rc<AccessorState>> {
    let data = utils::get_external_data(rt, cx.callee)?
        .ok_or(JsError::InvalidArgument("accessor state is missing"))?;
    data.downcast::<AccessorState>()
        .map_err(|_| JsError::InvalidArgument("accessor state is missing"))
}

fn accessor_get(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let state = accessor_state(rt, cx)?;
    let data = state
        .data
        .as_ref()
        .map(Rooted::value)
        .unwrap_or(rt.undefined_value());
    let mut scope = HandleScope::with_runtime(rt);
    let name_raw = scope.rt.string_value(&state.name)?;
    let name: Local<'_, String> = scope.local(name_raw);
    let info = PropertyCallbackInfo {
        this: scope.local(cx.this),
        data: scope.local(data),
    };
    let result = (state.getter)(&mut scope, name, &info);
    check_exception(scope.rt)?;
    Ok(result.map(|value| value.raw()).unwrap_or(scope.rt.undefined_value()))
}

fn accessor_set(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let state = accessor_state(rt, cx)?;
    let Some(setter) = state.setter else {
        return Ok(rt.undefined_value());
    };
    let value = cx.arg_or(0, rt.undefined_value());
    let data = state
        .data
        .as_ref()
        .map(Rooted::value)
        .unwrap_or(rt.undefined_value());
    let mut scope = HandleScope::with_runtime(rt);
    let name_raw = scope.rt.string_value(&state.name)?;
    let name: Local<'_, String> = scope.local(name_raw);
    let value = scope.local(value);
    let info = PropertyCallbackInfo {
        this: scope.local(cx.this),
        data: scope.local(data),
    };
    setter(&mut scope, name, value, &info);
    check_exception(scope.rt)?;
    Ok(scope.rt.undefined_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextScope};
    use crate::isolate::Isolate;
    use crate::value::{External, Integer, Number};

    fn with_scope<F>(f: F)
    where
        F: FnOnce(&mut HandleScope<'_>),
    {
        let mut isolate = Isolate::new();
        let mut scope = HandleScope::new(&mut isolate);
        let context = Context::new(&mut scope).unwrap();
        let mut scope = ContextScope::new(&mut scope, context);
        f(&mut scope);
    }

    fn key_text(scope: &mut HandleScope<'_>, key: Local<'_, Value>) -> std::string::String {
        key.to_rust_string_lossy(scope)
    }

    #[test]
    fn test_plain_template_makes_ordinary_objects() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let instance = template.new_instance(scope).unwrap();
            let key = String::new(scope, "field").unwrap();
            let value: Local<'_, Value> = Number::new(scope, 11.0).unwrap().into();
            assert_eq!(instance.set(scope, key.into(), value), Some(true));
            let read = instance.get(scope, key.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(11.0));
            assert_eq!(instance.internal_field_count(scope), 0);
            assert!(instance.get_internal_field(scope, 0).is_none());
        });
    }

    #[test]
    fn test_declared_properties_are_stamped_with_attributes() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let width = String::new(scope, "width").unwrap();
            let seven: Local<'_, Value> = Number::new(scope, 7.0).unwrap().into();
            template.set(scope, width, seven, PropertyAttribute::NONE);
            let kind = String::new(scope, "kind").unwrap();
            let fixed: Local<'_, Value> = String::new(scope, "fixed").unwrap().into();
            template.set(scope, kind, fixed, PropertyAttribute::READ_ONLY);

            let first = template.new_instance(scope).unwrap();
            let second = template.new_instance(scope).unwrap();

            let read = first.get(scope, width.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(7.0));

            // read-only writes fail silently and leave the value alone
            let other: Local<'_, Value> = String::new(scope, "other").unwrap().into();
            first.set(scope, kind.into(), other);
            let kept = first.get(scope, kind.into()).unwrap();
            assert_eq!(kept.to_rust_string_lossy(scope), "fixed");

            // instances do not share property storage
            let nine: Local<'_, Value> = Number::new(scope, 9.0).unwrap().into();
            first.set(scope, width.into(), nine);
            let untouched = second.get(scope, width.into()).unwrap();
            assert_eq!(untouched.number_value(scope), Some(7.0));
        });
    }

    #[test]
    fn test_internal_fields_are_per_instance() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_internal_field_count(scope, 2);
            let first = template.new_instance(scope).unwrap();
            let second = template.new_instance(scope).unwrap();
            assert_eq!(first.internal_field_count(scope), 2);

            let marker: Local<'_, Value> = Number::new(scope, 42.0).unwrap().into();
            assert!(first.set_internal_field(scope, 0, marker));
            assert!(!first.set_internal_field(scope, 2, marker));

            let stored = first.get_internal_field(scope, 0).unwrap();
            assert_eq!(stored.number_value(scope), Some(42.0));
            let empty = second.get_internal_field(scope, 0).unwrap();
            assert!(empty.is_undefined(scope));
        });
    }

    fn magic_getter<'s>(
        scope: &mut HandleScope<'s>,
        key: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        if key_text(scope, key) == "magic" {
            Some(Number::new(scope, 5.0)?.into())
        } else {
            None
        }
    }

    #[test]
    fn test_named_getter_wins_over_target_properties() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let shadowed = String::new(scope, "other").unwrap();
            let one: Local<'_, Value> = Number::new(scope, 1.0).unwrap().into();
            template.set(scope, shadowed, one, PropertyAttribute::NONE);
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    getter: Some(magic_getter),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let magic = String::new(scope, "magic").unwrap();
            let read = instance.get(scope, magic.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(5.0));

            // the getter intercepts every named read, even declared keys
            let read = instance.get(scope, shadowed.into()).unwrap();
            assert!(read.is_undefined(scope));
        });
    }

    fn times_ten<'s>(
        scope: &mut HandleScope<'s>,
        index: u32,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        Some(Number::new(scope, f64::from(index) * 10.0)?.into())
    }

    #[test]
    fn test_indexed_getter_with_independent_write_store() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_indexed_property_handler(
                scope,
                IndexedPropertyHandlerConfiguration {
                    getter: Some(times_ten),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let seven: Local<'_, Value> = Number::new(scope, 7.0).unwrap().into();
            instance.set_index(scope, 3, seven);
            let read = instance.get_index(scope, 3).unwrap();
            assert_eq!(read.number_value(scope), Some(30.0));

            // an index-shaped name takes the indexed path
            let key = String::new(scope, "3").unwrap();
            let read = instance.get(scope, key.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(30.0));
        });
    }

    fn speed_setter<'s>(
        scope: &mut HandleScope<'s>,
        key: Local<'s, Value>,
        value: Local<'s, Value>,
        info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        if key_text(scope, key) != "speed" {
            return None;
        }
        let external = info.data().as_external(scope)?;
        let cell = external.value(scope)?.downcast::<Cell<f64>>().ok()?;
        cell.set(value.number_value(scope)?);
        Some(value)
    }

    #[test]
    fn test_named_setter_consumes_writes() {
        with_scope(|scope| {
            let store = Rc::new(Cell::new(0.0_f64));
            let data: Local<'_, Value> = External::new(scope, store.clone()).unwrap().into();
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    setter: Some(speed_setter),
                    ..Default::default()
                },
                Some(data),
            );
            let instance = template.new_instance(scope).unwrap();

            let speed = String::new(scope, "speed").unwrap();
            let eight: Local<'_, Value> = Number::new(scope, 8.0).unwrap().into();
            instance.set(scope, speed.into(), eight);
            assert_eq!(store.get(), 8.0);

            // an unhandled write is consumed, not forwarded to the target
            let other = String::new(scope, "other").unwrap();
            instance.set(scope, other.into(), eight);
            let read = instance.get(scope, other.into()).unwrap();
            assert!(read.is_undefined(scope));
        });
    }

    fn visibility_query<'s>(
        scope: &mut HandleScope<'s>,
        key: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<PropertyAttribute> {
        match key_text(scope, key).as_str() {
            "hidden" => Some(PropertyAttribute::DONT_ENUM),
            "zero" => Some(PropertyAttribute::NONE),
            _ => None,
        }
    }

    #[test]
    fn test_query_decides_has() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let zero_key = String::new(scope, "zero").unwrap();
            let one: Local<'_, Value> = Number::new(scope, 1.0).unwrap().into();
            template.set(scope, zero_key, one, PropertyAttribute::NONE);
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    query: Some(visibility_query),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let hidden: Local<'_, Value> = String::new(scope, "hidden").unwrap().into();
            assert_eq!(instance.has(scope, hidden), Some(true));
            // a zero answer wins over the declared target property
            assert_eq!(instance.has(scope, zero_key.into()), Some(false));
            // an unset answer counts as present
            let anything: Local<'_, Value> = String::new(scope, "anything").unwrap().into();
            assert_eq!(instance.has(scope, anything), Some(true));
        });
    }

    fn named_pair<'s>(
        scope: &mut HandleScope<'s>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Array>> {
        let array = Array::new(scope, 2)?;
        let object: Local<'_, Object> = array.into();
        let beta: Local<'_, Value> = String::new(scope, "beta")?.into();
        object.set_index(scope, 0, beta)?;
        let alpha: Local<'_, Value> = String::new(scope, "alpha")?.into();
        object.set_index(scope, 1, alpha)?;
        Some(array)
    }

    fn index_pair<'s>(
        scope: &mut HandleScope<'s>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Array>> {
        let array = Array::new(scope, 2)?;
        let object: Local<'_, Object> = array.into();
        let two: Local<'_, Value> = Integer::new_from_unsigned(scope, 2)?.into();
        object.set_index(scope, 0, two)?;
        let one: Local<'_, Value> = Integer::new_from_unsigned(scope, 1)?.into();
        object.set_index(scope, 1, one)?;
        Some(array)
    }

    #[test]
    fn test_enumerators_list_keys_indexed_first() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    enumerator: Some(named_pair),
                    ..Default::default()
                },
                None,
            );
            template.set_indexed_property_handler(
                scope,
                IndexedPropertyHandlerConfiguration {
                    enumerator: Some(index_pair),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();
            let names = instance.get_own_property_names(scope).unwrap();
            let names_object: Local<'_, Object> = names.into();
            let listed: Vec<std::string::String> = (0..names.length(scope))
                .map(|position| {
                    let name = names_object.get_index(scope, position).unwrap();
                    name.to_rust_string_lossy(scope)
                })
                .collect();
            assert_eq!(listed, vec!["2", "1", "beta", "alpha"]);
        });
    }

    fn single_alpha<'s>(
        scope: &mut HandleScope<'s>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Array>> {
        let array = Array::new(scope, 1)?;
        let object: Local<'_, Object> = array.into();
        let name: Local<'_, Value> = String::new(scope, "Alpha")?.into();
        object.set_index(scope, 0, name)?;
        Some(array)
    }

    #[test]
    fn test_has_scans_enumerator_results_case_insensitively() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let beta = String::new(scope, "beta").unwrap();
            let one: Local<'_, Value> = Number::new(scope, 1.0).unwrap().into();
            template.set(scope, beta, one, PropertyAttribute::NONE);
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    enumerator: Some(single_alpha),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let alpha: Local<'_, Value> = String::new(scope, "alpha").unwrap().into();
            assert_eq!(instance.has(scope, alpha), Some(true));
            // the scan answers outright; the declared key is not consulted
            assert_eq!(instance.has(scope, beta.into()), Some(false));
        });
    }

    fn ghost_deleter<'s>(
        scope: &mut HandleScope<'s>,
        key: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<bool> {
        if key_text(scope, key) == "ghost" {
            Some(true)
        } else {
            None
        }
    }

    #[test]
    fn test_deleter_verdict_with_ordinary_fallback() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let solid = String::new(scope, "solid").unwrap();
            let one: Local<'_, Value> = Number::new(scope, 1.0).unwrap().into();
            template.set(scope, solid, one, PropertyAttribute::NONE);
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    deleter: Some(ghost_deleter),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let ghost: Local<'_, Value> = String::new(scope, "ghost").unwrap().into();
            assert_eq!(instance.delete(scope, ghost), Some(true));

            // an unset verdict falls through to the ordinary delete
            assert_eq!(instance.delete(scope, solid.into()), Some(true));
            let gone = instance.get(scope, solid.into()).unwrap();
            assert!(gone.is_undefined(scope));
        });
    }

    #[test]
    fn test_instances_keep_intercepting_after_collection() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    getter: Some(magic_getter),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();
            scope.collect_garbage();
            let magic = String::new(scope, "magic").unwrap();
            let read = instance.get(scope, magic.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(5.0));
        });
    }

    fn note_index_setter<'s>(
        _scope: &mut HandleScope<'s>,
        _index: u32,
        value: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        Some(value)
    }

    #[test]
    fn test_descriptor_passes_through_without_query_or_getter() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_indexed_property_handler(
                scope,
                IndexedPropertyHandlerConfiguration {
                    setter: Some(note_index_setter),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();
            let note = String::new(scope, "note").unwrap();
            let five: Local<'_, Value> = Number::new(scope, 5.0).unwrap().into();
            instance.set(scope, note.into(), five);

            let descriptor =
                utils::get_own_property_descriptor(scope.rt, instance.raw(), "note").unwrap();
            let value_id = scope.rt.ids.value;
            let value = scope.rt.get_property(descriptor, value_id).unwrap();
            assert_eq!(scope.rt.number_content(value).unwrap(), 5.0);
            let writable_id = scope.rt.ids.writable;
            let writable = scope.rt.get_property(descriptor, writable_id).unwrap();
            assert!(scope.rt.to_boolean(writable).unwrap());
        });
    }

    fn lock_query<'s>(
        scope: &mut HandleScope<'s>,
        key: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<PropertyAttribute> {
        if key_text(scope, key) == "locked" {
            Some(PropertyAttribute::READ_ONLY | PropertyAttribute::DONT_DELETE)
        } else {
            None
        }
    }

    fn three_getter<'s>(
        scope: &mut HandleScope<'s>,
        _key: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        Some(Number::new(scope, 3.0)?.into())
    }

    #[test]
    fn test_descriptor_synthesis_negates_query_bits() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    getter: Some(three_getter),
                    query: Some(lock_query),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let descriptor =
                utils::get_own_property_descriptor(scope.rt, instance.raw(), "locked").unwrap();
            let ids = (
                scope.rt.ids.value,
                scope.rt.ids.writable,
                scope.rt.ids.enumerable,
                scope.rt.ids.configurable,
            );
            let value = scope.rt.get_property(descriptor, ids.0).unwrap();
            assert_eq!(scope.rt.number_content(value).unwrap(), 3.0);
            let writable = scope.rt.get_property(descriptor, ids.1).unwrap();
            assert!(!scope.rt.to_boolean(writable).unwrap());
            let enumerable = scope.rt.get_property(descriptor, ids.2).unwrap();
            assert!(scope.rt.to_boolean(enumerable).unwrap());
            let configurable = scope.rt.get_property(descriptor, ids.3).unwrap();
            assert!(!scope.rt.to_boolean(configurable).unwrap());
        });
    }

    fn maybe_four<'s>(
        scope: &mut HandleScope<'s>,
        key: Local<'s, Value>,
        _info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        if key_text(scope, key) == "present" {
            Some(Number::new(scope, 4.0)?.into())
        } else {
            None
        }
    }

    #[test]
    fn test_descriptor_absent_for_unset_undefined_results() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    getter: Some(maybe_four),
                    ..Default::default()
                },
                None,
            );
            let instance = template.new_instance(scope).unwrap();

            let missing =
                utils::get_own_property_descriptor(scope.rt, instance.raw(), "missing").unwrap();
            assert!(matches!(
                scope.rt.type_of(missing).unwrap(),
                JsValueType::Undefined
            ));

            let present =
                utils::get_own_property_descriptor(scope.rt, instance.raw(), "present").unwrap();
            let value_id = scope.rt.ids.value;
            let value = scope.rt.get_property(present, value_id).unwrap();
            assert_eq!(scope.rt.number_content(value).unwrap(), 4.0);
            let writable_id = scope.rt.ids.writable;
            let writable = scope.rt.get_property(present, writable_id).unwrap();
            assert!(scope.rt.to_boolean(writable).unwrap());
        });
    }

    #[test]
    fn test_class_name_shows_as_constructor_name() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            let name = String::new(scope, "Widget").unwrap();
            template.set_class_name(scope, name);
            let instance = template.new_instance(scope).unwrap();
            assert_eq!(instance.get_constructor_name(scope), "Widget");

            let plain = Object::new(scope).unwrap();
            assert_eq!(plain.get_constructor_name(scope), "Object");
        });
    }

    #[test]
    fn test_to_string_override_wrapper_still_intercepts() {
        with_scope(|scope| {
            let template = ObjectTemplate::new(scope).unwrap();
            template.set_named_property_handler(
                scope,
                NamedPropertyHandlerConfiguration {
                    getter: Some(magic_getter),
                    ..Default::default()
                },
                None,
            );
            template.set_supports_override_to_string(scope, true);
            let instance = template.new_instance(scope).unwrap();

            // the handle fronts a plain object, not the proxy itself
            let value: Local<'_, Value> = instance.into();
            assert!(!value.is_external(scope));

            let magic = String::new(scope, "magic").unwrap();
            let read = instance.get(scope, magic.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(5.0));
        });
    }

    fn size_getter<'s>(
        scope: &mut HandleScope<'s>,
        _name: Local<'s, String>,
        info: &PropertyCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        let external = info.data().as_external(scope)?;
        let cell = external.value(scope)?.downcast::<Cell<f64>>().ok()?;
        Some(Number::new(scope, cell.get())?.into())
    }

    fn size_setter<'s>(
        scope: &mut HandleScope<'s>,
        _name: Local<'s, String>,
        value: Local<'s, Value>,
        info: &PropertyCallbackInfo<'s>,
    ) {
        let Some(external) = info.data().as_external(scope) else {
            return;
        };
        let Some(data) = external.value(scope) else {
            return;
        };
        let Ok(cell) = data.downcast::<Cell<f64>>() else {
            return;
        };
        if let Some(number) = value.number_value(scope) {
            cell.set(number);
        }
    }

    #[test]
    fn test_accessor_callbacks_share_template_data() {
        with_scope(|scope| {
            let size = Rc::new(Cell::new(2.5_f64));
            let data: Local<'_, Value> = External::new(scope, size.clone()).unwrap().into();
            let template = ObjectTemplate::new(scope).unwrap();
            let name = String::new(scope, "size").unwrap();
            template.set_accessor(
                scope,
                name,
                size_getter,
                Some(size_setter),
                Some(data),
                PropertyAttribute::NONE,
            );
            let instance = template.new_instance(scope).unwrap();

            let read = instance.get(scope, name.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(2.5));

            let nine: Local<'_, Value> = Number::new(scope, 9.0).unwrap().into();
            instance.set(scope, name.into(), nine);
            assert_eq!(size.get(), 9.0);
            let read = instance.get(scope, name.into()).unwrap();
            assert_eq!(read.number_value(scope), Some(9.0));
        });
    }
}
