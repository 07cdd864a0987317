//! Engine Utility Layer
//!
//! Request/response helpers over the host runtime used throughout the
//! bridge: property access by name, id or dynamic key value, array scans,
//! key partitioning between the indexed and named worlds, descriptor
//! construction, external-data attachment and enumeration iterators.
//!
//! String property names are canonicalized before use: a name that parses
//! as an array index under the grammar in [`crate::traps`] routes to the
//! host's indexed path, everything else to the named path. Every helper
//! fails fast, returning the first host error unchanged.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::jsrt::{
    CallContext, ExternalValue, Finalizer, JsError, JsResult, JsValueType, NativeCallback,
    PropertyId, Runtime, ValueRef,
};
use crate::traps::{classify_key, KeyClass};

/// Property name under which external data rides on ordinary objects
pub const EXTERNAL_DATA_PROPERTY: &str = "__external__";

// ---- property access ----

/// Reads a property by string name, walking the prototype chain
pub fn get_property(rt: &mut Runtime, object: ValueRef, name: &str) -> JsResult<ValueRef> {
    match classify_key(name) {
        KeyClass::Indexed(index) => rt.get_indexed(object, index),
        KeyClass::Named => rt.get_property(object, PropertyId::from_name(name)),
    }
}

/// Reads a property by interned identifier
pub fn get_property_by_id(
    rt: &mut Runtime,
    object: ValueRef,
    id: PropertyId,
) -> JsResult<ValueRef> {
    rt.get_property(object, id)
}

/// Reads a property keyed by an arbitrary value, converted to string first
pub fn get_property_by_value(
    rt: &mut Runtime,
    object: ValueRef,
    key: ValueRef,
) -> JsResult<ValueRef> {
    let name = rt.to_string(key)?;
    get_property(rt, object, &name)
}

/// Writes a property by string name with ordinary assignment semantics
pub fn set_property(
    rt: &mut Runtime,
    object: ValueRef,
    name: &str,
    value: ValueRef,
) -> JsResult<()> {
    match classify_key(name) {
        KeyClass::Indexed(index) => rt.set_indexed(object, index, value),
        KeyClass::Named => rt.set_property(object, PropertyId::from_name(name), value),
    }
}

/// Writes a property by interned identifier
pub fn set_property_by_id(
    rt: &mut Runtime,
    object: ValueRef,
    id: PropertyId,
    value: ValueRef,
) -> JsResult<()> {
    rt.set_property(object, id, value)
}

/// Writes a property keyed by an arbitrary value
pub fn set_property_by_value(
    rt: &mut Runtime,
    object: ValueRef,
    key: ValueRef,
    value: ValueRef,
) -> JsResult<()> {
    let name = rt.to_string(key)?;
    set_property(rt, object, &name, value)
}

/// Deletes an own property by string name; `true` when absent or removed
pub fn delete_property(rt: &mut Runtime, object: ValueRef, name: &str) -> JsResult<bool> {
    match classify_key(name) {
        KeyClass::Indexed(index) => rt.delete_indexed(object, index),
        KeyClass::Named => rt.delete_property(object, PropertyId::from_name(name)),
    }
}

/// Deletes an own property keyed by an arbitrary value
pub fn delete_property_by_value(
    rt: &mut Runtime,
    object: ValueRef,
    key: ValueRef,
) -> JsResult<bool> {
    let name = rt.to_string(key)?;
    delete_property(rt, object, &name)
}

/// Whether the object owns the property named `name`
pub fn has_own_property(rt: &mut Runtime, object: ValueRef, name: &str) -> JsResult<bool> {
    match classify_key(name) {
        KeyClass::Indexed(index) => rt.has_own_indexed(object, index),
        KeyClass::Named => rt.has_own_property(object, PropertyId::from_name(name)),
    }
}

/// Whether the property exists on the object or its prototype chain
pub fn has_property(rt: &mut Runtime, object: ValueRef, name: &str) -> JsResult<bool> {
    match classify_key(name) {
        KeyClass::Indexed(index) => rt.has_indexed(object, index),
        KeyClass::Named => rt.has_property(object, PropertyId::from_name(name)),
    }
}

/// Calls the function stored under `name` with the object as receiver
pub fn call_property(
    rt: &mut Runtime,
    object: ValueRef,
    name: &str,
    args: &[ValueRef],
) -> JsResult<ValueRef> {
    let function = get_property(rt, object, name)?;
    rt.call_function(function, object, args)
}

/// Reads a property of the current context's global object
pub fn get_property_of_global(rt: &mut Runtime, name: &str) -> JsResult<ValueRef> {
    let global = rt.current_global()?;
    get_property(rt, global, name)
}

/// Writes a property of the current context's global object
pub fn set_property_of_global(rt: &mut Runtime, name: &str, value: ValueRef) -> JsResult<()> {
    let global = rt.current_global()?;
    set_property(rt, global, name, value)
}

// ---- arrays ----

/// Length of an array-like, read through its `length` property
pub fn get_array_length(rt: &mut Runtime, array: ValueRef) -> JsResult<u32> {
    let length_id = rt.ids.length;
    let length = rt.get_property(array, length_id)?;
    let number = rt.to_number(length)?;
    if !number.is_finite() || number < 0.0 || number > f64::from(u32::MAX) {
        return Err(JsError::OutOfRange);
    }
    Ok(number as u32)
}

/// Builds a fresh array holding the elements of `first` then `second`
pub fn concat_arrays(rt: &mut Runtime, first: ValueRef, second: ValueRef) -> JsResult<ValueRef> {
    let first_len = get_array_length(rt, first)?;
    let second_len = get_array_length(rt, second)?;
    let total = first_len.checked_add(second_len).ok_or(JsError::OutOfRange)?;
    let result = rt.create_array(total)?;
    for position in 0..first_len {
        let element = rt.get_indexed(first, position)?;
        rt.set_indexed(result, position, element)?;
    }
    for position in 0..second_len {
        let element = rt.get_indexed(second, position)?;
        rt.set_indexed(result, first_len + position, element)?;
    }
    Ok(result)
}

/// Element comparison used by the array scans
pub type ValueComparator = fn(&mut Runtime, ValueRef, ValueRef) -> JsResult<bool>;

/// Linear scan of an array-like, stopping at the first comparator match
pub fn is_value_in_array_with_comparator(
    rt: &mut Runtime,
    array: ValueRef,
    value: ValueRef,
    comparator: ValueComparator,
) -> JsResult<bool> {
    let length = get_array_length(rt, array)?;
    for position in 0..length {
        let element = rt.get_indexed(array, position)?;
        if comparator(rt, element, value)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether the array contains a loosely-equal element
pub fn is_value_in_array(rt: &mut Runtime, array: ValueRef, value: ValueRef) -> JsResult<bool> {
    is_value_in_array_with_comparator(rt, array, value, |rt, a, b| rt.loose_equals(a, b))
}

/// Whether the array contains `value` under ASCII-case-insensitive string
/// comparison; non-string operands never match
pub fn is_case_insensitive_string_value_in_array(
    rt: &mut Runtime,
    array: ValueRef,
    value: ValueRef,
) -> JsResult<bool> {
    is_value_in_array_with_comparator(rt, array, value, case_insensitive_string_equals)
}

fn case_insensitive_string_equals(rt: &mut Runtime, a: ValueRef, b: ValueRef) -> JsResult<bool> {
    if rt.type_of(a)? != JsValueType::String || rt.type_of(b)? != JsValueType::String {
        return Ok(false);
    }
    let a = rt.string_content(a)?;
    let b = rt.string_content(b)?;
    Ok(a.eq_ignore_ascii_case(&b))
}

// ---- key partitioning ----

/// Enumerable keys in for-in order that parse as array indexes
pub fn get_enumerable_indexed_properties(
    rt: &mut Runtime,
    object: ValueRef,
) -> JsResult<ValueRef> {
    let names = rt.enumerable_property_names(object)?;
    let indexed: Vec<Arc<str>> = names
        .into_iter()
        .filter(|name| matches!(classify_key(name), KeyClass::Indexed(_)))
        .collect();
    rt.string_array(&indexed)
}

/// Enumerable keys in for-in order that do not parse as array indexes
pub fn get_enumerable_named_properties(rt: &mut Runtime, object: ValueRef) -> JsResult<ValueRef> {
    let names = rt.enumerable_property_names(object)?;
    let named: Vec<Arc<str>> = names
        .into_iter()
        .filter(|name| matches!(classify_key(name), KeyClass::Named))
        .collect();
    rt.string_array(&named)
}

/// Own enumerable keys that parse as array indexes
pub fn get_indexed_own_keys(rt: &mut Runtime, object: ValueRef) -> JsResult<ValueRef> {
    let keys = own_enumerable_keys(rt, object)?;
    let indexed: Vec<Arc<str>> = keys
        .into_iter()
        .filter(|name| matches!(classify_key(name), KeyClass::Indexed(_)))
        .collect();
    rt.string_array(&indexed)
}

/// Own enumerable keys that do not parse as array indexes
pub fn get_named_own_keys(rt: &mut Runtime, object: ValueRef) -> JsResult<ValueRef> {
    let keys = own_enumerable_keys(rt, object)?;
    let named: Vec<Arc<str>> = keys
        .into_iter()
        .filter(|name| matches!(classify_key(name), KeyClass::Named))
        .collect();
    rt.string_array(&named)
}

fn own_enumerable_keys(rt: &mut Runtime, object: ValueRef) -> JsResult<Vec<Arc<str>>> {
    let names = rt.own_property_names(object)?;
    let names = read_string_array(rt, names)?;
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let descriptor = match classify_key(&name) {
            KeyClass::Indexed(index) => rt.get_own_indexed_descriptor(object, index)?,
            KeyClass::Named => {
                rt.get_own_property_descriptor(object, PropertyId::from_name(&name))?
            }
        };
        if !rt.is_object(descriptor)? {
            continue;
        }
        let enumerable_id = rt.ids.enumerable;
        let flag = rt.get_property(descriptor, enumerable_id)?;
        if rt.to_boolean(flag)? {
            out.push(name);
        }
    }
    Ok(out)
}

fn read_string_array(rt: &mut Runtime, array: ValueRef) -> JsResult<Vec<Arc<str>>> {
    let length = get_array_length(rt, array)?;
    let mut out = Vec::with_capacity(length as usize);
    for position in 0..length {
        let element = rt.get_indexed(array, position)?;
        out.push(rt.to_string(element)?);
    }
    Ok(out)
}

// ---- enumeration iterators ----

struct EnumerationState {
    keys: Vec<Arc<str>>,
    position: usize,
}

/// Creates a single-use forward iterator over the elements of a key array
///
/// `next` yields `{ value: key }` objects until the keys run out, then
/// `{ done: true }` on every further call. The key array is snapshotted at
/// creation; the iterator is not restartable.
pub fn create_enumeration_iterator(rt: &mut Runtime, keys: ValueRef) -> JsResult<ValueRef> {
    let keys = read_string_array(rt, keys)?;
    let state: ExternalValue = Rc::new(RefCell::new(EnumerationState { keys, position: 0 }));
    let iterator = rt.create_external(state, None)?;
    let next = rt.create_function("next", enumeration_next)?;
    let next_id = rt.ids.next;
    rt.set_property(iterator, next_id, next)?;
    Ok(iterator)
}

fn enumeration_next(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let data = rt
        .external_data(cx.this)?
        .ok_or(JsError::InvalidArgument("enumeration iterator state is missing"))?;
    let state = data
        .downcast::<RefCell<EnumerationState>>()
        .map_err(|_| JsError::InvalidArgument("enumeration iterator state is missing"))?;
    let result = rt.create_object()?;
    let next_key = {
        let mut state = state.borrow_mut();
        if state.position < state.keys.len() {
            let key = Arc::clone(&state.keys[state.position]);
            state.position += 1;
            Some(key)
        } else {
            None
        }
    };
    match next_key {
        Some(key) => {
            let value = rt.string_value(&key)?;
            let value_id = rt.ids.value;
            rt.set_property(result, value_id, value)?;
        }
        None => {
            let done = rt.boolean_value(true);
            let done_id = rt.ids.done;
            rt.set_property(result, done_id, done)?;
        }
    }
    Ok(result)
}

// ---- descriptors ----

/// Tri-state descriptor attribute; `None` omits the field entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorOption {
    /// Set the attribute to `true`
    True,
    /// Set the attribute to `false`
    False,
    /// Leave the attribute unset so the definition inherits defaults
    None,
}

impl DescriptorOption {
    fn flag(self) -> Option<bool> {
        match self {
            DescriptorOption::True => Some(true),
            DescriptorOption::False => Some(false),
            DescriptorOption::None => None,
        }
    }
}

impl From<bool> for DescriptorOption {
    fn from(flag: bool) -> Self {
        if flag {
            DescriptorOption::True
        } else {
            DescriptorOption::False
        }
    }
}

/// Builds a property-descriptor object, setting only the requested fields
pub fn create_property_descriptor(
    rt: &mut Runtime,
    value: Option<ValueRef>,
    writable: DescriptorOption,
    enumerable: DescriptorOption,
    configurable: DescriptorOption,
) -> JsResult<ValueRef> {
    let descriptor = rt.create_object()?;
    if let Some(value) = value {
        let value_id = rt.ids.value;
        rt.set_property(descriptor, value_id, value)?;
    }
    let fields = [
        (rt.ids.writable, writable),
        (rt.ids.enumerable, enumerable),
        (rt.ids.configurable, configurable),
    ];
    for (id, option) in fields {
        if let Some(flag) = option.flag() {
            let flag = rt.boolean_value(flag);
            rt.set_property(descriptor, id, flag)?;
        }
    }
    Ok(descriptor)
}

/// Defines a property from a descriptor object
///
/// A definition the host rejects is reported as `InvalidArgument` rather
/// than a silent `false`.
pub fn define_property(
    rt: &mut Runtime,
    object: ValueRef,
    name: &str,
    descriptor: ValueRef,
) -> JsResult<()> {
    let defined = match classify_key(name) {
        KeyClass::Indexed(index) => rt.define_indexed_property(object, index, descriptor)?,
        KeyClass::Named => rt.define_property(object, PropertyId::from_name(name), descriptor)?,
    };
    if defined {
        Ok(())
    } else {
        Err(JsError::InvalidArgument("property definition was rejected"))
    }
}

/// Own-property descriptor object for a string name, `undefined` when absent
pub fn get_own_property_descriptor(
    rt: &mut Runtime,
    object: ValueRef,
    name: &str,
) -> JsResult<ValueRef> {
    match classify_key(name) {
        KeyClass::Indexed(index) => rt.get_own_indexed_descriptor(object, index),
        KeyClass::Named => rt.get_own_property_descriptor(object, PropertyId::from_name(name)),
    }
}

/// Copies every own property of `source` onto `destination`, descriptors
/// intact
pub fn copy_properties(rt: &mut Runtime, source: ValueRef, destination: ValueRef) -> JsResult<()> {
    let names = rt.own_property_names(source)?;
    for name in read_string_array(rt, names)? {
        let descriptor = get_own_property_descriptor(rt, source, &name)?;
        if !rt.is_object(descriptor)? {
            continue;
        }
        define_property(rt, destination, &name, descriptor)?;
    }
    Ok(())
}

// ---- external data ----

/// Attaches external data to an object under [`EXTERNAL_DATA_PROPERTY`]
pub fn add_external_data(
    rt: &mut Runtime,
    object: ValueRef,
    data: ExternalValue,
    finalizer: Option<Finalizer>,
) -> JsResult<()> {
    add_external_data_with_name(rt, object, EXTERNAL_DATA_PROPERTY, data, finalizer)
}

/// Attaches external data under a caller-chosen property name
///
/// The slot is non-writable, non-enumerable and non-configurable, so it
/// never shows up in enumeration and cannot be replaced from script.
pub fn add_external_data_with_name(
    rt: &mut Runtime,
    object: ValueRef,
    name: &str,
    data: ExternalValue,
    finalizer: Option<Finalizer>,
) -> JsResult<()> {
    let external = rt.create_external(data, finalizer)?;
    let id = PropertyId::from_name(name);
    let defined = rt.define_data_property(object, id, external, false, false, false)?;
    if defined {
        Ok(())
    } else {
        Err(JsError::InvalidArgument("external data slot was rejected"))
    }
}

/// Reads external data attached under [`EXTERNAL_DATA_PROPERTY`]
pub fn get_external_data(rt: &mut Runtime, object: ValueRef) -> JsResult<Option<ExternalValue>> {
    get_external_data_with_name(rt, object, EXTERNAL_DATA_PROPERTY)
}

/// Reads external data attached under a caller-chosen name; absent data is
/// `None`, not an error
pub fn get_external_data_with_name(
    rt: &mut Runtime,
    object: ValueRef,
    name: &str,
) -> JsResult<Option<ExternalValue>> {
    let holder = rt.get_property(object, PropertyId::from_name(name))?;
    if !rt.is_object(holder)? {
        return Ok(None);
    }
    rt.external_data(holder)
}

/// Whether the object carries external data under the default name
pub fn has_external_data(rt: &mut Runtime, object: ValueRef) -> JsResult<bool> {
    rt.has_property(object, PropertyId::from_name(EXTERNAL_DATA_PROPERTY))
}

/// Creates a named native function carrying opaque state
///
/// The state is attached as external data on the function object; the
/// callback recovers it with [`get_external_data`] on `cx.callee`.
pub fn create_function_with_state(
    rt: &mut Runtime,
    name: &str,
    callback: NativeCallback,
    state: ExternalValue,
) -> JsResult<ValueRef> {
    let function = rt.create_function(name, callback)?;
    add_external_data(rt, function, state, None)?;
    Ok(function)
}

/// Downcasts external data recovered from an object to a concrete type
pub fn external_data_as<T: Any>(data: ExternalValue) -> Option<Rc<T>> {
    data.downcast::<T>().ok()
}

// ---- constructor names ----

/// Renames the object's constructor
///
/// `constructor` is resolved through the prototype chain; a missing or
/// non-object constructor is an `InvalidArgument` error.
pub fn set_constructor_name(rt: &mut Runtime, object: ValueRef, name: &str) -> JsResult<()> {
    let ctor_id = rt.ids.constructor;
    let ctor = rt.get_property(object, ctor_id)?;
    if !rt.is_object(ctor)? {
        return Err(JsError::InvalidArgument("object has no constructor"));
    }
    let value = rt.string_value(name)?;
    let name_id = rt.ids.name;
    let defined = rt.define_data_property(ctor, name_id, value, false, false, true)?;
    if defined {
        Ok(())
    } else {
        Err(JsError::InvalidArgument("constructor name is not configurable"))
    }
}

/// The `name` of the object's constructor; `"Object"` when unresolvable
pub fn get_constructor_name(rt: &mut Runtime, object: ValueRef) -> JsResult<Arc<str>> {
    let ctor_id = rt.ids.constructor;
    let ctor = rt.get_property(object, ctor_id)?;
    if !rt.is_object(ctor)? {
        return Ok(Arc::from("Object"));
    }
    let name_id = rt.ids.name;
    let name = rt.get_property(ctor, name_id)?;
    if rt.type_of(name)? == JsValueType::String {
        rt.string_content(name)
    } else {
        Ok(Arc::from("Object"))
    }
}

/// Whether `value` has `constructor.prototype` on its prototype chain
pub fn instance_of(rt: &mut Runtime, value: ValueRef, constructor: ValueRef) -> JsResult<bool> {
    rt.instance_of(value, constructor)
}

// ---- stringification ----

/// JSON text for a value tree, in the style of `JSON.stringify`
///
/// `undefined` and functions vanish from objects and become `null` inside
/// arrays; non-finite numbers serialize as `null`; a cyclic structure is an
/// error.
pub fn stringify(rt: &mut Runtime, value: ValueRef) -> JsResult<std::string::String> {
    let mut path = Vec::new();
    match to_json(rt, value, &mut path)? {
        Some(json) => serde_json::to_string(&json)
            .map_err(|_| JsError::InvalidArgument("value is not serializable")),
        None => Ok("undefined".to_string()),
    }
}

fn to_json(
    rt: &mut Runtime,
    value: ValueRef,
    path: &mut Vec<ValueRef>,
) -> JsResult<Option<serde_json::Value>> {
    use serde_json::Value as Json;

    match rt.type_of(value)? {
        JsValueType::Undefined | JsValueType::Function => Ok(None),
        JsValueType::Null => Ok(Some(Json::Null)),
        JsValueType::Boolean => Ok(Some(Json::Bool(rt.to_boolean(value)?))),
        JsValueType::Number => {
            let number = rt.number_content(value)?;
            Ok(Some(
                serde_json::Number::from_f64(number)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            ))
        }
        JsValueType::String => Ok(Some(Json::String(rt.string_content(value)?.to_string()))),
        JsValueType::Array => {
            if path.contains(&value) {
                return Err(JsError::InvalidArgument("cannot stringify a cyclic structure"));
            }
            path.push(value);
            let length = get_array_length(rt, value)?;
            let mut items = Vec::with_capacity(length as usize);
            for position in 0..length {
                let element = rt.get_indexed(value, position)?;
                items.push(to_json(rt, element, path)?.unwrap_or(Json::Null));
            }
            path.pop();
            Ok(Some(Json::Array(items)))
        }
        JsValueType::Object | JsValueType::Error => {
            if path.contains(&value) {
                return Err(JsError::InvalidArgument("cannot stringify a cyclic structure"));
            }
            path.push(value);
            let mut map = serde_json::Map::new();
            for name in own_enumerable_keys(rt, value)? {
                let element = get_property(rt, value, &name)?;
                if let Some(element) = to_json(rt, element, path)? {
                    map.insert(name.to_string(), element);
                }
            }
            path.pop();
            Ok(Some(Json::Object(map)))
        }
    }
}

/// Human-readable message for a thrown value
///
/// Error objects contribute their `message` property; anything else is
/// converted to string.
pub fn exception_message(rt: &mut Runtime, exception: ValueRef) -> JsResult<Arc<str>> {
    if rt.type_of(exception)? == JsValueType::Error {
        let message_id = rt.ids.message;
        let message = rt.get_property(exception, message_id)?;
        if rt.type_of(message)? == JsValueType::String {
            return rt.string_content(message);
        }
    }
    rt.to_string(exception)
}
