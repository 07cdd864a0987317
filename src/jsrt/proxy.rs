//! Proxy Trap Dispatch
//!
//! Property operations that land on a proxy cell are routed through its
//! handler object here. A handler without the relevant trap forwards to the
//! target. Keys always reach traps as string values, indices in canonical
//! decimal form.

use std::sync::Arc;

use tracing::debug;

use super::error::JsResult;
use super::object::PropertyKey;
use super::runtime::Runtime;
use super::value::{JsValueType, PropertyId, ValueRef};

/// Resolves a trap function on the handler, `None` when absent
fn trap_function(rt: &mut Runtime, handler: ValueRef, name: &str) -> JsResult<Option<ValueRef>> {
    let id = PropertyId::from_name(name);
    let trap = rt.get_property(handler, id)?;
    match rt.type_of(trap)? {
        JsValueType::Undefined | JsValueType::Null => Ok(None),
        JsValueType::Function => Ok(Some(trap)),
        _ => Err(rt.throw_type_error("proxy handler trap is not a function")),
    }
}

fn key_value(rt: &mut Runtime, key: PropertyKey) -> JsResult<ValueRef> {
    match key {
        PropertyKey::Named(id) => {
            let name = id.name();
            rt.string_value(&name)
        }
        PropertyKey::Index(index) => rt.string_value(&index.to_string()),
    }
}

pub(crate) fn get(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
    key: PropertyKey,
    receiver: ValueRef,
) -> JsResult<ValueRef> {
    if let Some(trap) = trap_function(rt, handler, "get")? {
        let key = key_value(rt, key)?;
        return rt.call_function(trap, handler, &[target, key, receiver]);
    }
    rt.get_key(target, key, receiver)
}

pub(crate) fn set(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
    key: PropertyKey,
    value: ValueRef,
    receiver: ValueRef,
) -> JsResult<bool> {
    if let Some(trap) = trap_function(rt, handler, "set")? {
        let key = key_value(rt, key)?;
        let result = rt.call_function(trap, handler, &[target, key, value, receiver])?;
        return rt.to_boolean(result);
    }
    rt.set_key(target, key, value, receiver)?;
    Ok(true)
}

pub(crate) fn has(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
    key: PropertyKey,
) -> JsResult<bool> {
    if let Some(trap) = trap_function(rt, handler, "has")? {
        let key = key_value(rt, key)?;
        let result = rt.call_function(trap, handler, &[target, key])?;
        return rt.to_boolean(result);
    }
    rt.has_key(target, key)
}

pub(crate) fn has_own(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
    key: PropertyKey,
) -> JsResult<bool> {
    if let Some(trap) = trap_function(rt, handler, "hasOwn")? {
        let key = key_value(rt, key)?;
        let result = rt.call_function(trap, handler, &[target, key])?;
        return rt.to_boolean(result);
    }
    rt.has_own_key(target, key)
}

pub(crate) fn delete(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
    key: PropertyKey,
) -> JsResult<bool> {
    if let Some(trap) = trap_function(rt, handler, "deleteProperty")? {
        let key = key_value(rt, key)?;
        let result = rt.call_function(trap, handler, &[target, key])?;
        return rt.to_boolean(result);
    }
    rt.delete_key(target, key)
}

/// Own keys as an array; the trap may answer with a key array or with an
/// iterator, which is drained into one
pub(crate) fn own_keys(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
) -> JsResult<ValueRef> {
    if let Some(trap) = trap_function(rt, handler, "ownKeys")? {
        let result = rt.call_function(trap, handler, &[target])?;
        if matches!(rt.type_of(result)?, JsValueType::Array) {
            return Ok(result);
        }
        if let Some(names) = iterator_names(rt, result)? {
            return rt.string_array(&names);
        }
        debug!("ownKeys trap returned neither an array nor an iterator");
        return rt.create_array(0);
    }
    rt.own_property_names(target)
}

pub(crate) fn own_property_descriptor(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
    key: PropertyKey,
) -> JsResult<ValueRef> {
    if let Some(trap) = trap_function(rt, handler, "getOwnPropertyDescriptor")? {
        let key = key_value(rt, key)?;
        return rt.call_function(trap, handler, &[target, key]);
    }
    rt.descriptor_key(target, key)
}

/// Names yielded by the `enumerate` trap's iterator, or the target's
/// enumerable names when no trap is installed
pub(crate) fn enumerate_names(
    rt: &mut Runtime,
    target: ValueRef,
    handler: ValueRef,
) -> JsResult<Vec<Arc<str>>> {
    let Some(trap) = trap_function(rt, handler, "enumerate")? else {
        return rt.enumerable_property_names(target);
    };
    let iterator = rt.call_function(trap, handler, &[target])?;
    match iterator_names(rt, iterator)? {
        Some(names) => Ok(names),
        None => Err(rt.throw_type_error("proxy enumerate trap did not return an iterator")),
    }
}

/// Drains an iterator object into the names it yields
///
/// `None` when `iterator` does not satisfy the protocol (not an object, or
/// `next` is not callable). The protocol is driven to exhaustion: `next()`
/// until a step object reports `done`.
fn iterator_names(rt: &mut Runtime, iterator: ValueRef) -> JsResult<Option<Vec<Arc<str>>>> {
    if !rt.is_object(iterator)? {
        return Ok(None);
    }
    let next_id = rt.ids.next;
    let done_id = rt.ids.done;
    let value_id = rt.ids.value;
    let next = rt.get_property(iterator, next_id)?;
    if !matches!(rt.type_of(next)?, JsValueType::Function) {
        return Ok(None);
    }
    let mut names = Vec::new();
    loop {
        let step = rt.call_function(next, iterator, &[])?;
        if !rt.is_object(step)? {
            return Err(rt.throw_type_error("iterator step is not an object"));
        }
        let done = rt.get_property(step, done_id)?;
        if rt.to_boolean(done)? {
            return Ok(Some(names));
        }
        let value = rt.get_property(step, value_id)?;
        names.push(rt.to_string(value)?);
    }
}
