//! Object Cells and Property Records
//!
//! Objects store their own properties split by key shape: array-index keys
//! live in an ordered map, named keys keep insertion order. That split is
//! what gives own-key listings the ordinary ECMAScript ordering (indices
//! ascending, then names in insertion order).

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::error::JsResult;
use super::runtime::Runtime;
use super::value::{PropertyId, ValueRef};

/// Opaque data carried by an external object
pub type ExternalValue = Rc<dyn Any>;

/// Finalizer invoked exactly once when an external object is reclaimed
pub type Finalizer = Box<dyn FnOnce(ExternalValue)>;

/// Callback fired just before an object is collected
///
/// The handle is still valid while the callback runs; the object is
/// reclaimed as soon as it returns. Resurrecting the object is not
/// supported.
pub type BeforeCollectCallback = Box<dyn FnOnce(&mut Runtime, ValueRef)>;

/// Native function entry point
pub type NativeCallback = fn(&mut Runtime, &CallContext) -> JsResult<ValueRef>;

/// Arguments handed to a native function
pub struct CallContext {
    /// The function object being invoked
    pub callee: ValueRef,
    /// The receiver (`this`) of the call
    pub this: ValueRef,
    /// Positional arguments, excluding the receiver
    pub args: Vec<ValueRef>,
    /// Whether the function was invoked as a constructor
    pub is_construct: bool,
}

impl CallContext {
    /// Argument at `index`, or the given default when absent
    pub fn arg_or(&self, index: usize, default: ValueRef) -> ValueRef {
        self.args.get(index).copied().unwrap_or(default)
    }
}

/// A resolved own-property key: array index or interned name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropertyKey {
    Index(u32),
    Named(PropertyId),
}

/// A property's storage: a plain value or an accessor pair
#[derive(Clone, Copy)]
pub(crate) enum PropertySlot {
    Data(ValueRef),
    Accessor {
        get: Option<ValueRef>,
        set: Option<ValueRef>,
    },
}

/// One own property of an object
#[derive(Clone)]
pub(crate) struct Property {
    pub slot: PropertySlot,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    pub fn data(value: ValueRef, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Property {
            slot: PropertySlot::Data(value),
            writable,
            enumerable,
            configurable,
        }
    }
}

/// External-data payload: opaque data plus its optional finalizer
pub(crate) struct ExternalSlot {
    pub data: ExternalValue,
    pub finalizer: Option<Finalizer>,
}

/// What kind of object a cell is
pub(crate) enum ObjectKind {
    Ordinary,
    Error,
    Array { length: u32 },
    Function { callback: NativeCallback },
    External(ExternalSlot),
    Proxy { target: ValueRef, handler: ValueRef },
}

/// Heap cell for an object value
pub(crate) struct ObjectCell {
    pub kind: ObjectKind,
    pub named: Vec<(PropertyId, Property)>,
    pub indexed: BTreeMap<u32, Property>,
    pub prototype: Option<ValueRef>,
    pub before_collect: Option<BeforeCollectCallback>,
}

impl ObjectCell {
    pub fn new(kind: ObjectKind) -> Self {
        ObjectCell {
            kind,
            named: Vec::new(),
            indexed: BTreeMap::new(),
            prototype: None,
            before_collect: None,
        }
    }

    pub fn named_entry(&self, id: PropertyId) -> Option<&Property> {
        self.named.iter().find(|(key, _)| *key == id).map(|(_, p)| p)
    }

    pub fn named_entry_mut(&mut self, id: PropertyId) -> Option<&mut Property> {
        self.named
            .iter_mut()
            .find(|(key, _)| *key == id)
            .map(|(_, p)| p)
    }

    /// Insert or replace a named property, keeping first-insertion order
    pub fn insert_named(&mut self, id: PropertyId, property: Property) {
        if let Some(existing) = self.named_entry_mut(id) {
            *existing = property;
        } else {
            self.named.push((id, property));
        }
    }

    pub fn remove_named(&mut self, id: PropertyId) -> bool {
        let before = self.named.len();
        self.named.retain(|(key, _)| *key != id);
        self.named.len() != before
    }

    /// Own keys in ordinary order: indices ascending, then names as inserted
    pub fn own_keys(&self) -> (Vec<u32>, Vec<PropertyId>) {
        let indexed = self.indexed.keys().copied().collect();
        let named = self.named.iter().map(|(id, _)| *id).collect();
        (indexed, named)
    }
}

/// Parsed fields of a property-descriptor object
///
/// Absent fields stay `None`; `define_own_property` fills defaults for new
/// properties and leaves existing settings alone for updates.
#[derive(Default)]
pub(crate) struct DescriptorFields {
    pub value: Option<ValueRef>,
    pub get: Option<ValueRef>,
    pub set: Option<ValueRef>,
    pub writable: Option<bool>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}
