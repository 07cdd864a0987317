//! Value Handles and Property Identifiers
//!
//! `ValueRef` is the host engine's opaque value handle: a heap slot paired
//! with a generation counter so stale handles are detected after collection.
//! `PropertyId` is a process-wide interned property name; interning is
//! global (not per runtime) so identifiers computed once can be shared by
//! every runtime in the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

/// Opaque handle to a value owned by a host runtime
///
/// Handles are cheap to copy and carry no lifetime; the runtime validates
/// the slot generation on every use and rejects handles to collected values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl ValueRef {
    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }
}

/// Kind of value a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsValueType {
    /// The undefined value
    Undefined,
    /// The null value
    Null,
    /// A boolean primitive
    Boolean,
    /// A number primitive
    Number,
    /// A string primitive
    String,
    /// An ordinary object (including proxies and external objects)
    Object,
    /// A callable function object
    Function,
    /// An error object
    Error,
    /// An array object
    Array,
}

impl JsValueType {
    /// Whether values of this type hold properties
    pub fn is_object(self) -> bool {
        matches!(
            self,
            JsValueType::Object | JsValueType::Function | JsValueType::Error | JsValueType::Array
        )
    }
}

/// Process-wide interned property name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u32);

struct Interner {
    names: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, u32>,
}

static INTERNER: Lazy<Mutex<Interner>> = Lazy::new(|| {
    Mutex::new(Interner {
        names: Vec::new(),
        lookup: HashMap::new(),
    })
});

impl PropertyId {
    /// Intern a property name, returning its process-wide identifier
    pub fn from_name(name: &str) -> PropertyId {
        let mut interner = INTERNER.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&id) = interner.lookup.get(name) {
            return PropertyId(id);
        }
        let id = interner.names.len() as u32;
        let shared: Arc<str> = Arc::from(name);
        interner.names.push(shared.clone());
        interner.lookup.insert(shared, id);
        PropertyId(id)
    }

    /// The interned name for this identifier
    pub fn name(self) -> Arc<str> {
        let interner = INTERNER.lock().unwrap_or_else(|e| e.into_inner());
        interner.names[self.0 as usize].clone()
    }
}
