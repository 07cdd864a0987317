//! Host Engine Runtime
//!
//! A small JavaScript object engine in the JsRT mold: values live in a
//! slot-and-generation heap, every operation returns a `JsResult`, and
//! garbage collection runs only when asked. There is no parser and no
//! interpreter; scripts do not exist at this layer. Native functions are
//! plain `fn` pointers that receive `&mut Runtime`, so re-entry (a callback
//! performing more engine operations, possibly invoking further callbacks)
//! is just ordinary nested calls on one mutable borrow.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::error::{JsError, JsResult};
use super::object::{
    BeforeCollectCallback, CallContext, DescriptorFields, ExternalSlot, ExternalValue, Finalizer,
    NativeCallback, ObjectCell, ObjectKind, Property, PropertyKey, PropertySlot,
};
use super::proxy;
use super::value::{JsValueType, PropertyId, ValueRef};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Tuning knobs for a runtime instance
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Heap slot capacity reserved up front
    pub initial_heap_slots: usize,
    /// Hard ceiling on live heap slots, `None` for unlimited
    pub max_heap_slots: Option<usize>,
    /// Start with diagnostic state enabled
    pub debug_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            initial_heap_slots: 256,
            max_heap_slots: None,
            debug_enabled: false,
        }
    }
}

/// Point-in-time runtime counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStats {
    /// Heap slots currently holding a live value
    pub live_slots: usize,
    /// Values allocated over the runtime's lifetime
    pub total_allocations: u64,
    /// Completed garbage collection cycles
    pub collections: u64,
    /// Slots reclaimed by the most recent cycle
    pub collected_last_cycle: usize,
}

/// Identifies a context created by [`Runtime::create_context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId(pub(crate) usize);

struct ContextData {
    global: ValueRef,
    object_prototype: ValueRef,
    proxy_ctor: Option<ValueRef>,
    embedder: Vec<Option<ValueRef>>,
}

/// Reference counts for values pinned against collection
#[derive(Default)]
pub(crate) struct RootTable {
    counts: HashMap<ValueRef, usize>,
}

/// Keeps a value alive across garbage collections until dropped
///
/// Cloning a guard adds another count on the same value; the value stays
/// pinned until every clone is gone.
pub struct Rooted {
    table: Rc<RefCell<RootTable>>,
    value: ValueRef,
}

impl Rooted {
    /// The pinned value
    pub fn value(&self) -> ValueRef {
        self.value
    }
}

impl Clone for Rooted {
    fn clone(&self) -> Self {
        let mut table = self.table.borrow_mut();
        *table.counts.entry(self.value).or_insert(0) += 1;
        Rooted {
            table: Rc::clone(&self.table),
            value: self.value,
        }
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        let mut table = self.table.borrow_mut();
        if let Some(count) = table.counts.get_mut(&self.value) {
            *count -= 1;
            if *count == 0 {
                table.counts.remove(&self.value);
            }
        }
    }
}

enum Cell {
    Free,
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    Object(Box<ObjectCell>),
}

struct HeapEntry {
    generation: u32,
    marked: bool,
    cell: Cell,
}

/// Property ids the runtime resolves once at startup
pub(crate) struct WellKnownIds {
    pub length: PropertyId,
    pub prototype: PropertyId,
    pub constructor: PropertyId,
    pub name: PropertyId,
    pub message: PropertyId,
    pub stack: PropertyId,
    pub next: PropertyId,
    pub done: PropertyId,
    pub value: PropertyId,
    pub get: PropertyId,
    pub set: PropertyId,
    pub writable: PropertyId,
    pub enumerable: PropertyId,
    pub configurable: PropertyId,
}

impl WellKnownIds {
    fn resolve() -> Self {
        WellKnownIds {
            length: PropertyId::from_name("length"),
            prototype: PropertyId::from_name("prototype"),
            constructor: PropertyId::from_name("constructor"),
            name: PropertyId::from_name("name"),
            message: PropertyId::from_name("message"),
            stack: PropertyId::from_name("stack"),
            next: PropertyId::from_name("next"),
            done: PropertyId::from_name("done"),
            value: PropertyId::from_name("value"),
            get: PropertyId::from_name("get"),
            set: PropertyId::from_name("set"),
            writable: PropertyId::from_name("writable"),
            enumerable: PropertyId::from_name("enumerable"),
            configurable: PropertyId::from_name("configurable"),
        }
    }
}

/// The host engine instance
///
/// Not `Send`: a runtime and every handle it issues belong to the thread
/// that created them.
pub struct Runtime {
    id: u64,
    config: RuntimeConfig,
    slots: Vec<HeapEntry>,
    free: Vec<u32>,
    contexts: Vec<ContextData>,
    context_stack: Vec<usize>,
    roots: Rc<RefCell<RootTable>>,
    exception: Option<ValueRef>,
    undefined: ValueRef,
    null: ValueRef,
    true_value: ValueRef,
    false_value: ValueRef,
    pub(crate) ids: WellKnownIds,
    in_collection: bool,
    debug_enabled: bool,
    total_allocations: u64,
    collections: u64,
    collected_last_cycle: usize,
}

/// Outcome of probing one object on the chain for a read
enum Load {
    Data(ValueRef),
    Getter(Option<ValueRef>),
    ArrayLength(u32),
    Proxy { target: ValueRef, handler: ValueRef },
    Missing { prototype: Option<ValueRef> },
}

/// Outcome of probing one object on the chain for a write
enum Store {
    Setter(Option<ValueRef>),
    WritableData,
    ReadOnlyData,
    Proxy { target: ValueRef, handler: ValueRef },
    Missing { prototype: Option<ValueRef> },
}

/// Shape of an own property when reported as a descriptor object
enum DescriptorShape {
    Data { value: ValueRef, writable: bool },
    Accessor { get: Option<ValueRef>, set: Option<ValueRef> },
}

impl Runtime {
    /// Creates a runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Self {
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let mut slots = Vec::with_capacity(config.initial_heap_slots.max(4));
        let mut seed = |cell: Cell| {
            let slot = slots.len() as u32;
            slots.push(HeapEntry {
                generation: 0,
                marked: false,
                cell,
            });
            ValueRef::new(slot, 0)
        };
        let undefined = seed(Cell::Undefined);
        let null = seed(Cell::Null);
        let true_value = seed(Cell::Boolean(true));
        let false_value = seed(Cell::Boolean(false));
        debug!("runtime created: id={}", id);
        let debug_enabled = config.debug_enabled;
        Runtime {
            id,
            config,
            slots,
            free: Vec::new(),
            contexts: Vec::new(),
            context_stack: Vec::new(),
            roots: Rc::new(RefCell::new(RootTable::default())),
            exception: None,
            undefined,
            null,
            true_value,
            false_value,
            ids: WellKnownIds::resolve(),
            in_collection: false,
            debug_enabled,
            total_allocations: 4,
            collections: 0,
            collected_last_cycle: 0,
        }
    }

    /// Whether diagnostic state is enabled for this runtime
    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled
    }

    /// Toggles the diagnostic state flag
    pub fn set_debug_enabled(&mut self, enabled: bool) {
        self.debug_enabled = enabled;
    }

    /// Process-unique identifier of this runtime
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The configuration the runtime was created with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current counters
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            live_slots: self.slots.len() - self.free.len(),
            total_allocations: self.total_allocations,
            collections: self.collections,
            collected_last_cycle: self.collected_last_cycle,
        }
    }

    // ---- heap plumbing ----

    fn alloc(&mut self, cell: Cell) -> JsResult<ValueRef> {
        if let Some(max) = self.config.max_heap_slots {
            if self.slots.len() - self.free.len() >= max {
                return Err(JsError::OutOfMemory);
            }
        }
        self.total_allocations += 1;
        let marked = self.in_collection;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.cell = cell;
            entry.marked = marked;
            Ok(ValueRef::new(slot, entry.generation))
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(HeapEntry {
                generation: 0,
                marked,
                cell,
            });
            Ok(ValueRef::new(slot, 0))
        }
    }

    fn entry(&self, value: ValueRef) -> JsResult<&HeapEntry> {
        let entry = self
            .slots
            .get(value.slot as usize)
            .ok_or(JsError::InvalidHandle)?;
        if entry.generation != value.generation || matches!(entry.cell, Cell::Free) {
            return Err(JsError::InvalidHandle);
        }
        Ok(entry)
    }

    fn entry_mut(&mut self, value: ValueRef) -> JsResult<&mut HeapEntry> {
        let entry = self
            .slots
            .get_mut(value.slot as usize)
            .ok_or(JsError::InvalidHandle)?;
        if entry.generation != value.generation || matches!(entry.cell, Cell::Free) {
            return Err(JsError::InvalidHandle);
        }
        Ok(entry)
    }

    fn object_cell(&self, value: ValueRef) -> JsResult<&ObjectCell> {
        match &self.entry(value)?.cell {
            Cell::Object(cell) => Ok(cell),
            _ => Err(JsError::NotAnObject),
        }
    }

    fn object_cell_mut(&mut self, value: ValueRef) -> JsResult<&mut ObjectCell> {
        match &mut self.entry_mut(value)?.cell {
            Cell::Object(cell) => Ok(cell),
            _ => Err(JsError::NotAnObject),
        }
    }

    /// Whether the handle still points at a live value
    pub fn is_live(&self, value: ValueRef) -> bool {
        self.entry(value).is_ok()
    }

    // ---- contexts ----

    /// Creates a context with its own global object and builtins
    pub fn create_context(&mut self) -> JsResult<ContextId> {
        let object_prototype = self.alloc(Cell::Object(Box::new(ObjectCell::new(
            ObjectKind::Ordinary,
        ))))?;
        let mut global_cell = ObjectCell::new(ObjectKind::Ordinary);
        global_cell.prototype = Some(object_prototype);
        let global = self.alloc(Cell::Object(Box::new(global_cell)))?;
        let index = self.contexts.len();
        self.contexts.push(ContextData {
            global,
            object_prototype,
            proxy_ctor: None,
            embedder: Vec::new(),
        });
        self.context_stack.push(index);
        let result = self.install_context_builtins(index);
        self.context_stack.pop();
        result?;
        debug!("context created: runtime={} context={}", self.id, index);
        Ok(ContextId(index))
    }

    fn install_context_builtins(&mut self, index: usize) -> JsResult<()> {
        let global = self.contexts[index].global;
        let object_prototype = self.contexts[index].object_prototype;
        let ids = (self.ids.prototype, self.ids.constructor);

        let object_ctor = self.create_function("Object", builtin_object)?;
        self.define_data_property(object_ctor, ids.0, object_prototype, false, false, false)?;
        self.define_data_property(object_prototype, ids.1, object_ctor, true, false, true)?;
        let name = PropertyId::from_name("Object");
        self.define_data_property(global, name, object_ctor, true, false, true)?;

        let proxy_ctor = self.create_function("Proxy", builtin_proxy)?;
        let name = PropertyId::from_name("Proxy");
        self.define_data_property(global, name, proxy_ctor, true, false, true)?;
        self.contexts[index].proxy_ctor = Some(proxy_ctor);

        let name = PropertyId::from_name("globalThis");
        self.define_data_property(global, name, global, true, false, true)?;
        Ok(())
    }

    /// Pushes a context onto the current-context stack
    pub fn enter_context(&mut self, context: ContextId) -> JsResult<()> {
        if context.0 >= self.contexts.len() {
            return Err(JsError::InvalidArgument("unknown context"));
        }
        self.context_stack.push(context.0);
        Ok(())
    }

    /// Pops the current context
    pub fn leave_context(&mut self) -> JsResult<()> {
        self.context_stack
            .pop()
            .map(|_| ())
            .ok_or(JsError::NoCurrentContext)
    }

    /// The context on top of the stack
    pub fn current_context(&self) -> JsResult<ContextId> {
        self.context_stack
            .last()
            .map(|&index| ContextId(index))
            .ok_or(JsError::NoCurrentContext)
    }

    /// Global object of the given context
    pub fn global_object(&self, context: ContextId) -> JsResult<ValueRef> {
        self.contexts
            .get(context.0)
            .map(|data| data.global)
            .ok_or(JsError::InvalidArgument("unknown context"))
    }

    /// Global object of the current context
    pub fn current_global(&self) -> JsResult<ValueRef> {
        let context = self.current_context()?;
        self.global_object(context)
    }

    fn current_object_prototype(&self) -> JsResult<ValueRef> {
        let context = self.current_context()?;
        Ok(self.contexts[context.0].object_prototype)
    }

    /// The `Proxy` constructor installed in the current context
    pub fn proxy_constructor(&self) -> JsResult<ValueRef> {
        let context = self.current_context()?;
        self.contexts[context.0]
            .proxy_ctor
            .ok_or(JsError::InvalidArgument("context has no Proxy constructor"))
    }

    /// Stores a value in a context's numbered embedder slot
    pub fn set_context_data(
        &mut self,
        context: ContextId,
        index: usize,
        value: ValueRef,
    ) -> JsResult<()> {
        self.entry(value)?;
        let data = self
            .contexts
            .get_mut(context.0)
            .ok_or(JsError::InvalidArgument("unknown context"))?;
        if data.embedder.len() <= index {
            data.embedder.resize(index + 1, None);
        }
        data.embedder[index] = Some(value);
        Ok(())
    }

    /// Reads a context's numbered embedder slot, `undefined` when unset
    pub fn context_data(&self, context: ContextId, index: usize) -> JsResult<ValueRef> {
        let data = self
            .contexts
            .get(context.0)
            .ok_or(JsError::InvalidArgument("unknown context"))?;
        Ok(data
            .embedder
            .get(index)
            .copied()
            .flatten()
            .unwrap_or(self.undefined))
    }

    // ---- singletons and allocation ----

    /// The `undefined` value
    pub fn undefined_value(&self) -> ValueRef {
        self.undefined
    }

    /// The `null` value
    pub fn null_value(&self) -> ValueRef {
        self.null
    }

    /// One of the two boolean singletons
    pub fn boolean_value(&self, value: bool) -> ValueRef {
        if value {
            self.true_value
        } else {
            self.false_value
        }
    }

    /// Allocates a number value
    pub fn number_value(&mut self, value: f64) -> JsResult<ValueRef> {
        self.alloc(Cell::Number(value))
    }

    /// Allocates a string value
    pub fn string_value(&mut self, value: &str) -> JsResult<ValueRef> {
        self.alloc(Cell::String(Arc::from(value)))
    }

    /// Creates a plain object whose prototype is the context's `Object.prototype`
    pub fn create_object(&mut self) -> JsResult<ValueRef> {
        let prototype = self.current_object_prototype()?;
        let mut cell = ObjectCell::new(ObjectKind::Ordinary);
        cell.prototype = Some(prototype);
        self.alloc(Cell::Object(Box::new(cell)))
    }

    /// Creates an array of the given length
    pub fn create_array(&mut self, length: u32) -> JsResult<ValueRef> {
        let prototype = self.current_object_prototype()?;
        let mut cell = ObjectCell::new(ObjectKind::Array { length });
        cell.prototype = Some(prototype);
        self.alloc(Cell::Object(Box::new(cell)))
    }

    /// Creates a native function object
    pub fn create_function(&mut self, name: &str, callback: NativeCallback) -> JsResult<ValueRef> {
        let prototype = self.current_object_prototype()?;
        let name_value = self.string_value(name)?;
        let mut cell = ObjectCell::new(ObjectKind::Function { callback });
        cell.prototype = Some(prototype);
        let name_id = self.ids.name;
        cell.insert_named(name_id, Property::data(name_value, false, false, true));
        self.alloc(Cell::Object(Box::new(cell)))
    }

    /// Creates an object carrying opaque external data
    ///
    /// The finalizer, when present, runs exactly once: either when the
    /// object is collected or when the runtime is dropped.
    pub fn create_external(
        &mut self,
        data: ExternalValue,
        finalizer: Option<Finalizer>,
    ) -> JsResult<ValueRef> {
        let prototype = self.current_object_prototype()?;
        let mut cell = ObjectCell::new(ObjectKind::External(ExternalSlot { data, finalizer }));
        cell.prototype = Some(prototype);
        self.alloc(Cell::Object(Box::new(cell)))
    }

    /// Creates a proxy over `target` with the given handler object
    pub fn create_proxy(&mut self, target: ValueRef, handler: ValueRef) -> JsResult<ValueRef> {
        self.object_cell(target)?;
        self.object_cell(handler)?;
        self.alloc(Cell::Object(Box::new(ObjectCell::new(ObjectKind::Proxy {
            target,
            handler,
        }))))
    }

    fn create_error_with_name(&mut self, name: &str, message: ValueRef) -> JsResult<ValueRef> {
        let prototype = self.current_object_prototype()?;
        let mut cell = ObjectCell::new(ObjectKind::Error);
        cell.prototype = Some(prototype);
        let error = self.alloc(Cell::Object(Box::new(cell)))?;
        let name_value = self.string_value(name)?;
        let message_text = self.to_string(message)?;
        let stack_text = format!("{}: {}\n    at <anonymous>", name, message_text);
        let stack_value = self.string_value(&stack_text)?;
        let ids = (self.ids.name, self.ids.message, self.ids.stack);
        self.define_data_property(error, ids.0, name_value, true, false, true)?;
        self.define_data_property(error, ids.1, message, true, false, true)?;
        self.define_data_property(error, ids.2, stack_value, true, false, true)?;
        Ok(error)
    }

    /// Creates an `Error` object with the given message value
    pub fn create_error(&mut self, message: ValueRef) -> JsResult<ValueRef> {
        self.create_error_with_name("Error", message)
    }

    /// Creates a `TypeError` object
    pub fn create_type_error(&mut self, message: ValueRef) -> JsResult<ValueRef> {
        self.create_error_with_name("TypeError", message)
    }

    /// Creates a `RangeError` object
    pub fn create_range_error(&mut self, message: ValueRef) -> JsResult<ValueRef> {
        self.create_error_with_name("RangeError", message)
    }

    // ---- typing and conversion ----

    /// The engine type of a value
    pub fn type_of(&self, value: ValueRef) -> JsResult<JsValueType> {
        match &self.entry(value)?.cell {
            Cell::Free => Err(JsError::InvalidHandle),
            Cell::Undefined => Ok(JsValueType::Undefined),
            Cell::Null => Ok(JsValueType::Null),
            Cell::Boolean(_) => Ok(JsValueType::Boolean),
            Cell::Number(_) => Ok(JsValueType::Number),
            Cell::String(_) => Ok(JsValueType::String),
            Cell::Object(cell) => match &cell.kind {
                ObjectKind::Ordinary | ObjectKind::External(_) => Ok(JsValueType::Object),
                ObjectKind::Error => Ok(JsValueType::Error),
                ObjectKind::Array { .. } => Ok(JsValueType::Array),
                ObjectKind::Function { .. } => Ok(JsValueType::Function),
                ObjectKind::Proxy { target, .. } => self.type_of(*target),
            },
        }
    }

    /// Whether the value is object-like (including functions and arrays)
    pub fn is_object(&self, value: ValueRef) -> JsResult<bool> {
        Ok(self.type_of(value)?.is_object())
    }

    /// ECMAScript truthiness of a value
    pub fn to_boolean(&self, value: ValueRef) -> JsResult<bool> {
        match &self.entry(value)?.cell {
            Cell::Free => Err(JsError::InvalidHandle),
            Cell::Undefined | Cell::Null => Ok(false),
            Cell::Boolean(b) => Ok(*b),
            Cell::Number(n) => Ok(*n != 0.0 && !n.is_nan()),
            Cell::String(s) => Ok(!s.is_empty()),
            Cell::Object(_) => Ok(true),
        }
    }

    /// Converts a value to a number, `NaN` where no numeric reading exists
    pub fn to_number(&self, value: ValueRef) -> JsResult<f64> {
        match &self.entry(value)?.cell {
            Cell::Free => Err(JsError::InvalidHandle),
            Cell::Undefined => Ok(f64::NAN),
            Cell::Null => Ok(0.0),
            Cell::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Cell::Number(n) => Ok(*n),
            Cell::String(s) => Ok(parse_number(s)),
            Cell::Object(_) => Ok(f64::NAN),
        }
    }

    /// Converts a value to its string form
    pub fn to_string(&mut self, value: ValueRef) -> JsResult<Arc<str>> {
        enum Plan {
            Done(Arc<str>),
            Array(u32),
            Error,
            Function,
            Object,
        }
        let plan = match &self.entry(value)?.cell {
            Cell::Free => return Err(JsError::InvalidHandle),
            Cell::Undefined => Plan::Done(Arc::from("undefined")),
            Cell::Null => Plan::Done(Arc::from("null")),
            Cell::Boolean(b) => Plan::Done(Arc::from(if *b { "true" } else { "false" })),
            Cell::Number(n) => Plan::Done(Arc::from(format_number(*n).as_str())),
            Cell::String(s) => Plan::Done(Arc::clone(s)),
            Cell::Object(cell) => match &cell.kind {
                ObjectKind::Array { length } => Plan::Array(*length),
                ObjectKind::Error => Plan::Error,
                ObjectKind::Function { .. } => Plan::Function,
                _ => Plan::Object,
            },
        };
        match plan {
            Plan::Done(s) => Ok(s),
            Plan::Array(length) => {
                let mut parts = Vec::with_capacity(length as usize);
                for index in 0..length {
                    let element = self.get_indexed(value, index)?;
                    let kind = self.type_of(element)?;
                    if matches!(kind, JsValueType::Undefined | JsValueType::Null) {
                        parts.push(String::new());
                    } else {
                        parts.push(self.to_string(element)?.to_string());
                    }
                }
                Ok(Arc::from(parts.join(",").as_str()))
            }
            Plan::Error => {
                let name = self.get_property(value, self.ids.name)?;
                let message = self.get_property(value, self.ids.message)?;
                let name_text = self.to_string(name)?;
                if matches!(self.type_of(message)?, JsValueType::Undefined) {
                    Ok(name_text)
                } else {
                    let message_text = self.to_string(message)?;
                    Ok(Arc::from(format!("{}: {}", name_text, message_text).as_str()))
                }
            }
            Plan::Function => {
                let name = self.get_property(value, self.ids.name)?;
                let name_text = self.to_string(name)?;
                Ok(Arc::from(
                    format!("function {}() {{ [native code] }}", name_text).as_str(),
                ))
            }
            Plan::Object => Ok(Arc::from("[object Object]")),
        }
    }

    /// The content of a string value; errors on any other type
    pub fn string_content(&self, value: ValueRef) -> JsResult<Arc<str>> {
        match &self.entry(value)?.cell {
            Cell::String(s) => Ok(Arc::clone(s)),
            _ => Err(JsError::InvalidArgument("value is not a string")),
        }
    }

    /// The content of a number value; errors on any other type
    pub fn number_content(&self, value: ValueRef) -> JsResult<f64> {
        match &self.entry(value)?.cell {
            Cell::Number(n) => Ok(*n),
            _ => Err(JsError::InvalidArgument("value is not a number")),
        }
    }

    /// `===` comparison
    pub fn strict_equals(&self, a: ValueRef, b: ValueRef) -> JsResult<bool> {
        match (&self.entry(a)?.cell, &self.entry(b)?.cell) {
            (Cell::Undefined, Cell::Undefined) => Ok(true),
            (Cell::Null, Cell::Null) => Ok(true),
            (Cell::Boolean(x), Cell::Boolean(y)) => Ok(x == y),
            (Cell::Number(x), Cell::Number(y)) => Ok(x == y),
            (Cell::String(x), Cell::String(y)) => Ok(x == y),
            (Cell::Object(_), Cell::Object(_)) => Ok(a == b),
            _ => Ok(false),
        }
    }

    /// `==` comparison
    pub fn loose_equals(&mut self, a: ValueRef, b: ValueRef) -> JsResult<bool> {
        let ta = self.type_of(a)?;
        let tb = self.type_of(b)?;
        if ta == tb || (ta.is_object() && tb.is_object()) {
            return self.strict_equals(a, b);
        }
        let nullish =
            |t: JsValueType| matches!(t, JsValueType::Undefined | JsValueType::Null);
        if nullish(ta) || nullish(tb) {
            return Ok(nullish(ta) && nullish(tb));
        }
        if ta.is_object() {
            let text = self.to_string(a)?;
            let as_string = self.string_value(&text)?;
            return self.loose_equals(as_string, b);
        }
        if tb.is_object() {
            let text = self.to_string(b)?;
            let as_string = self.string_value(&text)?;
            return self.loose_equals(a, as_string);
        }
        if ta == JsValueType::String && tb == JsValueType::String {
            return self.strict_equals(a, b);
        }
        let na = self.to_number(a)?;
        let nb = self.to_number(b)?;
        Ok(na == nb)
    }

    // ---- property access ----

    fn lookup_step(&self, object: ValueRef, key: PropertyKey) -> JsResult<Load> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, handler } = cell.kind {
            return Ok(Load::Proxy { target, handler });
        }
        if let ObjectKind::Array { length } = cell.kind {
            if let PropertyKey::Named(id) = key {
                if id == self.ids.length {
                    return Ok(Load::ArrayLength(length));
                }
            }
        }
        let property = match key {
            PropertyKey::Index(index) => cell.indexed.get(&index),
            PropertyKey::Named(id) => cell.named_entry(id),
        };
        match property {
            Some(property) => match &property.slot {
                PropertySlot::Data(value) => Ok(Load::Data(*value)),
                PropertySlot::Accessor { get, .. } => Ok(Load::Getter(*get)),
            },
            None => Ok(Load::Missing {
                prototype: cell.prototype,
            }),
        }
    }

    pub(crate) fn get_key(
        &mut self,
        object: ValueRef,
        key: PropertyKey,
        receiver: ValueRef,
    ) -> JsResult<ValueRef> {
        let mut current = object;
        loop {
            match self.lookup_step(current, key)? {
                Load::Proxy { target, handler } => {
                    return proxy::get(self, target, handler, key, receiver);
                }
                Load::ArrayLength(length) => return self.number_value(length as f64),
                Load::Data(value) => return Ok(value),
                Load::Getter(Some(getter)) => {
                    return self.call_function(getter, receiver, &[]);
                }
                Load::Getter(None) => return Ok(self.undefined),
                Load::Missing { prototype } => match prototype {
                    Some(next) => current = next,
                    None => return Ok(self.undefined),
                },
            }
        }
    }

    fn store_step(&self, object: ValueRef, key: PropertyKey) -> JsResult<Store> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, handler } = cell.kind {
            return Ok(Store::Proxy { target, handler });
        }
        let property = match key {
            PropertyKey::Index(index) => cell.indexed.get(&index),
            PropertyKey::Named(id) => cell.named_entry(id),
        };
        match property {
            Some(property) => match &property.slot {
                PropertySlot::Accessor { set, .. } => Ok(Store::Setter(*set)),
                PropertySlot::Data(_) if property.writable => Ok(Store::WritableData),
                PropertySlot::Data(_) => Ok(Store::ReadOnlyData),
            },
            None => Ok(Store::Missing {
                prototype: cell.prototype,
            }),
        }
    }

    pub(crate) fn set_key(
        &mut self,
        object: ValueRef,
        key: PropertyKey,
        value: ValueRef,
        receiver: ValueRef,
    ) -> JsResult<()> {
        self.entry(value)?;
        if let PropertyKey::Named(id) = key {
            if id == self.ids.length {
                if let ObjectKind::Array { .. } = self.object_cell(object)?.kind {
                    return self.set_array_length(object, value);
                }
            }
        }
        let mut current = object;
        loop {
            match self.store_step(current, key)? {
                Store::Proxy { target, handler } => {
                    proxy::set(self, target, handler, key, value, receiver)?;
                    return Ok(());
                }
                Store::Setter(Some(setter)) => {
                    self.call_function(setter, receiver, &[value])?;
                    return Ok(());
                }
                // writes through a missing setter or a read-only slot are
                // dropped, as in sloppy mode
                Store::Setter(None) => return Ok(()),
                Store::ReadOnlyData => return Ok(()),
                Store::WritableData => {
                    if current == receiver {
                        let cell = self.object_cell_mut(receiver)?;
                        let property = match key {
                            PropertyKey::Index(index) => cell.indexed.get_mut(&index),
                            PropertyKey::Named(id) => cell.named_entry_mut(id),
                        };
                        if let Some(property) = property {
                            property.slot = PropertySlot::Data(value);
                        }
                        return Ok(());
                    }
                    return self.store_own(receiver, key, Property::data(value, true, true, true));
                }
                Store::Missing { prototype } => match prototype {
                    Some(next) => current = next,
                    None => {
                        return self.store_own(
                            receiver,
                            key,
                            Property::data(value, true, true, true),
                        );
                    }
                },
            }
        }
    }

    fn store_own(
        &mut self,
        object: ValueRef,
        key: PropertyKey,
        property: Property,
    ) -> JsResult<()> {
        let cell = self.object_cell_mut(object)?;
        match key {
            PropertyKey::Index(index) => {
                cell.indexed.insert(index, property);
                if let ObjectKind::Array { length } = &mut cell.kind {
                    if index >= *length {
                        *length = index + 1;
                    }
                }
            }
            PropertyKey::Named(id) => cell.insert_named(id, property),
        }
        Ok(())
    }

    fn set_array_length(&mut self, array: ValueRef, value: ValueRef) -> JsResult<()> {
        let requested = self.to_number(value)?;
        if !(requested.is_finite() && requested >= 0.0 && requested.fract() == 0.0)
            || requested > f64::from(u32::MAX)
        {
            return Err(JsError::OutOfRange);
        }
        let new_length = requested as u32;
        let cell = self.object_cell_mut(array)?;
        if let ObjectKind::Array { length } = &mut cell.kind {
            *length = new_length;
            cell.indexed.retain(|&index, _| index < new_length);
        }
        Ok(())
    }

    pub(crate) fn has_key(&mut self, object: ValueRef, key: PropertyKey) -> JsResult<bool> {
        let mut current = object;
        loop {
            match self.lookup_step(current, key)? {
                Load::Proxy { target, handler } => {
                    return proxy::has(self, target, handler, key);
                }
                Load::ArrayLength(_) | Load::Data(_) | Load::Getter(_) => return Ok(true),
                Load::Missing { prototype } => match prototype {
                    Some(next) => current = next,
                    None => return Ok(false),
                },
            }
        }
    }

    pub(crate) fn has_own_key(&mut self, object: ValueRef, key: PropertyKey) -> JsResult<bool> {
        match self.lookup_step(object, key)? {
            Load::Proxy { target, handler } => proxy::has_own(self, target, handler, key),
            Load::ArrayLength(_) | Load::Data(_) | Load::Getter(_) => Ok(true),
            Load::Missing { .. } => Ok(false),
        }
    }

    pub(crate) fn delete_key(&mut self, object: ValueRef, key: PropertyKey) -> JsResult<bool> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, handler } = cell.kind {
            return proxy::delete(self, target, handler, key);
        }
        if let ObjectKind::Array { .. } = cell.kind {
            if let PropertyKey::Named(id) = key {
                if id == self.ids.length {
                    return Ok(false);
                }
            }
        }
        let configurable = match key {
            PropertyKey::Index(index) => cell.indexed.get(&index).map(|p| p.configurable),
            PropertyKey::Named(id) => cell.named_entry(id).map(|p| p.configurable),
        };
        match configurable {
            None => Ok(true),
            Some(false) => Ok(false),
            Some(true) => {
                let cell = self.object_cell_mut(object)?;
                match key {
                    PropertyKey::Index(index) => {
                        cell.indexed.remove(&index);
                    }
                    PropertyKey::Named(id) => {
                        cell.remove_named(id);
                    }
                }
                Ok(true)
            }
        }
    }

    pub(crate) fn descriptor_key(
        &mut self,
        object: ValueRef,
        key: PropertyKey,
    ) -> JsResult<ValueRef> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, handler } = cell.kind {
            return proxy::own_property_descriptor(self, target, handler, key);
        }
        if let ObjectKind::Array { length } = cell.kind {
            if let PropertyKey::Named(id) = key {
                if id == self.ids.length {
                    let value = self.number_value(length as f64)?;
                    let shape = DescriptorShape::Data { value, writable: true };
                    return self.make_descriptor_object(shape, false, false);
                }
            }
        }
        let property = match key {
            PropertyKey::Index(index) => cell.indexed.get(&index),
            PropertyKey::Named(id) => cell.named_entry(id),
        };
        let (shape, enumerable, configurable) = match property {
            None => return Ok(self.undefined),
            Some(property) => {
                let shape = match &property.slot {
                    PropertySlot::Data(value) => DescriptorShape::Data {
                        value: *value,
                        writable: property.writable,
                    },
                    PropertySlot::Accessor { get, set } => DescriptorShape::Accessor {
                        get: *get,
                        set: *set,
                    },
                };
                (shape, property.enumerable, property.configurable)
            }
        };
        self.make_descriptor_object(shape, enumerable, configurable)
    }

    fn make_descriptor_object(
        &mut self,
        shape: DescriptorShape,
        enumerable: bool,
        configurable: bool,
    ) -> JsResult<ValueRef> {
        let descriptor = self.create_object()?;
        match shape {
            DescriptorShape::Data { value, writable } => {
                let writable = self.boolean_value(writable);
                let id = self.ids.value;
                self.define_data_property(descriptor, id, value, true, true, true)?;
                let id = self.ids.writable;
                self.define_data_property(descriptor, id, writable, true, true, true)?;
            }
            DescriptorShape::Accessor { get, set } => {
                let get = get.unwrap_or(self.undefined);
                let set = set.unwrap_or(self.undefined);
                let id = self.ids.get;
                self.define_data_property(descriptor, id, get, true, true, true)?;
                let id = self.ids.set;
                self.define_data_property(descriptor, id, set, true, true, true)?;
            }
        }
        let enumerable = self.boolean_value(enumerable);
        let configurable = self.boolean_value(configurable);
        let id = self.ids.enumerable;
        self.define_data_property(descriptor, id, enumerable, true, true, true)?;
        let id = self.ids.configurable;
        self.define_data_property(descriptor, id, configurable, true, true, true)?;
        Ok(descriptor)
    }

    pub(crate) fn apply_descriptor(
        &mut self,
        object: ValueRef,
        key: PropertyKey,
        fields: DescriptorFields,
    ) -> JsResult<bool> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, .. } = cell.kind {
            return self.apply_descriptor(target, key, fields);
        }
        let existing = match key {
            PropertyKey::Index(index) => cell.indexed.get(&index),
            PropertyKey::Named(id) => cell.named_entry(id),
        };
        let base = match existing {
            Some(property) if !property.configurable => return Ok(false),
            Some(property) => Some(property.clone()),
            None => None,
        };
        let slot = if fields.get.is_some() || fields.set.is_some() {
            PropertySlot::Accessor {
                get: fields.get,
                set: fields.set,
            }
        } else if let Some(value) = fields.value {
            PropertySlot::Data(value)
        } else {
            base.as_ref()
                .map(|p| p.slot)
                .unwrap_or(PropertySlot::Data(self.undefined))
        };
        let defaults = base
            .map(|p| (p.writable, p.enumerable, p.configurable))
            .unwrap_or((false, false, false));
        let property = Property {
            slot,
            writable: fields.writable.unwrap_or(defaults.0),
            enumerable: fields.enumerable.unwrap_or(defaults.1),
            configurable: fields.configurable.unwrap_or(defaults.2),
        };
        self.store_own(object, key, property)?;
        Ok(true)
    }

    fn parse_descriptor(&mut self, descriptor: ValueRef) -> JsResult<DescriptorFields> {
        if !self.is_object(descriptor)? {
            return Err(JsError::InvalidArgument("property descriptor must be an object"));
        }
        let mut fields = DescriptorFields::default();
        let ids = (
            self.ids.value,
            self.ids.get,
            self.ids.set,
            self.ids.writable,
            self.ids.enumerable,
            self.ids.configurable,
        );
        if self.has_property(descriptor, ids.0)? {
            fields.value = Some(self.get_property(descriptor, ids.0)?);
        }
        if self.has_property(descriptor, ids.1)? {
            let get = self.get_property(descriptor, ids.1)?;
            if !matches!(self.type_of(get)?, JsValueType::Undefined) {
                fields.get = Some(get);
            }
        }
        if self.has_property(descriptor, ids.2)? {
            let set = self.get_property(descriptor, ids.2)?;
            if !matches!(self.type_of(set)?, JsValueType::Undefined) {
                fields.set = Some(set);
            }
        }
        if self.has_property(descriptor, ids.3)? {
            let value = self.get_property(descriptor, ids.3)?;
            fields.writable = Some(self.to_boolean(value)?);
        }
        if self.has_property(descriptor, ids.4)? {
            let value = self.get_property(descriptor, ids.4)?;
            fields.enumerable = Some(self.to_boolean(value)?);
        }
        if self.has_property(descriptor, ids.5)? {
            let value = self.get_property(descriptor, ids.5)?;
            fields.configurable = Some(self.to_boolean(value)?);
        }
        Ok(fields)
    }

    /// Reads a named property, walking the prototype chain
    pub fn get_property(&mut self, object: ValueRef, id: PropertyId) -> JsResult<ValueRef> {
        self.get_key(object, PropertyKey::Named(id), object)
    }

    /// Reads an indexed property, walking the prototype chain
    pub fn get_indexed(&mut self, object: ValueRef, index: u32) -> JsResult<ValueRef> {
        self.get_key(object, PropertyKey::Index(index), object)
    }

    /// Writes a named property with ordinary assignment semantics
    pub fn set_property(
        &mut self,
        object: ValueRef,
        id: PropertyId,
        value: ValueRef,
    ) -> JsResult<()> {
        self.set_key(object, PropertyKey::Named(id), value, object)
    }

    /// Writes an indexed property with ordinary assignment semantics
    pub fn set_indexed(&mut self, object: ValueRef, index: u32, value: ValueRef) -> JsResult<()> {
        self.set_key(object, PropertyKey::Index(index), value, object)
    }

    /// Whether the property exists on the object or its prototype chain
    pub fn has_property(&mut self, object: ValueRef, id: PropertyId) -> JsResult<bool> {
        self.has_key(object, PropertyKey::Named(id))
    }

    /// Whether the indexed property exists on the object or its chain
    pub fn has_indexed(&mut self, object: ValueRef, index: u32) -> JsResult<bool> {
        self.has_key(object, PropertyKey::Index(index))
    }

    /// Whether the property exists directly on the object
    pub fn has_own_property(&mut self, object: ValueRef, id: PropertyId) -> JsResult<bool> {
        self.has_own_key(object, PropertyKey::Named(id))
    }

    /// Whether the indexed property exists directly on the object
    pub fn has_own_indexed(&mut self, object: ValueRef, index: u32) -> JsResult<bool> {
        self.has_own_key(object, PropertyKey::Index(index))
    }

    /// Deletes an own named property; `true` when absent or removed
    pub fn delete_property(&mut self, object: ValueRef, id: PropertyId) -> JsResult<bool> {
        self.delete_key(object, PropertyKey::Named(id))
    }

    /// Deletes an own indexed property; `true` when absent or removed
    pub fn delete_indexed(&mut self, object: ValueRef, index: u32) -> JsResult<bool> {
        self.delete_key(object, PropertyKey::Index(index))
    }

    /// Own-property descriptor object, or `undefined` when absent
    pub fn get_own_property_descriptor(
        &mut self,
        object: ValueRef,
        id: PropertyId,
    ) -> JsResult<ValueRef> {
        self.descriptor_key(object, PropertyKey::Named(id))
    }

    /// Own descriptor for an indexed property, or `undefined` when absent
    pub fn get_own_indexed_descriptor(
        &mut self,
        object: ValueRef,
        index: u32,
    ) -> JsResult<ValueRef> {
        self.descriptor_key(object, PropertyKey::Index(index))
    }

    /// Defines or updates a data property with explicit attributes
    pub fn define_data_property(
        &mut self,
        object: ValueRef,
        id: PropertyId,
        value: ValueRef,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    ) -> JsResult<bool> {
        self.apply_descriptor(
            object,
            PropertyKey::Named(id),
            DescriptorFields {
                value: Some(value),
                writable: Some(writable),
                enumerable: Some(enumerable),
                configurable: Some(configurable),
                ..DescriptorFields::default()
            },
        )
    }

    /// Defines or updates an indexed data property with explicit attributes
    pub fn define_indexed_data_property(
        &mut self,
        object: ValueRef,
        index: u32,
        value: ValueRef,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    ) -> JsResult<bool> {
        self.apply_descriptor(
            object,
            PropertyKey::Index(index),
            DescriptorFields {
                value: Some(value),
                writable: Some(writable),
                enumerable: Some(enumerable),
                configurable: Some(configurable),
                ..DescriptorFields::default()
            },
        )
    }

    /// Defines or updates an accessor property
    pub fn define_accessor_property(
        &mut self,
        object: ValueRef,
        id: PropertyId,
        get: Option<ValueRef>,
        set: Option<ValueRef>,
        enumerable: bool,
        configurable: bool,
    ) -> JsResult<bool> {
        self.apply_descriptor(
            object,
            PropertyKey::Named(id),
            DescriptorFields {
                get,
                set,
                enumerable: Some(enumerable),
                configurable: Some(configurable),
                ..DescriptorFields::default()
            },
        )
    }

    /// Defines a named property from a descriptor object
    pub fn define_property(
        &mut self,
        object: ValueRef,
        id: PropertyId,
        descriptor: ValueRef,
    ) -> JsResult<bool> {
        let fields = self.parse_descriptor(descriptor)?;
        self.apply_descriptor(object, PropertyKey::Named(id), fields)
    }

    /// Defines an indexed property from a descriptor object
    pub fn define_indexed_property(
        &mut self,
        object: ValueRef,
        index: u32,
        descriptor: ValueRef,
    ) -> JsResult<bool> {
        let fields = self.parse_descriptor(descriptor)?;
        self.apply_descriptor(object, PropertyKey::Index(index), fields)
    }

    // ---- enumeration ----

    /// Array of all own property names, indices first in ascending order
    pub fn own_property_names(&mut self, object: ValueRef) -> JsResult<ValueRef> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, handler } = cell.kind {
            return proxy::own_keys(self, target, handler);
        }
        let is_array = matches!(cell.kind, ObjectKind::Array { .. });
        let (indices, named) = cell.own_keys();
        let mut names: Vec<Arc<str>> = Vec::with_capacity(indices.len() + named.len() + 1);
        for index in indices {
            names.push(Arc::from(index.to_string().as_str()));
        }
        if is_array {
            names.push(Arc::from("length"));
        }
        for id in named {
            names.push(id.name());
        }
        self.string_array(&names)
    }

    pub(crate) fn string_array(&mut self, names: &[Arc<str>]) -> JsResult<ValueRef> {
        let array = self.create_array(names.len() as u32)?;
        for (position, name) in names.iter().enumerate() {
            let value = self.string_value(name)?;
            self.set_indexed(array, position as u32, value)?;
        }
        Ok(array)
    }

    /// Enumerable property names in for-in order, prototype chain included
    ///
    /// A proxy found along the chain takes over enumeration from that point
    /// through its `enumerate` trap.
    pub fn enumerable_property_names(&mut self, object: ValueRef) -> JsResult<Vec<Arc<str>>> {
        let mut out: Vec<Arc<str>> = Vec::new();
        let mut seen: std::collections::HashSet<Arc<str>> = std::collections::HashSet::new();
        let mut current = object;
        loop {
            let cell = self.object_cell(current)?;
            if let ObjectKind::Proxy { target, handler } = cell.kind {
                for name in proxy::enumerate_names(self, target, handler)? {
                    if seen.insert(Arc::clone(&name)) {
                        out.push(name);
                    }
                }
                return Ok(out);
            }
            let (indices, named) = cell.own_keys();
            let mut step: Vec<(Arc<str>, bool)> =
                Vec::with_capacity(indices.len() + named.len());
            for index in &indices {
                let enumerable = cell
                    .indexed
                    .get(index)
                    .map(|p| p.enumerable)
                    .unwrap_or(false);
                step.push((Arc::from(index.to_string().as_str()), enumerable));
            }
            for id in &named {
                let enumerable = cell.named_entry(*id).map(|p| p.enumerable).unwrap_or(false);
                step.push((id.name(), enumerable));
            }
            let prototype = cell.prototype;
            for (name, enumerable) in step {
                // a non-enumerable own property still shadows inherited ones
                if seen.insert(Arc::clone(&name)) && enumerable {
                    out.push(name);
                }
            }
            match prototype {
                Some(next) => current = next,
                None => return Ok(out),
            }
        }
    }

    // ---- calls ----

    /// Invokes a function value with an explicit receiver
    pub fn call_function(
        &mut self,
        function: ValueRef,
        this: ValueRef,
        args: &[ValueRef],
    ) -> JsResult<ValueRef> {
        let callback = match &self.object_cell(function).map_err(|_| JsError::NotAFunction)?.kind {
            ObjectKind::Function { callback } => *callback,
            ObjectKind::Proxy { target, .. } => {
                let target = *target;
                return self.call_function(target, this, args);
            }
            _ => return Err(JsError::NotAFunction),
        };
        let context = CallContext {
            callee: function,
            this,
            args: args.to_vec(),
            is_construct: false,
        };
        callback(self, &context)
    }

    /// Invokes a function as a constructor
    ///
    /// A fresh object linked to the function's `prototype` property becomes
    /// `this`; an object-like return value replaces it in the result.
    pub fn construct(&mut self, function: ValueRef, args: &[ValueRef]) -> JsResult<ValueRef> {
        let callback = match &self.object_cell(function).map_err(|_| JsError::NotAFunction)?.kind {
            ObjectKind::Function { callback } => *callback,
            ObjectKind::Proxy { target, .. } => {
                let target = *target;
                return self.construct(target, args);
            }
            _ => return Err(JsError::NotAFunction),
        };
        let prototype_id = self.ids.prototype;
        let declared = self.get_property(function, prototype_id)?;
        let new_object = self.create_object()?;
        if self.is_object(declared)? {
            self.set_prototype(new_object, declared)?;
        }
        let context = CallContext {
            callee: function,
            this: new_object,
            args: args.to_vec(),
            is_construct: true,
        };
        let result = callback(self, &context)?;
        if self.is_object(result)? {
            Ok(result)
        } else {
            Ok(new_object)
        }
    }

    /// `value instanceof constructor` without dispatching `hasInstance`
    pub fn instance_of(&mut self, value: ValueRef, constructor: ValueRef) -> JsResult<bool> {
        let prototype_id = self.ids.prototype;
        let declared = self.get_property(constructor, prototype_id)?;
        if !self.is_object(declared)? {
            return Err(JsError::InvalidArgument("constructor has no prototype object"));
        }
        if !self.is_object(value)? {
            return Ok(false);
        }
        let mut current = self.get_prototype(value)?;
        while self.is_object(current)? {
            if self.strict_equals(current, declared)? {
                return Ok(true);
            }
            current = self.get_prototype(current)?;
        }
        Ok(false)
    }

    // ---- prototypes ----

    /// The object's prototype, or `null` when it has none
    pub fn get_prototype(&self, object: ValueRef) -> JsResult<ValueRef> {
        let cell = self.object_cell(object)?;
        if let ObjectKind::Proxy { target, .. } = cell.kind {
            return self.get_prototype(target);
        }
        Ok(cell.prototype.unwrap_or(self.null))
    }

    /// Replaces the object's prototype; `null` or `undefined` clears it
    pub fn set_prototype(&mut self, object: ValueRef, prototype: ValueRef) -> JsResult<()> {
        let next = match self.type_of(prototype)? {
            JsValueType::Undefined | JsValueType::Null => None,
            kind if kind.is_object() => Some(prototype),
            _ => return Err(JsError::InvalidArgument("prototype must be an object or null")),
        };
        self.object_cell_mut(object)?.prototype = next;
        Ok(())
    }

    // ---- externals and collection hooks ----

    /// The opaque payload of an external object, `None` for other objects
    pub fn external_data(&self, value: ValueRef) -> JsResult<Option<ExternalValue>> {
        let cell = self.object_cell(value)?;
        match &cell.kind {
            ObjectKind::External(slot) => Ok(Some(Rc::clone(&slot.data))),
            ObjectKind::Proxy { target, .. } => self.external_data(*target),
            _ => Ok(None),
        }
    }

    /// Proxy target of a proxy value, `None` for anything else
    pub fn proxy_target(&self, value: ValueRef) -> JsResult<Option<ValueRef>> {
        let cell = self.object_cell(value)?;
        match cell.kind {
            ObjectKind::Proxy { target, .. } => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Registers the callback run just before the object is collected
    ///
    /// An object carries at most one such callback; a later registration
    /// replaces the earlier one.
    pub fn set_before_collect_callback(
        &mut self,
        object: ValueRef,
        callback: Option<BeforeCollectCallback>,
    ) -> JsResult<()> {
        self.object_cell_mut(object)?.before_collect = callback;
        Ok(())
    }

    /// Pins a value against garbage collection until the guard drops
    pub fn root(&mut self, value: ValueRef) -> JsResult<Rooted> {
        self.entry(value)?;
        let mut table = self.roots.borrow_mut();
        *table.counts.entry(value).or_insert(0) += 1;
        drop(table);
        Ok(Rooted {
            table: Rc::clone(&self.roots),
            value,
        })
    }

    // ---- exceptions ----

    /// Stores a pending script exception
    pub fn set_exception(&mut self, value: ValueRef) {
        self.exception = Some(value);
    }

    /// Whether a script exception is pending
    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Takes the pending exception, clearing the slot
    pub fn get_and_clear_exception(&mut self) -> Option<ValueRef> {
        self.exception.take()
    }

    /// Records `value` as the pending exception and returns the error that
    /// signals it to the caller
    pub fn throw(&mut self, value: ValueRef) -> JsError {
        self.set_exception(value);
        JsError::ScriptException
    }

    /// Creates and throws a `TypeError` with the given message
    pub fn throw_type_error(&mut self, message: &str) -> JsError {
        let thrown = self
            .string_value(message)
            .and_then(|text| self.create_type_error(text));
        match thrown {
            Ok(error) => self.throw(error),
            Err(error) => error,
        }
    }

    // ---- arrays ----

    /// Length of an array value
    pub fn array_length(&self, array: ValueRef) -> JsResult<u32> {
        let cell = self.object_cell(array)?;
        match cell.kind {
            ObjectKind::Array { length } => Ok(length),
            ObjectKind::Proxy { target, .. } => self.array_length(target),
            _ => Err(JsError::InvalidArgument("value is not an array")),
        }
    }

    // ---- garbage collection ----

    /// Runs a full mark-and-sweep cycle
    pub fn collect_garbage(&mut self) {
        self.collect_garbage_with_roots(&[]);
    }

    /// Runs a collection treating `extra` as additional roots
    pub fn collect_garbage_with_roots(&mut self, extra: &[ValueRef]) {
        let live_before = self.slots.len() - self.free.len();
        debug!("collection starting: runtime={} live_slots={}", self.id, live_before);
        self.in_collection = true;
        for entry in &mut self.slots {
            entry.marked = false;
        }

        let mut work: Vec<ValueRef> = Vec::new();
        work.extend([self.undefined, self.null, self.true_value, self.false_value]);
        for context in &self.contexts {
            work.push(context.global);
            work.push(context.object_prototype);
            work.extend(context.proxy_ctor);
            work.extend(context.embedder.iter().copied().flatten());
        }
        if let Some(exception) = self.exception {
            work.push(exception);
        }
        work.extend(self.roots.borrow().counts.keys().copied());
        work.extend_from_slice(extra);

        while let Some(value) = work.pop() {
            let slot = value.slot as usize;
            let Some(entry) = self.slots.get_mut(slot) else {
                continue;
            };
            if entry.generation != value.generation || entry.marked {
                continue;
            }
            entry.marked = true;
            if let Cell::Object(cell) = &entry.cell {
                if let Some(prototype) = cell.prototype {
                    work.push(prototype);
                }
                match &cell.kind {
                    ObjectKind::Proxy { target, handler } => {
                        work.push(*target);
                        work.push(*handler);
                    }
                    _ => {}
                }
                for (_, property) in &cell.named {
                    push_property_refs(&mut work, property);
                }
                for property in cell.indexed.values() {
                    push_property_refs(&mut work, property);
                }
            }
        }

        // dying objects get their before-collect callback while the handle
        // is still valid; allocations made inside a callback are born marked
        // and survive this cycle
        let sweep_limit = self.slots.len();
        let mut callbacks: Vec<(ValueRef, BeforeCollectCallback)> = Vec::new();
        for (slot, entry) in self.slots.iter_mut().enumerate().take(sweep_limit) {
            if entry.marked {
                continue;
            }
            if let Cell::Object(cell) = &mut entry.cell {
                if let Some(callback) = cell.before_collect.take() {
                    callbacks.push((ValueRef::new(slot as u32, entry.generation), callback));
                }
            }
        }
        for (value, callback) in callbacks {
            callback(self, value);
        }

        let mut finalizers: Vec<(ExternalValue, Finalizer)> = Vec::new();
        let mut collected = 0usize;
        for slot in 0..sweep_limit {
            let entry = &mut self.slots[slot];
            if entry.marked || matches!(entry.cell, Cell::Free) {
                continue;
            }
            if let Cell::Object(cell) = &mut entry.cell {
                if let ObjectKind::External(external) = &mut cell.kind {
                    if let Some(finalizer) = external.finalizer.take() {
                        finalizers.push((Rc::clone(&external.data), finalizer));
                    }
                }
            }
            entry.cell = Cell::Free;
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(slot as u32);
            collected += 1;
        }
        self.in_collection = false;
        self.collections += 1;
        self.collected_last_cycle = collected;
        for (data, finalizer) in finalizers {
            finalizer(data);
        }
        debug!("collection finished: runtime={} collected={}", self.id, collected);
    }
}

fn push_property_refs(work: &mut Vec<ValueRef>, property: &Property) {
    match &property.slot {
        PropertySlot::Data(value) => work.push(*value),
        PropertySlot::Accessor { get, set } => {
            work.extend(get.iter().copied());
            work.extend(set.iter().copied());
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let mut callbacks: Vec<(ValueRef, BeforeCollectCallback)> = Vec::new();
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if let Cell::Object(cell) = &mut entry.cell {
                if let Some(callback) = cell.before_collect.take() {
                    callbacks.push((ValueRef::new(slot as u32, entry.generation), callback));
                }
            }
        }
        for (value, callback) in callbacks {
            callback(self, value);
        }
        let mut finalizers: Vec<(ExternalValue, Finalizer)> = Vec::new();
        for entry in &mut self.slots {
            if let Cell::Object(cell) = &mut entry.cell {
                if let ObjectKind::External(external) = &mut cell.kind {
                    if let Some(finalizer) = external.finalizer.take() {
                        finalizers.push((Rc::clone(&external.data), finalizer));
                    }
                }
            }
        }
        for (data, finalizer) in finalizers {
            finalizer(data);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}

fn builtin_object(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    if let Some(&first) = cx.args.first() {
        if rt.is_object(first)? {
            return Ok(first);
        }
    }
    rt.create_object()
}

fn builtin_proxy(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    if !cx.is_construct {
        return Err(rt.throw_type_error("Constructor Proxy requires 'new'"));
    }
    let undefined = rt.undefined_value();
    let target = cx.arg_or(0, undefined);
    let handler = cx.arg_or(1, undefined);
    if !(rt.is_object(target)? && rt.is_object(handler)?) {
        return Err(rt.throw_type_error(
            "Cannot create proxy with a non-object as target or handler",
        ));
    }
    rt.create_proxy(target, handler)
}

/// `ToNumber` for string input
fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Number formatting that matches script-visible `ToString` output for the
/// common shapes: integers print without a fraction, `NaN` and infinities
/// by name
fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        return format!("{}", value as i128);
    }
    format!("{}", value)
}
