//! Isolate
//!
//! An isolate owns one host runtime and everything created inside it.
//! Isolates are thread-bound: neither the isolate nor any handle derived
//! from it may cross threads. Embedders typically create one isolate, open
//! a [`HandleScope`](crate::handles::HandleScope), create a context, and
//! work through locals from there.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::handles::{self, HandleScope, Local};
use crate::jsrt::{Runtime, RuntimeConfig, RuntimeStats};
use crate::value::Value;

/// Number of numbered embedder data slots on every isolate
pub const EMBEDDER_DATA_SLOTS: usize = 4;

/// Listener invoked when a verbose `TryCatch` reports a caught exception
pub type MessageCallback = fn(&mut HandleScope, Local<Value>);

thread_local! {
    static LISTENERS: RefCell<HashMap<u64, Vec<MessageCallback>>> = RefCell::new(HashMap::new());
}

/// Listeners registered for the given runtime on this thread
pub(crate) fn message_listeners(runtime_id: u64) -> Vec<MessageCallback> {
    LISTENERS.with(|all| all.borrow().get(&runtime_id).cloned().unwrap_or_default())
}

/// An embedding engine instance
pub struct Isolate {
    rt: Runtime,
    data_slots: [Option<Rc<dyn Any>>; EMBEDDER_DATA_SLOTS],
}

impl Isolate {
    /// Creates an isolate with default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates an isolate with the given runtime configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let rt = Runtime::new(config);
        debug!("isolate created: runtime={}", rt.id());
        Isolate {
            rt,
            data_slots: Default::default(),
        }
    }

    pub(crate) fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.rt
    }

    /// Current runtime counters
    pub fn stats(&self) -> RuntimeStats {
        self.rt.stats()
    }

    /// Stores embedder data in a numbered slot; indexes past
    /// [`EMBEDDER_DATA_SLOTS`] are ignored
    pub fn set_data(&mut self, slot: usize, data: Rc<dyn Any>) {
        if slot < EMBEDDER_DATA_SLOTS {
            self.data_slots[slot] = Some(data);
        }
    }

    /// Reads embedder data from a numbered slot
    pub fn get_data(&self, slot: usize) -> Option<Rc<dyn Any>> {
        self.data_slots.get(slot).cloned().flatten()
    }

    /// Whether diagnostic state is enabled
    pub fn is_debug_enabled(&self) -> bool {
        self.rt.debug_enabled()
    }

    /// Toggles diagnostic state
    pub fn set_debug_enabled(&mut self, enabled: bool) {
        self.rt.set_debug_enabled(enabled);
    }

    /// Registers a listener for reported exceptions
    pub fn add_message_listener(&mut self, listener: MessageCallback) {
        let id = self.rt.id();
        LISTENERS.with(|all| all.borrow_mut().entry(id).or_default().push(listener));
    }

    /// Removes every registration of the given listener
    pub fn remove_message_listener(&mut self, listener: MessageCallback) {
        let id = self.rt.id();
        LISTENERS.with(|all| {
            if let Some(listeners) = all.borrow_mut().get_mut(&id) {
                listeners.retain(|registered| *registered != listener);
            }
        });
    }

    /// Runs a full garbage collection, keeping locals in active scopes alive
    pub fn collect_garbage(&mut self) {
        let roots = handles::active_roots(self.rt.id());
        self.rt.collect_garbage_with_roots(&roots);
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        let id = self.rt.id();
        LISTENERS.with(|all| {
            all.borrow_mut().remove(&id);
        });
        debug!("isolate dropped: runtime={}", id);
    }
}
