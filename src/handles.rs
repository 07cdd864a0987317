//! Handle Scopes and Persistent Handles
//!
//! Locals are cheap typed wrappers over engine handles, valid for the
//! lifetime of the scope that produced them. Scopes stack per thread in
//! strict LIFO order; every value a scope hands out is a garbage collection
//! root until that scope pops. Persistent handles pin a value independently
//! of any scope, and can be downgraded to weak with a collection callback.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::isolate::Isolate;
use crate::jsrt::{Rooted, Runtime, ValueRef};

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

struct Frame {
    runtime_id: u64,
    locals: Vec<ValueRef>,
}

/// Values held by every active scope frame belonging to the given runtime
pub(crate) fn active_roots(runtime_id: u64) -> Vec<ValueRef> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .filter(|frame| frame.runtime_id == runtime_id)
            .flat_map(|frame| frame.locals.iter().copied())
            .collect()
    })
}

/// A typed handle valid while its scope is alive
pub struct Local<'s, T> {
    value: ValueRef,
    _marker: PhantomData<&'s T>,
}

impl<T> Clone for Local<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Local<'_, T> {}

impl<'s, T> Local<'s, T> {
    pub(crate) fn raw(self) -> ValueRef {
        self.value
    }

    /// Reinterprets the handle under a different type marker
    pub(crate) fn cast<U>(self) -> Local<'s, U> {
        Local {
            value: self.value,
            _marker: PhantomData,
        }
    }
}

/// Tracks locals created within it and roots them for the collector
///
/// A scope mutably borrows the isolate (or, internally, the bare runtime
/// around callback invocations), so engine access always flows through the
/// innermost scope.
pub struct HandleScope<'s> {
    pub(crate) rt: &'s mut Runtime,
    depth: usize,
}

impl<'s> HandleScope<'s> {
    /// Opens a scope on the isolate
    pub fn new(isolate: &'s mut Isolate) -> Self {
        Self::with_runtime(isolate.runtime_mut())
    }

    /// Opens a nested scope; the parent is unusable until this one drops
    pub fn nested<'p>(parent: &'p mut HandleScope<'_>) -> HandleScope<'p> {
        HandleScope::with_runtime(parent.rt)
    }

    /// Opens a scope directly over a runtime; used around every callback so
    /// user code always runs in a fresh frame
    pub(crate) fn with_runtime(rt: &'s mut Runtime) -> Self {
        let depth = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(Frame {
                runtime_id: rt.id(),
                locals: Vec::new(),
            });
            frames.len()
        });
        HandleScope { rt, depth }
    }

    /// Wraps a raw engine handle as a local of this scope
    pub(crate) fn local<T>(&mut self, value: ValueRef) -> Local<'s, T> {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            if let Some(frame) = frames.last_mut() {
                frame.locals.push(value);
            }
        });
        Local {
            value,
            _marker: PhantomData,
        }
    }

    /// Sets `exception` as the pending exception and returns it unchanged
    pub fn throw_exception(
        &mut self,
        exception: Local<'s, crate::value::Value>,
    ) -> Local<'s, crate::value::Value> {
        self.rt.set_exception(exception.raw());
        exception
    }

    /// Runs a full garbage collection, keeping scope-held locals alive
    pub fn collect_garbage(&mut self) {
        let roots = active_roots(self.rt.id());
        self.rt.collect_garbage_with_roots(&roots);
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            debug_assert_eq!(frames.len(), self.depth, "handle scopes must pop in LIFO order");
            frames.truncate(self.depth.saturating_sub(1));
        });
    }
}

/// Payload handed to a weak-handle callback
pub struct WeakCallbackData<'s, T, P> {
    /// The value being collected; valid for the duration of the callback
    pub value: Local<'s, T>,
    /// The parameter registered with `set_weak`
    pub parameter: P,
}

/// Weak-handle callback entry point
pub type WeakCallback<T, P> = fn(&mut HandleScope, WeakCallbackData<T, P>);

struct PersistentState {
    value: ValueRef,
    strong: RefCell<Option<Rooted>>,
    weak: Cell<bool>,
}

/// A handle that outlives scopes
///
/// Strong by default: the value cannot be collected while any clone of the
/// persistent exists. `set_weak` drops the strong pin and registers a
/// callback for the moment the value is collected; the registration lives
/// on the engine object, so it fires even if the persistent itself has been
/// dropped by then.
pub struct Persistent<T> {
    state: Rc<PersistentState>,
    _marker: PhantomData<T>,
}

impl<T> Clone for Persistent<T> {
    fn clone(&self) -> Self {
        Persistent {
            state: Rc::clone(&self.state),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Persistent<T> {
    /// Pins the local's value beyond its scope
    pub fn new(scope: &mut HandleScope<'_>, local: Local<'_, T>) -> Self {
        let value = local.raw();
        let strong = scope.rt.root(value).ok();
        Persistent {
            state: Rc::new(PersistentState {
                value,
                strong: RefCell::new(strong),
                weak: Cell::new(false),
            }),
            _marker: PhantomData,
        }
    }

    /// A local for the pinned value, or `None` once it has been collected
    pub fn get<'t>(&self, scope: &mut HandleScope<'t>) -> Option<Local<'t, T>> {
        if scope.rt.is_live(self.state.value) {
            Some(scope.local(self.state.value))
        } else {
            None
        }
    }

    /// Whether the handle has been downgraded with `set_weak`
    pub fn is_weak(&self) -> bool {
        self.state.weak.get()
    }

    /// Drops the strong pin and arranges for `callback` to run when the
    /// value is collected
    ///
    /// The callback receives the still-valid value and the parameter, inside
    /// a fresh scope. A later `set_weak` replaces an earlier registration.
    pub fn set_weak<P: 'static>(
        &self,
        scope: &mut HandleScope<'_>,
        parameter: P,
        callback: WeakCallback<T, P>,
    ) {
        let value = self.state.value;
        self.state.strong.replace(None);
        self.state.weak.set(true);
        let hook = Box::new(move |rt: &mut Runtime, dying: ValueRef| {
            let mut scope = HandleScope::with_runtime(rt);
            let local = scope.local::<T>(dying);
            callback(
                &mut scope,
                WeakCallbackData {
                    value: local,
                    parameter,
                },
            );
        });
        if scope.rt.set_before_collect_callback(value, Some(hook)).is_err() {
            tracing::debug!("set_weak on a dead handle has no effect");
        }
    }

    /// Restores strong behavior and unregisters the weak callback
    pub fn clear_weak(&self, scope: &mut HandleScope<'_>) {
        let value = self.state.value;
        let _ = scope.rt.set_before_collect_callback(value, None);
        self.state.weak.set(false);
        let restored = scope.rt.root(value).ok();
        self.state.strong.replace(restored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolate::Isolate;

    #[test]
    fn test_scope_roots_protect_locals() {
        let mut isolate = Isolate::new();
        let mut scope = HandleScope::new(&mut isolate);
        let number = scope.rt.number_value(5.0).unwrap();
        let local: Local<'_, crate::value::Value> = scope.local(number);
        scope.collect_garbage();
        assert!(scope.rt.is_live(local.raw()));
        assert_eq!(scope.rt.number_content(local.raw()).unwrap(), 5.0);
    }

    #[test]
    fn test_unscoped_values_die_on_collect() {
        let mut isolate = Isolate::new();
        let mut scope = HandleScope::new(&mut isolate);
        let loose = scope.rt.number_value(5.0).unwrap();
        scope.collect_garbage();
        assert!(!scope.rt.is_live(loose));
    }

    #[test]
    fn test_nested_scope_releases_its_locals() {
        let mut isolate = Isolate::new();
        let mut scope = HandleScope::new(&mut isolate);
        let raw = {
            let mut inner = HandleScope::nested(&mut scope);
            let number = inner.rt.number_value(9.0).unwrap();
            let local: Local<'_, crate::value::Value> = inner.local(number);
            local.raw()
        };
        scope.collect_garbage();
        assert!(!scope.rt.is_live(raw));
    }

    #[test]
    fn test_persistent_survives_collect_and_scope() {
        let mut isolate = Isolate::new();
        let persistent = {
            let mut scope = HandleScope::new(&mut isolate);
            let number = scope.rt.number_value(3.0).unwrap();
            let local: Local<'_, crate::value::Value> = scope.local(number);
            Persistent::new(&mut scope, local)
        };
        isolate.collect_garbage();
        let mut scope = HandleScope::new(&mut isolate);
        let revived = persistent.get(&mut scope).unwrap();
        assert_eq!(scope.rt.number_content(revived.raw()).unwrap(), 3.0);
    }

    #[test]
    fn test_weak_callback_fires_once_with_parameter() {
        use std::cell::Cell as StdCell;
        thread_local! {
            static OBSERVED: StdCell<u32> = StdCell::new(0);
        }
        fn observer(_scope: &mut HandleScope, data: WeakCallbackData<crate::value::Value, u32>) {
            OBSERVED.with(|seen| seen.set(seen.get() + data.parameter));
        }
        OBSERVED.with(|seen| seen.set(0));
        let mut isolate = Isolate::new();
        let persistent = {
            let mut scope = HandleScope::new(&mut isolate);
            let context = scope.rt.create_context().unwrap();
            scope.rt.enter_context(context).unwrap();
            let object = scope.rt.create_object().unwrap();
            let local: Local<'_, crate::value::Value> = scope.local(object);
            let persistent = Persistent::new(&mut scope, local);
            persistent.set_weak(&mut scope, 7u32, observer);
            persistent
        };
        assert!(persistent.is_weak());
        drop(persistent);
        isolate.collect_garbage();
        OBSERVED.with(|seen| assert_eq!(seen.get(), 7));
        isolate.collect_garbage();
        OBSERVED.with(|seen| assert_eq!(seen.get(), 7));
    }

    #[test]
    fn test_clear_weak_restores_strong_pin() {
        fn observer(_scope: &mut HandleScope, _data: WeakCallbackData<crate::value::Value, ()>) {}
        let mut isolate = Isolate::new();
        let persistent = {
            let mut scope = HandleScope::new(&mut isolate);
            let context = scope.rt.create_context().unwrap();
            scope.rt.enter_context(context).unwrap();
            let object = scope.rt.create_object().unwrap();
            let local: Local<'_, crate::value::Value> = scope.local(object);
            let persistent = Persistent::new(&mut scope, local);
            persistent.set_weak(&mut scope, (), observer);
            persistent.clear_weak(&mut scope);
            persistent
        };
        assert!(!persistent.is_weak());
        isolate.collect_garbage();
        let mut scope = HandleScope::new(&mut isolate);
        assert!(persistent.get(&mut scope).is_some());
    }
}
