//! TryCatch
//!
//! A `TryCatch` guards a region of embedder code against script exceptions.
//! While it is alive it dereferences to the underlying [`HandleScope`], so
//! calls are made through it; the first inspection after a throw drains the
//! engine's pending-exception slot into the guard. A caught exception is
//! consumed when the guard drops, unless [`rethrow`](TryCatch::rethrow)
//! was requested, which puts it back for the next enclosing guard. Verbose
//! guards report exceptions they consume to the isolate's message
//! listeners.

use std::ops::{Deref, DerefMut};

use crate::handles::{HandleScope, Local};
use crate::jsrt::{JsValueType, Runtime, ValueRef};
use crate::utils;
use crate::value::{ok_or_log, Value};

/// Catches script exceptions raised while it is in scope
pub struct TryCatch<'c, 's> {
    scope: &'c mut HandleScope<'s>,
    caught: Option<ValueRef>,
    rethrow: bool,
    verbose: bool,
}

impl<'c, 's> TryCatch<'c, 's> {
    /// Opens a guard over the scope
    pub fn new(scope: &'c mut HandleScope<'s>) -> Self {
        TryCatch {
            scope,
            caught: None,
            rethrow: false,
            verbose: false,
        }
    }

    fn poll(&mut self) {
        if self.caught.is_none() {
            self.caught = self.scope.rt.get_and_clear_exception();
        }
    }

    /// Whether an exception has been thrown since the guard opened
    pub fn has_caught(&mut self) -> bool {
        self.poll();
        self.caught.is_some()
    }

    /// The caught exception value
    pub fn exception(&mut self) -> Option<Local<'s, Value>> {
        self.poll();
        let raw = self.caught?;
        Some(self.scope.local(raw))
    }

    /// The caught exception's message text
    pub fn message(&mut self) -> Option<std::string::String> {
        self.poll();
        let raw = self.caught?;
        ok_or_log(utils::exception_message(self.scope.rt, raw), "exception message")
            .map(|text| text.to_string())
    }

    /// The caught exception's stack trace, when it carries one
    pub fn stack_trace(&mut self) -> Option<Local<'s, Value>> {
        self.poll();
        let raw = self.caught?;
        let stack_id = self.scope.rt.ids.stack;
        let stack = ok_or_log(self.scope.rt.get_property(raw, stack_id), "stack trace")?;
        if matches!(self.scope.rt.type_of(stack), Ok(JsValueType::Undefined)) {
            return None;
        }
        Some(self.scope.local(stack))
    }

    /// Hands the caught exception to the next enclosing guard when this one
    /// drops
    pub fn rethrow(&mut self) {
        self.poll();
        if self.caught.is_some() {
            self.rethrow = true;
        }
    }

    /// Forgets the caught exception and resumes catching
    pub fn reset(&mut self) {
        self.poll();
        self.caught = None;
        self.rethrow = false;
    }

    /// Makes the guard report consumed exceptions to the isolate's message
    /// listeners
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

impl<'s> Deref for TryCatch<'_, 's> {
    type Target = HandleScope<'s>;

    fn deref(&self) -> &Self::Target {
        self.scope
    }
}

impl DerefMut for TryCatch<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.scope
    }
}

impl Drop for TryCatch<'_, '_> {
    fn drop(&mut self) {
        self.poll();
        let Some(exception) = self.caught else {
            return;
        };
        if self.rethrow {
            self.scope.rt.set_exception(exception);
            return;
        }
        if self.verbose {
            report_exception(self.scope.rt, exception);
        }
    }
}

fn report_exception(rt: &mut Runtime, exception: ValueRef) {
    for listener in crate::isolate::message_listeners(rt.id()) {
        let mut scope = HandleScope::with_runtime(rt);
        let local = scope.local(exception);
        listener(&mut scope, local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextScope};
    use crate::isolate::Isolate;
    use crate::object_template::FunctionCallbackInfo;
    use crate::value::{Exception, Function, Object, String};

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

    #[test]
    fn test_catches_and_consumes_a_thrown_exception() {
        with_scope(|scope| {
            {
                let mut guard = TryCatch::new(scope);
                let message = String::new(&mut guard, "boom").unwrap();
                let error = Exception::error(&mut guard, message);
                guard.throw_exception(error);

                assert!(guard.has_caught());
                let caught = guard.exception().unwrap();
                assert!(caught.strict_equals(&guard, error));
                assert_eq!(guard.message().unwrap(), "boom");
                let stack = guard.stack_trace().unwrap();
                let text = stack.to_rust_string_lossy(&mut guard);
                assert!(text.starts_with("Error: boom"));
            }
            assert!(!scope.rt.has_exception());
        });
    }

    fn exploding<'s>(
        scope: &mut HandleScope<'s>,
        _info: &FunctionCallbackInfo<'s>,
    ) -> Option<Local<'s, Value>> {
        let message = String::new(scope, "broken")?;
        let error = Exception::type_error(scope, message);
        scope.throw_exception(error);
        None
    }

    #[test]
    fn test_catches_a_callback_thrown_type_error() {
        with_scope(|scope| {
            let function = Function::new(scope, exploding).unwrap();
            let receiver: Local<'_, Value> = Object::new(scope).unwrap().into();
            let mut guard = TryCatch::new(scope);
            assert!(function.call(&mut guard, receiver, &[]).is_none());
            assert!(guard.has_caught());
            assert_eq!(guard.message().unwrap(), "broken");
        });
    }

    #[test]
    fn test_rethrow_propagates_to_the_enclosing_guard() {
        with_scope(|scope| {
            let mut outer = TryCatch::new(scope);
            let raw = {
                let mut inner = TryCatch::new(&mut outer);
                let message = String::new(&mut inner, "carried").unwrap();
                let error = Exception::error(&mut inner, message);
                inner.throw_exception(error);
                assert!(inner.has_caught());
                inner.rethrow();
                inner.exception().unwrap().raw()
            };
            assert!(outer.has_caught());
            assert_eq!(outer.exception().unwrap().raw(), raw);
        });
    }

    #[test]
    fn test_reset_forgets_the_caught_exception() {
        with_scope(|scope| {
            {
                let mut guard = TryCatch::new(scope);
                let message = String::new(&mut guard, "gone").unwrap();
                let error = Exception::error(&mut guard, message);
                guard.throw_exception(error);
                assert!(guard.has_caught());
                guard.reset();
                assert!(!guard.has_caught());
            }
            assert!(!scope.rt.has_exception());
        });
    }

    thread_local! {
        static REPORTED: std::cell::Cell<u32> = std::cell::Cell::new(0);
    }

    fn recorder(_scope: &mut HandleScope, _exception: Local<Value>) {
        REPORTED.with(|seen| seen.set(seen.get() + 1));
    }

    #[test]
    fn test_verbose_guard_reports_to_message_listeners() {
        REPORTED.with(|seen| seen.set(0));
        let mut isolate = Isolate::new();
        isolate.add_message_listener(recorder);
        let mut scope = HandleScope::new(&mut isolate);
        let context = Context::new(&mut scope).unwrap();
        let mut scope = ContextScope::new(&mut scope, context);
        {
            let mut guard = TryCatch::new(&mut scope);
            guard.set_verbose(true);
            let message = String::new(&mut guard, "seen").unwrap();
            let error = Exception::error(&mut guard, message);
            guard.throw_exception(error);
            assert!(guard.has_caught());
        }
        REPORTED.with(|seen| assert_eq!(seen.get(), 1));

        // a quiet guard does not report
        {
            let mut guard = TryCatch::new(&mut scope);
            let message = String::new(&mut guard, "quiet").unwrap();
            let error = Exception::error(&mut guard, message);
            guard.throw_exception(error);
            assert!(guard.has_caught());
        }
        REPORTED.with(|seen| assert_eq!(seen.get(), 1));
    }
}
