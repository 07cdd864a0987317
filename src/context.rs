//! Contexts
//!
//! A context is an independent global environment inside an isolate: its
//! own global object and builtins. Operations that create objects need a
//! current context; [`ContextScope`] makes one current for a lexical region
//! and restores the previous context when dropped.

use std::ops::{Deref, DerefMut};

use tracing::debug;

use crate::handles::{HandleScope, Local};
use crate::jsrt::ContextId;
use crate::value::{Object, Value};

/// An execution context within an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub(crate) id: ContextId,
}

impl Context {
    /// Creates a context with a fresh global object
    pub fn new(scope: &mut HandleScope<'_>) -> Option<Context> {
        match scope.rt.create_context() {
            Ok(id) => Some(Context { id }),
            Err(error) => {
                debug!("context creation failed: {}", error);
                None
            }
        }
    }

    /// The context currently entered, if any
    pub fn current(scope: &mut HandleScope<'_>) -> Option<Context> {
        scope.rt.current_context().ok().map(|id| Context { id })
    }

    /// The context's global object
    pub fn global<'t>(&self, scope: &mut HandleScope<'t>) -> Option<Local<'t, Object>> {
        scope
            .rt
            .global_object(self.id)
            .ok()
            .map(|value| scope.local(value))
    }

    /// Stores a value in the context's numbered embedder slot
    pub fn set_embedder_data(
        &self,
        scope: &mut HandleScope<'_>,
        index: usize,
        value: Local<'_, Value>,
    ) -> bool {
        scope.rt.set_context_data(self.id, index, value.raw()).is_ok()
    }

    /// Reads the context's numbered embedder slot; `undefined` when unset
    pub fn get_embedder_data<'t>(
        &self,
        scope: &mut HandleScope<'t>,
        index: usize,
    ) -> Option<Local<'t, Value>> {
        scope
            .rt
            .context_data(self.id, index)
            .ok()
            .map(|value| scope.local(value))
    }
}

/// Makes a context current for the guard's lifetime
///
/// Dereferences to the underlying [`HandleScope`], so a `ContextScope` is
/// passed anywhere a scope is expected.
pub struct ContextScope<'a, 's> {
    scope: &'a mut HandleScope<'s>,
    entered: bool,
}

impl<'a, 's> ContextScope<'a, 's> {
    /// Enters the context; the previous context is restored on drop
    pub fn new(scope: &'a mut HandleScope<'s>, context: Context) -> Self {
        let entered = scope.rt.enter_context(context.id).is_ok();
        ContextScope { scope, entered }
    }
}

impl<'s> Deref for ContextScope<'_, 's> {
    type Target = HandleScope<'s>;

    fn deref(&self) -> &Self::Target {
        self.scope
    }
}

impl DerefMut for ContextScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.scope
    }
}

impl Drop for ContextScope<'_, '_> {
    fn drop(&mut self) {
        if self.entered {
            let _ = self.scope.rt.leave_context();
        }
    }
}
