//! Embedded JavaScript Host Engine
//!
//! A self-contained object engine in the JsRT style: explicit handles,
//! error-code results, a current-context stack, and collection that runs
//! only on request. The embedding layer in the rest of this crate builds
//! the scope and template surface on top of these primitives.
//!
//! There is deliberately no parser here. Everything the engine can do is
//! reachable through [`Runtime`] methods and native function callbacks.

pub mod error;
pub mod object;
mod proxy;
pub mod runtime;
pub mod value;

pub use error::{JsError, JsResult};
pub use object::{
    BeforeCollectCallback, CallContext, ExternalValue, Finalizer, NativeCallback,
};
pub use runtime::{ContextId, Rooted, Runtime, RuntimeConfig, RuntimeStats};
pub use value::{JsValueType, PropertyId, ValueRef};
