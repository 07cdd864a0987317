//! Vanadium - A V8-compatible embedding API over a JsRT-style engine
//!
//! This library provides isolates, handle scopes, contexts, templates and
//! exception guards with V8's shapes and lifetimes, implemented against a
//! self-contained handle-and-error-code host engine.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod context;
pub mod function_template;
pub mod handles;
pub mod isolate;
pub mod jsrt;
pub mod object_template;
pub mod traps;
pub mod trycatch;
pub mod utils;
pub mod value;

// Re-exports for convenience
pub use context::{Context, ContextScope};
pub use function_template::{FunctionTemplate, Signature};
pub use handles::{HandleScope, Local, Persistent, WeakCallback, WeakCallbackData};
pub use isolate::{Isolate, MessageCallback, EMBEDDER_DATA_SLOTS};
pub use jsrt::{JsError, JsResult, Runtime, RuntimeConfig};
pub use object_template::{
    AccessorGetterCallback, AccessorSetterCallback, FunctionCallback, FunctionCallbackInfo,
    IndexedPropertyHandlerConfiguration, NamedPropertyHandlerConfiguration, ObjectTemplate,
    PropertyAttribute, PropertyCallbackInfo,
};
pub use trycatch::TryCatch;
pub use value::{
    undefined, null, Array, Boolean, Exception, External, Function, Integer, Number, Object,
    Primitive, String, Value,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default engine configuration
pub fn default_runtime_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/// Create an isolate with the default engine configuration
pub fn create_isolate() -> Isolate {
    Isolate::with_config(default_runtime_config())
}
