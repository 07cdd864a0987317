//! Value Wrappers
//!
//! Typed handles over engine values. Each marker type tags a [`Local`]
//! with the kind of value it refers to; methods take the active scope so
//! they can reach the runtime. Operations that can fail inside the engine
//! return `Option`: `None` means the operation did not produce a value,
//! either because a script exception is pending or because the engine
//! rejected it (logged at debug level).

use std::any::Any;
use std::rc::Rc;

use tracing::debug;

use crate::handles::{HandleScope, Local};
use crate::jsrt::{JsError, JsResult, JsValueType, ValueRef};
use crate::utils;

/// Marker for any engine value
pub struct Value(());

/// Marker for primitive values
pub struct Primitive(());

/// Marker for object values
pub struct Object(());

/// Marker for callable objects
pub struct Function(());

/// Marker for array objects
pub struct Array(());

/// Marker for objects wrapping opaque embedder data
pub struct External(());

/// Marker for number primitives
pub struct Number(());

/// Marker for integral number primitives
pub struct Integer(());

/// Marker for boolean primitives
pub struct Boolean(());

/// Marker for string primitives
pub struct String(());

macro_rules! upcast {
    ($from:ident => $to:ident) => {
        impl<'s> From<Local<'s, $from>> for Local<'s, $to> {
            fn from(value: Local<'s, $from>) -> Self {
                value.cast()
            }
        }
    };
}

upcast!(Primitive => Value);
upcast!(Object => Value);
upcast!(Function => Value);
upcast!(Array => Value);
upcast!(External => Value);
upcast!(Number => Value);
upcast!(Integer => Value);
upcast!(Boolean => Value);
upcast!(String => Value);
upcast!(Function => Object);
upcast!(Array => Object);
upcast!(External => Object);
upcast!(Number => Primitive);
upcast!(Integer => Primitive);
upcast!(Boolean => Primitive);
upcast!(String => Primitive);
upcast!(Integer => Number);

/// Logs a non-exception engine failure and converts the result to `Option`
///
/// A pending script exception passes through silently; `TryCatch` owns its
/// reporting.
pub(crate) fn ok_or_log<T>(result: JsResult<T>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(JsError::ScriptException) => None,
        Err(error) => {
            debug!("{} failed: {}", what, error);
            None
        }
    }
}

impl<'s> Local<'s, Value> {
    fn kind(self, scope: &HandleScope<'_>) -> Option<JsValueType> {
        scope.rt.type_of(self.raw()).ok()
    }

    /// Whether the value is `undefined`
    pub fn is_undefined(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Undefined)
    }

    /// Whether the value is `null`
    pub fn is_null(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Null)
    }

    /// Whether the value is `null` or `undefined`
    pub fn is_null_or_undefined(self, scope: &HandleScope<'_>) -> bool {
        matches!(
            self.kind(scope),
            Some(JsValueType::Null) | Some(JsValueType::Undefined)
        )
    }

    /// Whether the value is the `true` singleton
    pub fn is_true(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Boolean)
            && scope.rt.to_boolean(self.raw()).unwrap_or(false)
    }

    /// Whether the value is the `false` singleton
    pub fn is_false(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Boolean)
            && !scope.rt.to_boolean(self.raw()).unwrap_or(true)
    }

    /// Whether the value is a boolean primitive
    pub fn is_boolean(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Boolean)
    }

    /// Whether the value is a number primitive
    pub fn is_number(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Number)
    }

    /// Whether the value is a number holding an exact `i32`
    pub fn is_int32(self, scope: &HandleScope<'_>) -> bool {
        if self.kind(scope) != Some(JsValueType::Number) {
            return false;
        }
        match scope.rt.number_content(self.raw()) {
            Ok(number) => {
                number == f64::from(number as i32) && !(number == 0.0 && number.is_sign_negative())
            }
            Err(_) => false,
        }
    }

    /// Whether the value is a number holding an exact `u32`
    pub fn is_uint32(self, scope: &HandleScope<'_>) -> bool {
        if self.kind(scope) != Some(JsValueType::Number) {
            return false;
        }
        match scope.rt.number_content(self.raw()) {
            Ok(number) => {
                number == f64::from(number as u32) && !(number == 0.0 && number.is_sign_negative())
            }
            Err(_) => false,
        }
    }

    /// Whether the value is a string primitive
    pub fn is_string(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::String)
    }

    /// Whether the value holds properties
    pub fn is_object(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope).map(JsValueType::is_object).unwrap_or(false)
    }

    /// Whether the value is callable
    pub fn is_function(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Function)
    }

    /// Whether the value is an array
    pub fn is_array(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Array)
    }

    /// Whether the value wraps opaque embedder data
    pub fn is_external(self, scope: &HandleScope<'_>) -> bool {
        self.is_object(scope)
            && matches!(scope.rt.external_data(self.raw()), Ok(Some(_)))
    }

    /// Whether the value is one of the engine's error objects
    pub fn is_native_error(self, scope: &HandleScope<'_>) -> bool {
        self.kind(scope) == Some(JsValueType::Error)
    }

    /// Checked cast to an object handle
    pub fn as_object(self, scope: &HandleScope<'_>) -> Option<Local<'s, Object>> {
        self.is_object(scope).then(|| self.cast())
    }

    /// Checked cast to a function handle
    pub fn as_function(self, scope: &HandleScope<'_>) -> Option<Local<'s, Function>> {
        self.is_function(scope).then(|| self.cast())
    }

    /// Checked cast to an array handle
    pub fn as_array(self, scope: &HandleScope<'_>) -> Option<Local<'s, Array>> {
        self.is_array(scope).then(|| self.cast())
    }

    /// Checked cast to an external handle
    pub fn as_external(self, scope: &HandleScope<'_>) -> Option<Local<'s, External>> {
        self.is_external(scope).then(|| self.cast())
    }

    /// Checked cast to a string handle
    pub fn as_string(self, scope: &HandleScope<'_>) -> Option<Local<'s, String>> {
        self.is_string(scope).then(|| self.cast())
    }

    /// Identity comparison without coercion
    pub fn strict_equals(self, scope: &HandleScope<'_>, that: Local<'_, Value>) -> bool {
        scope.rt.strict_equals(self.raw(), that.raw()).unwrap_or(false)
    }

    /// Abstract `==` comparison with coercion
    pub fn equals(self, scope: &mut HandleScope<'_>, that: Local<'_, Value>) -> Option<bool> {
        ok_or_log(scope.rt.loose_equals(self.raw(), that.raw()), "equals")
    }

    /// The value converted to a number
    pub fn number_value(self, scope: &HandleScope<'_>) -> Option<f64> {
        ok_or_log(scope.rt.to_number(self.raw()), "number conversion")
    }

    /// The value converted to an integer, truncating toward zero
    pub fn integer_value(self, scope: &HandleScope<'_>) -> Option<i64> {
        let number = self.number_value(scope)?;
        if number.is_nan() {
            Some(0)
        } else {
            Some(number.trunc() as i64)
        }
    }

    /// The value converted to a `u32`, truncating toward zero
    pub fn uint32_value(self, scope: &HandleScope<'_>) -> Option<u32> {
        let number = self.number_value(scope)?;
        if number.is_nan() {
            Some(0)
        } else {
            Some(number.trunc() as u32)
        }
    }

    /// The value converted to a boolean; never throws
    pub fn boolean_value(self, scope: &HandleScope<'_>) -> bool {
        scope.rt.to_boolean(self.raw()).unwrap_or(false)
    }

    /// The value converted to an engine string
    pub fn to_string(self, scope: &mut HandleScope<'s>) -> Option<Local<'s, String>> {
        let text = ok_or_log(scope.rt.to_string(self.raw()), "string conversion")?;
        let raw = ok_or_log(scope.rt.string_value(&text), "string conversion")?;
        Some(scope.local(raw))
    }

    /// The value converted to an owned Rust string, lossily
    pub fn to_rust_string_lossy(self, scope: &mut HandleScope<'_>) -> std::string::String {
        scope
            .rt
            .to_string(self.raw())
            .map(|text| text.to_string())
            .unwrap_or_default()
    }
}

impl<'s> Local<'s, Object> {
    fn as_value(self) -> Local<'s, Value> {
        self.cast()
    }

    /// Reads the property named by `key`, walking the prototype chain
    pub fn get(
        self,
        scope: &mut HandleScope<'s>,
        key: Local<'_, Value>,
    ) -> Option<Local<'s, Value>> {
        let raw = ok_or_log(
            utils::get_property_by_value(scope.rt, self.raw(), key.raw()),
            "property get",
        )?;
        Some(scope.local(raw))
    }

    /// Reads the property at `index`
    pub fn get_index(self, scope: &mut HandleScope<'s>, index: u32) -> Option<Local<'s, Value>> {
        let raw = ok_or_log(scope.rt.get_indexed(self.raw(), index), "indexed get")?;
        Some(scope.local(raw))
    }

    /// Writes the property named by `key` with assignment semantics
    pub fn set(
        self,
        scope: &mut HandleScope<'_>,
        key: Local<'_, Value>,
        value: Local<'_, Value>,
    ) -> Option<bool> {
        ok_or_log(
            utils::set_property_by_value(scope.rt, self.raw(), key.raw(), value.raw()),
            "property set",
        )
        .map(|_| true)
    }

    /// Writes the property at `index`
    pub fn set_index(
        self,
        scope: &mut HandleScope<'_>,
        index: u32,
        value: Local<'_, Value>,
    ) -> Option<bool> {
        ok_or_log(scope.rt.set_indexed(self.raw(), index, value.raw()), "indexed set")
            .map(|_| true)
    }

    /// Whether the property exists here or on the prototype chain
    pub fn has(self, scope: &mut HandleScope<'_>, key: Local<'_, Value>) -> Option<bool> {
        let name = ok_or_log(scope.rt.to_string(key.raw()), "has")?;
        ok_or_log(utils::has_property(scope.rt, self.raw(), &name), "has")
    }

    /// Whether the object owns the property
    pub fn has_own_property(
        self,
        scope: &mut HandleScope<'_>,
        key: Local<'_, Value>,
    ) -> Option<bool> {
        let name = ok_or_log(scope.rt.to_string(key.raw()), "hasOwnProperty")?;
        ok_or_log(
            utils::has_own_property(scope.rt, self.raw(), &name),
            "hasOwnProperty",
        )
    }

    /// Deletes the property named by `key`
    pub fn delete(self, scope: &mut HandleScope<'_>, key: Local<'_, Value>) -> Option<bool> {
        ok_or_log(
            utils::delete_property_by_value(scope.rt, self.raw(), key.raw()),
            "property delete",
        )
    }

    /// Deletes the property at `index`
    pub fn delete_index(self, scope: &mut HandleScope<'_>, index: u32) -> Option<bool> {
        ok_or_log(scope.rt.delete_indexed(self.raw(), index), "indexed delete")
    }

    /// Array of own property names, indices first in ascending order
    pub fn get_own_property_names(self, scope: &mut HandleScope<'s>) -> Option<Local<'s, Array>> {
        let raw = ok_or_log(scope.rt.own_property_names(self.raw()), "own property names")?;
        Some(scope.local(raw))
    }

    /// The object's prototype, or `null`
    pub fn get_prototype(self, scope: &mut HandleScope<'s>) -> Option<Local<'s, Value>> {
        let raw = ok_or_log(scope.rt.get_prototype(self.raw()), "prototype get")?;
        Some(scope.local(raw))
    }

    /// Replaces the object's prototype
    pub fn set_prototype(
        self,
        scope: &mut HandleScope<'_>,
        prototype: Local<'_, Value>,
    ) -> Option<bool> {
        ok_or_log(
            scope.rt.set_prototype(self.raw(), prototype.raw()),
            "prototype set",
        )
        .map(|_| true)
    }

    /// The `name` of the object's constructor, `"Object"` when unresolvable
    pub fn get_constructor_name(self, scope: &mut HandleScope<'_>) -> std::string::String {
        utils::get_constructor_name(scope.rt, self.raw())
            .map(|name| name.to_string())
            .unwrap_or_else(|_| "Object".to_string())
    }

    /// Number of internal-field slots reserved for this object
    pub fn internal_field_count(self, scope: &HandleScope<'_>) -> usize {
        crate::object_template::internal_field_count(scope, self)
    }

    /// Reads an internal-field slot; out-of-range slots are `undefined`
    pub fn get_internal_field(
        self,
        scope: &mut HandleScope<'s>,
        index: usize,
    ) -> Option<Local<'s, Value>> {
        crate::object_template::get_internal_field(scope, self, index)
    }

    /// Stores into an internal-field slot; `false` when out of range
    pub fn set_internal_field(
        self,
        scope: &mut HandleScope<'_>,
        index: usize,
        value: Local<'_, Value>,
    ) -> bool {
        crate::object_template::set_internal_field(scope, self, index, value)
    }

    /// Identity comparison with another value
    pub fn strict_equals(self, scope: &HandleScope<'_>, that: Local<'_, Value>) -> bool {
        self.as_value().strict_equals(scope, that)
    }
}

impl Object {
    /// Creates a plain object in the current context
    pub fn new<'s>(scope: &mut HandleScope<'s>) -> Option<Local<'s, Object>> {
        let raw = ok_or_log(scope.rt.create_object(), "object creation")?;
        Some(scope.local(raw))
    }
}

impl<'s> Local<'s, Function> {
    /// Invokes the function with an explicit receiver
    pub fn call(
        self,
        scope: &mut HandleScope<'s>,
        this: Local<'_, Value>,
        args: &[Local<'_, Value>],
    ) -> Option<Local<'s, Value>> {
        let args: Vec<ValueRef> = args.iter().map(|arg| arg.raw()).collect();
        let raw = ok_or_log(
            scope.rt.call_function(self.raw(), this.raw(), &args),
            "function call",
        )?;
        Some(scope.local(raw))
    }

    /// Invokes the function as a constructor
    pub fn new_instance(
        self,
        scope: &mut HandleScope<'s>,
        args: &[Local<'_, Value>],
    ) -> Option<Local<'s, Object>> {
        let args: Vec<ValueRef> = args.iter().map(|arg| arg.raw()).collect();
        let raw = ok_or_log(scope.rt.construct(self.raw(), &args), "construction")?;
        Some(scope.local(raw))
    }
}

impl Function {
    /// Creates an anonymous function running a bridge callback
    pub fn new<'s>(
        scope: &mut HandleScope<'s>,
        callback: crate::object_template::FunctionCallback,
    ) -> Option<Local<'s, Function>> {
        let template = crate::function_template::FunctionTemplate::new(scope, callback)?;
        template.get_function(scope)
    }
}

impl<'s> Local<'s, Array> {
    /// The array's length
    pub fn length(self, scope: &HandleScope<'_>) -> u32 {
        scope.rt.array_length(self.raw()).unwrap_or(0)
    }
}

impl Array {
    /// Creates an array of the given length
    pub fn new<'s>(scope: &mut HandleScope<'s>, length: u32) -> Option<Local<'s, Array>> {
        let raw = ok_or_log(scope.rt.create_array(length), "array creation")?;
        Some(scope.local(raw))
    }
}

impl<'s> Local<'s, External> {
    /// The wrapped embedder data
    pub fn value(self, scope: &HandleScope<'_>) -> Option<Rc<dyn Any>> {
        scope.rt.external_data(self.raw()).ok().flatten()
    }
}

impl External {
    /// Wraps opaque embedder data in an engine object
    pub fn new<'s>(scope: &mut HandleScope<'s>, value: Rc<dyn Any>) -> Option<Local<'s, External>> {
        let raw = ok_or_log(scope.rt.create_external(value, None), "external creation")?;
        Some(scope.local(raw))
    }
}

impl<'s> Local<'s, Number> {
    /// The number's value
    pub fn value(self, scope: &HandleScope<'_>) -> f64 {
        scope.rt.number_content(self.raw()).unwrap_or(f64::NAN)
    }
}

impl Number {
    /// Creates a number primitive
    pub fn new<'s>(scope: &mut HandleScope<'s>, value: f64) -> Option<Local<'s, Number>> {
        let raw = ok_or_log(scope.rt.number_value(value), "number creation")?;
        Some(scope.local(raw))
    }
}

impl<'s> Local<'s, Integer> {
    /// The integer's value
    pub fn value(self, scope: &HandleScope<'_>) -> i64 {
        scope
            .rt
            .number_content(self.raw())
            .map(|number| number as i64)
            .unwrap_or(0)
    }
}

impl Integer {
    /// Creates an integral number from an `i32`
    pub fn new<'s>(scope: &mut HandleScope<'s>, value: i32) -> Option<Local<'s, Integer>> {
        let raw = ok_or_log(scope.rt.number_value(f64::from(value)), "integer creation")?;
        Some(scope.local(raw))
    }

    /// Creates an integral number from a `u32`
    pub fn new_from_unsigned<'s>(
        scope: &mut HandleScope<'s>,
        value: u32,
    ) -> Option<Local<'s, Integer>> {
        let raw = ok_or_log(scope.rt.number_value(f64::from(value)), "integer creation")?;
        Some(scope.local(raw))
    }
}

impl<'s> Local<'s, Boolean> {
    /// The boolean's value
    pub fn value(self, scope: &HandleScope<'_>) -> bool {
        scope.rt.to_boolean(self.raw()).unwrap_or(false)
    }
}

impl Boolean {
    /// The boolean singleton for `value`
    pub fn new<'s>(scope: &mut HandleScope<'s>, value: bool) -> Local<'s, Boolean> {
        let raw = scope.rt.boolean_value(value);
        scope.local(raw)
    }
}

impl<'s> Local<'s, String> {
    /// The string's contents as an owned Rust string
    pub fn to_rust_string_lossy(self, scope: &HandleScope<'_>) -> std::string::String {
        scope
            .rt
            .string_content(self.raw())
            .map(|text| text.to_string())
            .unwrap_or_default()
    }

    /// The string's length in bytes of UTF-8
    pub fn utf8_length(self, scope: &HandleScope<'_>) -> usize {
        scope
            .rt
            .string_content(self.raw())
            .map(|text| text.len())
            .unwrap_or(0)
    }
}

impl String {
    /// Creates a string primitive from UTF-8 text
    pub fn new<'s>(scope: &mut HandleScope<'s>, text: &str) -> Option<Local<'s, String>> {
        let raw = ok_or_log(scope.rt.string_value(text), "string creation")?;
        Some(scope.local(raw))
    }
}

/// The `undefined` singleton
pub fn undefined<'s>(scope: &mut HandleScope<'s>) -> Local<'s, Primitive> {
    let raw = scope.rt.undefined_value();
    scope.local(raw)
}

/// The `null` singleton
pub fn null<'s>(scope: &mut HandleScope<'s>) -> Local<'s, Primitive> {
    let raw = scope.rt.null_value();
    scope.local(raw)
}

/// Factories for the engine's built-in error objects
pub struct Exception;

impl Exception {
    /// Creates an `Error` object carrying `message`
    pub fn error<'s>(scope: &mut HandleScope<'s>, message: Local<'_, String>) -> Local<'s, Value> {
        let result = scope.rt.create_error(message.raw());
        finish_error(scope, result)
    }

    /// Creates a `TypeError` object
    pub fn type_error<'s>(
        scope: &mut HandleScope<'s>,
        message: Local<'_, String>,
    ) -> Local<'s, Value> {
        let result = scope.rt.create_type_error(message.raw());
        finish_error(scope, result)
    }

    /// Creates a `RangeError` object
    pub fn range_error<'s>(
        scope: &mut HandleScope<'s>,
        message: Local<'_, String>,
    ) -> Local<'s, Value> {
        let result = scope.rt.create_range_error(message.raw());
        finish_error(scope, result)
    }
}

fn finish_error<'s>(scope: &mut HandleScope<'s>, result: JsResult<ValueRef>) -> Local<'s, Value> {
    match result {
        Ok(error) => scope.local(error),
        Err(error) => {
            debug!("error construction failed: {}", error);
            let raw = scope.rt.undefined_value();
            scope.local(raw)
        }
    }
}
