//! Function Templates and Signatures
//!
//! A function template pairs a native callback with two object templates:
//! the instance template shapes objects the function constructs, and the
//! prototype template shapes the single prototype object shared by those
//! instances. `get_function` materializes the function lazily and caches
//! it, so a template always yields the same function object.
//!
//! A [`Signature`] restricts the receivers a templated function accepts:
//! calls whose `this` was not instantiated by the signature's template
//! throw a `TypeError` reading "Illegal invocation".

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::handles::{HandleScope, Local};
use crate::jsrt::{
    CallContext, ExternalValue, JsError, JsResult, JsValueType, Rooted, Runtime, ValueRef,
};
use crate::object_template::{
    self, FunctionCallback, FunctionCallbackInfo, ObjectTemplate, PropertyAttribute,
};
use crate::utils;
use crate::value::{ok_or_log, Function, String, Value};

/// Declares a native function and the shape of what it constructs
pub struct FunctionTemplate(());

/// Restricts which receivers a templated function accepts
pub struct Signature(());

/// Template definition, carried as external data on the template cell and
/// on every function materialized from it
pub(crate) struct FunctionTemplateData {
    callback: Option<FunctionCallback>,
    data: Option<Rooted>,
    signature: Option<Rooted>,
    instance_template: Rooted,
    prototype_template: Rooted,
    function: RefCell<Option<Rooted>>,
    prototype: RefCell<Option<Rooted>>,
}

struct SignatureData {
    receiver: Rooted,
}

impl FunctionTemplate {
    /// Creates a template around a callback
    pub fn new<'s>(
        scope: &mut HandleScope<'s>,
        callback: FunctionCallback,
    ) -> Option<Local<'s, FunctionTemplate>> {
        Self::with_options(scope, Some(callback), None, None)
    }

    /// Creates a template with the full option set
    ///
    /// Without a callback the materialized function is inert: calls read as
    /// `undefined` and construction yields a bare instance. `data` rides
    /// along to the callback through [`FunctionCallbackInfo::data`].
    pub fn with_options<'s>(
        scope: &mut HandleScope<'s>,
        callback: Option<FunctionCallback>,
        data: Option<Local<'_, Value>>,
        signature: Option<Local<'_, Signature>>,
    ) -> Option<Local<'s, FunctionTemplate>> {
        let data = data.map(|value| value.raw());
        let signature = signature.map(|value| value.raw());
        let raw = ok_or_log(
            new_function_template_cell(scope.rt, callback, data, signature),
            "function template creation",
        )?;
        Some(scope.local(raw))
    }
}

fn new_function_template_cell(
    rt: &mut Runtime,
    callback: Option<FunctionCallback>,
    data: Option<ValueRef>,
    signature: Option<ValueRef>,
) -> JsResult<ValueRef> {
    let instance_template = object_template::new_template_cell(rt)?;
    let instance_template = rt.root(instance_template)?;
    let prototype_template = object_template::new_template_cell(rt)?;
    let prototype_template = rt.root(prototype_template)?;
    let data = match data {
        Some(value) => Some(rt.root(value)?),
        None => None,
    };
    let signature = match signature {
        Some(value) => Some(rt.root(value)?),
        None => None,
    };
    let record: ExternalValue = Rc::new(FunctionTemplateData {
        callback,
        data,
        signature,
        instance_template,
        prototype_template,
        function: RefCell::new(None),
        prototype: RefCell::new(None),
    });
    rt.create_external(record, None)
}

fn function_record(rt: &Runtime, template: ValueRef) -> Option<Rc<FunctionTemplateData>> {
    let data = rt.external_data(template).ok()??;
    data.downcast::<FunctionTemplateData>().ok()
}

fn require_template(rt: &Runtime, template: ValueRef) -> JsResult<Rc<FunctionTemplateData>> {
    function_record(rt, template).ok_or(JsError::InvalidArgument("not a function template"))
}

fn record_or_log(rt: &Runtime, template: ValueRef) -> Option<Rc<FunctionTemplateData>> {
    let record = function_record(rt, template);
    if record.is_none() {
        debug!("template operation on a non-template object");
    }
    record
}

impl<'s> Local<'s, FunctionTemplate> {
    /// The function this template describes, materialized on first use
    pub fn get_function(self, scope: &mut HandleScope<'s>) -> Option<Local<'s, Function>> {
        let raw = ok_or_log(
            materialize_function(scope.rt, self.raw()),
            "function materialization",
        )?;
        Some(scope.local(raw))
    }

    /// The template shaping constructed instances
    pub fn instance_template(
        self,
        scope: &mut HandleScope<'s>,
    ) -> Option<Local<'s, ObjectTemplate>> {
        let record = record_or_log(scope.rt, self.raw())?;
        Some(scope.local(record.instance_template.value()))
    }

    /// The template shaping the shared prototype object
    pub fn prototype_template(
        self,
        scope: &mut HandleScope<'s>,
    ) -> Option<Local<'s, ObjectTemplate>> {
        let record = record_or_log(scope.rt, self.raw())?;
        Some(scope.local(record.prototype_template.value()))
    }

    /// Names the class; forwards to the instance template
    pub fn set_class_name(self, scope: &mut HandleScope<'_>, name: Local<'_, String>) {
        let Some(record) = record_or_log(scope.rt, self.raw()) else {
            return;
        };
        let instance: Local<'_, ObjectTemplate> = scope.local(record.instance_template.value());
        instance.set_class_name(scope, name);
    }

    /// Declares a data property on the materialized function itself
    pub fn set(
        self,
        scope: &mut HandleScope<'_>,
        name: Local<'_, String>,
        value: Local<'_, Value>,
        attributes: PropertyAttribute,
    ) {
        let function = match materialize_function(scope.rt, self.raw()) {
            Ok(function) => function,
            Err(error) => {
                debug!("function template property declaration failed: {}", error);
                return;
            }
        };
        let result = object_template::define_template_property(
            scope.rt,
            function,
            name.raw(),
            value.raw(),
            attributes,
        );
        if let Err(error) = result {
            debug!("function template property declaration failed: {}", error);
        }
    }

    /// Whether `value` was constructed by this template's function
    pub fn has_instance(self, scope: &mut HandleScope<'_>, value: Local<'_, Value>) -> bool {
        ok_or_log(
            template_has_instance(scope.rt, self.raw(), value.raw()),
            "instance check",
        )
        .unwrap_or(false)
    }
}

/// Builds, links and caches the template's function
///
/// The prototype object comes first, instantiated from the prototype
/// template; the function then carries it as its `"prototype"` property and
/// the prototype points back through `"constructor"`. The function's name
/// is the instance template's class name.
fn materialize_function(rt: &mut Runtime, template: ValueRef) -> JsResult<ValueRef> {
    let record = require_template(rt, template)?;
    if let Some(function) = record.function.borrow().as_ref() {
        return Ok(function.value());
    }
    let prototype = materialize_prototype(rt, &record)?;
    let name = object_template::template_class_name(rt, record.instance_template.value())
        .unwrap_or_default();
    let function = rt.create_function(&name, function_invoked)?;
    let state: ExternalValue = record.clone();
    utils::add_external_data(rt, function, state, None)?;
    let prototype_id = rt.ids.prototype;
    rt.define_data_property(function, prototype_id, prototype, true, false, false)?;
    let constructor_id = rt.ids.constructor;
    rt.define_data_property(prototype, constructor_id, function, true, false, true)?;
    let rooted = rt.root(function)?;
    *record.function.borrow_mut() = Some(rooted);
    Ok(function)
}

fn materialize_prototype(rt: &mut Runtime, record: &FunctionTemplateData) -> JsResult<ValueRef> {
    if let Some(prototype) = record.prototype.borrow().as_ref() {
        return Ok(prototype.value());
    }
    let prototype = object_template::instantiate(rt, record.prototype_template.value(), None)?;
    let rooted = rt.root(prototype)?;
    *record.prototype.borrow_mut() = Some(rooted);
    Ok(prototype)
}

/// Entry point for every function a template materializes
///
/// Construction replaces the engine's bare receiver with a fresh instance
/// of the instance template under the cached prototype. The callback's
/// result stands in for the instance only when it is set and neither
/// `undefined` nor `null`.
fn function_invoked(rt: &mut Runtime, cx: &CallContext) -> JsResult<ValueRef> {
    let record = utils::get_external_data(rt, cx.callee)?
        .ok_or(JsError::InvalidArgument("function template record is missing"))?
        .downcast::<FunctionTemplateData>()
        .map_err(|_| JsError::InvalidArgument("function template record is missing"))?;
    let this = if cx.is_construct {
        let prototype = record.prototype.borrow().as_ref().map(Rooted::value);
        object_template::instantiate(rt, record.instance_template.value(), prototype)?
    } else {
        cx.this
    };
    let Some(callback) = record.callback else {
        return Ok(if cx.is_construct { this } else { rt.undefined_value() });
    };
    if !signature_allows(rt, &record, this)? {
        return Err(rt.throw_type_error("Illegal invocation"));
    }
    let result = invoke_callback(rt, callback, &record, this, cx)?;
    if cx.is_construct {
        if let Some(value) = result {
            if !matches!(rt.type_of(value)?, JsValueType::Undefined | JsValueType::Null) {
                return Ok(value);
            }
        }
        Ok(this)
    } else {
        Ok(result.unwrap_or(rt.undefined_value()))
    }
}

fn invoke_callback(
    rt: &mut Runtime,
    callback: FunctionCallback,
    record: &FunctionTemplateData,
    this: ValueRef,
    cx: &CallContext,
) -> JsResult<Option<ValueRef>> {
    let data = record
        .data
        .as_ref()
        .map(Rooted::value)
        .unwrap_or(rt.undefined_value());
    let mut scope = HandleScope::with_runtime(rt);
    let undefined = scope.rt.undefined_value();
    let args: Vec<Local<'_, Value>> = cx.args.iter().map(|&arg| scope.local(arg)).collect();
    let info = FunctionCallbackInfo {
        this: scope.local(this),
        callee: scope.local(cx.callee),
        data: scope.local(data),
        args,
        is_construct: cx.is_construct,
        undefined: scope.local(undefined),
    };
    let result = callback(&mut scope, &info);
    object_template::check_exception(scope.rt)?;
    Ok(result.map(|value| value.raw()))
}

fn signature_allows(
    rt: &mut Runtime,
    record: &FunctionTemplateData,
    this: ValueRef,
) -> JsResult<bool> {
    let Some(signature) = record.signature.as_ref() else {
        return Ok(true);
    };
    let Some(receiver) = signature_receiver(rt, signature.value()) else {
        debug!("signature without a receiver record allows every call");
        return Ok(true);
    };
    template_has_instance(rt, receiver, this)
}

/// Whether `value` was instantiated by the template: its immediate
/// prototype must be the template's materialized prototype object
fn template_has_instance(rt: &mut Runtime, template: ValueRef, value: ValueRef) -> JsResult<bool> {
    let Some(record) = function_record(rt, template) else {
        return Ok(false);
    };
    let prototype = {
        let cached = record.prototype.borrow();
        match cached.as_ref() {
            Some(prototype) => prototype.value(),
            None => return Ok(false),
        }
    };
    if !rt.is_object(value)? {
        return Ok(false);
    }
    let immediate = rt.get_prototype(value)?;
    Ok(immediate == prototype)
}

impl Signature {
    /// A signature admitting only receivers instantiated by `receiver`
    pub fn new<'s>(
        scope: &mut HandleScope<'s>,
        receiver: Local<'_, FunctionTemplate>,
    ) -> Option<Local<'s, Signature>> {
        let raw = ok_or_log(new_signature_cell(scope.rt, receiver.raw()), "signature creation")?;
        Some(scope.local(raw))
    }
}

fn new_signature_cell(rt: &mut Runtime, receiver: ValueRef) -> JsResult<ValueRef> {
    let receiver = rt.root(receiver)?;
    let data: ExternalValue = Rc::new(SignatureData { receiver });
    rt.create_external(data, None)
}

fn signature_receiver(rt: &Runtime, signature: ValueRef) -> Option<ValueRef> {
    let data = rt.external_data(signature).ok()??;
    let data = data.downcast::<SignatureData>().ok()?;
    Some(data.receiver.value())
}
