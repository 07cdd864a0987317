//! Integration tests for the Vanadium embedding API
//!
//! These tests drive the public surface end to end: isolates, contexts,
//! templates, interceptors, exception guards and weak handles.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Once;

use regex::Regex;

use vanadium::{
    create_isolate, null, undefined, Array, Boolean, Context, ContextScope, Exception, External,
    Function, FunctionCallbackInfo, FunctionTemplate, HandleScope,
    IndexedPropertyHandlerConfiguration, Integer, Local, NamedPropertyHandlerConfiguration, Number,
    Object, ObjectTemplate, Persistent, PropertyAttribute, PropertyCallbackInfo, Signature, String,
    TryCatch, Value, WeakCallbackData, EMBEDDER_DATA_SLOTS,
};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn with_context<F>(f: F)
where
    F: FnOnce(&mut HandleScope<'_>),
{
    init_tracing();
    let mut isolate = create_isolate();
    let mut scope = HandleScope::new(&mut isolate);
    let context = Context::new(&mut scope).unwrap();
    let mut scope = ContextScope::new(&mut scope, context);
    f(&mut scope);
}

fn read<'s>(scope: &mut HandleScope<'s>, object: Local<'s, Object>, key: &str) -> Local<'s, Value> {
    let key = String::new(scope, key).unwrap();
    object.get(scope, key.into()).unwrap()
}

#[test]
fn test_primitive_values_round_trip() {
    with_context(|scope| {
        let greeting = String::new(scope, "übergrüße").unwrap();
        assert_eq!(greeting.to_rust_string_lossy(scope), "übergrüße");
        assert_eq!(greeting.utf8_length(scope), "übergrüße".len());

        let tau = Number::new(scope, 6.28).unwrap();
        assert_eq!(tau.value(scope), 6.28);

        let negative = Integer::new(scope, -40).unwrap();
        assert_eq!(negative.value(scope), -40);
        let big = Integer::new_from_unsigned(scope, 3_000_000_000).unwrap();
        assert_eq!(big.value(scope), 3_000_000_000);

        let yes = Boolean::new(scope, true);
        assert!(yes.value(scope));

        let undef: Local<'_, Value> = undefined(scope).into();
        let nothing: Local<'_, Value> = null(scope).into();
        assert!(undef.is_undefined(scope));
        assert!(nothing.is_null(scope));
        assert!(!nothing.strict_equals(scope, undef));
        assert_eq!(nothing.equals(scope, undef), Some(true));

        let one: Local<'_, Value> = Number::new(scope, 1.0).unwrap().into();
        let one_text: Local<'_, Value> = String::new(scope, "1").unwrap().into();
        assert!(!one.strict_equals(scope, one_text));
        assert_eq!(one.equals(scope, one_text), Some(true));
    });
}

#[test]
fn test_each_context_gets_its_own_globals() {
    init_tracing();
    let mut isolate = create_isolate();
    let mut scope = HandleScope::new(&mut isolate);
    let first = Context::new(&mut scope).unwrap();
    let second = Context::new(&mut scope).unwrap();

    {
        let mut scope = ContextScope::new(&mut scope, first);
        let global = first.global(&mut scope).unwrap();
        let key: Local<'_, Value> = String::new(&mut scope, "answer").unwrap().into();
        let value: Local<'_, Value> = Number::new(&mut scope, 42.0).unwrap().into();
        assert_eq!(global.set(&mut scope, key, value), Some(true));
        assert_eq!(
            global.get(&mut scope, key).unwrap().number_value(&scope),
            Some(42.0)
        );
    }
    {
        let mut scope = ContextScope::new(&mut scope, second);
        let global = second.global(&mut scope).unwrap();
        let key: Local<'_, Value> = String::new(&mut scope, "answer").unwrap().into();
        assert_eq!(global.has_own_property(&mut scope, key), Some(false));
    }
    {
        let mut scope = ContextScope::new(&mut scope, first);
        let tag: Local<'_, Value> = String::new(&mut scope, "primary").unwrap().into();
        assert!(first.set_embedder_data(&mut scope, 0, tag));
        let read_back = first.get_embedder_data(&mut scope, 0).unwrap();
        assert!(read_back.strict_equals(&scope, tag));
        let other = second.get_embedder_data(&mut scope, 0).unwrap();
        assert!(other.is_undefined(&scope));
    }
}

fn tagged_named_getter<'s>(
    scope: &mut HandleScope<'s>,
    name: Local<'s, Value>,
    _info: &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    let text = name.to_rust_string_lossy(scope);
    let tagged = String::new(scope, &format!("name:{text}"))?;
    Some(tagged.into())
}

fn shifted_indexed_getter<'s>(
    scope: &mut HandleScope<'s>,
    index: u32,
    _info: &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    Number::new(scope, f64::from(index) + 0.5).map(Into::into)
}

/// Only canonical decimal strings within u32 range reach the indexed
/// interceptor; everything else is a name.
#[test]
fn test_canonical_indexes_route_to_the_indexed_interceptor() {
    with_context(|scope| {
        let template = ObjectTemplate::new(scope).unwrap();
        template.set_named_property_handler(
            scope,
            NamedPropertyHandlerConfiguration {
                getter: Some(tagged_named_getter),
                ..Default::default()
            },
            None,
        );
        template.set_indexed_property_handler(
            scope,
            IndexedPropertyHandlerConfiguration {
                getter: Some(shifted_indexed_getter),
                ..Default::default()
            },
            None,
        );
        let instance = template.new_instance(scope).unwrap();

        assert_eq!(read(scope, instance, "7").number_value(scope), Some(7.5));
        assert_eq!(read(scope, instance, "0").number_value(scope), Some(0.5));
        assert_eq!(
            read(scope, instance, "4294967295").number_value(scope),
            Some(4_294_967_295.5)
        );
        assert_eq!(read(scope, instance, "07").to_rust_string_lossy(scope), "name:07");
        assert_eq!(
            read(scope, instance, "4294967296").to_rust_string_lossy(scope),
            "name:4294967296"
        );
        assert_eq!(read(scope, instance, "-1").to_rust_string_lossy(scope), "name:-1");
        assert_eq!(read(scope, instance, "3.5").to_rust_string_lossy(scope), "name:3.5");
        assert_eq!(
            instance.get_index(scope, 9).unwrap().number_value(scope),
            Some(9.5)
        );
    });
}

fn magic_getter<'s>(
    scope: &mut HandleScope<'s>,
    name: Local<'s, Value>,
    _info: &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    if name.to_rust_string_lossy(scope) == "magic" {
        Number::new(scope, 42.0).map(Into::into)
    } else {
        None
    }
}

fn magic_names<'s>(
    scope: &mut HandleScope<'s>,
    _info: &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Array>> {
    let array = Array::new(scope, 1)?;
    let holder: Local<'s, Object> = array.into();
    let name: Local<'s, Value> = String::new(scope, "magic")?.into();
    holder.set_index(scope, 0, name);
    Some(array)
}

#[test]
fn test_interception_reaches_through_the_prototype_chain() {
    with_context(|scope| {
        let template = ObjectTemplate::new(scope).unwrap();
        template.set_named_property_handler(
            scope,
            NamedPropertyHandlerConfiguration {
                getter: Some(magic_getter),
                enumerator: Some(magic_names),
                ..Default::default()
            },
            None,
        );
        let instance = template.new_instance(scope).unwrap();
        let child = Object::new(scope).unwrap();
        assert_eq!(child.set_prototype(scope, instance.into()), Some(true));

        let magic: Local<'_, Value> = String::new(scope, "magic").unwrap().into();
        assert_eq!(child.get(scope, magic).unwrap().number_value(scope), Some(42.0));
        assert_eq!(child.has(scope, magic), Some(true));

        let blank: Local<'_, Value> = String::new(scope, "blank").unwrap().into();
        assert_eq!(child.has(scope, blank), Some(false));
        // an unanswered name still stops at the interceptor on reads
        assert!(child.get(scope, blank).unwrap().is_undefined(scope));
    });
}

fn point_constructor<'s>(
    scope: &mut HandleScope<'s>,
    info: &FunctionCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    assert!(info.is_construct_call());
    assert!(info.this().set_internal_field(scope, 0, info.get(0)));
    None
}

fn point_double<'s>(
    scope: &mut HandleScope<'s>,
    info: &FunctionCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    let stored = info.this().get_internal_field(scope, 0)?;
    let value = stored.number_value(scope)?;
    Number::new(scope, value * 2.0).map(Into::into)
}

#[test]
fn test_class_templates_carry_fields_and_methods() {
    with_context(|scope| {
        let template = FunctionTemplate::new(scope, point_constructor).unwrap();
        let class_name = String::new(scope, "Point").unwrap();
        template.set_class_name(scope, class_name);
        let instance_template = template.instance_template(scope).unwrap();
        instance_template.set_internal_field_count(scope, 1);

        let prototype_template = template.prototype_template(scope).unwrap();
        let double_fn = Function::new(scope, point_double).unwrap();
        let method_name = String::new(scope, "double").unwrap();
        prototype_template.set(scope, method_name, double_fn.into(), PropertyAttribute::DONT_ENUM);

        let constructor = template.get_function(scope).unwrap();
        let argument: Local<'_, Value> = Number::new(scope, 21.0).unwrap().into();
        let instance = constructor.new_instance(scope, &[argument]).unwrap();

        assert_eq!(instance.get_constructor_name(scope), "Point");
        assert_eq!(instance.internal_field_count(scope), 1);
        assert!(template.has_instance(scope, instance.into()));
        let stranger: Local<'_, Value> = Object::new(scope).unwrap().into();
        assert!(!template.has_instance(scope, stranger));

        let method = read(scope, instance, "double").as_function(scope).unwrap();
        let result = method.call(scope, instance.into(), &[]).unwrap();
        assert_eq!(result.number_value(scope), Some(42.0));
    });
}

fn guarded_method<'s>(
    scope: &mut HandleScope<'s>,
    _info: &FunctionCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    Number::new(scope, 7.0).map(Into::into)
}

#[test]
fn test_signature_mismatch_is_an_illegal_invocation() {
    with_context(|scope| {
        let class_template = FunctionTemplate::with_options(scope, None, None, None).unwrap();
        let signature = Signature::new(scope, class_template).unwrap();
        let method_template =
            FunctionTemplate::with_options(scope, Some(guarded_method), None, Some(signature))
                .unwrap();
        let method = method_template.get_function(scope).unwrap();

        let constructor = class_template.get_function(scope).unwrap();
        let instance = constructor.new_instance(scope, &[]).unwrap();
        let answer = method.call(scope, instance.into(), &[]).unwrap();
        assert_eq!(answer.number_value(scope), Some(7.0));

        let stranger: Local<'_, Value> = Object::new(scope).unwrap().into();
        let mut guard = TryCatch::new(scope);
        assert!(method.call(&mut guard, stranger, &[]).is_none());
        assert!(guard.has_caught());
        assert_eq!(guard.message().unwrap(), "Illegal invocation");
    });
}

fn oversized<'s>(
    scope: &mut HandleScope<'s>,
    _info: &FunctionCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    let message = String::new(scope, "too big")?;
    let error = Exception::range_error(scope, message);
    scope.throw_exception(error);
    None
}

#[test]
fn test_try_catch_surfaces_thrown_errors_with_stack() {
    with_context(|scope| {
        let function = Function::new(scope, oversized).unwrap();
        let receiver: Local<'_, Value> = undefined(scope).into();

        let mut guard = TryCatch::new(scope);
        assert!(function.call(&mut guard, receiver, &[]).is_none());
        assert!(guard.has_caught());
        assert_eq!(guard.message().unwrap(), "too big");

        let exception = guard.exception().unwrap();
        assert!(exception.is_native_error(&guard));

        let stack = guard.stack_trace().unwrap();
        let text = stack.to_rust_string_lossy(&mut guard);
        let pattern = Regex::new(r"^RangeError: too big\n    at <anonymous>$").unwrap();
        assert!(pattern.is_match(&text), "unexpected stack: {text:?}");
    });
}

thread_local! {
    static TALLY: Cell<u32> = Cell::new(0);
}

fn tally(_scope: &mut HandleScope, _exception: Local<Value>) {
    TALLY.with(|seen| seen.set(seen.get() + 1));
}

#[test]
fn test_message_listeners_hear_verbose_guards() {
    init_tracing();
    TALLY.with(|seen| seen.set(0));
    let mut isolate = create_isolate();
    isolate.add_message_listener(tally);
    {
        let mut scope = HandleScope::new(&mut isolate);
        let context = Context::new(&mut scope).unwrap();
        let mut scope = ContextScope::new(&mut scope, context);
        let mut guard = TryCatch::new(&mut scope);
        guard.set_verbose(true);
        let message = String::new(&mut guard, "reported").unwrap();
        let error = Exception::error(&mut guard, message);
        guard.throw_exception(error);
    }
    TALLY.with(|seen| assert_eq!(seen.get(), 1));

    isolate.remove_message_listener(tally);
    {
        let mut scope = HandleScope::new(&mut isolate);
        let context = Context::new(&mut scope).unwrap();
        let mut scope = ContextScope::new(&mut scope, context);
        let mut guard = TryCatch::new(&mut scope);
        guard.set_verbose(true);
        let message = String::new(&mut guard, "unheard").unwrap();
        let error = Exception::error(&mut guard, message);
        guard.throw_exception(error);
    }
    TALLY.with(|seen| assert_eq!(seen.get(), 1));
}

thread_local! {
    static COLLECTED: Cell<u32> = Cell::new(0);
}

fn observe(_scope: &mut HandleScope, data: WeakCallbackData<Object, u32>) {
    COLLECTED.with(|seen| seen.set(seen.get() + data.parameter));
}

#[test]
fn test_weak_persistents_observe_collection() {
    with_context(|scope| {
        COLLECTED.with(|seen| seen.set(0));
        let persistent = {
            let mut nested = HandleScope::nested(scope);
            let object = Object::new(&mut nested).unwrap();
            Persistent::new(&mut nested, object)
        };
        assert!(!persistent.is_weak());
        persistent.set_weak(scope, 7, observe);
        assert!(persistent.is_weak());

        scope.collect_garbage();
        COLLECTED.with(|seen| assert_eq!(seen.get(), 7));
        assert!(persistent.get(scope).is_none());
    });
}

fn bump<'s>(
    scope: &mut HandleScope<'s>,
    info: &FunctionCallbackInfo<'s>,
) -> Option<Local<'s, Value>> {
    let payload = info.data().as_external(scope)?.value(scope)?;
    let counter = payload.downcast::<Cell<u32>>().ok()?;
    counter.set(counter.get() + 1);
    Number::new(scope, f64::from(counter.get())).map(Into::into)
}

#[test]
fn test_template_data_flows_into_callbacks() {
    with_context(|scope| {
        let counter = Rc::new(Cell::new(0u32));
        let payload: Rc<Cell<u32>> = Rc::clone(&counter);
        let data: Local<'_, Value> = External::new(scope, payload).unwrap().into();
        let template = FunctionTemplate::with_options(scope, Some(bump), Some(data), None).unwrap();
        let function = template.get_function(scope).unwrap();
        let receiver: Local<'_, Value> = undefined(scope).into();

        let first = function.call(scope, receiver, &[]).unwrap();
        assert_eq!(first.number_value(scope), Some(1.0));
        function.call(scope, receiver, &[]).unwrap();
        assert_eq!(counter.get(), 2);
    });
}

fn slot_indexes<'s>(
    scope: &mut HandleScope<'s>,
    _info: &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Array>> {
    let array = Array::new(scope, 2)?;
    let holder: Local<'s, Object> = array.into();
    let twelve: Local<'s, Value> = Integer::new(scope, 12)?.into();
    holder.set_index(scope, 0, twelve);
    let three: Local<'s, Value> = Integer::new(scope, 3)?.into();
    holder.set_index(scope, 1, three);
    Some(array)
}

fn color_names<'s>(
    scope: &mut HandleScope<'s>,
    _info: &PropertyCallbackInfo<'s>,
) -> Option<Local<'s, Array>> {
    let array = Array::new(scope, 1)?;
    let holder: Local<'s, Object> = array.into();
    let gamma: Local<'s, Value> = String::new(scope, "gamma")?.into();
    holder.set_index(scope, 0, gamma);
    Some(array)
}

#[test]
fn test_enumeration_lists_indexes_before_names() {
    with_context(|scope| {
        let template = ObjectTemplate::new(scope).unwrap();
        template.set_named_property_handler(
            scope,
            NamedPropertyHandlerConfiguration {
                enumerator: Some(color_names),
                ..Default::default()
            },
            None,
        );
        template.set_indexed_property_handler(
            scope,
            IndexedPropertyHandlerConfiguration {
                enumerator: Some(slot_indexes),
                ..Default::default()
            },
            None,
        );
        let instance = template.new_instance(scope).unwrap();

        let names = instance.get_own_property_names(scope).unwrap();
        assert_eq!(names.length(scope), 3);
        let holder: Local<'_, Object> = names.into();
        let listed: Vec<std::string::String> = (0..3)
            .map(|i| holder.get_index(scope, i).unwrap().to_rust_string_lossy(scope))
            .collect();
        assert_eq!(listed, ["12", "3", "gamma"]);
    });
}

#[test]
fn test_isolate_embedder_slots_and_counters() {
    init_tracing();
    let mut isolate = create_isolate();
    isolate.set_data(1, Rc::new("configured".to_string()));
    let stored = isolate.get_data(1).unwrap();
    assert_eq!(
        stored.downcast_ref::<std::string::String>().unwrap(),
        "configured"
    );
    assert!(isolate.get_data(2).is_none());
    isolate.set_data(EMBEDDER_DATA_SLOTS, Rc::new(0u8));
    assert!(isolate.get_data(EMBEDDER_DATA_SLOTS).is_none());

    assert!(!isolate.is_debug_enabled());
    isolate.set_debug_enabled(true);
    assert!(isolate.is_debug_enabled());

    let before = isolate.stats();
    {
        let mut scope = HandleScope::new(&mut isolate);
        let context = Context::new(&mut scope).unwrap();
        let mut scope = ContextScope::new(&mut scope, context);
        for _ in 0..8 {
            Object::new(&mut scope).unwrap();
        }
    }
    let after = isolate.stats();
    assert!(after.total_allocations >= before.total_allocations + 8);
    isolate.collect_garbage();
    assert_eq!(isolate.stats().collections, after.collections + 1);
}
