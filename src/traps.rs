//! Proxy Trap Plumbing
//!
//! Intercepted objects are realized as host proxies whose handler object
//! carries one native function per trap. This module names the traps,
//! builds handler objects from a set of native callbacks, and owns the
//! index grammar that routes string keys between the named and indexed
//! interceptor worlds.

use derive_more::derive::Display;
use once_cell::sync::Lazy;

use crate::jsrt::{JsResult, NativeCallback, PropertyId, Runtime, ValueRef};

/// The trap set recognized on proxy handler objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ProxyTrap {
    /// Property read
    #[display("get")]
    Get,
    /// Property write
    #[display("set")]
    Set,
    /// Property deletion
    #[display("deleteProperty")]
    DeleteProperty,
    /// For-in key enumeration
    #[display("enumerate")]
    Enumerate,
    /// Own-key listing
    #[display("ownKeys")]
    OwnKeys,
    /// Prototype-inclusive membership test
    #[display("has")]
    Has,
    /// Own-property membership test
    #[display("hasOwn")]
    HasOwn,
    /// Property definition
    #[display("defineProperty")]
    DefineProperty,
    /// Own-descriptor lookup
    #[display("getOwnPropertyDescriptor")]
    GetOwnPropertyDescriptor,
    /// Prototype read
    #[display("getPrototypeOf")]
    GetPrototypeOf,
    /// Object freezing
    #[display("freeze")]
    Freeze,
    /// Object sealing
    #[display("seal")]
    Seal,
    /// Extension prevention
    #[display("preventExtensions")]
    PreventExtensions,
    /// Frozen query
    #[display("isFrozen")]
    IsFrozen,
    /// Sealed query
    #[display("isSealed")]
    IsSealed,
    /// Extensibility query
    #[display("isExtensible")]
    IsExtensible,
    /// Function application
    #[display("apply")]
    Apply,
    /// Construction
    #[display("construct")]
    Construct,
}

/// Number of variants in [`ProxyTrap`]
pub const TRAP_COUNT: usize = 18;

/// Handler property names, aligned with `ProxyTrap` declaration order
pub const TRAP_NAMES: [&str; TRAP_COUNT] = [
    "get",
    "set",
    "deleteProperty",
    "enumerate",
    "ownKeys",
    "has",
    "hasOwn",
    "defineProperty",
    "getOwnPropertyDescriptor",
    "getPrototypeOf",
    "freeze",
    "seal",
    "preventExtensions",
    "isFrozen",
    "isSealed",
    "isExtensible",
    "apply",
    "construct",
];

/// Every trap, in declaration order
pub const ALL_TRAPS: [ProxyTrap; TRAP_COUNT] = [
    ProxyTrap::Get,
    ProxyTrap::Set,
    ProxyTrap::DeleteProperty,
    ProxyTrap::Enumerate,
    ProxyTrap::OwnKeys,
    ProxyTrap::Has,
    ProxyTrap::HasOwn,
    ProxyTrap::DefineProperty,
    ProxyTrap::GetOwnPropertyDescriptor,
    ProxyTrap::GetPrototypeOf,
    ProxyTrap::Freeze,
    ProxyTrap::Seal,
    ProxyTrap::PreventExtensions,
    ProxyTrap::IsFrozen,
    ProxyTrap::IsSealed,
    ProxyTrap::IsExtensible,
    ProxyTrap::Apply,
    ProxyTrap::Construct,
];

static TRAP_PROPERTY_IDS: Lazy<[PropertyId; TRAP_COUNT]> =
    Lazy::new(|| TRAP_NAMES.map(PropertyId::from_name));

impl ProxyTrap {
    /// The handler property name for this trap
    pub fn name(self) -> &'static str {
        TRAP_NAMES[self as usize]
    }

    /// Interned property identifier of the trap name
    pub fn property_id(self) -> PropertyId {
        TRAP_PROPERTY_IDS[self as usize]
    }
}

/// Native callbacks backing one proxy handler
///
/// Absent callbacks leave the handler property unset, so the host forwards
/// the operation to the proxy target. Only the traps the template engine
/// installs have slots here.
#[derive(Default, Clone, Copy)]
pub struct TrapHandlers {
    /// Callback for the `get` trap
    pub get: Option<NativeCallback>,
    /// Callback for the `set` trap
    pub set: Option<NativeCallback>,
    /// Callback for the `deleteProperty` trap
    pub delete_property: Option<NativeCallback>,
    /// Callback for the `enumerate` trap
    pub enumerate: Option<NativeCallback>,
    /// Callback for the `ownKeys` trap
    pub own_keys: Option<NativeCallback>,
    /// Callback for the `has` trap
    pub has: Option<NativeCallback>,
    /// Callback for the `hasOwn` trap
    pub has_own: Option<NativeCallback>,
    /// Callback for the `getOwnPropertyDescriptor` trap
    pub get_own_property_descriptor: Option<NativeCallback>,
}

impl TrapHandlers {
    fn entries(&self) -> [(ProxyTrap, Option<NativeCallback>); 8] {
        [
            (ProxyTrap::Get, self.get),
            (ProxyTrap::Set, self.set),
            (ProxyTrap::DeleteProperty, self.delete_property),
            (ProxyTrap::Enumerate, self.enumerate),
            (ProxyTrap::OwnKeys, self.own_keys),
            (ProxyTrap::Has, self.has),
            (ProxyTrap::HasOwn, self.has_own),
            (
                ProxyTrap::GetOwnPropertyDescriptor,
                self.get_own_property_descriptor,
            ),
        ]
    }
}

/// Builds a proxy handler object with one function per present trap
pub fn create_proxy_trap_config(
    rt: &mut Runtime,
    handlers: &TrapHandlers,
) -> JsResult<ValueRef> {
    let config = rt.create_object()?;
    for (trap, callback) in handlers.entries() {
        if let Some(callback) = callback {
            let function = rt.create_function(trap.name(), callback)?;
            rt.set_property(config, trap.property_id(), function)?;
        }
    }
    Ok(config)
}

/// Constructs `new Proxy(target, config)` through the current context's
/// cached constructor
pub fn create_proxy(rt: &mut Runtime, target: ValueRef, config: ValueRef) -> JsResult<ValueRef> {
    let ctor = rt.proxy_constructor()?;
    rt.construct(ctor, &[target, config])
}

/// How a string property key routes between the interceptor worlds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// A canonical array-index string
    Indexed(u32),
    /// Any other string key
    Named,
}

/// Parses a canonical array-index string
///
/// Accepts `"0"` and digit strings without a leading zero whose value fits
/// in a `u32`. Everything else, including signs, whitespace and values past
/// `u32::MAX`, is `None`.
pub fn try_parse_uint32(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes[0] == b'0' && bytes.len() > 1 {
        return None;
    }
    text.parse().ok()
}

/// Routes a string key by the index grammar
pub fn classify_key(text: &str) -> KeyClass {
    match try_parse_uint32(text) {
        Some(index) => KeyClass::Indexed(index),
        None => KeyClass::Named,
    }
}
