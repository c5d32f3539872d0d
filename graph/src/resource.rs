//! Resource names, values and runtime type descriptors.

use std::any::{Any, TypeId};
use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use smallvec::SmallVec;

/// Opaque resource identifier. Equality is byte-exact.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(Arc<str>);

impl ResourceName {
    /// Wrap a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        ResourceName(Arc::from(name.as_ref()))
    }

    /// The name as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name follows the side-effect marker convention of a
    /// doubled underscore on both ends. Marker names are injected into
    /// target lists to force a side-effect node into the plan and filtered
    /// out of the final result mapping by the orchestrator.
    pub fn is_marker(&self) -> bool {
        self.0.len() >= 4 && self.0.starts_with("__") && self.0.ends_with("__")
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{:?}", &*self.0)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        ResourceName::new(name)
    }
}

impl From<String> for ResourceName {
    fn from(name: String) -> Self {
        ResourceName(Arc::from(name))
    }
}

/// Runtime value passed between workers.
///
/// Registers share values by reference; plans are single-threaded by
/// contract, so plain reference counting is enough.
pub type Value = Rc<dyn Any>;

/// Opaque type token of a resource value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeToken {
    /// A concrete Rust type.
    Rust(TypeId),
    /// A domain-level tag negotiated by convention between nodes.
    Named(Arc<str>),
}

/// Resource type descriptor: a type token plus a small bag of static
/// attributes that nodes propagate during type negotiation (element kinds,
/// storage classes and the like).
///
/// The attribute bag is a short linear-scan list, not a hash table; two or
/// three entries is the common case.
#[derive(Clone)]
pub struct TypeDesc {
    token: TypeToken,
    type_name: Option<&'static str>,
    attrs: SmallVec<[(Arc<str>, Rc<dyn Any>); 2]>,
}

impl TypeDesc {
    /// Descriptor of a concrete Rust type.
    pub fn of<T: 'static>() -> Self {
        TypeDesc {
            token: TypeToken::Rust(TypeId::of::<T>()),
            type_name: Some(std::any::type_name::<T>()),
            attrs: SmallVec::new(),
        }
    }

    /// Descriptor derived from a value. The type name is not recoverable
    /// from a value alone.
    pub fn of_value(value: &Value) -> Self {
        TypeDesc {
            token: TypeToken::Rust(value.as_ref().type_id()),
            type_name: None,
            attrs: SmallVec::new(),
        }
    }

    /// Descriptor carrying a conventional tag instead of a Rust type.
    pub fn named(name: impl AsRef<str>) -> Self {
        TypeDesc {
            token: TypeToken::Named(Arc::from(name.as_ref())),
            type_name: None,
            attrs: SmallVec::new(),
        }
    }

    /// The type token.
    pub fn token(&self) -> &TypeToken {
        &self.token
    }

    /// Whether the token is the given concrete Rust type.
    pub fn is<T: 'static>(&self) -> bool {
        self.token == TypeToken::Rust(TypeId::of::<T>())
    }

    /// Whether two descriptors carry the same token. Attributes are not
    /// part of the comparison.
    pub fn same_token(&self, other: &TypeDesc) -> bool {
        self.token == other.token
    }

    /// Attach or replace an attribute, builder style.
    pub fn with_attr<T: 'static>(mut self, key: impl AsRef<str>, value: T) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Attach or replace an attribute.
    pub fn set_attr<T: 'static>(&mut self, key: impl AsRef<str>, value: T) {
        let key = key.as_ref();
        let boxed: Rc<dyn Any> = Rc::new(value);
        if let Some(slot) = self.attrs.iter_mut().find(|(k, _)| &**k == key) {
            slot.1 = boxed;
        } else {
            self.attrs.push((Arc::from(key), boxed));
        }
    }

    /// Look up an attribute by key and type.
    pub fn attr<T: 'static>(&self, key: &str) -> Option<&T> {
        self.attrs
            .iter()
            .find(|(k, _)| &**k == key)
            .and_then(|(_, v)| v.downcast_ref::<T>())
    }

    fn describe(&self) -> &str {
        match (&self.token, self.type_name) {
            (_, Some(name)) => name,
            (TypeToken::Named(name), None) => name,
            (TypeToken::Rust(_), None) => "<runtime type>",
        }
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = fmt.debug_struct("TypeDesc");
        debug.field("token", &self.describe());
        if !self.attrs.is_empty() {
            let keys: Vec<&str> = self.attrs.iter().map(|(k, _)| &**k).collect();
            debug.field("attrs", &keys);
        }
        debug.finish()
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.describe())
    }
}
