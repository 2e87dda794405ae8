//! Request-scoped values.
//!
//! Each node carries at most one key/value pair. A lookup walks from the
//! node towards the root and stops at the first node whose key matches, so a
//! nearer binding shadows a farther one. A value of the wrong type at the
//! nearest match is an error; the walk does not continue past it.

use std::any::{self, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::node::Context;
use crate::error::{Error, ErrorKind, Result};

/// Name under which a value is attached to a context.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    /// Creates a key from its name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the key's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl<T> From<&TypedKey<T>> for Key {
    fn from(key: &TypedKey<T>) -> Self {
        key.key.clone()
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", &*self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key bound to the type of value stored under it.
///
/// ```
/// use kie_context::{Context, TypedKey};
///
/// let request_id: TypedKey<u64> = TypedKey::new("request_id");
/// let ctx = Context::root().with_typed_value(&request_id, 42);
/// assert_eq!(ctx.get(&request_id).unwrap(), Some(&42));
/// ```
pub struct TypedKey<T> {
    key: Key,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    /// Creates a typed key.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            key: Key::new(name),
            _marker: PhantomData,
        }
    }

    /// Returns the untyped key.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedKey")
            .field("name", &self.key.name())
            .field("type", &any::type_name::<T>())
            .finish()
    }
}

impl<T> AsRef<str> for TypedKey<T> {
    fn as_ref(&self) -> &str {
        self.key.name()
    }
}

pub(super) struct ValueEntry {
    key: Key,
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ValueEntry {
    fn new<T: Any + Send + Sync>(key: Key, value: T) -> Self {
        Self {
            key,
            value: Arc::new(value),
            type_name: any::type_name::<T>(),
        }
    }

    pub(super) fn key(&self) -> &Key {
        &self.key
    }

    fn mismatch<T>(&self) -> Error {
        Error::new(ErrorKind::TypeMismatch).with_message(format!(
            "value under `{}` is {}, not {}",
            self.key,
            self.type_name,
            any::type_name::<T>()
        ))
    }
}

impl Context {
    /// Creates a child carrying `value` under `key`.
    ///
    /// The child shadows any binding of the same key further up the chain.
    #[must_use]
    pub fn with_value<T>(&self, key: impl Into<Key>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.attach(None, Some(ValueEntry::new(key.into(), value)))
    }

    /// Creates a child carrying `value` under a typed key.
    #[must_use]
    pub fn with_typed_value<T>(&self, key: &TypedKey<T>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.with_value(key, value)
    }

    /// Looks up the nearest value stored under `key`.
    ///
    /// Returns `Ok(None)` when no node on the chain binds the key.
    ///
    /// # Errors
    ///
    /// `ErrorKind::TypeMismatch` when the nearest binding holds a value of a
    /// different type.
    pub fn value<T: Any>(&self, key: impl AsRef<str>) -> Result<Option<&T>> {
        match self.find(key.as_ref()) {
            None => Ok(None),
            Some(entry) => entry
                .value
                .downcast_ref::<T>()
                .map(Some)
                .ok_or_else(|| entry.mismatch::<T>()),
        }
    }

    /// Like [`value`](Self::value), returning a shared handle that can
    /// outlive the context.
    ///
    /// # Errors
    ///
    /// `ErrorKind::TypeMismatch`, as for [`value`](Self::value).
    pub fn value_arc<T>(&self, key: impl AsRef<str>) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        match self.find(key.as_ref()) {
            None => Ok(None),
            Some(entry) => Arc::clone(&entry.value)
                .downcast::<T>()
                .map(Some)
                .map_err(|_| entry.mismatch::<T>()),
        }
    }

    /// Looks up the nearest value stored under a typed key.
    ///
    /// # Errors
    ///
    /// `ErrorKind::TypeMismatch` when the same name was bound with another
    /// type through an untyped key.
    pub fn get<T: Any>(&self, key: &TypedKey<T>) -> Result<Option<&T>> {
        self.value::<T>(key.key.name())
    }

    /// Returns true if some node on the chain binds `key`, whatever its type.
    #[must_use]
    pub fn contains_key(&self, key: impl AsRef<str>) -> bool {
        self.find(key.as_ref()).is_some()
    }

    /// Returns the key bound on this node itself, if any.
    #[must_use]
    pub fn own_key(&self) -> Option<&Key> {
        self.inner.entry.as_ref().map(ValueEntry::key)
    }

    fn find(&self, name: &str) -> Option<&ValueEntry> {
        let mut node = self;
        loop {
            if let Some(entry) = &node.inner.entry {
                if entry.key.name() == name {
                    return Some(entry);
                }
            }
            node = node.parent()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{TimerDriver, TimerDriverHandle};

    fn root() -> Context {
        Context::new_root(TimerDriverHandle::new(Arc::new(TimerDriver::new())))
    }

    #[derive(Debug, PartialEq)]
    struct Tenant {
        name: String,
    }

    #[test]
    fn values_are_inherited() {
        let ctx = root()
            .with_value("tenant", Tenant { name: "acme".into() })
            .derive()
            .derive();
        let tenant = ctx.value::<Tenant>("tenant").unwrap().unwrap();
        assert_eq!(tenant.name, "acme");
        assert!(ctx.contains_key("tenant"));
        assert_eq!(ctx.own_key(), None);
    }

    #[test]
    fn nearest_binding_wins() {
        let outer = root().with_value("level", 1_u32);
        let inner = outer.derive().with_value("level", 2_u32);
        assert_eq!(inner.value::<u32>("level").unwrap(), Some(&2));
        assert_eq!(outer.value::<u32>("level").unwrap(), Some(&1));
    }

    #[test]
    fn missing_key_is_none() {
        let ctx = root().with_value("a", 1_i32);
        assert_eq!(ctx.value::<i32>("b").unwrap(), None);
        assert!(!ctx.contains_key("b"));
    }

    #[test]
    fn type_mismatch_stops_the_walk() {
        let ctx = root()
            .with_value("id", 7_u64)
            .with_value("id", String::from("seven"));
        let err = ctx.value::<u64>("id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(err.message().unwrap_or_default().contains("id"));
        assert_eq!(
            ctx.value::<String>("id").unwrap().map(String::as_str),
            Some("seven")
        );
    }

    #[test]
    fn value_arc_outlives_the_context() {
        let ctx = root().with_value("payload", vec![1_u8, 2, 3]);
        let payload = ctx.value_arc::<Vec<u8>>("payload").unwrap().unwrap();
        drop(ctx);
        assert_eq!(*payload, vec![1, 2, 3]);
    }

    #[test]
    fn value_arc_reports_mismatch() {
        let ctx = root().with_value("payload", 1_u8);
        let err = ctx.value_arc::<u16>("payload").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn typed_keys_share_the_name_space() {
        let key: TypedKey<&'static str> = TypedKey::new("user");
        let ctx = root().with_typed_value(&key, "ada");
        assert_eq!(ctx.get(&key).unwrap(), Some(&"ada"));
        assert_eq!(ctx.value::<&'static str>("user").unwrap(), Some(&"ada"));

        let shadowed = ctx.with_value("user", 3_i8);
        assert_eq!(shadowed.get(&key).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn keys_format_by_name() {
        let key = Key::from("trace_id");
        assert_eq!(key.to_string(), "trace_id");
        assert_eq!(format!("{key:?}"), "Key(\"trace_id\")");
        let typed: TypedKey<u8> = TypedKey::new("n");
        assert!(format!("{typed:?}").contains("u8"));
    }

    #[test]
    fn values_survive_cancellation() {
        let ctx = root().derive().with_value("k", 5_u16);
        assert!(ctx.cancel());
        assert_eq!(ctx.value::<u16>("k").unwrap(), Some(&5));
    }
}
