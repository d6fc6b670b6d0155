//! Typed storage slots shared across a running subtree.
//!
//! A [`Storage<T>`] declares a value slot. Every group that lists the
//! declaration gets a fresh instance of `T` when it enters and destroys
//! it when it exits; a descendant group declaring the same slot shadows
//! the ancestor's instance for its whole subtree. Handlers reach the
//! innermost live instance through the declaration handle — cloning a
//! declaration preserves its identity, so the same slot can be shared
//! between nested recipe fragments.
//!
//! Access is only valid inside a handler invocation (the engine installs
//! the resolution scope around every handler call); `with`/`with_mut`
//! panic outside of one, which is a programming error in the recipe.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use uuid::Uuid;

use crate::runtime::scope;

/// Identity of a storage declaration.
///
/// Copies of a declaration share the key, so equality means "the same
/// declaration", not "the same instance".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageKey(Uuid);

impl StorageKey {
    pub(crate) fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed storage declaration.
pub struct Storage<T> {
    key: StorageKey,
    ctor: Rc<dyn Fn() -> Box<dyn Any>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Default + 'static> Storage<T> {
    /// Declare a new storage slot. Instances are default-constructed at
    /// group entry.
    pub fn new() -> Self {
        Self {
            key: StorageKey::fresh(),
            ctor: Rc::new(|| Box::new(T::default()) as Box<dyn Any>),
            _marker: PhantomData,
        }
    }
}

impl<T: Default + 'static> Default for Storage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Storage<T> {
    /// Read the active instance.
    ///
    /// # Panics
    ///
    /// Panics when called outside a handler, or when no group on the
    /// handler's path declares this storage.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let slot = self.active_slot();
        let value = slot.borrow();
        match value.downcast_ref::<T>() {
            Some(value) => f(value),
            None => panic!("active instance of storage {} has a foreign type", self.key),
        }
    }

    /// Mutate the active instance.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Storage::with`].
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let slot = self.active_slot();
        let mut value = slot.borrow_mut();
        match value.downcast_mut::<T>() {
            Some(value) => f(value),
            None => panic!("active instance of storage {} has a foreign type", self.key),
        }
    }

    /// Clone the active instance's value out of the slot.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(|value| value.clone())
    }

    /// Replace the active instance's value.
    pub fn set(&self, value: T) {
        self.with_mut(|slot| *slot = value);
    }

    /// Type-erased handle to this declaration.
    pub fn base(&self) -> StorageBase {
        StorageBase {
            key: self.key,
            ctor: self.ctor.clone(),
        }
    }

    fn active_slot(&self) -> scope::ActiveSlot {
        match scope::active_storage(self.key) {
            Some(slot) => slot,
            None => panic!(
                "storage {} has no active instance in the current handler scope",
                self.key
            ),
        }
    }
}

impl<T> Clone for Storage<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            ctor: self.ctor.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Storage").field(&self.key).finish()
    }
}

/// Type-erased storage handle.
///
/// Two handles compare equal iff they refer to the same declaration.
#[derive(Clone)]
pub struct StorageBase {
    key: StorageKey,
    ctor: Rc<dyn Fn() -> Box<dyn Any>>,
}

impl StorageBase {
    /// The declaration this handle refers to.
    pub fn key(&self) -> StorageKey {
        self.key
    }

    pub(crate) fn construct(&self) -> Box<dyn Any> {
        (self.ctor)()
    }
}

impl PartialEq for StorageBase {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for StorageBase {}

impl fmt::Debug for StorageBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StorageBase").field(&self.key).finish()
    }
}

impl<T: 'static> From<&Storage<T>> for StorageBase {
    fn from(storage: &Storage<T>) -> Self {
        storage.base()
    }
}
