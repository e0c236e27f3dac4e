//! State scoped to one client connection.
//!
//! Middleware reaches it through [`CallRequest::state`](crate::protocol::CallRequest)
//! to remember things across requests on the same connection, such as an
//! authenticated identity. It is dropped when the connection ends.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

type AnyMap = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// Typed map shared by every request of one connection.
///
/// Cloning yields a handle to the same map. Values are keyed by type, one
/// value per type.
#[derive(Clone, Default)]
pub struct ConnectionState {
    values: Arc<Mutex<AnyMap>>,
}

impl ConnectionState {
    /// Empty state, not shared with anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AnyMap> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value`, returning the previous value of that type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.lock()
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Copy of the stored value of type `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// True if a value of type `T` is stored.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.lock().contains_key(&TypeId::of::<T>())
    }

    /// Remove and return the value of type `T`.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.lock()
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// True if both handles point at the same connection's map.
    pub fn same_connection(&self, other: &ConnectionState) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl PartialEq for ConnectionState {
    fn eq(&self, other: &Self) -> bool {
        self.same_connection(other)
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("entries", &self.lock().len())
            .finish()
    }
}
