//! Global resource storage.
//!
//! Global resources are server-lifetime values inserted by plugins during the
//! build phase, typically configuration such as `HooksConfig` or
//! `TracingConfig`. They are read-only once the server is built.

use core::any::{Any, TypeId};
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};

/// Marker trait for global, read-only resources.
///
/// # Example
///
/// ```
/// use ripple_system::resource::GlobalResource;
///
/// struct StoreConfig {
///     read_only: bool,
/// }
///
/// impl GlobalResource for StoreConfig {}
/// ```
pub trait GlobalResource: Send + Sync + 'static {}

/// Unique identifier for a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(TypeId);

impl ResourceId {
    /// Creates a `ResourceId` for the given type.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self(TypeId::of::<T>())
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.0
    }
}

/// Errors that can occur during resource access.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The requested resource type was not found in the container.
    #[error("resource not found: {0}")]
    NotFound(&'static str),

    /// The resource is currently locked for writing.
    #[error("resource already borrowed mutably: {0}")]
    BorrowConflict(&'static str),
}

type BoxedResource = Box<dyn Any + Send + Sync>;

/// Container for global resources, keyed by type.
///
/// # Example
///
/// ```
/// use ripple_system::resource::{GlobalResource, Resources};
///
/// struct Limits { max_hooks: usize }
/// impl GlobalResource for Limits {}
///
/// let mut resources = Resources::new();
/// resources.insert(Limits { max_hooks: 8 });
///
/// let limits = resources.get::<Limits>().unwrap();
/// assert_eq!(limits.max_hooks, 8);
/// ```
#[derive(Default)]
pub struct Resources {
    storage: HashMap<ResourceId, RwLock<BoxedResource>>,
}

impl Resources {
    /// Creates a new empty resource container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: HashMap::new(),
        }
    }

    /// Inserts a resource, returning the previous value of the same type.
    pub fn insert<T: GlobalResource>(&mut self, resource: T) -> Option<T> {
        self.storage
            .insert(ResourceId::of::<T>(), RwLock::new(Box::new(resource)))
            .and_then(|old| old.into_inner().downcast::<T>().ok().map(|boxed| *boxed))
    }

    /// Returns `true` if a resource of type `T` exists.
    #[must_use]
    pub fn contains<T: GlobalResource>(&self) -> bool {
        self.storage.contains_key(&ResourceId::of::<T>())
    }

    /// Gets a read guard on a resource.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::NotFound`] if the resource type is not registered
    /// - [`ResourceError::BorrowConflict`] if the resource is write-locked
    pub fn get<T: GlobalResource>(&self) -> Result<ResourceRef<'_, T>, ResourceError> {
        let type_name = core::any::type_name::<T>();
        let entry = self
            .storage
            .get(&ResourceId::of::<T>())
            .ok_or(ResourceError::NotFound(type_name))?;
        let guard = entry
            .try_read()
            .ok_or(ResourceError::BorrowConflict(type_name))?;

        RwLockReadGuard::try_map(guard, |boxed| boxed.downcast_ref::<T>())
            .map(|guard| ResourceRef { guard })
            .map_err(|_| ResourceError::NotFound(type_name))
    }

    /// Removes a resource from the container and returns it.
    pub fn remove<T: GlobalResource>(&mut self) -> Option<T> {
        self.storage
            .remove(&ResourceId::of::<T>())
            .and_then(|entry| entry.into_inner().downcast::<T>().ok().map(|boxed| *boxed))
    }

    /// Returns the number of resources stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` if no resources are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// RAII guard for read access to a global resource.
pub struct ResourceRef<'a, T> {
    guard: parking_lot::MappedRwLockReadGuard<'a, T>,
}

impl<T> core::ops::Deref for ResourceRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}
