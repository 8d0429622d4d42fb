//! Resources: values paired with a release action.

use std::any::Any;
use std::fmt;

use crate::error::BoxError;

type ReleaseFn<T> = Box<dyn FnOnce(T) -> Result<(), BoxError> + Send>;

/// A value owned by a [`ScopeStore`](crate::scope::ScopeStore) together with
/// the action that releases it.
///
/// The store runs the release action exactly once, when the scope that
/// created the resource closes. Callers only ever see clones of the value,
/// so resources are typically cheap handles (an `Arc`, a connection pool, a
/// client).
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use testkit_context::scope::{Resource, ScopeStore};
///
/// let released = Arc::new(AtomicBool::new(false));
/// let flag = released.clone();
///
/// let scope = ScopeStore::root("example");
/// let value = scope
///     .get_or_create("answer", || {
///         Ok(Resource::with_release(42_u32, move |_| {
///             flag.store(true, Ordering::SeqCst);
///             Ok::<_, std::io::Error>(())
///         }))
///     })
///     .unwrap();
/// assert_eq!(value, 42);
///
/// scope.close().unwrap();
/// assert!(released.load(Ordering::SeqCst));
/// ```
pub struct Resource<T> {
    value: Option<T>,
    release: Option<ReleaseFn<T>>,
}

impl<T> Resource<T> {
    /// A resource that is simply dropped when its scope closes.
    pub fn new(value: T) -> Self {
        Self {
            value: Some(value),
            release: None,
        }
    }

    /// A resource released by `release` when its scope closes.
    pub fn with_release<F, E>(value: T, release: F) -> Self
    where
        F: FnOnce(T) -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            value: Some(value),
            release: Some(Box::new(move |value| release(value).map_err(Into::into))),
        }
    }

    /// Returns the value, or `None` once released.
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Returns true once the release action ran.
    pub fn is_released(&self) -> bool {
        self.value.is_none()
    }

    /// Runs the release action. Later calls do nothing.
    pub(crate) fn release(&mut self) -> Result<(), BoxError> {
        let Some(value) = self.value.take() else {
            return Ok(());
        };
        match self.release.take() {
            Some(release) => release(value),
            None => Ok(()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("value", &self.value)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Type-erased view of a [`Resource`] kept in a store.
pub(crate) trait StoredResource: Send {
    fn value(&self) -> Option<&(dyn Any + Send + Sync)>;

    fn release(&mut self) -> Result<(), BoxError>;
}

impl<T> StoredResource for Resource<T>
where
    T: Send + Sync + 'static,
{
    fn value(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.value.as_ref().map(|value| value as &(dyn Any + Send + Sync))
    }

    fn release(&mut self) -> Result<(), BoxError> {
        Resource::release(self)
    }
}
