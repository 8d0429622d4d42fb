//! The `ScopeStore` implementation.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use crate::error::{panic_message, BoxError, Error, Result};
use crate::scope::resource::{Resource, StoredResource};

/// Unique identifier for a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({})", self.0)
    }
}

#[derive(Default)]
struct Entries {
    /// Keys in creation order.
    order: Vec<String>,
    resources: HashMap<String, Box<dyn StoredResource>>,
    /// Keys whose factory is currently running.
    creating: HashSet<String>,
    closed: bool,
}

impl Entries {
    /// Removes every resource, newest first.
    fn drain_newest_first(&mut self) -> Vec<(String, Box<dyn StoredResource>)> {
        let mut resources = std::mem::take(&mut self.resources);
        std::mem::take(&mut self.order)
            .into_iter()
            .rev()
            .filter_map(|key| resources.remove(&key).map(|resource| (key, resource)))
            .collect()
    }
}

struct StoreInner {
    id: ScopeId,
    name: String,
    parent: Mutex<Option<ScopeStore>>,
    children: Mutex<Vec<Weak<StoreInner>>>,
    /// Held for the whole of `get_or_create` and `close`. Re-entrant so
    /// factories and release actions may use the same store.
    entries: ReentrantMutex<RefCell<Entries>>,
}

/// Runs a release action, turning a panic into a release failure.
fn release_guarded<F>(release: F) -> std::result::Result<(), BoxError>
where
    F: FnOnce() -> std::result::Result<(), BoxError>,
{
    panic::catch_unwind(AssertUnwindSafe(release))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(Error::failed(format!("release action panicked: {message}")).into())
        })
}

fn release_all(scope: &str, resources: Vec<(String, Box<dyn StoredResource>)>) -> Vec<Error> {
    let mut failures = Vec::new();
    for (key, mut resource) in resources {
        match release_guarded(|| resource.release()) {
            Ok(()) => tracing::trace!(scope, %key, "resource released"),
            Err(cause) => {
                tracing::warn!(scope, %key, %cause, "resource release failed");
                failures.push(Error::release(key, cause));
            }
        }
    }
    failures
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().get_mut();
        if entries.closed {
            return;
        }
        entries.closed = true;
        let resources = entries.drain_newest_first();
        if !resources.is_empty() {
            tracing::debug!(scope = %self.name, "releasing resources of a scope dropped without close");
            let _ = release_all(&self.name, resources);
        }
    }
}

/// A registry of [`Resource`]s that live as long as one scope.
///
/// Stores form a tree: a store shared by a group of tests is the parent of
/// one store per test invocation. Each key maps to at most one resource per
/// store. Closing a store closes its open children, then releases its own
/// resources newest first, then detaches it from its parent.
///
/// Creation is serialized: concurrent first requests for a key run the
/// factory once and all callers get the same value.
///
/// Stores are cheap to clone; clones refer to the same scope. A store dropped
/// without being closed releases its resources and logs failures.
///
/// # Example
///
/// ```rust
/// use testkit_context::scope::{Resource, ScopeStore};
///
/// let shared = ScopeStore::root("group");
/// let test = shared.child("test-1").unwrap();
///
/// let port = shared.get_or_create("port", || Ok(Resource::new(8080_u16))).unwrap();
/// assert_eq!(test.find::<u16>("port").unwrap(), Some(port));
/// assert_eq!(test.get::<u16>("port").unwrap(), None);
///
/// test.close().unwrap();
/// shared.close().unwrap();
/// ```
#[derive(Clone)]
pub struct ScopeStore {
    inner: Arc<StoreInner>,
}

impl ScopeStore {
    /// Creates a store with no parent.
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self::with_parent(name.into(), None)
    }

    fn with_parent(name: String, parent: Option<ScopeStore>) -> Self {
        let store = Self {
            inner: Arc::new(StoreInner {
                id: ScopeId::new(),
                name,
                parent: Mutex::new(parent),
                children: Mutex::new(Vec::new()),
                entries: ReentrantMutex::new(RefCell::new(Entries::default())),
            }),
        };
        tracing::trace!(scope = %store.inner.name, id = %store.inner.id, "scope opened");
        store
    }

    /// Opens a nested store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeClosed`] if this store is closed.
    pub fn child(&self, name: impl Into<String>) -> Result<ScopeStore> {
        if self.is_closed() {
            return Err(Error::ScopeClosed(self.inner.name.clone()));
        }
        let child = Self::with_parent(name.into(), Some(self.clone()));
        let mut children = self.inner.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        Ok(child)
    }

    /// Returns the scope identifier.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Returns the scope name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the enclosing store, until this one is closed.
    #[must_use]
    pub fn parent(&self) -> Option<ScopeStore> {
        self.inner.parent.lock().clone()
    }

    /// Returns the value stored under `key`, creating it with `factory` if
    /// this store has none.
    ///
    /// Only this store is consulted; use [`find`](Self::find) to reuse
    /// values from enclosing stores.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, [`Error::ScopeClosed`] after
    /// [`close`](Self::close), [`Error::FixtureTypeMismatch`] if `key` holds
    /// another type and [`Error::FixtureCycle`] if the factory requests
    /// `key` itself.
    pub fn get_or_create<T, F>(&self, key: &str, factory: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<Resource<T>>,
    {
        let guard = self.inner.entries.lock();
        {
            let entries = guard.borrow();
            if entries.closed {
                return Err(Error::ScopeClosed(self.inner.name.clone()));
            }
            if let Some(resource) = entries.resources.get(key) {
                return downcast(key, resource.as_ref());
            }
            if entries.creating.contains(key) {
                return Err(Error::FixtureCycle(key.to_string()));
            }
        }

        guard.borrow_mut().creating.insert(key.to_string());
        let created = panic::catch_unwind(AssertUnwindSafe(factory));
        guard.borrow_mut().creating.remove(key);
        let mut resource = match created {
            Ok(created) => created?,
            Err(payload) => panic::resume_unwind(payload),
        };

        let mut entries = guard.borrow_mut();
        let value = resource.get().cloned();
        if entries.closed || value.is_none() {
            drop(entries);
            if let Err(cause) = release_guarded(|| resource.release()) {
                tracing::warn!(scope = %self.inner.name, key, %cause, "resource release failed");
            }
            return Err(Error::ScopeClosed(self.inner.name.clone()));
        }

        entries.order.push(key.to_string());
        entries.resources.insert(key.to_string(), Box::new(resource));
        tracing::debug!(scope = %self.inner.name, key, "resource created");
        value.ok_or_else(|| Error::ScopeClosed(self.inner.name.clone()))
    }

    /// Returns the value stored under `key` in this store only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FixtureTypeMismatch`] if `key` holds another type.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let guard = self.inner.entries.lock();
        let entries = guard.borrow();
        entries
            .resources
            .get(key)
            .map(|resource| downcast(key, resource.as_ref()))
            .transpose()
    }

    /// Returns the value stored under `key` in this store or the nearest
    /// enclosing store that has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FixtureTypeMismatch`] if the nearest entry for `key`
    /// holds another type.
    pub fn find<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut current = Some(self.clone());
        while let Some(store) = current {
            if let Some(value) = store.get(key)? {
                return Ok(Some(value));
            }
            current = store.parent();
        }
        Ok(None)
    }

    /// Returns true if this store holds a resource under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().borrow().resources.contains_key(key)
    }

    /// Returns the number of live resources in this store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().borrow().resources.len()
    }

    /// Returns true if this store holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once [`close`](Self::close) ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.entries.lock().borrow().closed
    }

    /// Closes the scope.
    ///
    /// Open children are closed first, then this store's resources are
    /// released newest first and the store detaches from its parent.
    /// Closing twice does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Teardown`] listing every release that failed. All
    /// resources are released regardless.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let children: Vec<ScopeStore> = self
            .inner
            .children
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .map(|inner| ScopeStore { inner })
            .collect();
        let mut failures = Vec::new();
        for child in children.iter().rev() {
            if let Err(error) = child.close() {
                failures.push(error);
            }
        }

        {
            let guard = self.inner.entries.lock();
            let resources = {
                let mut entries = guard.borrow_mut();
                if entries.closed {
                    return Ok(());
                }
                entries.closed = true;
                entries.drain_newest_first()
            };
            tracing::debug!(
                scope = %self.inner.name,
                resources = resources.len(),
                "closing scope"
            );
            failures.extend(release_all(&self.inner.name, resources));
        }

        if let Some(parent) = self.inner.parent.lock().take() {
            parent
                .inner
                .children
                .lock()
                .retain(|weak| weak.upgrade().is_some_and(|c| !Arc::ptr_eq(&c, &self.inner)));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown {
                scope: self.inner.name.clone(),
                failures,
            })
        }
    }
}

fn downcast<T>(key: &str, resource: &dyn StoredResource) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    resource
        .value()
        .and_then(|value| value.downcast_ref::<T>())
        .cloned()
        .ok_or_else(|| Error::FixtureTypeMismatch {
            key: key.to_string(),
        })
}

impl fmt::Debug for ScopeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.entries.lock();
        let entries = guard.borrow();
        f.debug_struct("ScopeStore")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("keys", &entries.order)
            .field("closed", &entries.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn recording(log: &Arc<Mutex<Vec<String>>>, key: &str) -> Result<Resource<String>> {
        let log = Arc::clone(log);
        let value = key.to_string();
        Ok(Resource::with_release(value, move |value| {
            log.lock().push(value);
            Ok::<_, std::io::Error>(())
        }))
    }

    #[test]
    fn test_same_key_returns_same_value() {
        let store = ScopeStore::root("test");
        let created = AtomicUsize::new(0);
        let factory = || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Resource::new(Arc::new(5_u32)))
        };

        let first = store.get_or_create("five", factory).unwrap();
        let second = store.get_or_create("five", factory).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_close_releases_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = ScopeStore::root("test");
        for key in ["a", "b", "c"] {
            store.get_or_create(key, || recording(&log, key)).unwrap();
        }

        store.close().unwrap();

        assert_eq!(*log.lock(), vec!["c", "b", "a"]);
        assert!(store.is_closed());
        assert!(store.is_empty());
    }

    #[test]
    fn test_close_twice_releases_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = ScopeStore::root("test");
        store.get_or_create("a", || recording(&log, "a")).unwrap();

        store.close().unwrap();
        store.close().unwrap();

        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_closed_store_rejects_creation() {
        let store = ScopeStore::root("done");
        store.close().unwrap();
        let result = store.get_or_create("x", || Ok(Resource::new(1_u8)));
        assert!(matches!(result, Err(Error::ScopeClosed(name)) if name == "done"));
        assert!(matches!(store.child("late"), Err(Error::ScopeClosed(_))));
    }

    #[test]
    fn test_release_failures_are_collected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = ScopeStore::root("test");
        store.get_or_create("ok", || recording(&log, "ok")).unwrap();
        store
            .get_or_create("bad", || {
                Ok(Resource::with_release(1_u8, |_| Err("socket busy")))
            })
            .unwrap();

        let error = store.close().unwrap_err();
        match error {
            Error::Teardown { scope, failures } => {
                assert_eq!(scope, "test");
                assert_eq!(failures.len(), 1);
                assert!(matches!(&failures[0], Error::Release { key, .. } if key == "bad"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock(), vec!["ok"]);
    }

    #[test]
    fn test_factory_error_stores_nothing() {
        let store = ScopeStore::root("test");
        let result: Result<u8> = store.get_or_create("x", || Err(Error::failed("no")));
        assert!(result.is_err());
        assert!(!store.contains("x"));

        let value = store.get_or_create("x", || Ok(Resource::new(2_u8))).unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn test_type_mismatch() {
        let store = ScopeStore::root("test");
        store.get_or_create("x", || Ok(Resource::new(1_u8))).unwrap();
        let result = store.get_or_create("x", || Ok(Resource::new(String::new())));
        assert!(matches!(result, Err(Error::FixtureTypeMismatch { .. })));
        assert!(store.get::<String>("x").is_err());
    }

    #[test]
    fn test_factory_can_create_other_entries() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = ScopeStore::root("test");
        let nested = store.clone();
        let inner_log = Arc::clone(&log);

        let outer = store
            .get_or_create("client", || {
                let server = nested.get_or_create("server", || recording(&inner_log, "server"))?;
                recording(&inner_log, &format!("client->{server}"))
            })
            .unwrap();
        assert_eq!(outer, "client->server");

        store.close().unwrap();
        assert_eq!(*log.lock(), vec!["client->server", "server"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let store = ScopeStore::root("test");
        let nested = store.clone();
        let result = store.get_or_create("loop", || {
            let inner: u8 = nested.get_or_create("loop", || Ok(Resource::new(1_u8)))?;
            Ok(Resource::new(inner))
        });
        assert!(matches!(result, Err(Error::FixtureCycle(key)) if key == "loop"));
        assert!(!store.contains("loop"));
    }

    #[test]
    fn test_panicking_factory_does_not_poison_key() {
        let store = ScopeStore::root("test");
        let panicked = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<u8> = store.get_or_create("k", || panic!("factory exploded"));
        }));
        assert!(panicked.is_err());

        let value = store.get_or_create("k", || Ok(Resource::new(1_u8))).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_panicking_release_does_not_skip_older_entries() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = ScopeStore::root("test");
        store.get_or_create("a", || recording(&log, "a")).unwrap();
        store
            .get_or_create("b", || {
                Ok(Resource::with_release(2_u8, |_| -> std::result::Result<(), Error> {
                    panic!("cleanup assertion")
                }))
            })
            .unwrap();

        let error = store.close().unwrap_err();
        match error {
            Error::Teardown { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(&failures[0], Error::Release { key, .. } if key == "b"));
                assert!(failures[0].to_string().contains("cleanup assertion"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock(), vec!["a"]);
        assert!(store.is_closed());
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        let store = ScopeStore::root("shared");
        let created = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let created = Arc::clone(&created);
                let released = Arc::clone(&released);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store
                        .get_or_create("pool", || {
                            thread::sleep(std::time::Duration::from_millis(10));
                            let id = created.fetch_add(1, Ordering::SeqCst);
                            Ok(Resource::with_release(id, move |_| {
                                released.fetch_add(1, Ordering::SeqCst);
                                Ok::<_, std::io::Error>(())
                            }))
                        })
                        .unwrap()
                })
            })
            .collect();

        let ids: Vec<usize> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == 0));
        assert_eq!(created.load(Ordering::SeqCst), 1);

        store.close().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_find_walks_outward_get_does_not() {
        let shared = ScopeStore::root("group");
        let first = shared.child("test-1").unwrap();
        let second = shared.child("test-2").unwrap();

        shared.get_or_create("vertx", || Ok(Resource::new(1_u32))).unwrap();
        first.get_or_create("local", || Ok(Resource::new(2_u32))).unwrap();

        assert_eq!(first.find::<u32>("vertx").unwrap(), Some(1));
        assert_eq!(first.get::<u32>("vertx").unwrap(), None);
        assert_eq!(second.find::<u32>("local").unwrap(), None);
        assert_eq!(shared.find::<u32>("local").unwrap(), None);
    }

    #[test]
    fn test_closing_parent_closes_children_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = ScopeStore::root("group");
        let test = shared.child("test").unwrap();
        shared.get_or_create("outer", || recording(&log, "outer")).unwrap();
        test.get_or_create("inner", || recording(&log, "inner")).unwrap();

        shared.close().unwrap();

        assert!(test.is_closed());
        assert_eq!(*log.lock(), vec!["inner", "outer"]);
    }

    #[test]
    fn test_close_detaches_from_parent() {
        let shared = ScopeStore::root("group");
        let test = shared.child("test").unwrap();
        assert_eq!(test.parent().map(|p| p.id()), Some(shared.id()));

        test.close().unwrap();
        assert!(test.parent().is_none());
        assert!(shared.inner.children.lock().is_empty());
    }

    #[test]
    fn test_drop_without_close_releases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let store = ScopeStore::root("dropped");
            store.get_or_create("a", || recording(&log, "a")).unwrap();
            store.get_or_create("b", || recording(&log, "b")).unwrap();
        }
        assert_eq!(*log.lock(), vec!["b", "a"]);
    }

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ScopeStore::root("a");
        let b = ScopeStore::root("b");
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("Scope("));
    }
}
