//! Fixtures: values resolved by type for a test invocation.
//!
//! A [`FixtureRegistry`] maps a requested type to a factory and a
//! [`FixtureScope`]. Resolving a fixture creates it in the matching
//! [`ScopeStore`], so its release follows that scope:
//!
//! - [`FixtureScope::Shared`] fixtures are created once per group and reused
//!   by every invocation (and by nested groups)
//! - [`FixtureScope::Invocation`] fixtures are created fresh for every
//!   invocation and released when it ends
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use testkit_context::fixture::{FixtureRegistry, FixtureScope};
//! use testkit_context::scope::{Resource, ScopeStore};
//!
//! #[derive(Debug)]
//! struct Server;
//!
//! let fixtures = FixtureRegistry::new()
//!     .with_fixture(FixtureScope::Shared, || Ok(Resource::new(Arc::new(Server))));
//!
//! let group = ScopeStore::root("group");
//! let first = group.child("first").unwrap();
//! let second = group.child("second").unwrap();
//!
//! let a: Arc<Server> = fixtures.resolve(&first, &group).unwrap();
//! let b: Arc<Server> = fixtures.resolve(&second, &group).unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::scope::{Resource, ScopeStore};

/// Where a fixture lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FixtureScope {
    /// Created once and shared by every invocation of a group.
    Shared,
    /// Created for, and released after, each invocation.
    Invocation,
}

type Factory<T> = Arc<dyn Fn() -> Result<Resource<T>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    scope: FixtureScope,
    type_name: &'static str,
    /// A `Factory<T>` for the registered type.
    factory: Arc<dyn Any + Send + Sync>,
}

/// A registry of fixture factories keyed by type.
///
/// Cloning is cheap; factories are shared.
#[derive(Clone, Default)]
pub struct FixtureRegistry {
    fixtures: HashMap<TypeId, Registration>,
}

impl FixtureRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `T`, replacing any earlier registration.
    pub fn register<T, F>(&mut self, scope: FixtureScope, factory: F) -> &mut Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<Resource<T>> + Send + Sync + 'static,
    {
        let factory: Factory<T> = Arc::new(factory);
        self.fixtures.insert(
            TypeId::of::<T>(),
            Registration {
                scope,
                type_name: type_name::<T>(),
                factory: Arc::new(factory),
            },
        );
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_fixture<T, F>(mut self, scope: FixtureScope, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<Resource<T>> + Send + Sync + 'static,
    {
        self.register(scope, factory);
        self
    }

    /// Adds every registration of `other`, overriding ours for the same type.
    pub fn extend(&mut self, other: &FixtureRegistry) {
        self.fixtures
            .extend(other.fixtures.iter().map(|(id, reg)| (*id, reg.clone())));
    }

    /// Returns the scope `T` is registered with.
    #[must_use]
    pub fn scope_of<T: 'static>(&self) -> Option<FixtureScope> {
        self.fixtures.get(&TypeId::of::<T>()).map(|reg| reg.scope)
    }

    /// Returns the number of registered fixtures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    /// Returns true if no fixture is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    /// Resolves `T` for an invocation.
    ///
    /// Shared fixtures are looked up in `shared` and its ancestors before
    /// being created in `shared`; invocation fixtures are created in
    /// `invocation`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FixtureMissing`] if `T` is not registered, or the
    /// error of the factory or of the store.
    pub fn resolve<T>(&self, invocation: &ScopeStore, shared: &ScopeStore) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let registration = self
            .fixtures
            .get(&TypeId::of::<T>())
            .ok_or(Error::FixtureMissing(type_name::<T>()))?;
        let factory = registration
            .factory
            .downcast_ref::<Factory<T>>()
            .ok_or_else(|| Error::FixtureTypeMismatch {
                key: registration.type_name.to_string(),
            })?;
        let key = fixture_key(registration.type_name);

        match registration.scope {
            FixtureScope::Shared => {
                if let Some(value) = shared.find::<T>(&key)? {
                    return Ok(value);
                }
                shared.get_or_create(&key, || factory())
            }
            FixtureScope::Invocation => invocation.get_or_create(&key, || factory()),
        }
    }
}

/// Store key of a fixture, kept apart from keys chosen by test code.
fn fixture_key(type_name: &str) -> String {
    format!("fixture::{type_name}")
}

impl fmt::Debug for FixtureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fixtures.values().map(|reg| (reg.type_name, reg.scope)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Port(u16);

    fn counting_registry(scope: FixtureScope) -> (FixtureRegistry, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let registry = FixtureRegistry::new().with_fixture(scope, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Resource::new(Port(8000 + n as u16)))
        });
        (registry, created)
    }

    #[test]
    fn test_shared_fixture_is_reused_across_invocations() {
        let (registry, created) = counting_registry(FixtureScope::Shared);
        let group = ScopeStore::root("group");

        for run in 0..3 {
            let invocation = group.child(format!("run-{run}")).unwrap();
            let port: Port = registry.resolve(&invocation, &group).unwrap();
            assert_eq!(port, Port(8000));
            invocation.close().unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invocation_fixture_is_fresh_per_invocation() {
        let (registry, created) = counting_registry(FixtureScope::Invocation);
        let group = ScopeStore::root("group");

        let mut ports = Vec::new();
        for run in 0..3 {
            let invocation = group.child(format!("run-{run}")).unwrap();
            let first: Port = registry.resolve(&invocation, &group).unwrap();
            let again: Port = registry.resolve(&invocation, &group).unwrap();
            assert_eq!(first, again);
            ports.push(first);
            invocation.close().unwrap();
        }
        assert_eq!(ports, vec![Port(8000), Port(8001), Port(8002)]);
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert!(group.is_empty());
    }

    #[test]
    fn test_nested_group_reuses_outer_shared_fixture() {
        let (registry, created) = counting_registry(FixtureScope::Shared);
        let outer = ScopeStore::root("outer");
        let inner = outer.child("inner").unwrap();

        let a: Port = registry
            .resolve(&outer.child("t1").unwrap(), &outer)
            .unwrap();
        let b: Port = registry
            .resolve(&inner.child("t2").unwrap(), &inner)
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fixture_key_does_not_clash_with_user_keys() {
        let (registry, _) = counting_registry(FixtureScope::Shared);
        let group = ScopeStore::root("group");
        group
            .get_or_create(type_name::<Port>(), || Ok(Resource::new(1_u8)))
            .unwrap();

        let port: Port = registry.resolve(&group, &group).unwrap();
        assert_eq!(port, Port(8000));
        assert_eq!(group.get::<u8>(type_name::<Port>()).unwrap(), Some(1));
    }

    #[test]
    fn test_missing_fixture() {
        let registry = FixtureRegistry::new();
        let group = ScopeStore::root("group");
        let result = registry.resolve::<Port>(&group, &group);
        assert!(matches!(result, Err(Error::FixtureMissing(name)) if name.ends_with("Port")));
    }

    #[test]
    fn test_extend_overrides() {
        let (mut registry, _) = counting_registry(FixtureScope::Shared);
        let (override_registry, _) = counting_registry(FixtureScope::Invocation);
        registry.extend(&override_registry);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.scope_of::<Port>(), Some(FixtureScope::Invocation));
        assert_eq!(registry.scope_of::<String>(), None);
    }
}
