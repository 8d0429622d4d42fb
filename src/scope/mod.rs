//! Scoped resources released exactly once.
//!
//! - [`Resource`] - A value plus the action that releases it
//! - [`ScopeStore`] - A nested registry of resources, one per lifecycle scope
//!
//! A typical tree has one store shared by a group of tests and one child
//! store per test invocation. Values created in the shared store are reused
//! by every invocation; values created in an invocation store are fresh for
//! each invocation and released when it ends.
//!
//! ```rust
//! use testkit_context::scope::{Resource, ScopeStore};
//!
//! let group = ScopeStore::root("group");
//! for run in 0..3_u32 {
//!     let invocation = group.child(format!("run-{run}")).unwrap();
//!     let shared = group.get_or_create("shared", || Ok(Resource::new(7_u32))).unwrap();
//!     let local = invocation.get_or_create("local", || Ok(Resource::new(run))).unwrap();
//!     assert_eq!(shared, 7);
//!     assert_eq!(local, run);
//!     invocation.close().unwrap();
//! }
//! group.close().unwrap();
//! ```

mod resource;
mod store;

pub use resource::Resource;
pub use store::{ScopeId, ScopeStore};
