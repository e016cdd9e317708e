//! # Plinth Core Plugin System
//!
//! Infrastructure for extending the platform through in-process plugins:
//! metadata validation, semantic-version handling, dependency resolution,
//! permission management, and the service registry plugins publish into.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`context`]**: The execution context handed to plugin lifecycle hooks,
//!   giving them access to the shared service registry and their config.
//! - **[`dependency`]**: Topological ordering of plugin activation, cycle and
//!   missing-dependency detection, and version-conflict scanning.
//! - **[`error`]**: [`PluginSystemError`](error::PluginSystemError) and the
//!   subsystem errors that fold into it.
//! - **[`loader`]**: Plugin metadata validation, the service registry with
//!   singleton/transient/scoped lifecycles, and health-probe bookkeeping.
//! - **[`permissions`]**: Declared permissions, runtime grants with lazy
//!   expiry, and access checking.
//! - **[`traits`]**: The [`Plugin`] trait every plugin implements, plus
//!   [`HealthReport`](traits::HealthReport).
//! - **[`version`]**: Semver parsing, comparison, range satisfaction, and
//!   compatibility classification.
pub mod context;
pub mod dependency;
pub mod error;
pub mod loader;
pub mod permissions;
pub mod traits;
pub mod version;

pub use context::PluginContext;
pub use dependency::{DependencyResolver, PluginDependency, VersionConflict, VersionedNode};
pub use error::PluginSystemError;
pub use loader::{PluginLoader, ServiceInstance, ServiceLifecycle, ServiceResolver};
pub use permissions::{
    AccessDecision, Permission, PermissionAction, PermissionScope, PluginPermissionManager,
    ResourceType, ScopeContext,
};
pub use traits::{HealthReport, Plugin};
pub use version::{CompatibilityLevel, VersionRange};
