pub mod kernel;
pub mod plugin_system;

// Re-export key public types for easier use by embedders and plugins.
pub use kernel::{Kernel, KernelConfig, KernelState};
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    DependencyResolver, HealthReport, Plugin, PluginContext, PluginDependency,
    PluginPermissionManager, PluginSystemError, ServiceLifecycle, VersionRange,
};
