//! # Plinth Core Plugin System Errors
//!
//! Defines error types specific to the plugin system.
//!
//! [`PluginSystemError`] is the primary enum, covering plugin validation,
//! registration, dependency resolution, version handling, startup, service
//! resolution, and permission failures. Subsystem errors
//! ([`VersionError`](crate::plugin_system::version::VersionError),
//! [`DependencyError`](crate::plugin_system::dependency::DependencyError),
//! [`PermissionError`](crate::plugin_system::permissions::PermissionError))
//! convert into it via `#[from]`.

use std::fmt;
use crate::plugin_system::dependency::{DependencyError, VersionConflict};
use crate::plugin_system::permissions::PermissionError;
use crate::plugin_system::version::VersionError;

/// The plugin lifecycle phase during which a startup error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPhase {
    Init,
    Start,
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupPhase::Init => write!(f, "init"),
            StartupPhase::Start => write!(f, "start"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Invalid plugin '{plugin_id}': {message}")]
    InvalidPlugin { plugin_id: String, message: String },

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin '{plugin_id}' exceeded its startup timeout of {timeout_ms}ms")]
    StartupTimeout { plugin_id: String, timeout_ms: u64 },

    #[error("Plugin '{plugin_id}' failed during {phase}: {source}")]
    Startup {
        plugin_id: String,
        phase: StartupPhase,
        #[source]
        source: Box<PluginSystemError>,
    },

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Scoped service '{service}' requested without a scope id")]
    ScopeRequired { service: String },

    #[error("Version conflicts detected: {}", format_conflicts(.0))]
    VersionConflicts(Vec<VersionConflict>),

    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(#[from] DependencyError),

    #[error("Version parsing error: {0}")]
    VersionParsing(#[from] VersionError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Operation error in plugin '{plugin_id}': {message}", plugin_id = .plugin_id.as_deref().unwrap_or("<unknown>"))]
    OperationError {
        plugin_id: Option<String>,
        message: String,
    },
}

fn format_conflicts(conflicts: &[VersionConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
