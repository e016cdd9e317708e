use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use async_trait::async_trait;
use serde::Serialize;

use crate::plugin_system::context::PluginContext;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::PluginSystemError;

/// Injected config validator: raw config in, validated config or a list of
/// human-readable validation messages out. Any validation library (or
/// hand-written checks) satisfies this contract.
pub type ConfigValidator =
    Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, Vec<String>> + Send + Sync>;

/// Result of a plugin health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub message: Option<String>,
    pub details: BTreeMap<String, serde_json::Value>,
    pub last_check: SystemTime,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: None,
            details: BTreeMap::new(),
            last_check: SystemTime::now(),
        }
    }

    pub fn healthy_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::healthy()
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
            details: BTreeMap::new(),
            last_check: SystemTime::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Report used for plugins that do not override
    /// [`Plugin::health_check`].
    pub fn unconfigured() -> Self {
        Self::healthy_with_message("No health check configured")
    }
}

/// Core trait that all plugins must implement.
///
/// A plugin is a tagged capability record: `name`, `version`, and `init` are
/// required; everything else is an optional capability expressed as a
/// defaulted method. The kernel dispatches on what the plugin overrides, not
/// on inheritance.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The name of the plugin
    fn name(&self) -> &str;

    /// The version of the plugin (semver string)
    fn version(&self) -> &str;

    /// Plugin dependencies
    fn dependencies(&self) -> Vec<PluginDependency> {
        Vec::new()
    }

    /// Per-plugin startup timeout overriding the kernel default.
    fn startup_timeout(&self) -> Option<Duration> {
        None
    }

    /// Optional validator applied to this plugin's raw config at
    /// registration time.
    fn config_validator(&self) -> Option<ConfigValidator> {
        None
    }

    /// Initialize the plugin. Runs before `start`, under the startup
    /// timeout, after all dependencies have completed their own startup.
    async fn init(&self, ctx: &PluginContext) -> Result<(), PluginSystemError>;

    /// Start the plugin. Runs after `init`, under the startup timeout.
    async fn start(&self, _ctx: &PluginContext) -> Result<(), PluginSystemError> {
        Ok(())
    }

    /// Tear the plugin down. Called in reverse start order during both
    /// rollback and shutdown.
    async fn destroy(&self) -> Result<(), PluginSystemError> {
        Ok(())
    }

    /// Optional health probe. `None` means no health check is configured;
    /// the loader substitutes [`HealthReport::unconfigured`].
    async fn health_check(&self) -> Option<HealthReport> {
        None
    }
}
