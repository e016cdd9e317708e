//! Execution context handed to plugin lifecycle hooks.

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{
    ServiceFactory, ServiceInstance, ServiceLifecycle, ServiceResolver,
};

/// Context passed to a plugin's `init` and `start` hooks.
///
/// Exposes the shared service registry plus the plugin's validated config
/// value. The context holds no kernel bookkeeping; a callback abandoned
/// after a startup timeout can keep its context without being able to
/// mutate kernel state.
pub struct PluginContext {
    plugin_name: String,
    services: ServiceResolver,
    config: Option<serde_json::Value>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin_name: String,
        services: ServiceResolver,
        config: Option<serde_json::Value>,
    ) -> Self {
        Self {
            plugin_name,
            services,
            config,
        }
    }

    /// Name of the plugin this context was issued to.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The plugin's raw config value, if one was supplied to the kernel.
    pub fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Registers a pre-built singleton service instance.
    pub async fn register_service(&self, name: &str, instance: ServiceInstance) {
        log::debug!(
            "Plugin '{}' registering service instance '{}'",
            self.plugin_name,
            name
        );
        self.services.register_instance(name, instance).await;
    }

    /// Registers a service factory with the given lifecycle and declared
    /// dependencies.
    pub async fn register_service_factory(
        &self,
        name: &str,
        factory: ServiceFactory,
        lifecycle: ServiceLifecycle,
        dependencies: Vec<String>,
    ) {
        log::debug!(
            "Plugin '{}' registering {:?} service factory '{}'",
            self.plugin_name,
            lifecycle,
            name
        );
        self.services
            .register_factory(name, factory, lifecycle, dependencies)
            .await;
    }

    /// Synchronous lookup of an already-materialized singleton.
    pub fn get_service(&self, name: &str) -> Result<ServiceInstance, PluginSystemError> {
        self.services.get_sync(name)
    }

    /// Resolves a service through its factory chain.
    pub async fn get_service_async(
        &self,
        name: &str,
        scope_id: Option<&str>,
    ) -> Result<ServiceInstance, PluginSystemError> {
        self.services.get_async(name, scope_id).await
    }

    /// Drops all scoped service instances for `scope_id`.
    pub async fn discard_scope(&self, scope_id: &str) {
        self.services.discard_scope(scope_id).await;
    }
}
