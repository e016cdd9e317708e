//! Plugin metadata validation, the service registry with its three
//! lifecycles, and per-plugin health-check bookkeeping.
//!
//! Service resolution is asynchronous because factories may themselves
//! depend on other asynchronously resolved services. Declared service
//! dependencies are resolved recursively (boxed-future recursion) before a
//! factory runs, with a DFS stack detecting service cycles the same way the
//! dependency resolver detects plugin cycles.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::traits::{HealthReport, Plugin};
use crate::plugin_system::version;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A resolved service instance. Callers downcast to the concrete type.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Async service factory. Receives a registry handle (so it can resolve the
/// services it depends on) and the scope id of the current resolution, if
/// any.
pub type ServiceFactory = Arc<
    dyn Fn(ServiceResolver, Option<String>) -> BoxFuture<'static, Result<ServiceInstance, PluginSystemError>>
        + Send
        + Sync,
>;

/// How instances of a service are created and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifecycle {
    /// Created at most once, lazily, and cached for the kernel's lifetime.
    Singleton,
    /// Created fresh on every request.
    Transient,
    /// Cached per caller-supplied scope id, evicted when the scope is
    /// discarded.
    Scoped,
}

struct ServiceRegistration {
    factory: ServiceFactory,
    lifecycle: ServiceLifecycle,
    dependencies: Vec<String>,
}

#[derive(Default)]
struct ServiceState {
    factories: HashMap<String, ServiceRegistration>,
    singletons: HashMap<String, ServiceInstance>,
    scoped: HashMap<(String, String), ServiceInstance>,
}

/// Shared handle onto the service registry. Cloning is cheap; all clones see
/// the same state.
#[derive(Clone, Default)]
pub struct ServiceResolver {
    state: Arc<Mutex<ServiceState>>,
}

impl ServiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-built singleton instance under `name`.
    pub async fn register_instance(&self, name: &str, instance: ServiceInstance) {
        let mut state = self.state.lock().await;
        if state.singletons.insert(name.to_string(), instance).is_some() {
            log::warn!("Service instance '{}' replaced an existing registration", name);
        }
    }

    /// Registers a service factory with the given lifecycle and declared
    /// dependencies. Re-registering a name replaces the previous factory.
    pub async fn register_factory(
        &self,
        name: &str,
        factory: ServiceFactory,
        lifecycle: ServiceLifecycle,
        dependencies: Vec<String>,
    ) {
        let mut state = self.state.lock().await;
        let replaced = state
            .factories
            .insert(
                name.to_string(),
                ServiceRegistration {
                    factory,
                    lifecycle,
                    dependencies,
                },
            )
            .is_some();
        if replaced {
            log::warn!("Service factory '{}' replaced an existing registration", name);
        }
    }

    /// Synchronous lookup. Only already-materialized singletons can be
    /// served here; anything else needs [`get_async`](Self::get_async).
    pub fn get_sync(&self, name: &str) -> Result<ServiceInstance, PluginSystemError> {
        let state = self.state.try_lock().map_err(|_| PluginSystemError::OperationError {
            plugin_id: None,
            message: format!("service registry busy while resolving '{}'", name),
        })?;
        state
            .singletons
            .get(name)
            .cloned()
            .ok_or_else(|| PluginSystemError::ServiceNotFound(name.to_string()))
    }

    /// Resolves a service, creating it (and its declared dependency chain)
    /// as its lifecycle demands.
    pub fn get_async(
        &self,
        name: &str,
        scope_id: Option<&str>,
    ) -> BoxFuture<'static, Result<ServiceInstance, PluginSystemError>> {
        let this = self.clone();
        let name = name.to_string();
        let scope = scope_id.map(|s| s.to_string());
        Box::pin(async move {
            let mut resolving = Vec::new();
            this.resolve_inner(&name, scope.as_deref(), &mut resolving).await
        })
    }

    fn resolve_inner<'a>(
        &'a self,
        name: &'a str,
        scope_id: Option<&'a str>,
        resolving: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<ServiceInstance, PluginSystemError>> {
        Box::pin(async move {
            if resolving.iter().any(|n| n == name) {
                let mut cycle = resolving.clone();
                cycle.push(name.to_string());
                return Err(DependencyError::CircularDependency(cycle).into());
            }

            // Cache lookups and registration snapshot under one lock; the
            // factory itself runs with the lock released so it can resolve
            // its own dependencies.
            let (factory, lifecycle, dependencies) = {
                let state = self.state.lock().await;
                if let Some(instance) = state.singletons.get(name) {
                    return Ok(instance.clone());
                }
                let reg = state
                    .factories
                    .get(name)
                    .ok_or_else(|| PluginSystemError::ServiceNotFound(name.to_string()))?;
                if reg.lifecycle == ServiceLifecycle::Scoped {
                    let sid = scope_id.ok_or_else(|| PluginSystemError::ScopeRequired {
                        service: name.to_string(),
                    })?;
                    if let Some(instance) =
                        state.scoped.get(&(name.to_string(), sid.to_string()))
                    {
                        return Ok(instance.clone());
                    }
                }
                (reg.factory.clone(), reg.lifecycle, reg.dependencies.clone())
            };

            resolving.push(name.to_string());
            for dep in &dependencies {
                self.resolve_inner(dep, scope_id, resolving).await?;
            }
            resolving.pop();

            let instance = factory(self.clone(), scope_id.map(|s| s.to_string())).await?;

            let mut state = self.state.lock().await;
            match lifecycle {
                ServiceLifecycle::Singleton => {
                    // First creation wins if two resolutions raced.
                    let cached = state
                        .singletons
                        .entry(name.to_string())
                        .or_insert(instance);
                    Ok(cached.clone())
                }
                ServiceLifecycle::Scoped => {
                    let sid = scope_id.ok_or_else(|| PluginSystemError::ScopeRequired {
                        service: name.to_string(),
                    })?;
                    let cached = state
                        .scoped
                        .entry((name.to_string(), sid.to_string()))
                        .or_insert(instance);
                    Ok(cached.clone())
                }
                ServiceLifecycle::Transient => Ok(instance),
            }
        })
    }

    /// Drops every scoped instance belonging to `scope_id`. Scopes carry no
    /// automatic expiry; callers discard them explicitly.
    pub async fn discard_scope(&self, scope_id: &str) {
        let mut state = self.state.lock().await;
        state.scoped.retain(|(_, sid), _| sid != scope_id);
    }

    /// Whether a factory or instance is registered under `name`.
    pub async fn has_service(&self, name: &str) -> bool {
        let state = self.state.lock().await;
        state.singletons.contains_key(name) || state.factories.contains_key(name)
    }
}

/// Validates plugin metadata, owns the service registry, and tracks health
/// probes for registered plugins.
pub struct PluginLoader {
    services: ServiceResolver,
    health_probes: std::sync::Mutex<HashMap<String, Arc<dyn Plugin>>>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader {
    pub fn new() -> Self {
        Self {
            services: ServiceResolver::new(),
            health_probes: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Handle onto the service registry shared with plugin contexts.
    pub fn services(&self) -> ServiceResolver {
        self.services.clone()
    }

    /// Validates plugin metadata: non-empty well-formed name, parseable
    /// semver version, no self-dependency, and (when both a validator and a
    /// config are present) a passing config validation.
    pub fn validate(
        &self,
        plugin: &dyn Plugin,
        config: Option<&serde_json::Value>,
    ) -> Result<(), PluginSystemError> {
        let name = plugin.name();
        if name.trim().is_empty() {
            return Err(PluginSystemError::InvalidPlugin {
                plugin_id: "<unnamed>".to_string(),
                message: "plugin name must not be empty".to_string(),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(PluginSystemError::InvalidPlugin {
                plugin_id: name.to_string(),
                message: format!(
                    "plugin name '{}' contains characters outside [A-Za-z0-9._-]",
                    name
                ),
            });
        }
        version::parse_version(plugin.version()).map_err(|e| PluginSystemError::InvalidPlugin {
            plugin_id: name.to_string(),
            message: format!("invalid version '{}': {}", plugin.version(), e),
        })?;
        for dep in plugin.dependencies() {
            if dep.plugin_name == name {
                return Err(PluginSystemError::InvalidPlugin {
                    plugin_id: name.to_string(),
                    message: "plugin cannot depend on itself".to_string(),
                });
            }
        }
        if let (Some(validator), Some(cfg)) = (plugin.config_validator(), config) {
            validator(cfg).map_err(|messages| PluginSystemError::InvalidPlugin {
                plugin_id: name.to_string(),
                message: format!("config validation failed: {}", messages.join("; ")),
            })?;
        }
        Ok(())
    }

    /// Records the plugin as a health-probe target.
    pub fn register_health_probe(&self, plugin: Arc<dyn Plugin>) {
        if let Ok(mut probes) = self.health_probes.lock() {
            probes.insert(plugin.name().to_string(), plugin);
        }
    }

    /// Removes a plugin's health probe (on unregistration).
    pub fn remove_health_probe(&self, name: &str) {
        if let Ok(mut probes) = self.health_probes.lock() {
            probes.remove(name);
        }
    }

    /// Runs a plugin's health probe. A plugin that does not override
    /// `health_check` reports healthy-by-default.
    pub async fn check_health(&self, name: &str) -> Result<HealthReport, PluginSystemError> {
        let plugin = {
            let probes = self.health_probes.lock().map_err(|_| {
                PluginSystemError::OperationError {
                    plugin_id: Some(name.to_string()),
                    message: "health probe registry poisoned".to_string(),
                }
            })?;
            probes
                .get(name)
                .cloned()
                .ok_or_else(|| PluginSystemError::PluginNotFound(name.to_string()))?
        };
        Ok(plugin
            .health_check()
            .await
            .unwrap_or_else(HealthReport::unconfigured))
    }

    /// Names of all plugins with a registered health probe.
    pub fn probe_names(&self) -> Vec<String> {
        self.health_probes
            .lock()
            .map(|probes| probes.keys().cloned().collect())
            .unwrap_or_default()
    }
}
