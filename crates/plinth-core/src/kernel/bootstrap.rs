use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::dependency::{DependencyResolver, PluginDependency, VersionedNode};
use crate::plugin_system::error::{PluginSystemError, StartupPhase};
use crate::plugin_system::loader::{BoxFuture, PluginLoader, ServiceInstance, ServiceResolver};
use crate::plugin_system::traits::{HealthReport, Plugin};

/// Lifecycle state of a [`Kernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Created,
    Bootstrapping,
    Running,
    ShuttingDown,
    Stopped,
    /// A bootstrap failed and the kernel could not restore the
    /// no-plugins-running invariant (rollback disabled).
    Failed,
}

/// Kernel tuning knobs.
#[derive(Clone)]
pub struct KernelConfig {
    /// Per-plugin startup timeout used when a plugin does not declare its
    /// own.
    pub default_startup_timeout: Duration,
    /// Total budget for the shutdown sequence.
    pub shutdown_timeout: Duration,
    /// Whether a startup failure tears down already-started plugins before
    /// the error is surfaced.
    pub rollback_on_failure: bool,
    /// Raw per-plugin config values, validated at registration time when
    /// the plugin supplies a validator.
    pub plugin_configs: HashMap<String, serde_json::Value>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_startup_timeout: Duration::from_millis(
                constants::DEFAULT_STARTUP_TIMEOUT_MS,
            ),
            shutdown_timeout: Duration::from_millis(constants::DEFAULT_SHUTDOWN_TIMEOUT_MS),
            rollback_on_failure: true,
            plugin_configs: HashMap::new(),
        }
    }
}

/// Custom async handler run at the tail of the shutdown sequence.
pub type ShutdownHandler = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// The plugin microkernel: owns the plugin registry, the service registry
/// (through its [`PluginLoader`]), startup metrics, and shutdown handlers.
///
/// Each kernel instance is self-contained; multiple independent kernels can
/// coexist in one process.
pub struct Kernel {
    config: KernelConfig,
    loader: PluginLoader,
    plugins: HashMap<String, Arc<dyn Plugin>>,
    registration_order: Vec<String>,
    /// Names of started plugins, in start order. Teardown always walks this
    /// in reverse.
    started: Vec<String>,
    metrics: HashMap<String, Duration>,
    shutdown_handlers: Vec<ShutdownHandler>,
    state: KernelState,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.state)
            .field("plugins", &self.registration_order)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        log::info!(
            "Creating {} v{} kernel",
            constants::KERNEL_NAME,
            constants::KERNEL_VERSION
        );
        Self {
            config,
            loader: PluginLoader::new(),
            plugins: HashMap::new(),
            registration_order: Vec::new(),
            started: Vec::new(),
            metrics: HashMap::new(),
            shutdown_handlers: Vec::new(),
            state: KernelState::Created,
        }
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    /// Registers a plugin. Chainable. Fails on invalid metadata or a name
    /// collision, before any side effects on the kernel.
    pub fn use_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<&mut Self> {
        if self.state != KernelState::Created {
            return Err(Error::Lifecycle {
                phase: KernelLifecyclePhase::Bootstrap,
                message: format!(
                    "plugins can only be registered before bootstrap (state: {:?})",
                    self.state
                ),
            });
        }
        let config = self.config.plugin_configs.get(plugin.name());
        self.loader.validate(plugin.as_ref(), config)?;
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginSystemError::DuplicatePlugin(name).into());
        }
        log::debug!("Registered plugin '{}' v{}", name, plugin.version());
        let plugin: Arc<dyn Plugin> = Arc::from(plugin);
        self.loader.register_health_probe(plugin.clone());
        self.plugins.insert(name.clone(), plugin);
        self.registration_order.push(name);
        Ok(self)
    }

    /// Starts all registered plugins in dependency order.
    ///
    /// Each plugin's `init` and `start` run under its startup timeout (its
    /// own or the kernel default). On any failure, already-started plugins
    /// are destroyed in reverse start order (when `rollback_on_failure` is
    /// set) and the original failure is re-raised. A timed-out callback is
    /// abandoned, not cancelled; its side effects may still complete in the
    /// background.
    pub async fn bootstrap(&mut self) -> Result<()> {
        if self.state != KernelState::Created {
            return Err(Error::Lifecycle {
                phase: KernelLifecyclePhase::Bootstrap,
                message: format!("bootstrap is only valid from Created (state: {:?})", self.state),
            });
        }
        self.state = KernelState::Bootstrapping;
        log::info!("Bootstrapping kernel with {} plugin(s)", self.plugins.len());

        let order = match self.plan_startup() {
            Ok(order) => order,
            Err(e) => {
                // Nothing has started yet; the caller can fix and retry.
                self.state = KernelState::Created;
                return Err(e);
            }
        };

        let ordered: Vec<(String, Arc<dyn Plugin>)> = order
            .iter()
            .filter_map(|n| self.plugins.get(n).map(|p| (n.clone(), p.clone())))
            .collect();

        for (name, plugin) in ordered {
            let timeout = plugin
                .startup_timeout()
                .unwrap_or(self.config.default_startup_timeout);
            let ctx = PluginContext::new(
                name.clone(),
                self.loader.services(),
                self.config.plugin_configs.get(&name).cloned(),
            );

            let begun = Instant::now();
            let outcome = Self::run_startup(&plugin, &ctx, timeout).await;
            let elapsed = begun.elapsed();

            match outcome {
                Ok(()) => {
                    self.metrics.insert(name.clone(), elapsed);
                    self.started.push(name.clone());
                    log::info!("Plugin '{}' started in {:?}", name, elapsed);
                }
                Err(e) => {
                    log::error!(
                        "Plugin '{}' failed to start after {:?}: {}",
                        name,
                        elapsed,
                        e
                    );
                    if self.config.rollback_on_failure {
                        log::warn!(
                            "Rolling back {} already-started plugin(s): {:?}",
                            self.started.len(),
                            self.started
                        );
                        self.rollback().await;
                        self.state = KernelState::Created;
                    } else {
                        self.state = KernelState::Failed;
                    }
                    return Err(e.into());
                }
            }
        }

        self.state = KernelState::Running;
        log::info!("Kernel running; started plugins: {:?}", self.started);
        Ok(())
    }

    /// Computes the activation order, failing fast on version conflicts,
    /// cycles, or missing required dependencies.
    fn plan_startup(&self) -> Result<Vec<String>> {
        let mut nodes: BTreeMap<String, Vec<PluginDependency>> = BTreeMap::new();
        let mut versioned: BTreeMap<String, VersionedNode> = BTreeMap::new();
        for (name, plugin) in &self.plugins {
            let deps = plugin.dependencies();
            let ranged = deps
                .iter()
                .filter_map(|d| {
                    d.version_range
                        .clone()
                        .map(|r| (d.plugin_name.clone(), r))
                })
                .collect();
            versioned.insert(
                name.clone(),
                VersionedNode {
                    version: plugin.version().to_string(),
                    dependencies: ranged,
                },
            );
            nodes.insert(name.clone(), deps);
        }

        let conflicts = DependencyResolver::detect_conflicts(&versioned);
        if !conflicts.is_empty() {
            return Err(PluginSystemError::VersionConflicts(conflicts).into());
        }

        let order = DependencyResolver::resolve(&nodes).map_err(PluginSystemError::from)?;
        log::debug!("Plugin activation order: {:?}", order);
        Ok(order)
    }

    /// Runs a plugin's `init` then `start`, each raced against `timeout`.
    async fn run_startup(
        plugin: &Arc<dyn Plugin>,
        ctx: &PluginContext,
        timeout: Duration,
    ) -> std::result::Result<(), PluginSystemError> {
        for phase in [StartupPhase::Init, StartupPhase::Start] {
            let fut = match phase {
                StartupPhase::Init => plugin.init(ctx),
                StartupPhase::Start => plugin.start(ctx),
            };
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(PluginSystemError::Startup {
                        plugin_id: plugin.name().to_string(),
                        phase,
                        source: Box::new(e),
                    });
                }
                Err(_) => {
                    return Err(PluginSystemError::StartupTimeout {
                        plugin_id: plugin.name().to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
        Ok(())
    }

    /// Destroys already-started plugins in reverse start order. Individual
    /// destroy failures are logged and swallowed so the rollback always
    /// completes and never masks the original bootstrap failure.
    async fn rollback(&mut self) {
        let names: Vec<String> = self.started.drain(..).rev().collect();
        for name in names {
            let Some(plugin) = self.plugins.get(&name).cloned() else {
                continue;
            };
            log::info!("Rolling back plugin '{}'", name);
            if let Err(e) = plugin.destroy().await {
                log::error!("Error destroying plugin '{}' during rollback: {}", name, e);
            }
        }
    }

    /// Per-plugin startup durations for successfully started plugins.
    /// Entries survive a failed bootstrap, identifying which plugins had
    /// already started before the failure.
    pub fn plugin_metrics(&self) -> &HashMap<String, Duration> {
        &self.metrics
    }

    /// Names of currently started plugins, in start order.
    pub fn started_plugins(&self) -> &[String] {
        &self.started
    }

    /// Runs one plugin's health probe.
    pub async fn check_plugin_health(&self, name: &str) -> Result<HealthReport> {
        Ok(self.loader.check_health(name).await?)
    }

    /// Runs every registered plugin's health probe, in registration order.
    pub async fn check_all_plugins_health(&self) -> HashMap<String, HealthReport> {
        let mut reports = HashMap::new();
        for name in &self.registration_order {
            match self.loader.check_health(name).await {
                Ok(report) => {
                    reports.insert(name.clone(), report);
                }
                Err(e) => {
                    log::error!("Health check for plugin '{}' failed: {}", name, e);
                    reports.insert(name.clone(), HealthReport::unhealthy(e.to_string()));
                }
            }
        }
        reports
    }

    /// Synchronous lookup of an already-materialized singleton service.
    pub fn get_service(&self, name: &str) -> Result<ServiceInstance> {
        Ok(self.loader.services().get_sync(name)?)
    }

    /// Resolves a service through its factory chain.
    pub async fn get_service_async(
        &self,
        name: &str,
        scope_id: Option<&str>,
    ) -> Result<ServiceInstance> {
        Ok(self.loader.services().get_async(name, scope_id).await?)
    }

    /// Drops all scoped service instances for `scope_id`.
    pub async fn discard_scope(&self, scope_id: &str) {
        self.loader.services().discard_scope(scope_id).await;
    }

    /// Handle onto the shared service registry, e.g. for attaching to a
    /// request context in an HTTP adapter.
    pub fn services(&self) -> ServiceResolver {
        self.loader.services()
    }

    /// Registers a custom shutdown handler. Handlers run after plugin
    /// teardown, in registration order.
    pub fn on_shutdown<F, Fut>(&mut self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.shutdown_handlers
            .push(Box::new(move || Box::pin(handler())));
    }

    /// Stops the kernel: destroys started plugins in reverse start order,
    /// then runs custom shutdown handlers in registration order, all under
    /// the configured shutdown timeout.
    ///
    /// Idempotent: a second call is a no-op and destroys nothing twice.
    /// Every individual failure is logged and swallowed; the kernel always
    /// reaches `Stopped`.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.state {
            KernelState::Stopped => {
                log::debug!("Kernel already stopped; ignoring repeated shutdown request");
                return Ok(());
            }
            KernelState::ShuttingDown => return Ok(()),
            _ => {}
        }
        self.state = KernelState::ShuttingDown;
        log::info!("Shutting down kernel");

        let teardown: Vec<(String, Arc<dyn Plugin>)> = {
            let names: Vec<String> = self.started.drain(..).rev().collect();
            names
                .into_iter()
                .filter_map(|n| self.plugins.get(&n).cloned().map(|p| (n, p)))
                .collect()
        };
        let handlers: Vec<ShutdownHandler> = self.shutdown_handlers.drain(..).collect();

        let mut step_labels: Vec<String> = teardown
            .iter()
            .map(|(n, _)| format!("plugin '{}'", n))
            .collect();
        step_labels.extend((0..handlers.len()).map(|i| format!("shutdown handler #{}", i)));

        // Steps run strictly in sequence, so the completed count identifies
        // exactly which steps were abandoned on a timeout.
        let completed = Arc::new(AtomicUsize::new(0));
        let progress = completed.clone();
        let sequence = async move {
            for (name, plugin) in teardown {
                if let Err(e) = plugin.destroy().await {
                    log::error!("Error destroying plugin '{}' during shutdown: {}", name, e);
                }
                progress.fetch_add(1, Ordering::SeqCst);
            }
            for (idx, handler) in handlers.into_iter().enumerate() {
                if let Err(e) = handler().await {
                    log::error!("Shutdown handler #{} failed: {}", idx, e);
                }
                progress.fetch_add(1, Ordering::SeqCst);
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, sequence)
            .await
            .is_err()
        {
            let done = completed.load(Ordering::SeqCst);
            log::error!(
                "Shutdown timed out after {:?}; abandoned steps: {:?}",
                self.config.shutdown_timeout,
                &step_labels[done..]
            );
        }

        self.state = KernelState::Stopped;
        log::info!("Kernel stopped");
        Ok(())
    }
}
