// crates/plinth-core/src/kernel/tests/bootstrap_tests.rs
#![cfg(test)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use async_trait::async_trait;

use crate::kernel::bootstrap::{Kernel, KernelConfig, KernelState};
use crate::kernel::error::Error;
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::dependency::{DependencyError, PluginDependency};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::ServiceInstance;
use crate::plugin_system::traits::{HealthReport, Plugin};
use crate::plugin_system::version::VersionRange;

type EventLog = Arc<StdMutex<Vec<String>>>;

fn event_log() -> EventLog {
    Arc::new(StdMutex::new(Vec::new()))
}

fn events_of(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Scriptable plugin for kernel lifecycle tests. Records its lifecycle
/// transitions into a shared event log.
struct TestPlugin {
    name: String,
    version: String,
    deps: Vec<PluginDependency>,
    timeout: Option<Duration>,
    fail_in_start: bool,
    hang_in_init: bool,
    hang_in_destroy: bool,
    /// `(service name, value)` registered as a singleton during init.
    service: Option<(String, String)>,
    health: Option<HealthReport>,
    destroy_count: Arc<AtomicUsize>,
    events: EventLog,
}

impl TestPlugin {
    fn new(name: &str, events: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            deps: Vec::new(),
            timeout: None,
            fail_in_start: false,
            hang_in_init: false,
            hang_in_destroy: false,
            service: None,
            health: None,
            destroy_count: Arc::new(AtomicUsize::new(0)),
            events: events.clone(),
        }
    }

    fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    fn with_dep(mut self, dep: &str) -> Self {
        self.deps.push(PluginDependency::required_any(dep));
        self
    }

    fn with_ranged_dep(mut self, dep: &str, range: &str) -> Self {
        self.deps.push(PluginDependency::required(
            dep,
            VersionRange::from_str(range).unwrap(),
        ));
        self
    }

    fn failing_start(mut self) -> Self {
        self.fail_in_start = true;
        self
    }

    fn hanging_init(mut self, timeout: Duration) -> Self {
        self.hang_in_init = true;
        self.timeout = Some(timeout);
        self
    }

    fn hanging_destroy(mut self) -> Self {
        self.hang_in_destroy = true;
        self
    }

    fn providing_service(mut self, name: &str, value: &str) -> Self {
        self.service = Some((name.to_string(), value.to_string()));
        self
    }

    fn with_health(mut self, report: HealthReport) -> Self {
        self.health = Some(report);
        self
    }

    fn destroy_counter(&self) -> Arc<AtomicUsize> {
        self.destroy_count.clone()
    }

    fn log(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> Vec<PluginDependency> {
        self.deps.clone()
    }

    fn startup_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), PluginSystemError> {
        if self.hang_in_init {
            std::future::pending::<()>().await;
        }
        self.log("init");
        if let Some((service, value)) = &self.service {
            ctx.register_service(service, Arc::new(value.clone()) as ServiceInstance)
                .await;
        }
        Ok(())
    }

    async fn start(&self, _ctx: &PluginContext) -> Result<(), PluginSystemError> {
        self.log("start");
        if self.fail_in_start {
            return Err(PluginSystemError::OperationError {
                plugin_id: Some(self.name.clone()),
                message: "scripted start failure".to_string(),
            });
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), PluginSystemError> {
        if self.hang_in_destroy {
            std::future::pending::<()>().await;
        }
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
        self.log("destroy");
        Ok(())
    }

    async fn health_check(&self) -> Option<HealthReport> {
        self.health.clone()
    }
}

// --- registration ---

#[test]
fn test_use_plugin_rejects_duplicates() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("dup", &events)))
        .unwrap();
    let err = kernel
        .use_plugin(Box::new(TestPlugin::new("dup", &events)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PluginSystem(PluginSystemError::DuplicatePlugin(name)) if name == "dup"
    ));
}

#[test]
fn test_use_plugin_rejects_invalid_metadata() {
    let events = event_log();
    let mut kernel = Kernel::default();
    let err = kernel
        .use_plugin(Box::new(
            TestPlugin::new("bad", &events).with_version("not-a-version"),
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PluginSystem(PluginSystemError::InvalidPlugin { .. })
    ));
}

#[tokio::test]
async fn test_use_plugin_rejected_after_bootstrap() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events)))
        .unwrap();
    kernel.bootstrap().await.unwrap();
    let err = kernel
        .use_plugin(Box::new(TestPlugin::new("late", &events)))
        .unwrap_err();
    assert!(matches!(err, Error::Lifecycle { .. }));
}

#[test]
fn test_kernel_debug_output() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events)))
        .unwrap();
    let rendered = format!("{:?}", kernel);
    assert!(rendered.contains("Created"));
    assert!(rendered.contains("\"a\""));
}

// --- bootstrap ---

#[tokio::test]
async fn test_bootstrap_starts_in_dependency_order() {
    let events = event_log();
    let mut kernel = Kernel::default();
    // Registered out of order on purpose; dependency resolution decides.
    kernel
        .use_plugin(Box::new(TestPlugin::new("b", &events).with_dep("a")))
        .unwrap();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events)))
        .unwrap();

    kernel.bootstrap().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Running);
    assert_eq!(
        events_of(&events),
        vec!["init:a", "start:a", "init:b", "start:b"]
    );
    assert_eq!(kernel.started_plugins(), &["a".to_string(), "b".to_string()]);

    let metrics = kernel.plugin_metrics();
    assert!(metrics.contains_key("a"));
    assert!(metrics.contains_key("b"));
}

#[tokio::test]
async fn test_bootstrap_twice_is_rejected() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events)))
        .unwrap();
    kernel.bootstrap().await.unwrap();
    let err = kernel.bootstrap().await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle { .. }));
}

#[tokio::test]
async fn test_bootstrap_fails_on_missing_dependency() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events).with_dep("ghost")))
        .unwrap();

    let err = kernel.bootstrap().await.unwrap_err();
    assert!(matches!(
        err,
        Error::PluginSystem(PluginSystemError::DependencyResolution(
            DependencyError::MissingDependency { .. }
        ))
    ));
    // Nothing started; the caller can fix and retry.
    assert_eq!(kernel.state(), KernelState::Created);
    assert!(kernel.started_plugins().is_empty());
    assert!(events_of(&events).is_empty());
}

#[tokio::test]
async fn test_bootstrap_fails_on_dependency_cycle() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events).with_dep("b")))
        .unwrap();
    kernel
        .use_plugin(Box::new(TestPlugin::new("b", &events).with_dep("a")))
        .unwrap();

    let err = kernel.bootstrap().await.unwrap_err();
    assert!(matches!(
        err,
        Error::PluginSystem(PluginSystemError::DependencyResolution(
            DependencyError::CircularDependency(_)
        ))
    ));
}

#[tokio::test]
async fn test_bootstrap_fails_fast_on_version_conflict() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("provider", &events).with_version("1.0.0"),
        ))
        .unwrap();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("consumer", &events).with_ranged_dep("provider", "^2.0.0"),
        ))
        .unwrap();

    let err = kernel.bootstrap().await.unwrap_err();
    match err {
        Error::PluginSystem(PluginSystemError::VersionConflicts(conflicts)) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].from, "consumer");
            assert_eq!(conflicts[0].actual_version, "1.0.0");
        }
        other => panic!("expected VersionConflicts, got: {}", other),
    }
    assert!(events_of(&events).is_empty());
}

#[tokio::test]
async fn test_bootstrap_failure_rolls_back_started_plugins() {
    let events = event_log();
    let mut kernel = Kernel::default();
    let a = TestPlugin::new("a", &events);
    let a_destroys = a.destroy_counter();
    kernel.use_plugin(Box::new(a)).unwrap();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("b", &events).with_dep("a").failing_start(),
        ))
        .unwrap();

    let err = kernel.bootstrap().await.unwrap_err();
    assert!(matches!(
        err,
        Error::PluginSystem(PluginSystemError::Startup { ref plugin_id, .. }) if plugin_id == "b"
    ));

    // `a` was destroyed exactly once, before the error was surfaced
    assert_eq!(a_destroys.load(Ordering::SeqCst), 1);
    assert!(kernel.started_plugins().is_empty());
    assert_eq!(kernel.state(), KernelState::Created);

    // Metrics still identify what had started before the failure
    assert!(kernel.plugin_metrics().contains_key("a"));
    assert!(!kernel.plugin_metrics().contains_key("b"));
}

#[tokio::test]
async fn test_bootstrap_failure_without_rollback_marks_failed() {
    let events = event_log();
    let mut kernel = Kernel::new(KernelConfig {
        rollback_on_failure: false,
        ..KernelConfig::default()
    });
    let a = TestPlugin::new("a", &events);
    let a_destroys = a.destroy_counter();
    kernel.use_plugin(Box::new(a)).unwrap();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("b", &events).with_dep("a").failing_start(),
        ))
        .unwrap();

    assert!(kernel.bootstrap().await.is_err());
    assert_eq!(kernel.state(), KernelState::Failed);
    assert_eq!(a_destroys.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout_does_not_wait_for_hung_init() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("slow", &events).hanging_init(Duration::from_millis(5)),
        ))
        .unwrap();

    let err = kernel.bootstrap().await.unwrap_err();
    match err {
        Error::PluginSystem(PluginSystemError::StartupTimeout {
            plugin_id,
            timeout_ms,
        }) => {
            assert_eq!(plugin_id, "slow");
            assert_eq!(timeout_ms, 5);
        }
        other => panic!("expected StartupTimeout, got: {}", other),
    }
    assert_eq!(kernel.state(), KernelState::Created);
}

// --- services through the kernel ---

#[tokio::test]
async fn test_plugin_registered_service_is_retrievable() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("greeter", &events).providing_service("greeting", "hello"),
        ))
        .unwrap();
    kernel.bootstrap().await.unwrap();

    let sync = kernel.get_service("greeting").unwrap();
    assert_eq!(
        sync.downcast::<String>().expect("string service").as_str(),
        "hello"
    );

    let asynchronous = kernel.get_service_async("greeting", None).await.unwrap();
    assert_eq!(
        asynchronous
            .downcast::<String>()
            .expect("string service")
            .as_str(),
        "hello"
    );

    assert!(matches!(
        kernel.get_service("nope").unwrap_err(),
        Error::PluginSystem(PluginSystemError::ServiceNotFound(_))
    ));
}

// --- health ---

#[tokio::test]
async fn test_health_checks_aggregate_all_plugins() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("quiet", &events)))
        .unwrap();
    kernel
        .use_plugin(Box::new(
            TestPlugin::new("sick", &events)
                .with_health(HealthReport::unhealthy("degraded backend")),
        ))
        .unwrap();
    kernel.bootstrap().await.unwrap();

    let reports = kernel.check_all_plugins_health().await;
    assert_eq!(reports.len(), 2);
    assert!(reports["quiet"].healthy);
    assert_eq!(
        reports["quiet"].message.as_deref(),
        Some("No health check configured")
    );
    assert!(!reports["sick"].healthy);

    let single = kernel.check_plugin_health("sick").await.unwrap();
    assert_eq!(single.message.as_deref(), Some("degraded backend"));
    assert!(kernel.check_plugin_health("ghost").await.is_err());
}

// --- shutdown ---

#[tokio::test]
async fn test_shutdown_reverses_start_order_and_is_idempotent() {
    let events = event_log();
    let mut kernel = Kernel::default();
    let a = TestPlugin::new("a", &events);
    let b = TestPlugin::new("b", &events).with_dep("a");
    let a_destroys = a.destroy_counter();
    let b_destroys = b.destroy_counter();
    kernel.use_plugin(Box::new(a)).unwrap();
    kernel.use_plugin(Box::new(b)).unwrap();
    kernel.bootstrap().await.unwrap();

    kernel.shutdown().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
    let recorded = events_of(&events);
    assert_eq!(
        recorded[recorded.len() - 2..],
        ["destroy:b".to_string(), "destroy:a".to_string()]
    );

    // A second shutdown destroys nothing twice
    kernel.shutdown().await.unwrap();
    assert_eq!(a_destroys.load(Ordering::SeqCst), 1);
    assert_eq!(b_destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_runs_handlers_in_order_after_plugins() {
    let events = event_log();
    let mut kernel = Kernel::default();
    kernel
        .use_plugin(Box::new(TestPlugin::new("a", &events)))
        .unwrap();
    kernel.bootstrap().await.unwrap();

    let log_first = events.clone();
    kernel.on_shutdown(move || async move {
        log_first.lock().unwrap().push("handler:first".to_string());
        // Handler failures are logged, never propagated
        Err(Error::PluginSystem(PluginSystemError::OperationError {
            plugin_id: None,
            message: "scripted handler failure".to_string(),
        }))
    });
    let log_second = events.clone();
    kernel.on_shutdown(move || async move {
        log_second.lock().unwrap().push("handler:second".to_string());
        Ok(())
    });

    kernel.shutdown().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
    let recorded = events_of(&events);
    assert_eq!(
        recorded[recorded.len() - 3..],
        [
            "destroy:a".to_string(),
            "handler:first".to_string(),
            "handler:second".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_still_reaches_stopped() {
    let events = event_log();
    let mut kernel = Kernel::new(KernelConfig {
        shutdown_timeout: Duration::from_millis(10),
        ..KernelConfig::default()
    });
    let hung = TestPlugin::new("hung", &events).hanging_destroy();
    let hung_destroys = hung.destroy_counter();
    kernel.use_plugin(Box::new(hung)).unwrap();
    kernel.bootstrap().await.unwrap();

    kernel.shutdown().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
    // The hung destroy was abandoned, not completed
    assert_eq!(hung_destroys.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_before_bootstrap_is_harmless() {
    let mut kernel = Kernel::default();
    kernel.shutdown().await.unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
}
