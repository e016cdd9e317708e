/// Kernel name
pub const KERNEL_NAME: &str = "plinth-core";

/// Kernel version
pub const KERNEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-plugin startup timeout, in milliseconds
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;

/// Default total shutdown timeout, in milliseconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
