//! # Plinth Core Kernel
//!
//! The `kernel` module orchestrates plugin registration and the ordered
//! startup/shutdown sequence across all registered plugins.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Bootstrap**: [`Kernel`](bootstrap::Kernel) resolves the dependency
//!   order and starts each plugin under a per-plugin timeout, rolling back
//!   already-started plugins in reverse order when a startup fails.
//! - **Shutdown**: reverse-order teardown plus custom shutdown handlers,
//!   bounded by a configurable total timeout.
//! - **Core Constants**: defaults for the timeouts live in the `constants`
//!   submodule.
//! - **Error Handling**: kernel-specific error types ([`Error`](error::Error))
//!   and a `Result` alias in the `error` submodule.
pub mod bootstrap;
pub mod constants;
pub mod error;

pub use bootstrap::{Kernel, KernelConfig, KernelState, ShutdownHandler};
pub use error::{Error, KernelLifecyclePhase, Result};
// Test module declaration
#[cfg(test)]
mod tests;
