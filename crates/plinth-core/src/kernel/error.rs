//! # Plinth Core Kernel Errors
//!
//! Defines error types specific to the kernel.
//!
//! [`Error`] is the primary enum for kernel operations: lifecycle gating
//! failures plus plugin-system errors folded in via `#[from]`.
use std::result::Result as StdResult;

use crate::plugin_system::error::PluginSystemError;
use thiserror::Error as ThisError;

/// Represents a specific phase in the kernel's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum KernelLifecyclePhase {
    #[error("Bootstrap")]
    Bootstrap,
    #[error("Shutdown")]
    Shutdown,
}

/// Custom error type for kernel operations
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Error occurring during a specific kernel lifecycle phase.
    #[error("Kernel lifecycle error during {phase}: {message}")]
    Lifecycle {
        phase: KernelLifecyclePhase,
        message: String,
    },
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;
