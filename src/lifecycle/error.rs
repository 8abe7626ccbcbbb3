//! Lifecycle-specific error types

use crate::error::Error;
use std::time::Duration;
use thiserror::Error;

/// The hook phase a lifecycle failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecyclePhase {
    Create,
    Destroy,
}

/// Errors raised while starting or stopping an application
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Structural problem: unknown or cyclic modules, duplicate bindings,
    /// unbound hook parameters
    #[error(transparent)]
    Definition(#[from] Error),

    /// A singleton component of the module could not be constructed
    #[error("Failed to instantiate module '{module}': {source}")]
    InstantiationFailed {
        module: String,
        #[source]
        source: Error,
    },

    /// A hook returned an error
    #[error("Hook '{hook}' of module '{module}' failed during {phase}: {source}")]
    HookFailed {
        module: String,
        hook: String,
        phase: LifecyclePhase,
        #[source]
        source: anyhow::Error,
    },

    /// A hook ran past the configured timeout
    #[error("Hook '{hook}' of module '{module}' timed out after {after:?} during {phase}")]
    Timeout {
        module: String,
        hook: String,
        phase: LifecyclePhase,
        after: Duration,
    },
}

impl LifecycleError {
    /// The module the failure is attributed to, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::Definition(_) => None,
            Self::InstantiationFailed { module, .. }
            | Self::HookFailed { module, .. }
            | Self::Timeout { module, .. } => Some(module),
        }
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
