use thiserror::Error;
use uuid::Uuid;

use crate::di::ServiceId;

pub type Result<T> = std::result::Result<T, Error>;

/// Structural and resolution failures raised by the runtime itself.
///
/// Failures of business code (interceptors, handlers, subscribers, hooks) are
/// carried as opaque [`anyhow::Error`]s; any `Error` raised while running a
/// unit of work can be recovered from them with `downcast_ref::<Error>()`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cyclic module dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Module '{module}' requires unknown module '{required}'")]
    UnknownModule { module: String, required: String },

    #[error("Unable to resolve '{id}': {reason}")]
    Resolution { id: String, reason: String },

    #[error("Circular resolution detected: {chain}")]
    CircularResolution { chain: String },

    #[error("Ambiguous binding for '{id}': {count} candidates match in the same scope")]
    AmbiguousBinding { id: String, count: usize },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error("Unresolved parameter in '{method}': {message}")]
    UnresolvedParameter { method: String, message: String },

    #[error("Duplicate registration: {id}")]
    DuplicateRegistration { id: String },

    #[error("Invalid identity for component '{component}': {message}")]
    InvalidIdentity { component: String, message: String },

    #[error("Scope {scope} has been disposed")]
    ScopeDisposed { scope: Uuid },
}

impl Error {
    pub fn resolution(id: &ServiceId, reason: impl Into<String>) -> Self {
        Self::Resolution {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn downcast_failed<T: ?Sized>() -> Self {
        Self::DowncastFailed {
            type_name: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn unresolved_parameter(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnresolvedParameter {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::DuplicateRegistration { id: id.into() }
    }

    /// True when nothing in the scope chain could satisfy the request.
    ///
    /// Optional parameters tolerate exactly this failure.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }
}
