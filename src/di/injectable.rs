use crate::di::Scope;
use crate::error::Result;
use async_trait::async_trait;

/// Trait for components that build themselves from the active scope.
///
/// # Example
/// ```
/// use modloom::di::{Injectable, Scope};
/// use modloom::async_trait;
/// use std::sync::Arc;
///
/// pub struct Clock;
///
/// pub struct UserService {
///     clock: Arc<Clock>,
/// }
///
/// #[async_trait]
/// impl Injectable for UserService {
///     async fn inject(scope: &Scope) -> modloom::Result<Self> {
///         Ok(Self {
///             clock: scope.resolve::<Clock>().await?,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Create an instance by resolving dependencies from the scope
    ///
    /// # Errors
    /// Returns an error if any required dependency cannot be resolved.
    async fn inject(scope: &Scope) -> Result<Self>;
}
