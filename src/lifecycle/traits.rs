//! Lifecycle hook traits
//!
//! A component implementing these traits can serve as the target of a
//! module's create or destroy hook through
//! [`Hook::on_create`](crate::module::Hook::on_create) and
//! [`Hook::on_destroy`](crate::module::Hook::on_destroy).

use crate::di::Scope;
use async_trait::async_trait;

/// Called once the owning module's bindings are installed.
///
/// Use this hook to:
/// - Open connections
/// - Warm up caches
/// - Subscribe to topics
///
/// # Example
///
/// ```rust,ignore
/// use modloom::lifecycle::OnModuleCreate;
/// use async_trait::async_trait;
///
/// #[async_trait]
/// impl OnModuleCreate for CacheWarmer {
///     async fn on_module_create(&self, scope: &Scope) -> anyhow::Result<()> {
///         let repo = scope.resolve::<Repository>().await?;
///         self.load(&repo).await
///     }
/// }
/// ```
#[async_trait]
pub trait OnModuleCreate: Send + Sync {
    async fn on_module_create(&self, scope: &Scope) -> anyhow::Result<()>;
}

/// Called when the owning module is torn down.
///
/// # Note
///
/// Modules are destroyed in **reverse order** of their creation, so
/// everything a module requires is still alive while its destroy hooks run.
#[async_trait]
pub trait OnModuleDestroy: Send + Sync {
    async fn on_module_destroy(&self, scope: &Scope) -> anyhow::Result<()>;
}
