//! Lifecycle Manager
//!
//! Creates modules one at a time and tears them down in reverse.

use super::{LifecycleError, LifecyclePhase, Result};
use crate::di::Scope;
use crate::module::{Hook, ModuleDescriptor, ModuleId};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of tearing the created modules down.
///
/// Teardown never stops at the first failure: every destroy hook is attempted
/// and the failures are collected here.
#[derive(Debug, Default)]
pub struct StopReport {
    /// Modules in the order they were destroyed.
    pub destroyed: Vec<ModuleId>,
    pub failures: Vec<LifecycleError>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives module creation and destruction against one scope.
///
/// The LifecycleManager is responsible for:
/// - Installing each module's bindings and constructing its singletons
/// - Running create hooks in declared order
/// - Remembering which modules were fully created
/// - Running destroy hooks for those modules in reverse creation order
///
/// # Example
///
/// ```rust,ignore
/// let mut manager = LifecycleManager::new(Scope::root());
/// for module in &order {
///     manager.create_module(module).await?;
/// }
/// // ... application runs ...
/// let report = manager.destroy_all().await;
/// ```
pub struct LifecycleManager {
    scope: Scope,
    created: Vec<Arc<ModuleDescriptor>>,
    hook_timeout: Option<Duration>,
}

impl LifecycleManager {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            created: Vec::new(),
            hook_timeout: None,
        }
    }

    /// Bound every hook invocation by `timeout`.
    pub fn with_hook_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Modules fully created so far, in creation order.
    pub fn created(&self) -> impl Iterator<Item = &ModuleId> {
        self.created.iter().map(|module| module.id())
    }

    /// Install `module`'s bindings, construct its singletons and run its
    /// create hooks. The module only counts as created once every hook
    /// succeeded.
    pub async fn create_module(&mut self, module: &Arc<ModuleDescriptor>) -> Result<()> {
        tracing::debug!(module = %module.id(), "Creating module");

        module.install(&self.scope)?;
        module
            .instantiate_singletons(&self.scope)
            .await
            .map_err(|source| LifecycleError::InstantiationFailed {
                module: module.id().to_string(),
                source,
            })?;

        for hook in module.on_create_hooks() {
            self.run_hook(module, hook, LifecyclePhase::Create).await?;
        }

        self.created.push(Arc::clone(module));
        tracing::debug!(module = %module.id(), "Module created");
        Ok(())
    }

    /// Run the destroy hooks of every created module, most recent first.
    ///
    /// Within a module, hooks run in declared order. A failing hook is logged
    /// and recorded, and teardown carries on.
    pub async fn destroy_all(&mut self) -> StopReport {
        let mut report = StopReport::default();

        while let Some(module) = self.created.pop() {
            tracing::debug!(module = %module.id(), "Destroying module");
            for hook in module.on_destroy_hooks() {
                if let Err(e) = self.run_hook(&module, hook, LifecyclePhase::Destroy).await {
                    tracing::error!(
                        module = %module.id(),
                        hook = hook.name(),
                        error = %e,
                        "Destroy hook failed"
                    );
                    report.failures.push(e);
                }
            }
            report.destroyed.push(module.id().clone());
        }

        report
    }

    async fn run_hook(
        &self,
        module: &ModuleDescriptor,
        hook: &Hook,
        phase: LifecyclePhase,
    ) -> Result<()> {
        tracing::debug!(module = %module.id(), hook = hook.name(), %phase, "Running hook");

        let outcome = match self.hook_timeout {
            Some(after) => tokio::time::timeout(after, hook.run(&self.scope))
                .await
                .map_err(|_| LifecycleError::Timeout {
                    module: module.id().to_string(),
                    hook: hook.name().to_string(),
                    phase,
                    after,
                })?,
            None => hook.run(&self.scope).await,
        };

        outcome.map_err(|source| LifecycleError::HookFailed {
            module: module.id().to_string(),
            hook: hook.name().to_string(),
            phase,
            source,
        })
    }
}
