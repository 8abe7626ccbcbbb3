//! Application Bootstrap
//!
//! Resolves the module graph, creates every module in order and rolls back
//! on a partial start.

use super::{LifecycleManager, Result, StopReport, shutdown_signal};
use crate::config::{ConfigService, HOOK_TIMEOUT_KEY};
use crate::di::{Scope, ServiceId};
use crate::messaging::{EVENT_BUS_MODULE, event_bus_module};
use crate::module::{ModuleDescriptor, ModuleGraph, ModuleId};
use std::sync::Arc;
use std::time::Duration;

/// A started application.
///
/// # Example
///
/// ```rust,ignore
/// use modloom::lifecycle::Application;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let app = Application::builder()
///         .module(database_module())
///         .module(app_module())
///         .start("app")
///         .await?;
///
///     let report = app.run_until_shutdown().await;
///     anyhow::ensure!(report.is_clean(), "teardown reported failures");
///     Ok(())
/// }
/// ```
pub struct Application {
    scope: Scope,
    modules: Vec<ModuleId>,
    manager: LifecycleManager,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// The root scope every module was installed into.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Created modules, in creation order.
    pub fn modules(&self) -> &[ModuleId] {
        &self.modules
    }

    /// Run every destroy hook in reverse creation order, then release the
    /// root scope.
    pub async fn stop(mut self) -> StopReport {
        tracing::info!("Shutting down application...");
        let report = self.manager.destroy_all().await;
        self.scope.dispose();
        if report.is_clean() {
            tracing::info!(modules = report.destroyed.len(), "Application shutdown complete");
        } else {
            tracing::warn!(
                modules = report.destroyed.len(),
                failures = report.failures.len(),
                "Application shutdown completed with failures"
            );
        }
        report
    }

    /// Wait for Ctrl+C or SIGTERM, then [`stop`](Self::stop).
    pub async fn run_until_shutdown(self) -> StopReport {
        shutdown_signal().await;
        self.stop().await
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("scope", &self.scope.id())
            .field("modules", &self.modules)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Application`]
pub struct ApplicationBuilder {
    modules: Vec<Arc<ModuleDescriptor>>,
    config: Option<ConfigService>,
    hook_timeout: Option<Duration>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    /// A builder with the built-in event bus module already declared.
    pub fn new() -> Self {
        Self {
            modules: vec![event_bus_module()],
            config: None,
            hook_timeout: None,
        }
    }

    /// Declare a module. Adding the same descriptor twice declares it once.
    pub fn module(mut self, module: Arc<ModuleDescriptor>) -> Self {
        if !self.modules.iter().any(|known| Arc::ptr_eq(known, &module)) {
            self.modules.push(module);
        }
        self
    }

    pub fn modules(self, modules: impl IntoIterator<Item = Arc<ModuleDescriptor>>) -> Self {
        modules.into_iter().fold(self, Self::module)
    }

    /// Use `config` instead of the process environment.
    pub fn config(mut self, config: ConfigService) -> Self {
        self.config = Some(config);
        self
    }

    /// Bound every lifecycle hook by `timeout`. Defaults to
    /// `MODLOOM_HOOK_TIMEOUT_MS` from the configuration, if set.
    pub fn hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = Some(timeout);
        self
    }

    /// Create `root` and everything it requires.
    ///
    /// Structural problems are reported before any hook runs. If a module
    /// fails to be created, every module created before it is destroyed in
    /// reverse order and the original failure is returned.
    pub async fn start(self, root: impl Into<ModuleId>) -> Result<Application> {
        let root = root.into();
        tracing::info!(root = %root, "Starting application...");

        let graph = ModuleGraph::new(self.modules)?;
        let order = graph.resolve_from(&[ModuleId::from(EVENT_BUS_MODULE), root])?;
        for module in &order {
            module.validate()?;
        }

        let config = self.config.unwrap_or_else(ConfigService::from_env);
        let hook_timeout = self.hook_timeout.or_else(|| {
            config
                .get_parsed::<u64>(HOOK_TIMEOUT_KEY)
                .map(Duration::from_millis)
        });

        let scope = Scope::root();
        scope.bind_constant(ServiceId::of::<ConfigService>(), config)?;
        let mut manager = LifecycleManager::new(scope.clone()).with_hook_timeout(hook_timeout);

        for module in &order {
            if let Err(e) = manager.create_module(module).await {
                tracing::error!(module = %module.id(), error = %e, "Module creation failed, rolling back");
                let report = manager.destroy_all().await;
                if !report.is_clean() {
                    tracing::warn!(
                        failures = report.failures.len(),
                        "Rollback completed with failures"
                    );
                }
                scope.dispose();
                return Err(e);
            }
        }

        tracing::info!(modules = order.len(), "Application initialization complete");
        Ok(Application {
            scope,
            modules: order.iter().map(|module| module.id().clone()).collect(),
            manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleError;
    use crate::module::Hook;
    use std::sync::Mutex;

    #[tokio::test]
    async fn config_is_bound_into_the_root_scope() {
        let app = Application::builder()
            .config(ConfigService::new().with("region", "eu"))
            .module(ModuleDescriptor::builder("app").build())
            .start("app")
            .await
            .unwrap();

        let config = app.scope().resolve::<ConfigService>().await.unwrap();
        assert_eq!(config.get("region").as_deref(), Some("eu"));
        assert_eq!(
            app.modules(),
            &[ModuleId::from(EVENT_BUS_MODULE), ModuleId::from("app")]
        );
        assert!(app.stop().await.is_clean());
    }

    #[tokio::test]
    async fn unknown_root_is_a_definition_error() {
        let err = Application::builder()
            .config(ConfigService::new())
            .start("missing")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LifecycleError::Definition(_)));
    }

    #[tokio::test]
    async fn invalid_module_fails_before_any_hook() {
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let first = ModuleDescriptor::builder("first")
            .on_create(Hook::new("mark", move |_| {
                let flag = Arc::clone(&flag);
                async move {
                    *flag.lock().unwrap() = true;
                    Ok(())
                }
            }))
            .build();
        let app = ModuleDescriptor::builder("app")
            .requires("first")
            .requires("ghost")
            .build();

        let err = Application::builder()
            .config(ConfigService::new())
            .module(first)
            .module(app)
            .start("app")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LifecycleError::Definition(crate::Error::UnknownModule { .. })
        ));
        assert!(!*ran.lock().unwrap());
    }
}
