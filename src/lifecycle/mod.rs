//! Module lifecycle
//!
//! Drives module construction and teardown for an application.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Module graph resolution (unknown / cyclic modules rejected)
//!    ↓
//! 2. Module validation (duplicate bindings, unbound hook parameters)
//!    ↓
//! 3. For each module, requirements first:
//!      bind constants, factories, components
//!      construct singletons
//!      OnModuleCreate hooks           ← Lifecycle Hook
//!    ↓
//! [Running...]
//!    ↓
//! 4. Shutdown signal (SIGTERM/SIGINT) or Application::stop
//!    ↓
//! 5. OnModuleDestroy hooks, modules in reverse creation order
//! ```
//!
//! A failure in step 3 destroys the modules already created, in reverse
//! order, and returns the original failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use modloom::lifecycle::{OnModuleCreate, OnModuleDestroy};
//! use modloom::{Scope, async_trait};
//!
//! #[async_trait]
//! impl OnModuleCreate for DatabaseService {
//!     async fn on_module_create(&self, _scope: &Scope) -> anyhow::Result<()> {
//!         tracing::info!("Opening database connection");
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl OnModuleDestroy for DatabaseService {
//!     async fn on_module_destroy(&self, _scope: &Scope) -> anyhow::Result<()> {
//!         tracing::info!("Closing database connections");
//!         Ok(())
//!     }
//! }
//! ```

mod application;
mod error;
mod manager;
mod shutdown;
mod traits;

pub use application::{Application, ApplicationBuilder};
pub use error::{LifecycleError, LifecyclePhase, Result};
pub use manager::{LifecycleManager, StopReport};
pub use shutdown::shutdown_signal;
pub use traits::{OnModuleCreate, OnModuleDestroy};
