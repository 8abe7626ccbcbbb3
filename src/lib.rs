//! # Modloom
//!
//! An application-composition runtime for async Rust services.
//!
//! Modloom assembles independently declared modules (bundles of components,
//! factories and constants) into one running process. It orders module
//! creation by their declared requirements, runs lifecycle hooks with rollback
//! on failure, and wraps every incoming unit of work in a composable
//! interceptor chain running in its own child scope.
//!
//! ## Features
//!
//! - **Module graph**: dependency-ordered creation, reverse-ordered teardown, cycle detection with the offending path
//! - **Hierarchical scopes**: singleton and transient components, named/tagged bindings, trait-object identities
//! - **Interceptors**: onion-ordered global, group and handler interceptors, with guard and aspect adaptors
//! - **Event bus**: topic-keyed, acknowledged in-process delivery with snapshot membership
//! - **HTTP adaptor**: axum routes backed by controller methods with declared parameter bindings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modloom::prelude::*;
//!
//! struct Greeter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let greet = Method::new("greet", 1, |_: Arc<Greeter>, args: Arguments| async move {
//!         let name = args.get::<String>(0)?;
//!         println!("hello {name}");
//!         anyhow::Ok(())
//!     })
//!     .bind(ParameterBinding::new("greeting.topic"));
//!
//!     let greetings = EventSubscriptionModule::builder("greetings")
//!         .constant(ConstantDescriptor::of(Greeter))
//!         .controller(SubscriberController::<Greeter>::new().subscribe("greeting.topic", greet))
//!         .build();
//!
//!     let app = Application::builder()
//!         .module(greetings)
//!         .start("greetings")
//!         .await?;
//!
//!     let bus = app.scope().resolve::<EventBus>().await?;
//!     bus.announce("greeting.topic", "world".to_string()).await?;
//!
//!     app.stop().await;
//!     Ok(())
//! }
//! ```

pub mod aspect;
pub mod config;
pub mod di;
pub mod error;
pub mod guard;
pub mod handler;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod messaging;
pub mod method;
pub mod module;

// Re-export core types
pub use config::ConfigService;
pub use di::{ComponentDescriptor, ConstantDescriptor, FactoryDescriptor, Injectable, Scope, ServiceId};
pub use error::{Error, Result};
pub use lifecycle::{Application, ApplicationBuilder};
pub use messaging::EventBus;
pub use module::{ModuleDescriptor, ModuleId};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use modloom::prelude::*;
/// ```
pub mod prelude {
    pub use crate::aspect::{Aspect, AspectResult, aspect};
    pub use crate::config::ConfigService;
    pub use crate::di::{
        ComponentDescriptor, ComponentScope, ConstantDescriptor, Constraint, FactoryDescriptor,
        Injectable, Scope, ServiceId,
    };
    pub use crate::error::{Error, Result};
    pub use crate::guard::{Guard, GuardError, GuardResult, guard};
    pub use crate::handler::EntryPoint;
    pub use crate::http::{
        HttpContext, HttpController, HttpError, HttpModule, body, header, path_param, query_param,
    };
    pub use crate::interceptor::{
        Interceptor, InterceptorChain, InterceptorRef, InterceptorResult, LoggingInterceptor, Next,
        RequestContext,
    };
    pub use crate::lifecycle::{
        Application, ApplicationBuilder, LifecycleError, OnModuleCreate, OnModuleDestroy,
        StopReport, shutdown_signal,
    };
    pub use crate::messaging::{
        EventAnnouncer, EventBus, EventContext, EventSubscriptionModule, SubscriberController,
        inject_event_announcer,
    };
    pub use crate::method::{Arguments, Method, ParameterBinding};
    pub use crate::module::{Hook, ModuleDescriptor, ModuleId};
    pub use async_trait::async_trait;
    pub use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    pub use std::sync::Arc;
}
