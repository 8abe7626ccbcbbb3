//! A thin axum adaptor over the handler registration surface.
//!
//! An [`HttpModule`] collects [`HttpController`] route declarations. When the
//! module is created it composes an [`EntryPoint`](crate::handler::EntryPoint)
//! per route and builds an axum [`Router`](axum::Router); every request then
//! runs as one unit of work with its [`HttpContext`] bound into a child scope.
//!
//! ```rust,ignore
//! let users = HttpController::<UserController>::new("/users")
//!     .interceptor(guard::<ApiKeyGuard>())
//!     .get("/{id}", find_user())
//!     .post("/", create_user());
//!
//! let http = HttpModule::builder("http")
//!     .requires("users")
//!     .interceptor(InterceptorRef::of::<LoggingInterceptor>())
//!     .controller(users)
//!     .listen(([127, 0, 0, 1], 3000).into())
//!     .build();
//! ```

mod context;
mod exception;
mod module;

pub use context::HttpContext;
pub use exception::{HttpError, render_error};
pub use module::{DEFAULT_BODY_LIMIT, HttpHandle, HttpModule, HttpModuleBuilder};

use crate::di::ServiceId;
use crate::interceptor::InterceptorRef;
use crate::method::{Method, ParameterBinding};
use axum::body::Bytes;
use axum::http::Method as HttpMethod;
use axum::response::Response;
use std::sync::Arc;

pub(crate) struct Route<T> {
    pub(crate) method: HttpMethod,
    pub(crate) path: String,
    pub(crate) interceptors: Vec<InterceptorRef>,
    pub(crate) handler: Method<T, Response>,
}

/// Routes served by methods of the component `T`, under a common prefix.
pub struct HttpController<T> {
    pub(crate) prefix: String,
    pub(crate) target: ServiceId,
    pub(crate) interceptors: Vec<InterceptorRef>,
    pub(crate) routes: Vec<Route<T>>,
}

impl<T: Send + Sync + 'static> HttpController<T> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: ServiceId::of::<T>(),
            interceptors: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Resolve the controller component under `id` instead of `T`'s type.
    pub fn target(mut self, id: impl Into<ServiceId>) -> Self {
        self.target = id.into();
        self
    }

    pub fn interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn get(self, path: impl Into<String>, handler: Method<T, Response>) -> Self {
        self.route(HttpMethod::GET, path, Vec::new(), handler)
    }

    pub fn post(self, path: impl Into<String>, handler: Method<T, Response>) -> Self {
        self.route(HttpMethod::POST, path, Vec::new(), handler)
    }

    pub fn put(self, path: impl Into<String>, handler: Method<T, Response>) -> Self {
        self.route(HttpMethod::PUT, path, Vec::new(), handler)
    }

    pub fn patch(self, path: impl Into<String>, handler: Method<T, Response>) -> Self {
        self.route(HttpMethod::PATCH, path, Vec::new(), handler)
    }

    pub fn delete(self, path: impl Into<String>, handler: Method<T, Response>) -> Self {
        self.route(HttpMethod::DELETE, path, Vec::new(), handler)
    }

    /// Declare a route with handler-level interceptors. Paths use axum's
    /// `{param}` syntax and are joined onto the controller prefix.
    pub fn route(
        mut self,
        method: HttpMethod,
        path: impl Into<String>,
        interceptors: impl IntoIterator<Item = InterceptorRef>,
        handler: Method<T, Response>,
    ) -> Self {
        self.routes.push(Route {
            path: join_path(&self.prefix, &path.into()),
            method,
            interceptors: interceptors.into_iter().collect(),
            handler,
        });
        self
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    let joined = format!(
        "/{}/{}",
        prefix.trim_matches('/'),
        path.trim_start_matches('/')
    );
    let mut normalized = String::with_capacity(joined.len());
    for c in joined.chars() {
        if !(c == '/' && normalized.ends_with('/')) {
            normalized.push(c);
        }
    }
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

fn request_binding() -> ParameterBinding {
    ParameterBinding::of::<HttpContext>()
}

/// The path parameter `name`, as `Option<String>`.
pub fn path_param(name: impl Into<String>) -> ParameterBinding {
    let name = name.into();
    request_binding().transform(move |http: Arc<HttpContext>| http.path_param(&name).map(str::to_owned))
}

/// The query parameter `name`, as `Option<String>`.
pub fn query_param(name: impl Into<String>) -> ParameterBinding {
    let name = name.into();
    request_binding().transform(move |http: Arc<HttpContext>| http.query_param(&name).map(str::to_owned))
}

/// The header `name`, as `Option<String>`.
pub fn header(name: impl Into<String>) -> ParameterBinding {
    let name = name.into();
    request_binding().transform(move |http: Arc<HttpContext>| http.header(&name).map(str::to_owned))
}

/// The raw request body, as [`Bytes`].
pub fn body() -> ParameterBinding {
    request_binding().transform(|http: Arc<HttpContext>| Bytes::clone(http.body()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_joined_onto_the_prefix() {
        assert_eq!(join_path("/users", "/{id}"), "/users/{id}");
        assert_eq!(join_path("users/", "{id}/orders"), "/users/{id}/orders");
        assert_eq!(join_path("/users", "/"), "/users");
        assert_eq!(join_path("", "/health"), "/health");
        assert_eq!(join_path("/", ""), "/");
    }
}
