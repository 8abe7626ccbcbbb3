use super::{HttpContext, HttpController, HttpError, Route, render_error};
use crate::di::{
    ComponentDescriptor, ConstantDescriptor, FactoryDescriptor, Instance, Scope, ServiceId,
};
use crate::error::{Error, Result};
use crate::handler::EntryPoint;
use crate::interceptor::{InterceptorChain, InterceptorRef, Next, RequestContext};
use crate::module::{Hook, ModuleBuilder, ModuleDescriptor, ModuleId};
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, Query};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Request bodies buffered per route, unless overridden.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// A composed route, ready to be mounted.
struct Endpoint {
    method: axum::http::Method,
    path: String,
    entry: EntryPoint,
}

/// Type-erased view of an [`HttpController`].
trait Controller: Send + Sync {
    fn routes(&self) -> Vec<(axum::http::Method, &str)>;

    fn validate(&self) -> Result<()>;

    fn endpoints(&self, root: &Scope, global: &[InterceptorRef]) -> Result<Vec<Endpoint>>;
}

impl<T: Send + Sync + 'static> Controller for HttpController<T> {
    fn routes(&self) -> Vec<(axum::http::Method, &str)> {
        self.routes
            .iter()
            .map(|route| (route.method.clone(), route.path.as_str()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        self.routes
            .iter()
            .try_for_each(|route| route.handler.validate())
    }

    fn endpoints(&self, root: &Scope, global: &[InterceptorRef]) -> Result<Vec<Endpoint>> {
        self.routes
            .iter()
            .map(|route| {
                let chain = InterceptorChain::new()
                    .extend_global(global.iter().cloned())
                    .extend_group(self.interceptors.iter().cloned())
                    .extend_handler(route.interceptors.iter().cloned());
                let name = format!("{} {}", route.method, route.path);
                let entry = EntryPoint::new(root, name, &chain, self.terminal(route))?;
                Ok(Endpoint {
                    method: route.method.clone(),
                    path: route.path.clone(),
                    entry,
                })
            })
            .collect()
    }
}

impl<T: Send + Sync + 'static> HttpController<T> {
    /// Resolve the controller, call the handler, and store its response on
    /// the request's [`HttpContext`].
    fn terminal(&self, route: &Route<T>) -> Next {
        let target = self.target.clone();
        let handler = route.handler.clone();
        Next::new(move |context: RequestContext| {
            let target = target.clone();
            let handler = handler.clone();
            async move {
                let controller = context.resolve_as::<T>(target).await?;
                let response = handler.invoke(context.scope(), controller).await?;
                context.resolve::<HttpContext>().await?.respond(response);
                Ok(())
            }
        })
    }
}

struct Server {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

#[derive(Default)]
struct HttpState {
    router: Mutex<Option<Router>>,
    local_addr: Mutex<Option<SocketAddr>>,
    server: Mutex<Option<Server>>,
}

/// Access to what an [`HttpModule`] built once it has been created.
#[derive(Clone, Default)]
pub struct HttpHandle {
    state: Arc<HttpState>,
}

impl HttpHandle {
    /// The router, between module creation and destruction.
    pub fn router(&self) -> Option<Router> {
        lock(&self.state.router).clone()
    }

    /// The bound address while the module is serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.state.local_addr)
    }
}

impl std::fmt::Debug for HttpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHandle")
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

struct HttpRuntime {
    module: ModuleId,
    global: Vec<InterceptorRef>,
    controllers: Vec<Box<dyn Controller>>,
    listen: Option<SocketAddr>,
    body_limit: usize,
    handle: HttpHandle,
}

impl HttpRuntime {
    /// One handler per (method, path) across the whole module.
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for controller in &self.controllers {
            controller.validate()?;
            for (method, path) in controller.routes() {
                if !seen.insert((method.clone(), path.to_string())) {
                    return Err(Error::duplicate(format!(
                        "route {method} {path} in module '{}'",
                        self.module
                    )));
                }
            }
        }
        Ok(())
    }

    fn router(&self, scope: &Scope) -> anyhow::Result<Router> {
        let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
        for controller in &self.controllers {
            for endpoint in controller.endpoints(scope, &self.global)? {
                let filter = MethodFilter::try_from(endpoint.method.clone())?;
                let handler = mount(filter, endpoint.entry, endpoint.path.contains('{'));
                tracing::debug!(module = %self.module, method = %endpoint.method, path = %endpoint.path, "Route mapped");
                let routes = match by_path.remove(&endpoint.path) {
                    Some(routes) => routes.merge(handler),
                    None => handler,
                };
                by_path.insert(endpoint.path, routes);
            }
        }
        Ok(by_path
            .into_iter()
            .fold(Router::new(), |router, (path, routes)| router.route(&path, routes))
            .layer(DefaultBodyLimit::max(self.body_limit)))
    }

    async fn start(&self, scope: &Scope) -> anyhow::Result<()> {
        let router = self.router(scope)?;

        if let Some(addr) = self.listen {
            let listener = TcpListener::bind(addr).await?;
            let local_addr = listener.local_addr()?;
            let (shutdown, signal) = oneshot::channel::<()>();
            let app = router.clone();
            let task = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = signal.await;
                    })
                    .await
            });
            tracing::info!(module = %self.module, addr = %local_addr, "HTTP server listening");
            *lock(&self.handle.state.local_addr) = Some(local_addr);
            *lock(&self.handle.state.server) = Some(Server { shutdown, task });
        }

        *lock(&self.handle.state.router) = Some(router);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let server = lock(&self.handle.state.server).take();
        lock(&self.handle.state.local_addr).take();
        lock(&self.handle.state.router).take();
        if let Some(server) = server {
            let _ = server.shutdown.send(());
            server.task.await??;
            tracing::info!(module = %self.module, "HTTP server stopped");
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The request as the endpoint sees it. The body is buffered up to the
/// router's [`DefaultBodyLimit`].
struct Incoming {
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
}

/// The axum handler for one endpoint.
fn mount(filter: MethodFilter, entry: EntryPoint, has_params: bool) -> MethodRouter {
    if has_params {
        axum::routing::on(
            filter,
            move |Path(params): Path<HashMap<String, String>>,
                  method: axum::http::Method,
                  uri: Uri,
                  headers: HeaderMap,
                  body: std::result::Result<Bytes, BytesRejection>| {
                let entry = entry.clone();
                async move {
                    let incoming = Incoming { method, uri, headers, body };
                    serve(&entry, params, incoming).await
                }
            },
        )
    } else {
        axum::routing::on(
            filter,
            move |method: axum::http::Method,
                  uri: Uri,
                  headers: HeaderMap,
                  body: std::result::Result<Bytes, BytesRejection>| {
                let entry = entry.clone();
                async move {
                    let incoming = Incoming { method, uri, headers, body };
                    serve(&entry, HashMap::new(), incoming).await
                }
            },
        )
    }
}

async fn serve(entry: &EntryPoint, path_params: HashMap<String, String>, incoming: Incoming) -> Response {
    let query = match Query::<HashMap<String, String>>::try_from_uri(&incoming.uri) {
        Ok(Query(query)) => query,
        Err(e) => return HttpError::bad_request(e.to_string()).into_response(),
    };
    let body = match incoming.body {
        Ok(body) => body,
        Err(rejection) => return HttpError::new(rejection.status(), rejection.body_text()).into_response(),
    };

    let http = Arc::new(HttpContext::new(
        incoming.method,
        incoming.uri,
        path_params,
        query,
        incoming.headers,
        body,
    ));
    let bound = Arc::clone(&http);
    let outcome = entry
        .dispatch(move |context| context.bind_instance(ServiceId::of::<HttpContext>(), bound as Instance))
        .await;

    match outcome {
        Ok(()) => http
            .take_response()
            .unwrap_or_else(|| StatusCode::NO_CONTENT.into_response()),
        Err(e) => render_error(&e),
    }
}

/// A module serving [`HttpController`]s.
///
/// Routes are composed and the router is built when the module is created.
/// With [`listen`](HttpModuleBuilder::listen) set, the module also serves the
/// router until it is destroyed.
pub struct HttpModule {
    descriptor: Arc<ModuleDescriptor>,
    handle: HttpHandle,
}

impl HttpModule {
    pub fn builder(id: impl Into<ModuleId>) -> HttpModuleBuilder {
        let id = id.into();
        HttpModuleBuilder {
            module: ModuleDescriptor::builder(id.clone()),
            id,
            global: Vec::new(),
            controllers: Vec::new(),
            listen: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn descriptor(&self) -> Arc<ModuleDescriptor> {
        Arc::clone(&self.descriptor)
    }

    pub fn handle(&self) -> HttpHandle {
        self.handle.clone()
    }
}

pub struct HttpModuleBuilder {
    module: ModuleBuilder,
    id: ModuleId,
    global: Vec<InterceptorRef>,
    controllers: Vec<Box<dyn Controller>>,
    listen: Option<SocketAddr>,
    body_limit: usize,
}

impl HttpModuleBuilder {
    pub fn requires(mut self, id: impl Into<ModuleId>) -> Self {
        self.module = self.module.requires(id);
        self
    }

    pub fn component(mut self, component: ComponentDescriptor) -> Self {
        self.module = self.module.component(component);
        self
    }

    pub fn factory(mut self, factory: FactoryDescriptor) -> Self {
        self.module = self.module.factory(factory);
        self
    }

    pub fn constant(mut self, constant: ConstantDescriptor) -> Self {
        self.module = self.module.constant(constant);
        self
    }

    /// Interceptor applied around every route of the module.
    pub fn interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.global.push(interceptor);
        self
    }

    pub fn controller<T: Send + Sync + 'static>(mut self, controller: HttpController<T>) -> Self {
        self.controllers.push(Box::new(controller));
        self
    }

    /// Serve on `addr` while the module is alive. Port 0 picks a free port;
    /// see [`HttpHandle::local_addr`].
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Largest request body a route will buffer, in bytes. Larger bodies are
    /// answered with `413 Payload Too Large`. Defaults to 2 MiB.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn build(self) -> HttpModule {
        let handle = HttpHandle::default();
        let runtime = Arc::new(HttpRuntime {
            module: self.id.clone(),
            global: self.global,
            controllers: self.controllers,
            listen: self.listen,
            body_limit: self.body_limit,
            handle: handle.clone(),
        });

        let on_create = {
            let runtime = Arc::clone(&runtime);
            let checked = Arc::clone(&runtime);
            Hook::new(format!("{}::serve", self.id), move |scope: Scope| {
                let runtime = Arc::clone(&runtime);
                async move { runtime.start(&scope).await }
            })
            .checked(move || checked.validate())
        };
        let on_destroy = Hook::new(format!("{}::shutdown", self.id), move |_: Scope| {
            let runtime = Arc::clone(&runtime);
            async move { runtime.stop().await }
        });

        HttpModule {
            descriptor: self.module.on_create(on_create).on_destroy(on_destroy).build(),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Guard, GuardError, GuardResult, guard};
    use crate::http::{header, path_param, query_param};
    use crate::interceptor::{Interceptor, InterceptorResult};
    use crate::lifecycle::{Application, LifecycleError};
    use crate::method::{Arguments, Method, ParameterBinding};
    use async_trait::async_trait;
    use axum::Json;
    use axum::body::Body;
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    struct Users;

    fn find_user() -> Method<Users, Response> {
        Method::new("find_user", 3, |_: Arc<Users>, args: Arguments| async move {
            let id = args.cloned::<Option<String>>(0)?;
            let fields = args.cloned::<Option<String>>(1)?;
            let caller = args.cloned::<Option<String>>(2)?;
            match id.as_deref() {
                Some("1") => Ok(Json(json!({
                    "id": 1,
                    "fields": fields,
                    "caller": caller,
                }))
                .into_response()),
                _ => Err(HttpError::not_found("no such user").into()),
            }
        })
        .bind(path_param("id"))
        .bind(query_param("fields"))
        .bind(header("x-caller"))
    }

    fn create_user() -> Method<Users, Response> {
        Method::new("create_user", 1, |_: Arc<Users>, args: Arguments| async move {
            let http = args.get::<HttpContext>(0)?;
            let input: Value = http.json()?;
            Ok((StatusCode::CREATED, Json(input)).into_response())
        })
        .bind(ParameterBinding::of::<HttpContext>())
    }

    struct ApiKey;

    #[async_trait]
    impl Guard for ApiKey {
        async fn can_activate(&self, context: &RequestContext) -> GuardResult {
            let http = context
                .resolve::<HttpContext>()
                .await
                .map_err(|e| GuardError::Unauthorized(e.to_string()))?;
            match http.header("x-api-key") {
                Some("open-sesame") => Ok(()),
                Some(_) => Err(GuardError::Forbidden("wrong key".into())),
                None => Err(GuardError::Unauthorized("missing key".into())),
            }
        }
    }

    /// Answers for the handler while maintenance is requested.
    struct Maintenance;

    #[async_trait]
    impl Interceptor for Maintenance {
        async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
            let http = context.resolve::<HttpContext>().await?;
            if http.query_param("maintenance").is_some() {
                http.respond(StatusCode::SERVICE_UNAVAILABLE.into_response());
                return Ok(());
            }
            next.run(context).await
        }
    }

    fn users_module() -> HttpModule {
        HttpModule::builder("http")
            .constant(ConstantDescriptor::of(Users))
            .constant(ConstantDescriptor::of(ApiKey))
            .constant(ConstantDescriptor::of(Maintenance))
            .interceptor(InterceptorRef::of::<Maintenance>())
            .controller(
                HttpController::<Users>::new("/users")
                    .interceptor(guard::<ApiKey>())
                    .get("/{id}", find_user())
                    .post("/", create_user()),
            )
            .build()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn routes_resolve_request_parameters() {
        let module = users_module();
        let handle = module.handle();
        let app = Application::builder()
            .module(module.descriptor())
            .start("http")
            .await
            .unwrap();
        let router = handle.router().unwrap();

        let request = axum::http::Request::get("/users/1?fields=name")
            .header("x-api-key", "open-sesame")
            .header("x-caller", "tests")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"id": 1, "fields": "name", "caller": "tests"})
        );

        let request = axum::http::Request::get("/users/9")
            .header("x-api-key", "open-sesame")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["statusCode"], 404);

        let request = axum::http::Request::post("/users")
            .header("x-api-key", "open-sesame")
            .body(Body::from(r#"{"name":"ada"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await, json!({"name": "ada"}));

        assert!(app.stop().await.is_clean());
    }

    #[tokio::test]
    async fn interceptors_can_deny_or_answer_for_the_handler() {
        let module = users_module();
        let handle = module.handle();
        let app = Application::builder()
            .module(module.descriptor())
            .start("http")
            .await
            .unwrap();
        let router = handle.router().unwrap();

        let request = axum::http::Request::get("/users/1")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = axum::http::Request::get("/users/1")
            .header("x-api-key", "guess")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let request = axum::http::Request::get("/users/1?maintenance=1")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        app.stop().await;
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected_before_the_chain() {
        let module = HttpModule::builder("http")
            .constant(ConstantDescriptor::of(Users))
            .body_limit(16)
            .controller(HttpController::<Users>::new("/users").post("/", create_user()))
            .build();
        let handle = module.handle();
        let app = Application::builder()
            .module(module.descriptor())
            .start("http")
            .await
            .unwrap();
        let router = handle.router().unwrap();

        let request = axum::http::Request::post("/users")
            .body(Body::from(format!(r#"{{"name":"{}"}}"#, "a".repeat(64))))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["statusCode"], 413);

        let request = axum::http::Request::post("/users")
            .body(Body::from(r#"{"name":"ada"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        assert!(app.stop().await.is_clean());
    }

    #[tokio::test]
    async fn duplicate_routes_fail_start() {
        let module = HttpModule::builder("http")
            .constant(ConstantDescriptor::of(Users))
            .controller(HttpController::<Users>::new("/users").get("/{id}", find_user()))
            .controller(HttpController::<Users>::new("/users/").get("{id}", find_user()))
            .build();

        let err = Application::builder()
            .module(module.descriptor())
            .start("http")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LifecycleError::Definition(Error::DuplicateRegistration { .. })
        ));
    }

    #[tokio::test]
    async fn listening_module_serves_until_destroyed() {
        let health: Method<Users, Response> =
            Method::new("health", 0, |_: Arc<Users>, _: Arguments| async {
                Ok(StatusCode::OK.into_response())
            });
        let module = HttpModule::builder("http")
            .constant(ConstantDescriptor::of(Users))
            .controller(HttpController::<Users>::new("/").get("/health", health))
            .listen(([127, 0, 0, 1], 0).into())
            .build();
        let handle = module.handle();
        let app = Application::builder()
            .module(module.descriptor())
            .start("http")
            .await
            .unwrap();

        let addr = handle.local_addr().unwrap();
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 200"));

        assert!(app.stop().await.is_clean());
        assert!(handle.local_addr().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
