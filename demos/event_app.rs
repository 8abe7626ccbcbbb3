//! A small order service wired from four modules.
//!
//! `POST /orders` stores an order and announces `orders.placed`; the
//! notifications module picks the event up through its own interceptor
//! chain. Try it with:
//!
//! ```text
//! cargo run --example event-app
//! curl -XPOST localhost:3000/orders -H 'content-type: application/json' -d '{"item":"tea","quantity":2}'
//! curl localhost:3000/orders/1
//! ```

use modloom::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tower_http::trace::TraceLayer;

const ORDER_PLACED: &str = "orders.placed";

#[derive(Debug, Clone, Serialize)]
struct Order {
    id: u64,
    item: String,
    quantity: u32,
}

#[derive(Deserialize)]
struct NewOrder {
    item: String,
    quantity: u32,
}

#[derive(Default)]
struct OrderBook {
    orders: Mutex<Vec<Order>>,
}

impl OrderBook {
    fn add(&self, input: NewOrder) -> Order {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        let order = Order {
            id: orders.len() as u64 + 1,
            item: input.item,
            quantity: input.quantity,
        };
        orders.push(order.clone());
        order
    }

    fn find(&self, id: u64) -> Option<Order> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|order| order.id == id)
            .cloned()
    }

    fn len(&self) -> usize {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct OrderController {
    book: Arc<OrderBook>,
}

#[async_trait]
impl Injectable for OrderController {
    async fn inject(scope: &Scope) -> modloom::Result<Self> {
        Ok(Self {
            book: scope.resolve::<OrderBook>().await?,
        })
    }
}

impl OrderController {
    fn place() -> Method<Self, Response> {
        Method::new("place", 2, |this: Arc<Self>, args: Arguments| async move {
            let http = args.get::<HttpContext>(0)?;
            let announcer = args.get::<EventAnnouncer<Order>>(1)?;
            let order = this.book.add(http.json::<NewOrder>()?);
            announcer.announce(order.clone()).await?;
            Ok((StatusCode::CREATED, Json(order)).into_response())
        })
        .bind(ParameterBinding::of::<HttpContext>())
        .bind(inject_event_announcer::<Order>(ORDER_PLACED))
    }

    fn find() -> Method<Self, Response> {
        Method::new("find", 1, |this: Arc<Self>, args: Arguments| async move {
            let id = args
                .cloned::<Option<String>>(0)?
                .and_then(|id| id.parse::<u64>().ok())
                .ok_or_else(|| HttpError::bad_request("order id must be a number"))?;
            match this.book.find(id) {
                Some(order) => Ok(Json(order).into_response()),
                None => Err(HttpError::not_found(format!("order {id} not found")).into()),
            }
        })
        .bind(path_param("id"))
    }
}

#[derive(Default)]
struct Mailer {
    sent: AtomicU64,
}

impl Mailer {
    fn on_order_placed() -> Method<Self, ()> {
        Method::new("on_order_placed", 1, |this: Arc<Self>, args: Arguments| async move {
            let order = args.get::<Order>(0)?;
            this.sent.fetch_add(1, Ordering::Relaxed);
            tracing::info!(order = order.id, item = %order.item, "Confirmation sent");
            anyhow::Ok(())
        })
        .bind(ParameterBinding::new(ORDER_PLACED))
    }
}

fn store_module() -> Arc<ModuleDescriptor> {
    ModuleDescriptor::builder("store")
        .component(ComponentDescriptor::from_fn(|_| async { Ok(OrderBook::default()) }).singleton())
        .component(ComponentDescriptor::injectable::<LoggingInterceptor>().singleton())
        .on_destroy(Hook::new("store::report", |scope: Scope| async move {
            let book = scope.resolve::<OrderBook>().await?;
            tracing::info!(orders = book.len(), "Order book closed");
            Ok(())
        }))
        .build()
}

fn notifications_module() -> Arc<ModuleDescriptor> {
    EventSubscriptionModule::builder("notifications")
        .requires("store")
        .component(ComponentDescriptor::from_fn(|_| async { Ok(Mailer::default()) }).singleton())
        .interceptor(InterceptorRef::of::<LoggingInterceptor>())
        .controller(SubscriberController::<Mailer>::new().subscribe(ORDER_PLACED, Mailer::on_order_placed()))
        .build()
}

fn http_module() -> HttpModule {
    HttpModule::builder("http")
        .requires("store")
        .component(ComponentDescriptor::injectable::<OrderController>())
        .interceptor(InterceptorRef::of::<LoggingInterceptor>())
        .controller(
            HttpController::<OrderController>::new("/orders")
                .post("/", OrderController::place())
                .get("/{id}", OrderController::find()),
        )
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let http = http_module();
    let handle = http.handle();
    let app = Application::builder()
        .modules([store_module(), notifications_module(), http.descriptor()])
        .module(
            ModuleDescriptor::builder("app")
                .requires("http")
                .requires("notifications")
                .build(),
        )
        .start("app")
        .await?;

    let router = handle
        .router()
        .ok_or_else(|| anyhow::anyhow!("http module did not build its router"))?;
    let config = app.scope().resolve::<ConfigService>().await?;
    let port = config.get_parsed::<u16>("PORT").unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, router.layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = app.stop().await;
    for failure in &report.failures {
        tracing::error!(error = %failure, "Teardown failure");
    }
    tracing::info!(modules = report.destroyed.len(), "Server stopped");
    Ok(())
}
