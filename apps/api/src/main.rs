use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::{
    Clock, CompositePublisher, EventPublisher, InMemorySchedulingStore, RedisSchedulingStore,
    SchedulingStore, SystemClock,
};
use appointment_cell::AppState;
use patient_queue_cell::{QueueState, RealtimeHub, WebhookPublisher};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic queue API server");

    let config = Arc::new(AppConfig::from_env());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn SchedulingStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisSchedulingStore::connect(url)
                .await
                .context("connecting to Redis")?,
        ),
        None => Arc::new(InMemorySchedulingStore::new(clock.clone())),
    };

    // Connected WebSocket clients always get events; an external relay is optional.
    let hub = Arc::new(RealtimeHub::new());
    let mut publishers: Vec<Arc<dyn EventPublisher>> = vec![hub.clone() as Arc<dyn EventPublisher>];
    if let Some(url) = &config.realtime_webhook_url {
        match WebhookPublisher::new(url.clone(), Duration::from_millis(config.publish_timeout_ms)) {
            Ok(webhook) => {
                info!("Relaying queue events to {}", url);
                publishers.push(Arc::new(webhook));
            }
            Err(e) => warn!("Realtime webhook disabled: {}", e),
        }
    }
    let publisher: Arc<dyn EventPublisher> = Arc::new(CompositePublisher::new(publishers));

    let state = Arc::new(AppState::new(config.clone(), store, clock, Some(publisher)));
    let queue_state = QueueState::new(state.clone(), hub);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(state, queue_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await.context("serving HTTP")?;

    Ok(())
}
