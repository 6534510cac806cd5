use crate::app::CoreAppHandle;
use crate::protocol::{ProtocolConfig, ProtocolPlugin};
use async_trait::async_trait;
use axum::{
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod handlers;
pub mod middleware;
pub mod schemas;


pub use handlers::*;
pub use middleware::{logging_middleware, request_id_middleware};
pub use schemas::*;

/// HTTP 协议插件实现
pub struct HttpProtocol {
    shutdown: Arc<Notify>,
}

impl HttpProtocol {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Notify::new()),
        }
    }
}

impl Default for HttpProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolPlugin for HttpProtocol {
    fn name(&self) -> &'static str {
        "http-rest"
    }

    async fn start(&self, core_handle: CoreAppHandle, config: ProtocolConfig) -> anyhow::Result<()> {
        info!("Starting HTTP protocol plugin on {}", config.listen_addr);

        let app = create_router(
            AppState::new(core_handle),
            Duration::from_secs(config.request_timeout_secs),
        );

        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        info!("Shutting down HTTP protocol plugin");
        // notify_one 会保留许可，即使服务器尚未开始等待
        self.shutdown.notify_one();
        Ok(())
    }
}

/// 应用状态，包含核心服务的引用
#[derive(Clone)]
pub struct AppState {
    pub core_handle: CoreAppHandle,
}

impl AppState {
    pub fn new(core_handle: CoreAppHandle) -> Self {
        Self { core_handle }
    }
}

/// 创建 Axum 路由器
pub fn create_router(app_state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        // 健康检查端点
        .route("/health", get(health_handler))
        .nest("/api/v1", create_v1_routes())
        .with_state(app_state)
        // 全局中间件，自外向内
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(from_fn(request_id_middleware))
                .layer(from_fn(logging_middleware))
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// 创建 API v1 路由
fn create_v1_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/hosts/{host}/versions",
            get(list_versions_handler).post(create_version_handler),
        )
        .route("/hosts/{host}/versions/{version}", get(get_content_handler))
        .route("/hosts/{host}/preview", post(preview_handler))
        .route("/hosts/{host}/apply", post(apply_handler))
        .route("/hosts/{host}/rollback", post(rollback_handler))
        .route("/hosts/{host}/status", get(status_handler))
}

/// 健康检查处理器
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
