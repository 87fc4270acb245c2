// Web服务器模块

pub mod error;
pub mod handlers;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, BackendFactory};

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    let max_body_size = usize::try_from(state.config.server.max_body_size).unwrap_or(usize::MAX);

    // 配置中间件层
    // CorsLayer 要求响应体实现 Default，必须放在 RequestBodyLimitLayer 内侧
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .route("/l/:token", post(handlers::upload_file))
        .route("/l/:token/success", get(handlers::upload_success))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
