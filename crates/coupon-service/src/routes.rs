//! 路由配置模块
//!
//! 定义 REST API 端点和中间件层次

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use coupon_shared::config::HttpConfig;
use coupon_shared::observability::middleware as obs_middleware;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::{handlers, middleware::rate_limit_middleware, state::AppState};

/// 业务接口，挂载在 /api 下
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/claim", post(handlers::claim::claim_coupon))
        .route("/cooldown", get(handlers::cooldown::get_cooldown))
}

/// CORS 配置
///
/// 前端需要携带 `claimed` Cookie，因此开启 credentials；此时不能使用通配符，
/// 配置为 "*" 时回显请求的 Origin。
pub fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(obs_middleware::REQUEST_ID_HEADER),
        ]);

    if config.allowed_origins.iter().any(|o| o == "*") {
        warn!("CORS allowed_origins 包含 \"*\"，将回显任意来源");
        return base.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    info!("CORS allowed_origins: {}", config.allowed_origins.join(","));
    base.allow_origin(origins)
}

/// 构建完整路由
pub fn build_router(state: AppState, http: &HttpConfig) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors_layer(http))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
