//! 客户端限流中间件
//!
//! 基于 Redis 固定窗口计数器，按客户端身份令牌（地址哈希）限制请求频率，
//! 防止脚本绕过冷却之外的高频探测。使用 Redis INCR + EXPIRE 实现分布式计数，
//! 支持多实例部署。
//!
//! 未配置 Redis 或关闭限流时中间件直接放行；Redis 故障时同样放行。

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use coupon_shared::cache::{Cache, CacheKey};
use coupon_shared::observability::metrics;
use serde_json::json;
use tracing::warn;

use crate::identity::ClientIdentity;
use crate::state::AppState;

/// 限流窗口（秒）
const WINDOW_SECS: u64 = 60;

/// 限流中间件
///
/// 放置在 CORS 之内，预检请求不计入配额。
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(cache) = state.cache.as_ref() else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_string();
    if is_exempt_path(&path) || state.rate_limit_per_minute <= 0 {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = ClientIdentity::resolve(request.headers(), peer);

    let key = CacheKey::claim_rate_limit(identity.token.as_str(), window_key(WINDOW_SECS));
    match check_rate_limit(cache, &key, state.rate_limit_per_minute, WINDOW_SECS).await {
        Ok(remaining) if remaining < 0 => {
            warn!(
                identity = %identity.token.short(),
                path = %path,
                "客户端限流触发"
            );
            metrics::record_rate_limited(&path);
            return too_many_requests_response(WINDOW_SECS);
        }
        Err(e) => {
            warn!(error = %e, code = e.code(), "Redis 限流检查失败，跳过限流");
        }
        _ => {}
    }

    next.run(request).await
}

/// 返回剩余配额（负数表示已超限）
async fn check_rate_limit(
    cache: &Cache,
    key: &str,
    max_requests: i64,
    window_secs: u64,
) -> Result<i64, coupon_shared::error::SharedError> {
    let count = cache
        .incr_window(key, Duration::from_secs(window_secs))
        .await?;
    Ok(max_requests - count)
}

/// 以窗口大小对齐的 Unix 时间戳，相同窗口内的请求共享同一个计数器
fn window_key(window_secs: u64) -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now / window_secs
}

/// 免限流路径：只有 /api 下的业务接口计数
fn is_exempt_path(path: &str) -> bool {
    !path.starts_with("/api/")
}

fn too_many_requests_response(window_secs: u64) -> Response {
    let body = json!({
        "message": "Too many requests, please slow down."
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    if let Ok(val) = HeaderValue::from_str(&window_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, val);
    }
    response
}
