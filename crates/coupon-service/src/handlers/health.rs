//! 健康检查
//!
//! 存活探针只反映进程状态；就绪探针检查存储和（启用时）Redis。

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::state::AppState;

const SERVICE_NAME: &str = "coupon-service";

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针
///
/// 存储不可用时返回 503，使负载均衡摘除该实例。Redis 只影响限流，
/// 故障时标记为 degraded 但仍然就绪。
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store_ok = state.dispenser.health_check().await.is_ok();
    let redis = match &state.cache {
        Some(cache) => {
            if cache.health_check().await.is_ok() {
                "ok"
            } else {
                "fail"
            }
        }
        None => "disabled",
    };

    let status = if !store_ok {
        "unavailable"
    } else if redis == "fail" {
        "degraded"
    } else {
        "ok"
    };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "checks": {
                "store": if store_ok { "ok" } else { "fail" },
                "redis": redis
            }
        })),
    )
}
